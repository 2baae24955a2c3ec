//! src/services/cache_orchestrator.rs
//!
//! Keeps the cache bucket in step with the source bucket. A batch lists the
//! cache bucket once, works out which keys need a thumbnail and regenerates
//! them on a bounded set of tasks. Every requested key gets exactly one
//! terminal outcome; one key failing never stops the others.

use crate::{
    models::{
        cache::{CacheMode, CacheOutcome},
        listing::ObjectBody,
    },
    services::{
        gateway::ObjectStoreGateway,
        store::StoreResult,
        transcoder::{TranscodeError, Transcoder},
    },
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    sync::Arc,
};
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{debug, info, warn};

/// Derive the cache key for `source_key`. This naming is a persisted format.
pub fn cache_key(source_key: &str, suffix: &str) -> String {
    format!("{source_key}_{suffix}")
}

#[derive(Clone)]
pub struct CacheOrchestrator {
    gateway: ObjectStoreGateway,
    transcoder: Arc<dyn Transcoder>,
    source_bucket: String,
    cache_bucket: String,
    cache_suffix: String,
}

impl CacheOrchestrator {
    pub fn new(
        gateway: ObjectStoreGateway,
        transcoder: Arc<dyn Transcoder>,
        source_bucket: impl Into<String>,
        cache_bucket: impl Into<String>,
        cache_suffix: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            transcoder,
            source_bucket: source_bucket.into(),
            cache_bucket: cache_bucket.into(),
            cache_suffix: cache_suffix.into(),
        }
    }

    pub fn cache_key(&self, source_key: &str) -> String {
        cache_key(source_key, &self.cache_suffix)
    }

    /// Ensure every key in `keys` has a cache entry.
    ///
    /// With `FillMissing`, keys whose cache entry already exists are
    /// `Skipped`; with `ForceOverwrite` every key is regenerated. At most
    /// `max_concurrency` keys are in flight at once (0 is treated as 1).
    /// Returns after every task has finished. Only the initial cache listing
    /// can fail the call as a whole.
    ///
    /// The batch runs on its own task. Dropping the returned future detaches
    /// it, and transcodes that already started still run to completion.
    pub async fn ensure_cache<I, S>(
        &self,
        keys: I,
        mode: CacheMode,
        max_concurrency: usize,
    ) -> StoreResult<BTreeMap<String, CacheOutcome>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requested: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
        if requested.is_empty() {
            return Ok(BTreeMap::new());
        }

        // Listed in both modes so a missing cache bucket fails the call either way.
        let listed = self.gateway.list_all(&self.cache_bucket, None).await?;
        let existing: HashSet<String> = match mode {
            CacheMode::ForceOverwrite => HashSet::new(),
            CacheMode::FillMissing => listed.into_iter().collect(),
        };

        let mut outcomes = BTreeMap::new();
        let mut work = Vec::new();
        for key in requested {
            let cache_key = self.cache_key(&key);
            if existing.contains(&cache_key) {
                outcomes.insert(key, CacheOutcome::Skipped);
            } else {
                work.push((key, cache_key));
            }
        }

        let dispatched: Vec<String> = work.iter().map(|(key, _)| key.clone()).collect();
        let batch = tokio::spawn(self.clone().run_batch(work, max_concurrency));
        match batch.await {
            Ok(generated) => outcomes.extend(generated),
            Err(err) => {
                warn!("cache batch task failed: {}", err);
                let reason = format!("batch aborted: {err}");
                for key in &dispatched {
                    outcomes
                        .entry(key.clone())
                        .or_insert_with(|| CacheOutcome::Failed(reason.clone()));
                }
            }
        }

        log_summary(&outcomes, dispatched.len());
        Ok(outcomes)
    }

    /// Ensure a single key. The existence check is a prefix-scoped listing
    /// instead of a full cache listing, and also confirms the cache bucket
    /// exists in `ForceOverwrite` mode.
    pub async fn save_to_cache(&self, key: &str, mode: CacheMode) -> StoreResult<CacheOutcome> {
        let cache_key = self.cache_key(key);
        let cached = self.gateway.exists(&self.cache_bucket, &cache_key).await?;
        if mode == CacheMode::FillMissing && cached {
            debug!(key, "cache entry exists, not overwriting");
            return Ok(CacheOutcome::Skipped);
        }

        let this = self.clone();
        let source_key = key.to_string();
        let task = tokio::spawn(async move { this.generate(&source_key, &cache_key).await });
        Ok(match task.await {
            Ok(outcome) => outcome,
            Err(err) => failed(key, "task", err),
        })
    }

    /// Fetch the cached thumbnail for `key`.
    pub async fn load_from_cache(&self, key: &str) -> StoreResult<ObjectBody> {
        self.gateway
            .get_body(&self.cache_bucket, &self.cache_key(key))
            .await
    }

    /// Fetch the original object for `key`.
    pub async fn load_original(&self, key: &str) -> StoreResult<ObjectBody> {
        self.gateway.get_body(&self.source_bucket, key).await
    }

    async fn run_batch(
        self,
        work: Vec<(String, String)>,
        max_concurrency: usize,
    ) -> BTreeMap<String, CacheOutcome> {
        let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::new();
        let mut outcomes = BTreeMap::new();

        for (key, cache_key) in work {
            // Wait for a slot before spawning so queued keys start no I/O.
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    outcomes.insert(key, CacheOutcome::Failed("scheduler closed".into()));
                    continue;
                }
            };
            let this = self.clone();
            let task_key = key.clone();
            let handle = tasks.spawn(async move {
                let outcome = this.generate(&task_key, &cache_key).await;
                drop(permit);
                (task_key, outcome)
            });
            in_flight.insert(handle.id(), key);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, (key, outcome))) => {
                    in_flight.remove(&id);
                    outcomes.insert(key, outcome);
                }
                Err(err) => {
                    if let Some(key) = in_flight.remove(&err.id()) {
                        warn!(key, "cache task aborted: {}", err);
                        let outcome = CacheOutcome::Failed(format!("task aborted: {err}"));
                        outcomes.insert(key, outcome);
                    }
                }
            }
        }
        outcomes
    }

    /// Fetch, transcode and store one key. Never returns an error: every
    /// failure becomes `CacheOutcome::Failed`.
    async fn generate(&self, key: &str, cache_key: &str) -> CacheOutcome {
        let original = match self.gateway.get_body(&self.source_bucket, key).await {
            Ok(body) => body,
            Err(err) => return failed(key, "fetch", err),
        };
        let bytes = match original.collect().await {
            Ok(bytes) => bytes,
            Err(err) => return failed(key, "read", err),
        };

        let transcoder = self.transcoder.clone();
        let hint = key.to_string();
        let transcoded =
            tokio::task::spawn_blocking(move || transcoder.transcode(&bytes, &hint))
                .await
                .unwrap_or_else(|err| {
                    Err(TranscodeError::Task {
                        key: key.to_string(),
                        reason: err.to_string(),
                    })
                });

        let thumbnail = match transcoded {
            Ok(Some(thumbnail)) => thumbnail,
            Ok(None) => {
                debug!(key, "not an image, no cache entry");
                return CacheOutcome::SkippedNotImage;
            }
            Err(err) => return failed(key, "transcode", err),
        };

        match self
            .gateway
            .put_object(
                &self.cache_bucket,
                cache_key,
                thumbnail.data,
                Some(thumbnail.content_type),
            )
            .await
        {
            Ok(()) => {
                debug!(key, cache_key, "cache entry written");
                CacheOutcome::Generated
            }
            Err(err) => failed(key, "put", err),
        }
    }
}

fn failed(key: &str, stage: &str, err: impl std::fmt::Display) -> CacheOutcome {
    warn!(key, stage, "cache generation failed: {}", err);
    CacheOutcome::Failed(format!("{stage}: {err}"))
}

fn log_summary(outcomes: &BTreeMap<String, CacheOutcome>, dispatched: usize) {
    let mut generated = 0;
    let mut skipped = 0;
    let mut not_images = 0;
    let mut failures = 0;
    for outcome in outcomes.values() {
        match outcome {
            CacheOutcome::Generated => generated += 1,
            CacheOutcome::Skipped => skipped += 1,
            CacheOutcome::SkippedNotImage => not_images += 1,
            CacheOutcome::Failed(_) => failures += 1,
        }
    }
    info!(
        requested = outcomes.len(),
        dispatched, generated, skipped, not_images, failures, "cache batch complete"
    );
}
