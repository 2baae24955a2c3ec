//! In-process backend holding every bucket in memory.
//!
//! Useful for ephemeral runs (`--backend memory`) and as the store behind the
//! orchestrator and partitioner tests. The page size and the presence of
//! continuation tokens are configurable so pagination edge cases can be
//! reproduced without a real endpoint.

use crate::{
    models::listing::{ListPage, ListPageRequest, ObjectBody},
    services::store::{ObjectStoreBackend, StoreError, StoreResult},
};
use async_trait::async_trait;
use bytes::Bytes;
use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicUsize, Ordering},
};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
struct StoredObject {
    body: Bytes,
    content_type: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    buckets: RwLock<HashMap<String, BTreeMap<String, StoredObject>>>,
    page_size: Option<usize>,
    omit_tokens: bool,
    list_calls: AtomicUsize,
    put_calls: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap every page at `page_size` keys regardless of the requested size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Report truncation without handing out a continuation token, like
    /// marker-based listings that only return `NextMarker` with a delimiter.
    pub fn without_continuation_tokens(mut self) -> Self {
        self.omit_tokens = true;
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStoreBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn list_buckets(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.buckets.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_bucket(&self, bucket: &str, _region: &str) -> StoreResult<()> {
        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(bucket) {
            return Err(StoreError::BucketAlreadyExists(bucket.to_string()));
        }
        buckets.insert(bucket.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn list_page(&self, bucket: &str, request: &ListPageRequest) -> StoreResult<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let buckets = self.buckets.read().await;
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;

        let limit = match self.page_size {
            Some(size) => size.min(request.max_keys.max(1)),
            None => request.max_keys.max(1),
        };
        let after = request
            .continuation_token
            .as_deref()
            .or(request.start_after.as_deref());
        let prefix = request.prefix.as_deref().unwrap_or("");

        let mut matching = objects
            .keys()
            .filter(|key| after.is_none_or(|after| key.as_str() > after))
            .filter(|key| key.starts_with(prefix));

        let keys: Vec<String> = matching.by_ref().take(limit).cloned().collect();
        let is_truncated = matching.next().is_some();
        let next_continuation_token = if is_truncated && !self.omit_tokens {
            keys.last().cloned()
        } else {
            None
        };

        Ok(ListPage {
            keys,
            is_truncated,
            next_continuation_token,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectBody> {
        let buckets = self.buckets.read().await;
        let object = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?
            .get(key)
            .ok_or_else(|| StoreError::object_not_found(bucket, key))?;
        Ok(ObjectBody::from_bytes(
            object.body.clone(),
            object.content_type.clone(),
        ))
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StoreResult<()> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.map(str::to_string),
            },
        );
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StoreResult<()> {
        let mut buckets = self.buckets.write().await;
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        for key in keys {
            objects.remove(key);
        }
        Ok(())
    }
}
