//! Navigator: the browsing view over the source bucket.
//!
//! Combines a directory listing with a fill-missing cache pass over the
//! listed files. Cache problems are logged and never fail navigation; the
//! client simply gets no thumbnail for the affected keys.

use crate::{
    models::{
        cache::{CacheMode, CacheOutcome},
        listing::{ListingOptions, ObjectBody},
    },
    services::{
        cache_orchestrator::CacheOrchestrator,
        gateway::ObjectStoreGateway,
        partitioner::{self, DirectoryPartitioner},
        store::StoreResult,
    },
};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct NavigationView {
    /// Current directory, `.` for the root.
    pub cur_dir: String,
    pub nav_dirs: Vec<String>,
    pub keys: Vec<String>,
    /// Cache outcome for each listed file. Empty if the cache pass failed.
    pub cache: BTreeMap<String, CacheOutcome>,
}

#[derive(Clone)]
pub struct Navigator {
    gateway: ObjectStoreGateway,
    partitioner: DirectoryPartitioner,
    orchestrator: CacheOrchestrator,
    source_bucket: String,
    cache_bucket: String,
    region: String,
    max_concurrency: usize,
}

impl Navigator {
    pub fn new(
        gateway: ObjectStoreGateway,
        orchestrator: CacheOrchestrator,
        source_bucket: impl Into<String>,
        cache_bucket: impl Into<String>,
        region: impl Into<String>,
        max_concurrency: usize,
    ) -> Self {
        let source_bucket = source_bucket.into();
        Self {
            partitioner: DirectoryPartitioner::new(gateway.clone(), source_bucket.clone()),
            gateway,
            orchestrator,
            source_bucket,
            cache_bucket: cache_bucket.into(),
            region: region.into(),
            max_concurrency,
        }
    }

    pub fn gateway(&self) -> &ObjectStoreGateway {
        &self.gateway
    }

    /// Source and cache bucket names, in that order.
    pub fn bucket_names(&self) -> [&str; 2] {
        [&self.source_bucket, &self.cache_bucket]
    }

    /// Create the source and cache buckets if they do not exist yet.
    pub async fn init_buckets(&self) -> StoreResult<()> {
        for bucket in self.bucket_names() {
            self.gateway
                .create_bucket_if_absent(bucket, &self.region)
                .await?;
        }
        Ok(())
    }

    pub async fn navigate(
        &self,
        relative_path: &str,
        options: ListingOptions,
    ) -> StoreResult<NavigationView> {
        let path = partitioner::normalize(relative_path);
        let listing = self.partitioner.list(path, options).await?;

        let cache = match self
            .orchestrator
            .ensure_cache(
                listing.files.iter().cloned(),
                CacheMode::FillMissing,
                self.max_concurrency,
            )
            .await
        {
            Ok(outcomes) => outcomes,
            Err(err) => {
                warn!(path, "cache pass failed: {}", err);
                BTreeMap::new()
            }
        };

        Ok(NavigationView {
            cur_dir: if path.is_empty() { ".".into() } else { path.to_string() },
            nav_dirs: listing.directories,
            keys: listing.files,
            cache,
        })
    }

    pub async fn thumbnail(&self, key: &str) -> StoreResult<ObjectBody> {
        self.orchestrator.load_from_cache(key).await
    }

    pub async fn media(&self, key: &str) -> StoreResult<ObjectBody> {
        self.orchestrator.load_original(key).await
    }

    /// Ensure thumbnails for `keys`. A single key skips the full cache
    /// listing and checks only its own entry.
    pub async fn ensure(
        &self,
        mut keys: Vec<String>,
        overwrite: bool,
    ) -> StoreResult<BTreeMap<String, CacheOutcome>> {
        let mode = CacheMode::from_overwrite(overwrite);
        if keys.len() == 1 {
            if let Some(key) = keys.pop() {
                let outcome = self.orchestrator.save_to_cache(&key, mode).await?;
                return Ok(BTreeMap::from([(key, outcome)]));
            }
        }
        self.orchestrator
            .ensure_cache(keys, mode, self.max_concurrency)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        memory_backend::MemoryBackend,
        store::ObjectStoreBackend,
        transcoder::{ImageTranscoder, ThumbnailConfig},
    };
    use bytes::Bytes;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::{io::Cursor, sync::Arc};

    fn png() -> Bytes {
        let mut buf = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(4, 8))
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        Bytes::from(buf)
    }

    fn navigator(backend: Arc<MemoryBackend>) -> Navigator {
        let gateway = ObjectStoreGateway::new(backend, 1000);
        let orchestrator = CacheOrchestrator::new(
            gateway.clone(),
            Arc::new(ImageTranscoder::new(ThumbnailConfig::default())),
            "libression-data",
            "libression-cache",
            "cache.jpg",
        );
        Navigator::new(
            gateway,
            orchestrator,
            "libression-data",
            "libression-cache",
            "us-east-2",
            4,
        )
    }

    #[tokio::test]
    async fn navigate_lists_and_fills_cache() {
        let backend = Arc::new(MemoryBackend::new());
        let nav = navigator(backend.clone());
        nav.init_buckets().await.unwrap();
        for key in ["trip/day1.png", "trip/readme.txt", "trip/raw/x.png", "top.png"] {
            backend
                .put_object("libression-data", key, png(), Some("image/png"))
                .await
                .unwrap();
        }

        let view = nav
            .navigate("trip/", ListingOptions::default())
            .await
            .unwrap();
        assert_eq!(view.cur_dir, "trip");
        assert_eq!(view.nav_dirs, vec!["trip/raw"]);
        assert_eq!(view.keys, vec!["trip/day1.png", "trip/readme.txt"]);
        assert_eq!(view.cache["trip/day1.png"], CacheOutcome::Generated);
        assert_eq!(view.cache["trip/readme.txt"], CacheOutcome::SkippedNotImage);

        let thumb = nav.thumbnail("trip/day1.png").await.unwrap();
        assert_eq!(thumb.content_type.as_deref(), Some("image/jpeg"));
        let media = nav.media("trip/day1.png").await.unwrap();
        assert_eq!(media.content_type.as_deref(), Some("image/png"));
        assert!(nav.thumbnail("top.png").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn navigation_survives_a_broken_cache_bucket() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .create_bucket("libression-data", "local")
            .await
            .unwrap();
        backend
            .put_object("libression-data", "a.png", png(), None)
            .await
            .unwrap();

        let view = navigator(backend)
            .navigate("", ListingOptions::default())
            .await
            .unwrap();
        assert_eq!(view.cur_dir, ".");
        assert_eq!(view.keys, vec!["a.png"]);
        assert!(view.cache.is_empty());
    }

    #[tokio::test]
    async fn ensure_single_key_uses_scoped_check() {
        let backend = Arc::new(MemoryBackend::new());
        let nav = navigator(backend.clone());
        nav.init_buckets().await.unwrap();
        backend
            .put_object("libression-data", "solo.png", png(), None)
            .await
            .unwrap();

        let first = nav.ensure(vec!["solo.png".into()], false).await.unwrap();
        assert_eq!(first["solo.png"], CacheOutcome::Generated);
        let second = nav.ensure(vec!["solo.png".into()], false).await.unwrap();
        assert_eq!(second["solo.png"], CacheOutcome::Skipped);
        let forced = nav.ensure(vec!["solo.png".into()], true).await.unwrap();
        assert_eq!(forced["solo.png"], CacheOutcome::Generated);
    }

    #[tokio::test]
    async fn init_buckets_is_repeatable() {
        let backend = Arc::new(MemoryBackend::new());
        let nav = navigator(backend.clone());
        nav.init_buckets().await.unwrap();
        nav.init_buckets().await.unwrap();
        assert_eq!(
            backend.list_buckets().await.unwrap(),
            vec!["libression-cache", "libression-data"]
        );
    }
}
