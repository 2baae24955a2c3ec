//! src/services/gateway.rs
//!
//! ObjectStoreGateway: the single entry point the rest of the library uses
//! to talk to a backing store. It hides pagination behind `list_all` and owns
//! the backend for its whole lifetime.

use crate::{
    models::listing::{ListPageRequest, MAX_KEYS_PER_PAGE, ObjectBody},
    services::store::{ObjectStoreBackend, StoreError, StoreResult},
};
use bytes::Bytes;
use std::{collections::HashSet, sync::Arc};
use tracing::{debug, info};

#[derive(Clone)]
pub struct ObjectStoreGateway {
    backend: Arc<dyn ObjectStoreBackend>,
    page_size: usize,
}

impl ObjectStoreGateway {
    pub fn new(backend: Arc<dyn ObjectStoreBackend>, page_size: usize) -> Self {
        Self {
            backend,
            page_size: page_size.clamp(1, MAX_KEYS_PER_PAGE),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// List every key in `bucket` starting with `prefix`, following
    /// continuation markers until the store stops reporting truncation.
    ///
    /// The result is sorted lexically and free of duplicates. A store that
    /// truncates without a token is resumed from the last key it returned.
    /// Fails with `Pagination` when the store repeats a continuation token,
    /// stops advancing, or truncates an empty page without a token.
    pub async fn list_all(
        &self,
        bucket: &str,
        prefix: Option<&str>,
    ) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut request = ListPageRequest {
            prefix: prefix.filter(|p| !p.is_empty()).map(str::to_string),
            max_keys: self.page_size,
            ..Default::default()
        };
        let mut seen_tokens = HashSet::new();
        let mut pages = 0usize;

        loop {
            let page = self.backend.list_page(bucket, &request).await?;
            pages += 1;

            if !page.is_truncated {
                keys.extend(page.keys);
                break;
            }

            let resume = match page.next_continuation_token {
                Some(token) => {
                    if !seen_tokens.insert(token.clone()) {
                        return Err(StoreError::Pagination {
                            bucket: bucket.to_string(),
                            reason: format!("continuation token `{token}` repeated"),
                        });
                    }
                    (Some(token), None)
                }
                None => match page.keys.last() {
                    Some(last) => {
                        if let Some(previous) = request.start_after.as_deref() {
                            if last.as_str() <= previous {
                                return Err(StoreError::Pagination {
                                    bucket: bucket.to_string(),
                                    reason: format!("listing did not advance past `{previous}`"),
                                });
                            }
                        }
                        (None, Some(last.clone()))
                    }
                    None => {
                        return Err(StoreError::Pagination {
                            bucket: bucket.to_string(),
                            reason: "truncated empty page without a continuation token".into(),
                        });
                    }
                },
            };
            (request.continuation_token, request.start_after) = resume;
            keys.extend(page.keys);
        }

        keys.sort_unstable();
        keys.dedup();
        debug!(
            bucket,
            prefix = prefix.unwrap_or(""),
            pages,
            keys = keys.len(),
            "listed bucket"
        );
        Ok(keys)
    }

    /// True if `key` itself exists in `bucket`.
    pub async fn exists(&self, bucket: &str, key: &str) -> StoreResult<bool> {
        let keys = self.list_all(bucket, Some(key)).await?;
        Ok(keys.binary_search_by(|k| k.as_str().cmp(key)).is_ok())
    }

    /// Fetch an object. Fails with `ObjectNotFound` if the key is absent.
    pub async fn get_body(&self, bucket: &str, key: &str) -> StoreResult<ObjectBody> {
        self.backend.get_object(bucket, key).await
    }

    /// Unconditional overwrite.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StoreResult<()> {
        self.backend.put_object(bucket, key, body, content_type).await
    }

    pub async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.backend.delete_objects(bucket, keys).await
    }

    pub async fn list_buckets(&self) -> StoreResult<Vec<String>> {
        self.backend.list_buckets().await
    }

    /// Create `bucket` unless it is already present. Returns whether it was
    /// created by this call.
    pub async fn create_bucket_if_absent(
        &self,
        bucket: &str,
        region: &str,
    ) -> StoreResult<bool> {
        if self.list_buckets().await?.iter().any(|b| b == bucket) {
            return Ok(false);
        }
        match self.backend.create_bucket(bucket, region).await {
            Ok(()) => {
                info!("Created bucket {} in {}", bucket, region);
                Ok(true)
            }
            Err(StoreError::BucketAlreadyExists(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::listing::ListPage, services::memory_backend::MemoryBackend};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every listing with the same page, whatever the request.
    struct StuckBackend {
        page: ListPage,
        calls: AtomicUsize,
    }

    impl StuckBackend {
        fn new(keys: &[&str], token: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                page: ListPage {
                    keys: keys.iter().map(|k| k.to_string()).collect(),
                    is_truncated: true,
                    next_continuation_token: token.map(str::to_string),
                },
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ObjectStoreBackend for StuckBackend {
        fn name(&self) -> &'static str {
            "stuck"
        }

        async fn list_buckets(&self) -> StoreResult<Vec<String>> {
            Ok(vec!["photos".into()])
        }

        async fn create_bucket(&self, bucket: &str, _region: &str) -> StoreResult<()> {
            Err(StoreError::BucketAlreadyExists(bucket.to_string()))
        }

        async fn list_page(
            &self,
            _bucket: &str,
            _request: &ListPageRequest,
        ) -> StoreResult<ListPage> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.page.clone())
        }

        async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectBody> {
            Err(StoreError::object_not_found(bucket, key))
        }

        async fn put_object(
            &self,
            _bucket: &str,
            _key: &str,
            _body: Bytes,
            _content_type: Option<&str>,
        ) -> StoreResult<()> {
            Ok(())
        }

        async fn delete_objects(&self, _bucket: &str, _keys: &[String]) -> StoreResult<()> {
            Ok(())
        }
    }

    async fn expect_pagination_error(backend: Arc<StuckBackend>, max_calls: usize) {
        let gateway = ObjectStoreGateway::new(backend.clone(), 1000);
        let err = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            gateway.list_all("photos", None),
        )
        .await
        .expect("listing terminates")
        .unwrap_err();
        assert!(matches!(err, StoreError::Pagination { .. }), "{err}");
        assert!(backend.calls.load(Ordering::SeqCst) <= max_calls);
    }

    async fn seeded(backend: MemoryBackend, keys: &[String]) -> Arc<MemoryBackend> {
        let backend = Arc::new(backend);
        backend.create_bucket("photos", "local").await.unwrap();
        for key in keys {
            backend
                .put_object("photos", key, Bytes::from_static(b"x"), None)
                .await
                .unwrap();
        }
        backend
    }

    fn numbered(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("rubbish_max_keys_{i}")).collect()
    }

    #[tokio::test]
    async fn list_all_follows_every_truncated_page() {
        let keys = numbered(100);
        let backend = seeded(MemoryBackend::new().with_page_size(10), &keys).await;
        let gateway = ObjectStoreGateway::new(backend.clone(), 1000);

        let listed = gateway.list_all("photos", None).await.unwrap();

        let mut expected = keys.clone();
        expected.sort();
        assert_eq!(listed, expected);
        assert_eq!(backend.list_calls(), 10);
    }

    #[tokio::test]
    async fn list_all_resumes_from_last_key_without_tokens() {
        let keys = numbered(23);
        let backend = seeded(
            MemoryBackend::new()
                .with_page_size(5)
                .without_continuation_tokens(),
            &keys,
        )
        .await;
        let gateway = ObjectStoreGateway::new(backend, 1000);

        let listed = gateway.list_all("photos", None).await.unwrap();
        assert_eq!(listed.len(), 23);
        let unique: HashSet<_> = listed.iter().collect();
        assert_eq!(unique.len(), 23);
    }

    #[tokio::test]
    async fn list_all_applies_prefix_and_empty_bucket_is_empty() {
        let backend = seeded(
            MemoryBackend::new().with_page_size(2),
            &["a/1.png".into(), "a/2.png".into(), "b/3.png".into()],
        )
        .await;
        backend.create_bucket("empty", "local").await.unwrap();
        let gateway = ObjectStoreGateway::new(backend, 1000);

        assert_eq!(
            gateway.list_all("photos", Some("a/")).await.unwrap(),
            vec!["a/1.png", "a/2.png"]
        );
        assert!(gateway.list_all("empty", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_all_surfaces_missing_bucket() {
        let gateway = ObjectStoreGateway::new(Arc::new(MemoryBackend::new()), 1000);
        let err = gateway.list_all("nowhere", None).await.unwrap_err();
        assert!(matches!(err, StoreError::BucketNotFound(_)));
    }

    #[tokio::test]
    async fn exists_matches_exact_key_only() {
        let backend = seeded(MemoryBackend::new(), &["a.png_cache.jpg".into()]).await;
        let gateway = ObjectStoreGateway::new(backend, 1000);
        assert!(gateway.exists("photos", "a.png_cache.jpg").await.unwrap());
        assert!(!gateway.exists("photos", "a.png").await.unwrap());
    }

    #[tokio::test]
    async fn create_bucket_if_absent_is_idempotent() {
        let gateway = ObjectStoreGateway::new(Arc::new(MemoryBackend::new()), 1000);
        assert!(
            gateway
                .create_bucket_if_absent("libression-cache", "us-east-2")
                .await
                .unwrap()
        );
        assert!(
            !gateway
                .create_bucket_if_absent("libression-cache", "us-east-2")
                .await
                .unwrap()
        );
        assert_eq!(
            gateway.list_buckets().await.unwrap(),
            vec!["libression-cache"]
        );
    }

    #[tokio::test]
    async fn list_all_rejects_a_listing_that_stops_advancing() {
        expect_pagination_error(StuckBackend::new(&["a", "b"], None), 2).await;
    }

    #[tokio::test]
    async fn list_all_rejects_a_repeated_token() {
        expect_pagination_error(StuckBackend::new(&["a"], Some("again")), 2).await;
    }

    #[tokio::test]
    async fn list_all_rejects_truncated_empty_page_without_token() {
        expect_pagination_error(StuckBackend::new(&[], None), 1).await;
    }
}
