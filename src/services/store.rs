//! src/services/store.rs
//!
//! The page-level contract every backing store implements, and the error type
//! shared by all backends and the gateway built on top of them.

use crate::models::listing::{ListPage, ListPageRequest, ObjectBody};
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("region `{0}` is not supported")]
    UnsupportedRegion(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("listing of bucket `{bucket}` did not terminate: {reason}")]
    Pagination { bucket: String, reason: String },
    #[error("store backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StoreError {
    /// True for the absent-bucket and absent-key cases.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::BucketNotFound(_) | StoreError::ObjectNotFound { .. }
        )
    }

    pub(crate) fn object_not_found(bucket: &str, key: &str) -> Self {
        StoreError::ObjectNotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A flat, key-addressed object store with paginated listings.
///
/// Implementations must be safe to share across tasks; any client that is not
/// serialises access internally.
#[async_trait]
pub trait ObjectStoreBackend: Send + Sync + 'static {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    async fn list_buckets(&self) -> StoreResult<Vec<String>>;

    /// Create a bucket. Fails if it already exists.
    async fn create_bucket(&self, bucket: &str, region: &str) -> StoreResult<()>;

    /// Return a single page of keys. An empty bucket yields an empty page.
    async fn list_page(&self, bucket: &str, request: &ListPageRequest) -> StoreResult<ListPage>;

    /// Fetch an object, failing with `ObjectNotFound` if the key is absent.
    async fn get_object(&self, bucket: &str, key: &str) -> StoreResult<ObjectBody>;

    /// Write an object, replacing any existing payload under the same key.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> StoreResult<()>;

    /// Remove the given keys. Missing keys are ignored.
    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> StoreResult<()>;
}
