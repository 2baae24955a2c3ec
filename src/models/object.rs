//! Represents an object (file) row in the local backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Metadata for a single stored object. The payload lives on disk.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Object {
    pub id: Uuid,

    /// Parent bucket.
    pub bucket_id: Uuid,

    /// Full `/`-delimited key, no leading slash.
    pub key: String,

    /// Last path segment of the key.
    pub filename: String,

    /// Content type (MIME type) supplied at upload.
    pub content_type: Option<String>,

    pub size_bytes: i64,

    /// Hex MD5 of the payload.
    pub etag: String,

    pub last_modified: DateTime<Utc>,
}
