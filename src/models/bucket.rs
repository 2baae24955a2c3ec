//! Represents a namespace (bucket) row in the local backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A bucket known to the local backend.
///
/// The photo library only ever uses two of these: the source bucket holding
/// originals and the cache bucket holding derived thumbnails.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Bucket {
    /// Internal identifier used as foreign key by object rows.
    pub id: Uuid,

    /// Bucket name (S3 naming rules).
    pub name: String,

    /// Region recorded at creation time (e.g. "us-east-2").
    pub region: String,

    /// When this bucket was created.
    pub created_at: DateTime<Utc>,
}
