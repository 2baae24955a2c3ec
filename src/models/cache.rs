//! Cache orchestration modes, per-key outcomes and transcoder output.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Whether a batch regenerates everything or only what is missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    FillMissing,
    ForceOverwrite,
}

impl CacheMode {
    pub fn from_overwrite(overwrite: bool) -> Self {
        if overwrite {
            Self::ForceOverwrite
        } else {
            Self::FillMissing
        }
    }
}

/// Terminal result for one key of a cache batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum CacheOutcome {
    /// A thumbnail was written to the cache bucket.
    Generated,
    /// A cache entry already existed.
    Skipped,
    /// The transcoder does not recognise the object as an image.
    SkippedNotImage,
    /// Fetch, transcode or put failed.
    Failed(String),
}

impl CacheOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Servable thumbnail bytes produced by a transcoder.
#[derive(Clone, Debug)]
pub struct Thumbnail {
    pub data: Bytes,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}
