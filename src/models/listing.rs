//! Listing pages, object bodies and the partitioned directory view.

use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream::BoxStream};
use serde::Serialize;
use std::{fmt, io};

/// Upper bound a single listing page may request, mirroring S3.
pub const MAX_KEYS_PER_PAGE: usize = 1000;

/// One request for a page of keys.
#[derive(Clone, Debug, Default)]
pub struct ListPageRequest {
    pub prefix: Option<String>,
    /// Opaque token returned by the previous page.
    pub continuation_token: Option<String>,
    /// Start strictly after this key. Used when a store truncates without a token.
    pub start_after: Option<String>,
    pub max_keys: usize,
}

/// One page of keys as returned by a backend.
#[derive(Clone, Debug, Default)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

/// A fetched object: its content type and a byte stream over the payload.
pub struct ObjectBody {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub stream: BoxStream<'static, io::Result<Bytes>>,
}

impl ObjectBody {
    /// Wrap an in-memory payload.
    pub fn from_bytes(bytes: Bytes, content_type: Option<String>) -> Self {
        Self {
            content_type,
            content_length: Some(bytes.len() as u64),
            stream: futures::stream::once(async move { Ok::<_, io::Error>(bytes) }).boxed(),
        }
    }

    /// Drain the stream into a single buffer.
    pub async fn collect(mut self) -> io::Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.content_length.unwrap_or(0) as usize);
        while let Some(chunk) = self.stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl fmt::Debug for ObjectBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectBody")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Options accepted by the directory partitioner.
#[derive(Clone, Copy, Debug, Default)]
pub struct ListingOptions {
    /// Return every file at or below the path instead of direct children only.
    pub recursive: bool,
    /// Keep files whose last segment starts with the hidden marker.
    pub include_hidden: bool,
}

/// Directories and files visible at one relative path.
///
/// When the path is nested, `directories[0]` is the parent path.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryListing {
    pub directories: Vec<String>,
    pub files: Vec<String>,
}
