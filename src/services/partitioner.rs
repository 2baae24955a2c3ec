//! Turns a flat key listing into the directories and files visible at one
//! relative path.
//!
//! The store-side prefix filter is only a coarse optimisation: it matches
//! `folder10/...` when asked for `folder1`. Every key is therefore checked
//! again here on whole path segments before it can contribute a directory or
//! a file.

use crate::{
    models::listing::{DirectoryListing, ListingOptions},
    services::{gateway::ObjectStoreGateway, store::StoreResult},
};
use std::collections::BTreeSet;
use tracing::debug;

pub const HIDDEN_MARKER: char = '.';

#[derive(Clone)]
pub struct DirectoryPartitioner {
    gateway: ObjectStoreGateway,
    bucket: String,
}

impl DirectoryPartitioner {
    pub fn new(gateway: ObjectStoreGateway, bucket: impl Into<String>) -> Self {
        Self {
            gateway,
            bucket: bucket.into(),
        }
    }

    /// List `relative_path` in the source bucket. A failed listing aborts the
    /// whole call; no partial view is returned.
    pub async fn list(
        &self,
        relative_path: &str,
        options: ListingOptions,
    ) -> StoreResult<DirectoryListing> {
        let path = normalize(relative_path);
        let keys = self.gateway.list_all(&self.bucket, Some(path)).await?;
        let listing = partition(&keys, path, options);
        debug!(
            path,
            directories = listing.directories.len(),
            files = listing.files.len(),
            recursive = options.recursive,
            "partitioned listing"
        );
        Ok(listing)
    }
}

/// Strip leading and trailing `/`.
pub fn normalize(relative_path: &str) -> &str {
    relative_path.trim_matches('/')
}

/// The part of `key` below `path`, or `None` if `key` is not inside `path`.
fn remainder<'k>(key: &'k str, path: &str) -> Option<&'k str> {
    if path.is_empty() {
        return Some(key);
    }
    key.strip_prefix(path)?.strip_prefix('/')
}

fn is_hidden(key: &str) -> bool {
    key.rsplit('/')
        .next()
        .is_some_and(|name| name.starts_with(HIDDEN_MARKER))
}

/// Partition `keys` (any order, possibly over-fetched) at `relative_path`.
///
/// Directories are full paths (`path/child`) sorted lexically; when the path
/// is nested its parent is prepended as the first directory entry. Files are
/// full keys sorted lexically.
pub fn partition(
    keys: &[String],
    relative_path: &str,
    options: ListingOptions,
) -> DirectoryListing {
    let path = normalize(relative_path);
    let mut directories = BTreeSet::new();
    let mut files = BTreeSet::new();

    for key in keys {
        let Some(rest) = remainder(key, path) else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }

        let mut segments = rest.split('/');
        let first = segments.next().unwrap_or_default();
        let nested = segments.next().is_some();

        if nested && !first.is_empty() {
            directories.insert(if path.is_empty() {
                first.to_string()
            } else {
                format!("{path}/{first}")
            });
        }

        // Keys ending in `/` are directory markers, never files.
        let is_file_key = !key.ends_with('/');
        let included = options.recursive || !nested;
        if is_file_key && included && (options.include_hidden || !is_hidden(key)) {
            files.insert(key.clone());
        }
    }

    let mut directories: Vec<String> = directories.into_iter().collect();
    if let Some((parent, _)) = path.rsplit_once('/') {
        directories.insert(0, parent.to_string());
    }

    DirectoryListing {
        directories,
        files: files.into_iter().collect(),
    }
}
