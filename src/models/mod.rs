//! Shared data types for the photo library.
//!
//! `bucket` and `object` map onto the local backend's SQLite tables via
//! `sqlx::FromRow`; `listing` and `cache` are the in-memory shapes passed
//! between the gateway, the partitioner and the cache orchestrator.

pub mod bucket;
pub mod cache;
pub mod listing;
pub mod object;
