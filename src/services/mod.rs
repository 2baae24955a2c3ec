pub mod cache_orchestrator;
pub mod gateway;
pub mod local_backend;
pub mod memory_backend;
pub mod navigator;
pub mod partitioner;
pub mod s3_backend;
pub mod store;
pub mod transcoder;
