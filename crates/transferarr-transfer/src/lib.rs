#![forbid(unsafe_code)]

//! Per-connection transfer executor: a bounded worker pool that copies
//! torrent payloads and metainfo between endpoints and re-adds the torrent
//! on the target.
//!
//! Layout: `job.rs` (connection profile and the blocking copy body),
//! `speed.rs` (sliding-window rate), `executor.rs` (the pool).

pub mod executor;
pub mod job;
pub mod speed;

pub use executor::{ExecutorOptions, TransferExecutor};
pub use job::{ConnectionProfile, CopyJob};
