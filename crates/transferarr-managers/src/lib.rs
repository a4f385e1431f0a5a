#![forbid(unsafe_code)]

//! Media-manager adapters for the movie and series catalogers.
//!
//! Both speak the same v3 HTTP API; one adapter covers them, tagged by
//! [`transferarr_core::ManagerKind`]. Layout: `queue.rs` (wire shapes),
//! `adapter.rs` (the [`transferarr_core::MediaManager`] implementation).

pub mod adapter;
pub mod queue;

pub use adapter::ArrManager;
