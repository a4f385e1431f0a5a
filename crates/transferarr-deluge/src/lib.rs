#![forbid(unsafe_code)]

//! Deluge endpoint adapter speaking the Web UI's JSON-RPC protocol.
//!
//! Layout: `rpc.rs` (wire envelopes), `convert.rs` (native state
//! translation), `adapter.rs` (the [`transferarr_core::DownloadClient`]
//! implementation).

pub mod adapter;
pub mod convert;
pub mod rpc;

pub use adapter::DelugeEndpoint;
