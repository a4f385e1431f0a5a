#![forbid(unsafe_code)]

//! Transferarr application wiring.
//!
//! Layout: `cli.rs` (arguments), `bootstrap.rs` (service wiring),
//! `orchestrator.rs` (the reconciliation driver), `error.rs`.

pub mod bootstrap;
pub mod cli;
pub mod error;
pub mod orchestrator;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
pub use orchestrator::{NamedEndpoint, TorrentManager};
