#![forbid(unsafe_code)]

//! Configuration model and JSON file loader for Transferarr.
//!
//! Layout: `model.rs` (typed configuration tree), `loader.rs` (file
//! loading), `validate.rs` (cross-field checks), `defaults.rs` (tunable
//! fallbacks), `error.rs`.

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::load_config;
pub use model::{
    Config, ConnectionConfig, DownloadClientConfig, HistoryConfig, MediaManagerConfig,
    SftpAddressing, TransferConfig, TransferDescriptor, Tunables,
};
