#![forbid(unsafe_code)]

//! Domain model and capability traits shared across the Transferarr workspace.
//!
//! Layout: `model` (records, states, snapshots), `service` (endpoint and
//! media-manager capability surfaces), `error` (typed failures with
//! transient/fatal classification).

pub mod error;
pub mod model;
pub mod service;

pub use error::{AdapterError, AdapterResult, ClientError, ClientResult, InfoHashError};
pub use model::{
    AddMetainfo, EndpointTorrentState, FaultKind, InfoHash, ManagerKind, ProgressView, QueueItem,
    TorrentFault, TorrentFileEntry, TorrentRecord, TorrentSnapshot, TorrentState, top_level_paths,
};
pub use service::{DownloadClient, MediaManager};
