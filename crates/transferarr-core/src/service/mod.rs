//! Capability traits implemented by endpoint and media-manager adapters.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{AdapterResult, ClientResult};
use crate::model::{AddMetainfo, InfoHash, ManagerKind, QueueItem, TorrentSnapshot};

/// Capability surface required from every torrent-client implementation.
///
/// The reconciliation driver and multiple transfer workers may call one
/// instance in parallel; implementations serialise internally as needed.
#[async_trait]
pub trait DownloadClient: Send + Sync {
    /// Endpoint name from configuration.
    fn name(&self) -> &str;

    /// Establish (or confirm) connectivity. Idempotent and safe to call from
    /// any task.
    async fn ensure_connected(&self) -> ClientResult<()>;

    /// Snapshot of every torrent the client tracks, keyed by infohash.
    async fn list(&self) -> ClientResult<HashMap<InfoHash, TorrentSnapshot>>;

    /// Whether the client tracks the given hash. The default derives from
    /// [`DownloadClient::list`]; implementations may optimise.
    async fn has(&self, hash: &InfoHash) -> ClientResult<bool> {
        Ok(self.list().await?.contains_key(hash))
    }

    /// Add a torrent from metainfo bytes. Adding a hash the client already
    /// tracks is a no-op success.
    async fn add_metainfo(&self, request: AddMetainfo) -> ClientResult<()>;

    /// Remove a torrent, optionally deleting its payload. Removing a hash
    /// the client does not track is a success.
    async fn remove(&self, hash: &InfoHash, delete_data: bool) -> ClientResult<()>;
}

/// Capability surface required from every media-manager adapter.
#[async_trait]
pub trait MediaManager: Send + Sync {
    /// Stable kind tag, serialised into records.
    fn kind(&self) -> ManagerKind;

    /// Items whose download is currently this manager's responsibility.
    async fn queue(&self) -> AdapterResult<Vec<QueueItem>>;

    /// Whether the manager has ingested the payload and no longer needs the
    /// torrent.
    async fn ready_to_remove(&self, queue_id: &str) -> AdapterResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EndpointTorrentState, TorrentFileEntry};

    struct FixedClient {
        hash: InfoHash,
    }

    #[async_trait]
    impl DownloadClient for FixedClient {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn ensure_connected(&self) -> ClientResult<()> {
            Ok(())
        }

        async fn list(&self) -> ClientResult<HashMap<InfoHash, TorrentSnapshot>> {
            let mut torrents = HashMap::new();
            torrents.insert(
                self.hash.clone(),
                TorrentSnapshot {
                    name: "demo".into(),
                    state: EndpointTorrentState::Seeding,
                    progress: 100.0,
                    total_bytes: 1,
                    files: vec![TorrentFileEntry {
                        path: "demo.mkv".into(),
                        size_bytes: 1,
                    }],
                },
            );
            Ok(torrents)
        }

        async fn add_metainfo(&self, _request: AddMetainfo) -> ClientResult<()> {
            Ok(())
        }

        async fn remove(&self, _hash: &InfoHash, _delete_data: bool) -> ClientResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn has_defaults_to_list_lookup() {
        let hash = InfoHash::new("ab0123456789abcdef0123456789abcdef012345").expect("hash");
        let other = InfoHash::new("cd0123456789abcdef0123456789abcdef012345").expect("hash");
        let client = FixedClient { hash: hash.clone() };

        assert!(client.has(&hash).await.expect("lookup"));
        assert!(!client.has(&other).await.expect("lookup"));
    }
}
