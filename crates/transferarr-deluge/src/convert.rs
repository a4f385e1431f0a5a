//! Translation from Deluge's native vocabulary into the endpoint-neutral
//! model. Nothing untyped crosses this boundary.

use tracing::warn;
use transferarr_core::{EndpointTorrentState, TorrentFileEntry, TorrentSnapshot};

use crate::rpc::TorrentStatusRow;

/// Parse a native state string. `Allocating` and `Moving` keep their own
/// variants; the universal mapping folds them later.
#[must_use]
pub fn parse_native_state(value: &str) -> Option<EndpointTorrentState> {
    match value {
        "Queued" => Some(EndpointTorrentState::Queued),
        "Checking" => Some(EndpointTorrentState::Checking),
        "Allocating" => Some(EndpointTorrentState::Allocating),
        "Downloading" => Some(EndpointTorrentState::Downloading),
        "Seeding" => Some(EndpointTorrentState::Seeding),
        "Paused" => Some(EndpointTorrentState::Paused),
        "Moving" => Some(EndpointTorrentState::Moving),
        "Error" => Some(EndpointTorrentState::Error),
        _ => None,
    }
}

/// Map a status row into the shared snapshot shape. An unrecognised native
/// state degrades to the error state for that torrent instead of failing the
/// whole listing.
#[must_use]
pub fn snapshot_from_row(endpoint: &str, row: TorrentStatusRow) -> TorrentSnapshot {
    let state = parse_native_state(&row.state).unwrap_or_else(|| {
        warn!(
            endpoint,
            native_state = %row.state,
            torrent = %row.name,
            "unrecognised native torrent state"
        );
        EndpointTorrentState::Error
    });
    TorrentSnapshot {
        name: row.name,
        state,
        progress: row.progress,
        total_bytes: row.total_size,
        files: row
            .files
            .into_iter()
            .map(|file| TorrentFileEntry {
                path: file.path,
                size_bytes: file.size,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::FileRow;

    #[test]
    fn known_states_translate() {
        assert_eq!(
            parse_native_state("Seeding"),
            Some(EndpointTorrentState::Seeding)
        );
        assert_eq!(
            parse_native_state("Allocating"),
            Some(EndpointTorrentState::Allocating)
        );
        assert_eq!(parse_native_state("Busy"), None);
    }

    #[test]
    fn unknown_state_degrades_to_error() {
        let row = TorrentStatusRow {
            name: "X".into(),
            state: "Hibernating".into(),
            progress: 10.0,
            total_size: 1,
            files: vec![],
        };
        let snapshot = snapshot_from_row("src", row);
        assert_eq!(snapshot.state, EndpointTorrentState::Error);
    }

    #[test]
    fn files_carry_over() {
        let row = TorrentStatusRow {
            name: "Show.S01".into(),
            state: "Seeding".into(),
            progress: 100.0,
            total_size: 2,
            files: vec![FileRow {
                path: "Show.S01/e1.mkv".into(),
                size: 2,
            }],
        };
        let snapshot = snapshot_from_row("src", row);
        assert_eq!(snapshot.files.len(), 1);
        assert_eq!(snapshot.files[0].path, "Show.S01/e1.mkv");
    }
}
