//! Wire shapes for the manager queue API.

use serde::Deserialize;
use tracing::debug;
use transferarr_core::{InfoHash, QueueItem};

/// One page of the manager's download queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePage {
    /// Queue entries on this page.
    #[serde(default)]
    pub records: Vec<QueueRecord>,
}

/// One queue entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRecord {
    /// Queue identifier used for the ingest check.
    pub id: i64,
    /// Release title.
    #[serde(default)]
    pub title: String,
    /// Download client identifier; the infohash for torrent downloads.
    #[serde(default)]
    pub download_id: Option<String>,
    /// Download protocol; usenet entries are not ours to migrate.
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Map queue records into tracked items. Usenet entries and records without
/// a well-formed infohash are skipped.
#[must_use]
pub fn items_from_page(kind: &'static str, page: QueuePage) -> Vec<QueueItem> {
    let mut items = Vec::with_capacity(page.records.len());
    for record in page.records {
        if record
            .protocol
            .as_deref()
            .is_some_and(|protocol| !protocol.eq_ignore_ascii_case("torrent"))
        {
            continue;
        }
        let Some(raw_hash) = record.download_id else {
            continue;
        };
        match InfoHash::new(raw_hash) {
            Ok(hash) => items.push(QueueItem {
                hash,
                name: record.title,
                queue_id: record.id.to_string(),
            }),
            Err(err) => {
                debug!(kind, queue_id = record.id, error = %err, "skipping non-torrent queue entry");
            }
        }
    }
    items
}

/// Whether a queue page still contains the given queue id.
#[must_use]
pub fn page_contains(page: &QueuePage, queue_id: &str) -> bool {
    page.records
        .iter()
        .any(|record| record.id.to_string() == queue_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> QueuePage {
        serde_json::from_value(serde_json::json!({
            "page": 1,
            "pageSize": 1000,
            "totalRecords": 3,
            "records": [
                {
                    "id": 42,
                    "title": "X",
                    "downloadId": "AB0123456789ABCDEF0123456789ABCDEF012345",
                    "protocol": "torrent"
                },
                {
                    "id": 43,
                    "title": "Usenet Thing",
                    "downloadId": "nzb-id-1",
                    "protocol": "usenet"
                },
                {
                    "id": 44,
                    "title": "Pending",
                    "protocol": "torrent"
                }
            ]
        }))
        .expect("page parses")
    }

    #[test]
    fn items_keep_only_well_formed_torrent_entries() {
        let items = items_from_page("movies", page());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].queue_id, "42");
        assert_eq!(items[0].name, "X");
        assert_eq!(
            items[0].hash.as_str(),
            "ab0123456789abcdef0123456789abcdef012345"
        );
    }

    #[test]
    fn page_lookup_matches_queue_ids() {
        let page = page();
        assert!(page_contains(&page, "42"));
        assert!(!page_contains(&page, "99"));
    }
}
