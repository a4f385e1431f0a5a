//! Fallback values applied when the configuration omits optional fields.

/// Reconciliation period in seconds.
pub const TICK_INTERVAL_SECS: u64 = 2;

/// Workers per transfer connection.
pub const TRANSFER_WORKERS: usize = 3;

/// Consecutive missed locates before a record is dropped.
pub const UNCLAIMED_LIMIT: u32 = 10;

/// Copy attempts allowed over the lifetime of a record.
pub const COPY_RETRY_LIMIT: u32 = 3;

/// Ticks a copied torrent settles on the target before retirement.
pub const POST_INGEST_TICKS: u32 = 2;

/// Timeout for each outbound manager or endpoint call, in seconds.
pub const CALL_TIMEOUT_SECS: u64 = 30;

/// Minimum seconds between persisted progress updates during a copy.
pub const PROGRESS_WRITE_SECS: u64 = 2;

/// Default SSH port for SFTP descriptors.
pub const SSH_PORT: u16 = 22;

/// Default logging level.
pub const LOG_LEVEL: &str = "info";
