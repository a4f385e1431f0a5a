#![forbid(unsafe_code)]

//! Transfer-history events and the append-only sink that records them.
//!
//! The sink is best-effort by contract: recording failures are logged and
//! never propagate into the driver. Layout: `event.rs` (typed events),
//! `sink.rs` (JSONL appender).

pub mod event;
pub mod sink;

pub use event::{EventEnvelope, TransferEvent};
pub use sink::{HistoryError, HistoryResult, HistorySink, JsonlHistory, NullSink};
