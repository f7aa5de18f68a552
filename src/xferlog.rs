//! Transfer-log hook (spec.md §6 "transfer-log writer"), modeled the same
//! way as [`crate::server::MetricsSink`]: a small trait with a single
//! notification method, so a host can bridge into its own xferlog format
//! (wu-ftpd-style flat file, structured JSON, whatever) without `wharf`
//! committing to one.
use std::net::IpAddr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XferDirection {
    Upload,
    Download,
}

/// One completed (or aborted) RETR/STOR/APPE/STOU, handed to the configured
/// [`XferLogSink`] after the transfer task clears `busy` (spec.md §4.4 point 6).
#[derive(Debug, Clone)]
pub struct XferLogRecord {
    pub peer: IpAddr,
    pub username: Option<String>,
    pub path: String,
    pub direction: XferDirection,
    pub bytes: u64,
    pub duration: Duration,
    pub completed: bool,
}

/// Optional sink notified of every finished transfer. All methods default to
/// no-ops so implementers only need `record`.
pub trait XferLogSink: Send + Sync {
    fn record(&self, record: &XferLogRecord);
}
