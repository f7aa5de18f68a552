//! RETR/STOR/APPE/STOU orchestration and ABOR cancellation (spec.md §4.4).
//!
//! The data copy runs on its own task so the main loop keeps servicing
//! ABOR/STAT while bytes move; cancellation is cooperative (checked between
//! chunks) backed by closing the data socket as the forcing function, per
//! the dual mechanism spec.md §5 calls for.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;

use crate::response::{codes, Reply};

/// Cooperative cancellation handle for one in-flight transfer.
#[derive(Clone)]
pub struct TransferCancel {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl TransferCancel {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn cancelled_signal(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for TransferCancel {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a completed (or aborted) transfer, used to pick the terminal
/// reply and to feed metrics/xferlog hooks.
pub struct TransferOutcome {
    pub bytes: u64,
    pub duration: std::time::Duration,
    pub cancelled: bool,
    pub error: Option<std::io::Error>,
}

impl TransferOutcome {
    pub fn reply(&self) -> Reply {
        if self.cancelled {
            Reply::new(codes::CONN_CLOSED_TRANSFER_ABORTED, "Connection closed; transfer aborted.")
        } else if self.error.is_some() {
            Reply::new(codes::CONN_CLOSED_TRANSFER_ABORTED, "Connection closed; transfer aborted.")
        } else {
            Reply::new(codes::CLOSING_DATA_CONN, "Transfer complete.")
        }
    }
}

/// Copies `src` to `dst` in 64 KiB chunks, checking `cancel` between reads
/// so an ABOR on another task stops the loop promptly even if the socket
/// itself hasn't yet observed the close.
pub async fn copy_cancellable<R, W>(mut src: R, mut dst: W, cancel: &TransferCancel) -> TransferOutcome
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    use tokio::io::AsyncReadExt;

    let start = Instant::now();
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;

    loop {
        if cancel.is_cancelled() {
            let _ = dst.flush().await;
            return TransferOutcome { bytes: total, duration: start.elapsed(), cancelled: true, error: None };
        }

        let read_result = tokio::select! {
            biased;
            _ = cancel.cancelled_signal() => {
                let _ = dst.flush().await;
                return TransferOutcome { bytes: total, duration: start.elapsed(), cancelled: true, error: None };
            }
            res = src.read(&mut buf) => res,
        };

        let n = match read_result {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                return TransferOutcome { bytes: total, duration: start.elapsed(), cancelled: false, error: Some(e) };
            }
        };

        if let Err(e) = dst.write_all(&buf[..n]).await {
            return TransferOutcome { bytes: total, duration: start.elapsed(), cancelled: false, error: Some(e) };
        }
        total += n as u64;
    }

    if let Err(e) = dst.flush().await {
        return TransferOutcome { bytes: total, duration: start.elapsed(), cancelled: false, error: Some(e) };
    }

    TransferOutcome { bytes: total, duration: start.elapsed(), cancelled: false, error: None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copies_all_bytes_when_not_cancelled() {
        let cancel = TransferCancel::new();
        let src = &b"hello world"[..];
        let mut dst = Vec::new();
        let outcome = copy_cancellable(src, &mut dst, &cancel).await;
        assert_eq!(dst, b"hello world");
        assert_eq!(outcome.bytes, 11);
        assert!(!outcome.cancelled);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn reports_cancelled_when_signalled_before_start() {
        let cancel = TransferCancel::new();
        cancel.cancel();
        let src = &b"hello world"[..];
        let mut dst = Vec::new();
        let outcome = copy_cancellable(src, &mut dst, &cancel).await;
        assert!(outcome.cancelled);
    }
}
