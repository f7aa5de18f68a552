//! Capped line reading for the control channel (spec.md §4.2 "oversized
//! line", §8 boundary behavior: exactly 4096 bytes accepted, 4097 rejected).
//!
//! `tokio::io::AsyncBufReadExt::read_line` has no length cap and would
//! happily allocate without bound for a client that never sends a
//! terminator; this reimplements the loop over `fill_buf`/`consume` with an
//! explicit limit.
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{Error, Result};

/// Reads one line (terminator included in the byte count, excluded from the
/// returned string) from `reader`, capped at `max_len` bytes. Returns `Ok(None)`
/// on a clean EOF with no partial line buffered.
pub async fn read_line_capped<R: AsyncBufRead + Unpin>(reader: &mut R, max_len: usize) -> Result<Option<String>> {
    let mut buf = Vec::new();
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(Error::Protocol("connection closed mid-line".into()));
        }
        if let Some(pos) = available.iter().position(|&b| b == b'\n') {
            let take = pos + 1;
            if buf.len() + take > max_len {
                reader.consume(take);
                return Err(Error::LineTooLong);
            }
            buf.extend_from_slice(&available[..take]);
            reader.consume(take);
            break;
        } else {
            let len = available.len();
            if buf.len() + len > max_len {
                reader.consume(len);
                return Err(Error::LineTooLong);
            }
            buf.extend_from_slice(available);
            reader.consume(len);
        }
    }

    let mut s = String::from_utf8_lossy(&buf).into_owned();
    while s.ends_with(['\n', '\r']) {
        s.pop();
    }
    Ok(Some(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_single_line() {
        let mut r = BufReader::new(&b"USER anonymous\r\n"[..]);
        let line = read_line_capped(&mut r, 4096).await.unwrap();
        assert_eq!(line, Some("USER anonymous".to_string()));
    }

    #[tokio::test]
    async fn eof_with_no_data_is_none() {
        let mut r = BufReader::new(&b""[..]);
        let line = read_line_capped(&mut r, 4096).await.unwrap();
        assert_eq!(line, None);
    }

    #[tokio::test]
    async fn exactly_4096_bytes_is_accepted() {
        let mut body = vec![b'A'; 4094];
        body.push(b'\r');
        body.push(b'\n');
        assert_eq!(body.len(), 4096);
        let mut r = BufReader::new(&body[..]);
        let line = read_line_capped(&mut r, 4096).await.unwrap();
        assert_eq!(line.unwrap().len(), 4094);
    }

    #[tokio::test]
    async fn line_of_4097_bytes_is_rejected() {
        let mut body = vec![b'A'; 4095];
        body.push(b'\r');
        body.push(b'\n');
        assert_eq!(body.len(), 4097);
        let mut r = BufReader::new(&body[..]);
        let err = read_line_capped(&mut r, 4096).await.unwrap_err();
        assert!(matches!(err, Error::LineTooLong));
    }
}
