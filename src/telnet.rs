//! Telnet IAC filter for the control channel (spec.md §4.6).
//!
//! The IAC state machine below is grounded on the option-negotiation byte
//! handling in the `SLMT/telnet-rs` crate; that crate is a synchronous,
//! connection-owning client and answers negotiation requests, whereas this
//! is a pure `AsyncRead` transform with no replies — only the "what does
//! this IAC sequence consume" shape is reused.
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

const IAC: u8 = 0xFF;
const WILL: u8 = 0xFB;
const DONT: u8 = 0xFE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    SawIac,
    SawCommand,
}

/// Wraps an [`AsyncRead`] control socket and strips Telnet negotiation
/// sequences before the bytes reach the command-line parser.
///
/// - `IAC IAC` round-trips to a single `0xFF`.
/// - `IAC {WILL,WONT,DO,DONT} <option>` is consumed entirely (3 bytes).
/// - `IAC <anything else>` consumes just the 2-byte sequence.
#[derive(Debug)]
pub struct TelnetFilter<S> {
    inner: S,
    state: State,
}

impl<S> TelnetFilter<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, state: State::Data }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TelnetFilter<S> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        // Read into a scratch buffer at least as large as the caller's
        // remaining capacity, then filter in place. This may under-fill
        // `buf` relative to what was physically read (IAC bytes are
        // dropped), which is always legal for `AsyncRead`.
        let mut scratch = vec![0u8; buf.remaining().max(1)];
        let mut scratch_buf = ReadBuf::new(&mut scratch);
        match Pin::new(&mut this.inner).poll_read(cx, &mut scratch_buf) {
            Poll::Ready(Ok(())) => {
                let filled = scratch_buf.filled();
                for &byte in filled {
                    match this.state {
                        State::Data => {
                            if byte == IAC {
                                this.state = State::SawIac;
                            } else {
                                buf.put_slice(&[byte]);
                            }
                        }
                        State::SawIac => {
                            if byte == IAC {
                                buf.put_slice(&[IAC]);
                                this.state = State::Data;
                            } else if (WILL..=DONT).contains(&byte) {
                                this.state = State::SawCommand;
                            } else {
                                this.state = State::Data;
                            }
                        }
                        State::SawCommand => {
                            this.state = State::Data;
                        }
                    }
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn filter_all(input: &[u8]) -> Vec<u8> {
        let mut filter = TelnetFilter::new(input);
        let mut out = Vec::new();
        filter.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn passes_plain_bytes_unchanged() {
        let input = b"USER anonymous\r\n";
        assert_eq!(filter_all(input).await, input.to_vec());
    }

    #[tokio::test]
    async fn iac_iac_round_trips_to_single_0xff() {
        let input = [b'A', IAC, IAC, b'B'];
        assert_eq!(filter_all(&input).await, vec![b'A', 0xFF, b'B']);
    }

    #[tokio::test]
    async fn strips_will_wont_do_dont_with_option_byte() {
        // IAC WILL <opt>, then plain data.
        let input = [b'X', IAC, WILL, 0x01, b'Y'];
        assert_eq!(filter_all(&input).await, vec![b'X', b'Y']);
    }

    #[tokio::test]
    async fn strips_unknown_iac_command_without_extra_byte() {
        // IAC <some other command byte>, not a WILL/WONT/DO/DONT.
        let input = [b'X', IAC, 0xF9, b'Y'];
        assert_eq!(filter_all(&input).await, vec![b'X', b'Y']);
    }
}
