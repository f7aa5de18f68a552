//! Wire representation of FTP control-channel replies.
//!
//! Plays the same role `loja::frame::Frame` plays for RESP: a typed value
//! that knows how to render itself onto the wire, so handlers build a
//! `Reply` instead of scattering `format!("{} ...\r\n", code)` calls.
use std::fmt;

use crate::backend::BackendErrorKind;

/// A single- or multi-line FTP response.
///
/// Single line: `CCC text\r\n`.
/// Multi line: `CCC-text\r\n` continuation lines, terminated by `CCC text\r\n`.
#[derive(Debug, Clone)]
pub struct Reply {
    pub code: u16,
    lines: Vec<String>,
}

impl Reply {
    /// A single-line reply.
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self { code, lines: vec![text.into()] }
    }

    /// A multi-line reply. `lines` becomes the continuation lines; the last
    /// line is repeated as the terminating `CCC text` line automatically if
    /// the caller hasn't already duplicated it — callers pass the full set
    /// of body lines and the terminator text separately via
    /// [`Reply::multiline`].
    pub fn multiline(code: u16, body: impl IntoIterator<Item = String>, terminator: impl Into<String>) -> Self {
        let mut lines: Vec<String> = body.into_iter().collect();
        lines.push(terminator.into());
        Self { code, lines }
    }

    /// Render this reply as the exact bytes to write to the control socket,
    /// CRLF-terminated.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let last = self.lines.len().saturating_sub(1);
        for (i, line) in self.lines.iter().enumerate() {
            if i == last {
                out.push_str(&format!("{} {}\r\n", self.code, line));
            } else {
                out.push_str(&format!("{}-{}\r\n", self.code, line));
            }
        }
        out
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}

/// Translate a backend error into the `550`-family reply spec.md §7 requires.
/// The backend must never leak absolute host paths in its error strings;
/// the core trusts that contract and forwards the message unchanged.
pub fn backend_error_reply(kind: &BackendErrorKind) -> Reply {
    match kind {
        BackendErrorKind::NotFound => Reply::new(550, "File not found."),
        BackendErrorKind::PermissionDenied => Reply::new(550, "Permission denied."),
        BackendErrorKind::AlreadyExists => Reply::new(550, "File already exists."),
        BackendErrorKind::Other(msg) => Reply::new(550, format!("Action failed: {msg}")),
    }
}

pub mod codes {
    pub const SERVICE_READY: u16 = 220;
    pub const DATA_CONN_OPEN_STARTING: u16 = 150;
    pub const COMMAND_OK: u16 = 200;
    pub const SYSTEM_TYPE: u16 = 215;
    pub const SERVICE_READY_NOOP: u16 = 200;
    pub const HELP: u16 = 214;
    pub const FEAT: u16 = 211;
    pub const STAT: u16 = 211;
    pub const FILE_STATUS: u16 = 213;
    pub const NAME_OK_NEED_PASSWORD: u16 = 331;
    pub const LOGGED_IN: u16 = 230;
    pub const FILE_ACTION_OK: u16 = 250;
    pub const PATHNAME_CREATED: u16 = 257;
    pub const FILE_ACTION_PENDING: u16 = 350;
    pub const CLOSING_DATA_CONN: u16 = 226;
    pub const ENTERING_PASSIVE: u16 = 227;
    pub const ENTERING_EPSV: u16 = 229;
    pub const AUTH_OK: u16 = 234;
    pub const CLOSING_CONTROL_CONN: u16 = 221;
    pub const SUPERFLUOUS: u16 = 202;
    pub const HOST_ACCEPTED: u16 = 220;

    pub const CANT_OPEN_DATA_CONN: u16 = 425;
    pub const CONN_CLOSED_TRANSFER_ABORTED: u16 = 426;
    pub const FILE_UNAVAILABLE: u16 = 550;
    pub const SYNTAX_ERROR_ARGS: u16 = 501;
    pub const BAD_SEQUENCE: u16 = 503;
    pub const NOT_LOGGED_IN: u16 = 530;
    pub const NOT_IMPLEMENTED: u16 = 502;
    pub const PARAM_NOT_IMPLEMENTED: u16 = 504;
    pub const ILLEGAL_PORT: u16 = 500;
    pub const LINE_TOO_LONG: u16 = 500;
    pub const NETWORK_PROTOCOL_NOT_SUPPORTED: u16 = 522;
    pub const TOO_MANY_USERS: u16 = 421;
}
