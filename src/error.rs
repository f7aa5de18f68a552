use thiserror::Error;

/// Internal crate error type.
///
/// This is distinct from the RFC response codes a command handler returns
/// as a [`crate::response::Reply`]. A backend error never bubbles up as an
/// `Err` here — it is translated to a reply and the session continues. Only
/// failure of the control socket itself (or a protocol-level violation that
/// leaves no sane reply to send) propagates as `Error` and ends the session
/// loop.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("control line too long")]
    LineTooLong,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("command not recognized: {0}")]
    UnknownCommand(String),
    #[error("session is shutting down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, Error>;
