//! `wharf`: an embeddable FTP/FTPS server library.
//!
//! A host application implements [`Authenticator`] and [`StorageBackend`] to
//! describe how logins map to a filesystem view, then hands them to
//! [`Server::builder`] to get a long-lived service object that drives the
//! control-channel state machine for every accepted connection.
//!
//! ```no_run
//! # async fn example<A: wharf::Authenticator>(authenticator: A) -> wharf::Result<()> {
//! let server = wharf::Server::builder(authenticator)
//!     .max_connections(250)
//!     .build();
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:2121").await?;
//! server.serve(listener).await
//! # }
//! ```
pub mod ascii;
pub mod backend;
pub mod config;
pub mod error;
pub mod hash;
pub mod response;
pub mod server;
pub mod session;
pub(crate) mod shutdown;
pub mod stream;
pub mod telnet;
pub mod tls;
pub mod xferlog;

pub use backend::{Authenticator, BackendError, BackendErrorKind, BackendResult, BackendSettings, FileInfo, OpenFlags, StorageBackend};
pub use config::{PathRedactor, RateLimiter, ServerBuilder, ServerOptions};
pub use error::{Error, Result};
pub use hash::HashAlgorithm;
pub use response::Reply;
pub use server::{MetricsSink, Server};
pub use session::Session;
pub use stream::{AsyncDuplex, DataStream};
pub use tls::{MaybeTlsStream, ProtectionLevel, TlsConfig};
pub use xferlog::{XferDirection, XferLogRecord, XferLogSink};
