//! A type-erased duplex stream, used so a data channel can be wrapped by a
//! host-supplied rate limiter without the session machinery caring whether
//! the concrete type underneath is a plain `TcpStream` or a TLS stream
//! (spec.md §4.6 "Rate limiter ... consumed transparently as an
//! `io.Reader`/`io.Writer` wrapper").
use tokio::io::{AsyncRead, AsyncWrite};

/// Blanket-implemented for anything `wharf` can read from and write to on a
/// data connection. Exists only so [`DataStream`] can name a trait object.
pub trait AsyncDuplex: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + ?Sized> AsyncDuplex for T {}

/// A data-connection stream after PASV/PORT establishment and any PROT P TLS
/// wrapping, erased to a trait object so a configured bandwidth limiter can
/// wrap it uniformly (spec.md §6 "global and per-user bandwidth caps").
pub type DataStream = Box<dyn AsyncDuplex>;
