//! Data-connection broker: PASV/EPSV/PORT/EPRT and channel establishment
//! (spec.md §4.3).
//!
//! Grounded on the PASV/PORT handling in `powerfooI/rftp`'s server module
//! (naive port scanning, comma-quad rendering) generalized to a configured
//! port range with a rotating cursor, plus EPSV/EPRT from RFC 2428 which
//! that reference server does not implement.
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use crate::config::RateLimiter;
use crate::error::{Error, Result};
use crate::stream::DataStream;
use crate::tls::{MaybeTlsStream, ProtectionLevel, TlsConfig};

const ACCEPT_DEADLINE: Duration = Duration::from_secs(10);
const DIAL_DEADLINE: Duration = Duration::from_secs(10);

/// Exactly one data channel may be armed per session at a time (spec.md §3).
pub enum DataChannel {
    None,
    Passive(TcpListener),
    Active(SocketAddr),
}

impl Default for DataChannel {
    fn default() -> Self {
        DataChannel::None
    }
}

impl DataChannel {
    pub fn is_armed(&self) -> bool {
        !matches!(self, DataChannel::None)
    }
}

/// Shared, server-wide rotating cursor over a configured PASV port range
/// (spec.md §3 "passive-port range with a rotating cursor", §5 "atomic
/// increment").
#[derive(Debug)]
pub struct PassivePortCursor {
    next: std::sync::atomic::AtomicU16,
}

impl PassivePortCursor {
    pub fn new() -> Self {
        Self { next: std::sync::atomic::AtomicU16::new(0) }
    }

    /// Binds a listener somewhere in `range`, starting at the cursor and
    /// advancing until a free port is found or the range is exhausted.
    pub async fn bind(&self, range: &std::ops::Range<u16>) -> Result<TcpListener> {
        let span = range.end.saturating_sub(range.start) as usize;
        if span == 0 {
            return Err(Error::Protocol("empty passive port range".into()));
        }
        for attempt in 0..span {
            let offset = (self.next.fetch_add(1, std::sync::atomic::Ordering::Relaxed) as usize + attempt) % span;
            let port = range.start + offset as u16;
            match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
                Ok(listener) => return Ok(listener),
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Protocol("passive port range exhausted".into()))
    }
}

/// Binds an OS-chosen ephemeral passive-mode listener.
pub async fn bind_ephemeral() -> Result<TcpListener> {
    Ok(TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await?)
}

/// Renders the `227` reply body for a bound passive listener, encoding
/// `advertised_ip` and the listener's local port in comma-quad form.
pub fn pasv_reply_text(advertised_ip: Ipv4Addr, port: u16) -> String {
    let [a, b, c, d] = advertised_ip.octets();
    let p1 = port / 256;
    let p2 = port % 256;
    format!("Entering Passive Mode ({a},{b},{c},{d},{p1},{p2}).")
}

pub fn epsv_reply_text(port: u16) -> String {
    format!("Entering Extended Passive Mode (|||{port}|)")
}

/// Resolves the IPv4 address to advertise in a `PASV`/`EPSV` reply, per the
/// source order in spec.md §4.3: configured public host first, else the
/// control socket's own local address, falling back to `0.0.0.0` if neither
/// yields an IPv4.
pub fn advertised_ipv4(public_host: Option<IpAddr>, control_local: SocketAddr) -> Ipv4Addr {
    if let Some(IpAddr::V4(v4)) = public_host {
        return v4;
    }
    if let IpAddr::V4(v4) = control_local.ip() {
        return v4;
    }
    Ipv4Addr::UNSPECIFIED
}

/// Parses the classic `PORT h1,h2,h3,h4,p1,p2` argument.
pub fn parse_port_arg(arg: &str) -> Option<SocketAddr> {
    let parts: Vec<&str> = arg.split(',').map(str::trim).collect();
    if parts.len() != 6 {
        return None;
    }
    let mut bytes = [0u8; 4];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = parts[i].parse().ok()?;
    }
    let p1: u16 = parts[4].parse().ok()?;
    let p2: u16 = parts[5].parse().ok()?;
    let port = p1.checked_mul(256)?.checked_add(p2)?;
    Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(bytes)), port))
}

/// Parses the RFC 2428 `EPRT <d>proto<d>addr<d>port<d>` argument.
/// `proto` 1 = IPv4, 2 = IPv6; any other value is a protocol-not-supported
/// error distinct from a plain parse failure.
pub enum EprtParseError {
    Malformed,
    UnsupportedProtocol,
}

pub fn parse_eprt_arg(arg: &str) -> std::result::Result<SocketAddr, EprtParseError> {
    let mut chars = arg.chars();
    let delim = chars.next().ok_or(EprtParseError::Malformed)?;
    let fields: Vec<&str> = arg[delim.len_utf8()..].split(delim).collect();
    // split on delimiter-terminated string yields ["", proto, addr, port, ""]-ish;
    // filter to the three meaningful fields in order.
    let fields: Vec<&str> = fields.into_iter().filter(|s| !s.is_empty()).collect();
    if fields.len() != 3 {
        return Err(EprtParseError::Malformed);
    }
    let proto: u8 = fields[0].parse().map_err(|_| EprtParseError::Malformed)?;
    let port: u16 = fields[2].parse().map_err(|_| EprtParseError::Malformed)?;
    let ip: IpAddr = match proto {
        1 => fields[1].parse::<Ipv4Addr>().map_err(|_| EprtParseError::Malformed)?.into(),
        2 => fields[1].parse::<Ipv6Addr>().map_err(|_| EprtParseError::Malformed)?.into(),
        _ => return Err(EprtParseError::UnsupportedProtocol),
    };
    Ok(SocketAddr::new(ip, port))
}

/// Opens the armed data channel, accepting (passive) or dialing (active),
/// wraps it in TLS when `protection` is `Private`, then erases it to a
/// [`DataStream`] and, if a rate limiter is configured, lets it wrap the
/// stream before the caller reads or writes a single byte (spec.md §4.6,
/// §6 "global and per-user bandwidth caps").
pub async fn open(
    channel: DataChannel,
    protection: ProtectionLevel,
    tls: Option<&TlsConfig>,
    rate_limiter: Option<&RateLimiter>,
    username: Option<&str>,
) -> Result<DataStream> {
    let raw = match channel {
        DataChannel::None => return Err(Error::Protocol("no data channel armed".into())),
        DataChannel::Passive(listener) => {
            let (socket, _) = timeout(ACCEPT_DEADLINE, listener.accept())
                .await
                .map_err(|_| Error::Protocol("data connection accept timed out".into()))??;
            socket
        }
        DataChannel::Active(target) => timeout(DIAL_DEADLINE, TcpStream::connect(target))
            .await
            .map_err(|_| Error::Protocol("data connection dial timed out".into()))??,
    };

    let stream: DataStream = if protection == ProtectionLevel::Private {
        let tls = tls.ok_or_else(|| Error::Protocol("PROT P set but no TLS configured".into()))?;
        let tls_stream = tls.accept(raw).await?;
        Box::new(MaybeTlsStream::Tls(Box::new(tls_stream)))
    } else {
        Box::new(MaybeTlsStream::Plain(raw))
    };

    Ok(match rate_limiter {
        Some(limiter) => limiter(stream, username),
        None => stream,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_arg_basic() {
        let addr = parse_port_arg("192,168,1,1,4,1").unwrap();
        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 1025));
    }

    #[test]
    fn parse_port_arg_rejects_wrong_field_count() {
        assert!(parse_port_arg("1,2,3,4,5").is_none());
    }

    #[test]
    fn parse_eprt_ipv4() {
        let addr = parse_eprt_arg("|1|132.235.1.2|6275|").unwrap();
        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(132, 235, 1, 2)), 6275));
    }

    #[test]
    fn parse_eprt_ipv6() {
        let addr = parse_eprt_arg("|2|::1|6275|").unwrap();
        assert_eq!(addr.port(), 6275);
        assert!(addr.is_ipv6());
    }

    #[test]
    fn parse_eprt_unsupported_protocol() {
        match parse_eprt_arg("|3|foo|1|") {
            Err(EprtParseError::UnsupportedProtocol) => {}
            _ => panic!("expected UnsupportedProtocol"),
        }
    }

    #[test]
    fn pasv_reply_text_format() {
        let text = pasv_reply_text(Ipv4Addr::new(10, 0, 0, 1), 1025);
        assert_eq!(text, "Entering Passive Mode (10,0,0,1,4,1).");
    }

    #[test]
    fn advertised_ipv4_prefers_public_host() {
        let configured = Some(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)));
        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)), 21);
        assert_eq!(advertised_ipv4(configured, local), Ipv4Addr::new(1, 2, 3, 4));
    }

    #[test]
    fn advertised_ipv4_falls_back_to_control_local() {
        let local = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9)), 21);
        assert_eq!(advertised_ipv4(None, local), Ipv4Addr::new(9, 9, 9, 9));
    }
}
