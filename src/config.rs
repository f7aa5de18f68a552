//! Server configuration surface (spec.md §6).
//!
//! Mirrors the fluent-builder shape used throughout the crate pack for
//! constructing a long-lived service object: callers get a `Server` only by
//! going through [`ServerBuilder`], which validates nothing at each setter
//! and defers all checks to [`ServerBuilder::build`].
use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::Authenticator;
use crate::server::MetricsSink;
use crate::stream::DataStream;
use crate::tls::TlsConfig;
use crate::xferlog::XferLogSink;

/// A host-supplied bandwidth limiter, applied to every opened data channel
/// (spec.md §6 "global and per-user bandwidth caps", §4.6 "Rate limiter").
/// Receives the username for the session that opened the channel so a host
/// can apply a per-user bucket as well as (or instead of) a shared one.
pub type RateLimiter = dyn Fn(DataStream, Option<&str>) -> DataStream + Send + Sync;

/// A host-supplied redaction hook applied to virtual paths before they reach
/// a log line (spec.md §3 "optional path-redaction ... hooks"). Never applied
/// to wire responses — only to this crate's own `tracing` output.
pub type PathRedactor = dyn Fn(&str) -> String + Send + Sync;

/// Tunables collected by [`ServerBuilder`] and consumed by
/// [`crate::server::Server`].
#[derive(Clone)]
pub struct ServerOptions {
    pub(crate) max_connections: usize,
    pub(crate) max_connections_per_ip: usize,
    pub(crate) idle_timeout: Duration,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
    pub(crate) passive_ports: Option<Range<u16>>,
    pub(crate) public_host: Option<String>,
    pub(crate) welcome_message: String,
    pub(crate) system_type: String,
    pub(crate) tls: Option<Arc<TlsConfig>>,
    pub(crate) tls_required_for_login: bool,
    pub(crate) shutdown_grace: Duration,
    pub(crate) disabled_commands: HashSet<String>,
    pub(crate) disable_mlsd: bool,
    pub(crate) enable_directory_message: bool,
    pub(crate) metrics: Option<Arc<dyn MetricsSink>>,
    pub(crate) xferlog: Option<Arc<dyn XferLogSink>>,
    pub(crate) path_redactor: Option<Arc<PathRedactor>>,
    pub(crate) redact_ips: bool,
    pub(crate) rate_limiter: Option<Arc<RateLimiter>>,
}

impl std::fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerOptions")
            .field("max_connections", &self.max_connections)
            .field("max_connections_per_ip", &self.max_connections_per_ip)
            .field("idle_timeout", &self.idle_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("passive_ports", &self.passive_ports)
            .field("public_host", &self.public_host)
            .field("system_type", &self.system_type)
            .field("tls_enabled", &self.tls.is_some())
            .field("tls_required_for_login", &self.tls_required_for_login)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("disabled_commands", &self.disabled_commands)
            .field("disable_mlsd", &self.disable_mlsd)
            .field("enable_directory_message", &self.enable_directory_message)
            .field("metrics_enabled", &self.metrics.is_some())
            .field("xferlog_enabled", &self.xferlog.is_some())
            .field("path_redactor_enabled", &self.path_redactor.is_some())
            .field("redact_ips", &self.redact_ips)
            .field("rate_limiter_enabled", &self.rate_limiter.is_some())
            .finish()
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_connections: 250,
            max_connections_per_ip: 8,
            idle_timeout: Duration::from_secs(300),
            read_timeout: None,
            write_timeout: None,
            passive_ports: None,
            public_host: None,
            welcome_message: "Service ready.".to_string(),
            system_type: "UNIX Type: L8".to_string(),
            tls: None,
            tls_required_for_login: false,
            shutdown_grace: Duration::from_secs(10),
            disabled_commands: HashSet::new(),
            disable_mlsd: false,
            enable_directory_message: false,
            metrics: None,
            xferlog: None,
            path_redactor: None,
            redact_ips: false,
            rate_limiter: None,
        }
    }
}

/// Fluent builder for a [`crate::server::Server`].
///
/// `A` is the [`Authenticator`] the built server will use to turn USER/PASS
/// into a per-session [`crate::backend::StorageBackend`].
pub struct ServerBuilder<A: Authenticator> {
    authenticator: A,
    options: ServerOptions,
}

impl<A: Authenticator> ServerBuilder<A> {
    pub fn new(authenticator: A) -> Self {
        Self { authenticator, options: ServerOptions::default() }
    }

    /// Caps the number of simultaneously open control connections across the
    /// whole server (spec.md §4.1, §9 admission control).
    pub fn max_connections(mut self, n: usize) -> Self {
        self.options.max_connections = n;
        self
    }

    /// Caps simultaneous control connections from a single source IP.
    pub fn max_connections_per_ip(mut self, n: usize) -> Self {
        self.options.max_connections_per_ip = n;
        self
    }

    /// Control connections idle longer than this are closed with `421`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.options.idle_timeout = timeout;
        self
    }

    /// Restricts PASV/EPSV-allocated data ports to this range. Unset means
    /// the OS chooses an ephemeral port for every passive listener.
    pub fn passive_ports(mut self, ports: Range<u16>) -> Self {
        self.options.passive_ports = Some(ports);
        self
    }

    /// Overrides the host/IP advertised in PASV/EPSV replies, for servers
    /// behind NAT. Accepts an IP literal or a DNS name; a name is resolved
    /// once, on first use, and the first IPv4 address is cached for the
    /// server's lifetime. Without this, the server reflects the control
    /// socket's own local address.
    pub fn public_host(mut self, host: impl Into<String>) -> Self {
        self.options.public_host = Some(host.into());
        self
    }

    pub fn welcome_message(mut self, message: impl Into<String>) -> Self {
        self.options.welcome_message = message.into();
        self
    }

    /// Enables AUTH TLS / PBSZ / PROT and supplies the server certificate
    /// chain and key used for the control- and data-channel upgrade.
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.options.tls = Some(Arc::new(tls));
        self
    }

    /// Refuses USER/PASS over a connection that has not completed AUTH TLS.
    /// Has no effect unless [`ServerBuilder::tls`] was also called.
    pub fn require_tls_for_login(mut self, required: bool) -> Self {
        self.options.tls_required_for_login = required;
        self
    }

    /// How long [`crate::server::Server::shutdown`] waits for in-flight
    /// sessions to finish on their own before force-closing their sockets.
    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.options.shutdown_grace = grace;
        self
    }

    /// Overrides the `SYST` reply text. Defaults to `UNIX Type: L8`.
    pub fn system_type(mut self, system_type: impl Into<String>) -> Self {
        self.options.system_type = system_type.into();
        self
    }

    /// Adds a command verb (case-insensitive) to the disabled set; disabled
    /// commands reply `502` before any argument parsing (spec.md §4.2).
    pub fn disable_command(mut self, verb: impl Into<String>) -> Self {
        self.options.disabled_commands.insert(verb.into().to_ascii_uppercase());
        self
    }

    /// Disables `MLSD` specifically, independent of [`ServerBuilder::disable_command`]
    /// (spec.md §4.2: MLSD disabled yields `502`, and is also omitted from FEAT).
    pub fn disable_mlsd(mut self, disabled: bool) -> Self {
        self.options.disable_mlsd = disabled;
        self
    }

    /// When set, `CWD` into a directory containing a `.message` file prepends
    /// its contents as `250-` continuation lines (spec.md §4.2).
    pub fn enable_directory_message(mut self, enabled: bool) -> Self {
        self.options.enable_directory_message = enabled;
        self
    }

    /// Installs a metrics hook notified of admission decisions and transfer
    /// completions.
    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.options.metrics = Some(sink);
        self
    }

    /// Caps how long the control reader will wait for a command line before
    /// giving up. Defaults to [`ServerBuilder::idle_timeout`]'s value when
    /// unset (spec.md §4.2 "idle-or-read deadline before each read").
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.options.read_timeout = Some(timeout);
        self
    }

    /// Caps how long a reply write (including the `150`/`226`/`426` lines
    /// around a transfer) may block. Unset means no deadline.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.options.write_timeout = Some(timeout);
        self
    }

    /// Installs a transfer-log sink, notified once per finished RETR/STOR/
    /// APPE/STOU (spec.md §6 "transfer-log writer").
    pub fn xferlog(mut self, sink: Arc<dyn XferLogSink>) -> Self {
        self.options.xferlog = Some(sink);
        self
    }

    /// Installs a hook that rewrites virtual paths before they appear in this
    /// crate's own `tracing` output (spec.md §3 "optional path-redaction ...
    /// hooks"). Never applied to wire responses.
    pub fn path_redactor(mut self, redactor: Arc<PathRedactor>) -> Self {
        self.options.path_redactor = Some(redactor);
        self
    }

    /// When set, peer IPs are masked in this crate's own log lines instead of
    /// logged verbatim (spec.md §3 "optional ... IP-redaction hooks").
    pub fn redact_ips(mut self, redact: bool) -> Self {
        self.options.redact_ips = redact;
        self
    }

    /// Installs a bandwidth limiter applied to every opened data channel; the
    /// limiter receives the session's username (if logged in) so it can apply
    /// a per-user bucket as well as a shared one (spec.md §4.6, §6 "global and
    /// per-user bandwidth caps"). `wharf` does not implement the token-bucket
    /// math itself — this is purely a wrapping hook.
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.options.rate_limiter = Some(limiter);
        self
    }

    pub fn build(self) -> crate::server::Server<A> {
        crate::server::Server::from_parts(self.authenticator, self.options)
    }
}
