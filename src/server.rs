//! Listener ownership, admission control, and graceful shutdown (spec.md
//! §4.1).
//!
//! Structurally this is the teacher's `Listener`/`run` pair generalized:
//! the semaphore-gated accept loop and the broadcast-shutdown/mpsc-drain
//! handshake are kept as-is, then extended with a per-IP cap (a
//! `Mutex<HashMap<IpAddr, usize>>` alongside the semaphore) and a deadline
//! that force-closes any sessions still open when `shutdown_grace` elapses,
//! which the teacher's Redis server never needed.
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, OnceCell, Semaphore};
use tracing::{debug, info, warn};

use crate::backend::Authenticator;
use crate::config::{ServerBuilder, ServerOptions};
use crate::error::Result;
use crate::session::{data::PassivePortCursor, ControlShared, Session};

/// Optional observability hook for admission decisions and transfer
/// completions (spec.md §3 "optional metrics sink"). All methods default to
/// no-ops so a host application only overrides what it cares about.
pub trait MetricsSink: Send + Sync {
    fn connection_outcome(&self, reason: &str) {
        let _ = reason;
    }
    fn transfer_completed(&self, bytes: u64, duration: Duration) {
        let _ = (bytes, duration);
    }
}

/// Process-wide state shared by every session task: admission counters, the
/// passive-port cursor, the draining flag, and the live-socket registry used
/// to force-close connections on a shutdown deadline.
pub(crate) struct ServerShared {
    pub(crate) options: Arc<ServerOptions>,
    pub(crate) connection_semaphore: Arc<Semaphore>,
    pub(crate) per_ip_counts: Mutex<HashMap<IpAddr, usize>>,
    pub(crate) passive_ports: PassivePortCursor,
    pub(crate) draining: AtomicBool,
    pub(crate) active_sessions: AtomicU64,
    pub(crate) notify_shutdown: broadcast::Sender<()>,
    control_registry: Mutex<HashMap<u64, Arc<AsyncMutex<ControlShared>>>>,
    next_registry_id: AtomicU64,
    /// Resolved once and cached for the server's lifetime (spec.md §4.3:
    /// "if PublicHost is a name, resolve once and cache the first IPv4").
    resolved_public_host: OnceCell<Option<Ipv4Addr>>,
}

impl ServerShared {
    /// Registers a session's control handle so a deadline-elapsed
    /// [`Server::shutdown`] can force-close it even if the session task
    /// itself never notices the broadcast (spec.md §4.1 "force-closes any
    /// sessions still open when the grace period elapses").
    fn register_control(&self, control: Arc<AsyncMutex<ControlShared>>) -> u64 {
        let id = self.next_registry_id.fetch_add(1, Ordering::Relaxed);
        self.control_registry.lock().unwrap().insert(id, control);
        id
    }

    fn deregister_control(&self, id: u64) {
        self.control_registry.lock().unwrap().remove(&id);
    }

    fn try_admit_per_ip(&self, ip: IpAddr) -> bool {
        let mut counts = self.per_ip_counts.lock().unwrap();
        let entry = counts.entry(ip).or_insert(0);
        if *entry >= self.options.max_connections_per_ip {
            return false;
        }
        *entry += 1;
        true
    }

    fn release_per_ip(&self, ip: IpAddr) {
        let mut counts = self.per_ip_counts.lock().unwrap();
        if let Some(entry) = counts.get_mut(&ip) {
            *entry = entry.saturating_sub(1);
            if *entry == 0 {
                counts.remove(&ip);
            }
        }
    }

    fn record(&self, reason: &str) {
        if let Some(sink) = &self.options.metrics {
            sink.connection_outcome(reason);
        }
    }

    /// Resolves the configured `public_host` to an IPv4 address, caching the
    /// outcome (including a failed lookup, as `None`) so repeated PASV/EPSV
    /// commands never re-resolve (spec.md §4.3).
    pub(crate) async fn resolved_public_host(&self) -> Option<Ipv4Addr> {
        *self
            .resolved_public_host
            .get_or_init(|| async {
                let host = self.options.public_host.as_deref()?;
                if let Ok(IpAddr::V4(v4)) = host.parse::<IpAddr>() {
                    return Some(v4);
                }
                let lookup = format!("{host}:0");
                match lookup_host(lookup).await {
                    Ok(addrs) => addrs.filter_map(|a| match a.ip() {
                        IpAddr::V4(v4) => Some(v4),
                        IpAddr::V6(_) => None,
                    }).next(),
                    Err(err) => {
                        warn!(%err, %host, "failed to resolve configured public_host");
                        None
                    }
                }
            })
            .await
    }
}

/// The embeddable FTP/FTPS server engine. Construct with [`Server::builder`],
/// serve a bound listener with [`Server::serve`], and stop it with
/// [`Server::shutdown`].
pub struct Server<A: Authenticator> {
    authenticator: Arc<A>,
    shared: Arc<ServerShared>,
    shutdown_complete_tx: mpsc::Sender<()>,
    shutdown_complete_rx: Option<mpsc::Receiver<()>>,
}

impl<A: Authenticator> Server<A> {
    pub fn builder(authenticator: A) -> ServerBuilder<A> {
        ServerBuilder::new(authenticator)
    }

    pub(crate) fn from_parts(authenticator: A, options: ServerOptions) -> Self {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, shutdown_complete_rx) = mpsc::channel(1);
        let shared = Arc::new(ServerShared {
            connection_semaphore: Arc::new(Semaphore::new(options.max_connections)),
            per_ip_counts: Mutex::new(HashMap::new()),
            passive_ports: PassivePortCursor::new(),
            draining: AtomicBool::new(false),
            active_sessions: AtomicU64::new(0),
            notify_shutdown,
            control_registry: Mutex::new(HashMap::new()),
            next_registry_id: AtomicU64::new(0),
            resolved_public_host: OnceCell::new(),
            options: Arc::new(options),
        });
        Self {
            authenticator: Arc::new(authenticator),
            shared,
            shutdown_complete_tx,
            shutdown_complete_rx: Some(shutdown_complete_rx),
        }
    }

    /// Runs the accept loop against an already-bound listener until the
    /// listener is closed (by [`Server::shutdown`]) or a non-transient
    /// accept error occurs.
    #[tracing::instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        info!("accepting inbound connections");
        let mut backoff = Duration::from_secs(1);

        loop {
            if self.shared.draining.load(Ordering::SeqCst) {
                return Err(crate::error::Error::Shutdown);
            }

            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    if self.shared.draining.load(Ordering::SeqCst) {
                        return Err(crate::error::Error::Shutdown);
                    }
                    warn!(%err, "accept failed, retrying in {:?}", backoff);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(64));
                    continue;
                }
            };
            backoff = Duration::from_secs(1);

            self.admit(socket, peer);
        }
    }

    fn admit(&self, socket: TcpStream, peer: SocketAddr) {
        let shared = self.shared.clone();
        let authenticator = self.authenticator.clone();
        let shutdown_complete = self.shutdown_complete_tx.clone();

        if shared.draining.load(Ordering::SeqCst) {
            shared.record("draining");
            return;
        }

        let permit = match shared.connection_semaphore.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                shared.record("global_limit_reached");
                tokio::spawn(reject(socket, 421, "Too many users, sorry."));
                return;
            }
        };

        if !shared.try_admit_per_ip(peer.ip()) {
            shared.record("per_ip_limit_reached");
            drop(permit);
            tokio::spawn(reject(socket, 421, "Too many connections from your IP address."));
            return;
        }

        shared.record("accepted");
        shared.active_sessions.fetch_add(1, Ordering::SeqCst);
        let notify_shutdown = shared.notify_shutdown.subscribe();

        tokio::spawn(async move {
            let session = Session::new(socket, peer, authenticator, shared.clone(), notify_shutdown);
            let registry_id = shared.register_control(session.control_handle());
            if let Err(err) = session.run().await {
                debug!(%err, %peer, "session ended with error");
            }
            shared.deregister_control(registry_id);
            shared.release_per_ip(peer.ip());
            shared.active_sessions.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
            drop(shutdown_complete);
        });
    }

    /// Binds `addr` and runs [`Server::serve`] against it; a small
    /// convenience wrapper for hosts that don't need to customize the
    /// listener themselves.
    pub async fn listen_and_serve(&self, addr: impl tokio::net::ToSocketAddrs) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "listening");
        self.serve(listener).await
    }

    /// Signals every active session to stop, waits up to `grace` (bounded
    /// additionally by the session's own idle/transfer deadlines) for active
    /// sessions to finish, and returns once the session count reaches zero
    /// or the deadline elapses.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&mut self) {
        self.shared.draining.store(true, Ordering::SeqCst);
        let _ = self.shared.notify_shutdown.send(());

        let grace = self.shared.options.shutdown_grace;
        let deadline = tokio::time::Instant::now() + grace;
        let mut elapsed = false;
        while self.shared.active_sessions.load(Ordering::SeqCst) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!("shutdown grace period elapsed with sessions still active");
                elapsed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if elapsed {
            self.force_close_remaining().await;
        }

        if let Some(mut rx) = self.shutdown_complete_rx.take() {
            drop(self.shutdown_complete_tx.clone());
            let _ = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        }
    }

    /// Forcibly closes every still-registered control connection and cancels
    /// any transfer it has in flight, for sessions that ignored (or never
    /// observed) the shutdown broadcast within the grace period.
    async fn force_close_remaining(&self) {
        use tokio::io::AsyncWriteExt;
        let handles: Vec<Arc<AsyncMutex<ControlShared>>> = {
            let registry = self.shared.control_registry.lock().unwrap();
            registry.values().cloned().collect()
        };
        for control in handles {
            let mut guard = control.lock().await;
            if let Some(cancel) = guard.cancel.take() {
                cancel.cancel();
            }
            if let Some(writer) = guard.writer.as_mut() {
                let _ = writer.write_all(b"421 Service shutting down, closing connection.\r\n").await;
                let _ = writer.shutdown().await;
            }
        }
    }
}

async fn reject(mut socket: TcpStream, code: u16, text: &str) {
    use tokio::io::AsyncWriteExt;
    let line = format!("{code} {text}\r\n");
    let _ = socket.write_all(line.as_bytes()).await;
    let _ = socket.shutdown().await;
}
