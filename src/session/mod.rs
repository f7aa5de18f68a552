//! Per-connection control-channel state machine (spec.md §4.2).
//!
//! Structured as the teacher's `Handler::run` loop generalized to three
//! cooperating tasks instead of one: a reader task that blocks on a hand-off
//! permit between command lines (so `AUTH TLS` can safely reclaim and
//! rewrap the socket), the main loop that dispatches and replies, and,
//! while a transfer is in flight, a background copy task sharing only the
//! write half and the busy/cancel state behind one mutex.
pub mod cmd;
pub mod command;
pub mod data;
pub mod framing;
pub mod transfer;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{split, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use crate::backend::Authenticator;
use crate::error::{Error, Result};
use crate::hash::HashAlgorithm;
use crate::response::{codes, Reply};
use crate::server::ServerShared;
use crate::shutdown::Shutdown;
use crate::stream::DataStream;
use crate::telnet::TelnetFilter;
use crate::tls::{MaybeTlsStream, ProtectionLevel};

use command::Command;
use data::DataChannel;
use framing::read_line_capped;
use transfer::TransferCancel;

const MAX_LINE_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferType {
    #[default]
    Image,
    Ascii,
}

/// Outcome of dispatching one command line.
pub(crate) enum Outcome {
    /// Write this reply and wait for the next command.
    Reply(Reply),
    /// Write this reply and end the session.
    Close(Reply),
    /// The handler already wrote whatever it needed (transfer 150 line,
    /// AUTH TLS 234 before the stream swap, ...).
    Handled,
    /// Write this reply, then reclaim and rewrap the control socket in TLS.
    UpgradeTls(Reply),
}

type ControlWriteHalf = WriteHalf<MaybeTlsStream<TcpStream>>;
type ControlReadHalf = ReadHalf<MaybeTlsStream<TcpStream>>;

/// Fields touched by both the main loop and a background transfer task
/// (spec.md §5 "a single mutex guards ... writer, busy, cancellation handle").
pub(crate) struct ControlShared {
    pub writer: Option<ControlWriteHalf>,
    pub busy: bool,
    pub cancel: Option<TransferCancel>,
}

enum ReaderEvent {
    Line(String),
    Eof,
    Error(Error),
}

enum ReaderControl {
    Continue,
    Reclaim(oneshot::Sender<ControlReadHalf>),
}

/// One FTP control connection plus its negotiated session state.
pub struct Session<A: Authenticator> {
    id: String,
    peer: SocketAddr,
    local_addr: SocketAddr,
    authenticator: Arc<A>,
    shared: Arc<ServerShared>,
    shutdown: Shutdown,

    logged_in: bool,
    username: Option<String>,
    host: Option<String>,
    backend: Option<Arc<A::Session>>,

    rename_from: Option<String>,
    restart_offset: u64,
    transfer_type: TransferType,
    hash_algo: HashAlgorithm,
    data_channel: DataChannel,
    data_stream: Option<DataStream>,
    protection: ProtectionLevel,
    is_tls: bool,

    control: Arc<AsyncMutex<ControlShared>>,
    reader_control_tx: Option<mpsc::Sender<ReaderControl>>,
    events_rx: Option<mpsc::Receiver<ReaderEvent>>,
}

impl<A: Authenticator> Session<A> {
    pub(crate) fn new(
        socket: TcpStream,
        peer: SocketAddr,
        authenticator: Arc<A>,
        shared: Arc<ServerShared>,
        notify_shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Self {
        let id = session_id();
        let local_addr = socket.local_addr().unwrap_or(SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0));
        let stream = MaybeTlsStream::Plain(socket);
        let (read_half, write_half) = split(stream);
        let control = Arc::new(AsyncMutex::new(ControlShared { writer: Some(write_half), busy: false, cancel: None }));

        let read_timeout = shared.options.read_timeout.unwrap_or(shared.options.idle_timeout);
        let (events_tx, events_rx) = mpsc::channel(8);
        let (reader_control_tx, reader_control_rx) = mpsc::channel(1);
        spawn_reader(read_half, events_tx, reader_control_rx, read_timeout);

        Self {
            id,
            peer,
            local_addr,
            authenticator,
            shared,
            shutdown: Shutdown::new(notify_shutdown),
            logged_in: false,
            username: None,
            host: None,
            backend: None,
            rename_from: None,
            restart_offset: 0,
            transfer_type: TransferType::default(),
            hash_algo: HashAlgorithm::default(),
            data_channel: DataChannel::default(),
            data_stream: None,
            protection: ProtectionLevel::default(),
            is_tls: false,
            control,
            reader_control_tx: Some(reader_control_tx),
            events_rx: Some(events_rx),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn write_reply(&self, reply: &Reply) -> Result<()> {
        use tokio::io::AsyncWriteExt;
        let body = reply.render();
        let write = async {
            let mut guard = self.control.lock().await;
            let writer = guard.writer.as_mut().expect("control writer missing");
            writer.write_all(body.as_bytes()).await?;
            writer.flush().await
        };
        match self.shared.options.write_timeout {
            Some(deadline) => tokio::time::timeout(deadline, write).await.map_err(|_| Error::Protocol("control write timed out".into()))??,
            None => write.await?,
        };
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(session = %self.id, peer = %self.peer))]
    pub async fn run(mut self) -> Result<()> {
        let greeting = Reply::new(codes::SERVICE_READY, self.shared.options.welcome_message.clone());
        self.write_reply(&greeting).await?;

        let mut events_rx = self.events_rx.take().expect("events channel missing");

        loop {
            let event = tokio::select! {
                biased;
                _ = self.shutdown.recv() => {
                    if let Some(cancel) = self.cancel_handle().await {
                        cancel.cancel();
                    }
                    let _ = self.write_reply(&Reply::new(codes::TOO_MANY_USERS, "Service shutting down.")).await;
                    break;
                }
                ev = events_rx.recv() => match ev {
                    Some(ev) => ev,
                    None => break,
                },
            };

            match event {
                ReaderEvent::Eof => break,
                ReaderEvent::Error(Error::LineTooLong) => {
                    let _ = self.write_reply(&Reply::new(codes::LINE_TOO_LONG, "Command line too long.")).await;
                    break;
                }
                ReaderEvent::Error(Error::Protocol(ref msg)) if msg == "idle timeout" => {
                    let _ = self.write_reply(&Reply::new(codes::TOO_MANY_USERS, "Idle timeout, closing control connection.")).await;
                    break;
                }
                ReaderEvent::Error(_) => break,
                ReaderEvent::Line(line) => {
                    let command = Command::parse(&line);
                    let outcome = cmd::dispatch(&mut self, command).await;
                    match outcome {
                        Outcome::Reply(reply) => {
                            self.write_reply(&reply).await?;
                            self.signal_continue().await;
                        }
                        Outcome::Close(reply) => {
                            let _ = self.write_reply(&reply).await;
                            break;
                        }
                        Outcome::Handled => {
                            self.signal_continue().await;
                        }
                        Outcome::UpgradeTls(reply) => {
                            self.write_reply(&reply).await?;
                            match self.upgrade_to_tls().await {
                                Ok(new_events_rx) => {
                                    events_rx = new_events_rx;
                                }
                                Err(err) => {
                                    tracing::warn!(%err, "TLS upgrade failed");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }

        if let Some(backend) = self.backend.take() {
            backend.close().await;
        }
        Ok(())
    }

    pub(crate) fn take_data_channel(&mut self) -> DataChannel {
        std::mem::take(&mut self.data_channel)
    }

    pub(crate) fn arm_data_channel(&mut self, channel: DataChannel) {
        self.data_channel = channel;
    }

    pub(crate) fn protection(&self) -> ProtectionLevel {
        self.protection
    }

    pub(crate) fn tls_config_for_data(&self) -> Option<Arc<crate::tls::TlsConfig>> {
        self.shared.options.tls.clone()
    }

    pub(crate) async fn write_reply_now(&self, reply: &Reply) -> Result<()> {
        self.write_reply(reply).await
    }

    pub(crate) async fn busy_transfer(&self) -> bool {
        self.control.lock().await.busy
    }

    pub(crate) fn arm_data_stream(&mut self, stream: DataStream) {
        self.data_stream = Some(stream);
    }

    pub(crate) fn take_data_stream(&mut self) -> DataStream {
        self.data_stream.take().expect("data stream not armed")
    }

    pub(crate) fn rate_limiter(&self) -> Option<Arc<crate::config::RateLimiter>> {
        self.shared.options.rate_limiter.clone()
    }

    pub(crate) fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Marks the session busy (or idle) and records the cancellation handle
    /// the background transfer task shares with `ABOR` (spec.md §5).
    pub(crate) async fn set_busy(&self, cancel: Option<TransferCancel>) {
        let mut guard = self.control.lock().await;
        guard.busy = cancel.is_some();
        guard.cancel = cancel;
    }

    /// Clones the cancellation handle for an in-flight transfer, if any,
    /// without disturbing `busy` — the transfer task itself clears that once
    /// it observes the cancellation and exits.
    pub(crate) async fn cancel_handle(&self) -> Option<TransferCancel> {
        self.control.lock().await.cancel.clone()
    }

    pub(crate) fn control_handle(&self) -> Arc<AsyncMutex<ControlShared>> {
        self.control.clone()
    }

    async fn signal_continue(&self) {
        if let Some(tx) = &self.reader_control_tx {
            let _ = tx.send(ReaderControl::Continue).await;
        }
    }

    /// Reclaims the reader's read half, unsplits the control stream, wraps
    /// it in TLS, re-splits, and spawns a fresh reader task. Returns the new
    /// events receiver the main loop should select on from here on.
    async fn upgrade_to_tls(&mut self) -> Result<mpsc::Receiver<ReaderEvent>> {
        let tls = self.shared.options.tls.clone().ok_or_else(|| Error::Protocol("no TLS configured".into()))?;

        let (reclaim_tx, reclaim_rx) = oneshot::channel();
        self.reader_control_tx
            .as_ref()
            .expect("reader control channel missing")
            .send(ReaderControl::Reclaim(reclaim_tx))
            .await
            .map_err(|_| Error::Protocol("reader task already gone".into()))?;
        let read_half = reclaim_rx.await.map_err(|_| Error::Protocol("reader task dropped reclaim".into()))?;

        let write_half = {
            let mut guard = self.control.lock().await;
            guard.writer.take().expect("control writer missing")
        };

        let plain = read_half.unsplit(write_half);
        let tcp = match plain {
            MaybeTlsStream::Plain(tcp) => tcp,
            MaybeTlsStream::Tls(_) => return Err(Error::Protocol("control channel is already TLS".into())),
        };

        let tls_stream = tls.accept(tcp).await.map_err(Error::Io)?;
        let wrapped = MaybeTlsStream::Tls(Box::new(tls_stream));
        let (new_read, new_write) = tokio::io::split(wrapped);

        {
            let mut guard = self.control.lock().await;
            guard.writer = Some(new_write);
        }
        self.is_tls = true;
        self.protection = ProtectionLevel::Private;

        let read_timeout = self.shared.options.read_timeout.unwrap_or(self.shared.options.idle_timeout);
        let (events_tx, events_rx) = mpsc::channel(8);
        let (reader_control_tx, reader_control_rx) = mpsc::channel(1);
        spawn_reader(new_read, events_tx, reader_control_rx, read_timeout);
        self.reader_control_tx = Some(reader_control_tx);

        Ok(events_rx)
    }
}

fn spawn_reader(
    read_half: ControlReadHalf,
    events_tx: mpsc::Sender<ReaderEvent>,
    mut control_rx: mpsc::Receiver<ReaderControl>,
    read_timeout: Duration,
) {
    tokio::spawn(async move {
        let telnet = TelnetFilter::new(read_half);
        let mut buffered = tokio::io::BufReader::new(telnet);

        loop {
            let outcome = match tokio::time::timeout(read_timeout, read_line_capped(&mut buffered, MAX_LINE_LEN)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let _ = events_tx.send(ReaderEvent::Error(Error::Protocol("idle timeout".into()))).await;
                    return;
                }
            };
            let keep_going = match outcome {
                Ok(Some(line)) => events_tx.send(ReaderEvent::Line(line)).await.is_ok(),
                Ok(None) => {
                    let _ = events_tx.send(ReaderEvent::Eof).await;
                    false
                }
                Err(err) => {
                    let _ = events_tx.send(ReaderEvent::Error(err)).await;
                    false
                }
            };
            if !keep_going {
                return;
            }

            match control_rx.recv().await {
                Some(ReaderControl::Continue) => continue,
                Some(ReaderControl::Reclaim(tx)) => {
                    let read_half = buffered.into_inner().into_inner();
                    let _ = tx.send(read_half);
                    return;
                }
                None => return,
            }
        }
    });
}

fn session_id() -> String {
    use rand::Rng;
    let bytes: [u8; 4] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
