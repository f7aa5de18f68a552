//! RETR/STOR/APPE/STOU and ABOR (spec.md §4.4).
//!
//! The 150 reply is written synchronously by the handler; the byte copy
//! then runs on a spawned task so the main loop is free to read ABOR/STAT
//! while it's in flight. `Outcome::Handled` tells the caller the handler
//! already did its own writing, immediate and deferred.
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

use crate::ascii::{CrlfToLf, LfToCrlf};
use crate::backend::{Authenticator, OpenFlags, StorageBackend};
use crate::response::{backend_error_reply, codes, Reply};
use crate::session::data;
use crate::session::transfer::{copy_cancellable, TransferCancel};
use crate::session::{ControlShared, TransferType};
use crate::xferlog::{XferDirection, XferLogRecord};

use super::super::{Outcome, Session};
use super::require_backend;

/// Redacts `path` through the configured [`crate::config::PathRedactor`], if
/// any, for this crate's own log lines (spec.md §3). Never applied to wire
/// replies — those always carry the real path.
fn loggable_path<A: Authenticator>(session: &Session<A>, path: &str) -> String {
    match &session.shared.options.path_redactor {
        Some(redactor) => redactor(path),
        None => path.to_string(),
    }
}

async fn write_via_control(control: &Arc<AsyncMutex<ControlShared>>, reply: &Reply) {
    let mut guard = control.lock().await;
    if let Some(writer) = guard.writer.as_mut() {
        let _ = writer.write_all(reply.render().as_bytes()).await;
        let _ = writer.flush().await;
    }
}

async fn begin_transfer<A: Authenticator>(session: &mut Session<A>) -> Result<(), Outcome> {
    if session.busy_transfer().await {
        return Err(Outcome::Reply(Reply::new(codes::BAD_SEQUENCE, "Transfer in progress, please ABOR or wait.")));
    }
    let channel = session.take_data_channel();
    if !channel.is_armed() {
        return Err(Outcome::Reply(Reply::new(codes::CANT_OPEN_DATA_CONN, "Can't open data connection.")));
    }
    let protection = session.protection();
    let tls = session.tls_config_for_data();
    let rate_limiter = session.rate_limiter();
    let username = session.username().map(str::to_string);
    match data::open(channel, protection, tls.as_deref(), rate_limiter.as_deref(), username.as_deref()).await {
        Ok(stream) => {
            session.arm_data_stream(stream);
            Ok(())
        }
        Err(_) => Err(Outcome::Reply(Reply::new(codes::CANT_OPEN_DATA_CONN, "Can't open data connection."))),
    }
}

pub(super) async fn retr<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    if arg.is_empty() {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "RETR requires a path."));
    }

    let mut file = match backend.open_file(arg, OpenFlags::READ).await {
        Ok(f) => f,
        Err(e) => return Outcome::Reply(backend_error_reply(&e.kind)),
    };

    let offset = session.restart_offset;
    session.restart_offset = 0;
    if offset > 0 {
        if !backend.is_seekable(&file) {
            return Outcome::Reply(Reply::new(codes::FILE_UNAVAILABLE, "Resume not supported."));
        }
        if let Err(e) = backend.seek(&mut file, offset).await {
            return Outcome::Reply(backend_error_reply(&e.kind));
        }
    }

    if let Err(out) = begin_transfer(session).await {
        return out;
    }

    let starting_text = if offset > 0 {
        format!("Opening data connection (restarting at {offset}).")
    } else {
        "Opening data connection.".to_string()
    };
    if session.write_reply_now(&Reply::new(codes::DATA_CONN_OPEN_STARTING, starting_text)).await.is_err() {
        return Outcome::Close(Reply::new(codes::CLOSING_CONTROL_CONN, "Connection error."));
    }
    let data_stream = session.take_data_stream();

    let cancel = TransferCancel::new();
    session.set_busy(Some(cancel.clone())).await;

    let control = session.control_handle();
    let metrics = session.shared.options.metrics.clone();
    let xferlog = session.shared.options.xferlog.clone();
    let ascii = session.transfer_type == TransferType::Ascii;
    let peer = session.peer().ip();
    let username = session.username().map(str::to_string);
    let log_path = loggable_path(session, arg);
    let path = arg.to_string();

    tokio::spawn(async move {
        let outcome = if ascii {
            copy_cancellable(file, LfToCrlf::new(data_stream), &cancel).await
        } else {
            copy_cancellable(file, data_stream, &cancel).await
        };
        if let Some(sink) = &metrics {
            sink.transfer_completed(outcome.bytes, outcome.duration);
        }
        if let Some(sink) = &xferlog {
            sink.record(&XferLogRecord {
                peer,
                username: username.clone(),
                path,
                direction: XferDirection::Download,
                bytes: outcome.bytes,
                duration: outcome.duration,
                completed: !outcome.cancelled && outcome.error.is_none(),
            });
        }
        tracing::info!(path = %log_path, bytes = outcome.bytes, cancelled = outcome.cancelled, "RETR finished");
        if !outcome.cancelled {
            write_via_control(&control, &outcome.reply()).await;
        }
        clear_busy(&control).await;
    });

    Outcome::Handled
}

async fn store_common<A: Authenticator>(session: &mut Session<A>, arg: &str, flags: OpenFlags, starting_text: String) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    if arg.is_empty() {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "path required."));
    }

    let mut file = match backend.open_file(arg, flags).await {
        Ok(f) => f,
        Err(e) => return Outcome::Reply(backend_error_reply(&e.kind)),
    };

    let offset = session.restart_offset;
    session.restart_offset = 0;
    if offset > 0 {
        if !backend.is_seekable(&file) {
            return Outcome::Reply(Reply::new(codes::FILE_UNAVAILABLE, "Resume not supported."));
        }
        if let Err(e) = backend.seek(&mut file, offset).await {
            return Outcome::Reply(backend_error_reply(&e.kind));
        }
    }

    if let Err(out) = begin_transfer(session).await {
        return out;
    }
    if session.write_reply_now(&Reply::new(codes::DATA_CONN_OPEN_STARTING, starting_text)).await.is_err() {
        return Outcome::Close(Reply::new(codes::CLOSING_CONTROL_CONN, "Connection error."));
    }
    let data_stream = session.take_data_stream();

    let cancel = TransferCancel::new();
    session.set_busy(Some(cancel.clone())).await;

    let control = session.control_handle();
    let metrics = session.shared.options.metrics.clone();
    let xferlog = session.shared.options.xferlog.clone();
    let ascii = session.transfer_type == TransferType::Ascii;
    let peer = session.peer().ip();
    let username = session.username().map(str::to_string);
    let log_path = loggable_path(session, arg);
    let path = arg.to_string();

    tokio::spawn(async move {
        let outcome = if ascii {
            copy_cancellable(CrlfToLf::new(data_stream), file, &cancel).await
        } else {
            copy_cancellable(data_stream, file, &cancel).await
        };
        if let Some(sink) = &metrics {
            sink.transfer_completed(outcome.bytes, outcome.duration);
        }
        if let Some(sink) = &xferlog {
            sink.record(&XferLogRecord {
                peer,
                username: username.clone(),
                path,
                direction: XferDirection::Upload,
                bytes: outcome.bytes,
                duration: outcome.duration,
                completed: !outcome.cancelled && outcome.error.is_none(),
            });
        }
        tracing::info!(path = %log_path, bytes = outcome.bytes, cancelled = outcome.cancelled, "STOR finished");
        if !outcome.cancelled {
            write_via_control(&control, &outcome.reply()).await;
        }
        clear_busy(&control).await;
    });

    Outcome::Handled
}

pub(super) async fn stor<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    // REST>0 before STOR uses write|create without truncation, a seek-write
    // hybrid that only makes sense on a seekable backend (spec.md §9: this
    // is intentional, not a bug to paper over).
    let flags = if session.restart_offset > 0 { OpenFlags::WRITE_CREATE } else { OpenFlags::WRITE_CREATE_TRUNCATE };
    store_common(session, arg, flags, "Opening data connection.".to_string()).await
}

pub(super) async fn appe<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    session.restart_offset = 0;
    store_common(session, arg, OpenFlags::WRITE_CREATE_APPEND, "Opening data connection.".to_string()).await
}

pub(super) async fn stou<A: Authenticator>(session: &mut Session<A>) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    let name = backend.unique_name().await;
    let starting_text = format!("FILE: {name}");
    store_common(session, &name, OpenFlags::WRITE_CREATE_TRUNCATE, starting_text).await
}

pub(super) async fn abor<A: Authenticator>(session: &mut Session<A>) -> Outcome {
    let cancel = session.cancel_handle().await;
    match cancel {
        Some(cancel) => {
            cancel.cancel();
            Outcome::Reply(Reply::new(codes::CLOSING_DATA_CONN, "ABOR command successful; transfer aborted."))
        }
        None => Outcome::Reply(Reply::new(codes::CLOSING_DATA_CONN, "ABOR command successful; no transfer in progress.")),
    }
}

async fn clear_busy(control: &Arc<AsyncMutex<ControlShared>>) {
    let mut guard = control.lock().await;
    guard.busy = false;
    guard.cancel = None;
}
