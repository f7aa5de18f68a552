//! LIST/NLST/MLSD/MLST/STAT (spec.md §4.2, §6 "LIST format" / "MLST/MLSD
//! fact line").
//!
//! The Unix-ish LIST line is grounded on the formatter in `powerfooI/rftp`'s
//! server module, which already renders `<mode> 1 owner group <size> <mon>
//! <day> <time> <name>` with `chrono`.
use tokio::io::AsyncWriteExt;

use crate::backend::{Authenticator, FileInfo, MlEntry, MlEntryType};
use crate::response::{backend_error_reply, codes, Reply};
use crate::session::data;

use super::super::{Outcome, Session};
use super::require_backend;

fn unix_style_line(info: &FileInfo) -> String {
    let kind = if info.is_dir { 'd' } else { '-' };
    let perm = render_mode(info.mode);
    let modified = chrono::DateTime::<chrono::Utc>::from(info.modified).format("%b %d %H:%M");
    format!("{kind}{perm} 1 owner group {:>10} {modified} {}\r\n", info.size, info.name)
}

fn render_mode(mode: u32) -> String {
    let bits = [
        (0o400, 'r'), (0o200, 'w'), (0o100, 'x'),
        (0o040, 'r'), (0o020, 'w'), (0o010, 'x'),
        (0o004, 'r'), (0o002, 'w'), (0o001, 'x'),
    ];
    bits.iter().map(|(mask, ch)| if mode & mask != 0 { *ch } else { '-' }).collect()
}

fn to_ml_entry(info: &FileInfo) -> MlEntry {
    MlEntry {
        name: info.name.clone(),
        entry_type: if info.is_dir { MlEntryType::Dir } else { MlEntryType::File },
        size: info.size,
        modify: info.modified,
        perm: if info.is_dir { "el".to_string() } else { "r".to_string() },
        unix_mode: info.mode,
        facts: Vec::new(),
    }
}

macro_rules! open_data_or_425 {
    ($session:expr) => {{
        let channel = $session.take_data_channel();
        if !channel.is_armed() {
            return Outcome::Reply(Reply::new(codes::CANT_OPEN_DATA_CONN, "Can't open data connection."));
        }
        let tls = $session.tls_config_for_data();
        let rate_limiter = $session.rate_limiter();
        let username = $session.username().map(str::to_string);
        match data::open(channel, $session.protection(), tls.as_deref(), rate_limiter.as_deref(), username.as_deref()).await {
            Ok(stream) => stream,
            Err(_) => return Outcome::Reply(Reply::new(codes::CANT_OPEN_DATA_CONN, "Can't open data connection.")),
        }
    }};
}

pub(super) async fn list<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    let entries = match backend.list_dir(arg).await {
        Ok(entries) => entries,
        Err(e) => return Outcome::Reply(backend_error_reply(&e.kind)),
    };

    if session.write_reply_now(&Reply::new(codes::DATA_CONN_OPEN_STARTING, "Opening data connection for file list.")).await.is_err() {
        return Outcome::Close(Reply::new(codes::CLOSING_CONTROL_CONN, "Connection error."));
    }
    let mut data_stream = open_data_or_425!(session);

    let mut body = String::new();
    for entry in &entries {
        body.push_str(&unix_style_line(entry));
    }
    let _ = data_stream.write_all(body.as_bytes()).await;
    let _ = data_stream.shutdown().await;

    Outcome::Reply(Reply::new(codes::CLOSING_DATA_CONN, "Transfer complete."))
}

pub(super) async fn nlst<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    let entries = match backend.list_dir(arg).await {
        Ok(entries) => entries,
        Err(e) => return Outcome::Reply(backend_error_reply(&e.kind)),
    };

    if session.write_reply_now(&Reply::new(codes::DATA_CONN_OPEN_STARTING, "Opening data connection for file list.")).await.is_err() {
        return Outcome::Close(Reply::new(codes::CLOSING_CONTROL_CONN, "Connection error."));
    }
    let mut data_stream = open_data_or_425!(session);

    let mut body = String::new();
    for entry in &entries {
        body.push_str(&entry.name);
        body.push_str("\r\n");
    }
    let _ = data_stream.write_all(body.as_bytes()).await;
    let _ = data_stream.shutdown().await;

    Outcome::Reply(Reply::new(codes::CLOSING_DATA_CONN, "Transfer complete."))
}

pub(super) async fn mlsd<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    if session.shared.options.disable_mlsd {
        return Outcome::Reply(Reply::new(codes::NOT_IMPLEMENTED, "MLSD is disabled."));
    }
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    let entries = match backend.list_dir(arg).await {
        Ok(entries) => entries,
        Err(e) => return Outcome::Reply(backend_error_reply(&e.kind)),
    };

    if session.write_reply_now(&Reply::new(codes::DATA_CONN_OPEN_STARTING, "Opening data connection for MLSD.")).await.is_err() {
        return Outcome::Close(Reply::new(codes::CLOSING_CONTROL_CONN, "Connection error."));
    }
    let mut data_stream = open_data_or_425!(session);

    let mut body = String::new();
    for entry in &entries {
        body.push_str(&to_ml_entry(entry).render());
        body.push_str("\r\n");
    }
    let _ = data_stream.write_all(body.as_bytes()).await;
    let _ = data_stream.shutdown().await;

    Outcome::Reply(Reply::new(codes::CLOSING_DATA_CONN, "Transfer complete."))
}

pub(super) async fn mlst<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    match backend.stat(arg).await {
        Ok(info) => {
            let line = to_ml_entry(&info).render();
            Outcome::Reply(Reply::multiline(codes::FILE_ACTION_OK, vec![line], "End.".to_string()))
        }
        Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
    }
}

pub(super) async fn stat<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    if !arg.is_empty() {
        let backend = match require_backend(session) {
            Ok(b) => b,
            Err(out) => return out,
        };
        return match backend.stat(arg).await {
            Ok(info) => Outcome::Reply(Reply::multiline(codes::STAT, vec![unix_style_line(&info).trim_end().to_string()], "End of status.".to_string())),
            Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
        };
    }

    let busy = session.busy_transfer().await;
    let status = if busy { "Transfer in progress." } else { "Idle." };
    Outcome::Reply(Reply::multiline(codes::STAT, vec![status.to_string()], "End of status.".to_string()))
}
