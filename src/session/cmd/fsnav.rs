//! TYPE/MODE/STRU, navigation, and metadata commands (spec.md §4.2).
use crate::backend::{Authenticator, OpenFlags, StorageBackend};
use crate::hash::HashAlgorithm;
use crate::response::{backend_error_reply, codes, Reply};

use super::super::{Outcome, Session, TransferType};
use super::require_backend;

pub(super) fn type_cmd<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    match arg.trim().to_ascii_uppercase().as_str() {
        "A" => {
            session.transfer_type = TransferType::Ascii;
            Outcome::Reply(Reply::new(codes::COMMAND_OK, "Type set to A."))
        }
        "I" => {
            session.transfer_type = TransferType::Image;
            Outcome::Reply(Reply::new(codes::COMMAND_OK, "Type set to I."))
        }
        _ => Outcome::Reply(Reply::new(codes::PARAM_NOT_IMPLEMENTED, "Only TYPE A/I are supported.")),
    }
}

pub(super) fn mode(arg: &str) -> Outcome {
    if arg.trim().eq_ignore_ascii_case("S") {
        Outcome::Reply(Reply::new(codes::COMMAND_OK, "Mode set to S."))
    } else {
        Outcome::Reply(Reply::new(codes::PARAM_NOT_IMPLEMENTED, "Only MODE S is supported."))
    }
}

pub(super) fn stru(arg: &str) -> Outcome {
    if arg.trim().eq_ignore_ascii_case("F") {
        Outcome::Reply(Reply::new(codes::COMMAND_OK, "Structure set to F."))
    } else {
        Outcome::Reply(Reply::new(codes::PARAM_NOT_IMPLEMENTED, "Only STRU F is supported."))
    }
}

pub(super) async fn pwd<A: Authenticator>(session: &mut Session<A>) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    let cwd = backend.cwd().await;
    Outcome::Reply(Reply::new(codes::PATHNAME_CREATED, format!("\"{cwd}\" is the current directory.")))
}

pub(super) async fn cwd<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    let target = if arg.is_empty() { ".." } else { arg };
    match backend.change_dir(target).await {
        Ok(()) => {
            let mut continuation = Vec::new();
            if session.shared.options.enable_directory_message {
                if let Some(message) = read_directory_message(backend.as_ref()).await {
                    continuation.extend(message.lines().map(str::to_string));
                }
            }
            let terminator = "Directory successfully changed.".to_string();
            if continuation.is_empty() {
                Outcome::Reply(Reply::new(codes::FILE_ACTION_OK, terminator))
            } else {
                Outcome::Reply(Reply::multiline(codes::FILE_ACTION_OK, continuation, terminator))
            }
        }
        Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
    }
}

/// Best-effort read of a `.message` file in the just-entered directory
/// (spec.md §4.2 "optionally read `.message` in new directory"). Any
/// failure (missing file, permission, oversized) is silently treated as
/// "no message" rather than surfaced as a CWD error.
async fn read_directory_message<B: StorageBackend>(backend: &B) -> Option<String> {
    use tokio::io::AsyncReadExt;
    let mut file = backend.open_file(".message", OpenFlags::READ).await.ok()?;
    let mut buf = Vec::new();
    file.take(4096).read_to_end(&mut buf).await.ok()?;
    String::from_utf8(buf).ok()
}

pub(super) async fn mkd<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    if arg.is_empty() {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "MKD requires a path."));
    }
    match backend.make_dir(arg).await {
        Ok(()) => Outcome::Reply(Reply::new(codes::PATHNAME_CREATED, format!("\"{arg}\" created."))),
        Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
    }
}

pub(super) async fn rmd<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    if arg.is_empty() {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "RMD requires a path."));
    }
    match backend.remove_dir(arg).await {
        Ok(()) => Outcome::Reply(Reply::new(codes::FILE_ACTION_OK, "Directory removed.")),
        Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
    }
}

pub(super) async fn dele<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    if arg.is_empty() {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "DELE requires a path."));
    }
    match backend.delete_file(arg).await {
        Ok(()) => Outcome::Reply(Reply::new(codes::FILE_ACTION_OK, "File deleted.")),
        Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
    }
}

pub(super) async fn rnfr<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    if arg.is_empty() {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "RNFR requires a path."));
    }
    match backend.stat(arg).await {
        Ok(_) => {
            session.rename_from = Some(arg.to_string());
            Outcome::Reply(Reply::new(codes::FILE_ACTION_PENDING, "Ready for RNTO."))
        }
        Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
    }
}

pub(super) async fn rnto<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    let Some(from) = session.rename_from.take() else {
        return Outcome::Reply(Reply::new(codes::BAD_SEQUENCE, "RNFR required before RNTO."));
    };
    if arg.is_empty() {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "RNTO requires a path."));
    }
    match backend.rename(&from, arg).await {
        Ok(()) => Outcome::Reply(Reply::new(codes::FILE_ACTION_OK, "Rename successful.")),
        Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
    }
}

pub(super) fn rest<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    match arg.trim().parse::<u64>() {
        Ok(offset) => {
            session.restart_offset = offset;
            Outcome::Reply(Reply::new(codes::FILE_ACTION_PENDING, format!("Restarting at {offset}.")))
        }
        Err(_) => Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "REST requires a non-negative integer.")),
    }
}

pub(super) async fn size<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    match backend.stat(arg).await {
        Ok(info) => Outcome::Reply(Reply::new(codes::FILE_STATUS, info.size.to_string())),
        Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
    }
}

pub(super) async fn mdtm<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    match backend.stat(arg).await {
        Ok(info) => {
            let stamp = chrono::DateTime::<chrono::Utc>::from(info.modified).format("%Y%m%d%H%M%S");
            Outcome::Reply(Reply::new(codes::FILE_STATUS, stamp.to_string()))
        }
        Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
    }
}

pub(super) async fn mfmt<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    let mut parts = arg.splitn(2, char::is_whitespace);
    let (Some(stamp), Some(path)) = (parts.next(), parts.next()) else {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "MFMT requires a timestamp and a path."));
    };
    let Ok(naive) = chrono::NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S") else {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "MFMT timestamp must be YYYYMMDDHHMMSS."));
    };
    let when: std::time::SystemTime = naive.and_utc().into();
    match backend.set_modified(path, when).await {
        Ok(()) => Outcome::Reply(Reply::new(codes::FILE_STATUS, format!("Modify={stamp}; {path}"))),
        Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
    }
}

pub(super) async fn hash<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    if arg.is_empty() {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "HASH requires a path."));
    }
    let algo: HashAlgorithm = session.hash_algo;
    match backend.hash(arg, algo).await {
        Ok(digest) => Outcome::Reply(Reply::new(codes::FILE_STATUS, format!("{} {digest} {arg}", algo.name()))),
        Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
    }
}
