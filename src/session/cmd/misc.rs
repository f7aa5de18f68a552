//! HELP and SITE (spec.md §4.2).
use crate::backend::{Authenticator, StorageBackend};
use crate::response::{backend_error_reply, codes, Reply};

use super::super::{Outcome, Session};
use super::require_backend;

pub(super) fn help() -> Outcome {
    let lines = vec![
        "USER PASS QUIT HOST AUTH PBSZ PROT FEAT OPTS".to_string(),
        "TYPE MODE STRU PWD CWD CDUP MKD RMD DELE RNFR RNTO REST SIZE MDTM MFMT HASH".to_string(),
        "LIST NLST MLSD MLST STAT".to_string(),
        "PASV EPSV PORT EPRT".to_string(),
        "RETR STOR APPE STOU ABOR".to_string(),
        "SITE HELP".to_string(),
    ];
    Outcome::Reply(Reply::multiline(codes::HELP, lines, "Help ok.".to_string()))
}

pub(super) async fn site<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let mut parts = arg.splitn(2, char::is_whitespace);
    let sub = parts.next().unwrap_or("").to_ascii_uppercase();
    let rest = parts.next().unwrap_or("").trim();

    match sub.as_str() {
        "HELP" => Outcome::Reply(Reply::multiline(codes::HELP, vec!["CHMOD".to_string()], "SITE help ok.".to_string())),
        "CHMOD" => chmod(session, rest).await,
        "" => Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "SITE requires a subcommand.")),
        _ => Outcome::Reply(Reply::new(codes::NOT_IMPLEMENTED, "Unsupported SITE subcommand.")),
    }
}

async fn chmod<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let backend = match require_backend(session) {
        Ok(b) => b,
        Err(out) => return out,
    };
    let mut parts = arg.splitn(2, char::is_whitespace);
    let (Some(mode_str), Some(path)) = (parts.next(), parts.next().map(str::trim)) else {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "SITE CHMOD requires a mode and a path."));
    };
    if path.is_empty() || mode_str.len() > 4 {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "SITE CHMOD requires an octal mode and a path."));
    }
    let Ok(mode) = u32::from_str_radix(mode_str, 8) else {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "Mode must be octal."));
    };
    if mode > 0o777 {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "Mode must be at most 0777."));
    }
    match backend.chmod(path, mode).await {
        Ok(()) => Outcome::Reply(Reply::new(codes::COMMAND_OK, "SITE CHMOD command ok.")),
        Err(e) => Outcome::Reply(backend_error_reply(&e.kind)),
    }
}
