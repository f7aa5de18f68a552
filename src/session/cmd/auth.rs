//! USER/PASS/QUIT/HOST/AUTH/PBSZ/PROT/FEAT/OPTS (spec.md §4.2, §4.5).
use crate::backend::Authenticator;
use crate::hash::HashAlgorithm;
use crate::response::{codes, Reply};
use crate::tls::ProtectionLevel;

use super::super::{Outcome, Session};

pub(super) fn user<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    if arg.is_empty() {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "USER requires a username."));
    }
    session.username = Some(arg.to_string());
    session.logged_in = false;
    session.backend = None;
    Outcome::Reply(Reply::new(codes::NAME_OK_NEED_PASSWORD, "Please specify the password."))
}

pub(super) async fn pass<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let Some(user) = session.username.clone() else {
        return Outcome::Reply(Reply::new(codes::BAD_SEQUENCE, "Login with USER first."));
    };
    if session.shared.options.tls_required_for_login && !session.is_tls {
        return Outcome::Reply(Reply::new(codes::NOT_LOGGED_IN, "TLS required before login."));
    }

    // `arg` (the password) is intentionally never included in any log line
    // or error message here (spec.md §4.2 "argument redaction").
    match session.authenticator.authenticate(&user, arg, session.host.as_deref(), session.peer.ip()).await {
        Ok(backend) => {
            session.logged_in = true;
            session.backend = Some(std::sync::Arc::new(backend));
            Outcome::Reply(Reply::new(codes::LOGGED_IN, "Login successful."))
        }
        Err(_) => {
            session.logged_in = false;
            session.backend = None;
            Outcome::Reply(Reply::new(codes::NOT_LOGGED_IN, "Login incorrect."))
        }
    }
}

pub(super) fn quit<A: Authenticator>(_session: &mut Session<A>) -> Outcome {
    Outcome::Close(Reply::new(codes::CLOSING_CONTROL_CONN, "Goodbye."))
}

pub(super) fn host<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    if session.logged_in {
        return Outcome::Reply(Reply::new(codes::BAD_SEQUENCE, "HOST must be sent before login."));
    }
    if arg.is_empty() {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "HOST requires a hostname."));
    }
    session.host = Some(arg.to_string());
    Outcome::Reply(Reply::new(codes::HOST_ACCEPTED, format!("HOST {arg} accepted.")))
}

pub(super) fn auth<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    if !arg.eq_ignore_ascii_case("TLS") {
        return Outcome::Reply(Reply::new(codes::PARAM_NOT_IMPLEMENTED, "Only AUTH TLS is supported."));
    }
    if session.shared.options.tls.is_none() {
        return Outcome::Reply(Reply::new(codes::NOT_IMPLEMENTED, "TLS is not configured."));
    }
    Outcome::UpgradeTls(Reply::new(codes::AUTH_OK, "AUTH TLS successful."))
}

pub(super) fn pbsz(arg: &str) -> Outcome {
    match arg.trim().parse::<u64>() {
        Ok(0) => Outcome::Reply(Reply::new(codes::COMMAND_OK, "PBSZ=0")),
        Ok(_) => Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "Only PBSZ 0 is supported.")),
        Err(_) => Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "PBSZ requires a numeric argument.")),
    }
}

pub(super) fn prot<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    match arg.trim().to_ascii_uppercase().as_str() {
        "C" => {
            session.protection = ProtectionLevel::Clear;
            Outcome::Reply(Reply::new(codes::COMMAND_OK, "Protection set to Clear."))
        }
        "P" => {
            if session.shared.options.tls.is_none() {
                return Outcome::Reply(Reply::new(codes::NOT_IMPLEMENTED, "TLS is not configured."));
            }
            session.protection = ProtectionLevel::Private;
            Outcome::Reply(Reply::new(codes::COMMAND_OK, "Protection set to Private."))
        }
        _ => Outcome::Reply(Reply::new(codes::PARAM_NOT_IMPLEMENTED, "Only PROT C/P are supported.")),
    }
}

pub(super) fn feat<A: Authenticator>(session: &mut Session<A>) -> Outcome {
    let mut lines = vec![
        "UTF8".to_string(),
        "SIZE".to_string(),
        "MDTM".to_string(),
        "REST STREAM".to_string(),
        "HOST".to_string(),
        "HASH SHA-1;SHA-256;SHA-512;MD5;CRC32".to_string(),
        "MFMT".to_string(),
    ];
    if session.shared.options.tls.is_some() {
        lines.push("AUTH TLS".to_string());
        lines.push("PBSZ".to_string());
        lines.push("PROT".to_string());
    }
    if !session.shared.options.disable_mlsd {
        lines.push("MLST type*;size*;modify*;".to_string());
        lines.push("MLSD".to_string());
    }
    Outcome::Reply(Reply::multiline(codes::FEAT, lines, "End".to_string()))
}

pub(super) fn opts<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let mut parts = arg.splitn(2, char::is_whitespace);
    let sub = parts.next().unwrap_or("").to_ascii_uppercase();
    let rest = parts.next().unwrap_or("").trim();

    match sub.as_str() {
        "UTF8" => Outcome::Reply(Reply::new(codes::COMMAND_OK, "UTF8 set to on.")),
        "HASH" => match HashAlgorithm::parse(rest) {
            Some(algo) => {
                session.hash_algo = algo;
                Outcome::Reply(Reply::new(codes::COMMAND_OK, format!("Hash algorithm set to {}.", algo.name())))
            }
            None => Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "Unsupported hash algorithm.")),
        },
        _ => Outcome::Reply(Reply::new(codes::PARAM_NOT_IMPLEMENTED, "Unsupported OPTS option.")),
    }
}
