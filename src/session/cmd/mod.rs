//! Command dispatch table (spec.md §4.2).
//!
//! Grounded on the login-gating `handle_with_auth` closure in libunftp's
//! control loop and the verb `match` in `powerfooI/rftp`'s `dispatch`,
//! combined here into one table that also applies the disabled-command
//! check and the busy-transfer gate before argument parsing.
mod auth;
mod dataconn;
mod fsnav;
mod listing;
mod misc;
mod xfer;

use crate::backend::Authenticator;
use crate::response::{codes, Reply};

use super::command::Command;
use super::{Outcome, Session};

pub(crate) async fn dispatch<A: Authenticator>(session: &mut Session<A>, command: Command) -> Outcome {
    let verb = command.verb.as_str();
    let arg = command.arg.as_str();

    if session.shared.options.disabled_commands.contains(verb) {
        return Outcome::Reply(Reply::new(codes::NOT_IMPLEMENTED, "Command not implemented."));
    }

    if session.busy_transfer().await && !matches!(verb, "ABOR" | "STAT") {
        return Outcome::Reply(Reply::new(codes::BAD_SEQUENCE, "Transfer in progress, please ABOR or wait."));
    }

    if !session.logged_in && !Command::allowed_before_login(verb) {
        return Outcome::Reply(Reply::new(codes::NOT_LOGGED_IN, "Please login with USER and PASS."));
    }

    match verb {
        "USER" => auth::user(session, arg),
        "PASS" => auth::pass(session, arg).await,
        "QUIT" => auth::quit(session),
        "HOST" => auth::host(session, arg),
        "AUTH" => auth::auth(session, arg),
        "PBSZ" => auth::pbsz(arg),
        "PROT" => auth::prot(session, arg),
        "FEAT" => auth::feat(session),
        "OPTS" => auth::opts(session, arg),
        "NOOP" => Outcome::Reply(Reply::new(codes::SERVICE_READY_NOOP, "NOOP ok.")),
        "ACCT" => Outcome::Reply(Reply::new(codes::SUPERFLUOUS, "No account needed.")),
        "SYST" => Outcome::Reply(Reply::new(codes::SYSTEM_TYPE, session.shared.options.system_type.clone())),
        "HELP" => misc::help(),
        "SITE" => misc::site(session, arg).await,

        "TYPE" => fsnav::type_cmd(session, arg),
        "MODE" => fsnav::mode(arg),
        "STRU" => fsnav::stru(arg),
        "PWD" => fsnav::pwd(session).await,
        "CWD" => fsnav::cwd(session, arg).await,
        "CDUP" => fsnav::cwd(session, "..").await,
        "MKD" => fsnav::mkd(session, arg).await,
        "RMD" => fsnav::rmd(session, arg).await,
        "DELE" => fsnav::dele(session, arg).await,
        "RNFR" => fsnav::rnfr(session, arg).await,
        "RNTO" => fsnav::rnto(session, arg).await,
        "REST" => fsnav::rest(session, arg),
        "SIZE" => fsnav::size(session, arg).await,
        "MDTM" => fsnav::mdtm(session, arg).await,
        "MFMT" => fsnav::mfmt(session, arg).await,
        "HASH" => fsnav::hash(session, arg).await,

        "LIST" => listing::list(session, arg).await,
        "NLST" => listing::nlst(session, arg).await,
        "MLSD" => listing::mlsd(session, arg).await,
        "MLST" => listing::mlst(session, arg).await,
        "STAT" => listing::stat(session, arg).await,

        "PASV" => dataconn::pasv(session).await,
        "EPSV" => dataconn::epsv(session).await,
        "PORT" => dataconn::port(session, arg),
        "EPRT" => dataconn::eprt(session, arg),

        "RETR" => xfer::retr(session, arg).await,
        "STOR" => xfer::stor(session, arg).await,
        "APPE" => xfer::appe(session, arg).await,
        "STOU" => xfer::stou(session).await,
        "ABOR" => xfer::abor(session).await,

        _ => Outcome::Reply(Reply::new(codes::NOT_IMPLEMENTED, format!("Command {verb} not implemented."))),
    }
}

/// Shared "must be logged in with a backend handle" extraction used by
/// nearly every post-login handler.
pub(super) fn require_backend<A: Authenticator>(session: &Session<A>) -> Result<std::sync::Arc<A::Session>, Outcome> {
    session.backend.clone().ok_or_else(|| Outcome::Reply(Reply::new(codes::NOT_LOGGED_IN, "Please login with USER and PASS.")))
}
