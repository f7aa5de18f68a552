//! PASV/EPSV/PORT/EPRT (spec.md §4.3).
use crate::backend::Authenticator;
use crate::response::{codes, Reply};
use crate::session::data::{self, DataChannel, EprtParseError};

use super::super::{Outcome, Session};

pub(super) async fn pasv<A: Authenticator>(session: &mut Session<A>) -> Outcome {
    let settings = match &session.backend {
        Some(backend) => backend.settings(),
        None => crate::backend::BackendSettings::default(),
    };
    let range = settings.passive_ports.or_else(|| session.shared.options.passive_ports.clone());

    let listener = if let Some(range) = &range {
        session.shared.passive_ports.bind(range).await
    } else {
        data::bind_ephemeral().await
    };

    let listener = match listener {
        Ok(listener) => listener,
        Err(_) => return Outcome::Reply(Reply::new(codes::CANT_OPEN_DATA_CONN, "Can't open data connection.")),
    };
    let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);

    let public_host = match settings.public_host.as_deref().and_then(|h| h.parse::<std::net::IpAddr>().ok()) {
        Some(ip) => Some(ip),
        None => session.shared.resolved_public_host().await.map(std::net::IpAddr::V4),
    };
    let ip = data::advertised_ipv4(public_host, session.local_addr());

    session.arm_data_channel(DataChannel::Passive(listener));
    Outcome::Reply(Reply::new(codes::ENTERING_PASSIVE, data::pasv_reply_text(ip, port)))
}

pub(super) async fn epsv<A: Authenticator>(session: &mut Session<A>) -> Outcome {
    let settings = match &session.backend {
        Some(backend) => backend.settings(),
        None => crate::backend::BackendSettings::default(),
    };
    let range = settings.passive_ports.or_else(|| session.shared.options.passive_ports.clone());

    let listener = if let Some(range) = &range {
        session.shared.passive_ports.bind(range).await
    } else {
        data::bind_ephemeral().await
    };

    let listener = match listener {
        Ok(listener) => listener,
        Err(_) => return Outcome::Reply(Reply::new(codes::CANT_OPEN_DATA_CONN, "Can't open data connection.")),
    };
    let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);

    session.arm_data_channel(DataChannel::Passive(listener));
    Outcome::Reply(Reply::new(codes::ENTERING_EPSV, data::epsv_reply_text(port)))
}

pub(super) fn port<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    let Some(addr) = data::parse_port_arg(arg) else {
        return Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "Malformed PORT argument."));
    };
    if addr.ip() != session.peer().ip() {
        return Outcome::Reply(Reply::new(codes::ILLEGAL_PORT, "Illegal PORT command."));
    }
    session.arm_data_channel(DataChannel::Active(addr));
    Outcome::Reply(Reply::new(codes::COMMAND_OK, "PORT command successful."))
}

pub(super) fn eprt<A: Authenticator>(session: &mut Session<A>, arg: &str) -> Outcome {
    match data::parse_eprt_arg(arg) {
        Ok(addr) => {
            if addr.ip() != session.peer().ip() {
                return Outcome::Reply(Reply::new(codes::ILLEGAL_PORT, "Illegal PORT command."));
            }
            session.arm_data_channel(DataChannel::Active(addr));
            Outcome::Reply(Reply::new(codes::COMMAND_OK, "EPRT command successful."))
        }
        Err(EprtParseError::UnsupportedProtocol) => {
            Outcome::Reply(Reply::new(codes::NETWORK_PROTOCOL_NOT_SUPPORTED, "Network protocol not supported."))
        }
        Err(EprtParseError::Malformed) => Outcome::Reply(Reply::new(codes::SYNTAX_ERROR_ARGS, "Malformed EPRT argument.")),
    }
}
