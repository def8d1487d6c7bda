use std::task::Context;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Result, Error};
use super::negotiate;
use super::auth_method::{AuthMethod, AuthOutcome};
use super::client_event::{ClientEvent, AuthBanner};
use super::client_state::{self, ClientState};
use super::pump::Pump;
use super::recv::{self, ResultRecvState};

/// Message sent by the server when an authentication attempt fails.
///
/// This corresponds to `SSH_MSG_USERAUTH_FAILURE` (RFC 4252, section 5.1). Note that this may
/// actually represent a [partial success][Self::partial_success].
#[derive(Debug, Clone)]
pub struct AuthFailure {
    /// Authentication methods that may productively continue the authentication.
    pub methods_can_continue: Vec<String>,

    /// True if the request was successful, but the server requires more authentication.
    pub partial_success: bool,
}

#[derive(Default)]
pub(super) struct AuthState {
    service: Service,
    attempt: Option<Box<dyn AuthMethod + Send>>,
    authenticated: bool,
}

/// Progress of the "ssh-userauth" service request (RFC 4253, section 10).
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
enum Service {
    #[default]
    NotRequested,
    Requested,
    Accepted,
}

pub(super) fn init_auth() -> AuthState {
    AuthState::default()
}

/// Starts an authentication attempt.
///
/// Once we are authenticated, every further attempt succeeds immediately.
pub(super) fn start_method(st: &mut ClientState, mut method: Box<dyn AuthMethod + Send>) -> Result<()> {
    if st.auth_st.authenticated {
        return method.recv_outcome(AuthOutcome::Success)
    }
    if st.auth_st.attempt.is_some() {
        return Err(Error::AuthPending)
    }
    st.auth_st.attempt = Some(method);
    client_state::wakeup_client(st);
    Ok(())
}

pub(super) fn pump_auth(st: &mut ClientState, _cx: &mut Context) -> Result<Pump> {
    if !negotiate::is_ready(st) {
        return Ok(Pump::Pending)
    }

    match st.auth_st.service {
        Service::NotRequested => {
            let mut payload = PacketEncode::new();
            payload.put_u8(msg::SERVICE_REQUEST);
            payload.put_str("ssh-userauth");
            st.codec.send_pipe.feed_packet(&payload.finish())?;
            log::debug!("sending SSH_MSG_SERVICE_REQUEST for 'ssh-userauth'");
            st.auth_st.service = Service::Requested;
            return Ok(Pump::Progress)
        },
        Service::Requested => return Ok(Pump::Pending),
        Service::Accepted => {},
    }

    let Some(attempt) = st.auth_st.attempt.as_mut() else { return Ok(Pump::Pending) };
    if let Some(request) = attempt.request() {
        st.codec.send_pipe.feed_packet(&request)?;
        log::debug!("sending SSH_MSG_USERAUTH_REQUEST");
        return Ok(Pump::Progress)
    }

    if !attempt.is_done() {
        return Ok(Pump::Pending)
    }
    st.auth_st.attempt = None;
    Ok(Pump::Progress)
}

pub(super) fn recv_service_accept(st: &mut ClientState) -> ResultRecvState {
    if st.auth_st.service != Service::Requested {
        return Err(Error::Protocol("received SSH_MSG_SERVICE_ACCEPT that we did not request"))
    }
    log::debug!("received SSH_MSG_SERVICE_ACCEPT for 'ssh-userauth'");
    st.auth_st.service = Service::Accepted;
    Ok(None)
}

pub(super) fn recv_auth_packet(
    st: &mut ClientState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    match msg_id {
        msg::USERAUTH_FAILURE => {
            let failure = AuthFailure {
                methods_can_continue: payload.get_name_list()?,
                partial_success: payload.get_bool()?,
            };
            log::debug!("received SSH_MSG_USERAUTH_FAILURE: {:?}", failure);
            let Some(attempt) = st.auth_st.attempt.as_mut() else {
                return Err(Error::Protocol("received unexpected SSH_MSG_USERAUTH_FAILURE"))
            };
            attempt.recv_outcome(AuthOutcome::Failure(failure))?;
            Ok(None)
        },
        msg::USERAUTH_SUCCESS => {
            if st.auth_st.authenticated {
                return Err(Error::Protocol("received SSH_MSG_USERAUTH_SUCCESS twice"))
            }
            log::debug!("received SSH_MSG_USERAUTH_SUCCESS");
            st.auth_st.authenticated = true;
            negotiate::enable_delayed_compression(st);
            if let Some(attempt) = st.auth_st.attempt.as_mut() {
                attempt.recv_outcome(AuthOutcome::Success)?;
            }
            Ok(None)
        },
        msg::USERAUTH_BANNER => {
            let banner = AuthBanner {
                message: payload.get_string()?,
                message_lang: payload.get_string()?,
            };
            log::debug!("received SSH_MSG_USERAUTH_BANNER");
            recv::send_event(ClientEvent::AuthBanner(banner))
        },
        _ => Err(Error::PacketNotImplemented(msg_id)),
    }
}

pub(super) fn recv_auth_method_packet(
    st: &mut ClientState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    let Some(attempt) = st.auth_st.attempt.as_mut() else {
        return Err(Error::PacketNotImplemented(msg_id))
    };
    attempt.recv_packet(msg_id, payload)?;
    Ok(None)
}

pub(super) fn is_authenticated(st: &ClientState) -> bool {
    st.auth_st.authenticated
}

/// Drops the pending attempt, so that its caller receives [`Error::AuthAborted`].
pub(super) fn teardown(st: &mut ClientState) {
    st.auth_st.attempt = None;
}
