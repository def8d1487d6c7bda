use bytes::Bytes;
use tokio::sync::oneshot;
use crate::codec::PacketDecode;
use crate::error::{Result, Error};
use super::super::auth::AuthFailure;
use super::{AuthMethod, AuthOutcome, encode_request};

/// Result of the "none" authentication method.
#[derive(Debug, Clone)]
#[must_use]
pub enum AuthNoneResult {
    /// The server let us in without any credentials.
    Success,
    /// The server requires authentication (this is the usual outcome).
    Failure(AuthFailure),
}

impl AuthNoneResult {
    /// Converts [`Failure`][Self::Failure] to [`Error::AuthFailed`].
    pub fn success_or_error(&self) -> Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::Failure(_) => Err(Error::AuthFailed),
        }
    }
}

/// The "none" method (RFC 4252, section 5.2).
pub struct AuthNone {
    request: Option<Bytes>,
    result_tx: Option<oneshot::Sender<AuthNoneResult>>,
}

impl AuthNone {
    pub fn new(username: String, result_tx: oneshot::Sender<AuthNoneResult>) -> AuthNone {
        let request = encode_request(&username, "none", |_| {});
        AuthNone { request: Some(request), result_tx: Some(result_tx) }
    }
}

impl AuthMethod for AuthNone {
    fn request(&mut self) -> Option<Bytes> {
        self.request.take()
    }

    fn recv_outcome(&mut self, outcome: AuthOutcome) -> Result<()> {
        let result = match outcome {
            AuthOutcome::Success => AuthNoneResult::Success,
            AuthOutcome::Failure(failure) => AuthNoneResult::Failure(failure),
        };
        if let Some(result_tx) = self.result_tx.take() {
            let _: Result<_, _> = result_tx.send(result);
        }
        Ok(())
    }

    fn recv_packet(&mut self, msg_id: u8, _payload: &mut PacketDecode) -> Result<()> {
        Err(Error::PacketNotImplemented(msg_id))
    }

    fn is_done(&self) -> bool {
        self.result_tx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::msg;

    #[test]
    fn test_none_request() {
        let (result_tx, _result_rx) = oneshot::channel();
        let mut method = AuthNone::new("alice".into(), result_tx);

        let mut request = PacketDecode::new(method.request().unwrap());
        assert_eq!(request.get_u8().unwrap(), msg::USERAUTH_REQUEST);
        assert_eq!(request.get_string().unwrap(), "alice");
        assert_eq!(request.get_string().unwrap(), "ssh-connection");
        assert_eq!(request.get_string().unwrap(), "none");
        assert_eq!(request.remaining_len(), 0);
        assert!(method.request().is_none());
    }

    #[test]
    fn test_none_failure() {
        let (result_tx, mut result_rx) = oneshot::channel();
        let mut method = AuthNone::new("alice".into(), result_tx);
        assert!(!method.is_done());

        let failure = AuthFailure {
            methods_can_continue: vec!["password".into(), "publickey".into()],
            partial_success: false,
        };
        method.recv_outcome(AuthOutcome::Failure(failure)).unwrap();
        assert!(method.is_done());
        match result_rx.try_recv().unwrap() {
            AuthNoneResult::Failure(failure) =>
                assert_eq!(failure.methods_can_continue, vec!["password", "publickey"]),
            AuthNoneResult::Success => panic!("expected failure"),
        }
    }
}
