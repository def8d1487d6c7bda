use bytes::Bytes;
use tokio::sync::oneshot;
use crate::codec::PacketDecode;
use crate::codes::msg;
use crate::error::{Result, Error};
use super::super::auth::AuthFailure;
use super::{AuthMethod, AuthOutcome, encode_request};

/// Result of the "password" authentication method.
#[derive(Debug, Clone)]
#[must_use]
pub enum AuthPasswordResult {
    /// The password was accepted.
    Success,
    /// The server asks the user to change the password (RFC 4252, section 8).
    ///
    /// Changing the password is not supported, so the attempt ends here.
    ChangePassword(AuthPasswordPrompt),
    /// The password was rejected.
    Failure(AuthFailure),
}

/// Prompt for a password change (`SSH_MSG_USERAUTH_PASSWD_CHANGEREQ`).
#[derive(Debug, Clone)]
pub struct AuthPasswordPrompt {
    /// Text that should be shown to the user.
    pub prompt: String,
    /// Language tag of the prompt (per RFC 3066).
    pub prompt_lang: String,
}

impl AuthPasswordResult {
    /// Converts everything except [`Success`][Self::Success] to [`Error::AuthFailed`].
    pub fn success_or_error(&self) -> Result<()> {
        match self {
            Self::Success => Ok(()),
            Self::ChangePassword(_) | Self::Failure(_) => Err(Error::AuthFailed),
        }
    }
}

/// The "password" method (RFC 4252, section 8).
pub struct AuthPassword {
    request: Option<Bytes>,
    result_tx: Option<oneshot::Sender<AuthPasswordResult>>,
}

impl AuthPassword {
    pub fn new(
        username: String,
        password: String,
        result_tx: oneshot::Sender<AuthPasswordResult>,
    ) -> AuthPassword {
        let request = encode_request(&username, "password", |payload| {
            payload.put_bool(false);
            payload.put_str(&password);
        });
        AuthPassword { request: Some(request), result_tx: Some(result_tx) }
    }

    fn resolve(&mut self, result: AuthPasswordResult) {
        if let Some(result_tx) = self.result_tx.take() {
            let _: Result<_, _> = result_tx.send(result);
        }
    }
}

impl AuthMethod for AuthPassword {
    fn request(&mut self) -> Option<Bytes> {
        self.request.take()
    }

    fn recv_outcome(&mut self, outcome: AuthOutcome) -> Result<()> {
        self.resolve(match outcome {
            AuthOutcome::Success => AuthPasswordResult::Success,
            AuthOutcome::Failure(failure) => AuthPasswordResult::Failure(failure),
        });
        Ok(())
    }

    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        if msg_id != msg::USERAUTH_PASSWD_CHANGEREQ {
            return Err(Error::PacketNotImplemented(msg_id))
        }

        let prompt = AuthPasswordPrompt {
            prompt: payload.get_string()?,
            prompt_lang: payload.get_string()?,
        };
        log::debug!("received SSH_MSG_USERAUTH_PASSWD_CHANGEREQ");
        self.resolve(AuthPasswordResult::ChangePassword(prompt));
        Ok(())
    }

    fn is_done(&self) -> bool {
        self.result_tx.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PacketEncode;

    #[test]
    fn test_password_request() {
        let (result_tx, _result_rx) = oneshot::channel();
        let mut method = AuthPassword::new("alice".into(), "hunter2".into(), result_tx);

        let mut request = PacketDecode::new(method.request().unwrap());
        assert_eq!(request.get_u8().unwrap(), msg::USERAUTH_REQUEST);
        assert_eq!(request.get_string().unwrap(), "alice");
        assert_eq!(request.get_string().unwrap(), "ssh-connection");
        assert_eq!(request.get_string().unwrap(), "password");
        assert!(!request.get_bool().unwrap());
        assert_eq!(request.get_string().unwrap(), "hunter2");
        assert!(method.request().is_none());
    }

    #[test]
    fn test_password_change_request() {
        let (result_tx, mut result_rx) = oneshot::channel();
        let mut method = AuthPassword::new("alice".into(), "hunter2".into(), result_tx);

        let mut payload = PacketEncode::new();
        payload.put_str("password expired");
        payload.put_str("en");
        let mut payload = PacketDecode::new(payload.finish());
        method.recv_packet(msg::USERAUTH_PASSWD_CHANGEREQ, &mut payload).unwrap();
        assert!(method.is_done());

        match result_rx.try_recv().unwrap() {
            AuthPasswordResult::ChangePassword(prompt) => assert_eq!(prompt.prompt, "password expired"),
            res => panic!("unexpected result {:?}", res),
        }
    }

    #[test]
    fn test_password_unknown_packet() {
        let (result_tx, _result_rx) = oneshot::channel();
        let mut method = AuthPassword::new("alice".into(), "hunter2".into(), result_tx);
        let mut payload = PacketDecode::new(Bytes::new());
        assert!(matches!(method.recv_packet(61, &mut payload), Err(Error::PacketNotImplemented(61))));
    }
}
