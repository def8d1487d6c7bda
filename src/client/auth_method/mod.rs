use bytes::Bytes;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::Result;
use super::auth::AuthFailure;

pub mod none;
pub mod password;

/// Outcome of an authentication request, as reported by the server.
#[derive(Debug)]
pub enum AuthOutcome {
    Success,
    Failure(AuthFailure),
}

/// One pending authentication attempt.
pub trait AuthMethod {
    /// Returns the `SSH_MSG_USERAUTH_REQUEST` payload, once.
    fn request(&mut self) -> Option<Bytes>;
    fn recv_outcome(&mut self, outcome: AuthOutcome) -> Result<()>;
    /// Handles a method-specific message (ids 60 to 79).
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()>;
    /// The attempt is removed from the state once it is done.
    fn is_done(&self) -> bool;
}

/// Encodes `SSH_MSG_USERAUTH_REQUEST` for the "ssh-connection" service (RFC 4252, section 5).
fn encode_request(username: &str, method_name: &str, put_fields: impl FnOnce(&mut PacketEncode)) -> Bytes {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::USERAUTH_REQUEST);
    payload.put_str(username);
    payload.put_str("ssh-connection");
    payload.put_str(method_name);
    put_fields(&mut payload);
    payload.finish()
}
