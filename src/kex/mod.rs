//! Key exchange algorithms.
//!
//! The key exchange (kex) produces a shared secret and an exchange hash, from which we derive the
//! keys for [ciphers][crate::cipher] and [MACs][crate::mac] in both directions. The exchange hash
//! of the first exchange also becomes the session identifier.
//!
//! # Supported algorithms
//!
//! - "curve25519-sha256" / "curve25519-sha256@libssh.com" ([`CURVE25519_SHA256`] /
//! [`CURVE25519_SHA256_LIBSSH`])
//! - "ecdh-sha2-nistp256" ([`ECDH_SHA2_NISTP256`])
//! - "ecdh-sha2-nistp384" ([`ECDH_SHA2_NISTP384`])
//! - "ecdh-sha2-nistp521" ([`ECDH_SHA2_NISTP521`])
//! - "diffie-hellman-group-exchange-sha256" ([`DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256`])
//! - "diffie-hellman-group-exchange-sha1" ([`DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1`])
//! - "diffie-hellman-group16-sha512" ([`DIFFIE_HELLMAN_GROUP16_SHA512`])
//! - "diffie-hellman-group14-sha256" ([`DIFFIE_HELLMAN_GROUP14_SHA256`])
//! - "diffie-hellman-group14-sha1" ([`DIFFIE_HELLMAN_GROUP14_SHA1`])
//! - "diffie-hellman-group1-sha1" ([`DIFFIE_HELLMAN_GROUP1_SHA1`])
//!
//! Every exchange runs as a small state machine: we send our first message, wait for the group
//! (only with the group exchange), wait for the reply and then compute the shared secret and the
//! exchange hash. A message that does not fit the current state fails the whole handshake.
use bytes::Bytes;
use derivative::Derivative;
use std::task::Poll;
use crate::Result;
use crate::codec::PacketDecode;
use crate::util::CryptoRngCore;
pub use self::curve25519::{CURVE25519_SHA256, CURVE25519_SHA256_LIBSSH};
pub use self::dh::{
    DIFFIE_HELLMAN_GROUP1_SHA1, DIFFIE_HELLMAN_GROUP14_SHA1, DIFFIE_HELLMAN_GROUP14_SHA256,
    DIFFIE_HELLMAN_GROUP16_SHA512,
};
pub use self::dh_gex::{DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1, DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256};
pub use self::ecdh::{ECDH_SHA2_NISTP256, ECDH_SHA2_NISTP384, ECDH_SHA2_NISTP521};

mod curve25519;
mod dh;
mod dh_gex;
mod ecdh;

/// A key exchange method that can be negotiated.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct KexAlgo {
    /// Name used during negotiation.
    pub name: &'static str,
    #[derivative(Debug = "ignore")]
    pub(crate) make_kex: fn(rng: &mut dyn CryptoRngCore) -> Result<Box<dyn Kex + Send>>,
}

/// Transcript of the negotiation that is hashed into the exchange hash.
#[derive(Debug)]
pub(crate) struct KexInput<'a> {
    pub client_ident: &'a [u8],
    pub server_ident: &'a [u8],
    pub client_kex_init: &'a [u8],
    pub server_kex_init: &'a [u8],
}

pub(crate) struct KexOutput {
    /// Shared secret `K` as an unsigned big endian number (possibly with leading zeros).
    pub shared_secret_be: Vec<u8>,
    pub exchange_hash: Vec<u8>,
    pub server_pubkey: Bytes,
    pub server_exchange_hash_sign: Bytes,
}

pub(crate) trait Kex {
    /// Handles a message with id in the range 30 to 49.
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()>;
    /// Returns the next message that we should send, if any.
    fn send_packet(&mut self) -> Result<Option<Bytes>>;
    /// Returns the result of the exchange once the reply was received.
    fn poll(&mut self, input: KexInput) -> Poll<Result<KexOutput>>;
    /// The hash function used by the exchange (also used to derive keys).
    fn compute_hash(&self, data: &[u8]) -> Vec<u8>;
}

/// Hashes `data` with `D`, the hash function that an exchange uses for everything.
pub(crate) fn digest<D: sha2::Digest>(data: &[u8]) -> Vec<u8> {
    D::digest(data).to_vec()
}
