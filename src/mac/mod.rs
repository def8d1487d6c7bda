//! Message authentication codes.
//!
//! A MAC protects the **integrity** of the connection: each packet carries a tag computed from
//! the packet sequence number and the plaintext (RFC 4253, section 6.4). A separate algorithm is
//! negotiated for each direction; we pick the first algorithm in our list that the server also
//! offers.
//!
//! # Supported algorithms
//!
//! - "hmac-sha2-256" ([`HMAC_SHA2_256`])
//! - "hmac-sha2-512" ([`HMAC_SHA2_512`])
//! - "hmac-sha1" ([`HMAC_SHA1`])
//! - "hmac-sha1-96" ([`HMAC_SHA1_96`])
//! - "none" ([`NONE`])
use derivative::Derivative;
use crate::Result;
pub use self::hmac::{HMAC_SHA2_256, HMAC_SHA2_512, HMAC_SHA1, HMAC_SHA1_96};

mod hmac;

/// A MAC algorithm that can be negotiated.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct MacAlgo {
    /// Name used during negotiation.
    pub name: &'static str,
    pub(crate) tag_len: usize,
    pub(crate) key_len: usize,
    #[derivative(Debug = "ignore")]
    pub(crate) make_mac: fn(key: &[u8]) -> Result<Box<dyn Mac + Send>>,
}

/// "none": packets carry no tag.
pub static NONE: MacAlgo = MacAlgo {
    name: "none",
    tag_len: 0,
    key_len: 0,
    make_mac: |_| Ok(Box::new(NoMac)),
};

pub(crate) trait Mac {
    /// Writes the tag of `packet_seq || data` into `tag`.
    fn sign(&mut self, packet_seq: u32, data: &[u8], tag: &mut [u8]);
    /// Checks `tag` in constant time.
    fn verify(&mut self, packet_seq: u32, data: &[u8], tag: &[u8]) -> Result<MacVerified>;
}

/// Proof that a packet passed [`Mac::verify()`].
#[derive(Debug)]
pub(crate) struct MacVerified(());

impl MacVerified {
    pub fn assertion() -> Self {
        MacVerified(())
    }
}

/// The MAC in effect before the first key exchange.
#[derive(Debug)]
pub(crate) struct NoMac;

impl Mac for NoMac {
    fn sign(&mut self, _: u32, _: &[u8], tag: &mut [u8]) {
        debug_assert!(tag.is_empty());
    }

    fn verify(&mut self, _: u32, _: &[u8], tag: &[u8]) -> Result<MacVerified> {
        debug_assert!(tag.is_empty());
        Ok(MacVerified::assertion())
    }
}
