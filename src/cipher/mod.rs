//! Symmetric ciphers.
//!
//! A cipher protects the **confidentiality** of the connection. A separate algorithm is
//! negotiated for each direction; we pick the first algorithm in our list that the server also
//! offers.
//!
//! # Supported algorithms
//!
//! - "aes128-ctr" ([`AES128_CTR`])
//! - "aes192-ctr" ([`AES192_CTR`])
//! - "aes256-ctr" ([`AES256_CTR`])
//! - "aes128-cbc" ([`AES128_CBC`])
//! - "aes192-cbc" ([`AES192_CBC`])
//! - "aes256-cbc" ([`AES256_CBC`])
//! - "none" ([`NONE`]), which we never negotiate before the user is authenticated
use derivative::Derivative;
use crate::Result;
pub use self::aes::{AES128_CTR, AES192_CTR, AES256_CTR};
pub use self::block::{AES128_CBC, AES192_CBC, AES256_CBC};

mod aes;
mod block;

/// A cipher that can be negotiated.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CipherAlgo {
    /// Name used during negotiation.
    pub name: &'static str,
    pub(crate) block_len: usize,
    pub(crate) key_len: usize,
    pub(crate) iv_len: usize,
    #[derivative(Debug = "ignore")]
    pub(crate) make_encrypt: fn(key: &[u8], iv: &[u8]) -> Result<Box<dyn Encrypt + Send>>,
    #[derivative(Debug = "ignore")]
    pub(crate) make_decrypt: fn(key: &[u8], iv: &[u8]) -> Result<Box<dyn Decrypt + Send>>,
}

impl CipherAlgo {
    /// True for [`NONE`], which leaves the packets readable.
    pub fn is_none(&self) -> bool {
        self.key_len == 0
    }
}

/// "none": packets are sent in plaintext.
pub static NONE: CipherAlgo = CipherAlgo {
    name: "none",
    block_len: 8,
    key_len: 0,
    iv_len: 0,
    make_encrypt: |_, _| Ok(Box::new(NoCipher)),
    make_decrypt: |_, _| Ok(Box::new(NoCipher)),
};

/// Encrypts whole packets in place; the length is a multiple of the block length.
pub(crate) trait Encrypt {
    fn encrypt(&mut self, data: &mut [u8]);
}

/// Decrypts in place. A packet may arrive in several calls, split at block boundaries.
pub(crate) trait Decrypt {
    fn decrypt(&mut self, data: &mut [u8]);
}

/// The cipher in effect before the first key exchange.
#[derive(Debug)]
pub(crate) struct NoCipher;

impl Encrypt for NoCipher {
    fn encrypt(&mut self, _: &mut [u8]) {}
}

impl Decrypt for NoCipher {
    fn decrypt(&mut self, _: &mut [u8]) {}
}
