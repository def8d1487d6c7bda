//! Host key algorithms.
//!
//! The server proves its identity by signing the exchange hash with its host key. A key type can
//! have several signature algorithms ("ssh-rsa" keys sign with "rsa-sha2-256", "rsa-sha2-512" or
//! the legacy SHA-1 "ssh-rsa"), and the algorithm is negotiated with the key exchange.
//!
//! # Signature algorithms
//!
//! - "ssh-ed25519" ([`SSH_ED25519`], uses [`Ed25519Pubkey`])
//! - "ecdsa-sha2-nistp256" ([`ECDSA_SHA2_NISTP256`], uses [`EcdsaPubkey<p256::NistP256>`])
//! - "ecdsa-sha2-nistp384" ([`ECDSA_SHA2_NISTP384`], uses [`EcdsaPubkey<p384::NistP384>`])
//! - "ecdsa-sha2-nistp521" ([`ECDSA_SHA2_NISTP521`], uses [`EcdsaPubkey<p521::NistP521>`])
//! - "rsa-sha2-256" ([`RSA_SHA2_256`], uses [`RsaPubkey`])
//! - "rsa-sha2-512" ([`RSA_SHA2_512`], uses [`RsaPubkey`])
//! - "ssh-rsa" ([`SSH_RSA_SHA1`], uses [`RsaPubkey`])
//! - "ssh-dss" ([`SSH_DSS`], uses [`DsaPubkey`])
use base64::Engine as _;
use bytes::Bytes;
use derivative::Derivative;
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
pub use self::dsa::{SSH_DSS, DsaPubkey};
pub use self::ecdsa::{ECDSA_SHA2_NISTP256, ECDSA_SHA2_NISTP384, ECDSA_SHA2_NISTP521, EcdsaPubkey};
pub use self::ed25519::{SSH_ED25519, Ed25519Pubkey};
pub use self::rsa::{SSH_RSA_SHA1, RSA_SHA2_256, RSA_SHA2_512, RsaPubkey};

mod dsa;
mod ecdsa;
mod ed25519;
mod rsa;

/// A signature algorithm that can be negotiated for the host key.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PubkeyAlgo {
    /// Name used during negotiation.
    pub name: &'static str,
    #[derivative(Debug = "ignore")]
    pub(crate) verify: fn(pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified>,
}

/// Public key of a supported key type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Pubkey {
    /// "ssh-ed25519"
    Ed25519(Ed25519Pubkey),
    /// "ssh-rsa"
    Rsa(RsaPubkey),
    /// "ssh-dss"
    Dsa(DsaPubkey),
    /// "ecdsa-sha2-nistp256"
    EcdsaP256(EcdsaPubkey<p256::NistP256>),
    /// "ecdsa-sha2-nistp384"
    EcdsaP384(EcdsaPubkey<p384::NistP384>),
    /// "ecdsa-sha2-nistp521"
    EcdsaP521(EcdsaPubkey<p521::NistP521>),
}

impl Pubkey {
    /// Parses a key blob: the key type followed by type-specific fields (RFC 4253, section 6.6).
    ///
    /// Trailing bytes make the blob invalid.
    pub fn decode(blob: Bytes) -> Result<Self> {
        let mut blob = PacketDecode::new(blob);
        let key_type = blob.get_string()?;
        let pubkey = match key_type.as_str() {
            "ssh-ed25519" => ed25519::decode_pubkey(&mut blob).map(Pubkey::Ed25519),
            "ssh-rsa" => rsa::decode_pubkey(&mut blob).map(Pubkey::Rsa),
            "ssh-dss" => dsa::decode_pubkey(&mut blob).map(Pubkey::Dsa),
            "ecdsa-sha2-nistp256" => ecdsa::decode_pubkey(&mut blob).map(Pubkey::EcdsaP256),
            "ecdsa-sha2-nistp384" => ecdsa::decode_pubkey(&mut blob).map(Pubkey::EcdsaP384),
            "ecdsa-sha2-nistp521" => ecdsa::decode_pubkey(&mut blob).map(Pubkey::EcdsaP521),
            _ => {
                log::debug!("public key of unknown type {:?}", key_type);
                Err(Error::Decode("unknown public key type"))
            },
        }?;

        if blob.remaining_len() != 0 {
            return Err(Error::Decode("public key blob has trailing data"))
        }
        Ok(pubkey)
    }

    /// The blob that [`Pubkey::decode()`] accepts.
    pub fn encode(&self) -> Bytes {
        let mut blob = PacketEncode::new();
        blob.put_str(self.key_type());
        match self {
            Pubkey::Ed25519(pubkey) => ed25519::encode_pubkey_body(&mut blob, pubkey),
            Pubkey::Rsa(pubkey) => rsa::encode_pubkey_body(&mut blob, pubkey),
            Pubkey::Dsa(pubkey) => dsa::encode_pubkey_body(&mut blob, pubkey),
            Pubkey::EcdsaP256(pubkey) => ecdsa::encode_pubkey_body(&mut blob, pubkey),
            Pubkey::EcdsaP384(pubkey) => ecdsa::encode_pubkey_body(&mut blob, pubkey),
            Pubkey::EcdsaP521(pubkey) => ecdsa::encode_pubkey_body(&mut blob, pubkey),
        }
        blob.finish()
    }

    /// The key type as it appears at the start of the encoded key (e.g. `"ssh-rsa"`).
    pub fn key_type(&self) -> &'static str {
        match self {
            Pubkey::Ed25519(_) => "ssh-ed25519",
            Pubkey::Rsa(_) => "ssh-rsa",
            Pubkey::Dsa(_) => "ssh-dss",
            Pubkey::EcdsaP256(_) => "ecdsa-sha2-nistp256",
            Pubkey::EcdsaP384(_) => "ecdsa-sha2-nistp384",
            Pubkey::EcdsaP521(_) => "ecdsa-sha2-nistp521",
        }
    }

    /// OpenSSH style fingerprint, such as `"SHA256:eaBPG/rqx+IPa0Lc9KHypkG3UxjmUwerwq9CZ/xpPWM"`.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.encode())
    }
}

/// Unpadded base64 of the SHA-256 digest of `blob`, prefixed with `SHA256:`.
pub fn fingerprint(blob: &[u8]) -> String {
    use sha2::Digest as _;
    let digest = sha2::Sha256::digest(blob);
    format!("SHA256:{}", base64::engine::general_purpose::STANDARD_NO_PAD.encode(digest))
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner: &dyn fmt::Display = match self {
            Pubkey::Ed25519(pubkey) => pubkey,
            Pubkey::Rsa(pubkey) => pubkey,
            Pubkey::Dsa(pubkey) => pubkey,
            Pubkey::EcdsaP256(pubkey) => pubkey,
            Pubkey::EcdsaP384(pubkey) => pubkey,
            Pubkey::EcdsaP521(pubkey) => pubkey,
        };
        fmt::Display::fmt(inner, f)
    }
}

/// Proof that a signature was checked.
#[derive(Debug)]
pub(crate) struct SignatureVerified(());

impl SignatureVerified {
    fn assertion() -> Self {
        SignatureVerified(())
    }
}

/// Decodes the outer `string format, string blob` signature encoding and checks the format.
fn decode_signature(signature: Bytes, algo_name: &str) -> Result<Bytes> {
    let mut signature = PacketDecode::new(signature);
    if signature.get_string()? != algo_name {
        return Err(Error::Decode("unexpected signature format"))
    }
    signature.get_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint() {
        // sha256 of the empty string
        assert_eq!(fingerprint(b""), "SHA256:47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU");
    }

    #[test]
    fn test_decode_unknown() {
        let mut blob = PacketEncode::new();
        blob.put_str("ssh-unknown");
        blob.put_bytes(b"whatever");
        assert!(matches!(Pubkey::decode(blob.finish()), Err(Error::Decode(_))));
    }

    #[test]
    fn test_decode_truncated() {
        let mut blob = PacketEncode::new();
        blob.put_str("ssh-ed25519");
        blob.put_u32(32);
        blob.put_raw(&[1; 16]);
        assert!(Pubkey::decode(blob.finish()).is_err());
    }
}
