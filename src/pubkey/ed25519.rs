use bytes::Bytes;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use std::fmt;
use super::{PubkeyAlgo, Pubkey, SignatureVerified, decode_signature};

/// "ssh-ed25519" public key algorithm from RFC 8709.
///
/// This algorithm is compatible with [`Ed25519Pubkey`].
pub static SSH_ED25519: PubkeyAlgo = PubkeyAlgo {
    name: "ssh-ed25519",
    verify,
};

/// Ed25519 public key from RFC 8032.
///
/// You can convert it to and from [`ed25519_dalek::VerifyingKey`] using `from()`/`into()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ed25519Pubkey {
    pub(crate) verifying: ed25519_dalek::VerifyingKey,
}

fn verify(pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified> {
    let Pubkey::Ed25519(pubkey) = pubkey else { return Err(Error::PubkeyFormat) };

    let signature_data = decode_signature(signature, "ssh-ed25519")?;
    let signature_bytes: [u8; 64] = signature_data.as_ref().try_into()
        .map_err(|_| Error::Decode("ed25519 signature has invalid length"))?;
    let ed_signature = ed25519_dalek::Signature::from_bytes(&signature_bytes);

    match pubkey.verifying.verify_strict(message, &ed_signature) {
        Ok(_) => Ok(SignatureVerified::assertion()),
        Err(_) => Err(Error::Signature),
    }
}

pub(super) fn decode_pubkey(blob: &mut PacketDecode) -> Result<Ed25519Pubkey> {
    let key_bytes = blob.get_bytes()?;
    let key_bytes: [u8; 32] = key_bytes.as_ref().try_into()
        .map_err(|_| Error::Decode("ed25519 public key has invalid length"))?;
    let verifying = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes)
        .map_err(|_| Error::Decode("ed25519 public key is invalid"))?;
    Ok(Ed25519Pubkey { verifying })
}

pub(super) fn encode_pubkey_body(blob: &mut PacketEncode, pubkey: &Ed25519Pubkey) {
    blob.put_bytes(pubkey.verifying.as_bytes());
}

impl From<ed25519_dalek::VerifyingKey> for Ed25519Pubkey {
    fn from(verifying: ed25519_dalek::VerifyingKey) -> Self {
        Self { verifying }
    }
}

impl From<Ed25519Pubkey> for ed25519_dalek::VerifyingKey {
    fn from(pubkey: Ed25519Pubkey) -> Self {
        pubkey.verifying
    }
}

impl fmt::Display for Ed25519Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ed25519 {:x}", Bytes::copy_from_slice(self.verifying.as_bytes()))
    }
}
