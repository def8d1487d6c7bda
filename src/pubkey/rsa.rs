use bytes::Bytes;
use rsa::traits::PublicKeyParts as _;
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use super::{PubkeyAlgo, Pubkey, SignatureVerified, decode_signature};

/// "ssh-rsa" public key algorithm using SHA-1 from RFC 4253.
///
/// This algorithm is compatible with [`RsaPubkey`]. SHA-1 is broken, so this algorithm is only
/// enabled by [`ClientConfig::default_compatible_less_secure()`][crate::ClientConfig::default_compatible_less_secure()].
pub static SSH_RSA_SHA1: PubkeyAlgo = PubkeyAlgo {
    name: "ssh-rsa",
    verify: verify::<sha1::Sha1>,
};

/// "rsa-sha2-256" public key algorithm from RFC 8332.
///
/// This algorithm is compatible with [`RsaPubkey`].
pub static RSA_SHA2_256: PubkeyAlgo = PubkeyAlgo {
    name: "rsa-sha2-256",
    verify: verify::<sha2::Sha256>,
};

/// "rsa-sha2-512" public key algorithm from RFC 8332.
///
/// This algorithm is compatible with [`RsaPubkey`].
pub static RSA_SHA2_512: PubkeyAlgo = PubkeyAlgo {
    name: "rsa-sha2-512",
    verify: verify::<sha2::Sha512>,
};

const MODULUS_BITS_MIN: usize = 1024;
const MODULUS_BITS_MAX: usize = 16384;

/// RSA public key.
///
/// You can convert it to and from [`rsa::RsaPublicKey`] using `from()`/`into()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPubkey {
    pub(crate) pubkey: rsa::RsaPublicKey,
}

fn verify<H: HashAlgo>(pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified> {
    let Pubkey::Rsa(pubkey) = pubkey else { return Err(Error::PubkeyFormat) };

    let signature_data = decode_signature(signature, H::ALGO_NAME)?;

    // some implementations strip leading zero bytes from the signature
    let modulus_len = pubkey.pubkey.size();
    if signature_data.len() > modulus_len {
        return Err(Error::Signature)
    }
    let mut padded_signature = vec![0; modulus_len];
    padded_signature[modulus_len - signature_data.len()..].copy_from_slice(&signature_data);

    use sha2::Digest as _;
    let hashed = H::digest(message);
    let scheme = rsa::Pkcs1v15Sign::new::<H>();
    match pubkey.pubkey.verify(scheme, &hashed, &padded_signature) {
        Ok(_) => Ok(SignatureVerified::assertion()),
        Err(_) => Err(Error::Signature),
    }
}

trait HashAlgo: sha2::Digest + sha2::digest::const_oid::AssociatedOid {
    const ALGO_NAME: &'static str;
}

impl HashAlgo for sha1::Sha1 {
    const ALGO_NAME: &'static str = "ssh-rsa";
}

impl HashAlgo for sha2::Sha256 {
    const ALGO_NAME: &'static str = "rsa-sha2-256";
}

impl HashAlgo for sha2::Sha512 {
    const ALGO_NAME: &'static str = "rsa-sha2-512";
}

pub(super) fn decode_pubkey(blob: &mut PacketDecode) -> Result<RsaPubkey> {
    let e = blob.get_biguint()?;
    let n = blob.get_biguint()?;
    if n.bits() < MODULUS_BITS_MIN {
        return Err(Error::Decode("ssh-rsa modulus is too small"))
    }

    let pubkey = rsa::RsaPublicKey::new_with_max_size(n, e, MODULUS_BITS_MAX)
        .map_err(|_| Error::Decode("decoded ssh-rsa pubkey is invalid"))?;
    Ok(RsaPubkey { pubkey })
}

pub(super) fn encode_pubkey_body(blob: &mut PacketEncode, pubkey: &RsaPubkey) {
    blob.put_biguint(pubkey.pubkey.e());
    blob.put_biguint(pubkey.pubkey.n());
}

impl From<rsa::RsaPublicKey> for RsaPubkey {
    fn from(pubkey: rsa::RsaPublicKey) -> Self {
        Self { pubkey }
    }
}

impl From<RsaPubkey> for rsa::RsaPublicKey {
    fn from(pubkey: RsaPubkey) -> Self {
        pubkey.pubkey
    }
}

impl fmt::Display for RsaPubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "rsa n {:x}, e {}", self.pubkey.n(), self.pubkey.e())
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use sha2::Digest as _;
    use super::*;

    fn sign<H: HashAlgo>(privkey: &rsa::RsaPrivateKey, message: &[u8]) -> Bytes {
        let hashed = H::digest(message);
        let signature_data = privkey.sign(rsa::Pkcs1v15Sign::new::<H>(), &hashed).unwrap();
        let mut signature = PacketEncode::new();
        signature.put_str(H::ALGO_NAME);
        signature.put_bytes(&signature_data);
        signature.finish()
    }

    #[test]
    fn test_verify_all_hashes() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(40);
        let privkey = rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap();
        let pubkey = Pubkey::Rsa(privkey.to_public_key().into());
        let pubkey = Pubkey::decode(pubkey.encode()).unwrap();

        let signature = sign::<sha2::Sha256>(&privkey, b"hash");
        assert!((RSA_SHA2_256.verify)(&pubkey, b"hash", signature.clone()).is_ok());
        assert!(matches!((RSA_SHA2_256.verify)(&pubkey, b"hush", signature.clone()), Err(Error::Signature)));
        // the signature names rsa-sha2-256, so rsa-sha2-512 must refuse it
        assert!((RSA_SHA2_512.verify)(&pubkey, b"hash", signature).is_err());

        let signature = sign::<sha2::Sha512>(&privkey, b"hash");
        assert!((RSA_SHA2_512.verify)(&pubkey, b"hash", signature).is_ok());
        let signature = sign::<sha1::Sha1>(&privkey, b"hash");
        assert!((SSH_RSA_SHA1.verify)(&pubkey, b"hash", signature).is_ok());
    }

    #[test]
    fn test_small_modulus() {
        let mut blob = PacketEncode::new();
        blob.put_str("ssh-rsa");
        blob.put_mpint_uint_be(&[1, 0, 1]);
        blob.put_mpint_uint_be(&[0xc5; 64]);
        assert!(matches!(Pubkey::decode(blob.finish()), Err(Error::Decode(_))));
    }
}
