use bytes::Bytes;
use dsa::signature::{self, DigestVerifier as _};
use num_bigint_dig::BigUint;
use std::fmt;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use super::{PubkeyAlgo, Pubkey, SignatureVerified, decode_signature};

/// "ssh-dss" public key algorithm from RFC 4253.
///
/// This algorithm is compatible with [`DsaPubkey`]. It is obsolete and only enabled by
/// [`ClientConfig::default_compatible_less_secure()`][crate::ClientConfig::default_compatible_less_secure()].
pub static SSH_DSS: PubkeyAlgo = PubkeyAlgo {
    name: "ssh-dss",
    verify,
};

const Q_BITS: usize = 160;
const P_BITS_MIN: usize = 1024;
const P_BITS_MAX: usize = 3072;

/// DSA public key (FIPS 186-2 parameters, with SHA-1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsaPubkey {
    p: BigUint,
    q: BigUint,
    g: BigUint,
    y: BigUint,
}

fn verify(pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified> {
    let Pubkey::Dsa(pubkey) = pubkey else { return Err(Error::PubkeyFormat) };
    let verifying_key = verifying_key(pubkey).map_err(|_| Error::PubkeyFormat)?;

    // RFC 4253, section 6.6: r and s as two 160-bit integers without lengths or padding
    let signature_data = decode_signature(signature, "ssh-dss")?;
    if signature_data.len() != 40 {
        return Err(Error::Signature)
    }
    let r = BigUint::from_bytes_be(&signature_data[..20]);
    let s = BigUint::from_bytes_be(&signature_data[20..]);
    let signature = dsa::Signature::from_components(r, s).map_err(|_| Error::Signature)?;

    use sha1::Digest as _;
    match verifying_key.verify_digest(sha1::Sha1::new_with_prefix(message), &signature) {
        Ok(_) => Ok(SignatureVerified::assertion()),
        Err(_) => Err(Error::Signature),
    }
}

fn verifying_key(pubkey: &DsaPubkey) -> signature::Result<dsa::VerifyingKey> {
    let components = dsa::Components::from_components(
        pubkey.p.clone(), pubkey.q.clone(), pubkey.g.clone())?;
    dsa::VerifyingKey::from_components(components, pubkey.y.clone())
}

pub(super) fn decode_pubkey(blob: &mut PacketDecode) -> Result<DsaPubkey> {
    let p = blob.get_biguint()?;
    let q = blob.get_biguint()?;
    let g = blob.get_biguint()?;
    let y = blob.get_biguint()?;

    if p.bits() < P_BITS_MIN || p.bits() > P_BITS_MAX {
        return Err(Error::Decode("ssh-dss modulus has unsupported size"))
    }
    if q.bits() != Q_BITS {
        return Err(Error::Decode("ssh-dss subgroup order has unsupported size"))
    }
    let one = BigUint::from(1u32);
    if g <= one || g >= p || y <= one || y >= p {
        return Err(Error::Decode("decoded ssh-dss pubkey is invalid"))
    }

    let pubkey = DsaPubkey { p, q, g, y };
    verifying_key(&pubkey).map_err(|_| Error::Decode("decoded ssh-dss pubkey is invalid"))?;
    Ok(pubkey)
}

pub(super) fn encode_pubkey_body(blob: &mut PacketEncode, pubkey: &DsaPubkey) {
    blob.put_biguint(&pubkey.p);
    blob.put_biguint(&pubkey.q);
    blob.put_biguint(&pubkey.g);
    blob.put_biguint(&pubkey.y);
}

impl fmt::Display for DsaPubkey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "dsa p {:x}, y {:x}", self.p, self.y)
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use sha1::Digest as _;
    use super::*;

    struct Signer {
        pubkey: DsaPubkey,
        x: BigUint,
    }

    fn signer() -> Signer {
        // example key from FIPS 186-2, appendix 5 (512-bit p, so it bypasses `decode_pubkey()`)
        let p = BigUint::from_bytes_be(&hex!("
            8df2a494492276aa3d25759bb06869cbeac0d83afb8d0cf7cbb8324f0d7882e5d0762fc5b7210eafc2e9adac32ab7aac49693dfbf83724c2ec0736ee31c80291
        "));
        let q = BigUint::from_bytes_be(&hex!("c773218c737ec8ee993b4f2ded30f48edace915f"));
        let g = BigUint::from_bytes_be(&hex!("
            626d027839ea0a13413163a55b4cb500299d5522956cefcb3bff10f399ce2c2e71cb9de5fa24babf58e5b79521925c9cc42e9f6f464b088cc572af53e6d78802
        "));
        let x = BigUint::from_bytes_be(&hex!("2070b3223dba372fde1c0ffc7b2e3b498b260614"));
        let y = g.modpow(&x, &p);
        Signer { pubkey: DsaPubkey { p, q, g, y }, x }
    }

    fn sign(signer: &Signer, message: &[u8], k: &BigUint) -> Bytes {
        let DsaPubkey { p, q, g, .. } = &signer.pubkey;
        let h = BigUint::from_bytes_be(&sha1::Sha1::digest(message));
        let r = g.modpow(k, p) % q;
        let k_inv = k.modpow(&(q - BigUint::from(2u32)), q);
        let s = (k_inv * (h + &signer.x * &r)) % q;

        let mut signature_data = [0u8; 40];
        let r = r.to_bytes_be();
        let s = s.to_bytes_be();
        signature_data[20 - r.len()..20].copy_from_slice(&r);
        signature_data[40 - s.len()..].copy_from_slice(&s);

        let mut signature = PacketEncode::new();
        signature.put_str("ssh-dss");
        signature.put_bytes(&signature_data);
        signature.finish()
    }

    #[test]
    fn test_verify() {
        let signer = signer();
        let pubkey = Pubkey::Dsa(signer.pubkey.clone());
        let k = BigUint::from_bytes_be(&hex!("358dad571462710f50e254cf1a376b2bdeaadfbf"));

        let signature = sign(&signer, b"abc", &k);
        assert!((SSH_DSS.verify)(&pubkey, b"abc", signature.clone()).is_ok());
        assert!(matches!((SSH_DSS.verify)(&pubkey, b"abd", signature), Err(Error::Signature)));
    }

    #[test]
    fn test_reject_zero_signature() {
        let pubkey = Pubkey::Dsa(signer().pubkey);
        let mut signature = PacketEncode::new();
        signature.put_str("ssh-dss");
        signature.put_bytes(&[0; 40]);
        assert!(matches!((SSH_DSS.verify)(&pubkey, b"abc", signature.finish()), Err(Error::Signature)));
    }
}
