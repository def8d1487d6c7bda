use bytes::Bytes;
use ecdsa::signature::Verifier as _;
use std::fmt;
use std::marker::PhantomData;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use super::{PubkeyAlgo, Pubkey, SignatureVerified, decode_signature};

/// "ecdsa-sha2-nistp256" public key algorithm from RFC 5656.
///
/// This algorithm is compatible with [`EcdsaPubkey<p256::NistP256>`].
pub static ECDSA_SHA2_NISTP256: PubkeyAlgo = PubkeyAlgo {
    name: "ecdsa-sha2-nistp256",
    verify: verify::<p256::NistP256>,
};

/// "ecdsa-sha2-nistp384" public key algorithm from RFC 5656.
///
/// This algorithm is compatible with [`EcdsaPubkey<p384::NistP384>`].
pub static ECDSA_SHA2_NISTP384: PubkeyAlgo = PubkeyAlgo {
    name: "ecdsa-sha2-nistp384",
    verify: verify::<p384::NistP384>,
};

/// "ecdsa-sha2-nistp521" public key algorithm from RFC 5656.
///
/// This algorithm is compatible with [`EcdsaPubkey<p521::NistP521>`].
pub static ECDSA_SHA2_NISTP521: PubkeyAlgo = PubkeyAlgo {
    name: "ecdsa-sha2-nistp521",
    verify: verify::<p521::NistP521>,
};

/// ECDSA public key using curve `C`.
///
/// - `EcdsaPubkey<p256::NistP256>` is compatible with [`ECDSA_SHA2_NISTP256`].
/// - `EcdsaPubkey<p384::NistP384>` is compatible with [`ECDSA_SHA2_NISTP384`].
/// - `EcdsaPubkey<p521::NistP521>` is compatible with [`ECDSA_SHA2_NISTP521`].
///
/// The key stores the uncompressed SEC1 encoding of the point, which was checked to lie on the
/// curve when the key was decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcdsaPubkey<C> {
    point: Bytes,
    _curve: PhantomData<C>,
}

fn verify<C: Curve>(pubkey: &Pubkey, message: &[u8], signature: Bytes) -> Result<SignatureVerified> {
    let pubkey = C::extract(pubkey)?;

    let mut signature_blob = PacketDecode::new(decode_signature(signature, C::ALGO_NAME)?);
    let r = signature_blob.get_scalar(C::FIELD_LEN).map_err(|_| Error::Signature)?;
    let s = signature_blob.get_scalar(C::FIELD_LEN).map_err(|_| Error::Signature)?;

    C::verify(&pubkey.point, message, &r, &s)?;
    Ok(SignatureVerified::assertion())
}

pub(super) fn decode_pubkey<C: Curve>(blob: &mut PacketDecode) -> Result<EcdsaPubkey<C>> {
    if blob.get_string()? != C::FORMAT_NAME {
        return Err(Error::Decode("bad decoded format of ecdsa public key"))
    }

    let point = blob.get_bytes()?;
    let point = C::normalize_point(&point)?;
    Ok(EcdsaPubkey { point, _curve: PhantomData })
}

pub(super) fn encode_pubkey_body<C: Curve>(blob: &mut PacketEncode, pubkey: &EcdsaPubkey<C>) {
    blob.put_str(C::FORMAT_NAME);
    blob.put_bytes(&pubkey.point);
}

impl<C: Curve> fmt::Display for EcdsaPubkey<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ecdsa-{} {:x}", C::FORMAT_NAME, self.point)
    }
}

pub(super) trait Curve: Sized {
    const ALGO_NAME: &'static str;
    const FORMAT_NAME: &'static str;
    const FIELD_LEN: usize;

    /// Checks that the point lies on the curve and returns its uncompressed encoding.
    fn normalize_point(point: &[u8]) -> Result<Bytes>;
    fn verify(point: &[u8], message: &[u8], r: &[u8], s: &[u8]) -> Result<()>;
    fn extract(pubkey: &Pubkey) -> Result<&EcdsaPubkey<Self>>;
}

macro_rules! impl_curve {
    ($curve:ident, $curve_ty:ident, $variant:ident, $algo_name:literal, $format_name:literal, $field_len:literal) => {
        impl Curve for $curve::$curve_ty {
            const ALGO_NAME: &'static str = $algo_name;
            const FORMAT_NAME: &'static str = $format_name;
            const FIELD_LEN: usize = $field_len;

            fn normalize_point(point: &[u8]) -> Result<Bytes> {
                let verifying = $curve::ecdsa::VerifyingKey::from_sec1_bytes(point)
                    .map_err(|_| Error::Decode("ecdsa public key is invalid"))?;
                let encoded = verifying.to_encoded_point(false);
                Ok(Bytes::copy_from_slice(encoded.as_bytes()))
            }

            fn verify(point: &[u8], message: &[u8], r: &[u8], s: &[u8]) -> Result<()> {
                let verifying = $curve::ecdsa::VerifyingKey::from_sec1_bytes(point)
                    .map_err(|_| Error::Signature)?;
                let r = $curve::FieldBytes::clone_from_slice(r);
                let s = $curve::FieldBytes::clone_from_slice(s);
                let signature = $curve::ecdsa::Signature::from_scalars(r, s)
                    .map_err(|_| Error::Signature)?;
                verifying.verify(message, &signature).map_err(|_| Error::Signature)
            }

            fn extract(pubkey: &Pubkey) -> Result<&EcdsaPubkey<Self>> {
                match pubkey {
                    Pubkey::$variant(pubkey) => Ok(pubkey),
                    _ => Err(Error::PubkeyFormat),
                }
            }
        }
    };
}

impl_curve!(p256, NistP256, EcdsaP256, "ecdsa-sha2-nistp256", "nistp256", 32);
impl_curve!(p384, NistP384, EcdsaP384, "ecdsa-sha2-nistp384", "nistp384", 48);
impl_curve!(p521, NistP521, EcdsaP521, "ecdsa-sha2-nistp521", "nistp521", 66);

#[cfg(test)]
mod tests {
    use ecdsa::signature::Signer as _;
    use num_bigint_dig::BigUint;
    use super::*;

    fn encode_signature(algo_name: &str, r: &[u8], s: &[u8]) -> Bytes {
        let mut blob = PacketEncode::new();
        blob.put_biguint(&BigUint::from_bytes_be(r));
        blob.put_biguint(&BigUint::from_bytes_be(s));
        let mut signature = PacketEncode::new();
        signature.put_str(algo_name);
        signature.put_bytes(&blob.finish());
        signature.finish()
    }

    #[test]
    fn test_p256_verify() {
        let signing = p256::ecdsa::SigningKey::from_slice(&[3; 32]).unwrap();
        let point = signing.verifying_key().to_encoded_point(false);
        let mut blob = PacketEncode::new();
        blob.put_str("ecdsa-sha2-nistp256");
        blob.put_str("nistp256");
        blob.put_bytes(point.as_bytes());
        let blob = blob.finish();

        let pubkey = Pubkey::decode(blob.clone()).unwrap();
        assert_eq!(pubkey.encode(), blob);

        let signature: p256::ecdsa::Signature = signing.sign(b"exchange hash");
        let (r, s) = signature.split_bytes();
        let signature = encode_signature("ecdsa-sha2-nistp256", &r, &s);
        assert!((ECDSA_SHA2_NISTP256.verify)(&pubkey, b"exchange hash", signature.clone()).is_ok());
        assert!(matches!((ECDSA_SHA2_NISTP256.verify)(&pubkey, b"tampered", signature.clone()), Err(Error::Signature)));
        assert!(matches!((ECDSA_SHA2_NISTP384.verify)(&pubkey, b"exchange hash", signature), Err(Error::PubkeyFormat)));
    }

    #[test]
    fn test_point_not_on_curve() {
        let mut point = vec![4u8];
        point.extend_from_slice(&[0x11; 96]);
        let mut blob = PacketEncode::new();
        blob.put_str("ecdsa-sha2-nistp384");
        blob.put_str("nistp384");
        blob.put_bytes(&point);
        assert!(matches!(Pubkey::decode(blob.finish()), Err(Error::Decode(_))));
    }

    #[test]
    fn test_curve_name_mismatch() {
        let signing = p256::ecdsa::SigningKey::from_slice(&[3; 32]).unwrap();
        let point = signing.verifying_key().to_encoded_point(false);
        let mut blob = PacketEncode::new();
        blob.put_str("ecdsa-sha2-nistp256");
        blob.put_str("nistp521");
        blob.put_bytes(point.as_bytes());
        assert!(matches!(Pubkey::decode(blob.finish()), Err(Error::Decode(_))));
    }
}
