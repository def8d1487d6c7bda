use hmac::Hmac;
use hmac::digest::KeyInit;
use crate::error::{Result, Error};
use super::{MacAlgo, Mac, MacVerified};

/// "hmac-sha2-256" MAC from RFC 6668.
pub static HMAC_SHA2_256: MacAlgo = MacAlgo {
    name: "hmac-sha2-256",
    tag_len: 32,
    key_len: 32,
    make_mac: |key| Ok(Box::new(HmacMac::<Hmac<sha2::Sha256>>::new(key)?)),
};

/// "hmac-sha2-512" MAC from RFC 6668.
pub static HMAC_SHA2_512: MacAlgo = MacAlgo {
    name: "hmac-sha2-512",
    tag_len: 64,
    key_len: 64,
    make_mac: |key| Ok(Box::new(HmacMac::<Hmac<sha2::Sha512>>::new(key)?)),
};

/// "hmac-sha1" MAC from RFC 4253.
pub static HMAC_SHA1: MacAlgo = MacAlgo {
    name: "hmac-sha1",
    tag_len: 20,
    key_len: 20,
    make_mac: |key| Ok(Box::new(HmacMac::<Hmac<sha1::Sha1>>::new(key)?)),
};

/// "hmac-sha1-96" MAC from RFC 4253 (first 96 bits of "hmac-sha1").
pub static HMAC_SHA1_96: MacAlgo = MacAlgo {
    name: "hmac-sha1-96",
    tag_len: 12,
    key_len: 20,
    make_mac: |key| Ok(Box::new(HmacMac::<Hmac<sha1::Sha1>>::new(key)?)),
};

struct HmacMac<M> {
    keyed: M,
}

impl<M: hmac::Mac + KeyInit + Clone> HmacMac<M> {
    fn new(key: &[u8]) -> Result<Self> {
        let keyed = <M as KeyInit>::new_from_slice(key)
            .map_err(|_| Error::Crypto("invalid key length for hmac"))?;
        Ok(Self { keyed })
    }

    fn compute(&self, packet_seq: u32, data: &[u8]) -> M {
        let mut mac = self.keyed.clone();
        hmac::Mac::update(&mut mac, &packet_seq.to_be_bytes());
        hmac::Mac::update(&mut mac, data);
        mac
    }
}

impl<M: hmac::Mac + KeyInit + Clone> Mac for HmacMac<M> {
    fn sign(&mut self, packet_seq: u32, data: &[u8], tag: &mut [u8]) {
        let computed = hmac::Mac::finalize(self.compute(packet_seq, data)).into_bytes();
        let tag_len = tag.len();
        tag.copy_from_slice(&computed[..tag_len]);
    }

    fn verify(&mut self, packet_seq: u32, data: &[u8], tag: &[u8]) -> Result<MacVerified> {
        match hmac::Mac::verify_truncated_left(self.compute(packet_seq, data), tag) {
            Ok(_) => Ok(MacVerified::assertion()),
            Err(_) => Err(Error::Mac),
        }
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use super::*;

    #[test]
    fn test_hmac_sha2_256_tag() {
        let key = [0x0b; 32];
        let mut mac = (HMAC_SHA2_256.make_mac)(&key).unwrap();
        let mut tag = [0; 32];
        mac.sign(0, b"abc", &mut tag);
        assert!(mac.verify(0, b"abc", &tag).is_ok());
        assert!(matches!(mac.verify(1, b"abc", &tag), Err(Error::Mac)));
        assert!(matches!(mac.verify(0, b"abd", &tag), Err(Error::Mac)));
    }

    #[test]
    fn test_hmac_sha1_known_answer() {
        // RFC 2202, test case 2: the key is "Jefe", the data is "what do ya want for nothing?";
        // we feed the first four bytes of the data as the sequence number
        let mut mac = (HMAC_SHA1.make_mac)(b"Jefe").unwrap();
        let seq = u32::from_be_bytes(*b"what");
        let mut tag = [0; 20];
        mac.sign(seq, b" do ya want for nothing?", &mut tag);
        assert_eq!(tag, hex!("effcdf6ae5eb2fa2d27416d5f184df9c259a7c79"));
    }

    #[test]
    fn test_hmac_sha1_96_is_truncated() {
        let key = [0x42; 20];
        let mut full = (HMAC_SHA1.make_mac)(&key).unwrap();
        let mut short = (HMAC_SHA1_96.make_mac)(&key).unwrap();
        let mut full_tag = [0; 20];
        let mut short_tag = [0; 12];
        full.sign(7, b"packet", &mut full_tag);
        short.sign(7, b"packet", &mut short_tag);
        assert_eq!(&full_tag[..12], &short_tag[..]);
        assert!(short.verify(7, b"packet", &short_tag).is_ok());
    }
}
