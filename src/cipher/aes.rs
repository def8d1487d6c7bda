use aes::cipher::{KeyIvInit, StreamCipher};
use crate::{Error, Result};
use super::{CipherAlgo, Encrypt, Decrypt};

/// "aes128-ctr" cipher from RFC 4344.
pub static AES128_CTR: CipherAlgo = CipherAlgo {
    name: "aes128-ctr",
    block_len: 16,
    key_len: 16,
    iv_len: 16,
    make_encrypt: |key, iv| Ok(Box::new(new_ctr::<ctr::Ctr128BE<aes::Aes128>>(key, iv)?)),
    make_decrypt: |key, iv| Ok(Box::new(new_ctr::<ctr::Ctr128BE<aes::Aes128>>(key, iv)?)),
};

/// "aes192-ctr" cipher from RFC 4344.
pub static AES192_CTR: CipherAlgo = CipherAlgo {
    name: "aes192-ctr",
    block_len: 16,
    key_len: 24,
    iv_len: 16,
    make_encrypt: |key, iv| Ok(Box::new(new_ctr::<ctr::Ctr128BE<aes::Aes192>>(key, iv)?)),
    make_decrypt: |key, iv| Ok(Box::new(new_ctr::<ctr::Ctr128BE<aes::Aes192>>(key, iv)?)),
};

/// "aes256-ctr" cipher from RFC 4344.
pub static AES256_CTR: CipherAlgo = CipherAlgo {
    name: "aes256-ctr",
    block_len: 16,
    key_len: 32,
    iv_len: 16,
    make_encrypt: |key, iv| Ok(Box::new(new_ctr::<ctr::Ctr128BE<aes::Aes256>>(key, iv)?)),
    make_decrypt: |key, iv| Ok(Box::new(new_ctr::<ctr::Ctr128BE<aes::Aes256>>(key, iv)?)),
};

struct AesCtr<C> {
    cipher: C,
}

fn new_ctr<C: KeyIvInit>(key: &[u8], iv: &[u8]) -> Result<AesCtr<C>> {
    let cipher = C::new_from_slices(key, iv)
        .map_err(|_| Error::Crypto("invalid key or iv length for aes-ctr"))?;
    Ok(AesCtr { cipher })
}

impl<C: StreamCipher> Encrypt for AesCtr<C> {
    fn encrypt(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data)
    }
}

impl<C: StreamCipher> Decrypt for AesCtr<C> {
    fn decrypt(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data)
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use super::*;

    #[test]
    fn test_aes128_ctr_known_answer() {
        // NIST SP 800-38A, F.5.1
        let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");
        let iv = hex!("f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff");
        let mut data = hex!("6bc1bee22e409f96e93d7e117393172a");
        let mut encrypt = (AES128_CTR.make_encrypt)(&key, &iv).unwrap();
        encrypt.encrypt(&mut data);
        assert_eq!(data, hex!("874d6191b620e3261bef6864990db6ce"));
    }

    #[test]
    fn test_decrypt_in_pieces() {
        let key = [7; 32];
        let iv = [9; 16];
        let plaintext: Vec<u8> = (0..64).collect();

        let mut data = plaintext.clone();
        (AES256_CTR.make_encrypt)(&key, &iv).unwrap().encrypt(&mut data);
        assert_ne!(data, plaintext);

        let mut decrypt = (AES256_CTR.make_decrypt)(&key, &iv).unwrap();
        decrypt.decrypt(&mut data[..16]);
        decrypt.decrypt(&mut data[16..]);
        assert_eq!(data, plaintext);
    }

    #[test]
    fn test_invalid_key_len() {
        assert!(matches!((AES192_CTR.make_encrypt)(&[0; 16], &[0; 16]), Err(Error::Crypto(_))));
    }
}
