use aes::cipher::{BlockEncryptMut, BlockDecryptMut, KeyIvInit};
use aes::cipher::inout::InOutBuf;
use crate::{Error, Result};
use super::{CipherAlgo, Encrypt, Decrypt};

/// "aes128-cbc" cipher from RFC 4253.
pub static AES128_CBC: CipherAlgo = CipherAlgo {
    name: "aes128-cbc",
    block_len: 16,
    key_len: 16,
    iv_len: 16,
    make_encrypt: |key, iv| Ok(Box::new(new_cbc_enc::<cbc::Encryptor<aes::Aes128>>(key, iv)?)),
    make_decrypt: |key, iv| Ok(Box::new(new_cbc_dec::<cbc::Decryptor<aes::Aes128>>(key, iv)?)),
};

/// "aes192-cbc" cipher from RFC 4253.
pub static AES192_CBC: CipherAlgo = CipherAlgo {
    name: "aes192-cbc",
    block_len: 16,
    key_len: 24,
    iv_len: 16,
    make_encrypt: |key, iv| Ok(Box::new(new_cbc_enc::<cbc::Encryptor<aes::Aes192>>(key, iv)?)),
    make_decrypt: |key, iv| Ok(Box::new(new_cbc_dec::<cbc::Decryptor<aes::Aes192>>(key, iv)?)),
};

/// "aes256-cbc" cipher from RFC 4253.
pub static AES256_CBC: CipherAlgo = CipherAlgo {
    name: "aes256-cbc",
    block_len: 16,
    key_len: 32,
    iv_len: 16,
    make_encrypt: |key, iv| Ok(Box::new(new_cbc_enc::<cbc::Encryptor<aes::Aes256>>(key, iv)?)),
    make_decrypt: |key, iv| Ok(Box::new(new_cbc_dec::<cbc::Decryptor<aes::Aes256>>(key, iv)?)),
};

struct BlockEncrypt<T> {
    encrypt: T,
}

struct BlockDecrypt<T> {
    decrypt: T,
}

fn new_cbc_enc<T: KeyIvInit>(key: &[u8], iv: &[u8]) -> Result<BlockEncrypt<T>> {
    let encrypt = T::new_from_slices(key, iv)
        .map_err(|_| Error::Crypto("invalid key or iv length for aes-cbc"))?;
    Ok(BlockEncrypt { encrypt })
}

fn new_cbc_dec<T: KeyIvInit>(key: &[u8], iv: &[u8]) -> Result<BlockDecrypt<T>> {
    let decrypt = T::new_from_slices(key, iv)
        .map_err(|_| Error::Crypto("invalid key or iv length for aes-cbc"))?;
    Ok(BlockDecrypt { decrypt })
}

impl<T: BlockEncryptMut> Encrypt for BlockEncrypt<T> {
    fn encrypt(&mut self, data: &mut [u8]) {
        let (blocks, tail) = InOutBuf::from(data).into_chunks();
        debug_assert!(tail.is_empty(), "plaintext is not aligned to block");
        self.encrypt.encrypt_blocks_inout_mut(blocks)
    }
}

impl<T: BlockDecryptMut> Decrypt for BlockDecrypt<T> {
    fn decrypt(&mut self, data: &mut [u8]) {
        let (blocks, tail) = InOutBuf::from(data).into_chunks();
        debug_assert!(tail.is_empty(), "ciphertext is not aligned to block");
        self.decrypt.decrypt_blocks_inout_mut(blocks)
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;
    use super::*;

    #[test]
    fn test_aes128_cbc_known_answer() {
        // NIST SP 800-38A, F.2.1
        let key = hex!("2b7e151628aed2a6abf7158809cf4f3c");
        let iv = hex!("000102030405060708090a0b0c0d0e0f");
        let mut data = hex!("6bc1bee22e409f96e93d7e117393172a" "ae2d8a571e03ac9c9eb76fac45af8e51");
        let mut encrypt = (AES128_CBC.make_encrypt)(&key, &iv).unwrap();
        encrypt.encrypt(&mut data);
        assert_eq!(data, hex!("7649abac8119b246cee98e9b12e9197d" "5086cb9b507219ee95db113a917678b2"));

        // the chaining state is kept across calls, as with consecutive packets
        let mut decrypt = (AES128_CBC.make_decrypt)(&key, &iv).unwrap();
        decrypt.decrypt(&mut data[..16]);
        decrypt.decrypt(&mut data[16..]);
        assert_eq!(data, hex!("6bc1bee22e409f96e93d7e117393172a" "ae2d8a571e03ac9c9eb76fac45af8e51"));
    }
}
