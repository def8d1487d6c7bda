use bytes::{Buf as _, Bytes};
use num_bigint_dig::BigUint;
use crate::{Error, Result};

/// Longest `string` that we accept.
///
/// This is far below the packet size limit; channel data are bounded by the maximal packet size
/// that we advertise, which is clamped below this value.
pub const STRING_LEN_MAX: usize = 64 * 1024;

/// Longest `mpint` that we accept (65536 bits and a sign byte).
pub const MPINT_LEN_MAX: usize = 8 * 1024 + 1;

/// Reader of SSH payloads in the wire format of RFC 4251, section 5.
///
/// Every getter fails with [`Error::Decode`] when the payload is too short or when a length
/// exceeds [`STRING_LEN_MAX`] ([`MPINT_LEN_MAX`] for `mpint`s).
#[derive(Debug)]
pub struct PacketDecode {
    whole: Bytes,
    rest: Bytes,
}

impl PacketDecode {
    /// Starts reading `payload` from the beginning.
    pub fn new(payload: Bytes) -> PacketDecode {
        PacketDecode { whole: payload.clone(), rest: payload }
    }

    /// Reads a `byte`.
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Reads a `boolean`; every nonzero byte is true.
    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Reads a `uint32`.
    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(self.take(4)?.get_u32())
    }

    /// Reads a `uint64`.
    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(self.take(8)?.get_u64())
    }

    /// Reads `N` bytes without any framing.
    pub fn get_byte_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut array = [0; N];
        array.copy_from_slice(&self.take(N)?);
        Ok(array)
    }

    /// Reads `len` bytes without any framing.
    pub fn get_raw(&mut self, len: usize) -> Result<Bytes> {
        self.take(len)
    }

    /// Reads a `string` with arbitrary content.
    pub fn get_bytes(&mut self) -> Result<Bytes> {
        self.take_length_prefixed(STRING_LEN_MAX)
    }

    /// Reads a `string` that must be valid UTF-8.
    pub fn get_string(&mut self) -> Result<String> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::Decode("string is not valid utf-8"))
    }

    /// Reads a `name-list`.
    pub fn get_name_list(&mut self) -> Result<Vec<String>> {
        let names = self.get_string()?;
        if names.is_empty() {
            return Ok(Vec::new())
        }
        Ok(names.split(',').map(String::from).collect())
    }

    /// Reads a nonnegative `mpint`.
    pub fn get_biguint(&mut self) -> Result<BigUint> {
        let bytes = self.take_length_prefixed(MPINT_LEN_MAX)?;
        match bytes.first() {
            Some(&b) if b & 0x80 != 0 => Err(Error::Decode("mpint is negative")),
            _ => Ok(BigUint::from_bytes_be(&bytes)),
        }
    }

    /// Reads a `mpint` and returns it as exactly `len` unsigned big endian bytes.
    pub fn get_scalar(&mut self, len: usize) -> Result<Vec<u8>> {
        let bytes = self.take_length_prefixed(MPINT_LEN_MAX)?;
        let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        let digits = &bytes[first_nonzero..];
        if digits.len() > len {
            return Err(Error::Decode("scalar is too long"))
        }

        let mut scalar = vec![0; len];
        scalar[len - digits.len()..].copy_from_slice(digits);
        Ok(scalar)
    }

    /// Skips `len` bytes.
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.take(len).map(drop)
    }

    /// The whole payload, including the bytes that were already read.
    pub fn as_original_bytes(&self) -> &[u8] {
        &self.whole
    }

    /// The bytes that were not read yet.
    pub fn remaining(&self) -> Bytes {
        self.rest.clone()
    }

    /// Number of bytes that were not read yet.
    pub fn remaining_len(&self) -> usize {
        self.rest.len()
    }

    fn take(&mut self, len: usize) -> Result<Bytes> {
        if len > self.rest.len() {
            return Err(Error::Decode("unexpected end of payload"))
        }
        Ok(self.rest.split_to(len))
    }

    fn take_length_prefixed(&mut self, len_max: usize) -> Result<Bytes> {
        let len = self.get_u32()? as usize;
        // check the declared length before looking at the data
        if len > len_max {
            return Err(Error::Decode("string length exceeds the limit"))
        }
        self.take(len)
    }
}
