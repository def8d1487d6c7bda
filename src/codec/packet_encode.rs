use bytes::{BufMut as _, Bytes, BytesMut};
use num_bigint_dig::BigUint;

/// Builder of SSH payloads in the wire format of RFC 4251, section 5.
///
/// Useful for the type-specific data of requests and channels.
#[derive(Debug, Clone, Default)]
pub struct PacketEncode {
    buf: BytesMut,
}

impl PacketEncode {
    /// Starts an empty payload.
    pub fn new() -> PacketEncode {
        PacketEncode::default()
    }

    /// Appends a `byte`.
    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Appends a `boolean`.
    pub fn put_bool(&mut self, value: bool) {
        self.put_u8(u8::from(value));
    }

    /// Appends a `uint32`.
    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    /// Appends a `uint64`.
    pub fn put_u64(&mut self, value: u64) {
        self.buf.put_u64(value);
    }

    /// Appends a `string` with arbitrary content.
    pub fn put_bytes(&mut self, value: &[u8]) {
        self.put_length_prefixed(&[value]);
    }

    /// Appends a `string` with UTF-8 content.
    pub fn put_str(&mut self, value: &str) {
        self.put_bytes(value.as_bytes());
    }

    /// Appends a `name-list`.
    pub fn put_name_list(&mut self, names: &[&str]) {
        let mut parts = Vec::with_capacity(2 * names.len());
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                parts.push(&b","[..]);
            }
            parts.push(name.as_bytes());
        }
        self.put_length_prefixed(&parts);
    }

    /// Appends a `mpint` holding `value`.
    pub fn put_biguint(&mut self, value: &BigUint) {
        self.put_mpint_uint_be(&value.to_bytes_be());
    }

    /// Appends a `mpint` holding the unsigned big endian number `bytes`.
    ///
    /// The encoding is canonical: redundant leading zeros are dropped, and a zero byte is added
    /// when the top bit is set, so that the number does not read as negative.
    pub fn put_mpint_uint_be(&mut self, bytes: &[u8]) {
        let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
        let digits = &bytes[first_nonzero..];
        let sign_pad: &[u8] = match digits.first() {
            Some(&b) if b & 0x80 != 0 => &[0],
            _ => &[],
        };
        self.put_length_prefixed(&[sign_pad, digits]);
    }

    /// Appends bytes without any framing.
    pub fn put_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    fn put_length_prefixed(&mut self, parts: &[&[u8]]) {
        let len: usize = parts.iter().map(|part| part.len()).sum();
        // a longer string could never fit into a packet
        self.buf.reserve(4 + len);
        self.buf.put_u32(len as u32);
        for part in parts {
            self.buf.put_slice(part);
        }
    }

    /// Number of bytes appended so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing was appended.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns the encoded payload.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}
