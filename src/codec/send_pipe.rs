use bytes::{Buf as _, BufMut as _, BytesMut};
use rand::{RngCore as _, SeedableRng as _};
use rand_chacha::ChaCha8Rng;
use crate::{Error, Result};
use crate::cipher::{self, Encrypt};
use crate::compress::Compress;
use crate::mac::{self, Mac};
use crate::util::CryptoRngCore;

pub(crate) struct SendPipe {
    buf: BytesMut,
    encrypt: Box<dyn Encrypt + Send>,
    mac: Box<dyn Mac + Send>,
    compress: Option<Box<dyn Compress + Send>>,
    block_len: usize,
    tag_len: usize,
    packet_seq: u64,
    byte_count: u64,
    padding_rng: ChaCha8Rng,
}

impl SendPipe {
    pub fn new(rng: &mut dyn CryptoRngCore) -> Result<SendPipe> {
        let padding_rng = ChaCha8Rng::from_rng(rng.as_rngcore())
            .map_err(|_| Error::Random("could not generate seed for padding generator"))?;
        Ok(SendPipe {
            buf: BytesMut::new(),
            encrypt: Box::new(cipher::NoCipher),
            mac: Box::new(mac::NoMac),
            compress: None,
            block_len: 8,
            tag_len: 0,
            packet_seq: 0,
            byte_count: 0,
            padding_rng,
        })
    }

    pub fn feed_ident(&mut self, ident: &[u8]) {
        // RFC 4253, section 4.2
        self.buf.reserve(ident.len() + 2);
        self.buf.put_slice(ident);
        self.buf.put_slice(&b"\r\n"[..]);
    }

    pub fn feed_packet(&mut self, payload: &[u8]) -> Result<u32> {
        log::trace!("feed packet {}, len {}, seq {}",
            payload.first().cloned().unwrap_or(0), payload.len(), self.packet_seq);

        let compressed;
        let payload = match self.compress {
            Some(ref mut compress) => {
                compressed = compress.compress(payload)?;
                &compressed[..]
            },
            None => payload,
        };

        let padding_len = calculate_padding_len(payload.len(), self.block_len);

        // RFC 4253, section 6
        //
        // packet layout:
        // 4 bytes: `packet_len = 1 + payload_len + padding_len` (u32 big endian)
        // 1 byte: padding_len (u8)
        // `payload_len` bytes: payload
        // `padding_len` bytes: random padding
        // `tag_len` bytes: mac tag

        let packet_begin = self.buf.len();
        self.buf.reserve(5 + payload.len() + padding_len + self.tag_len);
        self.buf.put_u32((1 + payload.len() + padding_len) as u32);
        self.buf.put_u8(padding_len as u8);
        self.buf.put_slice(payload);
        self.buf.put_bytes(0, padding_len + self.tag_len);

        let packet = &mut self.buf[packet_begin..];
        self.padding_rng.fill_bytes(&mut packet[5 + payload.len()..][..padding_len]);

        let packet_seq = self.packet_seq as u32;
        let (plaintext, tag) = packet.split_at_mut(5 + payload.len() + padding_len);
        self.mac.sign(packet_seq, plaintext, tag);
        self.encrypt.encrypt(plaintext);

        self.byte_count += (self.buf.len() - packet_begin) as u64;
        self.packet_seq += 1;
        Ok(packet_seq)
    }

    pub fn set_encrypt(
        &mut self,
        encrypt: Box<dyn Encrypt + Send>,
        mac: Box<dyn Mac + Send>,
        block_len: usize,
        tag_len: usize,
    ) {
        self.encrypt = encrypt;
        self.mac = mac;
        self.block_len = block_len;
        self.tag_len = tag_len;
    }

    pub fn set_compress(&mut self, compress: Option<Box<dyn Compress + Send>>) {
        self.compress = compress;
    }

    pub fn is_compressing(&self) -> bool {
        self.compress.is_some()
    }

    /// Number of bytes of packets produced so far (including the MAC tags).
    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    pub fn peek_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn consume_bytes(&mut self, len: usize) {
        self.buf.advance(len);
    }
}

fn calculate_padding_len(payload_len: usize, block_len: usize) -> usize {
    // RFC 4253, section 6
    let min_padded_len = 5 + payload_len + 4;
    let padded_len = (min_padded_len + block_len - 1) / block_len * block_len;
    padded_len - payload_len - 5
}
