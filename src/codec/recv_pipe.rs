use bytes::{Bytes, BytesMut};
use crate::{Error, Result};
use crate::cipher::{self, Decrypt};
use crate::compress::Decompress;
use crate::mac::{self, Mac, MacVerified};

/// Largest `packet_length` that we accept.
pub(crate) const PACKET_LEN_MAX: usize = 256 * 1024;

/// Cap on the bytes that we drain after a bad packet length.
const DISCARD_LEN_MAX: usize = 1024 * 1024;

/// Bytes drained after a bad packet length at least, the size of the smallest valid packet.
const DRAIN_LEN_MIN: usize = 16;

/// Cap on the bytes that may precede the identification line.
const PRE_IDENT_LEN_MAX: usize = 8 * 1024;

/// Longest identification line, including the "SSH-" prefix (RFC 4253, section 4.2).
const IDENT_LEN_MAX: usize = 255;

/// Parser of the bytes received from the server: the identification line, then binary packets
/// (RFC 4253, section 6).
pub(crate) struct RecvPipe {
    buf: BytesMut,
    phase: Phase,
    decrypt: Box<dyn Decrypt + Send>,
    mac: Box<dyn Mac + Send>,
    decompress: Option<Box<dyn Decompress + Send>>,
    block_len: usize,
    tag_len: usize,
    packet_seq: u64,
    byte_count: u64,
}

#[derive(Debug, Copy, Clone)]
enum Phase {
    /// Nothing of the next line or packet was examined yet.
    Idle,
    /// The first `scanned` bytes of the buffer contain no line terminator.
    Line { scanned: usize },
    /// The first block is decrypted, the rest of the packet has not arrived yet.
    Body { packet_len: usize },
    /// The packet length was bogus, `len` bytes are being drained before failing.
    Drain { len: usize, reason: &'static str },
}

#[derive(Debug)]
pub struct RecvPacket {
    pub payload: Bytes,
    pub packet_seq: u32,
}

impl RecvPipe {
    pub fn new() -> RecvPipe {
        RecvPipe {
            buf: BytesMut::new(),
            phase: Phase::Idle,
            decrypt: Box::new(cipher::NoCipher),
            mac: Box::new(mac::NoMac),
            decompress: None,
            block_len: 8,
            tag_len: 0,
            packet_seq: 0,
            byte_count: 0,
        }
    }

    /// Buffer that receives the bytes read from the stream.
    pub fn feed_buf(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    /// Returns the identification line of the server once it arrived, skipping the lines that
    /// precede it.
    pub fn consume_ident(&mut self) -> Result<Option<Bytes>> {
        while let Some(line) = self.consume_line()? {
            if !line.starts_with(b"SSH-") {
                log::debug!("skipping line before server identification: {:?}",
                    String::from_utf8_lossy(&line));
                continue
            }
            if line.len() > IDENT_LEN_MAX {
                return Err(Error::Protocol("server identification is longer than 255 bytes"))
            }
            return Ok(Some(line))
        }
        Ok(None)
    }

    /// Splits off one line terminated by "\r\n" or "\n", without the terminator.
    fn consume_line(&mut self) -> Result<Option<Bytes>> {
        let scanned = match self.phase {
            Phase::Idle => 0,
            Phase::Line { scanned } => scanned,
            Phase::Body { .. } | Phase::Drain { .. } =>
                return Err(Error::Protocol("cannot read a line in the middle of a packet")),
        };

        let Some(lf) = self.buf[scanned..].iter().position(|&b| b == b'\n').map(|i| scanned + i) else {
            if self.buf.len() > PRE_IDENT_LEN_MAX {
                return Err(Error::Protocol("server sent too much data before its identification"))
            }
            self.phase = Phase::Line { scanned: self.buf.len() };
            return Ok(None)
        };

        self.phase = Phase::Idle;
        let mut line = self.buf.split_to(lf + 1).freeze();
        line.truncate(lf);
        if line.ends_with(b"\r") {
            line.truncate(lf - 1);
        }
        Ok(Some(line))
    }

    /// Returns the next packet once it fully arrived.
    pub fn consume_packet(&mut self) -> Result<Option<RecvPacket>> {
        let packet_len = match self.phase {
            Phase::Idle => match self.decrypt_len()? {
                Some(packet_len) => packet_len,
                None => return Ok(None),
            },
            Phase::Body { packet_len } => packet_len,
            Phase::Drain { len, reason } => return self.drain(len, reason),
            Phase::Line { .. } =>
                return Err(Error::Protocol("cannot read a packet in the middle of a line")),
        };

        let total_len = 4 + packet_len + self.tag_len;
        if self.buf.len() < total_len {
            self.buf.reserve(total_len - self.buf.len());
            return Ok(None)
        }

        let mut packet = self.buf.split_to(total_len);
        let _verified: MacVerified = self.open_body(&mut packet, packet_len)?;
        let packet_seq = self.packet_seq as u32;
        self.packet_seq += 1;
        self.byte_count += total_len as u64;
        self.phase = Phase::Idle;

        let padding_len = packet[4] as usize;
        let Some(payload_len) = packet_len.checked_sub(1 + padding_len) else {
            return Err(Error::PacketCorrupt("padding is longer than the packet"))
        };
        let mut payload = packet.freeze().slice(5..5 + payload_len);
        if let Some(decompress) = self.decompress.as_mut() {
            payload = Bytes::from(decompress.decompress(&payload)?);
        }
        Ok(Some(RecvPacket { payload, packet_seq }))
    }

    /// Decrypts the first block and validates the packet length in it.
    fn decrypt_len(&mut self) -> Result<Option<usize>> {
        if self.buf.len() < self.block_len {
            return Ok(None)
        }
        self.decrypt.decrypt(&mut self.buf[..self.block_len]);
        let packet_len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;

        let claimed_len = packet_len.saturating_add(4);
        let bogus = if packet_len < 5 {
            Some("packet length is too short")
        } else if packet_len > PACKET_LEN_MAX {
            Some("packet length is too long")
        } else if claimed_len % self.block_len != 0 {
            Some("packet length is not a multiple of the cipher block length")
        } else {
            None
        };

        if let Some(reason) = bogus {
            let len = claimed_len.clamp(DRAIN_LEN_MIN.max(self.block_len), DISCARD_LEN_MAX);
            log::debug!("bogus packet length {}, draining {} bytes", packet_len, len);
            self.phase = Phase::Drain { len, reason };
            return self.drain(len, reason).map(|_| None)
        }

        log::trace!("decrypted packet length {}", packet_len);
        self.phase = Phase::Body { packet_len };
        Ok(Some(packet_len))
    }

    /// Consumes `len` bytes and fails with `reason`.
    ///
    /// The drained bytes are decrypted and authenticated like a packet, so the failure does not
    /// arrive sooner than for a packet with a bad MAC.
    fn drain(&mut self, len: usize, reason: &'static str) -> Result<Option<RecvPacket>> {
        if self.buf.len() < len {
            self.buf.reserve(len - self.buf.len());
            return Ok(None)
        }

        let mut drained = self.buf.split_to(len);
        self.decrypt.decrypt(&mut drained[self.block_len..]);
        let mut tag = vec![0; self.tag_len];
        self.mac.sign(self.packet_seq as u32, &drained, &mut tag);

        self.byte_count += len as u64;
        self.phase = Phase::Idle;
        Err(Error::PacketCorrupt(reason))
    }

    fn open_body(&mut self, packet: &mut [u8], packet_len: usize) -> Result<MacVerified> {
        let (plaintext, tag) = packet.split_at_mut(4 + packet_len);
        self.decrypt.decrypt(&mut plaintext[self.block_len..]);
        self.mac.verify(self.packet_seq as u32, plaintext, &tag[..self.tag_len])
    }

    pub fn set_decrypt(
        &mut self,
        decrypt: Box<dyn Decrypt + Send>,
        mac: Box<dyn Mac + Send>,
        block_len: usize,
        tag_len: usize,
    ) {
        self.decrypt = decrypt;
        self.mac = mac;
        self.block_len = block_len;
        self.tag_len = tag_len;
    }

    pub fn set_decompress(&mut self, decompress: Option<Box<dyn Decompress + Send>>) {
        self.decompress = decompress;
    }

    pub fn is_decompressing(&self) -> bool {
        self.decompress.is_some()
    }

    /// Bytes of all packets consumed so far, MAC tags included.
    pub fn byte_count(&self) -> u64 {
        self.byte_count
    }

    #[cfg(test)]
    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}
