use flate2::{Compression, FlushCompress, FlushDecompress, Status};
use crate::{Error, Result};
use crate::codec::PACKET_LEN_MAX;
use super::{CompressAlgo, Compress, Decompress};

/// "zlib@openssh.com" compression, enabled after the user is authenticated.
pub static ZLIB_OPENSSH: CompressAlgo = CompressAlgo {
    name: "zlib@openssh.com",
    make_compress: |level| Box::new(ZlibCompress::new(level)),
    make_decompress: || Box::new(ZlibDecompress::new()),
};

// both directions keep a single zlib stream for the whole connection (RFC 4253, section 6.2), each
// payload ends with a partial flush so that the peer can decompress it without waiting for more

struct ZlibCompress {
    stream: flate2::Compress,
}

impl ZlibCompress {
    fn new(level: u32) -> Self {
        Self { stream: flate2::Compress::new(Compression::new(level.min(9)), true) }
    }
}

impl Compress for ZlibCompress {
    fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(payload.len() / 2 + 64);
        let in_begin = self.stream.total_in();
        loop {
            let consumed = (self.stream.total_in() - in_begin) as usize;
            self.stream.compress_vec(&payload[consumed..], &mut output, FlushCompress::Partial)
                .map_err(|_| Error::Compress("could not compress payload"))?;

            let consumed = (self.stream.total_in() - in_begin) as usize;
            if consumed == payload.len() && output.len() < output.capacity() {
                break
            }
            output.reserve(output.capacity().max(256));
        }
        Ok(output)
    }
}

struct ZlibDecompress {
    stream: flate2::Decompress,
}

impl ZlibDecompress {
    fn new() -> Self {
        Self { stream: flate2::Decompress::new(true) }
    }
}

impl Decompress for ZlibDecompress {
    fn decompress(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::with_capacity(payload.len() * 4 + 64);
        let in_begin = self.stream.total_in();
        loop {
            let consumed = (self.stream.total_in() - in_begin) as usize;
            let out_len = output.len();
            let status = self.stream.decompress_vec(&payload[consumed..], &mut output, FlushDecompress::Sync)
                .map_err(|_| Error::Compress("could not decompress payload"))?;

            let new_consumed = (self.stream.total_in() - in_begin) as usize;
            if output.len() > PACKET_LEN_MAX {
                return Err(Error::Compress("decompressed payload is too long"))
            }

            if new_consumed == payload.len() && output.len() < output.capacity() {
                break
            } else if status == Status::StreamEnd {
                return Err(Error::Compress("peer ended the compressed stream"))
            } else if output.len() < output.capacity() && new_consumed == consumed && output.len() == out_len {
                return Err(Error::Compress("compressed payload is truncated"))
            }
            output.reserve(output.capacity().max(256));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_spans_packets() {
        let mut compress = (ZLIB_OPENSSH.make_compress)(6);
        let mut decompress = (ZLIB_OPENSSH.make_decompress)();

        let payloads: Vec<Vec<u8>> = vec![
            b"\x5e\x00\x00\x00\x00\x00\x00\x00\x05hello".to_vec(),
            Vec::new(),
            (0..50_000u32).map(|i| (i % 251) as u8).collect(),
            b"\x5e\x00\x00\x00\x00\x00\x00\x00\x05hello".to_vec(),
        ];

        let mut compressed_lens = Vec::new();
        for payload in payloads.iter() {
            let compressed = compress.compress(payload).unwrap();
            compressed_lens.push(compressed.len());
            assert_eq!(&decompress.decompress(&compressed).unwrap(), payload);
        }

        // the repeated payload refers back into the shared dictionary
        assert!(compressed_lens[3] < compressed_lens[0]);
    }

    #[test]
    fn test_decompression_bomb() {
        let mut compress = (ZLIB_OPENSSH.make_compress)(9);
        let mut decompress = (ZLIB_OPENSSH.make_decompress)();
        let compressed = compress.compress(&vec![0; PACKET_LEN_MAX + 1]).unwrap();
        assert!(matches!(decompress.decompress(&compressed), Err(Error::Compress(_))));
    }

    #[test]
    fn test_garbage() {
        let mut decompress = (ZLIB_OPENSSH.make_decompress)();
        assert!(decompress.decompress(b"this is not zlib").is_err());
    }
}
