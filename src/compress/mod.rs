//! Compression algorithms.
//!
//! Compression is negotiated like the other algorithms, but it is applied to packet payloads
//! only once the user is authenticated. Plain "zlib" from RFC 4253 compresses right after the
//! first key exchange, so it is not supported.
//!
//! # Supported algorithms
//!
//! - "none" ([`NONE`])
//! - "zlib@openssh.com" ([`ZLIB_OPENSSH`])
use derivative::Derivative;
use crate::Result;
pub use self::zlib::ZLIB_OPENSSH;

mod zlib;

/// Algorithm for compressing packet payloads.
///
/// See the [module documentation][self] for details.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct CompressAlgo {
    /// Name of the algorithm.
    pub name: &'static str,
    #[derivative(Debug = "ignore")]
    pub(crate) make_compress: fn(level: u32) -> Box<dyn Compress + Send>,
    #[derivative(Debug = "ignore")]
    pub(crate) make_decompress: fn() -> Box<dyn Decompress + Send>,
}

impl CompressAlgo {
    pub(crate) fn is_none(&self) -> bool {
        self.name == NONE.name
    }
}

/// "none" compression (payloads are sent as they are).
pub static NONE: CompressAlgo = CompressAlgo {
    name: "none",
    make_compress: |_level| Box::new(Passthrough),
    make_decompress: || Box::new(Passthrough),
};

pub(crate) trait Compress {
    fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>>;
}

pub(crate) trait Decompress {
    fn decompress(&mut self, payload: &[u8]) -> Result<Vec<u8>>;
}

struct Passthrough;

impl Compress for Passthrough {
    fn compress(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(payload.to_vec())
    }
}

impl Decompress for Passthrough {
    fn decompress(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(payload.to_vec())
    }
}
