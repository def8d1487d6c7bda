use rand::{CryptoRng, RngCore};
use tokio::io::{AsyncRead, AsyncWrite};

/// Object-safe union of the stream traits, so that the client state does not depend on the type
/// of the stream.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite + ?Sized> AsyncReadWrite for T {}

/// Cryptographically secure random generator usable as a trait object.
pub trait CryptoRngCore: CryptoRng + RngCore {
    /// Upcast for APIs that take `&mut dyn RngCore`.
    fn as_rngcore(&mut self) -> &mut dyn RngCore;
}

impl<T: CryptoRng + RngCore> CryptoRngCore for T {
    fn as_rngcore(&mut self) -> &mut dyn RngCore {
        self
    }
}
