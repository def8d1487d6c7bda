use std::fmt;
use crate::codes::{disconnect, open};

/// Result type for our [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error produced by the SSH client.
///
/// A fatal error is returned from the [`ClientFuture`][crate::ClientFuture]. Every operation that
/// still waits on the connection then fails too, typically with [`Error::ClientClosed`] or
/// [`Error::ChannelClosed`].
///
/// The enum is `#[non_exhaustive]`, new variants may appear in minor releases.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    // cryptography
    /// A cryptographic primitive rejected its input.
    #[error("cryptographic failure: {0}")]
    Crypto(&'static str),
    /// We could not obtain random numbers.
    #[error("random number generator failed: {0}")]
    Random(&'static str),
    /// An incoming packet carried a wrong MAC.
    #[error("packet authentication code is invalid")]
    Mac,
    /// A signature (such as the exchange hash signature of the server) is invalid.
    #[error("invalid signature")]
    Signature,
    /// A public key blob is malformed or does not belong to the expected algorithm.
    #[error("malformed public key")]
    PubkeyFormat,
    /// The host key callback rejected the server key.
    #[error("server host key was rejected")]
    PubkeyAccept(#[source] Box<dyn std::error::Error + Send + Sync>),

    // wire protocol
    /// The peer broke the protocol.
    #[error("SSH protocol violation: {0}")]
    Protocol(&'static str),
    /// A packet failed the framing checks.
    #[error("corrupted packet: {0}")]
    PacketCorrupt(&'static str),
    /// A field could not be decoded.
    #[error("decoding failed: {0}")]
    Decode(&'static str),
    /// The identification line of the server announces an unsupported version.
    #[error("server speaks an unsupported SSH version: {0:?}")]
    Version(String),
    /// No algorithm is supported by both sides.
    #[error("algorithm negotiation failed: {0}")]
    AlgoNegotiate(AlgoNegotiateError),
    /// Compression or decompression failed.
    #[error("compression failed: {0}")]
    Compress(&'static str),
    /// We do not handle this message number.
    #[error("message {0} is not implemented")]
    PacketNotImplemented(u8),

    // authentication
    /// An authentication attempt is already in progress.
    #[error("an authentication attempt is already in progress")]
    AuthPending,
    /// The connection closed before the authentication attempt finished.
    #[error("authentication attempt was aborted")]
    AuthAborted,
    /// The server rejected the credentials.
    #[error("authentication was rejected")]
    AuthFailed,

    // channels and requests
    /// The channel is closed or closing.
    #[error("channel is closed")]
    ChannelClosed,
    /// The server refused to open the channel.
    #[error("channel open was refused: {0}")]
    ChannelOpen(ChannelOpenError),
    /// The server replied with failure to a channel request.
    #[error("channel request was refused")]
    ChannelReq,
    /// The channel was not confirmed within the open timeout.
    #[error("channel open timed out")]
    OpenTimeout,
    /// The peer did not enlarge the channel window within the write timeout.
    #[error("timed out waiting for the channel window")]
    WindowTimeout,

    // connection
    /// A key exchange blocked the operation for longer than the rekey timeout.
    #[error("key exchange did not finish in time")]
    RekeyTimeout,
    /// The connection closed before the requested key exchange finished.
    #[error("key exchange was aborted")]
    RekeyAborted,
    /// The peer left this many keepalive requests unanswered.
    #[error("{0} keepalive requests went unanswered")]
    KeepaliveTimeout(u32),
    /// The client is closed.
    #[error("SSH client is closed")]
    ClientClosed,
    /// [`Client::disconnect()`][crate::Client::disconnect()] was already called.
    #[error("SSH client was already disconnected")]
    ClientDisconnected,
    /// Reading from the stream failed.
    #[error("reading from the connection failed")]
    ReadIo(#[source] std::io::Error),
    /// Writing to the stream failed.
    #[error("writing to the connection failed")]
    WriteIo(#[source] std::io::Error),
    /// The stream ended without `SSH_MSG_DISCONNECT`.
    #[error("server closed the connection")]
    PeerClosed,
    /// The server sent `SSH_MSG_DISCONNECT`.
    #[error("server disconnected: {0}")]
    PeerDisconnected(DisconnectError),
}

/// No algorithm of one category is supported by both sides (RFC 4253, section 7.1).
#[derive(Debug, Clone, thiserror::Error)]
#[error("no common {algo_name} algorithm (ours: {our_algos:?}, theirs: {their_algos:?})")]
pub struct AlgoNegotiateError {
    /// Name of the category, such as "cipher client-to-server".
    pub algo_name: String,
    /// Algorithms that we offered.
    pub our_algos: Vec<String>,
    /// Algorithms that the server offered.
    pub their_algos: Vec<String>,
}

/// Content of `SSH_MSG_DISCONNECT` (RFC 4253, section 11.1).
///
/// Describes both the disconnects of the server ([`Error::PeerDisconnected`]) and ours
/// ([`Client::disconnect()`][crate::Client::disconnect()]).
#[derive(Debug, Clone, thiserror::Error)]
pub struct DisconnectError {
    /// Reason code, see [`codes::disconnect`][crate::codes::disconnect].
    pub reason_code: u32,
    /// Description for humans.
    pub description: String,
    /// Language tag of `description` (RFC 3066).
    pub description_lang: String,
}

impl DisconnectError {
    /// Disconnect by the application, without a description.
    pub fn by_app() -> DisconnectError {
        DisconnectError {
            reason_code: disconnect::BY_APPLICATION,
            description: String::new(),
            description_lang: String::new(),
        }
    }

    /// Name of the [`reason_code`][Self::reason_code], if it is a known one.
    pub fn reason_to_str(&self) -> Option<&'static str> {
        disconnect::to_str(self.reason_code)
    }
}

impl fmt::Display for DisconnectError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Reason(self.reason_to_str(), self.reason_code, &self.description).fmt(f)
    }
}

/// Content of `SSH_MSG_CHANNEL_OPEN_FAILURE` (RFC 4254, section 5.1).
#[derive(Debug, Clone, thiserror::Error)]
pub struct ChannelOpenError {
    /// Reason code, see [`codes::open`][crate::codes::open].
    pub reason_code: u32,
    /// Description for humans.
    pub description: String,
    /// Language tag of `description` (RFC 3066).
    pub description_lang: String,
}

impl ChannelOpenError {
    /// Name of the [`reason_code`][Self::reason_code], if it is a known one.
    pub fn reason_to_str(&self) -> Option<&'static str> {
        open::to_str(self.reason_code)
    }
}

impl fmt::Display for ChannelOpenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Reason(self.reason_to_str(), self.reason_code, &self.description).fmt(f)
    }
}

struct Reason<'a>(Option<&'static str>, u32, &'a str);

impl fmt::Display for Reason<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let Reason(name, code, description) = *self;
        match name {
            Some(name) => write!(f, "{} (code {})", name, code)?,
            None => write!(f, "code {}", code)?,
        }
        if !description.is_empty() {
            write!(f, ": {:?}", description)?;
        }
        Ok(())
    }
}
