//! Asynchronous SSH2 client transport and channel multiplexer in pure Rust.
//!
//! - Entry point for making SSH connections is the [`Client`]: it performs the version
//! exchange, key exchange (and later rekeying) and authentication over any
//! `tokio::io::AsyncRead + AsyncWrite` stream.
//! - Many [`Channel`]s (and [`Session`]s, which wrap a `"session"` channel) are multiplexed over
//! one connection, with per-channel flow control.
//! - Algorithms are described by static descriptors in [`kex`], [`pubkey`], [`cipher`], [`mac`]
//! and [`compress`]; you choose them in [`ClientConfig`].
//!
#![allow(clippy::box_default)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::unused_unit)]
#![allow(clippy::unit_arg)]
#![allow(clippy::module_inception)]
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]

pub use crate::client::{AuthFailure, AuthNoneResult, AuthPasswordResult, AuthPasswordPrompt};
pub use crate::client::{
    Channel, ChannelReceiver, ChannelEvent, ChannelReq, ChannelReply, ChannelConfig, ChannelKind,
    DataType, DATA_STANDARD, DATA_STDERR,
};
pub use crate::client::{Client, ClientReceiver, ClientFuture, ClientConfig, GlobalReq, GlobalReply};
pub use crate::client::{
    ClientEvent, ServerHostKey, AcceptPubkeySender, HostKeyVerdict, DebugMsg, AuthBanner,
    AcceptChannel,
};
pub use crate::client::{Session, SessionReceiver, SessionEvent, SessionReply, ExitSignal};
pub use crate::codec::{PacketEncode, PacketDecode};
pub use crate::error::{Result, Error, AlgoNegotiateError, DisconnectError, ChannelOpenError};

pub use self::cipher::CipherAlgo;
pub use self::compress::CompressAlgo;
pub use self::kex::KexAlgo;
pub use self::mac::MacAlgo;
pub use self::pubkey::{PubkeyAlgo, Pubkey};

pub use bytes;

pub mod cipher;
mod client;
mod codec;
pub mod codes;
pub mod compress;
mod error;
pub mod kex;
pub mod mac;
pub mod pubkey;
mod util;
