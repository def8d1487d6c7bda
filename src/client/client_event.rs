use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Weak;
use tokio::sync::oneshot;
use crate::error::{Result, Error, ChannelOpenError};
use crate::pubkey::Pubkey;
use super::channel::{self, Channel, ChannelReceiver, ChannelConfig};
use super::client_state::ClientState;
use super::conn::{AcceptedChannel, AcceptedChannelResult};

/// An event returned from [`ClientReceiver`][super::ClientReceiver].
///
/// These are "global" events that are related to the SSH connection, not to a particular
/// channel. You can safely ignore all events except [`ServerPubkey`][Self::ServerPubkey], which
/// you must handle in order to accept or reject the server's host key (if you don't handle this
/// event, the key will be rejected and we will abort the connection).
///
/// This enum is marked as `#[non_exhaustive]`, so that we can add new variants without breaking
/// backwards compatibility.
#[non_exhaustive]
#[derive(Debug)]
pub enum ClientEvent {
    /// Server presented its host key and you should verify it.
    ///
    /// This event is produced as part of every key exchange, so you will receive it during the
    /// initial handshake and again after each rekey. We have already verified that the server
    /// owns the private key (the signature of the exchange hash is valid); you decide whether
    /// this key belongs to the server that you wanted to connect to.
    ServerPubkey(ServerHostKey, AcceptPubkeySender),

    /// Server sent us a debugging message (`SSH_MSG_DEBUG`, RFC 4253, section 11.3).
    DebugMsg(DebugMsg),

    /// Server sent a text that the user should see before authentication
    /// (`SSH_MSG_USERAUTH_BANNER`, RFC 4252, section 5.2).
    AuthBanner(AuthBanner),

    /// Server wants to open a channel.
    ///
    /// If you ignore this event, the channel is rejected.
    Channel(AcceptChannel),
}

/// Host key of the server, as presented to the host key verification hook.
#[derive(Debug, Clone)]
pub struct ServerHostKey {
    /// The hostname from [`ClientConfig::hostname`][super::ClientConfig::hostname].
    pub hostname: String,
    /// Type of the key, such as `"ssh-ed25519"`.
    pub key_type: &'static str,
    /// The key in SSH wire encoding.
    pub blob: Bytes,
    /// The `SHA256:` fingerprint of [`blob`][Self::blob].
    pub fingerprint: String,
    /// The decoded key.
    pub pubkey: Pubkey,
}

/// Debugging message sent by the SSH server.
#[derive(Debug)]
pub struct DebugMsg {
    /// If true, you should display this message.
    pub always_display: bool,
    /// The debugging message string.
    pub message: String,
    /// Language tag of the message (as in RFC 3066).
    pub message_lang: String,
}

/// Banner message sent by the SSH server.
#[derive(Debug)]
pub struct AuthBanner {
    /// The banner message string.
    pub message: String,
    /// Language tag of the message (per RFC 3066).
    pub message_lang: String,
}

/// Verdict about the server host key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HostKeyVerdict {
    /// The key is trusted for this connection.
    Accept,
    /// The key is trusted and the application should remember it for future connections.
    AcceptAndRemember,
}

/// Tell us whether the server host key is valid.
///
/// You receive this object in [`ClientEvent::ServerPubkey`]. If you drop it, it is treated as
/// rejection.
#[derive(Debug)]
pub struct AcceptPubkeySender {
    pub(super) accept_tx: oneshot::Sender<Result<HostKeyVerdict>>,
}

impl AcceptPubkeySender {
    /// Accept the server host key for this connection.
    pub fn accept(self) {
        let _ = self.accept_tx.send(Ok(HostKeyVerdict::Accept));
    }

    /// Accept the server host key and ask to remember it.
    ///
    /// The verdict is available from [`Client::host_key_verdict()`][super::Client::host_key_verdict()],
    /// storing the key is up to you.
    pub fn accept_and_remember(self) {
        let _ = self.accept_tx.send(Ok(HostKeyVerdict::AcceptAndRemember));
    }

    /// Reject the server host key.
    ///
    /// The connection will be aborted with error `Error::PubkeyAccept(Box::new(err))`.
    pub fn reject<E: std::error::Error + Send + Sync + 'static>(self, err: E) {
        let _ = self.accept_tx.send(Err(Error::PubkeyAccept(Box::new(err))));
    }
}

/// Request from the server to open a channel.
///
/// You receive this object in [`ClientEvent::Channel`] and either
/// [`accept()`][Self::accept()] or [`reject()`][Self::reject()] the channel. Dropping it rejects
/// the channel with reason "administratively prohibited".
#[derive(Debug)]
pub struct AcceptChannel {
    pub(super) client_st: Option<Weak<Mutex<ClientState>>>,
    /// Type of the channel, such as `"x11"` or `"forwarded-tcpip"`.
    pub channel_type: String,
    /// Type-specific data of the `SSH_MSG_CHANNEL_OPEN` request.
    pub open_payload: Bytes,
    pub(super) accepted_tx: oneshot::Sender<Result<AcceptedChannel, ChannelOpenError>>,
}

impl AcceptChannel {
    /// Accepts the channel.
    ///
    /// The `confirm_payload` is appended to the `SSH_MSG_CHANNEL_OPEN_CONFIRMATION` packet (it
    /// is empty for the standard channel types).
    pub async fn accept(
        self,
        config: ChannelConfig,
        confirm_payload: Bytes,
    ) -> Result<(Channel, ChannelReceiver)> {
        let (result_tx, result_rx) = oneshot::channel();
        let accepted = AcceptedChannel {
            recv_window_max: config.recv_window_max,
            recv_packet_len_max: config.recv_packet_len_max,
            confirm_payload,
            result_tx,
        };
        self.accepted_tx.send(Ok(accepted)).map_err(|_| Error::ClientClosed)?;

        let AcceptedChannelResult { channel_st, event_rx } = result_rx.await
            .map_err(|_| Error::ClientClosed)?;
        let client_st = self.client_st.unwrap_or_default();
        Ok(channel::new_channel(client_st, channel_st, event_rx, &config))
    }

    /// Rejects the channel with the given error.
    pub fn reject(self, error: ChannelOpenError) {
        let _ = self.accepted_tx.send(Err(error));
    }
}
