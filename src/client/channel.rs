use bytes::Bytes;
use futures_core::ready;
use parking_lot::Mutex;
use std::cmp::{max, min};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use crate::codec::PacketEncode;
use crate::error::{Result, Error};
use super::channel_state::{self, ChannelState, ChannelSendData};
use super::client_state::{self, ClientState};
use super::negotiate;

/// Handle to an SSH channel.
///
/// Use this object to send requests and data over an SSH channel. To receive events and data
/// from the server, use the matching [`ChannelReceiver`]. To obtain an instance of [`Channel`] and
/// [`ChannelReceiver`], use [`Client::open_channel()`][super::Client::open_channel()] or accept a
/// channel opened by the server ([`AcceptChannel`][super::AcceptChannel]).
///
/// This gives you direct access to an SSH channel, as described in RFC 4254, section 5. If you
/// want to execute programs, consider using a [`Session`][super::Session].
///
/// You can cheaply clone this object and safely share the clones between tasks.
#[derive(Clone)]
pub struct Channel {
    client_st: Weak<Mutex<ClientState>>,
    channel_st: Weak<Mutex<ChannelState>>,
    write_timeout: Option<Duration>,
}

pub(super) fn new_channel(
    client_st: Weak<Mutex<ClientState>>,
    channel_st: Weak<Mutex<ChannelState>>,
    event_rx: mpsc::Receiver<ChannelEvent>,
    config: &ChannelConfig,
) -> (Channel, ChannelReceiver) {
    let channel = Channel {
        client_st: client_st.clone(),
        channel_st: channel_st.clone(),
        write_timeout: config.write_timeout,
    };
    let channel_rx = ChannelReceiver { client_st, channel_st, event_rx };
    (channel, channel_rx)
}

impl Channel {
    /// Send a request to the server.
    ///
    /// This sends a `SSH_MSG_CHANNEL_REQUEST` to the channel (RFC 4254, section 5.4). We simply
    /// enqueue the request and immediately return without any blocking, but you may use
    /// [`ChannelReq::reply_tx`] to wait for the reply. Requests are not subject to the flow
    /// control mechanism.
    pub fn send_request(&self, req: ChannelReq) -> Result<()> {
        let client_st = self.get_client_st()?;
        let mut st = client_st.lock();
        let channel_st = self.get_channel_st()?;
        let mut channel_st = channel_st.lock();
        channel_state::send_request(&mut st, &mut channel_st, req)
    }

    /// Send channel data to the server.
    ///
    /// This sends a series of `SSH_MSG_CHANNEL_DATA` or `SSH_MSG_CHANNEL_EXTENDED_DATA` (depending
    /// on `data_type`) to the channel (RFC 4254, section 5.2). We split `data` into packets that
    /// fit into the window and the maximum packet size of the peer.
    ///
    /// This method returns after all bytes have been accepted by the flow control mechanism and
    /// written to the internal send buffer, but before we send them to the socket.
    ///
    /// With [`ChannelConfig::write_timeout`], the method fails with [`Error::RekeyTimeout`] if a
    /// key exchange is blocking the channel, or with [`Error::WindowTimeout`] if the peer did not
    /// open the window in time. If none of the data was sent, it is discarded and you may retry.
    pub async fn send_data(&self, data: Bytes, data_type: DataType) -> Result<()> {
        let started = Instant::now();
        let sent_rx = self.send_channel_data(ChannelSendData::Data(data, data_type))?;
        self.wait_sent(sent_rx, started).await
    }

    /// Send end-of-file marker to the server.
    ///
    /// This sends `SSH_MSG_CHANNEL_EOF` to the channel (RFC 4254, section 5.3) after all data
    /// that was sent before. Calling this method again, or after the channel was closed, does
    /// nothing.
    pub async fn send_eof(&self) -> Result<()> {
        match self.try_send_eof().await {
            Ok(_) => Ok(()),
            Err(Error::ChannelClosed) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn try_send_eof(&self) -> Result<()> {
        let started = Instant::now();
        let sent_rx = {
            let client_st = self.get_client_st()?;
            let mut st = client_st.lock();
            let channel_st = self.get_channel_st()?;
            let mut channel_st = channel_st.lock();
            if channel_state::is_eof_queued(&channel_st) {
                return Ok(())
            }
            channel_state::send_data(&mut st, &mut channel_st, ChannelSendData::Eof)?
        };
        self.wait_sent(sent_rx, started).await
    }

    /// Close the channel.
    ///
    /// This sends `SSH_MSG_CHANNEL_CLOSE` to the channel (RFC 4254, section 5.3) and the channel
    /// becomes closed after we receive the same message from the server. We won't send any
    /// further requests or data.
    ///
    /// This method is idempotent: if the channel is already closed or closing, we do nothing.
    pub fn close(&self) {
        let (Ok(client_st), Ok(channel_st)) = (self.get_client_st(), self.get_channel_st())
            else { return };
        let mut st = client_st.lock();
        channel_state::close(&mut st, &mut channel_st.lock());
    }

    fn send_channel_data(&self, data: ChannelSendData) -> Result<oneshot::Receiver<()>> {
        let client_st = self.get_client_st()?;
        let mut st = client_st.lock();
        let channel_st = self.get_channel_st()?;
        let mut channel_st = channel_st.lock();
        channel_state::send_data(&mut st, &mut channel_st, data)
    }

    async fn wait_sent(&self, mut sent_rx: oneshot::Receiver<()>, started: Instant) -> Result<()> {
        loop {
            let (kex_started, rekey_timeout) = {
                let client_st = self.get_client_st()?;
                let st = client_st.lock();
                (negotiate::kex_started(&st), st.config.rekey_timeout)
            };

            // without a running kex, we check again after `rekey_timeout`, in case a kex starts
            let rekey_deadline = match kex_started {
                Some(kex_started) => max(started, kex_started) + rekey_timeout,
                None => Instant::now() + rekey_timeout,
            };
            let write_deadline = self.write_timeout.map(|timeout| started + timeout);
            let deadline = match write_deadline {
                Some(write_deadline) => min(write_deadline, rekey_deadline),
                None => rekey_deadline,
            };

            if let Ok(res) = tokio::time::timeout_at(deadline, &mut sent_rx).await {
                return res.map_err(|_| Error::ChannelClosed)
            }

            let now = Instant::now();
            if kex_started.is_some() && now >= rekey_deadline {
                return Err(Error::RekeyTimeout)
            }
            if write_deadline.map(|deadline| now >= deadline).unwrap_or(false) {
                log::debug!("timed out while waiting to send channel data");
                return Err(Error::WindowTimeout)
            }
        }
    }

    fn get_client_st(&self) -> Result<Arc<Mutex<ClientState>>> {
        self.client_st.upgrade().ok_or(Error::ClientClosed)
    }

    fn get_channel_st(&self) -> Result<Arc<Mutex<ChannelState>>> {
        self.channel_st.upgrade().ok_or(Error::ChannelClosed)
    }
}


/// Receiving half of a [`Channel`].
///
/// [`ChannelReceiver`] produces [`ChannelEvent`]s, which correspond to the requests and data sent
/// by the server on the channel. You **must** receive these events, otherwise the client will
/// stall when the internal buffer of events fills up.
///
/// Data is counted as consumed when it is returned from this object; consumed data is returned
/// to the peer's window.
#[derive(Debug)]
pub struct ChannelReceiver {
    client_st: Weak<Mutex<ClientState>>,
    channel_st: Weak<Mutex<ChannelState>>,
    event_rx: mpsc::Receiver<ChannelEvent>,
}

impl ChannelReceiver {
    /// Wait for the next event.
    ///
    /// Returns `None` if the channel was closed.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Poll-friendly variant of [`.recv()`][Self::recv()].
    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Option<ChannelEvent>> {
        let event = ready!(self.event_rx.poll_recv(cx));
        if let Some(ChannelEvent::Data(data, _)) = event.as_ref() {
            self.consume(data.len());
        }
        Poll::Ready(event)
    }

    fn consume(&self, len: usize) {
        let Some(channel_st) = self.channel_st.upgrade() else { return };
        // the channel must be unlocked before we lock the client
        let wakeup = channel_state::consume_data(&mut channel_st.lock(), len);
        if wakeup {
            if let Some(client_st) = self.client_st.upgrade() {
                client_state::wakeup_client(&mut client_st.lock());
            }
        }
    }
}


/// An event returned from [`ChannelReceiver`].
///
/// This enum is marked as `#[non_exhaustive]`, so that we can add new variants without breaking
/// backwards compatibility.
#[derive(Debug)]
#[non_exhaustive]
pub enum ChannelEvent {
    /// Request received from the server (`SSH_MSG_CHANNEL_REQUEST`, RFC 4254, section 5.4).
    ///
    /// Use [`ChannelReq::reply_tx`] to send a reply; if the server requested a reply but you drop
    /// the `reply_tx`, we send a failure reply. Replies are sent in the order of requests, so a
    /// slow reply stalls the replies to the following requests.
    Request(ChannelReq),

    /// Data received from the server (`SSH_MSG_CHANNEL_DATA` or
    /// `SSH_MSG_CHANNEL_EXTENDED_DATA`).
    ///
    /// Treat the data as a byte stream, the boundaries between events are arbitrary.
    Data(Bytes, DataType),

    /// End-of-file marker received from the server (`SSH_MSG_CHANNEL_EOF`).
    Eof,
}


/// Request on an SSH channel.
///
/// We use the same structure for requests that you send to the server (using
/// [`Channel::send_request()`]) and requests that we receive from the server (in
/// [`ChannelEvent::Request`]).
#[derive(Debug)]
pub struct ChannelReq {
    /// The type of the request, such as `"exec"` or `"exit-status"`.
    pub request_type: String,

    /// The raw type-specific request data.
    ///
    /// You may want to use [`PacketEncode`] to encode the payload or
    /// [`PacketDecode`][crate::PacketDecode] to decode it.
    pub payload: Bytes,

    /// The reply to the request.
    ///
    /// - For requests that you send, store a [`oneshot::Sender`] here to set the `want reply`
    /// flag; the reply from the server is sent to it.
    /// - For requests that we received, this is set if the server wants a reply. Dropping it
    /// sends a failure reply.
    pub reply_tx: Option<oneshot::Sender<ChannelReply>>,
}

/// Reply to a request on an SSH channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelReply {
    /// Successful reply (`SSH_MSG_CHANNEL_SUCCESS`).
    Success,
    /// Failure reply (`SSH_MSG_CHANNEL_FAILURE`).
    Failure,
}


/// Type of data sent over an SSH channel.
///
/// In practice, the only two data types used are `DataType::Standard` ([`DATA_STANDARD`]) and
/// `DataType::Extended(1)` ([`DATA_STDERR`]).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Standard channel data sent using `SSH_MSG_CHANNEL_DATA`.
    Standard,
    /// Extended channel data sent using `SSH_MSG_CHANNEL_EXTENDED_DATA`.
    Extended(u32),
}

/// Shorthand for `DataType::Standard`.
pub const DATA_STANDARD: DataType = DataType::Standard;

/// Shorthand for `DataType::Extended(1)`.
pub const DATA_STDERR: DataType = DataType::Extended(1);


/// Type of a channel that we open, with its type-specific data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// Interactive session (RFC 4254, section 6.1), see [`Session`][super::Session].
    Session,
    /// TCP/IP forwarding to `host:port` (RFC 4254, section 7.2).
    DirectTcpip {
        /// Host to connect to.
        host: String,
        /// Port to connect to.
        port: u32,
        /// Address of the machine from which the connection originated.
        originator_host: String,
        /// Port from which the connection originated.
        originator_port: u32,
    },
    /// Any other channel type, with raw type-specific data.
    Custom {
        /// Name of the channel type.
        channel_type: String,
        /// Data appended to `SSH_MSG_CHANNEL_OPEN`.
        payload: Bytes,
    },
}

impl ChannelKind {
    /// The channel type sent in `SSH_MSG_CHANNEL_OPEN`.
    pub fn channel_type(&self) -> &str {
        match self {
            ChannelKind::Session => "session",
            ChannelKind::DirectTcpip { .. } => "direct-tcpip",
            ChannelKind::Custom { channel_type, .. } => channel_type,
        }
    }

    pub(super) fn open_payload(&self) -> Bytes {
        match self {
            ChannelKind::Session => Bytes::new(),
            ChannelKind::DirectTcpip { host, port, originator_host, originator_port } => {
                let mut payload = PacketEncode::new();
                payload.put_str(host);
                payload.put_u32(*port);
                payload.put_str(originator_host);
                payload.put_u32(*originator_port);
                payload.finish()
            },
            ChannelKind::Custom { payload, .. } => payload.clone(),
        }
    }
}


/// Configuration of a channel.
///
/// This struct is `#[non_exhaustive]`, so start from `ChannelConfig::default()` and modify it
/// with [`with()`][Self::with()].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ChannelConfig {
    /// Maximal size of our receive window.
    ///
    /// This is the number of bytes that the peer may send before we consume them.
    pub recv_window_max: usize,

    /// Maximal packet size that we advertise to the peer.
    pub recv_packet_len_max: usize,

    /// How long we wait for the peer to confirm the channel.
    pub open_timeout: Option<Duration>,

    /// How long [`Channel::send_data()`] waits for the data to be accepted.
    pub write_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            recv_window_max: 0x100000,
            recv_packet_len_max: 0x4000,
            open_timeout: None,
            write_timeout: None,
        }
    }
}

impl ChannelConfig {
    /// Update the configuration in pseudo-builder pattern style.
    pub fn with<F: FnOnce(&mut Self)>(mut self, f: F) -> Self {
        f(&mut self);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PacketDecode;

    #[test]
    fn test_direct_tcpip_payload() {
        let kind = ChannelKind::DirectTcpip {
            host: "db.internal".into(),
            port: 5432,
            originator_host: "127.0.0.1".into(),
            originator_port: 40000,
        };
        assert_eq!(kind.channel_type(), "direct-tcpip");

        let mut payload = PacketDecode::new(kind.open_payload());
        assert_eq!(payload.get_string().unwrap(), "db.internal");
        assert_eq!(payload.get_u32().unwrap(), 5432);
        assert_eq!(payload.get_string().unwrap(), "127.0.0.1");
        assert_eq!(payload.get_u32().unwrap(), 40000);
        assert_eq!(payload.remaining_len(), 0);
    }

    #[test]
    fn test_session_and_custom_payload() {
        assert_eq!(ChannelKind::Session.channel_type(), "session");
        assert!(ChannelKind::Session.open_payload().is_empty());

        let kind = ChannelKind::Custom {
            channel_type: "auth-agent@openssh.com".into(),
            payload: Bytes::from_static(b"\x00\x01"),
        };
        assert_eq!(kind.channel_type(), "auth-agent@openssh.com");
        assert_eq!(kind.open_payload().as_ref(), b"\x00\x01");
    }
}
