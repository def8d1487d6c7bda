use bytes::Bytes;
use parking_lot::Mutex;
use pin_project::pin_project;
use rand::rngs::OsRng;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use crate::cipher::{self, CipherAlgo};
use crate::compress::{self, CompressAlgo};
use crate::error::{Error, Result, DisconnectError};
use crate::kex::{self, KexAlgo};
use crate::mac::{self, MacAlgo};
use crate::pubkey::{self, PubkeyAlgo};
use super::{auth, negotiate};
use super::auth_method::none::{AuthNone, AuthNoneResult};
use super::auth_method::password::{AuthPassword, AuthPasswordResult};
use super::channel::{self, Channel, ChannelReceiver, ChannelConfig, ChannelKind};
use super::client_event::{ClientEvent, HostKeyVerdict};
use super::client_state::{self, ClientState};
use super::conn::{self, OpenChannel, OpenChannelResult};
use super::session::{Session, SessionReceiver};

/// Client side of one SSH connection.
///
/// [`Client::open()`] splits the connection into three parts: this handle issues commands,
/// [`ClientReceiver`] yields what the server initiates, and [`ClientFuture`] owns the stream and
/// does all reads and writes. After authentication, any number of channels and sessions share
/// the connection.
///
/// Clones are cheap and refer to the same connection.
#[derive(Clone)]
pub struct Client {
    client_st: Weak<Mutex<ClientState>>,
}

impl Client {
    /// Starts a connection over `stream`, which is typically a `tokio::net::TcpStream`.
    ///
    /// No I/O happens here. Nothing happens at all until [`ClientFuture`] is polled, so it is
    /// usually spawned as a task. [`ClientReceiver`] must be drained as well: the handshake waits
    /// for the verdict on [`ClientEvent::ServerPubkey`], and a full event buffer stalls the
    /// connection.
    pub fn open<IO>(stream: IO, config: ClientConfig) -> Result<(Client, ClientReceiver, ClientFuture<IO>)>
        where IO: AsyncRead + AsyncWrite
    {
        let rng = Box::new(OsRng);
        let (event_tx, event_rx) = mpsc::channel(1);
        let client_st = client_state::new_client(config, rng, event_tx)?;
        let client_st = Arc::new(Mutex::new(client_st));

        let client = Client { client_st: Arc::downgrade(&client_st) };
        let client_rx = ClientReceiver { client_st: Arc::downgrade(&client_st), event_rx };
        let client_fut = ClientFuture { client_st, stream };
        Ok((client, client_rx, client_fut))
    }

    /// Runs `f` on the client state, unless the client is already closed.
    fn with_state<T, F>(&self, f: F) -> Result<T>
        where F: FnOnce(&mut ClientState) -> Result<T>
    {
        let client_st = self.client_st.upgrade().ok_or(Error::ClientClosed)?;
        let mut st = client_st.lock();
        if client_state::is_closed(&st) {
            return Err(Error::ClientClosed)
        }
        f(&mut st)
    }

    /// Error for a waiter whose sender was dropped.
    fn closed_error(&self, otherwise: Error) -> Error {
        match self.client_st.upgrade() {
            Some(client_st) if !client_state::is_closed(&client_st.lock()) => otherwise,
            _ => Error::ClientClosed,
        }
    }

    /// Authenticates with the "none" method (RFC 4252, section 5.2).
    ///
    /// Servers normally refuse it, and the [`AuthFailure`][super::AuthFailure] lists the methods
    /// that the user may try. Fails with [`Error::AuthPending`] while another attempt runs.
    pub async fn auth_none(&self, username: String) -> Result<AuthNoneResult> {
        let (result_tx, result_rx) = oneshot::channel();
        let method = AuthNone::new(username, result_tx);
        self.with_state(|st| auth::start_method(st, Box::new(method)))?;
        result_rx.await.map_err(|_| Error::AuthAborted)
    }

    /// Authenticates with the "password" method (RFC 4252, section 8).
    pub async fn auth_password(&self, username: String, password: String) -> Result<AuthPasswordResult> {
        let (result_tx, result_rx) = oneshot::channel();
        let method = AuthPassword::new(username, password, result_tx);
        self.with_state(|st| auth::start_method(st, Box::new(method)))?;
        result_rx.await.map_err(|_| Error::AuthAborted)
    }

    /// True after a successful authentication attempt.
    pub fn is_authenticated(&self) -> Result<bool> {
        self.with_state(|st| Ok(auth::is_authenticated(st)))
    }

    /// Returns true if the connection is closed or closing.
    pub fn is_closed(&self) -> bool {
        match self.client_st.upgrade() {
            Some(client_st) => client_state::is_closed(&client_st.lock()),
            None => true,
        }
    }

    /// Verdict of the host key verification hook for the current key, if the key was accepted.
    pub fn host_key_verdict(&self) -> Result<Option<HostKeyVerdict>> {
        self.with_state(|st| Ok(st.host_key_verdict))
    }

    /// Opens a [`Session`]. The open request waits until the user is authenticated.
    pub async fn open_session(&self, config: ChannelConfig) -> Result<(Session, SessionReceiver)> {
        Session::open(self, config).await
    }

    /// Opens a channel of any `kind` (RFC 4254, section 5.1).
    ///
    /// Resolves with both halves of the channel and the type-specific data of the confirmation.
    /// A refusal is [`Error::ChannelOpen`], no answer within [`ChannelConfig::open_timeout`] is
    /// [`Error::OpenTimeout`]. The request is not sent before the user is authenticated.
    pub async fn open_channel(&self, kind: ChannelKind, config: ChannelConfig)
        -> Result<(Channel, ChannelReceiver, Bytes)>
    {
        let (result_tx, result_rx) = oneshot::channel();
        let open = OpenChannel {
            kind,
            recv_window_max: config.recv_window_max.clamp(1000, u32::MAX as usize),
            recv_packet_len_max: config.recv_packet_len_max.clamp(200, u32::MAX as usize),
            result_tx,
        };
        self.with_state(|st| Ok(conn::open_channel(st, open)))?;

        let result = match config.open_timeout {
            Some(timeout) => tokio::time::timeout(timeout, result_rx).await
                .map_err(|_| Error::OpenTimeout)?,
            None => result_rx.await,
        };
        let OpenChannelResult { channel_st, event_rx, confirm_payload } = result
            .map_err(|_| self.closed_error(Error::ChannelClosed))??;

        let (channel, channel_rx) = channel::new_channel(
            self.client_st.clone(), channel_st, event_rx, &config);
        Ok((channel, channel_rx, confirm_payload))
    }

    /// Queues `SSH_MSG_GLOBAL_REQUEST` (RFC 4254, section 4); the reply, if requested, arrives
    /// through [`GlobalReq::reply_tx`].
    pub fn send_request(&self, req: GlobalReq) -> Result<()> {
        self.with_state(|st| Ok(conn::send_request(st, req)))
    }

    /// Runs a new key exchange (RFC 4253, section 9) and waits until it finishes.
    ///
    /// Exchanges also start by themselves, see [`ClientConfig::rekey_after_bytes`] and
    /// [`ClientConfig::rekey_after_duration`]. If one is already running, this waits for it.
    pub async fn rekey(&self) -> Result<()> {
        let done_rx = self.with_state(|st| Ok(negotiate::start_rekey(st)))?;
        done_rx.await.map_err(|_| Error::RekeyAborted)?
    }

    /// Sends `SSH_MSG_DISCONNECT` with `error`, usually [`DisconnectError::by_app()`].
    ///
    /// [`ClientFuture`] resolves once the message is written.
    pub fn disconnect(&self, error: DisconnectError) -> Result<()> {
        let client_st = self.client_st.upgrade().ok_or(Error::ClientClosed)?;
        let mut st = client_st.lock();
        client_state::disconnect(&mut st, error)
    }
}


/// Global request that we send to the server.
#[derive(Debug)]
pub struct GlobalReq {
    /// Name of the request, such as `"tcpip-forward"`.
    pub request_type: String,
    /// Request-specific data.
    pub payload: Bytes,
    /// If set, we ask the server for a reply and send it here.
    pub reply_tx: Option<oneshot::Sender<GlobalReply>>,
}

/// Reply of the server to a [`GlobalReq`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalReply {
    /// `SSH_MSG_REQUEST_SUCCESS` with the response-specific data.
    Success(Bytes),
    /// `SSH_MSG_REQUEST_FAILURE`.
    Failure,
}


/// Stream of [`ClientEvent`]s of a [`Client`].
///
/// The buffer holds a single event; the connection stalls until it is received.
pub struct ClientReceiver {
    client_st: Weak<Mutex<ClientState>>,
    event_rx: mpsc::Receiver<ClientEvent>,
}

impl ClientReceiver {
    /// Next event, `None` once the connection closed.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Option<ClientEvent>> {
        self.event_rx.poll_recv(cx).map(|event| event.map(|event| match event {
            ClientEvent::Channel(mut accept) => {
                accept.client_st = Some(self.client_st.clone());
                ClientEvent::Channel(accept)
            },
            event => event,
        }))
    }
}


/// Owner of the stream; polling it runs the whole connection.
///
/// Resolves with `Ok` after our disconnect was written, or with the error that ended the
/// connection.
#[pin_project]
pub struct ClientFuture<IO> {
    client_st: Arc<Mutex<ClientState>>,
    #[pin] stream: IO,
}

impl<IO> ClientFuture<IO> {
    /// Returns the stream.
    pub fn into_stream(self) -> IO {
        self.stream
    }
}

impl<IO> Future for ClientFuture<IO>
    where IO: AsyncRead + AsyncWrite
{
    type Output = Result<()>;
    fn poll(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<()>> {
        let this = self.project();
        let mut client_st = this.client_st.lock();
        client_state::poll_client(&mut client_st, this.stream, cx)
    }
}


/// Settings of a [`Client`].
///
/// Build it from [`ClientConfig::default()`] or
/// [`ClientConfig::default_compatible_less_secure()`] and adjust it with [`ClientConfig::with()`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    /// Name of the server, as reported in [`ServerHostKey`][super::ServerHostKey].
    pub hostname: String,

    /// Our identification line, without the trailing CR LF (RFC 4253, section 4.2).
    pub client_ident: String,

    /// [Key exchanges][crate::kex] to offer, most preferred first.
    pub kex_algos: Vec<&'static KexAlgo>,

    /// [Host key algorithms][crate::pubkey] to offer.
    pub server_pubkey_algos: Vec<&'static PubkeyAlgo>,

    /// [Ciphers][crate::cipher] to offer.
    pub cipher_algos: Vec<&'static CipherAlgo>,

    /// [MACs][crate::mac] to offer.
    pub mac_algos: Vec<&'static MacAlgo>,

    /// [Compression methods][crate::compress] to offer.
    pub compression_algos: Vec<&'static CompressAlgo>,

    /// Rekey once this many bytes were sent and received since the last exchange.
    ///
    /// Capped at the default of 2^30.
    pub rekey_after_bytes: u64,

    /// Start key re-exchange after this amount of time (one hour by default).
    pub rekey_after_duration: Duration,

    /// How long a data write may wait for a key exchange to finish.
    ///
    /// After this timeout, [`Channel::send_data()`] fails with [`Error::RekeyTimeout`].
    pub rekey_timeout: Duration,

    /// Interval between keepalive requests, `None` to disable keepalives.
    pub keepalive_interval: Option<Duration>,

    /// Number of unanswered keepalive requests after which the connection fails with
    /// [`Error::KeepaliveTimeout`]. Zero means that keepalives are sent but never time out.
    pub keepalive_count_max: u32,

    /// Level of zlib compression (0 to 9).
    pub compression_level: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            hostname: String::new(),
            client_ident: format!("SSH-2.0-sshpipe_{}", env!("CARGO_PKG_VERSION")),
            kex_algos: vec![
                &kex::CURVE25519_SHA256, &kex::CURVE25519_SHA256_LIBSSH,
                &kex::ECDH_SHA2_NISTP256, &kex::ECDH_SHA2_NISTP384, &kex::ECDH_SHA2_NISTP521,
                &kex::DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256,
                &kex::DIFFIE_HELLMAN_GROUP16_SHA512, &kex::DIFFIE_HELLMAN_GROUP14_SHA256,
            ],
            server_pubkey_algos: vec![
                &pubkey::SSH_ED25519,
                &pubkey::ECDSA_SHA2_NISTP256, &pubkey::ECDSA_SHA2_NISTP384,
                &pubkey::ECDSA_SHA2_NISTP521,
                &pubkey::RSA_SHA2_256, &pubkey::RSA_SHA2_512,
            ],
            cipher_algos: vec![
                &cipher::AES128_CTR, &cipher::AES192_CTR, &cipher::AES256_CTR,
            ],
            mac_algos: vec![
                &mac::HMAC_SHA2_256, &mac::HMAC_SHA2_512,
            ],
            compression_algos: vec![
                &compress::NONE, &compress::ZLIB_OPENSSH,
            ],
            rekey_after_bytes: 1 << 30,
            rekey_after_duration: Duration::from_secs(60 * 60),
            rekey_timeout: Duration::from_secs(60),
            keepalive_interval: None,
            keepalive_count_max: 3,
            compression_level: 6,
        }
    }
}

impl ClientConfig {
    /// The default plus weak algorithms for old servers: SHA-1, the 1024-bit group, DSA and
    /// CBC ciphers.
    pub fn default_compatible_less_secure() -> ClientConfig {
        Self::default().with(|c| {
            c.kex_algos.extend_from_slice(&[
                &kex::DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1,
                &kex::DIFFIE_HELLMAN_GROUP14_SHA1,
                &kex::DIFFIE_HELLMAN_GROUP1_SHA1,
            ]);
            c.server_pubkey_algos.extend_from_slice(&[
                &pubkey::SSH_RSA_SHA1, &pubkey::SSH_DSS,
            ]);
            c.cipher_algos.extend_from_slice(&[
                &cipher::AES128_CBC, &cipher::AES192_CBC, &cipher::AES256_CBC,
            ]);
            c.mac_algos.extend_from_slice(&[
                &mac::HMAC_SHA1, &mac::HMAC_SHA1_96,
            ]);
        })
    }

    /// Applies `f` and returns the result, for builder-style configuration.
    pub fn with<F: FnOnce(&mut Self)>(mut self, f: F) -> Self {
        f(&mut self);
        self
    }
}
