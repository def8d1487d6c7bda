use bytes::Bytes;
use futures_core::ready;
use parking_lot::Mutex;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use crate::codec::{PacketDecode, PacketEncode};
use crate::error::{Result, Error};
use super::channel::{
    Channel, ChannelReceiver, ChannelEvent, ChannelConfig, ChannelKind,
    ChannelReq, ChannelReply, DATA_STANDARD, DATA_STDERR,
};
use super::client::Client;

/// Interactive session: a remote process attached to a `session` channel (RFC 4254, section 6).
///
/// Open it with [`Client::open_session()`][super::Client::open_session]. The usual sequence is
/// zero or more [`env()`][Self::env()] requests, then exactly one of
/// [`shell()`][Self::shell()], [`exec()`][Self::exec()] and [`subsystem()`][Self::subsystem()],
/// then stdin data until [`send_eof()`][Self::send_eof()]. Output of the process arrives at the
/// [`SessionReceiver`].
///
/// Clones refer to the same session.
#[derive(Clone)]
pub struct Session {
    channel: Channel,
    exit_status: Arc<Mutex<Option<u32>>>,
}

impl Session {
    pub(super) async fn open(client: &Client, config: ChannelConfig)
        -> Result<(Session, SessionReceiver)>
    {
        let (channel, channel_rx, _) = client.open_channel(ChannelKind::Session, config).await?;
        let exit_status = Arc::new(Mutex::new(None));
        Ok((
            Session { channel, exit_status: exit_status.clone() },
            SessionReceiver { channel_rx, exit_status },
        ))
    }

    /// Sets an environment variable for the process that is yet to be started.
    pub fn env(&self, name: &str, value: &[u8]) -> Result<SessionReply> {
        self.request_with_reply("env", |p| {
            p.put_str(name);
            p.put_bytes(value);
        })
    }

    /// Starts the login shell of the user.
    pub fn shell(&self) -> Result<SessionReply> {
        self.request_with_reply("shell", |_| {})
    }

    /// Starts `command`.
    pub fn exec(&self, command: &[u8]) -> Result<SessionReply> {
        self.request_with_reply("exec", |p| p.put_bytes(command))
    }

    /// Starts a subsystem such as "sftp".
    pub fn subsystem(&self, subsystem_name: &str) -> Result<SessionReply> {
        self.request_with_reply("subsystem", |p| p.put_str(subsystem_name))
    }

    /// Sends a signal such as [`codes::signal::TERM`][crate::codes::signal::TERM] to the
    /// process. There is no reply.
    pub fn signal(&self, signal_name: &str) -> Result<()> {
        let mut payload = PacketEncode::new();
        payload.put_str(signal_name);
        self.channel.send_request(ChannelReq {
            request_type: "signal".into(),
            payload: payload.finish(),
            reply_tx: None,
        })
    }

    /// Writes `data` to the standard input of the process.
    ///
    /// Resolves once the data fit into the remote window and were queued for sending.
    pub async fn send_stdin(&self, data: Bytes) -> Result<()> {
        self.channel.send_data(data, DATA_STANDARD).await
    }

    /// Closes the standard input of the process.
    ///
    /// Succeeds quietly when the session is already closed.
    pub async fn send_eof(&self) -> Result<()> {
        self.channel.send_eof().await
    }

    /// Closes the session; calling it again does nothing.
    pub fn close(&self) {
        self.channel.close()
    }

    /// Exit status of the process, once the [`SessionReceiver`] received it.
    pub fn exit_status(&self) -> Option<u32> {
        *self.exit_status.lock()
    }

    fn request_with_reply(&self, request_type: &str, encode: impl FnOnce(&mut PacketEncode))
        -> Result<SessionReply>
    {
        let mut payload = PacketEncode::new();
        encode(&mut payload);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.channel.send_request(ChannelReq {
            request_type: request_type.into(),
            payload: payload.finish(),
            reply_tx: Some(reply_tx),
        })?;
        Ok(SessionReply { reply_rx })
    }
}

/// Pending reply to a [`Session`] request.
#[derive(Debug)]
#[must_use = "call .want_reply() to learn whether the request succeeded, or .no_reply()"]
pub struct SessionReply {
    reply_rx: oneshot::Receiver<ChannelReply>,
}

impl SessionReply {
    /// Waits for the reply; a refusal is [`Error::ChannelReq`].
    pub async fn want_reply(self) -> Result<()> {
        match self.reply_rx.await {
            Ok(ChannelReply::Success) => Ok(()),
            Ok(ChannelReply::Failure) => Err(Error::ChannelReq),
            Err(_) => Err(Error::ChannelClosed),
        }
    }

    /// Discards the reply.
    pub fn no_reply(self) {}
}

/// Output of a remote process, received from [`SessionReceiver`].
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionEvent {
    /// Bytes written to stdout. Event boundaries carry no meaning.
    StdoutData(Bytes),
    /// Bytes written to stderr.
    StderrData(Bytes),
    /// The process will write no more output.
    Eof,
    /// The process exited normally.
    ExitStatus(u32),
    /// The process was killed by a signal.
    ExitSignal(ExitSignal),
}

/// Payload of the "exit-signal" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitSignal {
    /// Signal name without the "SIG" prefix.
    pub signal_name: String,
    pub core_dumped: bool,
    pub message: String,
    /// RFC 3066 language tag of `message`.
    pub message_lang: String,
}

/// Receiving half of a [`Session`].
///
/// Events must be received continuously; while the buffer is full, the whole client stalls.
pub struct SessionReceiver {
    channel_rx: ChannelReceiver,
    exit_status: Arc<Mutex<Option<u32>>>,
}

impl SessionReceiver {
    /// Waits for the next event, `None` after the session closed.
    pub async fn recv(&mut self) -> Result<Option<SessionEvent>> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    pub fn poll_recv(&mut self, cx: &mut Context) -> Poll<Result<Option<SessionEvent>>> {
        while let Some(channel_event) = ready!(self.channel_rx.poll_recv(cx)) {
            let Some(event) = session_event(channel_event)? else { continue };
            if let SessionEvent::ExitStatus(status) = event {
                *self.exit_status.lock() = Some(status);
            }
            return Poll::Ready(Ok(Some(event)))
        }
        Poll::Ready(Ok(None))
    }
}

fn session_event(event: ChannelEvent) -> Result<Option<SessionEvent>> {
    let req = match event {
        ChannelEvent::Data(data, DATA_STANDARD) => return Ok(Some(SessionEvent::StdoutData(data))),
        ChannelEvent::Data(data, DATA_STDERR) => return Ok(Some(SessionEvent::StderrData(data))),
        ChannelEvent::Data(_, data_type) => {
            log::debug!("session data of type {:?} ignored", data_type);
            return Ok(None)
        },
        ChannelEvent::Eof => return Ok(Some(SessionEvent::Eof)),
        ChannelEvent::Request(req) => req,
    };

    let mut payload = PacketDecode::new(req.payload);
    let event = match req.request_type.as_str() {
        "exit-status" => SessionEvent::ExitStatus(payload.get_u32()?),
        "exit-signal" => SessionEvent::ExitSignal(ExitSignal {
            signal_name: payload.get_string()?,
            core_dumped: payload.get_bool()?,
            message: payload.get_string()?,
            message_lang: payload.get_string()?,
        }),
        other => {
            // the dropped `reply_tx` turns into CHANNEL_FAILURE
            log::debug!("session request {:?} ignored", other);
            return Ok(None)
        },
    };

    if let Some(reply_tx) = req.reply_tx {
        let _: Result<_, _> = reply_tx.send(ChannelReply::Success);
    }
    Ok(Some(event))
}
