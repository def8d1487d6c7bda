use bytes::Bytes;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use tokio::sync::mpsc;
use tokio_util::io::poll_read_buf;
use tokio_util::sync::PollSender;
use crate::codec::{Codec, RecvPipe, SendPipe, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result, DisconnectError};
use crate::util::{AsyncReadWrite, CryptoRngCore};
use super::auth::{self, AuthState};
use super::client::ClientConfig;
use super::client_event::{ClientEvent, HostKeyVerdict};
use super::conn::{self, ConnState};
use super::negotiate::{self, NegotiateState};
use super::pump::Pump;
use super::recv::{self, RecvState};

pub(super) struct ClientState {
    pub config: ClientConfig,
    pub rng: Box<dyn CryptoRngCore + Send>,
    pub event_tx: PollSender<ClientEvent>,
    pub codec: Codec,
    pub our_ident: Bytes,
    pub their_ident: Option<Bytes>,
    lifecycle: Lifecycle,
    pub recv_st: Option<Box<dyn RecvState + Send>>,
    pub negotiate_st: Box<NegotiateState>,
    pub auth_st: Box<AuthState>,
    pub conn_st: Box<ConnState>,
    pub session_id: Option<Vec<u8>>,
    pub host_key_verdict: Option<HostKeyVerdict>,
    waker: Option<Waker>,
}

/// Where the connection stands with respect to shutting down.
#[derive(Debug)]
enum Lifecycle {
    Open,
    /// [`disconnect()`] was called, `SSH_MSG_DISCONNECT` is yet to be queued.
    Disconnecting(DisconnectError),
    /// `SSH_MSG_DISCONNECT` is queued, we only drain the send pipe.
    DisconnectSent,
    Closed,
}

type PumpFn = fn(&mut ClientState, &mut Context) -> Result<Pump>;

/// Protocol layers, in the order in which they are pumped.
const PROTOCOL_PUMPS: [PumpFn; 4] = [
    recv::pump_recv,
    negotiate::pump_negotiate,
    auth::pump_auth,
    conn::pump_conn,
];

pub(super) fn new_client(
    config: ClientConfig,
    mut rng: Box<dyn CryptoRngCore + Send>,
    event_tx: mpsc::Sender<ClientEvent>,
) -> Result<ClientState> {
    let mut send_pipe = SendPipe::new(&mut *rng)?;
    let our_ident = Bytes::copy_from_slice(config.client_ident.as_bytes());
    send_pipe.feed_ident(&our_ident);

    Ok(ClientState {
        config,
        rng,
        event_tx: PollSender::new(event_tx),
        codec: Codec { recv_pipe: RecvPipe::new(), send_pipe },
        our_ident,
        their_ident: None,
        lifecycle: Lifecycle::Open,
        recv_st: None,
        negotiate_st: Box::new(negotiate::init_negotiate()),
        auth_st: Box::new(auth::init_auth()),
        conn_st: Box::new(conn::init_conn()),
        session_id: None,
        host_key_verdict: None,
        waker: None,
    })
}

pub(super) fn poll_client(
    st: &mut ClientState,
    stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Poll<Result<()>> {
    if matches!(st.lifecycle, Lifecycle::Closed) {
        return Poll::Ready(Err(Error::ClientClosed))
    }

    let res = match drive(st, stream, cx) {
        Poll::Ready(res) => res,
        Poll::Pending => return Poll::Pending,
    };
    if let Err(err) = res.as_ref() {
        log::debug!("client failed: {}", err);
    }
    teardown(st);
    Poll::Ready(res)
}

fn drive(
    st: &mut ClientState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Poll<Result<()>> {
    st.lifecycle = match std::mem::replace(&mut st.lifecycle, Lifecycle::Closed) {
        Lifecycle::Disconnecting(error) => {
            send_disconnect(st, error)?;
            Lifecycle::DisconnectSent
        },
        lifecycle => lifecycle,
    };

    loop {
        let mut progress = Pump::Pending;
        if matches!(st.lifecycle, Lifecycle::Open) {
            progress |= pump_protocol(st, cx)?;
            if pump_read(st, stream.as_mut(), cx)?.is_progress() {
                continue
            }
        }
        while pump_write(st, stream.as_mut(), cx)?.is_progress() {
            progress = Pump::Progress;
        }
        if !progress.is_progress() {
            break
        }
    }

    let flushed = pump_flush(st, stream.as_mut(), cx)?;
    if flushed && matches!(st.lifecycle, Lifecycle::DisconnectSent) {
        return Poll::Ready(Ok(()))
    }

    st.waker = Some(cx.waker().clone());
    Poll::Pending
}

fn pump_protocol(st: &mut ClientState, cx: &mut Context) -> Result<Pump> {
    let mut progress = Pump::Pending;
    for pump in PROTOCOL_PUMPS {
        while pump(st, cx)?.is_progress() {
            progress = Pump::Progress;
        }
    }
    Ok(progress)
}

/// Fails every pending operation, so that all waiters wake up with an error.
fn teardown(st: &mut ClientState) {
    st.lifecycle = Lifecycle::Closed;
    st.recv_st = None;
    negotiate::teardown(st);
    auth::teardown(st);
    conn::teardown(st);
    st.event_tx.close();
    st.waker = None;
}

/// True once the client stopped accepting new work (it may still be flushing a disconnect).
pub(super) fn is_closed(st: &ClientState) -> bool {
    !matches!(st.lifecycle, Lifecycle::Open)
}

pub(super) fn wakeup_client(st: &mut ClientState) {
    if let Some(waker) = st.waker.take() {
        waker.wake();
    }
}

fn pump_read(
    st: &mut ClientState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<Pump> {
    if st.their_ident.is_none() {
        let ident = pump_ready!(poll_read(st, stream.as_mut(), cx, RecvPipe::consume_ident))?;
        // copy out of the receive buffer, so that the buffer can be reused
        let ident = Bytes::copy_from_slice(&ident);
        log::debug!("received server identification {:?}", String::from_utf8_lossy(&ident));
        check_version(&ident)?;
        st.their_ident = Some(ident);
        return Ok(Pump::Progress)
    }

    // the previous packet is still being handled
    if st.recv_st.is_some() {
        return Ok(Pump::Pending)
    }

    let packet = pump_ready!(poll_read(st, stream.as_mut(), cx, RecvPipe::consume_packet))?;
    st.recv_st = recv::recv_packet(st, packet)?;
    Ok(Pump::Progress)
}

/// Accepts "SSH-2.0-" and "SSH-1.99-" (RFC 4253, section 5.1).
fn check_version(ident: &[u8]) -> Result<()> {
    for prefix in [&b"SSH-2.0-"[..], &b"SSH-1.99-"[..]] {
        if ident.starts_with(prefix) {
            return Ok(())
        }
    }
    Err(Error::Version(String::from_utf8_lossy(ident).into_owned()))
}

fn poll_read<T>(
    st: &mut ClientState,
    mut stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
    consume: fn(&mut RecvPipe) -> Result<Option<T>>,
) -> Poll<Result<T>> {
    loop {
        if let Some(value) = consume(&mut st.codec.recv_pipe)? {
            return Poll::Ready(Ok(value))
        }

        let read_buf = st.codec.recv_pipe.feed_buf();
        let read_len = match poll_read_buf(Pin::new(&mut stream), cx, read_buf) {
            Poll::Ready(Ok(read_len)) => read_len,
            Poll::Ready(Err(err)) => {
                log::debug!("read failed: {}", err);
                return Poll::Ready(Err(Error::ReadIo(err)))
            },
            Poll::Pending => return Poll::Pending,
        };

        if read_len == 0 {
            log::debug!("server closed the connection");
            return Poll::Ready(Err(Error::PeerClosed))
        }
        log::trace!("read {} bytes", read_len);
    }
}

fn pump_write(
    st: &mut ClientState,
    stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<Pump> {
    let data = st.codec.send_pipe.peek_bytes();
    if data.is_empty() {
        return Ok(Pump::Pending)
    }

    let written_len = match stream.poll_write(cx, data) {
        Poll::Ready(Ok(0)) => {
            let err = io::Error::from(io::ErrorKind::WriteZero);
            return Err(Error::WriteIo(err))
        },
        Poll::Ready(Ok(written_len)) => written_len,
        Poll::Ready(Err(err)) => {
            log::debug!("write failed: {}", err);
            return Err(Error::WriteIo(err))
        },
        Poll::Pending => return Ok(Pump::Pending),
    };

    log::trace!("wrote {} of {} bytes", written_len, data.len());
    st.codec.send_pipe.consume_bytes(written_len);
    Ok(Pump::Progress)
}

/// Returns true when everything we produced has reached the stream.
fn pump_flush(
    st: &mut ClientState,
    stream: Pin<&mut dyn AsyncReadWrite>,
    cx: &mut Context,
) -> Result<bool> {
    match stream.poll_flush(cx) {
        Poll::Ready(Ok(())) => Ok(st.codec.send_pipe.is_empty()),
        Poll::Ready(Err(err)) => Err(Error::WriteIo(err)),
        Poll::Pending => Ok(false),
    }
}

pub(super) fn disconnect(st: &mut ClientState, error: DisconnectError) -> Result<()> {
    if is_closed(st) {
        return Err(Error::ClientDisconnected)
    }
    st.lifecycle = Lifecycle::Disconnecting(error);
    wakeup_client(st);
    Ok(())
}

fn send_disconnect(st: &mut ClientState, error: DisconnectError) -> Result<()> {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::DISCONNECT);
    payload.put_u32(error.reason_code);
    payload.put_str(&error.description);
    payload.put_str(&error.description_lang);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_DISCONNECT, reason {}", error.reason_code);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_version() {
        assert!(check_version(b"SSH-2.0-OpenSSH_9.3").is_ok());
        assert!(check_version(b"SSH-1.99-Cisco-1.25").is_ok());
        assert!(matches!(check_version(b"SSH-1.5-old"), Err(Error::Version(_))));
        assert!(matches!(check_version(b"SSH-2.0"), Err(Error::Version(_))));
    }
}
