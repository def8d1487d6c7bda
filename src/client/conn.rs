use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future as _;
use std::mem::replace;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{oneshot, mpsc};
use tokio::time::{Instant, Sleep};
use crate::codec::{PacketEncode, PacketDecode};
use crate::codes::{msg, open};
use crate::error::{Result, ChannelOpenError, Error};
use super::{auth, negotiate, recv};
use super::channel::{ChannelEvent, ChannelKind};
use super::channel_state::{self, ChannelState, ChannelInit};
use super::client::{GlobalReq, GlobalReply};
use super::client_event::{AcceptChannel, ClientEvent};
use super::client_state::{self, ClientState};
use super::pump::Pump;
use super::recv::ResultRecvState;

const KEEPALIVE_REQUEST: &str = "keepalive@sshpipe";

/// State of the connection protocol (RFC 4254): global requests and the channel table.
#[derive(Default)]
pub(super) struct ConnState {
    /// Channels requested by the user that have not been given an id yet.
    pending_opens: VecDeque<OpenChannel>,
    /// Channel table indexed by our channel id.
    ///
    /// The table has its own lock, so that packets for one channel can be handled while the
    /// client state is borrowed mutably.
    slots: Arc<Mutex<HashMap<u32, Slot>>>,
    outbox: VecDeque<Outgoing>,
    /// Requests that wait for `SSH_MSG_REQUEST_SUCCESS` or `SSH_MSG_REQUEST_FAILURE`, in order.
    awaiting_replies: VecDeque<Option<oneshot::Sender<GlobalReply>>>,
    keepalive: Keepalive,
}

#[derive(Default)]
struct Keepalive {
    timer: Option<Pin<Box<Sleep>>>,
    unanswered: u32,
}

enum Outgoing {
    Request(GlobalReq),
    Keepalive,
    RefuseRequest,
}

enum Slot {
    Opening(Opening),
    Accepting(Accepting),
    Live(Arc<Mutex<ChannelState>>),
    Gone,
}

struct Opening {
    our_id: u32,
    open: OpenChannel,
    sent: bool,
}

struct Accepting {
    our_id: u32,
    their_id: u32,
    send_window: usize,
    send_packet_len_max: usize,
    accepted_rx: oneshot::Receiver<Result<AcceptedChannel, ChannelOpenError>>,
}

pub(super) struct OpenChannel {
    pub kind: ChannelKind,
    pub recv_window_max: usize,
    pub recv_packet_len_max: usize,
    pub result_tx: oneshot::Sender<Result<OpenChannelResult>>,
}

pub(super) struct OpenChannelResult {
    pub channel_st: Weak<Mutex<ChannelState>>,
    pub event_rx: mpsc::Receiver<ChannelEvent>,
    pub confirm_payload: Bytes,
}

#[derive(Debug)]
pub(super) struct AcceptedChannel {
    pub recv_window_max: usize,
    pub recv_packet_len_max: usize,
    pub confirm_payload: Bytes,
    pub result_tx: oneshot::Sender<AcceptedChannelResult>,
}

#[derive(Debug)]
pub(super) struct AcceptedChannelResult {
    pub channel_st: Weak<Mutex<ChannelState>>,
    pub event_rx: mpsc::Receiver<ChannelEvent>,
}

pub(super) fn init_conn() -> ConnState {
    ConnState::default()
}

pub(super) fn pump_conn(st: &mut ClientState, cx: &mut Context) -> Result<Pump> {
    if !auth::is_authenticated(st) {
        return Ok(Pump::Pending)
    }

    pump_keepalive(st, cx)?;
    let mut progress = Pump::Pending;
    if negotiate::is_ready(st) {
        while let Some(outgoing) = st.conn_st.outbox.pop_front() {
            send_outgoing(st, outgoing)?;
            progress = Pump::Progress;
        }
    }
    progress |= pump_slots(st, cx)?;
    Ok(progress)
}

fn send_outgoing(st: &mut ClientState, outgoing: Outgoing) -> Result<()> {
    let mut payload = PacketEncode::new();
    match outgoing {
        Outgoing::Request(req) => {
            payload.put_u8(msg::GLOBAL_REQUEST);
            payload.put_str(&req.request_type);
            payload.put_bool(req.reply_tx.is_some());
            payload.put_raw(&req.payload);
            log::debug!("sending SSH_MSG_GLOBAL_REQUEST {:?}", req.request_type);
            if let Some(reply_tx) = req.reply_tx {
                st.conn_st.awaiting_replies.push_back(Some(reply_tx));
            }
        },
        Outgoing::Keepalive => {
            payload.put_u8(msg::GLOBAL_REQUEST);
            payload.put_str(KEEPALIVE_REQUEST);
            payload.put_bool(true);
            log::trace!("sending keepalive request");
            st.conn_st.awaiting_replies.push_back(None);
        },
        Outgoing::RefuseRequest => {
            payload.put_u8(msg::REQUEST_FAILURE);
            log::debug!("sending SSH_MSG_REQUEST_FAILURE");
        },
    }
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    Ok(())
}

fn pump_slots(st: &mut ClientState, cx: &mut Context) -> Result<Pump> {
    let slots = st.conn_st.slots.clone();
    let mut slots = slots.lock();
    let mut progress = Pump::Pending;

    while let Some(open) = st.conn_st.pending_opens.pop_front() {
        let our_id = free_channel_id(&slots)?;
        slots.insert(our_id, Slot::Opening(Opening { our_id, open, sent: false }));
        progress = Pump::Progress;
    }

    for slot in slots.values_mut() {
        while pump_slot(st, slot, cx)?.is_progress() {
            progress = Pump::Progress;
        }
    }
    slots.retain(|_, slot| !matches!(slot, Slot::Gone));
    Ok(progress)
}

fn pump_slot(st: &mut ClientState, slot: &mut Slot, cx: &mut Context) -> Result<Pump> {
    // the slot is taken out, every arm puts back what should stay in the table
    match replace(slot, Slot::Gone) {
        Slot::Opening(mut opening) => {
            if !opening.sent && opening.open.result_tx.is_closed() {
                log::debug!("nobody waits for our channel {} anymore, not opening it", opening.our_id);
                return Ok(Pump::Progress)
            }
            let progress = if !opening.sent && negotiate::is_ready(st) {
                send_channel_open(st, &opening)?;
                opening.sent = true;
                Pump::Progress
            } else {
                Pump::Pending
            };
            *slot = Slot::Opening(opening);
            Ok(progress)
        },
        Slot::Accepting(mut accepting) => {
            let decision = if negotiate::is_ready(st) {
                Pin::new(&mut accepting.accepted_rx).poll(cx)
            } else {
                Poll::Pending
            };
            match decision {
                Poll::Ready(Ok(Ok(accepted))) => {
                    send_channel_open_confirmation(st, &accepting, &accepted)?;
                    *slot = Slot::Live(start_accepted_channel(accepting, accepted));
                },
                Poll::Ready(Ok(Err(open_err))) => send_channel_open_failure(st, &accepting, open_err)?,
                Poll::Ready(Err(_)) => send_channel_open_failure(st, &accepting, ChannelOpenError {
                    reason_code: open::ADMINISTRATIVELY_PROHIBITED,
                    description: "channel was not accepted".into(),
                    description_lang: "".into(),
                })?,
                Poll::Pending => {
                    *slot = Slot::Accepting(accepting);
                    return Ok(Pump::Pending)
                },
            }
            Ok(Pump::Progress)
        },
        Slot::Live(channel_mutex) => {
            let (progress, closed) = {
                let mut channel_st = channel_mutex.lock();
                let progress = channel_state::pump_channel(st, &mut channel_st, cx)?;
                (progress, channel_state::is_closed(&channel_st))
            };
            if closed {
                return Ok(Pump::Progress)
            }
            *slot = Slot::Live(channel_mutex);
            Ok(progress)
        },
        Slot::Gone => Ok(Pump::Pending),
    }
}

pub(super) fn recv_conn_packet(
    st: &mut ClientState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    match msg_id {
        msg::GLOBAL_REQUEST => recv_global_request(st, payload),
        msg::REQUEST_SUCCESS => recv_request_reply(st, GlobalReply::Success(payload.remaining())),
        msg::REQUEST_FAILURE => recv_request_reply(st, GlobalReply::Failure),
        msg::CHANNEL_OPEN => recv_channel_open(st, payload),
        msg::CHANNEL_OPEN_CONFIRMATION => recv_channel_open_confirmation(st, payload),
        msg::CHANNEL_OPEN_FAILURE => recv_channel_open_failure(st, payload),
        msg::CHANNEL_WINDOW_ADJUST | msg::CHANNEL_DATA | msg::CHANNEL_EXTENDED_DATA |
        msg::CHANNEL_EOF | msg::CHANNEL_CLOSE | msg::CHANNEL_REQUEST |
        msg::CHANNEL_SUCCESS | msg::CHANNEL_FAILURE => recv_channel_msg(st, msg_id, payload),
        _ => Err(Error::PacketNotImplemented(msg_id)),
    }
}

/// Routes a message addressed to an open channel.
fn recv_channel_msg(st: &mut ClientState, msg_id: u8, payload: &mut PacketDecode) -> ResultRecvState {
    let our_id = payload.get_u32()?;
    let channel_mutex = match st.conn_st.slots.lock().get(&our_id) {
        Some(Slot::Live(channel_mutex)) => channel_mutex.clone(),
        Some(_) => return Err(Error::Protocol("received a channel message for a channel that is not open")),
        None => return Err(Error::Protocol("received a channel message for an unknown channel")),
    };

    let recv_st = channel_state::recv_channel_msg(&channel_mutex, msg_id, payload)?;
    // the message may have unblocked something that the channel wants to send
    client_state::wakeup_client(st);
    Ok(recv_st)
}

pub(super) fn open_channel(st: &mut ClientState, open: OpenChannel) {
    st.conn_st.pending_opens.push_back(open);
    client_state::wakeup_client(st);
}

/// Returns the lowest channel id that is not in use.
fn free_channel_id(slots: &HashMap<u32, Slot>) -> Result<u32> {
    (0..=u32::MAX).find(|id| !slots.contains_key(id))
        .ok_or(Error::Protocol("all channel ids are in use"))
}

fn send_channel_open(st: &mut ClientState, opening: &Opening) -> Result<()> {
    let kind = &opening.open.kind;
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::CHANNEL_OPEN);
    payload.put_str(kind.channel_type());
    payload.put_u32(opening.our_id);
    payload.put_u32(opening.open.recv_window_max as u32);
    payload.put_u32(opening.open.recv_packet_len_max as u32);
    payload.put_raw(&kind.open_payload());
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_CHANNEL_OPEN {:?}, our channel {}", kind.channel_type(), opening.our_id);
    Ok(())
}

/// Removes the channel `our_id` from the table, provided that it is still waiting for the peer
/// to confirm it.
fn take_opening(st: &mut ClientState, our_id: u32) -> Result<Opening> {
    let mut slots = st.conn_st.slots.lock();
    match slots.remove(&our_id) {
        Some(Slot::Opening(opening)) if opening.sent => Ok(opening),
        Some(other) => {
            slots.insert(our_id, other);
            Err(Error::Protocol("received a reply to channel open for a channel that is not being opened"))
        },
        None => Err(Error::Protocol("received a reply to channel open for an unknown channel")),
    }
}

fn recv_channel_open_confirmation(st: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    let our_id = payload.get_u32()?;
    let their_id = payload.get_u32()?;
    let send_window = payload.get_u32()? as usize;
    let send_packet_len_max = payload.get_u32()? as usize;
    let confirm_payload = payload.remaining();
    log::debug!("received SSH_MSG_CHANNEL_OPEN_CONFIRMATION, our channel {}, their channel {}, \
        window {}, max packet {}", our_id, their_id, send_window, send_packet_len_max);

    let opening = take_opening(st, our_id)?;
    let (channel_mutex, event_rx) = start_channel(ChannelInit {
        our_id,
        their_id,
        send_window,
        send_len_max: usable_packet_len(send_packet_len_max),
        recv_window_max: opening.open.recv_window_max,
    });
    let result = OpenChannelResult {
        channel_st: Arc::downgrade(&channel_mutex),
        event_rx,
        confirm_payload,
    };
    if opening.open.result_tx.send(Ok(result)).is_err() {
        log::debug!("nobody waits for our channel {} anymore, closing it", our_id);
        channel_state::abandon(&mut channel_mutex.lock());
    }

    st.conn_st.slots.lock().insert(our_id, Slot::Live(channel_mutex));
    client_state::wakeup_client(st);
    Ok(None)
}

fn recv_channel_open_failure(st: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    let our_id = payload.get_u32()?;
    let error = ChannelOpenError {
        reason_code: payload.get_u32()?,
        description: payload.get_string()?,
        description_lang: payload.get_string()?,
    };
    log::debug!("received SSH_MSG_CHANNEL_OPEN_FAILURE, our channel {}: {}", our_id, error);

    let opening = take_opening(st, our_id)?;
    let _: Result<_, _> = opening.open.result_tx.send(Err(Error::ChannelOpen(error)));
    Ok(None)
}

fn recv_channel_open(st: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    let channel_type = payload.get_string()?;
    let their_id = payload.get_u32()?;
    let send_window = payload.get_u32()? as usize;
    let send_packet_len_max = payload.get_u32()? as usize;
    let open_payload = payload.remaining();

    let (accepted_tx, accepted_rx) = oneshot::channel();
    let our_id = {
        let mut slots = st.conn_st.slots.lock();
        let our_id = free_channel_id(&slots)?;
        let accepting = Accepting { our_id, their_id, send_window, send_packet_len_max, accepted_rx };
        slots.insert(our_id, Slot::Accepting(accepting));
        our_id
    };
    log::debug!("received SSH_MSG_CHANNEL_OPEN {:?}, their channel {}, assigned our channel {}",
        channel_type, their_id, our_id);

    // `ClientReceiver` attaches the client before the event reaches the user
    let accept = AcceptChannel { client_st: None, channel_type, open_payload, accepted_tx };
    recv::send_event(ClientEvent::Channel(accept))
}

fn start_accepted_channel(accepting: Accepting, accepted: AcceptedChannel) -> Arc<Mutex<ChannelState>> {
    let (channel_mutex, event_rx) = start_channel(ChannelInit {
        our_id: accepting.our_id,
        their_id: accepting.their_id,
        send_window: accepting.send_window,
        send_len_max: usable_packet_len(accepting.send_packet_len_max),
        recv_window_max: accepted.recv_window_max,
    });
    let result = AcceptedChannelResult { channel_st: Arc::downgrade(&channel_mutex), event_rx };
    if accepted.result_tx.send(result).is_err() {
        channel_state::abandon(&mut channel_mutex.lock());
    }
    channel_mutex
}

fn send_channel_open_confirmation(
    st: &mut ClientState,
    accepting: &Accepting,
    accepted: &AcceptedChannel,
) -> Result<()> {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::CHANNEL_OPEN_CONFIRMATION);
    payload.put_u32(accepting.their_id);
    payload.put_u32(accepting.our_id);
    payload.put_u32(accepted.recv_window_max as u32);
    payload.put_u32(accepted.recv_packet_len_max as u32);
    payload.put_raw(&accepted.confirm_payload);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_CHANNEL_OPEN_CONFIRMATION, our channel {}", accepting.our_id);
    Ok(())
}

fn send_channel_open_failure(
    st: &mut ClientState,
    accepting: &Accepting,
    open_err: ChannelOpenError,
) -> Result<()> {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::CHANNEL_OPEN_FAILURE);
    payload.put_u32(accepting.their_id);
    payload.put_u32(open_err.reason_code);
    payload.put_str(&open_err.description);
    payload.put_str(&open_err.description_lang);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_CHANNEL_OPEN_FAILURE, their channel {}: {}", accepting.their_id, open_err);
    Ok(())
}

pub(super) fn send_request(st: &mut ClientState, req: GlobalReq) {
    st.conn_st.outbox.push_back(Outgoing::Request(req));
    client_state::wakeup_client(st);
}

fn recv_request_reply(st: &mut ClientState, reply: GlobalReply) -> ResultRecvState {
    let Some(reply_tx) = st.conn_st.awaiting_replies.pop_front() else {
        return Err(Error::Protocol("received a reply to a global request that we did not send"))
    };
    log::debug!("received global request reply {:?}", reply);
    // any reply proves that the peer is alive
    st.conn_st.keepalive.unanswered = 0;
    if let Some(reply_tx) = reply_tx {
        let _: Result<_, _> = reply_tx.send(reply);
    }
    Ok(None)
}

fn recv_global_request(st: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    let request_type = payload.get_string()?;
    let want_reply = payload.get_bool()?;
    log::debug!("received SSH_MSG_GLOBAL_REQUEST {:?}, refusing it", request_type);
    if want_reply {
        st.conn_st.outbox.push_back(Outgoing::RefuseRequest);
        client_state::wakeup_client(st);
    }
    Ok(None)
}

/// Queues a keepalive request every `keepalive_interval`. Fails once `keepalive_count_max`
/// requests in a row went unanswered.
fn pump_keepalive(st: &mut ClientState, cx: &mut Context) -> Result<()> {
    let Some(interval) = st.config.keepalive_interval else { return Ok(()) };
    let keepalive = &mut st.conn_st.keepalive;
    let timer = keepalive.timer.get_or_insert_with(|| Box::pin(tokio::time::sleep(interval)));
    if timer.as_mut().poll(cx).is_pending() {
        return Ok(())
    }
    timer.as_mut().reset(Instant::now() + interval);
    // register the waker for the new deadline
    let _ = timer.as_mut().poll(cx);

    if keepalive_expired(keepalive.unanswered, st.config.keepalive_count_max) {
        log::debug!("{} keepalive requests went unanswered", keepalive.unanswered);
        return Err(Error::KeepaliveTimeout(keepalive.unanswered))
    }
    keepalive.unanswered += 1;
    st.conn_st.outbox.push_back(Outgoing::Keepalive);
    Ok(())
}

/// A `count_max` of zero sends keepalives but never gives up.
fn keepalive_expired(unanswered: u32, count_max: u32) -> bool {
    count_max != 0 && unanswered >= count_max
}

fn start_channel(init: ChannelInit) -> (Arc<Mutex<ChannelState>>, mpsc::Receiver<ChannelEvent>) {
    let (event_tx, event_rx) = mpsc::channel(1);
    (Arc::new(Mutex::new(channel_state::init_channel(init, event_tx))), event_rx)
}

/// The peer's maximum packet size may or may not include the message header, so we stay well
/// below it. Never exceeds a nonzero `packet_len_max`.
fn usable_packet_len(packet_len_max: usize) -> usize {
    packet_len_max.saturating_sub(100).max(packet_len_max / 2).max(1)
}

/// Drops every channel and every pending request.
pub(super) fn teardown(st: &mut ClientState) {
    st.conn_st.pending_opens.clear();
    st.conn_st.outbox.clear();
    st.conn_st.awaiting_replies.clear();
    st.conn_st.keepalive.timer = None;
    st.conn_st.slots.lock().clear();
}
