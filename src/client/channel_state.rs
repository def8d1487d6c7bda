use bytes::Bytes;
use futures_core::ready;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future as _;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::PollSender;
use crate::codec::{PacketEncode, PacketDecode};
use crate::codes::msg;
use crate::error::{Result, Error};
use super::negotiate;
use super::channel::{ChannelEvent, ChannelReq, ChannelReply, DataType};
use super::client_state::{self, ClientState};
use super::pump::Pump;
use super::recv::{ResultRecvState, RecvState};

pub(super) struct ChannelInit {
    pub our_id: u32,
    pub their_id: u32,
    pub send_window: usize,
    pub send_len_max: usize,
    pub recv_window_max: usize,
}

pub(super) struct ChannelState {
    our_id: u32,
    their_id: u32,
    event_tx: PollSender<ChannelEvent>,
    outbound: Outbound,
    inbound: Inbound,
    close: Close,
}

/// Everything that flows from us to the peer.
struct Outbound {
    reqs: VecDeque<ChannelReq>,
    /// Our requests that wait for `SSH_MSG_CHANNEL_SUCCESS` or `SSH_MSG_CHANNEL_FAILURE`.
    awaiting_replies: VecDeque<oneshot::Sender<ChannelReply>>,
    writes: VecDeque<Write>,
    eof_queued: bool,
    /// Number of bytes that the peer allows us to send.
    window: usize,
    len_max: usize,
}

/// Everything that flows from the peer to us.
struct Inbound {
    /// Our replies to the peer's requests; they must go out in the order of the requests.
    replies: VecDeque<oneshot::Receiver<ChannelReply>>,
    eof: bool,
    /// Number of bytes that the peer may send us.
    window: usize,
    window_max: usize,
    /// Bytes that the user consumed and that we did not return to `window` yet.
    consumed: usize,
}

#[derive(Debug, Default)]
struct Close {
    wanted: bool,
    sent: bool,
    received: bool,
    done: bool,
}

#[derive(Debug)]
struct Write {
    data: ChannelSendData,
    sent_tx: oneshot::Sender<()>,
    started: bool,
}

#[derive(Debug)]
pub(super) enum ChannelSendData {
    Data(Bytes, DataType),
    Eof,
}

enum WriteProgress {
    Partial,
    Finished,
    Blocked,
}

pub(super) fn init_channel(init: ChannelInit, event_tx: mpsc::Sender<ChannelEvent>) -> ChannelState {
    ChannelState {
        our_id: init.our_id,
        their_id: init.their_id,
        event_tx: PollSender::new(event_tx),
        outbound: Outbound {
            reqs: VecDeque::new(),
            awaiting_replies: VecDeque::new(),
            writes: VecDeque::new(),
            eof_queued: false,
            window: init.send_window,
            len_max: init.send_len_max,
        },
        inbound: Inbound {
            replies: VecDeque::new(),
            eof: false,
            window: init.recv_window_max,
            window_max: init.recv_window_max,
            consumed: 0,
        },
        close: Close::default(),
    }
}

pub(super) fn pump_channel(
    st: &mut ClientState,
    channel_st: &mut ChannelState,
    cx: &mut Context,
) -> Result<Pump> {
    // connection messages are held back while keys are being exchanged
    if channel_st.close.done || !negotiate::is_ready(st) {
        return Ok(Pump::Pending)
    }

    if !channel_st.close.sent {
        if let Some(reply) = poll_next_reply(channel_st, cx) {
            send_channel_reply(st, channel_st, reply)?;
            return Ok(Pump::Progress)
        }

        if channel_st.close.wanted || channel_st.close.received {
            send_simple(st, channel_st, msg::CHANNEL_CLOSE)?;
            channel_st.close.sent = true;
            return Ok(Pump::Progress)
        }
    } else if channel_st.close.received {
        log::debug!("our channel {} is closed", channel_st.our_id);
        channel_st.close.done = true;
        channel_st.outbound.reqs.clear();
        channel_st.outbound.writes.clear();
        channel_st.outbound.awaiting_replies.clear();
        channel_st.inbound.replies.clear();
        return Ok(Pump::Progress)
    } else {
        return Ok(Pump::Pending)
    }

    if let Some(req) = channel_st.outbound.reqs.pop_front() {
        send_channel_request(st, channel_st, &req)?;
        channel_st.outbound.awaiting_replies.extend(req.reply_tx);
        return Ok(Pump::Progress)
    }

    if pump_write(st, channel_st)?.is_progress() {
        return Ok(Pump::Progress)
    }

    if !channel_st.close.received {
        if let Some(adjust) = take_window_adjust(channel_st) {
            let mut payload = PacketEncode::new();
            payload.put_u8(msg::CHANNEL_WINDOW_ADJUST);
            payload.put_u32(channel_st.their_id);
            payload.put_u32(adjust as u32);
            st.codec.send_pipe.feed_packet(&payload.finish())?;
            log::trace!("returning {} bytes to the window of our channel {}", adjust, channel_st.our_id);
            return Ok(Pump::Progress)
        }
    }

    Ok(Pump::Pending)
}

fn pump_write(st: &mut ClientState, channel_st: &mut ChannelState) -> Result<Pump> {
    let Some(mut write) = channel_st.outbound.writes.pop_front() else { return Ok(Pump::Pending) };

    // a writer that gave up before anything went out leaves nothing behind
    let is_eof = matches!(write.data, ChannelSendData::Eof);
    if !write.started && !is_eof && write.sent_tx.is_closed() {
        log::debug!("dropping abandoned write to our channel {}", channel_st.our_id);
        return Ok(Pump::Progress)
    }

    match send_write(st, channel_st, &mut write.data)? {
        WriteProgress::Finished => {
            let _: Result<_, _> = write.sent_tx.send(());
            Ok(Pump::Progress)
        },
        WriteProgress::Partial => {
            write.started = true;
            channel_st.outbound.writes.push_front(write);
            Ok(Pump::Progress)
        },
        WriteProgress::Blocked => {
            channel_st.outbound.writes.push_front(write);
            Ok(Pump::Pending)
        },
    }
}

fn is_closing(channel_st: &ChannelState) -> bool {
    channel_st.close.wanted || channel_st.close.sent || channel_st.close.done
}

pub(super) fn send_request(
    st: &mut ClientState,
    channel_st: &mut ChannelState,
    req: ChannelReq,
) -> Result<()> {
    if is_closing(channel_st) {
        return Err(Error::ChannelClosed)
    }
    channel_st.outbound.reqs.push_back(req);
    client_state::wakeup_client(st);
    Ok(())
}

fn send_channel_request(st: &mut ClientState, channel_st: &ChannelState, req: &ChannelReq) -> Result<()> {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::CHANNEL_REQUEST);
    payload.put_u32(channel_st.their_id);
    payload.put_str(&req.request_type);
    payload.put_bool(req.reply_tx.is_some());
    payload.put_raw(&req.payload);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending SSH_MSG_CHANNEL_REQUEST {:?} on our channel {}", req.request_type, channel_st.our_id);
    Ok(())
}

/// Returns our reply to the oldest request of the peer, once the user decided it.
///
/// A dropped reply sender counts as a failure.
fn poll_next_reply(channel_st: &mut ChannelState, cx: &mut Context) -> Option<ChannelReply> {
    let reply_rx = channel_st.inbound.replies.front_mut()?;
    let reply = match Pin::new(reply_rx).poll(cx) {
        Poll::Ready(res) => res.unwrap_or(ChannelReply::Failure),
        Poll::Pending => return None,
    };
    channel_st.inbound.replies.pop_front();
    Some(reply)
}

fn send_channel_reply(st: &mut ClientState, channel_st: &ChannelState, reply: ChannelReply) -> Result<()> {
    let msg_id = match reply {
        ChannelReply::Success => msg::CHANNEL_SUCCESS,
        ChannelReply::Failure => msg::CHANNEL_FAILURE,
    };
    log::debug!("replying {:?} on our channel {}", reply, channel_st.our_id);
    send_simple(st, channel_st, msg_id)
}

/// Sends a message that carries nothing but the recipient channel.
fn send_simple(st: &mut ClientState, channel_st: &ChannelState, msg_id: u8) -> Result<()> {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg_id);
    payload.put_u32(channel_st.their_id);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::debug!("sending {} on our channel {}", msg::to_str(msg_id).unwrap_or("message"), channel_st.our_id);
    Ok(())
}

pub(super) fn send_data(
    st: &mut ClientState,
    channel_st: &mut ChannelState,
    data: ChannelSendData,
) -> Result<oneshot::Receiver<()>> {
    if is_closing(channel_st) || channel_st.outbound.eof_queued {
        return Err(Error::ChannelClosed)
    }
    if let ChannelSendData::Eof = data {
        channel_st.outbound.eof_queued = true;
    }
    let (sent_tx, sent_rx) = oneshot::channel();
    channel_st.outbound.writes.push_back(Write { data, sent_tx, started: false });
    client_state::wakeup_client(st);
    Ok(sent_rx)
}

pub(super) fn is_eof_queued(channel_st: &ChannelState) -> bool {
    channel_st.outbound.eof_queued
}

fn send_write(
    st: &mut ClientState,
    channel_st: &mut ChannelState,
    data: &mut ChannelSendData,
) -> Result<WriteProgress> {
    let (data, data_type) = match data {
        ChannelSendData::Data(data, data_type) => (data, *data_type),
        ChannelSendData::Eof => {
            send_simple(st, channel_st, msg::CHANNEL_EOF)?;
            return Ok(WriteProgress::Finished)
        },
    };

    if data.is_empty() {
        return Ok(WriteProgress::Finished)
    }
    let Some(chunk) = take_send_chunk(channel_st, data) else {
        return Ok(WriteProgress::Blocked)
    };

    let mut payload = PacketEncode::new();
    if let DataType::Extended(code) = data_type {
        payload.put_u8(msg::CHANNEL_EXTENDED_DATA);
        payload.put_u32(channel_st.their_id);
        payload.put_u32(code);
    } else {
        payload.put_u8(msg::CHANNEL_DATA);
        payload.put_u32(channel_st.their_id);
    }
    payload.put_bytes(&chunk);
    st.codec.send_pipe.feed_packet(&payload.finish())?;
    log::trace!("sent {} bytes of {:?} on our channel {}", chunk.len(), data_type, channel_st.our_id);

    Ok(if data.is_empty() { WriteProgress::Finished } else { WriteProgress::Partial })
}

/// Splits off the longest prefix of `data` that the send window and the peer's maximal packet
/// size allow, and charges it to the window.
fn take_send_chunk(channel_st: &mut ChannelState, data: &mut Bytes) -> Option<Bytes> {
    let outbound = &mut channel_st.outbound;
    let len = data.len().min(outbound.window).min(outbound.len_max);
    if len == 0 {
        return None
    }
    outbound.window -= len;
    Some(data.split_to(len))
}

/// Handles a message addressed to this channel.
pub(super) fn recv_channel_msg(
    channel_mutex: &Arc<Mutex<ChannelState>>,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    let mut channel_st = channel_mutex.lock();
    let event = match msg_id {
        msg::CHANNEL_DATA => {
            let data = payload.get_bytes()?;
            recv_data(&mut channel_st, data, DataType::Standard)
        },
        msg::CHANNEL_EXTENDED_DATA => {
            let code = payload.get_u32()?;
            let data = payload.get_bytes()?;
            recv_data(&mut channel_st, data, DataType::Extended(code))
        },
        msg::CHANNEL_WINDOW_ADJUST => {
            let adjust = payload.get_u32()? as usize;
            recv_window_adjust(&mut channel_st, adjust)?;
            None
        },
        msg::CHANNEL_REQUEST => Some(recv_request(&mut channel_st, payload)?),
        msg::CHANNEL_SUCCESS => {
            recv_reply(&mut channel_st, ChannelReply::Success)?;
            None
        },
        msg::CHANNEL_FAILURE => {
            recv_reply(&mut channel_st, ChannelReply::Failure)?;
            None
        },
        msg::CHANNEL_EOF => recv_eof(&mut channel_st),
        msg::CHANNEL_CLOSE => {
            recv_close(&mut channel_st);
            None
        },
        _ => return Err(Error::PacketNotImplemented(msg_id)),
    };
    drop(channel_st);

    match event {
        Some(event) => send_event(channel_mutex.clone(), event),
        None => Ok(None),
    }
}

fn recv_reply(channel_st: &mut ChannelState, reply: ChannelReply) -> Result<()> {
    let Some(reply_tx) = channel_st.outbound.awaiting_replies.pop_front() else {
        return Err(Error::Protocol("received a channel request reply that we did not ask for"))
    };
    log::debug!("received {:?} reply on our channel {}", reply, channel_st.our_id);
    let _: Result<_, _> = reply_tx.send(reply);
    Ok(())
}

fn recv_request(channel_st: &mut ChannelState, payload: &mut PacketDecode) -> Result<ChannelEvent> {
    let request_type = payload.get_string()?;
    let want_reply = payload.get_bool()?;
    log::debug!("received SSH_MSG_CHANNEL_REQUEST {:?} on our channel {}", request_type, channel_st.our_id);

    let reply_tx = want_reply.then(|| {
        let (reply_tx, reply_rx) = oneshot::channel();
        channel_st.inbound.replies.push_back(reply_rx);
        reply_tx
    });
    Ok(ChannelEvent::Request(ChannelReq { request_type, payload: payload.remaining(), reply_tx }))
}

fn recv_data(channel_st: &mut ChannelState, data: Bytes, data_type: DataType) -> Option<ChannelEvent> {
    if channel_st.close.received || channel_st.close.done {
        log::warn!("ignoring {} bytes on our channel {}, it is closed", data.len(), channel_st.our_id);
        return None
    }
    log::trace!("received {} bytes of {:?} on our channel {}", data.len(), data_type, channel_st.our_id);

    if data.len() > channel_st.inbound.window {
        // only this channel is affected, the connection stays up
        log::warn!("peer overran the window of our channel {} ({} bytes, window {}), closing it",
            channel_st.our_id, data.len(), channel_st.inbound.window);
        channel_st.close.wanted = true;
        return None
    }
    channel_st.inbound.window -= data.len();
    Some(ChannelEvent::Data(data, data_type))
}

/// Records that the user consumed `len` bytes of received data.
///
/// Returns true when a window adjustment became due, so the client should be woken up.
pub(super) fn consume_data(channel_st: &mut ChannelState, len: usize) -> bool {
    channel_st.inbound.consumed += len;
    window_adjust_due(channel_st)
}

fn window_adjust_due(channel_st: &ChannelState) -> bool {
    channel_st.inbound.consumed > channel_st.inbound.window_max / 2
}

fn take_window_adjust(channel_st: &mut ChannelState) -> Option<usize> {
    if !window_adjust_due(channel_st) {
        return None
    }
    let adjust = std::mem::take(&mut channel_st.inbound.consumed);
    channel_st.inbound.window += adjust;
    Some(adjust)
}

fn recv_window_adjust(channel_st: &mut ChannelState, adjust: usize) -> Result<()> {
    let window = channel_st.outbound.window.checked_add(adjust)
        .filter(|&window| window <= u32::MAX as usize)
        .ok_or(Error::Protocol("peer enlarged the channel window beyond 2^32 - 1"))?;
    log::trace!("peer returned {} bytes to the window of our channel {}", adjust, channel_st.our_id);
    channel_st.outbound.window = window;
    Ok(())
}

fn recv_eof(channel_st: &mut ChannelState) -> Option<ChannelEvent> {
    if channel_st.inbound.eof {
        log::warn!("peer sent a second SSH_MSG_CHANNEL_EOF on our channel {}", channel_st.our_id);
        return None
    }
    log::debug!("received SSH_MSG_CHANNEL_EOF on our channel {}", channel_st.our_id);
    channel_st.inbound.eof = true;
    Some(ChannelEvent::Eof)
}

fn recv_close(channel_st: &mut ChannelState) {
    if channel_st.close.received {
        log::warn!("peer sent a second SSH_MSG_CHANNEL_CLOSE on our channel {}", channel_st.our_id);
        return
    }
    log::debug!("received SSH_MSG_CHANNEL_CLOSE on our channel {}", channel_st.our_id);
    channel_st.close.received = true;
}

pub(super) fn close(st: &mut ClientState, channel_st: &mut ChannelState) {
    if !channel_st.close.wanted {
        channel_st.close.wanted = true;
        client_state::wakeup_client(st);
    }
}

/// Closes a channel that nobody holds a handle to.
pub(super) fn abandon(channel_st: &mut ChannelState) {
    channel_st.close.wanted = true;
}

pub(super) fn is_closed(channel_st: &ChannelState) -> bool {
    channel_st.close.done
}

/// Delivers `event` to the [`ChannelReceiver`][super::ChannelReceiver], waiting for room in the
/// event queue. Reading from the socket is paused meanwhile.
fn send_event(channel_mutex: Arc<Mutex<ChannelState>>, event: ChannelEvent) -> ResultRecvState {
    struct DeliverChannelEvent {
        channel_mutex: Arc<Mutex<ChannelState>>,
        event: Option<ChannelEvent>,
    }

    impl RecvState for DeliverChannelEvent {
        fn poll(&mut self, _st: &mut ClientState, cx: &mut Context) -> Poll<Result<()>> {
            let mut channel_st = self.channel_mutex.lock();
            // a closed receiver means that nobody is interested in the event
            if ready!(channel_st.event_tx.poll_reserve(cx)).is_ok() {
                if let Some(event) = self.event.take() {
                    let _: Result<_, _> = channel_st.event_tx.send_item(event);
                }
            }
            Poll::Ready(Ok(()))
        }
    }

    Ok(Some(Box::new(DeliverChannelEvent { channel_mutex, event: Some(event) })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(send_window: usize, send_len_max: usize, recv_window_max: usize) -> ChannelState {
        let (event_tx, _event_rx) = mpsc::channel(1);
        let init = ChannelInit { our_id: 0, their_id: 42, send_window, send_len_max, recv_window_max };
        init_channel(init, event_tx)
    }

    fn decode(payload: PacketEncode) -> PacketDecode {
        PacketDecode::new(payload.finish())
    }

    #[test]
    fn test_window_adjust_after_consumption() {
        let mut ch = channel(0, 0, 0x100000);

        for _ in 0..(0x100000 / 0x4000) {
            assert!(recv_data(&mut ch, Bytes::from(vec![0; 0x4000]), DataType::Standard).is_some());
        }
        assert_eq!(ch.inbound.window, 0);
        assert_eq!(take_window_adjust(&mut ch), None);

        let mut adjusts = Vec::new();
        for _ in 0..(0x90000 / 0x10000) {
            consume_data(&mut ch, 0x10000);
            adjusts.extend(take_window_adjust(&mut ch));
        }
        assert_eq!(adjusts, vec![0x90000]);
        assert_eq!(ch.inbound.window, 0x90000);
        assert_eq!(take_window_adjust(&mut ch), None);
    }

    #[test]
    fn test_send_split_by_window_and_len_max() {
        let mut ch = channel(0x9000, 0x4000, 0x1000);
        let mut data = Bytes::from(vec![7; 0xa000]);

        let mut chunks = Vec::new();
        while let Some(chunk) = take_send_chunk(&mut ch, &mut data) {
            chunks.push(chunk.len());
        }
        assert_eq!(chunks, vec![0x4000, 0x4000, 0x1000]);
        assert_eq!(ch.outbound.window, 0);
        assert_eq!(data.len(), 0x1000);

        recv_window_adjust(&mut ch, 0x800).unwrap();
        assert_eq!(take_send_chunk(&mut ch, &mut data).map(|c| c.len()), Some(0x800));
        assert_eq!(take_send_chunk(&mut ch, &mut data), None);
    }

    #[test]
    fn test_window_adjust_overflow() {
        let mut ch = channel(u32::MAX as usize - 10, 0x4000, 0x1000);
        assert!(recv_window_adjust(&mut ch, 10).is_ok());
        assert!(matches!(recv_window_adjust(&mut ch, 1), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_duplicate_close_and_eof_are_harmless() {
        let channel_mutex = Arc::new(Mutex::new(channel(0, 0, 0x1000)));
        let empty = || PacketDecode::new(Bytes::new());

        assert!(recv_channel_msg(&channel_mutex, msg::CHANNEL_EOF, &mut empty()).unwrap().is_some());
        assert!(recv_channel_msg(&channel_mutex, msg::CHANNEL_EOF, &mut empty()).unwrap().is_none());
        assert!(recv_channel_msg(&channel_mutex, msg::CHANNEL_CLOSE, &mut empty()).unwrap().is_none());
        assert!(recv_channel_msg(&channel_mutex, msg::CHANNEL_CLOSE, &mut empty()).unwrap().is_none());
        assert!(channel_mutex.lock().close.received);
    }

    #[test]
    fn test_window_violation_closes_only_the_channel() {
        let channel_mutex = Arc::new(Mutex::new(channel(0, 0, 0x100)));
        let mut payload = PacketEncode::new();
        payload.put_bytes(&[0; 0x101]);
        let recv_st = recv_channel_msg(&channel_mutex, msg::CHANNEL_DATA, &mut decode(payload));
        assert!(matches!(recv_st, Ok(None)));

        let ch = channel_mutex.lock();
        assert!(ch.close.wanted);
        assert_eq!(ch.inbound.window, 0x100);
    }

    #[test]
    fn test_unexpected_reply() {
        let channel_mutex = Arc::new(Mutex::new(channel(0, 0, 0x100)));
        let mut payload = PacketDecode::new(Bytes::new());
        let res = recv_channel_msg(&channel_mutex, msg::CHANNEL_SUCCESS, &mut payload);
        assert!(matches!(res, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_request_with_reply() {
        let channel_mutex = Arc::new(Mutex::new(channel(0, 0, 0x100)));
        let mut payload = PacketEncode::new();
        payload.put_str("keepalive@openssh.com");
        payload.put_bool(true);
        assert!(recv_channel_msg(&channel_mutex, msg::CHANNEL_REQUEST, &mut decode(payload)).unwrap().is_some());
        assert_eq!(channel_mutex.lock().inbound.replies.len(), 1);
    }
}
