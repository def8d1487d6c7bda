use futures_core::ready;
use std::task::{Context, Poll};
use crate::codec::{PacketDecode, PacketEncode, RecvPacket};
use crate::codes::msg;
use crate::error::{Error, Result, DisconnectError};
use super::{auth, conn, negotiate};
use super::client_event::{ClientEvent, DebugMsg};
use super::client_state::ClientState;
use super::pump::Pump;

/// Work that must finish before we may decode the next packet.
///
/// Most packets are handled synchronously, but some of them produce an event that must be
/// delivered to a bounded channel; this provides backpressure from the receivers to the peer.
pub(super) trait RecvState {
    fn poll(&mut self, st: &mut ClientState, cx: &mut Context) -> Poll<Result<()>>;
}

pub(super) type ResultRecvState = Result<Option<Box<dyn RecvState + Send>>>;

/// Protocol layer of a message, given by its number (RFC 4250, section 4.1.2).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Layer {
    Transport,
    Negotiate,
    Kex,
    Auth,
    AuthMethod,
    Conn,
    Unknown,
}

fn layer_of(msg_id: u8) -> Layer {
    match msg_id {
        1..=19 => Layer::Transport,
        20..=29 => Layer::Negotiate,
        30..=49 => Layer::Kex,
        50..=59 => Layer::Auth,
        60..=79 => Layer::AuthMethod,
        80..=127 => Layer::Conn,
        _ => Layer::Unknown,
    }
}

/// Messages that the peer may send after its `SSH_MSG_KEXINIT` (RFC 4253, section 7.1).
fn is_allowed_in_kex(msg_id: u8) -> bool {
    match layer_of(msg_id) {
        Layer::Transport => !matches!(msg_id, msg::SERVICE_REQUEST | msg::SERVICE_ACCEPT),
        Layer::Negotiate | Layer::Kex => true,
        _ => false,
    }
}

pub(super) fn pump_recv(st: &mut ClientState, cx: &mut Context) -> Result<Pump> {
    let Some(mut recv_st) = st.recv_st.take() else { return Ok(Pump::Pending) };
    match recv_st.poll(st, cx) {
        Poll::Ready(res) => res.map(|_| Pump::Progress),
        Poll::Pending => {
            st.recv_st = Some(recv_st);
            Ok(Pump::Pending)
        },
    }
}

pub(super) fn recv_packet(st: &mut ClientState, packet: RecvPacket) -> ResultRecvState {
    let mut payload = PacketDecode::new(packet.payload.clone());
    let msg_id = payload.get_u8()?;
    log::trace!("received packet {} ({}), seq {}, len {}", msg_id,
        msg::to_str(msg_id).unwrap_or("method specific"), packet.packet_seq, packet.payload.len());

    if negotiate::is_peer_in_kex(st) && !is_allowed_in_kex(msg_id) {
        log::debug!("peer sent packet {} during key exchange", msg_id);
        return Err(Error::Protocol("peer sent a non-kex packet during key exchange"))
    }

    let res = match layer_of(msg_id) {
        Layer::Transport => recv_transport_packet(st, msg_id, &mut payload),
        Layer::Negotiate => negotiate::recv_negotiate_packet(st, msg_id, &mut payload),
        Layer::Kex => negotiate::recv_kex_packet(st, msg_id, &mut payload),
        Layer::Auth => auth::recv_auth_packet(st, msg_id, &mut payload),
        Layer::AuthMethod => auth::recv_auth_method_packet(st, msg_id, &mut payload),
        Layer::Conn => conn::recv_conn_packet(st, msg_id, &mut payload),
        Layer::Unknown => Err(Error::PacketNotImplemented(msg_id)),
    };

    match res {
        Err(Error::PacketNotImplemented(msg_id)) => send_unimplemented(st, msg_id, packet.packet_seq),
        res => res,
    }
}

fn recv_transport_packet(st: &mut ClientState, msg_id: u8, payload: &mut PacketDecode) -> ResultRecvState {
    match msg_id {
        msg::DISCONNECT => {
            let error = DisconnectError {
                reason_code: payload.get_u32()?,
                description: payload.get_string()?,
                description_lang: payload.get_string()?,
            };
            log::debug!("received SSH_MSG_DISCONNECT: {}", error);
            Err(Error::PeerDisconnected(error))
        },
        msg::IGNORE => Ok(None),
        msg::UNIMPLEMENTED => {
            let packet_seq = payload.get_u32()?;
            log::warn!("peer sent SSH_MSG_UNIMPLEMENTED for our packet seq {}", packet_seq);
            Ok(None)
        },
        msg::DEBUG => {
            let debug_msg = DebugMsg {
                always_display: payload.get_bool()?,
                message: payload.get_string()?,
                message_lang: payload.get_string()?,
            };
            log::debug!("received SSH_MSG_DEBUG: {:?}", debug_msg.message);
            send_event(ClientEvent::DebugMsg(debug_msg))
        },
        msg::SERVICE_ACCEPT => match payload.get_string()?.as_str() {
            "ssh-userauth" => auth::recv_service_accept(st),
            service_name => {
                log::warn!("peer accepted service {:?} that we did not request", service_name);
                Ok(None)
            },
        },
        _ => Err(Error::PacketNotImplemented(msg_id)),
    }
}

fn send_unimplemented(st: &mut ClientState, msg_id: u8, packet_seq: u32) -> ResultRecvState {
    log::debug!("received unimplemented packet {}, seq {}", msg_id, packet_seq);
    let mut reply = PacketEncode::new();
    reply.put_u8(msg::UNIMPLEMENTED);
    reply.put_u32(packet_seq);
    st.codec.send_pipe.feed_packet(&reply.finish())?;
    Ok(None)
}

/// Delivers a [`ClientEvent`] to the [`ClientReceiver`][super::ClientReceiver].
///
/// If the receiver was dropped, the event is dropped as well.
pub(super) fn send_event(event: ClientEvent) -> ResultRecvState {
    struct DeliverEvent(Option<ClientEvent>);

    impl RecvState for DeliverEvent {
        fn poll(&mut self, st: &mut ClientState, cx: &mut Context) -> Poll<Result<()>> {
            if ready!(st.event_tx.poll_reserve(cx)).is_ok() {
                if let Some(event) = self.0.take() {
                    let _: Result<_, _> = st.event_tx.send_item(event);
                }
            }
            Poll::Ready(Ok(()))
        }
    }

    Ok(Some(Box::new(DeliverEvent(Some(event)))))
}
