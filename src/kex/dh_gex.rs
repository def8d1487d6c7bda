use bytes::Bytes;
use derivative::Derivative;
use num_bigint_dig::BigUint;
use rand::SeedableRng as _;
use rand_chacha::ChaCha20Rng;
use std::task::Poll;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result};
use crate::util::CryptoRngCore;
use super::{KexAlgo, KexInput, KexOutput, Kex, digest};
use super::dh::Group;

/// "diffie-hellman-group-exchange-sha256" key exchange from RFC 4419.
pub static DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA256: KexAlgo = KexAlgo {
    name: "diffie-hellman-group-exchange-sha256",
    make_kex: |rng| Ok(Box::new(init_kex(digest::<sha2::Sha256>, rng)?)),
};

/// "diffie-hellman-group-exchange-sha1" key exchange from RFC 4419.
pub static DIFFIE_HELLMAN_GROUP_EXCHANGE_SHA1: KexAlgo = KexAlgo {
    name: "diffie-hellman-group-exchange-sha1",
    make_kex: |rng| Ok(Box::new(init_kex(digest::<sha1::Sha1>, rng)?)),
};

// group sizes that we request, RFC 8270 raised the minimum to 2048 bits
const GROUP_BITS_MIN: u32 = 2048;
const GROUP_BITS_PREFERRED: u32 = 4096;
const GROUP_BITS_MAX: u32 = 8192;

#[derive(Derivative)]
#[derivative(Debug)]
struct GroupExchangeKex {
    #[derivative(Debug = "ignore")]
    compute_hash: fn(&[u8]) -> Vec<u8>,
    #[derivative(Debug = "ignore")]
    rng: ChaCha20Rng,
    state: State,
}

#[derive(Debug)]
enum State {
    Init,
    WaitGroup,
    SendInit(Negotiated),
    WaitReply(Negotiated),
    Replied(Negotiated, GexReply),
    Done,
}

#[derive(Debug)]
struct Negotiated {
    group: Group,
    our_eph_privkey: BigUint,
    our_eph_pubkey: BigUint,
}

#[derive(Debug)]
struct GexReply {
    server_pubkey: Bytes,
    server_eph_pubkey: BigUint,
    server_exchange_hash_sign: Bytes,
}

fn init_kex(
    compute_hash: fn(&[u8]) -> Vec<u8>,
    rng: &mut dyn CryptoRngCore,
) -> Result<GroupExchangeKex> {
    // the ephemeral key can only be generated after we receive the group, so we keep our own
    // generator seeded from the caller's
    let rng = ChaCha20Rng::from_rng(rng.as_rngcore())
        .map_err(|_| Error::Random("could not seed generator for group exchange"))?;
    Ok(GroupExchangeKex { compute_hash, rng, state: State::Init })
}

impl Kex for GroupExchangeKex {
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        match (msg_id, &self.state) {
            (msg::KEX_DH_GEX_GROUP, State::WaitGroup) => recv_gex_group(self, payload),
            (msg::KEX_DH_GEX_REPLY, State::WaitReply(_)) => recv_gex_reply(self, payload),
            (msg::KEX_DH_GEX_GROUP, _) =>
                Err(Error::Protocol("received unexpected SSH_MSG_KEX_DH_GEX_GROUP")),
            (msg::KEX_DH_GEX_REPLY, _) =>
                Err(Error::Protocol("received unexpected SSH_MSG_KEX_DH_GEX_REPLY")),
            _ => Err(Error::Protocol("received unexpected key exchange message")),
        }
    }

    fn send_packet(&mut self) -> Result<Option<Bytes>> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Init => {
                self.state = State::WaitGroup;
                Ok(Some(send_gex_request()))
            },
            State::SendInit(negotiated) => {
                let payload = send_gex_init(&negotiated);
                self.state = State::WaitReply(negotiated);
                Ok(Some(payload))
            },
            state => {
                self.state = state;
                Ok(None)
            },
        }
    }

    fn poll(&mut self, input: KexInput) -> Poll<Result<KexOutput>> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Replied(negotiated, reply) => Poll::Ready(exchange(self, negotiated, reply, input)),
            state => {
                self.state = state;
                Poll::Pending
            },
        }
    }

    fn compute_hash(&self, data: &[u8]) -> Vec<u8> {
        (self.compute_hash)(data)
    }
}

fn send_gex_request() -> Bytes {
    // RFC 4419, section 3
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::KEX_DH_GEX_REQUEST);
    payload.put_u32(GROUP_BITS_MIN);
    payload.put_u32(GROUP_BITS_PREFERRED);
    payload.put_u32(GROUP_BITS_MAX);
    log::debug!("sending SSH_MSG_KEX_DH_GEX_REQUEST ({}, {}, {})",
        GROUP_BITS_MIN, GROUP_BITS_PREFERRED, GROUP_BITS_MAX);
    payload.finish()
}

fn recv_gex_group(kex: &mut GroupExchangeKex, payload: &mut PacketDecode) -> Result<()> {
    let p = payload.get_biguint()?;
    let g = payload.get_biguint()?;
    let group = Group::new(p, g);
    log::debug!("received SSH_MSG_KEX_DH_GEX_GROUP with {} bit group", group.bits());

    let bits = group.bits() as u32;
    if bits < GROUP_BITS_MIN || bits > GROUP_BITS_MAX {
        return Err(Error::Protocol("server sent Diffie-Hellman group of unacceptable size"))
    }
    if !group.is_valid_element(&group.g) {
        return Err(Error::Protocol("server sent invalid Diffie-Hellman generator"))
    }

    let (our_eph_privkey, our_eph_pubkey) = group.gen_keypair(&mut kex.rng);
    kex.state = State::SendInit(Negotiated { group, our_eph_privkey, our_eph_pubkey });
    Ok(())
}

fn send_gex_init(negotiated: &Negotiated) -> Bytes {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::KEX_DH_GEX_INIT);
    payload.put_biguint(&negotiated.our_eph_pubkey);
    log::debug!("sending SSH_MSG_KEX_DH_GEX_INIT");
    payload.finish()
}

fn recv_gex_reply(kex: &mut GroupExchangeKex, payload: &mut PacketDecode) -> Result<()> {
    let server_pubkey = payload.get_bytes()?;
    let server_eph_pubkey = payload.get_biguint()?;
    let server_exchange_hash_sign = payload.get_bytes()?;

    let State::WaitReply(negotiated) = std::mem::replace(&mut kex.state, State::Done) else {
        return Err(Error::Protocol("received unexpected SSH_MSG_KEX_DH_GEX_REPLY"))
    };
    if !negotiated.group.is_valid_element(&server_eph_pubkey) {
        return Err(Error::Protocol("server sent invalid Diffie-Hellman ephemeral public key"))
    }

    let reply = GexReply { server_pubkey, server_eph_pubkey, server_exchange_hash_sign };
    kex.state = State::Replied(negotiated, reply);
    log::debug!("received SSH_MSG_KEX_DH_GEX_REPLY");
    Ok(())
}

fn exchange(
    kex: &GroupExchangeKex,
    negotiated: Negotiated,
    reply: GexReply,
    input: KexInput,
) -> Result<KexOutput> {
    let Negotiated { group, our_eph_privkey, our_eph_pubkey } = negotiated;
    let GexReply { server_pubkey, server_eph_pubkey, server_exchange_hash_sign } = reply;
    let shared_secret = server_eph_pubkey.modpow(&our_eph_privkey, &group.p);

    // RFC 4419, section 3
    let mut exchange_data = PacketEncode::new();
    exchange_data.put_bytes(input.client_ident);
    exchange_data.put_bytes(input.server_ident);
    exchange_data.put_bytes(input.client_kex_init);
    exchange_data.put_bytes(input.server_kex_init);
    exchange_data.put_bytes(&server_pubkey);
    exchange_data.put_u32(GROUP_BITS_MIN);
    exchange_data.put_u32(GROUP_BITS_PREFERRED);
    exchange_data.put_u32(GROUP_BITS_MAX);
    exchange_data.put_biguint(&group.p);
    exchange_data.put_biguint(&group.g);
    exchange_data.put_biguint(&our_eph_pubkey);
    exchange_data.put_biguint(&server_eph_pubkey);
    exchange_data.put_biguint(&shared_secret);
    let exchange_hash = (kex.compute_hash)(&exchange_data.finish());

    Ok(KexOutput {
        shared_secret_be: shared_secret.to_bytes_be(),
        exchange_hash, server_pubkey, server_exchange_hash_sign,
    })
}
