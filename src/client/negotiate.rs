use bytes::Bytes;
use rand::RngCore as _;
use std::cmp::min;
use std::future::Future as _;
use std::pin::Pin;
use std::task::Context;
use tokio::sync::oneshot;
use tokio::time::{Instant, Sleep};
use crate::error::{Error, Result, AlgoNegotiateError};
use crate::cipher::CipherAlgo;
use crate::codec::{PacketEncode, PacketDecode};
use crate::codes::msg;
use crate::compress::CompressAlgo;
use crate::kex::{Kex, KexAlgo, KexInput, KexOutput};
use crate::mac::MacAlgo;
use crate::pubkey::{self, Pubkey, PubkeyAlgo, SignatureVerified};
use super::auth;
use super::client_event::{ClientEvent, AcceptPubkeySender, HostKeyVerdict, ServerHostKey};
use super::client_state::{self, ClientState};
use super::pump::Pump;
use super::recv::ResultRecvState;

/// We never transfer more than this number of bytes with the same keys.
const REKEY_AFTER_BYTES_MAX: u64 = 1 << 30;

#[derive(Default)]
pub(super) struct NegotiateState {
    state: State,
    ex: Exchange,
    done_txs: Vec<oneshot::Sender<Result<()>>>,
    kex_started: Option<Instant>,
    bytes_at_last_kex: u64,
    rekey_sleep: Option<Pin<Box<Sleep>>>,
    compress_algo: Option<&'static CompressAlgo>,
    decompress_algo: Option<&'static CompressAlgo>,
    compress_delayed: bool,
    decompress_delayed: bool,
}

/// State of a single key exchange, discarded when the exchange is finished.
#[derive(Default)]
struct Exchange {
    our_kex_init: Option<OurKexInit>,
    their_kex_init: Option<TheirKexInit>,
    algos: Option<Algos>,
    kex: Option<Box<dyn Kex + Send>>,
    kex_output: Option<KexOutput>,
    signature_verified: Option<SignatureVerified>,
    pubkey_event: Option<ClientEvent>,
    accept_rx: Option<oneshot::Receiver<Result<HostKeyVerdict>>>,
    verdict: Option<HostKeyVerdict>,
    new_keys_sent: bool,
    new_keys_recvd: bool,
    ignore_guessed_packet: bool,
}

#[derive(Debug, Copy, Clone, Default)]
enum State {
    #[default]
    Idle,
    KexInit,
    Kex,
    AcceptPubkey,
    NewKeys,
    Done,
}

struct OurKexInit {
    payload: Bytes,
    kex_algos: Vec<&'static KexAlgo>,
    server_pubkey_algos: Vec<&'static PubkeyAlgo>,
    cipher_algos: Vec<&'static CipherAlgo>,
    mac_algos: Vec<&'static MacAlgo>,
    compress_algos: Vec<&'static CompressAlgo>,
}

#[derive(Debug)]
struct TheirKexInit {
    payload: Bytes,
    kex_algos: Vec<String>,
    server_pubkey_algos: Vec<String>,
    cipher_algos_cts: Vec<String>,
    cipher_algos_stc: Vec<String>,
    mac_algos_cts: Vec<String>,
    mac_algos_stc: Vec<String>,
    compress_algos_cts: Vec<String>,
    compress_algos_stc: Vec<String>,
    first_kex_packet_follows: bool,
}

struct Algos {
    kex: &'static KexAlgo,
    server_pubkey: &'static PubkeyAlgo,
    cipher_cts: &'static CipherAlgo,
    cipher_stc: &'static CipherAlgo,
    mac_cts: &'static MacAlgo,
    mac_stc: &'static MacAlgo,
    compress_cts: &'static CompressAlgo,
    compress_stc: &'static CompressAlgo,
}

pub(super) fn init_negotiate() -> NegotiateState {
    NegotiateState {
        state: State::KexInit,
        kex_started: Some(Instant::now()),
        .. NegotiateState::default()
    }
}

pub(super) fn pump_negotiate(st: &mut ClientState, cx: &mut Context) -> Result<Pump> {
    match st.negotiate_st.state {
        State::Idle => {
            if is_rekey_due(st, cx) {
                log::debug!("starting a new key exchange");
                start_kex(st);
                return Ok(Pump::Progress)
            }
        },
        State::KexInit => {
            if st.negotiate_st.ex.our_kex_init.is_none() {
                st.negotiate_st.ex.our_kex_init = Some(send_kex_init(st)?);
                return Ok(Pump::Progress)
            }

            if st.negotiate_st.ex.their_kex_init.is_some() {
                let algos = negotiate_algos(st)?;
                check_guessed_packet(st, &algos);
                st.negotiate_st.ex.kex = Some((algos.kex.make_kex)(&mut *st.rng)?);
                st.negotiate_st.ex.algos = Some(algos);
                st.negotiate_st.state = State::Kex;
                return Ok(Pump::Progress)
            }
        },
        State::Kex => return pump_kex(st),
        State::AcceptPubkey => {
            if st.negotiate_st.ex.pubkey_event.is_some() {
                let reserve_res = pump_ready!(st.event_tx.poll_reserve(cx));
                if let (Ok(()), Some(event)) = (reserve_res, st.negotiate_st.ex.pubkey_event.take()) {
                    let _ = st.event_tx.send_item(event);
                }
                st.negotiate_st.ex.pubkey_event = None;
            }

            let Some(accept_rx) = st.negotiate_st.ex.accept_rx.as_mut() else {
                return Err(Error::Protocol("no pending host key verification"))
            };
            let verdict = pump_ready!(Pin::new(accept_rx).poll(cx))
                .map_err(|err| Error::PubkeyAccept(Box::new(err)))??;
            log::debug!("server host key was accepted ({:?})", verdict);
            st.negotiate_st.ex.accept_rx = None;
            st.negotiate_st.ex.verdict = Some(verdict);
            st.host_key_verdict = Some(verdict);
            st.negotiate_st.state = State::NewKeys;
            return Ok(Pump::Progress)
        },
        State::NewKeys => {
            if st.negotiate_st.ex.signature_verified.is_none() || st.negotiate_st.ex.verdict.is_none() {
                return Err(Error::Protocol("cannot apply keys that were not verified"))
            }

            if !st.negotiate_st.ex.new_keys_sent {
                send_new_keys(st)?;
                st.negotiate_st.ex.new_keys_sent = true;
                return Ok(Pump::Progress)
            }

            if st.negotiate_st.ex.new_keys_recvd {
                st.negotiate_st.state = State::Done;
                return Ok(Pump::Progress)
            }
        },
        State::Done => {
            finish_kex(st);
            return Ok(Pump::Progress)
        },
    }
    Ok(Pump::Pending)
}

fn pump_kex(st: &mut ClientState) -> Result<Pump> {
    let neg = &mut *st.negotiate_st;
    let Some(kex) = neg.ex.kex.as_mut() else {
        return Err(Error::Protocol("key exchange is not running"))
    };

    if let Some(payload) = kex.send_packet()? {
        st.codec.send_pipe.feed_packet(&payload)?;
        return Ok(Pump::Progress)
    }

    let (Some(server_ident), Some(our_kex_init), Some(their_kex_init)) =
        (st.their_ident.as_ref(), neg.ex.our_kex_init.as_ref(), neg.ex.their_kex_init.as_ref())
        else { return Ok(Pump::Pending) };

    let kex_input = KexInput {
        client_ident: &st.our_ident,
        server_ident,
        client_kex_init: &our_kex_init.payload,
        server_kex_init: &their_kex_init.payload,
    };
    let kex_output = pump_ready!(kex.poll(kex_input))?;
    log::debug!("finished kex");

    let Some(algos) = neg.ex.algos.as_ref() else {
        return Err(Error::Protocol("key exchange without negotiated algorithms"))
    };

    let pubkey = Pubkey::decode(kex_output.server_pubkey.clone())?;
    log::debug!("server host key {}", pubkey);
    let signature_verified = (algos.server_pubkey.verify)(
        &pubkey, &kex_output.exchange_hash, kex_output.server_exchange_hash_sign.clone())?;

    if st.session_id.is_none() {
        st.session_id = Some(kex_output.exchange_hash.clone());
    }

    let host_key = ServerHostKey {
        hostname: st.config.hostname.clone(),
        key_type: pubkey.key_type(),
        fingerprint: pubkey::fingerprint(&kex_output.server_pubkey),
        blob: kex_output.server_pubkey.clone(),
        pubkey,
    };

    let (accept_tx, accept_rx) = oneshot::channel();
    let accept_tx = AcceptPubkeySender { accept_tx };
    neg.ex.pubkey_event = Some(ClientEvent::ServerPubkey(host_key, accept_tx));
    neg.ex.accept_rx = Some(accept_rx);
    neg.ex.signature_verified = Some(signature_verified);
    neg.ex.kex_output = Some(kex_output);
    neg.state = State::AcceptPubkey;
    Ok(Pump::Progress)
}

fn is_rekey_due(st: &mut ClientState, cx: &mut Context) -> bool {
    if !st.negotiate_st.done_txs.is_empty() {
        return true
    }

    let rekey_after_bytes = min(st.config.rekey_after_bytes, REKEY_AFTER_BYTES_MAX);
    if bytes_since_kex(st) >= rekey_after_bytes {
        log::debug!("rekeying after {} bytes", bytes_since_kex(st));
        return true
    }

    let rekey_after_duration = st.config.rekey_after_duration;
    let rekey_sleep = st.negotiate_st.rekey_sleep
        .get_or_insert_with(|| Box::pin(tokio::time::sleep(rekey_after_duration)));
    if rekey_sleep.as_mut().poll(cx).is_ready() {
        log::debug!("rekeying after {:?}", rekey_after_duration);
        return true
    }

    false
}

fn bytes_since_kex(st: &ClientState) -> u64 {
    let byte_count = st.codec.send_pipe.byte_count() + st.codec.recv_pipe.byte_count();
    byte_count.saturating_sub(st.negotiate_st.bytes_at_last_kex)
}

fn start_kex(st: &mut ClientState) {
    st.negotiate_st.state = State::KexInit;
    st.negotiate_st.kex_started = Some(Instant::now());
    st.negotiate_st.rekey_sleep = None;
}

fn finish_kex(st: &mut ClientState) {
    st.negotiate_st.ex = Exchange::default();
    st.negotiate_st.state = State::Idle;
    st.negotiate_st.kex_started = None;
    st.negotiate_st.bytes_at_last_kex =
        st.codec.send_pipe.byte_count() + st.codec.recv_pipe.byte_count();
    for done_tx in st.negotiate_st.done_txs.drain(..) {
        let _ = done_tx.send(Ok(()));
    }
    log::debug!("key exchange is complete");
}

/// Starts a key exchange (or joins the one that is running).
///
/// The returned receiver is resolved when the exchange is finished.
pub(super) fn start_rekey(st: &mut ClientState) -> oneshot::Receiver<Result<()>> {
    let (done_tx, done_rx) = oneshot::channel();
    st.negotiate_st.done_txs.push(done_tx);
    client_state::wakeup_client(st);
    done_rx
}

/// Time when the current key exchange started, if one is running.
pub(super) fn kex_started(st: &ClientState) -> Option<Instant> {
    st.negotiate_st.kex_started
}

pub(super) fn recv_negotiate_packet(
    st: &mut ClientState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    match msg_id {
        msg::KEXINIT => recv_kex_init(st, payload),
        msg::NEWKEYS => recv_new_keys(st, payload),
        _ => Err(Error::PacketNotImplemented(msg_id)),
    }
}

pub(super) fn recv_kex_packet(
    st: &mut ClientState,
    msg_id: u8,
    payload: &mut PacketDecode,
) -> ResultRecvState {
    if st.negotiate_st.ex.ignore_guessed_packet {
        log::debug!("ignoring guessed kex packet {} from the peer", msg_id);
        st.negotiate_st.ex.ignore_guessed_packet = false;
        return Ok(None)
    }

    if let Some(kex) = st.negotiate_st.ex.kex.as_mut() {
        kex.recv_packet(msg_id, payload)?;
        Ok(None)
    } else {
        Err(Error::Protocol("received unexpected kex message"))
    }
}

fn send_kex_init(st: &mut ClientState) -> Result<OurKexInit> {
    let kex_algos = st.config.kex_algos.clone();
    let server_pubkey_algos = st.config.server_pubkey_algos.clone();
    let cipher_algos = st.config.cipher_algos.clone();
    let mac_algos = st.config.mac_algos.clone();
    let compress_algos = st.config.compression_algos.clone();

    let mut cookie = [0; 16];
    st.rng.try_fill_bytes(&mut cookie)
        .map_err(|_| Error::Random("could not generate random cookie"))?;

    fn get_algo_names<A: NamedAlgo>(algos: &[&A]) -> Vec<&'static str> {
        algos.iter().map(|algo| algo.name()).collect()
    }

    // RFC 4253, section 7.1
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::KEXINIT);
    payload.put_raw(&cookie);
    payload.put_name_list(&get_algo_names(&kex_algos));
    payload.put_name_list(&get_algo_names(&server_pubkey_algos));
    payload.put_name_list(&get_algo_names(&cipher_algos));
    payload.put_name_list(&get_algo_names(&cipher_algos));
    payload.put_name_list(&get_algo_names(&mac_algos));
    payload.put_name_list(&get_algo_names(&mac_algos));
    payload.put_name_list(&get_algo_names(&compress_algos));
    payload.put_name_list(&get_algo_names(&compress_algos));
    payload.put_name_list(&[]);
    payload.put_name_list(&[]);
    payload.put_bool(false);
    payload.put_u32(0);
    let payload = payload.finish();
    st.codec.send_pipe.feed_packet(&payload)?;

    log::debug!("sending SSH_MSG_KEXINIT");

    Ok(OurKexInit { payload, kex_algos, server_pubkey_algos, cipher_algos, mac_algos, compress_algos })
}

fn recv_kex_init(st: &mut ClientState, payload: &mut PacketDecode) -> ResultRecvState {
    // RFC 4253, section 7.1
    let _cookie: [u8; 16] = payload.get_byte_array()?;
    let kex_algos = payload.get_name_list()?;
    let server_pubkey_algos = payload.get_name_list()?;
    let cipher_algos_cts = payload.get_name_list()?;
    let cipher_algos_stc = payload.get_name_list()?;
    let mac_algos_cts = payload.get_name_list()?;
    let mac_algos_stc = payload.get_name_list()?;
    let compress_algos_cts = payload.get_name_list()?;
    let compress_algos_stc = payload.get_name_list()?;
    payload.get_name_list()?; // languages_client_to_server
    payload.get_name_list()?; // languages_server_to_client
    let first_kex_packet_follows = payload.get_bool()?;
    payload.get_u32()?; // reserved

    let kex_init = TheirKexInit {
        payload: Bytes::copy_from_slice(payload.as_original_bytes()),
        kex_algos,
        server_pubkey_algos,
        cipher_algos_cts,
        cipher_algos_stc,
        mac_algos_cts,
        mac_algos_stc,
        compress_algos_cts,
        compress_algos_stc,
        first_kex_packet_follows,
    };
    log::debug!("received SSH_MSG_KEXINIT: {:?}", kex_init);

    match st.negotiate_st.state {
        State::Idle => {
            log::debug!("peer started a new key exchange");
            start_kex(st);
        },
        State::KexInit if st.negotiate_st.ex.their_kex_init.is_none() => {},
        _ => return Err(Error::Protocol("received SSH_MSG_KEXINIT during negotiation")),
    }
    st.negotiate_st.ex.their_kex_init = Some(kex_init);
    Ok(None)
}

fn negotiate_algos(st: &ClientState) -> Result<Algos> {
    let (Some(our), Some(their)) = (&st.negotiate_st.ex.our_kex_init, &st.negotiate_st.ex.their_kex_init)
        else { return Err(Error::Protocol("cannot negotiate without both SSH_MSG_KEXINIT")) };

    let algos = Algos {
        kex: negotiate_algo(&our.kex_algos, &their.kex_algos, "key exchange")?,
        server_pubkey: negotiate_algo(
            &our.server_pubkey_algos, &their.server_pubkey_algos, "server public key")?,
        cipher_cts: negotiate_algo(
            &our.cipher_algos, &their.cipher_algos_cts, "cipher client-to-server")?,
        cipher_stc: negotiate_algo(
            &our.cipher_algos, &their.cipher_algos_stc, "cipher server-to-client")?,
        mac_cts: negotiate_algo(&our.mac_algos, &their.mac_algos_cts, "mac client-to-server")?,
        mac_stc: negotiate_algo(&our.mac_algos, &their.mac_algos_stc, "mac server-to-client")?,
        compress_cts: negotiate_algo(
            &our.compress_algos, &their.compress_algos_cts, "compression client-to-server")?,
        compress_stc: negotiate_algo(
            &our.compress_algos, &their.compress_algos_stc, "compression server-to-client")?,
    };

    if (algos.cipher_cts.is_none() || algos.cipher_stc.is_none()) && !auth::is_authenticated(st) {
        return Err(Error::Protocol("refusing to use cipher \"none\" before authentication"))
    }

    Ok(algos)
}

/// Picks the first of our algorithms that the peer also supports (RFC 4253, section 7.1).
fn negotiate_algo<A: NamedAlgo + ?Sized>(
    our_algos: &[&'static A],
    their_algos: &[String],
    name: &'static str,
) -> Result<&'static A> {
    for our_algo in our_algos.iter() {
        if their_algos.iter().any(|their_algo| our_algo.name() == their_algo.as_str()) {
            log::debug!("negotiated algo {:?} for {}", our_algo.name(), name);
            return Ok(*our_algo)
        }
    }

    Err(Error::AlgoNegotiate(AlgoNegotiateError {
        algo_name: name.into(),
        our_algos: our_algos.iter().map(|a| a.name().into()).collect(),
        their_algos: their_algos.into(),
    }))
}

/// If the peer sent a guess of the key exchange and the guess was wrong, we must ignore the next
/// kex packet (RFC 4253, section 7).
fn check_guessed_packet(st: &mut ClientState, algos: &Algos) {
    let Some(their) = st.negotiate_st.ex.their_kex_init.as_ref() else { return };
    if !their.first_kex_packet_follows {
        return
    }

    let guess_kex = their.kex_algos.first().map(|s| s.as_str());
    let guess_pubkey = their.server_pubkey_algos.first().map(|s| s.as_str());
    if guess_kex != Some(algos.kex.name) || guess_pubkey != Some(algos.server_pubkey.name) {
        log::debug!("peer guessed the key exchange wrong, ignoring the next kex packet");
        st.negotiate_st.ex.ignore_guessed_packet = true;
    }
}

trait NamedAlgo { fn name(&self) -> &'static str; }
impl NamedAlgo for KexAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for CipherAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for MacAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for PubkeyAlgo { fn name(&self) -> &'static str { self.name } }
impl NamedAlgo for CompressAlgo { fn name(&self) -> &'static str { self.name } }

fn recv_new_keys(st: &mut ClientState, _payload: &mut PacketDecode) -> ResultRecvState {
    match st.negotiate_st.state {
        State::AcceptPubkey | State::NewKeys => {
            if st.negotiate_st.ex.new_keys_recvd {
                return Err(Error::Protocol("received SSH_MSG_NEWKEYS twice"))
            }
        },
        _ => return Err(Error::Protocol("received unexpected SSH_MSG_NEWKEYS")),
    }

    let Some(algos) = st.negotiate_st.ex.algos.as_ref() else {
        return Err(Error::Protocol("received SSH_MSG_NEWKEYS without negotiated algorithms"))
    };
    let (cipher_algo, mac_algo, compress_algo) = (algos.cipher_stc, algos.mac_stc, algos.compress_stc);

    let cipher_key = session_key(st, b'D', cipher_algo.key_len)?;
    let cipher_iv = session_key(st, b'B', cipher_algo.iv_len)?;
    let mac_key = session_key(st, b'F', mac_algo.key_len)?;
    let decrypt = (cipher_algo.make_decrypt)(&cipher_key, &cipher_iv)?;
    let mac = (mac_algo.make_mac)(&mac_key)?;
    st.codec.recv_pipe.set_decrypt(decrypt, mac, cipher_algo.block_len, mac_algo.tag_len);
    apply_decompress(st, compress_algo);

    log::debug!("received SSH_MSG_NEWKEYS and applied new keys");
    st.negotiate_st.ex.new_keys_recvd = true;
    Ok(None)
}

fn send_new_keys(st: &mut ClientState) -> Result<()> {
    let Some(algos) = st.negotiate_st.ex.algos.as_ref() else {
        return Err(Error::Protocol("cannot send SSH_MSG_NEWKEYS without negotiated algorithms"))
    };
    let (cipher_algo, mac_algo, compress_algo) = (algos.cipher_cts, algos.mac_cts, algos.compress_cts);

    let cipher_key = session_key(st, b'C', cipher_algo.key_len)?;
    let cipher_iv = session_key(st, b'A', cipher_algo.iv_len)?;
    let mac_key = session_key(st, b'E', mac_algo.key_len)?;
    let encrypt = (cipher_algo.make_encrypt)(&cipher_key, &cipher_iv)?;
    let mac = (mac_algo.make_mac)(&mac_key)?;

    let mut payload = PacketEncode::new();
    payload.put_u8(msg::NEWKEYS);
    st.codec.send_pipe.feed_packet(&payload.finish())?;

    st.codec.send_pipe.set_encrypt(encrypt, mac, cipher_algo.block_len, mac_algo.tag_len);
    apply_compress(st, compress_algo);
    log::debug!("sent SSH_MSG_NEWKEYS and applied new keys");
    Ok(())
}

fn apply_compress(st: &mut ClientState, algo: &'static CompressAlgo) {
    let neg = &mut *st.negotiate_st;
    let unchanged = neg.compress_algo.map(|active| active.name == algo.name).unwrap_or(false);
    neg.compress_algo = Some(algo);
    neg.compress_delayed = false;

    if algo.is_none() {
        st.codec.send_pipe.set_compress(None);
    } else if unchanged && st.codec.send_pipe.is_compressing() {
        log::debug!("keeping compression {:?}", algo.name);
    } else if !auth::is_authenticated(st) {
        st.codec.send_pipe.set_compress(None);
        st.negotiate_st.compress_delayed = true;
    } else {
        log::debug!("enabling compression {:?}", algo.name);
        st.codec.send_pipe.set_compress(Some((algo.make_compress)(st.config.compression_level)));
    }
}

fn apply_decompress(st: &mut ClientState, algo: &'static CompressAlgo) {
    let neg = &mut *st.negotiate_st;
    let unchanged = neg.decompress_algo.map(|active| active.name == algo.name).unwrap_or(false);
    neg.decompress_algo = Some(algo);
    neg.decompress_delayed = false;

    if algo.is_none() {
        st.codec.recv_pipe.set_decompress(None);
    } else if unchanged && st.codec.recv_pipe.is_decompressing() {
        log::debug!("keeping decompression {:?}", algo.name);
    } else if !auth::is_authenticated(st) {
        st.codec.recv_pipe.set_decompress(None);
        st.negotiate_st.decompress_delayed = true;
    } else {
        log::debug!("enabling decompression {:?}", algo.name);
        st.codec.recv_pipe.set_decompress(Some((algo.make_decompress)()));
    }
}

/// Turns on the negotiated compression, which stays off until the user is authenticated.
pub(super) fn enable_delayed_compression(st: &mut ClientState) {
    if st.negotiate_st.compress_delayed {
        if let Some(algo) = st.negotiate_st.compress_algo {
            log::debug!("enabling delayed compression {:?}", algo.name);
            st.codec.send_pipe.set_compress(Some((algo.make_compress)(st.config.compression_level)));
        }
        st.negotiate_st.compress_delayed = false;
    }

    if st.negotiate_st.decompress_delayed {
        if let Some(algo) = st.negotiate_st.decompress_algo {
            log::debug!("enabling delayed decompression {:?}", algo.name);
            st.codec.recv_pipe.set_decompress(Some((algo.make_decompress)()));
        }
        st.negotiate_st.decompress_delayed = false;
    }
}

fn session_key(st: &ClientState, key_type: u8, key_len: usize) -> Result<Vec<u8>> {
    let ex = &st.negotiate_st.ex;
    let (Some(kex), Some(kex_output), Some(session_id)) =
        (ex.kex.as_deref(), ex.kex_output.as_ref(), st.session_id.as_ref())
        else { return Err(Error::Protocol("cannot derive keys before the key exchange finished")) };

    Ok(derive_key(
        &|data| kex.compute_hash(data),
        &kex_output.shared_secret_be,
        &kex_output.exchange_hash,
        session_id,
        key_type,
        key_len,
    ))
}

/// Derives a key as described in RFC 4253, section 7.2.
///
/// The first block is `HASH(K || H || key_type || session_id)`, and the key is extended with
/// `HASH(K || H || key_so_far)` until it is long enough.
fn derive_key(
    compute_hash: &dyn Fn(&[u8]) -> Vec<u8>,
    shared_secret_be: &[u8],
    exchange_hash: &[u8],
    session_id: &[u8],
    key_type: u8,
    key_len: usize,
) -> Vec<u8> {
    let mut to_hash_prefix = PacketEncode::new();
    to_hash_prefix.put_mpint_uint_be(shared_secret_be);
    to_hash_prefix.put_raw(exchange_hash);

    let mut key = {
        let mut to_hash = to_hash_prefix.clone();
        to_hash.put_u8(key_type);
        to_hash.put_raw(session_id);
        compute_hash(&to_hash.finish())
    };

    while key.len() < key_len {
        let mut to_hash = to_hash_prefix.clone();
        to_hash.put_raw(&key);
        key.extend_from_slice(&compute_hash(&to_hash.finish()));
    }

    key.truncate(key_len);
    key
}

/// True between the peer's `SSH_MSG_KEXINIT` and its `SSH_MSG_NEWKEYS`.
pub(super) fn is_peer_in_kex(st: &ClientState) -> bool {
    st.negotiate_st.ex.their_kex_init.is_some() && !st.negotiate_st.ex.new_keys_recvd
}

pub(super) fn is_ready(st: &ClientState) -> bool {
    matches!(st.negotiate_st.state, State::Idle)
}

/// Aborts the key exchange; everybody who waits for it gets an error.
pub(super) fn teardown(st: &mut ClientState) {
    st.negotiate_st = Box::default();
}
