use bytes::Bytes;
use derivative::Derivative;
use hex_literal::hex;
use num_bigint_dig::{BigUint, RandBigInt as _};
use std::task::Poll;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result};
use crate::util::CryptoRngCore;
use super::{KexAlgo, KexInput, KexOutput, Kex, digest};

/// "diffie-hellman-group1-sha1" key exchange from RFC 4253.
///
/// The name refers to "group1", but in fact the key exchange uses the 1024-bit Oakley group 2.
/// RFC 9142 recommends against it, so it is not enabled by default.
pub static DIFFIE_HELLMAN_GROUP1_SHA1: KexAlgo = KexAlgo {
    name: "diffie-hellman-group1-sha1",
    make_kex: |rng| Ok(Box::new(init_kex(Group::group_2(), digest::<sha1::Sha1>, rng))),
};

/// "diffie-hellman-group14-sha1" key exchange from RFC 4253.
pub static DIFFIE_HELLMAN_GROUP14_SHA1: KexAlgo = KexAlgo {
    name: "diffie-hellman-group14-sha1",
    make_kex: |rng| Ok(Box::new(init_kex(Group::group_14(), digest::<sha1::Sha1>, rng))),
};

/// "diffie-hellman-group14-sha256" key exchange from RFC 8268.
pub static DIFFIE_HELLMAN_GROUP14_SHA256: KexAlgo = KexAlgo {
    name: "diffie-hellman-group14-sha256",
    make_kex: |rng| Ok(Box::new(init_kex(Group::group_14(), digest::<sha2::Sha256>, rng))),
};

/// "diffie-hellman-group16-sha512" key exchange from RFC 8268.
pub static DIFFIE_HELLMAN_GROUP16_SHA512: KexAlgo = KexAlgo {
    name: "diffie-hellman-group16-sha512",
    make_kex: |rng| Ok(Box::new(init_kex(Group::group_16(), digest::<sha2::Sha512>, rng))),
};

/// Finite field group `(p, g)` used for Diffie-Hellman.
#[derive(Debug, Clone)]
pub(super) struct Group {
    pub g: BigUint,
    pub p: BigUint,
    p_minus_1: BigUint,
}

/// Upper bound on the size of the private exponent; twice the security level of the strongest
/// hash that we use.
const PRIVKEY_BITS_MAX: usize = 1024;

impl Group {
    pub(super) fn new(p: BigUint, g: BigUint) -> Group {
        let p_minus_1 = &p - BigUint::from(1u32);
        Group { g, p, p_minus_1 }
    }

    /// Generates the ephemeral keypair `(x, e = g^x mod p)`.
    pub(super) fn gen_keypair(&self, rng: &mut dyn CryptoRngCore) -> (BigUint, BigUint) {
        let bits = (self.p.bits() - 1).min(PRIVKEY_BITS_MAX);
        let upper = BigUint::from(1u32) << bits;
        let privkey = rng.as_rngcore().gen_biguint_range(&BigUint::from(2u32), &upper);
        let pubkey = self.g.modpow(&privkey, &self.p);
        (privkey, pubkey)
    }

    /// Checks that `1 < value < p - 1` (RFC 8268, section 4).
    pub(super) fn is_valid_element(&self, value: &BigUint) -> bool {
        *value > BigUint::from(1u32) && *value < self.p_minus_1
    }

    pub(super) fn bits(&self) -> usize {
        self.p.bits()
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
struct DiffieHellmanKex {
    group: Group,
    #[derivative(Debug = "ignore")]
    compute_hash: fn(&[u8]) -> Vec<u8>,
    our_eph_privkey: BigUint,
    our_eph_pubkey: BigUint,
    state: State,
}

#[derive(Debug)]
enum State {
    Init,
    WaitReply,
    Replied(KexdhReply),
    Done,
}

#[derive(Debug)]
struct KexdhReply {
    server_pubkey: Bytes,
    server_eph_pubkey: BigUint,
    server_exchange_hash_sign: Bytes,
}

fn init_kex(
    group: Group,
    compute_hash: fn(&[u8]) -> Vec<u8>,
    rng: &mut dyn CryptoRngCore,
) -> DiffieHellmanKex {
    let (our_eph_privkey, our_eph_pubkey) = group.gen_keypair(rng);
    DiffieHellmanKex { group, compute_hash, our_eph_privkey, our_eph_pubkey, state: State::Init }
}

impl Kex for DiffieHellmanKex {
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        match (msg_id, &self.state) {
            (msg::KEXDH_REPLY, State::WaitReply) => recv_kexdh_reply(self, payload),
            (msg::KEXDH_REPLY, _) => Err(Error::Protocol("received unexpected SSH_MSG_KEXDH_REPLY")),
            _ => Err(Error::Protocol("received unexpected key exchange message")),
        }
    }

    fn send_packet(&mut self) -> Result<Option<Bytes>> {
        if let State::Init = self.state {
            let payload = send_kexdh_init(self);
            self.state = State::WaitReply;
            return Ok(Some(payload))
        }
        Ok(None)
    }

    fn poll(&mut self, input: KexInput) -> Poll<Result<KexOutput>> {
        match std::mem::replace(&mut self.state, State::Done) {
            State::Replied(reply) => Poll::Ready(exchange(self, reply, input)),
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

fn send_kexdh_init(kex: &DiffieHellmanKex) -> Bytes {
    // RFC 4253, section 8
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::KEXDH_INIT);
    payload.put_biguint(&kex.our_eph_pubkey);
    log::debug!("sending SSH_MSG_KEXDH_INIT");
    payload.finish()
}

fn recv_kexdh_reply(kex: &mut DiffieHellmanKex, payload: &mut PacketDecode) -> Result<()> {
    // RFC 4253, section 8
    let server_pubkey = payload.get_bytes()?;
    let server_eph_pubkey = payload.get_biguint()?;
    let server_exchange_hash_sign = payload.get_bytes()?;

    if !kex.group.is_valid_element(&server_eph_pubkey) {
        return Err(Error::Protocol("server sent invalid Diffie-Hellman ephemeral public key"))
    }

    kex.state = State::Replied(KexdhReply { server_pubkey, server_eph_pubkey, server_exchange_hash_sign });
    log::debug!("received SSH_MSG_KEXDH_REPLY");
    Ok(())
}

fn exchange(kex: &DiffieHellmanKex, reply: KexdhReply, input: KexInput) -> Result<KexOutput> {
    let KexdhReply { server_pubkey, server_eph_pubkey, server_exchange_hash_sign } = reply;
    let shared_secret = server_eph_pubkey.modpow(&kex.our_eph_privkey, &kex.group.p);

    let mut exchange_data = PacketEncode::new();
    exchange_data.put_bytes(input.client_ident);
    exchange_data.put_bytes(input.server_ident);
    exchange_data.put_bytes(input.client_kex_init);
    exchange_data.put_bytes(input.server_kex_init);
    exchange_data.put_bytes(&server_pubkey);
    exchange_data.put_biguint(&kex.our_eph_pubkey);
    exchange_data.put_biguint(&server_eph_pubkey);
    exchange_data.put_biguint(&shared_secret);
    let exchange_hash = (kex.compute_hash)(&exchange_data.finish());

    Ok(KexOutput {
        shared_secret_be: shared_secret.to_bytes_be(),
        exchange_hash, server_pubkey, server_exchange_hash_sign,
    })
}

impl Group {
    pub(super) fn group_2() -> Group {
        // RFC 2409, section 6.2
        let g = BigUint::from(2u32);
        let p = BigUint::from_bytes_be(&hex!(
            "FFFFFFFF" "FFFFFFFF" "C90FDAA2" "2168C234" "C4C6628B" "80DC1CD1"
            "29024E08" "8A67CC74" "020BBEA6" "3B139B22" "514A0879" "8E3404DD"
            "EF9519B3" "CD3A431B" "302B0A6D" "F25F1437" "4FE1356D" "6D51C245"
            "E485B576" "625E7EC6" "F44C42E9" "A637ED6B" "0BFF5CB6" "F406B7ED"
            "EE386BFB" "5A899FA5" "AE9F2411" "7C4B1FE6" "49286651" "ECE65381"
            "FFFFFFFF" "FFFFFFFF"
        ));
        Group::new(p, g)
    }

    pub(super) fn group_14() -> Group {
        // RFC 3526, section 3
        let g = BigUint::from(2u32);
        let p = BigUint::from_bytes_be(&hex!(
            "FFFFFFFF" "FFFFFFFF" "C90FDAA2" "2168C234" "C4C6628B" "80DC1CD1"
            "29024E08" "8A67CC74" "020BBEA6" "3B139B22" "514A0879" "8E3404DD"
            "EF9519B3" "CD3A431B" "302B0A6D" "F25F1437" "4FE1356D" "6D51C245"
            "E485B576" "625E7EC6" "F44C42E9" "A637ED6B" "0BFF5CB6" "F406B7ED"
            "EE386BFB" "5A899FA5" "AE9F2411" "7C4B1FE6" "49286651" "ECE45B3D"
            "C2007CB8" "A163BF05" "98DA4836" "1C55D39A" "69163FA8" "FD24CF5F"
            "83655D23" "DCA3AD96" "1C62F356" "208552BB" "9ED52907" "7096966D"
            "670C354E" "4ABC9804" "F1746C08" "CA18217C" "32905E46" "2E36CE3B"
            "E39E772C" "180E8603" "9B2783A2" "EC07A28F" "B5C55DF0" "6F4C52C9"
            "DE2BCBF6" "95581718" "3995497C" "EA956AE5" "15D22618" "98FA0510"
            "15728E5A" "8AACAA68" "FFFFFFFF" "FFFFFFFF"
        ));
        Group::new(p, g)
    }

    pub(super) fn group_16() -> Group {
        // RFC 3526, section 5
        let g = BigUint::from(2u32);
        let p = BigUint::from_bytes_be(&hex!(
            "FFFFFFFF" "FFFFFFFF" "C90FDAA2" "2168C234" "C4C6628B" "80DC1CD1"
            "29024E08" "8A67CC74" "020BBEA6" "3B139B22" "514A0879" "8E3404DD"
            "EF9519B3" "CD3A431B" "302B0A6D" "F25F1437" "4FE1356D" "6D51C245"
            "E485B576" "625E7EC6" "F44C42E9" "A637ED6B" "0BFF5CB6" "F406B7ED"
            "EE386BFB" "5A899FA5" "AE9F2411" "7C4B1FE6" "49286651" "ECE45B3D"
            "C2007CB8" "A163BF05" "98DA4836" "1C55D39A" "69163FA8" "FD24CF5F"
            "83655D23" "DCA3AD96" "1C62F356" "208552BB" "9ED52907" "7096966D"
            "670C354E" "4ABC9804" "F1746C08" "CA18217C" "32905E46" "2E36CE3B"
            "E39E772C" "180E8603" "9B2783A2" "EC07A28F" "B5C55DF0" "6F4C52C9"
            "DE2BCBF6" "95581718" "3995497C" "EA956AE5" "15D22618" "98FA0510"
            "15728E5A" "8AAAC42D" "AD33170D" "04507A33" "A85521AB" "DF1CBA64"
            "ECFB8504" "58DBEF0A" "8AEA7157" "5D060C7D" "B3970F85" "A6E1E4C7"
            "ABF5AE8C" "DB0933D7" "1E8C94E0" "4A25619D" "CEE3D226" "1AD2EE6B"
            "F12FFA06" "D98A0864" "D8760273" "3EC86A64" "521F2B18" "177B200C"
            "BBE11757" "7A615D6C" "770988C0" "BAD946E2" "08E24FA0" "74E5AB31"
            "43DB5BFC" "E0FD108E" "4B82D120" "A9210801" "1A723C12" "A787E6D7"
            "88719A10" "BDBA5B26" "99C32718" "6AF4E23C" "1A946834" "B6150BDA"
            "2583E9CA" "2AD44CE8" "DBBBC2DB" "04DE8EF9" "2E8EFC14" "1FBECAA6"
            "287C5947" "4E6BC05D" "99B2964F" "A090C3A2" "233BA186" "515BE7ED"
            "1F612970" "CEE2D7AF" "B81BDD76" "2170481C" "D0069127" "D5B05AA9"
            "93B4EA98" "8D8FDDC1" "86FFB7DC" "90A6C08F" "4DF435C9" "34063199"
            "FFFFFFFF" "FFFFFFFF"
        ));
        Group::new(p, g)
    }
}
