use bytes::Bytes;
use derivative::Derivative;
use std::task::Poll;
use crate::codec::{PacketDecode, PacketEncode};
use crate::codes::msg;
use crate::error::{Error, Result};
use crate::util::CryptoRngCore;
use super::{KexAlgo, KexInput, KexOutput, Kex, digest};

/// "ecdh-sha2-nistp256" key exchange from RFC 5656.
pub static ECDH_SHA2_NISTP256: KexAlgo = KexAlgo {
    name: "ecdh-sha2-nistp256",
    make_kex: |rng| Ok(Box::new(init_kex(P256Agreement::generate(rng), digest::<sha2::Sha256>))),
};

/// "ecdh-sha2-nistp384" key exchange from RFC 5656.
pub static ECDH_SHA2_NISTP384: KexAlgo = KexAlgo {
    name: "ecdh-sha2-nistp384",
    make_kex: |rng| Ok(Box::new(init_kex(P384Agreement::generate(rng), digest::<sha2::Sha384>))),
};

/// "ecdh-sha2-nistp521" key exchange from RFC 5656.
pub static ECDH_SHA2_NISTP521: KexAlgo = KexAlgo {
    name: "ecdh-sha2-nistp521",
    make_kex: |rng| Ok(Box::new(init_kex(P521Agreement::generate(rng), digest::<sha2::Sha512>))),
};

/// Ephemeral key agreement on an elliptic curve.
pub(super) trait Agreement {
    /// Our ephemeral public key, encoded as `Q_C`.
    fn public_bytes(&self) -> Vec<u8>;
    /// Validates the peer's public key and computes the shared secret as unsigned big endian.
    fn agree(self: Box<Self>, peer_public: &[u8]) -> Result<Vec<u8>>;
}

macro_rules! nist_agreement {
    ($name:ident, $curve:ident) => {
        struct $name {
            secret: $curve::ecdh::EphemeralSecret,
        }

        impl $name {
            fn generate(mut rng: &mut dyn CryptoRngCore) -> Box<dyn Agreement + Send> {
                let secret = $curve::ecdh::EphemeralSecret::random(&mut rng);
                Box::new($name { secret })
            }
        }

        impl Agreement for $name {
            fn public_bytes(&self) -> Vec<u8> {
                use $curve::elliptic_curve::sec1::ToEncodedPoint as _;
                self.secret.public_key().to_encoded_point(false).as_bytes().to_vec()
            }

            fn agree(self: Box<Self>, peer_public: &[u8]) -> Result<Vec<u8>> {
                // decoding checks that the point lies on the curve and is not the identity
                let peer_public = $curve::PublicKey::from_sec1_bytes(peer_public)
                    .map_err(|_| Error::Protocol("server sent invalid ECDH ephemeral public key"))?;
                let shared_secret = self.secret.diffie_hellman(&peer_public);
                Ok(shared_secret.raw_secret_bytes().to_vec())
            }
        }
    };
}

nist_agreement!(P256Agreement, p256);
nist_agreement!(P384Agreement, p384);
nist_agreement!(P521Agreement, p521);

#[derive(Derivative)]
#[derivative(Debug)]
pub(super) struct EcdhKex {
    #[derivative(Debug = "ignore")]
    compute_hash: fn(&[u8]) -> Vec<u8>,
    #[derivative(Debug = "ignore")]
    our_eph_privkey: Option<Box<dyn Agreement + Send>>,
    our_eph_pubkey: Vec<u8>,
    state: State,
}

#[derive(Debug)]
enum State {
    Init,
    WaitReply,
    Replied(EcdhReply),
    Done,
}

#[derive(Debug)]
struct EcdhReply {
    server_pubkey: Bytes,
    server_eph_pubkey: Bytes,
    server_exchange_hash_sign: Bytes,
}

pub(super) fn init_kex(
    our_eph_privkey: Box<dyn Agreement + Send>,
    compute_hash: fn(&[u8]) -> Vec<u8>,
) -> EcdhKex {
    let our_eph_pubkey = our_eph_privkey.public_bytes();
    EcdhKex { compute_hash, our_eph_privkey: Some(our_eph_privkey), our_eph_pubkey, state: State::Init }
}

impl Kex for EcdhKex {
    fn recv_packet(&mut self, msg_id: u8, payload: &mut PacketDecode) -> Result<()> {
        match (msg_id, &self.state) {
            (msg::KEX_ECDH_REPLY, State::WaitReply) => recv_ecdh_reply(self, payload),
            (msg::KEX_ECDH_REPLY, _) => Err(Error::Protocol("received unexpected SSH_MSG_KEX_ECDH_REPLY")),
            _ => Err(Error::Protocol("received unexpected key exchange message")),
        }
    }

    fn send_packet(&mut self) -> Result<Option<Bytes>> {
        if let State::Init = self.state {
            let payload = send_ecdh_init(self);
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

fn send_ecdh_init(kex: &EcdhKex) -> Bytes {
    // RFC 5656, section 4
    let mut payload = PacketEncode::new();
    payload.put_u8(msg::KEX_ECDH_INIT);
    payload.put_bytes(&kex.our_eph_pubkey);
    log::debug!("sending SSH_MSG_KEX_ECDH_INIT");
    payload.finish()
}

fn recv_ecdh_reply(kex: &mut EcdhKex, payload: &mut PacketDecode) -> Result<()> {
    // RFC 5656, section 4 and RFC 8731, section 3.1
    let server_pubkey = payload.get_bytes()?;
    let server_eph_pubkey = payload.get_bytes()?;
    let server_exchange_hash_sign = payload.get_bytes()?;

    kex.state = State::Replied(EcdhReply { server_pubkey, server_eph_pubkey, server_exchange_hash_sign });
    log::debug!("received SSH_MSG_KEX_ECDH_REPLY");
    Ok(())
}

fn exchange(kex: &mut EcdhKex, reply: EcdhReply, input: KexInput) -> Result<KexOutput> {
    let EcdhReply { server_pubkey, server_eph_pubkey, server_exchange_hash_sign } = reply;
    let our_eph_privkey = kex.our_eph_privkey.take()
        .ok_or(Error::Protocol("key agreement was already performed"))?;
    let shared_secret_be = our_eph_privkey.agree(&server_eph_pubkey)?;

    let mut exchange_data = PacketEncode::new();
    exchange_data.put_bytes(input.client_ident);
    exchange_data.put_bytes(input.server_ident);
    exchange_data.put_bytes(input.client_kex_init);
    exchange_data.put_bytes(input.server_kex_init);
    exchange_data.put_bytes(&server_pubkey);
    exchange_data.put_bytes(&kex.our_eph_pubkey);
    exchange_data.put_bytes(&server_eph_pubkey);
    exchange_data.put_mpint_uint_be(&shared_secret_be);
    let exchange_hash = (kex.compute_hash)(&exchange_data.finish());

    Ok(KexOutput { shared_secret_be, exchange_hash, server_pubkey, server_exchange_hash_sign })
}

#[cfg(test)]
mod tests {
    use p256::elliptic_curve::sec1::ToEncodedPoint as _;
    use rand::SeedableRng as _;
    use super::*;

    fn input() -> KexInput<'static> {
        KexInput {
            client_ident: b"SSH-2.0-client",
            server_ident: b"SSH-2.0-server",
            client_kex_init: b"\x14client",
            server_kex_init: b"\x14server",
        }
    }

    fn ecdh_reply(server_eph_pubkey: &[u8]) -> PacketDecode {
        let mut reply = PacketEncode::new();
        reply.put_bytes(b"host key");
        reply.put_bytes(server_eph_pubkey);
        reply.put_bytes(b"signature");
        PacketDecode::new(reply.finish())
    }

    #[test]
    fn test_p256_agrees() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(20);
        let mut kex = (ECDH_SHA2_NISTP256.make_kex)(&mut rng).unwrap();

        let mut init = PacketDecode::new(kex.send_packet().unwrap().unwrap());
        assert_eq!(init.get_u8().unwrap(), msg::KEX_ECDH_INIT);
        let client_eph_pubkey = p256::PublicKey::from_sec1_bytes(&init.get_bytes().unwrap()).unwrap();

        let server_secret = p256::ecdh::EphemeralSecret::random(&mut rng);
        let server_eph_pubkey = server_secret.public_key().to_encoded_point(false);
        let expected = server_secret.diffie_hellman(&client_eph_pubkey);

        kex.recv_packet(msg::KEX_ECDH_REPLY, &mut ecdh_reply(server_eph_pubkey.as_bytes())).unwrap();
        let output = match kex.poll(input()) {
            Poll::Ready(output) => output.unwrap(),
            Poll::Pending => panic!("exchange should be finished"),
        };
        assert_eq!(&output.shared_secret_be[..], expected.raw_secret_bytes().as_slice());
        assert_eq!(output.exchange_hash.len(), 32);
    }

    #[test]
    fn test_invalid_point() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(21);
        let mut kex = (ECDH_SHA2_NISTP384.make_kex)(&mut rng).unwrap();
        kex.send_packet().unwrap();

        let mut bogus = vec![4u8];
        bogus.extend_from_slice(&[0x55; 96]);
        kex.recv_packet(msg::KEX_ECDH_REPLY, &mut ecdh_reply(&bogus)).unwrap();
        match kex.poll(input()) {
            Poll::Ready(Err(Error::Protocol(_))) => {},
            Poll::Ready(Err(err)) => panic!("unexpected error {:?}", err),
            Poll::Ready(Ok(_)) => panic!("invalid point was accepted"),
            Poll::Pending => panic!("exchange should be finished"),
        }
    }

    #[test]
    fn test_p521_public_key_len() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(22);
        let mut kex = (ECDH_SHA2_NISTP521.make_kex)(&mut rng).unwrap();
        let mut init = PacketDecode::new(kex.send_packet().unwrap().unwrap());
        init.get_u8().unwrap();
        assert_eq!(init.get_bytes().unwrap().len(), 1 + 2 * 66);
    }

    #[test]
    fn test_unexpected_message() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(23);
        let mut kex = (ECDH_SHA2_NISTP256.make_kex)(&mut rng).unwrap();
        let res = kex.recv_packet(msg::KEX_ECDH_REPLY, &mut ecdh_reply(b""));
        assert!(matches!(res, Err(Error::Protocol(_))));
        kex.send_packet().unwrap();
        let res = kex.recv_packet(35, &mut ecdh_reply(b""));
        assert!(matches!(res, Err(Error::Protocol(_))));
    }
}
