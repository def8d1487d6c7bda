use crate::error::{Error, Result};
use crate::util::CryptoRngCore;
use super::{KexAlgo, digest};
use super::ecdh::{Agreement, init_kex};

/// "curve25519-sha256" key exchange from RFC 8731.
pub static CURVE25519_SHA256: KexAlgo = KexAlgo {
    name: "curve25519-sha256",
    make_kex: |rng| Ok(Box::new(init_kex(X25519Agreement::generate(rng), digest::<sha2::Sha256>))),
};

/// "curve25519-sha256@libssh.com" key exchange, the original name of
/// [`CURVE25519_SHA256`].
pub static CURVE25519_SHA256_LIBSSH: KexAlgo = KexAlgo {
    name: "curve25519-sha256@libssh.com",
    make_kex: |rng| Ok(Box::new(init_kex(X25519Agreement::generate(rng), digest::<sha2::Sha256>))),
};

struct X25519Agreement {
    secret: x25519_dalek::EphemeralSecret,
    public: x25519_dalek::PublicKey,
}

impl X25519Agreement {
    fn generate(rng: &mut dyn CryptoRngCore) -> Box<dyn Agreement + Send> {
        let secret = x25519_dalek::EphemeralSecret::random_from_rng(&mut *rng);
        let public = x25519_dalek::PublicKey::from(&secret);
        Box::new(X25519Agreement { secret, public })
    }
}

impl Agreement for X25519Agreement {
    fn public_bytes(&self) -> Vec<u8> {
        self.public.as_bytes().to_vec()
    }

    fn agree(self: Box<Self>, peer_public: &[u8]) -> Result<Vec<u8>> {
        let peer_public: [u8; 32] = peer_public.try_into()
            .map_err(|_| Error::Protocol("server sent X25519 public key with invalid length"))?;
        let shared_secret = self.secret.diffie_hellman(&x25519_dalek::PublicKey::from(peer_public));

        // RFC 8731, section 3: the all-zero output must be rejected
        if !shared_secret.was_contributory() {
            return Err(Error::Protocol("server sent low order X25519 public key"))
        }

        // the 32 bytes are interpreted as an unsigned number in network byte order
        Ok(shared_secret.as_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng as _;
    use std::task::Poll;
    use crate::codec::{PacketDecode, PacketEncode};
    use crate::codes::msg;
    use crate::kex::KexInput;
    use super::*;

    fn input() -> KexInput<'static> {
        KexInput {
            client_ident: b"SSH-2.0-client",
            server_ident: b"SSH-2.0-server",
            client_kex_init: b"\x14client",
            server_kex_init: b"\x14server",
        }
    }

    fn run_with_server_key(server_eph_pubkey: &[u8]) -> (Vec<u8>, Poll<Result<crate::kex::KexOutput>>) {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(30);
        let mut kex = (CURVE25519_SHA256.make_kex)(&mut rng).unwrap();
        let mut init = PacketDecode::new(kex.send_packet().unwrap().unwrap());
        assert_eq!(init.get_u8().unwrap(), msg::KEX_ECDH_INIT);
        let client_eph_pubkey = init.get_bytes().unwrap().to_vec();

        let mut reply = PacketEncode::new();
        reply.put_bytes(b"host key");
        reply.put_bytes(server_eph_pubkey);
        reply.put_bytes(b"signature");
        kex.recv_packet(msg::KEX_ECDH_REPLY, &mut PacketDecode::new(reply.finish())).unwrap();
        (client_eph_pubkey, kex.poll(input()))
    }

    #[test]
    fn test_agrees() {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(31);
        let server_secret = x25519_dalek::StaticSecret::random_from_rng(&mut rng);
        let server_public = x25519_dalek::PublicKey::from(&server_secret);

        let (client_public, output) = run_with_server_key(server_public.as_bytes());
        let client_public: [u8; 32] = client_public.try_into().unwrap();
        let expected = server_secret.diffie_hellman(&x25519_dalek::PublicKey::from(client_public));

        let Poll::Ready(Ok(output)) = output else { panic!("exchange failed") };
        assert_eq!(&output.shared_secret_be[..], expected.as_bytes());
    }

    #[test]
    fn test_reject_low_order_point() {
        let (_, output) = run_with_server_key(&[0; 32]);
        assert!(matches!(output, Poll::Ready(Err(Error::Protocol(_)))));
    }

    #[test]
    fn test_reject_bad_length() {
        let (_, output) = run_with_server_key(&[9; 31]);
        assert!(matches!(output, Poll::Ready(Err(Error::Protocol(_)))));
    }
}
