use anyhow::{Context as _, ensure};
use bytes::{BufMut as _, Bytes, BytesMut};
use ctr::cipher::{KeyIvInit as _, StreamCipher as _};
use ed25519_dalek::Signer as _;
use hmac::Mac as _;
use sha2::Digest as _;
use sshpipe::{PacketDecode, PacketEncode};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _, DuplexStream};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type HmacSha256 = hmac::Hmac<sha2::Sha256>;

pub const SERVER_IDENT: &str = "SSH-2.0-scripted";

/// Server side of an in-memory connection that sends prepared bytes and records what the client
/// wrote.
///
/// After [`handshake()`][Self::handshake()], packets in both directions are protected with
/// "aes128-ctr" and "hmac-sha2-256".
pub struct ScriptedPeer {
    stream: DuplexStream,
    send_seq: u32,
    recv_seq: u32,
    send_keys: Option<PacketKeys>,
    recv_keys: Option<PacketKeys>,
    client_ident: Bytes,
    session_id: Option<Vec<u8>>,
}

struct PacketKeys {
    cipher: Aes128Ctr,
    mac_key: Vec<u8>,
}

impl PacketKeys {
    fn new(key: &[u8], iv: &[u8], mac_key: Vec<u8>) -> anyhow::Result<PacketKeys> {
        let cipher = Aes128Ctr::new_from_slices(key, iv)
            .map_err(|_| anyhow::anyhow!("bad aes128-ctr key length"))?;
        Ok(PacketKeys { cipher, mac_key })
    }

    fn tag(&self, packet_seq: u32, packet: &[u8]) -> anyhow::Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.mac_key)
            .map_err(|_| anyhow::anyhow!("bad hmac key length"))?;
        mac.update(&packet_seq.to_be_bytes());
        mac.update(packet);
        Ok(mac)
    }
}

impl ScriptedPeer {
    pub fn new(stream: DuplexStream) -> ScriptedPeer {
        ScriptedPeer {
            stream,
            send_seq: 0,
            recv_seq: 0,
            send_keys: None,
            recv_keys: None,
            client_ident: Bytes::new(),
            session_id: None,
        }
    }

    /// Exchanges identification lines and runs the first key exchange. Returns the exchange hash.
    pub async fn handshake(&mut self, host_key: &ed25519_dalek::SigningKey) -> anyhow::Result<Vec<u8>> {
        self.send_line(SERVER_IDENT).await?;
        self.client_ident = self.recv_ident().await?;
        self.kex(host_key).await
    }

    /// Runs the server side of a "curve25519-sha256" key exchange with `host_key`, starting with
    /// the `SSH_MSG_KEXINIT` of the client, and switches to the new keys. Returns the exchange
    /// hash.
    pub async fn kex(&mut self, host_key: &ed25519_dalek::SigningKey) -> anyhow::Result<Vec<u8>> {
        let client_kex_init = self.recv_packet().await?;
        ensure!(client_kex_init.first() == Some(&20), "client did not send SSH_MSG_KEXINIT");
        let server_kex_init = KexInit::default().encode();
        self.send_packet(&server_kex_init).await?;

        let mut ecdh_init = PacketDecode::new(self.recv_packet().await?);
        ensure!(ecdh_init.get_u8()? == 30, "client did not send SSH_MSG_KEX_ECDH_INIT");
        let client_eph: [u8; 32] = ecdh_init.get_bytes()?.as_ref().try_into()
            .context("client ephemeral key has bad length")?;

        let server_secret = x25519_dalek::StaticSecret::from([0x24; 32]);
        let server_eph = x25519_dalek::PublicKey::from(&server_secret);
        let shared_secret = server_secret.diffie_hellman(&x25519_dalek::PublicKey::from(client_eph));
        let host_key_blob = host_key_blob(host_key);

        let mut exchange_data = PacketEncode::new();
        exchange_data.put_bytes(&self.client_ident);
        exchange_data.put_bytes(SERVER_IDENT.as_bytes());
        exchange_data.put_bytes(&client_kex_init);
        exchange_data.put_bytes(&server_kex_init);
        exchange_data.put_bytes(&host_key_blob);
        exchange_data.put_bytes(&client_eph);
        exchange_data.put_bytes(server_eph.as_bytes());
        exchange_data.put_mpint_uint_be(shared_secret.as_bytes());
        let exchange_hash = sha2::Sha256::digest(exchange_data.finish()).to_vec();

        let mut signature = PacketEncode::new();
        signature.put_str("ssh-ed25519");
        signature.put_bytes(&host_key.sign(&exchange_hash).to_bytes());

        let mut reply = PacketEncode::new();
        reply.put_u8(31);
        reply.put_bytes(&host_key_blob);
        reply.put_bytes(server_eph.as_bytes());
        reply.put_bytes(&signature.finish());
        self.send_packet(&reply.finish()).await?;
        self.send_packet(&[21]).await?;

        let session_id = self.session_id.get_or_insert_with(|| exchange_hash.clone()).clone();
        let mut secret = PacketEncode::new();
        secret.put_mpint_uint_be(shared_secret.as_bytes());
        let secret = secret.finish();
        let derive = |key_type: u8| {
            let mut hash = sha2::Sha256::new();
            hash.update(&secret);
            hash.update(&exchange_hash);
            hash.update([key_type]);
            hash.update(&session_id);
            hash.finalize().to_vec()
        };

        self.send_keys = Some(PacketKeys::new(&derive(b'D')[..16], &derive(b'B')[..16], derive(b'F'))?);
        let new_keys = self.recv_packet().await?;
        ensure!(new_keys[..] == [21u8], "client did not send SSH_MSG_NEWKEYS");
        self.recv_keys = Some(PacketKeys::new(&derive(b'C')[..16], &derive(b'A')[..16], derive(b'E'))?);
        Ok(exchange_hash)
    }

    /// Accepts the "ssh-userauth" service and lets `username` in with the "none" method.
    pub async fn accept_auth_none(&mut self, username: &str) -> anyhow::Result<()> {
        let mut service_req = PacketDecode::new(self.recv_packet().await?);
        ensure!(service_req.get_u8()? == 5, "client did not send SSH_MSG_SERVICE_REQUEST");
        ensure!(service_req.get_string()? == "ssh-userauth");
        let mut accept = PacketEncode::new();
        accept.put_u8(6);
        accept.put_str("ssh-userauth");
        self.send_packet(&accept.finish()).await?;

        let mut auth_req = PacketDecode::new(self.recv_packet().await?);
        ensure!(auth_req.get_u8()? == 50, "client did not send SSH_MSG_USERAUTH_REQUEST");
        ensure!(auth_req.get_string()? == username);
        ensure!(auth_req.get_string()? == "ssh-connection");
        ensure!(auth_req.get_string()? == "none");
        self.send_packet(&[52]).await
    }

    pub async fn send_line(&mut self, line: &str) -> anyhow::Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.write_all(b"\r\n").await?;
        Ok(())
    }

    /// Sends a packet, encrypted once the handshake is done.
    pub async fn send_packet(&mut self, payload: &[u8]) -> anyhow::Result<()> {
        let packet_seq = self.send_seq;
        self.send_seq = self.send_seq.wrapping_add(1);
        let Some(keys) = self.send_keys.as_mut() else {
            self.stream.write_all(&frame_packet(payload, 8)).await?;
            return Ok(())
        };

        let mut packet = frame_packet(payload, 16).to_vec();
        let tag = keys.tag(packet_seq, &packet)?.finalize().into_bytes();
        keys.cipher.apply_keystream(&mut packet);
        packet.extend_from_slice(&tag);
        self.stream.write_all(&packet).await?;
        Ok(())
    }

    /// Reads the identification line of the client.
    pub async fn recv_ident(&mut self) -> anyhow::Result<Bytes> {
        let mut line = Vec::new();
        while !line.ends_with(b"\r\n") {
            line.push(self.stream.read_u8().await?);
        }
        line.truncate(line.len() - 2);
        Ok(line.into())
    }

    /// Reads a packet and returns its payload.
    pub async fn recv_packet(&mut self) -> anyhow::Result<Bytes> {
        let packet_seq = self.recv_seq;
        self.recv_seq = self.recv_seq.wrapping_add(1);
        let block_len = if self.recv_keys.is_some() { 16 } else { 8 };

        let mut packet = vec![0; block_len];
        self.stream.read_exact(&mut packet).await?;
        if let Some(keys) = self.recv_keys.as_mut() {
            keys.cipher.apply_keystream(&mut packet);
        }
        let packet_len = u32::from_be_bytes([packet[0], packet[1], packet[2], packet[3]]) as usize;
        ensure!(packet_len >= 5 && packet_len <= 35000, "bad packet length {}", packet_len);
        ensure!((4 + packet_len) % block_len == 0, "packet length {} is not aligned", packet_len);

        packet.resize(4 + packet_len, 0);
        self.stream.read_exact(&mut packet[block_len..]).await?;
        if let Some(keys) = self.recv_keys.as_mut() {
            keys.cipher.apply_keystream(&mut packet[block_len..]);
            let mut tag = [0; 32];
            self.stream.read_exact(&mut tag).await?;
            keys.tag(packet_seq, &packet)?.verify_slice(&tag)
                .map_err(|_| anyhow::anyhow!("client packet {} has bad MAC", packet_seq))?;
        }

        let padding_len = packet[4] as usize;
        ensure!(padding_len >= 4 && padding_len < packet_len, "bad padding length");
        Ok(Bytes::copy_from_slice(&packet[5..4 + packet_len - padding_len]))
    }

    /// Reads everything the client wrote until it dropped its end of the stream.
    pub async fn read_to_end(mut self) -> anyhow::Result<Bytes> {
        let mut buf = Vec::new();
        self.stream.read_to_end(&mut buf).await?;
        Ok(buf.into())
    }
}

pub fn frame_packet(payload: &[u8], block_len: usize) -> Bytes {
    let mut padding_len = block_len - (5 + payload.len()) % block_len;
    if padding_len < 4 {
        padding_len += block_len;
    }

    let mut buf = BytesMut::new();
    buf.put_u32((1 + payload.len() + padding_len) as u32);
    buf.put_u8(padding_len as u8);
    buf.put_slice(payload);
    buf.put_bytes(0, padding_len);
    buf.freeze()
}

/// Algorithm lists of a server `SSH_MSG_KEXINIT`.
pub struct KexInit {
    pub kex_algos: Vec<&'static str>,
    pub server_pubkey_algos: Vec<&'static str>,
    pub cipher_algos: Vec<&'static str>,
    pub mac_algos: Vec<&'static str>,
    pub compress_algos: Vec<&'static str>,
}

impl Default for KexInit {
    fn default() -> Self {
        KexInit {
            kex_algos: vec!["curve25519-sha256"],
            server_pubkey_algos: vec!["ssh-ed25519"],
            cipher_algos: vec!["aes128-ctr"],
            mac_algos: vec!["hmac-sha2-256"],
            compress_algos: vec!["none"],
        }
    }
}

impl KexInit {
    pub fn encode(&self) -> Bytes {
        let mut payload = PacketEncode::new();
        payload.put_u8(20);
        payload.put_raw(&[0x5a; 16]);
        payload.put_name_list(&self.kex_algos);
        payload.put_name_list(&self.server_pubkey_algos);
        payload.put_name_list(&self.cipher_algos);
        payload.put_name_list(&self.cipher_algos);
        payload.put_name_list(&self.mac_algos);
        payload.put_name_list(&self.mac_algos);
        payload.put_name_list(&self.compress_algos);
        payload.put_name_list(&self.compress_algos);
        payload.put_name_list(&[]);
        payload.put_name_list(&[]);
        payload.put_bool(false);
        payload.put_u32(0);
        payload.finish()
    }
}

pub fn disconnect_payload(reason_code: u32, description: &str) -> Bytes {
    let mut payload = PacketEncode::new();
    payload.put_u8(1);
    payload.put_u32(reason_code);
    payload.put_str(description);
    payload.put_str("");
    payload.finish()
}

/// Splits the client output into the identification line and the rest.
pub fn split_ident(output: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = output.windows(2).position(|w| w == b"\r\n")?;
    Some((&output[..pos], &output[pos + 2..]))
}

/// Ed25519 host key of the scripted server.
pub fn host_key() -> ed25519_dalek::SigningKey {
    ed25519_dalek::SigningKey::from_bytes(&[0x42; 32])
}

pub fn host_key_blob(host_key: &ed25519_dalek::SigningKey) -> Bytes {
    let mut blob = PacketEncode::new();
    blob.put_str("ssh-ed25519");
    blob.put_bytes(host_key.verifying_key().as_bytes());
    blob.finish()
}

/// Encodes a message that starts with `msg_id` and the recipient channel.
pub fn channel_msg(msg_id: u8, channel_id: u32, encode: impl FnOnce(&mut PacketEncode)) -> Bytes {
    let mut payload = PacketEncode::new();
    payload.put_u8(msg_id);
    payload.put_u32(channel_id);
    encode(&mut payload);
    payload.finish()
}

/// Message numbers the scripted peer needs (RFC 4253/4254); `sshpipe::codes::msg` is crate-private.
#[allow(dead_code)]
pub mod msg {
    pub const DISCONNECT: u8 = 1;
    pub const CHANNEL_OPEN: u8 = 90;
    pub const CHANNEL_OPEN_CONFIRMATION: u8 = 91;
    pub const CHANNEL_OPEN_FAILURE: u8 = 92;
    pub const CHANNEL_WINDOW_ADJUST: u8 = 93;
    pub const CHANNEL_DATA: u8 = 94;
    pub const CHANNEL_EXTENDED_DATA: u8 = 95;
    pub const CHANNEL_EOF: u8 = 96;
    pub const CHANNEL_CLOSE: u8 = 97;
    pub const CHANNEL_REQUEST: u8 = 98;
    pub const CHANNEL_SUCCESS: u8 = 99;
}
