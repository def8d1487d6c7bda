use anyhow::{Context as _, Result, ensure, bail};
use sshpipe::{
    AuthNoneResult, Client, ClientEvent, ClientReceiver, ClientConfig, ChannelConfig, ChannelKind,
    DisconnectError, Error, HostKeyVerdict, PacketDecode, ServerHostKey, Session, SessionEvent,
    SessionReceiver,
};
use sshpipe::bytes::Bytes;
use sshpipe::codes::{disconnect, open};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use crate::peer::{ScriptedPeer, msg, KexInit, channel_msg, disconnect_payload, host_key, host_key_blob, split_ident};

mod peer;

type ClientTask = JoinHandle<sshpipe::Result<()>>;

/// Spawns a client over an in-memory stream and returns the other end as a [`ScriptedPeer`].
fn spawn_client() -> Result<(Client, ClientReceiver, ClientTask, ScriptedPeer)> {
    spawn_client_with(|_| {})
}

fn spawn_client_with(configure: impl FnOnce(&mut ClientConfig))
    -> Result<(Client, ClientReceiver, ClientTask, ScriptedPeer)>
{
    let _ = env_logger::builder().is_test(true).try_init();
    let (stream, peer_stream) = tokio::io::duplex(64 * 1024);
    let config = ClientConfig::default().with(|c| {
        c.hostname = "scripted.example".into();
        configure(c);
    });
    let (client, client_rx, client_fut) = Client::open(stream, config)?;
    let client_task = tokio::spawn(client_fut);
    Ok((client, client_rx, client_task, ScriptedPeer::new(peer_stream)))
}

/// Answers every host key check and forwards the presented keys. Other events are dropped, so
/// channels opened by the peer are rejected.
fn spawn_host_key_check(mut client_rx: ClientReceiver, trusted: bool) -> mpsc::UnboundedReceiver<ServerHostKey> {
    let (keys_tx, keys_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = client_rx.recv().await {
            if let ClientEvent::ServerPubkey(host_key, accept_tx) = event {
                let _ = keys_tx.send(host_key);
                if trusted {
                    accept_tx.accept();
                } else {
                    accept_tx.reject(std::io::Error::new(std::io::ErrorKind::Other, "unknown host"));
                }
            }
        }
    });
    keys_rx
}

/// Completes the key exchange and authentication with a trusting client.
async fn connect() -> Result<(Client, ClientTask, ScriptedPeer)> {
    connect_with(|_| {}).await
}

async fn connect_with(configure: impl FnOnce(&mut ClientConfig)) -> Result<(Client, ClientTask, ScriptedPeer)> {
    let (client, client_rx, client_task, mut peer) = spawn_client_with(configure)?;
    let _keys_rx = spawn_host_key_check(client_rx, true);
    peer.handshake(&host_key()).await?;

    let auth_client = client.clone();
    let auth_task = tokio::spawn(async move { auth_client.auth_none("alice".into()).await });
    peer.accept_auth_none("alice").await?;
    ensure!(matches!(auth_task.await??, AuthNoneResult::Success));
    ensure!(client.is_authenticated()?);
    Ok((client, client_task, peer))
}

#[tokio::test]
async fn test_reject_old_version() -> Result<()> {
    let (client, _client_rx, client_task, mut peer) = spawn_client()?;
    let ident = peer.recv_ident().await?;
    ensure!(ident.starts_with(b"SSH-2.0-sshpipe_"), "unexpected ident {:?}", ident);
    peer.send_line("SSH-1.5-ancient").await?;

    match client_task.await? {
        Err(Error::Version(ident)) => ensure!(ident == "SSH-1.5-ancient", "unexpected ident {:?}", ident),
        res => bail!("expected version error, got {:?}", res),
    }
    ensure!(client.is_closed());
    Ok(())
}

#[tokio::test]
async fn test_accept_legacy_compatible_version() -> Result<()> {
    let (_client, _client_rx, client_task, mut peer) = spawn_client()?;
    peer.send_line("this line comes before the identification").await?;
    peer.send_line("SSH-1.99-compat").await?;
    peer.send_packet(&disconnect_payload(disconnect::BY_APPLICATION, "bye")).await?;

    match client_task.await? {
        Err(Error::PeerDisconnected(err)) => ensure!(err.description == "bye"),
        res => bail!("expected peer disconnect, got {:?}", res),
    }
    Ok(())
}

#[tokio::test]
async fn test_kex_negotiation_failure() -> Result<()> {
    let (_client, _client_rx, client_task, mut peer) = spawn_client()?;
    peer.recv_ident().await?;
    let our_kex_init = peer.recv_packet().await?;
    ensure!(our_kex_init.first() == Some(&20), "client did not send SSH_MSG_KEXINIT");

    peer.send_line("SSH-2.0-scripted").await?;
    let kex_init = KexInit { kex_algos: vec!["unknown-kex@example.com"], ..KexInit::default() };
    peer.send_packet(&kex_init.encode()).await?;

    match client_task.await? {
        Err(Error::AlgoNegotiate(err)) => {
            ensure!(err.algo_name == "key exchange", "unexpected algo {:?}", err.algo_name);
            ensure!(err.their_algos == vec!["unknown-kex@example.com".to_string()]);
            ensure!(err.our_algos.iter().any(|name| name == "curve25519-sha256"));
        },
        res => bail!("expected negotiation error, got {:?}", res),
    }
    Ok(())
}

#[tokio::test]
async fn test_cipher_negotiation_failure() -> Result<()> {
    let (_client, _client_rx, client_task, mut peer) = spawn_client()?;
    peer.send_line("SSH-2.0-scripted").await?;
    let kex_init = KexInit { cipher_algos: vec!["3des-cbc"], ..KexInit::default() };
    peer.send_packet(&kex_init.encode()).await?;

    match client_task.await? {
        Err(Error::AlgoNegotiate(err)) =>
            ensure!(err.algo_name == "cipher client-to-server", "unexpected algo {:?}", err.algo_name),
        res => bail!("expected negotiation error, got {:?}", res),
    }
    Ok(())
}

#[tokio::test]
async fn test_peer_disconnect() -> Result<()> {
    let (client, _client_rx, client_task, mut peer) = spawn_client()?;
    peer.send_line("SSH-2.0-scripted").await?;
    peer.send_packet(&disconnect_payload(disconnect::TOO_MANY_CONNECTIONS, "too many")).await?;

    match client_task.await? {
        Err(Error::PeerDisconnected(err)) => {
            ensure!(err.reason_code == disconnect::TOO_MANY_CONNECTIONS);
            ensure!(err.description == "too many");
        },
        res => bail!("expected peer disconnect, got {:?}", res),
    }

    ensure!(matches!(client.rekey().await, Err(Error::ClientClosed)));
    let open_res = client.open_channel(ChannelKind::Session, ChannelConfig::default()).await;
    ensure!(matches!(open_res, Err(Error::ClientClosed)));
    Ok(())
}

#[tokio::test]
async fn test_peer_closed_aborts_waiters() -> Result<()> {
    let (client, _client_rx, client_task, mut peer) = spawn_client()?;
    peer.recv_ident().await?;
    peer.recv_packet().await?;

    let auth_client = client.clone();
    let auth_task = tokio::spawn(async move { auth_client.auth_none("alice".into()).await });
    let rekey_client = client.clone();
    let rekey_task = tokio::spawn(async move { rekey_client.rekey().await });
    drop(peer);

    match client_task.await? {
        Err(Error::PeerClosed) => {},
        res => bail!("expected peer closed, got {:?}", res),
    }
    ensure!(matches!(auth_task.await?, Err(Error::AuthAborted | Error::ClientClosed)));
    ensure!(matches!(rekey_task.await?, Err(Error::RekeyAborted | Error::ClientClosed)));
    Ok(())
}

#[tokio::test]
async fn test_client_disconnect() -> Result<()> {
    let (client, _client_rx, client_task, peer) = spawn_client()?;
    client.disconnect(DisconnectError::by_app())?;

    match client_task.await? {
        Ok(()) => {},
        res => bail!("expected clean disconnect, got {:?}", res),
    }
    ensure!(client.is_closed());
    let again = client.disconnect(DisconnectError::by_app());
    ensure!(matches!(again, Err(Error::ClientDisconnected | Error::ClientClosed)), "got {:?}", again);

    let output = peer.read_to_end().await?;
    let Some((_, packets)) = split_ident(&output) else { bail!("client did not send its ident") };
    ensure!(packets.len() > 5 && packets[5] == 1, "client did not send SSH_MSG_DISCONNECT");
    Ok(())
}

#[tokio::test]
async fn test_curve25519_handshake() -> Result<()> {
    let (client, client_rx, client_task, mut peer) = spawn_client()?;
    let mut keys_rx = spawn_host_key_check(client_rx, true);
    let host_key = host_key();
    let exchange_hash = peer.handshake(&host_key).await?;
    ensure!(exchange_hash.len() == 32);

    let presented = keys_rx.recv().await.context("no host key was presented")?;
    ensure!(presented.hostname == "scripted.example");
    ensure!(presented.key_type == "ssh-ed25519");
    ensure!(presented.blob == host_key_blob(&host_key));
    ensure!(presented.fingerprint.starts_with("SHA256:"));
    ensure!(client.host_key_verdict()? == Some(HostKeyVerdict::Accept));

    // the service request goes out right after the first key exchange, under the new keys
    let service_req = peer.recv_packet().await?;
    ensure!(service_req.first() == Some(&5), "unexpected packet {:?}", service_req);

    client.disconnect(DisconnectError::by_app())?;
    let disconnect_msg = peer.recv_packet().await?;
    ensure!(disconnect_msg.first() == Some(&msg::DISCONNECT), "unexpected packet {:?}", disconnect_msg);
    ensure!(matches!(client_task.await?, Ok(())));
    Ok(())
}

#[tokio::test]
async fn test_host_key_rejected() -> Result<()> {
    let (_client, client_rx, client_task, mut peer) = spawn_client()?;
    let mut keys_rx = spawn_host_key_check(client_rx, false);
    ensure!(peer.handshake(&host_key()).await.is_err(), "client sent SSH_MSG_NEWKEYS for a rejected key");
    ensure!(keys_rx.recv().await.is_some());

    match client_task.await? {
        Err(Error::PubkeyAccept(err)) => ensure!(err.to_string().contains("unknown host"), "{}", err),
        res => bail!("expected host key rejection, got {:?}", res),
    }
    Ok(())
}

#[tokio::test]
async fn test_session_over_encrypted_channel() -> Result<()> {
    let (client, client_task, mut peer) = connect().await?;

    let session_client = client.clone();
    let session_task = tokio::spawn(async move {
        session_client.open_session(ChannelConfig::default()).await
    });
    let mut open_req = PacketDecode::new(peer.recv_packet().await?);
    ensure!(open_req.get_u8()? == msg::CHANNEL_OPEN);
    ensure!(open_req.get_string()? == "session");
    let client_id = open_req.get_u32()?;
    ensure!(open_req.get_u32()? == 0x100000, "unexpected initial window");
    ensure!(open_req.get_u32()? == 0x4000, "unexpected maximum packet size");

    // the peer accepts only 10 bytes before the first window adjust
    let our_id = 7;
    peer.send_packet(&channel_msg(msg::CHANNEL_OPEN_CONFIRMATION, client_id, |p| {
        p.put_u32(our_id);
        p.put_u32(10);
        p.put_u32(0x8000);
    })).await?;
    let (session, mut session_rx) = session_task.await??;

    let reply = session.exec(b"cat")?;
    let mut exec_req = PacketDecode::new(peer.recv_packet().await?);
    ensure!(exec_req.get_u8()? == msg::CHANNEL_REQUEST);
    ensure!(exec_req.get_u32()? == our_id);
    ensure!(exec_req.get_string()? == "exec");
    ensure!(exec_req.get_bool()?, "exec request does not want a reply");
    ensure!(exec_req.get_bytes()?.as_ref() == b"cat");
    peer.send_packet(&channel_msg(msg::CHANNEL_SUCCESS, client_id, |_| {})).await?;
    reply.want_reply().await?;

    let stdin_session = session.clone();
    let stdin_task = tokio::spawn(async move {
        stdin_session.send_stdin(Bytes::from_static(b"0123456789abcdefghijklmno")).await
    });
    let mut stdin = Vec::new();
    while stdin.len() < 10 {
        stdin.extend_from_slice(&recv_channel_data(&mut peer, our_id).await?);
    }
    ensure!(stdin == b"0123456789", "window was overrun: {:?}", stdin);
    peer.send_packet(&channel_msg(msg::CHANNEL_WINDOW_ADJUST, client_id, |p| p.put_u32(100))).await?;
    while stdin.len() < 25 {
        stdin.extend_from_slice(&recv_channel_data(&mut peer, our_id).await?);
    }
    ensure!(stdin == b"0123456789abcdefghijklmno");
    stdin_task.await??;

    peer.send_packet(&channel_msg(msg::CHANNEL_DATA, client_id, |p| p.put_bytes(b"hello"))).await?;
    peer.send_packet(&channel_msg(msg::CHANNEL_EXTENDED_DATA, client_id, |p| {
        p.put_u32(1);
        p.put_bytes(b"oops");
    })).await?;
    peer.send_packet(&channel_msg(msg::CHANNEL_REQUEST, client_id, |p| {
        p.put_str("exit-status");
        p.put_bool(false);
        p.put_u32(3);
    })).await?;
    peer.send_packet(&channel_msg(msg::CHANNEL_EOF, client_id, |_| {})).await?;
    peer.send_packet(&channel_msg(msg::CHANNEL_CLOSE, client_id, |_| {})).await?;

    let mut events = Vec::new();
    while let Some(event) = session_rx.recv().await? {
        events.push(event);
    }
    ensure!(events == vec![
        SessionEvent::StdoutData(Bytes::from_static(b"hello")),
        SessionEvent::StderrData(Bytes::from_static(b"oops")),
        SessionEvent::ExitStatus(3),
        SessionEvent::Eof,
    ], "unexpected events {:?}", events);
    ensure!(session.exit_status() == Some(3));

    let close = peer.recv_packet().await?;
    ensure!(close == channel_msg(msg::CHANNEL_CLOSE, our_id, |_| {}), "expected close, got {:?}", close);
    ensure!(matches!(session.send_stdin(Bytes::from_static(b"late")).await, Err(Error::ChannelClosed)));

    client.disconnect(DisconnectError::by_app())?;
    ensure!(matches!(client_task.await?, Ok(())));
    Ok(())
}

#[tokio::test]
async fn test_unhandled_peer_open_is_refused() -> Result<()> {
    let (client, client_task, mut peer) = connect().await?;

    let mut open_req = sshpipe::PacketEncode::new();
    open_req.put_u8(msg::CHANNEL_OPEN);
    open_req.put_str("x11");
    open_req.put_u32(5);
    open_req.put_u32(1000);
    open_req.put_u32(1000);
    open_req.put_str("127.0.0.1");
    open_req.put_u32(6010);
    peer.send_packet(&open_req.finish()).await?;

    let mut failure = PacketDecode::new(peer.recv_packet().await?);
    ensure!(failure.get_u8()? == msg::CHANNEL_OPEN_FAILURE);
    ensure!(failure.get_u32()? == 5);
    ensure!(failure.get_u32()? == open::ADMINISTRATIVELY_PROHIBITED);

    client.disconnect(DisconnectError::by_app())?;
    ensure!(matches!(client_task.await?, Ok(())));
    Ok(())
}

/// Opens a session that the peer confirms with `window` as its receive window. Returns the
/// session and the channel id of the client.
async fn open_session(client: &Client, peer: &mut ScriptedPeer, config: ChannelConfig, window: u32)
    -> Result<(Session, SessionReceiver, u32)>
{
    let session_client = client.clone();
    let session_task = tokio::spawn(async move { session_client.open_session(config).await });
    let mut open_req = PacketDecode::new(peer.recv_packet().await?);
    ensure!(open_req.get_u8()? == msg::CHANNEL_OPEN);
    ensure!(open_req.get_string()? == "session");
    let client_id = open_req.get_u32()?;
    peer.send_packet(&channel_msg(msg::CHANNEL_OPEN_CONFIRMATION, client_id, |p| {
        p.put_u32(PEER_CHANNEL_ID);
        p.put_u32(window);
        p.put_u32(0x8000);
    })).await?;
    let (session, session_rx) = session_task.await??;
    Ok((session, session_rx, client_id))
}

const PEER_CHANNEL_ID: u32 = 7;

async fn recv_channel_data(peer: &mut ScriptedPeer, channel_id: u32) -> Result<Bytes> {
    let mut data = PacketDecode::new(peer.recv_packet().await?);
    ensure!(data.get_u8()? == msg::CHANNEL_DATA, "expected channel data");
    ensure!(data.get_u32()? == channel_id);
    Ok(data.get_bytes()?)
}

#[tokio::test]
async fn test_rekey_holds_back_channel_data() -> Result<()> {
    let (client, client_task, mut peer) = connect().await?;
    let (session, _session_rx, _) = open_session(&client, &mut peer, ChannelConfig::default(), 1000).await?;

    let rekey_client = client.clone();
    let rekey_task = tokio::spawn(async move { rekey_client.rekey().await });
    // the data is queued while the key exchange runs; `kex()` fails on anything but kex messages
    let stdin_session = session.clone();
    let stdin_task = tokio::spawn(async move {
        stdin_session.send_stdin(Bytes::from_static(b"after rekey")).await
    });
    let rekey_hash = peer.kex(&host_key()).await?;
    ensure!(rekey_hash.len() == 32);
    rekey_task.await??;

    ensure!(recv_channel_data(&mut peer, PEER_CHANNEL_ID).await? == Bytes::from_static(b"after rekey"));
    stdin_task.await??;

    client.disconnect(DisconnectError::by_app())?;
    ensure!(matches!(client_task.await?, Ok(())));
    Ok(())
}

#[tokio::test]
async fn test_write_fails_when_rekey_stalls() -> Result<()> {
    let (client, client_task, mut peer) = connect_with(|c| {
        c.rekey_timeout = Duration::from_millis(200);
    }).await?;
    let (session, _session_rx, _) = open_session(&client, &mut peer, ChannelConfig::default(), 1000).await?;

    let rekey_client = client.clone();
    let rekey_task = tokio::spawn(async move { rekey_client.rekey().await });
    let kex_init = peer.recv_packet().await?;
    ensure!(kex_init.first() == Some(&20), "client did not start a key exchange");

    // the peer never answers the SSH_MSG_KEXINIT
    let res = session.send_stdin(Bytes::from_static(b"stuck")).await;
    ensure!(matches!(res, Err(Error::RekeyTimeout)), "expected rekey timeout, got {:?}", res);
    ensure!(!rekey_task.is_finished());

    client.disconnect(DisconnectError::by_app())?;
    ensure!(matches!(client_task.await?, Ok(())));
    ensure!(matches!(rekey_task.await?, Err(Error::RekeyAborted | Error::ClientClosed)));
    Ok(())
}

#[tokio::test]
async fn test_write_fails_when_window_stays_closed() -> Result<()> {
    let (client, client_task, mut peer) = connect().await?;
    let config = ChannelConfig::default().with(|c| c.write_timeout = Some(Duration::from_millis(200)));
    let (session, _session_rx, _) = open_session(&client, &mut peer, config, 0).await?;

    let res = session.send_stdin(Bytes::from_static(b"no room")).await;
    ensure!(matches!(res, Err(Error::WindowTimeout)), "expected window timeout, got {:?}", res);

    // the timed out write does not hold up the close
    session.close();
    let close = peer.recv_packet().await?;
    ensure!(close == channel_msg(msg::CHANNEL_CLOSE, PEER_CHANNEL_ID, |_| {}), "expected close, got {:?}", close);

    client.disconnect(DisconnectError::by_app())?;
    ensure!(matches!(client_task.await?, Ok(())));
    Ok(())
}
