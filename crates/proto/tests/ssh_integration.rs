//! Integration tests for the SSH server over real TCP sockets.
//!
//! A small test client built from the crate's public pieces performs the
//! whole exchange:
//! - Version exchange
//! - Key exchange with host key signature verification
//! - Encrypted service request and declined authentication
//! - Protocol violations, connection replacement and idle timeout

use ember_platform::{ConnectionEvent, EmberResult, EventSink};
use ember_proto::ssh::crypto::PacketKey;
use ember_proto::ssh::hostkey::{Ed25519HostKey, HostKey};
use ember_proto::ssh::kex::{KexEcdhInit, KexEcdhReply, KexInit, NewKeys};
use ember_proto::ssh::kex_dh::{Curve25519Exchange, ExchangeHashInput};
use ember_proto::ssh::keys::SessionKeys;
use ember_proto::ssh::message::{Disconnect, DisconnectReason, MessageType};
use ember_proto::ssh::packet::{PacketCodec, Parsed, Protection};
use ember_proto::ssh::server::SshServer;
use ember_proto::ssh::service::{AuthBanner, AuthFailure, ServiceAccept, ServiceRequest};
use ember_proto::ssh::SshServerConfig;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

const CLIENT_LINE: &str = "SSH-2.0-EmberTestClient_1.0";
const SERVER_LINE: &str = "SSH-2.0-EmberSSH_0.1.0";
const HOST_SEED: &str = "9d61b19deffd5a60ba844af492ec2cc44449c5697b326919703bac031cae7f60";

#[derive(Default)]
struct RecordingSink(Mutex<Vec<ConnectionEvent>>);

impl RecordingSink {
    fn events(&self) -> Vec<ConnectionEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn notify(&self, event: &ConnectionEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

struct TestServer {
    addr: SocketAddr,
    sink: Arc<RecordingSink>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<EmberResult<()>>,
}

impl TestServer {
    async fn start(config: SshServerConfig) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let host_key: Arc<dyn HostKey> = Arc::new(Ed25519HostKey::from_hex(HOST_SEED).unwrap());
        let server = SshServer::bind_with_host_key(config, host_key, sink.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (shutdown, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async move {
            let _ = rx.await;
        }));
        Self {
            addr,
            sink,
            shutdown,
            handle,
        }
    }

    async fn stop(self) -> Vec<ConnectionEvent> {
        let _ = self.shutdown.send(());
        timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
        self.sink.events()
    }
}

fn test_config() -> SshServerConfig {
    SshServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        banner: Some("Authorised use only".to_string()),
        ..SshServerConfig::default()
    }
}

/// Strict-kex client driving the server through the public API.
struct TestClient {
    stream: TcpStream,
    codec: PacketCodec,
    tx_seq: u32,
    rx_seq: u32,
    tx_key: Option<PacketKey>,
    rx_key: Option<PacketKey>,
    trickle: bool,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = timeout(Duration::from_secs(5), TcpStream::connect(addr))
            .await
            .unwrap()
            .unwrap();
        Self {
            stream,
            codec: PacketCodec::default(),
            tx_seq: 0,
            rx_seq: 0,
            tx_key: None,
            rx_key: None,
            trickle: false,
        }
    }

    async fn write(&mut self, bytes: &[u8]) {
        if self.trickle {
            for byte in bytes {
                self.stream.write_all(std::slice::from_ref(byte)).await.unwrap();
                self.stream.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
        } else {
            self.stream.write_all(bytes).await.unwrap();
        }
    }

    async fn exchange_versions(&mut self) -> String {
        self.write(format!("{}\r\n", CLIENT_LINE).as_bytes()).await;

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while !line.ends_with(b"\r\n") {
            let n = timeout(Duration::from_secs(5), self.stream.read(&mut byte))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(n, 1, "connection closed during version exchange");
            line.push(byte[0]);
        }
        line.truncate(line.len() - 2);
        String::from_utf8(line).unwrap()
    }

    async fn send(&mut self, payload: &[u8]) {
        let protection = self
            .tx_key
            .as_ref()
            .map(|key| Protection { key, seq: self.tx_seq });
        let wire = PacketCodec::default().create(payload, protection).unwrap();
        self.tx_seq = self.tx_seq.wrapping_add(1);
        self.write(&wire).await;
    }

    /// Next packet payload, or `None` once the server hangs up.
    async fn try_recv(&mut self) -> Option<Vec<u8>> {
        let mut buf = [0u8; 4096];
        loop {
            let protection = self
                .rx_key
                .as_ref()
                .map(|key| Protection { key, seq: self.rx_seq });
            if let Parsed::Complete(packet) = self.codec.parse(protection).unwrap() {
                self.rx_seq = self.rx_seq.wrapping_add(1);
                return Some(packet.into_payload());
            }
            let n = timeout(Duration::from_secs(5), self.stream.read(&mut buf))
                .await
                .expect("timed out waiting for the server")
                .unwrap_or(0);
            if n == 0 {
                return None;
            }
            self.codec.append(&buf[..n]);
        }
    }

    async fn recv(&mut self) -> Vec<u8> {
        self.try_recv().await.expect("server closed the connection")
    }

    async fn expect_disconnect(&mut self) -> Disconnect {
        let payload = self.recv().await;
        let disconnect = Disconnect::from_bytes(&payload).unwrap();
        assert!(self.try_recv().await.is_none(), "expected EOF after DISCONNECT");
        disconnect
    }

    /// Runs the key exchange; returns the session identifier.
    async fn handshake(&mut self) -> [u8; 32] {
        assert_eq!(self.exchange_versions().await, SERVER_LINE);

        let client_kexinit = KexInit::for_client().to_bytes();
        self.send(&client_kexinit).await;
        let server_kexinit = self.recv().await;
        let announced = KexInit::from_bytes(&server_kexinit).unwrap();
        assert!(announced
            .kex_algorithms()
            .iter()
            .any(|name| name == "kex-strict-s-v00@openssh.com"));

        let ephemeral = Curve25519Exchange::new().unwrap();
        let client_public = *ephemeral.public_key();
        self.send(&KexEcdhInit { client_public }.to_bytes()).await;

        let reply = KexEcdhReply::from_bytes(&self.recv().await).unwrap();
        let expected_host = Ed25519HostKey::from_hex(HOST_SEED).unwrap();
        assert_eq!(reply.host_key_blob, expected_host.public_key_blob());

        let shared = ephemeral
            .compute_shared_secret(&reply.server_public)
            .unwrap();
        let h = ExchangeHashInput {
            client_version: CLIENT_LINE,
            server_version: SERVER_LINE,
            client_kexinit: &client_kexinit,
            server_kexinit: &server_kexinit,
            host_key_blob: &reply.host_key_blob,
            client_public: &client_public,
            server_public: &reply.server_public,
            shared_secret: &shared,
        }
        .compute();
        Ed25519HostKey::verify_blob(&reply.host_key_blob, &h, &reply.signature_blob).unwrap();

        assert_eq!(self.recv().await, NewKeys.to_bytes());
        let keys = SessionKeys::derive(&shared, &h, &h);
        self.rx_key = Some(keys.server_to_client());
        self.rx_seq = 0;

        self.send(&NewKeys.to_bytes()).await;
        self.tx_key = Some(keys.client_to_server());
        self.tx_seq = 0;
        h
    }
}

fn userauth_request() -> Vec<u8> {
    let mut buf = vec![MessageType::UserauthRequest as u8];
    for field in [&b"alice"[..], b"ssh-connection", b"none"] {
        buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
        buf.extend_from_slice(field);
    }
    buf
}

#[tokio::test]
async fn test_full_handshake_and_service_request() {
    let server = TestServer::start(test_config()).await;
    let mut client = TestClient::connect(server.addr).await;
    client.handshake().await;

    client
        .send(&ServiceRequest::new("ssh-userauth").to_bytes())
        .await;
    let accept = ServiceAccept::from_bytes(&client.recv().await).unwrap();
    assert_eq!(accept.service_name, "ssh-userauth");

    client.send(&userauth_request()).await;
    let banner = AuthBanner::from_bytes(&client.recv().await).unwrap();
    assert_eq!(banner.message(), "Authorised use only");
    let failure = AuthFailure::from_bytes(&client.recv().await).unwrap();
    assert!(failure.methods_can_continue().is_empty());

    let events = server.stop().await;
    assert!(matches!(events[0], ConnectionEvent::Listening { .. }));
    assert!(matches!(events[1], ConnectionEvent::Accepted { .. }));
    assert!(matches!(
        &events[2],
        ConnectionEvent::Established { client_version, .. } if client_version == CLIENT_LINE
    ));
    assert!(matches!(
        &events[3],
        ConnectionEvent::ServiceRequested { service, .. } if service == "ssh-userauth"
    ));
    assert!(matches!(events[4], ConnectionEvent::Closed { .. }));
}

#[tokio::test]
async fn test_byte_at_a_time_delivery() {
    let server = TestServer::start(test_config()).await;
    let mut client = TestClient::connect(server.addr).await;
    client.trickle = true;
    client.handshake().await;

    client
        .send(&ServiceRequest::new("ssh-userauth").to_bytes())
        .await;
    assert_eq!(client.recv().await[0], MessageType::ServiceAccept as u8);
    server.stop().await;
}

#[tokio::test]
async fn test_kexdh_init_before_kexinit_disconnects() {
    let server = TestServer::start(test_config()).await;
    let mut client = TestClient::connect(server.addr).await;
    assert_eq!(client.exchange_versions().await, SERVER_LINE);

    let ephemeral = Curve25519Exchange::new().unwrap();
    client
        .send(
            &KexEcdhInit {
                client_public: *ephemeral.public_key(),
            }
            .to_bytes(),
        )
        .await;

    let disconnect = client.expect_disconnect().await;
    assert_eq!(disconnect.reason_code, DisconnectReason::ProtocolError.code());

    // The server keeps listening afterwards
    let mut next = TestClient::connect(server.addr).await;
    next.handshake().await;
    server.stop().await;
}

#[tokio::test]
async fn test_oversized_packet_disconnects() {
    let server = TestServer::start(test_config()).await;
    let mut client = TestClient::connect(server.addr).await;
    client.exchange_versions().await;

    client.write(&(1u32 << 20).to_be_bytes()).await;
    let disconnect = client.expect_disconnect().await;
    assert_eq!(disconnect.reason_code, DisconnectReason::ProtocolError.code());
    server.stop().await;
}

#[tokio::test]
async fn test_new_connection_replaces_old() {
    let server = TestServer::start(test_config()).await;
    let mut first = TestClient::connect(server.addr).await;
    first.handshake().await;

    let mut second = TestClient::connect(server.addr).await;
    let disconnect = first.expect_disconnect().await;
    assert_eq!(disconnect.reason_code, DisconnectReason::ByApplication.code());

    second.handshake().await;
    second
        .send(&ServiceRequest::new("ssh-userauth").to_bytes())
        .await;
    assert_eq!(second.recv().await[0], MessageType::ServiceAccept as u8);

    let events = server.stop().await;
    let closed = events
        .iter()
        .filter(|event| matches!(event, ConnectionEvent::Closed { .. }))
        .count();
    assert_eq!(closed, 2);
}

#[tokio::test]
async fn test_idle_connection_dropped() {
    let config = SshServerConfig {
        idle_timeout_secs: 1,
        ..test_config()
    };
    let server = TestServer::start(config).await;
    let mut client = TestClient::connect(server.addr).await;
    client.exchange_versions().await;

    let disconnect = client.expect_disconnect().await;
    assert_eq!(disconnect.reason_code, DisconnectReason::ByApplication.code());
    assert_eq!(disconnect.description, "Idle timeout");

    let events = server.stop().await;
    assert!(events.iter().any(|event| matches!(
        event,
        ConnectionEvent::Closed { reason, .. } if reason == "Idle timeout"
    )));
}
