//! Integration tests for the burrow server.
//!
//! These tests drive the full wire protocol from the client side:
//! - startup preamble and RSA-signed key exchange
//! - login success and failure paths
//! - proxy relay through a mock echo server
//! - session resume, including the forged-HMAC fallback
//! - the global outer cipher

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use burrow_auth::MemoryUserDb;
use burrow_config::{AuthConfig, Config, LoggingConfig, MetricsConfig, ServerConfig};
use burrow_crypto::{kdf, CipherContext, CipherMethod, GlobalCipherConfig, KeyStore};
use burrow_proto as proto;
use burrow_proto::{
    FrameHeader, HelloHeader, HostRef, ServerHello, B_FALSE, B_TRUE, HELLO_HEADER_LEN,
    PACKET_CLOSE_CONN, PACKET_PROXY, PROTO_VERSION, REUSE_FAIL_HMAC_FAIL,
    REUSE_FAIL_START_CIPHER_EXCHANGE, REUSE_SUCCESS,
};
use burrow_server::{run_with_shutdown, CancellationToken, SecureStream};
use rand::RngCore;
use tokio::net::TcpStream;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helper: Mock Remote Servers
// ============================================================================

/// A TCP server that echoes back whatever it receives.
struct MockEchoServer {
    addr: SocketAddr,
    _handle: thread::JoinHandle<()>,
}

impl MockEchoServer {
    fn start() -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                thread::spawn(move || {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).is_err() {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                });
            }
        });

        Self {
            addr,
            _handle: handle,
        }
    }
}

/// A TCP server that echoes one read back and then closes the socket.
struct MockEchoOnceServer {
    addr: SocketAddr,
    _handle: thread::JoinHandle<()>,
}

impl MockEchoOnceServer {
    fn start() -> Self {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                thread::spawn(move || {
                    let mut buf = [0u8; 4096];
                    if let Ok(n) = stream.read(&mut buf) {
                        let _ = stream.write_all(&buf[..n]);
                    }
                    let _ = stream.shutdown(std::net::Shutdown::Both);
                });
            }
        });

        Self {
            addr,
            _handle: handle,
        }
    }
}

/// An address that refuses connections: bind a listener, remember the port,
/// drop the listener.
fn dead_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

// ============================================================================
// Test Helper: Burrow Server
// ============================================================================

/// RSA keygen is expensive; generate one key per test binary and share the
/// path across servers.
fn shared_key_path() -> PathBuf {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| {
        let path =
            std::env::temp_dir().join(format!("burrow-test-key-{}.pem", std::process::id()));
        KeyStore::load_or_generate(&path).unwrap();
        path
    })
    .clone()
}

struct TestServer {
    addr: SocketAddr,
    global: Option<GlobalCipherConfig>,
    _shutdown: CancellationToken,
    _temp_dir: tempfile::TempDir,
}

impl TestServer {
    async fn start(methods: &[&str], global: Option<(&str, &str)>) -> Self {
        let temp_dir = tempfile::tempdir().unwrap();
        let user_db_path = temp_dir.path().join("users.toml");
        std::fs::write(
            &user_db_path,
            "[[users]]\nid = \"alice\"\npassword = \"s3cret\"\n\n\
             [[users]]\nid = \"bob\"\npassword = \"hunter2\"\n",
        )
        .unwrap();

        // Find an available port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = Config {
            server: ServerConfig {
                listen: addr.to_string(),
                key_path: shared_key_path().to_string_lossy().into_owned(),
                link_encrypt_methods: methods.iter().map(|m| m.to_string()).collect(),
                global_encrypt_method: global.map(|(m, _)| m.to_string()),
                global_encrypt_password: global.map(|(_, p)| p.to_string()),
                session_ttl_secs: 3600,
                handshake_timeout_secs: 5,
                dial_timeout_secs: 2,
                max_connections: None,
            },
            auth: AuthConfig {
                user_db_path: user_db_path.to_string_lossy().into_owned(),
            },
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        };

        let users = MemoryUserDb::from_users([("alice", "s3cret"), ("bob", "hunter2")]);
        let shutdown = CancellationToken::new();
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = run_with_shutdown(config, users, server_shutdown).await;
        });

        // Wait for the listener to come up
        tokio::time::sleep(Duration::from_millis(200)).await;

        let global = global.map(|(m, p)| GlobalCipherConfig::new(m, p.as_bytes()).unwrap());
        Self {
            addr,
            global,
            _shutdown: shutdown,
            _temp_dir: temp_dir,
        }
    }
}

// ============================================================================
// Test Helper: Protocol Client
// ============================================================================

/// Key material derived during the exchange, before login.
struct ExchangeKeys {
    method: &'static CipherMethod,
    key: Vec<u8>,
    iv: Vec<u8>,
}

/// Session key material a client keeps for resuming.
#[derive(Debug)]
struct SessionKeys {
    id: [u8; 16],
    method: &'static CipherMethod,
    key: Vec<u8>,
    iv: Vec<u8>,
}

struct TestClient {
    pipe: SecureStream<TcpStream>,
}

impl TestClient {
    async fn connect(server: &TestServer) -> Self {
        let tcp = TcpStream::connect(server.addr).await.unwrap();
        tcp.set_nodelay(true).unwrap();
        let mut pipe = SecureStream::new(tcp);
        if let Some(global) = &server.global {
            pipe.switch_cipher(global.new_pair().unwrap());
        }
        Self { pipe }
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        tokio::time::timeout(IO_TIMEOUT, self.pipe.read_exact(buf))
            .await
            .expect("read timed out")
    }

    async fn write_all(&mut self, data: &[u8]) {
        tokio::time::timeout(IO_TIMEOUT, self.pipe.write_all(data))
            .await
            .expect("write timed out")
            .unwrap();
    }

    /// Full fresh-session handshake: preamble, key exchange, login.
    async fn fresh_handshake(
        &mut self,
        method_name: &str,
        user: &str,
        pass: &str,
    ) -> Result<SessionKeys, (u8, Vec<u8>)> {
        self.write_all(&proto::write_new_session_preamble()).await;
        self.complete_fresh_handshake(method_name, user, pass).await
    }

    /// Key exchange and login, after the server has decided to run a fresh
    /// exchange (either from a new-session preamble or a resume fallback).
    async fn complete_fresh_handshake(
        &mut self,
        method_name: &str,
        user: &str,
        pass: &str,
    ) -> Result<SessionKeys, (u8, Vec<u8>)> {
        let exchange = self.key_exchange(method_name).await;
        self.login(exchange, user, pass).await
    }

    /// Read the server hello, verify it, finish the exchange, and switch to
    /// the negotiated session cipher. Returns the derived key material.
    async fn key_exchange(&mut self, method_name: &str) -> ExchangeKeys {
        let mut raw_header = [0u8; HELLO_HEADER_LEN];
        self.read_exact(&mut raw_header).await.unwrap();
        let header = HelloHeader::parse(raw_header);
        let mut body = vec![0u8; header.body_len()];
        self.read_exact(&mut body).await.unwrap();
        let hello = ServerHello::parse_body(&header, &body).unwrap();

        // The DH parameters must verify against the advertised key
        KeyStore::verify(
            hello.pub_der,
            &ServerHello::signed_data(hello.prime, hello.generator, hello.public),
            hello.signature,
        )
        .unwrap();

        let offered = std::str::from_utf8(hello.methods).unwrap();
        assert!(
            offered.split(',').any(|m| m == method_name),
            "method {} not offered in {}",
            method_name,
            offered
        );

        let mut ctx = CipherContext::from_prime_bytes(hello.prime).unwrap();
        let method = CipherMethod::named(method_name).unwrap();
        ctx.derive_keys(hello.public, method.key_size, method.iv_size)
            .unwrap();
        let finish = proto::write_client_finish(&ctx.public_bytes(), method_name);
        self.write_all(&finish).await;
        self.pipe
            .switch_cipher(method.build(ctx.crypto_key(), ctx.crypto_iv()).unwrap());

        ExchangeKeys {
            method,
            key: ctx.crypto_key().to_vec(),
            iv: ctx.crypto_iv().to_vec(),
        }
    }

    /// Login under the session cipher.
    async fn login(
        &mut self,
        exchange: ExchangeKeys,
        user: &str,
        pass: &str,
    ) -> Result<SessionKeys, (u8, Vec<u8>)> {
        self.write_all(&proto::write_login_request(user, pass)).await;
        let (ok, msg) = self.read_login_response().await;
        if ok == B_TRUE {
            let mut id = [0u8; 16];
            id.copy_from_slice(&msg);
            Ok(SessionKeys {
                id,
                method: exchange.method,
                key: exchange.key,
                iv: exchange.iv,
            })
        } else {
            Err((ok, msg))
        }
    }

    async fn read_login_response(&mut self) -> (u8, Vec<u8>) {
        let mut head = [0u8; 4];
        self.read_exact(&mut head).await.unwrap();
        assert_eq!(proto::read_u16(&head), PROTO_VERSION);
        let mut msg = vec![0u8; head[3] as usize];
        self.read_exact(&mut msg).await.unwrap();
        (head[2], msg)
    }

    /// Attempt a session resume; on success the pipe switches to the
    /// session cipher.
    async fn resume(&mut self, keys: &SessionKeys) -> [u8; 2] {
        let mut nonce = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut nonce);
        let tag = kdf::hmac_sha256(&keys.key, &nonce);
        self.write_all(&proto::write_resume_preamble(&keys.id, &nonce, &tag))
            .await;

        let mut reply = [0u8; 2];
        self.read_exact(&mut reply).await.unwrap();
        if reply == [B_TRUE, REUSE_SUCCESS] {
            self.pipe
                .switch_cipher(keys.method.build(&keys.key, &keys.iv).unwrap());
        }
        reply
    }

    async fn open_conn(&mut self, conn_id: u32, addr: SocketAddr) {
        let frame = proto::write_new_conn_frame(conn_id, &HostRef::Ip(addr.ip()), addr.port());
        self.write_all(&frame).await;
    }

    async fn send_proxy(&mut self, conn_id: u32, data: &[u8]) {
        let frame = proto::write_proxy_frame(conn_id, data);
        self.write_all(&frame).await;
    }

    async fn send_close(&mut self, conn_id: u32) {
        let frame = proto::write_close_frame(conn_id);
        self.write_all(&frame).await;
    }

    /// Read one mux frame, returning `(kind, payload)`.
    async fn read_frame(&mut self) -> (u8, Vec<u8>) {
        let mut raw_header = [0u8; 4];
        self.read_exact(&mut raw_header).await.unwrap();
        let header = FrameHeader::parse(raw_header).unwrap();
        let mut payload = vec![0u8; header.payload_len];
        self.read_exact(&mut payload).await.unwrap();
        (header.kind, payload)
    }

    /// Expect a proxy frame for `conn_id` and return its data.
    async fn expect_proxy(&mut self, conn_id: u32) -> Vec<u8> {
        let (kind, payload) = self.read_frame().await;
        assert_eq!(kind, PACKET_PROXY);
        assert_eq!(proto::read_u32(&payload), conn_id);
        payload[4..].to_vec()
    }

    /// Expect a close frame for `conn_id`.
    async fn expect_close(&mut self, conn_id: u32) {
        let (kind, payload) = self.read_frame().await;
        assert_eq!(kind, PACKET_CLOSE_CONN);
        assert_eq!(proto::read_u32(&payload), conn_id);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn login_success_returns_session_id() {
    let server = TestServer::start(&["aes-128-cfb"], None).await;
    let mut client = TestClient::connect(&server).await;

    let keys = client
        .fresh_handshake("aes-128-cfb", "alice", "s3cret")
        .await
        .unwrap();
    assert_eq!(keys.id.len(), 16);
    assert!(!keys.key.is_empty());
}

#[tokio::test]
async fn login_wrong_password_rejected() {
    let server = TestServer::start(&["aes-128-cfb"], None).await;
    let mut client = TestClient::connect(&server).await;

    let (ok, msg) = client
        .fresh_handshake("aes-128-cfb", "alice", "wrong")
        .await
        .unwrap_err();
    assert_eq!(ok, B_FALSE);
    assert_eq!(msg, b"invalid username/password");
}

#[tokio::test]
async fn login_oversize_credentials_rejected() {
    let server = TestServer::start(&["aes-128-cfb"], None).await;
    let mut client = TestClient::connect(&server).await;

    client.write_all(&proto::write_new_session_preamble()).await;
    client.key_exchange("aes-128-cfb").await;

    // Login header declaring a 33-byte username; the server rejects on the
    // sizes alone.
    client.write_all(&[0, 0, 33, 6]).await;
    let (ok, msg) = client.read_login_response().await;
    assert_eq!(ok, B_FALSE);
    assert_eq!(msg, b"user/passwd size invalid");
}

#[tokio::test]
async fn every_offered_method_completes_and_proxies() {
    let methods = ["aes-128-cfb", "aes-192-cfb", "aes-256-cfb", "rc4"];
    let server = TestServer::start(&methods, None).await;
    let echo = MockEchoServer::start();

    for (i, method) in methods.iter().enumerate() {
        let mut client = TestClient::connect(&server).await;
        client
            .fresh_handshake(method, "alice", "s3cret")
            .await
            .unwrap();

        let conn_id = i as u32 + 1;
        client.open_conn(conn_id, echo.addr).await;
        client.send_proxy(conn_id, b"ping").await;
        assert_eq!(client.expect_proxy(conn_id).await, b"ping", "{}", method);
    }
}

#[tokio::test]
async fn remote_close_emits_close_conn() {
    let server = TestServer::start(&["aes-256-cfb"], None).await;
    let echo_once = MockEchoOnceServer::start();
    let mut client = TestClient::connect(&server).await;
    client
        .fresh_handshake("aes-256-cfb", "alice", "s3cret")
        .await
        .unwrap();

    client.open_conn(7, echo_once.addr).await;
    client.send_proxy(7, b"ping").await;
    assert_eq!(client.expect_proxy(7).await, b"ping");
    // Remote closed after the echo; the relay tears down and emits exactly
    // one close frame.
    client.expect_close(7).await;
}

#[tokio::test]
async fn client_close_drains_relay() {
    let server = TestServer::start(&["aes-256-cfb"], None).await;
    let echo = MockEchoServer::start();
    let mut client = TestClient::connect(&server).await;
    client
        .fresh_handshake("aes-256-cfb", "alice", "s3cret")
        .await
        .unwrap();

    client.open_conn(9, echo.addr).await;
    client.send_proxy(9, b"ping").await;
    assert_eq!(client.expect_proxy(9).await, b"ping");

    client.send_close(9).await;
    // The relay notices the closed queue and confirms teardown.
    client.expect_close(9).await;
}

#[tokio::test]
async fn resume_with_valid_hmac() {
    let server = TestServer::start(&["aes-128-cfb"], None).await;
    let echo = MockEchoServer::start();

    let keys = {
        let mut client = TestClient::connect(&server).await;
        client
            .fresh_handshake("aes-128-cfb", "alice", "s3cret")
            .await
            .unwrap()
        // First connection drops here
    };

    let mut client = TestClient::connect(&server).await;
    let reply = client.resume(&keys).await;
    assert_eq!(reply, [B_TRUE, REUSE_SUCCESS]);

    // The tunnel is immediately usable under the session cipher.
    client.open_conn(1, echo.addr).await;
    client.send_proxy(1, b"after resume").await;
    assert_eq!(client.expect_proxy(1).await, b"after resume");
}

#[tokio::test]
async fn resume_with_forged_hmac_falls_back_to_fresh_exchange() {
    let server = TestServer::start(&["aes-128-cfb"], None).await;

    let keys = {
        let mut client = TestClient::connect(&server).await;
        client
            .fresh_handshake("aes-128-cfb", "alice", "s3cret")
            .await
            .unwrap()
    };

    let mut client = TestClient::connect(&server).await;
    let mut nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce);
    let mut tag = kdf::hmac_sha256(&keys.key, &nonce);
    tag[0] ^= 0x01;
    client
        .write_all(&proto::write_resume_preamble(&keys.id, &nonce, &tag))
        .await;

    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(
        reply,
        [
            B_FALSE,
            REUSE_FAIL_START_CIPHER_EXCHANGE | REUSE_FAIL_HMAC_FAIL
        ]
    );

    // The server falls through to a fresh hello on the same connection and
    // the client can complete it.
    let new_keys = client
        .complete_fresh_handshake("aes-128-cfb", "alice", "s3cret")
        .await
        .unwrap();
    assert_ne!(new_keys.id, keys.id);
}

#[tokio::test]
async fn proxy_to_unknown_conn_is_dropped() {
    let server = TestServer::start(&["rc4"], None).await;
    let echo = MockEchoServer::start();
    let mut client = TestClient::connect(&server).await;
    client
        .fresh_handshake("rc4", "alice", "s3cret")
        .await
        .unwrap();

    // No such conn: logged and dropped, tunnel keeps working.
    client.send_proxy(99, b"void").await;

    client.open_conn(1, echo.addr).await;
    client.send_proxy(1, b"still alive").await;
    assert_eq!(client.expect_proxy(1).await, b"still alive");
}

#[tokio::test]
async fn dial_failure_emits_close_conn() {
    let server = TestServer::start(&["rc4"], None).await;
    let mut client = TestClient::connect(&server).await;
    client
        .fresh_handshake("rc4", "alice", "s3cret")
        .await
        .unwrap();

    client.open_conn(3, dead_addr()).await;
    client.expect_close(3).await;
}

#[tokio::test]
async fn duplicate_conn_id_spawns_single_relay() {
    let server = TestServer::start(&["rc4"], None).await;
    let echo = MockEchoServer::start();
    let mut client = TestClient::connect(&server).await;
    client
        .fresh_handshake("rc4", "alice", "s3cret")
        .await
        .unwrap();

    client.open_conn(5, echo.addr).await;
    // Second new-conn with the same id is dropped.
    client.open_conn(5, echo.addr).await;

    client.send_proxy(5, b"once").await;
    assert_eq!(client.expect_proxy(5).await, b"once");

    // No second echo arrives: only one relay exists for the id.
    let mut extra = [0u8; 1];
    let second = tokio::time::timeout(
        Duration::from_millis(200),
        client.pipe.read_exact(&mut extra),
    )
    .await;
    assert!(second.is_err(), "unexpected extra frame after single proxy");
}

#[tokio::test]
async fn global_cipher_end_to_end() {
    let server = TestServer::start(&["aes-128-cfb"], Some(("rc4", "outer-secret"))).await;
    let echo = MockEchoServer::start();
    let mut client = TestClient::connect(&server).await;

    client
        .fresh_handshake("aes-128-cfb", "alice", "s3cret")
        .await
        .unwrap();
    client.open_conn(1, echo.addr).await;
    client.send_proxy(1, b"wrapped").await;
    assert_eq!(client.expect_proxy(1).await, b"wrapped");
}

#[tokio::test]
async fn global_cipher_mismatch_terminates() {
    let server = TestServer::start(&["aes-128-cfb"], Some(("rc4", "outer-secret"))).await;

    // Client without the outer cipher: the preamble decrypts to garbage on
    // the server, which terminates without a reply.
    let tcp = TcpStream::connect(server.addr).await.unwrap();
    let mut pipe = SecureStream::new(tcp);
    pipe.write_all(&proto::write_new_session_preamble())
        .await
        .unwrap();

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(2), pipe.read_exact(&mut buf)).await;
    match read {
        Ok(result) => assert!(result.is_err(), "server must not answer a garbled preamble"),
        Err(_) => panic!("server left the garbled connection open"),
    }
}

#[tokio::test]
async fn empty_method_list_is_fatal() {
    let temp_dir = tempfile::tempdir().unwrap();
    let user_db_path = temp_dir.path().join("users.toml");
    std::fs::write(&user_db_path, "[[users]]\nid = \"a\"\npassword = \"b\"\n").unwrap();

    let config = Config {
        server: ServerConfig {
            listen: "127.0.0.1:0".into(),
            key_path: shared_key_path().to_string_lossy().into_owned(),
            link_encrypt_methods: vec![],
            global_encrypt_method: None,
            global_encrypt_password: None,
            session_ttl_secs: 0,
            handshake_timeout_secs: 5,
            dial_timeout_secs: 2,
            max_connections: None,
        },
        auth: AuthConfig {
            user_db_path: user_db_path.to_string_lossy().into_owned(),
        },
        metrics: MetricsConfig::default(),
        logging: LoggingConfig::default(),
    };

    let users = MemoryUserDb::from_users([("a", "b")]);
    let err = run_with_shutdown(config, users, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("link_encrypt_methods"));
}
