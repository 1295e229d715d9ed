//! Integration tests for opening transports.
//!
//! These tests run against loopback listeners. Failover candidates use
//! other 127.0.0.0/8 addresses on the same port, where nothing listens.

#![allow(clippy::unwrap_used, clippy::similar_names)]

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair,
};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;

use mail_transport::network::unbound_socket;
use mail_transport::{
    Config, Connector, DataChannelState, Error, ErrorKind, Flags, MailTransport, Network,
    StatusListener,
};

const HOST: &str = "imap.example.com";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Network that reports a fixed address list.
#[derive(Debug)]
struct StaticNetwork(Vec<IpAddr>);

#[async_trait]
impl Network for StaticNetwork {
    async fn resolve(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
        Ok(self.0.clone())
    }

    fn create_socket(&self, addr: &SocketAddr) -> io::Result<TcpSocket> {
        unbound_socket(addr)
    }
}

/// Listener that records every notification.
#[derive(Debug, Default)]
struct Recorder(Mutex<Vec<DataChannelState>>);

impl StatusListener for Recorder {
    fn set_data_channel_state(&self, state: DataChannelState) {
        self.0.lock().unwrap().push(state);
    }
}

impl Recorder {
    fn states(&self) -> Vec<DataChannelState> {
        self.0.lock().unwrap().clone()
    }
}

fn loopback(last_octet: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, last_octet))
}

fn connector(config: Config, addresses: Vec<IpAddr>, recorder: &Arc<Recorder>) -> Connector {
    Connector::new(config)
        .with_network(Arc::new(StaticNetwork(addresses)))
        .with_status_listener(recorder.clone())
}

/// Accepts one plain connection, greets and drains it.
async fn plain_server() -> (u16, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let _ = socket.write_all(b"* OK ready\r\n").await;
        let mut sink = Vec::new();
        let _ = socket.read_to_end(&mut sink).await;
    });
    (port, handle)
}

/// Listener on `ip:port` whose accept queue is full, so further SYNs go
/// unanswered. The returned streams hold the queue full.
async fn unresponsive_listener(ip: IpAddr, port: u16) -> (TcpListener, Vec<TcpStream>) {
    let socket = TcpSocket::new_v4().unwrap();
    socket.bind(SocketAddr::new(ip, port)).unwrap();
    let listener = socket.listen(1).unwrap();
    let address = listener.local_addr().unwrap();

    let mut backlog = Vec::new();
    loop {
        match timeout(Duration::from_millis(200), TcpStream::connect(address)).await {
            Ok(Ok(stream)) => backlog.push(stream),
            Ok(Err(err)) => panic!("filling accept queue failed: {err}"),
            Err(_) => break,
        }
        assert!(backlog.len() < 64, "accept queue never filled");
    }
    (listener, backlog)
}

struct Authority {
    certificate: Certificate,
    key: KeyPair,
}

impl Authority {
    fn new(name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.distinguished_name.push(DnType::CommonName, name);
        let key = KeyPair::generate().unwrap();
        let certificate = params.self_signed(&key).unwrap();
        Self { certificate, key }
    }

    fn root(&self) -> CertificateDer<'static> {
        self.certificate.der().clone()
    }

    fn issue(&self, names: &[&str]) -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let names = names.iter().map(ToString::to_string).collect::<Vec<_>>();
        let mut params = CertificateParams::new(names).unwrap();
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let key = KeyPair::generate().unwrap();
        let certificate = params
            .signed_by(&key, &self.certificate, &self.key)
            .unwrap();
        (
            certificate.der().clone(),
            PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der())),
        )
    }
}

/// Accepts one TLS connection with the given chain, greets and drains it.
async fn tls_server(
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> (u16, tokio::task::JoinHandle<()>) {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        if let Ok(mut tls) = acceptor.accept(socket).await {
            // The client may already have hung up after failing verification.
            let _ = tls.write_all(b"* OK secure\r\n").await;
            let _ = tls.flush().await;
            let mut sink = Vec::new();
            let _ = tls.read_to_end(&mut sink).await;
        }
    });
    (port, handle)
}

#[tokio::test]
async fn test_designated_network_without_addresses() {
    init_tracing();
    let recorder = Arc::new(Recorder::default());
    let mut transport = MailTransport::new(connector(
        Config::new(HOST, 143, Flags::NONE),
        Vec::new(),
        &recorder,
    ));

    let err = transport.open().await.unwrap_err();
    assert!(matches!(err, Error::Unresolved { .. }));
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(
        recorder.states(),
        vec![DataChannelState::ServerConnectionError]
    );
    assert!(!transport.is_open());
}

#[tokio::test]
async fn test_failover_to_last_address() {
    init_tracing();
    let (port, server) = plain_server().await;
    let recorder = Arc::new(Recorder::default());
    let mut transport = MailTransport::new(connector(
        Config::new(HOST, port, Flags::NONE),
        vec![loopback(2), loopback(3), loopback(1)],
        &recorder,
    ));

    transport.open().await.unwrap();
    assert!(transport.is_open());
    assert!(recorder.states().is_empty());

    let connection = transport.connection_mut().unwrap();
    assert_eq!(
        connection.peer_addr().unwrap(),
        SocketAddr::new(loopback(1), port)
    );
    assert_eq!(connection.read_line(true).await.unwrap(), "* OK ready");

    transport.close().await;
    assert!(!transport.is_open());
    server.await.unwrap();
}

#[tokio::test]
async fn test_all_addresses_fail() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let recorder = Arc::new(Recorder::default());
    let mut transport = MailTransport::new(connector(
        Config::new(HOST, port, Flags::NONE),
        vec![loopback(2), loopback(3), loopback(1)],
        &recorder,
    ));

    let err = transport.open().await.unwrap_err();
    match &err {
        Error::Connect {
            address, attempts, ..
        } => {
            assert_eq!(address, &format!("127.0.0.1:{port}"));
            assert_eq!(*attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(
        recorder.states(),
        vec![DataChannelState::ServerConnectionError]
    );

    transport.close().await;
    assert!(!transport.is_open());
}

#[tokio::test]
async fn test_connect_timeout_moves_to_next_address() {
    init_tracing();
    let (port, server) = plain_server().await;
    let (_silent, _backlog) = unresponsive_listener(loopback(2), port).await;

    let recorder = Arc::new(Recorder::default());
    let config = Config::builder(HOST)
        .port(port)
        .connect_timeout(Duration::from_millis(300))
        .build();
    let mut transport = MailTransport::new(connector(
        config,
        vec![loopback(2), loopback(1)],
        &recorder,
    ));

    transport.open().await.unwrap();
    let connection = transport.connection_mut().unwrap();
    assert_eq!(
        connection.peer_addr().unwrap(),
        SocketAddr::new(loopback(1), port)
    );
    assert_eq!(connection.read_line(true).await.unwrap(), "* OK ready");
    assert!(recorder.states().is_empty());

    transport.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_connect_timeout_on_only_address() {
    init_tracing();
    let (silent, _backlog) = unresponsive_listener(loopback(2), 0).await;
    let port = silent.local_addr().unwrap().port();

    let recorder = Arc::new(Recorder::default());
    let config = Config::builder(HOST)
        .port(port)
        .connect_timeout(Duration::from_millis(300))
        .build();
    let mut transport = MailTransport::new(connector(config, vec![loopback(2)], &recorder));

    let err = transport.open().await.unwrap_err();
    match &err {
        Error::Connect {
            address,
            attempts,
            source,
        } => {
            assert_eq!(address, &format!("127.0.0.2:{port}"));
            assert_eq!(*attempts, 1);
            assert_eq!(source.kind(), io::ErrorKind::TimedOut);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        recorder.states(),
        vec![DataChannelState::ServerConnectionError]
    );
    assert!(!transport.is_open());
}

#[tokio::test]
async fn test_default_network_connects_by_name() {
    init_tracing();
    let (port, server) = plain_server().await;
    let mut transport = MailTransport::new(Connector::new(Config::new(
        "127.0.0.1",
        port,
        Flags::NONE,
    )));

    transport.open().await.unwrap();
    assert_eq!(transport.read_line(false).await.unwrap(), "* OK ready");
    transport.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_trust_all_accepts_mismatched_certificate() {
    init_tracing();
    let authority = Authority::new("Unknown CA");
    let (leaf, key) = authority.issue(&["other.example.net"]);
    let (port, server) = tls_server(vec![leaf], key).await;

    let recorder = Arc::new(Recorder::default());
    let config = Config::builder(HOST)
        .port(port)
        .flags(Flags::ENCRYPT | Flags::TRUST_ALL)
        .build();
    let mut transport = MailTransport::new(connector(config, vec![loopback(1)], &recorder));

    transport.open().await.unwrap();
    assert!(transport.is_open());
    assert!(transport.trusts_all_certificates());
    assert!(transport.connection_mut().unwrap().is_tls());
    assert_eq!(transport.read_line(true).await.unwrap(), "* OK secure");
    assert!(recorder.states().is_empty());

    transport.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_hostname_mismatch_is_rejected() {
    init_tracing();
    let authority = Authority::new("Test Mail CA");
    let (leaf, key) = authority.issue(&["other.example.net"]);
    let (port, server) = tls_server(vec![leaf], key).await;

    let recorder = Arc::new(Recorder::default());
    let config = Config::builder(HOST)
        .port(port)
        .encrypt(true)
        .root_certificate(authority.root())
        .build();
    let mut transport = MailTransport::new(connector(config, vec![loopback(1)], &recorder));

    let err = transport.open().await.unwrap_err();
    assert!(matches!(err, Error::PeerUnverified { .. }), "{err}");
    assert_eq!(err.kind(), ErrorKind::PeerUnverified);
    assert_eq!(
        recorder.states(),
        vec![DataChannelState::CommunicationError]
    );
    assert!(!transport.is_open());

    transport.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_wildcard_certificate_is_accepted() {
    init_tracing();
    let authority = Authority::new("Test Mail CA");
    let (leaf, key) = authority.issue(&["*.example.com"]);
    let (port, server) = tls_server(vec![leaf], key).await;

    let recorder = Arc::new(Recorder::default());
    let config = Config::builder(HOST)
        .port(port)
        .encrypt(true)
        .root_certificate(authority.root())
        .build();
    let mut transport = MailTransport::new(connector(config, vec![loopback(1)], &recorder));

    transport.open().await.unwrap();
    assert!(transport.is_open());
    assert_eq!(transport.read_line(true).await.unwrap(), "* OK secure");
    transport
        .write_line("A1 LOGIN user secret", Some("A1 LOGIN user ****"))
        .await
        .unwrap();
    assert!(recorder.states().is_empty());

    transport.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_wildcard_certificate_covers_nested_host() {
    init_tracing();
    let authority = Authority::new("Test Mail CA");
    let (leaf, key) = authority.issue(&["*.example.com"]);
    let (port, server) = tls_server(vec![leaf], key).await;

    let recorder = Arc::new(Recorder::default());
    let config = Config::builder("imap.eu.example.com")
        .port(port)
        .encrypt(true)
        .root_certificate(authority.root())
        .build();
    let mut transport = MailTransport::new(connector(config, vec![loopback(1)], &recorder));

    transport.open().await.unwrap();
    assert_eq!(transport.read_line(true).await.unwrap(), "* OK secure");
    assert!(recorder.states().is_empty());

    transport.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_untrusted_chain_fails_handshake() {
    init_tracing();
    let authority = Authority::new("Unknown CA");
    let (leaf, key) = authority.issue(&[HOST]);
    let (port, server) = tls_server(vec![leaf], key).await;

    let recorder = Arc::new(Recorder::default());
    let config = Config::builder(HOST).port(port).encrypt(true).build();
    let mut transport = MailTransport::new(connector(config, vec![loopback(1)], &recorder));

    let err = transport.open().await.unwrap_err();
    assert!(matches!(err, Error::Connect { .. }), "{err}");
    assert_eq!(
        recorder.states(),
        vec![DataChannelState::ServerConnectionError]
    );

    transport.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn test_clone_of_open_transport_is_closed() {
    init_tracing();
    let (port, server) = plain_server().await;
    let recorder = Arc::new(Recorder::default());
    let mut transport = MailTransport::new(connector(
        Config::new(HOST, port, Flags::NONE),
        vec![loopback(1)],
        &recorder,
    ));
    transport.open().await.unwrap();

    let mut clone = transport.clone();
    assert!(!clone.is_open());
    assert_eq!(clone.connector().host(), HOST);
    assert_eq!(clone.connector().port(), port);
    assert!(matches!(
        clone.read_line(true).await,
        Err(Error::NotConnected)
    ));
    clone.close().await;

    assert!(transport.is_open());
    transport.close().await;
    server.await.unwrap();
}
