//! End-to-end tests over a real TLS connection.
//!
//! A miniature UTM server lives on a loopback listener: self-signed
//! certificate, no client-certificate validation (trust is the fingerprint
//! check), scripted frame exchanges. These tests cover what the duplex
//! tests cannot: the trust gate runs against actual certificates, and a
//! refused fingerprint must tear the connection down before any frame
//! reaches the wire.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use utmremote_client::{ClientIdentity, Fingerprint, UtmClient};
use utmremote_proto::cod;
use utmremote_proto::messages::server::{
    ListVirtualMachinesReply, ServerHandshakeReply, ServerHandshakeRequest,
};
use utmremote_proto::messages::ServerMessageId;
use utmremote_proto::vm::{Capabilities, VmId};
use utmremote_proto::Frame;

/// A fresh client identity (unencrypted key form, which the loader also
/// accepts) plus its certificate fingerprint.
fn test_identity() -> ClientIdentity {
    let key = rcgen_keypair();
    let cert = rcgen::CertificateParams::default().self_signed(&key).unwrap();
    let bundle = format!("{}{}", key.serialize_pem(), cert.pem());
    ClientIdentity::from_pem(&bundle).unwrap()
}

fn rcgen_keypair() -> rcgen::KeyPair {
    rcgen::KeyPair::generate().unwrap()
}

/// Bind a loopback TLS server and return its address, certificate DER, and
/// the accepted-stream receiver.
async fn start_tls_server() -> (SocketAddr, Vec<u8>, TcpListener, TlsAcceptor) {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let key = rcgen_keypair();
    let cert = rcgen::CertificateParams::default().self_signed(&key).unwrap();
    let cert_der = cert.der().to_vec();

    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(
            vec![rustls::pki_types::CertificateDer::from(cert_der.clone())],
            rustls::pki_types::PrivateKeyDer::try_from(key.serialize_der()).unwrap(),
        )
        .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(server_config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (addr, cert_der, listener, acceptor)
}

async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Option<Frame> {
    let mut prefix = [0u8; Frame::LENGTH_PREFIX];
    stream.read_exact(&mut prefix).await.ok()?;
    let mut payload = vec![0u8; u64::from_be_bytes(prefix) as usize];
    stream.read_exact(&mut payload).await.ok()?;
    Some(Frame::parse_payload(&payload).unwrap())
}

async fn write_frame<S: AsyncWrite + Unpin>(stream: &mut S, frame: &Frame) {
    stream.write_all(&frame.to_bytes()).await.unwrap();
}

#[tokio::test]
async fn fingerprint_mismatch_tears_down_before_any_frame() {
    let (addr, _cert_der, listener, acceptor) = start_tls_server().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut tls = match acceptor.accept(tcp).await {
            Ok(tls) => tls,
            // The client may drop the socket mid-handshake; either way no
            // application byte was exchanged.
            Err(_) => return 0usize,
        };
        let mut buf = [0u8; 1];
        match tls.read(&mut buf).await {
            Ok(n) => n,
            Err(_) => 0,
        }
    });

    let client = UtmClient::new(test_identity());
    let wrong = Fingerprint::of_der(b"someone else entirely");
    let result = client.connect("127.0.0.1", addr.port(), None, Some(&wrong)).await;

    assert!(matches!(
        result,
        Err(utmremote_client::ClientError::FingerprintMismatch { .. })
    ));
    // The server saw the connection close without a single frame byte.
    assert_eq!(server.await.unwrap(), 0);
}

#[tokio::test]
async fn session_runs_over_real_tls_with_pinned_fingerprint() {
    let (addr, cert_der, listener, acceptor) = start_tls_server().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut tls: tokio_rustls::server::TlsStream<TcpStream> =
            acceptor.accept(tcp).await.unwrap();

        // Mandatory handshake first.
        let frame = read_frame(&mut tls).await.unwrap();
        assert_eq!(frame.id, ServerMessageId::ServerHandshake.to_u8());
        let request: ServerHandshakeRequest = cod::from_bytes(&frame.body).unwrap();
        assert_eq!(request.version, 1);
        let reply = ServerHandshakeReply {
            version: 1,
            is_authenticated: true,
            capabilities: Capabilities::HAS_HYPERVISOR_SUPPORT,
            model: "Mac15,6".to_owned(),
        };
        write_frame(&mut tls, &Frame::response(frame.id, frame.token, cod::to_bytes(&reply)))
            .await;

        // Then answer one list request.
        let frame = read_frame(&mut tls).await.unwrap();
        assert_eq!(frame.id, ServerMessageId::ListVirtualMachines.to_u8());
        let reply = ListVirtualMachinesReply { ids: vec![VmId::from("fedora"), VmId::from("nixos")] };
        write_frame(&mut tls, &Frame::response(frame.id, frame.token, cod::to_bytes(&reply)))
            .await;
    });

    let identity = test_identity();
    let expected = Fingerprint::of_der(&cert_der).xor(identity.fingerprint());

    let client = UtmClient::new(identity);
    let session =
        client.connect("127.0.0.1", addr.port(), None, Some(&expected)).await.unwrap();

    assert_eq!(session.model(), "Mac15,6");
    let ids = session.list_virtual_machines().await.unwrap();
    assert_eq!(ids, vec![VmId::from("fedora"), VmId::from("nixos")]);

    session.close();
    server.await.unwrap();
}

#[tokio::test]
async fn open_exposes_fingerprints_before_any_traffic() {
    let (addr, cert_der, listener, acceptor) = start_tls_server().await;

    let server = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let _ = acceptor.accept(tcp).await;
    });

    let identity = test_identity();
    let client_fp = *identity.fingerprint();
    let client = UtmClient::new(identity);

    let pending = client.open("127.0.0.1", addr.port()).await.unwrap();
    assert_eq!(*pending.server_fingerprint(), Fingerprint::of_der(&cert_der));
    assert_eq!(*pending.client_fingerprint(), client_fp);
    assert_eq!(
        *pending.connection_fingerprint(),
        Fingerprint::of_der(&cert_der).xor(&client_fp)
    );
    pending.reject();
    server.await.unwrap();
}
