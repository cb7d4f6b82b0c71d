//! TLS setup for the trust-by-fingerprint model.
//!
//! Both peers present self-signed certificates, so hostname verification
//! and chain validation are disabled outright: TLS provides the encrypted
//! channel and the certificate bytes, and trust is decided out of band by
//! comparing the connection fingerprint (see [`crate::fingerprint`]).
//! TLS 1.2 is the floor.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::error::ClientError;
use crate::identity::ClientIdentity;

/// Open a TLS connection to `host:port`, presenting `identity` when given,
/// and return the stream plus the server certificate's DER bytes.
///
/// No application byte is written here; the caller decides trust before any
/// frame flows.
pub(crate) async fn connect_tls(
    host: &str,
    port: u16,
    identity: Option<&ClientIdentity>,
) -> Result<(TlsStream<TcpStream>, Vec<u8>), ClientError> {
    let config = client_tls_config(identity)?;
    let connector = TlsConnector::from(Arc::new(config));
    let name = ServerName::try_from(host.to_owned())
        .map_err(|_| ClientError::Certificate(format!("invalid server name {host:?}")))?;

    let tcp = TcpStream::connect((host, port)).await?;
    let stream = connector.connect(name, tcp).await?;

    let server_cert = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| {
            ClientError::Certificate("server presented no certificate".to_owned())
        })?
        .to_vec();

    Ok((stream, server_cert))
}

/// TLS client configuration: certificate verification replaced by the
/// fingerprint check, optional client certificate authentication.
pub(crate) fn client_tls_config(
    identity: Option<&ClientIdentity>,
) -> Result<rustls::ClientConfig, ClientError> {
    // rustls 0.23 wants a process-level provider; installing twice is fine.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let builder = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert));

    let config = match identity {
        Some(identity) => {
            builder.with_client_auth_cert(identity.certificate_chain(), identity.key())?
        }
        None => builder.with_no_client_auth(),
    };
    Ok(config)
}

/// Server certificate verifier that accepts anything.
///
/// Sound only because the caller gates the link on the out-of-band
/// connection-fingerprint check before any frame is exchanged.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}
