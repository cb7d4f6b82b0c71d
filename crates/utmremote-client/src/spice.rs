//! SPICE server certificate retrieval and pinning.
//!
//! `StartVirtualMachine` returns the public key the SPICE endpoint's
//! certificate must carry. The client does not speak SPICE; it opens a
//! throwaway TLS connection, takes the presented certificate, and — when a
//! key was pinned — fails unless the certificate's SubjectPublicKeyInfo DER
//! is byte-for-byte the expected one. The PEM form is returned for handing
//! to a SPICE viewer.

use x509_parser::prelude::*;

use crate::error::ClientError;
use crate::trust;

/// Fetch the certificate presented at `host:port`, optionally pinning its
/// public key, and return it PEM-encoded.
pub async fn fetch_spice_certificate(
    host: &str,
    port: u16,
    expected_public_key: Option<&[u8]>,
) -> Result<String, ClientError> {
    let (stream, server_cert) = trust::connect_tls(host, port, None).await?;
    drop(stream);

    if let Some(expected) = expected_public_key {
        check_certificate_public_key(&server_cert, expected)?;
    }

    Ok(::pem::encode(&::pem::Pem::new("CERTIFICATE", server_cert)))
}

/// Compare `cert_der`'s SubjectPublicKeyInfo against `expected` by exact
/// DER equality. Parser-independent: no key-object comparison.
pub(crate) fn check_certificate_public_key(
    cert_der: &[u8],
    expected: &[u8],
) -> Result<(), ClientError> {
    let (_, certificate) = X509Certificate::from_der(cert_der)
        .map_err(|error| ClientError::Certificate(format!("invalid certificate: {error}")))?;
    if certificate.tbs_certificate.subject_pki.raw != expected {
        return Err(ClientError::SpicePublicKeyMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generated_cert_der() -> Vec<u8> {
        let key = rcgen::KeyPair::generate().unwrap();
        let cert = rcgen::CertificateParams::default().self_signed(&key).unwrap();
        cert.der().to_vec()
    }

    fn spki_of(der: &[u8]) -> Vec<u8> {
        let (_, cert) = X509Certificate::from_der(der).unwrap();
        cert.tbs_certificate.subject_pki.raw.to_vec()
    }

    #[test]
    fn matching_public_key_passes() {
        let der = generated_cert_der();
        let spki = spki_of(&der);
        check_certificate_public_key(&der, &spki).unwrap();
    }

    #[test]
    fn wrong_public_key_fails() {
        let der = generated_cert_der();
        let other = spki_of(&generated_cert_der());
        assert!(matches!(
            check_certificate_public_key(&der, &other),
            Err(ClientError::SpicePublicKeyMismatch)
        ));
    }

    #[test]
    fn garbage_certificate_fails() {
        assert!(matches!(
            check_certificate_public_key(b"not a certificate", b"key"),
            Err(ClientError::Certificate(_))
        ));
    }
}
