//! The client's certificate identity.
//!
//! The certificate store keeps one PEM file holding the client certificate
//! and its PKCS#8 private key. The key is encrypted under the literal
//! passphrase `password` — the wire layer requires being able to decrypt it
//! on load, and the passphrase protects nothing beyond casual copying (the
//! file itself lives in a 0700 directory).

use std::fs;
use std::path::Path;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::error::ClientError;
use crate::fingerprint::Fingerprint;

/// Passphrase the key in the certificate file is encrypted under.
const KEY_PASSPHRASE: &[u8] = b"password";

const CERTIFICATE_TAG: &str = "CERTIFICATE";
const ENCRYPTED_KEY_TAG: &str = "ENCRYPTED PRIVATE KEY";
const PLAIN_KEY_TAG: &str = "PRIVATE KEY";

/// Client certificate, private key, and the certificate's SHA-256.
pub struct ClientIdentity {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    fingerprint: Fingerprint,
}

impl ClientIdentity {
    /// Load an identity from a PEM file (key and certificate sections in
    /// any order).
    pub fn load(path: &Path) -> Result<Self, ClientError> {
        let text = fs::read_to_string(path)?;
        Self::from_pem(&text)
    }

    /// Parse an identity from PEM text.
    pub fn from_pem(text: &str) -> Result<Self, ClientError> {
        let blocks = pem::parse_many(text)
            .map_err(|error| ClientError::Certificate(format!("invalid PEM: {error}")))?;

        let mut chain = Vec::new();
        let mut key: Option<PrivateKeyDer<'static>> = None;
        for block in blocks {
            match block.tag() {
                CERTIFICATE_TAG => {
                    chain.push(CertificateDer::from(block.contents().to_vec()));
                }
                ENCRYPTED_KEY_TAG => {
                    let info = pkcs8::EncryptedPrivateKeyInfo::try_from(block.contents())
                        .map_err(|error| {
                            ClientError::Certificate(format!("invalid encrypted key: {error}"))
                        })?;
                    let document = info.decrypt(KEY_PASSPHRASE).map_err(|_| {
                        ClientError::Certificate(
                            "failed to decrypt private key with the store passphrase".to_owned(),
                        )
                    })?;
                    key = Some(PrivateKeyDer::from(PrivatePkcs8KeyDer::from(
                        document.as_bytes().to_vec(),
                    )));
                }
                PLAIN_KEY_TAG => {
                    key = Some(PrivateKeyDer::from(PrivatePkcs8KeyDer::from(
                        block.contents().to_vec(),
                    )));
                }
                _ => {}
            }
        }

        let first = chain.first().ok_or_else(|| {
            ClientError::Certificate("no certificate section in file".to_owned())
        })?;
        let fingerprint = Fingerprint::of_der(first);
        let key = key.ok_or_else(|| {
            ClientError::Certificate("no private key section in file".to_owned())
        })?;
        Ok(Self { chain, key, fingerprint })
    }

    /// Generate a fresh self-signed identity and write it to `path` (key
    /// first, then certificate), refusing to overwrite an existing file.
    pub fn generate_to_file(path: &Path) -> Result<Self, ClientError> {
        let bundle = generate_identity_pem()?;
        write_private(path, bundle.as_bytes())?;
        Self::from_pem(&bundle)
    }

    /// SHA-256 of the certificate this process presents.
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub(crate) fn certificate_chain(&self) -> Vec<CertificateDer<'static>> {
        self.chain.clone()
    }

    pub(crate) fn key(&self) -> PrivateKeyDer<'static> {
        self.key.clone_key()
    }
}

/// Build the PEM bundle for a new identity: an ECDSA P-256 key encrypted
/// under the store passphrase, and a ten-year self-signed CA certificate
/// marked for client authentication.
fn generate_identity_pem() -> Result<String, ClientError> {
    let gen_err = |error: rcgen::Error| ClientError::Certificate(error.to_string());

    let key_pair = rcgen::KeyPair::generate().map_err(gen_err)?;

    let mut params = rcgen::CertificateParams::default();
    let mut name = rcgen::DistinguishedName::new();
    name.push(rcgen::DnType::OrganizationName, "UTM");
    name.push(rcgen::DnType::CommonName, "UTM Remote Client");
    params.distinguished_name = name;
    params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    params.key_usages = vec![
        rcgen::KeyUsagePurpose::DigitalSignature,
        rcgen::KeyUsagePurpose::KeyEncipherment,
        rcgen::KeyUsagePurpose::KeyCertSign,
        rcgen::KeyUsagePurpose::CrlSign,
    ];
    params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ClientAuth];
    let cert = params.self_signed(&key_pair).map_err(gen_err)?;

    let key_der = key_pair.serialize_der();
    let key_info = pkcs8::PrivateKeyInfo::try_from(key_der.as_slice())
        .map_err(|error| ClientError::Certificate(format!("generated key invalid: {error}")))?;
    let encrypted = key_info
        .encrypt(rand::rngs::OsRng, KEY_PASSPHRASE)
        .map_err(|error| ClientError::Certificate(format!("key encryption failed: {error}")))?;
    let key_pem = encrypted
        .to_pem(ENCRYPTED_KEY_TAG, pkcs8::LineEnding::LF)
        .map_err(|error| ClientError::Certificate(format!("key encoding failed: {error}")))?;

    Ok(format!("{}{}", key_pem.as_str(), cert.pem()))
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> Result<(), ClientError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> Result<(), ClientError> {
    use std::io::Write;

    let mut file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_identity_parses_back() {
        let bundle = generate_identity_pem().unwrap();
        assert!(bundle.contains("BEGIN ENCRYPTED PRIVATE KEY"));
        assert!(bundle.contains("BEGIN CERTIFICATE"));

        let identity = ClientIdentity::from_pem(&bundle).unwrap();
        assert_eq!(identity.certificate_chain().len(), 1);
        // Fingerprint is deterministic over the certificate bytes.
        let again = ClientIdentity::from_pem(&bundle).unwrap();
        assert_eq!(identity.fingerprint(), again.fingerprint());
    }

    #[test]
    fn missing_key_is_an_error() {
        let bundle = generate_identity_pem().unwrap();
        let cert_only: String = bundle
            .split_inclusive('\n')
            .skip_while(|line| !line.contains("BEGIN CERTIFICATE"))
            .collect();
        assert!(matches!(
            ClientIdentity::from_pem(&cert_only),
            Err(ClientError::Certificate(_))
        ));
    }

    #[test]
    fn generate_refuses_to_overwrite() {
        let dir = std::env::temp_dir().join(format!("utmremote-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("client.crt");
        let _ = fs::remove_file(&path);

        ClientIdentity::generate_to_file(&path).unwrap();
        assert!(ClientIdentity::generate_to_file(&path).is_err());

        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir(&dir);
    }
}
