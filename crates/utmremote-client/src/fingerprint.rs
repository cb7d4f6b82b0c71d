//! Certificate and connection fingerprints.
//!
//! Both peers present self-signed certificates, so trust is established out
//! of band: each side shows the user `SHA-256(server cert) XOR
//! SHA-256(client cert)`, and the user (or a pinned value) confirms they
//! match. XOR makes the value symmetric — both ends derive the same bytes
//! without agreeing on an ordering.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Width of a fingerprint in bytes (SHA-256).
pub const FINGERPRINT_LEN: usize = 32;

/// A certificate digest or the XOR of two of them.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// SHA-256 over a certificate's DER bytes.
    pub fn of_der(der: &[u8]) -> Self {
        Self(Sha256::digest(der).into())
    }

    /// Byte-wise XOR, used to derive the connection fingerprint.
    #[must_use]
    pub fn xor(&self, other: &Self) -> Self {
        let mut out = [0u8; FINGERPRINT_LEN];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.0[i] ^ other.0[i];
        }
        Self(out)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl From<[u8; FINGERPRINT_LEN]> for Fingerprint {
    fn from(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for Fingerprint {
    /// Colon-separated uppercase hex, the form shown in trust dialogs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

/// A string was not a valid fingerprint.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid fingerprint: expected 64 hex digits")]
pub struct ParseFingerprintError;

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    /// Accepts upper or lower case, with or without colon separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| *c != ':').collect();
        let bytes = hex::decode(digits).map_err(|_| ParseFingerprintError)?;
        let bytes: [u8; FINGERPRINT_LEN] =
            bytes.try_into().map_err(|_| ParseFingerprintError)?;
        Ok(Self(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xor_of_complementary_digests() {
        let server = Fingerprint::from([0xaa; FINGERPRINT_LEN]);
        let client = Fingerprint::from([0x55; FINGERPRINT_LEN]);
        let connection = server.xor(&client);
        assert_eq!(connection.as_bytes(), &[0xff; FINGERPRINT_LEN]);
        // Symmetric: both ends derive the same value.
        assert_eq!(client.xor(&server), connection);
    }

    #[test]
    fn display_parse_round_trip() {
        let fp = Fingerprint::of_der(b"certificate bytes");
        let text = fp.to_string();
        assert_eq!(text.len(), 64 + 31);
        assert_eq!(Fingerprint::from_str(&text).unwrap(), fp);
    }

    #[test]
    fn parse_tolerates_case_and_missing_colons() {
        let fp = Fingerprint::from([0xab; FINGERPRINT_LEN]);
        let plain = fp.to_string().replace(':', "").to_lowercase();
        assert_eq!(Fingerprint::from_str(&plain).unwrap(), fp);
    }

    #[test]
    fn parse_rejects_wrong_width() {
        assert!(Fingerprint::from_str("ab:cd").is_err());
        assert!(Fingerprint::from_str("not hex").is_err());
    }
}
