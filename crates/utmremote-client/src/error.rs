//! Error types for the client.
//!
//! Strongly-typed errors per failure class rather than stringly `io::Error`
//! everywhere: codec and frame errors convert from the protocol crate,
//! handshake and trust failures get their own variants because callers
//! branch on them.

use thiserror::Error;

use utmremote_proto::cod::CodError;
use utmremote_proto::FrameError;

use crate::fingerprint::Fingerprint;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A COD document violated the codec grammar or the requested type.
    #[error("malformed document: {0}")]
    MalformedDocument(#[from] CodError),

    /// A frame envelope could not be parsed. Fatal to the link.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    /// The peer answered a request with an error-flagged reply.
    #[error("peer error: {0}")]
    Peer(String),

    /// The server speaks a different protocol version. Fatal to the link.
    #[error("server protocol version {server} does not match client version {client}")]
    ProtocolVersionMismatch {
        /// Version this client speaks.
        client: i64,
        /// Version the server reported.
        server: i64,
    },

    /// The server requires a password and none was supplied.
    #[error("the server requires a password")]
    AuthRequired,

    /// The server rejected the supplied password.
    #[error("the server rejected the password")]
    AuthInvalid,

    /// The derived connection fingerprint did not match the expected one.
    /// No frame has been exchanged when this is raised.
    #[error("connection fingerprint mismatch (expected {expected}, got {actual})")]
    FingerprintMismatch {
        /// Fingerprint the caller pinned.
        expected: Fingerprint,
        /// Fingerprint derived from the actual certificates.
        actual: Fingerprint,
    },

    /// The link was torn down while the request was pending, or a request
    /// was issued after teardown.
    #[error("connection closed")]
    ConnectionClosed,

    /// An inbound request's id is not in the catalogue. The link replies
    /// with an error-flagged frame and stays open.
    #[error("unsupported message id {0}")]
    UnsupportedMessageId(u8),

    /// An inbound length prefix exceeded the frame cap. Fatal to the link.
    #[error("oversized frame: {len} bytes exceeds {max}")]
    OversizedFrame {
        /// Declared payload length.
        len: u64,
        /// The cap.
        max: u64,
    },

    /// Certificate material could not be loaded, generated, or parsed.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The SPICE server's certificate does not carry the pinned public key.
    #[error("SPICE server certificate does not match the expected public key")]
    SpicePublicKeyMismatch,

    /// Underlying socket failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// TLS configuration or handshake failure.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),
}
