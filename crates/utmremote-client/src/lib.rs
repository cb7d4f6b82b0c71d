//! Client for the UTM Remote protocol.
//!
//! Connects to a UTM server over TLS with mutual self-signed certificates,
//! runs the out-of-band connection-fingerprint trust check, performs the
//! protocol handshake, and exposes every server-bound message as a typed
//! async method. Server-pushed notifications are delivered to a
//! [`ClientDelegate`].
//!
//! # Connecting
//!
//! ```no_run
//! use std::str::FromStr;
//!
//! use utmremote_client::{ClientIdentity, Fingerprint, UtmClient, DEFAULT_PORT};
//!
//! # async fn run() -> Result<(), utmremote_client::ClientError> {
//! let identity = ClientIdentity::load(std::path::Path::new("client.crt"))?;
//! let client = UtmClient::new(identity);
//!
//! // Pinned fingerprint: one call.
//! let pinned = Fingerprint::from_str("AA:…").ok();
//! let session = client.connect("utm.local", DEFAULT_PORT, None, pinned.as_ref()).await?;
//!
//! for id in session.list_virtual_machines().await? {
//!     println!("{id}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Interactive callers use [`UtmClient::open`], show
//! [`PendingSession::connection_fingerprint`] to the user, and call
//! [`PendingSession::establish`] once trust is confirmed — no frame flows
//! before that.

mod delegate;
mod error;
mod fingerprint;
mod identity;
mod link;
mod session;
mod spice;
mod store;
mod trust;

pub use delegate::{ClientDelegate, DelegateError, NullDelegate};
pub use error::ClientError;
pub use fingerprint::{Fingerprint, ParseFingerprintError, FINGERPRINT_LEN};
pub use identity::ClientIdentity;
pub use session::{
    PendingSession, Session, UtmClient, DEFAULT_PORT, MDNS_SERVICE_TYPE, PROTOCOL_VERSION,
};
pub use spice::fetch_spice_certificate;
pub use store::{
    config_dir, default_certificate_path, SavedServer, ServerStore, CERTIFICATE_FILE_NAME,
    CONFIG_DIR_NAME,
};
