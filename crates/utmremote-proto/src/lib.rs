//! Wire protocol for the UTM Remote client.
//!
//! The UTM Remote protocol is a TLS-framed request/reply protocol between a
//! controller (this client) and a host that manages virtual machines. This
//! crate holds everything that describes bytes on the wire:
//!
//! - [`cod`]: the self-describing binary value codec used for every request
//!   and reply body. A COD document carries a per-document dictionary of
//!   "shapes" (sorted field-name lists) followed by the root value.
//! - [`frame`]: the length-prefixed frame envelope (message id, flags,
//!   correlation token, body).
//! - [`messages`]: the typed message catalogue for both directions, with
//!   stable small-integer ids.
//! - [`vm`] and [`qemu`]: the domain data model carried by the catalogue.
//!
//! Transport, trust, and the session state machine live in
//! `utmremote-client`; this crate is pure data and does no I/O.

pub mod cod;
pub mod frame;
pub mod messages;
pub mod qemu;
pub mod vm;

pub use frame::{Frame, FrameError, FrameFlags};
