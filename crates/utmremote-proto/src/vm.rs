//! Virtual-machine domain model carried by the message catalogue.

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use bytes::Bytes;

use crate::cod::{CodDecode, CodEncode, CodError, Decoder, Encoder};

/// Define a protocol enumeration: a fieldless enum whose wire form is a
/// one-field record named after the variant identifier.
macro_rules! cod_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// The variant's wire identifier.
            $vis fn identifier(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.identifier())
            }
        }

        impl $crate::cod::CodEncode for $name {
            fn encode(&self, enc: &mut $crate::cod::Encoder<'_>) {
                enc.enum_variant(self.identifier());
            }
        }

        impl $crate::cod::CodDecode for $name {
            fn decode(
                dec: &mut $crate::cod::Decoder<'_, '_>,
            ) -> ::std::result::Result<Self, $crate::cod::CodError> {
                match dec.enum_variant()? {
                    $($wire => Ok(Self::$variant),)+
                    other => Err($crate::cod::CodError::UnknownVariant {
                        variant: other.to_owned(),
                    }),
                }
            }
        }
    };
}

pub(crate) use cod_enum;

/// A virtual machine identifier, carried on the wire as its string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmId(pub String);

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VmId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for VmId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl AsRef<str> for VmId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl CodEncode for VmId {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.string(&self.0);
    }
}

impl CodDecode for VmId {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        dec.string().map(Self)
    }
}

/// A date-time string. Opaque to the protocol; the server compares package
/// file timestamps as it sees fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp(pub String);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Timestamp {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Timestamp {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl CodEncode for Timestamp {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.string(&self.0);
    }
}

impl CodDecode for Timestamp {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        dec.string().map(Self)
    }
}

cod_enum! {
    /// Lifecycle state of a virtual machine.
    pub enum VmState {
        /// Not running.
        Stopped => "stopped",
        /// Boot in progress.
        Starting => "starting",
        /// Running.
        Started => "started",
        /// Pause requested, not yet paused.
        Pausing => "pausing",
        /// Execution suspended in memory.
        Paused => "paused",
        /// Resume requested, not yet running.
        Resuming => "resuming",
        /// Writing a suspend image.
        Saving => "saving",
        /// Restoring from a suspend image.
        Restoring => "restoring",
        /// Shutdown in progress.
        Stopping => "stopping",
    }
}

cod_enum! {
    /// How to stop a virtual machine.
    pub enum StopMethod {
        /// Ask the guest to shut down.
        Request => "request",
        /// Force power-off.
        Force => "force",
        /// Kill the backend process.
        Kill => "kill",
    }
}

cod_enum! {
    /// Virtualization backend serving a machine.
    pub enum Backend {
        /// Backend not reported.
        Unknown => "unknown",
        /// Apple Virtualization framework.
        Apple => "apple",
        /// QEMU.
        Qemu => "qemu",
    }
}

bitflags! {
    /// Host capability mask reported in the server handshake.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u64 {
        /// Host can JIT-compile guest code.
        const HAS_JIT_ENTITLEMENTS = 1 << 0;
        /// Host has hypervisor support.
        const HAS_HYPERVISOR_SUPPORT = 1 << 1;
        /// Host is aarch64.
        const IS_AARCH64 = 1 << 2;
        /// Host is x86_64.
        const IS_X86_64 = 1 << 3;
    }

    /// Options for starting a virtual machine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StartOptions: u64 {
        /// Discard disk changes on shutdown.
        const BOOT_DISPOSABLE_MODE = 1 << 0;
        /// Boot into recovery.
        const BOOT_RECOVERY = 1 << 1;
        /// The machine is driven by a remote session.
        const REMOTE_SESSION = 1 << 2;
    }
}

impl CodEncode for Capabilities {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.unsigned(self.bits());
    }
}

impl CodDecode for Capabilities {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        // Unknown bits are kept: a newer server may report capabilities this
        // client does not name yet.
        dec.unsigned().map(Self::from_bits_retain)
    }
}

impl CodEncode for StartOptions {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.unsigned(self.bits());
    }
}

impl CodDecode for StartOptions {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        dec.unsigned().map(Self::from_bits_retain)
    }
}

/// Directory entry for one virtual machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmInfo {
    /// Machine identifier.
    pub id: VmId,
    /// Display name.
    pub name: String,
    /// Package path on the host.
    pub path: String,
    /// Whether the entry is a shortcut to a package elsewhere.
    pub is_shortcut: bool,
    /// Whether a suspend image exists.
    pub is_suspended: bool,
    /// Whether another session's machine may be taken over.
    pub is_takeover_allowed: bool,
    /// Virtualization backend.
    pub backend: Backend,
    /// Current lifecycle state.
    pub state: VmState,
    /// Mounted drive identifiers to image names. Empty when the server
    /// omits the field.
    pub mounted_drives: BTreeMap<String, String>,
}

impl CodEncode for VmInfo {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("id", &self.id)
            .field("name", &self.name)
            .field("path", &self.path)
            .field("isShortcut", &self.is_shortcut)
            .field("isSuspended", &self.is_suspended)
            .field("isTakeoverAllowed", &self.is_takeover_allowed)
            .field("backend", &self.backend)
            .field("state", &self.state)
            .field("mountedDrives", &self.mounted_drives)
            .finish();
    }
}

impl CodDecode for VmInfo {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self {
            id: rec.required("id")?,
            name: rec.required("name")?,
            path: rec.required("path")?,
            is_shortcut: rec.required("isShortcut")?,
            is_suspended: rec.required("isSuspended")?,
            is_takeover_allowed: rec.required("isTakeoverAllowed")?,
            backend: rec.required("backend")?,
            state: rec.required("state")?,
            mounted_drives: rec.optional("mountedDrives")?.unwrap_or_default(),
        })
    }
}

/// SPICE endpoint parameters from a successful start.
///
/// The client does not speak SPICE; it hands these to a viewer and can pin
/// the endpoint's certificate against `spice_public_key`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpiceServerInfo {
    /// Port on the host itself.
    pub spice_port_internal: Option<i64>,
    /// Externally reachable port, when port forwarding is set up.
    pub spice_port_external: Option<i64>,
    /// Externally reachable host name.
    pub spice_host_external: Option<String>,
    /// DER SubjectPublicKeyInfo the SPICE server's certificate must carry.
    pub spice_public_key: Option<Bytes>,
    /// One-time password for the SPICE session.
    pub spice_password: Option<String>,
}

impl CodEncode for SpiceServerInfo {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .optional("spicePortInternal", &self.spice_port_internal)
            .optional("spicePortExternal", &self.spice_port_external)
            .optional("spiceHostExternal", &self.spice_host_external)
            .optional("spicePublicKey", &self.spice_public_key)
            .optional("spicePassword", &self.spice_password)
            .finish();
    }
}

impl CodDecode for SpiceServerInfo {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self {
            spice_port_internal: rec.optional("spicePortInternal")?,
            spice_port_external: rec.optional("spicePortExternal")?,
            spice_host_external: rec.optional("spiceHostExternal")?,
            spice_public_key: rec.optional("spicePublicKey")?,
            spice_password: rec.optional("spicePassword")?,
        })
    }
}
