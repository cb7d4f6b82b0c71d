//! Host-to-controller messages.
//!
//! Apart from [`ClientHandshakeRequest`], these are notifications: the reply
//! is empty and the effect is to invoke a client observer.

use std::collections::BTreeMap;

use crate::cod::{CodDecode, CodEncode, CodError, Decoder, Encoder};
use crate::qemu::QemuConfiguration;
use crate::vm::{Capabilities, VmId, VmState};

/// Host-initiated handshake request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHandshakeRequest {
    /// Protocol version the host speaks.
    pub version: i64,
}

impl CodEncode for ClientHandshakeRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("version", &self.version).finish();
    }
}

impl CodDecode for ClientHandshakeRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        Ok(Self { version: dec.record()?.required("version")? })
    }
}

/// Controller's reply to the host handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientHandshakeReply {
    /// Protocol version the controller speaks.
    pub version: i64,
    /// Controller capability mask.
    pub capabilities: Capabilities,
}

impl CodEncode for ClientHandshakeReply {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("version", &self.version)
            .field("capabilities", &self.capabilities)
            .finish();
    }
}

impl CodDecode for ClientHandshakeReply {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self { version: rec.required("version")?, capabilities: rec.required("capabilities")? })
    }
}

/// The set of machines changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListHasChangedRequest {
    /// New machine id list in display order.
    pub ids: Vec<VmId>,
}

impl CodEncode for ListHasChangedRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("ids", &self.ids).finish();
    }
}

impl CodDecode for ListHasChangedRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        Ok(Self { ids: dec.record()?.required("ids")? })
    }
}

/// A machine's QEMU configuration changed.
#[derive(Debug, Clone, PartialEq)]
pub struct QemuConfigurationHasChangedRequest {
    /// The machine whose configuration changed.
    pub id: VmId,
    /// Its new configuration.
    pub configuration: QemuConfiguration,
}

impl CodEncode for QemuConfigurationHasChangedRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("id", &self.id)
            .field("configuration", &self.configuration)
            .finish();
    }
}

impl CodDecode for QemuConfigurationHasChangedRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self { id: rec.required("id")?, configuration: rec.required("configuration")? })
    }
}

/// A machine's mounted drives changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedDrivesHasChangedRequest {
    /// The machine whose drives changed.
    pub id: VmId,
    /// Drive identifiers to image names.
    pub mounted_drives: BTreeMap<String, String>,
}

impl CodEncode for MountedDrivesHasChangedRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("id", &self.id)
            .field("mountedDrives", &self.mounted_drives)
            .finish();
    }
}

impl CodDecode for MountedDrivesHasChangedRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self { id: rec.required("id")?, mounted_drives: rec.required("mountedDrives")? })
    }
}

/// A machine entered a new lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineDidTransitionRequest {
    /// The machine that transitioned.
    pub id: VmId,
    /// Its new state.
    pub state: VmState,
    /// Whether takeover is currently allowed.
    pub is_takeover_allowed: bool,
}

impl CodEncode for VirtualMachineDidTransitionRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("id", &self.id)
            .field("state", &self.state)
            .field("isTakeoverAllowed", &self.is_takeover_allowed)
            .finish();
    }
}

impl CodDecode for VirtualMachineDidTransitionRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self {
            id: rec.required("id")?,
            state: rec.required("state")?,
            is_takeover_allowed: rec.required("isTakeoverAllowed")?,
        })
    }
}

/// A machine hit an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineDidErrorRequest {
    /// The machine that errored.
    pub id: VmId,
    /// Human-readable error text.
    pub error_message: String,
}

impl CodEncode for VirtualMachineDidErrorRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("id", &self.id)
            .field("errorMessage", &self.error_message)
            .finish();
    }
}

impl CodDecode for VirtualMachineDidErrorRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self { id: rec.required("id")?, error_message: rec.required("errorMessage")? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cod::{from_bytes, to_bytes};

    #[test]
    fn transition_round_trip() {
        let req = VirtualMachineDidTransitionRequest {
            id: VmId::from("m1"),
            state: VmState::Starting,
            is_takeover_allowed: true,
        };
        let doc = to_bytes(&req);
        assert_eq!(from_bytes::<VirtualMachineDidTransitionRequest>(&doc).unwrap(), req);
    }

    #[test]
    fn mounted_drives_round_trip() {
        let mut drives = BTreeMap::new();
        drives.insert("ide0".to_owned(), "install.iso".to_owned());
        drives.insert("usb1".to_owned(), String::new());
        let req = MountedDrivesHasChangedRequest { id: VmId::from("m1"), mounted_drives: drives };
        let doc = to_bytes(&req);
        assert_eq!(from_bytes::<MountedDrivesHasChangedRequest>(&doc).unwrap(), req);
    }
}
