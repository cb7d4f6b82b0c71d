//! The typed message catalogue.
//!
//! Two disjoint id spaces share the frame envelope: [`server`] messages are
//! requests the controller sends to the host, [`client`] messages are
//! requests the host pushes back (notifications plus its own handshake).
//! Ids are stable small integers assigned in declaration order from zero.

pub mod client;
pub mod server;

use crate::cod::{CodDecode, CodEncode, CodError, Decoder, Encoder};

/// A record with no fields, used by every request or reply that carries
/// nothing. Decoding tolerates any keyed container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Empty;

impl CodEncode for Empty {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().finish();
    }
}

impl CodDecode for Empty {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let _ = dec.record()?;
        Ok(Self)
    }
}

/// Ids of controller-to-host messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ServerMessageId {
    ServerHandshake = 0,
    ListVirtualMachines = 1,
    ReorderVirtualMachines = 2,
    GetVirtualMachineInformation = 3,
    GetQemuConfiguration = 4,
    GetPackageSize = 5,
    GetPackageFile = 6,
    SendPackageFile = 7,
    DeletePackageFile = 8,
    MountGuestToolsOnVirtualMachine = 9,
    StartVirtualMachine = 10,
    StopVirtualMachine = 11,
    RestartVirtualMachine = 12,
    PauseVirtualMachine = 13,
    ResumeVirtualMachine = 14,
    SaveSnapshotVirtualMachine = 15,
    DeleteSnapshotVirtualMachine = 16,
    RestoreSnapshotVirtualMachine = 17,
    ChangePointerTypeVirtualMachine = 18,
}

impl ServerMessageId {
    /// Wire id byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Id from the wire; `None` when outside the catalogue.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::ServerHandshake),
            1 => Some(Self::ListVirtualMachines),
            2 => Some(Self::ReorderVirtualMachines),
            3 => Some(Self::GetVirtualMachineInformation),
            4 => Some(Self::GetQemuConfiguration),
            5 => Some(Self::GetPackageSize),
            6 => Some(Self::GetPackageFile),
            7 => Some(Self::SendPackageFile),
            8 => Some(Self::DeletePackageFile),
            9 => Some(Self::MountGuestToolsOnVirtualMachine),
            10 => Some(Self::StartVirtualMachine),
            11 => Some(Self::StopVirtualMachine),
            12 => Some(Self::RestartVirtualMachine),
            13 => Some(Self::PauseVirtualMachine),
            14 => Some(Self::ResumeVirtualMachine),
            15 => Some(Self::SaveSnapshotVirtualMachine),
            16 => Some(Self::DeleteSnapshotVirtualMachine),
            17 => Some(Self::RestoreSnapshotVirtualMachine),
            18 => Some(Self::ChangePointerTypeVirtualMachine),
            _ => None,
        }
    }
}

/// Ids of host-to-controller messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum ClientMessageId {
    ClientHandshake = 0,
    ListHasChanged = 1,
    QemuConfigurationHasChanged = 2,
    MountedDrivesHasChanged = 3,
    VirtualMachineDidTransition = 4,
    VirtualMachineDidError = 5,
}

impl ClientMessageId {
    /// Wire id byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Id from the wire; `None` when outside the catalogue.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::ClientHandshake),
            1 => Some(Self::ListHasChanged),
            2 => Some(Self::QemuConfigurationHasChanged),
            3 => Some(Self::MountedDrivesHasChanged),
            4 => Some(Self::VirtualMachineDidTransition),
            5 => Some(Self::VirtualMachineDidError),
            _ => None,
        }
    }
}

/// One controller-to-host call: its id and its request/reply record types.
pub trait ServerCall {
    /// Stable message id.
    const ID: ServerMessageId;
    /// Request record.
    type Request: CodEncode;
    /// Reply record.
    type Reply: CodDecode;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_bytes() {
        for raw in 0u8..=18 {
            let id = ServerMessageId::from_u8(raw).unwrap();
            assert_eq!(id.to_u8(), raw);
        }
        assert_eq!(ServerMessageId::from_u8(19), None);

        for raw in 0u8..=5 {
            let id = ClientMessageId::from_u8(raw).unwrap();
            assert_eq!(id.to_u8(), raw);
        }
        assert_eq!(ClientMessageId::from_u8(6), None);
    }
}
