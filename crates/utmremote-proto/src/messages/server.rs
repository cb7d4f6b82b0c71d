//! Controller-to-host messages.
//!
//! Each call is a marker type implementing [`ServerCall`]; requests that
//! carry only a machine id share [`VmRequest`], and calls with nothing to
//! say in one direction use [`Empty`].

use bytes::Bytes;

use crate::cod::{CodDecode, CodEncode, CodError, Decoder, Encoder};
use crate::messages::{Empty, ServerCall, ServerMessageId};
use crate::qemu::QemuConfiguration;
use crate::vm::{
    Capabilities, SpiceServerInfo, StartOptions, StopMethod, Timestamp, VmId, VmInfo,
};

/// Request targeting a single machine by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRequest {
    /// Target machine.
    pub id: VmId,
}

impl VmRequest {
    /// Request for `id`.
    pub fn new(id: impl Into<VmId>) -> Self {
        Self { id: id.into() }
    }
}

impl CodEncode for VmRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("id", &self.id).finish();
    }
}

impl CodDecode for VmRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        Ok(Self { id: dec.record()?.required("id")? })
    }
}

/// The mandatory first call on every link.
pub struct ServerHandshake;

/// Handshake request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshakeRequest {
    /// Protocol version the client speaks.
    pub version: i64,
    /// Password, when the server requires one.
    pub password: Option<String>,
}

impl CodEncode for ServerHandshakeRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("version", &self.version)
            .optional("password", &self.password)
            .finish();
    }
}

impl CodDecode for ServerHandshakeRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self { version: rec.required("version")?, password: rec.optional("password")? })
    }
}

/// Handshake reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandshakeReply {
    /// Protocol version the server speaks.
    pub version: i64,
    /// Whether the link is authenticated; `false` terminates it.
    pub is_authenticated: bool,
    /// Host capability mask.
    pub capabilities: Capabilities,
    /// Host hardware model string.
    pub model: String,
}

impl CodEncode for ServerHandshakeReply {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("version", &self.version)
            .field("isAuthenticated", &self.is_authenticated)
            .field("capabilities", &self.capabilities)
            .field("model", &self.model)
            .finish();
    }
}

impl CodDecode for ServerHandshakeReply {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self {
            version: rec.required("version")?,
            is_authenticated: rec.required("isAuthenticated")?,
            capabilities: rec.required("capabilities")?,
            model: rec.required("model")?,
        })
    }
}

impl ServerCall for ServerHandshake {
    const ID: ServerMessageId = ServerMessageId::ServerHandshake;
    type Request = ServerHandshakeRequest;
    type Reply = ServerHandshakeReply;
}

/// List machine ids in display order.
pub struct ListVirtualMachines;

/// Reply listing machine ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListVirtualMachinesReply {
    /// Machine ids in display order.
    pub ids: Vec<VmId>,
}

impl CodEncode for ListVirtualMachinesReply {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("ids", &self.ids).finish();
    }
}

impl CodDecode for ListVirtualMachinesReply {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        Ok(Self { ids: dec.record()?.required("ids")? })
    }
}

impl ServerCall for ListVirtualMachines {
    const ID: ServerMessageId = ServerMessageId::ListVirtualMachines;
    type Request = Empty;
    type Reply = ListVirtualMachinesReply;
}

/// Move machines within the display order.
pub struct ReorderVirtualMachines;

/// Reorder request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderVirtualMachinesRequest {
    /// Machines to move.
    pub ids: Vec<VmId>,
    /// Destination offset in the list.
    pub offset: i64,
}

impl CodEncode for ReorderVirtualMachinesRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("ids", &self.ids).field("offset", &self.offset).finish();
    }
}

impl CodDecode for ReorderVirtualMachinesRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self { ids: rec.required("ids")?, offset: rec.required("offset")? })
    }
}

impl ServerCall for ReorderVirtualMachines {
    const ID: ServerMessageId = ServerMessageId::ReorderVirtualMachines;
    type Request = ReorderVirtualMachinesRequest;
    type Reply = Empty;
}

/// Fetch directory entries for a set of machines.
pub struct GetVirtualMachineInformation;

/// Information request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetVirtualMachineInformationRequest {
    /// Machines to describe.
    pub ids: Vec<VmId>,
}

impl CodEncode for GetVirtualMachineInformationRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("ids", &self.ids).finish();
    }
}

impl CodDecode for GetVirtualMachineInformationRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        Ok(Self { ids: dec.record()?.required("ids")? })
    }
}

/// Information reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetVirtualMachineInformationReply {
    /// One entry per requested machine.
    pub informations: Vec<VmInfo>,
}

impl CodEncode for GetVirtualMachineInformationReply {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("informations", &self.informations).finish();
    }
}

impl CodDecode for GetVirtualMachineInformationReply {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        Ok(Self { informations: dec.record()?.required("informations")? })
    }
}

impl ServerCall for GetVirtualMachineInformation {
    const ID: ServerMessageId = ServerMessageId::GetVirtualMachineInformation;
    type Request = GetVirtualMachineInformationRequest;
    type Reply = GetVirtualMachineInformationReply;
}

/// Fetch one machine's QEMU configuration.
pub struct GetQemuConfiguration;

/// Configuration reply.
#[derive(Debug, Clone, PartialEq)]
pub struct GetQemuConfigurationReply {
    /// The machine's configuration tree.
    pub configuration: QemuConfiguration,
}

impl CodEncode for GetQemuConfigurationReply {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("configuration", &self.configuration).finish();
    }
}

impl CodDecode for GetQemuConfigurationReply {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        Ok(Self { configuration: dec.record()?.required("configuration")? })
    }
}

impl ServerCall for GetQemuConfiguration {
    const ID: ServerMessageId = ServerMessageId::GetQemuConfiguration;
    type Request = VmRequest;
    type Reply = GetQemuConfigurationReply;
}

/// Total size of a machine's package directory.
pub struct GetPackageSize;

/// Package size reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetPackageSizeReply {
    /// Size in bytes.
    pub size: i64,
}

impl CodEncode for GetPackageSizeReply {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("size", &self.size).finish();
    }
}

impl CodDecode for GetPackageSizeReply {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        Ok(Self { size: dec.record()?.required("size")? })
    }
}

impl ServerCall for GetPackageSize {
    const ID: ServerMessageId = ServerMessageId::GetPackageSize;
    type Request = VmRequest;
    type Reply = GetPackageSizeReply;
}

/// Download one file from a machine's package.
pub struct GetPackageFile;

/// File download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPackageFileRequest {
    /// Target machine.
    pub id: VmId,
    /// Path below the package root.
    pub relative_path_components: Vec<String>,
    /// Skip the transfer when the server's copy is not newer than this.
    pub last_modified: Option<Timestamp>,
}

impl CodEncode for GetPackageFileRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("id", &self.id)
            .field("relativePathComponents", &self.relative_path_components)
            .optional("lastModified", &self.last_modified)
            .finish();
    }
}

impl CodDecode for GetPackageFileRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self {
            id: rec.required("id")?,
            relative_path_components: rec.required("relativePathComponents")?,
            last_modified: rec.optional("lastModified")?,
        })
    }
}

/// File download reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetPackageFileReply {
    /// File contents.
    pub data: Bytes,
    /// Modification time of the server's copy.
    pub last_modified: Timestamp,
}

impl CodEncode for GetPackageFileReply {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("data", &self.data)
            .field("lastModified", &self.last_modified)
            .finish();
    }
}

impl CodDecode for GetPackageFileReply {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self { data: rec.required("data")?, last_modified: rec.required("lastModified")? })
    }
}

impl ServerCall for GetPackageFile {
    const ID: ServerMessageId = ServerMessageId::GetPackageFile;
    type Request = GetPackageFileRequest;
    type Reply = GetPackageFileReply;
}

/// Upload one file into a machine's package.
pub struct SendPackageFile;

/// File upload request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPackageFileRequest {
    /// Target machine.
    pub id: VmId,
    /// Path below the package root.
    pub relative_path_components: Vec<String>,
    /// Modification time to record.
    pub last_modified: Timestamp,
    /// File contents.
    pub data: Bytes,
}

impl CodEncode for SendPackageFileRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("id", &self.id)
            .field("relativePathComponents", &self.relative_path_components)
            .field("lastModified", &self.last_modified)
            .field("data", &self.data)
            .finish();
    }
}

impl CodDecode for SendPackageFileRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self {
            id: rec.required("id")?,
            relative_path_components: rec.required("relativePathComponents")?,
            last_modified: rec.required("lastModified")?,
            data: rec.required("data")?,
        })
    }
}

impl ServerCall for SendPackageFile {
    const ID: ServerMessageId = ServerMessageId::SendPackageFile;
    type Request = SendPackageFileRequest;
    type Reply = Empty;
}

/// Delete one file from a machine's package.
pub struct DeletePackageFile;

/// File delete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletePackageFileRequest {
    /// Target machine.
    pub id: VmId,
    /// Path below the package root.
    pub relative_path_components: Vec<String>,
}

impl CodEncode for DeletePackageFileRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("id", &self.id)
            .field("relativePathComponents", &self.relative_path_components)
            .finish();
    }
}

impl CodDecode for DeletePackageFileRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self {
            id: rec.required("id")?,
            relative_path_components: rec.required("relativePathComponents")?,
        })
    }
}

impl ServerCall for DeletePackageFile {
    const ID: ServerMessageId = ServerMessageId::DeletePackageFile;
    type Request = DeletePackageFileRequest;
    type Reply = Empty;
}

/// Attach the guest tools image to a machine.
pub struct MountGuestToolsOnVirtualMachine;

impl ServerCall for MountGuestToolsOnVirtualMachine {
    const ID: ServerMessageId = ServerMessageId::MountGuestToolsOnVirtualMachine;
    type Request = VmRequest;
    type Reply = Empty;
}

/// Start a machine.
pub struct StartVirtualMachine;

/// Start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartVirtualMachineRequest {
    /// Target machine.
    pub id: VmId,
    /// Boot options.
    pub options: StartOptions,
}

impl CodEncode for StartVirtualMachineRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("id", &self.id).field("options", &self.options).finish();
    }
}

impl CodDecode for StartVirtualMachineRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self { id: rec.required("id")?, options: rec.required("options")? })
    }
}

/// Start reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartVirtualMachineReply {
    /// SPICE endpoint parameters for the running machine.
    pub server_info: SpiceServerInfo,
}

impl CodEncode for StartVirtualMachineReply {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("serverInfo", &self.server_info).finish();
    }
}

impl CodDecode for StartVirtualMachineReply {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        Ok(Self { server_info: dec.record()?.required("serverInfo")? })
    }
}

impl ServerCall for StartVirtualMachine {
    const ID: ServerMessageId = ServerMessageId::StartVirtualMachine;
    type Request = StartVirtualMachineRequest;
    type Reply = StartVirtualMachineReply;
}

/// Stop a machine.
pub struct StopVirtualMachine;

/// Stop request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopVirtualMachineRequest {
    /// Target machine.
    pub id: VmId,
    /// How forcefully to stop it.
    pub method: StopMethod,
}

impl CodEncode for StopVirtualMachineRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("id", &self.id).field("method", &self.method).finish();
    }
}

impl CodDecode for StopVirtualMachineRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self { id: rec.required("id")?, method: rec.required("method")? })
    }
}

impl ServerCall for StopVirtualMachine {
    const ID: ServerMessageId = ServerMessageId::StopVirtualMachine;
    type Request = StopVirtualMachineRequest;
    type Reply = Empty;
}

/// Restart a machine.
pub struct RestartVirtualMachine;

impl ServerCall for RestartVirtualMachine {
    const ID: ServerMessageId = ServerMessageId::RestartVirtualMachine;
    type Request = VmRequest;
    type Reply = Empty;
}

/// Pause a machine.
pub struct PauseVirtualMachine;

impl ServerCall for PauseVirtualMachine {
    const ID: ServerMessageId = ServerMessageId::PauseVirtualMachine;
    type Request = VmRequest;
    type Reply = Empty;
}

/// Resume a paused machine.
pub struct ResumeVirtualMachine;

impl ServerCall for ResumeVirtualMachine {
    const ID: ServerMessageId = ServerMessageId::ResumeVirtualMachine;
    type Request = VmRequest;
    type Reply = Empty;
}

/// Request naming a snapshot, or the default one when `name` is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Target machine.
    pub id: VmId,
    /// Snapshot name.
    pub name: Option<String>,
}

impl CodEncode for SnapshotRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record().field("id", &self.id).optional("name", &self.name).finish();
    }
}

impl CodDecode for SnapshotRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self { id: rec.required("id")?, name: rec.optional("name")? })
    }
}

/// Save a snapshot.
pub struct SaveSnapshotVirtualMachine;

impl ServerCall for SaveSnapshotVirtualMachine {
    const ID: ServerMessageId = ServerMessageId::SaveSnapshotVirtualMachine;
    type Request = SnapshotRequest;
    type Reply = Empty;
}

/// Delete a snapshot.
pub struct DeleteSnapshotVirtualMachine;

impl ServerCall for DeleteSnapshotVirtualMachine {
    const ID: ServerMessageId = ServerMessageId::DeleteSnapshotVirtualMachine;
    type Request = SnapshotRequest;
    type Reply = Empty;
}

/// Restore a snapshot.
pub struct RestoreSnapshotVirtualMachine;

impl ServerCall for RestoreSnapshotVirtualMachine {
    const ID: ServerMessageId = ServerMessageId::RestoreSnapshotVirtualMachine;
    type Request = SnapshotRequest;
    type Reply = Empty;
}

/// Switch a machine's pointing device between mouse and tablet mode.
pub struct ChangePointerTypeVirtualMachine;

/// Pointer type request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangePointerTypeRequest {
    /// Target machine.
    pub id: VmId,
    /// Tablet (absolute) rather than mouse (relative) input.
    pub is_tablet_mode: bool,
}

impl CodEncode for ChangePointerTypeRequest {
    fn encode(&self, enc: &mut Encoder<'_>) {
        enc.record()
            .field("id", &self.id)
            .field("isTabletMode", &self.is_tablet_mode)
            .finish();
    }
}

impl CodDecode for ChangePointerTypeRequest {
    fn decode(dec: &mut Decoder<'_, '_>) -> Result<Self, CodError> {
        let rec = dec.record()?;
        Ok(Self { id: rec.required("id")?, is_tablet_mode: rec.required("isTabletMode")? })
    }
}

impl ServerCall for ChangePointerTypeVirtualMachine {
    const ID: ServerMessageId = ServerMessageId::ChangePointerTypeVirtualMachine;
    type Request = ChangePointerTypeRequest;
    type Reply = Empty;
}
