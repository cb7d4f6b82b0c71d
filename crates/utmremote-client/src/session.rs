//! Connection establishment and the typed RPC surface.
//!
//! A connection moves through its states as types:
//!
//! ```text
//! UtmClient::open ──► PendingSession ──► Session
//!                     (TLS up, no        (trusted, handshaken,
//!                      frames yet)        RPCs available)
//! ```
//!
//! [`PendingSession`] exposes the derived connection fingerprint so the
//! caller can run the out-of-band trust check (a dialog, a pinned value)
//! while the link is still silent: the reader starts and the first frame is
//! written only in [`PendingSession::establish`]. RPCs other than the
//! handshake cannot be issued before the handshake because only `Session`
//! has them; after [`Session::close`] every call fails with
//! `ConnectionClosed`.

use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use utmremote_proto::cod;
use utmremote_proto::messages::client::{
    ClientHandshakeReply, ClientHandshakeRequest, ListHasChangedRequest,
    MountedDrivesHasChangedRequest, QemuConfigurationHasChangedRequest,
    VirtualMachineDidErrorRequest, VirtualMachineDidTransitionRequest,
};
use utmremote_proto::messages::server::{
    ChangePointerTypeRequest, ChangePointerTypeVirtualMachine, DeletePackageFile,
    DeletePackageFileRequest, DeleteSnapshotVirtualMachine, GetPackageFile,
    GetPackageFileRequest, GetPackageSize, GetQemuConfiguration, GetVirtualMachineInformation,
    GetVirtualMachineInformationRequest, ListVirtualMachines, MountGuestToolsOnVirtualMachine,
    PauseVirtualMachine, ReorderVirtualMachines, ReorderVirtualMachinesRequest,
    RestartVirtualMachine, RestoreSnapshotVirtualMachine, ResumeVirtualMachine,
    SaveSnapshotVirtualMachine, SendPackageFile, SendPackageFileRequest, ServerHandshake,
    ServerHandshakeRequest, SnapshotRequest, StartVirtualMachine, StartVirtualMachineRequest,
    StopVirtualMachine, StopVirtualMachineRequest, VmRequest,
};
use utmremote_proto::messages::{ClientMessageId, Empty, ServerCall};
use utmremote_proto::qemu::QemuConfiguration;
use utmremote_proto::vm::{
    Capabilities, SpiceServerInfo, StartOptions, StopMethod, Timestamp, VmId, VmInfo,
};

use crate::delegate::{ClientDelegate, NullDelegate};
use crate::error::ClientError;
use crate::fingerprint::Fingerprint;
use crate::identity::ClientIdentity;
use crate::link::{DispatchError, InboundHandler, Link};
use crate::trust;

/// Default TCP port of a UTM Remote server.
pub const DEFAULT_PORT: u16 = 21589;

/// mDNS service type UTM servers advertise under. Discovery itself is a
/// collaborator's job; it hands this client a name, address, and port.
pub const MDNS_SERVICE_TYPE: &str = "_utm_server._tcp";

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: i64 = 1;

/// Entry point: a client identity plus the notification delegate to attach
/// to every session it opens.
pub struct UtmClient {
    identity: ClientIdentity,
    delegate: Arc<dyn ClientDelegate>,
}

impl UtmClient {
    /// Client that ignores notifications.
    pub fn new(identity: ClientIdentity) -> Self {
        Self::with_delegate(identity, Arc::new(NullDelegate))
    }

    /// Client delivering notifications to `delegate`.
    pub fn with_delegate(identity: ClientIdentity, delegate: Arc<dyn ClientDelegate>) -> Self {
        Self { identity, delegate }
    }

    /// Open the TLS connection and derive the fingerprints. No frame is
    /// exchanged; the result is waiting for the trust decision.
    pub async fn open(&self, host: &str, port: u16) -> Result<PendingSession, ClientError> {
        let (stream, server_cert) = trust::connect_tls(host, port, Some(&self.identity)).await?;
        let server = Fingerprint::of_der(&server_cert);
        let client = *self.identity.fingerprint();
        let connection = server.xor(&client);
        tracing::debug!(server_fingerprint = %server, connection_fingerprint = %connection, "tls established");
        Ok(PendingSession {
            stream,
            server,
            client,
            connection,
            delegate: Arc::clone(&self.delegate),
        })
    }

    /// Open, check `expected_fingerprint` when given, and perform the
    /// handshake. The one-call surface for callers with a pinned
    /// fingerprint; interactive callers use [`UtmClient::open`] and present
    /// [`PendingSession::connection_fingerprint`] to the user first.
    pub async fn connect(
        &self,
        host: &str,
        port: u16,
        password: Option<&str>,
        expected_fingerprint: Option<&Fingerprint>,
    ) -> Result<Session, ClientError> {
        let pending = self.open(host, port).await?;
        if let Some(expected) = expected_fingerprint {
            if *expected != *pending.connection_fingerprint() {
                // Dropping the pending session closes the socket; no frame
                // has been written.
                return Err(ClientError::FingerprintMismatch {
                    expected: *expected,
                    actual: *pending.connection_fingerprint(),
                });
            }
        }
        pending.establish(password).await
    }
}

/// A TLS connection whose trust decision is still pending. The reader is
/// not running and nothing has been written.
pub struct PendingSession {
    stream: TlsStream<TcpStream>,
    server: Fingerprint,
    client: Fingerprint,
    connection: Fingerprint,
    delegate: Arc<dyn ClientDelegate>,
}

impl PendingSession {
    /// SHA-256 of the server's certificate.
    pub fn server_fingerprint(&self) -> &Fingerprint {
        &self.server
    }

    /// SHA-256 of the certificate this process presented.
    pub fn client_fingerprint(&self) -> &Fingerprint {
        &self.client
    }

    /// The connection fingerprint (server XOR client) to confirm out of
    /// band.
    pub fn connection_fingerprint(&self) -> &Fingerprint {
        &self.connection
    }

    /// Accept trust: start the link and perform the mandatory handshake.
    pub async fn establish(self, password: Option<&str>) -> Result<Session, ClientError> {
        Session::handshake_over(self.stream, self.delegate, password).await
    }

    /// Refuse trust and drop the connection.
    pub fn reject(self) {
        tracing::debug!("connection rejected before trust");
    }
}

/// An open, handshaken session.
pub struct Session {
    link: Link,
    capabilities: Capabilities,
    model: String,
}

impl Session {
    /// Spawn the link over an already-trusted stream and run the
    /// `ServerHandshake` exchange that every link must lead with.
    pub(crate) async fn handshake_over<S>(
        stream: S,
        delegate: Arc<dyn ClientDelegate>,
        password: Option<&str>,
    ) -> Result<Self, ClientError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let link = Link::spawn(stream, Arc::new(Dispatcher { delegate }));

        let request = ServerHandshakeRequest {
            version: PROTOCOL_VERSION,
            password: password.map(str::to_owned),
        };
        let reply = match call::<ServerHandshake>(&link, &request).await {
            Ok(reply) => reply,
            Err(error) => {
                link.close();
                return Err(error);
            }
        };

        if reply.version != PROTOCOL_VERSION {
            link.close();
            return Err(ClientError::ProtocolVersionMismatch {
                client: PROTOCOL_VERSION,
                server: reply.version,
            });
        }
        if !reply.is_authenticated {
            link.close();
            return Err(if password.is_some() {
                ClientError::AuthInvalid
            } else {
                ClientError::AuthRequired
            });
        }

        tracing::debug!(model = %reply.model, capabilities = ?reply.capabilities, "handshake complete");
        Ok(Self { link, capabilities: reply.capabilities, model: reply.model })
    }

    /// Capability mask the server reported.
    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Hardware model string the server reported.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Machine ids in display order.
    pub async fn list_virtual_machines(&self) -> Result<Vec<VmId>, ClientError> {
        Ok(call::<ListVirtualMachines>(&self.link, &Empty).await?.ids)
    }

    /// Move `ids` to `offset` within the display order.
    pub async fn reorder_virtual_machines(
        &self,
        ids: Vec<VmId>,
        offset: i64,
    ) -> Result<(), ClientError> {
        call::<ReorderVirtualMachines>(&self.link, &ReorderVirtualMachinesRequest { ids, offset })
            .await?;
        Ok(())
    }

    /// Directory entries for `ids`.
    pub async fn get_virtual_machine_information(
        &self,
        ids: Vec<VmId>,
    ) -> Result<Vec<VmInfo>, ClientError> {
        Ok(call::<GetVirtualMachineInformation>(
            &self.link,
            &GetVirtualMachineInformationRequest { ids },
        )
        .await?
        .informations)
    }

    /// One machine's QEMU configuration.
    pub async fn get_qemu_configuration(
        &self,
        id: &VmId,
    ) -> Result<QemuConfiguration, ClientError> {
        Ok(call::<GetQemuConfiguration>(&self.link, &VmRequest { id: id.clone() })
            .await?
            .configuration)
    }

    /// Total size of a machine's package directory in bytes.
    pub async fn get_package_size(&self, id: &VmId) -> Result<i64, ClientError> {
        Ok(call::<GetPackageSize>(&self.link, &VmRequest { id: id.clone() }).await?.size)
    }

    /// Download one package file; `last_modified` lets the server skip an
    /// unchanged transfer.
    pub async fn get_package_file(
        &self,
        id: &VmId,
        relative_path_components: Vec<String>,
        last_modified: Option<Timestamp>,
    ) -> Result<(Bytes, Timestamp), ClientError> {
        let reply = call::<GetPackageFile>(
            &self.link,
            &GetPackageFileRequest {
                id: id.clone(),
                relative_path_components,
                last_modified,
            },
        )
        .await?;
        Ok((reply.data, reply.last_modified))
    }

    /// Upload one package file.
    pub async fn send_package_file(
        &self,
        id: &VmId,
        relative_path_components: Vec<String>,
        last_modified: Timestamp,
        data: Bytes,
    ) -> Result<(), ClientError> {
        call::<SendPackageFile>(
            &self.link,
            &SendPackageFileRequest {
                id: id.clone(),
                relative_path_components,
                last_modified,
                data,
            },
        )
        .await?;
        Ok(())
    }

    /// Delete one package file.
    pub async fn delete_package_file(
        &self,
        id: &VmId,
        relative_path_components: Vec<String>,
    ) -> Result<(), ClientError> {
        call::<DeletePackageFile>(
            &self.link,
            &DeletePackageFileRequest { id: id.clone(), relative_path_components },
        )
        .await?;
        Ok(())
    }

    /// Attach the guest tools image.
    pub async fn mount_guest_tools(&self, id: &VmId) -> Result<(), ClientError> {
        call::<MountGuestToolsOnVirtualMachine>(&self.link, &VmRequest { id: id.clone() })
            .await?;
        Ok(())
    }

    /// Start a machine and return its SPICE endpoint parameters.
    pub async fn start_virtual_machine(
        &self,
        id: &VmId,
        options: StartOptions,
    ) -> Result<SpiceServerInfo, ClientError> {
        Ok(call::<StartVirtualMachine>(
            &self.link,
            &StartVirtualMachineRequest { id: id.clone(), options },
        )
        .await?
        .server_info)
    }

    /// Stop a machine.
    pub async fn stop_virtual_machine(
        &self,
        id: &VmId,
        method: StopMethod,
    ) -> Result<(), ClientError> {
        call::<StopVirtualMachine>(
            &self.link,
            &StopVirtualMachineRequest { id: id.clone(), method },
        )
        .await?;
        Ok(())
    }

    /// Restart a machine.
    pub async fn restart_virtual_machine(&self, id: &VmId) -> Result<(), ClientError> {
        call::<RestartVirtualMachine>(&self.link, &VmRequest { id: id.clone() }).await?;
        Ok(())
    }

    /// Pause a machine.
    pub async fn pause_virtual_machine(&self, id: &VmId) -> Result<(), ClientError> {
        call::<PauseVirtualMachine>(&self.link, &VmRequest { id: id.clone() }).await?;
        Ok(())
    }

    /// Resume a paused machine.
    pub async fn resume_virtual_machine(&self, id: &VmId) -> Result<(), ClientError> {
        call::<ResumeVirtualMachine>(&self.link, &VmRequest { id: id.clone() }).await?;
        Ok(())
    }

    /// Save a snapshot (the default one when `name` is `None`).
    pub async fn save_snapshot(
        &self,
        id: &VmId,
        name: Option<String>,
    ) -> Result<(), ClientError> {
        call::<SaveSnapshotVirtualMachine>(
            &self.link,
            &SnapshotRequest { id: id.clone(), name },
        )
        .await?;
        Ok(())
    }

    /// Delete a snapshot.
    pub async fn delete_snapshot(
        &self,
        id: &VmId,
        name: Option<String>,
    ) -> Result<(), ClientError> {
        call::<DeleteSnapshotVirtualMachine>(
            &self.link,
            &SnapshotRequest { id: id.clone(), name },
        )
        .await?;
        Ok(())
    }

    /// Restore a snapshot.
    pub async fn restore_snapshot(
        &self,
        id: &VmId,
        name: Option<String>,
    ) -> Result<(), ClientError> {
        call::<RestoreSnapshotVirtualMachine>(
            &self.link,
            &SnapshotRequest { id: id.clone(), name },
        )
        .await?;
        Ok(())
    }

    /// Switch the pointing device between mouse and tablet mode.
    pub async fn change_pointer_type(
        &self,
        id: &VmId,
        is_tablet_mode: bool,
    ) -> Result<(), ClientError> {
        call::<ChangePointerTypeVirtualMachine>(
            &self.link,
            &ChangePointerTypeRequest { id: id.clone(), is_tablet_mode },
        )
        .await?;
        Ok(())
    }

    /// Tear the link down. Idempotent; pending RPCs fail with
    /// `ConnectionClosed`.
    pub fn close(&self) {
        self.link.close();
    }

    /// Whether the link has been torn down.
    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }
}

/// Issue one typed call on the link.
async fn call<C: ServerCall>(link: &Link, request: &C::Request) -> Result<C::Reply, ClientError> {
    let body = cod::to_bytes(request);
    let reply = link.call(C::ID.to_u8(), body).await?;
    Ok(cod::from_bytes::<C::Reply>(&reply)?)
}

/// Routes host-initiated requests: answers the host handshake itself and
/// forwards the five notifications to the delegate.
struct Dispatcher {
    delegate: Arc<dyn ClientDelegate>,
}

impl Dispatcher {
    fn decode<T: cod::CodDecode>(body: &[u8]) -> Result<T, DispatchError> {
        cod::from_bytes(body).map_err(|error| DispatchError::Failed(error.to_string()))
    }

    fn delegate_result(result: Result<(), crate::delegate::DelegateError>) -> Result<Bytes, DispatchError> {
        match result {
            Ok(()) => Ok(cod::to_bytes(&Empty)),
            Err(error) => Err(DispatchError::Failed(error.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl InboundHandler for Dispatcher {
    async fn handle(&self, id: u8, body: Bytes) -> Result<Bytes, DispatchError> {
        let Some(id) = ClientMessageId::from_u8(id) else {
            return Err(DispatchError::Unsupported(id));
        };
        match id {
            ClientMessageId::ClientHandshake => {
                let _request: ClientHandshakeRequest = Self::decode(&body)?;
                let reply = ClientHandshakeReply {
                    version: PROTOCOL_VERSION,
                    capabilities: Capabilities::empty(),
                };
                Ok(cod::to_bytes(&reply))
            }
            ClientMessageId::ListHasChanged => {
                let request: ListHasChangedRequest = Self::decode(&body)?;
                Self::delegate_result(self.delegate.list_has_changed(request.ids).await)
            }
            ClientMessageId::QemuConfigurationHasChanged => {
                let request: QemuConfigurationHasChangedRequest = Self::decode(&body)?;
                Self::delegate_result(
                    self.delegate
                        .qemu_configuration_has_changed(request.id, request.configuration)
                        .await,
                )
            }
            ClientMessageId::MountedDrivesHasChanged => {
                let request: MountedDrivesHasChangedRequest = Self::decode(&body)?;
                Self::delegate_result(
                    self.delegate
                        .mounted_drives_has_changed(request.id, request.mounted_drives)
                        .await,
                )
            }
            ClientMessageId::VirtualMachineDidTransition => {
                let request: VirtualMachineDidTransitionRequest = Self::decode(&body)?;
                Self::delegate_result(
                    self.delegate
                        .virtual_machine_did_transition(
                            request.id,
                            request.state,
                            request.is_takeover_allowed,
                        )
                        .await,
                )
            }
            ClientMessageId::VirtualMachineDidError => {
                let request: VirtualMachineDidErrorRequest = Self::decode(&body)?;
                Self::delegate_result(
                    self.delegate
                        .virtual_machine_did_error(request.id, request.error_message)
                        .await,
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use utmremote_proto::messages::server::ServerHandshakeReply;
    use utmremote_proto::messages::ServerMessageId;
    use utmremote_proto::vm::VmState;
    use utmremote_proto::{Frame, FrameFlags};

    use super::*;
    use crate::delegate::DelegateError;

    async fn read_frame(far: &mut DuplexStream) -> Frame {
        let mut prefix = [0u8; Frame::LENGTH_PREFIX];
        far.read_exact(&mut prefix).await.unwrap();
        let mut payload = vec![0u8; u64::from_be_bytes(prefix) as usize];
        far.read_exact(&mut payload).await.unwrap();
        Frame::parse_payload(&payload).unwrap()
    }

    async fn write_frame(far: &mut DuplexStream, frame: &Frame) {
        far.write_all(&frame.to_bytes()).await.unwrap();
    }

    fn authenticated_reply() -> ServerHandshakeReply {
        ServerHandshakeReply {
            version: PROTOCOL_VERSION,
            is_authenticated: true,
            capabilities: Capabilities::HAS_HYPERVISOR_SUPPORT | Capabilities::IS_AARCH64,
            model: "Mac14,12".to_owned(),
        }
    }

    /// Answer the mandatory handshake and return the request the client
    /// sent.
    async fn serve_handshake(
        far: &mut DuplexStream,
        reply: &ServerHandshakeReply,
    ) -> ServerHandshakeRequest {
        let frame = read_frame(far).await;
        assert_eq!(frame.id, ServerMessageId::ServerHandshake.to_u8());
        assert!(frame.flags.is_empty());
        let request: ServerHandshakeRequest = cod::from_bytes(&frame.body).unwrap();
        write_frame(far, &Frame::response(frame.id, frame.token, cod::to_bytes(reply))).await;
        request
    }

    #[tokio::test]
    async fn handshake_carries_password_and_yields_session() {
        let (near, mut far) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(async move {
            let request = serve_handshake(&mut far, &authenticated_reply()).await;
            (request, far)
        });

        let session = Session::handshake_over(near, Arc::new(NullDelegate), Some("secret"))
            .await
            .unwrap();
        let (request, _far) = server.await.unwrap();

        assert_eq!(request.version, PROTOCOL_VERSION);
        assert_eq!(request.password.as_deref(), Some("secret"));
        assert_eq!(session.model(), "Mac14,12");
        assert!(session.capabilities().contains(Capabilities::IS_AARCH64));
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn unauthenticated_with_password_is_auth_invalid() {
        let (near, mut far) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(async move {
            let mut reply = authenticated_reply();
            reply.is_authenticated = false;
            serve_handshake(&mut far, &reply).await;
            far
        });

        let result = Session::handshake_over(near, Arc::new(NullDelegate), Some("wrong")).await;
        assert!(matches!(result, Err(ClientError::AuthInvalid)));
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn unauthenticated_without_password_is_auth_required() {
        let (near, mut far) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(async move {
            let mut reply = authenticated_reply();
            reply.is_authenticated = false;
            serve_handshake(&mut far, &reply).await;
            far
        });

        let result = Session::handshake_over(near, Arc::new(NullDelegate), None).await;
        assert!(matches!(result, Err(ClientError::AuthRequired)));
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn version_skew_is_fatal() {
        let (near, mut far) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(async move {
            let mut reply = authenticated_reply();
            reply.version = 2;
            serve_handshake(&mut far, &reply).await;
            far
        });

        let result = Session::handshake_over(near, Arc::new(NullDelegate), None).await;
        assert!(matches!(
            result,
            Err(ClientError::ProtocolVersionMismatch { client: 1, server: 2 })
        ));
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn list_and_information_round_trip() {
        let (near, mut far) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(async move {
            serve_handshake(&mut far, &authenticated_reply()).await;

            let frame = read_frame(&mut far).await;
            assert_eq!(frame.id, ServerMessageId::ListVirtualMachines.to_u8());
            let reply = utmremote_proto::messages::server::ListVirtualMachinesReply {
                ids: vec![VmId::from("u1"), VmId::from("u2")],
            };
            write_frame(&mut far, &Frame::response(frame.id, frame.token, cod::to_bytes(&reply)))
                .await;
            far
        });

        let session =
            Session::handshake_over(near, Arc::new(NullDelegate), None).await.unwrap();
        let ids = session.list_virtual_machines().await.unwrap();
        assert_eq!(ids, vec![VmId::from("u1"), VmId::from("u2")]);
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn peer_error_reply_fails_only_that_call() {
        let (near, mut far) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(async move {
            serve_handshake(&mut far, &authenticated_reply()).await;
            let frame = read_frame(&mut far).await;
            write_frame(&mut far, &Frame::error_response(frame.id, frame.token, "no such VM"))
                .await;
            far
        });

        let session =
            Session::handshake_over(near, Arc::new(NullDelegate), None).await.unwrap();
        let result = session.pause_virtual_machine(&VmId::from("missing")).await;
        match result {
            Err(ClientError::Peer(message)) => assert_eq!(message, "no such VM"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!session.is_closed());
        drop(server.await.unwrap());
    }

    #[tokio::test]
    async fn close_fails_later_calls() {
        let (near, mut far) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(async move {
            serve_handshake(&mut far, &authenticated_reply()).await;
            far
        });

        let session =
            Session::handshake_over(near, Arc::new(NullDelegate), None).await.unwrap();
        session.close();
        session.close();
        assert!(session.is_closed());
        assert!(matches!(
            session.list_virtual_machines().await,
            Err(ClientError::ConnectionClosed)
        ));
        drop(server.await.unwrap());
    }

    #[derive(Default)]
    struct RecordingDelegate {
        events: Mutex<Vec<String>>,
        fail_errors: bool,
    }

    #[async_trait]
    impl ClientDelegate for RecordingDelegate {
        async fn list_has_changed(&self, ids: Vec<VmId>) -> Result<(), DelegateError> {
            self.events.lock().unwrap().push(format!("list:{}", ids.len()));
            Ok(())
        }

        async fn virtual_machine_did_transition(
            &self,
            id: VmId,
            state: VmState,
            _is_takeover_allowed: bool,
        ) -> Result<(), DelegateError> {
            self.events.lock().unwrap().push(format!("transition:{id}:{state}"));
            Ok(())
        }

        async fn virtual_machine_did_error(
            &self,
            id: VmId,
            error_message: String,
        ) -> Result<(), DelegateError> {
            if self.fail_errors {
                return Err(format!("observer rejected {id}: {error_message}").into());
            }
            Ok(())
        }

        async fn mounted_drives_has_changed(
            &self,
            _id: VmId,
            mounted_drives: BTreeMap<String, String>,
        ) -> Result<(), DelegateError> {
            self.events.lock().unwrap().push(format!("drives:{}", mounted_drives.len()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn notifications_reach_the_delegate_and_get_empty_replies() {
        let (near, mut far) = tokio::io::duplex(1 << 16);
        let delegate = Arc::new(RecordingDelegate::default());

        let server = tokio::spawn(async move {
            serve_handshake(&mut far, &authenticated_reply()).await;

            let notification = VirtualMachineDidTransitionRequest {
                id: VmId::from("m1"),
                state: VmState::Started,
                is_takeover_allowed: false,
            };
            write_frame(
                &mut far,
                &Frame::request(
                    ClientMessageId::VirtualMachineDidTransition.to_u8(),
                    7,
                    cod::to_bytes(&notification),
                ),
            )
            .await;
            let reply = read_frame(&mut far).await;
            assert_eq!(reply.token, 7);
            assert_eq!(reply.flags, FrameFlags::RESPONSE);
            let _: Empty = cod::from_bytes(&reply.body).unwrap();
            far
        });

        let session =
            Session::handshake_over(near, Arc::clone(&delegate) as Arc<dyn ClientDelegate>, None)
                .await
                .unwrap();
        let _far = server.await.unwrap();
        assert_eq!(
            delegate.events.lock().unwrap().as_slice(),
            ["transition:m1:started"]
        );
        drop(session);
    }

    #[tokio::test]
    async fn host_handshake_is_answered_internally() {
        let (near, mut far) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(async move {
            serve_handshake(&mut far, &authenticated_reply()).await;

            let request = ClientHandshakeRequest { version: PROTOCOL_VERSION };
            write_frame(
                &mut far,
                &Frame::request(
                    ClientMessageId::ClientHandshake.to_u8(),
                    3,
                    cod::to_bytes(&request),
                ),
            )
            .await;
            let reply = read_frame(&mut far).await;
            assert_eq!(reply.flags, FrameFlags::RESPONSE);
            let reply: ClientHandshakeReply = cod::from_bytes(&reply.body).unwrap();
            assert_eq!(reply.version, PROTOCOL_VERSION);
            assert!(reply.capabilities.is_empty());
            far
        });

        let session =
            Session::handshake_over(near, Arc::new(NullDelegate), None).await.unwrap();
        drop(server.await.unwrap());
        drop(session);
    }

    #[tokio::test]
    async fn failing_delegate_turns_into_error_reply() {
        let (near, mut far) = tokio::io::duplex(1 << 16);
        let delegate = Arc::new(RecordingDelegate { fail_errors: true, ..Default::default() });

        let server = tokio::spawn(async move {
            serve_handshake(&mut far, &authenticated_reply()).await;

            let notification = VirtualMachineDidErrorRequest {
                id: VmId::from("m1"),
                error_message: "disk full".to_owned(),
            };
            write_frame(
                &mut far,
                &Frame::request(
                    ClientMessageId::VirtualMachineDidError.to_u8(),
                    11,
                    cod::to_bytes(&notification),
                ),
            )
            .await;
            let reply = read_frame(&mut far).await;
            assert_eq!(reply.token, 11);
            assert!(reply.flags.contains(FrameFlags::ERROR));
            assert_eq!(
                String::from_utf8_lossy(&reply.body),
                "observer rejected m1: disk full"
            );
            far
        });

        let session =
            Session::handshake_over(near, Arc::clone(&delegate) as Arc<dyn ClientDelegate>, None)
                .await
                .unwrap();
        drop(server.await.unwrap());
        assert!(!session.is_closed());
    }

    #[tokio::test]
    async fn unsupported_inbound_id_keeps_link_open() {
        let (near, mut far) = tokio::io::duplex(1 << 16);
        let server = tokio::spawn(async move {
            serve_handshake(&mut far, &authenticated_reply()).await;

            write_frame(&mut far, &Frame::request(200, 4, Bytes::new())).await;
            let reply = read_frame(&mut far).await;
            assert!(reply.flags.contains(FrameFlags::ERROR));
            assert_eq!(String::from_utf8_lossy(&reply.body), "unsupported message id 200");
            far
        });

        let session =
            Session::handshake_over(near, Arc::new(NullDelegate), None).await.unwrap();
        drop(server.await.unwrap());
        assert!(!session.is_closed());
    }
}
