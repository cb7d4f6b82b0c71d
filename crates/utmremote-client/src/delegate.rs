//! Observer surface for server-pushed notifications.
//!
//! The notification set is small and fixed, so the surface is a trait with
//! one method per notification rather than a dynamic dispatch table. Every
//! method has a no-op default: implement only what you observe.
//!
//! Invocations are serialized per link (the reader task awaits each
//! dispatch) but may race RPC completions. A returned error becomes an
//! error-flagged reply carrying the error's string form; the link stays
//! open.

use std::collections::BTreeMap;

use async_trait::async_trait;

use utmremote_proto::qemu::QemuConfiguration;
use utmremote_proto::vm::{VmId, VmState};

/// Failure type for delegate callbacks.
pub type DelegateError = Box<dyn std::error::Error + Send + Sync>;

/// Callbacks for the five server-pushed notifications.
#[async_trait]
pub trait ClientDelegate: Send + Sync {
    /// The set of machines changed; `ids` is the new display order.
    async fn list_has_changed(&self, ids: Vec<VmId>) -> Result<(), DelegateError> {
        let _ = ids;
        Ok(())
    }

    /// A machine's QEMU configuration changed.
    async fn qemu_configuration_has_changed(
        &self,
        id: VmId,
        configuration: QemuConfiguration,
    ) -> Result<(), DelegateError> {
        let _ = (id, configuration);
        Ok(())
    }

    /// A machine's mounted drives changed.
    async fn mounted_drives_has_changed(
        &self,
        id: VmId,
        mounted_drives: BTreeMap<String, String>,
    ) -> Result<(), DelegateError> {
        let _ = (id, mounted_drives);
        Ok(())
    }

    /// A machine entered a new lifecycle state.
    async fn virtual_machine_did_transition(
        &self,
        id: VmId,
        state: VmState,
        is_takeover_allowed: bool,
    ) -> Result<(), DelegateError> {
        let _ = (id, state, is_takeover_allowed);
        Ok(())
    }

    /// A machine hit an error.
    async fn virtual_machine_did_error(
        &self,
        id: VmId,
        error_message: String,
    ) -> Result<(), DelegateError> {
        let _ = (id, error_message);
        Ok(())
    }
}

/// Delegate that observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDelegate;

#[async_trait]
impl ClientDelegate for NullDelegate {}
