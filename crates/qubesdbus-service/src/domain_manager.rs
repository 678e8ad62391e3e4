//! The manager object at `/org/qubes/DomainManager1`.

use crate::registry::DomainRegistry;
use crate::to_fdo;
use qubesdbus_model::record_from_dict;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};
use zbus::fdo;
use zbus::interface;
use zbus::object_server::SignalEmitter;
use zbus::zvariant::{ObjectPath, OwnedValue};

pub const API_VERSION: u32 = 1;

/// `org.qubes.DomainManager1`: registration methods plus the lifecycle
/// signals clients subscribe to instead of watching every domain object.
pub struct DomainManager {
    registry: Arc<DomainRegistry>,
}

impl DomainManager {
    pub fn new(registry: Arc<DomainRegistry>) -> Self {
        Self { registry }
    }
}

#[interface(name = "org.qubes.DomainManager1")]
impl DomainManager {
    #[zbus(property)]
    async fn version(&self) -> u32 {
        API_VERSION
    }

    /// Register a domain from a property dict. `start` additionally asks
    /// the backend to start it. Returns `false` on malformed data or when
    /// the name or qid is already served.
    async fn add_domain(
        &self,
        data: HashMap<String, OwnedValue>,
        start: bool,
    ) -> fdo::Result<bool> {
        info!("D-Bus: AddDomain (start={start})");
        let record = match record_from_dict(&data) {
            Ok(record) => record,
            Err(e) => {
                error!("AddDomain rejected: {e}");
                return Ok(false);
            }
        };
        let name = record.name.clone();

        match self.registry.register(record).await {
            Ok(Some(_path)) => {
                if start {
                    self.registry.admin().start(&name).await.map_err(|e| {
                        error!("AddDomain start failed for {name}: {e}");
                        to_fdo(e)
                    })?;
                }
                Ok(true)
            }
            Ok(None) => {
                info!("AddDomain: {name} already served");
                Ok(false)
            }
            Err(e) => {
                error!("AddDomain failed for {name}: {e}");
                Err(to_fdo(e))
            }
        }
    }

    /// Drop a served domain. `kill` forcibly kills it at the backend
    /// first. Returns `false` for unknown names.
    async fn remove_domain(&self, name: String, kill: bool) -> fdo::Result<bool> {
        info!("D-Bus: RemoveDomain {name} (kill={kill})");
        if kill {
            if let Err(e) = self.registry.admin().kill(&name).await {
                error!("RemoveDomain kill failed for {name}: {e}");
            }
        }
        match self.registry.unregister(&name).await {
            Ok(Some(_path)) => Ok(true),
            Ok(None) => Ok(false),
            Err(e) => {
                error!("RemoveDomain failed for {name}: {e}");
                Err(to_fdo(e))
            }
        }
    }

    /// Emitted when a new domain object is served.
    #[zbus(signal)]
    pub(crate) async fn domain_added(
        emitter: &SignalEmitter<'_>,
        interface: &str,
        object_path: ObjectPath<'_>,
    ) -> zbus::Result<()>;

    /// Emitted when a domain object is dropped.
    #[zbus(signal)]
    pub(crate) async fn domain_removed(
        emitter: &SignalEmitter<'_>,
        interface: &str,
        object_path: ObjectPath<'_>,
    ) -> zbus::Result<()>;

    /// Emitted when a domain begins starting.
    #[zbus(signal)]
    pub(crate) async fn starting(
        emitter: &SignalEmitter<'_>,
        interface: &str,
        object_path: ObjectPath<'_>,
    ) -> zbus::Result<()>;

    /// Emitted when a domain is up and running.
    #[zbus(signal)]
    pub(crate) async fn started(
        emitter: &SignalEmitter<'_>,
        interface: &str,
        object_path: ObjectPath<'_>,
    ) -> zbus::Result<()>;

    /// Emitted when a domain start went wrong and the domain was halted.
    #[zbus(signal)]
    pub(crate) async fn failed(
        emitter: &SignalEmitter<'_>,
        interface: &str,
        object_path: ObjectPath<'_>,
    ) -> zbus::Result<()>;

    /// Emitted when a domain is shutting down.
    #[zbus(signal)]
    pub(crate) async fn halting(
        emitter: &SignalEmitter<'_>,
        interface: &str,
        object_path: ObjectPath<'_>,
    ) -> zbus::Result<()>;

    /// Emitted when a domain has halted.
    #[zbus(signal)]
    pub(crate) async fn halted(
        emitter: &SignalEmitter<'_>,
        interface: &str,
        object_path: ObjectPath<'_>,
    ) -> zbus::Result<()>;
}
