//! The per-domain D-Bus object.

use crate::registry::StateChange;
use crate::to_fdo;
use qubesdbus_admin::Admin;
use qubesdbus_model::{label_path, validate_transition, DomainRecord, DomainState};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use zbus::fdo;
use zbus::interface;
use zbus::object_server::InterfaceRef;
use zbus::zvariant::OwnedObjectPath;

/// A domain as served at `/org/qubes/DomainManager1/domains/QID`.
///
/// Typed properties reflect the record assembled from the admin API; the
/// `State` property is writable but every write is validated against the
/// domain state machine. Committed state changes are reported to the
/// manager so it can emit its lifecycle signals.
pub struct Domain {
    record: DomainRecord,
    admin: Arc<Admin>,
    state_tx: mpsc::UnboundedSender<StateChange>,
}

impl Domain {
    pub fn new(
        record: DomainRecord,
        admin: Arc<Admin>,
        state_tx: mpsc::UnboundedSender<StateChange>,
    ) -> Self {
        Self {
            record,
            admin,
            state_tx,
        }
    }

    pub fn record(&self) -> &DomainRecord {
        &self.record
    }

    pub(crate) fn record_mut(&mut self) -> &mut DomainRecord {
        &mut self.record
    }
}

#[interface(name = "org.qubes.Domain")]
impl Domain {
    #[zbus(property)]
    async fn qid(&self) -> u32 {
        self.record.qid
    }

    #[zbus(property)]
    async fn name(&self) -> &str {
        &self.record.name
    }

    #[zbus(property)]
    async fn klass(&self) -> &str {
        &self.record.klass
    }

    #[zbus(property)]
    async fn state(&self) -> String {
        self.record.state.to_string()
    }

    /// Writable, but only along the legal state machine edges. A committed
    /// write reaches the manager through the state channel so the matching
    /// lifecycle signal is emitted there.
    #[zbus(property)]
    async fn set_state(&mut self, value: &str) -> fdo::Result<()> {
        let to: DomainState = value
            .parse()
            .map_err(|e| fdo::Error::InvalidArgs(format!("{e}")))?;
        validate_transition(self.record.state, to).map_err(to_fdo)?;
        self.record.state = to;
        let _ = self.state_tx.send(StateChange {
            qid: self.record.qid,
            name: self.record.name.clone(),
            state: to,
        });
        Ok(())
    }

    #[zbus(property)]
    async fn label(&self) -> fdo::Result<OwnedObjectPath> {
        OwnedObjectPath::try_from(label_path(&self.record.label)).map_err(to_fdo)
    }

    #[zbus(property)]
    async fn netvm(&self) -> String {
        self.record.netvm.clone().unwrap_or_default()
    }

    #[zbus(property)]
    async fn template(&self) -> String {
        self.record.template.clone().unwrap_or_default()
    }

    #[zbus(property)]
    async fn ip(&self) -> String {
        self.record.ip.clone().unwrap_or_default()
    }

    #[zbus(property)]
    async fn memory_usage(&self) -> u64 {
        self.record.memory_usage
    }

    #[zbus(property)]
    async fn maxmem(&self) -> u64 {
        self.record.maxmem
    }

    #[zbus(property)]
    async fn vcpus(&self) -> u32 {
        self.record.vcpus
    }

    #[zbus(property)]
    async fn networked(&self) -> bool {
        self.record.networked
    }

    #[zbus(property)]
    async fn start_time(&self) -> String {
        self.record
            .start_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_default()
    }

    async fn start(&self) -> fdo::Result<bool> {
        info!("D-Bus: Start {}", self.record.name);
        self.admin.start(&self.record.name).await.map_err(to_fdo)?;
        Ok(true)
    }

    async fn shutdown(&self) -> fdo::Result<bool> {
        info!("D-Bus: Shutdown {}", self.record.name);
        self.admin
            .shutdown(&self.record.name)
            .await
            .map_err(to_fdo)?;
        Ok(true)
    }

    async fn kill(&self) -> fdo::Result<bool> {
        info!("D-Bus: Kill {}", self.record.name);
        self.admin.kill(&self.record.name).await.map_err(to_fdo)?;
        Ok(true)
    }
}

/// Emit `PropertiesChanged` for the named properties of a served domain.
pub(crate) async fn emit_changed(
    iface_ref: &InterfaceRef<Domain>,
    props: &[&str],
) -> zbus::Result<()> {
    let emitter = iface_ref.signal_emitter();
    let iface = iface_ref.get().await;
    for prop in props {
        match *prop {
            "name" => iface.name_changed(emitter).await?,
            "klass" => iface.klass_changed(emitter).await?,
            "state" => iface.state_changed(emitter).await?,
            "label" => iface.label_changed(emitter).await?,
            "netvm" => iface.netvm_changed(emitter).await?,
            "template" => iface.template_changed(emitter).await?,
            "ip" => iface.ip_changed(emitter).await?,
            "memory_usage" => iface.memory_usage_changed(emitter).await?,
            "maxmem" => iface.maxmem_changed(emitter).await?,
            "vcpus" => iface.vcpus_changed(emitter).await?,
            "networked" => iface.networked_changed(emitter).await?,
            "start_time" => iface.start_time_changed(emitter).await?,
            _ => {}
        }
    }
    Ok(())
}
