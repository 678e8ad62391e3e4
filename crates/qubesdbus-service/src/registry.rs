//! Bookkeeping for the served domain objects.
//!
//! The registry owns the name→qid map behind the object tree and performs
//! every add, remove, and property mutation, so the manager interface and
//! the event forwarder cannot race each other into an inconsistent tree.
//! It also re-emits the manager's lifecycle signals whenever a domain's
//! state property commits.

use crate::domain::{emit_changed, Domain};
use crate::domain_manager::DomainManager;
use crate::notify;
use crate::ServiceError;
use qubesdbus_admin::Admin;
use qubesdbus_model::paths::{DOMAIN_MANAGER_IFACE, DOMAIN_MANAGER_PATH};
use qubesdbus_model::{domain_path, validate_transition, DomainRecord, DomainState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info};
use zbus::object_server::{InterfaceRef, SignalEmitter};
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::Connection;

/// A committed state change of one served domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub qid: u32,
    pub name: String,
    pub state: DomainState,
}

pub struct DomainRegistry {
    conn: Connection,
    admin: Arc<Admin>,
    names: Mutex<HashMap<String, u32>>,
    state_tx: mpsc::UnboundedSender<StateChange>,
    notifications: bool,
}

impl DomainRegistry {
    pub fn new(
        conn: Connection,
        admin: Arc<Admin>,
        state_tx: mpsc::UnboundedSender<StateChange>,
        notifications: bool,
    ) -> Self {
        Self {
            conn,
            admin,
            names: Mutex::new(HashMap::new()),
            state_tx,
            notifications,
        }
    }

    pub fn admin(&self) -> &Arc<Admin> {
        &self.admin
    }

    fn names(&self) -> MutexGuard<'_, HashMap<String, u32>> {
        self.names.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn qid_of(&self, name: &str) -> Option<u32> {
        self.names().get(name).copied()
    }

    pub fn known_names(&self) -> Vec<String> {
        self.names().keys().cloned().collect()
    }

    fn manager_emitter(&self) -> Result<SignalEmitter<'static>, ServiceError> {
        Ok(SignalEmitter::new(&self.conn, DOMAIN_MANAGER_PATH)?)
    }

    async fn iface_ref(&self, qid: u32) -> Result<InterfaceRef<Domain>, ServiceError> {
        Ok(self
            .conn
            .object_server()
            .interface::<_, Domain>(domain_path(qid).as_str())
            .await?)
    }

    /// Serve a new domain object. Returns `None` when the name or qid is
    /// already taken; the first registration wins.
    pub async fn register(
        &self,
        record: DomainRecord,
    ) -> Result<Option<OwnedObjectPath>, ServiceError> {
        let name = record.name.clone();
        let qid = record.qid;
        {
            let mut names = self.names();
            if names.contains_key(&name) || names.values().any(|q| *q == qid) {
                return Ok(None);
            }
            names.insert(name.clone(), qid);
        }

        let path = ObjectPath::try_from(record.object_path())?;
        let domain = Domain::new(record, self.admin.clone(), self.state_tx.clone());
        let added = self.conn.object_server().at(path.as_str(), domain).await?;
        if !added {
            self.names().remove(&name);
            return Ok(None);
        }

        info!("domain {name} registered at {path}");
        let emitter = self.manager_emitter()?;
        DomainManager::domain_added(&emitter, DOMAIN_MANAGER_IFACE, path.clone()).await?;
        Ok(Some(path.into()))
    }

    /// Drop a served domain object. Returns `None` for unknown names.
    pub async fn unregister(
        &self,
        name: &str,
    ) -> Result<Option<OwnedObjectPath>, ServiceError> {
        let Some(qid) = self.names().remove(name) else {
            return Ok(None);
        };

        let path = ObjectPath::try_from(domain_path(qid))?;
        let removed = self
            .conn
            .object_server()
            .remove::<Domain, _>(path.as_str())
            .await?;
        if !removed {
            return Ok(None);
        }

        info!("domain {name} unregistered from {path}");
        let emitter = self.manager_emitter()?;
        DomainManager::domain_removed(&emitter, DOMAIN_MANAGER_IFACE, path.clone()).await?;
        Ok(Some(path.into()))
    }

    pub async fn state_of(&self, name: &str) -> Result<Option<DomainState>, ServiceError> {
        let Some(qid) = self.qid_of(name) else {
            return Ok(None);
        };
        let iface_ref = self.iface_ref(qid).await?;
        let state = iface_ref.get().await.record().state;
        Ok(Some(state))
    }

    /// Apply a validated state change. Illegal transitions are skipped, not
    /// errors: event streams deliver what the underlying manager did, and a
    /// rejected edge only means the published state already caught up.
    pub async fn apply_state(&self, name: &str, to: DomainState) -> Result<bool, ServiceError> {
        let Some(qid) = self.qid_of(name) else {
            debug!("state change for unknown domain {name} dropped");
            return Ok(false);
        };
        let iface_ref = self.iface_ref(qid).await?;
        {
            let mut iface = iface_ref.get_mut().await;
            let from = iface.record().state;
            if let Err(e) = validate_transition(from, to) {
                debug!("state change for {name} skipped: {e}");
                return Ok(false);
            }
            iface.record_mut().state = to;
            iface.state_changed(iface_ref.signal_emitter()).await?;
        }
        self.announce_state(name, qid, to).await?;
        Ok(true)
    }

    /// Set the state unconditionally. Used by resync, where the published
    /// state may legitimately jump across machine edges.
    pub async fn force_state(&self, name: &str, to: DomainState) -> Result<bool, ServiceError> {
        let Some(qid) = self.qid_of(name) else {
            return Ok(false);
        };
        let iface_ref = self.iface_ref(qid).await?;
        {
            let mut iface = iface_ref.get_mut().await;
            if iface.record().state == to {
                return Ok(false);
            }
            iface.record_mut().state = to;
            iface.state_changed(iface_ref.signal_emitter()).await?;
        }
        self.announce_state(name, qid, to).await?;
        Ok(true)
    }

    /// Emit the manager lifecycle signal matching a committed state change,
    /// plus the desktop notification for failed starts.
    pub async fn announce_state(
        &self,
        name: &str,
        qid: u32,
        state: DomainState,
    ) -> Result<(), ServiceError> {
        let emitter = self.manager_emitter()?;
        let path = ObjectPath::try_from(domain_path(qid))?;
        match state {
            DomainState::Starting => {
                DomainManager::starting(&emitter, DOMAIN_MANAGER_IFACE, path).await?;
            }
            DomainState::Started => {
                DomainManager::started(&emitter, DOMAIN_MANAGER_IFACE, path).await?;
            }
            DomainState::Halting => {
                DomainManager::halting(&emitter, DOMAIN_MANAGER_IFACE, path).await?;
            }
            DomainState::Halted => {
                DomainManager::halted(&emitter, DOMAIN_MANAGER_IFACE, path).await?;
            }
            DomainState::Failed => {
                DomainManager::failed(&emitter, DOMAIN_MANAGER_IFACE, path).await?;
                if self.notifications {
                    notify::domain_failed(name);
                }
            }
            DomainState::Unknown => {}
        }
        Ok(())
    }

    /// Mutate a domain record and emit `PropertiesChanged` for whatever the
    /// closure reports as changed.
    pub async fn update_with<F>(&self, name: &str, f: F) -> Result<bool, ServiceError>
    where
        F: FnOnce(&mut DomainRecord) -> Vec<&'static str>,
    {
        let Some(qid) = self.qid_of(name) else {
            debug!("property update for unknown domain {name} dropped");
            return Ok(false);
        };
        let iface_ref = self.iface_ref(qid).await?;
        let props = {
            let mut iface = iface_ref.get_mut().await;
            f(iface.record_mut())
        };
        if props.is_empty() {
            return Ok(false);
        }
        emit_changed(&iface_ref, &props).await?;
        Ok(true)
    }

    /// Rename a domain in place. The object path does not move (it depends
    /// only on the qid); only the map key and the `Name` property change.
    pub async fn rename(&self, old: &str, new: &str) -> Result<bool, ServiceError> {
        let qid = {
            let mut names = self.names();
            let Some(qid) = names.remove(old) else {
                return Ok(false);
            };
            names.insert(new.to_owned(), qid);
            qid
        };
        let iface_ref = self.iface_ref(qid).await?;
        {
            let mut iface = iface_ref.get_mut().await;
            iface.record_mut().name = new.to_owned();
        }
        emit_changed(&iface_ref, &["name"]).await?;
        info!("domain {old} renamed to {new}");
        Ok(true)
    }
}
