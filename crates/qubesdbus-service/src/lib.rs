//! D-Bus services mirroring Qubes domain and label state.
//!
//! This crate wires the admin backend to the bus: `org.qubes.DomainManager1`
//! serves one object per domain and keeps it current from the admin event
//! stream; `org.qubes.Labels1` serves one object per label. Both claim their
//! well-known name on the session bus (or the system bus, in dom0 setups
//! that route desktop IPC there).

pub mod config;
pub mod domain;
pub mod domain_manager;
pub mod forwarder;
pub mod labels;
pub mod notify;
pub mod registry;
pub mod service;

pub use config::{ConfigError, ServiceConfig};
pub use domain::Domain;
pub use domain_manager::{DomainManager, API_VERSION};
pub use forwarder::Forwarder;
pub use labels::{Label, LabelsManager};
pub use registry::{DomainRegistry, StateChange};
pub use service::{run_domain_manager, run_labels, BusKind};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("DBus error: {0}")]
    Dbus(#[from] zbus::Error),
    #[error("value error: {0}")]
    Variant(#[from] zbus::zvariant::Error),
    #[error("admin error: {0}")]
    Admin(#[from] qubesdbus_admin::AdminError),
    #[error("model error: {0}")]
    Model(#[from] qubesdbus_model::ModelError),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Map an internal error onto the generic D-Bus failure error.
pub(crate) fn to_fdo(msg: impl std::fmt::Display) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(msg.to_string())
}
