//! Connection wiring for the two services.

use crate::config::ServiceConfig;
use crate::domain_manager::DomainManager;
use crate::forwarder::Forwarder;
use crate::labels::{register_labels, LabelsManager};
use crate::registry::DomainRegistry;
use crate::ServiceError;
use qubesdbus_admin::Admin;
use qubesdbus_model::paths::{DOMAIN_MANAGER_NAME, DOMAIN_MANAGER_PATH, LABELS_NAME, LABELS_PATH};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use zbus::connection::Builder;
use zbus::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

impl BusKind {
    fn as_str(self) -> &'static str {
        match self {
            BusKind::Session => "session",
            BusKind::System => "system",
        }
    }
}

impl From<&ServiceConfig> for BusKind {
    fn from(config: &ServiceConfig) -> Self {
        if config.system_bus {
            BusKind::System
        } else {
            BusKind::Session
        }
    }
}

async fn connect(bus: BusKind, name: &str) -> Result<Connection, ServiceError> {
    let builder = match bus {
        BusKind::Session => Builder::session()?,
        BusKind::System => Builder::system()?,
    };
    Ok(builder.name(name)?.build().await?)
}

/// Run `org.qubes.DomainManager1`: serve the manager and one object per
/// domain, then forward admin events until shutdown.
pub async fn run_domain_manager(admin: Admin, config: &ServiceConfig) -> Result<(), ServiceError> {
    let admin = Arc::new(admin);
    let bus = BusKind::from(config);
    let conn = connect(bus, DOMAIN_MANAGER_NAME).await?;

    conn.object_server()
        .at(DOMAIN_MANAGER_PATH, zbus::fdo::ObjectManager)
        .await?;

    let (state_tx, state_rx) = mpsc::unbounded_channel();
    let registry = Arc::new(DomainRegistry::new(
        conn.clone(),
        admin.clone(),
        state_tx,
        config.notifications,
    ));
    conn.object_server()
        .at(DOMAIN_MANAGER_PATH, DomainManager::new(registry.clone()))
        .await?;

    for record in admin.domains().await? {
        registry.register(record).await?;
    }
    info!("{DOMAIN_MANAGER_NAME} serving on the {} bus", bus.as_str());

    let forwarder = Forwarder::new(admin, registry);
    tokio::select! {
        result = forwarder.run(state_rx) => result,
        () = shutdown_signal() => {
            info!("shutdown requested");
            Ok(())
        }
    }
}

/// Run `org.qubes.Labels1`: serve one object per label until shutdown.
/// The admin API has no label events, so there is nothing to forward.
pub async fn run_labels(admin: Admin, config: &ServiceConfig) -> Result<(), ServiceError> {
    let bus = BusKind::from(config);
    let conn = connect(bus, LABELS_NAME).await?;

    conn.object_server()
        .at(LABELS_PATH, zbus::fdo::ObjectManager)
        .await?;

    let records = admin.labels().await?;
    let paths = register_labels(&conn, records).await?;
    conn.object_server()
        .at(LABELS_PATH, LabelsManager::new(paths))
        .await?;
    info!("{LABELS_NAME} serving on the {} bus", bus.as_str());

    shutdown_signal().await;
    info!("shutdown requested");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
