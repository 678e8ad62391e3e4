//! Forwards admin events onto the served object tree.
//!
//! Two subscriptions feed one loop: `admin.Events` for lifecycle and
//! property events, `admin.vm.Stats` for the statistics stream. Each event
//! is handled under its own error boundary; a dropped connection is
//! reconnected with linear backoff, and the `connection-established`
//! acknowledgement triggers a full resync of the object tree.

use crate::registry::{DomainRegistry, StateChange};
use crate::ServiceError;
use qubesdbus_admin::{is_garbage, Admin, Event, StreamKind};
use qubesdbus_model::{DomainRecord, DomainState};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const RECONNECT_BASE: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

/// What to do about one admin event.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    Resync,
    Add { name: String },
    Remove { name: String },
    SetState { name: String, state: DomainState },
    /// `domain-shutdown`: `Failed` if the domain was still `Starting`,
    /// `Halted` otherwise. The decision needs the current published state.
    ShutdownObserved { name: String },
    SetProperty { name: String, property: String, value: String },
    Rename { old: String, new: String },
    UpdateStats { name: String, memory_kb: u64 },
    Drop,
    Unknown,
}

fn plan(event: &Event) -> Action {
    if is_garbage(&event.name) {
        return Action::Drop;
    }

    let subject = || event.subject.clone();

    match event.name.as_str() {
        "connection-established" => Action::Resync,
        "domain-add" => match event.arg("vm") {
            Some(vm) => Action::Add { name: vm.to_owned() },
            None => Action::Unknown,
        },
        "domain-delete" => match event.arg("vm") {
            Some(vm) => Action::Remove { name: vm.to_owned() },
            None => Action::Unknown,
        },
        "domain-spawn" => match subject() {
            Some(name) => Action::SetState {
                name,
                state: DomainState::Starting,
            },
            None => Action::Unknown,
        },
        "domain-start" => match subject() {
            Some(name) => Action::SetState {
                name,
                state: DomainState::Started,
            },
            None => Action::Unknown,
        },
        "domain-pre-shutdown" => match subject() {
            Some(name) => Action::SetState {
                name,
                state: DomainState::Halting,
            },
            None => Action::Unknown,
        },
        "domain-shutdown" => match subject() {
            Some(name) => Action::ShutdownObserved { name },
            None => Action::Unknown,
        },
        "vm-stats" => match (subject(), event.arg("memory_kb")) {
            (Some(name), Some(kb)) => match kb.parse() {
                Ok(memory_kb) => Action::UpdateStats { name, memory_kb },
                Err(_) => Action::Unknown,
            },
            _ => Action::Unknown,
        },
        name if name.starts_with("property-set:") => {
            let Some(property) = event.arg("name").map(str::to_owned) else {
                return Action::Unknown;
            };
            let value = event.arg("newvalue").unwrap_or_default().to_owned();
            if property == "name" {
                // the subject already carries the new name; the registry
                // still knows the old one
                return match event.arg("oldvalue") {
                    Some(old) => Action::Rename {
                        old: old.to_owned(),
                        new: value,
                    },
                    None => Action::Unknown,
                };
            }
            match subject() {
                Some(name) => Action::SetProperty {
                    name,
                    property,
                    value,
                },
                None => Action::Unknown,
            }
        }
        _ => Action::Unknown,
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() || value == "None" {
        None
    } else {
        Some(value.to_owned())
    }
}

/// Apply a `property-set` event to a record; returns the changed
/// properties.
fn apply_property(record: &mut DomainRecord, property: &str, value: &str) -> Vec<&'static str> {
    match property {
        "label" => {
            record.label = value.to_owned();
            vec!["label"]
        }
        "netvm" => {
            record.netvm = non_empty(value);
            record.networked = record.netvm.is_some();
            vec!["netvm", "networked"]
        }
        "template" => {
            record.template = non_empty(value);
            vec!["template"]
        }
        "ip" => {
            record.ip = non_empty(value);
            vec!["ip"]
        }
        "maxmem" => match value.parse() {
            Ok(maxmem) => {
                record.maxmem = maxmem;
                vec!["maxmem"]
            }
            Err(_) => vec![],
        },
        "vcpus" => match value.parse() {
            Ok(vcpus) => {
                record.vcpus = vcpus;
                vec!["vcpus"]
            }
            Err(_) => vec![],
        },
        _ => vec![],
    }
}

/// Apply a stats sample; only an actual change is worth a signal.
fn apply_stats(record: &mut DomainRecord, memory_kb: u64) -> Vec<&'static str> {
    if record.memory_usage == memory_kb {
        return vec![];
    }
    record.memory_usage = memory_kb;
    vec!["memory_usage"]
}

pub struct Forwarder {
    admin: Arc<Admin>,
    registry: Arc<DomainRegistry>,
}

impl Forwarder {
    pub fn new(admin: Arc<Admin>, registry: Arc<DomainRegistry>) -> Self {
        Self { admin, registry }
    }

    /// Run until both event pumps stop (which they only do on shutdown).
    /// `state_rx` carries state changes committed by D-Bus writes to
    /// domain `State` properties; the matching manager signal is emitted
    /// here so all lifecycle signals leave from one place.
    pub async fn run(
        self,
        mut state_rx: mpsc::UnboundedReceiver<StateChange>,
    ) -> Result<(), ServiceError> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let events = tokio::spawn(pump(
            self.admin.clone(),
            StreamKind::Events,
            event_tx.clone(),
        ));
        let stats = tokio::spawn(pump(self.admin.clone(), StreamKind::Stats, event_tx));

        loop {
            tokio::select! {
                maybe_event = event_rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    if let Err(e) = self.handle(&event).await {
                        error!("handling {} failed: {e}", event.name);
                    }
                }
                maybe_change = state_rx.recv() => {
                    let Some(change) = maybe_change else { break };
                    if let Err(e) = self
                        .registry
                        .announce_state(&change.name, change.qid, change.state)
                        .await
                    {
                        error!("announcing state of {} failed: {e}", change.name);
                    }
                }
            }
        }

        events.abort();
        stats.abort();
        Ok(())
    }

    async fn handle(&self, event: &Event) -> Result<(), ServiceError> {
        match plan(event) {
            Action::Resync => self.resync().await,
            Action::Add { name } => self.add(&name).await,
            Action::Remove { name } => {
                self.registry.unregister(&name).await?;
                Ok(())
            }
            Action::SetState { name, state } => {
                self.registry.apply_state(&name, state).await?;
                Ok(())
            }
            Action::ShutdownObserved { name } => {
                let state = match self.registry.state_of(&name).await? {
                    Some(DomainState::Starting) => DomainState::Failed,
                    _ => DomainState::Halted,
                };
                self.registry.apply_state(&name, state).await?;
                Ok(())
            }
            Action::SetProperty {
                name,
                property,
                value,
            } => {
                self.registry
                    .update_with(&name, |record| apply_property(record, &property, &value))
                    .await?;
                Ok(())
            }
            Action::Rename { old, new } => {
                self.registry.rename(&old, &new).await?;
                Ok(())
            }
            Action::UpdateStats { name, memory_kb } => {
                self.registry
                    .update_with(&name, |record| apply_stats(record, memory_kb))
                    .await?;
                Ok(())
            }
            Action::Drop => {
                debug!("dropped event {}", event.name);
                Ok(())
            }
            Action::Unknown => {
                warn!(
                    "unknown event {} from {:?} {:?}",
                    event.name, event.subject, event.args
                );
                Ok(())
            }
        }
    }

    async fn add(&self, name: &str) -> Result<(), ServiceError> {
        match self.admin.domain(name).await {
            Ok(record) => {
                self.registry.register(record).await?;
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!("domain {name} vanished before registration");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bring the object tree back in line with the backend after (re)connect.
    async fn resync(&self) -> Result<(), ServiceError> {
        info!("resyncing domains with the admin backend");
        let fresh = self.admin.domains().await?;
        let fresh_names: HashSet<String> = fresh.iter().map(|r| r.name.clone()).collect();

        for record in fresh {
            if self.registry.qid_of(&record.name).is_some() {
                let (name, state) = (record.name, record.state);
                self.registry.force_state(&name, state).await?;
            } else {
                self.registry.register(record).await?;
            }
        }

        for name in self.registry.known_names() {
            if !fresh_names.contains(&name) {
                self.registry.unregister(&name).await?;
            }
        }
        Ok(())
    }
}

async fn pump(admin: Arc<Admin>, kind: StreamKind, tx: mpsc::UnboundedSender<Event>) {
    let mut attempt: u32 = 0;
    loop {
        match admin.events(kind).await {
            Ok(mut stream) => {
                attempt = 0;
                while let Some(item) = stream.next().await {
                    match item {
                        Ok(event) => {
                            if tx.send(event).is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("event stream ({kind:?}) error: {e}");
                            break;
                        }
                    }
                }
                info!("event stream ({kind:?}) closed");
            }
            Err(e) => warn!("event subscription ({kind:?}) failed: {e}"),
        }
        if tx.is_closed() {
            return;
        }
        attempt = attempt.saturating_add(1);
        let delay = (RECONNECT_BASE * attempt).min(RECONNECT_MAX);
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_events_map_to_state_changes() {
        assert_eq!(
            plan(&Event::new(Some("work"), "domain-spawn")),
            Action::SetState {
                name: "work".to_owned(),
                state: DomainState::Starting
            }
        );
        assert_eq!(
            plan(&Event::new(Some("work"), "domain-start")),
            Action::SetState {
                name: "work".to_owned(),
                state: DomainState::Started
            }
        );
        assert_eq!(
            plan(&Event::new(Some("work"), "domain-pre-shutdown")),
            Action::SetState {
                name: "work".to_owned(),
                state: DomainState::Halting
            }
        );
        assert_eq!(
            plan(&Event::new(Some("work"), "domain-shutdown")),
            Action::ShutdownObserved {
                name: "work".to_owned()
            }
        );
    }

    #[test]
    fn add_and_delete_use_the_vm_argument() {
        assert_eq!(
            plan(&Event::new(None, "domain-add").with_arg("vm", "new-vm")),
            Action::Add {
                name: "new-vm".to_owned()
            }
        );
        assert_eq!(
            plan(&Event::new(None, "domain-delete").with_arg("vm", "old-vm")),
            Action::Remove {
                name: "old-vm".to_owned()
            }
        );
        assert_eq!(plan(&Event::new(None, "domain-add")), Action::Unknown);
    }

    #[test]
    fn garbage_is_dropped_before_dispatch() {
        assert_eq!(plan(&Event::new(Some("work"), "domain-load")), Action::Drop);
        assert_eq!(
            plan(&Event::new(Some("work"), "property-pre-set:netvm")),
            Action::Drop
        );
        assert_eq!(
            plan(&Event::new(Some("work"), "domain-is-fully-usable")),
            Action::Drop
        );
    }

    #[test]
    fn connection_established_resyncs() {
        assert_eq!(plan(&Event::connection_established()), Action::Resync);
    }

    #[test]
    fn property_set_events() {
        let event = Event::new(Some("work"), "property-set:netvm")
            .with_arg("name", "netvm")
            .with_arg("newvalue", "sys-firewall")
            .with_arg("oldvalue", "sys-net");
        assert_eq!(
            plan(&event),
            Action::SetProperty {
                name: "work".to_owned(),
                property: "netvm".to_owned(),
                value: "sys-firewall".to_owned()
            }
        );
    }

    #[test]
    fn rename_uses_old_and_new_name() {
        let event = Event::new(Some("new-name"), "property-set:name")
            .with_arg("name", "name")
            .with_arg("newvalue", "new-name")
            .with_arg("oldvalue", "old-name");
        assert_eq!(
            plan(&event),
            Action::Rename {
                old: "old-name".to_owned(),
                new: "new-name".to_owned()
            }
        );
    }

    #[test]
    fn stats_events_parse_memory() {
        let event = Event::new(Some("work"), "vm-stats")
            .with_arg("memory_kb", "524288")
            .with_arg("cpu_usage", "3");
        assert_eq!(
            plan(&event),
            Action::UpdateStats {
                name: "work".to_owned(),
                memory_kb: 524_288
            }
        );
        assert_eq!(
            plan(&Event::new(Some("work"), "vm-stats").with_arg("memory_kb", "junk")),
            Action::Unknown
        );
    }

    #[test]
    fn unknown_events_stay_unknown() {
        assert_eq!(
            plan(&Event::new(Some("work"), "firewall-changed")),
            Action::Unknown
        );
    }

    fn record() -> DomainRecord {
        DomainRecord {
            qid: 1,
            name: "work".to_owned(),
            klass: "AppVM".to_owned(),
            state: DomainState::Started,
            label: "red".to_owned(),
            netvm: Some("sys-net".to_owned()),
            template: None,
            ip: None,
            memory_usage: 1000,
            maxmem: 4096,
            vcpus: 2,
            networked: true,
            start_time: None,
        }
    }

    #[test]
    fn apply_property_netvm_tracks_networked() {
        let mut rec = record();
        assert_eq!(
            apply_property(&mut rec, "netvm", ""),
            vec!["netvm", "networked"]
        );
        assert_eq!(rec.netvm, None);
        assert!(!rec.networked);

        assert_eq!(
            apply_property(&mut rec, "netvm", "sys-firewall"),
            vec!["netvm", "networked"]
        );
        assert_eq!(rec.netvm.as_deref(), Some("sys-firewall"));
        assert!(rec.networked);
    }

    #[test]
    fn apply_property_ignores_unknown_and_bad_values() {
        let mut rec = record();
        assert!(apply_property(&mut rec, "kernelopts", "nopat").is_empty());
        assert!(apply_property(&mut rec, "maxmem", "not-a-number").is_empty());
        assert_eq!(rec, record());
    }

    #[test]
    fn apply_property_none_string_clears_optionals() {
        let mut rec = record();
        apply_property(&mut rec, "netvm", "None");
        assert_eq!(rec.netvm, None);
    }

    #[test]
    fn apply_stats_deduplicates() {
        let mut rec = record();
        assert_eq!(apply_stats(&mut rec, 2000), vec!["memory_usage"]);
        assert_eq!(rec.memory_usage, 2000);
        assert!(apply_stats(&mut rec, 2000).is_empty());
    }
}
