//! In-memory admin backend for tests and for running the services on
//! machines without qubesd.

use crate::backend::StreamKind;
use crate::event::Event;
use crate::AdminError;
use qubesdbus_model::{DomainRecord, LabelRecord};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

/// JSON-loadable snapshot of domains and labels served by [`MockAdmin`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockFixture {
    #[serde(default)]
    pub domains: Vec<DomainRecord>,
    #[serde(default)]
    pub labels: Vec<LabelRecord>,
}

impl MockFixture {
    pub fn from_json(json: &str) -> Result<Self, AdminError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A power operation recorded by the mock, for assertions in tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerOp {
    Start(String),
    Shutdown(String),
    Kill(String),
}

struct MockState {
    domains: Vec<DomainRecord>,
    labels: Vec<LabelRecord>,
    ops: Vec<PowerOp>,
    senders: Vec<(StreamKind, mpsc::UnboundedSender<Event>)>,
}

pub struct MockAdmin {
    state: Mutex<MockState>,
}

impl MockAdmin {
    pub fn new(fixture: MockFixture) -> Self {
        Self {
            state: Mutex::new(MockState {
                domains: fixture.domains,
                labels: fixture.labels,
                ops: Vec::new(),
                senders: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MockState>, AdminError> {
        self.state
            .lock()
            .map_err(|e| AdminError::Malformed(format!("mock state poisoned: {e}")))
    }

    fn not_found(name: &str) -> AdminError {
        AdminError::Remote {
            kind: "QubesVMNotFoundError".to_owned(),
            message: format!("No such domain: {name}"),
        }
    }

    pub(crate) fn domains(&self) -> Result<Vec<DomainRecord>, AdminError> {
        Ok(self.lock()?.domains.clone())
    }

    pub(crate) fn domain(&self, name: &str) -> Result<DomainRecord, AdminError> {
        self.lock()?
            .domains
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or_else(|| Self::not_found(name))
    }

    pub(crate) fn labels(&self) -> Result<Vec<LabelRecord>, AdminError> {
        Ok(self.lock()?.labels.clone())
    }

    fn power_op(&self, name: &str, op: PowerOp) -> Result<(), AdminError> {
        let mut state = self.lock()?;
        if !state.domains.iter().any(|d| d.name == name) {
            return Err(Self::not_found(name));
        }
        state.ops.push(op);
        Ok(())
    }

    pub(crate) fn start(&self, name: &str) -> Result<(), AdminError> {
        self.power_op(name, PowerOp::Start(name.to_owned()))
    }

    pub(crate) fn shutdown(&self, name: &str) -> Result<(), AdminError> {
        self.power_op(name, PowerOp::Shutdown(name.to_owned()))
    }

    pub(crate) fn kill(&self, name: &str) -> Result<(), AdminError> {
        self.power_op(name, PowerOp::Kill(name.to_owned()))
    }

    /// Operations recorded so far, in call order.
    pub fn operations(&self) -> Vec<PowerOp> {
        self.lock().map(|s| s.ops.clone()).unwrap_or_default()
    }

    /// Replace the served domain set; the next resync will pick it up.
    pub fn set_domains(&self, domains: Vec<DomainRecord>) {
        if let Ok(mut state) = self.lock() {
            state.domains = domains;
        }
    }

    pub(crate) fn subscribe(&self, kind: StreamKind) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        // the ack a live stream would produce
        let _ = tx.send(Event::connection_established());
        if let Ok(mut state) = self.lock() {
            state.senders.push((kind, tx));
        } else {
            warn!("mock state poisoned; subscription will see no events");
        }
        rx
    }

    /// Inject an event into every open subscription of the given kind.
    pub fn push_event(&self, kind: StreamKind, event: &Event) {
        if let Ok(mut state) = self.lock() {
            state
                .senders
                .retain(|(k, tx)| *k != kind || tx.send(event.clone()).is_ok());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qubesdbus_model::DomainState;

    fn fixture() -> MockFixture {
        MockFixture {
            domains: vec![DomainRecord {
                qid: 1,
                name: "work".to_owned(),
                klass: "AppVM".to_owned(),
                state: DomainState::Halted,
                label: "red".to_owned(),
                netvm: None,
                template: None,
                ip: None,
                memory_usage: 0,
                maxmem: 4096,
                vcpus: 2,
                networked: false,
                start_time: None,
            }],
            labels: vec![LabelRecord::new("red", 1, "0xcc0000")],
        }
    }

    #[test]
    fn fixture_json_roundtrip() {
        let json = serde_json::to_string(&fixture()).unwrap();
        let back = MockFixture::from_json(&json).unwrap();
        assert_eq!(back.domains.len(), 1);
        assert_eq!(back.labels[0].name, "red");
    }

    #[test]
    fn unknown_domain_is_remote_error() {
        let mock = MockAdmin::new(fixture());
        let err = mock.domain("missing").unwrap_err();
        assert!(err.is_not_found());
        assert!(mock.start("missing").is_err());
    }

    #[test]
    fn power_ops_are_recorded_in_order() {
        let mock = MockAdmin::new(fixture());
        mock.start("work").unwrap();
        mock.shutdown("work").unwrap();
        mock.kill("work").unwrap();
        assert_eq!(
            mock.operations(),
            vec![
                PowerOp::Start("work".to_owned()),
                PowerOp::Shutdown("work".to_owned()),
                PowerOp::Kill("work".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn subscriptions_see_pushed_events() {
        let mock = MockAdmin::new(fixture());
        let mut rx = mock.subscribe(StreamKind::Events);
        assert_eq!(
            rx.recv().await.unwrap(),
            Event::connection_established()
        );

        mock.push_event(
            StreamKind::Events,
            &Event::new(Some("work"), "domain-start"),
        );
        assert_eq!(rx.recv().await.unwrap().name, "domain-start");

        // stats events go to stats subscribers only
        mock.push_event(StreamKind::Stats, &Event::new(Some("work"), "vm-stats"));
        mock.push_event(
            StreamKind::Events,
            &Event::new(Some("work"), "domain-shutdown"),
        );
        assert_eq!(rx.recv().await.unwrap().name, "domain-shutdown");
    }

    #[test]
    fn empty_fixture_defaults() {
        let fixture = MockFixture::from_json("{}").unwrap();
        assert!(fixture.domains.is_empty());
        assert!(fixture.labels.is_empty());
    }
}
