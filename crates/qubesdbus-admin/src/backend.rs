use crate::client::{AdminClient, LiveEventStream};
use crate::event::Event;
use crate::mock::{MockAdmin, MockFixture};
use crate::AdminError;
use qubesdbus_model::{DomainRecord, LabelRecord};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Which admin event subscription to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// `admin.Events`: lifecycle and property events.
    Events,
    /// `admin.vm.Stats`: periodic per-domain resource statistics.
    Stats,
}

/// The data surface the D-Bus services run against: the live qubesd
/// socket, or an in-memory mock fed from a fixture.
pub enum Admin {
    Live(AdminClient),
    Mock(MockAdmin),
}

impl Admin {
    pub fn live(socket_path: impl Into<PathBuf>) -> Self {
        Admin::Live(AdminClient::new(socket_path))
    }

    pub fn mock(fixture: MockFixture) -> Self {
        Admin::Mock(MockAdmin::new(fixture))
    }

    pub async fn domains(&self) -> Result<Vec<DomainRecord>, AdminError> {
        match self {
            Admin::Live(client) => client.fetch_domains().await,
            Admin::Mock(mock) => mock.domains(),
        }
    }

    pub async fn domain(&self, name: &str) -> Result<DomainRecord, AdminError> {
        match self {
            Admin::Live(client) => client.fetch_domain(name).await,
            Admin::Mock(mock) => mock.domain(name),
        }
    }

    pub async fn labels(&self) -> Result<Vec<LabelRecord>, AdminError> {
        match self {
            Admin::Live(client) => client.fetch_labels().await,
            Admin::Mock(mock) => mock.labels(),
        }
    }

    pub async fn start(&self, name: &str) -> Result<(), AdminError> {
        match self {
            Admin::Live(client) => client.start(name).await,
            Admin::Mock(mock) => mock.start(name),
        }
    }

    pub async fn shutdown(&self, name: &str) -> Result<(), AdminError> {
        match self {
            Admin::Live(client) => client.shutdown(name).await,
            Admin::Mock(mock) => mock.shutdown(name),
        }
    }

    pub async fn kill(&self, name: &str) -> Result<(), AdminError> {
        match self {
            Admin::Live(client) => client.kill(name).await,
            Admin::Mock(mock) => mock.kill(name),
        }
    }

    pub async fn events(&self, kind: StreamKind) -> Result<EventStream, AdminError> {
        match self {
            Admin::Live(client) => client.events(kind).await.map(EventStream::Live),
            Admin::Mock(mock) => Ok(EventStream::Mock(mock.subscribe(kind))),
        }
    }
}

/// An open event subscription, live or mock.
pub enum EventStream {
    Live(LiveEventStream),
    Mock(mpsc::UnboundedReceiver<Event>),
}

impl EventStream {
    /// Next event; `None` when the stream is closed.
    pub async fn next(&mut self) -> Option<Result<Event, AdminError>> {
        match self {
            EventStream::Live(stream) => stream.next().await,
            EventStream::Mock(rx) => rx.recv().await.map(Ok),
        }
    }
}
