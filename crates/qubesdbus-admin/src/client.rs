//! Async client for the qubesd admin socket.
//!
//! qubesd reads a request until the peer half-closes, executes it, writes
//! the response, and closes. Ordinary calls therefore use one connection
//! each; event subscriptions keep their connection open and stream frames
//! until either side disconnects.

use crate::backend::StreamKind;
use crate::event::{Event, EventReader};
use crate::proto::{
    encode_request, parse_current_state, parse_domain_list, parse_name_list, parse_property_get,
    parse_response, DomainListing,
};
use crate::AdminError;
use chrono::{DateTime, Utc};
use qubesdbus_model::{DomainRecord, DomainState, LabelRecord, PropertyValue};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

pub struct AdminClient {
    socket_path: PathBuf,
}

impl AdminClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// One admin API call: connect, send, half-close, read to EOF.
    pub async fn call(
        &self,
        dest: &str,
        method: &str,
        arg: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, AdminError> {
        let mut stream = UnixStream::connect(&self.socket_path).await?;
        stream
            .write_all(&encode_request(method, dest, arg, payload))
            .await?;
        stream.shutdown().await?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        parse_response(&response)
    }

    async fn property(&self, vm: &str, name: &str) -> Result<PropertyValue, AdminError> {
        match self.call(vm, "admin.vm.property.Get", name, b"").await {
            Ok(payload) => parse_property_get(&payload),
            Err(e) if e.is_not_found() => Ok(PropertyValue::Absent),
            Err(e) => Err(e),
        }
    }

    /// Enumerate all domains and assemble a record for each. Domains that
    /// disappear mid-enumeration are skipped.
    pub async fn fetch_domains(&self) -> Result<Vec<DomainRecord>, AdminError> {
        let payload = self.call("dom0", "admin.vm.List", "", b"").await?;
        let mut out = Vec::new();
        for listing in parse_domain_list(&payload) {
            match self.assemble(&listing).await {
                Ok(record) => out.push(record),
                Err(e) if e.is_not_found() => {
                    debug!("domain {} vanished during enumeration", listing.name);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// Fetch a single domain by name.
    pub async fn fetch_domain(&self, name: &str) -> Result<DomainRecord, AdminError> {
        let payload = self.call(name, "admin.vm.List", "", b"").await?;
        let listing = parse_domain_list(&payload)
            .into_iter()
            .next()
            .ok_or_else(|| AdminError::Malformed(format!("no listing for {name}")))?;
        self.assemble(&listing).await
    }

    async fn assemble(&self, listing: &DomainListing) -> Result<DomainRecord, AdminError> {
        let name = &listing.name;

        let qid = self
            .property(name, "qid")
            .await?
            .as_int()
            .and_then(|q| u32::try_from(q).ok())
            .ok_or_else(|| AdminError::Malformed(format!("domain {name} has no usable qid")))?;

        let current = match self.call(name, "admin.vm.CurrentState", "", b"").await {
            Ok(payload) => parse_current_state(&payload),
            Err(e) if e.is_not_found() => return Err(e),
            Err(_) => Default::default(),
        };
        let power_state = current
            .power_state
            .as_deref()
            .unwrap_or(&listing.power_state);

        let netvm = self.property(name, "netvm").await?;
        let label = self.property(name, "label").await?;
        let template = self.property(name, "template").await?;
        let ip = self.property(name, "ip").await?;
        let maxmem = self.property(name, "maxmem").await?;
        let vcpus = self.property(name, "vcpus").await?;
        let start_time = self.property(name, "start_time").await?;

        Ok(DomainRecord {
            qid,
            name: name.clone(),
            klass: listing.klass.clone(),
            state: DomainState::from_power_state(power_state),
            label: label.as_str().unwrap_or_default().to_owned(),
            netvm: netvm.as_str().map(str::to_owned),
            template: template.as_str().map(str::to_owned),
            ip: ip.as_str().map(str::to_owned),
            memory_usage: current.mem.unwrap_or(0),
            maxmem: maxmem.as_int().and_then(|v| u64::try_from(v).ok()).unwrap_or(0),
            vcpus: vcpus
                .as_int()
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(0),
            networked: netvm.as_str().is_some(),
            start_time: parse_start_time(&start_time),
        })
    }

    /// Enumerate all labels.
    pub async fn fetch_labels(&self) -> Result<Vec<LabelRecord>, AdminError> {
        let names = parse_name_list(&self.call("dom0", "admin.label.List", "", b"").await?);
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let color = self.call("dom0", "admin.label.Get", &name, b"").await?;
            let color = String::from_utf8_lossy(&color).trim().to_owned();
            let index = self.call("dom0", "admin.label.Index", &name, b"").await?;
            let index = String::from_utf8_lossy(&index)
                .trim()
                .parse()
                .map_err(|_| AdminError::Malformed(format!("bad index for label {name}")))?;
            out.push(LabelRecord::new(name, index, color));
        }
        Ok(out)
    }

    pub async fn start(&self, name: &str) -> Result<(), AdminError> {
        self.call(name, "admin.vm.Start", "", b"").await.map(drop)
    }

    pub async fn shutdown(&self, name: &str) -> Result<(), AdminError> {
        self.call(name, "admin.vm.Shutdown", "", b"").await.map(drop)
    }

    pub async fn kill(&self, name: &str) -> Result<(), AdminError> {
        self.call(name, "admin.vm.Kill", "", b"").await.map(drop)
    }

    /// Open a long-lived event subscription.
    pub async fn events(&self, kind: StreamKind) -> Result<LiveEventStream, AdminError> {
        let method = match kind {
            StreamKind::Events => "admin.Events",
            StreamKind::Stats => "admin.vm.Stats",
        };
        let mut stream = UnixStream::connect(&self.socket_path).await?;
        stream
            .write_all(&encode_request(method, "dom0", "", b""))
            .await?;
        stream.shutdown().await?;
        Ok(LiveEventStream {
            stream,
            reader: EventReader::new(),
        })
    }
}

fn parse_start_time(value: &PropertyValue) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?;
    let secs: f64 = raw.parse().ok()?;
    DateTime::from_timestamp(secs as i64, 0)
}

/// An open event subscription on the live socket.
pub struct LiveEventStream {
    stream: UnixStream,
    reader: EventReader,
}

impl LiveEventStream {
    /// Next event; `None` when qubesd closed the stream.
    pub async fn next(&mut self) -> Option<Result<Event, AdminError>> {
        loop {
            match self.reader.next_event() {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
            let mut chunk = [0u8; 4096];
            match self.stream.read(&mut chunk).await {
                Ok(0) => return None,
                Ok(n) => self.reader.feed(&chunk[..n]),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
