//! Client for the qubesd admin API.
//!
//! qubesd speaks a NUL-delimited request/response protocol over a Unix
//! stream socket; events are a stream of NUL-delimited frames multiplexed
//! over the same protocol. This crate provides the wire codec (`proto`,
//! `event`), an async socket client (`client`), and the `Admin` backend
//! used by the D-Bus services: either the live socket or an in-memory
//! mock fed from a fixture (`mock`).

pub mod backend;
pub mod client;
pub mod event;
pub mod mock;
pub mod proto;

pub use backend::{Admin, EventStream, StreamKind};
pub use client::AdminClient;
pub use event::{is_garbage, Event, EventReader};
pub use mock::{MockAdmin, MockFixture, PowerOp};

use thiserror::Error;

/// Default qubesd socket location in dom0.
pub const DEFAULT_SOCKET: &str = "/var/run/qubesd.sock";

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("admin I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed admin response: {0}")]
    Malformed(String),
    #[error("qubesd error {kind}: {message}")]
    Remote { kind: String, message: String },
    #[error("event stream closed")]
    StreamClosed,
    #[error("fixture error: {0}")]
    Fixture(#[from] serde_json::Error),
    #[error("model error: {0}")]
    Model(#[from] qubesdbus_model::ModelError),
}

impl AdminError {
    /// Whether this error is a remote "no such entity" condition, i.e. a
    /// domain or property that disappeared between enumeration and fetch.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            AdminError::Remote { kind, .. }
                if kind == "QubesNoSuchPropertyError" || kind == "KeyError"
                    || kind == "QubesVMNotFoundError"
        )
    }
}
