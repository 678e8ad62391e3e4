//! Data model shared by the Qubes D-Bus services.
//!
//! This crate carries the typed projections of qubesd state (`DomainRecord`,
//! `LabelRecord`), the user-facing domain state machine with its transition
//! rules, the object-path builders behind the stable
//! `/org/qubes/DomainManager1/domains/QID` and `/org/qubes/Labels1/labels/COLORNAME`
//! contract, and the conversions between admin property values and D-Bus
//! variant values.

pub mod domain;
pub mod label;
pub mod paths;
pub mod state;
pub mod value;

pub use domain::DomainRecord;
pub use label::LabelRecord;
pub use paths::{domain_path, label_path, sanitize_path_element};
pub use state::{validate_transition, DomainState};
pub use value::{record_from_dict, PropertyValue};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("unknown domain state: {0}")]
    UnknownState(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}
