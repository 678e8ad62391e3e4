use crate::paths::domain_path;
use crate::state::DomainState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Typed projection of a Qubes domain as published on the bus.
///
/// The field set is the subset of qubesd properties the services read or
/// update; everything else qubesd knows about a domain stays behind the
/// admin API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainRecord {
    pub qid: u32,
    pub name: String,
    /// Domain class as reported by qubesd (`AppVM`, `TemplateVM`, ...).
    pub klass: String,
    pub state: DomainState,
    /// Name of the label attached to this domain.
    pub label: String,
    #[serde(default)]
    pub netvm: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    /// Current memory usage in KiB, updated from the stats stream.
    #[serde(default)]
    pub memory_usage: u64,
    #[serde(default)]
    pub maxmem: u64,
    #[serde(default)]
    pub vcpus: u32,
    #[serde(default)]
    pub networked: bool,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

impl DomainRecord {
    /// The object path this domain is served at. Depends only on the qid,
    /// so renames never move the object.
    pub fn object_path(&self) -> String {
        domain_path(self.qid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(qid: u32, name: &str) -> DomainRecord {
        DomainRecord {
            qid,
            name: name.to_owned(),
            klass: "AppVM".to_owned(),
            state: DomainState::Halted,
            label: "red".to_owned(),
            netvm: Some("sys-firewall".to_owned()),
            template: Some("fedora-41".to_owned()),
            ip: Some("10.137.0.10".to_owned()),
            memory_usage: 0,
            maxmem: 4096,
            vcpus: 2,
            networked: true,
            start_time: None,
        }
    }

    #[test]
    fn object_path_depends_only_on_qid() {
        let a = record(7, "work");
        let mut b = a.clone();
        b.name = "renamed".to_owned();
        assert_eq!(a.object_path(), b.object_path());
        assert_eq!(a.object_path(), "/org/qubes/DomainManager1/domains/7");
    }

    #[test]
    fn serde_roundtrip() {
        let rec = record(3, "personal");
        let json = serde_json::to_string(&rec).unwrap();
        let back: DomainRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn optional_fields_default() {
        let json = r#"{"qid":1,"name":"vault","klass":"AppVM","state":"Halted","label":"black"}"#;
        let rec: DomainRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.netvm, None);
        assert_eq!(rec.memory_usage, 0);
        assert!(!rec.networked);
    }
}
