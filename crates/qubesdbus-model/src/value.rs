//! Conversions between admin property values and D-Bus variant values.

use crate::domain::DomainRecord;
use crate::paths::label_path;
use crate::state::DomainState;
use crate::ModelError;
use std::collections::HashMap;
use zbus::zvariant::{ObjectPath, OwnedValue, Value};

/// A typed admin property value, as decoded from `admin.vm.property.Get`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Str(String),
    Int(i64),
    Bool(bool),
    /// A reference to another domain, by name.
    Vm(String),
    /// A reference to a label, by name.
    Label(String),
    /// The property is unset.
    Absent,
}

impl PropertyValue {
    /// Decode the `type value` part of an `admin.vm.property.Get` payload.
    pub fn from_admin(kind: &str, value: &str) -> Self {
        match kind {
            "int" => value
                .parse()
                .map_or_else(|_| PropertyValue::Str(value.to_owned()), PropertyValue::Int),
            "bool" => PropertyValue::Bool(value == "True"),
            "vm" if value.is_empty() => PropertyValue::Absent,
            "vm" => PropertyValue::Vm(value.to_owned()),
            "label" if value.is_empty() => PropertyValue::Absent,
            "label" => PropertyValue::Label(value.to_owned()),
            _ if value.is_empty() => PropertyValue::Absent,
            _ => PropertyValue::Str(value.to_owned()),
        }
    }

    /// Convert into a D-Bus value. Labels become object paths into the
    /// labels service; domain references stay names (the domain interface
    /// publishes them as names). Unset properties become the empty string.
    pub fn to_value(&self) -> Value<'static> {
        match self {
            PropertyValue::Str(s) | PropertyValue::Vm(s) => Value::from(s.clone()),
            PropertyValue::Int(i) => Value::from(*i),
            PropertyValue::Bool(b) => Value::from(*b),
            PropertyValue::Label(name) => {
                let path = label_path(name);
                ObjectPath::try_from(path.clone())
                    .map_or_else(|_| Value::from(path), Value::ObjectPath)
            }
            PropertyValue::Absent => Value::from(String::new()),
        }
    }

    /// The string content, for properties published as `s`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) | PropertyValue::Vm(s) | PropertyValue::Label(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            PropertyValue::Str(s) => s.parse().ok(),
            _ => None,
        }
    }
}

fn dict_str(data: &HashMap<String, OwnedValue>, key: &str) -> Option<String> {
    match data.get(key).map(|v| &**v) {
        Some(Value::Str(s)) => Some(s.to_string()),
        _ => None,
    }
}

fn dict_u64(data: &HashMap<String, OwnedValue>, key: &str) -> Option<u64> {
    match data.get(key).map(|v| &**v) {
        Some(Value::U64(x)) => Some(*x),
        Some(Value::U32(x)) => Some(u64::from(*x)),
        Some(Value::I64(x)) => u64::try_from(*x).ok(),
        Some(Value::I32(x)) => u64::try_from(*x).ok(),
        Some(Value::Str(s)) => s.parse().ok(),
        _ => None,
    }
}

fn dict_bool(data: &HashMap<String, OwnedValue>, key: &str) -> Option<bool> {
    match data.get(key).map(|v| &**v) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::Str(s)) => Some(s == "True" || s == "true"),
        _ => None,
    }
}

/// Build a [`DomainRecord`] from an `a{sv}` property dict, as received by
/// `DomainManager1.AddDomain`. `qid` and `name` are required; every other
/// field falls back to its default.
pub fn record_from_dict(data: &HashMap<String, OwnedValue>) -> Result<DomainRecord, ModelError> {
    let qid = dict_u64(data, "qid").ok_or(ModelError::MissingField("qid"))?;
    let qid = u32::try_from(qid).map_err(|_| ModelError::InvalidValue {
        field: "qid",
        reason: format!("{qid} out of range"),
    })?;
    let name = dict_str(data, "name").ok_or(ModelError::MissingField("name"))?;

    let state = match dict_str(data, "state") {
        Some(raw) => raw.parse()?,
        None => DomainState::Unknown,
    };

    Ok(DomainRecord {
        qid,
        name,
        klass: dict_str(data, "klass").unwrap_or_else(|| "AppVM".to_owned()),
        state,
        label: dict_str(data, "label").unwrap_or_default(),
        netvm: dict_str(data, "netvm"),
        template: dict_str(data, "template"),
        ip: dict_str(data, "ip"),
        memory_usage: dict_u64(data, "memory_usage").unwrap_or(0),
        maxmem: dict_u64(data, "maxmem").unwrap_or(0),
        vcpus: dict_u64(data, "vcpus").map_or(0, |v| v as u32),
        networked: dict_bool(data, "networked").unwrap_or(false),
        start_time: dict_str(data, "start_time").and_then(|s| s.parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ov(v: Value<'static>) -> OwnedValue {
        OwnedValue::try_from(v).unwrap()
    }

    #[test]
    fn from_admin_typed_values() {
        assert_eq!(PropertyValue::from_admin("int", "42"), PropertyValue::Int(42));
        assert_eq!(
            PropertyValue::from_admin("bool", "True"),
            PropertyValue::Bool(true)
        );
        assert_eq!(
            PropertyValue::from_admin("bool", "False"),
            PropertyValue::Bool(false)
        );
        assert_eq!(
            PropertyValue::from_admin("vm", "sys-net"),
            PropertyValue::Vm("sys-net".to_owned())
        );
        assert_eq!(PropertyValue::from_admin("vm", ""), PropertyValue::Absent);
        assert_eq!(
            PropertyValue::from_admin("label", "red"),
            PropertyValue::Label("red".to_owned())
        );
        assert_eq!(PropertyValue::from_admin("str", ""), PropertyValue::Absent);
    }

    #[test]
    fn label_converts_to_object_path() {
        let value = PropertyValue::Label("red".to_owned()).to_value();
        assert!(matches!(
            value,
            Value::ObjectPath(ref p) if p.as_str() == "/org/qubes/Labels1/labels/red"
        ));
    }

    #[test]
    fn absent_converts_to_empty_string() {
        assert_eq!(
            PropertyValue::Absent.to_value(),
            Value::from(String::new())
        );
    }

    #[test]
    fn record_from_dict_minimal() {
        let mut data = HashMap::new();
        data.insert("qid".to_owned(), ov(Value::from(9u32)));
        data.insert("name".to_owned(), ov(Value::from("work".to_owned())));
        let rec = record_from_dict(&data).unwrap();
        assert_eq!(rec.qid, 9);
        assert_eq!(rec.name, "work");
        assert_eq!(rec.state, DomainState::Unknown);
        assert_eq!(rec.klass, "AppVM");
    }

    #[test]
    fn record_from_dict_accepts_int_variants_for_qid() {
        for qid in [Value::from(5u32), Value::from(5i32), Value::from(5i64)] {
            let mut data = HashMap::new();
            data.insert("qid".to_owned(), ov(qid));
            data.insert("name".to_owned(), ov(Value::from("a".to_owned())));
            assert_eq!(record_from_dict(&data).unwrap().qid, 5);
        }
    }

    #[test]
    fn record_from_dict_missing_fields() {
        let mut data = HashMap::new();
        data.insert("name".to_owned(), ov(Value::from("a".to_owned())));
        assert!(matches!(
            record_from_dict(&data),
            Err(ModelError::MissingField("qid"))
        ));
        let mut data = HashMap::new();
        data.insert("qid".to_owned(), ov(Value::from(1u32)));
        assert!(matches!(
            record_from_dict(&data),
            Err(ModelError::MissingField("name"))
        ));
    }

    #[test]
    fn record_from_dict_full() {
        let mut data = HashMap::new();
        data.insert("qid".to_owned(), ov(Value::from(2u32)));
        data.insert("name".to_owned(), ov(Value::from("banking".to_owned())));
        data.insert("state".to_owned(), ov(Value::from("Halted".to_owned())));
        data.insert("label".to_owned(), ov(Value::from("green".to_owned())));
        data.insert("maxmem".to_owned(), ov(Value::from(4000u64)));
        data.insert("vcpus".to_owned(), ov(Value::from(2u32)));
        data.insert("networked".to_owned(), ov(Value::from(true)));
        let rec = record_from_dict(&data).unwrap();
        assert_eq!(rec.state, DomainState::Halted);
        assert_eq!(rec.label, "green");
        assert_eq!(rec.maxmem, 4000);
        assert_eq!(rec.vcpus, 2);
        assert!(rec.networked);
    }
}
