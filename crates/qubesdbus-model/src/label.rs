use crate::paths::label_path;
use serde::{Deserialize, Serialize};

/// A Qubes label: a named color tag attachable to domains.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LabelRecord {
    pub name: String,
    pub index: i32,
    /// Color in `0xRRGGBB` notation, as reported by `admin.label.Get`.
    pub color: String,
    #[serde(default)]
    pub icon: Option<String>,
}

impl LabelRecord {
    pub fn new(name: impl Into<String>, index: i32, color: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            icon: Some(icon_for(&name)),
            name,
            index,
            color: color.into(),
        }
    }

    pub fn object_path(&self) -> String {
        label_path(&self.name)
    }

    /// Icon name, falling back to the derived default for fixture data
    /// that omits it.
    pub fn icon(&self) -> String {
        self.icon.clone().unwrap_or_else(|| icon_for(&self.name))
    }
}

/// Icon name for a label, following the qubesd convention.
pub fn icon_for(name: &str) -> String {
    format!("appvm-{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_derives_icon() {
        let label = LabelRecord::new("red", 1, "0xcc0000");
        assert_eq!(label.icon(), "appvm-red");
        assert_eq!(label.object_path(), "/org/qubes/Labels1/labels/red");
    }

    #[test]
    fn icon_fallback_for_fixture_without_icon() {
        let label: LabelRecord =
            serde_json::from_str(r#"{"name":"blue","index":4,"color":"0x0000cc"}"#).unwrap();
        assert_eq!(label.icon, None);
        assert_eq!(label.icon(), "appvm-blue");
    }
}
