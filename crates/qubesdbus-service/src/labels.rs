//! The labels service: `/org/qubes/Labels1` and its label objects.

use crate::domain_manager::API_VERSION;
use crate::ServiceError;
use qubesdbus_model::LabelRecord;
use tracing::info;
use zbus::interface;
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::Connection;

/// `org.qubes.Labels1`: enumeration of the served label objects.
pub struct LabelsManager {
    labels: Vec<OwnedObjectPath>,
}

impl LabelsManager {
    pub fn new(labels: Vec<OwnedObjectPath>) -> Self {
        Self { labels }
    }
}

#[interface(name = "org.qubes.Labels1")]
impl LabelsManager {
    #[zbus(property)]
    async fn version(&self) -> u32 {
        API_VERSION
    }

    async fn list_labels(&self) -> Vec<OwnedObjectPath> {
        info!("D-Bus: ListLabels");
        self.labels.clone()
    }
}

/// A label as served at `/org/qubes/Labels1/labels/COLORNAME`.
pub struct Label {
    record: LabelRecord,
}

impl Label {
    pub fn new(record: LabelRecord) -> Self {
        Self { record }
    }
}

#[interface(name = "org.qubes.Label1")]
impl Label {
    #[zbus(property)]
    async fn name(&self) -> &str {
        &self.record.name
    }

    #[zbus(property)]
    async fn index(&self) -> i32 {
        self.record.index
    }

    #[zbus(property)]
    async fn color(&self) -> &str {
        &self.record.color
    }

    #[zbus(property)]
    async fn icon(&self) -> String {
        self.record.icon()
    }
}

/// Serve one object per label; returns the served paths in input order.
pub async fn register_labels(
    conn: &Connection,
    records: Vec<LabelRecord>,
) -> Result<Vec<OwnedObjectPath>, ServiceError> {
    let mut paths = Vec::with_capacity(records.len());
    for record in records {
        let path = ObjectPath::try_from(record.object_path())?;
        let name = record.name.clone();
        conn.object_server()
            .at(path.as_str(), Label::new(record))
            .await?;
        info!("label {name} registered at {path}");
        paths.push(path.into());
    }
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn label_properties_reflect_the_record() {
        let label = Label::new(LabelRecord::new("purple", 8, "0x7f00ff"));
        assert_eq!(label.name().await, "purple");
        assert_eq!(label.index().await, 8);
        assert_eq!(label.color().await, "0x7f00ff");
        assert_eq!(label.icon().await, "appvm-purple");
    }

    #[tokio::test]
    async fn manager_lists_served_paths() {
        let paths = vec![
            OwnedObjectPath::try_from("/org/qubes/Labels1/labels/red").unwrap(),
            OwnedObjectPath::try_from("/org/qubes/Labels1/labels/blue").unwrap(),
        ];
        let manager = LabelsManager::new(paths.clone());
        assert_eq!(manager.version().await, API_VERSION);
        assert_eq!(manager.list_labels().await, paths);
    }
}
