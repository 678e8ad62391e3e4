//! Bus names, object paths, and interface names of the public contract.

/// Well-known name of the domain manager service.
pub const DOMAIN_MANAGER_NAME: &str = "org.qubes.DomainManager1";
/// Object path of the domain manager.
pub const DOMAIN_MANAGER_PATH: &str = "/org/qubes/DomainManager1";
/// Interface implemented by the domain manager object.
pub const DOMAIN_MANAGER_IFACE: &str = "org.qubes.DomainManager1";
/// Interface implemented by every domain object.
pub const DOMAIN_IFACE: &str = "org.qubes.Domain";

/// Well-known name of the labels service.
pub const LABELS_NAME: &str = "org.qubes.Labels1";
/// Object path of the labels manager.
pub const LABELS_PATH: &str = "/org/qubes/Labels1";
/// Interface implemented by the labels manager object.
pub const LABELS_IFACE: &str = "org.qubes.Labels1";
/// Interface implemented by every label object.
pub const LABEL_IFACE: &str = "org.qubes.Label1";

/// Map an arbitrary admin-supplied name onto a valid D-Bus object path
/// element. Every byte outside `[A-Za-z0-9_]` becomes `_`.
pub fn sanitize_path_element(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Object path of the domain with the given qid.
pub fn domain_path(qid: u32) -> String {
    format!("{DOMAIN_MANAGER_PATH}/domains/{qid}")
}

/// Object path of the label with the given name.
pub fn label_path(name: &str) -> String {
    format!("{LABELS_PATH}/labels/{}", sanitize_path_element(name))
}
