//! Desktop notifications for conditions a desktop user must see.

/// Notify the desktop that a domain failed to start.
pub fn domain_failed(name: &str) {
    if let Err(e) = notify_rust::Notification::new()
        .appname("Qubes")
        .summary("Domain start failed")
        .body(&format!("Domain {name} failed to start"))
        .timeout(notify_rust::Timeout::Milliseconds(5000))
        .show()
    {
        tracing::debug!("desktop notification failed (non-fatal): {e}");
    }
}
