/// Service type browsed when none is configured
pub const DEFAULT_SERVICE_TYPE: &str = "_drone._tcp";

/// mDNS domain appended to bare service types
pub const LOCAL_DOMAIN: &str = "local.";

/// How long the browse phase runs before the discovered set is frozen
pub const DEFAULT_BROWSE_TIMEOUT_MS: u64 = 1000;

/// Normalise a service type to the fully-qualified form mDNS expects,
/// e.g. "_drone._tcp" -> "_drone._tcp.local.".
pub fn qualify_service_type(service_type: &str) -> String {
    let trimmed = service_type.trim().trim_end_matches('.');
    let suffix = LOCAL_DOMAIN.trim_end_matches('.');

    if trimmed.ends_with(&format!(".{}", suffix)) {
        format!("{}.", trimmed)
    } else {
        format!("{}.{}", trimmed, LOCAL_DOMAIN)
    }
}

/// Split a DNS-SD full name ("Drone 1._drone._tcp.local.") into its instance
/// label, given the qualified service type it was browsed under.
pub fn instance_label<'a>(fullname: &'a str, qualified_type: &str) -> &'a str {
    fullname
        .strip_suffix(qualified_type)
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap_or(fullname)
}
