//! Hostname, IP and domain normalization.
//!
//! Every tool spells its findings differently: upper-case labels, trailing
//! root dots, URL prefixes, bracketed IPv6. These helpers map all of them to
//! one canonical text form so that identity comparisons are plain string
//! equality.

use crate::error::RobotError;
use std::net::IpAddr;

/// Maximum length of a DNS name in text form.
const MAX_HOSTNAME_LEN: usize = 253;

/// Maximum length of a single DNS label.
const MAX_LABEL_LEN: usize = 63;

/// Normalize a hostname to lower-case, without trailing dots.
///
/// Accepts URL-ish input (`https://A.Example.com:8443/path`) and wildcard
/// prefixes (`*.example.com`) as emitted by certificate-transparency tools.
/// Returns `None` when the value is not a syntactically valid DNS name, or
/// when it is an IP address.
#[must_use]
pub fn normalize_hostname(raw: &str) -> Option<String> {
    let mut value = raw.trim();

    if let Some((_, rest)) = value.split_once("://") {
        value = rest;
    }
    if let Some((host, _)) = value.split_once('/') {
        value = host;
    }
    if let Some((host, port)) = value.rsplit_once(':') {
        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) && !host.contains(':') {
            value = host;
        }
    }
    value = value.strip_prefix("*.").unwrap_or(value);

    let host = value.trim_end_matches('.').to_ascii_lowercase();

    if host.is_empty() || host.len() > MAX_HOSTNAME_LEN || host.parse::<IpAddr>().is_ok() {
        return None;
    }

    let labels_valid = host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    });

    labels_valid.then_some(host)
}

/// Validate an IPv4 or IPv6 address and return its canonical text form.
///
/// Surrounding whitespace and IPv6 brackets are ignored.
#[must_use]
pub fn normalize_ip(raw: &str) -> Option<String> {
    let value = raw.trim();
    let value = value
        .strip_prefix('[')
        .and_then(|v| v.strip_suffix(']'))
        .unwrap_or(value);

    value.parse::<IpAddr>().ok().map(|ip| ip.to_string())
}

/// Normalize the run's target domain.
///
/// # Errors
/// Returns `RobotError::Validation` if the domain is not a valid DNS name.
pub fn normalize_domain(raw: &str) -> Result<String, RobotError> {
    normalize_hostname(raw)
        .ok_or_else(|| RobotError::Validation(format!("invalid target domain '{raw}'")))
}

/// Whether `hostname` is `domain` itself or one of its subdomains.
///
/// Both arguments must already be normalized.
#[must_use]
pub fn is_in_scope(hostname: &str, domain: &str) -> bool {
    hostname == domain
        || hostname
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}
