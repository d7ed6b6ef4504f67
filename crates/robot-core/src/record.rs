//! The canonical unit of aggregated knowledge.

use crate::types::ToolId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A normalized `(domain, ip, hostname, headers)` fact discovered by some tool.
///
/// At least one of `ip` and `hostname` is always present; [`DiscoveryRecord::new`]
/// refuses to build a record otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    /// Target domain the record belongs to
    pub domain: String,
    /// Canonical IP address text
    pub ip: Option<String>,
    /// Normalized hostname
    pub hostname: Option<String>,
    /// Raw header text captured for this host, if any
    pub headers: Option<String>,
    /// Tool that first reported the record. `None` for rows read back from the
    /// record store, which does not persist provenance.
    pub source_tool: Option<ToolId>,
}

/// Identity key used for deduplication and upserts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordIdentity {
    /// Target domain
    pub domain: String,
    /// Canonical IP, if known
    pub ip: Option<String>,
    /// Normalized hostname, if known
    pub hostname: Option<String>,
}

impl DiscoveryRecord {
    /// Build a record from already-normalized parts.
    ///
    /// Returns `None` if both `ip` and `hostname` are missing.
    #[must_use]
    pub fn new(
        domain: &str,
        ip: Option<&str>,
        hostname: Option<&str>,
        source_tool: Option<ToolId>,
    ) -> Option<Self> {
        if ip.is_none() && hostname.is_none() {
            return None;
        }

        Some(Self {
            domain: domain.to_string(),
            ip: ip.map(str::to_string),
            hostname: hostname.map(str::to_string),
            headers: None,
            source_tool,
        })
    }

    /// Attach header text.
    #[must_use]
    pub fn with_headers(mut self, headers: Option<String>) -> Self {
        self.headers = headers;
        self
    }

    /// The `(domain, ip, hostname)` identity of this record.
    #[must_use]
    pub fn identity(&self) -> RecordIdentity {
        RecordIdentity {
            domain: self.domain.clone(),
            ip: self.ip.clone(),
            hostname: self.hostname.clone(),
        }
    }

    /// Whether both `ip` and `hostname` are known.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.ip.is_some() && self.hostname.is_some()
    }

    /// Fill `headers` from `other` only if this record has none yet.
    pub fn absorb_headers(&mut self, other: Option<&str>) {
        if self.headers.is_none() {
            self.headers = other.map(str::to_string);
        }
    }
}

impl PartialOrd for DiscoveryRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DiscoveryRecord {
    /// Ordered by domain, then hostname, then IP, then the remaining fields
    /// so that the order is total.
    fn cmp(&self, other: &Self) -> Ordering {
        self.domain
            .cmp(&other.domain)
            .then_with(|| self.hostname.cmp(&other.hostname))
            .then_with(|| self.ip.cmp(&other.ip))
            .then_with(|| self.headers.cmp(&other.headers))
            .then_with(|| self.source_tool.cmp(&other.source_tool))
    }
}
