//! Record deduplication.
//!
//! Complete `(ip, hostname)` pairs are kept once per identity. A bare
//! hostname or bare IP that matches the corresponding half of some complete
//! pair is absorbed by it; otherwise it is kept as its own row. Headers are
//! assigned afterwards in input order, so the first non-null value reaching a
//! row wins and a later null never clears it.
//!
//! The result is sorted and merging it again returns it unchanged.

use robot_core::DiscoveryRecord;
use std::collections::{BTreeMap, BTreeSet};

type PairKey = (String, String, String);
type HalfKey = (String, String);

/// Deduplicate `records`, merging bare records into fuller ones.
#[must_use]
pub fn merge_records<I>(records: I) -> Vec<DiscoveryRecord>
where
    I: IntoIterator<Item = DiscoveryRecord>,
{
    let input: Vec<DiscoveryRecord> = records.into_iter().collect();

    let mut pairs: BTreeMap<PairKey, DiscoveryRecord> = BTreeMap::new();
    for record in &input {
        if let (Some(ip), Some(host)) = (&record.ip, &record.hostname) {
            pairs
                .entry((record.domain.clone(), ip.clone(), host.clone()))
                .or_insert_with(|| without_headers(record));
        }
    }

    let paired_hosts: BTreeSet<HalfKey> =
        pairs.keys().map(|(d, _, h)| (d.clone(), h.clone())).collect();
    let paired_ips: BTreeSet<HalfKey> =
        pairs.keys().map(|(d, i, _)| (d.clone(), i.clone())).collect();

    let mut bare_hosts: BTreeMap<HalfKey, DiscoveryRecord> = BTreeMap::new();
    let mut bare_ips: BTreeMap<HalfKey, DiscoveryRecord> = BTreeMap::new();
    for record in &input {
        match (&record.ip, &record.hostname) {
            (None, Some(host)) => {
                let key = (record.domain.clone(), host.clone());
                if !paired_hosts.contains(&key) {
                    bare_hosts
                        .entry(key)
                        .or_insert_with(|| without_headers(record));
                }
            }
            (Some(ip), None) => {
                let key = (record.domain.clone(), ip.clone());
                if !paired_ips.contains(&key) {
                    bare_ips.entry(key).or_insert_with(|| without_headers(record));
                }
            }
            _ => {}
        }
    }

    for record in input.iter().filter(|r| r.headers.is_some()) {
        let headers = record.headers.as_deref();
        match (&record.ip, &record.hostname) {
            (Some(ip), Some(host)) => {
                if let Some(target) =
                    pairs.get_mut(&(record.domain.clone(), ip.clone(), host.clone()))
                {
                    target.absorb_headers(headers);
                }
            }
            (None, Some(host)) => {
                let key = (record.domain.clone(), host.clone());
                match bare_hosts.get_mut(&key) {
                    Some(target) => target.absorb_headers(headers),
                    None => pairs
                        .iter_mut()
                        .filter(|((d, _, h), _)| *d == key.0 && *h == key.1)
                        .for_each(|(_, target)| target.absorb_headers(headers)),
                }
            }
            (Some(ip), None) => {
                let key = (record.domain.clone(), ip.clone());
                match bare_ips.get_mut(&key) {
                    Some(target) => target.absorb_headers(headers),
                    None => pairs
                        .iter_mut()
                        .filter(|((d, i, _), _)| *d == key.0 && *i == key.1)
                        .for_each(|(_, target)| target.absorb_headers(headers)),
                }
            }
            (None, None) => {}
        }
    }

    let mut merged: Vec<DiscoveryRecord> = pairs
        .into_values()
        .chain(bare_hosts.into_values())
        .chain(bare_ips.into_values())
        .collect();
    merged.sort();
    merged
}

/// Merge freshly aggregated records with what a domain already had.
///
/// Prior records come first, so known headers are never replaced.
#[must_use]
pub fn reconcile(prior: &[DiscoveryRecord], fresh: &[DiscoveryRecord]) -> Vec<DiscoveryRecord> {
    merge_records(prior.iter().chain(fresh).cloned())
}

fn without_headers(record: &DiscoveryRecord) -> DiscoveryRecord {
    DiscoveryRecord {
        headers: None,
        ..record.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robot_core::ToolId;

    fn rec(ip: Option<&str>, host: Option<&str>, tool: &str) -> DiscoveryRecord {
        DiscoveryRecord::new("example.com", ip, host, Some(ToolId::new(tool).unwrap())).unwrap()
    }

    #[test]
    fn test_bare_hostname_merges_into_pair() {
        let merged = merge_records(vec![
            rec(None, Some("a.example.com"), "subfinder"),
            rec(Some("1.2.3.4"), Some("a.example.com"), "amass"),
        ]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(merged[0].hostname.as_deref(), Some("a.example.com"));
        assert_eq!(merged[0].source_tool.as_ref().unwrap().as_str(), "amass");
    }

    #[test]
    fn test_bare_ip_merges_into_every_matching_pair() {
        let merged = merge_records(vec![
            rec(Some("1.2.3.4"), None, "shodan"),
            rec(Some("1.2.3.4"), Some("a.example.com"), "amass"),
            rec(Some("1.2.3.4"), Some("b.example.com"), "amass"),
            rec(Some("5.6.7.8"), None, "shodan"),
        ]);

        let pairs: Vec<_> = merged
            .iter()
            .map(|r| (r.ip.as_deref(), r.hostname.as_deref()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                (Some("5.6.7.8"), None),
                (Some("1.2.3.4"), Some("a.example.com")),
                (Some("1.2.3.4"), Some("b.example.com")),
            ]
        );
    }

    #[test]
    fn test_duplicates_collapse() {
        let merged = merge_records(vec![
            rec(Some("1.2.3.4"), Some("a.example.com"), "amass"),
            rec(Some("1.2.3.4"), Some("a.example.com"), "knock"),
            rec(None, Some("b.example.com"), "knock"),
            rec(None, Some("b.example.com"), "subfinder"),
        ]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_headers_first_non_null_wins() {
        let merged = merge_records(vec![
            rec(Some("1.2.3.4"), Some("a.example.com"), "amass"),
            rec(None, Some("a.example.com"), "webscreenshot")
                .with_headers(Some("Server: nginx".to_string())),
            rec(Some("1.2.3.4"), Some("a.example.com"), "knock")
                .with_headers(Some("Server: apache".to_string())),
        ]);

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].headers.as_deref(), Some("Server: nginx"));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let input = vec![
            rec(None, Some("c.example.com"), "subfinder").with_headers(Some("X".to_string())),
            rec(Some("9.9.9.9"), None, "shodan"),
            rec(Some("1.2.3.4"), Some("a.example.com"), "amass"),
            rec(None, Some("a.example.com"), "knock").with_headers(Some("Y".to_string())),
        ];

        let once = merge_records(input.clone());
        let twice = merge_records(once.clone());
        assert_eq!(once, twice);
        assert_eq!(merge_records(input), once);
    }

    #[test]
    fn test_reconcile_keeps_prior_headers() {
        let prior = vec![DiscoveryRecord::new("example.com", Some("1.2.3.4"), Some("a.example.com"), None)
            .unwrap()
            .with_headers(Some("Server: old".to_string()))];
        let fresh = vec![
            rec(Some("1.2.3.4"), Some("a.example.com"), "amass")
                .with_headers(Some("Server: new".to_string())),
            rec(None, Some("b.example.com"), "knock"),
        ];

        let merged = reconcile(&prior, &fresh);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].headers.as_deref(), Some("Server: old"));
        assert_eq!(merged[0].source_tool, None);
    }
}
