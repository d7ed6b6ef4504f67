//! Flat-file summaries of a domain's records.
//!
//! Written under `<output_root>/aggregated/` after every store write so
//! follow-up tools can read the current hostname list from `$infile`.

use robot_core::{DiscoveryRecord, RunConfig, AGGREGATED_HOSTNAMES};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Name of the IP list.
pub const AGGREGATED_IPS: &str = "aggregated_ips.txt";

/// Name of the URL list.
pub const AGGREGATED_PROTOCOL_HOSTNAMES: &str = "aggregated_protocol_hostnames.txt";

/// Directory holding one headers file per host.
pub const HEADERS_DIR: &str = "headers";

/// Where the artifacts of one write landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    /// One hostname per line, sorted
    pub hostnames: PathBuf,
    /// One IP per line, numeric order
    pub ips: PathBuf,
    /// `https://` and `http://` URL per hostname
    pub protocol_hostnames: PathBuf,
    /// Headers directory; `None` when no record carries headers
    pub headers_dir: Option<PathBuf>,
}

/// Write every artifact for `records` into the run's aggregated directory.
///
/// Files are replaced, not appended to.
pub async fn write_artifacts(
    run: &RunConfig,
    records: &[DiscoveryRecord],
) -> io::Result<ArtifactPaths> {
    let dir = run.aggregated_dir();
    tokio::fs::create_dir_all(&dir).await?;

    let hostnames: BTreeSet<&str> = records.iter().filter_map(|r| r.hostname.as_deref()).collect();
    let ips: BTreeSet<IpAddr> = records
        .iter()
        .filter_map(|r| r.ip.as_deref())
        .filter_map(|ip| ip.parse().ok())
        .collect();

    let paths = ArtifactPaths {
        hostnames: dir.join(AGGREGATED_HOSTNAMES),
        ips: dir.join(AGGREGATED_IPS),
        protocol_hostnames: dir.join(AGGREGATED_PROTOCOL_HOSTNAMES),
        headers_dir: None,
    };

    write_lines(&paths.hostnames, hostnames.iter()).await?;
    write_lines(&paths.ips, ips.iter()).await?;
    write_lines(
        &paths.protocol_hostnames,
        hostnames
            .iter()
            .flat_map(|h| [format!("https://{h}"), format!("http://{h}")]),
    )
    .await?;

    let headers_dir = write_headers(&dir.join(HEADERS_DIR), records).await?;

    tracing::debug!(
        dir = %dir.display(),
        hostnames = hostnames.len(),
        ips = ips.len(),
        "Artifacts written"
    );
    Ok(ArtifactPaths {
        headers_dir,
        ..paths
    })
}

async fn write_lines<I, T>(path: &Path, lines: I) -> io::Result<()>
where
    I: IntoIterator<Item = T>,
    T: std::fmt::Display,
{
    let mut text = String::new();
    for line in lines {
        text.push_str(&line.to_string());
        text.push('\n');
    }
    tokio::fs::write(path, text).await
}

/// One `<host>_headers.txt` per hostname that has headers, holding a JSON
/// object with the host, its IPs and the headers text.
///
/// The directory is rebuilt from scratch, so hosts that lost their headers
/// leave no file behind.
async fn write_headers(dir: &Path, records: &[DiscoveryRecord]) -> io::Result<Option<PathBuf>> {
    match tokio::fs::remove_dir_all(dir).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let mut headers_of: BTreeMap<&str, &str> = BTreeMap::new();
    for record in records {
        if let (Some(host), Some(headers)) = (record.hostname.as_deref(), record.headers.as_deref()) {
            headers_of.entry(host).or_insert(headers);
        }
    }

    if headers_of.is_empty() {
        return Ok(None);
    }

    let mut ips_of: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for record in records {
        if let (Some(host), Some(ip)) = (record.hostname.as_deref(), record.ip.as_deref()) {
            if headers_of.contains_key(host) {
                ips_of.entry(host).or_default().insert(ip);
            }
        }
    }

    tokio::fs::create_dir_all(dir).await?;
    for (host, headers) in headers_of {
        let body = serde_json::json!({
            "hostname": host,
            "ips": ips_of.remove(host).unwrap_or_default(),
            "headers": headers,
        });
        let text = serde_json::to_string_pretty(&body).map_err(io::Error::other)?;
        tokio::fs::write(dir.join(format!("{host}_headers.txt")), text + "\n").await?;
    }
    Ok(Some(dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(ip: Option<&str>, host: Option<&str>) -> DiscoveryRecord {
        DiscoveryRecord::new("example.com", ip, host, None).unwrap()
    }

    #[tokio::test]
    async fn test_artifacts_are_sorted_and_deduplicated() {
        let tmp = tempfile::TempDir::new().unwrap();
        let run = RunConfig::new("example.com", tmp.path()).unwrap();
        let records = vec![
            rec(Some("10.0.0.2"), Some("b.example.com")),
            rec(Some("10.0.0.10"), Some("a.example.com")),
            rec(Some("10.0.0.2"), Some("c.example.com")),
            rec(Some("9.9.9.9"), None),
        ];

        let paths = write_artifacts(&run, &records).await.unwrap();

        let hosts = std::fs::read_to_string(&paths.hostnames).unwrap();
        assert_eq!(hosts, "a.example.com\nb.example.com\nc.example.com\n");

        let ips = std::fs::read_to_string(&paths.ips).unwrap();
        assert_eq!(ips, "9.9.9.9\n10.0.0.2\n10.0.0.10\n");

        let urls = std::fs::read_to_string(&paths.protocol_hostnames).unwrap();
        assert!(urls.starts_with("https://a.example.com\nhttp://a.example.com\n"));
        assert_eq!(urls.lines().count(), 6);

        assert!(paths.headers_dir.is_none());
    }

    #[tokio::test]
    async fn test_headers_files_per_host() {
        let tmp = tempfile::TempDir::new().unwrap();
        let run = RunConfig::new("example.com", tmp.path()).unwrap();
        let records = vec![
            rec(Some("1.2.3.4"), Some("a.example.com")).with_headers(Some("Server: nginx".into())),
            rec(Some("5.6.7.8"), Some("a.example.com")),
            rec(Some("1.1.1.1"), Some("b.example.com")),
        ];

        let paths = write_artifacts(&run, &records).await.unwrap();
        let dir = paths.headers_dir.expect("headers directory");

        let text = std::fs::read_to_string(dir.join("a.example.com_headers.txt")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["headers"], "Server: nginx");
        assert_eq!(value["ips"], serde_json::json!(["1.2.3.4", "5.6.7.8"]));
        assert!(!dir.join("b.example.com_headers.txt").exists());
    }

    #[tokio::test]
    async fn test_empty_records_truncate_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let run = RunConfig::new("example.com", tmp.path()).unwrap();

        write_artifacts(&run, &[rec(None, Some("a.example.com"))])
            .await
            .unwrap();
        let paths = write_artifacts(&run, &[]).await.unwrap();

        assert_eq!(std::fs::read_to_string(paths.hostnames).unwrap(), "");
    }

    #[tokio::test]
    async fn test_headers_dir_is_rewritten_as_a_whole() {
        let tmp = tempfile::TempDir::new().unwrap();
        let run = RunConfig::new("example.com", tmp.path()).unwrap();
        let headers = |host| rec(None, Some(host)).with_headers(Some("Server: nginx".into()));

        let first = write_artifacts(&run, &[headers("a.example.com"), headers("b.example.com")])
            .await
            .unwrap();
        let dir = first.headers_dir.unwrap();
        assert!(dir.join("a.example.com_headers.txt").exists());

        let second = write_artifacts(&run, &[headers("b.example.com")]).await.unwrap();
        assert_eq!(second.headers_dir.as_deref(), Some(dir.as_path()));
        assert!(!dir.join("a.example.com_headers.txt").exists());
        assert!(dir.join("b.example.com_headers.txt").exists());

        let third = write_artifacts(&run, &[rec(None, Some("b.example.com"))]).await.unwrap();
        assert!(third.headers_dir.is_none());
        assert!(!dir.exists());
    }
}
