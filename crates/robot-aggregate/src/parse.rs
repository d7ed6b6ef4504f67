//! Per-format output parsers.
//!
//! Parsers only split text into raw `(ip?, hostname?, headers?)` entries.
//! They do not validate or normalize values; that happens once, in the
//! aggregator, for every format alike. A line a parser cannot make sense of
//! becomes a [`LineIssue`] and is skipped.

use regex::Regex;
use robot_core::OutputFormat;
use serde_json::Value;
use std::sync::OnceLock;

/// JSON keys that may hold an IP address.
const JSON_IP_KEYS: &[&str] = &["ip", "address", "ip_address"];

/// JSON keys that may hold a hostname.
const JSON_HOST_KEYS: &[&str] = &["hostname", "host", "domain", "name"];

/// CSV header names that may hold an IP address.
const CSV_IP_COLUMNS: &[&str] = &["ip", "address", "ip_address", "ip address"];

/// CSV header names that may hold a hostname.
const CSV_HOST_COLUMNS: &[&str] = &["hostname", "host", "domain", "name", "subdomain"];

/// One finding as the tool wrote it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawEntry {
    /// 1-based line the entry came from
    pub line: usize,
    /// IP address text
    pub ip: Option<String>,
    /// Hostname text
    pub hostname: Option<String>,
    /// Header text
    pub headers: Option<String>,
}

impl RawEntry {
    /// A single value of unknown kind. The aggregator moves it to `ip` if it
    /// turns out to be an address.
    fn bare(line: usize, value: &str) -> Self {
        Self {
            line,
            hostname: Some(value.to_string()),
            ..Self::default()
        }
    }
}

/// A line that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIssue {
    /// 1-based line number, 0 when the problem concerns the whole file
    pub line: usize,
    /// What went wrong
    pub reason: String,
}

/// Result of parsing one output file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parsed {
    /// Entries in file order
    pub entries: Vec<RawEntry>,
    /// Skipped lines
    pub issues: Vec<LineIssue>,
}

impl Parsed {
    fn issue(&mut self, line: usize, reason: impl Into<String>) {
        self.issues.push(LineIssue {
            line,
            reason: reason.into(),
        });
    }
}

/// Parse `text` as written by a tool with the given output format.
///
/// `domain` is only used by [`OutputFormat::Regex`], which extracts
/// hostnames below it from free text.
#[must_use]
pub fn parse(format: OutputFormat, text: &str, domain: &str) -> Parsed {
    match format {
        OutputFormat::Hosts => parse_hosts(text),
        OutputFormat::IpHost => parse_ip_host(text),
        OutputFormat::Csv => parse_csv(text),
        OutputFormat::Json => parse_json(text),
        OutputFormat::Regex => parse_regex(text, domain),
    }
}

fn content_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

fn parse_hosts(text: &str) -> Parsed {
    let mut parsed = Parsed::default();
    for (line, content) in content_lines(text) {
        let mut tokens = content.split_whitespace();
        if let Some(first) = tokens.next() {
            parsed.entries.push(RawEntry::bare(line, first));
        }
    }
    parsed
}

fn parse_ip_host(text: &str) -> Parsed {
    let mut parsed = Parsed::default();
    for (line, content) in content_lines(text) {
        let fields: Vec<&str> = if content.contains(',') {
            content.split(',').map(str::trim).filter(|f| !f.is_empty()).collect()
        } else {
            content.split_whitespace().collect()
        };

        match fields.as_slice() {
            [] => {}
            [single] => parsed.entries.push(RawEntry::bare(line, single)),
            [first, second, ..] => {
                let (ip, hostname) = if looks_like_ip(first) {
                    (*first, *second)
                } else if looks_like_ip(second) {
                    (*second, *first)
                } else {
                    parsed.issue(line, format!("no IP address in '{content}'"));
                    continue;
                };
                parsed.entries.push(RawEntry {
                    line,
                    ip: Some(ip.to_string()),
                    hostname: Some(hostname.to_string()),
                    headers: None,
                });
            }
        }
    }
    parsed
}

fn looks_like_ip(value: &str) -> bool {
    robot_core::normalize_ip(value).is_some()
}

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|h| names.contains(&h.trim().to_ascii_lowercase().as_str()))
}

fn parse_csv(text: &str) -> Parsed {
    let mut parsed = Parsed::default();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());

    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(e) => {
            parsed.issue(1, format!("unreadable CSV header: {e}"));
            return parsed;
        }
    };

    let ip_col = find_column(&headers, CSV_IP_COLUMNS);
    let host_col = find_column(&headers, CSV_HOST_COLUMNS);
    let headers_col = find_column(&headers, &["headers"]);
    if ip_col.is_none() && host_col.is_none() {
        parsed.issue(1, "CSV header has no IP or hostname column");
        return parsed;
    }

    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                let line = e.position().map_or(0, |p| usize::try_from(p.line()).unwrap_or(0));
                parsed.issue(line, format!("malformed CSV row: {e}"));
                continue;
            }
        };
        let line = record
            .position()
            .map_or(0, |p| usize::try_from(p.line()).unwrap_or(0));
        let field = |col: Option<usize>| {
            col.and_then(|c| record.get(c))
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let entry = RawEntry {
            line,
            ip: field(ip_col),
            hostname: field(host_col),
            headers: field(headers_col),
        };
        if entry.ip.is_none() && entry.hostname.is_none() {
            parsed.issue(line, "row has neither IP nor hostname");
            continue;
        }
        parsed.entries.push(entry);
    }
    parsed
}

fn parse_json(text: &str) -> Parsed {
    let mut parsed = Parsed::default();
    let trimmed = text.trim_start();

    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<Value>>(text) {
            Ok(values) => {
                for (i, value) in values.iter().enumerate() {
                    json_value(&mut parsed, i + 1, value);
                }
            }
            Err(e) => parsed.issue(e.line(), format!("invalid JSON array: {e}")),
        }
        return parsed;
    }

    for (line, content) in content_lines(text) {
        match serde_json::from_str::<Value>(content) {
            Ok(value) => json_value(&mut parsed, line, &value),
            Err(e) => parsed.issue(line, format!("invalid JSON: {e}")),
        }
    }
    parsed
}

fn json_string(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| object.get(*k).and_then(Value::as_str))
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

fn json_value(parsed: &mut Parsed, line: usize, value: &Value) {
    match value {
        Value::String(s) => parsed.entries.push(RawEntry::bare(line, s)),
        Value::Object(object) => {
            let hostname = json_string(object, JSON_HOST_KEYS);
            let headers = match object.get("headers") {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => Some(s.clone()),
                Some(other) => Some(other.to_string()),
            };

            // amass-style `"addresses": [{"ip": ...}, ...]`
            let addresses: Vec<String> = object
                .get("addresses")
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .filter_map(|a| match a {
                            Value::String(s) => Some(s.clone()),
                            Value::Object(o) => json_string(o, JSON_IP_KEYS),
                            _ => None,
                        })
                        .collect()
                })
                .unwrap_or_default();

            let ips = if addresses.is_empty() {
                vec![json_string(object, JSON_IP_KEYS)]
            } else {
                addresses.into_iter().map(Some).collect()
            };

            if hostname.is_none() && ips.iter().all(Option::is_none) {
                parsed.issue(line, "object has neither IP nor hostname");
                return;
            }
            for ip in ips {
                parsed.entries.push(RawEntry {
                    line,
                    ip,
                    hostname: hostname.clone(),
                    headers: headers.clone(),
                });
            }
        }
        other => parsed.issue(line, format!("unsupported JSON value: {other}")),
    }
}

fn ipv4_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(?:(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\.){3}(?:25[0-5]|2[0-4]\d|1\d\d|[1-9]?\d)\b")
            .expect("valid regex")
    })
}

fn parse_regex(text: &str, domain: &str) -> Parsed {
    let mut parsed = Parsed::default();
    let host_pattern = format!(
        r"(?i)(?:^|[^a-z0-9_.-])((?:[a-z0-9_](?:[a-z0-9_-]{{0,61}}[a-z0-9])?\.)*{})\b",
        regex::escape(domain)
    );
    let hosts = match Regex::new(&host_pattern) {
        Ok(re) => re,
        Err(e) => {
            parsed.issue(0, format!("cannot build hostname pattern for '{domain}': {e}"));
            return parsed;
        }
    };

    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        for m in ipv4_pattern().find_iter(line) {
            parsed.entries.push(RawEntry {
                line: line_no,
                ip: Some(m.as_str().to_string()),
                ..RawEntry::default()
            });
        }
        for m in hosts.captures_iter(line).filter_map(|c| c.get(1)) {
            if !continues_hostname(&line[m.end()..]) {
                parsed.entries.push(RawEntry::bare(line_no, m.as_str()));
            }
        }
    }
    parsed
}

/// Whether `rest` extends the hostname just matched, as in
/// `example.com-cdn.net` or `example.com.evil.net`.
fn continues_hostname(rest: &str) -> bool {
    let mut chars = rest.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '-' || c == '_' => true,
        Some('.') => chars.next().is_some_and(|c| c.is_ascii_alphanumeric()),
        _ => false,
    }
}
