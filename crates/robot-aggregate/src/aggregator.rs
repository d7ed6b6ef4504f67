//! Turns job outcomes into a deduplicated record set.

use crate::error::{AggregateError, Result};
use crate::merge::merge_records;
use crate::parse::{parse, RawEntry};
use robot_core::{
    is_in_scope, normalize_domain, normalize_hostname, normalize_ip, DiscoveryRecord,
    OutputFormat, ToolId,
};
use robot_supervisor::JobOutcome;
use robot_tools::ToolSpec;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A non-fatal problem found while reading one tool's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseWarning {
    /// Tool whose output contained the problem
    pub tool: ToolId,
    /// Output file, if the text came from one
    pub path: Option<PathBuf>,
    /// 1-based line, 0 for problems with the whole file
    pub line: usize,
    /// What was wrong
    pub reason: String,
}

impl fmt::Display for ParseWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tool)?;
        if let Some(path) = &self.path {
            write!(f, ": {}", path.display())?;
        }
        if self.line > 0 {
            write!(f, ":{}", self.line)?;
        }
        write!(f, ": {}", self.reason)
    }
}

/// Records and warnings produced by one aggregation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregation {
    /// Merged records, sorted
    pub records: Vec<DiscoveryRecord>,
    /// Everything that was skipped along the way
    pub warnings: Vec<ParseWarning>,
}

/// Parses tool output for one target domain.
#[derive(Debug, Clone)]
pub struct Aggregator {
    domain: String,
    formats: HashMap<ToolId, OutputFormat>,
}

impl Aggregator {
    /// Aggregator for `domain`. Every tool is parsed as [`OutputFormat::Hosts`]
    /// unless told otherwise.
    pub fn new(domain: &str) -> Result<Self> {
        let domain =
            normalize_domain(domain).map_err(|e| AggregateError::InvalidDomain(e.to_string()))?;
        Ok(Self {
            domain,
            formats: HashMap::new(),
        })
    }

    /// Aggregator using each spec's declared output format.
    pub fn from_specs<'a>(
        domain: &str,
        specs: impl IntoIterator<Item = &'a ToolSpec>,
    ) -> Result<Self> {
        let mut aggregator = Self::new(domain)?;
        for spec in specs {
            aggregator.formats.insert(spec.id.clone(), spec.format);
        }
        Ok(aggregator)
    }

    /// Parse `tool`'s output as `format`.
    #[must_use]
    pub fn with_format(mut self, tool: ToolId, format: OutputFormat) -> Self {
        self.formats.insert(tool, format);
        self
    }

    /// Normalized target domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Output format used for `tool`.
    #[must_use]
    pub fn format_for(&self, tool: &ToolId) -> OutputFormat {
        self.formats.get(tool).copied().unwrap_or_default()
    }

    /// Aggregate the output files of every succeeded outcome.
    ///
    /// Failed, timed-out and cancelled jobs, and succeeded jobs without an
    /// output file, contribute nothing. Calling this twice with the same
    /// outcomes and unchanged files returns the same result.
    #[must_use]
    pub fn aggregate(&self, outcomes: &[JobOutcome]) -> Aggregation {
        let files: Vec<(&ToolId, &Path)> = outcomes
            .iter()
            .filter_map(|outcome| match (&outcome.output_path, outcome.is_success()) {
                (Some(path), true) => Some((&outcome.tool_id, path.as_path())),
                _ => {
                    debug!(tool = %outcome.tool_id, status = %outcome.status, "no output to aggregate");
                    None
                }
            })
            .collect();

        self.aggregate_files(files)
    }

    /// Aggregate a list of `(tool, output file)` pairs, in order.
    ///
    /// An unreadable file becomes a warning for its tool; the others are
    /// still aggregated.
    pub fn aggregate_files<'a, I>(&self, files: I) -> Aggregation
    where
        I: IntoIterator<Item = (&'a ToolId, &'a Path)>,
    {
        let mut records = Vec::new();
        let mut warnings = Vec::new();

        for (tool, path) in files {
            match self.parse_file(tool, path) {
                Ok((found, issues)) => {
                    records.extend(found);
                    warnings.extend(issues);
                }
                Err(e) => {
                    warn!(tool = %tool, error = %e, "skipping unreadable output");
                    warnings.push(ParseWarning {
                        tool: tool.clone(),
                        path: Some(path.to_path_buf()),
                        line: 0,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let records = merge_records(records);
        info!(
            domain = %self.domain,
            records = records.len(),
            warnings = warnings.len(),
            "aggregation complete"
        );
        Aggregation { records, warnings }
    }

    /// Parse one output file.
    pub fn parse_file(
        &self,
        tool: &ToolId,
        path: &Path,
    ) -> Result<(Vec<DiscoveryRecord>, Vec<ParseWarning>)> {
        let bytes = std::fs::read(path).map_err(|source| AggregateError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let text = String::from_utf8_lossy(&bytes);
        Ok(self.parse_text(tool, &text, Some(path)))
    }

    /// Parse output text as written by `tool`.
    ///
    /// Records are normalized and scope-checked but not yet merged.
    #[must_use]
    pub fn parse_text(
        &self,
        tool: &ToolId,
        text: &str,
        path: Option<&Path>,
    ) -> (Vec<DiscoveryRecord>, Vec<ParseWarning>) {
        let format = self.format_for(tool);
        let parsed = parse(format, text, &self.domain);

        let warning = |line: usize, reason: String| ParseWarning {
            tool: tool.clone(),
            path: path.map(Path::to_path_buf),
            line,
            reason,
        };

        let mut warnings: Vec<ParseWarning> = parsed
            .issues
            .into_iter()
            .map(|issue| warning(issue.line, issue.reason))
            .collect();
        let mut records = Vec::with_capacity(parsed.entries.len());

        for entry in parsed.entries {
            let line = entry.line;
            let (record, problems) = self.normalize_entry(tool, entry);
            warnings.extend(problems.into_iter().map(|reason| warning(line, reason)));
            records.extend(record);
        }

        for w in &warnings {
            debug!(tool = %w.tool, line = w.line, reason = %w.reason, "parse warning");
        }
        info!(
            tool = %tool,
            format = format.as_str(),
            records = records.len(),
            warnings = warnings.len(),
            "parsed tool output"
        );

        (records, warnings)
    }

    /// Validate and normalize one raw entry.
    ///
    /// Invalid fields are dropped with a reason; the entry survives if the
    /// other field is usable. An out-of-scope hostname drops the whole entry.
    fn normalize_entry(
        &self,
        tool: &ToolId,
        entry: RawEntry,
    ) -> (Option<DiscoveryRecord>, Vec<String>) {
        let mut problems = Vec::new();
        let mut ip = None;
        let mut hostname = None;

        if let Some(raw) = entry.ip {
            match normalize_ip(&raw) {
                Some(addr) => ip = Some(addr),
                None => problems.push(format!("invalid IP address '{raw}'")),
            }
        }

        if let Some(raw) = entry.hostname {
            if let Some(host) = normalize_hostname(&raw) {
                if !is_in_scope(&host, &self.domain) {
                    problems.push(format!("hostname '{host}' is outside {}", self.domain));
                    return (None, problems);
                }
                hostname = Some(host);
            } else if let Some(addr) = normalize_ip(&raw).filter(|_| ip.is_none()) {
                ip = Some(addr);
            } else {
                problems.push(format!("invalid hostname '{raw}'"));
            }
        }

        let headers = entry.headers.filter(|h| !h.trim().is_empty());
        let record = DiscoveryRecord::new(
            &self.domain,
            ip.as_deref(),
            hostname.as_deref(),
            Some(tool.clone()),
        )
        .map(|r| r.with_headers(headers));

        (record, problems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(s: &str) -> ToolId {
        ToolId::new(s).unwrap()
    }

    #[test]
    fn test_new_normalizes_domain() {
        assert_eq!(Aggregator::new("Example.COM.").unwrap().domain(), "example.com");
        assert!(matches!(
            Aggregator::new("not a domain"),
            Err(AggregateError::InvalidDomain(_))
        ));
    }

    #[test]
    fn test_normalization_and_scope() {
        let aggregator = Aggregator::new("example.com").unwrap();
        let text = "A.Example.com.\nevil.org\n10.0.0.1\nbad_host!.example.com\n";
        let (records, warnings) = aggregator.parse_text(&tool("subfinder"), text, None);

        let found: Vec<_> = records
            .iter()
            .map(|r| (r.ip.as_deref(), r.hostname.as_deref()))
            .collect();
        assert_eq!(
            found,
            vec![(None, Some("a.example.com")), (Some("10.0.0.1"), None)]
        );
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].line, 2);
        assert!(warnings[0].reason.contains("outside"));
        assert_eq!(warnings[1].line, 4);
    }

    #[test]
    fn test_invalid_ip_keeps_hostname() {
        let aggregator =
            Aggregator::new("example.com").unwrap().with_format(tool("knock"), OutputFormat::Csv);
        let text = "ip,hostname\n300.1.1.1,www.example.com\n";
        let (records, warnings) = aggregator.parse_text(&tool("knock"), text, None);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ip, None);
        assert_eq!(records[0].hostname.as_deref(), Some("www.example.com"));
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].reason.contains("300.1.1.1"));
    }

    #[test]
    fn test_warning_display() {
        let w = ParseWarning {
            tool: tool("amass"),
            path: Some(PathBuf::from("/out/amass.txt")),
            line: 3,
            reason: "invalid hostname 'x y'".to_string(),
        };
        assert_eq!(w.to_string(), "amass: /out/amass.txt:3: invalid hostname 'x y'");
    }
}
