//! Shared types used across the robot engine.
//!
//! This module defines common newtypes and enums that provide type safety
//! and clear domain modeling.

use crate::error::RobotError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Newtype for tool identifiers with validation.
///
/// Tool IDs must be lowercase alphanumeric with hyphens or underscores,
/// 2-64 characters. The ID doubles as the default output subdirectory, so it
/// must never contain path separators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ToolId(String);

impl ToolId {
    /// Create a new `ToolId` from a string.
    ///
    /// # Errors
    /// Returns error if the ID doesn't match the required format.
    pub fn new(id: impl Into<String>) -> Result<Self, RobotError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), RobotError> {
        static TOOL_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = TOOL_REGEX.get_or_init(|| {
            Regex::new(r"^[a-z0-9][a-z0-9_-]{0,62}[a-z0-9]$").expect("valid regex")
        });

        if id.len() < 2 || id.len() > 64 {
            return Err(RobotError::Validation(format!(
                "invalid tool ID: must be 2-64 characters, got {} characters",
                id.len()
            )));
        }

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(RobotError::Validation(format!(
                "invalid tool ID: must be lowercase alphanumeric with hyphens or underscores, got '{id}'"
            )))
        }
    }
}

impl fmt::Display for ToolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for ToolId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

impl FromStr for ToolId {
    type Err = RobotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Shape of a tool's raw output file.
///
/// Each variant names exactly one parser; the set is closed so an unknown
/// format in the registry fails configuration loading instead of failing
/// when the output is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// One hostname per line
    #[default]
    Hosts,
    /// `ip,hostname` pairs, one per line
    IpHost,
    /// CSV with a header row naming the ip/hostname columns
    Csv,
    /// JSON array or JSON lines of objects
    Json,
    /// Free text; IPs and in-scope hostnames are extracted by pattern
    Regex,
}

impl OutputFormat {
    /// All known formats, in declaration order.
    pub const ALL: [Self; 5] = [Self::Hosts, Self::IpHost, Self::Csv, Self::Json, Self::Regex];

    /// Registry name of the format.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hosts => "hosts",
            Self::IpHost => "ip-host",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Regex => "regex",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = RobotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| RobotError::Validation(format!("unknown output format '{s}'")))
    }
}
