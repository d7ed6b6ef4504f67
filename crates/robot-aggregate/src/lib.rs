//! Robot Aggregate - From raw tool output to canonical records.
//!
//! Every tool writes its findings in its own shape. This crate parses each
//! succeeded job's output file with the parser named by the tool's
//! [`OutputFormat`](robot_core::OutputFormat), normalizes hostnames and IPs,
//! drops out-of-scope names, and merges everything into one deduplicated,
//! sorted set of [`DiscoveryRecord`](robot_core::DiscoveryRecord)s.
//!
//! Bad lines never fail a tool: they are skipped and reported as
//! [`ParseWarning`]s. Aggregation performs no network lookups and keeps no
//! state between calls, so replaying the same outcomes gives the same records.
//!
//! # Example
//!
//! ```rust
//! use robot_aggregate::{merge_records, Aggregator};
//! use robot_core::{OutputFormat, ToolId};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let amass = ToolId::new("amass")?;
//! let knock = ToolId::new("knock")?;
//! let aggregator = Aggregator::new("example.com")?.with_format(amass.clone(), OutputFormat::IpHost);
//!
//! let (mut records, _) = aggregator.parse_text(&amass, "1.2.3.4,a.example.com\n", None);
//! let (more, _) = aggregator.parse_text(&knock, "a.example.com\n", None);
//! records.extend(more);
//!
//! let merged = merge_records(records);
//! assert_eq!(merged.len(), 1);
//! assert_eq!(merged[0].ip.as_deref(), Some("1.2.3.4"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod aggregator;
pub mod error;
pub mod merge;
pub mod parse;

// Re-export commonly used types
pub use aggregator::{Aggregation, Aggregator, ParseWarning};
pub use error::{AggregateError, Result};
pub use merge::{merge_records, reconcile};
