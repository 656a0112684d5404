//! Harvester
//!
//! Watches monitored directories for instrument data files and negotiates
//! each one with the registry:
//!
//! - [`harvest`]: the loop that scans monitored paths and schedules work
//! - [`machine`]: the per-file negotiation state machine
//! - [`client`]: the registry client and its retry policy
//! - [`parser`]: pluggable parsers producing rows plus metadata
//!
//! Column mapping and Parquet output live in `harvester_mapping`; wire
//! types in `harvester_protocol`.

pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod harvest;
pub mod locks;
pub mod machine;
pub mod parser;
pub mod scan;
pub mod settings;
pub mod tracker;

pub use cancel::CancellationToken;
pub use client::{ClientError, FileKey, HttpAuthority, RemoteAuthority, RetryPolicy, Retrying};
pub use config::{HarvesterConfig, RetryConfig};
pub use error::{HarvestError, Result};
pub use harvest::{CycleReport, Harvester};
pub use locks::{PathLockGuard, PathLocks};
pub use machine::{FileNegotiation, NegotiationContext, NegotiationOutcome, NegotiationState};
pub use parser::{InputParser, ParseError, ParsedInput, ParserRegistry};
pub use scan::{scan_monitored_path, DiscoveredFile, ScanError};
pub use settings::{RuntimeSettings, SettingsCache};
pub use tracker::{FileTracker, HarvestedFile};
