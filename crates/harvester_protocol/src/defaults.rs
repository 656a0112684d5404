//! Canonical default values shared by the harvester and its tests.

pub const DEFAULT_SLEEP_SECS: u64 = 10;
pub const DEFAULT_PREVIEW_ROWS: usize = 10;
pub const DEFAULT_PARTITION_LINE_COUNT: usize = 100_000;
pub const AUTH_SCHEME: &str = "Harvester";
pub const CONFIG_ENDPOINT: &str = "config/";
pub const REPORT_ENDPOINT: &str = "report/";
pub const PARQUET_FILE_FIELD: &str = "parquet_file";
pub const VERSION_METADATA_KEY: &str = "harvester-version";
