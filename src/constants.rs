pub const DEFAULT_RAW_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/raw");
pub const DEFAULT_PROCESSED_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/processed");

pub const INGEST_REPORT_FILE_NAME: &str = "ingest_report.json";
pub const AUDIT_REPORT_FILE_NAME: &str = "snapshot_audit.md";

/// Lines (or spreadsheet rows) scanned when looking for the tabular header.
pub const HEADER_PREVIEW_LINES: usize = 25;
pub const SHEET_PREVIEW_COLUMNS: usize = 50;
/// Metadata extraction always sees at least this many preview lines.
pub const METADATA_MIN_LINES: usize = 5;

pub const SNAPSHOT_BATCH_SIZE: usize = 8192;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "txt", "json", "xlsx", "xls"];

/// Case-insensitive substrings that mark a line as the price-list header.
pub const KNOWN_HEADER_TOKENS: &[&str] = &[
    "description",
    "code",
    "code|1",
    "code|1|type",
    "standard_charge|gross",
    "standard_charge|discounted_cash",
    "payer_name",
    "plan_name",
    "billing_class",
    "setting",
    "modifiers",
];
