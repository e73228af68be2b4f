use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::constants::{DEFAULT_PROCESSED_DIR, DEFAULT_RAW_DIR, SNAPSHOT_BATCH_SIZE};

#[derive(Debug, Parser)]
#[command(name = "price_transparency")]
#[command(about = "Normalize hospital price-transparency files into canonical Parquet snapshots")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Read every raw price file, normalize it and write one snapshot per file.
    Ingest(IngestArgs),
    /// Report row and null counts for every snapshot in a directory.
    Audit(AuditArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct IngestArgs {
    /// Directory holding raw .csv/.txt/.json/.xlsx/.xls files.
    #[arg(long, default_value = DEFAULT_RAW_DIR)]
    pub input_dir: PathBuf,

    /// Directory receiving <file-stem>.parquet snapshots.
    #[arg(long, default_value = DEFAULT_PROCESSED_DIR)]
    pub output_dir: PathBuf,

    /// Optional cap on data rows read per file (useful for demo runs).
    #[arg(long)]
    pub max_rows: Option<usize>,

    /// Files processed at once. 1 keeps the sequential file-at-a-time order.
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Rows per Parquet record batch.
    #[arg(long, default_value_t = SNAPSHOT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Run report path. Defaults to <output_dir>/ingest_report.json.
    #[arg(long)]
    pub report_json: Option<PathBuf>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AuditArgs {
    /// Directory holding snapshots written by `ingest`.
    #[arg(long, default_value = DEFAULT_PROCESSED_DIR)]
    pub snapshot_dir: PathBuf,

    /// Markdown report path. Defaults to <snapshot_dir>/snapshot_audit.md.
    #[arg(long)]
    pub output_md: Option<PathBuf>,
}
