use anyhow::{Context, Result, ensure};
use futures::{StreamExt, stream::FuturesUnordered};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::{debug, info, warn};

use crate::args::IngestArgs;
use crate::common::{file_name, file_stem, install_ctrlc_handler, now_unix_seconds, write_atomic};
use crate::constants::{INGEST_REPORT_FILE_NAME, SUPPORTED_EXTENSIONS};
use crate::reader::{file_extension, read_generic};
use crate::snapshot::write_snapshot;
use crate::unify::unify_record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Ok,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub file: String,
    pub status: FileStatus,
    pub rows: Option<usize>,
    pub snapshot: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub generated_at_unix: i64,
    pub input_dir: String,
    pub output_dir: String,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub interrupted: bool,
    pub files: Vec<FileOutcome>,
}

#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub rows: usize,
    pub snapshot: PathBuf,
}

/// Bookkeeping hospital label from a file name such as `2024_mercy_prices.csv`
/// (`mercy`). Names without an underscore use the whole stem.
pub fn hospital_label_from_file_name(path: &Path) -> Option<String> {
    let stem = file_stem(path)?;
    let label = stem
        .split('_')
        .nth(1)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(stem);
    Some(label.trim().to_string())
}

pub fn is_supported(path: &Path) -> bool {
    SUPPORTED_EXTENSIONS.contains(&file_extension(path).as_str())
}

pub fn snapshot_path(output_dir: &Path, input: &Path) -> PathBuf {
    let stem = file_stem(input).unwrap_or("snapshot");
    output_dir.join(format!("{stem}.parquet"))
}

/// Reads, normalizes and snapshots a single file. Nothing is written unless
/// every step succeeds.
pub fn process_file(
    path: &Path,
    output_dir: &Path,
    max_rows: Option<usize>,
    batch_size: usize,
) -> Result<ProcessedFile> {
    let (table, mut metadata) =
        read_generic(path, max_rows).with_context(|| format!("Failed reading {}", path.display()))?;
    let raw_rows = table.len();
    if table.is_empty() {
        warn!("{} has a header but no data rows", path.display());
    }

    if !metadata.contains_key("hospital_name") && table.column_absent_or_null("hospital_name") {
        if let Some(label) = hospital_label_from_file_name(path) {
            metadata.insert("hospital_name".to_string(), label);
        }
    }

    let source_file = file_name(path);
    let normalized = unify_record(table, &source_file, &metadata);
    ensure!(
        normalized.row_count == raw_rows,
        "Normalization changed the row count of {} ({} -> {})",
        path.display(),
        raw_rows,
        normalized.row_count
    );

    debug!(
        file = %source_file,
        rows = raw_rows,
        hospital = normalized.text("hospital_name", 0).unwrap_or("-"),
        "normalized"
    );

    let snapshot = snapshot_path(output_dir, path);
    write_snapshot(&snapshot, &normalized, batch_size)
        .with_context(|| format!("Failed writing snapshot {}", snapshot.display()))?;
    Ok(ProcessedFile {
        rows: raw_rows,
        snapshot,
    })
}

/// Regular files directly inside `input_dir`, sorted by name.
pub fn list_input_files(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(input_dir)
        .with_context(|| format!("Failed listing {}", input_dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed listing {}", input_dir.display()))?;
        let path = entry.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn warn_on_shared_stems(files: &[PathBuf]) {
    let mut by_stem: HashMap<&str, Vec<&Path>> = HashMap::new();
    for path in files {
        if let Some(stem) = file_stem(path) {
            by_stem.entry(stem).or_default().push(path);
        }
    }
    for (stem, paths) in by_stem {
        if paths.len() > 1 {
            warn!(
                "{} input files share the stem {stem:?}; {stem}.parquet will hold whichever finishes last",
                paths.len()
            );
        }
    }
}

fn apply_ingest_progress_style(progress: &ProgressBar) {
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} {prefix:.bold} [{elapsed_precise}] [{bar:32.cyan/blue}] \
{pos}/{len} ({percent}%) eta {eta_precise} {msg}",
    ) {
        progress.set_style(style.progress_chars("=> "));
    }
}

async fn process_in_background(
    path: PathBuf,
    output_dir: PathBuf,
    max_rows: Option<usize>,
    batch_size: usize,
) -> (PathBuf, Result<ProcessedFile>) {
    let task_path = path.clone();
    let handle = tokio::task::spawn_blocking(move || {
        process_file(&task_path, &output_dir, max_rows, batch_size)
    });
    let result = match handle.await {
        Ok(result) => result,
        Err(err) => Err(anyhow::Error::new(err)
            .context(format!("Worker for {} did not complete", path.display()))),
    };
    (path, result)
}

pub async fn run(opts: IngestArgs) -> Result<IngestReport> {
    ensure!(
        opts.input_dir.is_dir(),
        "Input directory {} does not exist",
        opts.input_dir.display()
    );
    fs::create_dir_all(&opts.output_dir)
        .with_context(|| format!("Failed creating {}", opts.output_dir.display()))?;

    info!("input_dir={}", opts.input_dir.display());
    info!("output_dir={}", opts.output_dir.display());
    if let Some(max_rows) = opts.max_rows {
        info!("max_rows={max_rows} (rows past the cap are not read)");
    }

    let mut outcomes = Vec::new();
    let mut supported = Vec::new();
    for path in list_input_files(&opts.input_dir)? {
        if is_supported(&path) {
            supported.push(path);
        } else {
            info!("Skipping unsupported file: {}", path.display());
            outcomes.push(FileOutcome {
                file: file_name(&path),
                status: FileStatus::Skipped,
                rows: None,
                snapshot: None,
                error: None,
            });
        }
    }
    warn_on_shared_stems(&supported);

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(Arc::clone(&shutdown_requested));

    let progress = ProgressBar::new(supported.len() as u64);
    progress.set_prefix("INGEST");
    apply_ingest_progress_style(&progress);
    progress.enable_steady_tick(Duration::from_millis(250));

    let concurrency = opts.concurrency.max(1);
    let mut queue = supported.into_iter();
    let mut in_flight = FuturesUnordered::new();
    let mut interrupted = false;

    for _ in 0..concurrency {
        if let Some(path) = queue.next() {
            in_flight.push(process_in_background(
                path,
                opts.output_dir.clone(),
                opts.max_rows,
                opts.batch_size,
            ));
        }
    }

    while let Some((path, result)) = in_flight.next().await {
        let name = file_name(&path);
        match result {
            Ok(done) => {
                info!(
                    "Wrote {} rows from {} to {}",
                    done.rows,
                    name,
                    done.snapshot.display()
                );
                outcomes.push(FileOutcome {
                    file: name.clone(),
                    status: FileStatus::Ok,
                    rows: Some(done.rows),
                    snapshot: Some(done.snapshot.display().to_string()),
                    error: None,
                });
            }
            Err(err) => {
                warn!("Failed processing {}: {err:#}", path.display());
                outcomes.push(FileOutcome {
                    file: name.clone(),
                    status: FileStatus::Failed,
                    rows: None,
                    snapshot: None,
                    error: Some(format!("{err:#}")),
                });
            }
        }
        progress.inc(1);
        progress.set_message(name);

        if shutdown_requested.load(Ordering::SeqCst) {
            interrupted = true;
            continue;
        }
        if let Some(next) = queue.next() {
            in_flight.push(process_in_background(
                next,
                opts.output_dir.clone(),
                opts.max_rows,
                opts.batch_size,
            ));
        }
    }
    progress.finish_and_clear();

    if interrupted {
        let not_started = queue.len();
        warn!("Interrupted: {not_started} files were not started");
    }

    outcomes.sort_by(|a, b| a.file.cmp(&b.file));
    let count = |status: FileStatus| outcomes.iter().filter(|o| o.status == status).count();
    let report = IngestReport {
        generated_at_unix: now_unix_seconds(),
        input_dir: opts.input_dir.display().to_string(),
        output_dir: opts.output_dir.display().to_string(),
        processed: count(FileStatus::Ok),
        failed: count(FileStatus::Failed),
        skipped: count(FileStatus::Skipped),
        interrupted,
        files: outcomes,
    };

    let report_path = opts
        .report_json
        .clone()
        .unwrap_or_else(|| opts.output_dir.join(INGEST_REPORT_FILE_NAME));
    let json = serde_json::to_string_pretty(&report).context("Failed serializing ingest report")?;
    write_atomic(&report_path, &json)?;

    info!(
        "Done. processed={} failed={} skipped={} report={}",
        report.processed,
        report.failed,
        report.skipped,
        report_path.display()
    );
    Ok(report)
}
