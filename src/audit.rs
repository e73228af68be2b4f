use anyhow::{Context, Result, ensure};
use duckdb::Connection;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

use crate::args::AuditArgs;
use crate::common::{file_name, now_unix_seconds, sql_escape_path, write_atomic};
use crate::constants::AUDIT_REPORT_FILE_NAME;
use crate::schema::CANONICAL_COLUMNS;

#[derive(Debug, Clone)]
struct ColumnAuditRow {
    column: String,
    null_count: i64,
}

#[derive(Debug, Clone)]
struct SnapshotAuditSection {
    label: String,
    rows_total: i64,
    canonical_columns: bool,
    columns: Vec<ColumnAuditRow>,
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('\"', "\"\""))
}

fn list_snapshots(snapshot_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(snapshot_dir)
        .with_context(|| format!("Failed listing {}", snapshot_dir.display()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed listing {}", snapshot_dir.display()))?
            .path();
        let is_parquet = path
            .extension()
            .and_then(|x| x.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"));
        if path.is_file() && is_parquet {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn load_column_names(conn: &Connection, view_name: &str) -> Result<Vec<String>> {
    let query = format!("SELECT name FROM pragma_table_info('{view_name}') ORDER BY cid");
    let mut stmt = conn
        .prepare(&query)
        .with_context(|| format!("Failed preparing DuckDB pragma_table_info for {view_name}"))?;
    let mut rows = stmt
        .query([])
        .with_context(|| format!("Failed querying DuckDB pragma_table_info for {view_name}"))?;
    let mut names = Vec::new();
    while let Some(row) = rows
        .next()
        .with_context(|| format!("Failed iterating pragma_table_info rows for {view_name}"))?
    {
        let name: String = row.get(0).context("Failed reading column name")?;
        names.push(name);
    }
    Ok(names)
}

fn audit_snapshot(conn: &Connection, path: &Path, view_name: &str) -> Result<SnapshotAuditSection> {
    let escaped = sql_escape_path(path);
    conn.execute(&format!("DROP VIEW IF EXISTS {view_name}"), [])
        .with_context(|| format!("Failed dropping DuckDB view {view_name}"))?;
    conn.execute(
        &format!("CREATE VIEW {view_name} AS SELECT * FROM read_parquet('{escaped}')"),
        [],
    )
    .with_context(|| format!("Failed creating DuckDB view for {}", path.display()))?;

    let columns = load_column_names(conn, view_name)?;
    let mut parts = Vec::with_capacity(1 + columns.len());
    parts.push("COUNT(*)".to_string());
    for col in &columns {
        let ident = quote_ident(col);
        parts.push(format!(
            "COALESCE(SUM(CASE WHEN {ident} IS NULL THEN 1 ELSE 0 END), 0)"
        ));
    }
    let query = format!("SELECT {} FROM {view_name}", parts.join(", "));
    let mut stmt = conn
        .prepare(&query)
        .context("Failed preparing DuckDB audit aggregation query")?;
    let mut rows = stmt
        .query([])
        .context("Failed running DuckDB audit aggregation query")?;
    let row = rows
        .next()
        .context("Failed reading DuckDB audit row")?
        .context("DuckDB audit query returned no rows")?;

    let rows_total: i64 = row.get(0).context("Failed reading rows_total")?;
    let canonical_columns = columns.iter().map(String::as_str).eq(CANONICAL_COLUMNS.iter().copied());
    let mut audits = Vec::with_capacity(columns.len());
    for (idx, col) in columns.into_iter().enumerate() {
        let null_count: i64 = row
            .get(1 + idx)
            .with_context(|| format!("Failed reading null_count for {col}"))?;
        audits.push(ColumnAuditRow {
            column: col,
            null_count,
        });
    }

    Ok(SnapshotAuditSection {
        label: file_name(path),
        rows_total,
        canonical_columns,
        columns: audits,
    })
}

fn fmt_pct(numer: i64, denom: i64) -> String {
    if denom <= 0 {
        return "0.00%".to_string();
    }
    format!("{:.2}%", (numer as f64) * 100.0 / (denom as f64))
}

fn render_section(section: &SnapshotAuditSection) -> String {
    let mut out = String::new();
    out.push_str(&format!("## `{}`\n\n", section.label.replace('`', "\\`")));
    out.push_str(&format!("- rows: {}\n", section.rows_total));
    out.push_str(&format!(
        "- canonical columns: {}\n\n",
        if section.canonical_columns { "yes" } else { "no" }
    ));
    out.push_str("| column | rows_total | null_count | null_pct |\n");
    out.push_str("| --- | ---: | ---: | ---: |\n");
    for row in &section.columns {
        out.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            row.column,
            section.rows_total,
            row.null_count,
            fmt_pct(row.null_count, section.rows_total),
        ));
    }
    out
}

fn render_report(snapshot_dir: &Path, sections: &[SnapshotAuditSection]) -> String {
    let mut out = String::new();
    out.push_str("# Snapshot audit\n\n");
    out.push_str(&format!("- snapshot_dir: `{}`\n", snapshot_dir.display()));
    out.push_str(&format!("- generated_at_unix: {}\n", now_unix_seconds()));
    out.push_str(&format!("- snapshots: {}\n\n", sections.len()));
    for section in sections {
        out.push_str(&render_section(section));
        out.push('\n');
    }
    out
}

/// Audits every snapshot in `snapshot_dir` and writes a Markdown report.
/// Returns the report path.
pub fn run(opts: AuditArgs) -> Result<PathBuf> {
    ensure!(
        opts.snapshot_dir.is_dir(),
        "Snapshot directory {} does not exist",
        opts.snapshot_dir.display()
    );
    let snapshots = list_snapshots(&opts.snapshot_dir)?;
    info!(
        "Auditing {} snapshots in {}",
        snapshots.len(),
        opts.snapshot_dir.display()
    );

    let conn = Connection::open_in_memory().context("Failed opening in-memory DuckDB")?;
    let mut sections = Vec::with_capacity(snapshots.len());
    for (idx, path) in snapshots.iter().enumerate() {
        let section = audit_snapshot(&conn, path, &format!("snapshot_{idx}"))?;
        if !section.canonical_columns {
            tracing::warn!("{} does not carry the canonical column set", section.label);
        }
        sections.push(section);
    }

    let output_md = opts
        .output_md
        .clone()
        .unwrap_or_else(|| opts.snapshot_dir.join(AUDIT_REPORT_FILE_NAME));
    write_atomic(&output_md, &render_report(&opts.snapshot_dir, &sections))?;
    info!("Wrote snapshot audit to {}", output_md.display());
    Ok(output_md)
}
