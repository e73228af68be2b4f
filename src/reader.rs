use anyhow::{Context, Result, bail, ensure};
use calamine::{Data, Range, Reader, open_workbook_auto};
use serde_json::{Map, Value};
use std::{collections::HashMap, fs, path::Path};
use tracing::{debug, warn};

use crate::columns::{normalize_column_name, normalize_header};
use crate::constants::{HEADER_PREVIEW_LINES, SHEET_PREVIEW_COLUMNS};
use crate::locate::{detect_header_line, extract_metadata, metadata_window, read_preview_lines};
use crate::table::{Metadata, RawTable, cell};

/// Lowercased extension of `path`, empty when it has none.
pub fn file_extension(path: &Path) -> String {
    path.extension()
        .and_then(|x| x.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Reads one price file into a string table plus whatever hospital metadata
/// could be found around it. Column labels come back normalized.
pub fn read_generic(path: &Path, max_rows: Option<usize>) -> Result<(RawTable, Metadata)> {
    match file_extension(path).as_str() {
        "csv" | "txt" => read_delimited(path, max_rows),
        "json" => read_json(path, max_rows),
        "xlsx" | "xls" => read_spreadsheet(path, max_rows),
        other => bail!(
            "Unsupported extension {:?} for {}. Use .csv, .txt, .json, .xlsx or .xls",
            other,
            path.display()
        ),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseMode {
    Strict,
    Lenient,
}

fn sniff_delimiter(path: &Path, header_line: &str) -> u8 {
    if file_extension(path) == "txt" && header_line.contains('\t') && !header_line.contains(',') {
        b'\t'
    } else {
        b','
    }
}

/// Text starting at line `n` (0-based).
fn skip_lines(text: &str, n: usize) -> &str {
    if n == 0 {
        return text;
    }
    match text.match_indices('\n').nth(n - 1) {
        Some((pos, _)) => &text[pos + 1..],
        None => "",
    }
}

fn parse_delimited(
    body: &str,
    delimiter: u8,
    max_rows: Option<usize>,
    mode: ParseMode,
) -> Result<(RawTable, usize)> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(body.as_bytes());

    let headers = reader.headers().context("Failed reading header row")?.clone();
    ensure!(!headers.is_empty(), "Header row is empty");
    let mut table = RawTable::new(normalize_header(headers.iter()));
    let width = table.columns.len();

    let mut skipped = 0usize;
    for (idx, result) in reader.records().enumerate() {
        if max_rows.is_some_and(|max| table.len() >= max) {
            break;
        }
        // +2: one for the header, one for 1-based line numbers.
        let line = idx + 2;
        match result {
            Ok(record) if record.len() <= width => {
                table.push_row(record.iter().map(cell).collect());
            }
            Ok(record) => {
                if mode == ParseMode::Strict {
                    bail!(
                        "Row {line} has {} fields but the header has {width}",
                        record.len()
                    );
                }
                skipped += 1;
            }
            Err(err) => {
                if mode == ParseMode::Strict {
                    return Err(err).with_context(|| format!("Failed parsing row {line}"));
                }
                skipped += 1;
            }
        }
    }
    Ok((table, skipped))
}

fn read_delimited(path: &Path, max_rows: Option<usize>) -> Result<(RawTable, Metadata)> {
    let preview = read_preview_lines(path, HEADER_PREVIEW_LINES)?;
    let header_idx = detect_header_line(&preview);
    let metadata = extract_metadata(metadata_window(&preview, header_idx));
    debug!(path = %path.display(), header_idx, metadata_fields = metadata.len(), "located header");

    let bytes = fs::read(path).with_context(|| format!("Failed reading {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    let body = skip_lines(&text, header_idx);
    let delimiter = sniff_delimiter(path, &preview[header_idx]);

    let table = match parse_delimited(body, delimiter, max_rows, ParseMode::Strict) {
        Ok((table, _)) => table,
        Err(err) => {
            warn!(
                "Strict parse failed for {} ({err:#}); retrying and skipping bad rows",
                path.display()
            );
            let (table, skipped) = parse_delimited(body, delimiter, max_rows, ParseMode::Lenient)
                .with_context(|| format!("Failed parsing {}", path.display()))?;
            warn!("Skipped {skipped} malformed rows in {}", path.display());
            table
        }
    };
    Ok((table, metadata))
}

fn json_cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => cell(s),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

fn flatten_object(prefix: &str, object: &Map<String, Value>, out: &mut Vec<(String, Option<String>)>) {
    for (key, value) in object {
        let key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(inner) if !inner.is_empty() => flatten_object(&key, inner, out),
            other => out.push((key, json_cell(other))),
        }
    }
}

/// Builds a table from JSON records. Columns are the union of keys in
/// first-seen order; nested objects become dotted keys before normalization.
fn records_to_table<'a, I>(records: I) -> RawTable
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut raw_columns: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut rows: Vec<Vec<Option<String>>> = Vec::new();

    for record in records {
        let mut fields = Vec::new();
        match record {
            Value::Object(object) => flatten_object("", object, &mut fields),
            other => fields.push(("value".to_string(), json_cell(other))),
        }

        let mut row = vec![None; raw_columns.len()];
        for (key, value) in fields {
            let idx = *positions.entry(key.clone()).or_insert_with(|| {
                raw_columns.push(key);
                raw_columns.len() - 1
            });
            if idx >= row.len() {
                row.resize(idx + 1, None);
            }
            row[idx] = value;
        }
        rows.push(row);
    }

    let mut table = RawTable::new(normalize_header(&raw_columns));
    for row in rows {
        table.push_row(row);
    }
    table
}

fn metadata_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter(|item| !item.is_array() && !item.is_object())
                .filter_map(metadata_text)
                .collect();
            Some(parts.join("; "))
        }
        Value::Null | Value::Object(_) => None,
    };
    text.filter(|s| !s.is_empty())
}

/// Hospital fields that sit next to the record list in a JSON envelope.
fn envelope_metadata(object: &Map<String, Value>, record_key: &str) -> Metadata {
    let mut meta = Metadata::new();
    for (key, value) in object {
        if key == record_key {
            continue;
        }
        match value {
            Value::Object(inner) => {
                for (child_key, child) in inner {
                    if let Some(text) = metadata_text(child) {
                        meta.entry(normalize_column_name(child_key)).or_insert(text);
                    }
                }
            }
            other => {
                if let Some(text) = metadata_text(other) {
                    meta.insert(normalize_column_name(key), text);
                }
            }
        }
    }
    meta
}

/// Key of the list holding the charge records: the first list of objects,
/// else the first list of anything.
fn record_list_key(object: &Map<String, Value>) -> Option<&str> {
    let lists = || {
        object
            .iter()
            .filter_map(|(k, v)| v.as_array().map(|items| (k.as_str(), items)))
    };
    lists()
        .find(|(_, items)| items.iter().any(Value::is_object))
        .or_else(|| lists().next())
        .map(|(key, _)| key)
}

fn json_document(document: &Value) -> Result<(RawTable, Metadata)> {
    match document {
        Value::Object(object) => match record_list_key(object) {
            Some(key) => {
                let records = object[key].as_array().map(Vec::as_slice).unwrap_or_default();
                Ok((records_to_table(records), envelope_metadata(object, key)))
            }
            None => Ok((records_to_table([document]), Metadata::new())),
        },
        Value::Array(records) => Ok((records_to_table(records), Metadata::new())),
        other => bail!("Unsupported JSON layout: top-level value is {other}"),
    }
}

fn read_ndjson(text: &str) -> Result<RawTable> {
    let mut records = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: Value = serde_json::from_str(line)
            .with_context(|| format!("Invalid JSON record on line {}", idx + 1))?;
        ensure!(
            record.is_object(),
            "Line {} is not a JSON object",
            idx + 1
        );
        records.push(record);
    }
    ensure!(!records.is_empty(), "No JSON records found");
    Ok(records_to_table(&records))
}

fn read_json(path: &Path, max_rows: Option<usize>) -> Result<(RawTable, Metadata)> {
    let bytes = fs::read(path).with_context(|| format!("Failed reading {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    let text = text.trim();

    let (mut table, metadata) = match serde_json::from_str::<Value>(text) {
        Ok(document) => json_document(&document)
            .with_context(|| format!("Failed reading JSON {}", path.display()))?,
        Err(doc_err) => {
            debug!(
                "{} is not a single JSON document ({doc_err}); trying newline-delimited records",
                path.display()
            );
            let table = read_ndjson(text).with_context(|| {
                format!(
                    "Failed parsing {} as JSON ({doc_err}) or newline-delimited JSON",
                    path.display()
                )
            })?;
            (table, Metadata::new())
        }
    };
    table.truncate(max_rows);
    Ok((table, metadata))
}

/// Text form of a sheet cell. Date-formatted cells render as
/// `YYYY-MM-DD HH:MM:SS` rather than their Excel serial number.
fn sheet_cell_text(value: &Data) -> String {
    match value {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::DateTime(dt) if !dt.is_duration() => match dt.as_datetime() {
            Some(naive) => naive.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => format!("{value}"),
        },
        other => format!("{other}"),
    }
}

/// Renders a sheet row as one CSV line so the text heuristics apply unchanged.
fn render_sheet_row(row: &[Data]) -> String {
    row.iter()
        .take(SHEET_PREVIEW_COLUMNS)
        .map(|value| {
            let text = sheet_cell_text(value);
            if text.contains([',', '"', '\n']) {
                format!("\"{}\"", text.replace('"', "\"\""))
            } else {
                text
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn locate_sheet_header(range: &Range<Data>) -> Result<(usize, Metadata)> {
    let preview: Vec<String> = range
        .rows()
        .take(HEADER_PREVIEW_LINES)
        .map(render_sheet_row)
        .collect();
    ensure!(!preview.is_empty(), "Sheet has no rows");
    let header_idx = detect_header_line(&preview);
    let metadata = extract_metadata(metadata_window(&preview, header_idx));
    Ok((header_idx, metadata))
}

fn sheet_table(range: &Range<Data>, header_idx: usize, max_rows: Option<usize>) -> Result<RawTable> {
    let mut rows = range.rows().skip(header_idx);
    let header = rows.next().context("Sheet has no header row")?;
    let mut table = RawTable::new(normalize_header(header.iter().map(sheet_cell_text)));

    for row in rows {
        if max_rows.is_some_and(|max| table.len() >= max) {
            break;
        }
        let cells: Vec<Option<String>> = row.iter().map(|v| cell(&sheet_cell_text(v))).collect();
        if cells.iter().all(Option::is_none) {
            continue;
        }
        table.push_row(cells);
    }
    Ok(table)
}

fn read_spreadsheet(path: &Path, max_rows: Option<usize>) -> Result<(RawTable, Metadata)> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("Failed opening workbook {}", path.display()))?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .with_context(|| format!("Workbook {} has no sheets", path.display()))?;
    let range = workbook
        .worksheet_range(&sheet_name)
        .with_context(|| format!("Failed reading sheet {sheet_name:?} of {}", path.display()))?;

    let (header_idx, metadata) = match locate_sheet_header(&range) {
        Ok(found) => found,
        Err(err) => {
            warn!(
                "Header detection failed for {} ({err:#}); using the first row",
                path.display()
            );
            (0, Metadata::new())
        }
    };
    debug!(path = %path.display(), sheet = %sheet_name, header_idx, "located sheet header");

    let table = sheet_table(&range, header_idx, max_rows)
        .with_context(|| format!("Failed reading sheet {sheet_name:?} of {}", path.display()))?;
    Ok((table, metadata))
}
