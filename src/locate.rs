use anyhow::{Context, Result, bail};
use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use crate::columns::normalize_column_name;
use crate::constants::{KNOWN_HEADER_TOKENS, METADATA_MIN_LINES};
use crate::table::Metadata;

/// Reads up to `max_lines` lines from the top of a text file.
///
/// Bytes are decoded lossily and line terminators are stripped. Fewer lines are
/// fine; a file without a single readable line is an error.
pub fn read_preview_lines(path: &Path, max_lines: usize) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("Failed opening {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut lines = Vec::with_capacity(max_lines);
    let mut buf = Vec::new();

    while lines.len() < max_lines {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("Failed reading {}", path.display()))?;
        if read == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&buf);
        lines.push(text.trim_end_matches(['\n', '\r']).to_string());
    }

    if lines.is_empty() {
        bail!("No readable lines in {}", path.display());
    }
    Ok(lines)
}

/// Zero-based index of the line that looks like the price-list header.
///
/// The first line containing a known header token wins. Without any token the
/// line with the most commas is used (earliest on ties, 0 for empty input).
pub fn detect_header_line<S: AsRef<str>>(lines: &[S]) -> usize {
    for (idx, line) in lines.iter().enumerate() {
        let lowered = line.as_ref().to_lowercase();
        if KNOWN_HEADER_TOKENS
            .iter()
            .any(|token| lowered.contains(token))
        {
            return idx;
        }
    }

    let mut best_idx = 0usize;
    let mut best_commas: Option<usize> = None;
    for (idx, line) in lines.iter().enumerate() {
        let commas = line.as_ref().matches(',').count();
        if best_commas.is_none_or(|best| commas > best) {
            best_commas = Some(commas);
            best_idx = idx;
        }
    }
    best_idx
}

/// Preview lines handed to metadata extraction for a header at `header_idx`.
pub fn metadata_window<S>(lines: &[S], header_idx: usize) -> &[S] {
    let end = METADATA_MIN_LINES.max(header_idx + 2).min(lines.len());
    &lines[..end]
}

fn is_hospital_name_line(line: &str) -> bool {
    let lowered = line.to_lowercase();
    lowered.replace(' ', "").contains("hospital_name") || lowered.contains("hospital name")
}

/// Parses one line as a single quoted CSV record.
fn parse_single_record(line: &str) -> Option<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());
    let record = reader.records().next()?.ok()?;
    Some(record.iter().map(str::to_string).collect())
}

fn zip_metadata(header_line: &str, value_line: &str) -> Option<Metadata> {
    let header = parse_single_record(header_line)?;
    let values = parse_single_record(value_line.trim())?;

    let mut meta = Metadata::new();
    for (key, value) in header.iter().zip(values.iter()) {
        let key = normalize_column_name(key);
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        meta.insert(key, value.to_string());
    }

    // CMS templates publish `license_number|<STATE>`.
    let license_key = meta
        .keys()
        .find(|k| k.starts_with("license_number_"))
        .cloned();
    if let Some(key) = license_key {
        if !meta.contains_key("license_number") {
            let value = meta[&key].clone();
            meta.insert("license_number".to_string(), value);
        }
    }
    Some(meta)
}

/// Pulls hospital metadata out of preamble lines.
///
/// A line mentioning `hospital_name` is taken as the metadata header and the
/// line after it as the values. Failing that, lines 0 and 1 are paired. An
/// unrecognized preamble yields empty metadata.
pub fn extract_metadata<S: AsRef<str>>(lines: &[S]) -> Metadata {
    for (idx, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        if !is_hospital_name_line(line) {
            continue;
        }
        let Some(next) = lines.get(idx + 1) else {
            continue;
        };
        if let Some(meta) = zip_metadata(line, next.as_ref()) {
            return meta;
        }
    }

    match lines {
        [first, second, ..] => zip_metadata(first.as_ref(), second.as_ref()).unwrap_or_default(),
        _ => Metadata::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(str::to_string).collect()
    }

    #[test]
    fn header_after_metadata_preamble() {
        let preview = lines(
            "hospital_name,last_updated_on,version\n\
             \"Mercy General\",2024-01-01,2.0.0\n\
             \n\
             description,code|1,standard_charge|gross,payer_name\n\
             MRI,70551,$1200,Aetna",
        );
        assert_eq!(detect_header_line(&preview), 3);
    }

    #[test]
    fn header_token_match_is_case_insensitive() {
        let preview = lines("Intro text\nDESCRIPTION,CODE,PRICE");
        assert_eq!(detect_header_line(&preview), 1);
    }

    #[test]
    fn header_falls_back_to_most_commas() {
        let preview = lines("note one\nalpha,beta\nx,y,z,w\np,q,r,s");
        assert_eq!(detect_header_line(&preview), 2);
    }

    #[test]
    fn header_fallback_defaults_to_first_line() {
        let preview = lines("foo\nbar\nbaz");
        assert_eq!(detect_header_line(&preview), 0);
        let empty: Vec<String> = Vec::new();
        assert_eq!(detect_header_line(&empty), 0);
    }

    #[test]
    fn metadata_from_hospital_name_line() {
        let preview = lines(
            "Published under 45 CFR 180\n\
             Hospital Name,Last Updated On,Version,Hospital Address\n\
             \"Mercy General\",2024-01-01,2.0.0,\"123 Main St, Springfield, IL 62701\"\n\
             description,code|1",
        );
        let meta = extract_metadata(&preview);
        assert_eq!(meta["hospital_name"], "Mercy General");
        assert_eq!(meta["last_updated_on"], "2024-01-01");
        assert_eq!(meta["version"], "2.0.0");
        assert_eq!(meta["hospital_address"], "123 Main St, Springfield, IL 62701");
    }

    #[test]
    fn metadata_license_number_alias() {
        let preview = lines("hospital_name,license_number|CA\nMercy,12345");
        let meta = extract_metadata(&preview);
        assert_eq!(meta["license_number_ca"], "12345");
        assert_eq!(meta["license_number"], "12345");
    }

    #[test]
    fn metadata_falls_back_to_first_two_lines() {
        let preview = lines("facility,updated\nSt. Luke,2023-07-01\ndescription,code");
        let meta = extract_metadata(&preview);
        assert_eq!(meta["facility"], "St. Luke");
        assert_eq!(meta["updated"], "2023-07-01");
    }

    #[test]
    fn metadata_is_empty_for_single_line() {
        let preview = lines("description,code");
        assert!(extract_metadata(&preview).is_empty());
    }

    #[test]
    fn metadata_window_covers_header_plus_one() {
        let preview: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(metadata_window(&preview, 0).len(), 5);
        assert_eq!(metadata_window(&preview, 8).len(), 10);
        assert_eq!(metadata_window(&preview[..3], 8).len(), 3);
    }

    #[test]
    fn preview_reads_available_lines() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(file, "a,b\r\n1,2\n3,4")?;
        let preview = read_preview_lines(file.path(), 25)?;
        assert_eq!(preview, vec!["a,b", "1,2", "3,4"]);
        Ok(())
    }

    #[test]
    fn preview_of_empty_file_fails() -> Result<()> {
        let file = NamedTempFile::new()?;
        assert!(read_preview_lines(file.path(), 25).is_err());
        Ok(())
    }
}
