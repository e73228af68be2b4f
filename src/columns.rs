use regex::Regex;
use std::sync::LazyLock;

static NON_WORD_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w]+").expect("valid non-word regex"));
static UNDERSCORE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_+").expect("valid underscore regex"));

/// Canonical snake-case token for a source column label.
///
/// `"Standard Charge | Gross"` and `"standard_charge|gross"` both become
/// `"standard_charge_gross"`. Applying it twice gives the same result.
pub fn normalize_column_name(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase().replace('|', "_");
    let replaced = NON_WORD_RUN.replace_all(&lowered, "_");
    let collapsed = UNDERSCORE_RUN.replace_all(&replaced, "_");
    collapsed.trim_matches('_').to_string()
}

/// Label used for a header cell that is blank.
pub fn unnamed_column(index: usize) -> String {
    format!("unnamed_{index}")
}

/// Normalizes a header row, naming blank cells by position.
pub fn normalize_header<I, S>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    labels
        .into_iter()
        .enumerate()
        .map(|(idx, label)| {
            let normalized = normalize_column_name(label.as_ref());
            if normalized.is_empty() {
                unnamed_column(idx)
            } else {
                normalized
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bar_separated_labels() {
        assert_eq!(
            normalize_column_name("standard_charge|gross"),
            "standard_charge_gross"
        );
        assert_eq!(normalize_column_name("code|1|type"), "code_1_type");
    }

    #[test]
    fn normalizes_spaces_punctuation_and_case() {
        assert_eq!(
            normalize_column_name("  Standard Charge - Discounted Cash ($) "),
            "standard_charge_discounted_cash"
        );
        assert_eq!(normalize_column_name("__Payer  Name__"), "payer_name");
        assert_eq!(normalize_column_name("a.b"), "a_b");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in [
            "Hospital Name",
            "standard_charge|negotiated_dollar",
            "License Number | CA",
            "  --weird--  label!! ",
        ] {
            let once = normalize_column_name(raw);
            assert_eq!(normalize_column_name(&once), once);
        }
    }

    #[test]
    fn null_label_stays_null() {
        let label: Option<&str> = None;
        assert_eq!(label.map(normalize_column_name), None);
    }

    #[test]
    fn blank_header_cells_are_named_by_position() {
        let header = normalize_header(["Description", "", "  |  "]);
        assert_eq!(header, vec!["description", "unnamed_1", "unnamed_2"]);
    }
}
