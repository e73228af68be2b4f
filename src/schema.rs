use std::collections::HashMap;

use crate::clean::is_money_column;
use crate::table::RawTable;

pub const HOSPITAL_COLUMNS: &[&str] = &[
    "hospital_name",
    "last_updated_on",
    "version",
    "hospital_location",
    "hospital_address",
    "license_number",
];

/// Canonical output columns, in output order.
pub const CANONICAL_COLUMNS: &[&str] = &[
    // hospital metadata
    "hospital_name",
    "last_updated_on",
    "version",
    "hospital_location",
    "hospital_address",
    "license_number",
    // charge records
    "description",
    "code_1",
    "code_1_type",
    "code_2",
    "code_2_type",
    "code_3",
    "code_3_type",
    "billing_class",
    "setting",
    "modifiers",
    "drug_unit_of_measurement",
    "drug_type_of_measurement",
    "standard_charge_gross",
    "standard_charge_discounted_cash",
    "payer_name",
    "plan_name",
    "standard_charge_negotiated_dollar",
    "standard_charge_negotiated_percentage",
    "standard_charge_negotiated_algorithm",
    "estimated_amount",
    "standard_charge_methodology",
    "standard_charge_min",
    "standard_charge_max",
    "additional_generic_notes",
    // bookkeeping
    "source_file",
    "state",
];

/// Source names (normalized, or in their published bar form) that alias a
/// canonical column.
const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("code", "code_1"),
    ("code_type", "code_1_type"),
    ("standard_charge|gross", "standard_charge_gross"),
    ("standard_charge|discounted_cash", "standard_charge_discounted_cash"),
    ("standard_charge|negotiated_dollar", "standard_charge_negotiated_dollar"),
    (
        "standard_charge|negotiated_percentage",
        "standard_charge_negotiated_percentage",
    ),
    (
        "standard_charge|negotiated_algorithm",
        "standard_charge_negotiated_algorithm",
    ),
    ("standard_charge|methodology", "standard_charge_methodology"),
    ("standard_charge|min", "standard_charge_min"),
    ("standard_charge|max", "standard_charge_max"),
    ("standard_charge|estimated_amount", "estimated_amount"),
    ("standard_charge_estimated_amount", "estimated_amount"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Money,
}

pub fn column_kind(name: &str) -> ColumnKind {
    if is_money_column(name) {
        ColumnKind::Money
    } else {
        ColumnKind::Text
    }
}

/// How a source column reached its canonical target. Higher wins collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchStrength {
    Heuristic,
    Alias,
    Identity,
}

fn lookup_alias(name: &str) -> Option<&'static str> {
    COLUMN_ALIASES.iter().find_map(|(alias, target)| {
        (*alias == name || alias.replace('|', "_") == name).then_some(*target)
    })
}

/// Canonical target for a normalized source column, if any.
fn canonical_target(name: &str) -> Option<(&'static str, MatchStrength)> {
    let mut target = if let Some(canonical) = CANONICAL_COLUMNS.iter().find(|c| **c == name) {
        Some((*canonical, MatchStrength::Identity))
    } else {
        lookup_alias(name).map(|t| (t, MatchStrength::Alias))
    };

    let lowered = name.to_lowercase();
    if lowered.contains("standard_charge") && lowered.contains("gross") {
        target = Some(("standard_charge_gross", heuristic_strength(target)));
    }
    if lowered.contains("discounted") && lowered.contains("cash") {
        target = Some(("standard_charge_discounted_cash", heuristic_strength(target)));
    }
    target
}

/// Heuristics override the target but keep an identity match's precedence.
fn heuristic_strength(current: Option<(&'static str, MatchStrength)>) -> MatchStrength {
    match current {
        Some((_, MatchStrength::Identity)) => MatchStrength::Identity,
        _ => MatchStrength::Heuristic,
    }
}

/// Source column index feeding each canonical column.
fn resolve_sources(columns: &[String]) -> HashMap<&'static str, usize> {
    let mut chosen: HashMap<&'static str, (usize, MatchStrength)> = HashMap::new();
    for (idx, name) in columns.iter().enumerate() {
        let Some((target, strength)) = canonical_target(name) else {
            continue;
        };
        match chosen.get(target) {
            Some((_, existing)) if *existing >= strength => {}
            _ => {
                chosen.insert(target, (idx, strength));
            }
        }
    }
    chosen
        .into_iter()
        .map(|(target, (idx, _))| (target, idx))
        .collect()
}

/// Reshapes a normalized-column table onto [`CANONICAL_COLUMNS`].
///
/// Unrecognized columns are dropped and missing canonical columns come back
/// entirely null. Rows are untouched in count and order.
pub fn map_to_canonical(table: RawTable) -> RawTable {
    let sources = resolve_sources(&table.columns);
    let picks: Vec<Option<usize>> = CANONICAL_COLUMNS
        .iter()
        .map(|name| sources.get(name).copied())
        .collect();

    let rows = table
        .rows
        .into_iter()
        .map(|mut row| {
            picks
                .iter()
                .map(|pick| pick.and_then(|idx| row.get_mut(idx).and_then(Option::take)))
                .collect()
        })
        .collect();

    RawTable {
        columns: CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect(),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::cell;

    fn table(columns: &[&str], rows: &[&[&str]]) -> RawTable {
        let mut table = RawTable::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            table.push_row(row.iter().map(|v| cell(v)).collect());
        }
        table
    }

    fn value<'a>(table: &'a RawTable, row: usize, column: &str) -> Option<&'a str> {
        let idx = table.column_index(column)?;
        table.rows[row][idx].as_deref()
    }

    #[test]
    fn canonical_columns_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for name in CANONICAL_COLUMNS {
            assert!(seen.insert(*name), "duplicate canonical column {name}");
        }
        assert_eq!(CANONICAL_COLUMNS.len(), 32);
    }

    #[test]
    fn exact_aliases_and_identity() {
        let mapped = map_to_canonical(table(
            &["description", "code", "code_type", "standard_charge_negotiated_dollar"],
            &[&["MRI", "70551", "CPT", "900"]],
        ));
        assert_eq!(value(&mapped, 0, "description"), Some("MRI"));
        assert_eq!(value(&mapped, 0, "code_1"), Some("70551"));
        assert_eq!(value(&mapped, 0, "code_1_type"), Some("CPT"));
        assert_eq!(value(&mapped, 0, "standard_charge_negotiated_dollar"), Some("900"));
    }

    #[test]
    fn substring_heuristics() {
        let mapped = map_to_canonical(table(
            &["gross_standard_charge_amount", "discounted_cash_price"],
            &[&["100", "80"]],
        ));
        assert_eq!(value(&mapped, 0, "standard_charge_gross"), Some("100"));
        assert_eq!(value(&mapped, 0, "standard_charge_discounted_cash"), Some("80"));
    }

    #[test]
    fn identity_beats_heuristic_on_collision() {
        let mapped = map_to_canonical(table(
            &["standard_charge_gross_notes", "standard_charge_gross"],
            &[&["note", "120"]],
        ));
        assert_eq!(value(&mapped, 0, "standard_charge_gross"), Some("120"));
    }

    #[test]
    fn earliest_column_wins_equal_strength() {
        let mapped = map_to_canonical(table(
            &["cash_discounted", "discounted_cash_rate"],
            &[&["1", "2"]],
        ));
        assert_eq!(value(&mapped, 0, "standard_charge_discounted_cash"), Some("1"));
    }

    #[test]
    fn exact_canonical_column_set_regardless_of_source() {
        let mapped = map_to_canonical(table(&["unrelated", "other"], &[&["a", "b"], &["c", "d"]]));
        assert_eq!(mapped.columns, CANONICAL_COLUMNS);
        assert_eq!(mapped.len(), 2);
        assert!(mapped.rows.iter().all(|r| r.iter().all(Option::is_none)));
    }

    #[test]
    fn mapping_is_idempotent() {
        let once = map_to_canonical(table(
            &["code", "description", "standard_charge_gross_amount", "payer_name", "junk"],
            &[&["1", "x", "10", "Aetna", "j"], &["2", "y", "", "Cigna", "k"]],
        ));
        let twice = map_to_canonical(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn money_kind_follows_name_tokens() {
        assert_eq!(column_kind("standard_charge_max"), ColumnKind::Money);
        assert_eq!(column_kind("estimated_amount"), ColumnKind::Money);
        assert_eq!(column_kind("hospital_name"), ColumnKind::Text);
        assert_eq!(column_kind("state"), ColumnKind::Text);
    }
}
