use tracing::debug;

use crate::clean::{extract_state, parse_money};
use crate::schema::{CANONICAL_COLUMNS, ColumnKind, HOSPITAL_COLUMNS, column_kind, map_to_canonical};
use crate::table::{Metadata, RawTable};

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Text(Vec<Option<String>>),
    Number(Vec<Option<f64>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedColumn {
    pub name: &'static str,
    pub data: ColumnData,
}

/// One file's charge records in canonical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedTable {
    pub columns: Vec<NormalizedColumn>,
    pub row_count: usize,
}

impl NormalizedTable {
    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.columns.iter().find(|c| c.name == name).map(|c| &c.data)
    }

    pub fn text(&self, name: &str, row: usize) -> Option<&str> {
        match self.column(name)? {
            ColumnData::Text(values) => values.get(row)?.as_deref(),
            ColumnData::Number(_) => None,
        }
    }

    #[cfg(test)]
    pub fn number(&self, name: &str, row: usize) -> Option<f64> {
        match self.column(name)? {
            ColumnData::Number(values) => *values.get(row)?,
            ColumnData::Text(_) => None,
        }
    }
}

fn fill_hospital_columns(table: &mut RawTable, metadata: &Metadata) {
    for field in HOSPITAL_COLUMNS {
        let keep_existing = if *field == "hospital_name" {
            table.column_fully_populated(field)
        } else {
            !table.column_absent_or_null(field)
        };
        if keep_existing {
            continue;
        }
        if let Some(value) = metadata.get(*field) {
            debug!(field, value = value.as_str(), "filling column from metadata");
            table.fill_column(field, value);
        }
    }
}

/// Turns one file's raw table into a [`NormalizedTable`].
///
/// Hospital columns are backfilled from `metadata` when the table lacks them,
/// columns are mapped onto the canonical schema, `source_file` and `state` are
/// attached and money columns are parsed. The row count never changes.
pub fn unify_record(mut table: RawTable, source_file: &str, metadata: &Metadata) -> NormalizedTable {
    let row_count = table.len();
    fill_hospital_columns(&mut table, metadata);

    let canonical = map_to_canonical(table);
    let mut text_columns: Vec<Vec<Option<String>>> =
        vec![Vec::with_capacity(row_count); CANONICAL_COLUMNS.len()];
    for row in canonical.rows {
        for (idx, value) in row.into_iter().enumerate() {
            text_columns[idx].push(value);
        }
    }

    let address_idx = CANONICAL_COLUMNS
        .iter()
        .position(|c| *c == "hospital_address");
    let states: Vec<Option<String>> = match address_idx {
        Some(idx) => text_columns[idx]
            .iter()
            .map(|addr| extract_state(addr.as_deref()))
            .collect(),
        None => vec![None; row_count],
    };

    let columns = CANONICAL_COLUMNS
        .iter()
        .zip(text_columns)
        .map(|(name, values)| {
            let data = match *name {
                "source_file" => ColumnData::Text(vec![Some(source_file.to_string()); row_count]),
                "state" => ColumnData::Text(states.clone()),
                _ => match column_kind(name) {
                    ColumnKind::Money => ColumnData::Number(
                        values.iter().map(|v| parse_money(v.as_deref())).collect(),
                    ),
                    ColumnKind::Text => ColumnData::Text(values),
                },
            };
            NormalizedColumn { name, data }
        })
        .collect();

    NormalizedTable { columns, row_count }
}
