use std::collections::BTreeMap;

/// Hospital-level fields pulled from a file preamble or JSON envelope,
/// keyed by normalized field name. Empty values are never stored.
pub type Metadata = BTreeMap<String, String>;

/// String-typed table as read from a source file.
///
/// `rows[i][j]` is the cell of row `i` under `columns[j]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl RawTable {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends a row, padding short rows with nulls and dropping overflow.
    pub fn push_row(&mut self, mut row: Vec<Option<String>>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn truncate(&mut self, max_rows: Option<usize>) {
        if let Some(max_rows) = max_rows {
            self.rows.truncate(max_rows);
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = Option<&str>> {
        self.rows
            .iter()
            .map(move |row| row.get(idx).and_then(|v| v.as_deref()))
    }

    /// Every row holds a value in `name`. False when the column is absent.
    pub fn column_fully_populated(&self, name: &str) -> bool {
        match self.column_index(name) {
            Some(idx) => self.column_values(idx).all(|v| v.is_some()),
            None => false,
        }
    }

    /// The column is missing or holds no values at all.
    pub fn column_absent_or_null(&self, name: &str) -> bool {
        match self.column_index(name) {
            Some(idx) => self.column_values(idx).all(|v| v.is_none()),
            None => true,
        }
    }

    /// Sets every row of `name` to `value`, adding the column if needed.
    pub fn fill_column(&mut self, name: &str, value: &str) {
        let idx = match self.column_index(name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(None);
                }
                self.columns.len() - 1
            }
        };
        for row in &mut self.rows {
            row[idx] = Some(value.to_string());
        }
    }
}

/// Converts a raw cell into the table's null convention.
pub fn cell(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}
