use anyhow::{Context, Result};
use arrow::{
    array::{ArrayRef, Float64Builder, StringBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use parquet::arrow::arrow_writer::ArrowWriter;
use parquet::{basic::Compression, file::properties::WriterProperties};
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::NamedTempFile;

use crate::common::ensure_parent_dir;
use crate::unify::{ColumnData, NormalizedTable};

/// Parquet schema for a normalized table: Utf8 text, Float64 money, all nullable.
pub fn snapshot_schema(table: &NormalizedTable) -> Arc<Schema> {
    let fields: Vec<Field> = table
        .columns
        .iter()
        .map(|column| {
            let data_type = match column.data {
                ColumnData::Text(_) => DataType::Utf8,
                ColumnData::Number(_) => DataType::Float64,
            };
            Field::new(column.name, data_type, true)
        })
        .collect();
    Arc::new(Schema::new(fields))
}

/// Writes one normalized table to Parquet.
///
/// Rows go to a uniquely named temp file beside the output, which is renamed
/// over `output_path` only after the writer closes cleanly. Two writers
/// targeting the same path never share a temp file, and a failed file never
/// leaves a partial snapshot.
pub struct SnapshotWriter {
    output_path: PathBuf,
    tmp: NamedTempFile,
    schema: Arc<Schema>,
    writer: ArrowWriter<File>,
    batch_size: usize,
}

impl SnapshotWriter {
    pub fn try_new(output_path: &Path, schema: Arc<Schema>, batch_size: usize) -> Result<Self> {
        ensure_parent_dir(output_path)?;
        let dir = match output_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file_name = output_path
            .file_name()
            .and_then(|x| x.to_str())
            .unwrap_or("snapshot.parquet");

        let tmp = tempfile::Builder::new()
            .prefix(&format!(".{file_name}."))
            .suffix(".tmp")
            .tempfile_in(dir)
            .with_context(|| format!("Failed creating temp file in {}", dir.display()))?;
        let file = tmp
            .as_file()
            .try_clone()
            .with_context(|| format!("Failed opening {}", tmp.path().display()))?;

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let writer = ArrowWriter::try_new(file, Arc::clone(&schema), Some(props))
            .context("Failed creating Parquet ArrowWriter")?;

        Ok(Self {
            output_path: output_path.to_path_buf(),
            tmp,
            schema,
            writer,
            batch_size: batch_size.max(1),
        })
    }

    pub fn write_table(&mut self, table: &NormalizedTable) -> Result<()> {
        anyhow::ensure!(
            table.columns.len() == self.schema.fields().len(),
            "write_table expected {} columns, got {}",
            self.schema.fields().len(),
            table.columns.len()
        );

        let mut start = 0usize;
        while start < table.row_count {
            let end = (start + self.batch_size).min(table.row_count);
            self.write_batch(table, start, end)?;
            start = end;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        self.writer
            .close()
            .context("Failed closing Parquet writer")?;
        let tmp_path = self.tmp.path().to_path_buf();
        self.tmp.persist(&self.output_path).with_context(|| {
            format!(
                "Failed moving temp parquet {} to {}",
                tmp_path.display(),
                self.output_path.display()
            )
        })?;
        Ok(())
    }

    /// Drops the temp file without touching `output_path`.
    pub fn abort(self) {
        let _ = self.writer.close();
        let _ = self.tmp.close();
    }

    fn write_batch(&mut self, table: &NormalizedTable, start: usize, end: usize) -> Result<()> {
        let arrays: Vec<ArrayRef> = table
            .columns
            .iter()
            .map(|column| match &column.data {
                ColumnData::Text(values) => {
                    let mut builder = StringBuilder::new();
                    for value in &values[start..end] {
                        builder.append_option(value.as_deref());
                    }
                    Arc::new(builder.finish()) as ArrayRef
                }
                ColumnData::Number(values) => {
                    let mut builder = Float64Builder::with_capacity(end - start);
                    for value in &values[start..end] {
                        builder.append_option(*value);
                    }
                    Arc::new(builder.finish()) as ArrayRef
                }
            })
            .collect();
        let batch = RecordBatch::try_new(Arc::clone(&self.schema), arrays)
            .context("Failed creating RecordBatch for Parquet write")?;
        self.writer
            .write(&batch)
            .context("Failed writing Parquet RecordBatch")?;
        Ok(())
    }
}

/// Writes `table` to `output_path` atomically.
pub fn write_snapshot(output_path: &Path, table: &NormalizedTable, batch_size: usize) -> Result<()> {
    let mut writer = SnapshotWriter::try_new(output_path, snapshot_schema(table), batch_size)?;
    match writer.write_table(table) {
        Ok(()) => writer.finish(),
        Err(err) => {
            writer.abort();
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CANONICAL_COLUMNS;
    use crate::table::{Metadata, RawTable, cell};
    use crate::unify::unify_record;
    use arrow::array::{Array, Float64Array, StringArray};
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::TempDir;

    fn normalized(rows: usize) -> NormalizedTable {
        let mut raw = RawTable::new(vec!["description".into(), "standard_charge_gross".into()]);
        for i in 0..rows {
            let price = if i % 2 == 0 { format!("${i}.50") } else { "Other".to_string() };
            raw.push_row(vec![cell(&format!("item {i}")), cell(&price)]);
        }
        unify_record(raw, "sample.csv", &Metadata::new())
    }

    #[test]
    fn writes_canonical_schema_across_batches() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("out").join("sample.parquet");
        write_snapshot(&path, &normalized(5), 2)?;

        assert!(path.exists());
        assert_eq!(dir_entries(&dir.path().join("out"))?, vec!["sample.parquet"]);

        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?;
        let names: Vec<String> = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        assert_eq!(names, CANONICAL_COLUMNS);
        let gross_idx = builder.schema().index_of("standard_charge_gross")?;
        assert_eq!(
            builder.schema().field(gross_idx).data_type(),
            &DataType::Float64
        );

        let batches: Vec<RecordBatch> = builder.build()?.collect::<std::result::Result<_, _>>()?;
        let total: usize = batches.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total, 5);

        let first = &batches[0];
        let gross = first
            .column(gross_idx)
            .as_any()
            .downcast_ref::<Float64Array>()
            .expect("float column");
        assert_eq!(gross.value(0), 0.5);
        assert!(gross.is_null(1));

        let source_idx = builder_index(first, "source_file");
        let source = first
            .column(source_idx)
            .as_any()
            .downcast_ref::<StringArray>()
            .expect("string column");
        assert_eq!(source.value(0), "sample.csv");
        Ok(())
    }

    fn dir_entries(dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            names.push(entry?.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    fn row_count(path: &Path) -> Result<usize> {
        let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
        let mut total = 0;
        for batch in reader {
            total += batch?.num_rows();
        }
        Ok(total)
    }

    fn builder_index(batch: &RecordBatch, name: &str) -> usize {
        batch.schema().index_of(name).expect("column present")
    }

    #[test]
    fn interleaved_writers_to_one_path_do_not_collide() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("mercy.parquet");
        let first_table = normalized(3);
        let second_table = normalized(7);

        let mut first = SnapshotWriter::try_new(&path, snapshot_schema(&first_table), 2)?;
        let mut second = SnapshotWriter::try_new(&path, snapshot_schema(&second_table), 2)?;
        first.write_table(&first_table)?;
        second.write_table(&second_table)?;
        first.finish()?;
        assert_eq!(row_count(&path)?, 3);
        second.finish()?;

        assert_eq!(row_count(&path)?, 7);
        assert_eq!(dir_entries(dir.path())?, vec!["mercy.parquet"]);
        Ok(())
    }

    #[test]
    fn abort_leaves_no_files() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("aborted.parquet");
        let table = normalized(4);
        let mut writer = SnapshotWriter::try_new(&path, snapshot_schema(&table), 2)?;
        writer.write_table(&table)?;
        writer.abort();
        assert!(dir_entries(dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn empty_table_still_writes_schema() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("empty.parquet");
        write_snapshot(&path, &normalized(0), 16)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&path)?)?;
        assert_eq!(builder.schema().fields().len(), CANONICAL_COLUMNS.len());
        Ok(())
    }
}
