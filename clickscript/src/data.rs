//! Tabular data source: named fields with independent read cursors.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::info;

use crate::errors::DataError;

#[derive(Debug, Clone)]
struct Field {
    name: String,
    values: Vec<String>,
    cursor: usize,
}

/// Field name to ordered values, plus a read cursor per field.
///
/// A cursor never goes past the last value: `advance` at the last index
/// fails with [`DataError::Exhausted`] and leaves the cursor where it was.
#[derive(Debug, Clone, Default)]
pub struct DataSource {
    fields: Option<Vec<Field>>,
    index: HashMap<String, usize>,
}

impl DataSource {
    /// A source with nothing loaded.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<String>)>,
        S: Into<String>,
    {
        let mut fields = Vec::new();
        let mut index = HashMap::new();
        for (name, values) in columns {
            let name = name.into();
            match index.get(&name) {
                Some(&slot) => {
                    let field: &mut Field = &mut fields[slot];
                    field.values = values;
                }
                None => {
                    index.insert(name.clone(), fields.len());
                    fields.push(Field {
                        name,
                        values,
                        cursor: 0,
                    });
                }
            }
        }
        Self {
            fields: Some(fields),
            index,
        }
    }

    /// Reads a CSV table; the header row names the fields. Each column ends
    /// at its last non-empty cell.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, DataError> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = reader
            .headers()
            .map_err(|e| DataError::Read(format!("failed to read header row: {e}")))?
            .clone();
        let mut columns: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for (row_index, row) in reader.records().enumerate() {
            let row = row.map_err(|e| DataError::Read(format!("row {}: {e}", row_index + 1)))?;
            for (column, values) in columns.iter_mut().enumerate() {
                values.push(row.get(column).unwrap_or_default().trim().to_string());
            }
        }
        for values in &mut columns {
            while values.last().is_some_and(|v| v.is_empty()) {
                values.pop();
            }
        }
        Ok(Self::from_columns(
            headers.iter().map(|h| h.trim().to_string()).zip(columns),
        ))
    }

    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| DataError::Read(format!("failed to open {}: {e}", path.display())))?;
        let source = Self::from_csv_reader(file)?;
        info!(
            "Loaded data source {} with {} field(s)",
            path.display(),
            source.index.len()
        );
        Ok(source)
    }

    pub fn get_fields(&self) -> Result<Vec<String>, DataError> {
        let fields = self.fields.as_ref().ok_or(DataError::NoSource)?;
        Ok(fields.iter().map(|f| f.name.clone()).collect())
    }

    fn field(&self, name: &str) -> Result<&Field, DataError> {
        let fields = self.fields.as_ref().ok_or(DataError::NoSource)?;
        self.index
            .get(name)
            .map(|&slot| &fields[slot])
            .ok_or_else(|| DataError::UnknownField(name.to_string()))
    }

    fn field_mut(&mut self, name: &str) -> Result<&mut Field, DataError> {
        let slot = *self
            .index
            .get(name)
            .ok_or_else(|| DataError::UnknownField(name.to_string()))?;
        let fields = self.fields.as_mut().ok_or(DataError::NoSource)?;
        Ok(&mut fields[slot])
    }

    /// Value under the field's cursor.
    pub fn read(&self, name: &str) -> Result<String, DataError> {
        let field = self.field(name)?;
        field
            .values
            .get(field.cursor)
            .cloned()
            .ok_or_else(|| DataError::Exhausted(name.to_string()))
    }

    /// Moves the field's cursor to the next value.
    pub fn advance(&mut self, name: &str) -> Result<(), DataError> {
        let field = self.field_mut(name)?;
        if field.cursor + 1 >= field.values.len() {
            return Err(DataError::Exhausted(name.to_string()));
        }
        field.cursor += 1;
        Ok(())
    }

    pub fn cursor(&self, name: &str) -> Result<usize, DataError> {
        Ok(self.field(name)?.cursor)
    }

    pub fn len(&self, name: &str) -> Result<usize, DataError> {
        Ok(self.field(name)?.values.len())
    }

    /// Values not yet passed by the cursor, including the current one.
    pub fn remaining(&self, name: &str) -> Result<usize, DataError> {
        let field = self.field(name)?;
        Ok(field.values.len().saturating_sub(field.cursor))
    }

    pub fn reset_cursors(&mut self) {
        if let Some(fields) = self.fields.as_mut() {
            for field in fields {
                field.cursor = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> DataSource {
        DataSource::from_columns([
            ("name", vec!["Ann".to_string(), "Bob".to_string()]),
            ("email", vec!["a@x".to_string()]),
        ])
    }

    #[test]
    fn test_no_source_loaded() {
        let data = DataSource::empty();
        assert_eq!(data.get_fields(), Err(DataError::NoSource));
        assert_eq!(data.read("name"), Err(DataError::NoSource));
    }

    #[test]
    fn test_fields_keep_column_order() {
        assert_eq!(source().get_fields().unwrap(), vec!["name", "email"]);
    }

    #[test]
    fn test_cursors_are_independent() {
        let mut data = source();
        data.advance("name").unwrap();
        assert_eq!(data.read("name").unwrap(), "Bob");
        assert_eq!(data.read("email").unwrap(), "a@x");
        assert_eq!(data.remaining("name").unwrap(), 1);
        data.reset_cursors();
        assert_eq!(data.read("name").unwrap(), "Ann");
    }

    #[test]
    fn test_advance_at_last_index_fails_without_moving() {
        let mut data = source();
        data.advance("name").unwrap();
        assert_eq!(data.advance("name"), Err(DataError::Exhausted("name".into())));
        assert_eq!(data.advance("name"), Err(DataError::Exhausted("name".into())));
        assert_eq!(data.cursor("name").unwrap(), 1);
        assert_eq!(data.read("name").unwrap(), "Bob");
    }

    #[test]
    fn test_unknown_field() {
        let mut data = source();
        assert_eq!(data.read("phone"), Err(DataError::UnknownField("phone".into())));
        assert_eq!(data.advance("phone"), Err(DataError::UnknownField("phone".into())));
    }

    #[test]
    fn test_csv_columns_end_at_last_value() {
        let csv = "name,city\nAnn,Oslo\nBob,\n,\n";
        let data = DataSource::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(data.len("name").unwrap(), 2);
        assert_eq!(data.len("city").unwrap(), 1);
        assert_eq!(data.read("city").unwrap(), "Oslo");
    }
}
