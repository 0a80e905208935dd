//! Exporters: result tables to a folder of files or to a destination database.

mod database;
mod file;

pub use database::{DatabaseExporter, BATCH_SIZE, KEY_COLUMN, ZONE_COLUMN};
pub(crate) use database::{quote, table_columns};
pub use file::FileExporter;

use anyhow::{ensure, Result};
use serde::Serialize;

use crate::store::{GeoTable, Value};

/// Row filter applied before a filtered database export.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowPredicate {
    /// Keep rows whose column is not null.
    NotNull(String),
    /// Keep rows whose column equals the value. Numbers compare by value.
    Equals(String, Value),
}

fn same(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            matches!((a.as_f64(), b.as_f64()), (Ok(Some(x)), Ok(Some(y))) if x == y)
        }
        _ => a == b,
    }
}

impl RowPredicate {
    #[inline] pub fn column(&self) -> &str {
        match self { Self::NotNull(c) | Self::Equals(c, _) => c }
    }

    /// One flag per row of `table`.
    pub fn mask(&self, table: &GeoTable) -> Result<Vec<bool>> {
        let column = self.column();
        ensure!(table.schema().contains(column), "[export] filter column '{column}' not found");
        let values = table.column_values(column)?;
        Ok(match self {
            Self::NotNull(_) => values.iter().map(|v| !v.is_null()).collect(),
            Self::Equals(_, expected) => values.iter().map(|v| same(v, expected)).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ColumnType, Schema};

    fn table() -> GeoTable {
        let schema = Schema::of(&[("id_block", ColumnType::BigInt), ("kind", ColumnType::Text)]).unwrap();
        GeoTable::from_rows(schema, vec![
            vec![Value::Int(1), Value::Text("a".into())],
            vec![Value::Null, Value::Text("b".into())],
            vec![Value::Int(2), Value::Text("a".into())],
        ], None).unwrap()
    }

    #[test]
    fn not_null_mask() {
        let mask = RowPredicate::NotNull("id_block".into()).mask(&table()).unwrap();
        assert_eq!(mask, vec![true, false, true]);
    }

    #[test]
    fn equals_mask_compares_numbers_by_value() {
        let t = table();
        assert_eq!(RowPredicate::Equals("kind".into(), Value::Text("a".into())).mask(&t).unwrap(), vec![true, false, true]);
        assert_eq!(RowPredicate::Equals("id_block".into(), Value::Float(2.0)).mask(&t).unwrap(), vec![false, false, true]);
    }

    #[test]
    fn unknown_column_is_an_error() {
        assert!(RowPredicate::NotNull("nope".into()).mask(&table()).is_err());
    }
}
