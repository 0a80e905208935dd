use std::fmt;

use anyhow::{bail, Result};
use polars::prelude::DataType;
use serde::{Deserialize, Serialize};

/// Declared type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    BigInt,
    Double,
    /// Decimal-float hybrid, stored as f64 in the working store.
    Decfloat,
    Text,
    Boolean,
    /// WKB-encoded geometry sharing the table's SRID.
    Geometry,
}

impl ColumnType {
    /// Physical dtype backing the column in a DataFrame.
    pub(crate) fn dtype(self) -> DataType {
        match self {
            Self::Integer => DataType::Int32,
            Self::BigInt => DataType::Int64,
            Self::Double | Self::Decfloat => DataType::Float64,
            Self::Text => DataType::String,
            Self::Boolean => DataType::Boolean,
            Self::Geometry => DataType::Binary,
        }
    }

    /// Declared SQL type name.
    pub fn sql_name(self) -> &'static str {
        match self {
            Self::Integer => "INTEGER",
            Self::BigInt => "BIGINT",
            Self::Double => "DOUBLE PRECISION",
            Self::Decfloat => "DECFLOAT",
            Self::Text => "TEXT",
            Self::Boolean => "BOOLEAN",
            Self::Geometry => "GEOMETRY",
        }
    }

    /// Parse a declared SQL type name (as reported by a database catalogue).
    pub fn from_sql_name(name: &str) -> Self {
        let upper = name.trim().to_ascii_uppercase();
        if upper.starts_with("GEOMETRY") || upper == "BLOB" {
            Self::Geometry
        } else if upper == "BIGINT" || upper == "INT8" {
            Self::BigInt
        } else if upper.contains("INT") {
            Self::Integer
        } else if upper.starts_with("DECFLOAT") {
            Self::Decfloat
        } else if upper.contains("DOUBLE") || upper.contains("REAL") || upper.contains("FLOA") || upper.contains("NUMERIC") || upper.contains("DECIMAL") {
            Self::Double
        } else if upper.starts_with("BOOL") {
            Self::Boolean
        } else {
            Self::Text
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::BigInt | Self::Double | Self::Decfloat)
    }

    fn numeric_rank(self) -> u8 {
        match self {
            Self::Boolean => 0,
            Self::Integer => 1,
            Self::BigInt => 2,
            Self::Decfloat => 3,
            Self::Double => 4,
            _ => u8::MAX,
        }
    }

    /// Common type able to hold values of both, if any.
    ///
    /// Integer < BigInt < Decfloat < Double, booleans widen numerically and
    /// text absorbs every non-geometry type. Geometry only unifies with itself.
    pub fn unify(self, other: Self) -> Option<Self> {
        if self == other {
            return Some(self);
        }
        match (self, other) {
            (Self::Geometry, _) | (_, Self::Geometry) => None,
            (Self::Text, _) | (_, Self::Text) => Some(Self::Text),
            (a, b) => Some(if a.numeric_rank() >= b.numeric_rank() { a } else { b }),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, ty: ColumnType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// Ordered column list of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    columns: Vec<ColumnDef>,
}

impl Schema {
    /// Build a schema, rejecting duplicate column names.
    pub fn new(columns: Vec<ColumnDef>) -> Result<Self> {
        for (i, col) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == col.name) {
                bail!("[store::schema] duplicate column '{}'", col.name);
            }
        }
        Ok(Self { columns })
    }

    /// Shorthand used by callers building fixed schemas.
    pub fn of(columns: &[(&str, ColumnType)]) -> Result<Self> {
        Self::new(columns.iter().map(|(n, t)| ColumnDef::new(*n, *t)).collect())
    }

    #[inline] pub fn len(&self) -> usize { self.columns.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.columns.is_empty() }

    #[inline] pub fn columns(&self) -> &[ColumnDef] { &self.columns }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool { self.get(name).is_some() }

    /// Case-insensitive lookup, as SQL catalogues compare identifiers.
    pub fn get_ignore_case(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Names of all geometry columns, in order.
    pub fn geometry_columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter()
            .filter(|c| c.ty == ColumnType::Geometry)
            .map(|c| c.name.as_str())
    }

    /// First geometry column, conventionally the feature geometry.
    pub fn geometry_column(&self) -> Option<&str> {
        self.geometry_columns().next()
    }

    /// Append a column (error if the name exists).
    pub fn push(&mut self, col: ColumnDef) -> Result<()> {
        if self.contains(&col.name) {
            bail!("[store::schema] duplicate column '{}'", col.name);
        }
        self.columns.push(col);
        Ok(())
    }
}
