use std::fmt;

use anyhow::{anyhow, bail, ensure, Context, Result};
use geo::Geometry;
use polars::prelude::*;
use serde::Serialize;

use crate::geom;
use crate::store::{ColumnDef, ColumnType, Schema};

/// A single cell value, as moved between the working store and the sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    /// WKB geometry bytes.
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

    /// Encode a geometry as a WKB blob value.
    pub fn geometry(geom: &Geometry<f64>) -> Self { Self::Blob(geom::to_wkb(geom)) }

    pub fn as_i64(&self) -> Result<Option<i64>> {
        Ok(match self {
            Self::Null => None,
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(*b as i64),
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Self::Text(s) => Some(s.trim().parse().with_context(|| format!("not an integer: {s:?}"))?),
            other => bail!("cannot convert {other} to an integer"),
        })
    }

    pub fn as_f64(&self) -> Result<Option<f64>> {
        Ok(match self {
            Self::Null => None,
            Self::Int(v) => Some(*v as f64),
            Self::Float(f) => Some(*f),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Text(s) => Some(s.trim().parse().with_context(|| format!("not a number: {s:?}"))?),
            Self::Blob(_) => bail!("cannot convert a blob to a number"),
        })
    }

    pub fn as_bool(&self) -> Result<Option<bool>> {
        Ok(match self {
            Self::Null => None,
            Self::Bool(b) => Some(*b),
            Self::Int(v) => Some(*v != 0),
            Self::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Some(true),
                "false" | "f" | "0" => Some(false),
                _ => bail!("not a boolean: {s:?}"),
            },
            other => bail!("cannot convert {other} to a boolean"),
        })
    }

    pub fn as_text(&self) -> Result<Option<String>> {
        Ok(match self {
            Self::Null => None,
            Self::Blob(_) => bail!("cannot convert a blob to text"),
            other => Some(other.to_string()),
        })
    }

    pub fn as_blob(&self) -> Result<Option<Vec<u8>>> {
        Ok(match self {
            Self::Null => None,
            Self::Blob(b) => Some(b.clone()),
            other => bail!("expected a geometry blob, got {other}"),
        })
    }

    fn from_any(av: AnyValue<'_>) -> Result<Self> {
        Ok(match av {
            AnyValue::Null => Self::Null,
            AnyValue::Boolean(b) => Self::Bool(b),
            AnyValue::Int32(v) => Self::Int(v as i64),
            AnyValue::Int64(v) => Self::Int(v),
            AnyValue::UInt32(v) => Self::Int(v as i64),
            AnyValue::Float32(v) => Self::Float(v as f64),
            AnyValue::Float64(v) => Self::Float(v),
            AnyValue::String(s) => Self::Text(s.to_string()),
            AnyValue::StringOwned(s) => Self::Text(s.to_string()),
            AnyValue::Binary(b) => Self::Blob(b.to_vec()),
            AnyValue::BinaryOwned(b) => Self::Blob(b),
            other => bail!("[store::table] unsupported cell value {other:?}"),
        })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

/// Build a typed DataFrame column from cell values.
fn build_column(def: &ColumnDef, values: &[Value]) -> Result<Column> {
    let name: PlSmallStr = def.name.as_str().into();
    let ctx = || format!("[store::table] column '{}' ({})", def.name, def.ty);

    let column = match def.ty {
        ColumnType::Integer => {
            let v = values.iter()
                .map(|v| v.as_i64()?.map(i32::try_from).transpose().map_err(anyhow::Error::from))
                .collect::<Result<Vec<Option<i32>>>>()
                .with_context(ctx)?;
            Column::new(name, v)
        }
        ColumnType::BigInt => {
            let v = values.iter().map(Value::as_i64).collect::<Result<Vec<_>>>().with_context(ctx)?;
            Column::new(name, v)
        }
        ColumnType::Double | ColumnType::Decfloat => {
            let v = values.iter().map(Value::as_f64).collect::<Result<Vec<_>>>().with_context(ctx)?;
            Column::new(name, v)
        }
        ColumnType::Text => {
            let v = values.iter().map(Value::as_text).collect::<Result<Vec<_>>>().with_context(ctx)?;
            Column::new(name, v)
        }
        ColumnType::Boolean => {
            let v = values.iter().map(Value::as_bool).collect::<Result<Vec<_>>>().with_context(ctx)?;
            Column::new(name, v)
        }
        ColumnType::Geometry => {
            let v = values.iter().map(Value::as_blob).collect::<Result<Vec<_>>>().with_context(ctx)?;
            Column::new(name, v)
        }
    };
    Ok(column)
}

/// A table in the working store: explicit schema, columnar values and the
/// SRID shared by every geometry column.
#[derive(Debug, Clone)]
pub struct GeoTable {
    schema: Schema,
    frame: DataFrame,
    srid: Option<i32>,
}

impl GeoTable {
    /// Build a table from row-major values.
    pub fn from_rows(schema: Schema, rows: Vec<Vec<Value>>, srid: Option<i32>) -> Result<Self> {
        let width = schema.len();
        let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); width];
        for (i, row) in rows.into_iter().enumerate() {
            ensure!(row.len() == width, "[store::table] row {i} has {} values, schema has {width} columns", row.len());
            for (col, value) in columns.iter_mut().zip(row) {
                col.push(value);
            }
        }
        Self::from_columns(schema, columns, srid)
    }

    /// Build a table from column-major values.
    pub fn from_columns(schema: Schema, columns: Vec<Vec<Value>>, srid: Option<i32>) -> Result<Self> {
        ensure!(columns.len() == schema.len(), "[store::table] {} value columns for {} schema columns", columns.len(), schema.len());
        let cols = schema.columns().iter()
            .zip(columns.iter())
            .map(|(def, values)| build_column(def, values))
            .collect::<Result<Vec<_>>>()?;
        let frame = DataFrame::new(cols).context("[store::table] ragged columns")?;
        Ok(Self { schema, frame, srid })
    }

    /// An empty table with the given schema.
    pub fn empty(schema: Schema, srid: Option<i32>) -> Result<Self> {
        let width = schema.len();
        Self::from_columns(schema, vec![Vec::new(); width], srid)
    }

    /// Wrap an existing frame, checking it matches the schema.
    pub(crate) fn from_frame(schema: Schema, frame: DataFrame, srid: Option<i32>) -> Result<Self> {
        ensure!(frame.width() == schema.len(), "[store::table] frame width {} != schema width {}", frame.width(), schema.len());
        for (col, def) in frame.get_columns().iter().zip(schema.columns()) {
            ensure!(col.name().as_str() == def.name, "[store::table] frame column '{}' != schema column '{}'", col.name(), def.name);
            ensure!(col.dtype() == &def.ty.dtype(), "[store::table] column '{}' has dtype {:?}, expected {:?}", def.name, col.dtype(), def.ty.dtype());
        }
        Ok(Self { schema, frame, srid })
    }

    #[inline] pub fn schema(&self) -> &Schema { &self.schema }

    #[inline] pub(crate) fn frame(&self) -> &DataFrame { &self.frame }

    #[inline] pub fn srid(&self) -> Option<i32> { self.srid }

    #[inline] pub fn height(&self) -> usize { self.frame.height() }

    #[inline] pub fn is_empty(&self) -> bool { self.frame.height() == 0 }

    pub fn with_srid(mut self, srid: Option<i32>) -> Self {
        self.srid = srid;
        self
    }

    /// Read one cell.
    pub fn value(&self, row: usize, column: &str) -> Result<Value> {
        let col = self.frame.column(column)
            .with_context(|| format!("[store::table] no column '{column}'"))?;
        let av = col.as_materialized_series().get(row)
            .with_context(|| format!("[store::table] row {row} out of bounds"))?;
        Value::from_any(av)
    }

    /// All values of one column.
    pub fn column_values(&self, column: &str) -> Result<Vec<Value>> {
        let col = self.frame.column(column)
            .with_context(|| format!("[store::table] no column '{column}'"))?;
        let series = col.as_materialized_series();
        (0..series.len())
            .map(|i| Value::from_any(series.get(i)?))
            .collect()
    }

    /// All rows, in schema column order.
    pub fn rows(&self) -> Result<Vec<Vec<Value>>> {
        let columns = self.schema.names()
            .map(|n| self.column_values(n))
            .collect::<Result<Vec<_>>>()?;
        Ok((0..self.height())
            .map(|i| columns.iter().map(|c| c[i].clone()).collect())
            .collect())
    }

    /// Decode a geometry column; null cells decode to `None`.
    pub fn geometries(&self, column: &str) -> Result<Vec<Option<Geometry<f64>>>> {
        match self.schema.get(column) {
            Some(def) if def.ty == ColumnType::Geometry => {}
            _ => bail!("[store::table] '{column}' is not a geometry column"),
        }
        self.column_values(column)?
            .into_iter()
            .enumerate()
            .map(|(i, v)| match v {
                Value::Blob(bytes) => geom::from_wkb(&bytes)
                    .map(Some)
                    .with_context(|| format!("[store::table] invalid geometry in row {i} of '{column}'")),
                _ => Ok(None),
            })
            .collect()
    }

    /// Geometries of the first geometry column.
    pub fn main_geometries(&self) -> Result<Vec<Option<Geometry<f64>>>> {
        let column = self.schema.geometry_column()
            .ok_or_else(|| anyhow!("[store::table] table has no geometry column"))?;
        self.geometries(column)
    }

    /// Keep rows where `keep[i]` is true.
    pub fn filter(&self, keep: &[bool]) -> Result<Self> {
        ensure!(keep.len() == self.height(), "[store::table] mask length {} != height {}", keep.len(), self.height());
        let mask = BooleanChunked::new("mask".into(), keep);
        let frame = self.frame.filter(&mask)?;
        Ok(Self { schema: self.schema.clone(), frame, srid: self.srid })
    }

    /// Append a column of values.
    pub fn with_column(mut self, def: ColumnDef, values: Vec<Value>) -> Result<Self> {
        ensure!(values.len() == self.height(), "[store::table] column '{}' has {} values for {} rows", def.name, values.len(), self.height());
        let column = build_column(&def, &values)?;
        self.schema.push(def)?;
        self.frame.with_column(column)?;
        Ok(self)
    }

    /// Rewrite every geometry of every geometry column.
    pub fn map_geometries(
        &self,
        srid: Option<i32>,
        f: impl Fn(&Geometry<f64>) -> Result<Geometry<f64>>,
    ) -> Result<Self> {
        let mut columns = Vec::with_capacity(self.schema.len());
        for def in self.schema.columns() {
            if def.ty == ColumnType::Geometry {
                let values = self.geometries(&def.name)?
                    .into_iter()
                    .map(|g| match g {
                        Some(g) => f(&g).map(|g| Value::geometry(&g)),
                        None => Ok(Value::Null),
                    })
                    .collect::<Result<Vec<_>>>()?;
                columns.push(values);
            } else {
                columns.push(self.column_values(&def.name)?);
            }
        }
        Self::from_columns(self.schema.clone(), columns, srid)
    }
}
