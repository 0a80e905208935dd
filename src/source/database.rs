//! SQLite source: layers named by the configured table map.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{ensure, Context, Result};
use rusqlite::{types::ValueRef, Connection, OpenFlags, OptionalExtension};
use tracing::{debug, info};

use crate::error::chain_message;
use crate::export::{quote, table_columns};
use crate::source::{link, LoadedLocation, SourceLoader, SourceTables, ZONE_LAYER};
use crate::store::{ColumnDef, ColumnType, GeoTable, Schema, TableNamer, Value, WorkingStore};
use crate::workflow::Location;

fn value_of(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

/// SRID registered for a geometry column, if the source keeps a registry.
fn registered_srid(conn: &Connection, table: &str, column: &str) -> Result<Option<i32>> {
    let has_registry: Option<String> = conn
        .query_row("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'geometry_columns'", [], |row| row.get(0))
        .optional()?;
    if has_registry.is_none() {
        return Ok(None);
    }
    let srid: Option<Option<i32>> = conn
        .query_row(
            "SELECT srid FROM geometry_columns WHERE f_table_name = ?1 AND f_geometry_column = ?2",
            [table, column],
            |row| row.get(0),
        )
        .optional()?;
    Ok(srid.flatten())
}

/// Read a whole source table; declared types map onto column types.
fn read_table(conn: &Connection, table: &str) -> Result<GeoTable> {
    let columns = table_columns(conn, table)?;
    ensure!(!columns.is_empty(), "[source::database] table '{table}' not found");
    let schema = Schema::new(columns.iter()
        .map(|(name, ty)| ColumnDef::new(name, ColumnType::from_sql_name(ty)))
        .collect())?;
    let srid = match schema.geometry_column() {
        Some(column) => registered_srid(conn, table, column)?,
        None => None,
    };

    let names = schema.names().map(quote).collect::<Vec<_>>().join(", ");
    let mut stmt = conn.prepare(&format!("SELECT {names} FROM {}", quote(table)))?;
    let width = schema.len();
    let rows = stmt
        .query_map([], |row| (0..width).map(|i| row.get_ref(i).map(value_of)).collect::<rusqlite::Result<Vec<_>>>())?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    GeoTable::from_rows(schema, rows, srid)
        .with_context(|| format!("[source::database] table '{table}'"))
}

pub struct DatabaseLoader {
    conn: Connection,
    tables: BTreeMap<String, String>,
    srid: Option<i32>,
    distance: f64,
    cache: Option<SourceTables>,
}

impl DatabaseLoader {
    /// Open the source read-only; failure is a resource error.
    pub fn open(path: &Path, tables: BTreeMap<String, String>, srid: Option<i32>, distance: f64) -> crate::Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .with_context(|| format!("[source::database] {}", path.display()))
            .map_err(|e| crate::Error::resource(format!("cannot open input database: {}", chain_message(&e))))?;
        Ok(Self { conn, tables, srid, distance, cache: None })
    }

    fn read(&self) -> Result<SourceTables> {
        let mut out = SourceTables::default();
        for (layer, table) in &self.tables {
            let data = read_table(&self.conn, table)?;
            debug!(layer, table, rows = data.height(), "read layer");
            if layer == ZONE_LAYER {
                out.zone = Some(data);
            } else {
                out.layers.push((layer.clone(), data));
            }
        }
        info!(layers = out.layers.len(), "read input database");
        Ok(out)
    }
}

impl SourceLoader for DatabaseLoader {
    fn load(&mut self, store: &mut WorkingStore, namer: &TableNamer, location: &Location) -> Result<LoadedLocation> {
        if self.cache.is_none() {
            self.cache = Some(self.read()?);
        }
        let tables = self.cache.get_or_insert_with(SourceTables::default);
        link(store, namer, location, tables, self.srid, self.distance)
    }
}
