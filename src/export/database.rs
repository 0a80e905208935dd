//! DatabaseExporter: append result tables to a SQLite destination store.

use std::{collections::BTreeMap, path::Path};

use ahash::AHashSet;
use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, types::Value as SqlValue, Connection, OptionalExtension, Transaction};
use tracing::{debug, error, info};

use crate::config::DatabaseOutput;
use crate::error::{chain_message, Error};
use crate::export::RowPredicate;
use crate::store::{ColumnDef, ColumnType, GeoTable, Value, WorkingStore};
use crate::workflow::{log_table, ExportFailure, LocationFailure, ResultSet, LOG_CATEGORY};

/// Rows per INSERT statement.
pub const BATCH_SIZE: usize = 100;

pub const ZONE_COLUMN: &str = "id_zone";
pub const KEY_COLUMN: &str = "gid";

const SINK: &str = "database";

pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn sql_value(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Bool(b) => SqlValue::Integer(*b as i64),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

/// Declared type used when adding a column to an existing table.
fn added_column_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Decfloat => ColumnType::Double.sql_name(),
        other => other.sql_name(),
    }
}

fn table_exists(tx: &Transaction<'_>, table: &str) -> Result<bool> {
    let found: Option<String> = tx
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Column names and declared types of a destination table.
pub(crate) fn table_columns(conn: &Connection, table: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote(table)))?;
    let columns = stmt
        .query_map([], |row| Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Source columns copied to the destination: everything but the surrogate
/// key and the zone identifier, which the exporter owns.
fn copied_columns(table: &GeoTable) -> Vec<&ColumnDef> {
    table.schema().columns().iter()
        .filter(|c| !c.name.eq_ignore_ascii_case(KEY_COLUMN) && !c.name.eq_ignore_ascii_case(ZONE_COLUMN))
        .collect()
}

/// How the zone identifier of each inserted row is chosen.
#[derive(Clone, Copy)]
enum Zone<'a> {
    /// Every row belongs to this location; its previous rows may be replaced.
    Location(&'a str),
    /// Taken from a source column.
    Column(&'a str),
}

pub struct DatabaseExporter {
    conn: Connection,
    tables: BTreeMap<String, String>,
    filters: BTreeMap<String, RowPredicate>,
    delete: bool,
    srid: Option<i32>,
}

impl DatabaseExporter {
    /// Open the destination store; failure is a resource error.
    pub fn open(output: &DatabaseOutput, srid: Option<i32>) -> crate::Result<Self> {
        let conn = Self::connect(&output.path)
            .map_err(|e| Error::resource(format!("cannot open destination database: {}", chain_message(&e))))?;
        Ok(Self { conn, tables: output.tables.clone(), filters: output.filters.clone(), delete: output.delete, srid })
    }

    fn connect(path: &Path) -> Result<Connection> {
        let conn = Connection::open(path)
            .with_context(|| format!("[export::database] {}", path.display()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS geometry_columns (
                f_table_name TEXT NOT NULL,
                f_geometry_column TEXT NOT NULL,
                srid INTEGER,
                PRIMARY KEY (f_table_name, f_geometry_column)
            )",
            [],
        )?;
        Ok(conn)
    }

    #[inline] pub fn connection(&self) -> &Connection { &self.conn }

    /// Export every configured category present in `results`, through its
    /// row filter when one is configured.
    pub fn export(&mut self, store: &WorkingStore, location: &str, results: &ResultSet) -> Vec<ExportFailure> {
        let mut failures = Vec::new();
        let targets: Vec<(String, String)> = self.tables.iter()
            .filter(|(category, _)| category.as_str() != LOG_CATEGORY)
            .map(|(c, t)| (c.clone(), t.clone()))
            .collect();
        for (category, target) in targets {
            let Some(handle) = results.get(&category) else {
                debug!(location, category = %category, "nothing to export");
                continue;
            };
            let predicate = self.filters.get(&category).cloned();
            let exported = self.prepare(store, handle).and_then(|table| match &predicate {
                Some(predicate) => self.export_filtered(&table, &target, location, predicate),
                None => self.export_table(&table, &target, location),
            });
            match exported {
                Ok(rows) => info!(location, category = %category, table = %target, rows, "exported to database"),
                Err(e) => {
                    let message = chain_message(&e);
                    error!(location, category = %category, table = %target, error = %message, "database export failed");
                    failures.push(ExportFailure {
                        location: location.to_string(),
                        category,
                        sink: SINK.to_string(),
                        message,
                    });
                }
            }
        }
        failures
    }

    fn prepare(&self, store: &WorkingStore, handle: &str) -> Result<GeoTable> {
        match self.srid {
            Some(srid) => store.reprojected(handle, srid),
            None => Ok(store.get(handle)?.clone()),
        }
    }

    /// Append the failure log, when a `logs` table is configured.
    pub fn export_log(&mut self, failures: &[LocationFailure]) -> Result<()> {
        let Some(target) = self.tables.get(LOG_CATEGORY).cloned() else { return Ok(()) };
        if failures.is_empty() {
            return Ok(());
        }
        let table = log_table(failures)?;
        let rows = self.write(&table, &target, Zone::Column("location"))?;
        info!(table = %target, rows, "exported failure log");
        Ok(())
    }

    /// Copy `table` into `target`, tagging every row with `location`.
    pub fn export_table(&mut self, table: &GeoTable, target: &str, location: &str) -> Result<usize> {
        self.write(table, target, Zone::Location(location))
    }

    /// Like [`export_table`](Self::export_table) for the rows matching `predicate`.
    pub fn export_filtered(&mut self, table: &GeoTable, target: &str, location: &str, predicate: &RowPredicate) -> Result<usize> {
        let filtered = table.filter(&predicate.mask(table)?)?;
        self.write(&filtered, target, Zone::Location(location))
    }

    /// Create or extend `target`, then insert every row in batches, all in one transaction.
    fn write(&mut self, table: &GeoTable, target: &str, zone: Zone<'_>) -> Result<usize> {
        let ctx = || format!("[export::database] writing '{target}'");
        let columns = copied_columns(table);
        let tx = self.conn.transaction().with_context(ctx)?;

        if table_exists(&tx, target)? {
            let existing: AHashSet<String> = table_columns(&tx, target)?
                .into_iter()
                .map(|(c, _)| c.to_ascii_lowercase())
                .collect();
            let has = |name: &str| existing.contains(&name.to_ascii_lowercase());
            for col in columns.iter().filter(|c| !has(&c.name)) {
                tx.execute(
                    &format!("ALTER TABLE {} ADD COLUMN {} {}", quote(target), quote(&col.name), added_column_type(col.ty)),
                    [],
                ).with_context(ctx)?;
                debug!(table = target, column = %col.name, "added destination column");
            }
            if !has(ZONE_COLUMN) {
                tx.execute(&format!("ALTER TABLE {} ADD COLUMN {ZONE_COLUMN} TEXT", quote(target)), []).with_context(ctx)?;
            }
            if let Zone::Location(location) = zone {
                if self.delete {
                    let removed = tx.execute(&format!("DELETE FROM {} WHERE {ZONE_COLUMN} = ?1", quote(target)), [location])?;
                    debug!(table = target, location, removed, "deleted previous rows");
                }
            }
        } else {
            let mut defs = vec![format!("{KEY_COLUMN} INTEGER PRIMARY KEY AUTOINCREMENT")];
            defs.extend(columns.iter().map(|c| format!("{} {}", quote(&c.name), c.ty.sql_name())));
            defs.push(format!("{ZONE_COLUMN} TEXT"));
            tx.execute(&format!("CREATE TABLE {} ({})", quote(target), defs.join(", ")), []).with_context(ctx)?;
            info!(table = target, columns = columns.len(), "created destination table");
        }

        for col in columns.iter().filter(|c| c.ty == ColumnType::Geometry) {
            tx.execute(
                "INSERT OR REPLACE INTO geometry_columns (f_table_name, f_geometry_column, srid) VALUES (?1, ?2, ?3)",
                params![target, col.name, table.srid()],
            )?;
        }

        let values = columns.iter()
            .map(|c| table.column_values(&c.name))
            .collect::<Result<Vec<_>>>()?;
        let zones: Vec<String> = match zone {
            Zone::Location(location) => vec![location.to_string(); table.height()],
            Zone::Column(name) => table.column_values(name)?.iter()
                .map(|v| v.as_text().map(Option::unwrap_or_default))
                .collect::<Result<_>>()?,
        };

        let mut names: Vec<String> = columns.iter().map(|c| quote(&c.name)).collect();
        names.push(ZONE_COLUMN.to_string());
        let row_placeholder = format!("({})", vec!["?"; names.len()].join(", "));
        let insert = |rows: usize| format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote(target),
            names.join(", "),
            vec![row_placeholder.as_str(); rows].join(", "),
        );

        let height = table.height();
        let mut start = 0;
        while start < height {
            let end = (start + BATCH_SIZE).min(height);
            let mut stmt = tx.prepare_cached(&insert(end - start))?;
            let params = (start..end).flat_map(|row| {
                values.iter()
                    .map(move |col| sql_value(&col[row]))
                    .chain(std::iter::once(SqlValue::Text(zones[row].clone())))
            });
            stmt.execute(params_from_iter(params)).with_context(ctx)?;
            start = end;
        }

        tx.commit().with_context(ctx)?;
        Ok(height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Schema;
    use geo::{point, Geometry};

    fn exporter(dir: &Path, delete: bool) -> DatabaseExporter {
        let output = DatabaseOutput {
            path: dir.join("out.db"),
            tables: [("building".to_string(), "building_out".to_string())].into_iter().collect(),
            delete,
            filters: BTreeMap::new(),
        };
        DatabaseExporter::open(&output, None).unwrap()
    }

    fn buildings(rows: usize, with_pop: bool) -> GeoTable {
        let mut cols = vec![("id_build", ColumnType::Integer), ("the_geom", ColumnType::Geometry)];
        if with_pop {
            cols.push(("pop", ColumnType::Decfloat));
        }
        let rows = (0..rows)
            .map(|i| {
                let mut r = vec![Value::Int(i as i64), Value::geometry(&Geometry::Point(point!(x: i as f64, y: 0.0)))];
                if with_pop {
                    r.push(Value::Float(1.5));
                }
                r
            })
            .collect();
        GeoTable::from_rows(Schema::of(&cols).unwrap(), rows, Some(2154)).unwrap()
    }

    fn count(conn: &Connection, sql: &str) -> i64 {
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[test]
    fn new_table_gets_key_and_zone_columns() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = exporter(dir.path(), false);
        assert_eq!(db.export_table(&buildings(250, false), "building_out", "A").unwrap(), 250);

        let conn = db.connection();
        let cols: Vec<String> = table_columns(conn, "building_out").unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(cols, vec!["gid", "id_build", "the_geom", "id_zone"]);
        assert_eq!(count(conn, "SELECT COUNT(*) FROM building_out WHERE id_zone = 'A'"), 250);
        assert_eq!(count(conn, "SELECT MAX(gid) FROM building_out"), 250);
        assert_eq!(count(conn, "SELECT srid FROM geometry_columns WHERE f_table_name = 'building_out'"), 2154);
    }

    #[test]
    fn existing_table_is_extended_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = exporter(dir.path(), false);
        db.export_table(&buildings(3, false), "building_out", "A").unwrap();
        db.export_table(&buildings(2, true), "building_out", "B").unwrap();

        let conn = db.connection();
        let cols = table_columns(conn, "building_out").unwrap();
        assert_eq!(cols.last().unwrap(), &("pop".to_string(), "DOUBLE PRECISION".to_string()));
        assert_eq!(count(conn, "SELECT COUNT(*) FROM building_out"), 5);
        assert_eq!(count(conn, "SELECT COUNT(*) FROM building_out WHERE id_zone = 'A' AND pop IS NULL"), 3);
        assert_eq!(count(conn, "SELECT COUNT(*) FROM building_out WHERE id_zone = 'B' AND pop = 1.5"), 2);
    }

    #[test]
    fn delete_replaces_the_location_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = exporter(dir.path(), true);
        db.export_table(&buildings(3, false), "building_out", "A").unwrap();
        db.export_table(&buildings(1, false), "building_out", "B").unwrap();
        db.export_table(&buildings(2, false), "building_out", "A").unwrap();
        let conn = db.connection();
        assert_eq!(count(conn, "SELECT COUNT(*) FROM building_out WHERE id_zone = 'A'"), 2);
        assert_eq!(count(conn, "SELECT COUNT(*) FROM building_out WHERE id_zone = 'B'"), 1);
    }

    #[test]
    fn filtered_export_keeps_matching_rows() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = exporter(dir.path(), false);
        let schema = Schema::of(&[("id_rsu", ColumnType::Integer), ("id_block", ColumnType::Integer)]).unwrap();
        let table = GeoTable::from_rows(schema, vec![
            vec![Value::Int(1), Value::Int(10)],
            vec![Value::Int(2), Value::Null],
        ], None).unwrap();
        let rows = db.export_filtered(&table, "rsu_out", "A", &RowPredicate::NotNull("id_block".into())).unwrap();
        assert_eq!(rows, 1);
        assert_eq!(count(db.connection(), "SELECT id_rsu FROM rsu_out"), 1);
    }

    #[test]
    fn source_zone_and_key_columns_are_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = exporter(dir.path(), false);
        let schema = Schema::of(&[("gid", ColumnType::Integer), ("id_zone", ColumnType::Text), ("v", ColumnType::Double)]).unwrap();
        let table = GeoTable::from_rows(schema, vec![vec![Value::Int(77), Value::Text("old".into()), Value::Float(1.0)]], None).unwrap();
        db.export_table(&table, "t", "A").unwrap();
        let conn = db.connection();
        assert_eq!(count(conn, "SELECT gid FROM t"), 1);
        assert_eq!(count(conn, "SELECT COUNT(*) FROM t WHERE id_zone = 'A'"), 1);
    }

    #[test]
    fn failed_batch_rolls_back_only_its_category() {
        let dir = tempfile::tempdir().unwrap();
        let output = DatabaseOutput {
            path: dir.path().join("out.db"),
            tables: [("building", "building_out"), ("road", "road_out")]
                .into_iter()
                .map(|(c, t)| (c.to_string(), t.to_string()))
                .collect(),
            delete: false,
            filters: BTreeMap::new(),
        };
        let mut db = DatabaseExporter::open(&output, None).unwrap();
        // Row 150 violates the constraint, after the first batch was inserted.
        db.connection().execute(
            "CREATE TABLE building_out (gid INTEGER PRIMARY KEY AUTOINCREMENT, id_build INTEGER CHECK (id_build <> 149), the_geom GEOMETRY, id_zone TEXT)",
            [],
        ).unwrap();

        let mut store = WorkingStore::open(dir.path(), "work", true).unwrap();
        store.put("b", buildings(250, false));
        store.put("r", buildings(5, false));
        let results = ResultSet::new().with("building", "b").with("road", "r");

        let failures = db.export(&store, "A", &results);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].category, "building");
        assert_eq!(failures[0].sink, "database");
        let conn = db.connection();
        assert_eq!(count(conn, "SELECT COUNT(*) FROM building_out"), 0);
        assert_eq!(count(conn, "SELECT COUNT(*) FROM road_out WHERE id_zone = 'A'"), 5);
        store.close().unwrap();
    }

    #[test]
    fn configured_filter_applies_to_its_category() {
        let dir = tempfile::tempdir().unwrap();
        let output = DatabaseOutput {
            path: dir.path().join("out.db"),
            tables: [("building".to_string(), "building_out".to_string())].into_iter().collect(),
            delete: false,
            filters: [("building".to_string(), RowPredicate::Equals("id_build".into(), Value::Int(2)))].into_iter().collect(),
        };
        let mut db = DatabaseExporter::open(&output, None).unwrap();
        let mut store = WorkingStore::open(dir.path(), "work", true).unwrap();
        store.put("b", buildings(4, false));

        assert!(db.export(&store, "A", &ResultSet::new().with("building", "b")).is_empty());
        assert_eq!(count(db.connection(), "SELECT COUNT(*) FROM building_out"), 1);
        assert_eq!(count(db.connection(), "SELECT id_build FROM building_out"), 2);
        store.close().unwrap();
    }
}
