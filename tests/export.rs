use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Result;
use geo::{polygon, Geometry};
use geoclimate::config::{parse, DatabaseOutput};
use geoclimate::export::{DatabaseExporter, RowPredicate, KEY_COLUMN, ZONE_COLUMN};
use geoclimate::source::{FolderLoader, LayerClipProcessor, LoadedLocation, SourceLoader, SubAreaInput, SubAreaProcessor};
use geoclimate::store::{ColumnType, GeoTable, Schema, TableNamer, Value, WorkingStore};
use geoclimate::{GridIndicator, Location, ResultSet, RsuIndicator, Workflow};
use rusqlite::Connection;

fn square() -> Geometry<f64> {
    Geometry::Polygon(polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)])
}

struct SquareLoader;

impl SourceLoader for SquareLoader {
    fn load(&mut self, store: &mut WorkingStore, namer: &TableNamer, location: &Location) -> Result<LoadedLocation> {
        let id = location.id();
        let schema = Schema::of(&[("id_zone", ColumnType::Text), ("the_geom", ColumnType::Geometry)])?;
        let zone = namer.name(&id, "input_zone");
        store.put(&zone, GeoTable::from_rows(schema, vec![vec![Value::Text(id), Value::geometry(&square())]], Some(2154))?);
        Ok(LoadedLocation { zone, srid: 2154, layers: BTreeMap::new() })
    }
}

/// Three buildings per sub-area, optionally with a `pop` column.
struct Buildings {
    with_pop: bool,
}

impl SubAreaProcessor for Buildings {
    fn process(&mut self, store: &mut WorkingStore, input: &SubAreaInput<'_>) -> Result<Option<ResultSet>> {
        let mut cols = vec![("the_geom", ColumnType::Geometry), ("height_roof", ColumnType::Decfloat)];
        if self.with_pop {
            cols.push(("pop", ColumnType::Decfloat));
        }
        let rows = (0..3)
            .map(|i| {
                let mut row = vec![Value::geometry(&square()), Value::Float(3.0 + i as f64)];
                if self.with_pop {
                    row.push(Value::Float(10.0));
                }
                row
            })
            .collect();
        let name = input.namer.name(&input.sub_area.id, "building");
        store.put(&name, GeoTable::from_rows(Schema::of(&cols)?, rows, Some(input.srid))?);
        Ok(Some(ResultSet::new().with("building", &name)))
    }
}

fn run(root: &Path, db: &Path, locations: &str, with_pop: bool) {
    let doc = format!(
        r#"{{"geoclimatedb": {{"folder": {:?}, "name": "db"}},
            "input": {{"folder": {:?}, "locations": [{locations}]}},
            "output": {{"database": {{"connection": {{"path": {:?}}}, "tables": {{"building": "building_out"}}}}}}}}"#,
        root, root, db
    );
    let outcome = Workflow::new(parse(&doc).unwrap(), SquareLoader, Buildings { with_pop }).run().unwrap();
    assert!(outcome.is_complete(), "{:?}", outcome.export_failures);
}

fn count(conn: &Connection, sql: &str) -> i64 {
    conn.query_row(sql, [], |row| row.get(0)).unwrap()
}

#[test]
fn new_destination_table_gets_zone_and_key() {
    let root = tempfile::tempdir().unwrap();
    let db = root.path().join("out.sqlite");
    run(root.path(), &db, r#""56260""#, false);

    let conn = Connection::open(&db).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM building_out"), 3);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM building_out WHERE id_zone = '56260'"), 3);
    let columns: Vec<String> = conn.prepare("SELECT name FROM pragma_table_info('building_out')").unwrap()
        .query_map([], |row| row.get(0)).unwrap()
        .collect::<Result<_, _>>().unwrap();
    assert!(columns.iter().any(|c| c == KEY_COLUMN));
    assert!(columns.iter().any(|c| c == ZONE_COLUMN));
}

#[test]
fn existing_destination_table_is_extended() {
    let root = tempfile::tempdir().unwrap();
    let db = root.path().join("out.sqlite");
    run(root.path(), &db, r#""A""#, false);
    run(root.path(), &db, r#""B""#, true);

    let conn = Connection::open(&db).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM building_out"), 6);
    // Rows of the first run are untouched and padded with nulls.
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM building_out WHERE id_zone = 'A' AND pop IS NULL"), 3);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM building_out WHERE id_zone = 'B' AND pop = 10.0"), 3);
    let pop_type: String = conn
        .query_row("SELECT type FROM pragma_table_info('building_out') WHERE name = 'pop'", [], |row| row.get(0))
        .unwrap();
    assert_eq!(pop_type, "DOUBLE PRECISION");
}

#[test]
fn filtered_export_skips_unassigned_rows() {
    let root = tempfile::tempdir().unwrap();
    let output = DatabaseOutput { path: root.path().join("out.sqlite"), tables: BTreeMap::new(), delete: false, filters: BTreeMap::new() };
    let mut exporter = DatabaseExporter::open(&output, None).unwrap();
    let schema = Schema::of(&[("the_geom", ColumnType::Geometry), ("id_block", ColumnType::BigInt)]).unwrap();
    let table = GeoTable::from_rows(schema, vec![
        vec![Value::geometry(&square()), Value::Int(1)],
        vec![Value::geometry(&square()), Value::Null],
    ], Some(2154)).unwrap();

    let rows = exporter.export_filtered(&table, "rsu_out", "A", &RowPredicate::NotNull("id_block".into())).unwrap();
    assert_eq!(rows, 1);
    assert_eq!(count(exporter.connection(), "SELECT COUNT(*) FROM rsu_out"), 1);
}

/// One RSU row per block id, some unassigned.
struct Rsu;

impl SubAreaProcessor for Rsu {
    fn process(&mut self, store: &mut WorkingStore, input: &SubAreaInput<'_>) -> Result<Option<ResultSet>> {
        let schema = Schema::of(&[("the_geom", ColumnType::Geometry), ("id_block", ColumnType::BigInt)])?;
        let rows = [Value::Int(1), Value::Null, Value::Int(2), Value::Null]
            .into_iter()
            .map(|block| vec![Value::geometry(&square()), block])
            .collect();
        let name = input.namer.name(&input.sub_area.id, "rsu_lcz");
        store.put(&name, GeoTable::from_rows(schema, rows, Some(input.srid))?);
        Ok(Some(ResultSet::new().with("rsu_lcz", &name)))
    }
}

#[test]
fn configured_filter_is_applied_during_the_run() {
    let root = tempfile::tempdir().unwrap();
    let db = root.path().join("out.sqlite");
    let doc = format!(
        r#"{{"geoclimatedb": {{"folder": {:?}, "name": "db"}},
            "input": {{"folder": {:?}, "locations": ["A"]}},
            "output": {{"database": {{"connection": {{"path": {:?}}},
                "tables": {{"rsu_lcz": "rsu_lcz_out"}},
                "filters": {{"rsu_lcz": {{"not_null": "id_block"}}}}}}}}}}"#,
        root.path(), root.path(), db
    );
    let outcome = Workflow::new(parse(&doc).unwrap(), SquareLoader, Rsu).run().unwrap();
    assert!(outcome.is_complete(), "{:?}", outcome.export_failures);

    let conn = Connection::open(&db).unwrap();
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM rsu_lcz_out"), 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM rsu_lcz_out WHERE id_block IS NULL"), 0);
}

#[test]
fn lcz_primary_pulls_in_the_lcz_family() {
    let params = parse(r#"{
        "input": {"folder": "/data", "locations": ["A"]},
        "parameters": {
            "rsu_indicators": {"indicatorUse": ["UTRF"]},
            "grid_indicators": {"x_size": 100, "y_size": 100, "indicators": ["LCZ_PRIMARY"]}
        }
    }"#).unwrap();
    let rsu = params.processing.rsu.unwrap();
    assert!(rsu.uses(RsuIndicator::Lcz));
    assert!(rsu.uses(RsuIndicator::Utrf));
    assert_eq!(params.processing.grid.unwrap().indicators, vec![GridIndicator::LczPrimary]);
}

#[test]
fn folder_source_end_to_end() {
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("in");
    let out = root.path().join("out");
    fs::create_dir(&input).unwrap();
    fs::write(input.join("zone.geojson"), r#"{"type":"FeatureCollection","crs":{"type":"name","properties":{"name":"EPSG:2154"}},"features":[
        {"type":"Feature","properties":{"id_zone":"Z"},"geometry":{"type":"Polygon","coordinates":[[[0,0],[100,0],[100,100],[0,100],[0,0]]]}}]}"#).unwrap();
    fs::write(input.join("building.geojson"), r#"{"type":"FeatureCollection","crs":{"type":"name","properties":{"name":"EPSG:2154"}},"features":[
        {"type":"Feature","properties":{"height_roof":6},"geometry":{"type":"Polygon","coordinates":[[[0,0],[50,0],[50,50],[0,50],[0,0]]]}}]}"#).unwrap();

    let doc = format!(
        r#"{{"geoclimatedb": {{"folder": {:?}}},
            "input": {{"folder": {:?}, "locations": ["Z"]}},
            "output": {{"folder": {:?}}},
            "parameters": {{"grid_indicators": {{"x_size": 50, "y_size": 50, "indicators": ["BUILDING_FRACTION"], "output": "asc"}}}}}}"#,
        root.path(), input, out
    );
    let params = parse(&doc).unwrap();
    let loader = FolderLoader::open(&input, None, params.processing.distance).unwrap();
    let outcome = Workflow::new(params, loader, LayerClipProcessor).run().unwrap();

    assert!(outcome.is_complete(), "{:?} {:?}", outcome.failures, outcome.export_failures);
    let categories = outcome.results["Z"].categories().collect::<Vec<_>>();
    assert_eq!(categories, vec!["building", "grid_indicators", "zone"]);
    assert!(out.join("Z").join("building.geojson").exists());
    let asc = fs::read_to_string(out.join("Z").join("grid_indicators_BUILDING_FRACTION.asc")).unwrap();
    assert!(asc.starts_with("ncols 2"));
}
