//! AreaDecomposer: split a zone into single-part sub-areas.

use anyhow::{bail, ensure, Context, Result};
use geo::{Geometry, HasDimensions, Polygon};
use tracing::debug;

use crate::store::{ColumnType, GeoTable, Schema, TableNamer, Value, WorkingStore};

/// One independently processable part of a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubArea {
    pub id: String,
    /// Handle of the single-row `(id_zone, the_geom)` table.
    pub table: String,
}

/// Sub-area ids for `parts` non-empty parts of `location`.
pub fn sub_area_ids(location: &str, parts: usize) -> Vec<String> {
    match parts {
        0 => Vec::new(),
        1 => vec![location.to_string()],
        n => (1..=n).map(|k| format!("{location}_{k}")).collect(),
    }
}

/// Polygon parts of a zone geometry, in part order, with empty parts removed.
pub fn split_parts(geom: &Geometry<f64>) -> Result<Vec<Polygon<f64>>> {
    let mut parts = Vec::new();
    collect_parts(geom, &mut parts)?;
    Ok(parts)
}

fn collect_parts(geom: &Geometry<f64>, out: &mut Vec<Polygon<f64>>) -> Result<()> {
    match geom {
        Geometry::Polygon(p) => {
            if !p.is_empty() {
                out.push(p.clone());
            }
        }
        Geometry::MultiPolygon(mp) => {
            out.extend(mp.0.iter().filter(|p| !p.is_empty()).cloned());
        }
        Geometry::Rect(r) => out.push(r.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for g in &gc.0 {
                collect_parts(g, out)?;
            }
        }
        other => bail!("[workflow::decompose] zone geometry must be polygonal, got {}", geometry_kind(other)),
    }
    Ok(())
}

fn geometry_kind(geom: &Geometry<f64>) -> &'static str {
    match geom {
        Geometry::Point(_) => "a point",
        Geometry::Line(_) | Geometry::LineString(_) => "a line",
        Geometry::MultiPoint(_) => "a multipoint",
        Geometry::MultiLineString(_) => "a multiline",
        _ => "an unsupported geometry",
    }
}

/// Decompose the zone table of `location` into sub-area tables.
///
/// All zone rows contribute their parts in row order. A zone without any
/// non-empty part is an error for the location.
pub fn decompose(
    store: &mut WorkingStore,
    namer: &TableNamer,
    zone_table: &str,
    location: &str,
) -> Result<Vec<SubArea>> {
    let zone = store.get(zone_table)?;
    let srid = zone.srid();
    let mut parts = Vec::new();
    for geom in zone.main_geometries()?.into_iter().flatten() {
        parts.extend(split_parts(&geom).with_context(|| format!("[workflow::decompose] zone of '{location}'"))?);
    }
    ensure!(!parts.is_empty(), "[workflow::decompose] zone of '{location}' has no non-empty part");

    let schema = Schema::of(&[("id_zone", ColumnType::Text), ("the_geom", ColumnType::Geometry)])?;
    let ids = sub_area_ids(location, parts.len());
    let mut sub_areas = Vec::with_capacity(parts.len());
    for (id, part) in ids.into_iter().zip(parts) {
        let table = GeoTable::from_rows(
            schema.clone(),
            vec![vec![Value::Text(id.clone()), Value::geometry(&Geometry::Polygon(part))]],
            srid,
        )?;
        let name = namer.name(&id, "subarea");
        store.put(&name, table);
        sub_areas.push(SubArea { id, table: name });
    }
    debug!(location, sub_areas = sub_areas.len(), "decomposed zone");
    Ok(sub_areas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, GeometryCollection, MultiPolygon, point};

    fn square(x: f64) -> Polygon<f64> {
        polygon![(x: x, y: 0.0), (x: x + 1.0, y: 0.0), (x: x + 1.0, y: 1.0), (x: x, y: 1.0), (x: x, y: 0.0)]
    }

    fn empty() -> Polygon<f64> { Polygon::new(geo::LineString(vec![]), vec![]) }

    #[test]
    fn ids_follow_part_count() {
        assert_eq!(sub_area_ids("A", 1), vec!["A"]);
        assert_eq!(sub_area_ids("B", 3), vec!["B_1", "B_2", "B_3"]);
        assert!(sub_area_ids("C", 0).is_empty());
    }

    #[test]
    fn empty_parts_are_skipped() {
        let mp = Geometry::MultiPolygon(MultiPolygon(vec![square(0.0), empty(), square(5.0)]));
        let parts = split_parts(&mp).unwrap();
        assert_eq!(parts, vec![square(0.0), square(5.0)]);

        let gc = Geometry::GeometryCollection(GeometryCollection(vec![Geometry::Polygon(empty())]));
        assert!(split_parts(&gc).unwrap().is_empty());
    }

    #[test]
    fn points_are_rejected() {
        assert!(split_parts(&Geometry::Point(point!(x: 1.0, y: 1.0))).is_err());
    }

    #[test]
    fn decompose_materializes_one_table_per_part() {
        let root = tempfile::tempdir().unwrap();
        let mut store = WorkingStore::open(root.path(), "db", true).unwrap();
        let namer = TableNamer::new("", "t");
        let schema = Schema::of(&[("id_zone", ColumnType::Text), ("the_geom", ColumnType::Geometry)]).unwrap();
        let zone = GeoTable::from_rows(schema, vec![vec![
            Value::Text("B".into()),
            Value::geometry(&Geometry::MultiPolygon(MultiPolygon(vec![square(0.0), empty()]))),
        ]], Some(2154)).unwrap();
        store.put("zone_b", zone);

        let subs = decompose(&mut store, &namer, "zone_b", "B").unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id, "B");
        let table = store.get(&subs[0].table).unwrap();
        assert_eq!(table.height(), 1);
        assert_eq!(table.srid(), Some(2154));
        assert_eq!(table.value(0, "id_zone").unwrap(), Value::Text("B".into()));
        store.close().unwrap();
    }
}
