//! Default sub-area processor: every layer clipped to the sub-area.

use anyhow::{anyhow, Context, Result};
use geo::{BooleanOps, Geometry, HasDimensions, Intersects, MultiLineString, MultiPolygon};
use tracing::debug;

use crate::geom;
use crate::source::{SubAreaInput, SubAreaProcessor, ZONE_LAYER};
use crate::store::{GeoTable, Value, WorkingStore};
use crate::workflow::ResultSet;

/// Part of `g` inside `area`, or `None` when nothing is left.
fn clip_geometry(g: &Geometry<f64>, area: &MultiPolygon<f64>) -> Option<Geometry<f64>> {
    let clipped = match g {
        Geometry::Point(_) | Geometry::MultiPoint(_) => return area.intersects(g).then(|| g.clone()),
        Geometry::LineString(ls) => Geometry::MultiLineString(area.clip(&MultiLineString(vec![ls.clone()]), false)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(area.clip(mls, false)),
        Geometry::Line(l) => Geometry::MultiLineString(area.clip(&MultiLineString(vec![(*l).into()]), false)),
        other => Geometry::MultiPolygon(area.intersection(&geom::polygonal(other)?)),
    };
    (!clipped.is_empty()).then_some(clipped)
}

fn clip_table(table: &GeoTable, area: &MultiPolygon<f64>) -> Result<GeoTable> {
    let Some(column) = table.schema().geometry_column() else { return Ok(table.clone()) };
    let position = table.schema().position(column)
        .ok_or_else(|| anyhow!("[source::clip] no column '{column}'"))?;
    let rows = table.rows()?
        .into_iter()
        .zip(table.geometries(column)?)
        .filter_map(|(mut row, g)| {
            let clipped = clip_geometry(g.as_ref()?, area)?;
            row[position] = Value::geometry(&clipped);
            Some(row)
        })
        .collect();
    GeoTable::from_rows(table.schema().clone(), rows, table.srid())
}

/// Clips every linked layer to the sub-area. Layers left empty are omitted;
/// a sub-area where every layer is empty yields no result.
#[derive(Debug, Default)]
pub struct LayerClipProcessor;

impl SubAreaProcessor for LayerClipProcessor {
    fn process(&mut self, store: &mut WorkingStore, input: &SubAreaInput<'_>) -> Result<Option<ResultSet>> {
        let sub_area = input.sub_area;
        let area_table = store.get(&sub_area.table)?.clone();
        let area = area_table.main_geometries()?
            .iter()
            .flatten()
            .filter_map(geom::polygonal)
            .next()
            .ok_or_else(|| anyhow!("[source::clip] sub-area '{}' has no polygon", sub_area.id))?;

        let mut clipped = Vec::new();
        for (layer, handle) in input.layers {
            let table = clip_table(store.get(handle)?, &area)
                .with_context(|| format!("[source::clip] clipping '{layer}' to '{}'", sub_area.id))?;
            if !table.is_empty() {
                clipped.push((layer.as_str(), table));
            }
        }
        if clipped.is_empty() {
            debug!(sub_area = %sub_area.id, "nothing to clip");
            return Ok(None);
        }

        let zone = input.namer.name(&sub_area.id, ZONE_LAYER);
        let mut results = ResultSet::new().with(ZONE_LAYER, &zone);
        store.put(&zone, area_table);
        for (layer, table) in clipped {
            let name = input.namer.name(&sub_area.id, layer);
            debug!(sub_area = %sub_area.id, layer, rows = table.height(), "clipped layer");
            store.put(&name, table);
            results = results.with(layer, &name);
        }
        Ok(Some(results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use geo::{line_string, point, polygon};

    use crate::config::ProcessingParameters;
    use crate::store::{ColumnType, Schema, TableNamer};
    use crate::workflow::SubArea;

    fn layer(geoms: Vec<Geometry<f64>>) -> GeoTable {
        let schema = Schema::of(&[("the_geom", ColumnType::Geometry), ("n", ColumnType::BigInt)]).unwrap();
        GeoTable::from_rows(schema, geoms.iter().enumerate()
            .map(|(i, g)| vec![Value::geometry(g), Value::Int(i as i64)])
            .collect(), Some(2154)).unwrap()
    }

    fn square() -> Geometry<f64> {
        Geometry::Polygon(polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)])
    }

    #[test]
    fn clips_each_geometry_kind() {
        let area = geom::polygonal(&square()).unwrap();
        let half = Geometry::Polygon(polygon![(x: 5.0, y: 0.0), (x: 15.0, y: 0.0), (x: 15.0, y: 10.0), (x: 5.0, y: 10.0)]);
        let Some(Geometry::MultiPolygon(mp)) = clip_geometry(&half, &area) else { panic!("expected polygons") };
        assert!((geo::Area::unsigned_area(&mp) - 50.0).abs() < 1e-9);

        let road = Geometry::LineString(line_string![(x: -5.0, y: 5.0), (x: 5.0, y: 5.0)]);
        let Some(Geometry::MultiLineString(mls)) = clip_geometry(&road, &area) else { panic!("expected lines") };
        assert_eq!(mls.0.len(), 1);

        assert!(clip_geometry(&Geometry::Point(point!(x: 20.0, y: 20.0)), &area).is_none());
        assert!(clip_geometry(&Geometry::Point(point!(x: 2.0, y: 2.0)), &area).is_some());
    }

    #[test]
    fn empty_layers_are_omitted() {
        let root = tempfile::tempdir().unwrap();
        let mut store = WorkingStore::open(root.path(), "db", true).unwrap();
        let namer = TableNamer::new("", "t");
        store.put("sa", layer(vec![square()]));
        store.put("poi_in", layer(vec![Geometry::Point(point!(x: 1.0, y: 1.0))]));
        store.put("poi_out", layer(vec![Geometry::Point(point!(x: 50.0, y: 1.0))]));
        let layers: BTreeMap<String, String> = [("inside", "poi_in"), ("outside", "poi_out")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let sub_area = SubArea { id: "A".into(), table: "sa".into() };
        let params = ProcessingParameters::default();
        let input = SubAreaInput { location: "A", sub_area: &sub_area, srid: 2154, layers: &layers, params: &params, namer: &namer };

        let results = LayerClipProcessor.process(&mut store, &input).unwrap().unwrap();
        assert_eq!(results.categories().collect::<Vec<_>>(), vec!["inside", "zone"]);
        store.close().unwrap();
    }

    #[test]
    fn nothing_inside_yields_no_result() {
        let root = tempfile::tempdir().unwrap();
        let mut store = WorkingStore::open(root.path(), "db", true).unwrap();
        let namer = TableNamer::new("", "t");
        store.put("sa", layer(vec![square()]));
        let layers = BTreeMap::new();
        let sub_area = SubArea { id: "A".into(), table: "sa".into() };
        let params = ProcessingParameters::default();
        let input = SubAreaInput { location: "A", sub_area: &sub_area, srid: 2154, layers: &layers, params: &params, namer: &namer };
        assert!(LayerClipProcessor.process(&mut store, &input).unwrap().is_none());
        store.close().unwrap();
    }
}
