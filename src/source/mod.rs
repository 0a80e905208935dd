//! Collaborators at the edges of the workflow: loading sources, computing
//! sub-area results and providing population.

mod clip;
mod database;
mod folder;
mod population;

pub use clip::LayerClipProcessor;
pub use database::DatabaseLoader;
pub use folder::FolderLoader;
pub use population::AscPopulationProvider;

use std::collections::BTreeMap;

use anyhow::{anyhow, ensure, Context, Result};
use geo::{Geometry, Intersects, Rect};
use tracing::debug;

use crate::config::ProcessingParameters;
use crate::geom::{self, is_geographic, utm_srid_for, Reprojector, WGS84};
use crate::store::{ColumnType, GeoTable, Schema, TableNamer, Value, WorkingStore};
use crate::workflow::{Location, ResultSet, SubArea};

/// Layer name of the administrative boundaries.
pub const ZONE_LAYER: &str = "zone";
/// Layer name of the population cells.
pub const POPULATION_LAYER: &str = "population";

/// Tables linked into the working store for one location.
#[derive(Debug, Clone)]
pub struct LoadedLocation {
    /// Handle of the zone table `(id_zone, the_geom)`.
    pub zone: String,
    /// Working SRID of every linked table.
    pub srid: i32,
    /// Layer name to table handle.
    pub layers: BTreeMap<String, String>,
}

/// Resolves the configured input into tables inside the working store.
pub trait SourceLoader {
    fn load(&mut self, store: &mut WorkingStore, namer: &TableNamer, location: &Location) -> Result<LoadedLocation>;
}

/// What a processor gets for one sub-area.
#[derive(Debug, Clone, Copy)]
pub struct SubAreaInput<'a> {
    pub location: &'a str,
    pub sub_area: &'a SubArea,
    pub srid: i32,
    pub layers: &'a BTreeMap<String, String>,
    pub params: &'a ProcessingParameters,
    pub namer: &'a TableNamer,
}

/// Indicator computation for one sub-area. `Ok(None)` means nothing was
/// computed, which is not an error.
pub trait SubAreaProcessor {
    fn process(&mut self, store: &mut WorkingStore, input: &SubAreaInput<'_>) -> Result<Option<ResultSet>>;
}

/// Population cells covering a box.
pub trait PopulationProvider {
    /// Cells intersecting `bbox` (given in `srid`), returned in `srid`.
    /// Missing data is [`crate::Error::DataUnavailable`].
    fn population(&mut self, bbox: Rect<f64>, srid: i32) -> crate::Result<GeoTable>;
}

/// Schema of population tables.
pub fn population_schema() -> Result<Schema> {
    Schema::of(&[("id_pop", ColumnType::BigInt), ("pop", ColumnType::Double), ("the_geom", ColumnType::Geometry)])
}

/// Placeholder used when population is unavailable.
pub fn empty_population(srid: i32) -> Result<GeoTable> {
    GeoTable::empty(population_schema()?, Some(srid))
}

/// Tables as read from a source, before linking.
#[derive(Debug, Default)]
pub(crate) struct SourceTables {
    pub zone: Option<GeoTable>,
    pub layers: Vec<(String, GeoTable)>,
}

fn zone_matches(value: &Value, id: &str) -> bool {
    match value {
        Value::Text(s) => s == id,
        Value::Int(i) => i.to_string() == id,
        _ => false,
    }
}

/// Zone rows of `location` in the source SRID.
fn zone_geometries(sources: &SourceTables, location: &Location, source_srid: i32) -> Result<(Vec<Geometry<f64>>, i32)> {
    match location {
        Location::BBox { .. } => {
            let polygon = location.polygon().ok_or_else(|| anyhow!("[source] invalid bounding box {location}"))?;
            Ok((vec![Geometry::Polygon(polygon)], WGS84))
        }
        Location::Id(id) => {
            let zone = sources.zone.as_ref()
                .ok_or_else(|| anyhow!("[source] no '{ZONE_LAYER}' layer to look up '{id}'"))?;
            ensure!(zone.schema().contains("id_zone"), "[source] '{ZONE_LAYER}' layer has no id_zone column");
            let ids = zone.column_values("id_zone")?;
            let geoms = zone.main_geometries()?
                .into_iter()
                .zip(ids)
                .filter(|(_, v)| zone_matches(v, id))
                .filter_map(|(g, _)| g)
                .collect::<Vec<_>>();
            ensure!(!geoms.is_empty(), "[source] zone '{id}' not found");
            Ok((geoms, source_srid))
        }
    }
}

/// Link a location's zone and layers into the store.
///
/// Geographic inputs move to the UTM zone of the zone's centroid; projected
/// inputs keep their SRID. Layers are cut to the zone envelope grown by
/// `distance`.
pub(crate) fn link(
    store: &mut WorkingStore,
    namer: &TableNamer,
    location: &Location,
    sources: &SourceTables,
    forced_srid: Option<i32>,
    distance: f64,
) -> Result<LoadedLocation> {
    let id = location.id();
    let source_srid = |t: Option<&GeoTable>| forced_srid.or(t.and_then(GeoTable::srid)).unwrap_or(WGS84);
    let (zones, zone_srid) = zone_geometries(sources, location, source_srid(sources.zone.as_ref()))?;

    let center = zones.iter()
        .filter_map(geom::bounds)
        .reduce(geom::merge_rects)
        .map(|r| r.center())
        .ok_or_else(|| anyhow!("[source] zone '{id}' is empty"))?;
    let srid = if is_geographic(zone_srid) { utm_srid_for(center.x, center.y) } else { zone_srid };

    let zones = if zone_srid == srid {
        zones
    } else {
        let proj = Reprojector::new(zone_srid, srid)?;
        zones.iter().map(|g| proj.geometry(g)).collect::<Result<Vec<_>>>()?
    };
    let envelope = zones.iter()
        .filter_map(geom::bounds)
        .reduce(geom::merge_rects)
        .ok_or_else(|| anyhow!("[source] zone '{id}' is empty"))?;
    let window = Rect::new(
        (envelope.min().x - distance, envelope.min().y - distance),
        (envelope.max().x + distance, envelope.max().y + distance),
    );

    let zone_table = GeoTable::from_rows(
        Schema::of(&[("id_zone", ColumnType::Text), ("the_geom", ColumnType::Geometry)])?,
        zones.iter().map(|g| vec![Value::Text(id.clone()), Value::geometry(g)]).collect(),
        Some(srid),
    )?;
    let zone = namer.name(&id, &format!("input_{ZONE_LAYER}"));
    store.put(&zone, zone_table);

    let mut layers = BTreeMap::new();
    for (name, table) in &sources.layers {
        let table = window_layer(table, source_srid(Some(table)), srid, &window)
            .with_context(|| format!("[source] linking layer '{name}'"))?;
        debug!(location = %id, layer = name, rows = table.height(), "linked layer");
        let handle = namer.name(&id, &format!("input_{name}"));
        store.put(&handle, table);
        layers.insert(name.clone(), handle);
    }
    Ok(LoadedLocation { zone, srid, layers })
}

/// Reproject a layer to `srid` and keep the rows whose geometry touches `window`.
fn window_layer(table: &GeoTable, from: i32, srid: i32, window: &Rect<f64>) -> Result<GeoTable> {
    if table.schema().geometry_column().is_none() {
        return Ok(table.clone());
    }
    let table = if from == srid {
        table.clone().with_srid(Some(srid))
    } else {
        let proj = Reprojector::new(from, srid)?;
        table.map_geometries(Some(srid), |g| proj.geometry(g))?
    };
    let keep = table.main_geometries()?
        .iter()
        .map(|g| g.as_ref().and_then(geom::bounds).is_some_and(|b| b.intersects(window)))
        .collect::<Vec<_>>();
    table.filter(&keep)
}
