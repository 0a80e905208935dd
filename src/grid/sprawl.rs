//! Urban sprawl areas derived from grid LCZ fractions.

use anyhow::Result;
use geo::{Centroid, Geometry, Intersects, MultiPolygon};

use crate::geom;
use crate::store::{ColumnType, GeoTable, Schema, Value};

/// Urban share (LCZ 1 to 10) from which a cell is sprawl.
pub const URBAN_THRESHOLD: f64 = 0.65;
/// Vegetation and water share (LCZ 101 to 107) from which a sprawl cell is cool.
pub const COOL_THRESHOLD: f64 = 0.5;

const LCZ_FRACTION_PREFIX: &str = "LCZ_FRACTION_";

#[derive(Debug)]
pub struct SprawlAreas {
    pub sprawl: GeoTable,
    /// Present only when at least one cool area exists.
    pub cool: Option<GeoTable>,
}

/// Sum of the `LCZ_FRACTION_<code>` columns whose code lies in `codes`, per row.
fn class_share(grid: &GeoTable, codes: std::ops::RangeInclusive<i64>) -> Result<Vec<f64>> {
    let mut share = vec![0.0; grid.height()];
    for name in grid.schema().names() {
        let Some(code) = name.strip_prefix(LCZ_FRACTION_PREFIX).and_then(|c| c.parse::<i64>().ok()) else { continue };
        if !codes.contains(&code) {
            continue;
        }
        for (acc, v) in share.iter_mut().zip(grid.column_values(name)?) {
            *acc += v.as_f64()?.unwrap_or(0.0);
        }
    }
    Ok(share)
}

fn areas_table(shape: MultiPolygon<f64>, srid: Option<i32>) -> Result<GeoTable> {
    let schema = Schema::of(&[("id", ColumnType::Integer), ("the_geom", ColumnType::Geometry)])?;
    let rows = shape.0.into_iter()
        .enumerate()
        .map(|(i, p)| vec![Value::Int(i as i64 + 1), Value::geometry(&Geometry::Polygon(p))])
        .collect();
    GeoTable::from_rows(schema, rows, srid)
}

/// Second pass over the grid table. `None` when it carries no LCZ fractions.
pub fn compute(grid: &GeoTable) -> Result<Option<SprawlAreas>> {
    if !grid.schema().names().any(|n| n.starts_with(LCZ_FRACTION_PREFIX)) {
        return Ok(None);
    }
    let cells: Vec<Option<MultiPolygon<f64>>> = grid.main_geometries()?
        .iter()
        .map(|g| g.as_ref().and_then(geom::polygonal))
        .collect();
    let urban = class_share(grid, 1..=10)?;
    let cool = class_share(grid, 101..=107)?;

    let sprawl = geom::union_all(
        cells.iter().zip(&urban)
            .filter(|(_, u)| **u >= URBAN_THRESHOLD)
            .filter_map(|(c, _)| c.clone())
            .collect(),
    );

    let cool_cells: Vec<MultiPolygon<f64>> = cells.iter().zip(&cool)
        .filter(|(_, c)| **c >= COOL_THRESHOLD)
        .filter_map(|(c, _)| c.clone())
        .filter(|c| c.centroid().is_some_and(|p| sprawl.intersects(&p)))
        .collect();
    let cool = (!cool_cells.is_empty())
        .then(|| areas_table(geom::union_all(cool_cells), grid.srid()))
        .transpose()?;

    Ok(Some(SprawlAreas { sprawl: areas_table(sprawl, grid.srid())?, cool }))
}
