//! Population cells from an ESRI ASCII grid.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use geo::{Geometry, Intersects, Rect};
use tracing::debug;

use crate::error::{chain_message, Error};
use crate::geom::{self, Reprojector};
use crate::io::asc::AscGrid;
use crate::source::{population_schema, PopulationProvider};
use crate::store::{GeoTable, Value};

pub struct AscPopulationProvider {
    path: PathBuf,
    /// SRID of the raster.
    srid: i32,
    grid: Option<AscGrid>,
}

fn reproject_rect(rect: Rect<f64>, from: i32, to: i32) -> Result<Rect<f64>> {
    if from == to {
        return Ok(rect);
    }
    let polygon = Geometry::Polygon(rect.to_polygon());
    let projected = Reprojector::new(from, to)?.geometry(&polygon)?;
    geom::bounds(&projected).ok_or_else(|| anyhow!("[source::population] empty box"))
}

impl AscPopulationProvider {
    pub fn new(path: &Path, srid: i32) -> Self {
        Self { path: path.to_path_buf(), srid, grid: None }
    }

    #[inline] pub fn path(&self) -> &Path { &self.path }

    fn grid(&mut self) -> Result<&AscGrid> {
        if self.grid.is_none() {
            let text = fs::read_to_string(&self.path)
                .with_context(|| format!("[source::population] reading {}", self.path.display()))?;
            self.grid = Some(AscGrid::parse(&text)?);
        }
        self.grid.as_ref().ok_or_else(|| anyhow!("[source::population] no grid"))
    }

    fn cells(&mut self, bbox: Rect<f64>, srid: i32) -> Result<GeoTable> {
        let raster_srid = self.srid;
        let window = reproject_rect(bbox, srid, raster_srid)?;
        let to_working = (raster_srid != srid).then(|| Reprojector::new(raster_srid, srid)).transpose()?;
        let grid = self.grid()?;

        let mut rows = Vec::new();
        for row in 0..grid.nrows {
            for col in 0..grid.ncols {
                let Some(pop) = grid.get(col, row) else { continue };
                let cell = grid.cell_rect(col, row);
                if !cell.intersects(&window) {
                    continue;
                }
                let shape = Geometry::Polygon(cell.to_polygon());
                let shape = match &to_working {
                    Some(proj) => proj.geometry(&shape)?,
                    None => shape,
                };
                rows.push(vec![Value::Int((row * grid.ncols + col) as i64), Value::Float(pop), Value::geometry(&shape)]);
            }
        }
        debug!(cells = rows.len(), "selected population cells");
        GeoTable::from_rows(population_schema()?, rows, Some(srid))
    }
}

impl PopulationProvider for AscPopulationProvider {
    fn population(&mut self, bbox: Rect<f64>, srid: i32) -> crate::Result<GeoTable> {
        if !self.path.is_file() {
            return Err(Error::DataUnavailable(format!("no population grid at {}", self.path.display())));
        }
        self.cells(bbox, srid).map_err(|e| Error::DataUnavailable(chain_message(&e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::coord;

    const GRID: &str = "ncols 3\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 10\nNODATA_value -9999\n1 2 -9999\n4 5 6\n";

    #[test]
    fn keeps_cells_touching_the_box() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("population.asc");
        fs::write(&path, GRID).unwrap();
        let mut provider = AscPopulationProvider::new(&path, 2154);
        let bbox = Rect::new(coord! { x: 1.0, y: 1.0 }, coord! { x: 9.0, y: 9.0 });
        let table = provider.population(bbox, 2154).unwrap();
        assert_eq!(table.height(), 1);
        // The south-west cell is in the second text row.
        assert_eq!(table.value(0, "pop").unwrap(), Value::Float(4.0));
        assert_eq!(table.value(0, "id_pop").unwrap(), Value::Int(3));
    }

    #[test]
    fn nodata_cells_are_skipped() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("population.asc");
        fs::write(&path, GRID).unwrap();
        let bbox = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 30.0, y: 20.0 });
        let table = AscPopulationProvider::new(&path, 2154).population(bbox, 2154).unwrap();
        assert_eq!(table.height(), 5);
    }

    #[test]
    fn missing_file_is_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let mut provider = AscPopulationProvider::new(&root.path().join("none.asc"), 4326);
        let bbox = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 1.0, y: 1.0 });
        assert!(matches!(provider.population(bbox, 2154), Err(Error::DataUnavailable(_))));
    }
}
