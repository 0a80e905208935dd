//! FileExporter: one file per category under `<folder>/<location>/`.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, ensure, Context, Result};
use tracing::{debug, error, info, warn};

use crate::config::{FolderOutput, GridOutput, GridParameters};
use crate::error::chain_message;
use crate::grid::GRID_CATEGORY;
use crate::io::{asc::{AscGrid, NODATA}, csv::write_csv, ensure_dir_exists, finalize_write, geojson::write_geojson, open_for_write};
use crate::store::{GeoTable, WorkingStore};
use crate::workflow::{log_table, ExportFailure, LocationFailure, ResultSet, LOG_CATEGORY};

const SINK: &str = "folder";

/// Grid columns that are keys rather than indicators.
const GRID_KEYS: [&str; 3] = ["id_grid", "ID_COL", "ID_ROW"];

/// A location id usable as a directory name.
fn dir_name(location: &str) -> String {
    location.chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}

fn write_table(table: &GeoTable, dir: &Path, stem: &str) -> Result<PathBuf> {
    let (ext, geometry) = match table.schema().geometry_column() {
        Some(_) => ("geojson", true),
        None => ("csv", false),
    };
    let path = dir.join(format!("{stem}.{ext}"));
    let mut pending = open_for_write(&path)?;
    if geometry {
        write_geojson(table, &mut pending)?;
    } else {
        write_csv(table, &mut pending)?;
    }
    finalize_write(pending)?;
    Ok(path)
}

/// One ESRI ASCII raster per numeric indicator column of a grid table.
fn write_asc(table: &GeoTable, dir: &Path, grid: &GridParameters) -> Result<Vec<PathBuf>> {
    ensure!(
        table.schema().contains("ID_COL") && table.schema().contains("ID_ROW"),
        "[export::file] asc output needs ID_COL and ID_ROW"
    );
    let envelope = table.main_geometries()?
        .iter()
        .flatten()
        .filter_map(crate::geom::bounds)
        .reduce(crate::geom::merge_rects)
        .ok_or_else(|| anyhow!("[export::file] grid has no cells"))?;

    let index = |name: &str| -> Result<Vec<usize>> {
        table.column_values(name)?
            .iter()
            .map(|v| v.as_i64()?.and_then(|i| usize::try_from(i).ok()).filter(|i| *i > 0)
                .ok_or_else(|| anyhow!("[export::file] invalid {name}")))
            .collect()
    };
    let (cols, rows) = (index("ID_COL")?, index("ID_ROW")?);
    let ncols = cols.iter().copied().max().unwrap_or(0);
    let nrows = rows.iter().copied().max().unwrap_or(0);

    let mut paths = Vec::new();
    for def in table.schema().columns().iter().filter(|c| c.ty.is_numeric() && !GRID_KEYS.contains(&c.name.as_str())) {
        let mut values = vec![NODATA; ncols * nrows];
        for ((col, row), v) in cols.iter().zip(&rows).zip(table.column_values(&def.name)?) {
            if let Some(v) = v.as_f64()? {
                values[(nrows - row) * ncols + (col - 1)] = v;
            }
        }
        let raster = AscGrid {
            ncols,
            nrows,
            xll: envelope.min().x,
            yll: envelope.min().y,
            dx: grid.x_size,
            dy: grid.y_size,
            nodata: NODATA,
            values,
        };
        let path = dir.join(format!("{GRID_CATEGORY}_{}.asc", def.name));
        let mut pending = open_for_write(&path)?;
        raster.write(&mut pending)?;
        finalize_write(pending)?;
        paths.push(path);
    }
    Ok(paths)
}

pub struct FileExporter {
    folder: FolderOutput,
    srid: Option<i32>,
    grid: Option<GridParameters>,
}

impl FileExporter {
    /// Create the output folder; failure is a resource error.
    pub fn new(folder: FolderOutput, srid: Option<i32>, grid: Option<GridParameters>) -> crate::Result<Self> {
        ensure_dir_exists(&folder.path)
            .map_err(|e| crate::Error::resource(format!("cannot create output folder: {}", chain_message(&e))))?;
        Ok(Self { folder, srid, grid })
    }

    #[inline] pub fn path(&self) -> &Path { &self.folder.path }

    /// Write every requested category of one location.
    pub fn export(&self, store: &WorkingStore, location: &str, results: &ResultSet) -> Vec<ExportFailure> {
        let dir = self.folder.path.join(dir_name(location));
        let mut failures = Vec::new();
        for (category, handle) in results.iter().filter(|(c, _)| self.folder.wants(c)) {
            match self.export_category(store, &dir, category, handle) {
                Ok(files) => info!(location, category, files, "exported to folder"),
                Err(e) => {
                    let message = chain_message(&e);
                    error!(location, category, error = %message, "file export failed");
                    failures.push(ExportFailure {
                        location: location.to_string(),
                        category: category.to_string(),
                        sink: SINK.to_string(),
                        message,
                    });
                }
            }
        }
        failures
    }

    fn export_category(&self, store: &WorkingStore, dir: &Path, category: &str, handle: &str) -> Result<usize> {
        ensure_dir_exists(dir)?;
        let ctx = || format!("[export::file] writing '{category}'");

        if category == GRID_CATEGORY {
            if let Some(grid) = self.grid.as_ref().filter(|g| g.output == GridOutput::Asc) {
                if self.srid.is_some_and(|s| Some(s) != store.get(handle).ok().and_then(GeoTable::srid)) {
                    warn!(category, "asc grids are written in the working SRID");
                }
                return Ok(write_asc(store.get(handle)?, dir, grid).with_context(ctx)?.len());
            }
        }

        let table = match self.srid {
            Some(srid) => store.reprojected(handle, srid)?,
            None => store.get(handle)?.clone(),
        };
        let path = write_table(&table, dir, category).with_context(ctx)?;
        debug!(path = %path.display(), rows = table.height(), "wrote file");
        Ok(1)
    }

    /// Write the failure log to `<folder>/logs.geojson`.
    pub fn export_log(&self, failures: &[LocationFailure]) -> Result<()> {
        if failures.is_empty() {
            return Ok(());
        }
        let path = write_table(&log_table(failures)?, &self.folder.path, LOG_CATEGORY)?;
        info!(path = %path.display(), failures = failures.len(), "wrote failure log");
        Ok(())
    }
}
