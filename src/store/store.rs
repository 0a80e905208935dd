use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use geo::Rect;
use polars::prelude::{Column, DataFrame, PlSmallStr};
use tracing::{debug, info};

use crate::geom::{self, Reprojector};
use crate::io::ensure_dir_exists;
use crate::store::{GeoTable, ProjectedColumn, Schema, UnionPlan};

const LOCK_FILE: &str = "store.lock";

/// The working data store for one run.
///
/// Tables live in memory; `<folder>/<name>` holds the store's lock file and
/// scratch files (imported rasters, intermediate exports). Closing an
/// ephemeral store removes that directory.
#[derive(Debug)]
pub struct WorkingStore {
    dir: PathBuf,
    ephemeral: bool,
    tables: BTreeMap<String, GeoTable>,
}

impl WorkingStore {
    /// Open (create) the store directory and take its lock.
    pub fn open(folder: &Path, name: &str, ephemeral: bool) -> Result<Self> {
        let dir = folder.join(name);
        ensure_dir_exists(&dir)
            .with_context(|| format!("[store] cannot create working store {}", dir.display()))?;

        let lock = dir.join(LOCK_FILE);
        fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock)
            .with_context(|| format!("[store] working store {} is locked or not writable", dir.display()))?;

        info!(path = %dir.display(), ephemeral, "opened working store");
        Ok(Self { dir, ephemeral, tables: BTreeMap::new() })
    }

    /// Directory for scratch files.
    #[inline] pub fn dir(&self) -> &Path { &self.dir }

    #[inline] pub fn is_ephemeral(&self) -> bool { self.ephemeral }

    pub fn exists(&self, name: &str) -> bool { self.tables.contains_key(name) }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Create or replace a table.
    pub fn put(&mut self, name: &str, table: GeoTable) {
        debug!(table = name, rows = table.height(), "put table");
        self.tables.insert(name.to_string(), table);
    }

    pub fn get(&self, name: &str) -> Result<&GeoTable> {
        self.tables.get(name)
            .ok_or_else(|| anyhow!("[store] table '{name}' does not exist"))
    }

    pub fn schema(&self, name: &str) -> Result<&Schema> {
        Ok(self.get(name)?.schema())
    }

    pub fn row_count(&self, name: &str) -> Result<usize> {
        Ok(self.get(name)?.height())
    }

    /// Drop a table; dropping a missing table is a no-op.
    pub fn drop_table(&mut self, name: &str) {
        if self.tables.remove(name).is_some() {
            debug!(table = name, "dropped table");
        }
    }

    pub fn drop_tables<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            self.drop_table(name);
        }
    }

    /// Bounding envelope of a table's main geometry column.
    pub fn envelope(&self, name: &str) -> Result<Option<Rect<f64>>> {
        let geoms = self.get(name)?.main_geometries()?;
        Ok(geoms.iter()
            .flatten()
            .filter_map(geom::bounds)
            .reduce(geom::merge_rects))
    }

    /// Copy of a table reprojected to `srid`.
    pub fn reprojected(&self, name: &str, srid: i32) -> Result<GeoTable> {
        let table = self.get(name)?;
        match table.srid() {
            Some(from) if from != srid && table.schema().geometry_column().is_some() => {
                let proj = Reprojector::new(from, srid)
                    .with_context(|| format!("[store] cannot reproject '{name}' from {from} to {srid}"))?;
                table.map_geometries(Some(srid), |g| proj.geometry(g))
            }
            _ => Ok(table.clone()),
        }
    }

    /// Execute a union plan: concatenate every projection (keeping duplicate
    /// rows) into a new table `target`.
    pub fn union_all(&mut self, target: &str, plan: &UnionPlan) -> Result<()> {
        let mut srid: Option<i32> = None;
        let mut out: Option<DataFrame> = None;

        for projection in &plan.projections {
            let table = self.get(&projection.source)?;
            if table.schema().geometry_column().is_some() {
                match (srid, table.srid()) {
                    (Some(a), Some(b)) if a != b => bail!(
                        "[store::union_all] '{}' has SRID {b}, other inputs have {a}",
                        projection.source
                    ),
                    (None, Some(b)) => srid = Some(b),
                    _ => {}
                }
            }

            let height = table.height();
            let columns = plan.schema.columns().iter()
                .zip(&projection.columns)
                .map(|(def, pc)| -> Result<Column> {
                    let name: PlSmallStr = def.name.as_str().into();
                    Ok(match pc {
                        ProjectedColumn::Keep(src) => table.frame().column(src)?.clone().with_name(name),
                        ProjectedColumn::Cast(src, ty) => table.frame().column(src)?.cast(&ty.dtype())?.with_name(name),
                        ProjectedColumn::Null(ty) => Column::full_null(name, height, &ty.dtype()),
                    })
                })
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("[store::union_all] projecting '{}'", projection.source))?;

            let frame = DataFrame::new(columns)?;
            match out.as_mut() {
                Some(acc) => { acc.vstack_mut(&frame)?; }
                None => out = Some(frame),
            }
        }

        let table = match out {
            Some(frame) => GeoTable::from_frame(plan.schema.clone(), frame, srid)?,
            None => GeoTable::empty(plan.schema.clone(), srid)?,
        };
        self.put(target, table);
        Ok(())
    }

    /// Release the lock and, for an ephemeral store, delete its directory.
    pub fn close(self) -> Result<()> {
        let lock = self.dir.join(LOCK_FILE);
        fs::remove_file(&lock)
            .with_context(|| format!("[store] cannot release lock {}", lock.display()))?;
        if self.ephemeral {
            fs::remove_dir_all(&self.dir)
                .with_context(|| format!("[store] cannot delete working store {}", self.dir.display()))?;
        }
        info!(path = %self.dir.display(), deleted = self.ephemeral, "closed working store");
        Ok(())
    }
}
