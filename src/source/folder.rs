//! GeoJSON folder source: one layer per `*.geojson` file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::chain_message;
use crate::io::{geojson::read_geojson, require_dir_exists};
use crate::source::{link, LoadedLocation, SourceLoader, SourceTables, ZONE_LAYER};
use crate::store::{TableNamer, WorkingStore};
use crate::workflow::Location;

pub struct FolderLoader {
    root: PathBuf,
    srid: Option<i32>,
    distance: f64,
    tables: Option<SourceTables>,
}

impl FolderLoader {
    /// Loader over an existing folder; a missing folder is a resource error.
    pub fn open(root: &Path, srid: Option<i32>, distance: f64) -> crate::Result<Self> {
        require_dir_exists(root)
            .map_err(|e| crate::Error::resource(format!("input folder: {}", chain_message(&e))))?;
        Ok(Self { root: root.to_path_buf(), srid, distance, tables: None })
    }

    #[inline] pub fn root(&self) -> &Path { &self.root }

    fn read(&self) -> Result<SourceTables> {
        let mut tables = SourceTables::default();
        for entry in WalkDir::new(&self.root).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.context("[source::folder] listing input folder")?;
            let path = entry.path();
            if !entry.file_type().is_file() || path.extension().is_none_or(|e| !e.eq_ignore_ascii_case("geojson")) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let bytes = fs::read(path).with_context(|| format!("[source::folder] reading {}", path.display()))?;
            let table = read_geojson(&bytes).with_context(|| format!("[source::folder] parsing {}", path.display()))?;
            debug!(layer = stem, rows = table.height(), "read layer");
            if stem == ZONE_LAYER {
                tables.zone = Some(table);
            } else {
                tables.layers.push((stem.to_string(), table));
            }
        }
        info!(path = %self.root.display(), layers = tables.layers.len(), zone = tables.zone.is_some(), "read input folder");
        Ok(tables)
    }
}

impl SourceLoader for FolderLoader {
    fn load(&mut self, store: &mut WorkingStore, namer: &TableNamer, location: &Location) -> Result<LoadedLocation> {
        if self.tables.is_none() {
            self.tables = Some(self.read()?);
        }
        let tables = self.tables.get_or_insert_with(SourceTables::default);
        link(store, namer, location, tables, self.srid, self.distance)
    }
}
