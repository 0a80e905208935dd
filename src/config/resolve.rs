//! ParameterResolver: raw document to canonical [`Parameters`].

use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

use ahash::AHashSet;
use anyhow::{anyhow, bail, ensure, Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::raw::{
    RawConfig, RawDatabase, RawFilter, RawFolder, RawGrid, RawInput, RawLocation, RawOutput, RawParameters, RawRsu, RawStore,
    TOP_LEVEL_KEYS,
};
use crate::config::{
    DatabaseOutput, FolderOutput, GridIndicator, GridOrigin, GridOutput, GridParameters, InputParameters,
    InputSource, OutputParameters, Parameters, ProcessingParameters, RsuIndicator, RsuParameters, StoreParameters,
    Weights,
};
use crate::error::{chain_message, Error};
use crate::export::RowPredicate;
use crate::store::{TableNamer, Value as CellValue};
use crate::workflow::Location;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

static STORE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("valid store name regex"));

static PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]*$").expect("valid prefix regex"));

const MAX_LCZ_LOD: i64 = 10;

/// Read and resolve a configuration file.
pub fn load(path: &Path) -> crate::Result<Parameters> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("cannot read {}: {e}", path.display())))?;
    parse(&text)
}

/// Parse and resolve a JSON configuration document.
pub fn parse(text: &str) -> crate::Result<Parameters> {
    let doc: Value = serde_json::from_str(text)
        .map_err(|e| Error::config(format!("invalid JSON: {e}")))?;
    let Value::Object(map) = &doc else {
        return Err(Error::config("the configuration must be a JSON object"));
    };
    for key in map.keys().filter(|k| !TOP_LEVEL_KEYS.contains(&k.as_str())) {
        warn!(key = %key, "ignoring unknown configuration key");
    }
    let raw: RawConfig = serde_json::from_value(doc)
        .map_err(|e| Error::config(format!("malformed configuration: {e}")))?;
    resolve(raw)
}

/// Validate a raw document, apply defaults and cross-derive settings.
pub fn resolve(raw: RawConfig) -> crate::Result<Parameters> {
    resolve_inner(raw).map_err(|e| Error::config(chain_message(&e)))
}

fn resolve_inner(raw: RawConfig) -> Result<Parameters> {
    let store = resolve_store(raw.geoclimatedb.unwrap_or_default())?;
    let input = resolve_input(raw.input.ok_or_else(|| anyhow!("missing 'input' section"))?)
        .context("input")?;
    let output = resolve_output(raw.output.unwrap_or_default()).context("output")?;
    let processing = resolve_processing(raw.parameters.unwrap_or_default()).context("parameters")?;

    let params = Parameters { description: raw.description, store, input, output, processing };
    debug!(locations = params.input.locations.len(), "resolved configuration");
    Ok(params)
}

fn positive_srid(srid: i64) -> Result<i32> {
    ensure!(srid > 0, "SRID must be a positive integer, got {srid}");
    i32::try_from(srid).map_err(|_| anyhow!("SRID {srid} is out of range"))
}

fn resolve_store(raw: RawStore) -> Result<StoreParameters> {
    let folder = raw.folder.unwrap_or_else(std::env::temp_dir);
    let name = match raw.name {
        Some(name) => {
            ensure!(
                STORE_NAME.is_match(&name),
                "geoclimatedb: 'name' may only contain letters, digits and '_', got '{name}'"
            );
            name
        }
        None => format!("geoclimate_db_{}", TableNamer::random("").salt()),
    };
    Ok(StoreParameters { folder, name, delete: raw.delete.unwrap_or(true) })
}

fn connection_path(db: &RawDatabase) -> Result<PathBuf> {
    db.connection.as_ref()
        .and_then(|c| c.path.clone())
        .ok_or_else(|| anyhow!("database: missing 'connection.path'"))
}

fn resolve_input(raw: RawInput) -> Result<InputParameters> {
    let source = match (raw.folder, raw.database) {
        (Some(_), Some(_)) => bail!("cannot set both 'folder' and 'database' input sources"),
        (None, None) => bail!("one of 'folder' or 'database' is required"),
        (Some(folder), None) => InputSource::Folder(folder),
        (None, Some(db)) => {
            let path = connection_path(&db)?;
            let tables = db.tables.unwrap_or_default();
            ensure!(tables.contains_key("zone"), "database: 'tables' must name a 'zone' table");
            InputSource::Database { path, tables }
        }
    };

    let raw_locations = raw.locations.ok_or_else(|| anyhow!("missing 'locations'"))?;
    ensure!(!raw_locations.is_empty(), "'locations' must not be empty");
    let mut seen = AHashSet::new();
    let mut locations = Vec::with_capacity(raw_locations.len());
    for raw_loc in raw_locations {
        let location = match raw_loc {
            RawLocation::Id(id) => {
                ensure!(!id.trim().is_empty(), "location ids must not be empty");
                Location::Id(id.trim().to_string())
            }
            RawLocation::Code(code) => Location::Id(code.to_string()),
            RawLocation::BBox(values) => Location::bbox(&values).context("invalid location")?,
        };
        ensure!(seen.insert(location.id()), "duplicate location '{}'", location.id());
        locations.push(location);
    }

    let srid = raw.srid.map(positive_srid).transpose()?;
    Ok(InputParameters { source, locations, srid })
}

fn resolve_output(raw: RawOutput) -> Result<OutputParameters> {
    let srid = raw.srid.map(positive_srid).transpose()?;

    let folder = match raw.folder {
        None => None,
        Some(RawFolder::Path(path)) => Some(FolderOutput { path, tables: None }),
        Some(RawFolder::Detailed { path, tables }) => Some(FolderOutput {
            path: path.ok_or_else(|| anyhow!("folder: missing 'path'"))?,
            tables,
        }),
    };

    let database = match raw.database {
        None => None,
        Some(db) => {
            let path = connection_path(&db)?;
            if db.srid.is_some() {
                warn!("output.database.srid is ignored, use output.srid");
            }
            let tables = db.tables.clone().unwrap_or_default();
            ensure!(!tables.is_empty(), "database: 'tables' must name at least one category");
            for table in tables.values() {
                ensure!(IDENTIFIER.is_match(table), "database: '{table}' is not a valid table name");
            }
            let mut filters = BTreeMap::new();
            for (category, raw) in db.filters.unwrap_or_default() {
                ensure!(tables.contains_key(&category), "database: filter on '{category}', which has no table");
                let predicate = resolve_filter(raw).with_context(|| format!("database: filter on '{category}'"))?;
                filters.insert(category, predicate);
            }
            Some(DatabaseOutput { path, tables, delete: db.delete.unwrap_or(false), filters })
        }
    };

    Ok(OutputParameters { srid, folder, database })
}

fn resolve_filter(raw: RawFilter) -> Result<RowPredicate> {
    match (raw.not_null, raw.column, raw.equals) {
        (Some(column), None, None) => {
            ensure!(!column.is_empty(), "'not_null' must name a column");
            Ok(RowPredicate::NotNull(column))
        }
        (None, Some(column), Some(value)) => {
            ensure!(!column.is_empty(), "'column' must name a column");
            let value = match value {
                Value::String(s) => CellValue::Text(s),
                Value::Bool(b) => CellValue::Bool(b),
                Value::Number(n) => match n.as_i64() {
                    Some(i) => CellValue::Int(i),
                    None => CellValue::Float(n.as_f64().ok_or_else(|| anyhow!("'equals' is not a finite number"))?),
                },
                other => bail!("'equals' must be a string, number or boolean, got {other}"),
            };
            Ok(RowPredicate::Equals(column, value))
        }
        _ => bail!("expected either {{\"not_null\": column}} or {{\"column\": column, \"equals\": value}}"),
    }
}

fn non_negative(name: &str, value: f64) -> Result<f64> {
    ensure!(value.is_finite() && value >= 0.0, "'{name}' must be a non-negative number, got {value}");
    Ok(value)
}

fn resolve_processing(raw: RawParameters) -> Result<ProcessingParameters> {
    let defaults = ProcessingParameters::default();

    let distance = non_negative("distance", raw.distance.unwrap_or(defaults.distance))?;
    let prefix = raw.prefix_name.unwrap_or_default();
    ensure!(PREFIX.is_match(&prefix), "'prefixName' may only contain letters, digits and '_', got '{prefix}'");
    let h_lev_min = match raw.h_lev_min {
        Some(v) => u32::try_from(v).map_err(|_| anyhow!("'hLevMin' must be a non-negative integer, got {v}"))?,
        None => defaults.h_lev_min,
    };

    let mut rsu = raw.rsu_indicators.map(resolve_rsu).transpose().context("rsu_indicators")?;
    let grid = raw.grid_indicators.map(resolve_grid).transpose().context("grid_indicators")?;

    // Grid indicators aggregating RSU products pull in their RSU family.
    if let Some(grid) = &grid {
        let required: Vec<RsuIndicator> = grid.indicators.iter().filter_map(|i| i.required_rsu()).collect();
        if !required.is_empty() {
            let rsu = rsu.get_or_insert_with(|| RsuParameters { indicators: Vec::new(), ..Default::default() });
            for family in required {
                if !rsu.uses(family) {
                    debug!(indicator = %family, "adding RSU indicator required by grid indicators");
                    rsu.indicators.push(family);
                }
            }
        }
    }

    Ok(ProcessingParameters {
        distance,
        prefix,
        h_lev_min,
        rsu,
        grid,
        road_traffic: raw.road_traffic.unwrap_or(false),
        worldpop: raw.worldpop_indicators.unwrap_or(false),
        ground_acoustic: raw.noise_indicators.and_then(|n| n.ground_acoustic).unwrap_or(false),
    })
}

fn resolve_weights(raw: BTreeMap<String, Value>) -> Result<Weights> {
    let keys: BTreeSet<&str> = raw.keys().map(String::as_str).collect();
    let expected: BTreeSet<&str> = Weights::KEYS.into_iter().collect();
    ensure!(
        keys == expected,
        "'mapOfWeights' must contain exactly the keys {}",
        Weights::KEYS.join(", ")
    );
    let mut values = [0.0; 7];
    for (slot, key) in values.iter_mut().zip(Weights::KEYS) {
        let v = raw[key].as_f64()
            .ok_or_else(|| anyhow!("'mapOfWeights.{key}' must be a number"))?;
        *slot = non_negative(&format!("mapOfWeights.{key}"), v)?;
    }
    Ok(Weights::from_values(values))
}

fn resolve_rsu(raw: RawRsu) -> Result<RsuParameters> {
    let defaults = RsuParameters::default();

    let indicators = match raw.indicator_use {
        Some(names) => {
            ensure!(!names.is_empty(), "'indicatorUse' must not be empty");
            let mut out: Vec<RsuIndicator> = Vec::new();
            for name in names {
                let ind: RsuIndicator = name.parse()?;
                if !out.contains(&ind) {
                    out.push(ind);
                }
            }
            out
        }
        None => defaults.indicators,
    };

    let weights = raw.map_of_weights.map(resolve_weights).transpose()?.unwrap_or_default();

    Ok(RsuParameters {
        indicators,
        svf_simplified: raw.svf_simplified.unwrap_or(defaults.svf_simplified),
        surface_vegetation: non_negative("surface_vegetation", raw.surface_vegetation.unwrap_or(defaults.surface_vegetation))?,
        surface_hydro: non_negative("surface_hydro", raw.surface_hydro.unwrap_or(defaults.surface_hydro))?,
        surface_urban_areas: non_negative("surface_urban_areas", raw.surface_urban_areas.unwrap_or(defaults.surface_urban_areas))?,
        snapping_tolerance: non_negative("snappingTolerance", raw.snapping_tolerance.unwrap_or(defaults.snapping_tolerance))?,
        weights,
    })
}

fn resolve_grid(raw: RawGrid) -> Result<GridParameters> {
    let x_size = raw.x_size.ok_or_else(|| anyhow!("missing 'x_size'"))?;
    let y_size = raw.y_size.ok_or_else(|| anyhow!("missing 'y_size'"))?;
    ensure!(x_size.is_finite() && x_size > 0.0, "'x_size' must be positive, got {x_size}");
    ensure!(y_size.is_finite() && y_size > 0.0, "'y_size' must be positive, got {y_size}");

    let names = raw.indicators.ok_or_else(|| anyhow!("missing 'indicators'"))?;
    ensure!(!names.is_empty(), "'indicators' must not be empty");
    let mut indicators: Vec<GridIndicator> = Vec::new();
    for name in names {
        let ind: GridIndicator = name.parse()?;
        for dep in ind.prerequisites().iter().copied().chain(std::iter::once(ind)) {
            if !indicators.contains(&dep) {
                indicators.push(dep);
            }
        }
    }

    let output = match raw.output.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("geojson") => GridOutput::Geojson,
        Some("asc") => GridOutput::Asc,
        Some(other) => bail!("unsupported grid output '{other}', expected 'geojson' or 'asc'"),
    };

    let origin = match raw.origin.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None | Some("envelope") => GridOrigin::Envelope,
        Some("aligned") => GridOrigin::Aligned,
        Some(other) => bail!("unsupported grid origin '{other}', expected 'envelope' or 'aligned'"),
    };

    let lcz_lod = raw.lcz_lod.unwrap_or(0);
    ensure!((0..=MAX_LCZ_LOD).contains(&lcz_lod), "'lcz_lod' must be between 0 and {MAX_LCZ_LOD}, got {lcz_lod}");

    Ok(GridParameters {
        x_size,
        y_size,
        indicators,
        output,
        row_col: raw.row_col.unwrap_or(false) || output == GridOutput::Asc,
        lcz_lod: lcz_lod as u8,
        origin,
    })
}
