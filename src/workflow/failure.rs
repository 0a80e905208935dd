use geo::Geometry;
use serde::Serialize;

use crate::error::Error;
use crate::geom::{Reprojector, WGS84};
use crate::store::{ColumnType, GeoTable, Schema, Value};

/// Build tag recorded with every failure.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Category name of the failure log.
pub const LOG_CATEGORY: &str = "logs";

/// A location that could not be processed.
#[derive(Debug, Clone, Serialize)]
pub struct LocationFailure {
    pub location: String,
    /// Best-known zone geometry, in WGS84.
    #[serde(skip)]
    pub geometry: Option<Geometry<f64>>,
    pub message: String,
    pub version: &'static str,
}

impl LocationFailure {
    /// Record a failure; `geometry` is given in `srid` and stored in WGS84
    /// when it can be reprojected.
    pub fn new(location: &str, geometry: Option<(Geometry<f64>, i32)>, message: String) -> Self {
        let geometry = geometry.and_then(|(g, srid)| {
            if srid == WGS84 {
                return Some(g);
            }
            Reprojector::new(srid, WGS84).and_then(|p| p.geometry(&g)).ok()
        });
        Self { location: location.to_string(), geometry, message, version: VERSION }
    }

    pub fn to_error(&self) -> Error {
        Error::Location { location: self.location.clone(), message: self.message.clone() }
    }
}

/// A category that could not be written to one sink.
#[derive(Debug, Clone, Serialize)]
pub struct ExportFailure {
    pub location: String,
    pub category: String,
    pub sink: String,
    pub message: String,
}

impl ExportFailure {
    pub fn to_error(&self) -> Error {
        Error::Export { category: self.category.clone(), sink: self.sink.clone(), message: self.message.clone() }
    }
}

/// The failure log as a table `(the_geom, location, info, version)` in WGS84.
pub fn log_table(failures: &[LocationFailure]) -> anyhow::Result<GeoTable> {
    let schema = Schema::of(&[
        ("the_geom", ColumnType::Geometry),
        ("location", ColumnType::Text),
        ("info", ColumnType::Text),
        ("version", ColumnType::Text),
    ])?;
    let rows = failures.iter()
        .map(|f| vec![
            f.geometry.as_ref().map_or(Value::Null, Value::geometry),
            Value::Text(f.location.clone()),
            Value::Text(f.message.clone()),
            Value::Text(f.version.to_string()),
        ])
        .collect();
    GeoTable::from_rows(schema, rows, Some(WGS84))
}
