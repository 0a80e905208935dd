//! The configuration document as written by users.
//!
//! Every field is optional here; presence and value checks happen in
//! [`resolve`](crate::config::resolve).

use std::{collections::BTreeMap, path::PathBuf};

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
pub struct RawConfig {
    pub description: Option<String>,
    pub geoclimatedb: Option<RawStore>,
    pub input: Option<RawInput>,
    pub output: Option<RawOutput>,
    pub parameters: Option<RawParameters>,
}

/// Keys recognised at the top level of the document.
pub(crate) const TOP_LEVEL_KEYS: [&str; 5] = ["description", "geoclimatedb", "input", "output", "parameters"];

#[derive(Debug, Default, Deserialize)]
pub struct RawStore {
    pub folder: Option<PathBuf>,
    pub name: Option<String>,
    pub delete: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawConnection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawDatabase {
    pub connection: Option<RawConnection>,
    pub tables: Option<BTreeMap<String, String>>,
    pub srid: Option<i64>,
    pub delete: Option<bool>,
    pub filters: Option<BTreeMap<String, RawFilter>>,
}

/// `{"not_null": column}` or `{"column": column, "equals": value}`.
#[derive(Debug, Default, Deserialize)]
pub struct RawFilter {
    pub not_null: Option<String>,
    pub column: Option<String>,
    pub equals: Option<Value>,
}

/// A location: an administrative id or `[lat_min, lon_min, lat_max, lon_max]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawLocation {
    Id(String),
    Code(i64),
    BBox(Vec<f64>),
}

#[derive(Debug, Default, Deserialize)]
pub struct RawInput {
    pub folder: Option<PathBuf>,
    pub database: Option<RawDatabase>,
    pub locations: Option<Vec<RawLocation>>,
    pub srid: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawFolder {
    Path(PathBuf),
    Detailed {
        path: Option<PathBuf>,
        tables: Option<Vec<String>>,
    },
}

#[derive(Debug, Default, Deserialize)]
pub struct RawOutput {
    pub srid: Option<i64>,
    pub folder: Option<RawFolder>,
    pub database: Option<RawDatabase>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawRsu {
    #[serde(rename = "indicatorUse")]
    pub indicator_use: Option<Vec<String>>,
    #[serde(rename = "svfSimplified")]
    pub svf_simplified: Option<bool>,
    pub surface_vegetation: Option<f64>,
    pub surface_hydro: Option<f64>,
    pub surface_urban_areas: Option<f64>,
    #[serde(rename = "snappingTolerance")]
    pub snapping_tolerance: Option<f64>,
    #[serde(rename = "mapOfWeights")]
    pub map_of_weights: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawGrid {
    pub x_size: Option<f64>,
    pub y_size: Option<f64>,
    pub indicators: Option<Vec<String>>,
    pub output: Option<String>,
    #[serde(rename = "rowCol")]
    pub row_col: Option<bool>,
    pub lcz_lod: Option<i64>,
    pub origin: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawNoise {
    pub ground_acoustic: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawParameters {
    pub distance: Option<f64>,
    #[serde(rename = "prefixName")]
    pub prefix_name: Option<String>,
    #[serde(rename = "hLevMin")]
    pub h_lev_min: Option<i64>,
    pub rsu_indicators: Option<RawRsu>,
    pub grid_indicators: Option<RawGrid>,
    pub road_traffic: Option<bool>,
    pub worldpop_indicators: Option<bool>,
    pub noise_indicators: Option<RawNoise>,
}
