//! Canonical, validated run parameters.

use std::{collections::BTreeMap, path::PathBuf};

use serde::Serialize;

use crate::config::{GridIndicator, RsuIndicator};
use crate::export::RowPredicate;
use crate::workflow::Location;

#[derive(Debug, Clone, Serialize)]
pub struct Parameters {
    pub description: Option<String>,
    pub store: StoreParameters,
    pub input: InputParameters,
    pub output: OutputParameters,
    pub processing: ProcessingParameters,
}

/// Where the working store lives and whether it is deleted after the run.
#[derive(Debug, Clone, Serialize)]
pub struct StoreParameters {
    pub folder: PathBuf,
    pub name: String,
    pub delete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSource {
    Folder(PathBuf),
    Database {
        path: PathBuf,
        /// Layer name to source table name.
        tables: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct InputParameters {
    pub source: InputSource,
    pub locations: Vec<Location>,
    /// SRID forced on sources lacking one.
    pub srid: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FolderOutput {
    pub path: PathBuf,
    /// Categories to write; `None` writes every category.
    pub tables: Option<Vec<String>>,
}

impl FolderOutput {
    pub fn wants(&self, category: &str) -> bool {
        self.tables.as_ref().is_none_or(|t| t.iter().any(|c| c == category))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseOutput {
    pub path: PathBuf,
    /// Category to destination table name.
    pub tables: BTreeMap<String, String>,
    /// Delete the location's previous rows before inserting.
    pub delete: bool,
    /// Categories exported through a row filter.
    pub filters: BTreeMap<String, RowPredicate>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OutputParameters {
    pub srid: Option<i32>,
    pub folder: Option<FolderOutput>,
    pub database: Option<DatabaseOutput>,
}

/// Weights of the LCZ classification distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Weights {
    pub sky_view_factor: f64,
    pub aspect_ratio: f64,
    pub building_surface_fraction: f64,
    pub impervious_surface_fraction: f64,
    pub pervious_surface_fraction: f64,
    pub height_of_roughness_elements: f64,
    pub terrain_roughness_length: f64,
}

impl Weights {
    pub const KEYS: [&'static str; 7] = [
        "sky_view_factor",
        "aspect_ratio",
        "building_surface_fraction",
        "impervious_surface_fraction",
        "pervious_surface_fraction",
        "height_of_roughness_elements",
        "terrain_roughness_length",
    ];

    pub(crate) fn from_values(v: [f64; 7]) -> Self {
        Self {
            sky_view_factor: v[0],
            aspect_ratio: v[1],
            building_surface_fraction: v[2],
            impervious_surface_fraction: v[3],
            pervious_surface_fraction: v[4],
            height_of_roughness_elements: v[5],
            terrain_roughness_length: v[6],
        }
    }
}

impl Default for Weights {
    fn default() -> Self { Self::from_values([1.0; 7]) }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RsuParameters {
    pub indicators: Vec<RsuIndicator>,
    pub svf_simplified: bool,
    pub surface_vegetation: f64,
    pub surface_hydro: f64,
    pub surface_urban_areas: f64,
    pub snapping_tolerance: f64,
    pub weights: Weights,
}

impl RsuParameters {
    pub fn uses(&self, indicator: RsuIndicator) -> bool {
        self.indicators.contains(&indicator)
    }
}

impl Default for RsuParameters {
    fn default() -> Self {
        Self {
            indicators: RsuIndicator::ALL.to_vec(),
            svf_simplified: true,
            surface_vegetation: 10000.0,
            surface_hydro: 2500.0,
            surface_urban_areas: 10000.0,
            snapping_tolerance: 0.01,
            weights: Weights::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GridOutput {
    Geojson,
    Asc,
}

/// Placement of the grid's lower-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GridOrigin {
    /// The envelope's lower-left corner.
    Envelope,
    /// Snapped down to a multiple of the cell size.
    Aligned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridParameters {
    pub x_size: f64,
    pub y_size: f64,
    pub indicators: Vec<GridIndicator>,
    pub output: GridOutput,
    pub row_col: bool,
    pub lcz_lod: u8,
    pub origin: GridOrigin,
}

impl GridParameters {
    pub fn uses(&self, indicator: GridIndicator) -> bool {
        self.indicators.contains(&indicator)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingParameters {
    pub distance: f64,
    pub prefix: String,
    pub h_lev_min: u32,
    pub rsu: Option<RsuParameters>,
    pub grid: Option<GridParameters>,
    pub road_traffic: bool,
    pub worldpop: bool,
    pub ground_acoustic: bool,
}

impl Default for ProcessingParameters {
    fn default() -> Self {
        Self {
            distance: 500.0,
            prefix: String::new(),
            h_lev_min: 3,
            rsu: None,
            grid: None,
            road_traffic: false,
            worldpop: false,
            ground_acoustic: false,
        }
    }
}
