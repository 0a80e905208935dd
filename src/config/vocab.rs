use std::{fmt, str::FromStr};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// RSU indicator families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RsuIndicator {
    /// Local climate zones.
    Lcz,
    /// Urban typology by random forest.
    Utrf,
    /// Town energy balance inputs.
    Teb,
}

impl RsuIndicator {
    pub const ALL: [RsuIndicator; 3] = [Self::Lcz, Self::Utrf, Self::Teb];

    pub fn to_str(&self) -> &'static str {
        match self {
            Self::Lcz => "LCZ",
            Self::Utrf => "UTRF",
            Self::Teb => "TEB",
        }
    }
}

impl FromStr for RsuIndicator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL.into_iter()
            .find(|ind| ind.to_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("unknown RSU indicator '{s}', expected one of LCZ, UTRF, TEB"))
    }
}

impl fmt::Display for RsuIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.to_str()) }
}

/// Indicators that can be aggregated onto the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GridIndicator {
    BuildingFraction,
    BuildingHeight,
    BuildingPop,
    WaterFraction,
    VegetationFraction,
    RoadFraction,
    ImperviousFraction,
    LczFraction,
    LczPrimary,
    UtrfAreaFraction,
    UtrfFloorAreaFraction,
    SeaLandFraction,
    UrbanSprawlAreas,
}

impl GridIndicator {
    pub const ALL: [GridIndicator; 13] = [
        Self::BuildingFraction,
        Self::BuildingHeight,
        Self::BuildingPop,
        Self::WaterFraction,
        Self::VegetationFraction,
        Self::RoadFraction,
        Self::ImperviousFraction,
        Self::LczFraction,
        Self::LczPrimary,
        Self::UtrfAreaFraction,
        Self::UtrfFloorAreaFraction,
        Self::SeaLandFraction,
        Self::UrbanSprawlAreas,
    ];

    pub fn to_str(&self) -> &'static str {
        match self {
            Self::BuildingFraction => "BUILDING_FRACTION",
            Self::BuildingHeight => "BUILDING_HEIGHT",
            Self::BuildingPop => "BUILDING_POP",
            Self::WaterFraction => "WATER_FRACTION",
            Self::VegetationFraction => "VEGETATION_FRACTION",
            Self::RoadFraction => "ROAD_FRACTION",
            Self::ImperviousFraction => "IMPERVIOUS_FRACTION",
            Self::LczFraction => "LCZ_FRACTION",
            Self::LczPrimary => "LCZ_PRIMARY",
            Self::UtrfAreaFraction => "UTRF_AREA_FRACTION",
            Self::UtrfFloorAreaFraction => "UTRF_FLOOR_AREA_FRACTION",
            Self::SeaLandFraction => "SEA_LAND_FRACTION",
            Self::UrbanSprawlAreas => "URBAN_SPRAWL_AREAS",
        }
    }

    /// RSU family whose sub-products this grid indicator aggregates.
    pub fn required_rsu(&self) -> Option<RsuIndicator> {
        match self {
            Self::LczFraction | Self::LczPrimary | Self::UrbanSprawlAreas => Some(RsuIndicator::Lcz),
            Self::UtrfAreaFraction | Self::UtrfFloorAreaFraction => Some(RsuIndicator::Utrf),
            _ => None,
        }
    }

    /// Other grid indicators that must be computed first.
    pub fn prerequisites(&self) -> &'static [GridIndicator] {
        match self {
            Self::UrbanSprawlAreas => &[Self::LczFraction],
            _ => &[],
        }
    }
}

impl FromStr for GridIndicator {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL.into_iter()
            .find(|ind| ind.to_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("unknown grid indicator '{s}'"))
    }
}

impl fmt::Display for GridIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.to_str()) }
}
