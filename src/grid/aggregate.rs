//! Overlay of source layers onto grid cells.

use std::collections::BTreeMap;

use anyhow::Result;
use geo::{Area, BooleanOps, BoundingRect, MultiPolygon, Rect};
use tracing::warn;

use crate::config::GridIndicator;
use crate::geom::{self, build_index, query};
use crate::grid::Grid;
use crate::store::{ColumnDef, ColumnType, GeoTable, Value, WorkingStore};
use crate::workflow::ResultSet;

/// Intersected area of each source feature, per cell.
pub(crate) struct Overlay {
    pieces: Vec<Vec<(usize, f64)>>,
    feature_areas: Vec<f64>,
}

impl Overlay {
    pub(crate) fn new(grid: &Grid, features: &[Option<MultiPolygon<f64>>]) -> Self {
        let feature_areas: Vec<f64> = features.iter()
            .map(|f| f.as_ref().map_or(0.0, |mp| mp.unsigned_area()))
            .collect();
        let bounds: Vec<_> = features.iter()
            .map(|f| f.as_ref().and_then(|mp| mp.bounding_rect()))
            .collect();
        let tree = build_index(bounds.iter().enumerate().filter_map(|(i, b)| b.map(|b| (i, b))));

        let pieces = (0..grid.len())
            .map(|id| {
                let cell = grid.cell(id);
                let cell_poly = cell.to_polygon();
                query(&tree, &cell)
                    .into_iter()
                    .filter_map(|i| {
                        let mp = features[i].as_ref()?;
                        let area = match bounds[i] {
                            Some(b) if within(&b, &cell) => feature_areas[i],
                            _ => mp.intersection(&cell_poly).unsigned_area(),
                        };
                        (area > 0.0).then_some((i, area))
                    })
                    .collect()
            })
            .collect();
        Self { pieces, feature_areas }
    }

    /// Covered share of each cell, clamped to [0, 1].
    pub(crate) fn coverage(&self, cell_area: f64) -> Vec<f64> {
        self.pieces.iter()
            .map(|p| (p.iter().map(|(_, a)| a).sum::<f64>() / cell_area).clamp(0.0, 1.0))
            .collect()
    }

    /// Area-weighted mean of a feature attribute; `None` where nothing with a value overlaps.
    pub(crate) fn weighted_mean(&self, values: &[Option<f64>]) -> Vec<Option<f64>> {
        self.pieces.iter()
            .map(|p| {
                let (sum, weight) = p.iter()
                    .filter_map(|&(i, a)| values[i].map(|v| (v * a, a)))
                    .fold((0.0, 0.0), |(s, w), (v, a)| (s + v, w + a));
                (weight > 0.0).then(|| sum / weight)
            })
            .collect()
    }

    /// A feature quantity split across cells by intersected area.
    pub(crate) fn distribute(&self, values: &[Option<f64>]) -> Vec<f64> {
        self.pieces.iter()
            .map(|p| p.iter()
                .filter_map(|&(i, a)| {
                    let total = self.feature_areas[i];
                    values[i].filter(|_| total > 0.0).map(|v| v * a / total)
                })
                .sum())
            .collect()
    }

    /// Area of each class, per cell.
    pub(crate) fn class_areas<K: Ord + Clone>(&self, labels: &[Option<K>]) -> Vec<BTreeMap<K, f64>> {
        self.pieces.iter()
            .map(|p| {
                let mut areas: BTreeMap<K, f64> = BTreeMap::new();
                for &(i, a) in p {
                    if let Some(label) = &labels[i] {
                        *areas.entry(label.clone()).or_default() += a;
                    }
                }
                areas
            })
            .collect()
    }
}

fn within(inner: &Rect<f64>, outer: &Rect<f64>) -> bool {
    inner.min().x >= outer.min().x && inner.min().y >= outer.min().y
        && inner.max().x <= outer.max().x && inner.max().y <= outer.max().y
}

/// Class with the largest area; ties go to the smallest class.
pub(crate) fn majority<K: Ord + Clone>(areas: &BTreeMap<K, f64>) -> Option<K> {
    let mut best: Option<(&K, f64)> = None;
    for (k, &a) in areas {
        if best.is_none_or(|(_, b)| a > b) {
            best = Some((k, a));
        }
    }
    best.map(|(k, _)| k.clone())
}

/// Majority over the `(2r+1)^2` neighbourhood of every cell.
pub(crate) fn neighbourhood_majority<K: Ord + Clone>(grid: &Grid, areas: &[BTreeMap<K, f64>], radius: usize) -> Vec<Option<K>> {
    (0..grid.len())
        .map(|id| {
            let mut sum: BTreeMap<K, f64> = BTreeMap::new();
            for n in grid.neighbourhood(id, radius) {
                for (k, a) in &areas[n] {
                    *sum.entry(k.clone()).or_default() += a;
                }
            }
            majority(&sum)
        })
        .collect()
}

/// Source layer and attribute aggregated by each indicator.
fn source(indicator: GridIndicator) -> (&'static str, Option<&'static str>) {
    match indicator {
        GridIndicator::BuildingFraction => ("building", None),
        GridIndicator::BuildingHeight => ("building", Some("height_roof")),
        GridIndicator::BuildingPop => ("building", Some("pop")),
        GridIndicator::WaterFraction => ("water", None),
        GridIndicator::VegetationFraction => ("vegetation", None),
        GridIndicator::RoadFraction => ("road", None),
        GridIndicator::ImperviousFraction => ("impervious", None),
        GridIndicator::LczFraction | GridIndicator::LczPrimary | GridIndicator::UrbanSprawlAreas => ("rsu_lcz", Some("LCZ1")),
        GridIndicator::UtrfAreaFraction => ("rsu_utrf_area", Some("TYPO_MAJ")),
        GridIndicator::UtrfFloorAreaFraction => ("rsu_utrf_floor_area", Some("TYPO_MAJ")),
        GridIndicator::SeaLandFraction => ("sea_land_mask", Some("type")),
    }
}

fn double_column(name: &str, values: impl IntoIterator<Item = Option<f64>>) -> (ColumnDef, Vec<Value>) {
    (
        ColumnDef::new(name, ColumnType::Double),
        values.into_iter().map(|v| v.map_or(Value::Null, Value::Float)).collect(),
    )
}

fn fraction_columns<K: Ord + Clone + std::fmt::Display>(
    prefix: &str,
    areas: &[BTreeMap<K, f64>],
    cell_area: f64,
) -> Vec<(ColumnDef, Vec<Value>)> {
    let mut classes: Vec<K> = areas.iter().flat_map(|a| a.keys().cloned()).collect();
    classes.sort();
    classes.dedup();
    classes.into_iter()
        .map(|k| {
            let name = format!("{prefix}{k}");
            double_column(&name, areas.iter().map(|a| Some((a.get(&k).copied().unwrap_or(0.0) / cell_area).min(1.0))))
        })
        .collect()
}

fn integer_column(name: &str, values: Vec<Option<i64>>) -> (ColumnDef, Vec<Value>) {
    (
        ColumnDef::new(name, ColumnType::Integer),
        values.into_iter().map(|v| v.map_or(Value::Null, Value::Int)).collect(),
    )
}

fn numbers(table: &GeoTable, column: &str) -> Result<Vec<Option<f64>>> {
    table.column_values(column)?.iter().map(Value::as_f64).collect()
}

/// Grid columns produced by one indicator, or `None` when its source is missing.
pub(crate) fn indicator_columns(
    store: &WorkingStore,
    results: &ResultSet,
    grid: &Grid,
    indicator: GridIndicator,
    lcz_lod: u8,
) -> Result<Option<Vec<(ColumnDef, Vec<Value>)>>> {
    if indicator == GridIndicator::UrbanSprawlAreas {
        return Ok(None);
    }
    let (category, attribute) = source(indicator);
    let Some(handle) = results.get(category) else {
        warn!(indicator = %indicator, category, "source category missing, indicator skipped");
        return Ok(None);
    };
    let table = store.get(handle)?;
    if let Some(attr) = attribute.filter(|a| !table.schema().contains(a)) {
        warn!(indicator = %indicator, category, attribute = attr, "source attribute missing, indicator skipped");
        return Ok(None);
    }
    if table.schema().geometry_column().is_none() {
        warn!(indicator = %indicator, category, "source has no geometry, indicator skipped");
        return Ok(None);
    }

    let features: Vec<Option<MultiPolygon<f64>>> = table.main_geometries()?
        .iter()
        .map(|g| g.as_ref().and_then(geom::polygonal))
        .collect();
    let overlay = Overlay::new(grid, &features);
    let cell_area = grid.cell_area();
    let name = indicator.to_str();

    let columns = match indicator {
        GridIndicator::BuildingFraction
        | GridIndicator::WaterFraction
        | GridIndicator::VegetationFraction
        | GridIndicator::RoadFraction
        | GridIndicator::ImperviousFraction => {
            vec![double_column(name, overlay.coverage(cell_area).into_iter().map(Some))]
        }
        GridIndicator::BuildingHeight => {
            vec![double_column(name, overlay.weighted_mean(&numbers(table, "height_roof")?))]
        }
        GridIndicator::BuildingPop => {
            vec![double_column(name, overlay.distribute(&numbers(table, "pop")?).into_iter().map(Some))]
        }
        GridIndicator::LczFraction | GridIndicator::LczPrimary => {
            let labels = table.column_values("LCZ1")?.iter().map(Value::as_i64).collect::<Result<Vec<_>>>()?;
            let areas = overlay.class_areas(&labels);
            if indicator == GridIndicator::LczFraction {
                fraction_columns("LCZ_FRACTION_", &areas, cell_area)
            } else {
                let mut cols = vec![integer_column(name, areas.iter().map(majority).collect())];
                for lod in 1..=lcz_lod as usize {
                    cols.push(integer_column(&format!("LCZ_PRIMARY_LOD_{lod}"), neighbourhood_majority(grid, &areas, lod)));
                }
                cols
            }
        }
        GridIndicator::UtrfAreaFraction | GridIndicator::UtrfFloorAreaFraction => {
            let labels = table.column_values("TYPO_MAJ")?.iter().map(Value::as_text).collect::<Result<Vec<_>>>()?;
            let prefix = if indicator == GridIndicator::UtrfAreaFraction { "AREA_FRACTION_" } else { "FLOOR_AREA_FRACTION_" };
            fraction_columns(prefix, &overlay.class_areas(&labels), cell_area)
        }
        GridIndicator::SeaLandFraction => {
            let labels = table.column_values("type")?.iter()
                .map(|v| v.as_text().map(|t| t.map(|t| t.to_ascii_lowercase())))
                .collect::<Result<Vec<_>>>()?;
            let areas = overlay.class_areas(&labels);
            let share = |kind: &str| areas.iter()
                .map(|a| Some((a.get(kind).copied().unwrap_or(0.0) / cell_area).min(1.0)))
                .collect::<Vec<_>>();
            vec![double_column("SEA_FRACTION", share("sea")), double_column("LAND_FRACTION", share("land"))]
        }
        GridIndicator::UrbanSprawlAreas => Vec::new(),
    };
    Ok(Some(columns))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GridOrigin, GridOutput, GridParameters};
    use geo::{coord, polygon};

    fn grid(width: f64, height: f64, size: f64) -> Grid {
        let params = GridParameters {
            x_size: size,
            y_size: size,
            indicators: vec![],
            output: GridOutput::Geojson,
            row_col: false,
            lcz_lod: 0,
            origin: GridOrigin::Envelope,
        };
        Grid::new(Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: width, y: height }), &params).unwrap()
    }

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Option<MultiPolygon<f64>> {
        Some(MultiPolygon(vec![polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]]))
    }

    #[test]
    fn coverage_splits_features_across_cells() {
        let g = grid(20.0, 10.0, 10.0);
        // Straddles both cells: 5 m2 in the first, 15 m2 in the second.
        let overlay = Overlay::new(&g, &[rect(5.0, 0.0, 15.0, 2.0), None]);
        let cov = overlay.coverage(g.cell_area());
        assert!((cov[0] - 0.1).abs() < 1e-9);
        assert!((cov[1] - 0.1).abs() < 1e-9);

        let pop = overlay.distribute(&[Some(100.0), None]);
        assert!((pop[0] - 50.0).abs() < 1e-9);
        assert!((pop[1] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn weighted_mean_ignores_missing_values() {
        let g = grid(10.0, 10.0, 10.0);
        let overlay = Overlay::new(&g, &[rect(0.0, 0.0, 1.0, 1.0), rect(2.0, 2.0, 5.0, 5.0), rect(6.0, 6.0, 7.0, 7.0)]);
        let mean = overlay.weighted_mean(&[Some(10.0), Some(20.0), None]);
        assert!((mean[0].unwrap() - (10.0 + 9.0 * 20.0) / 10.0).abs() < 1e-9);
    }

    #[test]
    fn majority_prefers_largest_then_smallest_class() {
        let g = grid(10.0, 10.0, 10.0);
        let overlay = Overlay::new(&g, &[rect(0.0, 0.0, 5.0, 10.0), rect(5.0, 0.0, 10.0, 4.0), rect(5.0, 4.0, 10.0, 10.0)]);
        let areas = overlay.class_areas(&[Some(2), Some(6), Some(6)]);
        assert_eq!(majority(&areas[0]), Some(2));

        let tie: BTreeMap<i64, f64> = [(4, 1.0), (3, 1.0)].into_iter().collect();
        assert_eq!(majority(&tie), Some(3));
        assert_eq!(majority(&BTreeMap::<i64, f64>::new()), None);
    }

    #[test]
    fn neighbourhood_majority_smooths_isolated_cells() {
        let g = grid(30.0, 10.0, 10.0);
        let areas: Vec<BTreeMap<i64, f64>> = vec![
            [(1, 100.0)].into_iter().collect(),
            [(9, 60.0)].into_iter().collect(),
            [(1, 100.0)].into_iter().collect(),
        ];
        assert_eq!(neighbourhood_majority(&g, &areas, 1)[1], Some(1));
    }
}
