//! GridAggregator: indicators aggregated onto a regular grid over the zone.

mod aggregate;
mod build;
mod sprawl;

pub use build::{Grid, MAX_CELLS};
pub use sprawl::{SprawlAreas, COOL_THRESHOLD, URBAN_THRESHOLD};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{GridIndicator, GridParameters};
use crate::store::{TableNamer, WorkingStore};
use crate::workflow::ResultSet;

pub const GRID_CATEGORY: &str = "grid_indicators";
pub const SPRAWL_CATEGORY: &str = "urban_sprawl_areas";
pub const COOL_CATEGORY: &str = "urban_cool_areas";

/// Add grid categories to a merged result set.
///
/// Without a zone envelope, or when the grid cannot be built, the result set
/// is returned unchanged.
pub fn aggregate(
    store: &mut WorkingStore,
    namer: &TableNamer,
    location: &str,
    results: &ResultSet,
    params: &GridParameters,
) -> Result<ResultSet> {
    let Some(zone) = results.get("zone") else {
        warn!(location, "no zone table, grid indicators skipped");
        return Ok(results.clone());
    };
    let srid = store.get(zone)?.srid();
    let Some(envelope) = store.envelope(zone)? else {
        warn!(location, "empty zone, grid indicators skipped");
        return Ok(results.clone());
    };
    let grid = match Grid::new(envelope, params) {
        Ok(grid) => grid,
        Err(e) => {
            warn!(location, error = %e, "cannot create a grid, grid indicators skipped");
            return Ok(results.clone());
        }
    };

    let mut table = grid.to_table(params.row_col, srid)?;
    for &indicator in &params.indicators {
        let columns = aggregate::indicator_columns(store, results, &grid, indicator, params.lcz_lod)
            .with_context(|| format!("[grid] computing {indicator}"))?;
        for (def, values) in columns.into_iter().flatten() {
            table = table.with_column(def, values)?;
        }
    }

    let mut out = results.clone();
    if params.uses(GridIndicator::UrbanSprawlAreas) {
        match sprawl::compute(&table)? {
            Some(areas) => {
                let name = namer.name(location, SPRAWL_CATEGORY);
                store.put(&name, areas.sprawl);
                out = out.with(SPRAWL_CATEGORY, &name);
                if let Some(cool) = areas.cool {
                    let name = namer.name(location, COOL_CATEGORY);
                    store.put(&name, cool);
                    out = out.with(COOL_CATEGORY, &name);
                }
            }
            None => warn!(location, "no LCZ fractions on the grid, urban sprawl skipped"),
        }
    }

    let name = namer.name(location, GRID_CATEGORY);
    info!(location, cells = grid.len(), columns = table.schema().len(), "aggregated grid indicators");
    store.put(&name, table);
    Ok(out.with(GRID_CATEGORY, &name))
}
