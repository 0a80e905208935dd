//! ResultMerger: one spatially continuous table per category.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::store::{plan_union, Schema, TableNamer, WorkingStore};
use crate::workflow::ResultSet;

/// Contributing tables per category, in sub-area order.
pub fn group_by_category(results: &[ResultSet]) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for rs in results {
        for (category, table) in rs.iter() {
            grouped.entry(category.to_string()).or_default().push(table.to_string());
        }
    }
    grouped
}

/// Union every category's tables into one new table and drop the inputs.
///
/// Categories without contributing tables are omitted.
pub fn merge(
    store: &mut WorkingStore,
    namer: &TableNamer,
    location: &str,
    grouped: &BTreeMap<String, Vec<String>>,
) -> Result<ResultSet> {
    let mut merged = ResultSet::new();
    for (category, tables) in grouped {
        if tables.is_empty() {
            continue;
        }
        let schemas = tables.iter()
            .map(|t| store.schema(t).cloned())
            .collect::<Result<Vec<Schema>>>()?;
        let inputs: Vec<(&str, &Schema)> = tables.iter().map(String::as_str).zip(schemas.iter()).collect();
        let plan = plan_union(&inputs)
            .with_context(|| format!("[workflow::merge] cannot reconcile '{category}' tables"))?;

        let target = namer.name(location, category);
        store.union_all(&target, &plan)
            .with_context(|| format!("[workflow::merge] cannot union '{category}' tables"))?;
        store.drop_tables(tables.iter().map(String::as_str).filter(|t| *t != target));

        debug!(location, category = %category, inputs = tables.len(), columns = plan.schema.len(), "merged category");
        merged = merged.with(category, &target);
    }
    Ok(merged)
}

/// Merge the per-sub-area results of a location.
///
/// A single sub-area's results are returned unchanged.
pub fn merge_results(
    store: &mut WorkingStore,
    namer: &TableNamer,
    location: &str,
    mut results: Vec<ResultSet>,
) -> Result<ResultSet> {
    match results.len() {
        0 => Ok(ResultSet::new()),
        1 => Ok(results.remove(0)),
        n => {
            let merged = merge(store, namer, location, &group_by_category(&results))?;
            info!(location, sub_areas = n, categories = merged.len(), "merged sub-area results");
            Ok(merged)
        }
    }
}
