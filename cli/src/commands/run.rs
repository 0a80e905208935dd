use std::path::{Path, PathBuf};

use anyhow::Result;
use geoclimate::config::{InputSource, Parameters};
use geoclimate::source::{AscPopulationProvider, DatabaseLoader, FolderLoader, LayerClipProcessor};
use geoclimate::{RunOutcome, Workflow, WGS84};
use tracing::info;

const POPULATION_FILE: &str = "population.asc";

/// Folder searched for the population grid.
fn population_dir(source: &InputSource) -> PathBuf {
    match source {
        InputSource::Folder(path) => path.clone(),
        InputSource::Database { path, .. } => path.parent().unwrap_or(Path::new(".")).to_path_buf(),
    }
}

fn workflow(params: Parameters) -> Result<Workflow> {
    let input = &params.input;
    let (srid, distance) = (input.srid, params.processing.distance);
    let population = AscPopulationProvider::new(&population_dir(&input.source).join(POPULATION_FILE), srid.unwrap_or(WGS84));
    let workflow = match input.source.clone() {
        InputSource::Folder(path) => {
            let loader = FolderLoader::open(&path, srid, distance)?;
            Workflow::new(params, loader, LayerClipProcessor)
        }
        InputSource::Database { path, tables } => {
            let loader = DatabaseLoader::open(&path, tables, srid, distance)?;
            Workflow::new(params, loader, LayerClipProcessor)
        }
    };
    Ok(workflow.with_population(population))
}

fn summarize(outcome: &RunOutcome) {
    for (location, results) in &outcome.results {
        let categories = results.categories().collect::<Vec<_>>().join(", ");
        println!("[run] {location}: ok ({categories})");
    }
    for failure in &outcome.failures {
        println!("[run] {}: failed: {}", failure.location, failure.message);
    }
    for failure in &outcome.export_failures {
        println!("[run] {}: export of {} to {} failed: {}", failure.location, failure.category, failure.sink, failure.message);
    }
}

pub fn run(_cli: &crate::cli::Cli, args: &crate::cli::ConfigArgs) -> Result<()> {
    let params = geoclimate::config::load(&args.config)?;
    info!(config = %args.config.display(), locations = params.input.locations.len(), "loaded configuration");

    let outcome = workflow(params)?.run()?;
    summarize(&outcome);

    if let Some(store) = outcome.store {
        println!("[run] working store kept at {}", store.dir().display());
        store.close()?;
    }
    Ok(())
}
