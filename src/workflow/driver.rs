//! WorkflowDriver: the per-location loop.

use std::collections::BTreeMap;

use ahash::AHashSet;
use anyhow::{anyhow, Result};
use geo::{Geometry, GeometryCollection};
use tracing::{debug, error, info, warn};

use crate::config::Parameters;
use crate::error::{chain_message, Error};
use crate::export::{DatabaseExporter, FileExporter};
use crate::geom::WGS84;
use crate::grid;
use crate::source::{empty_population, PopulationProvider, SourceLoader, SubAreaInput, SubAreaProcessor, POPULATION_LAYER};
use crate::store::{TableNamer, WorkingStore};
use crate::workflow::{decompose, merge_results, ExportFailure, Location, LocationFailure, ResultSet, LOG_CATEGORY};

/// What a run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// Merged results of every successful location.
    pub results: BTreeMap<String, ResultSet>,
    pub failures: Vec<LocationFailure>,
    pub export_failures: Vec<ExportFailure>,
    /// The working store, kept when it is not ephemeral.
    pub store: Option<WorkingStore>,
}

impl RunOutcome {
    /// True when every location and every export succeeded.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.export_failures.is_empty()
    }
}

/// A location's zone as far as it is known, with its SRID.
type KnownZone = Option<(Geometry<f64>, i32)>;

/// One run over the configured locations, with its collaborators.
pub struct Workflow {
    params: Parameters,
    namer: TableNamer,
    loader: Box<dyn SourceLoader>,
    processor: Box<dyn SubAreaProcessor>,
    population: Option<Box<dyn PopulationProvider>>,
}

impl Workflow {
    pub fn new(params: Parameters, loader: impl SourceLoader + 'static, processor: impl SubAreaProcessor + 'static) -> Self {
        let namer = TableNamer::random(&params.processing.prefix);
        Self { params, namer, loader: Box::new(loader), processor: Box::new(processor), population: None }
    }

    /// Population source used when `worldpop_indicators` is set.
    pub fn with_population(mut self, provider: impl PopulationProvider + 'static) -> Self {
        self.population = Some(Box::new(provider));
        self
    }

    /// Replace the run's table namer.
    pub fn with_namer(mut self, namer: TableNamer) -> Self {
        self.namer = namer;
        self
    }

    #[inline] pub fn params(&self) -> &Parameters { &self.params }

    #[inline] pub fn namer(&self) -> &TableNamer { &self.namer }

    /// Process every location in input order.
    ///
    /// Only configuration and resource errors are returned as `Err`; location
    /// and export failures are reported in the outcome.
    pub fn run(mut self) -> crate::Result<RunOutcome> {
        let output = self.params.output.clone();
        let grid = self.params.processing.grid.clone();
        let files = output.folder.map(|f| FileExporter::new(f, output.srid, grid)).transpose()?;
        let mut database = output.database.as_ref().map(|d| DatabaseExporter::open(d, output.srid)).transpose()?;

        let cfg = &self.params.store;
        let mut store = WorkingStore::open(&cfg.folder, &cfg.name, cfg.delete)
            .map_err(|e| Error::resource(chain_message(&e)))?;

        let locations = self.params.input.locations.clone();
        info!(locations = locations.len(), salt = self.namer.salt(), "starting run");
        let mut outcome = RunOutcome { results: BTreeMap::new(), failures: Vec::new(), export_failures: Vec::new(), store: None };

        for (index, location) in locations.iter().enumerate() {
            let id = location.id();
            info!(location = %id, "processing location");
            match self.process(&mut store, index, location) {
                Ok(results) => {
                    if let Some(files) = &files {
                        outcome.export_failures.extend(files.export(&store, &id, &results));
                    }
                    if let Some(database) = &mut database {
                        outcome.export_failures.extend(database.export(&store, &id, &results));
                    }
                    info!(location = %id, categories = results.len(), "location done");
                    outcome.results.insert(id, results);
                }
                Err(failure) => {
                    error!(location = %id, error = %failure.message, "location failed");
                    outcome.failures.push(failure);
                }
            }
        }

        if let Some(files) = &files {
            if let Err(e) = files.export_log(&outcome.failures) {
                outcome.export_failures.push(log_failure("folder", &e));
            }
        }
        if let Some(database) = &mut database {
            if let Err(e) = database.export_log(&outcome.failures) {
                outcome.export_failures.push(log_failure("database", &e));
            }
        }

        info!(
            succeeded = outcome.results.len(),
            failed = outcome.failures.len(),
            export_failures = outcome.export_failures.len(),
            "run finished"
        );
        if store.is_ephemeral() {
            store.close().map_err(|e| Error::resource(format!("cannot close working store: {}", chain_message(&e))))?;
        } else {
            outcome.store = Some(store);
        }
        Ok(outcome)
    }

    /// Run the `index`-th location; a failure carries the zone geometry when it is known.
    ///
    /// Every table the location created and does not hand on in its result is
    /// dropped, on failure too.
    fn process(&mut self, store: &mut WorkingStore, index: usize, location: &Location) -> Result<ResultSet, LocationFailure> {
        let namer = self.namer.scoped(index);
        let before: AHashSet<String> = store.table_names().map(str::to_string).collect();
        let mut zone: KnownZone = location.polygon().map(|p| (Geometry::Polygon(p), WGS84));
        let processed = self.try_process(store, &namer, location, &mut zone);

        let created: Vec<String> = {
            let kept: AHashSet<&str> = processed.as_ref().map(|rs| rs.tables().collect()).unwrap_or_default();
            store.table_names()
                .filter(|t| !before.contains(*t) && !kept.contains(t))
                .map(str::to_string)
                .collect()
        };
        debug!(location = %location.id(), tables = created.len(), "dropping working tables");
        store.drop_tables(created.iter().map(String::as_str));

        processed.map_err(|e| LocationFailure::new(&location.id(), zone, chain_message(&e)))
    }

    fn try_process(
        &mut self,
        store: &mut WorkingStore,
        namer: &TableNamer,
        location: &Location,
        zone: &mut KnownZone,
    ) -> Result<ResultSet> {
        let id = location.id();
        let loaded = self.loader.load(store, namer, location)?;
        let zone_table = store.get(&loaded.zone)?;
        let mut parts = zone_table.main_geometries()?.into_iter().flatten().collect::<Vec<_>>();
        *zone = match parts.len() {
            0 => None,
            1 => parts.pop().map(|g| (g, loaded.srid)),
            _ => Some((Geometry::GeometryCollection(GeometryCollection(parts)), loaded.srid)),
        };

        let mut layers = loaded.layers.clone();
        if self.params.processing.worldpop {
            let handle = namer.name(&id, &format!("input_{POPULATION_LAYER}"));
            let population = self.population(store, &loaded.zone, loaded.srid, &id)?;
            store.put(&handle, population);
            layers.insert(POPULATION_LAYER.to_string(), handle);
        }

        let sub_areas = decompose(store, namer, &loaded.zone, &id)?;
        info!(location = %id, sub_areas = sub_areas.len(), "decomposed zone");

        let mut results = Vec::with_capacity(sub_areas.len());
        for sub_area in &sub_areas {
            let input = SubAreaInput {
                location: &id,
                sub_area,
                srid: loaded.srid,
                layers: &layers,
                params: &self.params.processing,
                namer,
            };
            match self.processor.process(store, &input)? {
                Some(rs) => results.push(rs),
                None => debug!(location = %id, sub_area = %sub_area.id, "nothing computed"),
            }
        }

        let mut merged = merge_results(store, namer, &id, results)?;
        if let Some(params) = &self.params.processing.grid {
            merged = grid::aggregate(store, namer, &id, &merged, params)?;
        }
        Ok(merged)
    }

    /// Population cells over the zone, or an empty placeholder.
    fn population(&mut self, store: &WorkingStore, zone: &str, srid: i32, location: &str) -> Result<crate::store::GeoTable> {
        let bbox = store.envelope(zone)?.ok_or_else(|| anyhow!("[workflow] zone of '{location}' is empty"))?;
        let provided = match self.population.as_mut() {
            Some(provider) => provider.population(bbox, srid),
            None => Err(Error::DataUnavailable("no population provider".into())),
        };
        match provided {
            Ok(table) => Ok(table),
            Err(Error::DataUnavailable(reason)) => {
                warn!(location, reason = %reason, "population unavailable, using an empty table");
                empty_population(srid)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn log_failure(sink: &str, e: &anyhow::Error) -> ExportFailure {
    let message = chain_message(e);
    error!(sink, error = %message, "failure log export failed");
    ExportFailure { location: String::new(), category: LOG_CATEGORY.to_string(), sink: sink.to_string(), message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse;
    use crate::source::LoadedLocation;
    use crate::store::{ColumnType, GeoTable, Schema, Value};
    use geo::polygon;

    /// Loads a fixed square zone; fails for location "bad".
    struct SquareLoader;

    impl SourceLoader for SquareLoader {
        fn load(&mut self, store: &mut WorkingStore, namer: &TableNamer, location: &Location) -> Result<LoadedLocation> {
            let id = location.id();
            anyhow::ensure!(id != "bad", "no such zone");
            let schema = Schema::of(&[("id_zone", ColumnType::Text), ("the_geom", ColumnType::Geometry)])?;
            let square = Geometry::Polygon(polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)]);
            let zone = namer.name(&id, "input_zone");
            store.put(&zone, GeoTable::from_rows(schema, vec![vec![Value::Text(id.clone()), Value::geometry(&square)]], Some(2154))?);
            Ok(LoadedLocation { zone, srid: 2154, layers: BTreeMap::new() })
        }
    }

    /// Hands the sub-area table on as the zone category.
    struct Echo;

    impl SubAreaProcessor for Echo {
        fn process(&mut self, _store: &mut WorkingStore, input: &SubAreaInput<'_>) -> Result<Option<ResultSet>> {
            Ok(Some(ResultSet::new().with("zone", &input.sub_area.table)))
        }
    }

    fn params(root: &std::path::Path, extra: &str) -> Parameters {
        let input = root.join("in");
        std::fs::create_dir_all(&input).unwrap();
        let doc = format!(
            r#"{{"geoclimatedb": {{"folder": {:?}, "name": "db", "delete": true}},
                "input": {{"folder": {:?}, "locations": ["A", "bad", "C"]}}{extra}}}"#,
            root, input
        );
        parse(&doc).unwrap()
    }

    #[test]
    fn failures_are_isolated_per_location() {
        let root = tempfile::tempdir().unwrap();
        let outcome = Workflow::new(params(root.path(), ""), SquareLoader, Echo).run().unwrap();
        assert_eq!(outcome.results.keys().collect::<Vec<_>>(), vec!["A", "C"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].location, "bad");
        assert!(outcome.failures[0].message.contains("no such zone"));
        assert!(outcome.store.is_none());
        assert!(!root.path().join("db").exists());
    }

    #[test]
    fn failed_locations_leave_no_tables_behind() {
        /// Writes a scratch table, then fails.
        struct Failing;
        impl SubAreaProcessor for Failing {
            fn process(&mut self, store: &mut WorkingStore, input: &SubAreaInput<'_>) -> Result<Option<ResultSet>> {
                let scratch = input.namer.name(&input.sub_area.id, "scratch");
                let copy = store.get(&input.sub_area.table)?.clone();
                store.put(&scratch, copy);
                anyhow::bail!("cannot compute indicators")
            }
        }

        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        let doc = format!(
            r#"{{"geoclimatedb": {{"folder": {:?}, "name": "db", "delete": false}},
                "input": {{"folder": {:?}, "locations": ["A", "B", "C", "D", "E"]}}}}"#,
            root.path(), input
        );
        let outcome = Workflow::new(parse(&doc).unwrap(), SquareLoader, Failing).run().unwrap();
        assert_eq!(outcome.failures.len(), 5);
        let store = outcome.store.unwrap();
        assert_eq!(store.table_names().count(), 0);
        store.close().unwrap();
    }

    #[test]
    fn successful_locations_keep_only_their_results() {
        let root = tempfile::tempdir().unwrap();
        let input = root.path().join("in");
        std::fs::create_dir_all(&input).unwrap();
        let doc = format!(
            r#"{{"geoclimatedb": {{"folder": {:?}, "name": "db", "delete": false}},
                "input": {{"folder": {:?}, "locations": ["A", "C"]}}}}"#,
            root.path(), input
        );
        let outcome = Workflow::new(parse(&doc).unwrap(), SquareLoader, Echo).run().unwrap();
        let store = outcome.store.unwrap();
        let mut expected: Vec<&str> = outcome.results.values().flat_map(ResultSet::tables).collect();
        expected.sort_unstable();
        assert_eq!(store.table_names().collect::<Vec<_>>(), expected);
        store.close().unwrap();
    }

    #[test]
    fn missing_population_becomes_a_placeholder() {
        struct Counting(usize);
        impl SubAreaProcessor for Counting {
            fn process(&mut self, store: &mut WorkingStore, input: &SubAreaInput<'_>) -> Result<Option<ResultSet>> {
                let pop = &input.layers[POPULATION_LAYER];
                self.0 += store.row_count(pop)?;
                anyhow::ensure!(store.schema(pop)?.contains("pop"));
                Ok(None)
            }
        }

        let root = tempfile::tempdir().unwrap();
        let params = params(root.path(), r#", "parameters": {"worldpop_indicators": true}"#);
        let outcome = Workflow::new(params, SquareLoader, Counting(0)).run().unwrap();
        assert_eq!(outcome.results.len(), 2);
        assert!(outcome.results.values().all(ResultSet::is_empty));
    }

    #[test]
    fn failure_log_is_written_to_the_folder() {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("out");
        let extra = format!(r#", "output": {{"folder": {:?}}}"#, out);
        let outcome = Workflow::new(params(root.path(), &extra), SquareLoader, Echo).run().unwrap();
        assert!(outcome.export_failures.is_empty());
        assert!(out.join("A").join("zone.geojson").exists());
        let log = std::fs::read_to_string(out.join("logs.geojson")).unwrap();
        assert!(log.contains("no such zone"));
    }
}
