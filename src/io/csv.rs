//! CSV writing for geometry-free tables.

use std::io::Write;

use anyhow::{ensure, Context, Result};
use polars::{io::SerWriter, prelude::CsvWriter};

use crate::store::GeoTable;

/// Write a table without geometry columns as CSV with a header row.
pub(crate) fn write_csv(table: &GeoTable, out: impl Write) -> Result<()> {
    ensure!(
        table.schema().geometry_column().is_none(),
        "[io::csv] tables with geometry columns are written as GeoJSON"
    );
    let mut df = table.frame().clone();
    CsvWriter::new(out)
        .include_header(true)
        .finish(&mut df)
        .context("[io::csv] failed to write CSV")
}
