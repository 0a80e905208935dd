//! ESRI ASCII grids.

use std::io::Write;

use anyhow::{anyhow, bail, ensure, Context, Result};
use geo::{coord, Rect};

pub(crate) const NODATA: f64 = -9999.0;

/// A raster in ESRI ASCII layout. `values` is row-major, north row first.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AscGrid {
    pub ncols: usize,
    pub nrows: usize,
    /// Lower-left corner of the lower-left cell.
    pub xll: f64,
    pub yll: f64,
    pub dx: f64,
    pub dy: f64,
    pub nodata: f64,
    pub values: Vec<f64>,
}

impl AscGrid {
    /// Extent of the cell at `col`, `row` (row 0 is the north row).
    pub fn cell_rect(&self, col: usize, row: usize) -> Rect<f64> {
        let x0 = self.xll + col as f64 * self.dx;
        let y0 = self.yll + (self.nrows - 1 - row) as f64 * self.dy;
        Rect::new(coord! { x: x0, y: y0 }, coord! { x: x0 + self.dx, y: y0 + self.dy })
    }

    /// Cell value, or `None` for nodata.
    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        let v = self.values[row * self.ncols + col];
        (v != self.nodata && v.is_finite()).then_some(v)
    }

    /// Parse the text form. Accepts `*corner` or `*center` origins and either
    /// `cellsize` or `dx`/`dy`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut tokens = text.split_whitespace().peekable();
        let (mut ncols, mut nrows) = (None, None);
        let (mut xll, mut yll, mut centered) = (None, None, false);
        let (mut dx, mut dy, mut nodata) = (None, None, NODATA);

        while let Some(key) = tokens.peek().filter(|t| t.chars().next().is_some_and(char::is_alphabetic)) {
            let key = key.to_ascii_lowercase();
            tokens.next();
            let value: f64 = tokens.next()
                .ok_or_else(|| anyhow!("[io::asc] missing value for '{key}'"))?
                .parse()
                .with_context(|| format!("[io::asc] invalid value for '{key}'"))?;
            match key.as_str() {
                "ncols" => ncols = Some(value as usize),
                "nrows" => nrows = Some(value as usize),
                "xllcorner" => xll = Some(value),
                "yllcorner" => yll = Some(value),
                "xllcenter" => { xll = Some(value); centered = true; }
                "yllcenter" => { yll = Some(value); centered = true; }
                "cellsize" => { dx = Some(value); dy = Some(value); }
                "dx" => dx = Some(value),
                "dy" => dy = Some(value),
                "nodata_value" => nodata = value,
                other => bail!("[io::asc] unknown header '{other}'"),
            }
        }

        let ncols = ncols.ok_or_else(|| anyhow!("[io::asc] missing ncols"))?;
        let nrows = nrows.ok_or_else(|| anyhow!("[io::asc] missing nrows"))?;
        let dx = dx.ok_or_else(|| anyhow!("[io::asc] missing cellsize"))?;
        let dy = dy.ok_or_else(|| anyhow!("[io::asc] missing cellsize"))?;
        ensure!(dx > 0.0 && dy > 0.0, "[io::asc] cell size must be positive");
        let (mut xll, mut yll) = (
            xll.ok_or_else(|| anyhow!("[io::asc] missing xllcorner"))?,
            yll.ok_or_else(|| anyhow!("[io::asc] missing yllcorner"))?,
        );
        if centered {
            xll -= dx / 2.0;
            yll -= dy / 2.0;
        }

        let values = tokens
            .map(|t| t.parse::<f64>().with_context(|| format!("[io::asc] invalid cell value '{t}'")))
            .collect::<Result<Vec<_>>>()?;
        ensure!(
            values.len() == ncols * nrows,
            "[io::asc] expected {} cell values, found {}", ncols * nrows, values.len()
        );
        Ok(Self { ncols, nrows, xll, yll, dx, dy, nodata, values })
    }

    pub fn write(&self, mut out: impl Write) -> Result<()> {
        writeln!(out, "ncols {}", self.ncols)?;
        writeln!(out, "nrows {}", self.nrows)?;
        writeln!(out, "xllcorner {}", self.xll)?;
        writeln!(out, "yllcorner {}", self.yll)?;
        if self.dx == self.dy {
            writeln!(out, "cellsize {}", self.dx)?;
        } else {
            writeln!(out, "dx {}", self.dx)?;
            writeln!(out, "dy {}", self.dy)?;
        }
        writeln!(out, "NODATA_value {}", self.nodata)?;
        for row in self.values.chunks(self.ncols.max(1)) {
            let line = row.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}
