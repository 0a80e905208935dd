use anyhow::{bail, ensure, Result};
use geo::{coord, Geometry, Rect};

use crate::config::{GridOrigin, GridParameters};
use crate::store::{ColumnDef, ColumnType, GeoTable, Schema, Value};

/// Largest grid the aggregator will build.
pub const MAX_CELLS: usize = 10_000_000;

/// A regular grid. Cell ids are row-major from the south-west corner.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    pub x0: f64,
    pub y0: f64,
    pub dx: f64,
    pub dy: f64,
    pub ncols: usize,
    pub nrows: usize,
}

impl Grid {
    /// Grid of `x_size` by `y_size` cells covering `envelope`.
    pub fn new(envelope: Rect<f64>, params: &GridParameters) -> Result<Self> {
        let (dx, dy) = (params.x_size, params.y_size);
        ensure!(dx > 0.0 && dy > 0.0, "[grid] cell size must be positive");
        if envelope.width() <= 0.0 || envelope.height() <= 0.0 {
            bail!("[grid] cannot create a grid over a degenerate envelope {:?}", envelope);
        }

        let (x0, y0) = match params.origin {
            GridOrigin::Envelope => (envelope.min().x, envelope.min().y),
            GridOrigin::Aligned => ((envelope.min().x / dx).floor() * dx, (envelope.min().y / dy).floor() * dy),
        };
        let ncols = ((envelope.max().x - x0) / dx).ceil().max(1.0);
        let nrows = ((envelope.max().y - y0) / dy).ceil().max(1.0);
        if ncols * nrows > MAX_CELLS as f64 {
            bail!("[grid] cannot create a grid of {ncols} x {nrows} cells, the limit is {MAX_CELLS}");
        }
        Ok(Self { x0, y0, dx, dy, ncols: ncols as usize, nrows: nrows as usize })
    }

    #[inline] pub fn len(&self) -> usize { self.ncols * self.nrows }

    #[inline] pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Column and row (row 0 is the south row) of a cell id.
    #[inline] pub fn col_row(&self, id: usize) -> (usize, usize) { (id % self.ncols, id / self.ncols) }

    #[inline] pub fn id(&self, col: usize, row: usize) -> usize { row * self.ncols + col }

    #[inline] pub fn cell_area(&self) -> f64 { self.dx * self.dy }

    pub fn cell(&self, id: usize) -> Rect<f64> {
        let (col, row) = self.col_row(id);
        let x = self.x0 + col as f64 * self.dx;
        let y = self.y0 + row as f64 * self.dy;
        Rect::new(coord! { x: x, y: y }, coord! { x: x + self.dx, y: y + self.dy })
    }

    /// Ids of the cells within `radius` columns and rows of `id`, clipped to the grid.
    pub fn neighbourhood(&self, id: usize, radius: usize) -> impl Iterator<Item = usize> + '_ {
        let (col, row) = self.col_row(id);
        let cols = col.saturating_sub(radius)..=(col + radius).min(self.ncols - 1);
        let rows = row.saturating_sub(radius)..=(row + radius).min(self.nrows - 1);
        rows.flat_map(move |r| cols.clone().map(move |c| self.id(c, r)))
    }

    /// Cell table `(id_grid, [ID_COL, ID_ROW,] the_geom)`; rows and columns are 1-based.
    pub fn to_table(&self, row_col: bool, srid: Option<i32>) -> Result<GeoTable> {
        let mut defs = vec![ColumnDef::new("id_grid", ColumnType::BigInt)];
        if row_col {
            defs.push(ColumnDef::new("ID_COL", ColumnType::Integer));
            defs.push(ColumnDef::new("ID_ROW", ColumnType::Integer));
        }
        defs.push(ColumnDef::new("the_geom", ColumnType::Geometry));

        let rows = (0..self.len())
            .map(|id| {
                let (col, row) = self.col_row(id);
                let mut values = vec![Value::Int(id as i64)];
                if row_col {
                    values.push(Value::Int(col as i64 + 1));
                    values.push(Value::Int(row as i64 + 1));
                }
                values.push(Value::geometry(&Geometry::Polygon(self.cell(id).to_polygon())));
                values
            })
            .collect();
        GeoTable::from_rows(Schema::new(defs)?, rows, srid)
    }
}
