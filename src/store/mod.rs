mod naming;
mod schema;
mod store;
mod table;
mod union;

pub use naming::{sanitize, TableNamer};
pub use schema::{ColumnDef, ColumnType, Schema};
pub use store::WorkingStore;
pub use table::{GeoTable, Value};
pub use union::{plan_union, ProjectedColumn, Projection, UnionPlan};
