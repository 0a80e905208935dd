//! The zone processing workflow: locations, result sets, decomposition,
//! merging, failure records and the driver loop.

mod decompose;
mod driver;
mod failure;
mod location;
mod merge;
mod result;

pub use decompose::{decompose, split_parts, sub_area_ids, SubArea};
pub use driver::{RunOutcome, Workflow};
pub use failure::{log_table, ExportFailure, LocationFailure, LOG_CATEGORY, VERSION};
pub use location::Location;
pub use merge::{group_by_category, merge, merge_results};
pub use result::ResultSet;
