#![doc = "Geoclimate zone processing: decompose, compute, merge, grid and export"]
pub mod config;
mod error;
pub mod export;
mod geom;
pub mod grid;
mod io;
pub mod logging;
pub mod source;
pub mod store;
pub mod workflow;

#[doc(inline)]
pub use error::{Error, Result};

#[doc(inline)]
pub use config::{GridIndicator, Parameters, RsuIndicator};

#[doc(inline)]
pub use workflow::{ExportFailure, Location, LocationFailure, ResultSet, RunOutcome, Workflow};

#[doc(inline)]
pub use geom::{is_supported, utm_srid_for, WGS84};
