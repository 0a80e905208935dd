mod params;
mod raw;
mod resolve;
mod vocab;

pub use params::{
    DatabaseOutput, FolderOutput, GridOrigin, GridOutput, GridParameters, InputParameters, InputSource,
    OutputParameters, Parameters, ProcessingParameters, RsuParameters, StoreParameters, Weights,
};
pub use raw::RawConfig;
pub use resolve::{load, parse, resolve};
pub use vocab::{GridIndicator, RsuIndicator};
