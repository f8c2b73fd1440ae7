pub mod alignment;
pub mod config;
pub mod context;
pub mod crs;
pub mod error;
pub mod features;
pub mod flight_log;
pub mod frame;
pub mod frame_source;
pub mod georef;
pub mod io;
pub mod mosaic;
pub mod optimization;
pub mod pipeline;
pub mod raster;
pub mod util;
pub mod visualization;

pub use error::{MosaicError, PipelineWarning, Result};
