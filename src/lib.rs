//! Edgematch - administrative boundary processing
//!
//! Turns heterogeneous per-country boundary layers into a uniform,
//! hierarchically consistent set of polygon and line datasets matched to a
//! global reference outline.

pub mod config;
pub mod error;
pub mod geometry;
pub mod io;
pub mod models;
pub mod names;
pub mod pipeline;
pub mod rules;
pub mod stages;

pub use error::{PipelineError, Result};
pub use models::{AdminLevel, Country, FeatureLayer, Value};
pub use pipeline::PipelineContext;
pub use stages::Stage;
