//! Core configuration and I/O.
//!
//! - **Configuration** (`config`): loading and validating [`PipelineConfig`]
//! - **I/O** (`io`): directory traversal and cache-key path arithmetic

pub mod config;
pub mod io;

pub use config::{EmissionConfig, EmissionEngine, ExtractionParams, ObservationMode, PipelineConfig};
