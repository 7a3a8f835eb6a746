//! Configuration loading and management.
//!
//! This module provides utilities for loading pipeline configuration from TOML,
//! YAML or JSON files, and for discovering a `palimpsest.toml` in the project
//! hierarchy.

use crate::{PalimpsestError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main pipeline configuration.
///
/// Governs page normalization, line extraction, the line-extraction cache,
/// observation building and emission scoring.
///
/// # Example
///
/// ```rust
/// use palimpsest::core::config::PipelineConfig;
///
/// let config = PipelineConfig::default();
/// assert_eq!(config.effective_line_height(), 30);
///
/// // let config = PipelineConfig::from_toml_file("palimpsest.toml")?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Canonical observation height in pixels (negative = keep raw line height)
    #[serde(default = "default_line_height")]
    pub line_height: i32,

    /// Scale all lines to the same height
    #[serde(default = "default_true")]
    pub uniform_line_height: bool,

    /// Quantile used for pixel thresholding (higher values mean more ink pixels)
    #[serde(default = "default_binarize_threshold")]
    pub binarize_threshold: f64,

    /// Crop page margins before binarization
    #[serde(default = "default_true")]
    pub crop: bool,

    /// Root of the line-extraction cache (None = always extract from the page image)
    #[serde(default)]
    pub extracted_lines_path: Option<PathBuf>,

    /// Line extraction search parameters
    #[serde(default)]
    pub extraction: ExtractionParams,

    /// How line pixels map onto the ink/background channels
    #[serde(default)]
    pub observation_mode: ObservationMode,

    /// Emission scoring backend selection
    #[serde(default)]
    pub emission: EmissionConfig,

    /// Number of documents to use (None = all)
    #[serde(default)]
    pub num_docs: Option<usize>,

    /// Number of documents to skip before selecting
    #[serde(default)]
    pub num_docs_to_skip: usize,
}

/// Line extraction search parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionParams {
    /// Refinement passes per restart
    #[serde(default = "default_extract_iterations")]
    pub iterations: usize,

    /// Number of random restarts
    #[serde(default = "default_extract_restarts")]
    pub restarts: usize,

    /// Expected line pitch at scan resolution (non-positive = estimate from the page)
    #[serde(default = "default_line_height")]
    pub line_height: i32,

    /// Seed for the restart search
    #[serde(default)]
    pub seed: u64,
}

/// Pixel-to-channel conversion policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationMode {
    /// Each pixel is either ink or background; exactly one channel is set
    #[default]
    Binary,
    /// Channels carry fractional intensities that sum to one
    Grayscale,
}

/// Emission backend implementations selectable by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmissionEngine {
    /// Portable single-threaded kernel; callers parallelize across observations
    #[default]
    Default,
    /// Data-parallel kernel over compiled templates using the rayon pool
    Parallel,
}

/// Emission scoring configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmissionConfig {
    #[serde(default)]
    pub engine: EmissionEngine,

    /// Worker count reported to orchestrators (None = number of CPUs)
    #[serde(default)]
    pub num_threads: Option<usize>,
}

fn default_true() -> bool {
    true
}
fn default_line_height() -> i32 {
    30
}
fn default_binarize_threshold() -> f64 {
    0.12
}
fn default_extract_iterations() -> usize {
    5
}
fn default_extract_restarts() -> usize {
    100
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            line_height: default_line_height(),
            uniform_line_height: true,
            binarize_threshold: default_binarize_threshold(),
            crop: true,
            extracted_lines_path: None,
            extraction: ExtractionParams::default(),
            observation_mode: ObservationMode::default(),
            emission: EmissionConfig::default(),
            num_docs: None,
            num_docs_to_skip: 0,
        }
    }
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            iterations: default_extract_iterations(),
            restarts: default_extract_restarts(),
            line_height: default_line_height(),
            seed: 0,
        }
    }
}

impl EmissionConfig {
    /// Thread-count hint for the orchestrating layer.
    pub fn resolved_num_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(num_cpus::get).max(1)
    }
}

impl PipelineConfig {
    /// Observation height used downstream; -1 disables resampling.
    pub fn effective_line_height(&self) -> i32 {
        if self.uniform_line_height { self.line_height } else { -1 }
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns `PalimpsestError::Validation` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if !(self.binarize_threshold > 0.0 && self.binarize_threshold < 1.0) {
            return Err(PalimpsestError::validation(format!(
                "binarize_threshold must be in (0, 1), got {}",
                self.binarize_threshold
            )));
        }
        if self.line_height == 0 {
            return Err(PalimpsestError::validation(
                "line_height must be positive, or negative to disable resampling",
            ));
        }
        if self.extraction.iterations == 0 || self.extraction.restarts == 0 {
            return Err(PalimpsestError::validation(format!(
                "extraction needs at least one iteration and one restart (iterations={}, restarts={})",
                self.extraction.iterations, self.extraction.restarts
            )));
        }
        if self.emission.num_threads == Some(0) {
            return Err(PalimpsestError::validation("emission.num_threads must be at least 1"));
        }
        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns `PalimpsestError::Validation` if the file doesn't exist or is invalid TOML.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        toml::from_str(&content)
            .map_err(|e| PalimpsestError::validation(format!("Invalid TOML in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| PalimpsestError::validation(format!("Invalid YAML in {}: {}", path.as_ref().display(), e)))
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_config(path.as_ref())?;
        serde_json::from_str(&content)
            .map_err(|e| PalimpsestError::validation(format!("Invalid JSON in {}: {}", path.as_ref().display(), e)))
    }

    /// Discover `palimpsest.toml` in the current directory or its parents.
    ///
    /// # Returns
    ///
    /// - `Some(config)` if found
    /// - `None` if no config file found
    pub fn discover() -> Result<Option<Self>> {
        let current = std::env::current_dir()?;
        Self::discover_from(&current)
    }

    fn discover_from(start: &Path) -> Result<Option<Self>> {
        for dir in start.ancestors() {
            let candidate = dir.join("palimpsest.toml");
            if candidate.exists() {
                return Ok(Some(Self::from_toml_file(candidate)?));
            }
        }
        Ok(None)
    }
}

fn read_config(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| PalimpsestError::validation(format!("Failed to read config file {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.line_height, 30);
        assert!(config.crop);
        assert!(config.extracted_lines_path.is_none());
        assert_eq!(config.extraction.iterations, 5);
        assert_eq!(config.extraction.restarts, 100);
        assert_eq!(config.emission.engine, EmissionEngine::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("palimpsest.toml");

        fs::write(
            &config_path,
            r#"
line_height = 40
binarize_threshold = 0.2
crop = false
extracted_lines_path = "/tmp/lines"

[extraction]
iterations = 3
restarts = 10
seed = 7

[emission]
engine = "parallel"
num_threads = 4
        "#,
        )
        .unwrap();

        let config = PipelineConfig::from_toml_file(&config_path).unwrap();
        assert_eq!(config.line_height, 40);
        assert_eq!(config.binarize_threshold, 0.2);
        assert!(!config.crop);
        assert_eq!(config.extracted_lines_path, Some(PathBuf::from("/tmp/lines")));
        assert_eq!(config.extraction.iterations, 3);
        assert_eq!(config.extraction.restarts, 10);
        assert_eq!(config.extraction.line_height, 30);
        assert_eq!(config.extraction.seed, 7);
        assert_eq!(config.emission.engine, EmissionEngine::Parallel);
        assert_eq!(config.emission.resolved_num_threads(), 4);
    }

    #[test]
    fn test_from_yaml_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("palimpsest.yaml");
        fs::write(&config_path, "line_height: 24\nobservation_mode: grayscale\n").unwrap();

        let config = PipelineConfig::from_yaml_file(&config_path).unwrap();
        assert_eq!(config.line_height, 24);
        assert_eq!(config.observation_mode, ObservationMode::Grayscale);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("palimpsest.json");
        fs::write(&config_path, r#"{"uniform_line_height": false, "num_docs": 2}"#).unwrap();

        let config = PipelineConfig::from_json_file(&config_path).unwrap();
        assert_eq!(config.effective_line_height(), -1);
        assert_eq!(config.num_docs, Some(2));
    }

    #[test]
    fn test_invalid_toml_names_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("palimpsest.toml");
        fs::write(&config_path, "line_height = [").unwrap();

        let err = PipelineConfig::from_toml_file(&config_path).unwrap_err();
        assert!(matches!(err, PalimpsestError::Validation { .. }));
        assert!(err.to_string().contains("palimpsest.toml"));
    }

    #[test]
    fn test_missing_file() {
        let result = PipelineConfig::from_toml_file("/nonexistent/palimpsest.toml");
        assert!(matches!(result, Err(PalimpsestError::Validation { .. })));
    }

    #[test]
    fn test_discover_in_parent() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("palimpsest.toml"), "line_height = 18\n").unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let config = PipelineConfig::discover_from(&nested).unwrap().unwrap();
        assert_eq!(config.line_height, 18);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let config = PipelineConfig {
            binarize_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_restarts() {
        let config = PipelineConfig {
            extraction: ExtractionParams {
                restarts: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("restarts=0"));
    }

    #[test]
    fn test_negative_line_height_is_valid() {
        let config = PipelineConfig {
            line_height: -1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.effective_line_height(), -1);
    }
}
