//! Emission scoring.
//!
//! For every observation column `t`, every width `w` and every template `i` of
//! that width, the emission score is the dot product of the template's ink
//! pattern with the `w` observation columns starting at `t`, plus the same for
//! the background channel. Scores for all templates live in one flat matrix:
//!
//! ```text
//! scores[(offset(w) + i) * sequence_length + t]
//! ```
//!
//! Positions where the template would run past the end of the line
//! (`t > sequence_length - w`) are never written.
//!
//! Backends implement [`EmissionBackend`] and are chosen by
//! [`EmissionEngine`]. [`EmissionScorer`] wraps a backend's lifecycle for the
//! common case of scoring whole observations.

mod bank;
mod default;
mod parallel;

pub use bank::TemplateBank;
pub use default::DefaultEmissionBackend;
pub use parallel::ParallelEmissionBackend;

use crate::core::config::{EmissionConfig, EmissionEngine};
use crate::observation::Observation;
use crate::{PalimpsestError, Result};
use rayon::prelude::*;
use std::sync::Arc;

/// Pluggable emission kernel.
///
/// Lifecycle: `startup` once with the template bank, then any number of
/// `compute` calls (concurrently, from several threads), then `shutdown`.
///
/// # Thread Safety
///
/// `compute` takes `&self` and must tolerate concurrent calls on disjoint score
/// buffers.
pub trait EmissionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Take ownership of the compiled templates and size internal buffers for
    /// observations of up to `max_sequence_length` columns.
    fn startup(&mut self, bank: Arc<TemplateBank>, max_sequence_length: usize) -> Result<()>;

    /// Accumulate (`+=`) emission scores for one observation into `scores`.
    ///
    /// `scores` must be zeroed by the caller and hold at least
    /// `total_template_count * sequence_length` values; `ink` and `background`
    /// hold the observation's column-major channels.
    ///
    /// # Errors
    ///
    /// `PalimpsestError::Emission` outside the started state,
    /// `PalimpsestError::Validation` for undersized buffers or an observation
    /// longer than the startup maximum.
    fn compute(&self, scores: &mut [f32], ink: &[f32], background: &[f32], sequence_length: usize) -> Result<()>;

    /// Release backend resources. Calling it twice is harmless.
    fn shutdown(&mut self) -> Result<()>;

    /// Concurrent `compute` callers the backend is sized for.
    fn num_outer_threads(&self) -> usize;

    /// Threads the backend uses inside a single `compute` call.
    fn num_populate_threads(&self) -> usize;
}

/// Build the backend selected by `config`.
pub fn create_emission_backend(config: &EmissionConfig) -> Box<dyn EmissionBackend> {
    match config.engine {
        EmissionEngine::Default => Box::new(DefaultEmissionBackend::new(config.resolved_num_threads())),
        EmissionEngine::Parallel => Box::new(ParallelEmissionBackend::new()),
    }
}

/// Row of the score matrix owned by template `i` of width `width`, relative to
/// the start of that width's block.
pub fn flatten(sequence_length: usize, t: usize, i: usize) -> usize {
    i * sequence_length + t
}

/// State shared by the bundled backends between `startup` and `shutdown`.
#[derive(Debug, Clone)]
pub(crate) struct StartedBank {
    pub(crate) bank: Arc<TemplateBank>,
    pub(crate) max_sequence_length: usize,
}

impl StartedBank {
    pub(crate) fn check_inputs(
        &self,
        scores: &[f32],
        ink: &[f32],
        background: &[f32],
        sequence_length: usize,
    ) -> Result<()> {
        if sequence_length > self.max_sequence_length {
            return Err(PalimpsestError::validation(format!(
                "observation has {} columns, backend was started for at most {}",
                sequence_length, self.max_sequence_length
            )));
        }
        let observation_len = sequence_length * self.bank.line_height();
        if ink.len() < observation_len || background.len() < observation_len {
            return Err(PalimpsestError::validation(format!(
                "observation channels hold ink={} background={} values, need {} ({} columns x {} rows)",
                ink.len(),
                background.len(),
                observation_len,
                sequence_length,
                self.bank.line_height()
            )));
        }
        let scores_len = self.bank.total_template_count() * sequence_length;
        if scores.len() < scores_len {
            return Err(PalimpsestError::validation(format!(
                "score buffer holds {} values, need {}",
                scores.len(),
                scores_len
            )));
        }
        Ok(())
    }
}

pub(crate) fn not_started(backend: &str) -> PalimpsestError {
    PalimpsestError::emission(format!("{} backend used before startup or after shutdown", backend))
}

/// Score one template against every admissible start column, accumulating into `row`.
///
/// `row` is the template's `sequence_length` cells; ink is added before background.
pub(crate) fn accumulate_template_row(
    row: &mut [f32],
    template_ink: &[f32],
    template_background: &[f32],
    ink: &[f32],
    background: &[f32],
    width: usize,
    height: usize,
) {
    let sequence_length = row.len();
    if width > sequence_length {
        return;
    }
    let span = width * height;
    for (t, cell) in row.iter_mut().enumerate().take(sequence_length - width + 1) {
        let start = t * height;
        let ink_score: f32 = ink[start..start + span]
            .iter()
            .zip(template_ink)
            .map(|(o, w)| o * w)
            .sum();
        *cell += ink_score;
        let background_score: f32 = background[start..start + span]
            .iter()
            .zip(template_background)
            .map(|(o, w)| o * w)
            .sum();
        *cell += background_score;
    }
}

/// Scores of one observation against every template of a bank.
#[derive(Debug, Clone)]
pub struct EmissionScores {
    values: Vec<f32>,
    sequence_length: usize,
    bank: Arc<TemplateBank>,
}

impl EmissionScores {
    /// Score of template `i` of `width` starting at column `t`.
    ///
    /// `None` when the template does not exist or would run past the line end.
    pub fn get(&self, width: usize, t: usize, i: usize) -> Option<f32> {
        if i >= self.bank.template_count(width) || t + width > self.sequence_length {
            return None;
        }
        let offset = self.bank.offset(width)?;
        self.values
            .get(offset * self.sequence_length + flatten(self.sequence_length, t, i))
            .copied()
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn bank(&self) -> &TemplateBank {
        &self.bank
    }
}

/// A started backend bound to one template bank.
///
/// Shuts the backend down on drop if [`EmissionScorer::shutdown`] was not called.
pub struct EmissionScorer {
    backend: Box<dyn EmissionBackend>,
    bank: Arc<TemplateBank>,
    max_sequence_length: usize,
    shut_down: bool,
}

impl EmissionScorer {
    /// Create and start the backend selected by `config`.
    pub fn new(config: &EmissionConfig, bank: Arc<TemplateBank>, max_sequence_length: usize) -> Result<Self> {
        Self::with_backend(create_emission_backend(config), bank, max_sequence_length)
    }

    pub fn with_backend(
        mut backend: Box<dyn EmissionBackend>,
        bank: Arc<TemplateBank>,
        max_sequence_length: usize,
    ) -> Result<Self> {
        backend.startup(Arc::clone(&bank), max_sequence_length)?;
        tracing::info!(
            backend = backend.name(),
            templates = bank.total_template_count(),
            max_sequence_length,
            "emission backend started"
        );
        Ok(Self {
            backend,
            bank,
            max_sequence_length,
            shut_down: false,
        })
    }

    pub fn backend(&self) -> &dyn EmissionBackend {
        self.backend.as_ref()
    }

    /// Score one observation.
    ///
    /// # Errors
    ///
    /// `PalimpsestError::Validation` if the observation's height differs from the
    /// templates' or it is longer than the startup maximum.
    pub fn score(&self, observation: &Observation) -> Result<EmissionScores> {
        if observation.height() != self.bank.line_height() {
            return Err(PalimpsestError::validation(format!(
                "observation height {} does not match template height {}",
                observation.height(),
                self.bank.line_height()
            )));
        }
        if observation.sequence_length() > self.max_sequence_length {
            return Err(PalimpsestError::validation(format!(
                "observation has {} columns, scorer was started for at most {}",
                observation.sequence_length(),
                self.max_sequence_length
            )));
        }

        let sequence_length = observation.sequence_length();
        let mut values = vec![0f32; self.bank.total_template_count() * sequence_length];
        self.backend
            .compute(&mut values, observation.ink(), observation.background(), sequence_length)?;

        Ok(EmissionScores {
            values,
            sequence_length,
            bank: Arc::clone(&self.bank),
        })
    }

    /// Score many observations, spreading them over the rayon pool when the
    /// backend is sized for concurrent callers.
    pub fn score_all(&self, observations: &[Observation]) -> Vec<Result<EmissionScores>> {
        if self.backend.num_outer_threads() > 1 {
            observations.par_iter().map(|obs| self.score(obs)).collect()
        } else {
            observations.iter().map(|obs| self.score(obs)).collect()
        }
    }

    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.backend.shutdown()?;
        tracing::debug!(backend = self.backend.name(), "emission backend shut down");
        Ok(())
    }
}

impl Drop for EmissionScorer {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(backend = self.backend.name(), error = %e, "emission backend shutdown failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::CharacterTemplate;

    fn bank() -> Arc<TemplateBank> {
        let mut a = CharacterTemplate::new("a", 2, 1, 2).unwrap();
        a.set_pattern(1, vec![1.0, 0.0], vec![0.0, 1.0]).unwrap();
        a.set_pattern(2, vec![1.0, 1.0, 1.0, 1.0], vec![0.0; 4]).unwrap();
        let mut b = CharacterTemplate::new("b", 2, 2, 2).unwrap();
        b.set_pattern(2, vec![0.0; 4], vec![1.0; 4]).unwrap();
        Arc::new(TemplateBank::compile([&a, &b]).unwrap())
    }

    fn observation(columns: &[[f32; 2]]) -> Observation {
        let ink: Vec<f32> = columns.iter().flatten().copied().collect();
        let background = ink.iter().map(|v| 1.0 - v).collect();
        Observation::new(2, columns.len(), ink, background).unwrap()
    }

    #[test]
    fn test_flatten_layout() {
        assert_eq!(flatten(10, 3, 0), 3);
        assert_eq!(flatten(10, 3, 2), 23);
    }

    #[test]
    fn test_factory_selects_engine() {
        let default = create_emission_backend(&EmissionConfig::default());
        assert_eq!(default.name(), "default");
        assert_eq!(default.num_populate_threads(), 1);

        let config = EmissionConfig {
            engine: EmissionEngine::Parallel,
            num_threads: None,
        };
        let parallel = create_emission_backend(&config);
        assert_eq!(parallel.name(), "parallel");
        assert_eq!(parallel.num_outer_threads(), 1);
    }

    #[test]
    fn test_scores_match_hand_computation() {
        let scorer = EmissionScorer::new(&EmissionConfig::default(), bank(), 8).unwrap();
        let obs = observation(&[[1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]);
        let scores = scorer.score(&obs).unwrap();

        // width 1, template a: ink row0 + background row1
        assert_eq!(scores.get(1, 0, 0), Some(2.0));
        assert_eq!(scores.get(1, 1, 0), Some(1.0));
        assert_eq!(scores.get(1, 2, 0), Some(1.0));
        // width 2, template a counts ink, b counts background
        assert_eq!(scores.get(2, 0, 0), Some(3.0));
        assert_eq!(scores.get(2, 1, 0), Some(2.0));
        assert_eq!(scores.get(2, 0, 1), Some(1.0));
        assert_eq!(scores.get(2, 1, 1), Some(2.0));
    }

    #[test]
    fn test_out_of_range_positions_are_absent() {
        let scorer = EmissionScorer::new(&EmissionConfig::default(), bank(), 8).unwrap();
        let scores = scorer.score(&observation(&[[1.0, 0.0], [0.0, 1.0]])).unwrap();

        assert!(scores.get(2, 1, 0).is_none());
        assert!(scores.get(2, 0, 2).is_none());
        assert!(scores.get(5, 0, 0).is_none());
        // width-2 rows past the last start column stay zero
        let offset = scores.bank().offset(2).unwrap();
        assert_eq!(scores.as_slice()[offset * 2 + flatten(2, 1, 0)], 0.0);
    }

    #[test]
    fn test_height_mismatch_is_validation_error() {
        let scorer = EmissionScorer::new(&EmissionConfig::default(), bank(), 8).unwrap();
        let obs = Observation::new(3, 1, vec![0.0; 3], vec![1.0; 3]).unwrap();
        assert!(matches!(scorer.score(&obs), Err(PalimpsestError::Validation { .. })));
    }

    #[test]
    fn test_too_long_observation_rejected() {
        let scorer = EmissionScorer::new(&EmissionConfig::default(), bank(), 2).unwrap();
        let obs = observation(&[[1.0, 0.0]; 3]);
        assert!(matches!(scorer.score(&obs), Err(PalimpsestError::Validation { .. })));
    }

    #[test]
    fn test_score_all_preserves_order() {
        let scorer = EmissionScorer::new(&EmissionConfig::default(), bank(), 8).unwrap();
        let observations = vec![observation(&[[1.0, 0.0]; 2]), observation(&[[0.0, 0.0]; 4])];

        let results = scorer.score_all(&observations);
        let lengths: Vec<_> = results.iter().map(|r| r.as_ref().unwrap().sequence_length()).collect();
        assert_eq!(lengths, vec![2, 4]);
    }

    #[test]
    fn test_shutdown_twice() {
        let mut scorer = EmissionScorer::new(&EmissionConfig::default(), bank(), 8).unwrap();
        scorer.shutdown().unwrap();
        scorer.shutdown().unwrap();
        assert!(matches!(
            scorer.score(&observation(&[[1.0, 0.0]])),
            Err(PalimpsestError::Emission { .. })
        ));
    }
}
