//! Data-parallel emission kernel.

use super::{EmissionBackend, StartedBank, TemplateBank, accumulate_template_row, not_started};
use crate::Result;
use rayon::prelude::*;
use std::sync::Arc;

/// Splits one `compute` call across the rayon pool, one score row per task.
///
/// Suited to long lines and large fonts where a single observation carries
/// enough work to saturate the machine; callers should score observations one
/// at a time.
#[derive(Debug, Default)]
pub struct ParallelEmissionBackend {
    started: Option<StartedBank>,
}

impl ParallelEmissionBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EmissionBackend for ParallelEmissionBackend {
    fn name(&self) -> &str {
        "parallel"
    }

    fn startup(&mut self, bank: Arc<TemplateBank>, max_sequence_length: usize) -> Result<()> {
        tracing::debug!(
            threads = rayon::current_num_threads(),
            slots = bank.total_template_count(),
            "starting parallel emission backend"
        );
        self.started = Some(StartedBank {
            bank,
            max_sequence_length,
        });
        Ok(())
    }

    fn compute(&self, scores: &mut [f32], ink: &[f32], background: &[f32], sequence_length: usize) -> Result<()> {
        let started = self.started.as_ref().ok_or_else(|| not_started(self.name()))?;
        started.check_inputs(scores, ink, background, sequence_length)?;
        if sequence_length == 0 {
            return Ok(());
        }

        let bank = &started.bank;
        let height = bank.line_height();
        let used = bank.total_template_count() * sequence_length;

        scores[..used]
            .par_chunks_mut(sequence_length)
            .enumerate()
            .for_each(|(slot, row)| {
                let Some((width, i)) = bank.slot(slot) else {
                    return;
                };
                if let Some((template_ink, template_background)) = bank.template(width, i) {
                    accumulate_template_row(row, template_ink, template_background, ink, background, width, height);
                }
            });
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.started = None;
        Ok(())
    }

    fn num_outer_threads(&self) -> usize {
        1
    }

    fn num_populate_threads(&self) -> usize {
        rayon::current_num_threads()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PalimpsestError;
    use crate::emission::DefaultEmissionBackend;
    use crate::font::CharacterTemplate;

    fn bank() -> Arc<TemplateBank> {
        let templates: Vec<CharacterTemplate> = (0..4)
            .map(|c| {
                let mut t = CharacterTemplate::new(c.to_string(), 3, 1, 3).unwrap();
                for w in 1..=3 {
                    let ink = (0..w * 3).map(|k| ((k + c) % 5) as f32 * 0.25).collect();
                    let background = (0..w * 3).map(|k| ((k * 3 + c) % 4) as f32 * -0.5).collect();
                    t.set_pattern(w, ink, background).unwrap();
                }
                t
            })
            .collect();
        Arc::new(TemplateBank::compile(&templates).unwrap())
    }

    #[test]
    fn test_matches_default_backend() {
        let bank = bank();
        let sequence_length = 9;
        let ink: Vec<f32> = (0..sequence_length * 3).map(|k| (k % 2) as f32).collect();
        let background: Vec<f32> = ink.iter().map(|v| 1.0 - v).collect();

        let mut default = DefaultEmissionBackend::new(1);
        default.startup(Arc::clone(&bank), sequence_length).unwrap();
        let mut parallel = ParallelEmissionBackend::new();
        parallel.startup(Arc::clone(&bank), sequence_length).unwrap();

        let mut expected = vec![0.0; bank.total_template_count() * sequence_length];
        let mut actual = expected.clone();
        default.compute(&mut expected, &ink, &background, sequence_length).unwrap();
        parallel.compute(&mut actual, &ink, &background, sequence_length).unwrap();

        assert_eq!(actual, expected);
    }

    #[test]
    fn test_compute_after_shutdown() {
        let mut backend = ParallelEmissionBackend::new();
        backend.startup(bank(), 4).unwrap();
        backend.shutdown().unwrap();

        let mut scores = vec![0.0; 64];
        assert!(matches!(
            backend.compute(&mut scores, &[0.0; 12], &[1.0; 12], 4),
            Err(PalimpsestError::Emission { .. })
        ));
    }

    #[test]
    fn test_thread_hints() {
        let backend = ParallelEmissionBackend::new();
        assert_eq!(backend.num_outer_threads(), 1);
        assert!(backend.num_populate_threads() >= 1);
    }
}
