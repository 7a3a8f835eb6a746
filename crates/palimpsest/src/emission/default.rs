//! Portable emission kernel.

use super::{EmissionBackend, StartedBank, TemplateBank, accumulate_template_row, not_started};
use crate::Result;
use std::sync::Arc;

/// Straightforward kernel: one thread per `compute` call.
///
/// Throughput comes from callers scoring several observations at once, so the
/// backend reports the configured thread count as its outer parallelism.
#[derive(Debug)]
pub struct DefaultEmissionBackend {
    num_threads: usize,
    started: Option<StartedBank>,
}

impl DefaultEmissionBackend {
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
            started: None,
        }
    }
}

impl EmissionBackend for DefaultEmissionBackend {
    fn name(&self) -> &str {
        "default"
    }

    fn startup(&mut self, bank: Arc<TemplateBank>, max_sequence_length: usize) -> Result<()> {
        self.started = Some(StartedBank {
            bank,
            max_sequence_length,
        });
        Ok(())
    }

    fn compute(&self, scores: &mut [f32], ink: &[f32], background: &[f32], sequence_length: usize) -> Result<()> {
        let started = self.started.as_ref().ok_or_else(|| not_started(self.name()))?;
        started.check_inputs(scores, ink, background, sequence_length)?;

        let bank = &started.bank;
        let height = bank.line_height();
        for width in bank.widths() {
            let Some(offset) = bank.offset(width) else {
                continue;
            };
            for i in 0..bank.template_count(width) {
                let Some((template_ink, template_background)) = bank.template(width, i) else {
                    continue;
                };
                let start = (offset + i) * sequence_length;
                accumulate_template_row(
                    &mut scores[start..start + sequence_length],
                    template_ink,
                    template_background,
                    ink,
                    background,
                    width,
                    height,
                );
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        self.started = None;
        Ok(())
    }

    fn num_outer_threads(&self) -> usize {
        self.num_threads
    }

    fn num_populate_threads(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PalimpsestError;
    use crate::font::CharacterTemplate;

    fn bank() -> Arc<TemplateBank> {
        let mut t = CharacterTemplate::new("i", 1, 1, 1).unwrap();
        t.set_pattern(1, vec![2.0], vec![0.5]).unwrap();
        Arc::new(TemplateBank::compile([&t]).unwrap())
    }

    #[test]
    fn test_compute_before_startup() {
        let backend = DefaultEmissionBackend::new(2);
        let mut scores = vec![0.0; 1];
        assert!(matches!(
            backend.compute(&mut scores, &[1.0], &[0.0], 1),
            Err(PalimpsestError::Emission { .. })
        ));
    }

    #[test]
    fn test_compute_accumulates() {
        let mut backend = DefaultEmissionBackend::new(1);
        backend.startup(bank(), 4).unwrap();

        let mut scores = vec![10.0; 3];
        backend.compute(&mut scores, &[1.0, 0.0, 1.0], &[0.0, 1.0, 0.0], 3).unwrap();
        assert_eq!(scores, vec![12.0, 10.5, 12.0]);
    }

    #[test]
    fn test_undersized_scores_rejected() {
        let mut backend = DefaultEmissionBackend::new(1);
        backend.startup(bank(), 4).unwrap();

        let mut scores = vec![0.0; 2];
        assert!(matches!(
            backend.compute(&mut scores, &[1.0, 0.0, 1.0], &[0.0, 1.0, 0.0], 3),
            Err(PalimpsestError::Validation { .. })
        ));
    }

    #[test]
    fn test_thread_hints() {
        let backend = DefaultEmissionBackend::new(0);
        assert_eq!(backend.num_outer_threads(), 1);
        assert_eq!(backend.num_populate_threads(), 1);
    }
}
