//! Templates compiled into per-width contiguous arrays.

use crate::font::CharacterTemplate;
use crate::{PalimpsestError, Result};
use rayon::prelude::*;
use std::ops::RangeInclusive;

/// Every template pattern grouped by width.
///
/// For width `w`, the ink patterns of all templates rendering at `w` sit back
/// to back in one buffer, template `i` starting at `i * w * line_height`; the
/// background buffer mirrors it. Templates are also numbered globally: width
/// `w`'s templates occupy slots `offset(w)..offset(w) + template_count(w)`, and
/// each slot owns one row of a score matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateBank {
    line_height: usize,
    min_width: usize,
    max_width: usize,
    ink: Vec<Vec<f32>>,
    background: Vec<Vec<f32>>,
    counts: Vec<usize>,
    offsets: Vec<usize>,
    sources: Vec<Vec<usize>>,
    slots: Vec<(usize, usize)>,
}

impl TemplateBank {
    /// Compile templates in the given order.
    ///
    /// Each template is checked by its own rayon task; the bank is then
    /// assembled width by width.
    ///
    /// # Errors
    ///
    /// `PalimpsestError::Validation` if there are no templates, their line
    /// heights differ, or a pattern holds a non-finite value.
    pub fn compile<'a, I>(templates: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a CharacterTemplate>,
    {
        let templates: Vec<&CharacterTemplate> = templates.into_iter().collect();
        let Some(first) = templates.first() else {
            return Err(PalimpsestError::validation("cannot compile an empty template set"));
        };
        let line_height = first.line_height();

        templates
            .par_iter()
            .map(|template| check_template(template, line_height))
            .collect::<Result<Vec<()>>>()?;

        let min_width = templates.iter().map(|t| t.min_width()).min().unwrap_or(1);
        let max_width = templates.iter().map(|t| t.max_width()).max().unwrap_or(min_width);
        let width_count = max_width - min_width + 1;

        let mut ink = vec![Vec::new(); width_count];
        let mut background = vec![Vec::new(); width_count];
        let mut sources = vec![Vec::new(); width_count];

        for (source, template) in templates.iter().enumerate() {
            for width in template.widths() {
                if let Some((template_ink, template_background)) = template.pattern(width) {
                    let w = width - min_width;
                    ink[w].extend_from_slice(template_ink);
                    background[w].extend_from_slice(template_background);
                    sources[w].push(source);
                }
            }
        }

        let counts: Vec<usize> = sources.iter().map(Vec::len).collect();
        let offsets: Vec<usize> = counts
            .iter()
            .scan(0, |next, &count| {
                let offset = *next;
                *next += count;
                Some(offset)
            })
            .collect();
        let slots = counts
            .iter()
            .enumerate()
            .flat_map(|(w, &count)| (0..count).map(move |i| (w + min_width, i)))
            .collect();

        let bank = Self {
            line_height,
            min_width,
            max_width,
            ink,
            background,
            counts,
            offsets,
            sources,
            slots,
        };
        tracing::debug!(
            templates = templates.len(),
            slots = bank.total_template_count(),
            min_width,
            max_width,
            "compiled template bank"
        );
        Ok(bank)
    }

    pub fn line_height(&self) -> usize {
        self.line_height
    }

    pub fn min_width(&self) -> usize {
        self.min_width
    }

    pub fn max_width(&self) -> usize {
        self.max_width
    }

    pub fn widths(&self) -> RangeInclusive<usize> {
        self.min_width..=self.max_width
    }

    /// Number of templates rendering at `width`; zero outside the bank's range.
    pub fn template_count(&self, width: usize) -> usize {
        self.width_index(width).map_or(0, |w| self.counts[w])
    }

    /// First global slot of `width`'s templates.
    pub fn offset(&self, width: usize) -> Option<usize> {
        self.width_index(width).map(|w| self.offsets[w])
    }

    pub fn total_template_count(&self) -> usize {
        self.slots.len()
    }

    pub fn ink_templates(&self, width: usize) -> &[f32] {
        self.width_index(width).map_or(&[][..], |w| &self.ink[w][..])
    }

    pub fn background_templates(&self, width: usize) -> &[f32] {
        self.width_index(width).map_or(&[][..], |w| &self.background[w][..])
    }

    /// Ink and background pattern of template `i` at `width`.
    pub fn template(&self, width: usize, i: usize) -> Option<(&[f32], &[f32])> {
        let w = self.width_index(width)?;
        if i >= self.counts[w] {
            return None;
        }
        let span = width * self.line_height;
        let range = i * span..(i + 1) * span;
        Some((&self.ink[w][range.clone()], &self.background[w][range]))
    }

    /// Position, in compile order, of the character behind template `i` at `width`.
    pub fn source_index(&self, width: usize, i: usize) -> Option<usize> {
        self.sources.get(self.width_index(width)?)?.get(i).copied()
    }

    /// `(width, i)` owning global slot `slot`.
    pub fn slot(&self, slot: usize) -> Option<(usize, usize)> {
        self.slots.get(slot).copied()
    }

    fn width_index(&self, width: usize) -> Option<usize> {
        self.widths().contains(&width).then(|| width - self.min_width)
    }
}

fn check_template(template: &CharacterTemplate, line_height: usize) -> Result<()> {
    if template.line_height() != line_height {
        return Err(PalimpsestError::validation(format!(
            "template '{}' has line height {}, expected {}",
            template.character(),
            template.line_height(),
            line_height
        )));
    }

    for width in template.widths() {
        let Some((ink, background)) = template.pattern(width) else {
            continue;
        };
        if ink.iter().chain(background).any(|v| !v.is_finite()) {
            return Err(PalimpsestError::validation(format!(
                "template '{}' has a non-finite weight at width {}",
                template.character(),
                width
            )));
        }
    }
    Ok(())
}
