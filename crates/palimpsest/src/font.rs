//! Character glyph templates.
//!
//! A [`CharacterTemplate`] holds one ink pattern and one background pattern per
//! rendered width. Patterns are column-major with `line_height` rows, matching
//! [`Observation`](crate::observation::Observation) layout, so a template of
//! width `w` lines up with `w` consecutive observation columns.

use crate::{PalimpsestError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Width range for a glyph, as fractions of the line height.
///
/// Both bounds are floored and kept at least one column wide, with
/// `max >= min`.
pub fn width_bounds(line_height: usize, min_fraction: f64, max_fraction: f64) -> (usize, usize) {
    let min = ((min_fraction * line_height as f64).floor() as usize).max(1);
    let max = ((max_fraction * line_height as f64).floor() as usize).max(min);
    (min, max)
}

/// Glyph patterns for one character over a range of widths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterTemplate {
    character: String,
    line_height: usize,
    min_width: usize,
    max_width: usize,
    ink: Vec<Vec<f32>>,
    background: Vec<Vec<f32>>,
}

impl CharacterTemplate {
    /// Template with all-zero patterns for widths `min_width..=max_width`.
    ///
    /// # Errors
    ///
    /// `PalimpsestError::Validation` if the height is zero or the width range is
    /// empty or starts at zero.
    pub fn new(character: impl Into<String>, line_height: usize, min_width: usize, max_width: usize) -> Result<Self> {
        let character = character.into();
        if line_height == 0 || min_width == 0 || min_width > max_width {
            return Err(PalimpsestError::validation(format!(
                "template '{}' needs a positive height and a width range 1 <= min <= max (height={}, widths={}..={})",
                character, line_height, min_width, max_width
            )));
        }

        let ink = (min_width..=max_width).map(|w| vec![0.0; w * line_height]).collect();
        let background = (min_width..=max_width).map(|w| vec![0.0; w * line_height]).collect();
        Ok(Self {
            character,
            line_height,
            min_width,
            max_width,
            ink,
            background,
        })
    }

    /// Template whose width range is derived with [`width_bounds`].
    pub fn with_width_fractions(
        character: impl Into<String>,
        line_height: usize,
        min_fraction: f64,
        max_fraction: f64,
    ) -> Result<Self> {
        let (min, max) = width_bounds(line_height, min_fraction, max_fraction);
        Self::new(character, line_height, min, max)
    }

    /// Replace the patterns rendered at `width`.
    pub fn set_pattern(&mut self, width: usize, ink: Vec<f32>, background: Vec<f32>) -> Result<()> {
        if !(self.min_width..=self.max_width).contains(&width) {
            return Err(PalimpsestError::validation(format!(
                "template '{}' has no width {} (range {}..={})",
                self.character, width, self.min_width, self.max_width
            )));
        }
        let expected = width * self.line_height;
        if ink.len() != expected || background.len() != expected {
            return Err(PalimpsestError::validation(format!(
                "template '{}' width {} needs {} values per channel, got ink={} background={}",
                self.character,
                width,
                expected,
                ink.len(),
                background.len()
            )));
        }

        let slot = width - self.min_width;
        self.ink[slot] = ink;
        self.background[slot] = background;
        Ok(())
    }

    /// Ink and background patterns at `width`, if the template renders at it.
    pub fn pattern(&self, width: usize) -> Option<(&[f32], &[f32])> {
        let slot = width.checked_sub(self.min_width)?;
        Some((self.ink.get(slot)?.as_slice(), self.background.get(slot)?.as_slice()))
    }

    pub fn character(&self) -> &str {
        &self.character
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

    pub fn widths(&self) -> std::ops::RangeInclusive<usize> {
        self.min_width..=self.max_width
    }
}

/// Character templates keyed by character, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Font {
    templates: IndexMap<String, CharacterTemplate>,
}

impl Font {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the template for its character.
    pub fn insert(&mut self, template: CharacterTemplate) -> Option<CharacterTemplate> {
        self.templates.insert(template.character().to_string(), template)
    }

    pub fn get(&self, character: &str) -> Option<&CharacterTemplate> {
        self.templates.get(character)
    }

    pub fn get_mut(&mut self, character: &str) -> Option<&mut CharacterTemplate> {
        self.templates.get_mut(character)
    }

    pub fn templates(&self) -> impl Iterator<Item = &CharacterTemplate> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Write the font as MessagePack, replacing `path` only once the new
    /// contents are fully on disk.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = rmp_serde::to_vec(self)?;

        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let temp_path = path.with_file_name(format!("{}.tmp.{}", file_name, std::process::id()));

        fs::write(&temp_path, &serialized)?;
        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            PalimpsestError::from(e)
        })?;

        tracing::debug!(path = %path.display(), templates = self.len(), "saved font");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        let font: Font = rmp_serde::from_slice(&bytes)?;
        tracing::debug!(path = %path.display(), templates = font.len(), "loaded font");
        Ok(font)
    }
}
