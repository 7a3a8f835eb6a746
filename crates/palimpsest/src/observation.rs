//! Observation sequences consumed by emission scoring.
//!
//! An observation is a line image at the canonical height, stored column-major:
//! the value for column `t`, row `y` lives at `t * height + y`. Each pixel
//! contributes to two channels, ink and background.

use crate::core::config::ObservationMode;
use crate::image::{INK_CUTOFF, resample_line};
use crate::segment::LineImage;
use crate::{PalimpsestError, Result};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Per-column ink/background channels for one text line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    height: usize,
    sequence_length: usize,
    ink: Vec<f32>,
    background: Vec<f32>,
}

impl Observation {
    /// Build from column-major channel buffers.
    ///
    /// # Errors
    ///
    /// `PalimpsestError::Validation` if either channel is not `height * sequence_length` long.
    pub fn new(height: usize, sequence_length: usize, ink: Vec<f32>, background: Vec<f32>) -> Result<Self> {
        let expected = height * sequence_length;
        if ink.len() != expected || background.len() != expected {
            return Err(PalimpsestError::validation(format!(
                "observation channels must hold {} values (height {} x length {}), got ink={} background={}",
                expected,
                height,
                sequence_length,
                ink.len(),
                background.len()
            )));
        }
        Ok(Self {
            height,
            sequence_length,
            ink,
            background,
        })
    }

    /// Convert a line image, resampling it to `line_height` rows first when
    /// `line_height` is positive.
    pub fn from_line(line: &LineImage, line_height: i32, mode: ObservationMode) -> Result<Self> {
        let gray = line.grid.to_gray_image();
        let gray = if line_height > 0 {
            let (resampled, policy) = resample_line(&gray, line_height as u32)?;
            tracing::trace!(line = line.index, ?policy, "resampled line");
            resampled
        } else {
            gray
        };
        Ok(Self::from_gray(&gray, mode))
    }

    /// Channel values from grey levels.
    ///
    /// Binary mode sets exactly one channel per pixel (ink below mid-grey);
    /// grayscale mode splits the intensity so the channels sum to one.
    pub fn from_gray(gray: &GrayImage, mode: ObservationMode) -> Self {
        let (width, height) = gray.dimensions();
        let (width, height) = (width as usize, height as usize);
        let mut ink = vec![0f32; width * height];
        let mut background = vec![0f32; width * height];

        for (x, y, pixel) in gray.enumerate_pixels() {
            let idx = x as usize * height + y as usize;
            let level = pixel[0];
            let (i, b) = match mode {
                ObservationMode::Binary if level < INK_CUTOFF => (1.0, 0.0),
                ObservationMode::Binary => (0.0, 1.0),
                ObservationMode::Grayscale => {
                    let v = f32::from(level) / 255.0;
                    (1.0 - v, v)
                }
            };
            ink[idx] = i;
            background[idx] = b;
        }

        Self {
            height,
            sequence_length: width,
            ink,
            background,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of columns.
    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn ink(&self) -> &[f32] {
        &self.ink
    }

    pub fn background(&self) -> &[f32] {
        &self.background
    }

    pub fn ink_at(&self, t: usize, y: usize) -> f32 {
        self.ink[t * self.height + y]
    }

    pub fn background_at(&self, t: usize, y: usize) -> f32 {
        self.background[t * self.height + y]
    }
}

/// Persist observations as MessagePack.
pub fn save_observations(path: &Path, observations: &[Observation]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let bytes = rmp_serde::to_vec(observations)?;
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Read observations written by [`save_observations`].
///
/// # Errors
///
/// `PalimpsestError::Serialization` if the file does not decode or an
/// observation's channels disagree with its dimensions.
pub fn load_observations(path: &Path) -> Result<Vec<Observation>> {
    let bytes = std::fs::read(path)?;
    let observations: Vec<Observation> = rmp_serde::from_slice(&bytes).map_err(|e| {
        PalimpsestError::serialization_with_source(format!("Failed to decode observations from {}", path.display()), e)
    })?;

    for (index, observation) in observations.iter().enumerate() {
        let expected = observation.height * observation.sequence_length;
        if observation.ink.len() != expected || observation.background.len() != expected {
            return Err(PalimpsestError::serialization(format!(
                "Observation {} in {} holds ink={} background={} values, expected {}",
                index,
                path.display(),
                observation.ink.len(),
                observation.background.len(),
                expected
            )));
        }
    }
    Ok(observations)
}
