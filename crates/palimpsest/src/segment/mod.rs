//! Line segmentation.
//!
//! A [`LineSegmenter`] splits a normalized page into text lines, top to bottom.
//! The default [`ProjectionLineSegmenter`] fits a periodic line model to the
//! row ink profile with a seeded restart search, so the same page, parameters
//! and seed always yield the same lines.

use crate::core::config::ExtractionParams;
use crate::image::BinaryPixelGrid;
use crate::{PalimpsestError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/// Shortest line pitch the search will consider, in rows.
const MIN_PITCH: f64 = 4.0;
/// Rows with at most this fraction of the busiest row's ink count as blank.
const QUIET_FRACTION: f64 = 0.05;
/// Cost per row of deviation from the expected pitch; only breaks ties.
const PITCH_WEIGHT: f64 = 1e-3;

/// One extracted text line, numbered from zero in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineImage {
    pub index: usize,
    pub grid: BinaryPixelGrid,
}

impl LineImage {
    pub fn new(index: usize, grid: BinaryPixelGrid) -> Self {
        Self { index, grid }
    }

    pub fn width(&self) -> usize {
        self.grid.width()
    }

    pub fn height(&self) -> usize {
        self.grid.height()
    }
}

/// Splits a binarized page into ordered line images.
///
/// Implementations must be deterministic for a given page and must return
/// lines top to bottom with `index` equal to their position.
///
/// # Errors
///
/// Returns `PalimpsestError::Segmentation` when no line can be found.
pub trait LineSegmenter: Send + Sync {
    fn name(&self) -> &str;

    fn segment(&self, page: &BinaryPixelGrid) -> Result<Vec<LineImage>>;
}

/// Periodic line model fitted to the horizontal ink projection.
///
/// Each restart draws a pitch and phase, then alternates between snapping the
/// implied line boundaries to the emptiest nearby rows and refitting pitch and
/// phase to the snapped boundaries. The cheapest restart wins, where cost is
/// the ink cut through by boundaries plus a heavy penalty for every segment
/// that still holds more than one band of ink.
#[derive(Debug, Clone)]
pub struct ProjectionLineSegmenter {
    iterations: usize,
    restarts: usize,
    line_height: i32,
    seed: u64,
}

impl ProjectionLineSegmenter {
    /// `line_height` is the expected pitch at scan resolution; a non-positive
    /// value means it is estimated from the page alone.
    pub fn new(iterations: usize, restarts: usize, line_height: i32, seed: u64) -> Self {
        Self {
            iterations: iterations.max(1),
            restarts: restarts.max(1),
            line_height,
            seed,
        }
    }

    pub fn from_params(params: &ExtractionParams) -> Self {
        Self::new(params.iterations, params.restarts, params.line_height, params.seed)
    }

    fn search_bounds(&self, profile: &[f64]) -> SearchBounds {
        let rows = profile.len() as f64;
        let hint = (self.line_height > 0).then_some(f64::from(self.line_height));
        let estimate = estimate_pitch(profile);

        let (lo, hi) = match (hint, estimate) {
            (Some(h), Some(e)) => (h.min(e) / 2.0, h.max(e) * 2.0),
            (Some(p), None) | (None, Some(p)) => (p / 2.0, p * 2.0),
            (None, None) => (MIN_PITCH, rows),
        };
        let lo = lo.max(MIN_PITCH).min(rows);
        let hi = hi.min(rows).max(lo);

        SearchBounds {
            lo,
            hi,
            target: estimate.or(hint).unwrap_or((lo + hi) / 2.0),
        }
    }

    fn run_restart(&self, profile: &[f64], bounds: &SearchBounds, rng: &mut StdRng) -> Candidate {
        let mut pitch = rng.random_range(bounds.lo..=bounds.hi);
        let mut phase = rng.random_range(0.0..pitch);

        for _ in 0..self.iterations {
            let cuts = snap_boundaries(profile, pitch, phase);
            if let Some((p, f)) = refit(&cuts, pitch) {
                pitch = p.clamp(bounds.lo, bounds.hi);
                phase = f.rem_euclid(pitch);
            }
        }

        let cuts: Vec<usize> = snap_boundaries(profile, pitch, phase).into_iter().map(|(_, y)| y).collect();
        let cost = segmentation_cost(profile, &cuts) + PITCH_WEIGHT * (pitch - bounds.target).abs();
        Candidate { cost, pitch, cuts }
    }
}

impl LineSegmenter for ProjectionLineSegmenter {
    fn name(&self) -> &str {
        "projection"
    }

    #[tracing::instrument(skip(self, page), fields(page.width = page.width(), page.height = page.height()))]
    fn segment(&self, page: &BinaryPixelGrid) -> Result<Vec<LineImage>> {
        if page.ink_count() == 0 {
            return Err(PalimpsestError::segmentation(format!(
                "no ink found on {}x{} page",
                page.width(),
                page.height()
            )));
        }

        let profile: Vec<f64> = page.row_ink_counts().into_iter().map(|c| c as f64).collect();

        let cuts = if (profile.len() as f64) < 2.0 * MIN_PITCH {
            Vec::new()
        } else {
            let bounds = self.search_bounds(&profile);
            let candidates: Vec<Candidate> = (0..self.restarts)
                .into_par_iter()
                .map(|restart| {
                    let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(restart as u64));
                    self.run_restart(&profile, &bounds, &mut rng)
                })
                .collect();

            let mut best = &candidates[0];
            for candidate in &candidates[1..] {
                if candidate.cost < best.cost {
                    best = candidate;
                }
            }
            tracing::debug!(pitch = best.pitch, cost = best.cost, cuts = best.cuts.len(), "fitted line model");
            best.cuts.clone()
        };

        let lines: Vec<LineImage> = segments(profile.len(), &cuts)
            .filter(|&(top, bottom)| profile[top..bottom].iter().any(|&v| v > 0.0))
            .enumerate()
            .map(|(index, (top, bottom))| LineImage::new(index, page.rows(top, bottom)))
            .collect();

        if lines.is_empty() {
            return Err(PalimpsestError::segmentation("line model produced no inked segments"));
        }

        tracing::debug!(lines = lines.len(), "segmented page");
        Ok(lines)
    }
}

#[derive(Debug, Clone, Copy)]
struct SearchBounds {
    lo: f64,
    hi: f64,
    target: f64,
}

#[derive(Debug, Clone)]
struct Candidate {
    cost: f64,
    pitch: f64,
    cuts: Vec<usize>,
}

/// Line pitch from the first autocorrelation peak after the profile decorrelates.
fn estimate_pitch(profile: &[f64]) -> Option<f64> {
    let n = profile.len();
    let mean = profile.iter().sum::<f64>() / n as f64;
    let centered: Vec<f64> = profile.iter().map(|v| v - mean).collect();

    let autocorrelation = |lag: usize| {
        centered
            .iter()
            .zip(&centered[lag..])
            .map(|(a, b)| a * b)
            .sum::<f64>()
            / (n - lag) as f64
    };

    let min_lag = MIN_PITCH as usize;
    let max_lag = n / 2;
    if max_lag <= min_lag {
        return None;
    }

    let first_negative = (min_lag..=max_lag).find(|&lag| autocorrelation(lag) < 0.0)?;
    let (lag, peak) = (first_negative..=max_lag)
        .map(|lag| (lag, autocorrelation(lag)))
        .fold((0, f64::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    (peak > 0.0).then_some(lag as f64)
}

/// Boundaries `phase + k * pitch`, each moved to the emptiest row within a
/// quarter pitch (nearest wins ties). Returns `(k, row)` pairs with distinct rows.
fn snap_boundaries(profile: &[f64], pitch: f64, phase: f64) -> Vec<(usize, usize)> {
    let n = profile.len();
    let radius = (pitch / 4.0).max(1.0);
    let mut snapped: Vec<(usize, usize)> = Vec::new();

    let mut k = 0usize;
    loop {
        let boundary = phase + k as f64 * pitch;
        if boundary >= n as f64 {
            break;
        }
        let lo = (boundary - radius).floor().max(1.0) as usize;
        let hi = ((boundary + radius).ceil() as usize).min(n - 1);
        if lo <= hi {
            let row = (lo..=hi)
                .min_by(|&a, &b| {
                    profile[a]
                        .total_cmp(&profile[b])
                        .then((a as f64 - boundary).abs().total_cmp(&(b as f64 - boundary).abs()))
                })
                .unwrap_or(lo);
            if snapped.last().is_none_or(|&(_, last)| row > last) {
                snapped.push((k, row));
            }
        }
        k += 1;
    }

    snapped
}

/// Least-squares fit of `row = phase + k * pitch` to snapped boundaries.
fn refit(cuts: &[(usize, usize)], pitch: f64) -> Option<(f64, f64)> {
    match cuts {
        [] => None,
        [(k, row)] => Some((pitch, *row as f64 - *k as f64 * pitch)),
        _ => {
            let n = cuts.len() as f64;
            let mean_k = cuts.iter().map(|&(k, _)| k as f64).sum::<f64>() / n;
            let mean_row = cuts.iter().map(|&(_, r)| r as f64).sum::<f64>() / n;
            let (cov, var) = cuts.iter().fold((0.0, 0.0), |(cov, var), &(k, r)| {
                let dk = k as f64 - mean_k;
                (cov + dk * (r as f64 - mean_row), var + dk * dk)
            });
            let fitted = cov / var;
            (fitted.is_finite() && fitted > 0.0).then(|| (fitted, mean_row - fitted * mean_k))
        }
    }
}

fn segmentation_cost(profile: &[f64], cuts: &[usize]) -> f64 {
    let busiest = profile.iter().copied().fold(0.0, f64::max);
    let quiet = busiest * QUIET_FRACTION;
    let merge_penalty = busiest + 1.0;

    let cut_ink: f64 = cuts.iter().map(|&y| profile[y]).sum();
    let merged: usize = segments(profile.len(), cuts)
        .map(|(top, bottom)| ink_bands(&profile[top..bottom], quiet).saturating_sub(1))
        .sum();

    cut_ink + merged as f64 * merge_penalty
}

fn ink_bands(rows: &[f64], quiet: f64) -> usize {
    let mut bands = 0;
    let mut in_band = false;
    for &v in rows {
        let busy = v > quiet;
        if busy && !in_band {
            bands += 1;
        }
        in_band = busy;
    }
    bands
}

/// Half-open row ranges between consecutive cuts, covering the whole page.
fn segments(rows: usize, cuts: &[usize]) -> impl Iterator<Item = (usize, usize)> + '_ {
    std::iter::once(0)
        .chain(cuts.iter().copied())
        .zip(cuts.iter().copied().chain(std::iter::once(rows)))
        .filter(|(top, bottom)| top < bottom)
}
