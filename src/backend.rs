//! The numeric side of quantization: choosing palette colors and mapping pixels to them.
//!
//! Everything else in the crate (validation, lifetimes, error reporting, palette ordering)
//! is independent of how this is done, so the algorithm can be swapped with
//! [`Attributes::with_backend`](crate::Attributes::with_backend).

use crate::error::Error;
use crate::hist::{HistogramEntry, HistogramInternal};
use crate::kmeans::{palette_error, Kmeans};
use crate::mediancut::mediancut;
use crate::pal::{gamma_lut, FPixel, PalF, MAX_COLORS, RGBA};
use crate::quant::quality_to_mse;
use crate::remap::{remap_to_palette, remap_to_palette_floyd};
use arrayvec::ArrayVec;

/// A palette-selection and remapping algorithm.
///
/// Errors are expressed on the library's internal MSE scale, the same one used by
/// [`quality_to_mse`](crate::quality_to_mse). Implementations may only fail with
/// resource-type errors ([`Error::OutOfMemory`], [`Error::Aborted`], [`Error::Unsupported`],
/// [`Error::BufferTooSmall`], [`Error::InternalError`]); anything else is reported to the
/// caller as [`Error::InternalError`].
pub trait QuantizationBackend: Send + Sync {
    /// Checked once, when [`Attributes`](crate::Attributes) are created with this backend
    fn probe(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Picks at most `constraints.max_colors` colors representing `samples`
    fn compute_palette(&self, samples: &[HistogramEntry], constraints: &PaletteConstraints) -> Result<ComputedPalette, Error>;

    /// Writes one palette index per pixel into the first `width * height` bytes of `output`,
    /// and returns the mean error of the remapped image.
    fn remap(&self, image: PixelView<'_>, palette: PaletteView<'_>, dither_level: f32, output: &mut [u8]) -> Result<f64, Error>;
}

/// Limits and effort for one palette computation
#[derive(Debug, Clone, PartialEq)]
pub struct PaletteConstraints {
    /// Palette size ceiling, 2-256
    pub max_colors: usize,
    /// Good enough. Stop trying once the error is below this.
    pub target_mse: f64,
    /// Errors above this will be rejected with [`Error::QualityTooLow`]
    pub max_mse: Option<f64>,
    /// Maximum quality was requested, so an exact palette is preferred when possible
    pub aim_for_perfect_quality: bool,
    /// Refinement passes after median cut, from the speed setting
    pub kmeans_iterations: u16,
    /// Refinement stops early when an iteration improves the error by less than this
    pub kmeans_iteration_limit: f64,
    /// How many times median cut is retried with re-weighted colors
    pub feedback_loop_trials: u16,
    /// Gamma of the sample colors. Returned colors must use it too.
    pub gamma: f64,
}

impl PaletteConstraints {
    /// Trials, scaled down for large histograms
    #[must_use]
    pub fn feedback_loop_trials(&self, hist_items: usize) -> u16 {
        scale_down_for_size(self.feedback_loop_trials, hist_items)
    }

    /// Iterations and the convergence limit, scaled for the histogram size
    #[must_use]
    pub fn kmeans_iterations(&self, hist_items: usize, palette_error_is_known: bool) -> (u16, f64) {
        let mut iterations = scale_down_for_size(self.kmeans_iterations, hist_items);
        let mut iteration_limit = self.kmeans_iteration_limit;
        if hist_items > 100_000 {
            iteration_limit *= 2.;
        }
        if iterations == 0 && !palette_error_is_known && self.max_mse.is_some() {
            iterations = 1;
        }
        (iterations, iteration_limit)
    }
}

fn scale_down_for_size(mut n: u16, hist_items: usize) -> u16 {
    for threshold in [5000, 25000, 50000, 100_000] {
        if hist_items > threshold {
            n = (n * 3 + 3) / 4;
        }
    }
    n
}

/// What a backend returns from [`QuantizationBackend::compute_palette`]
#[derive(Debug, Clone, Default)]
pub struct ComputedPalette {
    colors: ArrayVec<RGBA, MAX_COLORS>,
    popularity: ArrayVec<f32, MAX_COLORS>,
    error: Option<f64>,
}

impl ComputedPalette {
    /// Empty palette
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a color and the weight of samples it represents. Fails when the palette is full.
    pub fn push(&mut self, color: RGBA, popularity: f32) -> Result<(), Error> {
        self.colors.try_push(color).map_err(|_| Error::Unsupported)?;
        self.popularity.push(popularity);
        Ok(())
    }

    /// Mean error of the samples mapped to this palette, if it was measured
    #[inline]
    pub fn set_error(&mut self, mse: Option<f64>) {
        self.error = mse;
    }

    /// Error set with [`ComputedPalette::set_error`]
    #[inline]
    #[must_use]
    pub fn error(&self) -> Option<f64> {
        self.error
    }

    /// Colors in the order they were pushed
    #[inline]
    #[must_use]
    pub fn colors(&self) -> &[RGBA] {
        &self.colors
    }

    /// Weights matching [`ComputedPalette::colors`]
    #[inline]
    #[must_use]
    pub fn popularity(&self) -> &[f32] {
        &self.popularity
    }

    /// Number of colors
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    /// No colors pushed yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

/// Pixels of a live image, row-major, `width * height` of them
#[derive(Debug, Clone, Copy)]
pub struct PixelView<'a> {
    /// Exactly `width * height` pixels
    pub pixels: &'a [RGBA],
    /// Pixels per row
    pub width: usize,
    /// Number of rows
    pub height: usize,
    /// Gamma the pixels are in
    pub gamma: f64,
}

/// Palette to remap to, in the gamma it was computed in
#[derive(Debug, Clone, Copy)]
pub struct PaletteView<'a> {
    /// Palette entries, at most [`MAX_COLORS`]
    pub colors: &'a [RGBA],
    /// Gamma of the palette colors
    pub gamma: f64,
}

/// Built-in backend: weighted median cut improved by k-means, remapped with Floyd-Steinberg dithering
#[derive(Debug, Default, Clone, Copy)]
pub struct MedianCut;

impl QuantizationBackend for MedianCut {
    fn compute_palette(&self, samples: &[HistogramEntry], constraints: &PaletteConstraints) -> Result<ComputedPalette, Error> {
        let mut hist = HistogramInternal::new(samples, constraints.gamma)?;
        if hist.items.is_empty() {
            return Err(Error::Unsupported);
        }
        let (palette, error) = find_best_palette(&mut hist, constraints)?;

        let mut computed = ComputedPalette::new();
        for (color, &pop) in palette.as_slice().iter().zip(palette.pops()) {
            computed.push(color.to_rgba(constraints.gamma), pop)?;
        }
        computed.set_error(Some(error));
        Ok(computed)
    }

    fn remap(&self, image: PixelView<'_>, palette: PaletteView<'_>, dither_level: f32, output: &mut [u8]) -> Result<f64, Error> {
        let len = image.width * image.height;
        let output = output.get_mut(..len).ok_or(Error::BufferTooSmall)?;
        if image.pixels.len() != len {
            return Err(Error::InternalError);
        }
        if palette.colors.is_empty() || palette.colors.len() > MAX_COLORS {
            return Err(Error::Unsupported);
        }
        let lut = gamma_lut(palette.gamma);
        let colors: ArrayVec<FPixel, MAX_COLORS> = palette.colors.iter().map(|&c| FPixel::from_rgba(&lut, c)).collect();

        let error = remap_to_palette(image, &colors, output)?;
        if dither_level == 0. {
            return Ok(error);
        }
        // the nearest-color pass doubles as the starting guess for dithering
        let max_dither_error = (error * 2.4).max(quality_to_mse(35)) as f32;
        remap_to_palette_floyd(image, &colors, dither_level, max_dither_error, output)
    }
}

/// Palette and its error. Repeats median cut with re-weighted colors until out of trials.
fn find_best_palette(hist: &mut HistogramInternal, c: &PaletteConstraints) -> Result<(PalF, f64), Error> {
    if hist.items.len() <= c.max_colors && c.aim_for_perfect_quality {
        return Ok((palette_from_histogram(hist), 0.));
    }

    let total_trials = i32::from(c.feedback_loop_trials(hist.items.len()));
    let mut trials_left = total_trials;
    let mut max_colors = c.max_colors;
    let mut target_mse_overshoot = if total_trials > 0 { 1.05 } else { 1. };
    let mut fails_in_a_row = 0;
    let mut best: Option<(PalF, Option<f64>)> = None;

    loop {
        let known_error = best.as_ref().and_then(|&(_, e)| e);
        let max_mse_per_color = c.target_mse.max(known_error.unwrap_or(quality_to_mse(1))).max(quality_to_mse(51)) * 1.2;
        let mut palette = mediancut(hist, max_colors, c.target_mse * target_mse_overshoot, max_mse_per_color)?;
        if trials_left <= 0 {
            best = Some((palette, None));
            break;
        }

        // the first pass only measures, unless there's nothing to aim for
        let first_run_of_target_mse = best.is_none() && c.target_mse > 0.;
        let total_error = Kmeans::iteration(hist, &mut palette, !first_run_of_target_mse)?;

        let improved = match &best {
            None => true,
            Some((_, best_error)) => {
                total_error < best_error.unwrap_or(f64::MAX) ||
                    (total_error <= c.target_mse && palette.len() < max_colors)
            },
        };
        if improved {
            if total_error < c.target_mse && total_error > 0. {
                target_mse_overshoot = (target_mse_overshoot * 1.25).min(c.target_mse / total_error);
            }
            max_colors = max_colors.min(palette.len() + 1);
            trials_left -= 1;
            fails_in_a_row = 0;
            best = Some((palette, Some(total_error)));
        } else {
            fails_in_a_row += 1;
            target_mse_overshoot = 1.;
            trials_left -= 5 + fails_in_a_row;
        }
        if trials_left <= 0 {
            break;
        }
    }

    let (mut palette, mut error) = best.ok_or(Error::InternalError)?;
    refine_palette(hist, &mut palette, c, &mut error)?;
    let error = match error {
        Some(e) => e,
        None => palette_error(hist, &palette)?,
    };
    Ok((palette, error))
}

fn refine_palette(hist: &mut HistogramInternal, palette: &mut PalF, c: &PaletteConstraints, error: &mut Option<f64>) -> Result<(), Error> {
    let (iterations, iteration_limit) = c.kmeans_iterations(hist.items.len(), error.is_some());
    let max_mse = c.max_mse.unwrap_or(1e20);
    let mut i = 0;
    while i < iterations {
        let pal_err = Kmeans::iteration(hist, palette, false)?;
        if let Some(previous) = error.replace(pal_err) {
            if (previous - pal_err).abs() < iteration_limit {
                break;
            }
        }
        // far from the limit, so don't waste time on it
        i += if pal_err > max_mse * 1.5 { 2 } else { 1 };
    }
    Ok(())
}

fn palette_from_histogram(hist: &HistogramInternal) -> PalF {
    let mut palette = PalF::new();
    for item in hist.items.iter().take(MAX_COLORS) {
        palette.push(item.color, item.perceptual_weight);
    }
    palette
}

#[cfg(test)]
fn constraints(max_colors: usize, target_mse: f64, perfect: bool) -> PaletteConstraints {
    let preset = crate::SpeedPreset::default();
    PaletteConstraints {
        max_colors,
        target_mse,
        max_mse: None,
        aim_for_perfect_quality: perfect,
        kmeans_iterations: preset.kmeans_iterations,
        kmeans_iteration_limit: preset.kmeans_iteration_limit,
        feedback_loop_trials: preset.feedback_loop_trials,
        gamma: crate::SRGB_GAMMA,
    }
}

#[test]
fn exact_palette_for_few_colors() {
    let samples = [
        HistogramEntry { color: RGBA::new(255, 0, 0, 255), count: 10 },
        HistogramEntry { color: RGBA::new(0, 0, 255, 255), count: 3 },
        HistogramEntry { color: RGBA::new(0, 0, 0, 0), count: 1 },
    ];
    let pal = MedianCut.compute_palette(&samples, &constraints(256, 0., true)).unwrap();
    assert_eq!(3, pal.len());
    assert_eq!(Some(0.), pal.error());
    for s in &samples {
        assert!(pal.colors().contains(&s.color));
    }
}

#[test]
fn respects_max_colors() {
    let samples: Vec<_> = (0..64u8).map(|i| HistogramEntry {
        color: RGBA::new(i * 4, 255 - i * 4, i, 255),
        count: 1 + u32::from(i % 5),
    }).collect();
    for max in [2, 7, 16] {
        let pal = MedianCut.compute_palette(&samples, &constraints(max, 0.0001, false)).unwrap();
        assert!(pal.len() <= max && !pal.is_empty());
        assert!(pal.error().unwrap() > 0.);
    }
}

#[test]
fn trials_scale() {
    let c = constraints(256, 0., false);
    assert_eq!(c.feedback_loop_trials, c.feedback_loop_trials(100));
    assert!(c.feedback_loop_trials(200_000) < c.feedback_loop_trials);
    let mut c = constraints(256, 0., false);
    c.kmeans_iterations = 0;
    assert_eq!(0, c.kmeans_iterations(100, false).0);
    c.max_mse = Some(0.01);
    assert_eq!(1, c.kmeans_iterations(100, false).0);
    assert_eq!(0, c.kmeans_iterations(100, true).0);
}

#[test]
fn computed_palette_is_bounded() {
    let mut p = ComputedPalette::new();
    for i in 0..MAX_COLORS {
        p.push(RGBA::new(i as u8, 0, 0, 255), 1.).unwrap();
    }
    assert_eq!(Err(Error::Unsupported), p.push(RGBA::new(0, 0, 0, 0), 1.));
    assert_eq!(MAX_COLORS, p.len());
}
