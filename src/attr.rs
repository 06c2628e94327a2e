use crate::backend::{MedianCut, PaletteConstraints, QuantizationBackend};
use crate::error::Error;
use crate::hist::Histogram;
use crate::image::{Image, ImageSlot};
use crate::pal::{MAX_COLORS, RGBA};
use crate::quant::{quality_to_mse, QuantizationResult};
use std::fmt;
use std::sync::Arc;

/// Effort settings derived from a speed value. See [`Attributes::set_speed`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedPreset {
    /// K-means refinement passes after the palette has been found
    pub kmeans_iterations: u16,
    /// Refinement stops early when the error improves by less than this
    pub kmeans_iteration_limit: f64,
    /// Median cut + k-means rounds spent looking for a smaller or better palette
    pub feedback_loop_trials: u16,
    /// Histograms larger than this get posterized further
    pub max_histogram_entries: u32,
    /// Posterization applied to input colors regardless of [`Attributes::set_min_posterization`]
    pub min_posterization_input: u8,
}

impl SpeedPreset {
    /// Speed used by [`Attributes::new`]
    pub const DEFAULT_SPEED: u8 = 4;

    /// Preset for speed `1` (slowest, best) to `10` (fastest). `None` outside of that range.
    #[must_use]
    pub fn for_speed(speed: u8) -> Option<Self> {
        if !(1..=10).contains(&speed) {
            return None;
        }
        let value = i32::from(speed);
        let mut iterations = (8 - value).max(0) as u16;
        iterations += iterations * iterations / 2;
        Some(Self {
            kmeans_iterations: iterations,
            kmeans_iteration_limit: 1. / f64::from(1u32 << (23 - value)),
            feedback_loop_trials: (56 - 9 * value).max(0) as u16,
            max_histogram_entries: ((1 << 17) + (1 << 18) * (10 - value)) as u32,
            min_posterization_input: if speed >= 8 { 1 } else { 0 },
        })
    }
}

impl Default for SpeedPreset {
    fn default() -> Self {
        // 4 is always a valid speed
        Self::for_speed(Self::DEFAULT_SPEED).unwrap_or(Self {
            kmeans_iterations: 12,
            kmeans_iteration_limit: 1. / f64::from(1u32 << 19),
            feedback_loop_trials: 20,
            max_histogram_entries: (1 << 17) + (1 << 18) * 6,
            min_posterization_input: 0,
        })
    }
}

/// Starting point and settings for the quantization process.
///
/// Images and histograms copy what they need from it when they're created,
/// so changing settings later only affects objects created afterwards.
#[derive(Clone)]
pub struct Attributes {
    pub(crate) max_colors: u16,
    min_quality: u8,
    max_quality: u8,
    max_mse: Option<f64>,
    speed: u8,
    preset: SpeedPreset,
    pub(crate) min_opacity: u8,
    min_posterization: u8,
    pub(crate) last_index_transparent: bool,
    pub(crate) backend: Arc<dyn QuantizationBackend>,

    log_callback: Option<Arc<dyn Fn(&Attributes, &str) + Send + Sync>>,
}

impl Attributes {
    /// New handle for library configuration, using the built-in [`MedianCut`] backend
    ///
    /// See also [`Attributes::new_image()`]
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_colors: MAX_COLORS as u16,
            min_quality: 0,
            max_quality: 100,
            max_mse: None,
            speed: SpeedPreset::DEFAULT_SPEED,
            preset: SpeedPreset::default(),
            min_opacity: 255,
            min_posterization: 0,
            last_index_transparent: false,
            backend: Arc::new(MedianCut),
            log_callback: None,
        }
    }

    /// Same defaults as [`Attributes::new`], but palettes are computed and remapped by `backend`.
    ///
    /// Fails with whatever the backend's [`probe`](QuantizationBackend::probe) reports.
    pub fn with_backend<B: QuantizationBackend + 'static>(backend: B) -> Result<Self, Error> {
        backend.probe().map_err(Error::from_backend)?;
        Ok(Self {
            backend: Arc::new(backend),
            ..Self::new()
        })
    }

    /// Make an image from RGBA pixels.
    ///
    /// The `pixels` argument can be `Vec<RGBA>`, or `Box<[RGBA]>` or `&[RGBA]`.
    /// Slices are copied, owned buffers are moved in.
    ///
    /// Use 0.0 for gamma if the image is sRGB (most images are).
    #[inline]
    pub fn new_image<VecRGBA>(&self, pixels: VecRGBA, width: usize, height: usize, gamma: f64) -> Result<Image, Error> where VecRGBA: Into<Box<[RGBA]>> {
        Image::new(self, pixels, width, height, gamma)
    }

    /// Make an image from tightly packed RGBA bytes, exactly `width * height * 4` of them.
    #[inline]
    pub fn new_image_rgba8(&self, bytes: &[u8], width: usize, height: usize, gamma: f64) -> Result<Image, Error> {
        Image::from_rgba8(self, bytes, width, height, gamma)
    }

    /// Empty histogram for building one palette for several images
    #[inline]
    #[must_use]
    pub fn new_histogram(&self) -> Histogram {
        Histogram::new(self)
    }

    /// Generate palette for the image. The result is bound to `image` for remapping.
    pub fn quantize(&self, image: &Image) -> Result<QuantizationResult, Error> {
        self.quantize_slot(image.slot())
    }

    pub(crate) fn quantize_slot(&self, slot: &Arc<ImageSlot>) -> Result<QuantizationResult, Error> {
        let mut hist = Histogram::new(self);
        hist.add_slot(self, slot)?;
        let mut res = hist.quantize(self)?;
        res.bind_slot(Arc::downgrade(slot));
        Ok(res)
    }

    /// It's better to use `set_quality()`
    #[inline]
    pub fn set_max_colors(&mut self, colors: u32) -> Result<(), Error> {
        if !(2..=MAX_COLORS as u32).contains(&colors) {
            return Err(Error::ValueOutOfRange);
        }
        self.max_colors = colors as u16;
        Ok(())
    }

    /// Range 0-100, roughly like JPEG.
    ///
    /// If the minimum quality can't be met, the quantization will fail with [`Error::QualityTooLow`].
    ///
    /// Default is min 0, max 100, which means best effort, and never fails for quality reasons.
    ///
    /// If max is less than 100, the library will try to use fewer colors.
    pub fn set_quality(&mut self, minimum: u8, target: u8) -> Result<(), Error> {
        if target > 100 || target < minimum {
            return Err(Error::ValueOutOfRange);
        }
        if target < 30 {
            self.verbose_print("  warning: quality set too low");
        }
        self.min_quality = minimum;
        self.max_quality = target;
        self.max_mse = Some(quality_to_mse(minimum));
        Ok(())
    }

    /// 1-10.
    ///
    /// Faster speeds generate images of lower quality, but may be useful
    /// for real-time generation of images.
    ///
    /// The default is 4.
    #[inline]
    pub fn set_speed(&mut self, value: i32) -> Result<(), Error> {
        let preset = u8::try_from(value).ok().and_then(SpeedPreset::for_speed).ok_or(Error::ValueOutOfRange)?;
        self.preset = preset;
        self.speed = value as u8;
        Ok(())
    }

    /// Alpha values at or above this (0-255) are made fully opaque when images are created.
    ///
    /// Fully transparent pixels are left alone. The default of 255 changes nothing.
    #[inline]
    pub fn set_min_opacity(&mut self, value: u32) -> Result<(), Error> {
        self.min_opacity = u8::try_from(value).map_err(|_| Error::ValueOutOfRange)?;
        Ok(())
    }

    /// Number of least significant bits to ignore.
    ///
    /// Useful for generating palettes for VGA, 15-bit textures, or other retro platforms.
    #[inline]
    pub fn set_min_posterization(&mut self, value: u8) -> Result<(), Error> {
        if value > 4 {
            return Err(Error::ValueOutOfRange);
        }
        self.min_posterization = value;
        Ok(())
    }

    /// Move transparent color to the last entry in the palette
    ///
    /// This is less efficient for PNG, but required by some broken software
    #[inline(always)]
    pub fn set_last_index_transparent(&mut self, is_last: bool) {
        self.last_index_transparent = is_last;
    }

    /// Set callback function to be called every time the library wants to print a message.
    ///
    /// To share data with the callback, use `Arc` or `Atomic*` types and `move ||` closures.
    #[inline]
    pub fn set_log_callback<F: Fn(&Attributes, &str) + Send + Sync + 'static>(&mut self, callback: F) {
        self.log_callback = Some(Arc::new(callback));
    }

    /// Returns number of bits of precision truncated
    #[inline(always)]
    #[must_use]
    pub fn min_posterization(&self) -> u8 {
        self.min_posterization
    }

    /// Return currently set speed/quality trade-off setting
    #[inline(always)]
    #[must_use]
    pub fn speed(&self) -> u32 {
        self.speed.into()
    }

    /// Settings derived from the current speed
    #[inline(always)]
    #[must_use]
    pub fn speed_preset(&self) -> SpeedPreset {
        self.preset
    }

    /// Return max number of colors set
    #[inline(always)]
    #[must_use]
    pub fn max_colors(&self) -> u32 {
        self.max_colors.into()
    }

    /// Reads values set with `set_quality`, as (min, max)
    #[inline(always)]
    #[must_use]
    pub fn quality(&self) -> (u8, u8) {
        (self.min_quality, self.max_quality)
    }

    /// Minimum quality from `set_quality`
    #[inline(always)]
    #[must_use]
    pub fn min_quality(&self) -> u8 {
        self.min_quality
    }

    /// Maximum quality from `set_quality`
    #[inline(always)]
    #[must_use]
    pub fn max_quality(&self) -> u8 {
        self.max_quality
    }

    /// Alpha at or above which pixels become fully opaque
    #[inline(always)]
    #[must_use]
    pub fn min_opacity(&self) -> u8 {
        self.min_opacity
    }

    /// Whether the transparent color goes last in the palette
    #[inline(always)]
    #[must_use]
    pub fn last_index_transparent(&self) -> bool {
        self.last_index_transparent
    }

    /// Frees the configuration. Objects created from it are unaffected.
    #[inline]
    pub fn release(self) {}

    #[inline(always)]
    pub(crate) fn verbose_print(self: &Attributes, msg: impl AsRef<str>) {
        fn _print(a: &Attributes, msg: &str) {
            if let Some(f) = &a.log_callback {
                f(a, msg);
            }
        }
        _print(self, msg.as_ref());
    }

    /// Limits for the backend, given how many distinct colors the histogram has
    pub(crate) fn palette_constraints(&self, hist_items: usize, gamma: f64) -> PaletteConstraints {
        let max_mse = self.max_mse.map(|mse| mse * if hist_items <= MAX_COLORS { 0.33 } else { 1. });
        let wanted_mse = quality_to_mse(self.max_quality);
        let mut target_mse = wanted_mse.max((f64::from(1u32 << self.min_posterization) / 1024.).powi(2));
        if let Some(max_mse) = max_mse {
            target_mse = target_mse.min(max_mse);
        }
        PaletteConstraints {
            max_colors: usize::from(self.max_colors),
            target_mse,
            max_mse,
            aim_for_perfect_quality: wanted_mse == 0.,
            kmeans_iterations: self.preset.kmeans_iterations,
            kmeans_iteration_limit: self.preset.kmeans_iteration_limit,
            feedback_loop_trials: self.preset.feedback_loop_trials,
            gamma,
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn posterize_bits(&self) -> u8 {
        self.min_posterization.max(self.preset.min_posterization_input)
    }
}

impl Default for Attributes {
    #[inline(always)]
    fn default() -> Attributes {
        Attributes::new()
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attributes")
            .field("max_colors", &self.max_colors)
            .field("quality", &(self.min_quality, self.max_quality))
            .field("speed", &self.speed)
            .field("min_opacity", &self.min_opacity)
            .field("min_posterization", &self.min_posterization)
            .field("last_index_transparent", &self.last_index_transparent)
            .finish_non_exhaustive()
    }
}

#[test]
fn presets() {
    let p = SpeedPreset::for_speed(10).unwrap();
    assert_eq!(0, p.kmeans_iterations);
    assert_eq!(0, p.feedback_loop_trials);
    assert_eq!(1, p.min_posterization_input);
    let p = SpeedPreset::for_speed(1).unwrap();
    assert_eq!(7 + 49 / 2, p.kmeans_iterations);
    assert_eq!(47, p.feedback_loop_trials);
    assert_eq!(SpeedPreset::for_speed(4), Some(SpeedPreset::default()));
    assert!(SpeedPreset::for_speed(0).is_none());
    assert!(SpeedPreset::for_speed(11).is_none());
}

#[test]
fn constraints() {
    let mut a = Attributes::new();
    let c = a.palette_constraints(10000, 0.45455);
    assert!(c.aim_for_perfect_quality);
    assert!(c.target_mse < 0.0001);
    assert_eq!(c.max_mse, None);

    a.set_quality(50, 80).unwrap();
    let c = a.palette_constraints(10000, 0.45455);
    let max_mse = c.max_mse.unwrap();
    assert!(!c.aim_for_perfect_quality);
    assert!(c.target_mse > 0. && c.target_mse < 0.01);
    assert!(max_mse > c.target_mse && max_mse < 0.01);

    let few = a.palette_constraints(100, 0.45455);
    assert!(few.max_mse.unwrap() < max_mse);
}

#[test]
fn getset() {
    let mut a = Attributes::new();
    assert_eq!((0, 100), a.quality());
    assert!(a.set_quality(0, 101).is_err());
    assert!(a.set_quality(50, 49).is_err());
    a.set_quality(20, 60).unwrap();
    assert_eq!((20, 60), a.quality());
    assert_eq!(20, a.min_quality());
    assert_eq!(60, a.max_quality());

    a.set_speed(5).unwrap();
    assert_eq!(5, a.speed());
    assert!(a.set_speed(99).is_err());
    assert!(a.set_speed(0).is_err());
    assert!(a.set_speed(-3).is_err());
    assert_eq!(5, a.speed());
    assert_eq!(SpeedPreset::for_speed(5), Some(a.speed_preset()));

    a.set_max_colors(5).unwrap();
    assert_eq!(5, a.max_colors());
    assert!(a.set_max_colors(0).is_err());
    assert!(a.set_max_colors(257).is_err());
    assert_eq!(5, a.max_colors());

    assert_eq!(255, a.min_opacity());
    a.set_min_opacity(0).unwrap();
    assert_eq!(0, a.min_opacity());
    assert_eq!(Err(Error::ValueOutOfRange), a.set_min_opacity(256));
    assert_eq!(0, a.min_opacity());

    a.set_min_posterization(2).unwrap();
    assert_eq!(2, a.min_posterization());
    assert_eq!(2, a.posterize_bits());
    assert!(a.set_min_posterization(8).is_err());
    assert_eq!(2, a.min_posterization());

    assert!(!a.last_index_transparent());
    a.set_last_index_transparent(true);
    assert!(a.last_index_transparent());

    let mut a = Attributes::new();
    a.set_speed(10).unwrap();
    assert_eq!(1, a.posterize_bits());
}

#[test]
fn logs() {
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
    let lines = Arc::new(AtomicUsize::new(0));
    let mut a = Attributes::new();
    let l = lines.clone();
    a.set_log_callback(move |_, msg| {
        assert!(msg.contains("quality"));
        l.fetch_add(1, SeqCst);
    });
    a.set_quality(0, 20).unwrap();
    assert_eq!(1, lines.load(SeqCst));
}
