//! Converts RGBA images to 8-bit palettes with alpha channel.
//!
//! Start with [`new()`] or [`Attributes::new()`] to configure the quantization,
//! create an [`Image`] (or a [`Histogram`] for several images), quantize it to get a
//! [`QuantizationResult`], and remap images to palette indices with it.
//!
//! Every handle has a `release()` method. Releasing an image invalidates the results
//! and [`ImageRef`]s that point at it, and they report [`Error::UseAfterFree`] instead
//! of touching freed pixels. Palettes are plain values and outlive everything.
#![warn(missing_docs)]
#![allow(clippy::bool_to_int_with_if)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::if_not_else)]
#![allow(clippy::inline_always)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::wildcard_imports)]

mod attr;
mod backend;
mod error;
mod hist;
mod image;
mod kmeans;
mod mediancut;
mod nearest;
mod pal;
mod quant;
mod remap;

#[cfg(not(feature = "threads"))]
mod rayoff;

pub use attr::{Attributes, SpeedPreset};
pub use backend::{ComputedPalette, MedianCut, PaletteConstraints, PaletteView, PixelView, QuantizationBackend};
pub use error::{Error, ErrorKind};
pub use hist::{Histogram, HistogramEntry};
pub use image::{Image, ImageRef};
pub use pal::{Palette, MAX_COLORS, RGBA, SRGB_GAMMA};
pub use quant::{mse_to_quality, quality_to_mse, QuantizationResult};

/// Library version as `major * 10000 + minor * 100 + patch`
pub const VERSION: u32 = 10200;

/// Same as [`VERSION`]
#[inline]
#[must_use]
pub fn version() -> u32 {
    VERSION
}

/// Library version as a `major.minor.patch` string
#[must_use]
pub fn version_string() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Start here: creates new handle for library configuration
///
/// See [`Attributes`]
#[inline(always)]
#[must_use]
pub fn new() -> Attributes {
    Attributes::new()
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct OrdFloat<T>(T);

impl Eq for OrdFloat<f32> {}

impl Ord for OrdFloat<f32> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

impl PartialOrd for OrdFloat<f32> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OrdFloat<f32> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for OrdFloat<f64> {}

impl Ord for OrdFloat<f64> {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal)
    }
}

impl PartialOrd for OrdFloat<f64> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OrdFloat<f64> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl OrdFloat<f32> {
    #[inline]
    pub fn new(v: f32) -> Self {
        debug_assert!(v.is_finite());
        Self(v)
    }
}

impl OrdFloat<f64> {
    #[inline]
    pub fn new64(v: f64) -> Self {
        debug_assert!(v.is_finite());
        Self(v)
    }
}

#[test]
fn takes_rgba() {
    let liq = Attributes::new();

    let img = vec![RGBA { r: 0, g: 0, b: 0, a: 0 }; 8];

    liq.new_image(&img[..1], 1, 1, 0.0).unwrap();
    liq.new_image(&img[..], 4, 2, 0.0).unwrap();
    liq.new_image(&img[..], 8, 1, 0.0).unwrap();
    assert!(liq.new_image(&img[..], 9, 1, 0.0).is_err());
    assert!(liq.new_image(&img[..], 4, 3, 0.0).is_err());
}

#[test]
fn histogram() {
    let attr = Attributes::new();
    let mut hist = attr.new_histogram();

    let bitmap1 = [RGBA { r: 0, g: 0, b: 0, a: 0 }; 1];
    let image1 = attr.new_image(&bitmap1[..], 1, 1, 0.0).unwrap();
    hist.add_image(&attr, &image1).unwrap();

    let bitmap2 = [RGBA { r: 255, g: 255, b: 255, a: 255 }; 1];
    let image2 = attr.new_image(&bitmap2[..], 1, 1, 0.0).unwrap();
    hist.add_image(&attr, &image2).unwrap();

    hist.add_colors(&[HistogramEntry {
        color: RGBA::new(255, 128, 255, 128),
        count: 10,
    }], 0.0).unwrap();

    let res = hist.quantize(&attr).unwrap();
    let pal = res.palette();
    assert_eq!(3, pal.len());
}

#[test]
fn poke_it() {
    let width = 10usize;
    let height = 10usize;
    let mut fakebitmap = vec![RGBA::new(255, 255, 255, 255); width * height];

    fakebitmap[0].r = 0x55;
    fakebitmap[0].g = 0x66;
    fakebitmap[0].b = 0x77;

    // Configure the library
    let mut liq = Attributes::new();
    liq.set_speed(5).unwrap();
    liq.set_quality(70, 99).unwrap();
    liq.set_min_posterization(1).unwrap();
    assert_eq!(1, liq.min_posterization());
    liq.set_min_posterization(0).unwrap();

    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering::SeqCst;
    use std::sync::Arc;

    let log_called = Arc::new(AtomicBool::new(false));
    let log_called2 = log_called.clone();
    liq.set_log_callback(move |_attr, _msg| {
        log_called2.store(true, SeqCst);
    });

    // Describe the bitmap
    let img = liq.new_image(fakebitmap, width, height, 0.0).unwrap();

    // The magic happens in quantize()
    let mut res = match liq.quantize(&img) {
        Ok(res) => res,
        Err(err) => panic!("Quantization failed, because: {err:?}"),
    };

    // Enable dithering for subsequent remappings
    res.set_dithering_level(1.0).unwrap();

    // You can reuse the result to generate several images with the same palette
    let (palette, pixels) = res.remapped(&img).unwrap();

    assert_eq!(width * height, pixels.len());
    assert_eq!(Some(100), res.quantization_quality());
    assert_eq!(RGBA { r: 255, g: 255, b: 255, a: 255 }, palette[0]);
    assert_eq!(RGBA { r: 0x55, g: 0x66, b: 0x77, a: 255 }, palette[1]);
    assert_eq!(1, pixels[0]);
    assert!(pixels[1..].iter().all(|&i| i == 0));

    assert!(log_called.load(SeqCst));
}

#[test]
fn thread() {
    let liq = Attributes::new();
    std::thread::spawn(move || {
        let b = vec![RGBA::new(0, 0, 0, 0); 1];
        liq.new_image(b, 1, 1, 0.).unwrap();
    }).join().unwrap();
}

#[test]
fn send_sync() {
    fn is_send_sync<T: Send + Sync>() {}
    is_send_sync::<Attributes>();
    is_send_sync::<Image>();
    is_send_sync::<ImageRef>();
    is_send_sync::<Histogram>();
    is_send_sync::<QuantizationResult>();
    is_send_sync::<Palette>();
}

#[test]
fn versions() {
    assert_eq!(VERSION, version());
    let parts: Vec<u32> = version_string().split('.').map(|p| p.parse().unwrap()).collect();
    assert_eq!(VERSION, parts[0] * 10000 + parts[1] * 100 + parts[2]);
}
