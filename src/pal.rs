use crate::error::Error;
use arrayvec::ArrayVec;
use rgb::ComponentMap;
use std::ops::Deref;

/// 8-bit RGBA, straight (non-premultiplied) alpha. The only pixel format of the public API.
pub type RGBA = rgb::RGBA<u8>;

#[allow(clippy::upper_case_acronyms)]
pub(crate) type ARGBF = rgb::alt::ARGB<f32>;

/// Largest palette that can be computed or remapped to
pub const MAX_COLORS: usize = 256;

/// Gamma assumed for images created with gamma `0`
pub const SRGB_GAMMA: f64 = 0.45455;

pub(crate) const INTERNAL_GAMMA: f64 = 0.57;
pub(crate) const WEIGHT_A: f32 = 0.625;
pub(crate) const WEIGHT_R: f32 = 0.5;
pub(crate) const WEIGHT_G: f32 = 1.;
pub(crate) const WEIGHT_B: f32 = 0.45;

/// Channel weights above make errors larger than plain 0..1 MSE
pub(crate) const WEIGHT_MSE: f64 = 0.45;

pub(crate) const MIN_OPAQUE_A: f32 = 1. / 256. * WEIGHT_A;

/// Premultiplied color in internal gamma, scaled by per-channel perceptual weights
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub(crate) struct FPixel(pub ARGBF);

impl FPixel {
    /// Worst of the squared differences when composited on black and on white
    #[inline(always)]
    pub fn diff(&self, other: &FPixel) -> f32 {
        let alphas = other.0.a - self.0.a;
        let on_black = self.0 - other.0;
        let on_white = [on_black.r + alphas, on_black.g + alphas, on_black.b + alphas];
        (on_black.r * on_black.r).max(on_white[0] * on_white[0])
            + (on_black.g * on_black.g).max(on_white[1] * on_white[1])
            + (on_black.b * on_black.b).max(on_white[2] * on_white[2])
    }

    pub fn from_rgba(lut: &[f32; 256], px: RGBA) -> Self {
        let a = f32::from(px.a) / 255.;
        Self(ARGBF {
            a: a * WEIGHT_A,
            r: lut[usize::from(px.r)] * WEIGHT_R * a,
            g: lut[usize::from(px.g)] * WEIGHT_G * a,
            b: lut[usize::from(px.b)] * WEIGHT_B * a,
        })
    }

    pub fn to_rgba(&self, gamma: f64) -> RGBA {
        let c = self.0;
        if c.a < MIN_OPAQUE_A {
            return RGBA::new(0, 0, 0, 0);
        }
        let exp = (gamma / INTERNAL_GAMMA) as f32;
        debug_assert!(exp.is_finite());

        // scaled by 256, not 255, because the values are truncated
        let channel = |v: f32, weight: f32| (((WEIGHT_A / weight) * v / c.a).powf(exp) * 256.) as u8;
        RGBA {
            r: channel(c.r, WEIGHT_R),
            g: channel(c.g, WEIGHT_G),
            b: channel(c.b, WEIGHT_B),
            a: ((256. / WEIGHT_A) * c.a) as u8,
        }
    }
}

impl From<ARGBF> for FPixel {
    #[inline(always)]
    fn from(c: ARGBF) -> Self {
        Self(c)
    }
}

/// Working palette of the median cut backend: colors and how much of the image each one covers
#[derive(Clone, Default)]
pub(crate) struct PalF {
    colors: ArrayVec<FPixel, MAX_COLORS>,
    pops: ArrayVec<f32, MAX_COLORS>,
}

impl PalF {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, color: FPixel, popularity: f32) {
        self.colors.push(color);
        self.pops.push(popularity);
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.colors.len(), self.pops.len());
        self.colors.len()
    }

    #[inline(always)]
    pub fn as_slice(&self) -> &[FPixel] {
        &self.colors
    }

    #[inline(always)]
    pub fn pops(&self) -> &[f32] {
        &self.pops
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&mut FPixel, &mut f32)> + '_ {
        self.colors.iter_mut().zip(self.pops.iter_mut())
    }
}

/// Keeps the top `8 - bits` bits of the channel and repeats them in the low bits
#[inline]
pub(crate) fn posterize_channel(color: u8, bits: u8) -> u8 {
    if bits == 0 {
        color
    } else {
        (color & !((1 << bits) - 1)) | (color >> (8 - bits))
    }
}

#[inline]
pub(crate) fn posterize(color: RGBA, bits: u8) -> RGBA {
    color.map(|c| posterize_channel(c, bits))
}

pub(crate) fn gamma_lut(gamma: f64) -> [f32; 256] {
    debug_assert!(gamma > 0.);
    let exp = (INTERNAL_GAMMA / gamma) as f32;
    let mut lut = [0.; 256];
    for (i, v) in lut.iter_mut().enumerate() {
        *v = (i as f32 / 255.).powf(exp);
    }
    lut
}

/// Colors of a computed palette.
///
/// This is a plain value: it stays valid after the [`QuantizationResult`](crate::QuantizationResult)
/// it came from is gone.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Palette {
    entries: ArrayVec<RGBA, MAX_COLORS>,
}

impl Palette {
    pub(crate) fn from_colors(colors: impl IntoIterator<Item = RGBA>) -> Self {
        Self { entries: colors.into_iter().take(MAX_COLORS).collect() }
    }

    /// Number of colors, at most [`MAX_COLORS`]
    #[inline]
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// True only for a palette that has no colors
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Color at `index`, or [`Error::IndexOutOfBounds`] if `index >= count()`
    #[inline]
    pub fn at(&self, index: usize) -> Result<RGBA, Error> {
        self.entries.get(index).copied().ok_or(Error::IndexOutOfBounds)
    }

    /// All colors, same as dereferencing
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[RGBA] {
        &self.entries
    }
}

impl Deref for Palette {
    type Target = [RGBA];

    #[inline(always)]
    fn deref(&self) -> &[RGBA] {
        self.as_slice()
    }
}

#[test]
fn diff_test() {
    let a = FPixel(ARGBF { a: 1., r: 0.2, g: 0.3, b: 0.5 });
    let b = FPixel(ARGBF { a: 1., r: 0.3, g: 0.3, b: 0.5 });
    let c = FPixel(ARGBF { a: 1., r: 1., g: 0.3, b: 0.5 });
    let d = FPixel(ARGBF { a: 0., r: 1., g: 0.3, b: 0.5 });
    assert!(a.diff(&b) < b.diff(&c));
    assert!(c.diff(&b) < c.diff(&d));
    assert_eq!(0., a.diff(&a));
}

#[test]
fn gamma_roundtrip() {
    let lut = gamma_lut(SRGB_GAMMA);
    for i in 0..=255u8 {
        let rgba = RGBA::new(i, 255 - i, i / 3, 100 + i / 2);
        assert_eq!(rgba, FPixel::from_rgba(&lut, rgba).to_rgba(SRGB_GAMMA));
    }
    assert_eq!(RGBA::new(0, 0, 0, 0), FPixel::from_rgba(&lut, RGBA::new(200, 10, 10, 0)).to_rgba(SRGB_GAMMA));
}

#[test]
fn palette_bounds() {
    let pal = Palette::from_colors([RGBA::new(1, 2, 3, 4), RGBA::new(5, 6, 7, 8)]);
    assert_eq!(2, pal.count());
    assert_eq!(Ok(RGBA::new(5, 6, 7, 8)), pal.at(1));
    assert_eq!(Err(Error::IndexOutOfBounds), pal.at(2));
    assert_eq!(Err(Error::IndexOutOfBounds), Palette::default().at(0));
}

#[test]
fn posterizes() {
    assert_eq!(0xFF, posterize_channel(0xFF, 2));
    assert_eq!(0b1000_0010, posterize_channel(0b1000_0001, 2));
    assert_eq!(0x37, posterize_channel(0x37, 0));
    assert_eq!(RGBA::new(0x33, 0, 0xFF, 0xFF), posterize(RGBA::new(0x30, 1, 0xFF, 0xF3), 4));
}
