use crate::attr::Attributes;
use crate::backend::{ComputedPalette, PaletteConstraints, PaletteView, QuantizationBackend};
use crate::error::Error;
use crate::image::{Image, ImageRef, ImageSlot};
use crate::pal::{gamma_lut, posterize, FPixel, Palette, MAX_COLORS, RGBA, WEIGHT_MSE};
use crate::OrdFloat;
use arrayvec::ArrayVec;
use std::cmp::Reverse;
use std::fmt;
use std::sync::{Arc, Weak};

/// Palette and settings for remapping, produced by [`Attributes::quantize`] or [`Histogram::quantize`](crate::Histogram::quantize)
///
/// Holds only a weak reference to the image it remaps. If that image is released,
/// remapping fails with [`Error::UseAfterFree`], but the palette and
/// quantization metrics remain available.
pub struct QuantizationResult {
    /// sorted and posterized, in `palette_gamma`
    palette: Palette,
    palette_gamma: f64,
    output_gamma: Option<f64>,
    dither_level: f32,
    min_posterization: u8,
    quantization_error: Option<f64>,
    remapping_error: Option<f64>,
    backend: Arc<dyn QuantizationBackend>,
    image: Option<Weak<ImageSlot>>,
}

impl QuantizationResult {
    pub(crate) fn new(attr: &Attributes, computed: ComputedPalette, constraints: &PaletteConstraints) -> Result<Self, Error> {
        if computed.is_empty() || computed.len() > usize::from(attr.max_colors) {
            attr.verbose_print(format!("  error: backend made {} colors for a limit of {}", computed.len(), attr.max_colors));
            return Err(Error::InternalError);
        }

        let palette_error = computed.error();
        if let (Some(error), Some(max_mse)) = (palette_error, constraints.max_mse) {
            if error > max_mse {
                attr.verbose_print(format!(
                    "  image degradation MSE={:0.3} (Q={}) exceeded limit of {:0.3} ({})",
                    mse_to_standard_mse(error), mse_to_quality(error),
                    mse_to_standard_mse(max_mse), mse_to_quality(max_mse)
                ));
                return Err(Error::QualityTooLow);
            }
        }

        let min_posterization = attr.min_posterization();
        Ok(Self {
            palette: sorted_palette(attr, &computed, min_posterization),
            palette_gamma: constraints.gamma,
            output_gamma: None,
            dither_level: 1.,
            min_posterization,
            quantization_error: palette_error,
            remapping_error: None,
            backend: Arc::clone(&attr.backend),
            image: None,
        })
    }

    /// Set to 1.0 to get nice smooth image
    pub fn set_dithering_level(&mut self, value: f32) -> Result<(), Error> {
        if !(0. ..=1.).contains(&value) {
            return Err(Error::ValueOutOfRange);
        }
        self.remapping_error = None;
        self.dither_level = value;
        Ok(())
    }

    /// Dithering level from `set_dithering_level`
    #[inline]
    #[must_use]
    pub fn dithering_level(&self) -> f32 {
        self.dither_level
    }

    /// The default is the gamma the palette was computed in (the image's gamma, usually sRGB).
    ///
    /// Use 0 to go back to the default. Other values must be between 0 and 1.
    pub fn set_output_gamma(&mut self, value: f64) -> Result<(), Error> {
        if value == 0. {
            self.output_gamma = None;
            return Ok(());
        }
        if !(value > 0. && value < 1.) {
            return Err(Error::ValueOutOfRange);
        }
        self.output_gamma = Some(value);
        Ok(())
    }

    /// Gamma of the colors returned by [`QuantizationResult::palette`]
    #[inline]
    #[must_use]
    pub fn output_gamma(&self) -> f64 {
        self.output_gamma.unwrap_or(self.palette_gamma)
    }

    /// Approximate mean square error of the palette, 0-65536 scale
    #[must_use]
    pub fn quantization_error(&self) -> Option<f64> {
        self.quantization_error.map(mse_to_standard_mse)
    }

    /// Approximate quality of the palette, 0-100 (100 is best)
    #[must_use]
    pub fn quantization_quality(&self) -> Option<u8> {
        self.quantization_error.map(mse_to_quality)
    }

    /// Mean square error of the last remapping, 0-65536 scale.
    ///
    /// `None` until an image has been remapped with the current settings.
    #[must_use]
    pub fn remapping_error(&self) -> Option<f64> {
        self.remapping_error.map(mse_to_standard_mse)
    }

    /// Quality of the last remapping, 0-100. `None` until an image has been remapped.
    #[must_use]
    pub fn remapping_quality(&self) -> Option<u8> {
        self.remapping_error.map(mse_to_quality)
    }

    /// Copy of the palette, in [`output_gamma`](QuantizationResult::output_gamma).
    ///
    /// It stays valid after the result is released.
    #[must_use]
    pub fn palette(&self) -> Palette {
        match self.output_gamma {
            Some(gamma) if (gamma - self.palette_gamma).abs() > 1e-6 => {
                let lut = gamma_lut(self.palette_gamma);
                Palette::from_colors(self.palette.iter().map(|&c| {
                    posterize(FPixel::from_rgba(&lut, c).to_rgba(gamma), self.min_posterization)
                }))
            },
            _ => self.palette.clone(),
        }
    }

    /// Number of colors in the palette
    #[inline]
    #[must_use]
    pub fn palette_len(&self) -> usize {
        self.palette.count()
    }

    /// Use `image` for subsequent remapping.
    ///
    /// Any live image will do. Histogram-derived results need this before [`write_remapped_image`](QuantizationResult::write_remapped_image).
    pub fn bind_image<I: Into<ImageRef>>(&mut self, image: I) {
        self.bind_slot(image.into().slot);
    }

    pub(crate) fn bind_slot(&mut self, image: Weak<ImageSlot>) {
        self.image = Some(image);
        self.remapping_error = None;
    }

    fn bound_image(&self) -> Result<Arc<ImageSlot>, Error> {
        self.image.as_ref()
            .ok_or(Error::NotReady)?
            .upgrade().ok_or(Error::UseAfterFree)
    }

    /// Width of the bound image
    pub fn image_width(&self) -> Result<usize, Error> {
        Ok(self.bound_image()?.width)
    }

    /// Height of the bound image
    pub fn image_height(&self) -> Result<usize, Error> {
        Ok(self.bound_image()?.height)
    }

    /// Remaps the bound image to palette indices, one byte per pixel, row-major.
    ///
    /// Fails with [`Error::NotReady`] if no image is bound, and [`Error::UseAfterFree`] if it has been released.
    pub fn write_remapped_image(&mut self) -> Result<Vec<u8>, Error> {
        let image = self.bound_image()?;
        let len = image.width * image.height;
        let mut buf = Vec::new();
        buf.try_reserve_exact(len)?;
        buf.resize(len, 0);
        self.remap_slot(&image, &mut buf)?;
        Ok(buf)
    }

    /// Like [`write_remapped_image`](QuantizationResult::write_remapped_image), but into a buffer of at least `width * height` bytes.
    ///
    /// Bytes past `width * height` are left untouched.
    pub fn remap_into(&mut self, output: &mut [u8]) -> Result<(), Error> {
        let image = self.bound_image()?;
        self.remap_slot(&image, output)
    }

    /// Binds `image`, remaps it, and returns the palette together with the indices
    pub fn remapped(&mut self, image: &Image) -> Result<(Palette, Vec<u8>), Error> {
        self.bind_image(image);
        let indices = self.write_remapped_image()?;
        Ok((self.palette(), indices))
    }

    /// Frees the result. The palette copies and the bound image are unaffected.
    #[inline]
    pub fn release(self) {}

    fn remap_slot(&mut self, image: &ImageSlot, output: &mut [u8]) -> Result<(), Error> {
        let len = image.width * image.height;
        let output = output.get_mut(..len).ok_or(Error::BufferTooSmall)?;
        let palette = PaletteView {
            colors: &self.palette,
            gamma: self.palette_gamma,
        };
        let error = self.backend.remap(image.view(), palette, self.dither_level, output)
            .map_err(Error::from_backend)?;

        let count = self.palette.count();
        if output.iter().any(|&idx| usize::from(idx) >= count) {
            return Err(Error::InternalError);
        }
        self.remapping_error = Some(error);
        Ok(())
    }
}

impl fmt::Debug for QuantizationResult {
    #[cold]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuantizationResult({} colors, q={})", self.palette.count(), self.quantization_quality().unwrap_or(0))
    }
}

/// Most popular first. Transparent colors go first, or with `last_index_transparent`, the most transparent one goes last.
fn sorted_palette(attr: &Attributes, computed: &ComputedPalette, posterize_bits: u8) -> Palette {
    let last_index_transparent = attr.last_index_transparent;

    let mut entries: ArrayVec<(RGBA, f32), MAX_COLORS> = computed.colors().iter().copied()
        .zip(computed.popularity().iter().copied())
        .take(MAX_COLORS)
        .collect();
    entries.sort_by_key(|&(color, pop)| {
        let is_transparent = color.a < 255;
        (is_transparent == last_index_transparent, Reverse(OrdFloat::new(pop)))
    });

    if last_index_transparent {
        let alpha_index = entries.iter().enumerate()
            .filter(|(_, (c, _))| c.a < 255)
            .min_by_key(|(_, (c, _))| c.a)
            .map(|(i, _)| i);
        if let Some(alpha_index) = alpha_index {
            let last_index = entries.len() - 1;
            entries.swap(last_index, alpha_index);
        }
    } else {
        let num_transparent = entries.iter().take_while(|(c, _)| c.a < 255).count();
        if num_transparent > 0 {
            attr.verbose_print(format!("  eliminated opaque tRNS-chunk entries...{} entr{} transparent", num_transparent, if num_transparent == 1 { "y" } else { "ies" }));
        }
    }

    Palette::from_colors(entries.into_iter().map(|(color, _)| posterize(color, posterize_bits)))
}

/// Converts the 0-100 quality scale to the internal MSE scale. 100 is 0, 0 is effectively infinite.
#[must_use]
pub fn quality_to_mse(quality: u8) -> f64 {
    if quality == 0 {
        return 1e20;
    }
    if quality >= 100 {
        return 0.;
    }
    let quality = f64::from(quality);
    let extra_low_quality_fudge = (0.016 / (0.001 + quality) - 0.001).max(0.);
    WEIGHT_MSE * (extra_low_quality_fudge + 2.5 / (210. + quality).powf(1.2) * (100.1 - quality) / 100.)
}

/// Inverse of [`quality_to_mse`]. Never increases when the error grows.
#[must_use]
pub fn mse_to_quality(mse: f64) -> u8 {
    (1..=100).rev()
        .find(|&q| mse <= quality_to_mse(q) + 0.000001)
        .unwrap_or(0)
}

pub(crate) fn mse_to_standard_mse(mse: f64) -> f64 {
    (mse * 65536. / 6.) / WEIGHT_MSE
}

#[cfg(test)]
fn computed(colors: &[(RGBA, f32)], error: f64) -> ComputedPalette {
    let mut c = ComputedPalette::new();
    for &(color, pop) in colors {
        c.push(color, pop).unwrap();
    }
    c.set_error(Some(error));
    c
}

#[test]
fn quality_mapping() {
    assert_eq!(100, mse_to_quality(0.));
    assert_eq!(0, mse_to_quality(1e30));
    let mut prev = f64::MAX;
    for q in 0..=100 {
        let mse = quality_to_mse(q);
        assert!(mse < prev || q == 0);
        assert_eq!(q, mse_to_quality(mse));
        prev = mse;
    }
}

#[test]
fn sorting() {
    let mut attr = Attributes::new();
    let colors = [
        (RGBA::new(1, 1, 1, 255), 5.),
        (RGBA::new(2, 2, 2, 100), 1.),
        (RGBA::new(3, 3, 3, 0), 2.),
        (RGBA::new(4, 4, 4, 255), 9.),
    ];
    let c = attr.palette_constraints(4, crate::SRGB_GAMMA);
    let res = QuantizationResult::new(&attr, computed(&colors, 0.), &c).unwrap();
    let pal = res.palette();
    assert_eq!(&[RGBA::new(3, 3, 3, 0), RGBA::new(2, 2, 2, 100), RGBA::new(4, 4, 4, 255), RGBA::new(1, 1, 1, 255)], pal.as_slice());

    attr.set_last_index_transparent(true);
    let res = QuantizationResult::new(&attr, computed(&colors, 0.), &c).unwrap();
    let pal = res.palette();
    assert_eq!(RGBA::new(4, 4, 4, 255), pal[0]);
    assert_eq!(RGBA::new(3, 3, 3, 0), pal[3]);
}

#[test]
fn too_low_quality() {
    let mut attr = Attributes::new();
    attr.set_quality(90, 100).unwrap();
    let c = attr.palette_constraints(1000, crate::SRGB_GAMMA);
    let err = QuantizationResult::new(&attr, computed(&[(RGBA::new(0, 0, 0, 255), 1.)], 0.5), &c).unwrap_err();
    assert_eq!(Error::QualityTooLow, err);
    assert_eq!(crate::ErrorKind::Quality, err.kind());
}

#[test]
fn settings() {
    let attr = Attributes::new();
    let c = attr.palette_constraints(1, crate::SRGB_GAMMA);
    let mut res = QuantizationResult::new(&attr, computed(&[(RGBA::new(128, 128, 128, 255), 1.)], 0.), &c).unwrap();
    assert_eq!(1., res.dithering_level());
    assert_eq!(Err(Error::ValueOutOfRange), res.set_dithering_level(1.5));
    assert_eq!(Err(Error::ValueOutOfRange), res.set_dithering_level(f32::NAN));
    res.set_dithering_level(0.5).unwrap();
    assert_eq!(0.5, res.dithering_level());

    assert_eq!(crate::SRGB_GAMMA, res.output_gamma());
    assert_eq!(Err(Error::ValueOutOfRange), res.set_output_gamma(1.));
    assert_eq!(Err(Error::ValueOutOfRange), res.set_output_gamma(-0.5));
    res.set_output_gamma(0.3).unwrap();
    assert_eq!(0.3, res.output_gamma());
    assert_ne!(RGBA::new(128, 128, 128, 255), res.palette()[0]);
    res.set_output_gamma(0.).unwrap();
    assert_eq!(RGBA::new(128, 128, 128, 255), res.palette()[0]);

    assert_eq!(Some(0.), res.quantization_error());
    assert_eq!(Some(100), res.quantization_quality());
    assert_eq!(None, res.remapping_error());
    assert_eq!(Err(Error::NotReady), res.image_width());
    assert_eq!(Error::NotReady, res.write_remapped_image().unwrap_err());
}
