use crate::attr::Attributes;
use crate::backend::PixelView;
use crate::error::Error;
use crate::pal::{FPixel, RGBA, SRGB_GAMMA};
use crate::quant::QuantizationResult;
use std::fmt;
use std::sync::{Arc, Weak};

/// Pixels and dimensions shared between an [`Image`] and the handles that refer to it
pub(crate) struct ImageSlot {
    pub width: usize,
    pub height: usize,
    pub gamma: f64,
    pub pixels: Box<[RGBA]>,
}

impl ImageSlot {
    #[inline]
    pub fn view(&self) -> PixelView<'_> {
        PixelView {
            pixels: &self.pixels,
            width: self.width,
            height: self.height,
            gamma: self.gamma,
        }
    }
}

/// RGBA image to quantize. Immutable after creation.
///
/// The image owns a private copy of its pixels. Dropping it, or calling [`Image::release`],
/// frees them. [`QuantizationResult`]s and [`ImageRef`]s only refer to the image, and report
/// [`Error::UseAfterFree`] once it's gone.
pub struct Image {
    slot: Arc<ImageSlot>,
}

impl Image {
    /// Makes an image from `width * height` RGBA pixels.
    ///
    /// Use 0.0 for gamma if the image is sRGB (most images are).
    pub fn new<VecRGBA>(attr: &Attributes, pixels: VecRGBA, width: usize, height: usize, gamma: f64) -> Result<Self, Error> where VecRGBA: Into<Box<[RGBA]>> {
        Self::check_args(attr, width, height, gamma)?;
        let mut pixels = pixels.into();
        if pixels.len() != width * height {
            attr.verbose_print(format!("  error: {} pixels given for a {width}x{height} image", pixels.len()));
            return Err(Error::InvalidArgument);
        }
        apply_min_opacity(&mut pixels, attr.min_opacity);
        Ok(Self {
            slot: Arc::new(ImageSlot {
                width,
                height,
                gamma: if gamma > 0. { gamma } else { SRGB_GAMMA },
                pixels,
            }),
        })
    }

    /// Makes an image from tightly packed RGBA bytes. The bytes are copied.
    pub fn from_rgba8(attr: &Attributes, bytes: &[u8], width: usize, height: usize, gamma: f64) -> Result<Self, Error> {
        Self::check_args(attr, width, height, gamma)?;
        if Some(bytes.len()) != (width * height).checked_mul(4) {
            attr.verbose_print(format!("  error: {} bytes given for a {width}x{height} RGBA image", bytes.len()));
            return Err(Error::InvalidArgument);
        }
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(width * height)?;
        pixels.extend(bytes.chunks_exact(4).map(|px| RGBA::new(px[0], px[1], px[2], px[3])));
        Self::new(attr, pixels, width, height, gamma)
    }

    fn check_args(attr: &Attributes, width: usize, height: usize, gamma: f64) -> Result<(), Error> {
        if !check_image_size(width, height) {
            attr.verbose_print(format!("  error: invalid image size {width}x{height}"));
            return Err(Error::InvalidArgument);
        }
        if !(0. ..=1.).contains(&gamma) {
            attr.verbose_print("  error: gamma must be >= 0 and <= 1 (try 1/gamma instead)");
            return Err(Error::ValueOutOfRange);
        }
        Ok(())
    }

    /// Width of the image in pixels
    #[must_use]
    #[inline(always)]
    pub fn width(&self) -> usize {
        self.slot.width
    }

    /// Height of the image in pixels
    #[must_use]
    #[inline(always)]
    pub fn height(&self) -> usize {
        self.slot.height
    }

    /// Gamma of the pixels, with `0` already replaced by [`SRGB_GAMMA`]
    #[must_use]
    #[inline(always)]
    pub fn gamma(&self) -> f64 {
        self.slot.gamma
    }

    /// Generate palette for this image. Same as [`Attributes::quantize`].
    #[inline]
    pub fn quantize(&self, attr: &Attributes) -> Result<QuantizationResult, Error> {
        attr.quantize(self)
    }

    /// Non-owning handle that can tell whether this image is still alive
    #[inline]
    #[must_use]
    pub fn downgrade(&self) -> ImageRef {
        ImageRef::from(self)
    }

    /// Frees the pixels, unless a remap is using them right now, in which case they're freed when it finishes.
    #[inline]
    pub fn release(self) {}

    #[inline(always)]
    pub(crate) fn slot(&self) -> &Arc<ImageSlot> {
        &self.slot
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Image({}x{}, gamma {})", self.width(), self.height(), self.gamma())
    }
}

/// Non-owning reference to an [`Image`].
///
/// Every operation checks that the image hasn't been released, and fails instead of touching freed pixels.
#[derive(Clone, Debug)]
pub struct ImageRef {
    pub(crate) slot: Weak<ImageSlot>,
}

impl ImageRef {
    /// `false` once the image has been released or dropped
    #[inline]
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.slot.strong_count() > 0
    }

    #[inline]
    pub(crate) fn upgrade(&self) -> Result<Arc<ImageSlot>, Error> {
        self.slot.upgrade().ok_or(Error::UseAfterFree)
    }

    /// Width of the image, or [`Error::UseAfterFree`]
    pub fn width(&self) -> Result<usize, Error> {
        Ok(self.upgrade()?.width)
    }

    /// Height of the image, or [`Error::UseAfterFree`]
    pub fn height(&self) -> Result<usize, Error> {
        Ok(self.upgrade()?.height)
    }

    /// Generate palette for the image, or fail with [`Error::UseAfterFree`] if it's gone
    pub fn quantize(&self, attr: &Attributes) -> Result<QuantizationResult, Error> {
        let slot = self.upgrade()?;
        attr.quantize_slot(&slot)
    }
}

impl From<&Image> for ImageRef {
    #[inline]
    fn from(image: &Image) -> Self {
        Self { slot: Arc::downgrade(&image.slot) }
    }
}

impl From<&ImageRef> for ImageRef {
    #[inline]
    fn from(image: &ImageRef) -> Self {
        image.clone()
    }
}

pub(crate) fn check_image_size(width: usize, height: usize) -> bool {
    if width == 0 || height == 0 {
        return false;
    }
    width.max(height) <= i32::MAX as usize &&
        width <= isize::MAX as usize / std::mem::size_of::<FPixel>() / height
}

fn apply_min_opacity(pixels: &mut [RGBA], min_opacity: u8) {
    if min_opacity == 255 {
        return;
    }
    pixels.iter_mut()
        .filter(|px| px.a != 0 && px.a >= min_opacity)
        .for_each(|px| px.a = 255);
}

#[test]
fn sizes() {
    let attr = Attributes::new();
    let px = vec![RGBA::new(1, 2, 3, 4); 8];
    assert!(Image::new(&attr, &px[..], 4, 2, 0.).is_ok());
    assert!(Image::new(&attr, &px[..], 8, 1, 0.).is_ok());
    assert_eq!(Error::InvalidArgument, Image::new(&attr, &px[..], 1, 1, 0.).unwrap_err());
    assert_eq!(Error::InvalidArgument, Image::new(&attr, &px[..], 4, 3, 0.).unwrap_err());
    assert_eq!(Error::InvalidArgument, Image::new(&attr, &px[..], 0, 8, 0.).unwrap_err());
    assert_eq!(Error::ValueOutOfRange, Image::new(&attr, &px[..], 4, 2, 2.2).unwrap_err());
    assert!(!check_image_size(usize::MAX, 2));

    let img = Image::new(&attr, px, 2, 4, 0.).unwrap();
    assert_eq!((2, 4), (img.width(), img.height()));
    assert_eq!(SRGB_GAMMA, img.gamma());
}

#[test]
fn rgba8_bytes_are_copied() {
    let attr = Attributes::new();
    let mut bytes = vec![10u8, 20, 30, 255, 40, 50, 60, 128];
    let img = Image::from_rgba8(&attr, &bytes, 2, 1, 0.5).unwrap();
    bytes[0] = 99;
    assert_eq!(RGBA::new(10, 20, 30, 255), img.slot().pixels[0]);
    assert_eq!(RGBA::new(40, 50, 60, 128), img.slot().pixels[1]);
    assert_eq!(0.5, img.gamma());
    assert_eq!(Error::InvalidArgument, Image::from_rgba8(&attr, &bytes[..7], 2, 1, 0.).unwrap_err());
    assert_eq!(Error::InvalidArgument, Image::from_rgba8(&attr, &bytes, 1, 1, 0.).unwrap_err());
}

#[test]
fn min_opacity() {
    let mut attr = Attributes::new();
    attr.set_min_opacity(200).unwrap();
    let px = [RGBA::new(1, 1, 1, 0), RGBA::new(1, 1, 1, 199), RGBA::new(1, 1, 1, 200), RGBA::new(1, 1, 1, 254)];
    let img = Image::new(&attr, &px[..], 4, 1, 0.).unwrap();
    let alphas: Vec<_> = img.slot().pixels.iter().map(|px| px.a).collect();
    assert_eq!(vec![0, 199, 255, 255], alphas);
}

#[test]
fn liveness() {
    let attr = Attributes::new();
    let img = Image::new(&attr, vec![RGBA::new(0, 0, 0, 255); 4], 2, 2, 0.).unwrap();
    let weak = img.downgrade();
    assert!(weak.is_live());
    assert_eq!(Ok(2), weak.width());
    img.release();
    assert!(!weak.is_live());
    for _ in 0..3 {
        assert_eq!(Err(Error::UseAfterFree), weak.width());
        assert_eq!(Error::UseAfterFree, weak.quantize(&attr).unwrap_err());
    }
}
