use crate::attr::Attributes;
use crate::error::Error;
use crate::image::{Image, ImageRef, ImageSlot};
use crate::pal::{gamma_lut, FPixel, MAX_COLORS, RGBA, SRGB_GAMMA};
use crate::quant::QuantizationResult;
use std::collections::HashMap;
use std::fmt;

/// Number of pixels in a given color for [`Histogram::add_colors()`]
///
/// Used for building a histogram manually. Otherwise see [`Histogram::add_image()`]
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HistogramEntry {
    /// The color
    pub color: RGBA,
    /// Importance of the color (e.g. number of occurrences)
    pub count: u32,
}

/// Generate one shared palette for multiple images
///
/// The histogram only keeps color counts. It doesn't keep the images alive, and the
/// [`QuantizationResult`] it makes isn't bound to any image until
/// [`bind_image`](QuantizationResult::bind_image) is called.
///
/// If you're converting one image at a time, see [`Attributes::quantize`] instead
pub struct Histogram {
    gamma: Option<f64>,

    /// The key is the posterized RGBA cast to u32.
    /// The value is a count and the first color seen for that key.
    hashmap: HashMap<u32, (u32, RGBA), U32Hasher>,

    posterize_bits: u8,
    max_histogram_entries: u32,
}

impl Histogram {
    /// Creates histogram object that will be used to collect color statistics from multiple images.
    ///
    /// All options should be set on `attr` before the histogram object is created.
    #[must_use]
    pub fn new(attr: &Attributes) -> Self {
        Self {
            gamma: None,
            hashmap: HashMap::with_hasher(U32Hasher(0)),
            posterize_bits: attr.posterize_bits(),
            max_histogram_entries: attr.speed_preset().max_histogram_entries,
        }
    }

    /// "Learns" colors from the image, which will be later used to generate the palette.
    ///
    /// After the image is added to the histogram it may be freed to save memory.
    /// All images should share the same gamma.
    #[inline]
    pub fn add_image(&mut self, attr: &Attributes, image: &Image) -> Result<(), Error> {
        self.add_slot(attr, image.slot())
    }

    /// Same as [`Histogram::add_image`], but fails with [`Error::InvalidArgument`] if the image has been released
    pub fn add_image_ref(&mut self, attr: &Attributes, image: &ImageRef) -> Result<(), Error> {
        let slot = image.slot.upgrade().ok_or_else(|| {
            attr.verbose_print("  error: the image was released before it was added to the histogram");
            Error::InvalidArgument
        })?;
        self.add_slot(attr, &slot)
    }

    pub(crate) fn add_slot(&mut self, attr: &Attributes, image: &ImageSlot) -> Result<(), Error> {
        let posterize_bits = attr.posterize_bits();
        self.raise_posterization(posterize_bits);
        self.gamma = Some(image.gamma);

        let area = image.width * image.height;
        let estimated_colors = (area / (usize::from(posterize_bits) + if area > 512 * 512 { 7 } else { 5 })).min(250_000);
        self.reserve(estimated_colors)?;

        for &px in image.pixels.iter() {
            self.add_color(px, 1);
        }

        if self.hashmap.len() > self.max_histogram_entries as usize && self.posterize_bits < 3 {
            attr.verbose_print(format!("  {} colors is too many, posterizing by {} bits", self.hashmap.len(), self.posterize_bits + 1));
            self.raise_posterization(self.posterize_bits + 1);
        }
        Ok(())
    }

    /// Alternative to `add_image()`. Instead of counting colors in an image, it directly takes an array of colors and their counts.
    ///
    /// This function is only useful if you already have a histogram of the image from another source.
    ///
    /// The gamma may be 0 to mean sRGB. All calls to `add_colors` and `add_image` should use the same gamma value.
    pub fn add_colors(&mut self, entries: &[HistogramEntry], gamma: f64) -> Result<(), Error> {
        if entries.is_empty() || entries.len() > 1 << 24 {
            return Err(Error::ValueOutOfRange);
        }
        if !(0. ..1.).contains(&gamma) {
            return Err(Error::ValueOutOfRange);
        }
        if self.gamma.is_none() && gamma > 0. {
            self.gamma = Some(gamma);
        }
        self.reserve(entries.len())?;
        for e in entries {
            self.add_color(e.color, e.count);
        }
        Ok(())
    }

    /// Generate palette for all images/colors added to the histogram.
    ///
    /// Palette generated using this function won't be improved during remapping.
    /// If you're generating palette for only one image, it's better not to use the `Histogram`.
    pub fn quantize(&self, attr: &Attributes) -> Result<QuantizationResult, Error> {
        if self.hashmap.is_empty() {
            attr.verbose_print("  error: the histogram is empty");
            return Err(Error::Unsupported);
        }
        let gamma = self.gamma.unwrap_or(SRGB_GAMMA);
        let entries = self.entries()?;
        attr.verbose_print(format!("  made histogram...{} colors found", entries.len()));

        let constraints = attr.palette_constraints(entries.len(), gamma);
        let computed = attr.backend.compute_palette(&entries, &constraints).map_err(Error::from_backend)?;
        QuantizationResult::new(attr, computed, &constraints)
    }

    /// Number of distinct (after posterization) colors collected so far
    #[inline]
    #[must_use]
    pub fn color_count(&self) -> usize {
        self.hashmap.len()
    }

    /// No colors added yet
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hashmap.is_empty()
    }

    /// Frees the collected colors. Images that were added are unaffected.
    #[inline]
    pub fn release(self) {}

    pub(crate) fn entries(&self) -> Result<Vec<HistogramEntry>, Error> {
        let mut entries = Vec::new();
        entries.try_reserve_exact(self.hashmap.len())?;
        entries.extend(self.hashmap.values().map(|&(count, color)| HistogramEntry { color, count }));
        Ok(entries)
    }

    #[inline(always)]
    fn add_color(&mut self, rgba: RGBA, count: u32) {
        if count == 0 {
            return;
        }
        // all transparent pixels are the same color
        let key = if rgba.a != 0 {
            self.posterize_mask() & u32::from_ne_bytes([rgba.r, rgba.g, rgba.b, rgba.a])
        } else {
            0
        };
        self.hashmap.entry(key)
            .and_modify(|e| e.0 = e.0.saturating_add(count))
            .or_insert((count, rgba));
    }

    #[inline(always)]
    fn posterize_mask(&self) -> u32 {
        let channel_mask = 255u8 << self.posterize_bits;
        u32::from_ne_bytes([channel_mask; 4])
    }

    /// Existing entries are merged if they become the same color
    fn raise_posterization(&mut self, bits: u8) {
        if self.posterize_bits >= bits {
            return;
        }
        self.posterize_bits = bits;
        let mask = self.posterize_mask();
        let old = std::mem::take(&mut self.hashmap);
        for (key, (count, color)) in old {
            self.hashmap.entry(key & mask)
                .and_modify(|e| e.0 = e.0.saturating_add(count))
                .or_insert((count, color));
        }
    }

    fn reserve(&mut self, entries: usize) -> Result<(), Error> {
        let additional = entries.saturating_sub(self.hashmap.capacity() - self.hashmap.len());
        self.hashmap.try_reserve(additional)?;
        Ok(())
    }
}

impl fmt::Debug for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Histogram")
            .field("colors", &self.hashmap.len())
            .field("gamma", &self.gamma)
            .field("posterize_bits", &self.posterize_bits)
            .finish()
    }
}

/// Histogram color with weights, as used by the median cut backend
#[derive(Debug, Clone)]
pub(crate) struct HistItem {
    pub color: FPixel,
    pub perceptual_weight: f32,
    /// `perceptual_weight` boosted for colors that the previous palette served poorly
    pub adjusted_weight: f32,
    pub likely_palette_index: u8,
}

pub(crate) struct HistogramInternal {
    pub items: Box<[HistItem]>,
    pub total_perceptual_weight: f64,
}

impl HistogramInternal {
    pub(crate) fn new(entries: &[HistogramEntry], gamma: f64) -> Result<Self, Error> {
        let total_count: f64 = entries.iter().map(|e| f64::from(e.count)).sum();
        // no single color gets more than 10% of the attention, unless all colors fit in the palette anyway
        let max_weight = if entries.len() > MAX_COLORS { (0.1 * total_count) as f32 } else { f32::MAX };
        let lut = gamma_lut(gamma);

        let mut items = Vec::new();
        items.try_reserve_exact(entries.len())?;
        let mut total_perceptual_weight = 0.;
        for e in entries.iter().filter(|e| e.count > 0) {
            let weight = (e.count as f32).min(max_weight);
            total_perceptual_weight += f64::from(weight);
            items.push(HistItem {
                color: FPixel::from_rgba(&lut, e.color),
                perceptual_weight: weight,
                adjusted_weight: weight,
                likely_palette_index: 0,
            });
        }
        Ok(Self {
            items: items.into_boxed_slice(),
            total_perceptual_weight,
        })
    }
}

#[derive(Default)]
pub(crate) struct U32Hasher(pub u32);

impl std::hash::BuildHasher for U32Hasher {
    type Hasher = Self;

    #[inline(always)]
    fn build_hasher(&self) -> Self {
        Self(0)
    }
}

impl std::hash::Hasher for U32Hasher {
    // magic constant from fxhash. For a single 32-bit key that's all it needs!
    #[inline(always)]
    fn finish(&self) -> u64 {
        u64::from(self.0).wrapping_mul(0x517cc1b727220a95)
    }

    #[inline(always)]
    fn write_u32(&mut self, i: u32) {
        self.0 = i;
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = self.0.rotate_left(8) ^ u32::from(b);
        }
    }
}

#[test]
fn transparent_pixels_collapse() {
    let attr = Attributes::new();
    let px = [RGBA::new(255, 0, 0, 0), RGBA::new(0, 255, 0, 0), RGBA::new(9, 9, 9, 255), RGBA::new(9, 9, 9, 255)];
    let img = attr.new_image(&px[..], 2, 2, 0.).unwrap();
    let mut hist = attr.new_histogram();
    hist.add_image(&attr, &img).unwrap();
    assert_eq!(2, hist.color_count());
    let mut counts: Vec<_> = hist.entries().unwrap().iter().map(|e| e.count).collect();
    counts.sort_unstable();
    assert_eq!(vec![2, 2], counts);
}

#[test]
fn posterization_merges_counts() {
    let attr = Attributes::new();
    let mut hist = attr.new_histogram();
    hist.add_colors(&[
        HistogramEntry { color: RGBA::new(16, 16, 16, 255), count: 3 },
        HistogramEntry { color: RGBA::new(17, 17, 17, 255), count: 4 },
        HistogramEntry { color: RGBA::new(200, 16, 16, 255), count: 1 },
    ], 0.).unwrap();
    assert_eq!(3, hist.color_count());
    hist.raise_posterization(2);
    assert_eq!(2, hist.color_count());
    let total: u32 = hist.entries().unwrap().iter().map(|e| e.count).sum();
    assert_eq!(8, total);
}

#[test]
fn add_colors_validation() {
    let attr = Attributes::new();
    let mut hist = attr.new_histogram();
    let entry = HistogramEntry { color: RGBA::new(1, 2, 3, 255), count: 1 };
    assert_eq!(Err(Error::ValueOutOfRange), hist.add_colors(&[], 0.));
    assert_eq!(Err(Error::ValueOutOfRange), hist.add_colors(&[entry], 1.5));
    assert!(hist.is_empty());
    hist.add_colors(&[entry], 0.5).unwrap();
    assert!(!hist.is_empty());
}

#[test]
fn empty_histogram() {
    let attr = Attributes::new();
    let hist = attr.new_histogram();
    assert_eq!(Error::Unsupported, hist.quantize(&attr).unwrap_err());
}

#[test]
fn released_image_is_rejected() {
    let attr = Attributes::new();
    let img = attr.new_image(vec![RGBA::new(1, 2, 3, 255); 4], 2, 2, 0.).unwrap();
    let weak = img.downgrade();
    let mut hist = attr.new_histogram();
    hist.add_image_ref(&attr, &weak).unwrap();
    img.release();
    assert_eq!(Err(Error::InvalidArgument), hist.add_image_ref(&attr, &weak));
    assert_eq!(1, hist.color_count());
}
