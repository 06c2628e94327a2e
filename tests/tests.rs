use palettequant::*;

fn gradient(width: usize, height: usize) -> Vec<RGBA> {
    (0..width * height).map(|i| {
        let (x, y) = (i % width, i / width);
        RGBA::new((x * 255 / width) as u8, (y * 255 / height) as u8, ((x + y) * 3 % 256) as u8, 255)
    }).collect()
}

/// 16x16 image with 256 distinct opaque colors
fn all_distinct() -> Vec<RGBA> {
    (0..=255u8).map(|i| RGBA::new(i, 255 - i, i.wrapping_mul(7), 255)).collect()
}

#[test]
fn remapped_image_has_one_index_per_pixel() {
    let attr = new();
    let img = attr.new_image(gradient(37, 11), 37, 11, 0.).unwrap();
    let mut res = attr.quantize(&img).unwrap();
    let indices = res.write_remapped_image().unwrap();
    assert_eq!(37 * 11, indices.len());
    assert_eq!(Ok(37), res.image_width());
    assert_eq!(Ok(11), res.image_height());
    let count = res.palette_len();
    assert!(indices.iter().all(|&i| usize::from(i) < count));
    assert!(res.remapping_error().is_some());
}

#[test]
fn remap_into_checks_length() {
    let attr = new();
    let img = attr.new_image(gradient(8, 8), 8, 8, 0.).unwrap();
    let mut res = attr.quantize(&img).unwrap();

    let mut small = [0u8; 63];
    assert_eq!(Err(Error::BufferTooSmall), res.remap_into(&mut small));

    let mut big = [0xAAu8; 70];
    res.remap_into(&mut big).unwrap();
    assert!(big[64..].iter().all(|&b| b == 0xAA));
    assert_eq!(&big[..64], &res.write_remapped_image().unwrap()[..]);
}

#[test]
fn released_image_is_use_after_free() {
    let attr = new();
    let img = attr.new_image(gradient(10, 10), 10, 10, 0.).unwrap();
    let weak = img.downgrade();
    let mut res = attr.quantize(&img).unwrap();
    let palette = res.palette();
    assert!(weak.is_live());

    img.release();
    assert!(!weak.is_live());
    for _ in 0..3 {
        let err = res.write_remapped_image().unwrap_err();
        assert_eq!(Error::UseAfterFree, err);
        assert_eq!(ErrorKind::UseAfterFree, err.kind());
    }
    assert_eq!(Err(Error::UseAfterFree), res.image_width());
    assert_eq!(Err(Error::UseAfterFree), res.remap_into(&mut [0; 100]));
    assert_eq!(Err(Error::UseAfterFree), weak.width());
    assert_eq!(Error::UseAfterFree, weak.quantize(&attr).unwrap_err());

    let mut hist = attr.new_histogram();
    assert_eq!(Err(Error::InvalidArgument), hist.add_image_ref(&attr, &weak));
    assert!(hist.is_empty());

    // the result itself is still usable
    assert_eq!(palette, res.palette());
    assert!(res.quantization_quality().is_some());
}

#[test]
fn max_colors_is_respected() {
    let pixels = gradient(32, 32);
    for max_colors in [2, 16, 256] {
        let mut attr = new();
        attr.set_max_colors(max_colors).unwrap();
        assert_eq!(max_colors, attr.max_colors());
        let img = attr.new_image(&pixels[..], 32, 32, 0.).unwrap();
        let mut res = attr.quantize(&img).unwrap();
        let (palette, indices) = res.remapped(&img).unwrap();
        assert!(!palette.is_empty());
        assert!(palette.count() <= max_colors as usize);
        assert!(indices.iter().all(|&i| usize::from(i) < palette.count()));
    }
}

#[test]
fn single_pixel() {
    let mut attr = new();
    attr.set_quality(90, 100).unwrap();
    let px = RGBA::new(12, 34, 56, 255);
    let img = attr.new_image(vec![px], 1, 1, 0.).unwrap();
    let mut res = img.quantize(&attr).unwrap();
    let (palette, indices) = res.remapped(&img).unwrap();
    assert_eq!(1, palette.count());
    assert_eq!(Ok(px), palette.at(0));
    assert_eq!(vec![0], indices);
    assert_eq!(Some(100), res.quantization_quality());
    assert_eq!(Some(100), res.remapping_quality());
}

#[test]
fn invalid_settings_change_nothing() {
    let mut attr = new();
    attr.set_max_colors(100).unwrap();
    attr.set_quality(20, 80).unwrap();
    attr.set_speed(7).unwrap();
    attr.set_min_opacity(200).unwrap();
    attr.set_min_posterization(2).unwrap();

    for bad in [0, 1, 257, 1000] {
        let err = attr.set_max_colors(bad).unwrap_err();
        assert_eq!(Error::ValueOutOfRange, err);
        assert_eq!(ErrorKind::Validation, err.kind());
    }
    assert_eq!(Err(Error::ValueOutOfRange), attr.set_quality(50, 40));
    assert_eq!(Err(Error::ValueOutOfRange), attr.set_quality(0, 101));
    assert_eq!(Err(Error::ValueOutOfRange), attr.set_speed(0));
    assert_eq!(Err(Error::ValueOutOfRange), attr.set_speed(11));
    assert_eq!(Err(Error::ValueOutOfRange), attr.set_speed(-1));
    assert_eq!(Err(Error::ValueOutOfRange), attr.set_min_opacity(256));
    assert_eq!(Err(Error::ValueOutOfRange), attr.set_min_posterization(5));

    assert_eq!(100, attr.max_colors());
    assert_eq!((20, 80), attr.quality());
    assert_eq!(7, attr.speed());
    assert_eq!(200, attr.min_opacity());
    assert_eq!(2, attr.min_posterization());
}

#[test]
fn bad_images_are_rejected() {
    let attr = new();
    let px = vec![RGBA::new(1, 2, 3, 4); 10];
    assert_eq!(Error::InvalidArgument, attr.new_image(&px[..], 0, 10, 0.).unwrap_err());
    assert_eq!(Error::InvalidArgument, attr.new_image(&px[..], 10, 0, 0.).unwrap_err());
    assert_eq!(Error::InvalidArgument, attr.new_image(&px[..], 3, 3, 0.).unwrap_err());
    assert_eq!(Error::ValueOutOfRange, attr.new_image(&px[..], 10, 1, 2.2).unwrap_err());
    assert_eq!(Error::InvalidArgument, attr.new_image_rgba8(&[0; 39], 10, 1, 0.).unwrap_err());
    assert_eq!(ErrorKind::Creation, Error::InvalidArgument.kind());
    attr.new_image_rgba8(&[0; 40], 10, 1, 0.).unwrap();
}

#[test]
fn shared_histogram_palette() {
    let attr = new();
    let red = RGBA::new(255, 0, 0, 255);
    let blue = RGBA::new(0, 0, 255, 255);
    let red_img = attr.new_image(vec![red; 4 * 4], 4, 4, 0.).unwrap();
    let blue_img = attr.new_image(vec![blue; 6 * 2], 6, 2, 0.).unwrap();

    let mut hist = attr.new_histogram();
    hist.add_image(&attr, &red_img).unwrap();
    hist.add_image_ref(&attr, &blue_img.downgrade()).unwrap();
    assert_eq!(2, hist.color_count());

    let mut res = hist.quantize(&attr).unwrap();
    assert_eq!(Err(Error::NotReady), res.write_remapped_image());

    let palette = res.palette();
    assert_eq!(2, palette.count());
    assert!(palette.contains(&red));
    assert!(palette.contains(&blue));

    res.bind_image(&red_img);
    let indices = res.write_remapped_image().unwrap();
    assert_eq!(16, indices.len());
    assert!(indices.iter().all(|&i| palette[usize::from(i)] == red));

    res.bind_image(&blue_img);
    let indices = res.write_remapped_image().unwrap();
    assert_eq!(12, indices.len());
    assert!(indices.iter().all(|&i| palette[usize::from(i)] == blue));
}

#[test]
fn remapping_error_is_reset_by_settings() {
    let attr = new();
    let img = attr.new_image(gradient(16, 16), 16, 16, 0.).unwrap();
    let other = attr.new_image(gradient(8, 8), 8, 8, 0.).unwrap();
    let mut res = attr.quantize(&img).unwrap();

    res.write_remapped_image().unwrap();
    assert!(res.remapping_error().is_some());
    res.set_dithering_level(0.).unwrap();
    assert_eq!(None, res.remapping_error());

    res.write_remapped_image().unwrap();
    assert!(res.remapping_error().is_some());
    res.bind_image(&other);
    assert_eq!(None, res.remapping_error());

    res.write_remapped_image().unwrap();
    assert!(res.remapping_error().is_some());
}

#[test]
fn histogram_order_does_not_matter() {
    let attr = new();
    let warm: Vec<_> = (0..64u8).map(|i| RGBA::new(200 + i / 2, i * 3, i, 255)).collect();
    let cool: Vec<_> = (0..64u8).map(|i| RGBA::new(i, i * 2, 120 + i * 2, 255)).collect();
    let warm = attr.new_image(warm, 8, 8, 0.).unwrap();
    let cool = attr.new_image(cool, 8, 8, 0.).unwrap();

    let sorted_palette = |first: &Image, second: &Image| {
        let mut hist = attr.new_histogram();
        hist.add_image(&attr, first).unwrap();
        hist.add_image(&attr, second).unwrap();
        let mut colors = hist.quantize(&attr).unwrap().palette().to_vec();
        colors.sort_by_key(|c| (c.a, c.r, c.g, c.b));
        colors
    };
    assert_eq!(sorted_palette(&warm, &cool), sorted_palette(&cool, &warm));
}

#[test]
fn histogram_from_colors() {
    let attr = new();
    let mut hist = attr.new_histogram();
    assert_eq!(Error::Unsupported, hist.quantize(&attr).unwrap_err());
    hist.add_colors(&[
        HistogramEntry { color: RGBA::new(10, 20, 30, 255), count: 5 },
        HistogramEntry { color: RGBA::new(200, 20, 30, 255), count: 1 },
        HistogramEntry { color: RGBA::new(10, 20, 30, 255), count: 2 },
    ], 0.).unwrap();
    assert_eq!(2, hist.color_count());
    let res = hist.quantize(&attr).unwrap();
    assert_eq!(RGBA::new(10, 20, 30, 255), res.palette()[0]);
    hist.release();
    assert_eq!(2, res.palette_len());
}

#[test]
fn exact_palette_for_256_colors() {
    let attr = new();
    let pixels = all_distinct();
    let img = attr.new_image(&pixels[..], 16, 16, 0.).unwrap();
    let mut res = attr.quantize(&img).unwrap();
    let (palette, indices) = res.remapped(&img).unwrap();
    assert_eq!(256, palette.count());
    for (px, &idx) in pixels.iter().zip(&indices) {
        assert_eq!(*px, palette[usize::from(idx)]);
    }
    assert_eq!(Some(0.), res.quantization_error());
}

#[test]
fn png_round_trip() {
    let attr = new();
    let pixels = all_distinct();
    let img = attr.new_image(&pixels[..], 16, 16, 0.).unwrap();
    let mut res = attr.quantize(&img).unwrap();
    res.set_dithering_level(0.).unwrap();
    let (palette, indices) = res.remapped(&img).unwrap();

    let rgba: Vec<RGBA> = indices.iter().map(|&i| palette[usize::from(i)]).collect();
    let png = lodepng::encode32(&rgba, 16, 16).unwrap();
    let decoded = lodepng::decode32(&png).unwrap();
    assert_eq!((16, 16), (decoded.width, decoded.height));
    assert_eq!(pixels, decoded.buffer);
}

#[test]
fn quality_too_low() {
    let mut attr = new();
    attr.set_max_colors(2).unwrap();
    attr.set_quality(90, 100).unwrap();
    let img = attr.new_image(gradient(64, 64), 64, 64, 0.).unwrap();
    let err = attr.quantize(&img).unwrap_err();
    assert_eq!(Error::QualityTooLow, err);
    assert_eq!(ErrorKind::Quality, err.kind());
    assert_eq!("QUALITY_TOO_LOW", err.to_string());

    // best effort never fails
    attr.set_quality(0, 100).unwrap();
    assert_eq!(2, attr.quantize(&img).unwrap().palette_len());
}

#[test]
fn palette_outlives_result() {
    let attr = new();
    let img = attr.new_image(gradient(20, 20), 20, 20, 0.).unwrap();
    let res = attr.quantize(&img).unwrap();
    let palette = res.palette();
    let copy = palette.clone();
    res.release();
    img.release();
    attr.release();
    assert_eq!(copy, palette);
    assert!(palette.at(0).is_ok());
    let err = palette.at(palette.count()).unwrap_err();
    assert_eq!(Error::IndexOutOfBounds, err);
    assert_eq!(ErrorKind::Bounds, err.kind());
}

#[test]
fn transparent_entry_placement() {
    let pixels = [
        RGBA::new(0, 0, 0, 0), RGBA::new(255, 0, 0, 255), RGBA::new(0, 255, 0, 255),
        RGBA::new(255, 0, 0, 255), RGBA::new(0, 255, 0, 255), RGBA::new(255, 0, 0, 255),
    ];
    let mut attr = new();
    let img = attr.new_image(&pixels[..], 3, 2, 0.).unwrap();
    let palette = attr.quantize(&img).unwrap().palette();
    assert_eq!(0, palette[0].a);

    attr.set_last_index_transparent(true);
    let mut res = attr.quantize(&img).unwrap();
    let (palette, indices) = res.remapped(&img).unwrap();
    assert_eq!(3, palette.count());
    assert_eq!(0, palette[2].a);
    assert_eq!(RGBA::new(255, 0, 0, 255), palette[0]);
    assert_eq!(2, indices[0]);
}

#[test]
fn min_opacity_is_applied_at_creation() {
    let mut attr = new();
    attr.set_min_opacity(128).unwrap();
    let img = attr.new_image(vec![RGBA::new(50, 60, 70, 200); 4], 2, 2, 0.).unwrap();
    // later changes don't affect existing images
    attr.set_min_opacity(255).unwrap();
    let palette = attr.quantize(&img).unwrap().palette();
    assert_eq!(RGBA::new(50, 60, 70, 255), palette[0]);
}

#[test]
fn output_gamma_changes_palette() {
    let attr = new();
    let img = attr.new_image(vec![RGBA::new(100, 100, 100, 255); 4], 2, 2, 0.).unwrap();
    let mut res = attr.quantize(&img).unwrap();
    res.set_output_gamma(0.8).unwrap();
    let brighter = res.palette();
    assert!(brighter[0].r != 100);
    res.set_output_gamma(0.).unwrap();
    assert_eq!(RGBA::new(100, 100, 100, 255), res.palette()[0]);
}

struct Failing {
    probe: Result<(), Error>,
    compute: Result<(), Error>,
    remap_index: u8,
}

impl QuantizationBackend for Failing {
    fn probe(&self) -> Result<(), Error> {
        self.probe
    }

    fn compute_palette(&self, samples: &[HistogramEntry], _constraints: &PaletteConstraints) -> Result<ComputedPalette, Error> {
        self.compute?;
        let mut palette = ComputedPalette::new();
        palette.push(samples[0].color, 1.)?;
        palette.set_error(Some(0.));
        Ok(palette)
    }

    fn remap(&self, image: PixelView<'_>, _palette: PaletteView<'_>, _dither_level: f32, output: &mut [u8]) -> Result<f64, Error> {
        output[..image.width * image.height].fill(self.remap_index);
        Ok(0.)
    }
}

#[test]
fn backend_probe_failure() {
    let err = Attributes::with_backend(Failing { probe: Err(Error::Unsupported), compute: Ok(()), remap_index: 0 }).unwrap_err();
    assert_eq!(Error::Unsupported, err);
}

#[test]
fn backend_abort() {
    let attr = Attributes::with_backend(Failing { probe: Ok(()), compute: Err(Error::Aborted), remap_index: 0 }).unwrap();
    let img = attr.new_image(vec![RGBA::new(1, 2, 3, 255)], 1, 1, 0.).unwrap();
    let err = attr.quantize(&img).unwrap_err();
    assert_eq!(Error::Aborted, err);
    assert_eq!(ErrorKind::Resource, err.kind());

    // backends can't claim the caller made a mistake
    let attr = Attributes::with_backend(Failing { probe: Ok(()), compute: Err(Error::UseAfterFree), remap_index: 0 }).unwrap();
    assert_eq!(Error::InternalError, attr.quantize(&img).unwrap_err());
}

#[test]
fn backend_bad_index() {
    let attr = Attributes::with_backend(Failing { probe: Ok(()), compute: Ok(()), remap_index: 5 }).unwrap();
    let img = attr.new_image(vec![RGBA::new(1, 2, 3, 255); 4], 2, 2, 0.).unwrap();
    let mut res = attr.quantize(&img).unwrap();
    assert_eq!(1, res.palette_len());
    assert_eq!(Err(Error::InternalError), res.write_remapped_image());
    assert_eq!(None, res.remapping_error());

    let attr = Attributes::with_backend(Failing { probe: Ok(()), compute: Ok(()), remap_index: 0 }).unwrap();
    let mut res = attr.quantize(&img).unwrap();
    assert_eq!(vec![0; 4], res.write_remapped_image().unwrap());
}

#[test]
fn version() {
    assert_eq!(10200, VERSION);
    assert_eq!(VERSION, palettequant::version());
    assert_eq!("1.2.0", version_string());
}
