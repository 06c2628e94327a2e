use crate::backend::PixelView;
use crate::error::Error;
use crate::nearest::Nearest;
use crate::pal::{gamma_lut, FPixel, ARGBF};

#[cfg(not(feature = "threads"))]
use crate::rayoff::*;
#[cfg(feature = "threads")]
use rayon::prelude::*;

/// Maps every pixel to its closest palette entry. Returns the mean error.
///
/// `output` must hold exactly `width * height` indexes.
#[inline(never)]
pub(crate) fn remap_to_palette(image: PixelView<'_>, palette: &[FPixel], output: &mut [u8]) -> Result<f64, Error> {
    let width = image.width;
    let pixel_count = width * image.height;
    if pixel_count == 0 || output.len() != pixel_count || image.pixels.len() != pixel_count {
        return Err(Error::InternalError);
    }
    let n = Nearest::new(palette)?;
    let lut = gamma_lut(image.gamma);

    let remapping_error = output.par_chunks_mut(width).enumerate().map(|(row, output_row)| {
        let input_row = &image.pixels[row * width..(row + 1) * width];
        let mut last_match = 0;
        let mut remapping_error = 0.;
        for (&px, out) in input_row.iter().zip(output_row) {
            let (matched, diff) = n.search(&FPixel::from_rgba(&lut, px), last_match);
            last_match = matched;
            *out = matched;
            remapping_error += f64::from(diff);
        }
        remapping_error
    })
    .sum::<f64>();

    Ok(remapping_error / pixel_count as f64)
}

fn dithered_pixel(dither_level: f32, max_dither_error: f32, thiserr: FPixel, px: FPixel) -> FPixel {
    let s = thiserr.0 * dither_level;
    let dither_error = s.r * s.r + s.g * s.g + s.b * s.b + s.a * s.a;
    // unnoticeable error isn't worth spreading
    if dither_error < 2. / 256. / 256. {
        return px;
    }

    let px = px.0;
    let mut ratio: f32 = 1.;
    const MAX_OVERFLOW: f32 = 1.1;
    const MAX_UNDERFLOW: f32 = -0.1;
    // some overflow is allowed, otherwise clamping of all channels makes undithered bands
    for (c, e) in [(px.r, s.r), (px.g, s.g), (px.b, s.b)] {
        if c + e > MAX_OVERFLOW {
            ratio = ratio.min((MAX_OVERFLOW - c) / e);
        } else if c + e < MAX_UNDERFLOW {
            ratio = ratio.min((MAX_UNDERFLOW - c) / e);
        }
    }
    if dither_error > max_dither_error {
        ratio *= 0.8;
    }
    FPixel(ARGBF {
        a: (px.a + s.a).clamp(0., 1.),
        r: px.r + s.r * ratio,
        g: px.g + s.g * ratio,
        b: px.b + s.b * ratio,
    })
}

/// Floyd-Steinberg error diffusion, scanning rows in alternating directions.
///
/// `output` must already hold a nearest-color remapping, which is used to speed up searches.
/// Returns the mean error between the source pixels and the chosen colors.
#[inline(never)]
pub(crate) fn remap_to_palette_floyd(image: PixelView<'_>, palette: &[FPixel], dither_level: f32, max_dither_error: f32, output: &mut [u8]) -> Result<f64, Error> {
    let width = image.width;
    let pixel_count = width * image.height;
    if pixel_count == 0 || output.len() != pixel_count || image.pixels.len() != pixel_count {
        return Err(Error::InternalError);
    }
    let n = Nearest::new(palette)?;
    let lut = gamma_lut(image.gamma);

    let errwidth = width + 2; // +2 saves from checking out of bounds access
    let mut thiserr_data = Vec::new();
    thiserr_data.try_reserve_exact(errwidth * 2)?;
    thiserr_data.resize(errwidth * 2, FPixel::default());
    let (mut thiserr, mut nexterr) = thiserr_data.split_at_mut(errwidth);

    // response to the level is non-linear, without this anything below 0.8 would barely dither
    let base_dithering_level = (1. - (1. - dither_level) * (1. - dither_level)) * (15. / 16.);
    let mut scan_forward = true;
    let mut remapping_error = 0.;

    for (input_row, output_row) in image.pixels.chunks_exact(width).zip(output.chunks_exact_mut(width)) {
        nexterr.fill(FPixel::default());
        let mut col = if scan_forward { 0 } else { width - 1 };
        loop {
            let input_px = FPixel::from_rgba(&lut, input_row[col]);
            let spx = dithered_pixel(base_dithering_level, max_dither_error, thiserr[col + 1], input_px);
            let (matched, _) = n.search(&spx, output_row[col]);
            output_row[col] = matched;
            let output_px = palette[usize::from(matched)];
            remapping_error += f64::from(input_px.diff(&output_px));

            let mut err = spx.0 - output_px.0;
            // keeps a single bad pixel from spraying its error over the neighbors
            if err.r * err.r + err.g * err.g + err.b * err.b + err.a * err.a > max_dither_error {
                err *= 0.75;
            }
            if scan_forward {
                thiserr[col + 2].0 += err * (7. / 16.);
                nexterr[col + 2].0 = err * (1. / 16.);
                nexterr[col + 1].0 += err * (5. / 16.);
                nexterr[col].0 += err * (3. / 16.);
                col += 1;
                if col >= width {
                    break;
                }
            } else {
                thiserr[col].0 += err * (7. / 16.);
                nexterr[col + 2].0 += err * (3. / 16.);
                nexterr[col + 1].0 += err * (5. / 16.);
                nexterr[col].0 = err * (1. / 16.);
                if col == 0 {
                    break;
                }
                col -= 1;
            }
        }
        std::mem::swap(&mut thiserr, &mut nexterr);
        scan_forward = !scan_forward;
    }
    Ok(remapping_error / pixel_count as f64)
}

#[cfg(test)]
fn test_palette(colors: &[crate::RGBA]) -> Vec<FPixel> {
    let lut = gamma_lut(crate::SRGB_GAMMA);
    colors.iter().map(|&c| FPixel::from_rgba(&lut, c)).collect()
}

#[test]
fn nearest_colors() {
    use crate::RGBA;
    let pixels = [RGBA::new(250, 0, 0, 255), RGBA::new(0, 0, 240, 255), RGBA::new(0, 0, 0, 0), RGBA::new(255, 5, 0, 255)];
    let palette = test_palette(&[RGBA::new(0, 0, 255, 255), RGBA::new(255, 0, 0, 255), RGBA::new(0, 0, 0, 0)]);
    let image = PixelView { pixels: &pixels, width: 2, height: 2, gamma: crate::SRGB_GAMMA };
    let mut out = [9; 4];
    let err = remap_to_palette(image, &palette, &mut out).unwrap();
    assert_eq!([1, 0, 2, 1], out);
    assert!(err > 0. && err < 0.001);
}

#[test]
fn dithering_mixes_colors() {
    use crate::RGBA;
    let gray = RGBA::new(128, 128, 128, 255);
    let pixels = vec![gray; 16 * 16];
    let palette = test_palette(&[RGBA::new(0, 0, 0, 255), RGBA::new(255, 255, 255, 255)]);
    let image = PixelView { pixels: &pixels, width: 16, height: 16, gamma: crate::SRGB_GAMMA };

    let mut out = vec![0; 16 * 16];
    remap_to_palette(image, &palette, &mut out).unwrap();
    let first = out[0];
    assert!(out.iter().all(|&i| i == first));

    remap_to_palette_floyd(image, &palette, 1., 1., &mut out).unwrap();
    assert!(out.contains(&0));
    assert!(out.contains(&1));
}

#[test]
fn exact_colors_are_kept_when_dithering() {
    use crate::RGBA;
    let colors = [RGBA::new(10, 20, 30, 255), RGBA::new(200, 100, 0, 255), RGBA::new(0, 0, 0, 0)];
    let pixels: Vec<_> = (0..30).map(|i| colors[i % 3]).collect();
    let palette = test_palette(&colors);
    let image = PixelView { pixels: &pixels, width: 5, height: 6, gamma: crate::SRGB_GAMMA };
    let mut out = vec![0; 30];
    remap_to_palette(image, &palette, &mut out).unwrap();
    let err = remap_to_palette_floyd(image, &palette, 1., 1., &mut out).unwrap();
    assert_eq!(0., err);
    for (i, &idx) in out.iter().enumerate() {
        assert_eq!(usize::from(idx), i % 3);
    }
}
