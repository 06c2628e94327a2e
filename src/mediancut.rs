use crate::error::Error;
use crate::hist::{HistItem, HistogramInternal};
use crate::pal::{FPixel, PalF, ARGBF};
use crate::quant::quality_to_mse;
use crate::OrdFloat;
use rgb::ComponentMap;

/// A set of histogram colors that will become one palette entry
struct ColorBox<'hist> {
    items: &'hist mut [HistItem],
    avg_color: FPixel,
    /// weighted, per channel
    variance: ARGBF,
    weight_sum: f64,
    max_error: f32,
    total_error: Option<f64>,
}

impl<'hist> ColorBox<'hist> {
    fn new(items: &'hist mut [HistItem]) -> Self {
        debug_assert!(!items.is_empty());
        let weight_sum = items.iter().map(|item| f64::from(item.adjusted_weight)).sum();
        let avg_color = weighted_average(items);
        let mut variance = ARGBF::default();
        let mut max_error = 0f32;
        for item in items.iter() {
            variance += (avg_color.0 - item.color.0).map(|c| c * c) * item.adjusted_weight;
            max_error = max_error.max(avg_color.diff(&item.color));
        }
        Self { items, avg_color, variance, weight_sum, max_error, total_error: None }
    }

    fn total_error(&mut self) -> f64 {
        if let Some(e) = self.total_error {
            return e;
        }
        let avg = self.avg_color;
        let e = self.items.iter()
            .map(|item| f64::from(avg.diff(&item.color)) * f64::from(item.perceptual_weight))
            .sum();
        self.total_error = Some(e);
        e
    }

    /// Boxes that are big, heavy, or have a badly served color go first
    fn split_priority(&self, max_mse: f64) -> f64 {
        let v = self.variance;
        let widest = v.a.max(v.r).max(v.g).max(v.b);
        let mut priority = f64::from(widest);
        let max_error = f64::from(self.max_error);
        if max_error > max_mse {
            priority = priority * max_error / max_mse;
        }
        priority
    }

    /// Splits at the weighted median of the channel with the largest variance
    fn split(self) -> [ColorBox<'hist>; 2] {
        let v = self.variance;
        let channel = if v.a >= v.r && v.a >= v.g && v.a >= v.b { 0 }
            else if v.g >= v.r && v.g >= v.b { 2 }
            else if v.r >= v.b { 1 }
            else { 3 };

        let items = self.items;
        items.sort_unstable_by_key(|item| OrdFloat::new(channel_value(&item.color, channel)));

        let half_weight = self.weight_sum / 2.;
        let mut acc = 0.;
        let mut split_at = items.len() / 2;
        for (n, item) in items.iter().enumerate() {
            let next = acc + f64::from(item.adjusted_weight);
            if next >= half_weight {
                // whichever side of the median is closer
                split_at = if next - half_weight < half_weight - acc { n + 1 } else { n };
                break;
            }
            acc = next;
        }
        let split_at = split_at.clamp(1, items.len() - 1);
        let (left, right) = items.split_at_mut(split_at);
        [ColorBox::new(left), ColorBox::new(right)]
    }
}

#[inline]
fn channel_value(color: &FPixel, channel: u8) -> f32 {
    match channel {
        0 => color.0.a,
        1 => color.0.r,
        2 => color.0.g,
        _ => color.0.b,
    }
}

fn weighted_average(items: &[HistItem]) -> FPixel {
    let mut sum = ARGBF::default();
    let mut total = 0f32;
    for item in items {
        sum += item.color.0 * item.adjusted_weight;
        total += item.adjusted_weight;
    }
    if total > 0. {
        sum /= total;
    }
    FPixel(sum)
}

/// Splits the histogram into at most `target_colors` boxes, stopping early once the error is below `target_mse`
pub(crate) fn mediancut(hist: &mut HistogramInternal, target_colors: usize, target_mse: f64, max_mse_per_color: f64) -> Result<PalF, Error> {
    if hist.items.is_empty() || target_colors == 0 {
        return Err(Error::Unsupported);
    }
    let error_limit = target_mse * hist.total_perceptual_weight;
    let max_mse = max_mse_per_color.max(quality_to_mse(20));

    let mut boxes = Vec::new();
    boxes.try_reserve(target_colors)?;
    boxes.push(ColorBox::new(&mut hist.items[..]));

    while boxes.len() < target_colors {
        // tolerate larger per-color errors as the palette fills up
        let fraction_done = boxes.len() as f64 / target_colors as f64;
        let current_max_mse = max_mse + fraction_done * 16. * max_mse;
        let Some(best) = boxes.iter().enumerate()
            .filter(|(_, b)| b.items.len() > 1)
            .max_by_key(|(_, b)| OrdFloat::new64(b.weight_sum * b.split_priority(current_max_mse)))
            .map(|(i, _)| i)
        else {
            break;
        };

        let taken = boxes.swap_remove(best);
        boxes.extend(taken.split());

        if total_error_below(&mut boxes, error_limit) {
            break;
        }
    }
    Ok(into_palette(boxes))
}

fn total_error_below(boxes: &mut [ColorBox<'_>], limit: f64) -> bool {
    let mut total = 0.;
    for b in boxes.iter_mut() {
        total += b.total_error();
        if total > limit {
            return false;
        }
    }
    true
}

fn into_palette(boxes: Vec<ColorBox<'_>>) -> PalF {
    let mut palette = PalF::new();
    for (i, b) in boxes.into_iter().enumerate() {
        let ColorBox { items, avg_color, .. } = b;
        let mut popularity = 0.;
        for item in items.iter_mut() {
            item.likely_palette_index = i as u8;
            popularity += item.perceptual_weight;
        }
        palette.push(avg_color, popularity);
    }
    palette
}

#[cfg(test)]
fn test_hist(colors: &[(u8, u8, u8)]) -> HistogramInternal {
    let entries: Vec<_> = colors.iter().map(|&(r, g, b)| crate::HistogramEntry { color: crate::RGBA::new(r, g, b, 255), count: 1 }).collect();
    HistogramInternal::new(&entries, crate::SRGB_GAMMA).unwrap()
}

#[test]
fn splits_clusters() {
    let mut hist = test_hist(&[(250, 0, 0), (255, 0, 0), (252, 2, 0), (0, 0, 250), (0, 3, 255), (1, 0, 252)]);
    let pal = mediancut(&mut hist, 2, 0., 0.).unwrap();
    assert_eq!(2, pal.len());
    let colors: Vec<_> = pal.as_slice().iter().map(|c| c.to_rgba(crate::SRGB_GAMMA)).collect();
    assert!(colors.iter().any(|c| c.r > 200 && c.b < 10));
    assert!(colors.iter().any(|c| c.b > 200 && c.r < 10));
    // items remember which box they went to
    for item in hist.items.iter() {
        assert!(usize::from(item.likely_palette_index) < 2);
    }
}

#[test]
fn stops_at_target() {
    let colors: Vec<_> = (0..=255u8).map(|i| (i, i / 2, 255 - i)).collect();
    let mut hist = test_hist(&colors);
    for target in [1, 2, 16, 100] {
        assert!(mediancut(&mut hist, target, 0., 0.).unwrap().len() <= target);
    }
    let mut hist = test_hist(&[(1, 2, 3), (200, 2, 3), (1, 200, 3)]);
    assert_eq!(3, mediancut(&mut hist, 5, 0., 0.).unwrap().len());
}
