use crate::error::Error;
use crate::hist::{HistItem, HistogramInternal};
use crate::nearest::Nearest;
use crate::pal::{FPixel, PalF};
use rgb::alt::ARGB;
use rgb::ComponentMap;
use std::cell::RefCell;

#[cfg(not(feature = "threads"))]
use crate::rayoff::*;
#[cfg(feature = "threads")]
use rayon::prelude::*;
#[cfg(feature = "threads")]
use thread_local::ThreadLocal;

pub(crate) struct Kmeans {
    averages: Vec<ColorAvg>,
    weighed_diff_sum: f64,
}

#[derive(Copy, Clone, Default)]
struct ColorAvg {
    pub sum: ARGB<f64>,
    pub total: f64,
}

/// K-Means iteration: new palette color is computed from weighted average of colors that map best to that palette entry.
impl Kmeans {
    #[inline]
    pub fn new(pal_len: usize) -> Result<Self, Error> {
        let mut averages = Vec::new();
        averages.try_reserve_exact(pal_len)?;
        averages.resize(pal_len, ColorAvg::default());
        Ok(Self {
            averages,
            weighed_diff_sum: 0.,
        })
    }

    #[inline]
    pub fn update_color(&mut self, px: FPixel, value: f32, matched: u8) {
        let c = &mut self.averages[usize::from(matched)];
        c.sum += (px.0 * value).map(f64::from);
        c.total += f64::from(value);
    }

    pub fn finalize(self, palette: &mut PalF) -> f64 {
        for (avg, (color, pop)) in self.averages.iter().zip(palette.iter_mut()) {
            let total = avg.total;
            *pop = total as f32;
            if total > 0. {
                *color = avg.sum.map(move |c| (c / total) as f32).into();
            }
        }
        self.weighed_diff_sum
    }

    /// Moves every palette entry to the mean of the colors closest to it. Returns the error from before the move.
    ///
    /// With `adjust_weight`, colors that are served badly get more weight in the next median cut.
    #[inline(never)]
    pub(crate) fn iteration(hist: &mut HistogramInternal, palette: &mut PalF, adjust_weight: bool) -> Result<f64, Error> {
        if hist.items.is_empty() {
            return Ok(0.);
        }

        let n = Nearest::new(palette.as_slice())?;
        let colors = palette.as_slice();
        let len = colors.len();

        let tls = ThreadLocal::new();
        let total = hist.total_perceptual_weight;

        // chunk size is a trade-off between parallelization and overhead
        hist.items.par_chunks_mut(256).for_each(|batch| {
            let kmeans = tls.get_or(move || RefCell::new(Kmeans::new(len)));
            if let Ok(ref mut kmeans) = *kmeans.borrow_mut() {
                kmeans.iterate_batch(batch, &n, colors, adjust_weight);
            }
        });

        let diff = tls.into_iter()
            .map(RefCell::into_inner)
            .reduce(Kmeans::try_merge)
            .transpose()?
            .map(|kmeans| kmeans.finalize(palette) / total)
            .unwrap_or(0.);

        // entries nothing mapped to get any histogram color instead, it's too rare to be smarter about it
        palette.iter_mut()
            .filter(|(_, pop)| **pop == 0.)
            .zip(hist.items.iter())
            .for_each(|((color, _), item)| *color = item.color);
        Ok(diff)
    }

    fn iterate_batch(&mut self, batch: &mut [HistItem], n: &Nearest<'_>, colors: &[FPixel], adjust_weight: bool) {
        self.weighed_diff_sum += batch.iter_mut().map(|item| {
            let px = item.color;
            let (matched, mut diff) = n.search(&px, item.likely_palette_index);
            item.likely_palette_index = matched;
            if adjust_weight {
                let remapped = colors[usize::from(matched)];
                let (_, overshoot_diff) = n.search(&FPixel(px.0 + px.0 - remapped.0), matched);
                diff = overshoot_diff;
                item.adjusted_weight = (item.perceptual_weight + 2. * item.adjusted_weight) * (0.5 + diff);
            }
            debug_assert!(f64::from(diff) < 1e20);
            self.update_color(px, item.adjusted_weight, matched);
            f64::from(diff * item.perceptual_weight)
        }).sum::<f64>();
    }

    #[inline]
    pub fn merge(mut self, new: Kmeans) -> Kmeans {
        self.weighed_diff_sum += new.weighed_diff_sum;
        self.averages.iter_mut().zip(new.averages).for_each(|(p, n)| {
            p.sum += n.sum;
            p.total += n.total;
        });
        self
    }

    #[inline]
    pub fn try_merge<E>(old: Result<Self, E>, new: Result<Self, E>) -> Result<Self, E> {
        match (old, new) {
            (Ok(old), Ok(new)) => Ok(Kmeans::merge(old, new)),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }
}

/// Mean error of the histogram mapped to the palette, without changing either
pub(crate) fn palette_error(hist: &HistogramInternal, palette: &PalF) -> Result<f64, Error> {
    if hist.total_perceptual_weight <= 0. {
        return Ok(0.);
    }
    let n = Nearest::new(palette.as_slice())?;
    let sum: f64 = hist.items.iter()
        .map(|item| f64::from(n.search(&item.color, item.likely_palette_index).1 * item.perceptual_weight))
        .sum();
    Ok(sum / hist.total_perceptual_weight)
}

#[cfg(test)]
fn two_color_hist() -> HistogramInternal {
    use crate::{HistogramEntry, RGBA};
    HistogramInternal::new(&[
        HistogramEntry { color: RGBA::new(100, 100, 100, 255), count: 1 },
        HistogramEntry { color: RGBA::new(110, 100, 100, 255), count: 1 },
    ], crate::SRGB_GAMMA).unwrap()
}

#[test]
fn moves_to_mean() {
    let mut hist = two_color_hist();
    let mut palette = PalF::new();
    palette.push(hist.items[0].color, 1.);
    let before = Kmeans::iteration(&mut hist, &mut palette, false).unwrap();
    assert!(before > 0.);
    let mean = FPixel((hist.items[0].color.0 + hist.items[1].color.0) * 0.5);
    assert!(palette.as_slice()[0].diff(&mean) < 1e-10);
    assert!(palette_error(&hist, &palette).unwrap() < before);
}

#[test]
fn replaces_unused_entries() {
    let mut hist = two_color_hist();
    let mut palette = PalF::new();
    palette.push(hist.items[0].color, 1.);
    palette.push(FPixel::default(), 1.);
    palette.push(hist.items[1].color, 1.);
    Kmeans::iteration(&mut hist, &mut palette, true).unwrap();
    assert!(palette.pops()[1] == 0.);
    assert_ne!(FPixel::default(), palette.as_slice()[1]);
}
