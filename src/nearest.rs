use crate::error::Error;
use crate::pal::{FPixel, MAX_COLORS};
use crate::OrdFloat;

/// Nearest-color lookup over a palette, organized as a vantage-point tree
pub(crate) struct Nearest<'pal> {
    root: Node,
    colors: &'pal [FPixel],
    /// Quarter of the squared distance to the closest other entry. A pixel closer than that can't match anything better.
    nearest_other_color_dist: [f32; MAX_COLORS],
}

impl<'pal> Nearest<'pal> {
    #[inline(never)]
    pub fn new(colors: &'pal [FPixel]) -> Result<Self, Error> {
        if colors.is_empty() || colors.len() > MAX_COLORS {
            return Err(Error::Unsupported);
        }
        let mut indexes: Vec<u8> = Vec::new();
        indexes.try_reserve_exact(colors.len())?;
        indexes.extend((0..colors.len()).map(|i| i as u8));

        let mut handle = Nearest {
            root: vp_create_node(&mut indexes, colors),
            colors,
            nearest_other_color_dist: [0.; MAX_COLORS],
        };
        for (i, color) in colors.iter().enumerate() {
            let mut best = Visitor {
                idx: 0, distance: f32::MAX, distance_squared: f32::MAX,
                exclude: Some(i as u8),
            };
            vp_search_node(&handle.root, color, &mut best);
            handle.nearest_other_color_dist[i] = best.distance_squared / 4.;
        }
        Ok(handle)
    }

    /// Index of the closest palette entry and its squared distance.
    ///
    /// `likely_index` is only a hint for speed, and may be out of range.
    #[inline]
    pub fn search(&self, px: &FPixel, likely_index: u8) -> (u8, f32) {
        let mut best_candidate = if let Some(guess) = self.colors.get(usize::from(likely_index)) {
            let guess_diff = px.diff(guess);
            if guess_diff < self.nearest_other_color_dist[usize::from(likely_index)] {
                return (likely_index, guess_diff);
            }
            Visitor {
                distance: guess_diff.sqrt(),
                distance_squared: guess_diff,
                idx: likely_index,
                exclude: None,
            }
        } else {
            Visitor { distance: f32::INFINITY, distance_squared: f32::INFINITY, idx: 0, exclude: None }
        };

        vp_search_node(&self.root, px, &mut best_candidate);
        (best_candidate.idx, best_candidate.distance_squared)
    }
}

struct Visitor {
    distance: f32,
    distance_squared: f32,
    idx: u8,
    exclude: Option<u8>,
}

impl Visitor {
    #[inline]
    fn visit(&mut self, distance: f32, distance_squared: f32, idx: u8) {
        if distance_squared < self.distance_squared && self.exclude != Some(idx) {
            self.distance = distance;
            self.distance_squared = distance_squared;
            self.idx = idx;
        }
    }
}

struct Node {
    vantage_point: FPixel,
    idx: u8,
    inner: NodeInner,
}

const LEAF_MAX_SIZE: usize = 6;

enum NodeInner {
    Nodes {
        radius: f32,
        radius_squared: f32,
        near: Box<Node>,
        far: Box<Node>,
    },
    Leaf {
        len: u8,
        idxs: [u8; LEAF_MAX_SIZE],
        colors: [FPixel; LEAF_MAX_SIZE],
    },
}

fn vp_create_node(indexes: &mut [u8], palette: &[FPixel]) -> Node {
    debug_assert!(!indexes.is_empty());
    let (&mut vantage_idx, rest) = match indexes.split_first_mut() {
        Some(split) => split,
        None => unreachable!(),
    };
    let vantage_point = palette[usize::from(vantage_idx)];
    rest.sort_unstable_by_key(|&i| OrdFloat::new(vantage_point.diff(&palette[usize::from(i)])));

    let inner = if rest.len() <= LEAF_MAX_SIZE {
        let mut idxs = [0; LEAF_MAX_SIZE];
        let mut colors = [FPixel::default(); LEAF_MAX_SIZE];
        for (&i, (idx, color)) in rest.iter().zip(idxs.iter_mut().zip(colors.iter_mut())) {
            *idx = i;
            *color = palette[usize::from(i)];
        }
        NodeInner::Leaf { len: rest.len() as u8, idxs, colors }
    } else {
        let (near, far) = rest.split_at_mut(rest.len() / 2);
        let radius_squared = vantage_point.diff(&palette[usize::from(far[0])]);
        NodeInner::Nodes {
            radius: radius_squared.sqrt(),
            radius_squared,
            near: Box::new(vp_create_node(near, palette)),
            far: Box::new(vp_create_node(far, palette)),
        }
    };
    Node { vantage_point, idx: vantage_idx, inner }
}

fn vp_search_node(mut node: &Node, needle: &FPixel, best_candidate: &mut Visitor) {
    loop {
        let distance_squared = node.vantage_point.diff(needle);
        let distance = distance_squared.sqrt();

        best_candidate.visit(distance, distance_squared, node.idx);

        match node.inner {
            NodeInner::Nodes { radius, radius_squared, ref near, ref far } => {
                // the likelier side first, so that the other one can usually be skipped
                if distance_squared < radius_squared {
                    vp_search_node(near, needle, best_candidate);
                    if distance >= radius - best_candidate.distance {
                        node = far;
                        continue;
                    }
                } else {
                    vp_search_node(far, needle, best_candidate);
                    if distance <= radius + best_candidate.distance {
                        node = near;
                        continue;
                    }
                }
                break;
            },
            NodeInner::Leaf { len, ref idxs, ref colors } => {
                for (color, &idx) in colors.iter().zip(idxs.iter()).take(usize::from(len)) {
                    let distance_squared = color.diff(needle);
                    best_candidate.visit(distance_squared.sqrt(), distance_squared, idx);
                }
                break;
            },
        }
    }
}

#[cfg(test)]
fn gray_palette(n: usize) -> Vec<FPixel> {
    let lut = crate::pal::gamma_lut(crate::SRGB_GAMMA);
    (0..n).map(|i| FPixel::from_rgba(&lut, crate::RGBA::new((i * 255 / n.max(2).saturating_sub(1)) as u8, 0, 0, 255))).collect()
}

#[test]
fn matches_linear_scan() {
    let lut = crate::pal::gamma_lut(crate::SRGB_GAMMA);
    let colors: Vec<FPixel> = (0..40u8).map(|i| FPixel::from_rgba(&lut, crate::RGBA::new(i.wrapping_mul(37), i.wrapping_mul(91), i.wrapping_mul(13), 255))).collect();
    let n = Nearest::new(&colors).unwrap();
    for px in (0..=255u8).step_by(5) {
        let needle = FPixel::from_rgba(&lut, crate::RGBA::new(px, 255 - px, px / 3, 255));
        let best = colors.iter().map(|c| needle.diff(c)).fold(f32::INFINITY, f32::min);
        for guess in [0, 7, 39, 200] {
            let (idx, diff) = n.search(&needle, guess);
            assert_eq!(best, diff);
            assert_eq!(best, needle.diff(&colors[usize::from(idx)]));
        }
    }
}

#[test]
fn exact_hit() {
    let colors = gray_palette(20);
    let n = Nearest::new(&colors).unwrap();
    for (i, c) in colors.iter().enumerate() {
        assert_eq!((i as u8, 0.), n.search(c, 0));
    }
}

#[test]
fn rejects_bad_sizes() {
    assert_eq!(Some(Error::Unsupported), Nearest::new(&[]).err());
    let colors = vec![FPixel::default(); MAX_COLORS + 1];
    assert_eq!(Some(Error::Unsupported), Nearest::new(&colors).err());
}
