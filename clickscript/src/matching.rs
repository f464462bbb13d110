//! Grayscale template comparison.
//!
//! Correlation is the normalized cross-correlation coefficient
//! (zero-mean template against zero-mean window). A template of a single
//! colour has no variance, so it is matched as an exact colour block instead.

use image::imageops::{self, FilterType};
use image::{GenericImageView, GrayImage};

/// Template positions times template pixels above which a search runs on a
/// downscaled copy first.
const DIRECT_SEARCH_BUDGET: u64 = 40_000_000;
/// Minimum template side kept after downscaling.
const MIN_COARSE_SIDE: u32 = 12;
const MAX_SCALE: u32 = 8;
/// Coarse candidates refined at full resolution.
const REFINE_CANDIDATES: usize = 5;

/// Best template position inside an image (top-left corner).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

impl Match {
    /// Centre of the matched region.
    pub fn center(&self, template: &GrayImage) -> (i32, i32) {
        (
            (self.x + template.width() / 2) as i32,
            (self.y + template.height() / 2) as i32,
        )
    }
}

/// The single colour of a solid template.
pub fn uniform_color(image: &GrayImage) -> Option<u8> {
    let mut pixels = image.pixels();
    let first = pixels.next()?.0[0];
    pixels.all(|p| p.0[0] == first).then_some(first)
}

/// Whether `template` appears in `image`.
///
/// Solid templates compare against the template-sized crop centred on
/// `focus`; every pixel must equal the template colour, and a crop that
/// would leave the image fails.
pub fn compare(template: &GrayImage, image: &GrayImage, focus: (u32, u32), threshold: f32) -> bool {
    let (tw, th) = template.dimensions();
    if tw > image.width() || th > image.height() {
        return false;
    }
    if let Some(color) = uniform_color(template) {
        let (Some(x), Some(y)) = (focus.0.checked_sub(tw / 2), focus.1.checked_sub(th / 2)) else {
            return false;
        };
        if x + tw > image.width() || y + th > image.height() {
            return false;
        }
        let crop = imageops::crop_imm(image, x, y, tw, th);
        return crop.pixels().all(|(_, _, p)| p.0[0] == color);
    }
    best_match(template, image).is_some_and(|m| m.score >= threshold)
}

/// Locates `template` anywhere in `image`, returning the matched centre.
pub fn locate(template: &GrayImage, image: &GrayImage, threshold: f32) -> Option<(i32, i32)> {
    if let Some(color) = uniform_color(template) {
        return find_block(template.width(), template.height(), color, image)
            .map(|(x, y)| ((x + template.width() / 2) as i32, (y + template.height() / 2) as i32));
    }
    best_match(template, image)
        .filter(|m| m.score >= threshold)
        .map(|m| m.center(template))
}

/// Highest-correlation position of a non-solid template.
pub fn best_match(template: &GrayImage, image: &GrayImage) -> Option<Match> {
    let (tw, th) = template.dimensions();
    let (iw, ih) = image.dimensions();
    if tw == 0 || th == 0 || tw > iw || th > ih {
        return None;
    }
    let positions = u64::from(iw - tw + 1) * u64::from(ih - th + 1);
    let work = positions * u64::from(tw) * u64::from(th);
    let scale = coarse_scale(tw, th);
    if work <= DIRECT_SEARCH_BUDGET || scale == 1 {
        let prepared = Prepared::new(template)?;
        let integral = Integral::new(image);
        return scan(&prepared, image, &integral, 0..=iw - tw, 0..=ih - th, 1)
            .into_iter()
            .next();
    }
    coarse_to_fine(template, image, scale)
}

fn coarse_scale(tw: u32, th: u32) -> u32 {
    (tw.min(th) / MIN_COARSE_SIDE).clamp(1, MAX_SCALE)
}

fn coarse_to_fine(template: &GrayImage, image: &GrayImage, scale: u32) -> Option<Match> {
    let small_template = imageops::resize(
        template,
        template.width() / scale,
        template.height() / scale,
        FilterType::Triangle,
    );
    let small_image = imageops::resize(
        image,
        image.width() / scale,
        image.height() / scale,
        FilterType::Triangle,
    );
    let (stw, sth) = small_template.dimensions();
    let (siw, sih) = small_image.dimensions();
    if stw > siw || sth > sih {
        return None;
    }

    let full = Prepared::new(template)?;
    let integral = Integral::new(image);
    let (tw, th) = template.dimensions();
    let (iw, ih) = image.dimensions();

    let candidates = match Prepared::new(&small_template) {
        Some(coarse) => {
            let small_integral = Integral::new(&small_image);
            scan(
                &coarse,
                &small_image,
                &small_integral,
                0..=siw - stw,
                0..=sih - sth,
                REFINE_CANDIDATES,
            )
        }
        // Downscaling flattened the template; fall back to a full scan.
        None => {
            return scan(&full, image, &integral, 0..=iw - tw, 0..=ih - th, 1)
                .into_iter()
                .next()
        }
    };

    candidates
        .into_iter()
        .filter_map(|candidate| {
            let cx = candidate.x * scale;
            let cy = candidate.y * scale;
            let x0 = cx.saturating_sub(scale);
            let y0 = cy.saturating_sub(scale);
            let x1 = (cx + scale).min(iw - tw);
            let y1 = (cy + scale).min(ih - th);
            scan(&full, image, &integral, x0..=x1, y0..=y1, 1)
                .into_iter()
                .next()
        })
        .max_by(|a, b| a.score.total_cmp(&b.score))
}

/// Zero-mean template and its norm.
struct Prepared {
    width: u32,
    height: u32,
    values: Vec<f64>,
    norm: f64,
}

impl Prepared {
    /// `None` for templates without variance.
    fn new(template: &GrayImage) -> Option<Self> {
        let n = f64::from(template.width() * template.height());
        let mean = template.pixels().map(|p| f64::from(p.0[0])).sum::<f64>() / n;
        let values: Vec<f64> = template.pixels().map(|p| f64::from(p.0[0]) - mean).collect();
        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        (norm > f64::EPSILON).then_some(Self {
            width: template.width(),
            height: template.height(),
            values,
            norm,
        })
    }
}

/// Summed-area tables of pixel values and squared values.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    squares: Vec<f64>,
}

impl Integral {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut squares = vec![0.0; stride * (h + 1)];
        for y in 0..h {
            let mut row_sum = 0.0;
            let mut row_squares = 0.0;
            for x in 0..w {
                let v = f64::from(image.get_pixel(x as u32, y as u32).0[0]);
                row_sum += v;
                row_squares += v * v;
                let at = (y + 1) * stride + x + 1;
                sum[at] = sum[y * stride + x + 1] + row_sum;
                squares[at] = squares[y * stride + x + 1] + row_squares;
            }
        }
        Self {
            stride,
            sum,
            squares,
        }
    }

    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x, y, w, h) = (x as usize, y as usize, w as usize, h as usize);
        let a = y * self.stride + x;
        let b = y * self.stride + x + w;
        let c = (y + h) * self.stride + x;
        let d = (y + h) * self.stride + x + w;
        (
            self.sum[d] - self.sum[b] - self.sum[c] + self.sum[a],
            self.squares[d] - self.squares[b] - self.squares[c] + self.squares[a],
        )
    }
}

/// Scores every position in the ranges and keeps the `keep` best.
fn scan(
    template: &Prepared,
    image: &GrayImage,
    integral: &Integral,
    xs: std::ops::RangeInclusive<u32>,
    ys: std::ops::RangeInclusive<u32>,
    keep: usize,
) -> Vec<Match> {
    let n = f64::from(template.width * template.height);
    let mut best: Vec<Match> = Vec::with_capacity(keep + 1);
    for y in ys {
        for x in xs.clone() {
            let (sum, squares) = integral.window(x, y, template.width, template.height);
            let variance = squares - sum * sum / n;
            if variance <= f64::EPSILON {
                continue;
            }
            let mut cross = 0.0;
            let mut values = template.values.iter();
            for ty in 0..template.height {
                for tx in 0..template.width {
                    let t = values.next().copied().unwrap_or_default();
                    cross += t * f64::from(image.get_pixel(x + tx, y + ty).0[0]);
                }
            }
            let score = (cross / (template.norm * variance.sqrt())) as f32;
            if best.len() < keep || best.last().is_some_and(|worst| score > worst.score) {
                best.push(Match { x, y, score });
                best.sort_by(|a, b| b.score.total_cmp(&a.score));
                best.truncate(keep);
            }
        }
    }
    best
}

/// First top-left position of a solid `width`×`height` block of `color`.
fn find_block(width: u32, height: u32, color: u8, image: &GrayImage) -> Option<(u32, u32)> {
    let (iw, ih) = image.dimensions();
    if width > iw || height > ih {
        return None;
    }
    let integral = Integral::new(image);
    let n = f64::from(width * height);
    let c = f64::from(color);
    for y in 0..=ih - height {
        for x in 0..=iw - width {
            let (sum, squares) = integral.window(x, y, width, height);
            if (sum - c * n).abs() < 0.5 && (squares - c * c * n).abs() < 0.5 {
                return Some((x, y));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Deterministic texture so correlation has something to lock onto.
    fn textured(width: u32, height: u32, seed: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let v = (x.wrapping_mul(37) ^ y.wrapping_mul(91)).wrapping_add(seed.wrapping_mul(13));
            Luma([(v % 251) as u8])
        })
    }

    #[test]
    fn test_uniform_template_matches_same_color_region() {
        let template = GrayImage::from_pixel(10, 10, Luma([200]));
        let region = GrayImage::from_pixel(40, 40, Luma([200]));
        assert!(best_match(&template, &region).is_none());
        assert!(compare(&template, &region, (20, 20), 0.85));
    }

    #[test]
    fn test_uniform_template_checks_only_centered_crop() {
        let template = GrayImage::from_pixel(10, 10, Luma([50]));
        let mut region = GrayImage::from_pixel(30, 30, Luma([50]));
        region.put_pixel(0, 0, Luma([0]));
        assert!(compare(&template, &region, (15, 15), 0.85));
        region.put_pixel(15, 15, Luma([51]));
        assert!(!compare(&template, &region, (15, 15), 0.85));
    }

    #[test]
    fn test_uniform_template_follows_focus() {
        // Clipped capture: the block sits in the corner, not the middle.
        let region = GrayImage::from_fn(55, 55, |x, y| {
            if x < 10 && y < 10 {
                Luma([255])
            } else {
                Luma([40])
            }
        });
        let template = GrayImage::from_pixel(10, 10, Luma([255]));
        assert!(compare(&template, &region, (5, 5), 0.85));
        assert!(!compare(&template, &region, (27, 27), 0.85));
        assert!(!compare(&template, &region, (2, 2), 0.85));
    }

    #[test]
    fn test_textured_template_found_at_its_position() {
        let image = textured(80, 60, 1);
        let template = imageops::crop_imm(&image, 23, 17, 16, 12).to_image();
        let found = best_match(&template, &image).unwrap();
        assert_eq!((found.x, found.y), (23, 17));
        assert!(found.score > 0.99);
        assert_eq!(locate(&template, &image, 0.8), Some((31, 23)));
    }

    #[test]
    fn test_missing_template_scores_below_threshold() {
        let image = GrayImage::from_fn(60, 60, |x, _| Luma([(x * 4) as u8]));
        let template = textured(12, 12, 7);
        assert!(!compare(&template, &image, (30, 30), 0.85));
    }

    #[test]
    fn test_template_larger_than_image() {
        let image = textured(10, 10, 1);
        let template = textured(20, 20, 1);
        assert!(!compare(&template, &image, (5, 5), 0.5));
        assert!(locate(&template, &image, 0.5).is_none());
    }

    #[test]
    fn test_find_solid_block_on_screen() {
        let mut screen = textured(50, 50, 3);
        for y in 30..36 {
            for x in 10..18 {
                screen.put_pixel(x, y, Luma([255]));
            }
        }
        let template = GrayImage::from_pixel(8, 6, Luma([255]));
        assert_eq!(locate(&template, &screen, 0.8), Some((14, 33)));
    }
}
