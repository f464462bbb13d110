//! Template images for recorded clicks.

use std::collections::VecDeque;

use chrono::Local;
use image::{imageops, GrayImage};
use tracing::{debug, warn};

use clickscript::matching;
use clickscript::{CaptureConfig, Configuration, Screen, SearchError, TemplateDir, TemplateSource};

/// Pixels brighter than this belong to an element when cutting out a new template.
const ELEMENT_THRESHOLD: u8 = 40;

/// Bounding box `(x, y, width, height)` of a bright area.
type Bounds = (u32, u32, u32, u32);

/// Finds or creates the template image under a recorded click.
pub struct TemplateCapture {
    screen: Box<dyn Screen>,
    templates: TemplateDir,
    config: CaptureConfig,
    threshold: f32,
}

impl TemplateCapture {
    pub fn new(
        screen: impl Screen + 'static,
        templates: TemplateDir,
        config: CaptureConfig,
        threshold: f32,
    ) -> Self {
        Self {
            screen: Box::new(screen),
            templates,
            config,
            threshold,
        }
    }

    /// Uses the elements directory, capture sizes and local threshold of `config`.
    pub fn from_configuration(screen: impl Screen + 'static, config: &Configuration) -> Self {
        Self::new(
            screen,
            TemplateDir::new(&config.elements_dir),
            config.capture.clone(),
            config.search.local_threshold,
        )
    }

    pub fn templates(&self) -> &TemplateDir {
        &self.templates
    }

    /// Name of a saved template visible around `at`, or of a newly saved one.
    pub fn template_for(&self, at: (i32, i32)) -> Result<String, SearchError> {
        match self.find_existing(at)? {
            Some(name) => Ok(name),
            None => self.capture_new(at),
        }
    }

    /// Looks for a saved template inside the `first_region` square centred on `at`.
    pub fn find_existing(&self, at: (i32, i32)) -> Result<Option<String>, SearchError> {
        let names = self.templates.names();
        if names.is_empty() {
            return Ok(None);
        }
        let region = self.screen.capture_around(at, self.config.first_region)?;
        let Some(focus) = region.local(at) else {
            return Ok(None);
        };
        for name in names {
            match self.templates.load(&name) {
                Ok(template) => {
                    if matching::compare(&template, &region.image, focus, self.threshold) {
                        debug!("Click at ({}, {}) matches template {}", at.0, at.1, name);
                        return Ok(Some(name));
                    }
                }
                Err(e) => warn!("Skipping template {}: {}", name, e),
            }
        }
        Ok(None)
    }

    /// Saves the element under `at` under a timestamped name.
    ///
    /// The `region` square centred on `at` is thresholded and the bright
    /// area around the click is cut out. When no bright area contains the
    /// click, the whole square is saved.
    pub fn capture_new(&self, at: (i32, i32)) -> Result<String, SearchError> {
        let region = self.screen.capture_around(at, self.config.region)?;
        let Some(focus) = region.local(at) else {
            return Err(SearchError::Capture(format!(
                "({}, {}) is outside the screen",
                at.0, at.1
            )));
        };
        let image = match element_bounds(&region.image, focus) {
            Some((x, y, width, height)) => {
                debug!("Element at ({}, {}) is {}x{}", at.0, at.1, width, height);
                imageops::crop_imm(&region.image, x, y, width, height).to_image()
            }
            None => region.image,
        };
        let name = self.unused_name();
        self.templates.save(&name, &image)?;
        Ok(name)
    }

    fn unused_name(&self) -> String {
        let stem = format!(
            "{}_{}",
            self.config.basename,
            Local::now().format("%Y-%m-%d_%H-%M-%S")
        );
        let mut name = format!("{stem}.png");
        let mut n = 1;
        while self.templates.path().join(&name).exists() {
            name = format!("{stem}_{n}.png");
            n += 1;
        }
        name
    }
}

/// Bounds of the first bright area whose bounding box contains `point`.
///
/// Areas are 8-connected groups of pixels above [`ELEMENT_THRESHOLD`], found
/// in row order.
fn element_bounds(image: &GrayImage, point: (u32, u32)) -> Option<Bounds> {
    let (width, height) = image.dimensions();
    let active: Vec<bool> = image.pixels().map(|p| p.0[0] > ELEMENT_THRESHOLD).collect();
    let mut visited = vec![false; active.len()];

    for y in 0..height {
        for x in 0..width {
            let start = (y * width + x) as usize;
            if visited[start] || !active[start] {
                continue;
            }
            visited[start] = true;
            let mut queue = VecDeque::from([(x, y)]);
            let (mut minx, mut miny, mut maxx, mut maxy) = (x, y, x, y);

            while let Some((cx, cy)) = queue.pop_front() {
                minx = minx.min(cx);
                miny = miny.min(cy);
                maxx = maxx.max(cx);
                maxy = maxy.max(cy);
                for ny in cy.saturating_sub(1)..=(cy + 1).min(height - 1) {
                    for nx in cx.saturating_sub(1)..=(cx + 1).min(width - 1) {
                        let next = (ny * width + nx) as usize;
                        if active[next] && !visited[next] {
                            visited[next] = true;
                            queue.push_back((nx, ny));
                        }
                    }
                }
            }

            if (minx..=maxx).contains(&point.0) && (miny..=maxy).contains(&point.1) {
                return Some((minx, miny, maxx - minx + 1, maxy - miny + 1));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use clickscript::Region;
    use image::Luma;

    struct Solid(GrayImage);

    impl Screen for Solid {
        fn capture_region(&self, x: i32, y: i32, width: u32, height: u32) -> Result<Region, SearchError> {
            let image = GrayImage::from_pixel(width, height, *self.0.get_pixel(0, 0));
            Ok(Region::new(image, x, y))
        }

        fn capture_screen(&self) -> Result<GrayImage, SearchError> {
            Ok(self.0.clone())
        }
    }

    /// A fixed picture; requests are clipped to it.
    struct Picture(GrayImage);

    impl Screen for Picture {
        fn capture_region(&self, x: i32, y: i32, width: u32, height: u32) -> Result<Region, SearchError> {
            let (w, h) = (self.0.width() as i32, self.0.height() as i32);
            let (left, top) = (x.clamp(0, w), y.clamp(0, h));
            let right = (x + width as i32).clamp(0, w);
            let bottom = (y + height as i32).clamp(0, h);
            let crop = imageops::crop_imm(
                &self.0,
                left as u32,
                top as u32,
                (right - left) as u32,
                (bottom - top) as u32,
            );
            Ok(Region::new(crop.to_image(), left, top))
        }

        fn capture_screen(&self) -> Result<GrayImage, SearchError> {
            Ok(self.0.clone())
        }
    }

    /// Dark desktop with a 16x10 light button spanning (92..108, 95..105).
    fn desktop_with_button() -> GrayImage {
        GrayImage::from_fn(300, 200, |x, y| {
            if (92..108).contains(&x) && (95..105).contains(&y) {
                Luma([200])
            } else {
                Luma([20])
            }
        })
    }

    fn capture(dir: &std::path::Path, shade: u8) -> TemplateCapture {
        TemplateCapture::new(
            Solid(GrayImage::from_pixel(400, 400, Luma([shade]))),
            TemplateDir::new(dir),
            CaptureConfig::default(),
            0.85,
        )
    }

    #[test]
    fn test_new_template_is_saved_once_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let capture = capture(dir.path(), 90);

        let first = capture.template_for((100, 100)).unwrap();
        assert!(first.starts_with("elem_"));
        assert!(first.ends_with(".png"));
        let saved = capture.templates().load(&first).unwrap();
        assert_eq!(saved.dimensions(), (60, 60));

        let second = capture.template_for((150, 120)).unwrap();
        assert_eq!(first, second);
        assert_eq!(capture.templates().names().len(), 1);
    }

    #[test]
    fn test_different_element_gets_new_template() {
        let dir = tempfile::tempdir().unwrap();
        let dark = capture(dir.path(), 10).template_for((50, 50)).unwrap();
        let light = capture(dir.path(), 240).template_for((50, 50)).unwrap();
        assert_ne!(dark, light);
        assert_eq!(TemplateDir::new(dir.path()).names().len(), 2);
    }

    #[test]
    fn test_new_template_is_cut_to_the_clicked_element() {
        let dir = tempfile::tempdir().unwrap();
        let capture = TemplateCapture::new(
            Picture(desktop_with_button()),
            TemplateDir::new(dir.path()),
            CaptureConfig::default(),
            0.85,
        );

        let name = capture.capture_new((100, 100)).unwrap();
        let saved = capture.templates().load(&name).unwrap();
        assert_eq!(saved.dimensions(), (16, 10));
        assert!(saved.pixels().all(|p| p.0[0] == 200));

        // A click on the dark background keeps the whole square.
        let name = capture.capture_new((200, 150)).unwrap();
        let saved = capture.templates().load(&name).unwrap();
        assert_eq!(saved.dimensions(), (60, 60));
    }

    #[test]
    fn test_element_bounds_cover_ring_around_click() {
        let ring = GrayImage::from_fn(30, 30, |x, y| {
            let on_border = x == 5 || x == 14 || y == 5 || y == 14;
            if (5..15).contains(&x) && (5..15).contains(&y) && on_border {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        assert_eq!(element_bounds(&ring, (10, 10)), Some((5, 5, 10, 10)));
        assert_eq!(element_bounds(&ring, (20, 20)), None);
    }
}
