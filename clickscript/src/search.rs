//! Template search: confirm an element at its expected position, retrying
//! locally and falling back to a full-screen search.

use image::GrayImage;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::SearchPolicy;
use crate::errors::SearchError;
use crate::matching;
use crate::signal::StopSignal;

/// Pause between two local attempts.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Part of a screenshot and the screen position of its top-left pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub image: GrayImage,
    pub x: i32,
    pub y: i32,
}

impl Region {
    pub fn new(image: GrayImage, x: i32, y: i32) -> Self {
        Self { image, x, y }
    }

    /// Pixel coordinates of the screen point `at`, or `None` outside the image.
    pub fn local(&self, at: (i32, i32)) -> Option<(u32, u32)> {
        let x = u32::try_from(at.0 - self.x).ok()?;
        let y = u32::try_from(at.1 - self.y).ok()?;
        (x < self.image.width() && y < self.image.height()).then_some((x, y))
    }
}

/// Grayscale screenshots.
pub trait Screen: Send + Sync {
    /// Rectangle with its top-left corner at `(x, y)`. Parts outside the
    /// screen are clipped, so the returned corner may differ from the
    /// requested one. A rectangle entirely off screen comes back empty.
    fn capture_region(&self, x: i32, y: i32, width: u32, height: u32) -> Result<Region, SearchError>;

    fn capture_screen(&self) -> Result<GrayImage, SearchError>;

    /// Square of side `side` centred on `at`.
    fn capture_around(&self, at: (i32, i32), side: u32) -> Result<Region, SearchError> {
        let half = (side / 2) as i32;
        self.capture_region(at.0 - half, at.1 - half, side, side)
    }
}

/// Where template images come from.
pub trait TemplateSource: Send + Sync {
    /// Fails with [`SearchError::TemplateMissing`] when no such template exists.
    fn load(&self, name: &str) -> Result<GrayImage, SearchError>;
}

/// Templates stored as image files in one directory.
#[derive(Debug, Clone)]
pub struct TemplateDir {
    dir: PathBuf,
}

impl TemplateDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Names of all PNG templates, sorted.
    pub fn names(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
            })
            .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        names.sort();
        names
    }

    pub fn save(&self, name: &str, image: &GrayImage) -> Result<PathBuf, SearchError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            SearchError::Capture(format!("failed to create {}: {e}", self.dir.display()))
        })?;
        let path = self.dir.join(name);
        image
            .save(&path)
            .map_err(|e| SearchError::Capture(format!("failed to save {}: {e}", path.display())))?;
        info!("Saved template {}", path.display());
        Ok(path)
    }
}

impl TemplateSource for TemplateDir {
    fn load(&self, name: &str) -> Result<GrayImage, SearchError> {
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(SearchError::TemplateMissing(name.to_string()));
        }
        image::open(&path)
            .map(|image| image.to_luma8())
            .map_err(|e| SearchError::TemplateMissing(format!("{name}: {e}")))
    }
}

/// Resolves where a click should land.
pub trait Locate: Send + Sync {
    fn locate(
        &self,
        template: Option<&str>,
        expected: (i32, i32),
        policy: &SearchPolicy,
        stop: &StopSignal,
    ) -> Result<(i32, i32), SearchError>;
}

impl<L: Locate + ?Sized> Locate for &L {
    fn locate(
        &self,
        template: Option<&str>,
        expected: (i32, i32),
        policy: &SearchPolicy,
        stop: &StopSignal,
    ) -> Result<(i32, i32), SearchError> {
        (**self).locate(template, expected, policy, stop)
    }
}

impl<L: Locate + ?Sized> Locate for Box<L> {
    fn locate(
        &self,
        template: Option<&str>,
        expected: (i32, i32),
        policy: &SearchPolicy,
        stop: &StopSignal,
    ) -> Result<(i32, i32), SearchError> {
        (**self).locate(template, expected, policy, stop)
    }
}

/// Accepts every click where it was recorded. Used for dry runs and when no
/// screen is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unverified;

impl Locate for Unverified {
    fn locate(
        &self,
        _template: Option<&str>,
        expected: (i32, i32),
        _policy: &SearchPolicy,
        _stop: &StopSignal,
    ) -> Result<(i32, i32), SearchError> {
        Ok(expected)
    }
}

/// The template name to verify, or `None` for an unverified click.
fn verified_template<'a>(template: Option<&'a str>, policy: &SearchPolicy) -> Option<&'a str> {
    template
        .map(str::trim)
        .filter(|name| !name.is_empty() && policy.retry_count > 0)
}

/// Screen-backed search.
pub struct TemplateSearch<S, T> {
    screen: S,
    templates: T,
}

impl<S: Screen, T: TemplateSource> TemplateSearch<S, T> {
    pub fn new(screen: S, templates: T) -> Self {
        Self { screen, templates }
    }

    fn check_locally(
        &self,
        name: &str,
        template: &GrayImage,
        expected: (i32, i32),
        policy: &SearchPolicy,
        stop: &StopSignal,
    ) -> Result<bool, SearchError> {
        for attempt in 1..=policy.retry_count {
            if stop.is_stopped() {
                return Err(SearchError::Cancelled);
            }
            let region = self.screen.capture_around(expected, policy.region_size)?;
            let confirmed = region.local(expected).is_some_and(|focus| {
                matching::compare(template, &region.image, focus, policy.local_threshold)
            });
            if confirmed {
                debug!(
                    "Template {} confirmed at ({}, {}) on attempt {}",
                    name, expected.0, expected.1, attempt
                );
                return Ok(true);
            }
            debug!(
                "Template {} not at ({}, {}), attempt {}/{}",
                name, expected.0, expected.1, attempt, policy.retry_count
            );
            if attempt < policy.retry_count && !stop.sleep(RETRY_BACKOFF) {
                return Err(SearchError::Cancelled);
            }
        }
        Ok(false)
    }
}

impl<S: Screen, T: TemplateSource> Locate for TemplateSearch<S, T> {
    fn locate(
        &self,
        template: Option<&str>,
        expected: (i32, i32),
        policy: &SearchPolicy,
        stop: &StopSignal,
    ) -> Result<(i32, i32), SearchError> {
        let Some(name) = verified_template(template, policy) else {
            return Ok(expected);
        };
        let image = self.templates.load(name)?;

        if policy.local_check && self.check_locally(name, &image, expected, policy, stop)? {
            return Ok(expected);
        }

        if !policy.full_screen {
            return Err(SearchError::ElementNotFound(format!(
                "{name} not found near ({}, {}); full-screen search is disabled",
                expected.0, expected.1
            )));
        }
        if stop.is_stopped() {
            return Err(SearchError::Cancelled);
        }

        let screen = self.screen.capture_screen()?;
        match matching::locate(&image, &screen, policy.screen_threshold) {
            Some(found) => {
                info!(
                    "Template {} relocated from ({}, {}) to ({}, {})",
                    name, expected.0, expected.1, found.0, found.1
                );
                Ok(found)
            }
            None => {
                warn!("Template {} not found on screen", name);
                Err(SearchError::ElementNotFound(format!("{name} not found on screen")))
            }
        }
    }
}

/// Succeeds when the wrapped search fails to find the element, and fails
/// when it succeeds. Unverified clicks pass through untouched.
pub struct Inverted<L>(pub L);

impl<L: Locate> Locate for Inverted<L> {
    fn locate(
        &self,
        template: Option<&str>,
        expected: (i32, i32),
        policy: &SearchPolicy,
        stop: &StopSignal,
    ) -> Result<(i32, i32), SearchError> {
        let Some(name) = verified_template(template, policy) else {
            return Ok(expected);
        };
        match self.0.locate(Some(name), expected, policy, stop) {
            Ok(found) => Err(SearchError::ElementPresent(format!(
                "{name} is present at ({}, {})",
                found.0, found.1
            ))),
            Err(SearchError::ElementNotFound(_)) => Ok(expected),
            Err(other) => Err(other),
        }
    }
}
