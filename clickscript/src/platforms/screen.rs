use image::{DynamicImage, GrayImage};
use tracing::debug;
use xcap::Monitor;

use crate::errors::SearchError;
use crate::search::{Region, Screen};

/// Screenshots of the primary monitor through `xcap`.
#[derive(Debug, Default, Clone, Copy)]
pub struct XcapScreen;

impl XcapScreen {
    pub fn new() -> Self {
        Self
    }

    fn primary_monitor() -> Result<Monitor, SearchError> {
        let monitors = Monitor::all()
            .map_err(|e| SearchError::Capture(format!("Failed to get monitors: {e}")))?;
        for monitor in monitors {
            match monitor.is_primary() {
                Ok(true) => return Ok(monitor),
                Ok(false) => continue,
                Err(e) => {
                    return Err(SearchError::Capture(format!(
                        "Error checking monitor primary status: {e}"
                    )))
                }
            }
        }
        Err(SearchError::Capture("Could not find primary monitor".to_string()))
    }
}

impl Screen for XcapScreen {
    fn capture_region(&self, x: i32, y: i32, width: u32, height: u32) -> Result<Region, SearchError> {
        let monitor = Self::primary_monitor()?;
        let origin_x = monitor
            .x()
            .map_err(|e| SearchError::Capture(format!("Failed to get monitor x: {e}")))?;
        let origin_y = monitor
            .y()
            .map_err(|e| SearchError::Capture(format!("Failed to get monitor y: {e}")))?;
        let monitor_width = monitor
            .width()
            .map_err(|e| SearchError::Capture(format!("Failed to get monitor width: {e}")))?;
        let monitor_height = monitor
            .height()
            .map_err(|e| SearchError::Capture(format!("Failed to get monitor height: {e}")))?;

        // Clip the requested square to the monitor.
        let left = (x - origin_x).clamp(0, monitor_width as i32) as u32;
        let top = (y - origin_y).clamp(0, monitor_height as i32) as u32;
        let right = (x - origin_x + width as i32).clamp(0, monitor_width as i32) as u32;
        let bottom = (y - origin_y + height as i32).clamp(0, monitor_height as i32) as u32;
        if right <= left || bottom <= top {
            debug!("Region at ({}, {}) is outside the screen", x, y);
            return Ok(Region::new(GrayImage::new(0, 0), x, y));
        }

        debug!("Capturing {}x{} at ({}, {})", right - left, bottom - top, left, top);
        let capture = monitor
            .capture_region(left, top, right - left, bottom - top)
            .map_err(|e| SearchError::Capture(format!("Failed to capture region: {e}")))?;
        Ok(Region::new(
            DynamicImage::ImageRgba8(capture).to_luma8(),
            origin_x + left as i32,
            origin_y + top as i32,
        ))
    }

    fn capture_screen(&self) -> Result<GrayImage, SearchError> {
        let image = Self::primary_monitor()?
            .capture_image()
            .map_err(|e| SearchError::Capture(format!("Failed to capture screen: {e}")))?;
        Ok(DynamicImage::ImageRgba8(image).to_luma8())
    }
}
