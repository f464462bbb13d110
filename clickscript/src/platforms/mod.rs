//! Adapters that touch the real desktop.

pub mod input;
pub mod keys;
pub mod screen;

pub use input::RdevSink;
pub use keys::{key_from_name, key_name};
pub use screen::XcapScreen;

use std::path::Path;

use crate::search::{TemplateDir, TemplateSearch};

/// Template search against the primary monitor with templates from `elements_dir`.
pub fn screen_search(elements_dir: &Path) -> TemplateSearch<XcapScreen, TemplateDir> {
    TemplateSearch::new(XcapScreen::new(), TemplateDir::new(elements_dir))
}
