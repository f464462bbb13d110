use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::EngineError;
use crate::policy::ErrorPolicies;

/// Global template search policy. Every field can be overridden per command
/// through [`SearchOverrides`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchPolicy {
    /// Confirm the element at the expected coordinates before acting
    pub local_check: bool,
    /// Side of the square captured around the expected point (pixels)
    pub region_size: u32,
    /// Number of local attempts, one second apart
    pub retry_count: u32,
    /// Search the whole screen when local attempts fail
    pub full_screen: bool,
    /// Correlation threshold for the local comparison
    pub local_threshold: f32,
    /// Correlation threshold for the full-screen search
    pub screen_threshold: f32,
    /// Act only when the element is absent
    pub expect_absent: bool,
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self {
            local_check: true,
            region_size: 100,
            retry_count: 3,
            full_screen: true,
            local_threshold: 0.85,
            screen_threshold: 0.8,
            expect_absent: false,
        }
    }
}

impl SearchPolicy {
    /// Apply per-command overrides on top of this policy.
    pub fn with_overrides(&self, overrides: &SearchOverrides) -> SearchPolicy {
        SearchPolicy {
            local_check: overrides.local_check.unwrap_or(self.local_check),
            region_size: overrides.region_size.unwrap_or(self.region_size),
            retry_count: overrides.retry_count.unwrap_or(self.retry_count),
            full_screen: overrides.full_screen.unwrap_or(self.full_screen),
            expect_absent: overrides.expect_absent.unwrap_or(self.expect_absent),
            ..self.clone()
        }
    }
}

/// Per-command search settings. `None` inherits the global value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOverrides {
    pub local_check: Option<bool>,
    pub region_size: Option<u32>,
    pub retry_count: Option<u32>,
    pub full_screen: Option<bool>,
    pub expect_absent: Option<bool>,
}

impl SearchOverrides {
    pub fn is_empty(&self) -> bool {
        *self == SearchOverrides::default()
    }
}

/// Template capture settings used while recording clicks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Side of the square grabbed around a click to look for known templates
    pub first_region: u32,
    /// Side of a newly saved template
    pub region: u32,
    /// Prefix of generated template file names
    pub basename: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            first_region: 200,
            region: 60,
            basename: "elem".to_string(),
        }
    }
}

/// Settings shared by playback, search and recording.
///
/// Passed explicitly into the engine, the search protocol and the recorder.
/// Pauses are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Pause after every key release
    pub key_pause: f64,
    /// Pause after every mouse click
    pub click_pause: f64,
    /// Pause between two executed commands
    pub command_pause: f64,
    /// Delay before a playback worker starts
    pub start_delay: f64,
    pub search: SearchPolicy,
    pub policies: ErrorPolicies,
    /// Reset data cursors when a script starts
    pub reset_data_cursors: bool,
    /// Directory holding template images
    pub elements_dir: PathBuf,
    pub capture: CaptureConfig,
    /// Window for merging two left clicks into a double click while recording
    pub double_click_ms: u64,
    /// Append-only error journal
    pub error_log: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            key_pause: 0.1,
            click_pause: 0.5,
            command_pause: 0.0,
            start_delay: 3.0,
            search: SearchPolicy::default(),
            policies: ErrorPolicies::default(),
            reset_data_cursors: true,
            elements_dir: PathBuf::from("elements"),
            capture: CaptureConfig::default(),
            double_click_ms: 300,
            error_log: None,
        }
    }
}

impl Configuration {
    /// A configuration with every pause set to zero, for fast or headless runs.
    pub fn immediate() -> Self {
        Self {
            key_pause: 0.0,
            click_pause: 0.0,
            command_pause: 0.0,
            start_delay: 0.0,
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Configuration = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("failed to parse configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Config(format!("failed to read {}: {e}", path.as_ref().display()))
        })?;
        Self::from_json(&text)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, value) in [
            ("key_pause", self.key_pause),
            ("click_pause", self.click_pause),
            ("command_pause", self.command_pause),
            ("start_delay", self.start_delay),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::Config(format!(
                    "{name} must be a non-negative number of seconds, got {value}"
                )));
            }
        }
        if self.search.region_size == 0 {
            return Err(EngineError::Config("search.region_size must be positive".into()));
        }
        if self.capture.region == 0 || self.capture.region > self.capture.first_region {
            return Err(EngineError::Config(
                "capture.region must be positive and not larger than capture.first_region".into(),
            ));
        }
        for (name, value) in [
            ("search.local_threshold", self.search.local_threshold),
            ("search.screen_threshold", self.search.screen_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(EngineError::Config(format!("{name} must be within 0..=1")));
            }
        }
        Ok(())
    }

    pub fn key_pause(&self) -> Duration {
        seconds(self.key_pause)
    }

    pub fn click_pause(&self) -> Duration {
        seconds(self.click_pause)
    }

    pub fn command_pause(&self) -> Duration {
        seconds(self.command_pause)
    }

    pub fn start_delay(&self) -> Duration {
        seconds(self.start_delay)
    }
}

/// Seconds to a duration, treating negative and non-finite values as zero.
pub(crate) fn seconds(value: f64) -> Duration {
    if value.is_finite() && value > 0.0 {
        Duration::from_secs_f64(value)
    } else {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ErrorPolicy;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = Configuration::from_json(
            r#"{"command_pause": 0.25, "search": {"retry_count": 1}, "policies": {"data_exhausted": "jump:done"}}"#,
        )
        .unwrap();
        assert_eq!(config.command_pause(), Duration::from_millis(250));
        assert_eq!(config.search.retry_count, 1);
        assert_eq!(config.search.region_size, 100);
        assert_eq!(config.policies.element_not_found, ErrorPolicy::Stop);
        assert_eq!(
            config.policies.data_exhausted,
            ErrorPolicy::JumpToLabel("done".into())
        );
    }

    #[test]
    fn test_pauses_convert_to_durations() {
        let config = Configuration::from_json(r#"{"key_pause": 0.05, "click_pause": 1.5}"#).unwrap();
        assert_eq!(config.key_pause(), Duration::from_millis(50));
        assert_eq!(config.click_pause(), Duration::from_millis(1500));
        assert_eq!(Configuration::immediate().key_pause(), Duration::ZERO);
    }

    #[test]
    fn test_validation_rejects_negative_pause() {
        let err = Configuration::from_json(r#"{"click_pause": -1}"#).unwrap_err();
        assert!(err.to_string().contains("click_pause"));
    }

    #[test]
    fn test_overrides_only_replace_given_fields() {
        let policy = SearchPolicy::default();
        let merged = policy.with_overrides(&SearchOverrides {
            retry_count: Some(0),
            expect_absent: Some(true),
            ..Default::default()
        });
        assert_eq!(merged.retry_count, 0);
        assert!(merged.expect_absent);
        assert_eq!(merged.region_size, policy.region_size);
        assert_eq!(merged.full_screen, policy.full_screen);
    }
}
