use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::errors::{DataError, SearchError, SinkError};

/// Category of a recoverable playback error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Template missing, element not found (or present, for inverted searches).
    ElementNotFound,
    /// Unknown field or no more data in a field.
    DataExhausted,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 2] = [ErrorCategory::ElementNotFound, ErrorCategory::DataExhausted];

    pub fn name(self) -> &'static str {
        match self {
            ErrorCategory::ElementNotFound => "no_element",
            ErrorCategory::DataExhausted => "no_data",
        }
    }
}

impl FromStr for ErrorCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "no_element" | "element_not_found" => Ok(ErrorCategory::ElementNotFound),
            "no_data" | "data_exhausted" => Ok(ErrorCategory::DataExhausted),
            other => Err(format!("unknown error category '{other}'")),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Response to a recoverable error during playback.
///
/// Text form is `stop`, `ignore`, `dialog` or `jump:<label>`. The legacy
/// forms `stop:`, `ignore:` and `run:<label>` are accepted when parsing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    #[default]
    Stop,
    Ignore,
    Dialog,
    JumpToLabel(String),
}

impl FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (react, label) = match s.split_once(':') {
            Some((react, label)) => (react.trim(), label.trim()),
            None => (s, ""),
        };
        match react {
            "stop" => Ok(ErrorPolicy::Stop),
            "ignore" => Ok(ErrorPolicy::Ignore),
            "dialog" => Ok(ErrorPolicy::Dialog),
            "jump" | "run" if !label.is_empty() => Ok(ErrorPolicy::JumpToLabel(label.to_string())),
            "jump" | "run" => Err("jump policy requires a label".to_string()),
            other => Err(format!(
                "unknown error policy '{other}', expected stop/ignore/dialog/jump:<label>"
            )),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Stop => f.write_str("stop"),
            ErrorPolicy::Ignore => f.write_str("ignore"),
            ErrorPolicy::Dialog => f.write_str("dialog"),
            ErrorPolicy::JumpToLabel(label) => write!(f, "jump:{label}"),
        }
    }
}

impl Serialize for ErrorPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ErrorPolicy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// The active policy per error category. Seeded from configuration and
/// mutated by `ErrorPolicySet` commands while a script runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorPolicies {
    pub element_not_found: ErrorPolicy,
    pub data_exhausted: ErrorPolicy,
}

impl Default for ErrorPolicies {
    fn default() -> Self {
        Self {
            element_not_found: ErrorPolicy::Stop,
            data_exhausted: ErrorPolicy::Ignore,
        }
    }
}

impl ErrorPolicies {
    pub fn get(&self, category: ErrorCategory) -> &ErrorPolicy {
        match category {
            ErrorCategory::ElementNotFound => &self.element_not_found,
            ErrorCategory::DataExhausted => &self.data_exhausted,
        }
    }

    pub fn set(&mut self, category: ErrorCategory, policy: ErrorPolicy) {
        match category {
            ErrorCategory::ElementNotFound => self.element_not_found = policy,
            ErrorCategory::DataExhausted => self.data_exhausted = policy,
        }
    }
}

/// A recoverable error raised while executing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackFault {
    pub category: ErrorCategory,
    pub message: String,
}

impl PlaybackFault {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for PlaybackFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl From<DataError> for PlaybackFault {
    fn from(err: DataError) -> Self {
        PlaybackFault::new(ErrorCategory::DataExhausted, err.to_string())
    }
}

impl From<SearchError> for PlaybackFault {
    fn from(err: SearchError) -> Self {
        PlaybackFault::new(ErrorCategory::ElementNotFound, err.to_string())
    }
}

impl TryFrom<SinkError> for PlaybackFault {
    type Error = SinkError;

    /// Only search failures reported by a sink are recoverable. A cancelled
    /// search or a broken screen is not.
    fn try_from(err: SinkError) -> Result<Self, Self::Error> {
        match err {
            SinkError::Search(search @ (SearchError::Cancelled | SearchError::Capture(_))) => {
                Err(SinkError::Search(search))
            }
            SinkError::Search(search) => Ok(search.into()),
            other => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_text_forms() {
        assert_eq!("stop".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::Stop);
        assert_eq!("ignore:".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::Ignore);
        assert_eq!("dialog".parse::<ErrorPolicy>().unwrap(), ErrorPolicy::Dialog);
        assert_eq!(
            "run:retry".parse::<ErrorPolicy>().unwrap(),
            ErrorPolicy::JumpToLabel("retry".to_string())
        );
        assert_eq!(
            ErrorPolicy::JumpToLabel("retry".to_string()).to_string(),
            "jump:retry"
        );
        assert!("jump:".parse::<ErrorPolicy>().is_err());
        assert!("explode".parse::<ErrorPolicy>().is_err());
    }

    #[test]
    fn test_default_policies_match_legacy_settings() {
        let policies = ErrorPolicies::default();
        assert_eq!(policies.get(ErrorCategory::ElementNotFound), &ErrorPolicy::Stop);
        assert_eq!(policies.get(ErrorCategory::DataExhausted), &ErrorPolicy::Ignore);
    }

    #[test]
    fn test_sink_errors_split_into_faults_and_failures() {
        let fault = PlaybackFault::try_from(SinkError::Search(SearchError::ElementNotFound(
            "button".into(),
        )))
        .unwrap();
        assert_eq!(fault.category, ErrorCategory::ElementNotFound);

        assert!(PlaybackFault::try_from(SinkError::Simulate("denied".into())).is_err());
        assert!(PlaybackFault::try_from(SinkError::Search(SearchError::Cancelled)).is_err());
        assert!(PlaybackFault::try_from(SinkError::Search(SearchError::Capture("no display".into()))).is_err());
    }
}
