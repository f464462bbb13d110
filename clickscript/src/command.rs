//! Script instructions and their flat `{cmd, val, des}` record form.
//!
//! Every command kind is listed once in [`REGISTRY`] together with its
//! persisted name and parameter layout. Loading resolves a record through the
//! registry, so an unknown kind fails at load time instead of at playback.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::config::SearchOverrides;
use crate::errors::LoadError;
use crate::policy::{ErrorCategory, ErrorPolicy};

/// Stable identifier of a command inside a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub(crate) u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    MouseClickLeft,
    MouseClickRight,
    MouseClickDouble,
    KeyDown,
    KeyUp,
    Pause,
    WriteText,
    RunTo,
    BlockStart,
    BlockEnd,
    Label,
    LoopStart,
    LoopEnd,
    FieldLoopStart,
    FieldNext,
    FieldRead,
    ErrorPolicySet,
    DialogStop,
    ClipboardShortcut,
    Stop,
}

/// Registry entry: persisted name, human title and positional parameters.
#[derive(Debug)]
pub struct KindInfo {
    pub kind: CommandKind,
    pub name: &'static str,
    pub title: &'static str,
    pub params: &'static [&'static str],
}

const CLICK_PARAMS: &[&str] = &[
    "x",
    "y",
    "template",
    "local_check",
    "region_size",
    "retry_count",
    "full_screen",
    "expect_absent",
];

pub const REGISTRY: &[KindInfo] = &[
    KindInfo { kind: CommandKind::MouseClickLeft, name: "MouseClickLeft", title: "Left click", params: CLICK_PARAMS },
    KindInfo { kind: CommandKind::MouseClickRight, name: "MouseClickRight", title: "Right click", params: CLICK_PARAMS },
    KindInfo { kind: CommandKind::MouseClickDouble, name: "MouseClickDouble", title: "Double click", params: CLICK_PARAMS },
    KindInfo { kind: CommandKind::KeyDown, name: "KeyDown", title: "Press key", params: &["key"] },
    KindInfo { kind: CommandKind::KeyUp, name: "KeyUp", title: "Release key", params: &["key"] },
    KindInfo { kind: CommandKind::Pause, name: "Pause", title: "Pause", params: &["seconds"] },
    KindInfo { kind: CommandKind::WriteText, name: "WriteText", title: "Write text", params: &["text"] },
    KindInfo { kind: CommandKind::RunTo, name: "RunTo", title: "Run from label", params: &["label"] },
    KindInfo { kind: CommandKind::BlockStart, name: "BlockStart", title: "Block", params: &["name"] },
    KindInfo { kind: CommandKind::BlockEnd, name: "BlockEnd", title: "End of block", params: &[] },
    KindInfo { kind: CommandKind::Label, name: "Label", title: "Label", params: &["name"] },
    KindInfo { kind: CommandKind::LoopStart, name: "LoopStart", title: "Loop", params: &["count"] },
    KindInfo { kind: CommandKind::LoopEnd, name: "LoopEnd", title: "End of loop", params: &[] },
    KindInfo { kind: CommandKind::FieldLoopStart, name: "FieldLoopStart", title: "Loop over field", params: &["field"] },
    KindInfo { kind: CommandKind::FieldNext, name: "FieldNext", title: "Next field element", params: &["field"] },
    KindInfo { kind: CommandKind::FieldRead, name: "FieldRead", title: "Write data from field", params: &["field"] },
    KindInfo { kind: CommandKind::ErrorPolicySet, name: "ErrorPolicySet", title: "On error", params: &["category", "policy"] },
    KindInfo { kind: CommandKind::DialogStop, name: "DialogStop", title: "Stop with message", params: &["message"] },
    KindInfo { kind: CommandKind::ClipboardShortcut, name: "ClipboardShortcut", title: "Shortcut", params: &["shortcut"] },
    KindInfo { kind: CommandKind::Stop, name: "Stop", title: "Stop", params: &[] },
];

impl CommandKind {
    pub fn info(self) -> &'static KindInfo {
        REGISTRY
            .iter()
            .find(|info| info.kind == self)
            .unwrap_or(&REGISTRY[0])
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn title(self) -> &'static str {
        self.info().title
    }

    pub fn from_name(name: &str) -> Option<CommandKind> {
        REGISTRY.iter().find(|info| info.name == name).map(|info| info.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClickButton {
    Left,
    Right,
    Double,
}

/// Where a click lands and what must be seen there first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClickTarget {
    pub x: i32,
    pub y: i32,
    /// Template file name inside the elements directory
    pub template: Option<String>,
    pub overrides: SearchOverrides,
}

impl ClickTarget {
    pub fn at(x: i32, y: i32) -> Self {
        Self {
            x,
            y,
            ..Default::default()
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        let template = template.into();
        self.template = (!template.is_empty()).then_some(template);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShortcutKind {
    Copy,
    Cut,
    Paste,
    SelectAll,
    NewTab,
    NextTab,
    NextWindow,
    SwitchLayout,
    ShowDesktop,
    ShowDesktopLinux,
}

impl ShortcutKind {
    pub const ALL: [ShortcutKind; 10] = [
        ShortcutKind::Copy,
        ShortcutKind::Cut,
        ShortcutKind::Paste,
        ShortcutKind::SelectAll,
        ShortcutKind::NewTab,
        ShortcutKind::NextTab,
        ShortcutKind::NextWindow,
        ShortcutKind::SwitchLayout,
        ShortcutKind::ShowDesktop,
        ShortcutKind::ShowDesktopLinux,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ShortcutKind::Copy => "copy",
            ShortcutKind::Cut => "cut",
            ShortcutKind::Paste => "paste",
            ShortcutKind::SelectAll => "select_all",
            ShortcutKind::NewTab => "new_tab",
            ShortcutKind::NextTab => "next_tab",
            ShortcutKind::NextWindow => "next_window",
            ShortcutKind::SwitchLayout => "switch_layout",
            ShortcutKind::ShowDesktop => "show_desktop",
            ShortcutKind::ShowDesktopLinux => "show_desktop_linux",
        }
    }

    /// Keys held in order, the last one being the key that is tapped.
    pub fn keys(self) -> &'static [&'static str] {
        match self {
            ShortcutKind::Copy => &["ctrl", "c"],
            ShortcutKind::Cut => &["ctrl", "x"],
            ShortcutKind::Paste => &["ctrl", "v"],
            ShortcutKind::SelectAll => &["ctrl", "a"],
            ShortcutKind::NewTab => &["ctrl", "t"],
            ShortcutKind::NextTab => &["ctrl", "tab"],
            ShortcutKind::NextWindow => &["alt", "tab"],
            ShortcutKind::SwitchLayout => &["alt", "shift"],
            ShortcutKind::ShowDesktop => &["cmd", "d"],
            ShortcutKind::ShowDesktopLinux => &["ctrl", "alt", "d"],
        }
    }
}

impl FromStr for ShortcutKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "select" {
            return Ok(ShortcutKind::SelectAll);
        }
        ShortcutKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| format!("unknown shortcut '{s}'"))
    }
}

/// What a command does, with its typed parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click(ClickButton, ClickTarget),
    KeyDown(String),
    KeyUp(String),
    /// Pause in seconds
    Pause(f64),
    WriteText(String),
    RunTo(String),
    BlockStart(String),
    BlockEnd,
    Label(String),
    LoopStart(u32),
    LoopEnd,
    FieldLoopStart(String),
    FieldNext(String),
    FieldRead(String),
    ErrorPolicySet(ErrorCategory, ErrorPolicy),
    DialogStop(String),
    ClipboardShortcut(ShortcutKind),
    Stop,
}

impl Action {
    pub fn kind(&self) -> CommandKind {
        match self {
            Action::Click(ClickButton::Left, _) => CommandKind::MouseClickLeft,
            Action::Click(ClickButton::Right, _) => CommandKind::MouseClickRight,
            Action::Click(ClickButton::Double, _) => CommandKind::MouseClickDouble,
            Action::KeyDown(_) => CommandKind::KeyDown,
            Action::KeyUp(_) => CommandKind::KeyUp,
            Action::Pause(_) => CommandKind::Pause,
            Action::WriteText(_) => CommandKind::WriteText,
            Action::RunTo(_) => CommandKind::RunTo,
            Action::BlockStart(_) => CommandKind::BlockStart,
            Action::BlockEnd => CommandKind::BlockEnd,
            Action::Label(_) => CommandKind::Label,
            Action::LoopStart(_) => CommandKind::LoopStart,
            Action::LoopEnd => CommandKind::LoopEnd,
            Action::FieldLoopStart(_) => CommandKind::FieldLoopStart,
            Action::FieldNext(_) => CommandKind::FieldNext,
            Action::FieldRead(_) => CommandKind::FieldRead,
            Action::ErrorPolicySet(..) => CommandKind::ErrorPolicySet,
            Action::DialogStop(_) => CommandKind::DialogStop,
            Action::ClipboardShortcut(_) => CommandKind::ClipboardShortcut,
            Action::Stop => CommandKind::Stop,
        }
    }
}

/// One script instruction plus its free-text comment.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub action: Action,
    pub comment: String,
}

/// Persisted shape of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub cmd: String,
    #[serde(default)]
    pub val: Vec<Value>,
    #[serde(default)]
    pub des: String,
}

impl Command {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            comment: String::new(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    pub fn kind(&self) -> CommandKind {
        self.action.kind()
    }

    /// Name registered by this command in the label registry, if any.
    pub fn label_name(&self) -> Option<&str> {
        match &self.action {
            Action::Label(name) | Action::BlockStart(name) => Some(name),
            _ => None,
        }
    }

    pub(crate) fn rename_label(&mut self, new_name: String) {
        if let Action::Label(name) | Action::BlockStart(name) = &mut self.action {
            *name = new_name;
        }
    }

    pub fn to_record(&self) -> CommandRecord {
        let val = match &self.action {
            Action::Click(_, target) => {
                let mut val = vec![
                    Value::from(target.x),
                    Value::from(target.y),
                    Value::from(target.template.clone().unwrap_or_default()),
                ];
                if !target.overrides.is_empty() {
                    let o = &target.overrides;
                    val.push(opt_value(o.local_check));
                    val.push(opt_value(o.region_size));
                    val.push(opt_value(o.retry_count));
                    val.push(opt_value(o.full_screen));
                    val.push(opt_value(o.expect_absent));
                }
                val
            }
            Action::KeyDown(key) | Action::KeyUp(key) => vec![Value::from(key.as_str())],
            Action::Pause(seconds) => vec![Value::from(*seconds)],
            Action::WriteText(text) | Action::DialogStop(text) => vec![Value::from(text.as_str())],
            Action::RunTo(name) | Action::BlockStart(name) | Action::Label(name) => {
                vec![Value::from(name.as_str())]
            }
            Action::FieldLoopStart(field) | Action::FieldNext(field) | Action::FieldRead(field) => {
                vec![Value::from(field.as_str())]
            }
            Action::LoopStart(count) => vec![Value::from(*count)],
            Action::ErrorPolicySet(category, policy) => vec![
                Value::from(category.name()),
                Value::from(policy.to_string()),
            ],
            Action::ClipboardShortcut(kind) => vec![Value::from(kind.name())],
            Action::BlockEnd | Action::LoopEnd | Action::Stop => Vec::new(),
        };
        CommandRecord {
            cmd: self.kind().name().to_string(),
            val,
            des: self.comment.clone(),
        }
    }

    pub fn from_record(record: &CommandRecord) -> Result<Command, LoadError> {
        let kind = CommandKind::from_name(&record.cmd)
            .ok_or_else(|| LoadError::UnknownCommand(record.cmd.clone()))?;
        let p = Params {
            kind,
            values: &record.val,
        };
        let action = match kind {
            CommandKind::MouseClickLeft => Action::Click(ClickButton::Left, p.click_target()?),
            CommandKind::MouseClickRight => Action::Click(ClickButton::Right, p.click_target()?),
            CommandKind::MouseClickDouble => Action::Click(ClickButton::Double, p.click_target()?),
            CommandKind::KeyDown => Action::KeyDown(p.required_text(0)?),
            CommandKind::KeyUp => Action::KeyUp(p.required_text(0)?),
            CommandKind::Pause => {
                let seconds: f64 = p.number(0)?.unwrap_or(0.0);
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(p.invalid(0, "pause must be a non-negative number"));
                }
                Action::Pause(seconds)
            }
            CommandKind::WriteText => Action::WriteText(p.text(0)),
            CommandKind::RunTo => Action::RunTo(p.required_text(0)?),
            CommandKind::BlockStart => Action::BlockStart(p.required_text(0)?),
            CommandKind::BlockEnd => Action::BlockEnd,
            CommandKind::Label => Action::Label(p.required_text(0)?),
            CommandKind::LoopStart => Action::LoopStart(p.number(0)?.unwrap_or(1)),
            CommandKind::LoopEnd => Action::LoopEnd,
            CommandKind::FieldLoopStart => Action::FieldLoopStart(p.required_text(0)?),
            CommandKind::FieldNext => Action::FieldNext(p.required_text(0)?),
            CommandKind::FieldRead => Action::FieldRead(p.required_text(0)?),
            CommandKind::ErrorPolicySet => {
                let category = p
                    .required_text(0)?
                    .parse::<ErrorCategory>()
                    .map_err(|e| p.invalid(0, e))?;
                let policy = p
                    .required_text(1)?
                    .parse::<ErrorPolicy>()
                    .map_err(|e| p.invalid(1, e))?;
                Action::ErrorPolicySet(category, policy)
            }
            CommandKind::DialogStop => Action::DialogStop(p.text(0)),
            CommandKind::ClipboardShortcut => Action::ClipboardShortcut(
                p.required_text(0)?
                    .parse::<ShortcutKind>()
                    .map_err(|e| p.invalid(0, e))?,
            ),
            CommandKind::Stop => Action::Stop,
        };
        Ok(Command {
            action,
            comment: record.des.clone(),
        })
    }
}

impl From<Action> for Command {
    fn from(action: Action) -> Self {
        Command::new(action)
    }
}

impl fmt::Display for Command {
    /// The comment when there is one, otherwise the title and parameters.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.comment.is_empty() {
            return f.write_str(&self.comment);
        }
        let title = self.kind().title();
        match &self.action {
            Action::Click(_, target) => match &target.template {
                Some(template) => write!(f, "{title} ({}, {}) [{template}]", target.x, target.y),
                None => write!(f, "{title} ({}, {})", target.x, target.y),
            },
            Action::KeyDown(key) | Action::KeyUp(key) => write!(f, "{title} {key}"),
            Action::Pause(seconds) => write!(f, "{title} {seconds}s"),
            Action::WriteText(text) => write!(f, "{title} \"{text}\""),
            Action::RunTo(name) | Action::BlockStart(name) | Action::Label(name) => {
                write!(f, "{title} {name}")
            }
            Action::LoopStart(count) => write!(f, "{title} x{count}"),
            Action::FieldLoopStart(field) | Action::FieldNext(field) | Action::FieldRead(field) => {
                write!(f, "{title} [{field}]")
            }
            Action::ErrorPolicySet(category, policy) => write!(f, "{title} {category}: {policy}"),
            Action::DialogStop(message) => write!(f, "{title}: {message}"),
            Action::ClipboardShortcut(kind) => write!(f, "{title} {}", kind.name()),
            Action::BlockEnd | Action::LoopEnd | Action::Stop => f.write_str(title),
        }
    }
}

fn opt_value<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or_else(|| Value::from(""))
}

/// Positional parameter reader. Missing trailing values read as "".
struct Params<'a> {
    kind: CommandKind,
    values: &'a [Value],
}

impl Params<'_> {
    fn text(&self, index: usize) -> String {
        match self.values.get(index) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    fn required_text(&self, index: usize) -> Result<String, LoadError> {
        let text = self.text(index);
        if text.trim().is_empty() {
            return Err(self.invalid(index, "value is required"));
        }
        Ok(text)
    }

    /// Parses a number; an empty value yields `None`.
    fn number<T: FromStr>(&self, index: usize) -> Result<Option<T>, LoadError> {
        let text = self.text(index);
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        text.parse::<T>()
            .map(Some)
            .map_err(|_| self.invalid(index, format!("'{text}' is not a valid number")))
    }

    fn flag(&self, index: usize) -> Result<Option<bool>, LoadError> {
        match self.text(index).trim() {
            "" => Ok(None),
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            other => Err(self.invalid(index, format!("'{other}' is not a boolean"))),
        }
    }

    fn click_target(&self) -> Result<ClickTarget, LoadError> {
        Ok(ClickTarget {
            x: self.number(0)?.unwrap_or(0),
            y: self.number(1)?.unwrap_or(0),
            template: Some(self.text(2)).filter(|t| !t.is_empty()),
            overrides: SearchOverrides {
                local_check: self.flag(3)?,
                region_size: self.number(4)?,
                retry_count: self.number(5)?,
                full_screen: self.flag(6)?,
                expect_absent: self.flag(7)?,
            },
        })
    }

    fn invalid(&self, index: usize, message: impl Into<String>) -> LoadError {
        LoadError::InvalidParameter {
            kind: self.kind.name(),
            index,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(cmd: &str, val: Value, des: &str) -> CommandRecord {
        serde_json::from_value(json!({"cmd": cmd, "val": val, "des": des})).unwrap()
    }

    #[test]
    fn test_registry_names_are_unique_and_resolvable() {
        for info in REGISTRY {
            assert_eq!(CommandKind::from_name(info.name), Some(info.kind));
            assert_eq!(info.kind.name(), info.name);
            assert_eq!(
                REGISTRY.iter().filter(|other| other.name == info.name).count(),
                1,
                "duplicate registry name {}",
                info.name
            );
        }
    }

    #[test]
    fn test_unknown_kind_fails_fast() {
        let err = Command::from_record(&record("MouseClickTriple", json!([1, 2]), "")).unwrap_err();
        assert!(matches!(err, LoadError::UnknownCommand(name) if name == "MouseClickTriple"));
    }

    #[test]
    fn test_legacy_click_record_without_overrides() {
        let cmd = Command::from_record(&record("MouseClickLeft", json!([10, "20", "ok.png"]), "OK")).unwrap();
        match &cmd.action {
            Action::Click(ClickButton::Left, target) => {
                assert_eq!((target.x, target.y), (10, 20));
                assert_eq!(target.template.as_deref(), Some("ok.png"));
                assert!(target.overrides.is_empty());
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert_eq!(cmd.comment, "OK");
        assert_eq!(cmd.to_string(), "OK");
    }

    #[test]
    fn test_click_overrides_survive_records() {
        let mut target = ClickTarget::at(5, 6).with_template("save.png");
        target.overrides.retry_count = Some(0);
        target.overrides.expect_absent = Some(true);
        let cmd = Command::new(Action::Click(ClickButton::Double, target.clone()));
        let rec = cmd.to_record();
        assert_eq!(rec.val.len(), 8);
        assert_eq!(rec.val[3], json!(""));
        assert_eq!(Command::from_record(&rec).unwrap(), cmd);
    }

    #[test]
    fn test_missing_values_default_to_empty() {
        let cmd = Command::from_record(&record("WriteText", json!([]), "")).unwrap();
        assert_eq!(cmd.action, Action::WriteText(String::new()));

        let cmd = Command::from_record(&record("LoopStart", json!([]), "")).unwrap();
        assert_eq!(cmd.action, Action::LoopStart(1));

        let err = Command::from_record(&record("Label", json!([]), "")).unwrap_err();
        assert!(matches!(err, LoadError::InvalidParameter { kind: "Label", index: 0, .. }));
    }

    #[test]
    fn test_error_policy_record() {
        let cmd = Command::from_record(&record("ErrorPolicySet", json!(["no_element", "run:retry"]), "")).unwrap();
        assert_eq!(
            cmd.action,
            Action::ErrorPolicySet(
                ErrorCategory::ElementNotFound,
                ErrorPolicy::JumpToLabel("retry".into())
            )
        );
        assert_eq!(cmd.to_record().val, vec![json!("no_element"), json!("jump:retry")]);
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = Command::from_record(&record("LoopStart", json!(["many"]), "")).unwrap_err();
        assert!(err.to_string().contains("many"));
        let err = Command::from_record(&record("Pause", json!([-2]), "")).unwrap_err();
        assert!(matches!(err, LoadError::InvalidParameter { kind: "Pause", .. }));
    }

    #[test]
    fn test_display_without_comment() {
        let cmd = Command::new(Action::LoopStart(3));
        assert_eq!(cmd.to_string(), "Loop x3");
        let cmd = Command::new(Action::FieldRead("email".into()));
        assert_eq!(cmd.to_string(), "Write data from field [email]");
    }
}
