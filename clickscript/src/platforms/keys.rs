//! Key names used in scripts and chord signatures, and their `rdev` keys.

use rdev::Key;

const NAMED_KEYS: &[(&str, Key)] = &[
    ("ctrl", Key::ControlLeft),
    ("ctrl_r", Key::ControlRight),
    ("shift", Key::ShiftLeft),
    ("shift_r", Key::ShiftRight),
    ("alt", Key::Alt),
    ("alt_gr", Key::AltGr),
    ("cmd", Key::MetaLeft),
    ("cmd_r", Key::MetaRight),
    ("enter", Key::Return),
    ("esc", Key::Escape),
    ("space", Key::Space),
    ("tab", Key::Tab),
    ("backspace", Key::Backspace),
    ("delete", Key::Delete),
    ("insert", Key::Insert),
    ("home", Key::Home),
    ("end", Key::End),
    ("page_up", Key::PageUp),
    ("page_down", Key::PageDown),
    ("up", Key::UpArrow),
    ("down", Key::DownArrow),
    ("left", Key::LeftArrow),
    ("right", Key::RightArrow),
    ("caps_lock", Key::CapsLock),
    ("num_lock", Key::NumLock),
    ("scroll_lock", Key::ScrollLock),
    ("print_screen", Key::PrintScreen),
    ("pause", Key::Pause),
    ("f1", Key::F1),
    ("f2", Key::F2),
    ("f3", Key::F3),
    ("f4", Key::F4),
    ("f5", Key::F5),
    ("f6", Key::F6),
    ("f7", Key::F7),
    ("f8", Key::F8),
    ("f9", Key::F9),
    ("f10", Key::F10),
    ("f11", Key::F11),
    ("f12", Key::F12),
    ("a", Key::KeyA),
    ("b", Key::KeyB),
    ("c", Key::KeyC),
    ("d", Key::KeyD),
    ("e", Key::KeyE),
    ("f", Key::KeyF),
    ("g", Key::KeyG),
    ("h", Key::KeyH),
    ("i", Key::KeyI),
    ("j", Key::KeyJ),
    ("k", Key::KeyK),
    ("l", Key::KeyL),
    ("m", Key::KeyM),
    ("n", Key::KeyN),
    ("o", Key::KeyO),
    ("p", Key::KeyP),
    ("q", Key::KeyQ),
    ("r", Key::KeyR),
    ("s", Key::KeyS),
    ("t", Key::KeyT),
    ("u", Key::KeyU),
    ("v", Key::KeyV),
    ("w", Key::KeyW),
    ("x", Key::KeyX),
    ("y", Key::KeyY),
    ("z", Key::KeyZ),
    ("0", Key::Num0),
    ("1", Key::Num1),
    ("2", Key::Num2),
    ("3", Key::Num3),
    ("4", Key::Num4),
    ("5", Key::Num5),
    ("6", Key::Num6),
    ("7", Key::Num7),
    ("8", Key::Num8),
    ("9", Key::Num9),
    ("`", Key::BackQuote),
    ("-", Key::Minus),
    ("=", Key::Equal),
    ("[", Key::LeftBracket),
    ("]", Key::RightBracket),
    (";", Key::SemiColon),
    ("'", Key::Quote),
    ("\\", Key::BackSlash),
    (",", Key::Comma),
    (".", Key::Dot),
    ("/", Key::Slash),
];

/// Script name of a key, e.g. `ctrl_r` or `f5`. Keys without a name are
/// written as `unknown:<code>`.
pub fn key_name(key: Key) -> String {
    if let Some((name, _)) = NAMED_KEYS.iter().find(|(_, k)| *k == key) {
        return (*name).to_string();
    }
    match key {
        Key::Unknown(code) => format!("unknown:{code}"),
        other => format!("{other:?}").to_lowercase(),
    }
}

pub fn key_from_name(name: &str) -> Option<Key> {
    let lower = name.trim().to_lowercase();
    if let Some((_, key)) = NAMED_KEYS.iter().find(|(n, _)| *n == lower) {
        return Some(*key);
    }
    match lower.as_str() {
        "control" | "ctrl_l" => Some(Key::ControlLeft),
        "shift_l" => Some(Key::ShiftLeft),
        "alt_l" => Some(Key::Alt),
        "cmd_l" | "win" | "super" => Some(Key::MetaLeft),
        "return" => Some(Key::Return),
        "escape" => Some(Key::Escape),
        other => other
            .strip_prefix("unknown:")
            .and_then(|code| code.parse().ok())
            .map(Key::Unknown),
    }
}
