//! Replacement for the Windows-only `claude-native` module.
//!
//! The real module is a native addon exposing window effects, taskbar
//! progress and a keyboard key enumeration. On Linux every call becomes a
//! no-op or returns a fixed value of the type callers expect. The module is
//! rendered from the tables below so the exported surface can be checked.

use std::fmt::Write;

/// JavaScript type a caller expects back from an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsType {
    Undefined,
    Boolean,
    String,
}

/// Fixed value an exported stub function returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubReturn {
    Unit,
    Bool(bool),
    Str(&'static str),
}

impl StubReturn {
    /// Type of the value as JavaScript `typeof` would report it.
    pub fn js_type(self) -> JsType {
        match self {
            Self::Unit => JsType::Undefined,
            Self::Bool(_) => JsType::Boolean,
            Self::Str(_) => JsType::String,
        }
    }

    fn body(self) -> String {
        match self {
            Self::Unit => "{}".to_string(),
            Self::Bool(value) => value.to_string(),
            Self::Str(value) => format!("{value:?}"),
        }
    }
}

/// Every function the application calls on `claude-native`, with the fixed
/// value it gets back. The value's [`JsType`] is what callers expect.
pub const STUB_EXPORTS: &[(&str, StubReturn)] = &[
    ("getWindowsVersion", StubReturn::Str("10.0.0")),
    ("setWindowEffect", StubReturn::Unit),
    ("removeWindowEffect", StubReturn::Unit),
    ("getIsMaximized", StubReturn::Bool(false)),
    ("flashFrame", StubReturn::Unit),
    ("clearFlashFrame", StubReturn::Unit),
    ("showNotification", StubReturn::Unit),
    ("setProgressBar", StubReturn::Unit),
    ("clearProgressBar", StubReturn::Unit),
    ("setOverlayIcon", StubReturn::Unit),
    ("clearOverlayIcon", StubReturn::Unit),
];

/// `KeyboardKey` enumeration values of the native module.
pub const KEYBOARD_KEYS: &[(&str, u16)] = &[
    ("Backspace", 43),
    ("Tab", 280),
    ("Enter", 261),
    ("Shift", 272),
    ("Control", 61),
    ("Alt", 40),
    ("CapsLock", 56),
    ("Escape", 85),
    ("Space", 276),
    ("PageUp", 251),
    ("PageDown", 250),
    ("End", 83),
    ("Home", 154),
    ("LeftArrow", 175),
    ("UpArrow", 282),
    ("RightArrow", 262),
    ("DownArrow", 81),
    ("Delete", 79),
    ("Meta", 187),
];

/// Render the stub module source (`index.js`).
pub fn render_stub() -> String {
    let mut js = String::from("// Linux stub for claude-native.\n");
    js.push_str("const KeyboardKey = {\n");
    for (name, code) in KEYBOARD_KEYS {
        let _ = writeln!(js, "  {name}: {code},");
    }
    js.push_str("};\nObject.freeze(KeyboardKey);\n\nmodule.exports = {\n");
    for (name, ret) in STUB_EXPORTS {
        let _ = writeln!(js, "  {name}: () => {},", ret.body());
    }
    js.push_str("  KeyboardKey\n};\n");
    js
}
