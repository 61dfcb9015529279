//! Browser signals as plain values.
//!
//! The browser binding layer translates native DOM and media events into
//! `Signal`s; nothing past this point knows about the DOM.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Signal {
    Play,
    Pause,
    TimeUpdate { time: f64 },
    Seeking { target: f64 },
    RateChange { rate: f64 },
    FullscreenChange { fullscreen: bool },
    VisibilityChange { hidden: bool },
    WindowBlur,
    ContextMenu,
    KeyDown(KeyPress),
    /// Heuristic detection of an open inspector (window size delta, debugger timing).
    DevToolsOpened,
    /// Save-as, drag-out of the media element or a direct source request.
    DownloadRequested,
    /// Display capture or a recording API was started.
    ScreenCaptureStarted,
    /// Another live player was observed for the same session.
    ConcurrentSession,
    LoadedMetadata { duration: f64 },
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Play => "play",
            Signal::Pause => "pause",
            Signal::TimeUpdate { .. } => "time_update",
            Signal::Seeking { .. } => "seeking",
            Signal::RateChange { .. } => "rate_change",
            Signal::FullscreenChange { .. } => "fullscreen_change",
            Signal::VisibilityChange { .. } => "visibility_change",
            Signal::WindowBlur => "window_blur",
            Signal::ContextMenu => "context_menu",
            Signal::KeyDown(_) => "key_down",
            Signal::DevToolsOpened => "devtools_opened",
            Signal::DownloadRequested => "download_requested",
            Signal::ScreenCaptureStarted => "screen_capture_started",
            Signal::ConcurrentSession => "concurrent_session",
            Signal::LoadedMetadata { .. } => "loaded_metadata",
        }
    }
}

/// A keydown event reduced to the key name and modifier state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPress {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
}

impl KeyPress {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Self::default()
        }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    /// Ctrl on Windows/Linux, Cmd on macOS.
    fn primary(&self) -> bool {
        self.ctrl || self.meta
    }

    fn is(&self, key: &str) -> bool {
        self.key.eq_ignore_ascii_case(key)
    }

    /// F12, Ctrl/Cmd+Shift+I/J/C, Ctrl/Cmd+U.
    pub fn is_devtools_shortcut(&self) -> bool {
        if self.is("F12") {
            return true;
        }
        if self.primary() && self.shift && (self.is("i") || self.is("j") || self.is("c")) {
            return true;
        }
        self.primary() && self.is("u")
    }

    /// PrintScreen, Ctrl+Shift+S, Cmd+Shift+3/4/5.
    pub fn is_screenshot_shortcut(&self) -> bool {
        if self.is("PrintScreen") {
            return true;
        }
        if self.ctrl && self.shift && self.is("s") {
            return true;
        }
        self.meta && self.shift && (self.is("3") || self.is("4") || self.is("5"))
    }

    /// Ctrl/Cmd+S without shift.
    pub fn is_save_shortcut(&self) -> bool {
        self.primary() && !self.shift && self.is("s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devtools_shortcuts() {
        assert!(KeyPress::new("F12").is_devtools_shortcut());
        assert!(KeyPress::new("I").ctrl().shift().is_devtools_shortcut());
        assert!(KeyPress::new("j").meta().shift().is_devtools_shortcut());
        assert!(KeyPress::new("C").ctrl().shift().is_devtools_shortcut());
        assert!(KeyPress::new("u").ctrl().is_devtools_shortcut());
        assert!(!KeyPress::new("i").ctrl().is_devtools_shortcut());
        assert!(!KeyPress::new("c").ctrl().is_devtools_shortcut());
    }

    #[test]
    fn screenshot_and_save_shortcuts_do_not_overlap() {
        let ctrl_shift_s = KeyPress::new("S").ctrl().shift();
        assert!(ctrl_shift_s.is_screenshot_shortcut());
        assert!(!ctrl_shift_s.is_save_shortcut());

        let ctrl_s = KeyPress::new("s").ctrl();
        assert!(ctrl_s.is_save_shortcut());
        assert!(!ctrl_s.is_screenshot_shortcut());

        assert!(KeyPress::new("PrintScreen").is_screenshot_shortcut());
        assert!(KeyPress::new("4").meta().shift().is_screenshot_shortcut());
        assert!(!KeyPress::new("4").meta().is_screenshot_shortcut());
    }

    #[test]
    fn signals_parse_from_tagged_json() {
        let sig: Signal = serde_json::from_str(r#"{"type":"time_update","time":12.5}"#).expect("json");
        assert_eq!(sig, Signal::TimeUpdate { time: 12.5 });

        let sig: Signal =
            serde_json::from_str(r#"{"type":"key_down","key":"F12"}"#).expect("json");
        assert_eq!(sig, Signal::KeyDown(KeyPress::new("F12")));

        let sig: Signal = serde_json::from_str(r#"{"type":"context_menu"}"#).expect("json");
        assert_eq!(sig.name(), "context_menu");
    }
}
