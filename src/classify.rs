//! Signal classification table.
//!
//! `classify` is a pure function of (signal, policy, playback state). It
//! decides whether a signal is a violation, which corrective action the
//! engine must apply to the surface, and whether the browser default must
//! be suppressed. It never mutates anything.

use crate::engine::PlaybackState;
use crate::policy::EffectivePolicy;
use crate::signal::Signal;
use crate::violation::ViolationType;

/// Allowed gap between two time updates before a jump counts as a seek.
/// Fixed, not configurable.
pub const SEEK_TOLERANCE_SECS: f64 = 2.0;

pub const NORMAL_RATE: f64 = 1.0;

/// Immediate response to a classified signal, applied synchronously.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CorrectiveAction {
    ForcePause,
    ForcePlay,
    ResetRate,
    SeekTo(f64),
    RequestFullscreen,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Verdict {
    pub violation: Option<ViolationType>,
    pub action: Option<CorrectiveAction>,
    pub suppress_default: bool,
}

impl Verdict {
    fn allow() -> Self {
        Self::default()
    }

    fn violation(ty: ViolationType) -> Self {
        Self {
            violation: Some(ty),
            ..Self::default()
        }
    }

    fn with_action(mut self, action: CorrectiveAction) -> Self {
        self.action = Some(action);
        self
    }

    fn suppressed(mut self) -> Self {
        self.suppress_default = true;
        self
    }
}

pub fn rate_drifted(rate: f64) -> bool {
    (rate - NORMAL_RATE).abs() > f64::EPSILON
}

fn jumped_forward(to: f64, state: &PlaybackState) -> bool {
    to - state.last_allowed_time > SEEK_TOLERANCE_SECS
}

/// Classify one signal against the policy in force. Only meaningful while
/// the engine is live; a revoked engine never consults this table.
pub fn classify(signal: &Signal, policy: &EffectivePolicy, state: &PlaybackState) -> Verdict {
    match signal {
        Signal::Play => {
            if policy.require_fullscreen && state.fullscreen_supported && !state.fullscreen {
                Verdict::allow().with_action(CorrectiveAction::RequestFullscreen)
            } else {
                Verdict::allow()
            }
        }
        Signal::Pause => {
            if state.engine_pause_pending {
                return Verdict::allow();
            }
            if policy.block_pause {
                Verdict::violation(ViolationType::PauseAttempt)
                    .with_action(CorrectiveAction::ForcePlay)
            } else {
                Verdict::allow()
            }
        }
        Signal::TimeUpdate { time } => {
            if policy.block_forward10 && jumped_forward(*time, state) {
                Verdict::violation(ViolationType::Forward10Attempt)
                    .with_action(CorrectiveAction::SeekTo(state.last_allowed_time))
            } else {
                Verdict::allow()
            }
        }
        Signal::Seeking { target } => {
            if policy.block_forward10 && jumped_forward(*target, state) {
                Verdict::violation(ViolationType::SeekForwardAttempt)
                    .with_action(CorrectiveAction::SeekTo(state.last_allowed_time))
            } else {
                Verdict::allow()
            }
        }
        Signal::RateChange { rate } => {
            if policy.block_speed && rate_drifted(*rate) {
                Verdict::violation(ViolationType::SpeedAttempt)
                    .with_action(CorrectiveAction::ResetRate)
            } else {
                Verdict::allow()
            }
        }
        Signal::FullscreenChange { fullscreen } => {
            if !*fullscreen && policy.require_fullscreen && state.fullscreen_supported {
                Verdict::violation(ViolationType::ExitFullscreen)
                    .with_action(CorrectiveAction::ForcePause)
            } else {
                Verdict::allow()
            }
        }
        Signal::VisibilityChange { hidden: true } | Signal::WindowBlur => {
            if policy.focus_mode {
                Verdict::violation(ViolationType::FocusLost)
                    .with_action(CorrectiveAction::ForcePause)
            } else {
                Verdict::allow()
            }
        }
        Signal::VisibilityChange { hidden: false } => Verdict::allow(),
        Signal::ContextMenu => {
            if policy.block_right_click {
                Verdict::violation(ViolationType::RightClick).suppressed()
            } else {
                Verdict::allow()
            }
        }
        Signal::KeyDown(key) => {
            // Screenshot first: Ctrl+Shift+S would otherwise read as a save.
            if key.is_screenshot_shortcut() {
                if policy.block_screenshot {
                    // The OS capture still happens; detection only.
                    return Verdict::violation(ViolationType::ScreenshotAttempt);
                }
                return Verdict::allow();
            }
            if key.is_devtools_shortcut() {
                if policy.block_devtools {
                    return Verdict::violation(ViolationType::DevtoolsDetected).suppressed();
                }
                return Verdict::allow();
            }
            if key.is_save_shortcut() && policy.block_downloading {
                return Verdict::violation(ViolationType::DownloadAttempt).suppressed();
            }
            Verdict::allow()
        }
        Signal::DevToolsOpened => {
            if policy.block_devtools {
                Verdict::violation(ViolationType::DevtoolsDetected)
            } else {
                Verdict::allow()
            }
        }
        Signal::DownloadRequested => {
            if policy.block_downloading {
                Verdict::violation(ViolationType::DownloadAttempt).suppressed()
            } else {
                Verdict::allow()
            }
        }
        Signal::ScreenCaptureStarted => {
            if policy.block_screen_capturing || policy.block_recording {
                Verdict::violation(ViolationType::ScreenshotAttempt)
                    .with_action(CorrectiveAction::ForcePause)
            } else {
                Verdict::allow()
            }
        }
        Signal::ConcurrentSession => Verdict::violation(ViolationType::MultiSession)
            .with_action(CorrectiveAction::ForcePause),
        Signal::LoadedMetadata { .. } => Verdict::allow(),
    }
}
