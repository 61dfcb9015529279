//! Policy documents and effective policy resolution.
//!
//! Two persisted documents govern a play session: the global player policy
//! (watermark assets, blink timing, speed/pause/forward blocks) and the
//! per-video security policy. `resolve_policy` merges them into one
//! `EffectivePolicy`; `PolicyHandle` lets a refresh swap it atomically while
//! the engine keeps reading the current value at decision time.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

pub mod refresh;

pub const DEFAULT_VIOLATION_LIMIT: u32 = 4;
const DEFAULT_WATERMARK_OPACITY: f64 = 0.25;
const DEFAULT_LOGO_OPACITY: f64 = 0.6;
const DEFAULT_BLINK_DURATION_MS: u64 = 2000;
const DEFAULT_BLINK_INTERVAL_SECS: u64 = 5;

/// Global player document (`appConfig/player`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalPlayerPolicy {
    pub watermark_asset_path: Option<String>,
    pub watermark_opacity: f64,
    pub logo_asset_path: Option<String>,
    pub logo_opacity: f64,
    pub security_watermark_enabled: bool,
    pub blink_duration_ms: u64,
    pub blink_interval_seconds: u64,
    pub block_speed: bool,
    pub block_pause: bool,
    pub block_forward10: bool,
    pub updated_at: u64,
    pub updated_by: Option<String>,
}

impl Default for GlobalPlayerPolicy {
    fn default() -> Self {
        Self {
            watermark_asset_path: None,
            watermark_opacity: DEFAULT_WATERMARK_OPACITY,
            logo_asset_path: None,
            logo_opacity: DEFAULT_LOGO_OPACITY,
            security_watermark_enabled: true,
            blink_duration_ms: DEFAULT_BLINK_DURATION_MS,
            blink_interval_seconds: DEFAULT_BLINK_INTERVAL_SECS,
            block_speed: false,
            block_pause: false,
            block_forward10: false,
            updated_at: 0,
            updated_by: None,
        }
    }
}

/// Per-video security document (`videos/{id}.securitySettings`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoSecurityPolicy {
    pub block_recording: bool,
    pub block_screenshot: bool,
    pub block_right_click: bool,
    pub block_dev_tools: bool,
    pub violation_limit: u32,
    pub allowed_browsers: Vec<String>,
    pub focus_mode: bool,
    pub block_downloading: bool,
    pub block_screen_capturing: bool,
    pub require_fullscreen: bool,
}

impl Default for VideoSecurityPolicy {
    fn default() -> Self {
        Self {
            block_recording: true,
            block_screenshot: true,
            block_right_click: true,
            block_dev_tools: true,
            violation_limit: DEFAULT_VIOLATION_LIMIT,
            allowed_browsers: Vec::new(),
            focus_mode: true,
            block_downloading: true,
            block_screen_capturing: true,
            require_fullscreen: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WatermarkAssets {
    pub watermark_path: Option<String>,
    pub watermark_opacity: f64,
    pub logo_path: Option<String>,
    pub logo_opacity: f64,
}

/// Merged ruleset for one play session. Derived, never persisted.
#[derive(Clone, Debug, PartialEq)]
pub struct EffectivePolicy {
    pub assets: WatermarkAssets,
    pub security_watermark_enabled: bool,
    pub blink_duration: Duration,
    pub blink_interval: Duration,
    pub block_speed: bool,
    pub block_pause: bool,
    pub block_forward10: bool,
    pub block_recording: bool,
    pub block_screenshot: bool,
    pub block_right_click: bool,
    pub block_devtools: bool,
    pub focus_mode: bool,
    pub block_downloading: bool,
    pub block_screen_capturing: bool,
    pub require_fullscreen: bool,
    /// Always >= 1.
    pub violation_limit: u32,
    /// Lowercase browser families; empty allows every browser.
    pub allowed_browsers: Vec<String>,
}

impl EffectivePolicy {
    pub fn allows_browser(&self, browser: &str) -> bool {
        if self.allowed_browsers.is_empty() {
            return true;
        }
        let browser = browser.to_lowercase();
        self.allowed_browsers.iter().any(|allowed| allowed == &browser)
    }
}

impl Default for EffectivePolicy {
    fn default() -> Self {
        resolve_policy(&GlobalPlayerPolicy::default(), &VideoSecurityPolicy::default())
    }
}

/// Pure merge of the global and per-video documents.
pub fn resolve_policy(global: &GlobalPlayerPolicy, video: &VideoSecurityPolicy) -> EffectivePolicy {
    let violation_limit = if video.violation_limit == 0 {
        DEFAULT_VIOLATION_LIMIT
    } else {
        video.violation_limit
    };
    EffectivePolicy {
        assets: WatermarkAssets {
            watermark_path: global.watermark_asset_path.clone(),
            watermark_opacity: clamp_opacity(global.watermark_opacity),
            logo_path: global.logo_asset_path.clone(),
            logo_opacity: clamp_opacity(global.logo_opacity),
        },
        security_watermark_enabled: global.security_watermark_enabled,
        blink_duration: Duration::from_millis(global.blink_duration_ms.max(1)),
        blink_interval: Duration::from_secs(global.blink_interval_seconds.max(1)),
        block_speed: global.block_speed,
        block_pause: global.block_pause,
        block_forward10: global.block_forward10,
        block_recording: video.block_recording,
        block_screenshot: video.block_screenshot,
        block_right_click: video.block_right_click,
        block_devtools: video.block_dev_tools,
        focus_mode: video.focus_mode,
        block_downloading: video.block_downloading,
        block_screen_capturing: video.block_screen_capturing,
        require_fullscreen: video.require_fullscreen,
        violation_limit,
        allowed_browsers: video
            .allowed_browsers
            .iter()
            .map(|b| b.trim().to_lowercase())
            .filter(|b| !b.is_empty())
            .collect(),
    }
}

fn clamp_opacity(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

// -------------------- Policy Handle --------------------

type PolicyListener = Arc<dyn Fn(&EffectivePolicy) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PolicySubscription(u64);

struct PolicyShared {
    current: RwLock<Arc<EffectivePolicy>>,
    listeners: Mutex<Vec<(PolicySubscription, PolicyListener)>>,
    next_id: AtomicU64,
}

/// Shared, atomically swappable reference to the effective policy.
#[derive(Clone)]
pub struct PolicyHandle {
    inner: Arc<PolicyShared>,
}

impl PolicyHandle {
    pub fn new(policy: EffectivePolicy) -> Self {
        Self {
            inner: Arc::new(PolicyShared {
                current: RwLock::new(Arc::new(policy)),
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Snapshot of the policy in force right now.
    pub fn current(&self) -> Arc<EffectivePolicy> {
        self.inner
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a new policy and notify subscribers. Listeners run on the
    /// caller's thread, outside of every lock.
    pub fn replace(&self, policy: EffectivePolicy) {
        let policy = Arc::new(policy);
        {
            let mut current = self
                .inner
                .current
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *current = policy.clone();
        }
        let listeners: Vec<PolicyListener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&policy);
        }
    }

    pub fn subscribe<F>(&self, listener: F) -> PolicySubscription
    where
        F: Fn(&EffectivePolicy) + Send + Sync + 'static,
    {
        let id = PolicySubscription(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: PolicySubscription) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|(existing, _)| *existing != id);
    }
}

impl std::fmt::Debug for PolicyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyHandle")
            .field("current", &self.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn missing_fields_take_seeded_defaults() {
        let global: GlobalPlayerPolicy = serde_json::from_str("{}").expect("global");
        assert_eq!(global, GlobalPlayerPolicy::default());
        let video: VideoSecurityPolicy =
            serde_json::from_str(r#"{"blockRightClick": false}"#).expect("video");
        assert!(!video.block_right_click);
        assert_eq!(video.violation_limit, 4);
        assert!(video.require_fullscreen);
    }

    #[test]
    fn camel_case_wire_names() {
        let global: GlobalPlayerPolicy = serde_json::from_str(
            r#"{"blockForward10": true, "blinkIntervalSeconds": 9, "blockDevTools": true}"#,
        )
        .expect("global");
        assert!(global.block_forward10);
        assert_eq!(global.blink_interval_seconds, 9);

        let video: VideoSecurityPolicy =
            serde_json::from_str(r#"{"blockDevTools": false, "violationLimit": 2}"#).expect("video");
        assert!(!video.block_dev_tools);
        assert_eq!(video.violation_limit, 2);
    }

    #[test]
    fn violation_limit_is_always_positive() {
        let video = VideoSecurityPolicy {
            violation_limit: 0,
            ..VideoSecurityPolicy::default()
        };
        let policy = resolve_policy(&GlobalPlayerPolicy::default(), &video);
        assert_eq!(policy.violation_limit, DEFAULT_VIOLATION_LIMIT);

        let video = VideoSecurityPolicy {
            violation_limit: 1,
            ..VideoSecurityPolicy::default()
        };
        assert_eq!(
            resolve_policy(&GlobalPlayerPolicy::default(), &video).violation_limit,
            1
        );
    }

    #[test]
    fn resolution_clamps_and_normalizes() {
        let global = GlobalPlayerPolicy {
            watermark_opacity: 3.0,
            logo_opacity: -1.0,
            blink_interval_seconds: 0,
            blink_duration_ms: 0,
            block_pause: true,
            ..GlobalPlayerPolicy::default()
        };
        let video = VideoSecurityPolicy {
            allowed_browsers: vec!["Chrome".to_string(), " Edge ".to_string(), "".to_string()],
            ..VideoSecurityPolicy::default()
        };
        let policy = resolve_policy(&global, &video);
        assert_eq!(policy.assets.watermark_opacity, 1.0);
        assert_eq!(policy.assets.logo_opacity, 0.0);
        assert_eq!(policy.blink_interval, Duration::from_secs(1));
        assert_eq!(policy.blink_duration, Duration::from_millis(1));
        assert!(policy.block_pause);
        assert_eq!(policy.allowed_browsers, vec!["chrome", "edge"]);
        assert!(policy.allows_browser("Chrome"));
        assert!(!policy.allows_browser("firefox"));
    }

    #[test]
    fn empty_allow_list_allows_everything() {
        assert!(EffectivePolicy::default().allows_browser("unknown"));
    }

    #[test]
    fn handle_swaps_and_notifies() {
        let handle = PolicyHandle::new(EffectivePolicy::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let sub = handle.subscribe(move |policy| {
            assert!(policy.block_speed);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        let before = handle.current();
        let mut next = EffectivePolicy::default();
        next.block_speed = true;
        handle.replace(next.clone());

        assert!(!before.block_speed);
        assert!(handle.current().block_speed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        handle.unsubscribe(sub);
        handle.replace(next);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
