//! Violation taxonomy and append-only violation records.

use anyhow::{anyhow, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Wire-level violation types. The serialized strings are stable.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    ExitFullscreen,
    FocusLost,
    DevtoolsDetected,
    RightClick,
    ScreenshotAttempt,
    DownloadAttempt,
    MultiSession,
    PauseAttempt,
    SpeedAttempt,
    SeekForwardAttempt,
    Forward10Attempt,
}

impl ViolationType {
    pub const ALL: [ViolationType; 11] = [
        ViolationType::ExitFullscreen,
        ViolationType::FocusLost,
        ViolationType::DevtoolsDetected,
        ViolationType::RightClick,
        ViolationType::ScreenshotAttempt,
        ViolationType::DownloadAttempt,
        ViolationType::MultiSession,
        ViolationType::PauseAttempt,
        ViolationType::SpeedAttempt,
        ViolationType::SeekForwardAttempt,
        ViolationType::Forward10Attempt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ViolationType::ExitFullscreen => "exit_fullscreen",
            ViolationType::FocusLost => "focus_lost",
            ViolationType::DevtoolsDetected => "devtools_detected",
            ViolationType::RightClick => "right_click",
            ViolationType::ScreenshotAttempt => "screenshot_attempt",
            ViolationType::DownloadAttempt => "download_attempt",
            ViolationType::MultiSession => "multi_session",
            ViolationType::PauseAttempt => "pause_attempt",
            ViolationType::SpeedAttempt => "speed_attempt",
            ViolationType::SeekForwardAttempt => "seek_forward_attempt",
            ViolationType::Forward10Attempt => "forward10_attempt",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == raw)
            .ok_or_else(|| anyhow!("unknown violation type '{}'", raw))
    }

    pub fn severity(self) -> Severity {
        Severity::for_type(self)
    }
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn for_type(ty: ViolationType) -> Self {
        match ty {
            ViolationType::DevtoolsDetected | ViolationType::ScreenshotAttempt => Severity::High,
            _ => Severity::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViolationMetadata {
    pub user_agent: String,
    pub ip_hash: String,
    pub page: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browser: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Immutable log entry. Created exactly once per detected violation; only
/// `resolved` may change later, and never from the player.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViolationRecord {
    pub id: String,
    pub user_id: String,
    pub email_lower: String,
    pub video_id: String,
    pub video_title: String,
    pub session_id: String,
    pub violation_type: ViolationType,
    pub timestamp: u64,
    pub severity: Severity,
    #[serde(default)]
    pub resolved: bool,
    pub metadata: ViolationMetadata,
}

/// Identity and device context stamped onto every record of one session.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ViolationContext {
    pub user_id: String,
    pub email_lower: String,
    pub video_id: String,
    pub video_title: String,
    pub session_id: String,
    pub user_agent: String,
    pub ip_hash: String,
    pub browser: String,
    pub page: String,
    pub share_id: String,
}

impl ViolationRecord {
    pub fn new(violation_type: ViolationType, ctx: &ViolationContext, timestamp: u64) -> Self {
        Self {
            id: new_record_id(),
            user_id: ctx.user_id.clone(),
            email_lower: ctx.email_lower.clone(),
            video_id: ctx.video_id.clone(),
            video_title: ctx.video_title.clone(),
            session_id: ctx.session_id.clone(),
            violation_type,
            timestamp,
            severity: Severity::for_type(violation_type),
            resolved: false,
            metadata: ViolationMetadata {
                user_agent: ctx.user_agent.clone(),
                ip_hash: ctx.ip_hash.clone(),
                page: ctx.page.clone(),
                browser: Some(ctx.browser.clone()),
                extra: Some(serde_json::json!({ "shareId": ctx.share_id })),
            },
        }
    }
}

fn new_record_id() -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..12)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("v_{}", suffix)
}
