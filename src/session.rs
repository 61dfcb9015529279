//! Access sessions: the durable (viewer, video) record.

use serde::{Deserialize, Serialize};

use crate::hash_descriptor;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Revoked,
    Expired,
}

impl SessionStatus {
    /// Terminal statuses outrank active; revoked outranks everything.
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Active => 0,
            SessionStatus::Expired => 1,
            SessionStatus::Revoked => 2,
        }
    }
}

/// Registered viewer, as captured by the registration form.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ViewerIdentity {
    pub viewer_id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cnic: Option<String>,
}

impl ViewerIdentity {
    pub fn email_lower(&self) -> String {
        self.email.trim().to_lowercase()
    }

    /// Text rendered inside the blinking security watermark.
    pub fn watermark_label(&self) -> String {
        match &self.cnic {
            Some(cnic) => format!("{} | {}", self.name.to_uppercase(), cnic),
            None => self.name.to_uppercase(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub user_agent: String,
    pub device_info: String,
    pub remote_addr: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_string(),
            device_info: detect_browser(user_agent).to_string(),
            remote_addr: None,
        }
    }

    pub fn browser(&self) -> &'static str {
        detect_browser(&self.user_agent)
    }

    pub fn ip_hash(&self) -> String {
        hash_descriptor(&[self.remote_addr.as_deref().unwrap_or("local")])
    }
}

#[derive(Clone, Debug)]
pub struct SessionRequest {
    pub viewer: ViewerIdentity,
    pub video_id: String,
    pub device: DeviceDescriptor,
    pub now: u64,
    pub expires_at: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessSession {
    pub id: String,
    pub video_id: String,
    pub user_id: String,
    pub email_lower: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub violations_count: u32,
    pub status: SessionStatus,
    pub device_info: String,
    pub ip_hash: String,
    pub user_agent: String,
    pub last_token_issued_at: u64,
    pub last_seen_at: u64,
}

impl AccessSession {
    pub fn new(req: &SessionRequest) -> Self {
        Self {
            id: session_id_for(&req.viewer.viewer_id, &req.video_id),
            video_id: req.video_id.clone(),
            user_id: req.viewer.viewer_id.clone(),
            email_lower: req.viewer.email_lower(),
            created_at: req.now,
            expires_at: req.expires_at,
            violations_count: 0,
            status: SessionStatus::Active,
            device_info: req.device.device_info.clone(),
            ip_hash: req.device.ip_hash(),
            user_agent: req.device.user_agent.clone(),
            last_token_issued_at: req.now,
            last_seen_at: req.now,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.status == SessionStatus::Revoked
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.status == SessionStatus::Expired || (self.expires_at > 0 && self.expires_at <= now)
    }

    /// Monotonic merge used by every store: the count never decreases and a
    /// terminal status is never replaced by a lower-ranked one.
    /// Returns true if anything changed.
    pub fn merge_violations(&mut self, count: u32, status: Option<SessionStatus>) -> bool {
        let mut changed = false;
        if count > self.violations_count {
            self.violations_count = count;
            changed = true;
        }
        if let Some(status) = status {
            if status.rank() > self.status.rank() {
                self.status = status;
                changed = true;
            }
        }
        changed
    }
}

/// Deterministic session id so get-or-create is idempotent per (viewer, video).
pub fn session_id_for(viewer_id: &str, video_id: &str) -> String {
    let digest = hash_descriptor(&[viewer_id, video_id]);
    format!("s_{}", &digest[..24])
}

/// Lowercase browser family from a user agent string.
pub fn detect_browser(user_agent: &str) -> &'static str {
    let ua = user_agent.to_lowercase();
    if ua.contains("edg/") || ua.contains("edge/") {
        "edge"
    } else if ua.contains("opr/") || ua.contains("opera") {
        "opera"
    } else if ua.contains("firefox/") || ua.contains("fxios") {
        "firefox"
    } else if ua.contains("chrome/") || ua.contains("crios") || ua.contains("chromium") {
        "chrome"
    } else if ua.contains("safari/") {
        "safari"
    } else {
        "unknown"
    }
}
