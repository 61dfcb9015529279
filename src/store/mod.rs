//! Collaborator capabilities the engine depends on.
//!
//! Every capability is a small `Send + Sync` trait taking `&self`; backends
//! lock internally. Two backends exist: an in-memory demo/offline backend
//! and a durable SQLite backend. `open_backend` picks one from config.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{BackendKind, PlayerConfig};
use crate::policy::refresh::PolicySource;
use crate::policy::{GlobalPlayerPolicy, VideoSecurityPolicy};
use crate::session::{AccessSession, SessionRequest, SessionStatus};
use crate::violation::ViolationRecord;

pub mod memory;
pub mod sqlite;

use memory::InMemoryBackend;
use sqlite::SqliteBackend;

// -------------------- Capabilities --------------------

pub type SessionListener = Arc<dyn Fn(&AccessSession) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub trait SessionStore: Send + Sync {
    /// Idempotent per (viewer, video): returns the existing record if present.
    fn get_or_create_session(&self, req: &SessionRequest) -> Result<AccessSession>;

    fn get_session(&self, session_id: &str) -> Result<Option<AccessSession>>;

    /// Monotonic merge: the stored count becomes max(stored, count) and a
    /// terminal status is never replaced by a lower-ranked one.
    fn update_session_violations(
        &self,
        session_id: &str,
        count: u32,
        status: Option<SessionStatus>,
    ) -> Result<AccessSession>;

    fn touch_session(&self, session_id: &str, at: u64) -> Result<()>;

    /// Listener fires after every change to the session, on the writer's thread.
    fn subscribe(&self, session_id: &str, listener: SessionListener) -> Result<SubscriptionId>;

    fn unsubscribe(&self, id: SubscriptionId);
}

/// Append-only violation log.
pub trait ViolationRecorder: Send + Sync {
    fn append_violation(&self, record: &ViolationRecord) -> Result<()>;
    fn violations_for_session(&self, session_id: &str) -> Result<Vec<ViolationRecord>>;
}

pub trait VideoDirectory: Send + Sync {
    fn resolve_public_video(&self, share_token: &str) -> Result<VideoResolution>;
}

// -------------------- Video Records --------------------

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VideoStatus {
    #[default]
    Active,
    Deleted,
    Draft,
}

/// How the availability window of a shared link is anchored.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    /// Window starts when the viewer first opens the link.
    #[default]
    FromFirstAccess,
    /// Window starts when the link was (re)generated.
    FromGeneration,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AvailabilitySettings {
    /// 0 falls back to the configured default window.
    pub available_duration_seconds: u64,
    pub share_id: String,
    pub link_rotated_at: u64,
    pub link_mode: LinkMode,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: VideoStatus,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub security_settings: VideoSecurityPolicy,
    #[serde(default)]
    pub availability_settings: AvailabilitySettings,
}

impl Video {
    pub fn is_playable(&self) -> bool {
        self.status == VideoStatus::Active
    }

    pub fn share_id(&self) -> &str {
        &self.availability_settings.share_id
    }

    /// Expiry (ms) for a session first created at `created_at`.
    pub fn session_expires_at(&self, created_at: u64, default_window: Duration) -> u64 {
        let availability = &self.availability_settings;
        let window_ms = if availability.available_duration_seconds > 0 {
            availability.available_duration_seconds.saturating_mul(1000)
        } else {
            u64::try_from(default_window.as_millis()).unwrap_or(u64::MAX)
        };
        let anchor = match availability.link_mode {
            LinkMode::FromFirstAccess => created_at,
            LinkMode::FromGeneration if availability.link_rotated_at > 0 => {
                availability.link_rotated_at
            }
            LinkMode::FromGeneration => created_at,
        };
        anchor.saturating_add(window_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VideoResolution {
    Found(Video),
    NotFound,
    /// The public link was revoked by an administrator.
    Revoked,
}

// -------------------- Subscriptions --------------------

/// Listener registry shared by both backends. Listeners are collected under
/// the lock and invoked after it is released.
pub(crate) struct SubscriberSet {
    next_id: AtomicU64,
    entries: Mutex<Vec<(SubscriptionId, String, SessionListener)>>,
}

impl SubscriberSet {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, session_id: &str, listener: SessionListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, session_id.to_string(), listener));
        id
    }

    pub(crate) fn remove(&self, id: SubscriptionId) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|(existing, _, _)| *existing != id);
    }

    pub(crate) fn notify(&self, session: &AccessSession) {
        let listeners: Vec<SessionListener> = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(_, session_id, _)| session_id == &session.id)
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(session);
        }
    }
}

// -------------------- Backend Selection --------------------

/// The four collaborators handed to the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionStore>,
    pub violations: Arc<dyn ViolationRecorder>,
    pub videos: Arc<dyn VideoDirectory>,
    pub policies: Arc<dyn PolicySource>,
}

impl Collaborators {
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: SessionStore + ViolationRecorder + VideoDirectory + PolicySource + 'static,
    {
        Self {
            sessions: backend.clone(),
            violations: backend.clone(),
            videos: backend.clone(),
            policies: backend,
        }
    }
}

pub enum Backend {
    Demo(Arc<InMemoryBackend>),
    Sqlite(Arc<SqliteBackend>),
}

impl Backend {
    pub fn collaborators(&self) -> Collaborators {
        match self {
            Backend::Demo(b) => Collaborators::from_backend(b.clone()),
            Backend::Sqlite(b) => Collaborators::from_backend(b.clone()),
        }
    }

    pub fn publish_video(&self, video: &Video) -> Result<()> {
        match self {
            Backend::Demo(b) => b.publish_video(video),
            Backend::Sqlite(b) => b.publish_video(video),
        }
    }

    pub fn publish_global_policy(&self, policy: &GlobalPlayerPolicy) -> Result<()> {
        match self {
            Backend::Demo(b) => b.publish_global_policy(policy),
            Backend::Sqlite(b) => b.publish_global_policy(policy),
        }
    }

    pub fn revoke_link(&self, share_id: &str) -> Result<()> {
        match self {
            Backend::Demo(b) => b.revoke_link(share_id),
            Backend::Sqlite(b) => b.revoke_link(share_id),
        }
    }
}

pub fn open_backend(config: &PlayerConfig) -> Result<Backend> {
    match config.backend {
        BackendKind::Demo => {
            log::info!("player backend: demo (in-memory)");
            Ok(Backend::Demo(Arc::new(InMemoryBackend::new())))
        }
        BackendKind::Sqlite => {
            log::info!("player backend: sqlite ({})", config.db_path.display());
            Ok(Backend::Sqlite(Arc::new(SqliteBackend::open(&config.db_path)?)))
        }
    }
}
