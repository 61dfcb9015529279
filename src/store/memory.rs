//! Demo/offline backend. Same capabilities as the durable backend, state
//! kept in process memory.

use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::{
    SessionListener, SessionStore, SubscriberSet, SubscriptionId, Video, VideoDirectory,
    VideoResolution, ViolationRecorder,
};
use crate::policy::refresh::PolicySource;
use crate::policy::GlobalPlayerPolicy;
use crate::session::{session_id_for, AccessSession, SessionRequest, SessionStatus};
use crate::violation::ViolationRecord;

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<String, AccessSession>,
    violations: Vec<ViolationRecord>,
    videos: HashMap<String, Video>,
    revoked_links: HashSet<String>,
    global_policy: Option<GlobalPlayerPolicy>,
}

pub struct InMemoryBackend {
    state: Mutex<MemoryState>,
    subscribers: SubscriberSet,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            subscribers: SubscriberSet::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("demo backend lock poisoned"))
    }

    /// Publish or replace a video under its share id.
    pub fn publish_video(&self, video: &Video) -> Result<()> {
        let share_id = video.share_id();
        if share_id.is_empty() {
            return Err(anyhow!("video {} has no share id", video.id));
        }
        let mut state = self.lock()?;
        state.revoked_links.remove(share_id);
        state.videos.insert(share_id.to_string(), video.clone());
        Ok(())
    }

    pub fn publish_global_policy(&self, policy: &GlobalPlayerPolicy) -> Result<()> {
        self.lock()?.global_policy = Some(policy.clone());
        Ok(())
    }

    pub fn revoke_link(&self, share_id: &str) -> Result<()> {
        self.lock()?.revoked_links.insert(share_id.to_string());
        Ok(())
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for InMemoryBackend {
    fn get_or_create_session(&self, req: &SessionRequest) -> Result<AccessSession> {
        let id = session_id_for(&req.viewer.viewer_id, &req.video_id);
        let mut state = self.lock()?;
        let session = state
            .sessions
            .entry(id)
            .and_modify(|existing| existing.last_token_issued_at = req.now)
            .or_insert_with(|| AccessSession::new(req));
        Ok(session.clone())
    }

    fn get_session(&self, session_id: &str) -> Result<Option<AccessSession>> {
        Ok(self.lock()?.sessions.get(session_id).cloned())
    }

    fn update_session_violations(
        &self,
        session_id: &str,
        count: u32,
        status: Option<SessionStatus>,
    ) -> Result<AccessSession> {
        let (changed, snapshot) = {
            let mut state = self.lock()?;
            let session = state
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| anyhow!("unknown session {}", session_id))?;
            let changed = session.merge_violations(count, status);
            (changed, session.clone())
        };
        if changed {
            self.subscribers.notify(&snapshot);
        }
        Ok(snapshot)
    }

    fn touch_session(&self, session_id: &str, at: u64) -> Result<()> {
        let mut state = self.lock()?;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("unknown session {}", session_id))?;
        session.last_seen_at = session.last_seen_at.max(at);
        Ok(())
    }

    fn subscribe(&self, session_id: &str, listener: SessionListener) -> Result<SubscriptionId> {
        Ok(self.subscribers.add(session_id, listener))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(id);
    }
}

impl ViolationRecorder for InMemoryBackend {
    fn append_violation(&self, record: &ViolationRecord) -> Result<()> {
        let mut state = self.lock()?;
        if state.violations.iter().any(|existing| existing.id == record.id) {
            return Err(anyhow!("violation {} already recorded", record.id));
        }
        state.violations.push(record.clone());
        Ok(())
    }

    fn violations_for_session(&self, session_id: &str) -> Result<Vec<ViolationRecord>> {
        Ok(self
            .lock()?
            .violations
            .iter()
            .filter(|record| record.session_id == session_id)
            .cloned()
            .collect())
    }
}

impl VideoDirectory for InMemoryBackend {
    fn resolve_public_video(&self, share_token: &str) -> Result<VideoResolution> {
        let state = self.lock()?;
        if state.revoked_links.contains(share_token) {
            return Ok(VideoResolution::Revoked);
        }
        match state.videos.get(share_token) {
            Some(video) if video.is_playable() => Ok(VideoResolution::Found(video.clone())),
            _ => Ok(VideoResolution::NotFound),
        }
    }
}

impl PolicySource for InMemoryBackend {
    fn fetch_global_policy(&self) -> Result<Option<GlobalPlayerPolicy>> {
        Ok(self.lock()?.global_policy.clone())
    }
}
