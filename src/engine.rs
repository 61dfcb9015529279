//! Enforcement state machine.
//!
//! `Loading → Active → {Playing, Paused} → Revoked`, plus a terminal `Error`
//! reachable only from `Loading`. Every signal is classified against the
//! policy in force at that instant; the corrective action is applied to the
//! surface before anything is queued for persistence, and the revoke
//! decision is taken from the in-memory count.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::LocalSessionCache;
use crate::classify::{classify, rate_drifted, CorrectiveAction, Verdict, NORMAL_RATE};
use crate::error::{LoadFailure, PlayerError};
use crate::persist::{PersistCommand, PersistenceQueue};
use crate::policy::refresh::load_effective_policy;
use crate::policy::{EffectivePolicy, PolicyHandle};
use crate::session::{AccessSession, DeviceDescriptor, SessionRequest, SessionStatus, ViewerIdentity};
use crate::signal::Signal;
use crate::store::{Collaborators, Video, VideoResolution};
use crate::surface::PlaybackSurface;
use crate::violation::{ViolationContext, ViolationRecord, ViolationType};
use crate::{now_ms, validate_share_token};

/// `lastSeenAt` is refreshed at most this often while playing.
pub const HEARTBEAT_INTERVAL_MS: u64 = 30_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "failure", rename_all = "snake_case")]
pub enum PlayerState {
    Loading,
    Active,
    Playing,
    Paused,
    Revoked,
    Error(LoadFailure),
}

impl PlayerState {
    /// Signals are classified only in these states.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            PlayerState::Active | PlayerState::Playing | PlayerState::Paused
        )
    }
}

/// Terminal, non-dismissible notice rendered over the player.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "notice", content = "failure", rename_all = "snake_case")]
pub enum Notice {
    AccessRevoked,
    LoadFailed(LoadFailure),
}

impl Notice {
    pub fn message(&self) -> String {
        match self {
            Notice::AccessRevoked => {
                "Access revoked due to security policy violations.".to_string()
            }
            Notice::LoadFailed(failure) => failure.message(),
        }
    }
}

/// Owned by the engine; discarded on unmount.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackState {
    pub current_time: f64,
    pub duration: f64,
    pub paused: bool,
    pub playback_rate: f64,
    pub fullscreen: bool,
    pub last_allowed_time: f64,
    /// Mirror of the session count, incremented synchronously.
    pub violations: u32,
    pub fullscreen_supported: bool,
    /// Set when the engine itself paused the surface, so the resulting
    /// native pause event is not read as a user pause.
    pub engine_pause_pending: bool,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            current_time: 0.0,
            duration: 0.0,
            paused: true,
            playback_rate: NORMAL_RATE,
            fullscreen: false,
            last_allowed_time: 0.0,
            violations: 0,
            fullscreen_supported: true,
            engine_pause_pending: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Outcome {
    #[serde(flatten)]
    pub state: PlayerState,
    pub violations: Vec<ViolationType>,
    pub suppress_default: bool,
    /// Running count against the limit ("Compliance Status: N / MAX").
    pub violations_count: u32,
    pub violation_limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notice: Option<Notice>,
}

/// Raised once on revoke; timers poll it to stop themselves.
#[derive(Clone, Debug, Default)]
pub struct RevocationFlag(Arc<AtomicBool>);

impl RevocationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub share_token: String,
    pub viewer: ViewerIdentity,
    pub device: DeviceDescriptor,
    /// Page path stamped into violation metadata.
    pub page: String,
    /// Used when the video sets no availability window.
    pub default_available: Duration,
}

pub struct EnforcementEngine<S: PlaybackSurface> {
    state: PlayerState,
    playback: PlaybackState,
    surface: S,
    policy: PolicyHandle,
    session: Option<AccessSession>,
    video: Option<Video>,
    context: Option<ViolationContext>,
    persist: PersistenceQueue,
    revocation: RevocationFlag,
    notice: Option<Notice>,
    last_touch_ms: u64,
}

fn clock_ms() -> u64 {
    now_ms().unwrap_or_else(|e| {
        log::warn!("system clock unavailable: {}", e);
        0
    })
}

impl<S: PlaybackSurface> EnforcementEngine<S> {
    /// Run the Loading state to completion. Never fails: resolution
    /// problems end in `Error` or `Revoked`.
    pub fn load(
        collaborators: &Collaborators,
        cache: Option<&LocalSessionCache>,
        surface: S,
        request: LoadRequest,
        persist: PersistenceQueue,
    ) -> Self {
        let playback = PlaybackState {
            current_time: surface.current_time(),
            duration: surface.duration(),
            paused: surface.is_paused(),
            playback_rate: surface.playback_rate(),
            fullscreen: surface.is_fullscreen(),
            last_allowed_time: surface.current_time(),
            fullscreen_supported: surface.supports_fullscreen(),
            ..PlaybackState::default()
        };
        let mut engine = Self {
            state: PlayerState::Loading,
            playback,
            surface,
            policy: PolicyHandle::new(EffectivePolicy::default()),
            session: None,
            video: None,
            context: None,
            persist,
            revocation: RevocationFlag::new(),
            notice: None,
            last_touch_ms: 0,
        };
        if let Err(failure) = engine.resolve(collaborators, cache, &request) {
            engine.fail(failure);
        }
        engine
    }

    fn resolve(
        &mut self,
        collaborators: &Collaborators,
        cache: Option<&LocalSessionCache>,
        request: &LoadRequest,
    ) -> Result<(), LoadFailure> {
        let token = request.share_token.as_str();
        validate_share_token(token).map_err(|_| LoadFailure::InvalidShareToken)?;
        let now = now_ms().map_err(|e| LoadFailure::SessionUnavailable(e.to_string()))?;

        let video = match collaborators.videos.resolve_public_video(token) {
            Ok(VideoResolution::Found(video)) => video,
            Ok(VideoResolution::NotFound) => return Err(LoadFailure::VideoNotFound),
            Ok(VideoResolution::Revoked) => {
                log::warn!("share link {} has been revoked", token);
                self.enter_revoked();
                return Ok(());
            }
            Err(e) => return Err(LoadFailure::SessionUnavailable(e.to_string())),
        };

        let policy = load_effective_policy(collaborators.policies.as_ref(), &video.security_settings)
            .map_err(|e| LoadFailure::PolicyUnavailable(e.to_string()))?;
        self.policy.replace(policy.clone());
        self.video = Some(video.clone());

        // A cached session id lets a reload honour revocation before the
        // remote get-or-create answers.
        if let Some(session) = self.cached_revoked_session(collaborators, cache, request) {
            self.session = Some(session);
            self.enter_revoked();
            return Ok(());
        }

        let browser = request.device.browser();
        if !policy.allows_browser(browser) {
            return Err(LoadFailure::BrowserNotAllowed(browser.to_string()));
        }

        let session_request = SessionRequest {
            viewer: request.viewer.clone(),
            video_id: video.id.clone(),
            device: request.device.clone(),
            now,
            expires_at: video.session_expires_at(now, request.default_available),
        };
        let session = collaborators
            .sessions
            .get_or_create_session(&session_request)
            .map_err(|e| LoadFailure::SessionUnavailable(e.to_string()))?;

        if session.is_revoked() {
            log::warn!("session {} is revoked; playback denied", session.id);
            self.session = Some(session);
            self.enter_revoked();
            return Ok(());
        }
        if session.is_expired(now) {
            self.persist.enqueue(PersistCommand::UpdateSession {
                session_id: session.id.clone(),
                count: session.violations_count,
                status: Some(SessionStatus::Expired),
            });
            return Err(LoadFailure::SessionExpired);
        }

        if let Some(cache) = cache {
            if let Err(e) = cache.remember_session_id(token, &video.id, &session.id) {
                log::warn!("failed to cache session id: {}", e);
            }
        }

        self.context = Some(ViolationContext {
            user_id: session.user_id.clone(),
            email_lower: session.email_lower.clone(),
            video_id: video.id.clone(),
            video_title: video.title.clone(),
            session_id: session.id.clone(),
            user_agent: request.device.user_agent.clone(),
            ip_hash: session.ip_hash.clone(),
            browser: browser.to_string(),
            page: request.page.clone(),
            share_id: token.to_string(),
        });
        self.playback.violations = session.violations_count;

        if !self.playback.fullscreen_supported {
            log::warn!(
                "{}",
                PlayerError::UnsupportedSignal {
                    capability: "fullscreen",
                    message: "fullscreen rules are skipped on this surface".to_string(),
                }
            );
        }

        let session_id = session.id.clone();
        let count = session.violations_count;
        self.session = Some(session);
        if count >= policy.violation_limit {
            self.revoke("stored violation count already at limit");
            return Ok(());
        }

        self.state = PlayerState::Active;
        self.last_touch_ms = now;
        self.persist.enqueue(PersistCommand::Touch {
            session_id: session_id.clone(),
            at: now,
        });
        log::info!(
            "player active: session={} violations={}/{}",
            session_id,
            count,
            policy.violation_limit
        );
        Ok(())
    }

    fn cached_revoked_session(
        &self,
        collaborators: &Collaborators,
        cache: Option<&LocalSessionCache>,
        request: &LoadRequest,
    ) -> Option<AccessSession> {
        let entry = match cache?.load(&request.share_token) {
            Ok(entry) => entry?,
            Err(e) => {
                log::warn!("session cache unavailable: {}", e);
                return None;
            }
        };
        let session_id = entry.session_id?;
        match collaborators.sessions.get_session(&session_id) {
            Ok(Some(session))
                if session.is_revoked() && session.user_id == request.viewer.viewer_id =>
            {
                log::warn!("cached session {} is revoked; playback denied", session.id);
                Some(session)
            }
            Ok(_) => None,
            Err(e) => {
                log::warn!("cached session lookup failed: {}", e);
                None
            }
        }
    }

    fn fail(&mut self, failure: LoadFailure) {
        log::error!("{}", PlayerError::PolicyResolution(failure.clone()));
        self.state = PlayerState::Error(failure.clone());
        self.notice = Some(Notice::LoadFailed(failure));
    }

    /// Straight to `Revoked` from `Loading`: no persistence, never `Active`.
    fn enter_revoked(&mut self) {
        self.deny_playback();
        self.state = PlayerState::Revoked;
        self.revocation.raise();
        self.notice = Some(Notice::AccessRevoked);
    }

    fn deny_playback(&mut self) {
        if let Err(e) = self.surface.pause() {
            log::error!("failed to pause surface: {}", e);
        }
        self.playback.paused = true;
    }

    // -------------------- Signal Handling --------------------

    pub fn handle(&mut self, signal: &Signal) -> Outcome {
        let mut violations = Vec::new();
        let mut suppress_default = false;

        if self.state == PlayerState::Revoked {
            if matches!(signal, Signal::Play) {
                log::warn!("play attempted after revocation; re-pausing");
                self.deny_playback();
            }
        } else if self.state.is_live() {
            if let Signal::TimeUpdate { .. } = signal {
                let observed = self.surface.playback_rate();
                if rate_drifted(observed) && self.policy.current().block_speed {
                    let drift = Signal::RateChange { rate: observed };
                    suppress_default |= self.process(&drift, &mut violations);
                }
            }
            if self.state.is_live() {
                suppress_default |= self.process(signal, &mut violations);
            }
            if let Signal::TimeUpdate { .. } = signal {
                self.heartbeat();
            }
        }

        self.outcome(violations, suppress_default)
    }

    fn process(&mut self, signal: &Signal, violations: &mut Vec<ViolationType>) -> bool {
        self.observe(signal);
        // Read at decision time so a refresh mid-session applies immediately.
        let policy = self.policy.current();
        let verdict = classify(signal, &policy, &self.playback);
        if let Some(action) = verdict.action {
            self.apply(action);
        }
        self.settle(signal, &verdict);
        if let Some(ty) = verdict.violation {
            violations.push(ty);
            self.record_violation(ty, &policy);
        }
        verdict.suppress_default
    }

    /// Mirror what the surface reported, before classification.
    fn observe(&mut self, signal: &Signal) {
        match signal {
            Signal::TimeUpdate { time } => self.playback.current_time = *time,
            Signal::Seeking { target } => self.playback.current_time = *target,
            Signal::RateChange { rate } => self.playback.playback_rate = *rate,
            Signal::FullscreenChange { fullscreen } => self.playback.fullscreen = *fullscreen,
            Signal::LoadedMetadata { duration } => self.playback.duration = *duration,
            _ => {}
        }
    }

    fn apply(&mut self, action: CorrectiveAction) {
        let result = match action {
            CorrectiveAction::ForcePause => {
                let was_playing = !self.playback.paused;
                self.playback.paused = true;
                self.state = PlayerState::Paused;
                let result = self.surface.pause();
                // Only an accepted pause produces a native echo to swallow.
                if was_playing && result.is_ok() {
                    self.playback.engine_pause_pending = true;
                }
                result
            }
            CorrectiveAction::ForcePlay => {
                self.playback.paused = false;
                self.state = PlayerState::Playing;
                self.surface.play()
            }
            CorrectiveAction::ResetRate => {
                self.playback.playback_rate = NORMAL_RATE;
                self.surface.set_rate(NORMAL_RATE)
            }
            CorrectiveAction::SeekTo(time) => {
                self.playback.current_time = time;
                self.surface.seek(time)
            }
            CorrectiveAction::RequestFullscreen => {
                let result = self.surface.request_fullscreen();
                self.playback.fullscreen = self.surface.is_fullscreen();
                if let Err(e) = &result {
                    log::warn!(
                        "{}",
                        PlayerError::UnsupportedSignal {
                            capability: "fullscreen",
                            message: e.to_string(),
                        }
                    );
                    return;
                }
                result
            }
        };
        if let Err(e) = result {
            log::error!("corrective action {:?} failed: {}", action, e);
        }
    }

    /// State bookkeeping after the corrective action.
    fn settle(&mut self, signal: &Signal, verdict: &Verdict) {
        match signal {
            Signal::Play => {
                self.playback.engine_pause_pending = false;
                self.playback.paused = false;
                self.state = PlayerState::Playing;
            }
            Signal::Pause => {
                if verdict.action != Some(CorrectiveAction::ForcePlay) {
                    self.playback.engine_pause_pending = false;
                    self.playback.paused = true;
                    self.state = PlayerState::Paused;
                }
            }
            Signal::TimeUpdate { time } | Signal::Seeking { target: time } => {
                if verdict.violation.is_none() {
                    self.playback.last_allowed_time = *time;
                }
            }
            _ => {}
        }
    }

    fn record_violation(&mut self, ty: ViolationType, policy: &EffectivePolicy) {
        self.playback.violations = self.playback.violations.saturating_add(1);
        let count = self.playback.violations;
        log::warn!(
            "violation {} ({}): {}/{}",
            ty,
            ty.severity(),
            count,
            policy.violation_limit
        );

        if let Some(session) = self.session.as_mut() {
            session.merge_violations(count, None);
            self.persist.enqueue(PersistCommand::UpdateSession {
                session_id: session.id.clone(),
                count,
                status: None,
            });
        }
        if let Some(ctx) = &self.context {
            let record = ViolationRecord::new(ty, ctx, clock_ms());
            self.persist.enqueue(PersistCommand::AppendViolation(record));
        }

        if count >= policy.violation_limit {
            self.revoke("violation limit reached");
        }
    }

    /// Terminal transition. Idempotent.
    fn revoke(&mut self, reason: &str) {
        if self.state == PlayerState::Revoked {
            return;
        }
        if self.playback.fullscreen || self.surface.is_fullscreen() {
            if let Err(e) = self.surface.exit_fullscreen() {
                log::error!("failed to exit fullscreen on revoke: {}", e);
            }
            self.playback.fullscreen = false;
        }
        self.deny_playback();
        self.state = PlayerState::Revoked;
        self.revocation.raise();
        self.notice = Some(Notice::AccessRevoked);

        let count = self.playback.violations;
        if let Some(session) = self.session.as_mut() {
            session.merge_violations(count, Some(SessionStatus::Revoked));
            self.persist.enqueue(PersistCommand::UpdateSession {
                session_id: session.id.clone(),
                count,
                status: Some(SessionStatus::Revoked),
            });
            log::error!("access revoked: session={} reason={}", session.id, reason);
        } else {
            log::error!("access revoked: {}", reason);
        }
    }

    fn heartbeat(&mut self) {
        if self.state != PlayerState::Playing {
            return;
        }
        let now = clock_ms();
        if now.saturating_sub(self.last_touch_ms) < HEARTBEAT_INTERVAL_MS {
            return;
        }
        if let Some(session) = &self.session {
            self.last_touch_ms = now;
            self.persist.enqueue(PersistCommand::Touch {
                session_id: session.id.clone(),
                at: now,
            });
        }
    }

    /// Merge a session update observed in the store (another tab, an
    /// administrator). Never lowers the local count. Returns true if the
    /// local state changed.
    pub fn apply_remote_session(&mut self, remote: &AccessSession) -> bool {
        if !self.state.is_live() {
            return false;
        }
        let Some(local) = self.session.as_mut() else {
            return false;
        };
        if local.id != remote.id {
            return false;
        }
        if remote.is_revoked() {
            local.merge_violations(remote.violations_count, None);
            self.playback.violations = self.playback.violations.max(remote.violations_count);
            self.revoke("session revoked remotely");
            return true;
        }
        if remote.violations_count <= self.playback.violations {
            return false;
        }
        local.merge_violations(remote.violations_count, None);
        self.playback.violations = remote.violations_count;
        log::info!(
            "adopted remote violation count {} for session {}",
            remote.violations_count,
            remote.id
        );
        if self.playback.violations >= self.policy.current().violation_limit {
            self.revoke("remote violation count reached limit");
        }
        true
    }

    fn outcome(&self, violations: Vec<ViolationType>, suppress_default: bool) -> Outcome {
        Outcome {
            state: self.state.clone(),
            violations,
            suppress_default,
            violations_count: self.playback.violations,
            violation_limit: self.policy.current().violation_limit,
            notice: self.notice.clone(),
        }
    }

    /// Current state as an outcome with no new violations.
    pub fn snapshot(&self) -> Outcome {
        self.outcome(Vec::new(), false)
    }

    // -------------------- Accessors --------------------

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    pub fn session(&self) -> Option<&AccessSession> {
        self.session.as_ref()
    }

    pub fn video(&self) -> Option<&Video> {
        self.video.as_ref()
    }

    pub fn policy(&self) -> Arc<EffectivePolicy> {
        self.policy.current()
    }

    pub fn policy_handle(&self) -> &PolicyHandle {
        &self.policy
    }

    pub fn revocation_flag(&self) -> RevocationFlag {
        self.revocation.clone()
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn flush_persistence(&self) -> anyhow::Result<()> {
        self.persist.flush()
    }

    pub fn failed_writes(&self) -> u64 {
        self.persist.failed_writes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachedViewer;
    use crate::policy::refresh::PolicySource;
    use crate::policy::{GlobalPlayerPolicy, VideoSecurityPolicy};
    use crate::store::memory::InMemoryBackend;
    use crate::store::{AvailabilitySettings, SessionStore, VideoStatus, ViolationRecorder};
    use crate::surface::{SimulatedSurface, SurfaceCommand};
    use anyhow::anyhow;

    const SHARE: &str = "share_abc";
    const FIREFOX_UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:121.0) Gecko/20100101 Firefox/121.0";

    fn video(security: VideoSecurityPolicy) -> Video {
        Video {
            id: "vid_1".to_string(),
            title: "Lecture 1".to_string(),
            status: VideoStatus::Active,
            source_url: String::new(),
            security_settings: security,
            availability_settings: AvailabilitySettings {
                share_id: SHARE.to_string(),
                ..AvailabilitySettings::default()
            },
        }
    }

    fn backend(security: VideoSecurityPolicy) -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        backend.publish_video(&video(security)).expect("publish");
        backend
    }

    fn request(token: &str) -> LoadRequest {
        LoadRequest {
            share_token: token.to_string(),
            viewer: ViewerIdentity {
                viewer_id: "u_1".to_string(),
                email: "viewer@example.com".to_string(),
                name: "Viewer".to_string(),
                cnic: None,
            },
            device: DeviceDescriptor::new(FIREFOX_UA),
            page: format!("/watch/{}/play", token),
            default_available: Duration::from_secs(3600),
        }
    }

    fn load_with(
        backend: &Arc<InMemoryBackend>,
        cache: Option<&LocalSessionCache>,
        token: &str,
    ) -> EnforcementEngine<SimulatedSurface> {
        let collaborators = Collaborators::from_backend(backend.clone());
        let persist =
            PersistenceQueue::spawn(backend.clone(), backend.clone()).expect("persistence");
        EnforcementEngine::load(
            &collaborators,
            cache,
            SimulatedSurface::new(600.0),
            request(token),
            persist,
        )
    }

    #[test]
    fn loads_into_active() {
        let backend = backend(VideoSecurityPolicy::default());
        let engine = load_with(&backend, None, SHARE);
        assert_eq!(engine.state(), &PlayerState::Active);
        assert_eq!(engine.playback().violations, 0);
        assert_eq!(engine.video().map(|v| v.id.as_str()), Some("vid_1"));
        assert!(!engine.revocation_flag().is_raised());
    }

    #[test]
    fn load_failures_are_terminal_errors() {
        let backend = backend(VideoSecurityPolicy::default());
        let engine = load_with(&backend, None, "bad token");
        assert_eq!(
            engine.state(),
            &PlayerState::Error(LoadFailure::InvalidShareToken)
        );
        let engine = load_with(&backend, None, "share_missing");
        assert_eq!(engine.state(), &PlayerState::Error(LoadFailure::VideoNotFound));
        assert!(matches!(engine.notice(), Some(Notice::LoadFailed(_))));
    }

    #[test]
    fn revoked_link_enters_revoked_without_a_session() {
        let backend = backend(VideoSecurityPolicy::default());
        backend.revoke_link(SHARE).expect("revoke");
        let engine = load_with(&backend, None, SHARE);
        assert_eq!(engine.state(), &PlayerState::Revoked);
        assert!(engine.session().is_none());
        assert_eq!(engine.notice(), Some(&Notice::AccessRevoked));
    }

    #[test]
    fn browser_allow_list_is_enforced() {
        let backend = backend(VideoSecurityPolicy {
            allowed_browsers: vec!["Chrome".to_string()],
            ..VideoSecurityPolicy::default()
        });
        let engine = load_with(&backend, None, SHARE);
        assert_eq!(
            engine.state(),
            &PlayerState::Error(LoadFailure::BrowserNotAllowed("firefox".to_string()))
        );
    }

    #[test]
    fn unavailable_policy_document_fails_load() {
        struct Offline;
        impl PolicySource for Offline {
            fn fetch_global_policy(&self) -> anyhow::Result<Option<GlobalPlayerPolicy>> {
                Err(anyhow!("network unreachable"))
            }
        }
        let backend = backend(VideoSecurityPolicy::default());
        let mut collaborators = Collaborators::from_backend(backend.clone());
        collaborators.policies = Arc::new(Offline);
        let persist = PersistenceQueue::spawn(backend.clone(), backend).expect("persistence");
        let engine = EnforcementEngine::load(
            &collaborators,
            None,
            SimulatedSurface::new(10.0),
            request(SHARE),
            persist,
        );
        assert!(matches!(
            engine.state(),
            PlayerState::Error(LoadFailure::PolicyUnavailable(_))
        ));
    }

    #[test]
    fn expired_session_is_marked_and_refused() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut expiring = video(VideoSecurityPolicy::default());
        expiring.availability_settings.available_duration_seconds = 1;
        expiring.availability_settings.link_mode = crate::store::LinkMode::FromGeneration;
        expiring.availability_settings.link_rotated_at = 1;
        backend.publish_video(&expiring).expect("publish");

        let engine = load_with(&backend, None, SHARE);
        assert_eq!(engine.state(), &PlayerState::Error(LoadFailure::SessionExpired));
        engine.flush_persistence().expect("flush");
        let id = crate::session::session_id_for("u_1", "vid_1");
        let stored = backend.get_session(&id).expect("get").expect("present");
        assert_eq!(stored.status, SessionStatus::Expired);
    }

    #[test]
    fn cached_revoked_session_short_circuits_loading() {
        let backend = backend(VideoSecurityPolicy::default());
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = LocalSessionCache::open(dir.path()).expect("cache");
        cache
            .store(SHARE, &CachedViewer::new(request(SHARE).viewer, 0))
            .expect("store");

        let engine = load_with(&backend, Some(&cache), SHARE);
        let session_id = engine.session().expect("session").id.clone();
        drop(engine);
        backend
            .update_session_violations(&session_id, 4, Some(SessionStatus::Revoked))
            .expect("revoke");

        let cached = cache.load(SHARE).expect("load").expect("entry");
        assert_eq!(cached.session_id.as_deref(), Some(session_id.as_str()));

        let engine = load_with(&backend, Some(&cache), SHARE);
        assert_eq!(engine.state(), &PlayerState::Revoked);
        assert!(engine
            .surface()
            .commands()
            .iter()
            .all(|c| *c != SurfaceCommand::Play));
    }

    #[test]
    fn pause_caused_by_engine_is_not_a_violation() {
        let backend = backend(VideoSecurityPolicy::default());
        backend
            .publish_global_policy(&GlobalPlayerPolicy {
                block_pause: true,
                ..GlobalPlayerPolicy::default()
            })
            .expect("policy");
        let mut engine = load_with(&backend, None, SHARE);
        engine.handle(&Signal::Play);
        let blur = engine.handle(&Signal::WindowBlur);
        assert_eq!(blur.violations, vec![ViolationType::FocusLost]);
        assert_eq!(blur.state, PlayerState::Paused);

        // The surface echoes the engine's pause back as a native event.
        let echo = engine.handle(&Signal::Pause);
        assert!(echo.violations.is_empty());
        assert_eq!(echo.state, PlayerState::Paused);
        assert_eq!(engine.playback().violations, 1);
    }

    #[test]
    fn remote_updates_never_lower_the_count() {
        let backend = backend(VideoSecurityPolicy::default());
        let mut engine = load_with(&backend, None, SHARE);
        engine.handle(&Signal::ContextMenu);
        engine.handle(&Signal::ContextMenu);
        let mut remote = engine.session().expect("session").clone();

        remote.violations_count = 1;
        assert!(!engine.apply_remote_session(&remote));
        assert_eq!(engine.playback().violations, 2);

        remote.violations_count = 3;
        assert!(engine.apply_remote_session(&remote));
        assert_eq!(engine.playback().violations, 3);
        assert_eq!(engine.state(), &PlayerState::Active);

        remote.status = SessionStatus::Revoked;
        assert!(engine.apply_remote_session(&remote));
        assert_eq!(engine.state(), &PlayerState::Revoked);
        assert_eq!(engine.playback().violations, 3);
        assert!(!engine.apply_remote_session(&remote));
    }

    #[test]
    fn violations_are_persisted_with_context() {
        let backend = backend(VideoSecurityPolicy::default());
        let mut engine = load_with(&backend, None, SHARE);
        let outcome = engine.handle(&Signal::ContextMenu);
        assert!(outcome.suppress_default);
        engine.flush_persistence().expect("flush");

        let session_id = engine.session().expect("session").id.clone();
        let records = backend.violations_for_session(&session_id).expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].violation_type, ViolationType::RightClick);
        assert_eq!(records[0].video_title, "Lecture 1");
        assert_eq!(records[0].metadata.page, "/watch/share_abc/play");
        assert_eq!(records[0].metadata.browser.as_deref(), Some("firefox"));
        let stored = backend.get_session(&session_id).expect("get").expect("present");
        assert_eq!(stored.violations_count, 1);
    }

    #[test]
    fn outcome_serializes_flat() {
        let outcome = Outcome {
            state: PlayerState::Revoked,
            violations: vec![ViolationType::SpeedAttempt],
            suppress_default: false,
            violations_count: 4,
            violation_limit: 4,
            notice: Some(Notice::AccessRevoked),
        };
        let json = serde_json::to_value(&outcome).expect("json");
        assert_eq!(json["state"], "revoked");
        assert_eq!(json["violations"][0], "speed_attempt");
        assert_eq!(json["violations_count"], 4);
        assert_eq!(json["violation_limit"], 4);
        assert_eq!(json["notice"]["notice"], "access_revoked");
    }

    #[test]
    fn outcome_reports_running_count_and_limit() {
        let backend = backend(VideoSecurityPolicy {
            violation_limit: 3,
            ..VideoSecurityPolicy::default()
        });
        let mut engine = load_with(&backend, None, SHARE);
        let snapshot = engine.snapshot();
        assert_eq!((snapshot.violations_count, snapshot.violation_limit), (0, 3));

        engine.handle(&Signal::ContextMenu);
        let outcome = engine.handle(&Signal::DevToolsOpened);
        assert_eq!((outcome.violations_count, outcome.violation_limit), (2, 3));
    }

    /// Delegates to `SimulatedSurface` but refuses every pause.
    struct PauseRefused(SimulatedSurface);

    impl PlaybackSurface for PauseRefused {
        fn play(&mut self) -> anyhow::Result<()> {
            self.0.play()
        }
        fn pause(&mut self) -> anyhow::Result<()> {
            Err(anyhow!("media element refused pause"))
        }
        fn seek(&mut self, time: f64) -> anyhow::Result<()> {
            self.0.seek(time)
        }
        fn set_rate(&mut self, rate: f64) -> anyhow::Result<()> {
            self.0.set_rate(rate)
        }
        fn request_fullscreen(&mut self) -> anyhow::Result<()> {
            self.0.request_fullscreen()
        }
        fn exit_fullscreen(&mut self) -> anyhow::Result<()> {
            self.0.exit_fullscreen()
        }
        fn current_time(&self) -> f64 {
            self.0.current_time()
        }
        fn duration(&self) -> f64 {
            self.0.duration()
        }
        fn playback_rate(&self) -> f64 {
            self.0.playback_rate()
        }
        fn is_paused(&self) -> bool {
            self.0.is_paused()
        }
        fn is_fullscreen(&self) -> bool {
            self.0.is_fullscreen()
        }
    }

    #[test]
    fn refused_pause_leaves_no_pending_echo() {
        let backend = backend(VideoSecurityPolicy::default());
        backend
            .publish_global_policy(&GlobalPlayerPolicy {
                block_pause: true,
                ..GlobalPlayerPolicy::default()
            })
            .expect("policy");
        let collaborators = Collaborators::from_backend(backend.clone());
        let persist =
            PersistenceQueue::spawn(backend.clone(), backend.clone()).expect("persistence");
        let mut engine = EnforcementEngine::load(
            &collaborators,
            None,
            PauseRefused(SimulatedSurface::new(600.0)),
            request(SHARE),
            persist,
        );
        engine.handle(&Signal::Play);
        let blur = engine.handle(&Signal::WindowBlur);
        assert_eq!(blur.violations, vec![ViolationType::FocusLost]);
        assert!(!engine.playback().engine_pause_pending);

        // Nothing was echoed, so a later pause comes from the viewer.
        let pause = engine.handle(&Signal::Pause);
        assert_eq!(pause.violations, vec![ViolationType::PauseAttempt]);
    }

    #[test]
    fn accepted_pause_marks_pending_echo() {
        let backend = backend(VideoSecurityPolicy::default());
        let mut engine = load_with(&backend, None, SHARE);
        engine.handle(&Signal::Play);
        engine.handle(&Signal::WindowBlur);
        assert!(engine.playback().engine_pause_pending);
        let echo = engine.handle(&Signal::Pause);
        assert!(echo.violations.is_empty());
        assert!(!engine.playback().engine_pause_pending);
    }
}
