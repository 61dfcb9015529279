//! Mount / dispatch / unmount.
//!
//! `PlayerSession` is the composition root for one mounted player: it loads
//! the engine, then wires the policy refresher, the watermark scheduler and
//! the remote session subscription around it. Everything it starts is torn
//! down on `unmount` (or drop), so a remount resolves from scratch.

use anyhow::{anyhow, Result};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use crate::cache::LocalSessionCache;
use crate::config::PlayerConfig;
use crate::engine::{EnforcementEngine, LoadRequest, Outcome, PlayerState};
use crate::persist::PersistenceQueue;
use crate::policy::refresh::PolicyRefresher;
use crate::policy::PolicySubscription;
use crate::session::AccessSession;
use crate::signal::Signal;
use crate::store::{Collaborators, SubscriptionId};
use crate::surface::PlaybackSurface;
use crate::watermark::{WatermarkOverlay, WatermarkPlan, WatermarkScheduler};

pub struct PlayerSession<S: PlaybackSurface> {
    engine: EnforcementEngine<S>,
    collaborators: Collaborators,
    refresher: Option<PolicyRefresher>,
    watermark: Arc<Mutex<WatermarkScheduler>>,
    policy_subscription: Option<PolicySubscription>,
    session_subscription: Option<SubscriptionId>,
    remote_rx: Option<mpsc::Receiver<AccessSession>>,
}

impl<S: PlaybackSurface> PlayerSession<S> {
    pub fn mount(
        collaborators: &Collaborators,
        config: &PlayerConfig,
        cache: Option<&LocalSessionCache>,
        surface: S,
        overlay: Arc<dyn WatermarkOverlay>,
        request: LoadRequest,
    ) -> Result<Self> {
        let persist =
            PersistenceQueue::spawn(collaborators.sessions.clone(), collaborators.violations.clone())?;
        let label = request.viewer.watermark_label();
        let engine = EnforcementEngine::load(collaborators, cache, surface, request, persist);
        let watermark = Arc::new(Mutex::new(WatermarkScheduler::new(
            overlay,
            &label,
            engine.revocation_flag(),
        )));

        let mut player = Self {
            engine,
            collaborators: collaborators.clone(),
            refresher: None,
            watermark,
            policy_subscription: None,
            session_subscription: None,
            remote_rx: None,
        };
        if player.engine.state().is_live() {
            player.start_background(config)?;
        }
        Ok(player)
    }

    fn start_background(&mut self, config: &PlayerConfig) -> Result<()> {
        let handle = self.engine.policy_handle().clone();

        lock_watermark(&self.watermark)?.apply(WatermarkPlan::from_policy(&handle.current()))?;
        let watermark = self.watermark.clone();
        self.policy_subscription = Some(handle.subscribe(move |policy| {
            let plan = WatermarkPlan::from_policy(policy);
            match lock_watermark(&watermark).and_then(|mut scheduler| scheduler.apply(plan)) {
                Ok(true) => log::info!("watermark rescheduled"),
                Ok(false) => {}
                Err(e) => log::error!("watermark reschedule failed: {}", e),
            }
        }));

        if let Some(video) = self.engine.video() {
            self.refresher = Some(PolicyRefresher::spawn(
                self.collaborators.policies.clone(),
                video.security_settings.clone(),
                handle,
                config.policy_refresh,
            )?);
        }

        if let Some(session) = self.engine.session() {
            let (tx, rx) = mpsc::channel::<AccessSession>();
            let tx = Mutex::new(tx);
            let id = self.collaborators.sessions.subscribe(
                &session.id,
                Arc::new(move |remote: &AccessSession| {
                    if let Ok(tx) = tx.lock() {
                        // Receiver is gone once the player unmounts.
                        let _ = tx.send(remote.clone());
                    }
                }),
            )?;
            self.session_subscription = Some(id);
            self.remote_rx = Some(rx);
        }
        Ok(())
    }

    /// Deliver one browser signal. Remote session updates observed since
    /// the last call are merged first.
    pub fn dispatch(&mut self, signal: &Signal) -> Outcome {
        self.drain_remote();
        let outcome = self.engine.handle(signal);
        self.after_transition();
        outcome
    }

    /// Merge pending remote updates without a signal. Some(outcome) if the
    /// local state changed.
    pub fn pump(&mut self) -> Option<Outcome> {
        let changed = self.drain_remote();
        self.after_transition();
        changed.then(|| self.engine.snapshot())
    }

    fn drain_remote(&mut self) -> bool {
        let Some(rx) = &self.remote_rx else {
            return false;
        };
        let updates: Vec<AccessSession> = rx.try_iter().collect();
        let mut changed = false;
        for remote in &updates {
            changed |= self.engine.apply_remote_session(remote);
        }
        changed
    }

    fn after_transition(&mut self) {
        if *self.engine.state() == PlayerState::Revoked && self.refresher.is_some() {
            if let Err(e) = self.stop_timers() {
                log::error!("failed to stop timers after revoke: {}", e);
            }
        }
    }

    fn stop_timers(&mut self) -> Result<()> {
        if let Some(id) = self.policy_subscription.take() {
            self.engine.policy_handle().unsubscribe(id);
        }
        if let Some(refresher) = self.refresher.take() {
            refresher.stop()?;
        }
        lock_watermark(&self.watermark)?.stop()
    }

    fn teardown(&mut self) -> Result<()> {
        self.stop_timers()?;
        if let Some(id) = self.session_subscription.take() {
            self.collaborators.sessions.unsubscribe(id);
        }
        self.remote_rx.take();
        Ok(())
    }

    /// Cancel every subscription, timer and worker, then wait for queued
    /// writes to land.
    pub fn unmount(mut self) -> Result<()> {
        self.teardown()?;
        self.engine.flush_persistence()
    }

    pub fn engine(&self) -> &EnforcementEngine<S> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut EnforcementEngine<S> {
        &mut self.engine
    }

    pub fn state(&self) -> &PlayerState {
        self.engine.state()
    }

    pub fn watermark_plan(&self) -> Option<WatermarkPlan> {
        lock_watermark(&self.watermark)
            .ok()
            .and_then(|scheduler| scheduler.plan())
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresher.is_some()
    }
}

impl<S: PlaybackSurface> Drop for PlayerSession<S> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            log::error!("player teardown failed: {}", e);
        }
    }
}

fn lock_watermark(
    watermark: &Mutex<WatermarkScheduler>,
) -> Result<std::sync::MutexGuard<'_, WatermarkScheduler>> {
    watermark
        .lock()
        .map_err(|_| anyhow!("watermark scheduler lock poisoned"))
}
