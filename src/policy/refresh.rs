//! Periodic policy refresh.
//!
//! The global document may change while a viewer is watching. The refresher
//! re-reads it on a fixed interval, re-resolves against the video's own
//! policy and swaps the result into the shared `PolicyHandle`.

use anyhow::{anyhow, Result};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{resolve_policy, EffectivePolicy, GlobalPlayerPolicy, PolicyHandle, VideoSecurityPolicy};

/// Source of the global player document.
pub trait PolicySource: Send + Sync {
    /// `Ok(None)` means the document has never been written; defaults apply.
    fn fetch_global_policy(&self) -> Result<Option<GlobalPlayerPolicy>>;
}

pub fn load_effective_policy(
    source: &dyn PolicySource,
    video: &VideoSecurityPolicy,
) -> Result<EffectivePolicy> {
    let global = source.fetch_global_policy()?.unwrap_or_default();
    Ok(resolve_policy(&global, video))
}

/// Re-resolve once. Returns true if the handle received a new policy.
pub fn refresh_once(
    source: &dyn PolicySource,
    video: &VideoSecurityPolicy,
    handle: &PolicyHandle,
) -> Result<bool> {
    let next = load_effective_policy(source, video)?;
    if *handle.current() == next {
        return Ok(false);
    }
    handle.replace(next);
    Ok(true)
}

pub struct PolicyRefresher {
    stop: Option<mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl PolicyRefresher {
    pub fn spawn(
        source: Arc<dyn PolicySource>,
        video: VideoSecurityPolicy,
        handle: PolicyHandle,
        interval: Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(anyhow!("policy refresh interval must be > 0"));
        }
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let join = std::thread::Builder::new()
            .name("policy-refresh".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }
                match refresh_once(source.as_ref(), &video, &handle) {
                    Ok(true) => log::info!("player policy refreshed"),
                    Ok(false) => log::debug!("player policy unchanged"),
                    Err(e) => log::warn!("policy refresh failed, keeping previous policy: {}", e),
                }
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            join: Some(join),
        })
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.take();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("policy refresh thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for PolicyRefresher {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("{}", e);
        }
    }
}
