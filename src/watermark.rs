//! Decoy watermark scheduler.
//!
//! Every blink interval the overlay is shown at a random position for the
//! blink duration, then hidden. One ticker thread at most: a changed plan
//! stops the old ticker before the new one starts. Independent of the
//! violation count.

use anyhow::{anyhow, Result};
use rand::Rng;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::engine::RevocationFlag;
use crate::policy::EffectivePolicy;

const TOP_RANGE_PCT: std::ops::Range<f64> = 10.0..90.0;
const LEFT_RANGE_PCT: std::ops::Range<f64> = 10.0..80.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WatermarkPosition {
    pub top_pct: f64,
    pub left_pct: f64,
}

impl WatermarkPosition {
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            top_pct: rng.gen_range(TOP_RANGE_PCT),
            left_pct: rng.gen_range(LEFT_RANGE_PCT),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatermarkPlan {
    pub interval: Duration,
    pub visible_for: Duration,
}

impl WatermarkPlan {
    /// None when the security watermark is disabled.
    pub fn from_policy(policy: &EffectivePolicy) -> Option<Self> {
        if !policy.security_watermark_enabled {
            return None;
        }
        Some(Self {
            interval: policy.blink_interval,
            visible_for: policy.blink_duration.min(policy.blink_interval),
        })
    }
}

/// Rendering sink for the overlay. `label` identifies the viewer.
pub trait WatermarkOverlay: Send + Sync {
    fn show(&self, position: WatermarkPosition, label: &str);
    fn hide(&self);
}

struct Ticker {
    stop: Option<mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl Ticker {
    fn spawn(
        plan: WatermarkPlan,
        overlay: Arc<dyn WatermarkOverlay>,
        label: Arc<str>,
        halt: RevocationFlag,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let join = std::thread::Builder::new()
            .name("watermark".to_string())
            .spawn(move || {
                let mut rng = rand::thread_rng();
                let mut next = Instant::now() + plan.interval;
                loop {
                    if !wait_until(&stop_rx, next) || halt.is_raised() {
                        break;
                    }
                    overlay.show(WatermarkPosition::random(&mut rng), &label);
                    let hidden = wait_until(&stop_rx, Instant::now() + plan.visible_for);
                    overlay.hide();
                    if !hidden || halt.is_raised() {
                        break;
                    }
                    next += plan.interval;
                }
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            join: Some(join),
        })
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.take();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("watermark thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("{}", e);
        }
    }
}

/// Sleep until `deadline`. False if the ticker was told to stop.
fn wait_until(stop_rx: &mpsc::Receiver<()>, deadline: Instant) -> bool {
    let timeout = deadline.saturating_duration_since(Instant::now());
    matches!(stop_rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
}

pub struct WatermarkScheduler {
    overlay: Arc<dyn WatermarkOverlay>,
    label: Arc<str>,
    halt: RevocationFlag,
    active: Option<(WatermarkPlan, Ticker)>,
}

impl WatermarkScheduler {
    pub fn new(overlay: Arc<dyn WatermarkOverlay>, label: &str, halt: RevocationFlag) -> Self {
        Self {
            overlay,
            label: Arc::from(label),
            halt,
            active: None,
        }
    }

    /// Reschedule for `plan`. Returns true if the ticker was restarted or stopped.
    pub fn apply(&mut self, plan: Option<WatermarkPlan>) -> Result<bool> {
        let plan = if self.halt.is_raised() { None } else { plan };
        let current = self.active.as_ref().map(|(plan, _)| *plan);
        if current == plan {
            return Ok(false);
        }
        self.stop()?;
        if let Some(plan) = plan {
            log::debug!(
                "watermark every {:?} for {:?}",
                plan.interval,
                plan.visible_for
            );
            let ticker = Ticker::spawn(
                plan,
                self.overlay.clone(),
                self.label.clone(),
                self.halt.clone(),
            )?;
            self.active = Some((plan, ticker));
        }
        Ok(true)
    }

    pub fn plan(&self) -> Option<WatermarkPlan> {
        self.active.as_ref().map(|(plan, _)| *plan)
    }

    pub fn stop(&mut self) -> Result<()> {
        if let Some((_, mut ticker)) = self.active.take() {
            ticker.shutdown()?;
            self.overlay.hide();
        }
        Ok(())
    }
}
