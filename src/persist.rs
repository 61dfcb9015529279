//! Detached persistence worker.
//!
//! The engine never waits on the store. Writes are queued on an mpsc channel
//! and applied in order by one worker thread; failures are logged as
//! `PERSISTENCE_WRITE` and dropped.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::PlayerError;
use crate::session::SessionStatus;
use crate::store::{SessionStore, ViolationRecorder};
use crate::violation::ViolationRecord;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum PersistCommand {
    UpdateSession {
        session_id: String,
        count: u32,
        status: Option<SessionStatus>,
    },
    AppendViolation(ViolationRecord),
    Touch {
        session_id: String,
        at: u64,
    },
    /// Acknowledged once every command queued before it has been applied.
    Flush(mpsc::Sender<()>),
}

pub struct PersistenceQueue {
    tx: Option<mpsc::Sender<PersistCommand>>,
    failed: Arc<AtomicU64>,
    join: Option<JoinHandle<()>>,
}

impl PersistenceQueue {
    pub fn spawn(
        sessions: Arc<dyn SessionStore>,
        violations: Arc<dyn ViolationRecorder>,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<PersistCommand>();
        let failed = Arc::new(AtomicU64::new(0));
        let failed_worker = failed.clone();
        let join = std::thread::Builder::new()
            .name("player-persist".to_string())
            .spawn(move || {
                for command in rx {
                    if let Err(e) = apply(sessions.as_ref(), violations.as_ref(), command) {
                        failed_worker.fetch_add(1, Ordering::SeqCst);
                        log::warn!("{}", e);
                    }
                }
            })?;
        Ok(Self {
            tx: Some(tx),
            failed,
            join: Some(join),
        })
    }

    /// Never blocks. A closed queue is logged, not returned.
    pub fn enqueue(&self, command: PersistCommand) {
        let sent = match &self.tx {
            Some(tx) => tx.send(command).is_ok(),
            None => false,
        };
        if !sent {
            self.failed.fetch_add(1, Ordering::SeqCst);
            log::warn!(
                "{}",
                PlayerError::PersistenceWrite {
                    operation: "enqueue",
                    message: "persistence worker is not running".to_string(),
                }
            );
        }
    }

    /// Wait until everything queued so far has been applied.
    pub fn flush(&self) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| anyhow!("persistence queue already stopped"))?;
        let (ack_tx, ack_rx) = mpsc::channel();
        tx.send(PersistCommand::Flush(ack_tx))
            .map_err(|_| anyhow!("persistence worker is not running"))?;
        ack_rx
            .recv_timeout(FLUSH_TIMEOUT)
            .map_err(|_| anyhow!("persistence flush timed out"))
    }

    /// Writes that failed or could not be queued since spawn.
    pub fn failed_writes(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.tx.take();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("persistence thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for PersistenceQueue {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("{}", e);
        }
    }
}

fn apply(
    sessions: &dyn SessionStore,
    violations: &dyn ViolationRecorder,
    command: PersistCommand,
) -> std::result::Result<(), PlayerError> {
    match command {
        PersistCommand::UpdateSession {
            session_id,
            count,
            status,
        } => sessions
            .update_session_violations(&session_id, count, status)
            .map(|_| ())
            .map_err(|e| write_error("update_session_violations", e)),
        PersistCommand::AppendViolation(record) => violations
            .append_violation(&record)
            .map_err(|e| write_error("append_violation", e)),
        PersistCommand::Touch { session_id, at } => sessions
            .touch_session(&session_id, at)
            .map_err(|e| write_error("touch_session", e)),
        PersistCommand::Flush(ack) => {
            // Receiver may have timed out already.
            let _ = ack.send(());
            Ok(())
        }
    }
}

fn write_error(operation: &'static str, e: anyhow::Error) -> PlayerError {
    PlayerError::PersistenceWrite {
        operation,
        message: e.to_string(),
    }
}
