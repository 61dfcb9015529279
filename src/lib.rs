//! Player Guard
//!
//! This crate implements the enforcement core of a gated video player: a
//! registered viewer watches a shared video inside a locked-down surface that
//! detects policy violations, counts them against a per-video limit and
//! revokes access once the limit is reached.
//!
//! # Architecture
//!
//! The engine upholds four invariants by construction:
//!
//! 1. **Sticky Revocation**: a revoked session never returns to active, in
//!    memory or in any store.
//! 2. **Enforce Before Persist**: corrective actions hit the playback surface
//!    in the same handler that classified the signal; persistence is queued after.
//! 3. **Monotonic Count**: violation counts only grow, locally and in the store.
//! 4. **Fail-Closed Decisions**: persistence failures are logged and never
//!    unblock a risky action; the revoke decision is taken from memory.
//!
//! # Module Structure
//!
//! - `policy`: policy documents, effective policy resolution, refresh task
//! - `signal` / `classify`: browser signals and the pure classification table
//! - `engine`: the enforcement state machine (Loading → Active → Playing/Paused → Revoked)
//! - `persist`: detached persistence worker
//! - `watermark`: decoy overlay scheduler
//! - `store`: session / violation / video / policy collaborators (demo + sqlite)
//! - `player`: mount / dispatch / unmount composition root

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod cache;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod persist;
pub mod player;
pub mod policy;
pub mod session;
pub mod signal;
pub mod store;
pub mod surface;
pub mod violation;
pub mod watermark;

pub use cache::{CachedViewer, LocalSessionCache};
pub use classify::{classify, CorrectiveAction, Verdict, SEEK_TOLERANCE_SECS};
pub use config::{BackendKind, PlayerConfig};
pub use engine::{
    EnforcementEngine, LoadRequest, Notice, Outcome, PlaybackState, PlayerState, RevocationFlag,
};
pub use error::{LoadFailure, PlayerError};
pub use persist::{PersistCommand, PersistenceQueue};
pub use player::PlayerSession;
pub use policy::refresh::{PolicyRefresher, PolicySource};
pub use policy::{
    resolve_policy, EffectivePolicy, GlobalPlayerPolicy, PolicyHandle, VideoSecurityPolicy,
};
pub use session::{
    detect_browser, AccessSession, DeviceDescriptor, SessionRequest, SessionStatus,
    ViewerIdentity,
};
pub use signal::{KeyPress, Signal};
pub use store::memory::InMemoryBackend;
pub use store::sqlite::SqliteBackend;
pub use store::{
    open_backend, Backend, Collaborators, SessionStore, SubscriptionId, Video, VideoDirectory,
    VideoResolution, ViolationRecorder,
};
pub use surface::{PlaybackSurface, SimulatedSurface, SurfaceCommand};
pub use violation::{Severity, ViolationContext, ViolationRecord, ViolationType};
pub use watermark::{WatermarkOverlay, WatermarkPlan, WatermarkPosition, WatermarkScheduler};

// -------------------- Clock --------------------

/// Milliseconds since the unix epoch.
pub fn now_ms() -> Result<u64> {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH)?;
    u64::try_from(elapsed.as_millis()).map_err(|_| anyhow!("clock exceeds u64 milliseconds"))
}

// -------------------- Share Token Discipline --------------------

/// A share token is an opaque link identifier. We enforce a positive
/// allowlist so a token can be used verbatim as a cache file stem or a
/// store key.
///
/// Allowed: "a1b2c3", "share_2024-q1"
/// Disallowed: whitespace, slashes, dots, anything shorter than 6 chars.
pub fn validate_share_token(token: &str) -> Result<()> {
    static SHARE_TOKEN_RE: OnceLock<std::result::Result<regex::Regex, regex::Error>> =
        OnceLock::new();
    let re = SHARE_TOKEN_RE
        .get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]{6,64}$"))
        .as_ref()
        .map_err(|e| anyhow!("share token pattern failed to compile: {}", e))?;

    if !re.is_match(token) {
        return Err(anyhow!(
            "share token must match ^[A-Za-z0-9_-]{{6,64}}$"
        ));
    }
    Ok(())
}

// -------------------- Descriptor Hashing --------------------

/// Hashes device descriptors (user agent, remote address) into a stable hex
/// digest so raw descriptors are never used as stored identifiers.
pub fn hash_descriptor(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u32).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}
