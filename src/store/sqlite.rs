//! Durable backend on SQLite.
//!
//! Documents are stored as JSON payloads next to the few columns needed
//! for lookup, so the on-disk shape matches the wire documents.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{
    SessionListener, SessionStore, SubscriberSet, SubscriptionId, Video, VideoDirectory,
    VideoResolution, ViolationRecorder,
};
use crate::policy::refresh::PolicySource;
use crate::policy::GlobalPlayerPolicy;
use crate::session::{session_id_for, AccessSession, SessionRequest, SessionStatus};
use crate::violation::ViolationRecord;

const PLAYER_POLICY_KEY: &str = "player";

pub struct SqliteBackend {
    conn: Mutex<Connection>,
    subscribers: SubscriberSet,
}

impl SqliteBackend {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let backend = Self {
            conn: Mutex::new(conn),
            subscribers: SubscriberSet::new(),
        };
        backend.ensure_schema()?;
        Ok(backend)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("sqlite backend lock poisoned"))
    }

    fn ensure_schema(&self) -> Result<()> {
        self.lock()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS access_sessions (
              id TEXT PRIMARY KEY,
              user_id TEXT NOT NULL,
              video_id TEXT NOT NULL,
              payload_json TEXT NOT NULL,
              UNIQUE(user_id, video_id)
            );

            CREATE TABLE IF NOT EXISTS violations (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              record_id TEXT NOT NULL UNIQUE,
              session_id TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS videos (
              share_id TEXT PRIMARY KEY,
              video_id TEXT NOT NULL,
              link_revoked INTEGER NOT NULL DEFAULT 0,
              payload_json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS app_config (
              key TEXT PRIMARY KEY,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_violations_session ON violations(session_id);
            "#,
        )?;
        Ok(())
    }

    pub fn publish_video(&self, video: &Video) -> Result<()> {
        let share_id = video.share_id();
        if share_id.is_empty() {
            return Err(anyhow!("video {} has no share id", video.id));
        }
        let payload_json = serde_json::to_string(video)?;
        self.lock()?.execute(
            r#"
            INSERT INTO videos(share_id, video_id, link_revoked, payload_json)
            VALUES (?1, ?2, 0, ?3)
            ON CONFLICT(share_id) DO UPDATE SET
              video_id = excluded.video_id,
              link_revoked = 0,
              payload_json = excluded.payload_json
            "#,
            params![share_id, video.id, payload_json],
        )?;
        Ok(())
    }

    pub fn publish_global_policy(&self, policy: &GlobalPlayerPolicy) -> Result<()> {
        let payload_json = serde_json::to_string(policy)?;
        self.lock()?.execute(
            r#"
            INSERT INTO app_config(key, payload_json) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET payload_json = excluded.payload_json
            "#,
            params![PLAYER_POLICY_KEY, payload_json],
        )?;
        Ok(())
    }

    pub fn revoke_link(&self, share_id: &str) -> Result<()> {
        let updated = self.lock()?.execute(
            "UPDATE videos SET link_revoked = 1 WHERE share_id = ?1",
            params![share_id],
        )?;
        if updated == 0 {
            return Err(anyhow!("unknown share link {}", share_id));
        }
        Ok(())
    }
}

fn load_session(conn: &Connection, session_id: &str) -> Result<Option<AccessSession>> {
    let payload: Option<String> = conn
        .query_row(
            "SELECT payload_json FROM access_sessions WHERE id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()?;
    match payload {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn save_session(conn: &Connection, session: &AccessSession) -> Result<()> {
    let payload_json = serde_json::to_string(session)?;
    conn.execute(
        r#"
        INSERT INTO access_sessions(id, user_id, video_id, payload_json)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(id) DO UPDATE SET payload_json = excluded.payload_json
        "#,
        params![session.id, session.user_id, session.video_id, payload_json],
    )?;
    Ok(())
}

impl SessionStore for SqliteBackend {
    fn get_or_create_session(&self, req: &SessionRequest) -> Result<AccessSession> {
        let id = session_id_for(&req.viewer.viewer_id, &req.video_id);
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let session = match load_session(&tx, &id)? {
            Some(mut existing) => {
                existing.last_token_issued_at = req.now;
                existing
            }
            None => AccessSession::new(req),
        };
        save_session(&tx, &session)?;
        tx.commit()?;
        Ok(session)
    }

    fn get_session(&self, session_id: &str) -> Result<Option<AccessSession>> {
        let conn = self.lock()?;
        load_session(&conn, session_id)
    }

    fn update_session_violations(
        &self,
        session_id: &str,
        count: u32,
        status: Option<SessionStatus>,
    ) -> Result<AccessSession> {
        let (changed, snapshot) = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            let mut session = load_session(&tx, session_id)?
                .ok_or_else(|| anyhow!("unknown session {}", session_id))?;
            let changed = session.merge_violations(count, status);
            if changed {
                save_session(&tx, &session)?;
            }
            tx.commit()?;
            (changed, session)
        };
        if changed {
            self.subscribers.notify(&snapshot);
        }
        Ok(snapshot)
    }

    fn touch_session(&self, session_id: &str, at: u64) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let mut session = load_session(&tx, session_id)?
            .ok_or_else(|| anyhow!("unknown session {}", session_id))?;
        if at > session.last_seen_at {
            session.last_seen_at = at;
            save_session(&tx, &session)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn subscribe(&self, session_id: &str, listener: SessionListener) -> Result<SubscriptionId> {
        Ok(self.subscribers.add(session_id, listener))
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.remove(id);
    }
}

impl ViolationRecorder for SqliteBackend {
    fn append_violation(&self, record: &ViolationRecord) -> Result<()> {
        let created_at = i64::try_from(record.timestamp)
            .map_err(|_| anyhow!("violation timestamp exceeds i64 range"))?;
        let payload_json = serde_json::to_string(record)?;
        self.lock()?.execute(
            r#"
            INSERT INTO violations(record_id, session_id, created_at, payload_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![record.id, record.session_id, created_at, payload_json],
        )?;
        Ok(())
    }

    fn violations_for_session(&self, session_id: &str) -> Result<Vec<ViolationRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload_json FROM violations WHERE session_id = ?1 ORDER BY id ASC",
        )?;
        let mut rows = stmt.query(params![session_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let json: String = row.get(0)?;
            out.push(serde_json::from_str(&json)?);
        }
        Ok(out)
    }
}

impl VideoDirectory for SqliteBackend {
    fn resolve_public_video(&self, share_token: &str) -> Result<VideoResolution> {
        let conn = self.lock()?;
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT link_revoked, payload_json FROM videos WHERE share_id = ?1",
                params![share_token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((link_revoked, json)) = row else {
            return Ok(VideoResolution::NotFound);
        };
        if link_revoked != 0 {
            return Ok(VideoResolution::Revoked);
        }
        let video: Video = serde_json::from_str(&json)?;
        if !video.is_playable() {
            return Ok(VideoResolution::NotFound);
        }
        Ok(VideoResolution::Found(video))
    }
}

impl PolicySource for SqliteBackend {
    fn fetch_global_policy(&self) -> Result<Option<GlobalPlayerPolicy>> {
        let conn = self.lock()?;
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload_json FROM app_config WHERE key = ?1",
                params![PLAYER_POLICY_KEY],
                |row| row.get(0),
            )
            .optional()?;
        match payload {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{DeviceDescriptor, ViewerIdentity};
    use crate::store::AvailabilitySettings;
    use crate::violation::{ViolationContext, ViolationType};
    use crate::VideoSecurityPolicy;

    fn request() -> SessionRequest {
        SessionRequest {
            viewer: ViewerIdentity {
                viewer_id: "u_9".to_string(),
                email: "b@example.com".to_string(),
                name: "B".to_string(),
                cnic: None,
            },
            video_id: "vid_9".to_string(),
            device: DeviceDescriptor::new("Chrome/120.0"),
            now: 100,
            expires_at: 200,
        }
    }

    #[test]
    fn sessions_survive_round_trip_with_monotonic_merge() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let session = backend.get_or_create_session(&request()).expect("create");
        assert_eq!(session.violations_count, 0);

        backend
            .update_session_violations(&session.id, 4, Some(SessionStatus::Revoked))
            .expect("update");
        backend
            .update_session_violations(&session.id, 2, Some(SessionStatus::Active))
            .expect("stale");

        let stored = backend
            .get_session(&session.id)
            .expect("get")
            .expect("present");
        assert_eq!(stored.violations_count, 4);
        assert_eq!(stored.status, SessionStatus::Revoked);

        let again = backend.get_or_create_session(&request()).expect("get");
        assert!(again.is_revoked());
    }

    #[test]
    fn global_policy_document_is_optional() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        assert!(backend.fetch_global_policy().expect("fetch").is_none());
        let policy = GlobalPlayerPolicy {
            block_speed: true,
            ..GlobalPlayerPolicy::default()
        };
        backend.publish_global_policy(&policy).expect("publish");
        assert_eq!(backend.fetch_global_policy().expect("fetch"), Some(policy));
    }

    #[test]
    fn revoked_link_resolves_as_revoked() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let video = Video {
            id: "vid_9".to_string(),
            title: "T".to_string(),
            status: Default::default(),
            source_url: String::new(),
            security_settings: VideoSecurityPolicy::default(),
            availability_settings: AvailabilitySettings {
                share_id: "share_999".to_string(),
                ..AvailabilitySettings::default()
            },
        };
        backend.publish_video(&video).expect("publish");
        assert_eq!(
            backend.resolve_public_video("share_999").expect("resolve"),
            VideoResolution::Found(video)
        );
        backend.revoke_link("share_999").expect("revoke");
        assert_eq!(
            backend.resolve_public_video("share_999").expect("resolve"),
            VideoResolution::Revoked
        );
        assert!(backend.revoke_link("share_missing").is_err());
    }

    #[test]
    fn violations_keep_insertion_order() {
        let backend = SqliteBackend::open_in_memory().expect("open");
        let ctx = ViolationContext {
            session_id: "s_9".to_string(),
            ..ViolationContext::default()
        };
        let first = ViolationRecord::new(ViolationType::FocusLost, &ctx, 1);
        let second = ViolationRecord::new(ViolationType::SpeedAttempt, &ctx, 2);
        backend.append_violation(&first).expect("first");
        backend.append_violation(&second).expect("second");
        assert!(backend.append_violation(&first).is_err());

        let listed = backend.violations_for_session("s_9").expect("list");
        assert_eq!(listed, vec![first, second]);
    }
}
