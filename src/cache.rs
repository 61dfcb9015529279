//! Per-share-id local session cache.
//!
//! Written after registration so a reload can bootstrap Loading (who is
//! watching, which session they hold) before the remote store answers.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::session::ViewerIdentity;
use crate::validate_share_token;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CachedViewer {
    #[serde(flatten)]
    pub viewer: ViewerIdentity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub created_at: u64,
}

impl CachedViewer {
    pub fn new(viewer: ViewerIdentity, created_at: u64) -> Self {
        Self {
            viewer,
            video_id: None,
            session_id: None,
            created_at,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LocalSessionCache {
    root: PathBuf,
}

impl LocalSessionCache {
    pub fn open(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .map_err(|e| anyhow!("failed to create cache dir {}: {}", root.display(), e))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn entry_path(&self, share_id: &str) -> Result<PathBuf> {
        validate_share_token(share_id)?;
        Ok(self.root.join(format!("session_{}.json", share_id)))
    }

    /// Unreadable or corrupt entries are treated as absent.
    pub fn load(&self, share_id: &str) -> Result<Option<CachedViewer>> {
        let path = self.entry_path(share_id)?;
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                log::warn!("ignoring unreadable cache entry {}: {}", path.display(), e);
                return Ok(None);
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Ok(Some(entry)),
            Err(e) => {
                log::warn!("ignoring corrupt cache entry {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    pub fn store(&self, share_id: &str, entry: &CachedViewer) -> Result<()> {
        let path = self.entry_path(share_id)?;
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(entry)?;
        std::fs::write(&tmp, json)
            .map_err(|e| anyhow!("failed to write cache entry {}: {}", tmp.display(), e))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| anyhow!("failed to commit cache entry {}: {}", path.display(), e))?;
        Ok(())
    }

    /// Attach the resolved session to an existing entry. No-op without one.
    pub fn remember_session_id(&self, share_id: &str, video_id: &str, session_id: &str) -> Result<()> {
        let Some(mut entry) = self.load(share_id)? else {
            return Ok(());
        };
        if entry.session_id.as_deref() == Some(session_id)
            && entry.video_id.as_deref() == Some(video_id)
        {
            return Ok(());
        }
        entry.video_id = Some(video_id.to_string());
        entry.session_id = Some(session_id.to_string());
        self.store(share_id, &entry)
    }

    pub fn forget(&self, share_id: &str) -> Result<()> {
        let path = self.entry_path(share_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(anyhow!("failed to remove cache entry {}: {}", path.display(), e)),
        }
    }
}
