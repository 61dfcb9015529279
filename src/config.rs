use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "player.db";
const DEFAULT_CACHE_DIR: &str = "player_cache";
const DEFAULT_POLICY_REFRESH_SECS: u64 = 60;
const DEFAULT_AVAILABLE_SECS: u64 = 60 * 60 * 24;

#[derive(Debug, Deserialize, Default)]
struct PlayerConfigFile {
    backend: Option<String>,
    db_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    policy: Option<PolicyConfigFile>,
    session: Option<SessionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyConfigFile {
    refresh_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SessionConfigFile {
    default_available_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-memory demo/offline collaborators.
    Demo,
    Sqlite,
}

impl BackendKind {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "demo" | "memory" => Ok(BackendKind::Demo),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(anyhow!("unknown backend {:?} (expected demo or sqlite)", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    pub backend: BackendKind,
    pub db_path: PathBuf,
    pub cache_dir: PathBuf,
    pub policy_refresh: Duration,
    /// Session window used when a video does not set its own.
    pub default_available: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Demo,
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            policy_refresh: Duration::from_secs(DEFAULT_POLICY_REFRESH_SECS),
            default_available: Duration::from_secs(DEFAULT_AVAILABLE_SECS),
        }
    }
}

impl PlayerConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PLAYER_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PlayerConfigFile) -> Result<Self> {
        let backend = match file.backend.as_deref() {
            Some(raw) => BackendKind::parse(raw)?,
            None => BackendKind::Demo,
        };
        let db_path = file
            .db_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));
        let cache_dir = file
            .cache_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
        let policy_refresh = Duration::from_secs(
            file.policy
                .and_then(|policy| policy.refresh_secs)
                .unwrap_or(DEFAULT_POLICY_REFRESH_SECS),
        );
        let default_available = Duration::from_secs(
            file.session
                .and_then(|session| session.default_available_secs)
                .unwrap_or(DEFAULT_AVAILABLE_SECS),
        );
        Ok(Self {
            backend,
            db_path,
            cache_dir,
            policy_refresh,
            default_available,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("PLAYER_BACKEND") {
            if !backend.trim().is_empty() {
                self.backend = BackendKind::parse(&backend)?;
            }
        }
        if let Ok(path) = std::env::var("PLAYER_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = PathBuf::from(path);
            }
        }
        if let Ok(dir) = std::env::var("PLAYER_CACHE_DIR") {
            if !dir.trim().is_empty() {
                self.cache_dir = PathBuf::from(dir);
            }
        }
        if let Ok(refresh) = std::env::var("PLAYER_POLICY_REFRESH_SECS") {
            if !refresh.trim().is_empty() {
                let seconds: u64 = refresh.trim().parse().map_err(|_| {
                    anyhow!("PLAYER_POLICY_REFRESH_SECS must be an integer number of seconds")
                })?;
                self.policy_refresh = Duration::from_secs(seconds);
            }
        }
        if let Ok(ttl) = std::env::var("PLAYER_SESSION_TTL_SECS") {
            if !ttl.trim().is_empty() {
                let seconds: u64 = ttl.trim().parse().map_err(|_| {
                    anyhow!("PLAYER_SESSION_TTL_SECS must be an integer number of seconds")
                })?;
                self.default_available = Duration::from_secs(seconds);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.policy_refresh.is_zero() {
            return Err(anyhow!("policy refresh interval must be greater than zero"));
        }
        if self.default_available.is_zero() {
            return Err(anyhow!("default session window must be greater than zero"));
        }
        if self.backend == BackendKind::Sqlite && self.db_path.as_os_str().is_empty() {
            return Err(anyhow!("sqlite backend requires db_path"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<PlayerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
