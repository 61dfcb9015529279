use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use player_guard::config::{BackendKind, PlayerConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PLAYER_CONFIG",
        "PLAYER_BACKEND",
        "PLAYER_DB_PATH",
        "PLAYER_CACHE_DIR",
        "PLAYER_POLICY_REFRESH_SECS",
        "PLAYER_SESSION_TTL_SECS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "backend": "sqlite",
        "db_path": "player_prod.db",
        "cache_dir": "/var/cache/player",
        "policy": { "refresh_secs": 30 },
        "session": { "default_available_secs": 3600 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("PLAYER_CONFIG", file.path());
    std::env::set_var("PLAYER_DB_PATH", "override.db");
    std::env::set_var("PLAYER_POLICY_REFRESH_SECS", "15");

    let cfg = PlayerConfig::load().expect("load config");

    assert_eq!(cfg.backend, BackendKind::Sqlite);
    assert_eq!(cfg.db_path, PathBuf::from("override.db"));
    assert_eq!(cfg.cache_dir, PathBuf::from("/var/cache/player"));
    assert_eq!(cfg.policy_refresh, Duration::from_secs(15));
    assert_eq!(cfg.default_available, Duration::from_secs(3600));

    clear_env();
}

#[test]
fn loads_toml_config_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let mut file = Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
backend = "demo"
cache_dir = "cache"

[policy]
refresh_secs = 90
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("PLAYER_CONFIG", file.path());

    let cfg = PlayerConfig::load().expect("load config");
    assert_eq!(cfg.backend, BackendKind::Demo);
    assert_eq!(cfg.cache_dir, PathBuf::from("cache"));
    assert_eq!(cfg.policy_refresh, Duration::from_secs(90));
    assert_eq!(cfg.default_available, Duration::from_secs(86_400));

    clear_env();
}

#[test]
fn defaults_apply_without_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let cfg = PlayerConfig::load().expect("load config");
    assert_eq!(cfg.backend, BackendKind::Demo);
    assert_eq!(cfg.db_path, PathBuf::from("player.db"));
    assert_eq!(cfg.cache_dir, PathBuf::from("player_cache"));
    assert_eq!(cfg.policy_refresh, Duration::from_secs(60));

    clear_env();
}

#[test]
fn empty_env_values_are_ignored() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    std::env::set_var("PLAYER_BACKEND", "  ");
    std::env::set_var("PLAYER_POLICY_REFRESH_SECS", "");

    let cfg = PlayerConfig::load().expect("load config");
    assert_eq!(cfg.backend, BackendKind::Demo);
    assert_eq!(cfg.policy_refresh, Duration::from_secs(60));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    std::env::set_var("PLAYER_POLICY_REFRESH_SECS", "0");
    assert!(PlayerConfig::load().is_err());

    std::env::set_var("PLAYER_POLICY_REFRESH_SECS", "soon");
    assert!(PlayerConfig::load().is_err());
    clear_env();

    std::env::set_var("PLAYER_BACKEND", "firestore");
    assert!(PlayerConfig::load().is_err());

    clear_env();
}

#[test]
fn unreadable_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var("PLAYER_CONFIG", dir.path().join("missing.json"));
    let err = PlayerConfig::load().expect_err("missing file");
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
