//! player_replay - replay a recorded signal script through a mounted player
//!
//! Reads one JSON signal per line (blank lines and `#` comments skipped)
//! and prints one JSON outcome per line.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;

use player_guard::store::{AvailabilitySettings, VideoStatus};
use player_guard::{
    now_ms, open_backend, CachedViewer, DeviceDescriptor, GlobalPlayerPolicy, LoadRequest,
    LocalSessionCache, PlayerConfig, PlayerSession, Signal, SimulatedSurface, Video,
    VideoSecurityPolicy, ViewerIdentity, WatermarkOverlay, WatermarkPosition,
};

const DEMO_VIDEO_ID: &str = "vid_demo";
const DEMO_DURATION_SECS: f64 = 600.0;
const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Share token of the video to open.
    #[arg(long)]
    share: String,
    /// Registered viewer id.
    #[arg(long)]
    viewer: String,
    /// Registered viewer email.
    #[arg(long)]
    email: String,
    /// Viewer display name (rendered in the watermark).
    #[arg(long, default_value = "")]
    name: String,
    /// JSON-lines signal script.
    #[arg(long)]
    script: PathBuf,
    /// User agent reported by the simulated browser.
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    user_agent: String,
    /// Publish a demo video and default global policy under --share first.
    #[arg(long)]
    seed_demo: bool,
    /// Simulate a browser without the Fullscreen API.
    #[arg(long)]
    no_fullscreen: bool,
}

struct LogOverlay;

impl WatermarkOverlay for LogOverlay {
    fn show(&self, position: WatermarkPosition, label: &str) {
        log::debug!(
            "watermark '{}' at top={:.1}% left={:.1}%",
            label,
            position.top_pct,
            position.left_pct
        );
    }

    fn hide(&self) {
        log::debug!("watermark hidden");
    }
}

fn demo_video(share: &str) -> Video {
    Video {
        id: DEMO_VIDEO_ID.to_string(),
        title: "Demo Lecture".to_string(),
        status: VideoStatus::Active,
        source_url: String::new(),
        security_settings: VideoSecurityPolicy::default(),
        availability_settings: AvailabilitySettings {
            share_id: share.to_string(),
            ..AvailabilitySettings::default()
        },
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = PlayerConfig::load()?;
    let backend = open_backend(&config)?;
    if args.seed_demo {
        backend.publish_video(&demo_video(&args.share))?;
        backend.publish_global_policy(&GlobalPlayerPolicy::default())?;
        log::info!("seeded demo video under share {}", args.share);
    }

    let viewer = ViewerIdentity {
        viewer_id: args.viewer.clone(),
        email: args.email.clone(),
        name: args.name.clone(),
        cnic: None,
    };
    let cache = LocalSessionCache::open(&config.cache_dir)?;
    if cache.load(&args.share)?.is_none() {
        cache.store(&args.share, &CachedViewer::new(viewer.clone(), now_ms()?))?;
    }

    let mut surface = SimulatedSurface::new(DEMO_DURATION_SECS);
    if args.no_fullscreen {
        surface = surface.without_fullscreen();
    }
    let request = LoadRequest {
        share_token: args.share.clone(),
        viewer,
        device: DeviceDescriptor::new(&args.user_agent),
        page: format!("/watch/{}/play", args.share),
        default_available: config.default_available,
    };
    let mut player = PlayerSession::mount(
        &backend.collaborators(),
        &config,
        Some(&cache),
        surface,
        Arc::new(LogOverlay),
        request,
    )?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", serde_json::to_string(&player.engine().snapshot())?)?;

    let file = std::fs::File::open(&args.script)
        .with_context(|| format!("failed to open script {}", args.script.display()))?;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let signal: Signal = serde_json::from_str(trimmed)
            .map_err(|e| anyhow!("script line {}: invalid signal: {}", idx + 1, e))?;
        let outcome = player.dispatch(&signal);
        writeln!(out, "{}", serde_json::to_string(&outcome)?)?;
    }

    player.unmount()
}
