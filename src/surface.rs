//! Playback surface control contract.
//!
//! The engine drives the media element only through `PlaybackSurface`.
//! `SimulatedSurface` is a headless implementation used by the replay
//! binary and by tests; it records every command it receives.

use anyhow::{anyhow, Result};

pub trait PlaybackSurface: Send {
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn seek(&mut self, time: f64) -> Result<()>;
    fn set_rate(&mut self, rate: f64) -> Result<()>;
    fn request_fullscreen(&mut self) -> Result<()>;
    fn exit_fullscreen(&mut self) -> Result<()>;

    fn current_time(&self) -> f64;
    fn duration(&self) -> f64;
    fn playback_rate(&self) -> f64;
    fn is_paused(&self) -> bool;
    fn is_fullscreen(&self) -> bool;

    /// False when the Fullscreen API is missing; fullscreen rules are skipped.
    fn supports_fullscreen(&self) -> bool {
        true
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SurfaceCommand {
    Play,
    Pause,
    Seek(f64),
    SetRate(f64),
    RequestFullscreen,
    ExitFullscreen,
}

#[derive(Debug)]
pub struct SimulatedSurface {
    current_time: f64,
    duration: f64,
    rate: f64,
    paused: bool,
    fullscreen: bool,
    fullscreen_supported: bool,
    commands: Vec<SurfaceCommand>,
}

impl SimulatedSurface {
    pub fn new(duration: f64) -> Self {
        Self {
            current_time: 0.0,
            duration,
            rate: 1.0,
            paused: true,
            fullscreen: false,
            fullscreen_supported: true,
            commands: Vec::new(),
        }
    }

    pub fn without_fullscreen(mut self) -> Self {
        self.fullscreen_supported = false;
        self
    }

    pub fn commands(&self) -> &[SurfaceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<SurfaceCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Mirror what the media element reports natively, without recording
    /// a command (the viewer moved the playhead or changed rate).
    pub fn set_native_time(&mut self, time: f64) {
        self.current_time = time.clamp(0.0, self.duration.max(0.0));
    }

    pub fn set_native_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    pub fn set_native_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn set_native_fullscreen(&mut self, fullscreen: bool) {
        self.fullscreen = fullscreen;
    }
}

impl PlaybackSurface for SimulatedSurface {
    fn play(&mut self) -> Result<()> {
        self.commands.push(SurfaceCommand::Play);
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.commands.push(SurfaceCommand::Pause);
        self.paused = true;
        Ok(())
    }

    fn seek(&mut self, time: f64) -> Result<()> {
        if !time.is_finite() {
            return Err(anyhow!("seek target must be finite"));
        }
        self.commands.push(SurfaceCommand::Seek(time));
        self.set_native_time(time);
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        if !(rate.is_finite() && rate > 0.0) {
            return Err(anyhow!("playback rate must be > 0"));
        }
        self.commands.push(SurfaceCommand::SetRate(rate));
        self.rate = rate;
        Ok(())
    }

    fn request_fullscreen(&mut self) -> Result<()> {
        if !self.fullscreen_supported {
            return Err(anyhow!("fullscreen api not available"));
        }
        self.commands.push(SurfaceCommand::RequestFullscreen);
        self.fullscreen = true;
        Ok(())
    }

    fn exit_fullscreen(&mut self) -> Result<()> {
        self.commands.push(SurfaceCommand::ExitFullscreen);
        self.fullscreen = false;
        Ok(())
    }

    fn current_time(&self) -> f64 {
        self.current_time
    }

    fn duration(&self) -> f64 {
        self.duration
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    fn supports_fullscreen(&self) -> bool {
        self.fullscreen_supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_are_recorded_in_order() {
        let mut surface = SimulatedSurface::new(120.0);
        surface.play().expect("play");
        surface.set_rate(1.0).expect("rate");
        surface.seek(30.0).expect("seek");
        surface.pause().expect("pause");
        assert_eq!(
            surface.take_commands(),
            vec![
                SurfaceCommand::Play,
                SurfaceCommand::SetRate(1.0),
                SurfaceCommand::Seek(30.0),
                SurfaceCommand::Pause,
            ]
        );
        assert!(surface.commands().is_empty());
        assert!(surface.is_paused());
        assert_eq!(surface.current_time(), 30.0);
    }

    #[test]
    fn seek_is_clamped_to_duration() {
        let mut surface = SimulatedSurface::new(10.0);
        surface.seek(99.0).expect("seek");
        assert_eq!(surface.current_time(), 10.0);
        assert!(surface.seek(f64::NAN).is_err());
    }

    #[test]
    fn fullscreen_unavailable_is_an_error() {
        let mut surface = SimulatedSurface::new(10.0).without_fullscreen();
        assert!(!surface.supports_fullscreen());
        assert!(surface.request_fullscreen().is_err());
        assert!(!surface.is_fullscreen());
    }
}
