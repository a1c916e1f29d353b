//! Plain media playback of a stream, outside any audio context.
//!
//! This is the least capable rendering path: a volume knob and a choice of
//! output device, nothing else.

use crate::device::{open_output, DeviceOutput};
use crate::stream::AudioStream;
use log::{debug, error};
use room_core::Error;
use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// One stream being played
pub trait MediaPlayback {
    /// Volume in `[0, 1]`
    fn set_volume(&self, volume: f32);

    fn volume(&self) -> f32;

    /// Route playback to another output device
    fn set_sink(&self, device_id: &str) -> Result<(), Error>;

    /// Stop playing; further calls are harmless
    fn stop(&self);
}

/// Starts playback of streams
pub trait MediaPlayer {
    fn play(&self, stream: &AudioStream) -> Result<Box<dyn MediaPlayback>, Error>;
}

/// Plays streams on an output device, one cpal stream per playback
#[derive(Debug, Default)]
pub struct DevicePlayer {
    device_id: Option<String>,
}

impl DevicePlayer {
    pub fn new(device_id: Option<String>) -> Self {
        Self { device_id }
    }
}

impl MediaPlayer for DevicePlayer {
    fn play(&self, stream: &AudioStream) -> Result<Box<dyn MediaPlayback>, Error> {
        let volume = Arc::new(AtomicU32::new(1.0f32.to_bits()));
        let output = open_playback(self.device_id.as_deref(), stream, &volume)?;
        output.play()?;
        debug!("Playing {} on its own output stream", stream.label());
        Ok(Box::new(DevicePlayback {
            stream: stream.clone(),
            volume,
            output: RefCell::new(Some(output)),
        }))
    }
}

fn open_playback(
    device_id: Option<&str>,
    stream: &AudioStream,
    volume: &Arc<AtomicU32>,
) -> Result<DeviceOutput, Error> {
    let source = stream.clone();
    let gain = Arc::clone(volume);
    let label = stream.label().to_string();
    let mut mono: Vec<f32> = Vec::new();

    open_output(
        device_id,
        move |out, channels| {
            let channels = channels.max(1);
            let frames = out.len() / channels;
            mono.resize(frames, 0.0);
            source.pull(&mut mono);
            let gain = f32::from_bits(gain.load(Ordering::Relaxed));
            for (frame, &sample) in out.chunks_mut(channels).zip(mono.iter()) {
                frame.fill(sample * gain);
            }
        },
        move |reason| error!("Playback of {} failed: {}", label, reason),
    )
}

pub struct DevicePlayback {
    stream: AudioStream,
    volume: Arc<AtomicU32>,
    output: RefCell<Option<DeviceOutput>>,
}

impl MediaPlayback for DevicePlayback {
    fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    fn set_sink(&self, device_id: &str) -> Result<(), Error> {
        let mut output = self.output.borrow_mut();
        if output.is_none() {
            return Err(Error::InvalidState("playback stopped".to_string()));
        }
        let replacement = open_playback(Some(device_id), &self.stream, &self.volume)?;
        replacement.play()?;
        *output = Some(replacement);
        Ok(())
    }

    fn stop(&self) {
        if let Some(output) = self.output.borrow_mut().take() {
            if let Err(e) = output.pause() {
                debug!("Pausing playback failed: {}", e);
            }
        }
    }
}

/// Playback without an output device, for headless runs and tests.
/// Drains nothing; the stream's playout queue stays bounded on its own.
#[derive(Debug, Default)]
pub struct SilentPlayer;

impl MediaPlayer for SilentPlayer {
    fn play(&self, _stream: &AudioStream) -> Result<Box<dyn MediaPlayback>, Error> {
        Ok(Box::new(SilentPlayback::default()))
    }
}

#[derive(Debug)]
pub struct SilentPlayback {
    volume: Cell<f32>,
    sink: RefCell<Option<String>>,
    stopped: Cell<bool>,
}

impl Default for SilentPlayback {
    fn default() -> Self {
        Self {
            volume: Cell::new(1.0),
            sink: RefCell::new(None),
            stopped: Cell::new(false),
        }
    }
}

impl SilentPlayback {
    pub fn sink(&self) -> Option<String> {
        self.sink.borrow().clone()
    }
}

impl MediaPlayback for SilentPlayback {
    fn set_volume(&self, volume: f32) {
        self.volume.set(volume.clamp(0.0, 1.0));
    }

    fn volume(&self) -> f32 {
        self.volume.get()
    }

    fn set_sink(&self, device_id: &str) -> Result<(), Error> {
        if self.stopped.get() {
            return Err(Error::InvalidState("playback stopped".to_string()));
        }
        *self.sink.borrow_mut() = Some(device_id.to_string());
        Ok(())
    }

    fn stop(&self) {
        self.stopped.set(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn silent_playback_clamps_volume() {
        let playback = SilentPlayer.play(&AudioStream::new("alice")).unwrap();
        playback.set_volume(1.5);
        assert_relative_eq!(playback.volume(), 1.0);
        playback.set_volume(0.25);
        assert_relative_eq!(playback.volume(), 0.25);
    }

    #[test]
    fn silent_playback_routes_until_stopped() {
        let playback = SilentPlayback::default();
        playback.set_sink("headphones").unwrap();
        assert_eq!(playback.sink().as_deref(), Some("headphones"));

        playback.stop();
        playback.stop();
        assert!(playback.set_sink("speakers").is_err());
    }
}
