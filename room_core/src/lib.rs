use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a participant whose voice is placed in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Display only the first 8 characters for brevity
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// A point on the 2D room map.
///
/// Map `y` becomes the 3D `z` axis whenever a position is handed to a 3D
/// panner; the 3D `y` (height) is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    /// Linear interpolation towards `other`, `t` is not clamped.
    pub fn lerp(self, other: Vec2, t: f32) -> Vec2 {
        Vec2 {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
        }
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::fmt::Display for Vec2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

/// Distance attenuation parameters shared by the destination and every source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioProperties {
    /// Distance at or below which a voice plays at full volume
    pub min_distance: f32,
    /// Distance at or beyond which a voice is silent
    pub max_distance: f32,
    /// Rolloff factor handed to native distance models
    pub rolloff: f32,
    /// Seconds a position change takes to glide to its target
    pub transition_time: f64,
}

impl Default for AudioProperties {
    fn default() -> Self {
        Self {
            min_distance: 1.0,
            max_distance: 10.0,
            rolloff: 1.0,
            transition_time: 0.1,
        }
    }
}

impl AudioProperties {
    pub fn new(min_distance: f32, max_distance: f32, rolloff: f32, transition_time: f64) -> Self {
        Self {
            min_distance,
            max_distance,
            rolloff,
            transition_time,
        }
    }

    /// Check the invariants `0 < min <= max`, `rolloff > 0`, `transition_time >= 0`.
    pub fn validate(&self) -> Result<(), Error> {
        if self.min_distance.is_nan()
            || self.max_distance.is_nan()
            || self.rolloff.is_nan()
            || self.transition_time.is_nan()
        {
            return Err(Error::Config("audio properties must be numbers".to_string()));
        }
        if self.min_distance <= 0.0 {
            return Err(Error::Config(format!(
                "min_distance must be positive, got {}",
                self.min_distance
            )));
        }
        if self.max_distance < self.min_distance {
            return Err(Error::Config(format!(
                "max_distance ({}) must not be below min_distance ({})",
                self.max_distance, self.min_distance
            )));
        }
        if self.rolloff <= 0.0 {
            return Err(Error::Config(format!(
                "rolloff must be positive, got {}",
                self.rolloff
            )));
        }
        if self.transition_time < 0.0 {
            return Err(Error::Config(format!(
                "transition_time must not be negative, got {}",
                self.transition_time
            )));
        }
        Ok(())
    }

    /// Coerce the values into their valid ranges instead of rejecting them.
    pub fn sanitized(self) -> Self {
        if let Err(e) = self.validate() {
            log::warn!("Adjusting audio properties: {}", e);
        }

        let defaults = Self::default();
        let min_distance = if self.min_distance > 0.0 {
            self.min_distance
        } else {
            f32::EPSILON
        };
        let max_distance = if self.max_distance >= min_distance {
            self.max_distance
        } else {
            min_distance
        };
        let rolloff = if self.rolloff > 0.0 {
            self.rolloff
        } else {
            defaults.rolloff
        };
        let transition_time = if self.transition_time >= 0.0 {
            self.transition_time
        } else {
            0.0
        };

        Self {
            min_distance,
            max_distance,
            rolloff,
            transition_time,
        }
    }
}

/// A required native feature is missing; the capability cascade falls back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0} is not available")]
pub struct CapabilityUnavailable(pub &'static str);

/// The stream has not delivered any audio yet; capture is retried next tick.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("stream is not flowing yet")]
pub struct CaptureNotReady;

/// The audio context became unusable and must be rebuilt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("audio context failed: {0}")]
pub struct ContextFatal(pub String);

/// Unified error type for the application.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error(transparent)]
    Capability(#[from] CapabilityUnavailable),

    #[error(transparent)]
    Capture(#[from] CaptureNotReady),

    #[error(transparent)]
    Context(#[from] ContextFatal),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error), // Catch-all for other errors
}

/// Rate of offline contexts and of device contexts until the device reports its own
pub const SAMPLE_RATE: u32 = 48000;

/// Default analysis window for voice activity detection
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

pub mod events;

// Re-export commonly used types from events
pub use events::{ActivityChange, AudioCommand, AudioEvent};
