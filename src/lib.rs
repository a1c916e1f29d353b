//! earshot: positional voice audio for shared virtual rooms
//!
//! Re-exports the workspace crates so integration tests and embedders can
//! reach the whole engine through one dependency.

pub use analysis;
pub use audio;
pub use audio_io;
pub use room_core;
pub use settings_manager;
pub use spatial;

pub use audio::{AudioHandler, AudioSourceManager, ConferenceEvent, Destination};
pub use room_core::{AudioCommand, AudioEvent, AudioProperties, Error, PeerId, Vec2};
pub use settings_manager::{ConfigManager, Settings};
