use crate::{AudioProperties, PeerId};

/// A source's speech activity flipped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityChange {
    /// Source whose activity changed
    pub peer_id: PeerId,
    /// New activity state
    pub is_active: bool,
}

/// Events emitted by the audio engine to collaborators
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// A participant started or stopped speaking
    AudioActivity {
        /// ID of the participant
        peer_id: PeerId,
        /// Whether the participant is currently speaking
        is_active: bool,
    },

    /// The audio context failed; every source is about to be torn down
    ContextDestroying {
        /// Why the context had to go
        reason: String,
    },

    /// A fresh context was built and the sources were restored
    ContextDestroyed {
        /// Number of sources recreated on the new context
        restored: usize,
    },
}

impl From<ActivityChange> for AudioEvent {
    fn from(change: ActivityChange) -> Self {
        AudioEvent::AudioActivity {
            peer_id: change.peer_id,
            is_active: change.is_active,
        }
    }
}

/// Commands the game/UI side sends to the audio engine
#[derive(Debug, Clone, PartialEq)]
pub enum AudioCommand {
    /// First user gesture: resume audio output
    Start,

    /// Move the listener
    SetLocalPosition { x: f32, y: f32 },

    /// Move a remote participant
    SetUserPosition {
        /// ID of the participant to move
        peer_id: PeerId,
        x: f32,
        y: f32,
    },

    /// Replace the distance attenuation parameters
    SetAudioProperties(AudioProperties),

    /// Route playback to another output device
    SetAudioOutputDevice {
        /// Device identifier as listed by the audio backend
        device_id: String,
    },

    /// Stop the handler (used for testing and shutdown)
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_change_becomes_audio_event() {
        let peer_id = PeerId::new();
        let event = AudioEvent::from(ActivityChange {
            peer_id,
            is_active: true,
        });
        assert_eq!(
            event,
            AudioEvent::AudioActivity {
                peer_id,
                is_active: true
            }
        );
    }
}
