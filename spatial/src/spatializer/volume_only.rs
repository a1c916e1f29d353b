use super::{SourceState, Spatializer, SpatializerKind};
use crate::attenuation::Attenuation;
use crate::position::SoftwarePosition;
use audio_io::{AudioStream, MediaPlayback, MediaPlayer};
use log::warn;
use room_core::{Error, PeerId, Vec2};

/// Plain playback with distance volume. No pan and no activity analysis.
pub struct VolumeOnly {
    state: SourceState,
    playback: Box<dyn MediaPlayback>,
}

impl VolumeOnly {
    pub fn new(peer_id: PeerId, stream: &AudioStream, player: &dyn MediaPlayer) -> Result<Self, Error> {
        Ok(Self::with_playback(peer_id, stream, player.play(stream)?))
    }

    /// Wrap playback that is already running
    pub fn with_playback(
        peer_id: PeerId,
        stream: &AudioStream,
        playback: Box<dyn MediaPlayback>,
    ) -> Self {
        Self {
            state: SourceState::new(peer_id, stream, Box::new(SoftwarePosition::new()), None),
            playback,
        }
    }

    pub fn volume(&self) -> f32 {
        self.playback.volume()
    }
}

impl Spatializer for VolumeOnly {
    fn state(&self) -> &SourceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SourceState {
        &mut self.state
    }

    fn kind(&self) -> SpatializerKind {
        SpatializerKind::VolumeOnly
    }

    fn apply(&mut self, attenuation: Attenuation, _position: Vec2) {
        self.playback.set_volume(attenuation.volume);
    }

    fn set_output_device(&mut self, device_id: &str) -> bool {
        if self.state.is_disposed() {
            return false;
        }
        match self.playback.set_sink(device_id) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not route {} to {}: {}", self.state.peer_id, device_id, e);
                false
            }
        }
    }

    fn release(&mut self) {
        self.playback.stop();
    }
}
