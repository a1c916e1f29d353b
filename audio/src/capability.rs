//! Picks the most capable spatializer the platform supports for each source.

use analysis::ActivityConfig;
use audio_io::{AudioContext, AudioStream, MediaPlayer, SilentPlayback};
use log::{debug, error, warn};
use room_core::{CapabilityUnavailable, Error, PeerId};
use spatial::{
    AmbisonicScene, AmbisonicSpatializer, FullPanner, Spatializer, SpatializerKind, StereoPan,
    VolumeOnly,
};
use std::rc::Rc;

/// The most capable spatializer still worth trying in this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityCache {
    ceiling: SpatializerKind,
}

impl Default for CapabilityCache {
    fn default() -> Self {
        Self {
            ceiling: SpatializerKind::Ambisonic,
        }
    }
}

impl CapabilityCache {
    pub fn new(ceiling: SpatializerKind) -> Self {
        Self { ceiling }
    }

    pub fn ceiling(&self) -> SpatializerKind {
        self.ceiling
    }

    /// Stop trying `kind` and everything above it
    pub fn lower_below(&mut self, kind: SpatializerKind, reason: &CapabilityUnavailable) {
        let Some(below) = kind.below() else {
            return;
        };
        if below < self.ceiling {
            warn!(
                "{} spatialization unavailable ({}), falling back to {}",
                kind, reason, below
            );
            self.ceiling = below;
        }
    }

    /// Never try anything above `kind`
    pub fn cap(&mut self, kind: SpatializerKind) {
        self.ceiling = self.ceiling.min(kind);
    }

    /// Levels still allowed, most capable first
    pub fn candidates(&self) -> impl Iterator<Item = SpatializerKind> {
        let ceiling = self.ceiling;
        SpatializerKind::DESCENDING
            .into_iter()
            .filter(move |kind| *kind <= ceiling)
    }
}

/// What the spatializer constructors can draw on
pub struct Cascade<'a> {
    pub context: Option<&'a Rc<dyn AudioContext>>,
    pub scene: Option<&'a dyn AmbisonicScene>,
    pub player: &'a dyn MediaPlayer,
    pub analysis: ActivityConfig,
}

impl Cascade<'_> {
    fn context(&self) -> Result<&Rc<dyn AudioContext>, Error> {
        self.context
            .ok_or_else(|| CapabilityUnavailable("audio context").into())
    }

    fn attempt(
        &self,
        kind: SpatializerKind,
        peer_id: PeerId,
        stream: &AudioStream,
    ) -> Result<Box<dyn Spatializer>, Error> {
        Ok(match kind {
            SpatializerKind::Ambisonic => {
                let scene = self
                    .scene
                    .ok_or(CapabilityUnavailable("ambisonic library"))?;
                Box::new(AmbisonicSpatializer::new(
                    peer_id,
                    stream,
                    self.context()?,
                    scene,
                    self.analysis,
                )?)
            }
            SpatializerKind::FullPanner => Box::new(FullPanner::new(
                peer_id,
                stream,
                self.context()?,
                self.analysis,
            )?),
            SpatializerKind::StereoPan => Box::new(StereoPan::new(
                peer_id,
                stream,
                self.context()?,
                self.analysis,
            )?),
            SpatializerKind::VolumeOnly => Box::new(VolumeOnly::new(peer_id, stream, self.player)?),
        })
    }

    /// Try each allowed level from the top. Capability failures lower the
    /// process-wide ceiling; anything else only skips the level for this source.
    pub fn create(
        &self,
        cache: &mut CapabilityCache,
        peer_id: PeerId,
        stream: &AudioStream,
    ) -> Box<dyn Spatializer> {
        for kind in cache.candidates().collect::<Vec<_>>() {
            match self.attempt(kind, peer_id, stream) {
                Ok(spatializer) => {
                    debug!("Spatializing {} with {}", peer_id, kind);
                    return spatializer;
                }
                Err(Error::Capability(reason)) => cache.lower_below(kind, &reason),
                Err(e) => warn!("{} spatializer failed for {}: {}", kind, peer_id, e),
            }
        }

        error!("No playback available for {}, it will be silent", peer_id);
        Box::new(VolumeOnly::with_playback(
            peer_id,
            stream,
            Box::new(SilentPlayback::default()),
        ))
    }
}
