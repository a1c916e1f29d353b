//! Per-source rendering strategies, from plain volume up to ambisonics.

mod ambisonic;
mod full_panner;
mod stereo_pan;
mod volume_only;

pub use ambisonic::{AmbisonicLibrary, AmbisonicScene, AmbisonicSource, AmbisonicSpatializer};
pub use full_panner::FullPanner;
pub use stereo_pan::StereoPan;
pub use volume_only::VolumeOnly;

#[cfg(test)]
pub use ambisonic::{MockAmbisonicLibrary, MockAmbisonicScene, MockAmbisonicSource};

use crate::attenuation::Attenuation;
use crate::position::PositionModel;
use analysis::ActivityDetector;
use audio_io::{AudioContext, AudioStream, Endpoint, NodeId, NodeKind};
use room_core::{ActivityChange, AudioProperties, Error, PeerId, Vec2};
use std::rc::Rc;

/// Spatializer variants, ordered from least to most capable
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpatializerKind {
    VolumeOnly,
    StereoPan,
    FullPanner,
    Ambisonic,
}

impl SpatializerKind {
    /// Most capable first
    pub const DESCENDING: [SpatializerKind; 4] = [
        SpatializerKind::Ambisonic,
        SpatializerKind::FullPanner,
        SpatializerKind::StereoPan,
        SpatializerKind::VolumeOnly,
    ];

    /// The next less capable variant
    pub fn below(self) -> Option<SpatializerKind> {
        match self {
            SpatializerKind::Ambisonic => Some(SpatializerKind::FullPanner),
            SpatializerKind::FullPanner => Some(SpatializerKind::StereoPan),
            SpatializerKind::StereoPan => Some(SpatializerKind::VolumeOnly),
            SpatializerKind::VolumeOnly => None,
        }
    }
}

impl std::fmt::Display for SpatializerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SpatializerKind::VolumeOnly => "volume-only",
            SpatializerKind::StereoPan => "stereo pan",
            SpatializerKind::FullPanner => "full panner",
            SpatializerKind::Ambisonic => "ambisonic",
        };
        f.write_str(name)
    }
}

/// What every source needs to know about the current tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Clock of the destination, in seconds
    pub now: f64,
    pub listener: Vec2,
}

/// Bookkeeping shared by every spatializer variant
pub struct SourceState {
    peer_id: PeerId,
    stream: AudioStream,
    properties: AudioProperties,
    position: Box<dyn PositionModel>,
    detector: Option<ActivityDetector>,
    attenuation: Attenuation,
    disposed: bool,
}

impl SourceState {
    pub fn new(
        peer_id: PeerId,
        stream: &AudioStream,
        position: Box<dyn PositionModel>,
        detector: Option<ActivityDetector>,
    ) -> Self {
        Self {
            peer_id,
            stream: stream.clone(),
            properties: AudioProperties::default(),
            position,
            detector,
            attenuation: Attenuation::default(),
            disposed: false,
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn detector(&self) -> Option<&ActivityDetector> {
        self.detector.as_ref()
    }
}

/// Renders one remote participant's voice at a position relative to the listener.
///
/// Variants supply their routing through [`Spatializer::apply`]; position,
/// attenuation and activity bookkeeping are shared.
pub trait Spatializer {
    fn state(&self) -> &SourceState;

    fn state_mut(&mut self) -> &mut SourceState;

    fn kind(&self) -> SpatializerKind;

    /// Push the latest attenuation and position into the routing
    fn apply(&mut self, attenuation: Attenuation, position: Vec2);

    /// Re-parameterise native distance modelling, where there is one
    fn configure(&mut self, _properties: &AudioProperties) {}

    /// Route this source to another output device. Returns false where
    /// the variant cannot route per source.
    fn set_output_device(&mut self, _device_id: &str) -> bool {
        false
    }

    /// Tear down routing nodes and playback
    fn release(&mut self);

    fn peer_id(&self) -> PeerId {
        self.state().peer_id
    }

    fn stream(&self) -> &AudioStream {
        &self.state().stream
    }

    fn audio_properties(&self) -> AudioProperties {
        self.state().properties
    }

    fn set_audio_properties(&mut self, properties: AudioProperties) {
        let properties = properties.sanitized();
        self.state_mut().properties = properties;
        self.configure(&properties);
    }

    /// Start moving towards `target` over the configured transition time
    fn set_target(&mut self, target: Vec2, frame: &Frame) {
        let duration = self.state().properties.transition_time;
        self.state_mut()
            .position
            .set_target(target, frame.now, duration);
        self.refresh(frame);
    }

    /// Advance the position and re-apply attenuation without analysing audio
    fn refresh(&mut self, frame: &Frame) {
        if self.state().disposed {
            return;
        }
        let state = self.state_mut();
        let position = state.position.update(frame.now);
        let attenuation = Attenuation::between(position, frame.listener, &state.properties);
        state.attenuation = attenuation;
        self.apply(attenuation, position);
    }

    /// Per-tick update. Returns an activity change when the source starts or
    /// stops speaking.
    fn update(&mut self, frame: &Frame) -> Option<ActivityChange> {
        self.refresh(frame);
        self.state_mut().detector.as_mut()?.tick()
    }

    fn position(&self) -> Vec2 {
        self.state().position.position()
    }

    fn target(&self) -> Vec2 {
        self.state().position.target()
    }

    fn attenuation(&self) -> Attenuation {
        self.state().attenuation
    }

    fn is_active(&self) -> bool {
        self.state()
            .detector
            .as_ref()
            .map(ActivityDetector::is_active)
            .unwrap_or(false)
    }

    /// Release everything this source holds; repeat calls do nothing
    fn dispose(&mut self) {
        let state = self.state_mut();
        if state.disposed {
            return;
        }
        state.disposed = true;
        if let Some(detector) = state.detector.as_mut() {
            detector.dispose();
        }
        self.release();
    }
}

/// Build `stream source -> kinds... -> output` on `context`.
/// Returns the node ids in chain order; nothing is left behind on failure.
pub(crate) fn build_chain(
    context: &Rc<dyn AudioContext>,
    stream: &AudioStream,
    kinds: &[NodeKind],
) -> Result<Vec<NodeId>, Error> {
    let mut nodes = Vec::with_capacity(kinds.len() + 1);
    let result = (|| -> Result<(), Error> {
        nodes.push(context.create_stream_source(stream)?);
        for &kind in kinds {
            nodes.push(context.create_node(kind)?);
        }
        for pair in nodes.windows(2) {
            context.connect(pair[0], Endpoint::Node(pair[1]))?;
        }
        if let Some(&last) = nodes.last() {
            context.connect(last, Endpoint::Output)?;
        }
        Ok(())
    })();

    match result {
        Ok(()) => Ok(nodes),
        Err(e) => {
            remove_nodes(context, &nodes);
            Err(e)
        }
    }
}

pub(crate) fn remove_nodes(context: &Rc<dyn AudioContext>, nodes: &[NodeId]) {
    for &node in nodes {
        context.remove_node(node);
    }
}
