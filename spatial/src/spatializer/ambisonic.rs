use super::{SourceState, Spatializer, SpatializerKind};
use crate::attenuation::Attenuation;
use crate::position::SoftwarePosition;
use analysis::{ActivityConfig, ActivityDetector};
use audio_io::{AudioContext, AudioStream, NodeId};
use room_core::{AudioProperties, CapabilityUnavailable, Error, PeerId, Vec2};
use std::rc::Rc;

/// Entry point of an ambisonic rendering library
#[cfg_attr(test, mockall::automock)]
pub trait AmbisonicLibrary {
    /// Build a scene that decodes into `context`'s output
    fn create_scene(&self, context: Rc<dyn AudioContext>) -> Result<Box<dyn AmbisonicScene>, Error>;
}

/// A sound field shared by every ambisonic source
#[cfg_attr(test, mockall::automock)]
pub trait AmbisonicScene {
    /// Encode the output of `input` into the scene
    fn create_source(&self, input: NodeId) -> Result<Box<dyn AmbisonicSource>, Error>;

    fn set_listener_position(&self, x: f32, y: f32, z: f32);

    fn dispose(&self);
}

/// One encoded source inside a scene
#[cfg_attr(test, mockall::automock)]
pub trait AmbisonicSource {
    fn set_position(&self, x: f32, y: f32, z: f32);

    /// Linear rolloff between `min_distance` and `max_distance`
    fn set_distance_model(&self, min_distance: f32, max_distance: f32, rolloff: f32);

    fn dispose(&self);
}

fn apply_distance_model(source: &dyn AmbisonicSource, properties: &AudioProperties) {
    source.set_distance_model(
        properties.min_distance,
        properties.max_distance,
        properties.rolloff,
    );
}

/// Source encoded into the shared ambisonic scene at its absolute position
pub struct AmbisonicSpatializer {
    state: SourceState,
    context: Rc<dyn AudioContext>,
    input: NodeId,
    source: Box<dyn AmbisonicSource>,
}

impl AmbisonicSpatializer {
    pub fn new(
        peer_id: PeerId,
        stream: &AudioStream,
        context: &Rc<dyn AudioContext>,
        scene: &dyn AmbisonicScene,
        analysis: ActivityConfig,
    ) -> Result<Self, Error> {
        let caps = context.capabilities();
        if !(caps.graph && caps.panner) {
            return Err(CapabilityUnavailable("3D audio graph").into());
        }
        let detector = ActivityDetector::new(peer_id, stream, analysis)?;
        let input = context.create_stream_source(stream)?;
        let source = match scene.create_source(input) {
            Ok(source) => source,
            Err(e) => {
                context.remove_node(input);
                return Err(e);
            }
        };
        apply_distance_model(source.as_ref(), &AudioProperties::default());

        Ok(Self {
            state: SourceState::new(
                peer_id,
                stream,
                Box::new(SoftwarePosition::new()),
                Some(detector),
            ),
            context: Rc::clone(context),
            input,
            source,
        })
    }
}

impl Spatializer for AmbisonicSpatializer {
    fn state(&self) -> &SourceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SourceState {
        &mut self.state
    }

    fn kind(&self) -> SpatializerKind {
        SpatializerKind::Ambisonic
    }

    fn apply(&mut self, _attenuation: Attenuation, position: Vec2) {
        self.source.set_position(position.x, 0.0, position.y);
    }

    fn configure(&mut self, properties: &AudioProperties) {
        if self.state.is_disposed() {
            return;
        }
        apply_distance_model(self.source.as_ref(), properties);
    }

    fn release(&mut self) {
        self.source.dispose();
        self.context.remove_node(self.input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatializer::Frame;
    use audio_io::{Capabilities, GraphContext};
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn context(caps: Capabilities) -> (Rc<GraphContext>, Rc<dyn AudioContext>) {
        let graph = Rc::new(GraphContext::offline(1000, caps));
        let context: Rc<dyn AudioContext> = graph.clone();
        (graph, context)
    }

    #[test]
    fn forwards_absolute_position() {
        let (_graph, context) = context(Capabilities::full());

        let mut source = MockAmbisonicSource::new();
        source
            .expect_set_position()
            .with(eq(3.0), eq(0.0), eq(-2.0))
            .times(1)
            .return_const(());
        source.expect_set_distance_model().return_const(());
        source.expect_dispose().times(1).return_const(());

        let mut scene = MockAmbisonicScene::new();
        scene
            .expect_create_source()
            .return_once(move |_| Ok(Box::new(source) as Box<dyn AmbisonicSource>));

        let mut spatializer = AmbisonicSpatializer::new(
            PeerId::new(),
            &AudioStream::new("alice"),
            &context,
            &scene,
            ActivityConfig::default(),
        )
        .unwrap();

        spatializer.set_target(
            Vec2::new(3.0, -2.0),
            &Frame {
                now: 0.0,
                listener: Vec2::new(1.0, 1.0),
            },
        );
        spatializer.dispose();
        spatializer.dispose();
    }

    #[test]
    fn properties_reach_the_distance_model() {
        let (_graph, context) = context(Capabilities::full());

        let mut source = MockAmbisonicSource::new();
        let mut seq = Sequence::new();
        source
            .expect_set_distance_model()
            .with(eq(1.0), eq(10.0), eq(1.0))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        source
            .expect_set_distance_model()
            .with(eq(2.0), eq(8.0), eq(0.5))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        source.expect_dispose().times(1).return_const(());

        let mut scene = MockAmbisonicScene::new();
        scene
            .expect_create_source()
            .return_once(move |_| Ok(Box::new(source) as Box<dyn AmbisonicSource>));

        let mut spatializer = AmbisonicSpatializer::new(
            PeerId::new(),
            &AudioStream::new("dave"),
            &context,
            &scene,
            ActivityConfig::default(),
        )
        .unwrap();

        spatializer.set_audio_properties(AudioProperties::new(2.0, 8.0, 0.5, 0.0));
        spatializer.dispose();
        // Ignored once disposed
        spatializer.set_audio_properties(AudioProperties::new(3.0, 9.0, 1.0, 0.0));
    }

    #[test]
    fn scene_failure_cleans_up() {
        let (graph, context) = context(Capabilities::full());
        let mut scene = MockAmbisonicScene::new();
        scene
            .expect_create_source()
            .returning(|_| Err(Error::Audio("encoder busy".to_string())));

        let result = AmbisonicSpatializer::new(
            PeerId::new(),
            &AudioStream::new("bob"),
            &context,
            &scene,
            ActivityConfig::default(),
        );
        assert!(matches!(result, Err(Error::Audio(_))));
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn needs_a_3d_graph() {
        let (_graph, context) = context(Capabilities::none());
        let scene = MockAmbisonicScene::new();
        let result = AmbisonicSpatializer::new(
            PeerId::new(),
            &AudioStream::new("carol"),
            &context,
            &scene,
            ActivityConfig::default(),
        );
        assert!(matches!(result, Err(Error::Capability(_))));
    }
}
