use super::{build_chain, remove_nodes, SourceState, Spatializer, SpatializerKind};
use crate::attenuation::Attenuation;
use crate::position::SoftwarePosition;
use analysis::{ActivityConfig, ActivityDetector};
use audio_io::{AudioContext, AudioStream, NodeId, NodeKind, Param};
use log::debug;
use room_core::{Error, PeerId, Vec2};
use std::rc::Rc;

/// Stream source through a gain and a stereo panner
pub struct StereoPan {
    state: SourceState,
    context: Rc<dyn AudioContext>,
    nodes: Vec<NodeId>,
    gain: NodeId,
    panner: NodeId,
}

impl StereoPan {
    pub fn new(
        peer_id: PeerId,
        stream: &AudioStream,
        context: &Rc<dyn AudioContext>,
        analysis: ActivityConfig,
    ) -> Result<Self, Error> {
        let detector = ActivityDetector::new(peer_id, stream, analysis)?;
        let nodes = build_chain(context, stream, &[NodeKind::Gain, NodeKind::StereoPanner])?;
        let (gain, panner) = (nodes[1], nodes[2]);

        Ok(Self {
            state: SourceState::new(
                peer_id,
                stream,
                Box::new(SoftwarePosition::new()),
                Some(detector),
            ),
            context: Rc::clone(context),
            nodes,
            gain,
            panner,
        })
    }
}

impl Spatializer for StereoPan {
    fn state(&self) -> &SourceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SourceState {
        &mut self.state
    }

    fn kind(&self) -> SpatializerKind {
        SpatializerKind::StereoPan
    }

    fn apply(&mut self, attenuation: Attenuation, _position: Vec2) {
        let result = self
            .context
            .set_param(self.gain, Param::Gain, attenuation.volume)
            .and_then(|_| self.context.set_param(self.panner, Param::Pan, attenuation.pan));
        if let Err(e) = result {
            debug!("Stereo update for {} dropped: {}", self.state.peer_id, e);
        }
    }

    fn release(&mut self) {
        remove_nodes(&self.context, &self.nodes);
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatializer::Frame;
    use approx::assert_relative_eq;
    use audio_io::{Capabilities, GraphContext};

    fn context() -> (Rc<GraphContext>, Rc<dyn AudioContext>) {
        let graph = Rc::new(GraphContext::offline(1000, Capabilities::software()));
        let context: Rc<dyn AudioContext> = graph.clone();
        (graph, context)
    }

    #[test]
    fn writes_gain_and_pan() {
        let (_graph, context) = context();
        let mut source = StereoPan::new(
            PeerId::new(),
            &AudioStream::new("alice"),
            &context,
            ActivityConfig::default(),
        )
        .unwrap();

        let frame = Frame {
            now: 0.0,
            listener: Vec2::new(1.0, 0.0),
        };
        source.set_target(Vec2::new(-4.0, 0.0), &frame);

        assert_relative_eq!(
            context.param_value(source.gain, Param::Gain).unwrap(),
            0.3086,
            epsilon = 1e-4
        );
        assert_relative_eq!(context.param_value(source.panner, Param::Pan).unwrap(), -1.0);
    }

    #[test]
    fn renders_to_the_left() {
        let (graph, context) = context();
        let stream = AudioStream::new("bob");
        let mut source =
            StereoPan::new(PeerId::new(), &stream, &context, ActivityConfig::default()).unwrap();
        source.set_target(
            Vec2::new(-2.0, 0.0),
            &Frame {
                now: 0.0,
                listener: Vec2::ZERO,
            },
        );

        stream.push(&[0.5; 8]);
        let out = graph.render_quantum(8);
        assert!(out[0].abs() > 0.0);
        assert_relative_eq!(out[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn dispose_removes_nodes() {
        let (graph, context) = context();
        let mut source = StereoPan::new(
            PeerId::new(),
            &AudioStream::new("carol"),
            &context,
            ActivityConfig::default(),
        )
        .unwrap();
        assert_eq!(graph.node_count(), 3);
        source.dispose();
        assert_eq!(graph.node_count(), 0);
        assert!(source.state().detector().is_some_and(|d| !d.is_capturing()));
    }

    #[test]
    fn missing_panner_is_a_capability_error() {
        let caps = Capabilities {
            stereo_panner: false,
            ..Capabilities::software()
        };
        let context: Rc<dyn AudioContext> = Rc::new(GraphContext::offline(1000, caps));
        let result = StereoPan::new(
            PeerId::new(),
            &AudioStream::new("dave"),
            &context,
            ActivityConfig::default(),
        );
        assert!(matches!(result, Err(Error::Capability(_))));
    }
}
