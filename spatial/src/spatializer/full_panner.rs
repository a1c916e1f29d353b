use super::{build_chain, remove_nodes, SourceState, Spatializer, SpatializerKind};
use crate::attenuation::Attenuation;
use crate::position::AutomatedPosition;
use analysis::{ActivityConfig, ActivityDetector};
use audio_io::{AudioContext, AudioStream, NodeId, NodeKind, PannerConfig, PanningModel};
use log::debug;
use room_core::{AudioProperties, CapabilityUnavailable, Error, PeerId, Vec2};
use std::rc::Rc;

/// Native HRTF panner node with linear distance rolloff.
///
/// The panner's own distance model replaces the manual volume curve, and
/// its position params are automated directly.
pub struct FullPanner {
    state: SourceState,
    context: Rc<dyn AudioContext>,
    nodes: Vec<NodeId>,
    panner: NodeId,
}

fn panner_config(properties: &AudioProperties) -> PannerConfig {
    PannerConfig {
        ref_distance: properties.min_distance,
        max_distance: properties.max_distance,
        rolloff_factor: properties.rolloff,
    }
}

impl FullPanner {
    pub fn new(
        peer_id: PeerId,
        stream: &AudioStream,
        context: &Rc<dyn AudioContext>,
        analysis: ActivityConfig,
    ) -> Result<Self, Error> {
        if !context.capabilities().has_listener_positioning() {
            return Err(CapabilityUnavailable("listener positioning").into());
        }
        let detector = ActivityDetector::new(peer_id, stream, analysis)?;
        let nodes = build_chain(context, stream, &[NodeKind::Panner(PanningModel::Hrtf)])?;
        let panner = nodes[1];

        let properties = AudioProperties::default();
        if let Err(e) = context.configure_panner(panner, panner_config(&properties)) {
            remove_nodes(context, &nodes);
            return Err(e);
        }

        let position = AutomatedPosition::new(Rc::clone(context), panner);
        Ok(Self {
            state: SourceState::new(peer_id, stream, Box::new(position), Some(detector)),
            context: Rc::clone(context),
            nodes,
            panner,
        })
    }
}

impl Spatializer for FullPanner {
    fn state(&self) -> &SourceState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SourceState {
        &mut self.state
    }

    fn kind(&self) -> SpatializerKind {
        SpatializerKind::FullPanner
    }

    // Position already lives on the panner's automated params.
    fn apply(&mut self, _attenuation: Attenuation, _position: Vec2) {}

    fn configure(&mut self, properties: &AudioProperties) {
        if self.state.is_disposed() {
            return;
        }
        if let Err(e) = self
            .context
            .configure_panner(self.panner, panner_config(properties))
        {
            debug!("Panner update for {} dropped: {}", self.state.peer_id, e);
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
    use audio_io::{Capabilities, GraphContext, Param};

    fn source(graph: &Rc<GraphContext>) -> Result<FullPanner, Error> {
        let context: Rc<dyn AudioContext> = graph.clone();
        FullPanner::new(
            PeerId::new(),
            &AudioStream::new("alice"),
            &context,
            ActivityConfig::default(),
        )
    }

    #[test]
    fn needs_hrtf() {
        let graph = Rc::new(GraphContext::offline(1000, Capabilities::software()));
        assert!(matches!(source(&graph), Err(Error::Capability(_))));
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn needs_listener_positioning() {
        let caps = Capabilities {
            listener_params: false,
            listener_legacy: false,
            ..Capabilities::full()
        };
        let graph = Rc::new(GraphContext::offline(1000, caps));
        assert!(matches!(source(&graph), Err(Error::Capability(_))));
    }

    #[test]
    fn forwards_map_position_to_panner() {
        let graph = Rc::new(GraphContext::offline(1000, Capabilities::full()));
        let mut panner = source(&graph).unwrap();
        let frame = Frame {
            now: 0.0,
            listener: Vec2::ZERO,
        };
        panner.set_target(Vec2::new(3.0, -2.0), &frame);

        assert_eq!(graph.param_value(panner.panner, Param::PositionX), Some(3.0));
        assert_eq!(graph.param_value(panner.panner, Param::PositionY), Some(0.0));
        assert_eq!(graph.param_value(panner.panner, Param::PositionZ), Some(-2.0));
        assert_eq!(panner.position(), Vec2::new(3.0, -2.0));
    }

    #[test]
    fn ramps_between_targets() {
        let graph = Rc::new(GraphContext::offline(1000, Capabilities::full()));
        let mut panner = source(&graph).unwrap();
        panner.set_audio_properties(AudioProperties::new(1.0, 10.0, 1.0, 1.0));

        let frame = Frame {
            now: 0.0,
            listener: Vec2::ZERO,
        };
        panner.set_target(Vec2::new(0.0, 0.0), &frame);
        panner.set_target(Vec2::new(4.0, 0.0), &frame);
        graph.render_quantum(500);

        let frame = Frame {
            now: graph.current_time(),
            listener: Vec2::ZERO,
        };
        panner.update(&frame);
        assert_relative_eq!(panner.position().x, 2.0, epsilon = 1e-3);
        assert_eq!(panner.target(), Vec2::new(4.0, 0.0));
    }

    #[test]
    fn distance_rolloff_comes_from_properties() {
        let graph = Rc::new(GraphContext::offline(1000, Capabilities::full()));
        let mut panner = source(&graph).unwrap();
        panner.set_audio_properties(AudioProperties::new(1.0, 5.0, 1.0, 0.0));
        panner.set_target(
            Vec2::new(0.0, 5.0),
            &Frame {
                now: 0.0,
                listener: Vec2::ZERO,
            },
        );

        panner.stream().push(&[1.0; 4]);
        let out = graph.render_quantum(4);
        assert!(out.iter().all(|s| s.abs() < 1e-6));
    }
}
