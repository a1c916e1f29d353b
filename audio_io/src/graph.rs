//! Software render graph.
//!
//! Every stream source is rendered along its chain of nodes (gain, stereo
//! panner, 3D panner) and mixed into an interleaved output buffer. Parameters
//! are evaluated once per render quantum, which is plenty for control-rate
//! values such as gain and position.

use crate::context::{
    Capabilities, Endpoint, NodeId, NodeKind, PannerConfig, PanningModel, Param,
};
use crate::stream::AudioStream;
use room_core::{CapabilityUnavailable, Error};
use std::collections::BTreeMap;
use std::f32::consts::FRAC_PI_2;

#[derive(Debug, Clone, Copy, PartialEq)]
struct Ramp {
    start_value: f32,
    start_time: f64,
    target: f32,
    end_time: f64,
}

/// A parameter with optional linear automation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutomatedParam {
    value: f32,
    ramp: Option<Ramp>,
}

impl AutomatedParam {
    pub fn new(value: f32) -> Self {
        Self { value, ramp: None }
    }

    /// Jump to `value`, cancelling any ramp
    pub fn set(&mut self, value: f32) {
        self.value = value;
        self.ramp = None;
    }

    /// Ramp from the value at `now` to `target`, arriving at `end_time`
    pub fn ramp_to(&mut self, target: f32, now: f64, end_time: f64) {
        if end_time <= now {
            self.set(target);
            return;
        }
        let start_value = self.value_at(now);
        self.value = start_value;
        self.ramp = Some(Ramp {
            start_value,
            start_time: now,
            target,
            end_time,
        });
    }

    pub fn value_at(&self, time: f64) -> f32 {
        match self.ramp {
            None => self.value,
            Some(ramp) => {
                if time <= ramp.start_time {
                    ramp.start_value
                } else if time >= ramp.end_time {
                    ramp.target
                } else {
                    let progress = (time - ramp.start_time) / (ramp.end_time - ramp.start_time);
                    ramp.start_value + (ramp.target - ramp.start_value) * progress as f32
                }
            }
        }
    }

    /// Settle the stored value at `time`, dropping a finished ramp
    fn advance(&mut self, time: f64) {
        self.value = self.value_at(time);
        if matches!(self.ramp, Some(ramp) if time >= ramp.end_time) {
            self.ramp = None;
        }
    }
}

enum NodeState {
    Source {
        stream: AudioStream,
    },
    Gain {
        gain: AutomatedParam,
    },
    StereoPanner {
        pan: AutomatedParam,
    },
    Panner {
        config: PannerConfig,
        position: [AutomatedParam; 3],
    },
}

struct Node {
    state: NodeState,
    output: Option<Endpoint>,
}

/// Nodes, listener and clock of one software context
pub struct RenderGraph {
    sample_rate: u32,
    capabilities: Capabilities,
    frames_rendered: u64,
    next_id: u32,
    nodes: BTreeMap<NodeId, Node>,
    listener: [AutomatedParam; 3],
    left: Vec<f32>,
    right: Vec<f32>,
}

impl RenderGraph {
    pub fn new(sample_rate: u32, capabilities: Capabilities) -> Self {
        Self {
            sample_rate,
            capabilities,
            frames_rendered: 0,
            next_id: NodeId::LISTENER.0 + 1,
            nodes: BTreeMap::new(),
            listener: [AutomatedParam::new(0.0); 3],
            left: Vec::new(),
            right: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn insert(&mut self, state: NodeState) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                state,
                output: None,
            },
        );
        id
    }

    pub fn create_node(&mut self, kind: NodeKind) -> Result<NodeId, Error> {
        let caps = self.capabilities;
        let state = match kind {
            NodeKind::Gain if caps.graph => NodeState::Gain {
                gain: AutomatedParam::new(1.0),
            },
            NodeKind::Gain => return Err(CapabilityUnavailable("gain node").into()),
            NodeKind::StereoPanner if caps.graph && caps.stereo_panner => NodeState::StereoPanner {
                pan: AutomatedParam::new(0.0),
            },
            NodeKind::StereoPanner => {
                return Err(CapabilityUnavailable("stereo panner node").into())
            }
            NodeKind::Panner(PanningModel::EqualPower) if caps.graph && caps.panner => {
                NodeState::Panner {
                    config: PannerConfig::default(),
                    position: [AutomatedParam::new(0.0); 3],
                }
            }
            // HRTF panners render with the equal-power law here; the HRIR
            // convolution belongs to the host's native panner.
            NodeKind::Panner(PanningModel::Hrtf) if caps.graph && caps.panner && caps.hrtf => {
                NodeState::Panner {
                    config: PannerConfig::default(),
                    position: [AutomatedParam::new(0.0); 3],
                }
            }
            NodeKind::Panner(PanningModel::EqualPower) => {
                return Err(CapabilityUnavailable("3D panner node").into())
            }
            NodeKind::Panner(PanningModel::Hrtf) => {
                return Err(CapabilityUnavailable("HRTF panner node").into())
            }
        };
        Ok(self.insert(state))
    }

    pub fn create_stream_source(&mut self, stream: &AudioStream) -> Result<NodeId, Error> {
        if !self.capabilities.graph {
            return Err(CapabilityUnavailable("stream source node").into());
        }
        Ok(self.insert(NodeState::Source {
            stream: stream.clone(),
        }))
    }

    pub fn connect(&mut self, from: NodeId, to: Endpoint) -> Result<(), Error> {
        if let Endpoint::Node(target) = to {
            if !self.nodes.contains_key(&target) {
                return Err(Error::NotFound(format!("node {:?}", target)));
            }
            if target == from {
                return Err(Error::InvalidState("a node cannot feed itself".to_string()));
            }
        }
        let node = self
            .nodes
            .get_mut(&from)
            .ok_or_else(|| Error::NotFound(format!("node {:?}", from)))?;
        node.output = Some(to);
        Ok(())
    }

    pub fn remove_node(&mut self, id: NodeId) {
        if self.nodes.remove(&id).is_none() {
            return;
        }
        for node in self.nodes.values_mut() {
            if node.output == Some(Endpoint::Node(id)) {
                node.output = None;
            }
        }
    }

    fn param_mut(&mut self, id: NodeId, param: Param) -> Result<&mut AutomatedParam, Error> {
        if id == NodeId::LISTENER {
            if !self.capabilities.listener_params {
                return Err(CapabilityUnavailable("listener position params").into());
            }
            return match param {
                Param::PositionX => Ok(&mut self.listener[0]),
                Param::PositionY => Ok(&mut self.listener[1]),
                Param::PositionZ => Ok(&mut self.listener[2]),
                _ => Err(Error::InvalidState(format!("listener has no {:?} param", param))),
            };
        }

        let node = self
            .nodes
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("node {:?}", id)))?;
        match (&mut node.state, param) {
            (NodeState::Gain { gain }, Param::Gain) => Ok(gain),
            (NodeState::StereoPanner { pan }, Param::Pan) => Ok(pan),
            (NodeState::Panner { position, .. }, Param::PositionX) => Ok(&mut position[0]),
            (NodeState::Panner { position, .. }, Param::PositionY) => Ok(&mut position[1]),
            (NodeState::Panner { position, .. }, Param::PositionZ) => Ok(&mut position[2]),
            _ => Err(Error::InvalidState(format!(
                "node {:?} has no {:?} param",
                id, param
            ))),
        }
    }

    pub fn set_param(&mut self, id: NodeId, param: Param, value: f32) -> Result<(), Error> {
        self.param_mut(id, param)?.set(value);
        Ok(())
    }

    pub fn ramp_param(
        &mut self,
        id: NodeId,
        param: Param,
        target: f32,
        end_time: f64,
    ) -> Result<(), Error> {
        let now = self.current_time();
        self.param_mut(id, param)?.ramp_to(target, now, end_time);
        Ok(())
    }

    pub fn param_value(&mut self, id: NodeId, param: Param) -> Option<f32> {
        let now = self.current_time();
        self.param_mut(id, param).ok().map(|p| p.value_at(now))
    }

    pub fn configure_panner(&mut self, id: NodeId, new_config: PannerConfig) -> Result<(), Error> {
        match self.nodes.get_mut(&id).map(|node| &mut node.state) {
            Some(NodeState::Panner { config, .. }) => {
                *config = new_config;
                Ok(())
            }
            Some(_) => Err(Error::InvalidState(format!("node {:?} is not a panner", id))),
            None => Err(Error::NotFound(format!("node {:?}", id))),
        }
    }

    /// Legacy single-call listener positioning
    pub fn set_listener_position(&mut self, x: f32, y: f32, z: f32) -> Result<(), Error> {
        if !self.capabilities.listener_legacy {
            return Err(CapabilityUnavailable("listener setPosition").into());
        }
        self.listener[0].set(x);
        self.listener[1].set(y);
        self.listener[2].set(z);
        Ok(())
    }

    /// Render `out.len() / channels` frames into interleaved `out` and advance the clock.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        out.iter_mut().for_each(|sample| *sample = 0.0);
        if channels == 0 {
            return;
        }
        let frames = out.len() / channels;
        let now = self.current_time();

        let listener = [
            self.listener[0].value_at(now),
            self.listener[1].value_at(now),
            self.listener[2].value_at(now),
        ];

        self.left.resize(frames, 0.0);
        self.right.resize(frames, 0.0);

        let sources: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| matches!(node.state, NodeState::Source { .. }))
            .map(|(id, _)| *id)
            .collect();

        for source in sources {
            self.render_chain(source, listener, now, out, channels, frames);
        }

        self.frames_rendered += frames as u64;
        let later = self.current_time();
        for param in &mut self.listener {
            param.advance(later);
        }
        for node in self.nodes.values_mut() {
            match &mut node.state {
                NodeState::Gain { gain } => gain.advance(later),
                NodeState::StereoPanner { pan } => pan.advance(later),
                NodeState::Panner { position, .. } => {
                    position.iter_mut().for_each(|p| p.advance(later))
                }
                NodeState::Source { .. } => {}
            }
        }
    }

    fn render_chain(
        &mut self,
        source: NodeId,
        listener: [f32; 3],
        now: f64,
        out: &mut [f32],
        channels: usize,
        frames: usize,
    ) {
        let Some(node) = self.nodes.get(&source) else {
            return;
        };
        let NodeState::Source { stream } = &node.state else {
            return;
        };
        // Unconnected sources still drain their playout queue.
        stream.pull(&mut self.left[..frames]);
        self.right[..frames].copy_from_slice(&self.left[..frames]);

        let mut left_gain = 1.0f32;
        let mut right_gain = 1.0f32;
        let mut next = node.output;
        let mut hops = 0;

        let reached_output = loop {
            match next {
                None => break false,
                Some(Endpoint::Output) => break true,
                Some(Endpoint::Node(id)) => {
                    hops += 1;
                    if hops > self.nodes.len() {
                        log::warn!("Render chain from {:?} loops, dropping it", source);
                        break false;
                    }
                    let Some(node) = self.nodes.get(&id) else {
                        break false;
                    };
                    match &node.state {
                        NodeState::Source { .. } => break false,
                        NodeState::Gain { gain } => {
                            let g = gain.value_at(now);
                            left_gain *= g;
                            right_gain *= g;
                        }
                        NodeState::StereoPanner { pan } => {
                            let (l, r) = equal_power(pan.value_at(now));
                            left_gain *= l;
                            right_gain *= r;
                        }
                        NodeState::Panner { config, position } => {
                            let dx = position[0].value_at(now) - listener[0];
                            let dy = position[1].value_at(now) - listener[1];
                            let dz = position[2].value_at(now) - listener[2];
                            let distance = (dx * dx + dy * dy + dz * dz).sqrt();
                            let pan = if distance > 0.0 { dx / distance } else { 0.0 };
                            let (l, r) = equal_power(pan);
                            let g = config.distance_gain(distance);
                            left_gain *= l * g;
                            right_gain *= r * g;
                        }
                    }
                    next = node.output;
                }
            }
        };

        if !reached_output {
            return;
        }

        for frame in 0..frames {
            let l = self.left[frame] * left_gain;
            let r = self.right[frame] * right_gain;
            let slot = &mut out[frame * channels..(frame + 1) * channels];
            if channels == 1 {
                slot[0] += 0.5 * (l + r);
            } else {
                slot[0] += l;
                slot[1] += r;
            }
        }
    }
}

/// Equal-power gains for a pan in [-1, 1]
fn equal_power(pan: f32) -> (f32, f32) {
    let x = (pan.clamp(-1.0, 1.0) + 1.0) * 0.5;
    ((x * FRAC_PI_2).cos(), (x * FRAC_PI_2).sin())
}

impl std::fmt::Debug for RenderGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraph")
            .field("sample_rate", &self.sample_rate)
            .field("time", &self.current_time())
            .field("nodes", &self.nodes.len())
            .finish()
    }
}
