//! The control surface of an audio processing context.
//!
//! Everything the spatial engine does to sound goes through [`AudioContext`]:
//! it creates nodes, wires them to the output and writes control-rate
//! parameters. A backend that lacks a feature reports
//! [`Error::Capability`] and the caller falls back to something simpler.

use crate::stream::AudioStream;
use room_core::{ContextFatal, Error};
use std::rc::Rc;

/// Handle to a node inside a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// The context's listener; carries `PositionX/Y/Z`
    pub const LISTENER: NodeId = NodeId(0);
}

/// Where a node's output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Node(NodeId),
    /// The context's speakers
    Output,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanningModel {
    #[default]
    EqualPower,
    Hrtf,
}

/// Node types a context may be able to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Gain,
    StereoPanner,
    Panner(PanningModel),
}

/// Automatable parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Param {
    Gain,
    Pan,
    PositionX,
    PositionY,
    PositionZ,
}

/// Linear distance attenuation of a 3D panner node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PannerConfig {
    pub ref_distance: f32,
    pub max_distance: f32,
    pub rolloff_factor: f32,
}

impl Default for PannerConfig {
    fn default() -> Self {
        Self {
            ref_distance: 1.0,
            max_distance: 10000.0,
            rolloff_factor: 1.0,
        }
    }
}

impl PannerConfig {
    /// Gain applied at `distance`
    pub fn distance_gain(&self, distance: f32) -> f32 {
        let reference = self.ref_distance.max(0.0);
        let span = self.max_distance - reference;
        if span <= 0.0 {
            return if distance <= reference { 1.0 } else { 0.0 };
        }
        let d = distance.clamp(reference, self.max_distance);
        let rolloff = self.rolloff_factor.clamp(0.0, 1.0);
        1.0 - rolloff * (d - reference) / span
    }
}

/// Lifecycle of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Built but not producing sound until resumed
    Suspended,
    Running,
    /// Unusable; must be replaced
    Failed,
    Closed,
}

/// Features a context offers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Gain nodes and stream sources
    pub graph: bool,
    pub stereo_panner: bool,
    /// 3D panner nodes with the equal-power model
    pub panner: bool,
    /// 3D panner nodes with the HRTF model
    pub hrtf: bool,
    /// Listener position as automatable per-axis parameters
    pub listener_params: bool,
    /// Listener position through a single call
    pub listener_legacy: bool,
}

impl Capabilities {
    pub fn full() -> Self {
        Self {
            graph: true,
            stereo_panner: true,
            panner: true,
            hrtf: true,
            listener_params: true,
            listener_legacy: true,
        }
    }

    /// What the built-in software renderer offers
    pub fn software() -> Self {
        Self {
            hrtf: false,
            ..Self::full()
        }
    }

    /// Whether the listener can be placed at all
    pub fn has_listener_positioning(&self) -> bool {
        self.listener_params || self.listener_legacy
    }

    pub fn none() -> Self {
        Self {
            graph: false,
            stereo_panner: false,
            panner: false,
            hrtf: false,
            listener_params: false,
            listener_legacy: false,
        }
    }
}

/// An audio processing context.
///
/// Methods take `&self`; implementations keep their graph behind interior
/// mutability so that every spatializer can hold a handle to the same context.
pub trait AudioContext {
    fn sample_rate(&self) -> u32;

    /// Audio clock in seconds
    fn current_time(&self) -> f64;

    fn state(&self) -> ContextState;

    /// `Err` once the context has failed and must be rebuilt
    fn health(&self) -> Result<(), ContextFatal>;

    /// Start producing sound (first user gesture)
    fn resume(&self) -> Result<(), Error>;

    /// Release the output; the context cannot be used afterwards
    fn close(&self);

    fn capabilities(&self) -> Capabilities;

    fn create_node(&self, kind: NodeKind) -> Result<NodeId, Error>;

    /// A node that plays the stream's playout queue
    fn create_stream_source(&self, stream: &AudioStream) -> Result<NodeId, Error>;

    fn connect(&self, from: NodeId, to: Endpoint) -> Result<(), Error>;

    /// Set a parameter immediately, cancelling any ramp in progress
    fn set_param(&self, node: NodeId, param: Param, value: f32) -> Result<(), Error>;

    /// Ramp linearly from the current value to `target`, reaching it at `end_time`
    fn ramp_param(&self, node: NodeId, param: Param, target: f32, end_time: f64)
        -> Result<(), Error>;

    /// Value of the parameter at the current audio time
    fn param_value(&self, node: NodeId, param: Param) -> Option<f32>;

    fn configure_panner(&self, node: NodeId, config: PannerConfig) -> Result<(), Error>;

    /// Single-call listener positioning for backends without listener params
    fn set_listener_position(&self, x: f32, y: f32, z: f32) -> Result<(), Error>;

    /// Disconnect and drop a node; unknown ids are ignored
    fn remove_node(&self, node: NodeId);

    /// Route the context output to another device
    fn set_output_device(&self, device_id: &str) -> Result<(), Error>;
}

/// Builds contexts; the destination asks again after a context fails.
pub trait ContextFactory {
    fn create(&self) -> Result<Rc<dyn AudioContext>, Error>;
}
