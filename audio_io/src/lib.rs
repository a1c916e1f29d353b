//! Audio input/output for earshot
//!
//! Streams of remote participants, the audio context surface the spatial
//! engine renders through, a software render graph behind it and cpal
//! device output.

mod clock;
mod context;
mod device;
mod graph;
mod graph_context;
mod playback;
pub mod signals;
mod stream;

pub use clock::WallClock;
pub use context::{
    AudioContext, Capabilities, ContextFactory, ContextState, Endpoint, NodeId, NodeKind,
    PannerConfig, PanningModel, Param,
};
pub use device::{list_output_devices, OutputDevice};
pub use graph_context::{DeviceContextFactory, GraphContext, OfflineContextFactory};
pub use playback::{
    DevicePlayback, DevicePlayer, MediaPlayback, MediaPlayer, SilentPlayback, SilentPlayer,
};
pub use stream::{AudioStream, StreamTap};
