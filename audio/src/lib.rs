//! Audio subsystem for earshot
//!
//! Coordinates the audio context, the listener and one spatializer per
//! remote participant, and keeps them alive across context failures.

pub mod capability;
pub mod destination;
pub mod handler;
pub mod listener;
pub mod manager;

pub use capability::{Cascade, CapabilityCache};
pub use destination::{Destination, DestinationState, LifecycleObserver};
pub use handler::AudioHandler;
pub use listener::{Listener, ListenerStrategy};
pub use manager::{AudioSourceManager, ConferenceEvent, SourceRegistry};
