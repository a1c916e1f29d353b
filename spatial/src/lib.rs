//! Spatial rendering for earshot
//!
//! Positions that glide between targets, the distance/direction attenuation
//! model and the family of per-source spatializers.

pub mod attenuation;
pub mod position;
pub mod spatializer;

pub use attenuation::{project, Attenuation};
pub use position::{AutomatedPosition, Interpolation, PositionModel, SoftwarePosition};
pub use spatializer::{
    AmbisonicLibrary, AmbisonicScene, AmbisonicSource, AmbisonicSpatializer, Frame, FullPanner,
    SourceState, Spatializer, SpatializerKind, StereoPan, VolumeOnly,
};
