//! The listener's side of the engine: audio context, listener position and
//! the capability cascade, plus recovery when the context dies.

use crate::capability::{Cascade, CapabilityCache};
use crate::listener::{Listener, ListenerStrategy};
use analysis::ActivityConfig;
use audio_io::{AudioContext, AudioStream, ContextFactory, ContextState, MediaPlayer, WallClock};
use log::{debug, error, info, warn};
use room_core::{AudioProperties, CapabilityUnavailable, ContextFatal, Error, PeerId, Vec2};
use spatial::{AmbisonicLibrary, AmbisonicScene, Frame, Spatializer, SpatializerKind};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationState {
    /// No context has been asked for yet
    Uninitialized,
    Ready,
    /// Between a fatal context error and the rebuild
    Destroying,
    /// No context could be created; time comes from the wall clock
    Degraded,
}

/// Told around a context rebuild so sources can be carried across.
pub trait LifecycleObserver {
    /// The context is about to go. Capture and dispose every source before returning.
    fn destroying(&mut self, destination: &Destination, reason: &str);

    /// A replacement context is in place. Recreate the captured sources.
    fn destroyed(&mut self, destination: &mut Destination);
}

pub struct Destination {
    factory: Rc<dyn ContextFactory>,
    player: Rc<dyn MediaPlayer>,
    ambisonics: Option<Rc<dyn AmbisonicLibrary>>,
    analysis: ActivityConfig,
    state: DestinationState,
    context: Option<Rc<dyn AudioContext>>,
    scene: Option<Box<dyn AmbisonicScene>>,
    clock: WallClock,
    listener: Listener,
    properties: AudioProperties,
    cache: CapabilityCache,
    started: bool,
    output_device: Option<String>,
}

impl Destination {
    pub fn new(factory: Rc<dyn ContextFactory>, player: Rc<dyn MediaPlayer>) -> Self {
        Self {
            factory,
            player,
            ambisonics: None,
            analysis: ActivityConfig::default(),
            state: DestinationState::Uninitialized,
            context: None,
            scene: None,
            clock: WallClock::new(),
            listener: Listener::for_context(None),
            properties: AudioProperties::default(),
            cache: CapabilityCache::default(),
            started: false,
            output_device: None,
        }
    }

    pub fn with_ambisonics(mut self, library: Rc<dyn AmbisonicLibrary>) -> Self {
        self.ambisonics = Some(library);
        self
    }

    pub fn with_analysis(mut self, analysis: ActivityConfig) -> Self {
        self.analysis = analysis;
        self
    }

    pub fn state(&self) -> DestinationState {
        self.state
    }

    pub fn context(&self) -> Option<&Rc<dyn AudioContext>> {
        self.context.as_ref()
    }

    pub fn ceiling(&self) -> SpatializerKind {
        self.cache.ceiling()
    }

    pub fn listener_strategy(&self) -> ListenerStrategy {
        self.listener.strategy()
    }

    pub fn audio_properties(&self) -> AudioProperties {
        self.properties
    }

    pub fn set_audio_properties(&mut self, properties: AudioProperties) {
        self.properties = properties.sanitized();
    }

    /// Build the audio context on first use; later calls do nothing
    pub fn create_context(&mut self) {
        if self.state == DestinationState::Uninitialized {
            self.build_context();
        }
    }

    fn build_context(&mut self) {
        let had_target = self.state != DestinationState::Uninitialized;
        let target = self.listener.target();

        match self.factory.create() {
            Ok(context) => {
                info!(
                    "Audio context ready at {} Hz ({:?})",
                    context.sample_rate(),
                    context.state()
                );
                self.scene = self.create_scene(&context);
                if let Some(device_id) = &self.output_device {
                    if let Err(e) = context.set_output_device(device_id) {
                        warn!("Could not route output to {}: {}", device_id, e);
                    }
                }
                if self.started {
                    if let Err(e) = context.resume() {
                        warn!("Could not resume audio context: {}", e);
                    }
                }
                self.listener = Listener::for_context(Some(&context));
                self.context = Some(context);
                self.state = DestinationState::Ready;
            }
            Err(e) => {
                warn!("No audio context available ({}), running degraded", e);
                self.listener = Listener::for_context(None);
                self.context = None;
                self.scene = None;
                self.cache.cap(SpatializerKind::VolumeOnly);
                self.state = DestinationState::Degraded;
            }
        }

        if had_target {
            let now = self.now();
            self.listener.set_target(target, now, 0.0);
        }
    }

    fn create_scene(&mut self, context: &Rc<dyn AudioContext>) -> Option<Box<dyn AmbisonicScene>> {
        let library = self.ambisonics.as_ref()?;
        match library.create_scene(Rc::clone(context)) {
            Ok(scene) => Some(scene),
            Err(Error::Capability(reason)) => {
                self.cache.lower_below(SpatializerKind::Ambisonic, &reason);
                None
            }
            Err(e) => {
                self.cache
                    .lower_below(SpatializerKind::Ambisonic, &CapabilityUnavailable("ambisonic scene"));
                warn!("Ambisonic scene failed: {}", e);
                None
            }
        }
    }

    /// First user gesture: start producing sound
    pub fn start(&mut self) -> Result<(), Error> {
        self.create_context();
        self.started = true;
        match &self.context {
            Some(context) if context.state() == ContextState::Suspended => context.resume(),
            _ => Ok(()),
        }
    }

    /// Audio clock, or the wall clock when degraded
    pub fn now(&self) -> f64 {
        match &self.context {
            Some(context) => context.current_time(),
            None => self.clock.now(),
        }
    }

    pub fn frame(&self) -> Frame {
        Frame {
            now: self.now(),
            listener: self.listener.position(),
        }
    }

    pub fn listener_position(&self) -> Vec2 {
        self.listener.position()
    }

    pub fn listener_target(&self) -> Vec2 {
        self.listener.target()
    }

    pub fn set_listener_target(&mut self, target: Vec2) {
        self.create_context();
        let now = self.now();
        self.listener
            .set_target(target, now, self.properties.transition_time);
    }

    /// Advance the listener once per tick
    pub fn update(&mut self) -> Frame {
        let now = self.now();
        let listener = self.listener.update(now);
        if let Some(scene) = &self.scene {
            scene.set_listener_position(listener.x, 0.0, listener.y);
        }
        Frame { now, listener }
    }

    /// Run the cascade for a new source and apply the current properties
    pub fn create_spatializer(
        &mut self,
        peer_id: PeerId,
        stream: &AudioStream,
        buffer_size: usize,
    ) -> Box<dyn Spatializer> {
        self.create_context();
        let cascade = Cascade {
            context: self.context.as_ref(),
            scene: self.scene.as_deref(),
            player: self.player.as_ref(),
            analysis: self.analysis.with_buffer_size(buffer_size),
        };
        let mut spatializer = cascade.create(&mut self.cache, peer_id, stream);
        spatializer.set_audio_properties(self.properties);
        spatializer
    }

    /// Why the context can no longer be used, if it can't
    pub fn context_failed(&self) -> Option<ContextFatal> {
        self.context.as_ref().and_then(|context| context.health().err())
    }

    /// Tear the context down and build a new one, carrying sources across
    /// through `observer`.
    pub fn recover(&mut self, reason: &str, observer: &mut dyn LifecycleObserver) {
        error!("Audio context lost: {}", reason);
        self.state = DestinationState::Destroying;
        observer.destroying(self, reason);

        if let Some(scene) = self.scene.take() {
            scene.dispose();
        }
        if let Some(context) = self.context.take() {
            context.close();
        }
        self.build_context();
        debug!("Audio context rebuilt, state {:?}", self.state);

        observer.destroyed(self);
    }

    /// Route the context output to another device
    pub fn set_output_device(&mut self, device_id: &str) -> Result<(), Error> {
        self.output_device = Some(device_id.to_string());
        match &self.context {
            Some(context) => context.set_output_device(device_id),
            None => Ok(()),
        }
    }

    /// Release the context at shutdown
    pub fn close(&mut self) {
        if let Some(scene) = self.scene.take() {
            scene.dispose();
        }
        if let Some(context) = self.context.take() {
            context.close();
        }
    }
}
