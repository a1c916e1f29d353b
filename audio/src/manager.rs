use crate::destination::{Destination, LifecycleObserver};
use audio_io::AudioStream;
use log::{debug, info, trace, warn};
use room_core::{AudioEvent, AudioProperties, Error, PeerId, Vec2, DEFAULT_BUFFER_SIZE};
use spatial::{Spatializer, SpatializerKind};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Track notifications from the conferencing layer
#[derive(Debug, Clone)]
pub enum ConferenceEvent {
    TrackAdded { peer_id: PeerId, stream: AudioStream },
    TrackRemoved { peer_id: PeerId },
}

/// What survives a context rebuild for one source
struct SourceSnapshot {
    peer_id: PeerId,
    target: Vec2,
    stream: AudioStream,
}

/// Live spatializers keyed by participant
pub struct SourceRegistry {
    sources: HashMap<PeerId, Box<dyn Spatializer>>,
    snapshots: Vec<SourceSnapshot>,
    event_tx: mpsc::UnboundedSender<AudioEvent>,
    buffer_size: usize,
}

impl SourceRegistry {
    fn emit(&self, event: AudioEvent) {
        if self.event_tx.send(event).is_err() {
            trace!("Audio event dropped, nobody is listening");
        }
    }

    fn insert(&mut self, peer_id: PeerId, spatializer: Box<dyn Spatializer>) {
        if let Some(mut previous) = self.sources.insert(peer_id, spatializer) {
            previous.dispose();
        }
    }
}

impl LifecycleObserver for SourceRegistry {
    fn destroying(&mut self, _destination: &Destination, reason: &str) {
        self.emit(AudioEvent::ContextDestroying {
            reason: reason.to_string(),
        });
        for (peer_id, mut spatializer) in self.sources.drain() {
            self.snapshots.push(SourceSnapshot {
                peer_id,
                target: spatializer.target(),
                stream: spatializer.stream().clone(),
            });
            spatializer.dispose();
        }
        debug!("Captured {} sources for rebuild", self.snapshots.len());
    }

    fn destroyed(&mut self, destination: &mut Destination) {
        let snapshots = std::mem::take(&mut self.snapshots);
        let restored = snapshots.len();
        for snapshot in snapshots {
            let mut spatializer =
                destination.create_spatializer(snapshot.peer_id, &snapshot.stream, self.buffer_size);
            spatializer.set_target(snapshot.target, &destination.frame());
            self.insert(snapshot.peer_id, spatializer);
        }
        info!("Restored {} sources on the new audio context", restored);
        self.emit(AudioEvent::ContextDestroyed { restored });
    }
}

/// Maps participants to spatializers and drives them once per tick
pub struct AudioSourceManager {
    destination: Destination,
    sources: SourceRegistry,
}

impl AudioSourceManager {
    /// Returns the manager and the receiving end of its outward events
    pub fn new(destination: Destination) -> (Self, mpsc::UnboundedReceiver<AudioEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let manager = Self {
            destination,
            sources: SourceRegistry {
                sources: HashMap::new(),
                snapshots: Vec::new(),
                event_tx,
                buffer_size: DEFAULT_BUFFER_SIZE,
            },
        };
        (manager, event_rx)
    }

    /// Analysis window handed to every new source
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.sources.buffer_size = buffer_size;
        self
    }

    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    pub fn destination_mut(&mut self) -> &mut Destination {
        &mut self.destination
    }

    pub fn source(&self, peer_id: PeerId) -> Option<&dyn Spatializer> {
        self.sources.sources.get(&peer_id).map(|s| s.as_ref())
    }

    pub fn source_count(&self) -> usize {
        self.sources.sources.len()
    }

    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.sources.sources.keys().copied().collect()
    }

    /// First user gesture
    pub fn start(&mut self) -> Result<(), Error> {
        self.destination.start()
    }

    /// Spatialize a participant's stream, replacing any previous one
    pub fn create_source(&mut self, peer_id: PeerId, stream: AudioStream) -> SpatializerKind {
        let spatializer =
            self.destination
                .create_spatializer(peer_id, &stream, self.sources.buffer_size);
        let kind = spatializer.kind();
        info!("Added source {} ({})", peer_id, kind);
        self.sources.insert(peer_id, spatializer);
        kind
    }

    pub fn remove_source(&mut self, peer_id: PeerId) {
        if let Some(mut spatializer) = self.sources.sources.remove(&peer_id) {
            spatializer.dispose();
            info!("Removed source {}", peer_id);
        }
    }

    pub fn set_local_position(&mut self, x: f32, y: f32) {
        self.destination.set_listener_target(Vec2::new(x, y));
    }

    pub fn set_user_position(&mut self, peer_id: PeerId, x: f32, y: f32) {
        let frame = self.destination.frame();
        match self.sources.sources.get_mut(&peer_id) {
            Some(spatializer) => spatializer.set_target(Vec2::new(x, y), &frame),
            None => trace!("Position for unknown source {} ignored", peer_id),
        }
    }

    pub fn set_audio_properties(&mut self, properties: AudioProperties) {
        self.destination.set_audio_properties(properties);
        let properties = self.destination.audio_properties();
        for spatializer in self.sources.sources.values_mut() {
            spatializer.set_audio_properties(properties);
        }
    }

    /// Route output to `device_id`. Returns how many sources were routed individually.
    pub fn set_audio_output_device(&mut self, device_id: &str) -> usize {
        if let Err(e) = self.destination.set_output_device(device_id) {
            warn!("Could not route audio context to {}: {}", device_id, e);
        }
        self.sources
            .sources
            .values_mut()
            .map(|spatializer| spatializer.set_output_device(device_id))
            .filter(|routed| *routed)
            .count()
    }

    /// One frame: rebuild a failed context, move the listener, update every source
    pub fn tick(&mut self) {
        if let Some(fatal) = self.destination.context_failed() {
            self.destination.recover(&fatal.0, &mut self.sources);
        }

        let frame = self.destination.update();
        let changes: Vec<_> = self
            .sources
            .sources
            .values_mut()
            .filter_map(|spatializer| spatializer.update(&frame))
            .collect();
        for change in changes {
            self.sources.emit(change.into());
        }
    }

    pub fn handle_conference_event(&mut self, event: ConferenceEvent) {
        match event {
            ConferenceEvent::TrackAdded { peer_id, stream } => {
                self.create_source(peer_id, stream);
            }
            ConferenceEvent::TrackRemoved { peer_id } => self.remove_source(peer_id),
        }
    }

    /// Dispose every source and release the context
    pub fn shutdown(&mut self) {
        for (_, mut spatializer) in self.sources.sources.drain() {
            spatializer.dispose();
        }
        self.destination.close();
        debug!("Audio sources shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use audio_io::signals::voice_like_noise;
    use audio_io::{Capabilities, OfflineContextFactory, SilentPlayer};
    use std::rc::Rc;
    use test_log::test;

    fn manager(caps: Capabilities) -> (
        Rc<OfflineContextFactory>,
        AudioSourceManager,
        mpsc::UnboundedReceiver<AudioEvent>,
    ) {
        let factory = Rc::new(OfflineContextFactory::new(caps).with_sample_rate(1000));
        let destination = Destination::new(factory.clone(), Rc::new(SilentPlayer));
        let (manager, events) = AudioSourceManager::new(destination);
        (factory, manager, events)
    }

    #[test]
    fn create_and_remove_sources() {
        let (_factory, mut manager, _events) = manager(Capabilities::software());
        let alice = PeerId::new();

        let kind = manager.create_source(alice, AudioStream::new("alice"));
        assert_eq!(kind, SpatializerKind::StereoPan);
        assert_eq!(manager.source_count(), 1);

        manager.remove_source(alice);
        manager.remove_source(alice);
        assert_eq!(manager.source_count(), 0);
    }

    #[test]
    fn replacing_a_source_keeps_one_entry() {
        let (factory, mut manager, _events) = manager(Capabilities::software());
        let alice = PeerId::new();
        manager.create_source(alice, AudioStream::new("alice"));
        manager.create_source(alice, AudioStream::new("alice again"));

        assert_eq!(manager.source_count(), 1);
        assert_eq!(factory.latest().unwrap().node_count(), 3);
    }

    #[test]
    fn unknown_user_position_is_ignored() {
        let (_factory, mut manager, _events) = manager(Capabilities::software());
        manager.set_user_position(PeerId::new(), 1.0, 1.0);
        assert_eq!(manager.source_count(), 0);
    }

    #[test]
    fn positions_drive_attenuation() {
        let (_factory, mut manager, _events) = manager(Capabilities::software());
        let bob = PeerId::new();
        manager.create_source(bob, AudioStream::new("bob"));
        manager.set_local_position(1.0, 1.0);
        manager.set_user_position(bob, 6.0, 1.0);
        manager.tick();

        let source = manager.source(bob).unwrap();
        assert_relative_eq!(source.attenuation().volume, 0.3086, epsilon = 1e-4);
        assert_relative_eq!(source.attenuation().pan, 1.0);
    }

    #[test]
    fn properties_fan_out() {
        let (_factory, mut manager, _events) = manager(Capabilities::software());
        let carol = PeerId::new();
        manager.create_source(carol, AudioStream::new("carol"));

        let properties = AudioProperties::new(2.0, 4.0, 1.0, 0.0);
        manager.set_audio_properties(properties);
        assert_eq!(manager.destination().audio_properties(), properties);
        assert_eq!(manager.source(carol).unwrap().audio_properties(), properties);
    }

    #[test]
    fn activity_is_reported_once() {
        let (_factory, mut manager, mut events) = manager(Capabilities::software());
        let dave = PeerId::new();
        let stream = AudioStream::new("dave");
        manager.create_source(dave, stream.clone());

        for seed in 0..20 {
            stream.push(&voice_like_noise(1024, 1.0, seed));
            manager.tick();
        }

        assert_eq!(
            events.try_recv().unwrap(),
            AudioEvent::AudioActivity {
                peer_id: dave,
                is_active: true
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn output_routing_counts_routable_sources() {
        let (factory, mut manager, _events) = manager(Capabilities::none());
        factory.set_available(false);
        manager.create_source(PeerId::new(), AudioStream::new("erin"));
        manager.create_source(PeerId::new(), AudioStream::new("frank"));

        assert_eq!(manager.set_audio_output_device("headphones"), 2);
    }

    #[test]
    fn conference_events_add_and_remove() {
        let (_factory, mut manager, _events) = manager(Capabilities::software());
        let grace = PeerId::new();
        manager.handle_conference_event(ConferenceEvent::TrackAdded {
            peer_id: grace,
            stream: AudioStream::new("grace"),
        });
        assert!(manager.source(grace).is_some());

        manager.handle_conference_event(ConferenceEvent::TrackRemoved { peer_id: grace });
        assert!(manager.source(grace).is_none());
    }
}
