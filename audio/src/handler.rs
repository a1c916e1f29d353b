use crate::manager::{AudioSourceManager, ConferenceEvent};
use log::{debug, error, info};
use room_core::{AudioCommand, Error};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};

/// Drives the audio engine from game commands, conference events and a frame timer.
///
/// Context handles are not `Send`, so the handler runs on the thread that
/// built it (a current-thread runtime or a `LocalSet`).
pub struct AudioHandler {
    /// The engine being driven
    manager: AudioSourceManager,
    /// Commands from the game/UI side
    command_rx: mpsc::Receiver<AudioCommand>,
    /// Track notifications from the conference side
    conference_rx: mpsc::Receiver<ConferenceEvent>,
    /// Time between frames
    frame_interval: Duration,
}

impl AudioHandler {
    pub fn new(
        manager: AudioSourceManager,
        command_rx: mpsc::Receiver<AudioCommand>,
        conference_rx: mpsc::Receiver<ConferenceEvent>,
        frame_interval: Duration,
    ) -> Self {
        Self {
            manager,
            command_rx,
            conference_rx,
            frame_interval,
        }
    }

    pub fn manager(&self) -> &AudioSourceManager {
        &self.manager
    }

    /// Run until a shutdown command arrives or the command channel closes
    pub async fn run(&mut self) -> Result<(), Error> {
        let mut frames = time::interval(self.frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // Process commands from the game
                command = self.command_rx.recv() => {
                    match command {
                        Some(AudioCommand::Shutdown) | None => {
                            info!("Audio handler shutting down");
                            break;
                        }
                        Some(command) => {
                            if let Err(e) = self.handle_command(command) {
                                error!("Error handling audio command: {}", e);
                            }
                        }
                    }
                }

                // Process track notifications
                Some(event) = self.conference_rx.recv() => {
                    self.manager.handle_conference_event(event);
                }

                _ = frames.tick() => self.manager.tick(),
            }
        }

        self.manager.shutdown();
        Ok(())
    }

    /// Handle a command from the game
    fn handle_command(&mut self, command: AudioCommand) -> Result<(), Error> {
        match command {
            AudioCommand::Start => {
                info!("Starting audio output");
                self.manager.start()?;
            }
            AudioCommand::SetLocalPosition { x, y } => self.manager.set_local_position(x, y),
            AudioCommand::SetUserPosition { peer_id, x, y } => {
                self.manager.set_user_position(peer_id, x, y)
            }
            AudioCommand::SetAudioProperties(properties) => {
                self.manager.set_audio_properties(properties)
            }
            AudioCommand::SetAudioOutputDevice { device_id } => {
                let routed = self.manager.set_audio_output_device(&device_id);
                debug!("Routed {} sources to {}", routed, device_id);
            }
            AudioCommand::Shutdown => {
                // Handled in run() before dispatch
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::Destination;
    use audio_io::{AudioStream, Capabilities, OfflineContextFactory, SilentPlayer};
    use room_core::{AudioEvent, AudioProperties, PeerId, Vec2};
    use std::rc::Rc;

    fn setup() -> (
        AudioHandler,
        mpsc::Sender<AudioCommand>,
        mpsc::Sender<ConferenceEvent>,
        mpsc::UnboundedReceiver<AudioEvent>,
    ) {
        let factory = Rc::new(OfflineContextFactory::new(Capabilities::software()));
        let destination = Destination::new(factory, Rc::new(SilentPlayer));
        let (manager, events) = AudioSourceManager::new(destination);
        let (command_tx, command_rx) = mpsc::channel(32);
        let (conference_tx, conference_rx) = mpsc::channel(32);
        let handler = AudioHandler::new(
            manager,
            command_rx,
            conference_rx,
            Duration::from_millis(5),
        );
        (handler, command_tx, conference_tx, events)
    }

    #[tokio::test]
    async fn test_commands_and_tracks() {
        let (mut handler, command_tx, conference_tx, _events) = setup();
        let peer_id = PeerId::new();

        let driver = async {
            command_tx.send(AudioCommand::Start).await.unwrap();
            conference_tx
                .send(ConferenceEvent::TrackAdded {
                    peer_id,
                    stream: AudioStream::new("alice"),
                })
                .await
                .unwrap();
            command_tx
                .send(AudioCommand::SetUserPosition {
                    peer_id,
                    x: 3.0,
                    y: 4.0,
                })
                .await
                .unwrap();
            command_tx
                .send(AudioCommand::SetAudioProperties(AudioProperties::new(
                    1.0, 20.0, 1.0, 0.0,
                )))
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(30)).await;
            command_tx.send(AudioCommand::Shutdown).await.unwrap();
        };

        let (result, ()) = tokio::join!(handler.run(), driver);
        assert!(result.is_ok());
    }

    #[test]
    fn test_commands_reach_sources() {
        let (mut handler, _command_tx, _conference_tx, _events) = setup();
        let peer_id = PeerId::new();

        handler
            .manager
            .handle_conference_event(ConferenceEvent::TrackAdded {
                peer_id,
                stream: AudioStream::new("bob"),
            });
        handler
            .handle_command(AudioCommand::SetUserPosition {
                peer_id,
                x: 0.0,
                y: 5.0,
            })
            .unwrap();
        handler
            .handle_command(AudioCommand::SetLocalPosition { x: 1.0, y: 1.0 })
            .unwrap();

        let manager = handler.manager();
        assert_eq!(manager.source(peer_id).unwrap().target(), Vec2::new(0.0, 5.0));
        assert_eq!(manager.destination().listener_target(), Vec2::new(1.0, 1.0));
    }

    #[test]
    fn test_closed_command_channel_stops_handler() {
        let (mut handler, command_tx, _conference_tx, mut events) = setup();
        drop(command_tx);
        tokio_test::block_on(async {
            assert!(handler.run().await.is_ok());
        });

        // Shutdown released the context and every source
        assert!(handler.manager().destination().context().is_none());
        assert_eq!(handler.manager().source_count(), 0);
        assert!(events.try_recv().is_err());
    }
}
