//! Demo binary: synthetic participants talking while they orbit the listener

use anyhow::Result;
use audio::{AudioHandler, AudioSourceManager, ConferenceEvent, Destination};
use audio_io::signals::{silence, voice_like_noise};
use audio_io::{
    list_output_devices, AudioStream, Capabilities, ContextFactory, DeviceContextFactory,
    DevicePlayer, MediaPlayer, OfflineContextFactory, SilentPlayer,
};
use clap::Parser;
use log::{debug, info, warn};
use rand::Rng;
use room_core::{AudioCommand, AudioEvent, PeerId};
use settings_manager::ConfigManager;
use std::f32::consts::TAU;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;

/// Rate the synthetic voices are generated at
const VOICE_SAMPLE_RATE: u32 = 48_000;

/// How often the demo feeds audio and moves participants
const FEED_INTERVAL: Duration = Duration::from_millis(20);

/// earshot - positional voice audio demo
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,

    /// Number of synthetic participants
    #[clap(short, long, default_value_t = 3)]
    users: usize,

    /// How long to run, in seconds
    #[clap(short, long, default_value_t = 10)]
    seconds: u64,

    /// Render into an offline graph instead of a sound card
    #[clap(long)]
    offline: bool,

    /// Settings file (defaults to the user config directory)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Output device, overriding the settings file
    #[clap(long)]
    device: Option<String>,

    /// Print the available output devices and exit
    #[clap(long)]
    list_devices: bool,
}

struct Voice {
    peer_id: PeerId,
    stream: AudioStream,
    radius: f32,
    phase: f32,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configure logging based on debug flag
    if args.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
        debug!("Debug logging enabled");
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    if args.list_devices {
        let devices = list_output_devices();
        if devices.is_empty() {
            println!("No output devices found");
        }
        for device in devices {
            println!("{}\t{}", device.id, device);
        }
        return Ok(());
    }

    info!("Starting earshot demo");

    let mut config = match &args.config {
        Some(path) => ConfigManager::with_file(path)?,
        None => ConfigManager::new()?,
    };
    if let Some(device) = &args.device {
        config.settings_mut().audio_output_device = device.clone();
    }
    config.validate()?;
    let settings = config.settings().clone();

    let (factory, player): (Rc<dyn ContextFactory>, Rc<dyn MediaPlayer>) = if args.offline {
        (
            Rc::new(OfflineContextFactory::new(Capabilities::full())),
            Rc::new(SilentPlayer),
        )
    } else {
        let device = settings.output_device().map(str::to_string);
        (
            Rc::new(DeviceContextFactory::new(device.clone())),
            Rc::new(DevicePlayer::new(device)),
        )
    };

    let destination = Destination::new(factory, player).with_analysis(settings.analysis);
    let (manager, mut events) = AudioSourceManager::new(destination);
    let manager = manager.with_buffer_size(settings.analysis.buffer_size);

    let (command_tx, command_rx) = mpsc::channel(64);
    let (conference_tx, conference_rx) = mpsc::channel(64);
    let frame_interval = Duration::from_secs(1) / settings.frame_rate;
    let mut handler = AudioHandler::new(manager, command_rx, conference_rx, frame_interval);

    let driver = async move {
        command_tx.send(AudioCommand::Start).await?;
        command_tx
            .send(AudioCommand::SetAudioProperties(settings.audio))
            .await?;

        let mut rng = rand::thread_rng();
        let mut voices = Vec::with_capacity(args.users);
        for i in 0..args.users {
            let voice = Voice {
                peer_id: PeerId::new(),
                stream: AudioStream::new(format!("voice-{}", i)),
                radius: rng.gen_range(2.0..12.0),
                phase: TAU * i as f32 / args.users.max(1) as f32,
            };
            conference_tx
                .send(ConferenceEvent::TrackAdded {
                    peer_id: voice.peer_id,
                    stream: voice.stream.clone(),
                })
                .await?;
            info!("{} joined at radius {:.1}", voice.peer_id, voice.radius);
            voices.push(voice);
        }

        let chunk = (VOICE_SAMPLE_RATE as f32 * FEED_INTERVAL.as_secs_f32()) as usize;
        let total_ticks = Duration::from_secs(args.seconds).as_millis() / FEED_INTERVAL.as_millis();
        let mut feed = time::interval(FEED_INTERVAL);
        for tick in 0..total_ticks as u64 {
            feed.tick().await;
            let t = tick as f32 * FEED_INTERVAL.as_secs_f32();
            for (i, voice) in voices.iter().enumerate() {
                // Each participant talks for two seconds out of every four, staggered
                let talking = ((t + i as f32) / 2.0) as u64 % 2 == 0;
                if talking {
                    voice.stream.push(&voice_like_noise(chunk, 0.5, tick ^ i as u64));
                } else {
                    voice.stream.push(&silence(chunk));
                }

                let angle = voice.phase + t * 0.5;
                command_tx
                    .send(AudioCommand::SetUserPosition {
                        peer_id: voice.peer_id,
                        x: voice.radius * angle.cos(),
                        y: voice.radius * angle.sin(),
                    })
                    .await?;
            }
        }

        for voice in &voices {
            voice.stream.end();
            conference_tx
                .send(ConferenceEvent::TrackRemoved {
                    peer_id: voice.peer_id,
                })
                .await?;
        }
        command_tx.send(AudioCommand::Shutdown).await?;
        Ok::<(), anyhow::Error>(())
    };

    let printer = async move {
        while let Some(event) = events.recv().await {
            match event {
                AudioEvent::AudioActivity { peer_id, is_active } => {
                    info!("{} {}", peer_id, if is_active { "is speaking" } else { "went quiet" });
                }
                AudioEvent::ContextDestroying { reason } => warn!("Audio context lost: {}", reason),
                AudioEvent::ContextDestroyed { restored } => {
                    info!("Audio context rebuilt with {} sources", restored)
                }
            }
        }
    };

    let (handled, driven, ()) = tokio::join!(
        async move {
            let result = handler.run().await;
            // Closes the event channel so the printer finishes
            drop(handler);
            result
        },
        driver,
        printer
    );
    handled?;
    driven?;

    info!("Exiting earshot demo");
    Ok(())
}
