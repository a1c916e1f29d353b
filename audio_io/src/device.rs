use cpal::{
    self,
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SizedSample,
};
use room_core::Error;

/// An output device reported by the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDevice {
    pub id: String,
    pub name: String,
}

impl std::fmt::Display for OutputDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (Output)", self.name)
    }
}

/// Output devices of the default host; empty when there are none
pub fn list_output_devices() -> Vec<OutputDevice> {
    let host = cpal::default_host();
    let mut devices = Vec::new();

    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                devices.push(OutputDevice {
                    id: name.clone(),
                    name,
                });
            }
        }
    }

    devices
}

fn find_output_device(device_id: Option<&str>) -> Result<cpal::Device, Error> {
    let host = cpal::default_host();
    match device_id {
        Some(id) => host
            .output_devices()
            .map_err(|e| Error::Audio(format!("Failed to get output devices: {}", e)))?
            .find(|d| d.name().map(|name| name == id).unwrap_or(false))
            .ok_or_else(|| Error::NotFound(format!("output device {}", id))),
        None => host
            .default_output_device()
            .ok_or_else(|| Error::Audio("No output device found".to_string())),
    }
}

/// A running cpal output stream; dropping it stops the output
pub(crate) struct DeviceOutput {
    stream: cpal::Stream,
    sample_rate: u32,
}

impl DeviceOutput {
    pub(crate) fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub(crate) fn play(&self) -> Result<(), Error> {
        self.stream
            .play()
            .map_err(|e| Error::Audio(format!("Failed to start audio stream: {}", e)))
    }

    pub(crate) fn pause(&self) -> Result<(), Error> {
        self.stream
            .pause()
            .map_err(|e| Error::Audio(format!("Failed to pause audio stream: {}", e)))
    }
}

/// Open an output stream on `device_id` (or the default device).
///
/// `render` fills interleaved f32 frames and is told the channel count;
/// `on_error` runs on the audio thread when the stream breaks. The stream is
/// created paused.
pub(crate) fn open_output<R, E>(
    device_id: Option<&str>,
    render: R,
    on_error: E,
) -> Result<DeviceOutput, Error>
where
    R: FnMut(&mut [f32], usize) + Send + 'static,
    E: FnMut(String) + Send + 'static,
{
    let device = find_output_device(device_id)?;
    let supported = device
        .default_output_config()
        .map_err(|e| Error::Audio(format!("Default config not supported: {}", e)))?;
    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32, _, _>(&device, &config, render, on_error),
        cpal::SampleFormat::I16 => build_stream::<i16, _, _>(&device, &config, render, on_error),
        cpal::SampleFormat::U16 => build_stream::<u16, _, _>(&device, &config, render, on_error),
        other => {
            return Err(Error::Audio(format!(
                "Unsupported sample format {:?}",
                other
            )))
        }
    }?;

    // Some hosts start streams immediately
    if let Err(e) = stream.pause() {
        log::debug!("Initial pause of output stream failed: {}", e);
    }

    log::debug!(
        "Opened output stream at {} Hz, {} channels",
        sample_rate,
        config.channels
    );
    Ok(DeviceOutput {
        stream,
        sample_rate,
    })
}

fn build_stream<T, R, E>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut render: R,
    mut on_error: E,
) -> Result<cpal::Stream, Error>
where
    T: SizedSample + FromSample<f32>,
    R: FnMut(&mut [f32], usize) + Send + 'static,
    E: FnMut(String) + Send + 'static,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.clear();
                scratch.resize(data.len(), 0.0);
                render(&mut scratch, channels);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(sample);
                }
            },
            move |err| on_error(err.to_string()),
            None,
        )
        .map_err(|e| Error::Audio(format!("Failed to build output stream: {}", e)))
}
