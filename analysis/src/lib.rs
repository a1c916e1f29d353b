//! Voice activity detection for earshot
//!
//! Reads the latest window of a participant's stream once per tick, turns it
//! into a smoothed decibel spectrum and debounces the band loudness into an
//! active/inactive flag.

use audio_io::{AudioStream, StreamTap};
use log::{debug, trace};
use room_core::{ActivityChange, Error, PeerId, DEFAULT_BUFFER_SIZE};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::Arc;

/// Counter ceiling of the loudness integrator
pub const MAX_COUNTER: u32 = 60;

/// Counter value above which a source counts as speaking
pub const ACTIVE_ABOVE: u32 = 5;

/// Band average at or above which a tick counts as loud
pub const LOUD_THRESHOLD: f32 = 0.5;

/// Half-open range of FFT bins averaged for loudness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisBand {
    pub start: usize,
    pub end: usize,
}

impl Default for AnalysisBand {
    fn default() -> Self {
        Self { start: 85, end: 255 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Analysis window in samples; a power of two
    pub buffer_size: usize,
    pub band: AnalysisBand,
    /// Weight of the previous spectrum in `[0, 1)`
    pub smoothing: f32,
    /// Floor of the decibel spectrum
    pub min_decibels: f32,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            band: AnalysisBand::default(),
            smoothing: 0.8,
            min_decibels: -100.0,
        }
    }
}

impl ActivityConfig {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.buffer_size < 32 || !self.buffer_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "analysis buffer size must be a power of two >= 32, got {}",
                self.buffer_size
            )));
        }
        if self.band.start >= self.band.end {
            return Err(Error::Config(format!(
                "analysis band {}..{} is empty",
                self.band.start, self.band.end
            )));
        }
        if self.band.start >= self.buffer_size / 2 {
            return Err(Error::Config(format!(
                "analysis band starts at bin {} but a {}-sample window only has {} bins",
                self.band.start,
                self.buffer_size,
                self.buffer_size / 2
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(Error::Config(format!(
                "spectrum smoothing must be in [0, 1), got {}",
                self.smoothing
            )));
        }
        Ok(())
    }
}

/// Leaky loudness integrator with a debounced activity flag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityState {
    counter: u32,
    is_active: bool,
}

impl ActivityState {
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    /// Feed one tick's band average. Returns the new flag when it flips.
    pub fn observe(&mut self, average: f32) -> Option<bool> {
        if average >= LOUD_THRESHOLD {
            self.counter = (self.counter + 1).min(MAX_COUNTER);
        } else {
            self.counter = self.counter.saturating_sub(1);
        }

        let is_active = self.counter > ACTIVE_ABOVE;
        if is_active == self.is_active {
            return None;
        }
        self.is_active = is_active;
        Some(is_active)
    }
}

/// Blackman window coefficients
fn blackman(len: usize) -> Vec<f32> {
    let n = len as f32;
    (0..len)
        .map(|i| {
            let x = i as f32 / n;
            0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
        })
        .collect()
}

struct Spectrum {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    samples: Vec<f32>,
    bins: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
}

impl Spectrum {
    fn new(buffer_size: usize) -> Self {
        let fft = FftPlanner::new().plan_fft_forward(buffer_size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Self {
            fft,
            window: blackman(buffer_size),
            samples: vec![0.0; buffer_size],
            bins: vec![Complex::default(); buffer_size],
            scratch,
            smoothed: vec![0.0; buffer_size / 2],
        }
    }

    /// Refresh from the tap and return the band's mean level in dB
    fn band_decibels(&mut self, tap: &mut StreamTap, config: &ActivityConfig) -> f32 {
        tap.read_latest(&mut self.samples);
        for ((bin, &sample), &w) in self
            .bins
            .iter_mut()
            .zip(self.samples.iter())
            .zip(self.window.iter())
        {
            *bin = Complex::new(sample * w, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.bins, &mut self.scratch);

        let scale = 1.0 / self.samples.len() as f32;
        let tau = config.smoothing;
        for (smoothed, bin) in self.smoothed.iter_mut().zip(self.bins.iter()) {
            *smoothed = tau * *smoothed + (1.0 - tau) * bin.norm() * scale;
        }

        let end = config.band.end.min(self.smoothed.len());
        let start = config.band.start.min(end);
        if start == end {
            return config.min_decibels;
        }
        let total: f32 = self.smoothed[start..end]
            .iter()
            .map(|&magnitude| (20.0 * magnitude.log10()).max(config.min_decibels))
            .sum();
        total / (end - start) as f32
    }
}

/// Per-source voice activity detector, ticked once per frame
pub struct ActivityDetector {
    peer_id: PeerId,
    stream: Option<AudioStream>,
    tap: Option<StreamTap>,
    config: ActivityConfig,
    spectrum: Option<Spectrum>,
    state: ActivityState,
}

impl ActivityDetector {
    pub fn new(peer_id: PeerId, stream: &AudioStream, config: ActivityConfig) -> Result<Self, Error> {
        config.validate()?;
        let mut detector = Self {
            peer_id,
            stream: Some(stream.clone()),
            tap: None,
            config,
            spectrum: Some(Spectrum::new(config.buffer_size)),
            state: ActivityState::default(),
        };
        detector.try_capture();
        Ok(detector)
    }

    fn try_capture(&mut self) {
        if self.tap.is_some() {
            return;
        }
        let Some(stream) = &self.stream else {
            return;
        };
        match StreamTap::open(stream) {
            Ok(tap) => {
                debug!("Activity analysis wired for {}", self.peer_id);
                self.tap = Some(tap);
            }
            Err(e) => trace!("Capture for {} not ready: {}", self.peer_id, e),
        }
    }

    /// Analyse the latest window. Returns a change when the activity flag flips.
    pub fn tick(&mut self) -> Option<ActivityChange> {
        self.try_capture();
        let (Some(tap), Some(spectrum)) = (&mut self.tap, &mut self.spectrum) else {
            return None;
        };

        let mean_db = spectrum.band_decibels(tap, &self.config);
        let average = 1.1 + mean_db / 100.0;
        trace!("Band average for {}: {:.3}", self.peer_id, average);

        self.state.observe(average).map(|is_active| {
            debug!("{} is now {}", self.peer_id, if is_active { "speaking" } else { "quiet" });
            ActivityChange {
                peer_id: self.peer_id,
                is_active,
            }
        })
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn state(&self) -> ActivityState {
        self.state
    }

    /// Whether the stream tap has been wired
    pub fn is_capturing(&self) -> bool {
        self.tap.is_some()
    }

    /// Release the tap and analysis buffers. Later ticks do nothing.
    pub fn dispose(&mut self) {
        self.tap = None;
        self.stream = None;
        self.spectrum = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio_io::signals::{silence, voice_like_noise};
    use test_log::test;

    fn detector(stream: &AudioStream) -> ActivityDetector {
        ActivityDetector::new(PeerId::new(), stream, ActivityConfig::default()).unwrap()
    }

    #[test]
    fn state_activates_after_six_loud_ticks() {
        let mut state = ActivityState::default();
        for _ in 0..5 {
            assert_eq!(state.observe(0.8), None);
        }
        assert_eq!(state.observe(0.8), Some(true));
        assert_eq!(state.counter(), 6);
        assert_eq!(state.observe(0.8), None);
    }

    #[test]
    fn state_counter_is_bounded() {
        let mut state = ActivityState::default();
        for _ in 0..100 {
            state.observe(1.0);
        }
        assert_eq!(state.counter(), MAX_COUNTER);

        let mut flips = 0;
        for _ in 0..100 {
            if state.observe(0.0).is_some() {
                flips += 1;
            }
        }
        assert_eq!(state.counter(), 0);
        assert_eq!(flips, 1);
        assert!(!state.is_active());
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut state = ActivityState::default();
        state.observe(LOUD_THRESHOLD);
        assert_eq!(state.counter(), 1);
        state.observe(LOUD_THRESHOLD - 0.01);
        assert_eq!(state.counter(), 0);
    }

    #[test]
    fn config_rejects_bad_buffer_size() {
        assert!(ActivityConfig::default().validate().is_ok());
        assert!(ActivityConfig::default().with_buffer_size(1000).validate().is_err());
        assert!(ActivityConfig::default().with_buffer_size(16).validate().is_err());
    }

    #[test]
    fn config_rejects_band_beyond_window() {
        assert!(ActivityConfig::default().with_buffer_size(128).validate().is_err());
        assert!(ActivityConfig::default().with_buffer_size(256).validate().is_ok());

        let narrow = ActivityConfig {
            band: AnalysisBand { start: 8, end: 32 },
            ..ActivityConfig::default().with_buffer_size(128)
        };
        assert!(narrow.validate().is_ok());
        assert!(ActivityDetector::new(PeerId::new(), &AudioStream::new("x"), narrow).is_ok());
        assert!(ActivityDetector::new(
            PeerId::new(),
            &AudioStream::new("y"),
            ActivityConfig::default().with_buffer_size(64)
        )
        .is_err());
    }

    #[test]
    fn blackman_window_tapers_to_zero() {
        let window = blackman(64);
        assert!(window[0].abs() < 1e-6);
        assert!((window[32] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn capture_is_retried_until_stream_flows() {
        let stream = AudioStream::new("alice");
        let mut detector = detector(&stream);
        assert!(!detector.is_capturing());

        assert_eq!(detector.tick(), None);
        assert!(!detector.is_capturing());

        stream.push(&silence(1024));
        assert_eq!(detector.tick(), None);
        assert!(detector.is_capturing());
    }

    #[test]
    fn speech_then_silence_fires_one_event_each() {
        let stream = AudioStream::new("bob");
        let mut detector = detector(&stream);
        let mut events = Vec::new();

        for seed in 0..20 {
            stream.push(&voice_like_noise(1024, 1.0, seed));
            events.extend(detector.tick());
        }
        assert_eq!(events.len(), 1);
        assert!(events[0].is_active);
        assert!(detector.is_active());

        events.clear();
        for _ in 0..60 {
            stream.push(&silence(1024));
            events.extend(detector.tick());
        }
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_active);
    }

    #[test]
    fn stalled_stream_decays_to_quiet() {
        let stream = AudioStream::new("erin");
        let mut detector = detector(&stream);
        for seed in 0..20 {
            stream.push(&voice_like_noise(1024, 1.0, seed));
            detector.tick();
        }
        assert!(detector.is_active());

        let mut events = Vec::new();
        for _ in 0..MAX_COUNTER {
            events.extend(detector.tick());
        }
        assert_eq!(events.len(), 1);
        assert!(!events[0].is_active);
    }

    #[test]
    fn ended_stream_decays_to_quiet() {
        let stream = AudioStream::new("frank");
        let mut detector = detector(&stream);
        for seed in 0..20 {
            stream.push(&voice_like_noise(1024, 1.0, seed));
            detector.tick();
        }
        stream.end();

        let mut events = Vec::new();
        for _ in 0..300 {
            events.extend(detector.tick());
        }
        assert_eq!(events.len(), 1);
        assert!(!detector.is_active());
    }

    #[test]
    fn silence_never_activates() {
        let stream = AudioStream::new("carol");
        let mut detector = detector(&stream);
        for _ in 0..30 {
            stream.push(&silence(1024));
            assert_eq!(detector.tick(), None);
        }
        assert_eq!(detector.state().counter(), 0);
    }

    #[test]
    fn disposed_detector_stays_quiet() {
        let stream = AudioStream::new("dave");
        stream.push(&voice_like_noise(1024, 1.0, 1));
        let mut detector = detector(&stream);
        assert!(detector.is_capturing());

        detector.dispose();
        detector.dispose();
        assert!(!detector.is_capturing());
        for seed in 0..10 {
            stream.push(&voice_like_noise(1024, 1.0, seed));
            assert_eq!(detector.tick(), None);
        }
    }
}
