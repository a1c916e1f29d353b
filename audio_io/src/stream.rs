use room_core::{CaptureNotReady, SAMPLE_RATE};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Samples kept for analysis taps
const DEFAULT_HISTORY: usize = 4096;

/// Samples queued for playback before the oldest ones are dropped (half a second)
const DEFAULT_PLAYOUT: usize = SAMPLE_RATE as usize / 2;

struct StreamBuffers {
    flowing: bool,
    ended: bool,
    history: VecDeque<f32>,
    history_len: usize,
    /// Samples ever pushed; taps compare it against what they last read
    written: u64,
    playout: VecDeque<f32>,
    playout_len: usize,
}

/// Handle to one remote participant's incoming mono audio.
///
/// The transport pushes decoded samples, the renderer pulls them for playback
/// and analysis taps read the most recent window without consuming anything.
/// Clones share the same buffers.
#[derive(Clone)]
pub struct AudioStream {
    label: Arc<str>,
    shared: Arc<Mutex<StreamBuffers>>,
}

impl AudioStream {
    pub fn new(label: impl Into<String>) -> Self {
        Self::with_capacity(label, DEFAULT_HISTORY, DEFAULT_PLAYOUT)
    }

    pub fn with_capacity(label: impl Into<String>, history_len: usize, playout_len: usize) -> Self {
        let label: String = label.into();
        Self {
            label: label.into(),
            shared: Arc::new(Mutex::new(StreamBuffers {
                flowing: false,
                ended: false,
                history: VecDeque::with_capacity(history_len),
                history_len,
                written: 0,
                playout: VecDeque::with_capacity(playout_len),
                playout_len,
            })),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn lock(&self) -> MutexGuard<'_, StreamBuffers> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append decoded samples coming from the transport
    pub fn push(&self, samples: &[f32]) {
        let mut buffers = self.lock();
        if buffers.ended || samples.is_empty() {
            return;
        }
        buffers.flowing = true;
        buffers.written += samples.len() as u64;

        for &sample in samples {
            if buffers.history.len() == buffers.history_len {
                buffers.history.pop_front();
            }
            buffers.history.push_back(sample);

            if buffers.playout.len() == buffers.playout_len {
                buffers.playout.pop_front();
            }
            buffers.playout.push_back(sample);
        }
    }

    /// Mark the track as finished; later pushes are ignored
    pub fn end(&self) {
        let mut buffers = self.lock();
        buffers.ended = true;
        buffers.flowing = false;
        buffers.history.clear();
        buffers.playout.clear();
    }

    /// True once samples have arrived and the track has not ended
    pub fn is_flowing(&self) -> bool {
        self.lock().flowing
    }

    /// Fill `out` with queued playout samples, zero-filling any shortfall.
    /// Returns the number of real samples delivered.
    pub fn pull(&self, out: &mut [f32]) -> usize {
        let mut buffers = self.lock();
        let available = buffers.playout.len().min(out.len());
        for (slot, sample) in out.iter_mut().zip(buffers.playout.drain(..available)) {
            *slot = sample;
        }
        for slot in &mut out[available..] {
            *slot = 0.0;
        }
        available
    }

    /// Whether two handles refer to the same underlying track
    pub fn same_stream(&self, other: &AudioStream) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("label", &self.label)
            .field("flowing", &self.is_flowing())
            .finish()
    }
}

/// Read-only analysis access to a stream that is known to be flowing.
pub struct StreamTap {
    stream: AudioStream,
    read_up_to: u64,
}

impl StreamTap {
    /// Wire a tap onto the stream; fails until the track delivers audio.
    pub fn open(stream: &AudioStream) -> Result<Self, CaptureNotReady> {
        if !stream.is_flowing() {
            return Err(CaptureNotReady);
        }
        Ok(Self {
            stream: stream.clone(),
            read_up_to: 0,
        })
    }

    /// Copy the samples that arrived since the last read into the end of
    /// `out`, oldest first. The rest of `out` is silence, so a stalled or
    /// ended stream reads as all zeros.
    pub fn read_latest(&mut self, out: &mut [f32]) {
        let buffers = self.stream.lock();
        let fresh = buffers.written.saturating_sub(self.read_up_to);
        self.read_up_to = buffers.written;

        let fresh = usize::try_from(fresh).unwrap_or(usize::MAX);
        let available = buffers.history.len().min(out.len()).min(fresh);
        let pad = out.len() - available;

        for slot in &mut out[..pad] {
            *slot = 0.0;
        }
        let skip = buffers.history.len() - available;
        for (slot, &sample) in out[pad..].iter_mut().zip(buffers.history.iter().skip(skip)) {
            *slot = sample;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_starts_idle() {
        let stream = AudioStream::new("alice");
        assert!(!stream.is_flowing());
        assert!(StreamTap::open(&stream).is_err());
    }

    #[test]
    fn tap_opens_once_flowing() {
        let stream = AudioStream::new("alice");
        stream.push(&[0.1, 0.2, 0.3]);
        assert!(stream.is_flowing());

        let mut tap = StreamTap::open(&stream).unwrap();
        let mut window = [1.0; 5];
        tap.read_latest(&mut window);
        assert_eq!(window, [0.0, 0.0, 0.1, 0.2, 0.3]);
    }

    #[test]
    fn tap_reads_most_recent_window() {
        let stream = AudioStream::with_capacity("bob", 4, 16);
        stream.push(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let mut tap = StreamTap::open(&stream).unwrap();
        let mut window = [0.0; 2];
        tap.read_latest(&mut window);
        assert_eq!(window, [5.0, 6.0]);

        // History is bounded to 4 samples
        stream.push(&[7.0, 8.0, 9.0, 10.0, 11.0]);
        let mut window = [0.0; 6];
        tap.read_latest(&mut window);
        assert_eq!(window, [0.0, 0.0, 8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn tap_reads_silence_once_stream_stalls() {
        let stream = AudioStream::new("frank");
        stream.push(&[0.4; 8]);

        let mut tap = StreamTap::open(&stream).unwrap();
        let mut window = [0.0; 8];
        tap.read_latest(&mut window);
        assert_eq!(window, [0.4; 8]);

        tap.read_latest(&mut window);
        assert_eq!(window, [0.0; 8]);

        stream.push(&[0.2, 0.3]);
        tap.read_latest(&mut window);
        assert_eq!(window, [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.2, 0.3]);
    }

    #[test]
    fn ended_stream_forgets_history() {
        let stream = AudioStream::new("grace");
        stream.push(&[0.4; 8]);
        let mut tap = StreamTap::open(&stream).unwrap();
        stream.end();

        let mut window = [1.0; 8];
        tap.read_latest(&mut window);
        assert_eq!(window, [0.0; 8]);
    }

    #[test]
    fn pull_drains_playout_without_touching_history() {
        let stream = AudioStream::new("carol");
        stream.push(&[0.5, -0.5, 0.25]);

        let mut out = [9.0; 4];
        assert_eq!(stream.pull(&mut out), 3);
        assert_eq!(out, [0.5, -0.5, 0.25, 0.0]);
        assert_eq!(stream.pull(&mut out), 0);

        let mut tap = StreamTap::open(&stream).unwrap();
        let mut window = [0.0; 3];
        tap.read_latest(&mut window);
        assert_eq!(window, [0.5, -0.5, 0.25]);
    }

    #[test]
    fn ended_stream_stops_flowing() {
        let stream = AudioStream::new("dave");
        stream.push(&[0.1]);
        stream.end();
        stream.push(&[0.2]);
        assert!(!stream.is_flowing());
        assert!(StreamTap::open(&stream).is_err());
    }

    #[test]
    fn clones_share_buffers() {
        let stream = AudioStream::new("erin");
        let other = stream.clone();
        other.push(&[0.3]);
        assert!(stream.is_flowing());
        assert!(stream.same_stream(&other));
        assert!(!stream.same_stream(&AudioStream::new("erin")));
    }
}
