//! Deterministic test signals.

use rand::{rngs::StdRng, Rng, SeedableRng};

/// Broadband noise in `[-amplitude, amplitude]`, reproducible from `seed`.
/// Loud enough at amplitude 1.0 to read as speech to the activity detector.
pub fn voice_like_noise(len: usize, amplitude: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| rng.gen_range(-1.0f32..=1.0) * amplitude)
        .collect()
}

pub fn silence(len: usize) -> Vec<f32> {
    vec![0.0; len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_is_reproducible_and_bounded() {
        let a = voice_like_noise(256, 0.5, 7);
        let b = voice_like_noise(256, 0.5, 7);
        assert_eq!(a, b);
        assert!(a.iter().all(|s| s.abs() <= 0.5));
        assert_ne!(a, voice_like_noise(256, 0.5, 8));
    }

    #[test]
    fn silence_is_all_zeros() {
        assert_eq!(silence(4), vec![0.0; 4]);
    }
}
