use room_core::{AudioProperties, Vec2};

/// Linear position of `d` in `[a, b]`, unclamped. A zero-width range is a step at `a`.
pub fn project(d: f32, a: f32, b: f32) -> f32 {
    if a == b {
        return if d <= a { 0.0 } else { 1.0 };
    }
    (d - a) / (b - a)
}

/// Loudness and direction of a source as heard by the listener
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attenuation {
    pub distance: f32,
    /// Gain in `[0, 1]`
    pub volume: f32,
    /// Left/right balance in `[-1, 1]`
    pub pan: f32,
}

impl Default for Attenuation {
    fn default() -> Self {
        Self {
            distance: 0.0,
            volume: 1.0,
            pan: 0.0,
        }
    }
}

impl Attenuation {
    pub fn between(source: Vec2, listener: Vec2, properties: &AudioProperties) -> Self {
        let delta = source - listener;
        let distance = delta.length();
        let scale = project(distance, properties.min_distance, properties.max_distance)
            .clamp(0.0, 1.0);
        let pan = if distance > 0.0 {
            delta.x / distance
        } else {
            0.0
        };

        Self {
            distance,
            volume: (1.0 - scale).powi(2),
            pan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn at(x: f32, y: f32) -> Attenuation {
        Attenuation::between(Vec2::new(x, y), Vec2::ZERO, &AudioProperties::default())
    }

    #[test]
    fn volume_follows_distance() {
        assert_relative_eq!(at(0.5, 0.0).volume, 1.0);
        assert_relative_eq!(at(5.0, 0.0).volume, 0.3086, epsilon = 1e-4);
        assert_relative_eq!(at(0.0, 20.0).volume, 0.0);
    }

    #[test]
    fn volume_never_increases_with_distance() {
        let mut last = f32::INFINITY;
        for step in 0..120 {
            let volume = at(step as f32 * 0.1, 0.0).volume;
            assert!(volume <= last);
            assert!((0.0..=1.0).contains(&volume));
            last = volume;
        }
    }

    #[test]
    fn pan_points_towards_source() {
        assert_relative_eq!(at(3.0, 0.0).pan, 1.0);
        assert_relative_eq!(at(-3.0, 0.0).pan, -1.0);
        assert_relative_eq!(at(0.0, 3.0).pan, 0.0);
        assert_relative_eq!(at(3.0, 4.0).pan, 0.6);
        assert_eq!(at(0.0, 0.0), Attenuation::default());
    }

    #[test]
    fn relative_to_listener() {
        let props = AudioProperties::default();
        let moved = Attenuation::between(Vec2::new(6.0, 1.0), Vec2::new(1.0, 1.0), &props);
        assert_relative_eq!(moved.distance, 5.0);
        assert_relative_eq!(moved.pan, 1.0);
    }

    #[test]
    fn zero_width_range_steps() {
        assert_eq!(project(1.0, 2.0, 2.0), 0.0);
        assert_eq!(project(2.0, 2.0, 2.0), 0.0);
        assert_eq!(project(2.5, 2.0, 2.0), 1.0);
        assert_relative_eq!(project(6.0, 2.0, 4.0), 2.0);
    }
}
