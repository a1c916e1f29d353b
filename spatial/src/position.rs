//! Positions that glide towards their target over a transition window.

use audio_io::{AudioContext, NodeId, Param};
use log::debug;
use room_core::Vec2;
use std::rc::Rc;

/// A clamped linear transition from `start` to `target`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolation {
    start: Vec2,
    target: Vec2,
    start_time: f64,
    end_time: f64,
}

impl Interpolation {
    /// A transition that has already arrived at `position`
    pub fn settled(position: Vec2) -> Self {
        Self {
            start: position,
            target: position,
            start_time: 0.0,
            end_time: 0.0,
        }
    }

    /// Start at `from` at `now`, reach `target` after `duration` seconds.
    /// Negative durations count as zero.
    pub fn new(from: Vec2, target: Vec2, now: f64, duration: f64) -> Self {
        Self {
            start: from,
            target,
            start_time: now,
            end_time: now + duration.max(0.0),
        }
    }

    /// Fraction of the transition completed at `now`, in `[0, 1]`
    pub fn progress(&self, now: f64) -> f32 {
        if self.end_time <= self.start_time {
            return 1.0;
        }
        ((now - self.start_time) / (self.end_time - self.start_time)).clamp(0.0, 1.0) as f32
    }

    pub fn value_at(&self, now: f64) -> Vec2 {
        self.start.lerp(self.target, self.progress(now))
    }

    pub fn start(&self) -> Vec2 {
        self.start
    }

    pub fn target(&self) -> Vec2 {
        self.target
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    pub fn end_time(&self) -> f64 {
        self.end_time
    }
}

/// A 2D position that moves towards a target over time.
///
/// The first target a position receives is taken immediately; every later
/// one opens a new transition from wherever the position currently is.
pub trait PositionModel {
    fn set_target(&mut self, target: Vec2, now: f64, duration: f64);

    /// Advance to `now` and return the current value
    fn update(&mut self, now: f64) -> Vec2;

    /// Value as of the last `update` or `set_target`
    fn position(&self) -> Vec2;

    fn target(&self) -> Vec2;
}

/// Interpolated on the control thread, once per tick
#[derive(Debug, Clone, Default)]
pub struct SoftwarePosition {
    transition: Option<Interpolation>,
    current: Vec2,
}

impl SoftwarePosition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transition(&self) -> Option<&Interpolation> {
        self.transition.as_ref()
    }
}

impl PositionModel for SoftwarePosition {
    fn set_target(&mut self, target: Vec2, now: f64, duration: f64) {
        self.transition = Some(match self.transition {
            None => Interpolation::settled(target),
            Some(transition) => {
                self.current = transition.value_at(now);
                Interpolation::new(self.current, target, now, duration)
            }
        });
        if let Some(transition) = &self.transition {
            self.current = transition.value_at(now);
        }
    }

    fn update(&mut self, now: f64) -> Vec2 {
        if let Some(transition) = &self.transition {
            self.current = transition.value_at(now);
        }
        self.current
    }

    fn position(&self) -> Vec2 {
        self.current
    }

    fn target(&self) -> Vec2 {
        self.transition
            .map(|transition| transition.target())
            .unwrap_or(self.current)
    }
}

/// Interpolated by the audio context's parameter automation.
///
/// Map `x` drives `PositionX` and map `y` drives `PositionZ`; `PositionY`
/// stays at zero. Reads come back from the context at the current time.
pub struct AutomatedPosition {
    context: Rc<dyn AudioContext>,
    node: NodeId,
    current: Vec2,
    target: Option<Vec2>,
}

impl AutomatedPosition {
    pub fn new(context: Rc<dyn AudioContext>, node: NodeId) -> Self {
        Self {
            context,
            node,
            current: Vec2::ZERO,
            target: None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    fn write(&self, target: Vec2, end_time: Option<f64>) {
        let context = &self.context;
        let result = match end_time {
            None => context
                .set_param(self.node, Param::PositionX, target.x)
                .and_then(|_| context.set_param(self.node, Param::PositionY, 0.0))
                .and_then(|_| context.set_param(self.node, Param::PositionZ, target.y)),
            Some(end_time) => context
                .ramp_param(self.node, Param::PositionX, target.x, end_time)
                .and_then(|_| context.ramp_param(self.node, Param::PositionZ, target.y, end_time)),
        };
        // A failing context is rebuilt by its owner; the next target lands on the new one.
        if let Err(e) = result {
            debug!("Position automation on {:?} dropped: {}", self.node, e);
        }
    }
}

impl PositionModel for AutomatedPosition {
    fn set_target(&mut self, target: Vec2, now: f64, duration: f64) {
        let duration = duration.max(0.0);
        if self.target.is_none() || duration == 0.0 {
            self.write(target, None);
            self.current = target;
        } else {
            self.write(target, Some(now + duration));
        }
        self.target = Some(target);
    }

    fn update(&mut self, _now: f64) -> Vec2 {
        let x = self.context.param_value(self.node, Param::PositionX);
        let y = self.context.param_value(self.node, Param::PositionZ);
        if let (Some(x), Some(y)) = (x, y) {
            self.current = Vec2::new(x, y);
        }
        self.current
    }

    fn position(&self) -> Vec2 {
        self.current
    }

    fn target(&self) -> Vec2 {
        self.target.unwrap_or(self.current)
    }
}
