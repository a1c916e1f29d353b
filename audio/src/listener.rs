use audio_io::{AudioContext, NodeId};
use log::{debug, trace};
use room_core::Vec2;
use spatial::{AutomatedPosition, PositionModel, SoftwarePosition};
use std::rc::Rc;

/// How the listener's position reaches the audio context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerStrategy {
    /// Per-axis automation params on the context listener
    Automated,
    /// Interpolated here, pushed with a single positioning call per tick
    Legacy,
    /// Interpolated here only; the context never sees it
    Software,
}

/// The local participant's ears
pub struct Listener {
    strategy: ListenerStrategy,
    model: Box<dyn PositionModel>,
    context: Option<Rc<dyn AudioContext>>,
}

impl Listener {
    /// Pick the best strategy `context` supports
    pub fn for_context(context: Option<&Rc<dyn AudioContext>>) -> Self {
        let caps = context.map(|c| c.capabilities());
        let (strategy, model): (_, Box<dyn PositionModel>) = match (context, caps) {
            (Some(context), Some(caps)) if caps.listener_params => (
                ListenerStrategy::Automated,
                Box::new(AutomatedPosition::new(Rc::clone(context), NodeId::LISTENER)),
            ),
            (Some(_), Some(caps)) if caps.listener_legacy => {
                (ListenerStrategy::Legacy, Box::new(SoftwarePosition::new()))
            }
            _ => (ListenerStrategy::Software, Box::new(SoftwarePosition::new())),
        };
        debug!("Listener positioning: {:?}", strategy);

        Self {
            strategy,
            model,
            context: context.cloned(),
        }
    }

    pub fn strategy(&self) -> ListenerStrategy {
        self.strategy
    }

    pub fn set_target(&mut self, target: Vec2, now: f64, duration: f64) {
        self.model.set_target(target, now, duration);
        self.update(now);
    }

    pub fn update(&mut self, now: f64) -> Vec2 {
        let position = self.model.update(now);
        if self.strategy == ListenerStrategy::Legacy {
            if let Some(context) = &self.context {
                if let Err(e) = context.set_listener_position(position.x, 0.0, position.y) {
                    trace!("Listener update dropped: {}", e);
                }
            }
        }
        position
    }

    pub fn position(&self) -> Vec2 {
        self.model.position()
    }

    pub fn target(&self) -> Vec2 {
        self.model.target()
    }
}
