use crate::context::{
    AudioContext, Capabilities, ContextFactory, ContextState, Endpoint, NodeId, NodeKind,
    PannerConfig, Param,
};
use crate::device::{open_output, DeviceOutput};
use crate::graph::RenderGraph;
use crate::stream::AudioStream;
use log::{debug, error, info, warn};
use room_core::{CapabilityUnavailable, ContextFatal, Error, SAMPLE_RATE};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type SharedGraph = Arc<Mutex<RenderGraph>>;
type Fault = Arc<Mutex<Option<String>>>;

enum Driver {
    /// Rendered on demand through `render_quantum`
    Offline,
    /// Rendered by a cpal output callback
    Device { output: Option<DeviceOutput> },
}

/// An [`AudioContext`] backed by the software [`RenderGraph`].
pub struct GraphContext {
    graph: SharedGraph,
    fault: Fault,
    state: Cell<ContextState>,
    driver: RefCell<Driver>,
}

fn lock_graph(graph: &SharedGraph) -> MutexGuard<'_, RenderGraph> {
    graph.lock().unwrap_or_else(PoisonError::into_inner)
}

fn record_fault(fault: &Fault, reason: String) {
    let mut slot = fault.lock().unwrap_or_else(PoisonError::into_inner);
    if slot.is_none() {
        *slot = Some(reason);
    }
}

fn device_output(
    device_id: Option<&str>,
    graph: &SharedGraph,
    fault: &Fault,
) -> Result<DeviceOutput, Error> {
    let render_graph = Arc::clone(graph);
    let error_fault = Arc::clone(fault);
    open_output(
        device_id,
        move |out, channels| lock_graph(&render_graph).render(out, channels),
        move |reason| {
            error!("Audio output failed: {}", reason);
            record_fault(&error_fault, reason);
        },
    )
}

impl GraphContext {
    /// A context rendered by the caller, running from the start
    pub fn offline(sample_rate: u32, capabilities: Capabilities) -> Self {
        Self {
            graph: Arc::new(Mutex::new(RenderGraph::new(sample_rate, capabilities))),
            fault: Arc::new(Mutex::new(None)),
            state: Cell::new(ContextState::Running),
            driver: RefCell::new(Driver::Offline),
        }
    }

    /// A context playing on an output device, suspended until [`AudioContext::resume`]
    pub fn open_device(device_id: Option<&str>) -> Result<Self, Error> {
        // The device's native rate is only known once the stream exists, so the
        // graph is rebuilt at that rate before any node is created.
        let graph = Arc::new(Mutex::new(RenderGraph::new(
            SAMPLE_RATE,
            Capabilities::software(),
        )));
        let fault = Arc::new(Mutex::new(None));
        let output = device_output(device_id, &graph, &fault)?;
        *lock_graph(&graph) = RenderGraph::new(output.sample_rate(), Capabilities::software());

        info!("Audio context opened at {} Hz", output.sample_rate());
        Ok(Self {
            graph,
            fault,
            state: Cell::new(ContextState::Suspended),
            driver: RefCell::new(Driver::Device {
                output: Some(output),
            }),
        })
    }

    fn graph(&self) -> MutexGuard<'_, RenderGraph> {
        lock_graph(&self.graph)
    }

    /// Render `frames` stereo frames and return them interleaved.
    /// Only offline contexts advance this way; device contexts are driven by
    /// the device callback.
    pub fn render_quantum(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        if matches!(*self.driver.borrow(), Driver::Offline)
            && self.state.get() == ContextState::Running
        {
            self.graph().render(&mut out, 2);
        }
        out
    }

    /// Mark the context as failed, as a device error would
    pub fn fail(&self, reason: impl Into<String>) {
        record_fault(&self.fault, reason.into());
    }

    pub fn node_count(&self) -> usize {
        self.graph().node_count()
    }

    fn ensure_usable(&self) -> Result<(), Error> {
        self.health()?;
        if self.state.get() == ContextState::Closed {
            return Err(Error::InvalidState("audio context is closed".to_string()));
        }
        Ok(())
    }
}

impl AudioContext for GraphContext {
    fn sample_rate(&self) -> u32 {
        self.graph().sample_rate()
    }

    fn current_time(&self) -> f64 {
        self.graph().current_time()
    }

    fn state(&self) -> ContextState {
        if self.health().is_err() {
            ContextState::Failed
        } else {
            self.state.get()
        }
    }

    fn health(&self) -> Result<(), ContextFatal> {
        match self
            .fault
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(reason) => Err(ContextFatal(reason.clone())),
            None => Ok(()),
        }
    }

    fn resume(&self) -> Result<(), Error> {
        self.ensure_usable()?;
        if let Driver::Device {
            output: Some(output),
        } = &*self.driver.borrow()
        {
            output.play()?;
        }
        self.state.set(ContextState::Running);
        Ok(())
    }

    fn close(&self) {
        if let Driver::Device { output } = &mut *self.driver.borrow_mut() {
            if let Some(output) = output.take() {
                if let Err(e) = output.pause() {
                    debug!("Pausing output on close failed: {}", e);
                }
            }
        }
        self.state.set(ContextState::Closed);
    }

    fn capabilities(&self) -> Capabilities {
        self.graph().capabilities()
    }

    fn create_node(&self, kind: NodeKind) -> Result<NodeId, Error> {
        self.ensure_usable()?;
        self.graph().create_node(kind)
    }

    fn create_stream_source(&self, stream: &AudioStream) -> Result<NodeId, Error> {
        self.ensure_usable()?;
        self.graph().create_stream_source(stream)
    }

    fn connect(&self, from: NodeId, to: Endpoint) -> Result<(), Error> {
        self.ensure_usable()?;
        self.graph().connect(from, to)
    }

    fn set_param(&self, node: NodeId, param: Param, value: f32) -> Result<(), Error> {
        self.ensure_usable()?;
        self.graph().set_param(node, param, value)
    }

    fn ramp_param(
        &self,
        node: NodeId,
        param: Param,
        target: f32,
        end_time: f64,
    ) -> Result<(), Error> {
        self.ensure_usable()?;
        self.graph().ramp_param(node, param, target, end_time)
    }

    fn param_value(&self, node: NodeId, param: Param) -> Option<f32> {
        self.graph().param_value(node, param)
    }

    fn configure_panner(&self, node: NodeId, config: PannerConfig) -> Result<(), Error> {
        self.ensure_usable()?;
        self.graph().configure_panner(node, config)
    }

    fn set_listener_position(&self, x: f32, y: f32, z: f32) -> Result<(), Error> {
        self.ensure_usable()?;
        self.graph().set_listener_position(x, y, z)
    }

    fn remove_node(&self, node: NodeId) {
        self.graph().remove_node(node);
    }

    fn set_output_device(&self, device_id: &str) -> Result<(), Error> {
        self.ensure_usable()?;
        let mut driver = self.driver.borrow_mut();
        match &mut *driver {
            Driver::Offline => Err(CapabilityUnavailable("output device routing").into()),
            Driver::Device { output } => {
                let replacement = device_output(Some(device_id), &self.graph, &self.fault)?;
                if replacement.sample_rate() != self.graph().sample_rate() {
                    warn!(
                        "Output device {} runs at {} Hz, graph renders at {} Hz",
                        device_id,
                        replacement.sample_rate(),
                        self.graph().sample_rate()
                    );
                }
                if self.state.get() == ContextState::Running {
                    replacement.play()?;
                }
                *output = Some(replacement);
                info!("Audio context routed to {}", device_id);
                Ok(())
            }
        }
    }
}

/// Opens a device-backed context on each request
pub struct DeviceContextFactory {
    device_id: Option<String>,
}

impl DeviceContextFactory {
    pub fn new(device_id: Option<String>) -> Self {
        Self { device_id }
    }
}

impl ContextFactory for DeviceContextFactory {
    fn create(&self) -> Result<Rc<dyn AudioContext>, Error> {
        let context = GraphContext::open_device(self.device_id.as_deref())?;
        Ok(Rc::new(context))
    }
}

/// Builds offline contexts and keeps them reachable for the caller.
///
/// Used for headless runs and tests: contexts can be rendered, failed on
/// purpose, or withheld entirely to exercise the degraded path.
pub struct OfflineContextFactory {
    sample_rate: u32,
    capabilities: Cell<Capabilities>,
    available: Cell<bool>,
    attempts: Cell<usize>,
    created: RefCell<Vec<Rc<GraphContext>>>,
}

impl OfflineContextFactory {
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            capabilities: Cell::new(capabilities),
            available: Cell::new(true),
            attempts: Cell::new(0),
            created: RefCell::new(Vec::new()),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Capabilities of contexts created from now on
    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.capabilities.set(capabilities);
    }

    /// When false, `create` fails as if the platform had no audio context
    pub fn set_available(&self, available: bool) {
        self.available.set(available);
    }

    /// The most recently created context
    pub fn latest(&self) -> Option<Rc<GraphContext>> {
        self.created.borrow().last().cloned()
    }

    pub fn created_count(&self) -> usize {
        self.created.borrow().len()
    }

    /// Calls to `create`, failed ones included
    pub fn attempt_count(&self) -> usize {
        self.attempts.get()
    }
}

impl ContextFactory for OfflineContextFactory {
    fn create(&self) -> Result<Rc<dyn AudioContext>, Error> {
        self.attempts.set(self.attempts.get() + 1);
        if !self.available.get() {
            return Err(CapabilityUnavailable("audio context").into());
        }
        let context = Rc::new(GraphContext::offline(
            self.sample_rate,
            self.capabilities.get(),
        ));
        self.created.borrow_mut().push(Rc::clone(&context));
        Ok(context)
    }
}
