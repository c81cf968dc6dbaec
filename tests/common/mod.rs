//! Common utilities for frame graph integration tests.

use std::sync::Arc;
use std::time::Duration;

use frame_graph::{
    BackendType, GraphicsContext, GraphicsResult, PassContext, RendererConfig,
};
use parking_lot::Mutex;

/// Backends the integration tests can run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Dummy backend completing submissions immediately.
    Dummy,
    /// Dummy backend completing submissions on a worker thread after a delay.
    DummyLatency(u64),
    /// Headless Vulkan device.
    Vulkan,
}

impl Backend {
    pub fn config(self) -> RendererConfig {
        match self {
            Backend::Dummy => RendererConfig::new(),
            Backend::DummyLatency(ms) => {
                RendererConfig::new().with_dummy_latency(Duration::from_millis(ms))
            }
            Backend::Vulkan => RendererConfig::new().with_backend(BackendType::Vulkan),
        }
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Create a context, or `None` if the backend is not available here.
pub fn context(backend: Backend, frames_in_flight: u32) -> Option<Arc<GraphicsContext>> {
    init_logging();
    let config = backend.config().with_frames_in_flight(frames_in_flight);
    if !config.backend.is_available() {
        eprintln!("Backend {:?} not compiled in, skipping", backend);
        return None;
    }
    match GraphicsContext::new(config) {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("Backend {:?} not available ({}), skipping", backend, e);
            None
        }
    }
}

/// Shared log of pass invocations.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// A pass callback that appends `name` to `log`.
pub fn logging_pass(
    log: &CallLog,
    name: &str,
) -> impl FnMut(&mut PassContext<'_>) -> GraphicsResult<()> + Send + 'static {
    let log = Arc::clone(log);
    let name = name.to_string();
    move |_ctx: &mut PassContext<'_>| {
        log.lock().push(name.clone());
        Ok(())
    }
}
