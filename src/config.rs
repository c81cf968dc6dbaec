//! Renderer configuration.

use std::time::Duration;

/// Graphics backend selection.
///
/// The active backend decides which concrete objects the
/// [`GraphicsContext`](crate::GraphicsContext) factories build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// No backend. Every factory call fails with
    /// [`GraphicsError::NoBackend`](crate::GraphicsError::NoBackend).
    None,
    /// CPU-side mock of a GPU queue, used for tests and headless runs.
    #[default]
    Dummy,
    /// Native Vulkan via ash (requires the `vulkan` feature).
    Vulkan,
}

impl BackendType {
    /// Get the backend name for display.
    pub fn name(&self) -> &'static str {
        match self {
            BackendType::None => "none",
            BackendType::Dummy => "dummy",
            BackendType::Vulkan => "vulkan",
        }
    }

    /// Parse a backend name as accepted on the command line.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(BackendType::None),
            "dummy" => Some(BackendType::Dummy),
            "vulkan" | "vk" => Some(BackendType::Vulkan),
            _ => None,
        }
    }

    /// Check if this backend was compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            BackendType::None | BackendType::Dummy => true,
            BackendType::Vulkan => cfg!(all(feature = "vulkan", not(target_arch = "wasm32"))),
        }
    }
}

/// Behaviour of the dummy backend's simulated queue.
#[derive(Debug, Clone, Default)]
pub struct DummyConfig {
    /// Delay between a submission and the signal of its fence. Fences signal
    /// in submission order.
    ///
    /// Zero signals the fence synchronously inside `submit`.
    pub completion_latency: Duration,
    /// Reject the batch holding the command buffer submission with this
    /// zero-based index. Every buffer of a batch counts, per queue.
    pub fail_submission_at: Option<u64>,
}

/// Configuration for a [`GraphicsContext`](crate::GraphicsContext) and the
/// render graphs built on it.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Which backend to use.
    pub backend: BackendType,
    /// Number of frames that may be in flight on the GPU at once.
    pub frames_in_flight: u32,
    /// Upper bound for CPU waits on fences. `None` waits forever.
    pub fence_timeout: Option<Duration>,
    /// Initial viewport width.
    pub width: u32,
    /// Initial viewport height.
    pub height: u32,
    /// Dummy backend settings (ignored by other backends).
    pub dummy: DummyConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::Dummy,
            frames_in_flight: 2,
            fence_timeout: Some(Duration::from_secs(10)),
            width: 1280,
            height: 720,
            dummy: DummyConfig::default(),
        }
    }
}

impl RendererConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Set the number of frames in flight. Values below 1 are clamped to 1.
    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    pub fn with_fence_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fence_timeout = timeout;
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Let the dummy backend complete submissions after `latency`.
    pub fn with_dummy_latency(mut self, latency: Duration) -> Self {
        self.dummy.completion_latency = latency;
        self
    }

    /// Make the dummy backend reject the submission with the given index.
    pub fn with_dummy_submit_failure(mut self, submission_index: u64) -> Self {
        self.dummy.fail_submission_at = Some(submission_index);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.backend, BackendType::Dummy);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.fence_timeout, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_frames_in_flight_clamped() {
        let config = RendererConfig::new().with_frames_in_flight(0);
        assert_eq!(config.frames_in_flight, 1);
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(BackendType::from_name("VK"), Some(BackendType::Vulkan));
        assert_eq!(BackendType::from_name("dummy"), Some(BackendType::Dummy));
        assert_eq!(BackendType::from_name("metal"), None);
        assert!(BackendType::Dummy.is_available());
        assert!(BackendType::None.is_available());
    }
}
