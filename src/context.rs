//! The graphics context: the single entry point for GPU object creation.
//!
//! A context is built once from a [`RendererConfig`], wrapped in an `Arc` and
//! handed to everything that creates GPU objects (render graphs, pools,
//! loaders). There is no global accessor.

use std::sync::Arc;

use crate::backend::dummy::DummyDevice;
use crate::backend::GpuDevice;
use crate::command::{CommandPool, Queue};
use crate::config::{BackendType, RendererConfig};
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{Buffer, BufferDescriptor, Texture, TextureDescriptor};
use crate::sync::{Fence, Semaphore};

/// Owns the device of the active backend and builds GPU objects on it.
///
/// With [`BackendType::None`] the context is still created, but every factory
/// method returns [`GraphicsError::NoBackend`].
#[derive(Debug)]
pub struct GraphicsContext {
    config: RendererConfig,
    device: Option<GpuDevice>,
}

impl GraphicsContext {
    /// Create a context for the backend selected in `config`.
    pub fn new(config: RendererConfig) -> GraphicsResult<Arc<Self>> {
        let device = match config.backend {
            BackendType::None => {
                log::warn!("No graphics backend selected; GPU object creation will fail");
                None
            }
            BackendType::Dummy => Some(GpuDevice::Dummy(DummyDevice::new(config.dummy.clone()))),
            BackendType::Vulkan => Some(Self::create_vulkan_device()?),
        };

        if let Some(device) = &device {
            log::info!(
                "Graphics context created: {} backend, device '{}', {} frame(s) in flight",
                config.backend.name(),
                device.name(),
                config.frames_in_flight.max(1)
            );
        }

        Ok(Arc::new(Self { config, device }))
    }

    #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
    fn create_vulkan_device() -> GraphicsResult<GpuDevice> {
        crate::backend::vulkan::VulkanDevice::new().map(GpuDevice::Vulkan)
    }

    #[cfg(not(all(feature = "vulkan", not(target_arch = "wasm32"))))]
    fn create_vulkan_device() -> GraphicsResult<GpuDevice> {
        Err(GraphicsError::BackendUnavailable(
            "Vulkan support not compiled in (enable the `vulkan` feature)".to_string(),
        ))
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn active_backend(&self) -> BackendType {
        self.config.backend
    }

    /// Name of the underlying device, if a backend is active.
    pub fn device_name(&self) -> Option<&str> {
        self.device.as_ref().map(GpuDevice::name)
    }

    /// Number of frame slots render graphs should rotate through (at least 1).
    pub fn frames_in_flight(&self) -> usize {
        self.config.frames_in_flight.max(1) as usize
    }

    fn device(&self) -> GraphicsResult<&GpuDevice> {
        self.device.as_ref().ok_or(GraphicsError::NoBackend)
    }

    pub fn create_fence(&self, signaled: bool) -> GraphicsResult<Fence> {
        self.device()?.create_fence(signaled).map(Fence::new)
    }

    pub fn create_semaphore(&self) -> GraphicsResult<Semaphore> {
        self.device()?.create_semaphore().map(Semaphore::new)
    }

    /// Create a command pool for the graphics queue family.
    pub fn create_command_pool(&self) -> GraphicsResult<CommandPool> {
        let device = self.device()?;
        let pool = device.create_command_pool()?;
        Ok(CommandPool::new(pool, device.graphics_queue_family()))
    }

    /// Get a handle to the graphics queue.
    pub fn queue(&self) -> GraphicsResult<Queue> {
        let device = self.device()?;
        let queue = device.create_queue()?;
        Ok(Queue::new(queue, device.graphics_queue_family()))
    }

    pub fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<Buffer> {
        let gpu = self.device()?.create_buffer(descriptor)?;
        Ok(Buffer::new(descriptor.clone(), gpu))
    }

    pub fn create_texture(&self, descriptor: &TextureDescriptor) -> GraphicsResult<Texture> {
        let gpu = self.device()?.create_texture(descriptor)?;
        Ok(Texture::new(descriptor.clone(), gpu))
    }

    /// Block until the device has finished all submitted work.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        self.device()?.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{BufferUsage, TextureFormat, TextureUsage};

    #[test]
    fn test_dummy_context() {
        let ctx = GraphicsContext::new(RendererConfig::new()).unwrap();
        assert_eq!(ctx.active_backend(), BackendType::Dummy);
        assert_eq!(ctx.device_name(), Some("Dummy Device"));
        assert_eq!(ctx.frames_in_flight(), 2);
        assert!(ctx.create_fence(false).is_ok());
        assert!(ctx.create_semaphore().is_ok());
        assert!(ctx.create_command_pool().is_ok());
        assert!(ctx.queue().is_ok());
        ctx.wait_idle().unwrap();
    }

    #[test]
    fn test_none_backend_factories_fail() {
        let ctx = GraphicsContext::new(RendererConfig::new().with_backend(BackendType::None))
            .unwrap();
        assert_eq!(ctx.device_name(), None);
        assert_eq!(ctx.create_fence(true).unwrap_err(), GraphicsError::NoBackend);
        assert_eq!(ctx.create_semaphore().unwrap_err(), GraphicsError::NoBackend);
        assert_eq!(ctx.create_command_pool().unwrap_err(), GraphicsError::NoBackend);
        assert_eq!(ctx.queue().unwrap_err(), GraphicsError::NoBackend);
        assert_eq!(
            ctx.create_buffer(&BufferDescriptor::new(16, BufferUsage::VERTEX))
                .unwrap_err(),
            GraphicsError::NoBackend
        );
        assert_eq!(ctx.wait_idle().unwrap_err(), GraphicsError::NoBackend);
    }

    #[test]
    fn test_frames_in_flight_never_zero() {
        let mut config = RendererConfig::new();
        config.frames_in_flight = 0;
        let ctx = GraphicsContext::new(config).unwrap();
        assert_eq!(ctx.frames_in_flight(), 1);
    }

    #[test]
    fn test_invalid_descriptors_rejected() {
        let ctx = GraphicsContext::new(RendererConfig::new()).unwrap();
        let err = ctx
            .create_texture(&TextureDescriptor::new_2d(
                0,
                16,
                TextureFormat::Rgba8Unorm,
                TextureUsage::TEXTURE_BINDING,
            ))
            .unwrap_err();
        assert!(matches!(err, GraphicsError::ResourceCreationFailed(_)));
        assert!(ctx
            .create_buffer(&BufferDescriptor::new(0, BufferUsage::STORAGE))
            .is_err());
    }

    #[cfg(not(feature = "vulkan"))]
    #[test]
    fn test_vulkan_unavailable_without_feature() {
        let err = GraphicsContext::new(RendererConfig::new().with_backend(BackendType::Vulkan))
            .unwrap_err();
        assert!(matches!(err, GraphicsError::BackendUnavailable(_)));
    }
}
