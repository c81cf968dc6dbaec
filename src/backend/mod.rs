//! GPU backend abstraction layer.
//!
//! Every GPU object the core deals with is an enum with exactly one variant per
//! backend. The enums are crate-private: public types in [`sync`](crate::sync),
//! [`command`](crate::command) and [`resources`](crate::resources) wrap them, and
//! only the [`GraphicsContext`](crate::GraphicsContext) factory decides which
//! variant gets built.
//!
//! # Available Backends
//!
//! - `dummy`: CPU-side mock of a device and queue, always compiled in
//! - `vulkan`: Native Vulkan backend using ash (feature `vulkan`)

pub(crate) mod dummy;

#[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
pub(crate) mod vulkan;

use std::sync::Arc;
use std::time::Duration;

use crate::command::RecordedCommand;
use crate::error::{CommandError, GraphicsResult};
use crate::resources::{BufferDescriptor, TextureDescriptor};

/// A live device of the active backend.
pub(crate) enum GpuDevice {
    Dummy(Arc<dummy::DummyDevice>),
    #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
    Vulkan(Arc<vulkan::VulkanDevice>),
}

impl GpuDevice {
    pub fn name(&self) -> &str {
        match self {
            Self::Dummy(device) => device.name(),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(device) => device.name(),
        }
    }

    pub fn graphics_queue_family(&self) -> u32 {
        match self {
            Self::Dummy(_) => dummy::DummyDevice::GRAPHICS_QUEUE_FAMILY,
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(device) => device.queue_family(),
        }
    }

    pub fn create_fence(&self, signaled: bool) -> GraphicsResult<GpuFence> {
        match self {
            Self::Dummy(device) => Ok(GpuFence::Dummy(device.create_fence(signaled))),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(device) => device.create_fence(signaled).map(GpuFence::Vulkan),
        }
    }

    pub fn create_semaphore(&self) -> GraphicsResult<GpuSemaphore> {
        match self {
            Self::Dummy(device) => Ok(GpuSemaphore::Dummy(device.create_semaphore())),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(device) => device.create_semaphore().map(GpuSemaphore::Vulkan),
        }
    }

    pub fn create_command_pool(&self) -> GraphicsResult<GpuCommandPool> {
        match self {
            Self::Dummy(device) => Ok(GpuCommandPool::Dummy(device.create_command_pool())),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(device) => device.create_command_pool().map(GpuCommandPool::Vulkan),
        }
    }

    pub fn create_queue(&self) -> GraphicsResult<GpuQueue> {
        match self {
            Self::Dummy(device) => dummy::DummyDevice::create_queue(device).map(GpuQueue::Dummy),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(device) => Ok(GpuQueue::Vulkan(Arc::clone(device))),
        }
    }

    pub fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<GpuBuffer> {
        match self {
            Self::Dummy(device) => device.create_buffer(descriptor).map(GpuBuffer::Dummy),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(device) => device.create_buffer(descriptor).map(GpuBuffer::Vulkan),
        }
    }

    pub fn create_texture(&self, descriptor: &TextureDescriptor) -> GraphicsResult<GpuTexture> {
        match self {
            Self::Dummy(device) => device.create_texture(descriptor).map(GpuTexture::Dummy),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(device) => device.create_texture(descriptor).map(GpuTexture::Vulkan),
        }
    }

    pub fn wait_idle(&self) -> GraphicsResult<()> {
        match self {
            Self::Dummy(device) => {
                device.wait_idle();
                Ok(())
            }
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(device) => device.wait_idle(),
        }
    }
}

impl std::fmt::Debug for GpuDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(device) => f.debug_tuple("GpuDevice::Dummy").field(&device.name()).finish(),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(device) => f.debug_tuple("GpuDevice::Vulkan").field(&device.name()).finish(),
        }
    }
}

/// Handle to a GPU fence for CPU-GPU synchronization.
pub(crate) enum GpuFence {
    Dummy(Arc<dummy::DummyFence>),
    #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
    Vulkan(vulkan::VulkanFence),
}

impl GpuFence {
    pub fn reset(&self) -> GraphicsResult<()> {
        match self {
            Self::Dummy(fence) => {
                fence.reset();
                Ok(())
            }
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(fence) => fence.reset(),
        }
    }

    /// Block until signaled. Returns `false` if `timeout` elapsed first.
    pub fn wait(&self, timeout: Option<Duration>) -> GraphicsResult<bool> {
        match self {
            Self::Dummy(fence) => Ok(fence.wait(timeout)),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(fence) => fence.wait(timeout),
        }
    }

    pub fn is_signaled(&self) -> bool {
        match self {
            Self::Dummy(fence) => fence.is_signaled(),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(fence) => fence.is_signaled(),
        }
    }
}

impl std::fmt::Debug for GpuFence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(fence) => f
                .debug_struct("GpuFence::Dummy")
                .field("signaled", &fence.is_signaled())
                .finish(),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(fence) => f
                .debug_struct("GpuFence::Vulkan")
                .field("fence", &fence.raw())
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU semaphore for GPU-GPU synchronization.
pub(crate) enum GpuSemaphore {
    Dummy(Arc<dummy::DummySemaphore>),
    #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
    Vulkan(vulkan::VulkanSemaphore),
}

impl GpuSemaphore {
    /// Backend identifier, unique per device.
    pub fn id(&self) -> u64 {
        match self {
            Self::Dummy(semaphore) => semaphore.id(),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(semaphore) => ash::vk::Handle::as_raw(semaphore.raw()),
        }
    }
}

impl std::fmt::Debug for GpuSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(semaphore) => f
                .debug_tuple("GpuSemaphore::Dummy")
                .field(&semaphore.id())
                .finish(),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(semaphore) => f
                .debug_struct("GpuSemaphore::Vulkan")
                .field("semaphore", &semaphore.raw())
                .finish_non_exhaustive(),
        }
    }
}

/// Command allocator bound to one queue family.
pub(crate) enum GpuCommandPool {
    Dummy(dummy::DummyCommandPool),
    #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
    Vulkan(Arc<vulkan::VulkanCommandPool>),
}

impl GpuCommandPool {
    pub fn allocate(&self) -> GraphicsResult<GpuCommandBuffer> {
        match self {
            Self::Dummy(pool) => Ok(GpuCommandBuffer::Dummy(pool.allocate())),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(pool) => vulkan::VulkanCommandPool::allocate(pool).map(GpuCommandBuffer::Vulkan),
        }
    }

    pub fn reset(&self) -> GraphicsResult<()> {
        match self {
            Self::Dummy(pool) => {
                pool.reset();
                Ok(())
            }
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(pool) => pool.reset(),
        }
    }
}

/// A primary command buffer.
pub(crate) enum GpuCommandBuffer {
    Dummy(dummy::DummyCommandBuffer),
    #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
    Vulkan(vulkan::VulkanCommandBuffer),
}

impl GpuCommandBuffer {
    pub fn begin(&mut self) -> GraphicsResult<()> {
        match self {
            Self::Dummy(cmd) => {
                cmd.begin();
                Ok(())
            }
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(cmd) => cmd.begin(),
        }
    }

    pub fn record(&mut self, command: &RecordedCommand) {
        match self {
            Self::Dummy(cmd) => cmd.record(command),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(cmd) => cmd.record(command),
        }
    }

    pub fn end(&mut self) -> GraphicsResult<()> {
        match self {
            Self::Dummy(cmd) => {
                cmd.end();
                Ok(())
            }
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(cmd) => cmd.end(),
        }
    }
}

/// One command buffer of a batch with its wait and signal semaphores.
pub(crate) struct GpuSubmission<'a> {
    pub command_buffer: &'a GpuCommandBuffer,
    pub wait_semaphores: Vec<&'a GpuSemaphore>,
    pub signal_semaphores: Vec<&'a GpuSemaphore>,
}

fn dummy_semaphores<'a>(
    semaphores: &[&'a GpuSemaphore],
) -> Result<Vec<&'a dummy::DummySemaphore>, CommandError> {
    semaphores
        .iter()
        .map(|&s| match s {
            GpuSemaphore::Dummy(s) => Ok(s.as_ref()),
            #[allow(unreachable_patterns)]
            _ => Err(CommandError::ForeignObject),
        })
        .collect()
}

#[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
fn vulkan_semaphores(semaphores: &[&GpuSemaphore]) -> Result<Vec<ash::vk::Semaphore>, CommandError> {
    semaphores
        .iter()
        .map(|s| match s {
            GpuSemaphore::Vulkan(s) => Ok(s.raw()),
            _ => Err(CommandError::ForeignObject),
        })
        .collect()
}

/// A device queue that accepts submissions.
pub(crate) enum GpuQueue {
    Dummy(dummy::DummyQueue),
    #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
    Vulkan(Arc<vulkan::VulkanDevice>),
}

impl GpuQueue {
    /// Hand a batch of command buffers to the queue in one call.
    ///
    /// All objects must come from the same backend as the queue. `fence` is
    /// signaled once every entry has completed.
    pub fn submit_batch(
        &self,
        batch: &[GpuSubmission<'_>],
        fence: Option<&GpuFence>,
    ) -> GraphicsResult<()> {
        match self {
            Self::Dummy(queue) => {
                let batch = batch
                    .iter()
                    .map(|submission| match submission.command_buffer {
                        GpuCommandBuffer::Dummy(cmd) => Ok(dummy::DummySubmission {
                            command_buffer: cmd,
                            wait_semaphores: dummy_semaphores(&submission.wait_semaphores)?,
                            signal_semaphores: dummy_semaphores(&submission.signal_semaphores)?,
                        }),
                        #[allow(unreachable_patterns)]
                        _ => Err(CommandError::ForeignObject),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let fence = match fence {
                    None => None,
                    Some(GpuFence::Dummy(f)) => Some(Arc::clone(f)),
                    #[allow(unreachable_patterns)]
                    Some(_) => return Err(CommandError::ForeignObject.into()),
                };
                queue.submit(&batch, fence)
            }
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(device) => {
                let batch = batch
                    .iter()
                    .map(|submission| match submission.command_buffer {
                        GpuCommandBuffer::Vulkan(cmd) => Ok(vulkan::VulkanSubmission {
                            command_buffer: cmd.raw(),
                            wait_semaphores: vulkan_semaphores(&submission.wait_semaphores)?,
                            signal_semaphores: vulkan_semaphores(&submission.signal_semaphores)?,
                        }),
                        _ => Err(CommandError::ForeignObject),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let fence = match fence {
                    None => ash::vk::Fence::null(),
                    Some(GpuFence::Vulkan(f)) => f.raw(),
                    Some(_) => return Err(CommandError::ForeignObject.into()),
                };
                device.submit(&batch, fence)
            }
        }
    }
}

/// Handle to a GPU buffer allocation.
pub(crate) enum GpuBuffer {
    Dummy(dummy::DummyAllocation),
    #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
    Vulkan(vulkan::VulkanBuffer),
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(allocation) => f.debug_tuple("GpuBuffer::Dummy").field(allocation).finish(),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(buffer) => f
                .debug_struct("GpuBuffer::Vulkan")
                .field("buffer", &buffer.raw())
                .finish_non_exhaustive(),
        }
    }
}

/// Handle to a GPU texture allocation.
pub(crate) enum GpuTexture {
    Dummy(dummy::DummyAllocation),
    #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
    Vulkan(vulkan::VulkanTexture),
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dummy(allocation) => f.debug_tuple("GpuTexture::Dummy").field(allocation).finish(),
            #[cfg(all(feature = "vulkan", not(target_arch = "wasm32")))]
            Self::Vulkan(texture) => f
                .debug_struct("GpuTexture::Vulkan")
                .field("image", &texture.raw())
                .finish_non_exhaustive(),
        }
    }
}
