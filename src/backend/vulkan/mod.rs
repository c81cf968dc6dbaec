//! Vulkan backend implementation using ash.
//!
//! Headless: no surface or swapchain is created. Each wrapper owns its raw
//! handle and an `Arc` of the [`VulkanDevice`], and destroys the handle on drop.

mod conversion;
mod device;

use std::sync::Arc;
use std::time::Duration;

use ash::vk;

use crate::command::RecordedCommand;
use crate::error::{GraphicsError, GraphicsResult};
use crate::resources::{BufferDescriptor, TextureDescriptor};

use conversion::{
    buffer_memory_flags, convert_buffer_usage, convert_texture_format, convert_texture_usage,
};
pub(crate) use device::{VulkanDevice, VulkanSubmission};

fn fence_error(e: vk::Result) -> GraphicsError {
    match e {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        e => GraphicsError::FenceWaitFailed(format!("{:?}", e)),
    }
}

fn creation_error(what: &'static str) -> impl Fn(vk::Result) -> GraphicsError {
    move |e| GraphicsError::ResourceCreationFailed(format!("Failed to create {}: {:?}", what, e))
}

impl VulkanDevice {
    pub fn create_fence(self: &Arc<Self>, signaled: bool) -> GraphicsResult<VulkanFence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::default().flags(flags);
        let raw = unsafe { self.raw().create_fence(&fence_info, None) }
            .map_err(creation_error("fence"))?;
        Ok(VulkanFence {
            device: Arc::clone(self),
            raw,
        })
    }

    pub fn create_semaphore(self: &Arc<Self>) -> GraphicsResult<VulkanSemaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let raw = unsafe { self.raw().create_semaphore(&semaphore_info, None) }
            .map_err(creation_error("semaphore"))?;
        Ok(VulkanSemaphore {
            device: Arc::clone(self),
            raw,
        })
    }

    pub fn create_command_pool(self: &Arc<Self>) -> GraphicsResult<Arc<VulkanCommandPool>> {
        let pool_info = vk::CommandPoolCreateInfo::default().queue_family_index(self.queue_family());
        let raw = unsafe { self.raw().create_command_pool(&pool_info, None) }
            .map_err(creation_error("command pool"))?;
        Ok(Arc::new(VulkanCommandPool {
            device: Arc::clone(self),
            raw,
        }))
    }

    fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> GraphicsResult<vk::DeviceMemory> {
        let memory_type = self
            .find_memory_type(requirements.memory_type_bits, flags)
            .ok_or_else(|| {
                GraphicsError::ResourceCreationFailed(format!(
                    "No memory type with {:?} for type bits {:#x}",
                    flags, requirements.memory_type_bits
                ))
            })?;
        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        unsafe { self.raw().allocate_memory(&allocate_info, None) }
            .map_err(creation_error("device memory"))
    }

    pub fn create_buffer(self: &Arc<Self>, descriptor: &BufferDescriptor) -> GraphicsResult<VulkanBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size)
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = unsafe { self.raw().create_buffer(&buffer_info, None) }
            .map_err(creation_error("buffer"))?;

        let requirements = unsafe { self.raw().get_buffer_memory_requirements(raw) };
        let bound = self
            .allocate_memory(requirements, buffer_memory_flags(descriptor.usage))
            .and_then(|memory| {
                match unsafe { self.raw().bind_buffer_memory(raw, memory, 0) } {
                    Ok(()) => Ok(memory),
                    Err(e) => {
                        unsafe { self.raw().free_memory(memory, None) };
                        Err(creation_error("buffer binding")(e))
                    }
                }
            });

        match bound {
            Ok(memory) => Ok(VulkanBuffer {
                device: Arc::clone(self),
                raw,
                memory,
            }),
            Err(e) => {
                unsafe { self.raw().destroy_buffer(raw, None) };
                Err(e)
            }
        }
    }

    pub fn create_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
    ) -> GraphicsResult<VulkanTexture> {
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_texture_format(descriptor.format))
            .extent(vk::Extent3D {
                width: descriptor.width,
                height: descriptor.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(descriptor.usage, descriptor.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let raw = unsafe { self.raw().create_image(&image_info, None) }
            .map_err(creation_error("image"))?;

        let requirements = unsafe { self.raw().get_image_memory_requirements(raw) };
        let bound = self
            .allocate_memory(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)
            .and_then(|memory| {
                match unsafe { self.raw().bind_image_memory(raw, memory, 0) } {
                    Ok(()) => Ok(memory),
                    Err(e) => {
                        unsafe { self.raw().free_memory(memory, None) };
                        Err(creation_error("image binding")(e))
                    }
                }
            });

        match bound {
            Ok(memory) => Ok(VulkanTexture {
                device: Arc::clone(self),
                raw,
                memory,
            }),
            Err(e) => {
                unsafe { self.raw().destroy_image(raw, None) };
                Err(e)
            }
        }
    }
}

pub(crate) struct VulkanFence {
    device: Arc<VulkanDevice>,
    raw: vk::Fence,
}

impl VulkanFence {
    pub fn raw(&self) -> vk::Fence {
        self.raw
    }

    pub fn reset(&self) -> GraphicsResult<()> {
        unsafe { self.device.raw().reset_fences(&[self.raw]) }.map_err(fence_error)
    }

    pub fn wait(&self, timeout: Option<Duration>) -> GraphicsResult<bool> {
        let timeout_ns = timeout
            .map(|t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(u64::MAX);
        match unsafe { self.device.raw().wait_for_fences(&[self.raw], true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(fence_error(e)),
        }
    }

    pub fn is_signaled(&self) -> bool {
        matches!(unsafe { self.device.raw().get_fence_status(self.raw) }, Ok(true))
    }
}

impl Drop for VulkanFence {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_fence(self.raw, None) };
    }
}

pub(crate) struct VulkanSemaphore {
    device: Arc<VulkanDevice>,
    raw: vk::Semaphore,
}

impl VulkanSemaphore {
    pub fn raw(&self) -> vk::Semaphore {
        self.raw
    }
}

impl Drop for VulkanSemaphore {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_semaphore(self.raw, None) };
    }
}

/// Shared by the pool wrapper and every buffer allocated from it.
pub(crate) struct VulkanCommandPool {
    device: Arc<VulkanDevice>,
    raw: vk::CommandPool,
}

impl VulkanCommandPool {
    pub fn allocate(pool: &Arc<Self>) -> GraphicsResult<VulkanCommandBuffer> {
        let allocate_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.raw)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { pool.device.raw().allocate_command_buffers(&allocate_info) }
            .map_err(creation_error("command buffer"))?;
        let raw = buffers.into_iter().next().ok_or_else(|| {
            GraphicsError::ResourceCreationFailed("Driver returned no command buffer".into())
        })?;
        Ok(VulkanCommandBuffer {
            pool: Arc::clone(pool),
            raw,
        })
    }

    pub fn reset(&self) -> GraphicsResult<()> {
        unsafe {
            self.device
                .raw()
                .reset_command_pool(self.raw, vk::CommandPoolResetFlags::empty())
        }
        .map_err(|e| GraphicsError::InvalidParameter(format!("Failed to reset command pool: {:?}", e)))
    }
}

impl Drop for VulkanCommandPool {
    fn drop(&mut self) {
        unsafe { self.device.raw().destroy_command_pool(self.raw, None) };
    }
}

pub(crate) struct VulkanCommandBuffer {
    pool: Arc<VulkanCommandPool>,
    raw: vk::CommandBuffer,
}

impl VulkanCommandBuffer {
    pub fn raw(&self) -> vk::CommandBuffer {
        self.raw
    }

    fn device(&self) -> &ash::Device {
        self.pool.device.raw()
    }

    pub fn begin(&mut self) -> GraphicsResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device().begin_command_buffer(self.raw, &begin_info) }.map_err(|e| {
            GraphicsError::InvalidParameter(format!("Failed to begin command buffer: {:?}", e))
        })
    }

    pub fn record(&mut self, command: &RecordedCommand) {
        let device = self.device();
        match command {
            // No pipeline is ever bound, so draws and dispatches are not encoded.
            RecordedCommand::Draw {
                vertex_count,
                instance_count,
            } => {
                log::trace!(
                    "Vulkan: draw {}x{} not encoded (no pipeline bound)",
                    vertex_count,
                    instance_count
                );
            }
            RecordedCommand::Dispatch { x, y, z } => {
                log::trace!("Vulkan: dispatch {}x{}x{} not encoded (no pipeline bound)", x, y, z);
            }
            RecordedCommand::Barrier { .. } => {
                let barrier = vk::MemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
                    .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE);
                unsafe {
                    device.cmd_pipeline_barrier(
                        self.raw,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::PipelineStageFlags::ALL_COMMANDS,
                        vk::DependencyFlags::empty(),
                        &[barrier],
                        &[],
                        &[],
                    )
                }
            }
            RecordedCommand::Marker(label) => {
                log::trace!("Vulkan: marker '{}' (debug utils not loaded)", label);
            }
        }
    }

    pub fn end(&mut self) -> GraphicsResult<()> {
        unsafe { self.device().end_command_buffer(self.raw) }.map_err(|e| {
            GraphicsError::InvalidParameter(format!("Failed to end command buffer: {:?}", e))
        })
    }
}

impl Drop for VulkanCommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.pool
                .device
                .raw()
                .free_command_buffers(self.pool.raw, &[self.raw])
        };
    }
}

pub(crate) struct VulkanBuffer {
    device: Arc<VulkanDevice>,
    raw: vk::Buffer,
    memory: vk::DeviceMemory,
}

impl VulkanBuffer {
    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_buffer(self.raw, None);
            self.device.raw().free_memory(self.memory, None);
        }
    }
}

pub(crate) struct VulkanTexture {
    device: Arc<VulkanDevice>,
    raw: vk::Image,
    memory: vk::DeviceMemory,
}

impl VulkanTexture {
    pub fn raw(&self) -> vk::Image {
        self.raw
    }
}

impl Drop for VulkanTexture {
    fn drop(&mut self) {
        unsafe {
            self.device.raw().destroy_image(self.raw, None);
            self.device.raw().free_memory(self.memory, None);
        }
    }
}
