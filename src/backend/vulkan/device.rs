//! Vulkan instance, physical device and logical device management.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::error::{GraphicsError, GraphicsResult};

/// Raw handles of one entry of a batched submission.
pub(crate) struct VulkanSubmission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub signal_semaphores: Vec<vk::Semaphore>,
}

/// A headless Vulkan device with one graphics queue.
///
/// Owns the instance and logical device; every other Vulkan object holds an
/// `Arc` to it, so the device is destroyed last.
pub(crate) struct VulkanDevice {
    _entry: ash::Entry,
    instance: ash::Instance,
    device: ash::Device,
    queue_family: u32,
    /// Queue submission requires external synchronization.
    queue: Mutex<vk::Queue>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    name: String,
}

impl VulkanDevice {
    pub fn new() -> GraphicsResult<Arc<Self>> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::BackendUnavailable(format!("Failed to load Vulkan: {}", e))
        })?;

        let app_name = c"frame-graph";
        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name)
            .engine_name(app_name)
            .api_version(vk::API_VERSION_1_2);
        let instance_info = vk::InstanceCreateInfo::default().application_info(&app_info);
        let instance = unsafe { entry.create_instance(&instance_info, None) }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to create instance: {:?}", e))
        })?;

        match Self::open_device(&instance) {
            Ok((device, queue_family, memory_properties, name)) => {
                let queue = unsafe { device.get_device_queue(queue_family, 0) };
                log::info!(
                    "Vulkan device initialized: {} (queue family {})",
                    name,
                    queue_family
                );
                Ok(Arc::new(Self {
                    _entry: entry,
                    instance,
                    device,
                    queue_family,
                    queue: Mutex::new(queue),
                    memory_properties,
                    name,
                }))
            }
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                Err(e)
            }
        }
    }

    fn open_device(
        instance: &ash::Instance,
    ) -> GraphicsResult<(ash::Device, u32, vk::PhysicalDeviceMemoryProperties, String)> {
        let physical_devices = unsafe { instance.enumerate_physical_devices() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!(
                "Failed to enumerate physical devices: {:?}",
                e
            ))
        })?;

        let (physical_device, queue_family) = physical_devices
            .iter()
            .find_map(|&physical_device| {
                let families = unsafe {
                    instance.get_physical_device_queue_family_properties(physical_device)
                };
                families
                    .iter()
                    .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                    .map(|index| (physical_device, index as u32))
            })
            .ok_or_else(|| {
                GraphicsError::BackendUnavailable(
                    "No Vulkan device with a graphics queue found".to_string(),
                )
            })?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let queue_priorities = [1.0f32];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family)
            .queue_priorities(&queue_priorities)];
        let create_info = vk::DeviceCreateInfo::default().queue_create_infos(&queue_create_infos);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .map_err(|e| {
                GraphicsError::InitializationFailed(format!(
                    "Failed to create logical device: {:?}",
                    e
                ))
            })?;

        Ok((device, queue_family, memory_properties, name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue_family(&self) -> u32 {
        self.queue_family
    }

    pub(super) fn raw(&self) -> &ash::Device {
        &self.device
    }

    /// Find a memory type allowed by `type_bits` that has all of `flags`.
    pub(super) fn find_memory_type(
        &self,
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        let properties = &self.memory_properties;
        (0..properties.memory_type_count).find(|&index| {
            type_bits & (1 << index) != 0
                && properties.memory_types[index as usize]
                    .property_flags
                    .contains(flags)
        })
    }

    /// Submit the whole batch with a single `vkQueueSubmit`.
    pub fn submit(&self, batch: &[VulkanSubmission], fence: vk::Fence) -> GraphicsResult<()> {
        let wait_stages: Vec<Vec<vk::PipelineStageFlags>> = batch
            .iter()
            .map(|s| vec![vk::PipelineStageFlags::ALL_COMMANDS; s.wait_semaphores.len()])
            .collect();
        let command_buffers: Vec<[vk::CommandBuffer; 1]> =
            batch.iter().map(|s| [s.command_buffer]).collect();
        let submit_infos: Vec<vk::SubmitInfo<'_>> = batch
            .iter()
            .zip(&wait_stages)
            .zip(&command_buffers)
            .map(|((submission, stages), buffers)| {
                vk::SubmitInfo::default()
                    .wait_semaphores(&submission.wait_semaphores)
                    .wait_dst_stage_mask(stages)
                    .command_buffers(buffers)
                    .signal_semaphores(&submission.signal_semaphores)
            })
            .collect();

        let queue = self.queue.lock();
        unsafe { self.device.queue_submit(*queue, &submit_infos, fence) }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
            e => GraphicsError::SubmissionFailed(format!("Failed to submit: {:?}", e)),
        })
    }

    pub fn wait_idle(&self) -> GraphicsResult<()> {
        let _queue = self.queue.lock();
        unsafe { self.device.device_wait_idle() }.map_err(|e| match e {
            vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
            e => GraphicsError::FenceWaitFailed(format!("Failed to wait for idle: {:?}", e)),
        })
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        log::info!("Vulkan device destroyed");
    }
}
