// Command pool and buffers
//
// One reusable primary buffer per in-flight slot, plus blocking
// single-time buffers for setup transfers.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Records and submits a one-shot command buffer, blocking until the queue is idle.
///
/// Transfer helpers on buffers and images are generic over this so they
/// can run against a recording stub in tests.
pub trait SingleTimeSubmit {
    fn submit_single_time(
        &self,
        record: &mut dyn FnMut(&ash::Device, vk::CommandBuffer),
    ) -> Result<()>;
}

pub struct Commands {
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    device: Arc<VulkanDevice>,
}

impl Commands {
    pub fn new(device: Arc<VulkanDevice>, max_frames_in_flight: usize) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families.graphics)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(max_frames_in_flight as u32);

        let buffers = match unsafe { device.device.allocate_command_buffers(&alloc_info) } {
            Ok(buffers) => buffers,
            Err(e) => {
                unsafe { device.device.destroy_command_pool(pool, None) };
                return Err(e).context("Failed to allocate frame command buffers");
            }
        };

        log::debug!("Allocated {} frame command buffers", buffers.len());

        Ok(Self {
            pool,
            buffers,
            device,
        })
    }

    /// Command buffer owned by in-flight slot `frame`
    pub fn buffer(&self, frame: usize) -> vk::CommandBuffer {
        self.buffers[frame]
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn reset(&self, frame: usize) -> Result<()> {
        unsafe {
            self.device
                .device
                .reset_command_buffer(self.buffers[frame], vk::CommandBufferResetFlags::empty())
        }
        .context("Failed to reset command buffer")?;
        Ok(())
    }

    pub fn begin(&self, frame: usize) -> Result<vk::CommandBuffer> {
        let cmd = self.buffers[frame];
        let begin_info = vk::CommandBufferBeginInfo::default();
        unsafe { self.device.device.begin_command_buffer(cmd, &begin_info) }
            .context("Failed to begin command buffer")?;
        Ok(cmd)
    }

    pub fn end(&self, frame: usize) -> Result<()> {
        unsafe { self.device.device.end_command_buffer(self.buffers[frame]) }
            .context("Failed to end command buffer")?;
        Ok(())
    }

    /// Allocate and begin a one-time-submit buffer
    pub fn begin_single_time(&self) -> Result<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let cmd = unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate single-time command buffer")?[0];

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        if let Err(e) = unsafe { self.device.device.begin_command_buffer(cmd, &begin_info) } {
            unsafe { self.device.device.free_command_buffers(self.pool, &[cmd]) };
            return Err(e).context("Failed to begin single-time command buffer");
        }

        Ok(cmd)
    }

    /// End, submit and wait for `cmd`, then free it
    pub fn end_single_time(&self, cmd: vk::CommandBuffer) -> Result<()> {
        let device = &self.device.device;
        let command_buffers = [cmd];

        let result = unsafe {
            device.end_command_buffer(cmd).and_then(|()| {
                let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
                device.queue_submit(
                    self.device.graphics_queue,
                    &[submit_info],
                    vk::Fence::null(),
                )?;
                device.queue_wait_idle(self.device.graphics_queue)
            })
        };

        unsafe { device.free_command_buffers(self.pool, &command_buffers) };

        result.context("Single-time command submission failed")?;
        Ok(())
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }
}

impl SingleTimeSubmit for Commands {
    fn submit_single_time(
        &self,
        record: &mut dyn FnMut(&ash::Device, vk::CommandBuffer),
    ) -> Result<()> {
        let cmd = self.begin_single_time()?;
        record(&self.device.device, cmd);
        self.end_single_time(cmd)
    }
}

impl Drop for Commands {
    fn drop(&mut self) {
        unsafe {
            // Also frees the frame buffers
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}
