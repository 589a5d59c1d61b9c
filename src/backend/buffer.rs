// Buffer management
//
// Allocation-backed GPU buffers. Host-visible buffers are persistently mapped;
// device-local buffers are filled through a staging copy.
// A zero-sized buffer is the "unused slot" sentinel: every operation is a no-op.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::Arc;

use super::commands::SingleTimeSubmit;
use super::vertex::IndexType;
use super::VulkanDevice;
use crate::error::FrameError;

#[derive(Default)]
pub struct Buffer {
    device: Option<Arc<VulkanDevice>>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
}

impl Buffer {
    /// The zero-sized sentinel
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a buffer of `size` bytes. `host_visible` buffers are mapped for their whole lifetime.
    pub fn new(
        device: &Arc<VulkanDevice>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        host_visible: bool,
        name: &str,
    ) -> Result<Self> {
        if size == 0 {
            return Ok(Self::empty());
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .map_err(|e| FrameError::allocation(format!("create buffer '{name}'"), e))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };
        let location = if host_visible {
            MemoryLocation::CpuToGpu
        } else {
            MemoryLocation::GpuOnly
        };

        let allocation = match device.allocate(name, requirements, location, true) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            device.free(allocation);
            unsafe { device.device.destroy_buffer(buffer, None) };
            return Err(FrameError::allocation(format!("bind memory of buffer '{name}'"), e).into());
        }

        Ok(Self {
            device: Some(device.clone()),
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    /// Host-visible transfer source holding `bytes`
    pub fn staging(device: &Arc<VulkanDevice>, bytes: &[u8]) -> Result<Self> {
        let mut staging = Self::new(
            device,
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            true,
            "staging",
        )?;
        staging.set_data(bytes)?;
        Ok(staging)
    }

    /// Device-local buffer filled from `data` through a staging copy
    pub fn from_data<T: Pod, S: SingleTimeSubmit + ?Sized>(
        device: &Arc<VulkanDevice>,
        commands: &S,
        usage: vk::BufferUsageFlags,
        data: &[T],
        name: &str,
    ) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.is_empty() {
            return Ok(Self::empty());
        }

        let staging = Self::staging(device, bytes)?;
        let buffer = Self::new(
            device,
            bytes.len() as vk::DeviceSize,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            false,
            name,
        )?;
        staging.copy_to(commands, &buffer)?;

        Ok(buffer)
    }

    pub fn from_vertices<V: Pod, S: SingleTimeSubmit + ?Sized>(
        device: &Arc<VulkanDevice>,
        commands: &S,
        vertices: &[V],
    ) -> Result<Self> {
        Self::from_data(
            device,
            commands,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            vertices,
            "vertices",
        )
    }

    pub fn from_indices<I: IndexType, S: SingleTimeSubmit + ?Sized>(
        device: &Arc<VulkanDevice>,
        commands: &S,
        indices: &[I],
    ) -> Result<Self> {
        Self::from_data(
            device,
            commands,
            vk::BufferUsageFlags::INDEX_BUFFER,
            indices,
            "indices",
        )
    }

    /// Copy `data` into the mapped memory of a host-visible buffer
    pub fn set_data<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        if self.size == 0 {
            return Ok(());
        }

        let bytes: &[u8] = bytemuck::cast_slice(data);
        anyhow::ensure!(
            bytes.len() as vk::DeviceSize <= self.size,
            "writing {} bytes into a {} byte buffer",
            bytes.len(),
            self.size
        );

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("set_data requires a host-visible buffer")?;
        mapped[..bytes.len()].copy_from_slice(bytes);

        Ok(())
    }

    /// Persistent mapping of a host-visible buffer, `None` for empty or device-local buffers
    pub fn map(&self) -> Option<NonNull<c_void>> {
        if self.size == 0 {
            return None;
        }
        self.allocation.as_ref()?.mapped_ptr()
    }

    /// Blocking copy of `min(self.size, dst.size)` bytes into `dst`
    pub fn copy_to<S: SingleTimeSubmit + ?Sized>(&self, commands: &S, dst: &Buffer) -> Result<()> {
        if self.size == 0 || dst.size == 0 {
            return Ok(());
        }

        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: self.size.min(dst.size),
        };
        let (src, dst) = (self.buffer, dst.buffer);

        commands.submit_single_time(&mut |device, cmd| unsafe {
            device.cmd_copy_buffer(cmd, src, dst, &[region]);
        })
    }

    /// Release the buffer and its memory. Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.size == 0 {
            return;
        }

        if let Some(device) = self.device.take() {
            if let Some(allocation) = self.allocation.take() {
                device.free(allocation);
            }
            unsafe { device.device.destroy_buffer(self.buffer, None) };
        }

        self.buffer = vk::Buffer::null();
        self.size = 0;
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Non-empty buffer with no device handles behind it
    #[cfg(test)]
    pub(crate) fn unbacked(size: vk::DeviceSize) -> Self {
        Self {
            device: None,
            buffer: vk::Buffer::null(),
            allocation: None,
            size,
        }
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    /// Counts submissions without touching a device
    #[derive(Default)]
    struct CountingSubmit {
        submissions: Cell<usize>,
    }

    impl SingleTimeSubmit for CountingSubmit {
        fn submit_single_time(
            &self,
            _record: &mut dyn FnMut(&ash::Device, vk::CommandBuffer),
        ) -> Result<()> {
            self.submissions.set(self.submissions.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn zero_size_buffer_ignores_every_operation() {
        let submit = CountingSubmit::default();
        let mut buffer = Buffer::empty();
        let other = Buffer::empty();

        buffer.set_data(&[1u32, 2, 3]).unwrap();
        assert!(buffer.map().is_none());
        buffer.copy_to(&submit, &other).unwrap();
        buffer.destroy();
        buffer.destroy();

        assert_eq!(submit.submissions.get(), 0);
        assert!(buffer.is_empty());
        assert_eq!(buffer.handle(), vk::Buffer::null());
    }

    #[test]
    fn copy_into_empty_destination_is_skipped() {
        let submit = CountingSubmit::default();
        let src = Buffer::unbacked(64);

        src.copy_to(&submit, &Buffer::empty()).unwrap();
        assert_eq!(submit.submissions.get(), 0);

        src.copy_to(&submit, &Buffer::unbacked(32)).unwrap();
        assert_eq!(submit.submissions.get(), 1);
    }

    #[test]
    fn set_data_rejects_unmapped_buffers() {
        let mut buffer = Buffer::unbacked(16);
        let err = buffer.set_data(&[0u8; 16]).unwrap_err();
        assert!(err.to_string().contains("host-visible"));
    }

    #[test]
    fn set_data_rejects_oversized_writes() {
        let mut buffer = Buffer::unbacked(4);
        assert!(buffer.set_data(&[0u32; 2]).is_err());
    }

    #[test]
    fn unbacked_buffer_drops_without_a_device() {
        let mut buffer = Buffer::unbacked(128);
        assert!(!buffer.is_empty());
        buffer.destroy();
        assert!(buffer.is_empty());
    }

    #[test]
    fn descriptor_info_spans_whole_buffer() {
        let info = Buffer::unbacked(256).descriptor_info();
        assert_eq!(info.offset, 0);
        assert_eq!(info.range, 256);
    }
}
