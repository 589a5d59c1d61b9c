// Per-frame uniform buffers
//
// One persistently mapped buffer per frame in flight. `update` writes the same
// value into every slot; frames in flight only ever read them.

use anyhow::Result;
use ash::vk;
use bytemuck::Pod;
use std::marker::PhantomData;
use std::sync::Arc;

use super::buffer::Buffer;
use super::VulkanDevice;

pub struct UniformBuffer<T: Pod> {
    buffers: Vec<Buffer>,
    _marker: PhantomData<T>,
}

impl<T: Pod> UniformBuffer<T> {
    pub fn new(device: &Arc<VulkanDevice>, max_frames_in_flight: usize) -> Result<Self> {
        let buffers = (0..max_frames_in_flight)
            .map(|_| {
                Buffer::new(
                    device,
                    Self::data_size(),
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    true,
                    "uniform",
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            buffers,
            _marker: PhantomData,
        })
    }

    pub fn data_size() -> vk::DeviceSize {
        std::mem::size_of::<T>() as vk::DeviceSize
    }

    /// Write `value` into every slot
    pub fn update(&mut self, value: &T) -> Result<()> {
        for buffer in &mut self.buffers {
            buffer.set_data(std::slice::from_ref(value))?;
        }
        Ok(())
    }

    pub fn buffer(&self, frame: usize) -> &Buffer {
        &self.buffers[frame]
    }

    pub fn descriptor_info(&self, frame: usize) -> vk::DescriptorBufferInfo {
        self.buffers[frame].descriptor_info()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_size_matches_type() {
        assert_eq!(UniformBuffer::<glam::Mat4>::data_size(), 64);
        assert_eq!(UniformBuffer::<[f32; 4]>::data_size(), 16);
    }

    #[test]
    fn update_skips_empty_slots() {
        let mut uniforms = UniformBuffer::<[f32; 4]> {
            buffers: vec![Buffer::empty(), Buffer::empty()],
            _marker: PhantomData,
        };
        uniforms.update(&[1.0, 0.0, 0.0, 1.0]).unwrap();
        assert_eq!(uniforms.len(), 2);
        assert_eq!(uniforms.descriptor_info(1).range, 0);
    }
}
