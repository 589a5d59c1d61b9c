// Instanced mesh
//
// Device-local vertex, index and instance buffers plus a host-visible staging
// buffer for per-frame instance uploads.

use anyhow::Result;
use ash::vk;
use bytemuck::Pod;
use std::marker::PhantomData;
use std::sync::Arc;

use super::buffer::Buffer;
use super::commands::SingleTimeSubmit;
use super::vertex::{IndexType, INSTANCE_BINDING, VERTEX_BINDING};
use super::VulkanDevice;

pub struct Model<V: Pod, I: IndexType, D: Pod> {
    vertices: Buffer,
    indices: Buffer,
    instances: Buffer,
    instance_staging: Buffer,
    index_count: u32,
    instance_count: u32,
    max_instances: usize,
    device: Arc<VulkanDevice>,
    _marker: PhantomData<(V, I, D)>,
}

impl<V: Pod, I: IndexType, D: Pod> Model<V, I, D> {
    pub fn new<S: SingleTimeSubmit + ?Sized>(
        device: &Arc<VulkanDevice>,
        commands: &S,
        vertices: &[V],
        indices: &[I],
        max_instances: usize,
    ) -> Result<Self> {
        let instance_bytes = (max_instances * std::mem::size_of::<D>()) as vk::DeviceSize;

        Ok(Self {
            vertices: Buffer::from_vertices(device, commands, vertices)?,
            indices: Buffer::from_indices(device, commands, indices)?,
            instances: Buffer::new(
                device,
                instance_bytes,
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                false,
                "instances",
            )?,
            instance_staging: Buffer::new(
                device,
                instance_bytes,
                vk::BufferUsageFlags::TRANSFER_SRC,
                true,
                "instance staging",
            )?,
            index_count: indices.len() as u32,
            instance_count: 0,
            max_instances,
            device: device.clone(),
            _marker: PhantomData,
        })
    }

    /// Replace the mesh. Waits for the device so no frame still reads the old buffers.
    pub fn update<S: SingleTimeSubmit + ?Sized>(
        &mut self,
        commands: &S,
        vertices: &[V],
        indices: &[I],
    ) -> Result<()> {
        self.device.wait_idle()?;

        self.vertices = Buffer::from_vertices(&self.device, commands, vertices)?;
        self.indices = Buffer::from_indices(&self.device, commands, indices)?;
        self.index_count = indices.len() as u32;
        Ok(())
    }

    /// Upload per-instance data through the staging buffer (blocking copy).
    /// Later draws use exactly `instances.len()` instances.
    pub fn set_instances<S: SingleTimeSubmit + ?Sized>(&mut self, commands: &S, instances: &[D]) -> Result<()> {
        anyhow::ensure!(
            instances.len() <= self.max_instances,
            "{} instances exceed the model capacity of {}",
            instances.len(),
            self.max_instances
        );

        self.instance_staging.set_data(instances)?;
        self.instance_staging.copy_to(commands, &self.instances)?;
        self.instance_count = instances.len() as u32;
        Ok(())
    }

    /// Bind vertex (slot 0), instance (slot 1) and index buffers and draw.
    /// Nothing is recorded for an empty model or before any instances are set.
    pub fn draw(&self, cmd: vk::CommandBuffer) {
        if !is_drawable(
            [&self.vertices, &self.indices, &self.instances],
            self.index_count,
            self.instance_count,
        ) {
            return;
        }

        let device = &self.device.device;
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, VERTEX_BINDING, &[self.vertices.handle()], &[0]);
            device.cmd_bind_vertex_buffers(cmd, INSTANCE_BINDING, &[self.instances.handle()], &[0]);
            device.cmd_bind_index_buffer(cmd, self.indices.handle(), 0, I::VK_TYPE);
            device.cmd_draw_indexed(cmd, self.index_count, self.instance_count, 0, 0, 0);
        }
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Instances uploaded by the last `set_instances`
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    pub fn max_instances(&self) -> usize {
        self.max_instances
    }
}

fn is_drawable(buffers: [&Buffer; 3], index_count: u32, instance_count: u32) -> bool {
    index_count > 0 && instance_count > 0 && buffers.iter().all(|buffer| !buffer.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffers_are_not_drawn() {
        let empty = Buffer::empty();
        assert!(!is_drawable([&empty, &empty, &empty], 6, 4));
    }

    #[test]
    fn zero_instances_are_not_drawn() {
        let full = Buffer::unbacked(64);
        assert!(!is_drawable([&full, &full, &full], 6, 0));
        assert!(is_drawable([&full, &full, &full], 6, 1));
    }

    #[test]
    fn zero_indices_are_not_drawn() {
        let full = Buffer::unbacked(64);
        assert!(!is_drawable([&full, &full, &full], 0, 4));
    }

    #[test]
    fn any_empty_buffer_blocks_the_draw() {
        let full = Buffer::unbacked(64);
        let empty = Buffer::empty();
        assert!(!is_drawable([&full, &full, &empty], 6, 4));
        assert!(!is_drawable([&empty, &full, &full], 6, 4));
    }
}
