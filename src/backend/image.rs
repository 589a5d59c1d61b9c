// Image management
//
// Allocation-backed images (textures, attachments) and non-owned wrappers
// around swapchain images. Transfer helpers record through SingleTimeSubmit.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::Allocation;
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::buffer::Buffer;
use super::commands::SingleTimeSubmit;
use super::device::FormatSupport;
use super::VulkanDevice;
use crate::error::FrameError;

/// `floor(log2(max(width, height))) + 1`
pub fn mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Extent of every mip level, base level first
pub fn mip_chain(width: u32, height: u32, levels: u32) -> Vec<(u32, u32)> {
    let (mut w, mut h) = (width.max(1), height.max(1));
    let mut chain = Vec::with_capacity(levels as usize);
    for _ in 0..levels {
        chain.push((w, h));
        w = (w / 2).max(1);
        h = (h / 2).max(1);
    }
    chain
}

/// Copy regions for a texture array packed as row-major tiles in one RGBA8 source image.
///
/// Layer `i` comes from tile `(i % tiles_per_row, i / tiles_per_row)`.
pub fn layer_copy_regions(
    width: u32,
    height: u32,
    layers: u32,
    full_width: u32,
    full_height: u32,
) -> Vec<vk::BufferImageCopy> {
    let tiles_per_row = (full_width / width.max(1)).max(1);

    (0..layers)
        .map(|layer| {
            let x = (layer % tiles_per_row) as vk::DeviceSize;
            let y = (layer / tiles_per_row) as vk::DeviceSize;
            let texel = x * width as vk::DeviceSize + y * height as vk::DeviceSize * full_width as vk::DeviceSize;

            vk::BufferImageCopy {
                buffer_offset: texel * 4,
                buffer_row_length: full_width,
                buffer_image_height: full_height,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: layer,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
            }
        })
        .collect()
}

/// Access masks and stages for a supported layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

pub fn layout_transition(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<LayoutTransition> {
    use vk::ImageLayout as L;

    let transition = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => LayoutTransition {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => LayoutTransition {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
        (L::UNDEFINED, L::SHADER_READ_ONLY_OPTIMAL) => LayoutTransition {
            src_access: vk::AccessFlags::HOST_WRITE | vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::ALL_COMMANDS,
            dst_stage: vk::PipelineStageFlags::ALL_COMMANDS,
        },
        _ => {
            return Err(FrameError::TextureLayout(format!(
                "unsupported layout transition {old:?} -> {new:?}"
            ))
            .into())
        }
    };

    Ok(transition)
}

/// Creation parameters for an owned image
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub mip_levels: u32,
    pub layers: u32,
    pub samples: vk::SampleCountFlags,
    pub tiling: vk::ImageTiling,
}

impl ImageDesc {
    pub fn new(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            mip_levels: 1,
            layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
        }
    }

    pub fn mip_levels(mut self, levels: u32) -> Self {
        self.mip_levels = levels.max(1);
        self
    }

    pub fn layers(mut self, layers: u32) -> Self {
        self.layers = layers.max(1);
        self
    }

    pub fn samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }
}

pub struct Image {
    // None for images owned by someone else (swapchain)
    device: Option<Arc<VulkanDevice>>,
    image: vk::Image,
    allocation: Option<Allocation>,
    format: vk::Format,
    width: u32,
    height: u32,
    mip_levels: u32,
    layers: u32,
}

impl Image {
    pub fn new(device: &Arc<VulkanDevice>, desc: &ImageDesc, name: &str) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: 1,
            })
            .mip_levels(desc.mip_levels.max(1))
            .array_layers(desc.layers.max(1))
            .format(desc.format)
            .tiling(desc.tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(desc.samples);

        let image = unsafe { device.device.create_image(&create_info, None) }
            .map_err(|e| FrameError::allocation(format!("create image '{name}'"), e))?;

        let requirements = unsafe { device.device.get_image_memory_requirements(image) };
        let allocation = match device.allocate(
            name,
            requirements,
            MemoryLocation::GpuOnly,
            desc.tiling == vk::ImageTiling::LINEAR,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            device
                .device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        } {
            device.free(allocation);
            unsafe { device.device.destroy_image(image, None) };
            return Err(FrameError::allocation(format!("bind memory of image '{name}'"), e).into());
        }

        Ok(Self {
            device: Some(device.clone()),
            image,
            allocation: Some(allocation),
            format: desc.format,
            width: desc.width,
            height: desc.height,
            mip_levels: desc.mip_levels.max(1),
            layers: desc.layers.max(1),
        })
    }

    /// Wrap an image whose memory belongs to the swapchain
    pub fn from_swapchain(image: vk::Image, format: vk::Format, extent: vk::Extent2D) -> Self {
        Self {
            device: None,
            image,
            allocation: None,
            format,
            width: extent.width,
            height: extent.height,
            mip_levels: 1,
            layers: 1,
        }
    }

    pub fn view_type(&self) -> vk::ImageViewType {
        if self.layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        }
    }

    fn subresource_range(&self, aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.layers,
        }
    }

    /// View over every mip level and layer. The caller owns the returned view.
    pub fn create_view(&self, device: &VulkanDevice, aspect: vk::ImageAspectFlags) -> Result<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(self.view_type())
            .format(self.format)
            .components(vk::ComponentMapping::default())
            .subresource_range(self.subresource_range(aspect));

        let view = unsafe { device.device.create_image_view(&create_info, None) }
            .context("Failed to create image view")?;
        Ok(view)
    }

    pub fn transition_layout<S: SingleTimeSubmit + ?Sized>(
        &self,
        commands: &S,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> Result<()> {
        let transition = layout_transition(old, new)?;
        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old)
            .new_layout(new)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.subresource_range(vk::ImageAspectFlags::COLOR))
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access);

        commands.submit_single_time(&mut |device, cmd| unsafe {
            device.cmd_pipeline_barrier(
                cmd,
                transition.src_stage,
                transition.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        })
    }

    /// Copy RGBA8 texels from `src` into every layer of mip 0.
    ///
    /// `full_width`/`full_height` are the source image dimensions; they equal
    /// the image size for plain textures and span all tiles for arrays.
    pub fn copy_from_buffer<S: SingleTimeSubmit + ?Sized>(
        &self,
        commands: &S,
        src: &Buffer,
        full_width: u32,
        full_height: u32,
    ) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }

        let regions = layer_copy_regions(self.width, self.height, self.layers, full_width, full_height);
        let (buffer, image) = (src.handle(), self.image);

        commands.submit_single_time(&mut |device, cmd| unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &regions,
            );
        })
    }

    /// Fill mip levels 1.. by successive linear blits and leave every level SHADER_READ_ONLY.
    ///
    /// Expects all levels in TRANSFER_DST_OPTIMAL with level 0 populated.
    pub fn generate_mipmaps<S, Q>(&self, commands: &S, formats: &Q) -> Result<()>
    where
        S: SingleTimeSubmit + ?Sized,
        Q: FormatSupport + ?Sized,
    {
        let props = formats.format_properties(self.format);
        if self.mip_levels > 1
            && !props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            return Err(FrameError::UnsupportedFormat(vec![self.format]))
                .context("format does not support linear blitting");
        }

        let image = self.image;
        let layers = self.layers;
        let chain = mip_chain(self.width, self.height, self.mip_levels);

        commands.submit_single_time(&mut |device, cmd| {
            let barrier = |level: u32,
                           old: vk::ImageLayout,
                           new: vk::ImageLayout,
                           src_access: vk::AccessFlags,
                           dst_access: vk::AccessFlags| {
                vk::ImageMemoryBarrier::default()
                    .image(image)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: level,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: layers,
                    })
                    .old_layout(old)
                    .new_layout(new)
                    .src_access_mask(src_access)
                    .dst_access_mask(dst_access)
            };

            for level in 1..chain.len() {
                let (src_w, src_h) = chain[level - 1];
                let (dst_w, dst_h) = chain[level];
                let src_level = (level - 1) as u32;

                let to_src = barrier(
                    src_level,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::AccessFlags::TRANSFER_WRITE,
                    vk::AccessFlags::TRANSFER_READ,
                );

                let blit = vk::ImageBlit::default()
                    .src_offsets([
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: src_w as i32,
                            y: src_h as i32,
                            z: 1,
                        },
                    ])
                    .src_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: src_level,
                        base_array_layer: 0,
                        layer_count: layers,
                    })
                    .dst_offsets([
                        vk::Offset3D::default(),
                        vk::Offset3D {
                            x: dst_w as i32,
                            y: dst_h as i32,
                            z: 1,
                        },
                    ])
                    .dst_subresource(vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: level as u32,
                        base_array_layer: 0,
                        layer_count: layers,
                    });

                let to_shader = barrier(
                    src_level,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    vk::AccessFlags::TRANSFER_READ,
                    vk::AccessFlags::SHADER_READ,
                );

                unsafe {
                    device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[to_src],
                    );
                    device.cmd_blit_image(
                        cmd,
                        image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[blit],
                        vk::Filter::LINEAR,
                    );
                    device.cmd_pipeline_barrier(
                        cmd,
                        vk::PipelineStageFlags::TRANSFER,
                        vk::PipelineStageFlags::FRAGMENT_SHADER,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[to_shader],
                    );
                }
            }

            // Last level was only ever written to
            let last = barrier(
                (chain.len() - 1) as u32,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
            );
            unsafe {
                device.cmd_pipeline_barrier(
                    cmd,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[last],
                );
            }
        })
    }

    pub fn destroy(&mut self) {
        if let Some(device) = self.device.take() {
            if let Some(allocation) = self.allocation.take() {
                device.free(allocation);
            }
            unsafe { device.device.destroy_image(self.image, None) };
        }
        self.image = vk::Image::null();
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    pub fn mip_level_count(&self) -> u32 {
        self.mip_levels
    }

    pub fn layer_count(&self) -> u32 {
        self.layers
    }

    pub fn is_owned(&self) -> bool {
        self.allocation.is_some()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.destroy();
    }
}
