// Textures and samplers
//
// RGBA8 textures decoded with the `image` crate, uploaded through a staging
// buffer, optionally mipmapped. Texture arrays are cut from one source image
// laid out as row-major tiles.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;
use std::sync::Arc;

use super::buffer::Buffer;
use super::commands::SingleTimeSubmit;
use super::image::{mip_levels, Image, ImageDesc};
use super::VulkanDevice;
use crate::error::FrameError;

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// Tile grid of a texture array source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayLayout {
    pub tile_width: u32,
    pub tile_height: u32,
    pub layers: u32,
}

impl ArrayLayout {
    /// Check that `width`x`height` splits exactly into tiles and holds at least `layers` of them
    pub fn validate(&self, width: u32, height: u32) -> Result<()> {
        if self.tile_width == 0 || self.tile_height == 0 || self.layers == 0 {
            return Err(FrameError::TextureLayout(format!("empty array layout {:?}", self)).into());
        }
        if width % self.tile_width != 0 || height % self.tile_height != 0 {
            return Err(FrameError::TextureLayout(format!(
                "{}x{} source is not a multiple of {}x{} tiles",
                width, height, self.tile_width, self.tile_height
            ))
            .into());
        }

        let available = (width / self.tile_width) * (height / self.tile_height);
        if available < self.layers {
            return Err(FrameError::TextureLayout(format!(
                "{} layers requested but the source holds {} tiles",
                self.layers, available
            ))
            .into());
        }
        Ok(())
    }
}

pub struct Texture {
    image: Image,
    view: vk::ImageView,
    device: Arc<VulkanDevice>,
}

impl Texture {
    pub fn load<S: SingleTimeSubmit + ?Sized>(
        device: &Arc<VulkanDevice>,
        commands: &S,
        path: impl AsRef<Path>,
        mipmaps: bool,
    ) -> Result<Self> {
        let (pixels, width, height) = decode_rgba(path.as_ref())?;
        Self::from_rgba(device, commands, &pixels, width, height, None, mipmaps)
    }

    pub fn load_array<S: SingleTimeSubmit + ?Sized>(
        device: &Arc<VulkanDevice>,
        commands: &S,
        path: impl AsRef<Path>,
        layout: ArrayLayout,
        mipmaps: bool,
    ) -> Result<Self> {
        let (pixels, width, height) = decode_rgba(path.as_ref())?;
        Self::from_rgba(device, commands, &pixels, width, height, Some(layout), mipmaps)
    }

    /// Upload tightly packed RGBA8 `pixels`
    pub fn from_rgba<S: SingleTimeSubmit + ?Sized>(
        device: &Arc<VulkanDevice>,
        commands: &S,
        pixels: &[u8],
        width: u32,
        height: u32,
        array: Option<ArrayLayout>,
        mipmaps: bool,
    ) -> Result<Self> {
        anyhow::ensure!(
            pixels.len() == (width as usize) * (height as usize) * 4,
            "expected {}x{} RGBA8 texels, got {} bytes",
            width,
            height,
            pixels.len()
        );

        let (tile_width, tile_height, layers) = match array {
            Some(layout) => {
                layout.validate(width, height)?;
                (layout.tile_width, layout.tile_height, layout.layers)
            }
            None => (width, height, 1),
        };
        let levels = if mipmaps {
            mip_levels(tile_width, tile_height)
        } else {
            1
        };

        let staging = Buffer::staging(device, pixels)?;

        let desc = ImageDesc::new(
            tile_width,
            tile_height,
            TEXTURE_FORMAT,
            vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
        )
        .mip_levels(levels)
        .layers(layers);
        let image = Image::new(device, &desc, "texture")?;

        image.transition_layout(
            commands,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        image.copy_from_buffer(commands, &staging, width, height)?;
        // Also handles the single-level case
        image.generate_mipmaps(commands, device.as_ref())?;

        let view = image.create_view(device, vk::ImageAspectFlags::COLOR)?;

        log::debug!(
            "Uploaded {}x{} texture ({} layers, {} mips)",
            tile_width,
            tile_height,
            layers,
            levels
        );

        Ok(Self {
            image,
            view,
            device: device.clone(),
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn image(&self) -> &Image {
        &self.image
    }

    pub fn descriptor_info(&self, sampler: &Sampler) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: sampler.handle(),
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_image_view(self.view, None) };
    }
}

fn decode_rgba(path: &Path) -> Result<(Vec<u8>, u32, u32)> {
    let decoded = ::image::open(path)
        .with_context(|| format!("Failed to load texture {:?}", path))?
        .into_rgba8();
    let (width, height) = decoded.dimensions();
    Ok((decoded.into_raw(), width, height))
}

pub struct Sampler {
    sampler: vk::Sampler,
    device: Arc<VulkanDevice>,
}

impl Sampler {
    /// Repeat-addressed, anisotropic sampler covering `mip_levels` levels
    pub fn new(
        device: &Arc<VulkanDevice>,
        min_filter: vk::Filter,
        mag_filter: vk::Filter,
        mip_levels: u32,
    ) -> Result<Self> {
        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(mag_filter)
            .min_filter(min_filter)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(device.max_sampler_anisotropy())
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(mip_levels as f32);

        let sampler = unsafe { device.device.create_sampler(&create_info, None) }
            .context("Failed to create texture sampler")?;

        Ok(Self {
            sampler,
            device: device.clone(),
        })
    }

    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_sampler(self.sampler, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(tile: u32, layers: u32) -> ArrayLayout {
        ArrayLayout {
            tile_width: tile,
            tile_height: tile,
            layers,
        }
    }

    #[test]
    fn exact_tiling_is_accepted() {
        layout(16, 16).validate(64, 64).unwrap();
        layout(16, 4).validate(64, 16).unwrap();
    }

    #[test]
    fn ragged_source_is_rejected() {
        let err = layout(16, 4).validate(70, 64).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::TextureLayout(_))
        ));
    }

    #[test]
    fn too_many_layers_is_rejected() {
        assert!(layout(16, 17).validate(64, 64).is_err());
    }

    #[test]
    fn zero_tile_is_rejected() {
        assert!(layout(0, 1).validate(64, 64).is_err());
    }
}
