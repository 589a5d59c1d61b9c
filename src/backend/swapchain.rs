// Swapchain - Window presentation
//
// Negotiates format, present mode, extent and image count with the surface.
// Resizing always destroys and rebuilds the whole chain.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::QueueFamilies;
use super::image::Image;
use super::VulkanDevice;
use crate::error::FrameError;

/// Result of acquiring the next swapchain image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Ready { image_index: u32, suboptimal: bool },
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// Prefer B8G8R8A8_SRGB / SRGB_NONLINEAR, otherwise whatever the surface lists first
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// `preferred` when supported, otherwise FIFO (always available)
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent when defined, else the window size clamped to the surface bounds
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum (0 means unbounded)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Concurrent sharing only when graphics and present live on different families
pub fn sharing_mode(families: &QueueFamilies) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (vk::SharingMode::CONCURRENT, families.unique())
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub images: Vec<Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    preferred_present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        width: u32,
        height: u32,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> Result<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(&device.instance, &device.device);

        let mut swapchain = Self {
            swapchain: vk::SwapchainKHR::null(),
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            preferred_present_mode,
            device,
        };
        swapchain.create(width, height)?;
        Ok(swapchain)
    }

    fn create(&mut self, width: u32, height: u32) -> Result<()> {
        let device = &self.device;

        let surface_caps = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_capabilities(device.physical_device, device.surface)
        }
        .context("Failed to query surface capabilities")?;

        let formats = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_formats(device.physical_device, device.surface)
        }
        .context("Failed to query surface formats")?;

        let present_modes = unsafe {
            device
                .surface_loader
                .get_physical_device_surface_present_modes(device.physical_device, device.surface)
        }
        .context("Failed to query present modes")?;

        let surface_format = choose_surface_format(&formats)
            .ok_or_else(|| FrameError::UnsupportedFormat(Vec::new()))
            .context("Surface reports no formats")?;
        let present_mode = choose_present_mode(&present_modes, self.preferred_present_mode);
        let extent = choose_extent(&surface_caps, width, height);
        let image_count = choose_image_count(&surface_caps);
        let (sharing, family_indices) = sharing_mode(&device.queue_families);

        log::info!(
            "Creating swapchain: {}x{}, {:?}, {} images",
            extent.width,
            extent.height,
            present_mode,
            image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing)
            .queue_family_indices(&family_indices)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let handles = unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .context("Failed to get swapchain images")?;

        self.swapchain = swapchain;
        self.format = surface_format.format;
        self.extent = extent;
        self.present_mode = present_mode;
        self.images = handles
            .into_iter()
            .map(|handle| Image::from_swapchain(handle, surface_format.format, extent))
            .collect();

        for image in &self.images {
            let view = image.create_view(device, vk::ImageAspectFlags::COLOR)?;
            self.image_views.push(view);
        }

        log::debug!("Created swapchain with {} images", self.images.len());
        Ok(())
    }

    fn destroy(&mut self) {
        unsafe {
            for view in self.image_views.drain(..) {
                self.device.device.destroy_image_view(view, None);
            }
            self.images.clear();
            if self.swapchain != vk::SwapchainKHR::null() {
                self.swapchain_loader.destroy_swapchain(self.swapchain, None);
                self.swapchain = vk::SwapchainKHR::null();
            }
        }
    }

    /// Wait for the device, destroy the chain and build a new one for `width`x`height`
    pub fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        self.device.wait_idle()?;
        self.destroy();
        self.create(width, height)
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(FrameError::Surface(e)).context("Failed to acquire swapchain image"),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(FrameError::Surface(e)).context("Failed to present swapchain image"),
        }
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            min_image_count: 2,
            ..Default::default()
        }
    }

    #[test]
    fn defined_current_extent_is_used_verbatim() {
        let caps = caps((800, 600), (1, 1), (400, 400));
        let extent = choose_extent(&caps, 1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn undefined_extent_is_clamped() {
        let caps = caps((u32::MAX, u32::MAX), (64, 64), (1024, 768));

        for (w, h) in [(1, 1), (500, 500), (4000, 4000), (10, 2000)] {
            let extent = choose_extent(&caps, w, h);
            assert!((64..=1024).contains(&extent.width));
            assert!((64..=768).contains(&extent.height));
        }

        let inside = choose_extent(&caps, 500, 300);
        assert_eq!((inside.width, inside.height), (500, 300));
        let outside = choose_extent(&caps, 4000, 10);
        assert_eq!((outside.width, outside.height), (1024, 64));
    }

    #[test]
    fn unbounded_max_image_count() {
        let mut caps = caps((800, 600), (1, 1), (800, 600));
        caps.min_image_count = 2;
        caps.max_image_count = 0;
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
    }

    #[test]
    fn srgb_format_preferred() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        assert_eq!(choose_surface_format(&[unorm, srgb]).unwrap().format, srgb.format);
        assert_eq!(choose_surface_format(&[unorm]).unwrap().format, unorm.format);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let available = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(
            choose_present_mode(&available, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn sharing_mode_follows_queue_families() {
        let shared = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        assert_eq!(sharing_mode(&shared), (vk::SharingMode::EXCLUSIVE, vec![]));

        let split = QueueFamilies {
            graphics: 0,
            present: 2,
        };
        assert_eq!(sharing_mode(&split), (vk::SharingMode::CONCURRENT, vec![0, 2]));
    }
}
