// Render target pass
//
// Owns a render pass, one framebuffer per swapchain image, and whatever
// attachment images an `AttachmentSetup` allocates. The render pass is built
// once; framebuffers and attachments are rebuilt against every new extent.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::image::{Image, ImageDesc};
use super::swapchain::Swapchain;
use super::VulkanDevice;

/// Attachment configuration of a render pass.
///
/// `create_render_pass` runs once. `recreate` and `cleanup` bracket every
/// resize, and `framebuffer_attachments` is asked for the ordered attachment
/// list of each framebuffer.
pub trait AttachmentSetup {
    fn create_render_pass(
        &mut self,
        device: &VulkanDevice,
        swapchain_format: vk::Format,
    ) -> Result<vk::RenderPass>;

    /// Allocate attachment images sized to `extent`
    fn recreate(&mut self, device: &Arc<VulkanDevice>, extent: vk::Extent2D) -> Result<()>;

    /// Release attachment images
    fn cleanup(&mut self);

    /// Append the attachments of the framebuffer wrapping `swapchain_view`
    fn framebuffer_attachments(&self, swapchain_view: vk::ImageView, attachments: &mut Vec<vk::ImageView>);

    /// Sample count pipelines targeting this pass must use
    fn samples(&self) -> vk::SampleCountFlags {
        vk::SampleCountFlags::TYPE_1
    }
}

/// An image plus a view over it, destroyed together
pub struct AttachmentImage {
    view: vk::ImageView,
    image: Image,
    device: Arc<VulkanDevice>,
}

impl AttachmentImage {
    pub fn new(
        device: &Arc<VulkanDevice>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
        samples: vk::SampleCountFlags,
    ) -> Result<Self> {
        let desc = ImageDesc::new(extent.width, extent.height, format, usage).samples(samples);
        let image = Image::new(device, &desc, "attachment")?;
        let view = image.create_view(device, aspect)?;

        Ok(Self {
            view,
            image,
            device: device.clone(),
        })
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn image(&self) -> &Image {
        &self.image
    }
}

impl Drop for AttachmentImage {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_image_view(self.view, None) };
    }
}

/// Attachment descriptions for one color target with optional depth.
///
/// With more than one sample the color attachment is multisampled and a
/// single-sample resolve attachment (the swapchain image) comes last.
pub fn standard_attachment_descriptions(
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
    samples: vk::SampleCountFlags,
) -> Vec<vk::AttachmentDescription> {
    let msaa = samples != vk::SampleCountFlags::TYPE_1;

    let mut attachments = vec![vk::AttachmentDescription::default()
        .format(color_format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(if msaa {
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        } else {
            vk::ImageLayout::PRESENT_SRC_KHR
        })];

    if let Some(depth_format) = depth_format {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(samples)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        );
    }

    if msaa {
        attachments.push(
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::DONT_CARE)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
        );
    }

    attachments
}

/// Framebuffer attachment order matching `standard_attachment_descriptions`
pub fn standard_attachment_order(
    swapchain_view: vk::ImageView,
    msaa_color_view: Option<vk::ImageView>,
    depth_view: Option<vk::ImageView>,
    attachments: &mut Vec<vk::ImageView>,
) {
    attachments.push(msaa_color_view.unwrap_or(swapchain_view));
    attachments.extend(depth_view);
    if msaa_color_view.is_some() {
        attachments.push(swapchain_view);
    }
}

/// Single color target (MSAA-resolved when requested and available) with optional depth
pub struct StandardAttachments {
    color_format: vk::Format,
    depth_format: Option<vk::Format>,
    samples: vk::SampleCountFlags,
    color: Option<AttachmentImage>,
    depth: Option<AttachmentImage>,
}

impl StandardAttachments {
    pub fn new(device: &VulkanDevice, depth: bool, msaa: bool) -> Result<Self> {
        let depth_format = if depth {
            Some(device.find_depth_format()?)
        } else {
            None
        };
        let samples = if msaa {
            device.max_usable_sample_count()
        } else {
            vk::SampleCountFlags::TYPE_1
        };

        Ok(Self::with_formats(depth_format, samples))
    }

    pub fn with_formats(depth_format: Option<vk::Format>, samples: vk::SampleCountFlags) -> Self {
        Self {
            color_format: vk::Format::UNDEFINED,
            depth_format,
            samples,
            color: None,
            depth: None,
        }
    }

    pub fn is_msaa(&self) -> bool {
        self.samples != vk::SampleCountFlags::TYPE_1
    }

    pub fn depth_format(&self) -> Option<vk::Format> {
        self.depth_format
    }

    /// Clear values in attachment order; the resolve attachment needs none
    pub fn clear_values(&self, color: [f32; 4]) -> Vec<vk::ClearValue> {
        let mut values = vec![vk::ClearValue {
            color: vk::ClearColorValue { float32: color },
        }];
        if self.depth_format.is_some() {
            values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });
        }
        values
    }
}

impl AttachmentSetup for StandardAttachments {
    fn create_render_pass(
        &mut self,
        device: &VulkanDevice,
        swapchain_format: vk::Format,
    ) -> Result<vk::RenderPass> {
        self.color_format = swapchain_format;
        let attachments =
            standard_attachment_descriptions(swapchain_format, self.depth_format, self.samples);

        let color_refs = [vk::AttachmentReference {
            attachment: 0,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];
        let depth_ref = vk::AttachmentReference {
            attachment: 1,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        };
        let resolve_refs = [vk::AttachmentReference {
            attachment: (attachments.len() - 1) as u32,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }];

        let mut subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if self.depth_format.is_some() {
            subpass = subpass.depth_stencil_attachment(&depth_ref);
        }
        if self.is_msaa() {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }

        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let subpasses = [subpass];
        let dependencies = [dependency];
        let create_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .dependencies(&dependencies);

        let render_pass = unsafe { device.device.create_render_pass(&create_info, None) }
            .context("Failed to create render pass")?;

        Ok(render_pass)
    }

    fn recreate(&mut self, device: &Arc<VulkanDevice>, extent: vk::Extent2D) -> Result<()> {
        if self.is_msaa() {
            self.color = Some(AttachmentImage::new(
                device,
                extent,
                self.color_format,
                vk::ImageUsageFlags::TRANSIENT_ATTACHMENT | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                vk::ImageAspectFlags::COLOR,
                self.samples,
            )?);
        }

        if let Some(depth_format) = self.depth_format {
            self.depth = Some(AttachmentImage::new(
                device,
                extent,
                depth_format,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                vk::ImageAspectFlags::DEPTH,
                self.samples,
            )?);
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        self.color = None;
        self.depth = None;
    }

    fn framebuffer_attachments(&self, swapchain_view: vk::ImageView, attachments: &mut Vec<vk::ImageView>) {
        standard_attachment_order(
            swapchain_view,
            self.color.as_ref().map(AttachmentImage::view),
            self.depth.as_ref().map(AttachmentImage::view),
            attachments,
        );
    }

    fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }
}

pub struct RenderTargetPass<S: AttachmentSetup = StandardAttachments> {
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
    setup: S,
    device: Arc<VulkanDevice>,
    destroyed: bool,
}

impl RenderTargetPass<StandardAttachments> {
    /// Color target for the swapchain, optionally with depth and MSAA
    pub fn new(device: &Arc<VulkanDevice>, swapchain: &Swapchain, depth: bool, msaa: bool) -> Result<Self> {
        let setup = StandardAttachments::new(device, depth, msaa)?;
        Self::with_setup(device, swapchain, setup)
    }

    pub fn clear_values(&self, color: [f32; 4]) -> Vec<vk::ClearValue> {
        self.setup.clear_values(color)
    }
}

impl<S: AttachmentSetup> RenderTargetPass<S> {
    pub fn with_setup(device: &Arc<VulkanDevice>, swapchain: &Swapchain, mut setup: S) -> Result<Self> {
        let render_pass = setup.create_render_pass(device, swapchain.format)?;

        let mut pass = Self {
            render_pass,
            framebuffers: Vec::with_capacity(swapchain.image_count()),
            extent: swapchain.extent,
            setup,
            device: device.clone(),
            destroyed: false,
        };
        // On failure `pass` is dropped and cleans up what was built
        pass.build_targets(swapchain)?;

        log::debug!(
            "Render pass ready: {} framebuffers, {:?}",
            pass.framebuffers.len(),
            pass.setup.samples()
        );
        Ok(pass)
    }

    fn build_targets(&mut self, swapchain: &Swapchain) -> Result<()> {
        self.setup.recreate(&self.device, swapchain.extent)?;
        self.extent = swapchain.extent;

        let mut attachments = Vec::new();
        for &view in &swapchain.image_views {
            attachments.clear();
            self.setup.framebuffer_attachments(view, &mut attachments);

            let create_info = vk::FramebufferCreateInfo::default()
                .render_pass(self.render_pass)
                .attachments(&attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = unsafe { self.device.device.create_framebuffer(&create_info, None) }
                .context("Failed to create framebuffer")?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }

    fn destroy_targets(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { self.device.device.destroy_framebuffer(framebuffer, None) };
        }
        self.setup.cleanup();
    }

    /// Rebuild attachments and framebuffers for the (new) swapchain; the render pass is kept
    pub fn recreate(&mut self, swapchain: &Swapchain) -> Result<()> {
        anyhow::ensure!(!self.destroyed, "recreate called on a destroyed render pass");

        self.destroy_targets();
        self.build_targets(swapchain)?;

        log::debug!(
            "Render pass recreated at {}x{}",
            self.extent.width,
            self.extent.height
        );
        Ok(())
    }

    /// Begin the pass on `cmd` and set a full-extent viewport and scissor
    pub fn begin(&self, cmd: vk::CommandBuffer, image_index: u32, clear_values: &[vk::ClearValue]) {
        let render_area = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: self.extent,
        };
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(self.render_pass)
            .framebuffer(self.framebuffers[image_index as usize])
            .render_area(render_area)
            .clear_values(clear_values);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let device = &self.device.device;
        unsafe {
            device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[render_area]);
        }
    }

    pub fn end(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.device.cmd_end_render_pass(cmd) };
    }

    /// Destroy framebuffers, attachments and the render pass. Terminal.
    pub fn cleanup(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroy_targets();
        unsafe { self.device.device.destroy_render_pass(self.render_pass, None) };
        self.render_pass = vk::RenderPass::null();
        self.destroyed = true;
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn framebuffer(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.setup.samples()
    }

    pub fn setup(&self) -> &S {
        &self.setup
    }

    pub fn setup_mut(&mut self) -> &mut S {
        &mut self.setup
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl<S: AttachmentSetup> Drop for RenderTargetPass<S> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn view(raw: u64) -> vk::ImageView {
        vk::ImageView::from_raw(raw)
    }

    #[test]
    fn single_sample_color_presents_directly() {
        let attachments =
            standard_attachment_descriptions(vk::Format::B8G8R8A8_SRGB, None, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn msaa_adds_resolve_attachment_last() {
        let attachments = standard_attachment_descriptions(
            vk::Format::B8G8R8A8_SRGB,
            Some(vk::Format::D32_SFLOAT),
            vk::SampleCountFlags::TYPE_4,
        );
        assert_eq!(attachments.len(), 3);
        assert_eq!(attachments[0].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[0].final_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(attachments[1].format, vk::Format::D32_SFLOAT);
        assert_eq!(attachments[1].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[2].samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(attachments[2].final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }

    #[test]
    fn framebuffer_order_without_msaa() {
        let mut attachments = Vec::new();
        standard_attachment_order(view(1), None, Some(view(2)), &mut attachments);
        assert_eq!(attachments, vec![view(1), view(2)]);

        attachments.clear();
        standard_attachment_order(view(1), None, None, &mut attachments);
        assert_eq!(attachments, vec![view(1)]);
    }

    #[test]
    fn framebuffer_order_with_msaa() {
        let mut attachments = Vec::new();
        standard_attachment_order(view(1), Some(view(3)), Some(view(2)), &mut attachments);
        assert_eq!(attachments, vec![view(3), view(2), view(1)]);
    }

    #[test]
    fn clear_values_cover_depth() {
        let with_depth =
            StandardAttachments::with_formats(Some(vk::Format::D32_SFLOAT), vk::SampleCountFlags::TYPE_1);
        assert_eq!(with_depth.clear_values([0.0; 4]).len(), 2);
        assert!(!with_depth.is_msaa());

        let color_only = StandardAttachments::with_formats(None, vk::SampleCountFlags::TYPE_8);
        assert_eq!(color_only.clear_values([0.0; 4]).len(), 1);
        assert!(color_only.is_msaa());
        assert_eq!(color_only.samples(), vk::SampleCountFlags::TYPE_8);
    }
}
