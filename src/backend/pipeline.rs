// Graphics pipeline
//
// Owns the pipeline, its layout, and a descriptor set layout/pool with one
// descriptor set per frame in flight. The descriptor configuration callbacks
// are kept so `recreate` rebuilds identical bindings against a new render pass.

use anyhow::{Context, Result};
use ash::vk::{self, Handle};
use std::path::PathBuf;
use std::sync::Arc;

use super::render_pass::{AttachmentSetup, RenderTargetPass};
use super::shader::ShaderModule;
use super::vertex::{VertexInput, VertexLayout};
use super::VulkanDevice;

/// Fills in descriptor set layout bindings
pub type BindingsFn = Box<dyn Fn(&mut Vec<vk::DescriptorSetLayoutBinding<'static>>)>;
/// Fills in descriptor pool sizes; receives the number of frames in flight
pub type PoolSizesFn = Box<dyn Fn(&mut Vec<vk::DescriptorPoolSize>, u32)>;
/// Writes the descriptor set of one frame slot
pub type DescriptorWriteFn = Box<dyn Fn(&ash::Device, vk::DescriptorSet, usize)>;

#[derive(Debug, Clone, Copy)]
pub struct RasterizerState {
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
        }
    }
}

/// Everything `create` needs besides vertex types and the target pass
#[derive(Debug, Clone)]
pub struct PipelineDesc {
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub transparency: bool,
    pub rasterizer: RasterizerState,
    pub push_constants: Vec<vk::PushConstantRange>,
}

impl PipelineDesc {
    pub fn new(vertex_shader: impl Into<PathBuf>, fragment_shader: impl Into<PathBuf>) -> Self {
        Self {
            vertex_shader: vertex_shader.into(),
            fragment_shader: fragment_shader.into(),
            transparency: false,
            rasterizer: RasterizerState::default(),
            push_constants: Vec::new(),
        }
    }

    pub fn transparency(mut self, enabled: bool) -> Self {
        self.transparency = enabled;
        self
    }

    pub fn rasterizer(mut self, rasterizer: RasterizerState) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn push_constant(mut self, range: vk::PushConstantRange) -> Self {
        self.push_constants.push(range);
        self
    }
}

/// Straight alpha blending when `transparency` is set, opaque writes otherwise
pub fn color_blend_attachment(transparency: bool) -> vk::PipelineColorBlendAttachmentState {
    let state = vk::PipelineColorBlendAttachmentState::default().color_write_mask(
        vk::ColorComponentFlags::R
            | vk::ColorComponentFlags::G
            | vk::ColorComponentFlags::B
            | vk::ColorComponentFlags::A,
    );

    if !transparency {
        return state.blend_enable(false);
    }

    state
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::ONE)
        .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
        .alpha_blend_op(vk::BlendOp::ADD)
}

/// Multisampling matching the target pass; sample shading is on whenever MSAA is
pub fn multisample_state(samples: vk::SampleCountFlags) -> vk::PipelineMultisampleStateCreateInfo<'static> {
    let msaa = samples != vk::SampleCountFlags::TYPE_1;
    vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(samples)
        .sample_shading_enable(msaa)
        .min_sample_shading(if msaa { 0.2 } else { 1.0 })
}

struct PipelineTarget {
    render_pass: vk::RenderPass,
    samples: vk::SampleCountFlags,
}

pub struct Pipeline {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_sets: Vec<vk::DescriptorSet>,

    bindings_fn: Option<BindingsFn>,
    pool_sizes_fn: Option<PoolSizesFn>,
    write_fn: Option<DescriptorWriteFn>,

    desc: Option<PipelineDesc>,
    vertex_input: VertexInput,
    max_frames_in_flight: usize,
    device: Arc<VulkanDevice>,
}

impl Pipeline {
    pub fn new(device: &Arc<VulkanDevice>, max_frames_in_flight: usize) -> Self {
        Self {
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
            bindings_fn: None,
            pool_sizes_fn: None,
            write_fn: None,
            desc: None,
            vertex_input: VertexInput::default(),
            max_frames_in_flight,
            device: device.clone(),
        }
    }

    pub fn create_descriptor_set_layout<F>(&mut self, bindings: F) -> Result<()>
    where
        F: Fn(&mut Vec<vk::DescriptorSetLayoutBinding<'static>>) + 'static,
    {
        self.bindings_fn = Some(Box::new(bindings));
        self.build_descriptor_set_layout()
    }

    pub fn create_descriptor_pool<F>(&mut self, pool_sizes: F) -> Result<()>
    where
        F: Fn(&mut Vec<vk::DescriptorPoolSize>, u32) + 'static,
    {
        self.pool_sizes_fn = Some(Box::new(pool_sizes));
        self.build_descriptor_pool()
    }

    pub fn create_descriptor_sets<F>(&mut self, write: F) -> Result<()>
    where
        F: Fn(&ash::Device, vk::DescriptorSet, usize) + 'static,
    {
        self.write_fn = Some(Box::new(write));
        self.build_descriptor_sets()
    }

    fn build_descriptor_set_layout(&mut self) -> Result<()> {
        let Some(bindings_fn) = &self.bindings_fn else {
            return Ok(());
        };

        let mut bindings = Vec::new();
        bindings_fn(&mut bindings);

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let device = &self.device.device;
        let layout = unsafe { device.create_descriptor_set_layout(&create_info, None) }
            .context("Failed to create descriptor set layout")?;
        replace_handle(&mut self.descriptor_set_layout, layout, |old| unsafe {
            device.destroy_descriptor_set_layout(old, None)
        });
        Ok(())
    }

    fn build_descriptor_pool(&mut self) -> Result<()> {
        let Some(pool_sizes_fn) = &self.pool_sizes_fn else {
            return Ok(());
        };

        let mut pool_sizes = Vec::new();
        pool_sizes_fn(&mut pool_sizes, self.max_frames_in_flight as u32);

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(self.max_frames_in_flight as u32);
        let device = &self.device.device;
        let pool = unsafe { device.create_descriptor_pool(&create_info, None) }
            .context("Failed to create descriptor pool")?;
        // The old pool takes its descriptor sets with it
        replace_handle(&mut self.descriptor_pool, pool, |old| unsafe {
            device.destroy_descriptor_pool(old, None)
        });
        self.descriptor_sets.clear();
        Ok(())
    }

    fn build_descriptor_sets(&mut self) -> Result<()> {
        let Some(write_fn) = &self.write_fn else {
            return Ok(());
        };
        anyhow::ensure!(
            self.descriptor_set_layout != vk::DescriptorSetLayout::null()
                && self.descriptor_pool != vk::DescriptorPool::null(),
            "descriptor sets need a layout and a pool first"
        );

        if !self.descriptor_sets.is_empty() {
            unsafe {
                self.device
                    .device
                    .reset_descriptor_pool(self.descriptor_pool, vk::DescriptorPoolResetFlags::empty())
            }
            .context("Failed to reset descriptor pool")?;
            self.descriptor_sets.clear();
        }

        let layouts = vec![self.descriptor_set_layout; self.max_frames_in_flight];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);

        self.descriptor_sets = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")?;

        for (slot, &set) in self.descriptor_sets.iter().enumerate() {
            write_fn(&self.device.device, set, slot);
        }
        Ok(())
    }

    /// Build the pipeline for vertex type `V` (binding 0) and instance type `I` (binding 1)
    pub fn create<V, I, S>(&mut self, target: &RenderTargetPass<S>, desc: PipelineDesc) -> Result<()>
    where
        V: VertexLayout,
        I: VertexLayout,
        S: AttachmentSetup,
    {
        self.vertex_input = VertexInput::of::<V, I>();
        self.desc = Some(desc);
        self.build_pipeline(&PipelineTarget {
            render_pass: target.handle(),
            samples: target.samples(),
        })
    }

    fn build_pipeline(&mut self, target: &PipelineTarget) -> Result<()> {
        let desc = self
            .desc
            .as_ref()
            .context("pipeline has no description; call create first")?;

        let vertex_module = ShaderModule::load(&self.device, &desc.vertex_shader)?;
        let fragment_module = ShaderModule::load(&self.device, &desc.fragment_shader)?;

        let set_layouts: Vec<_> = [self.descriptor_set_layout]
            .into_iter()
            .filter(|layout| *layout != vk::DescriptorSetLayout::null())
            .collect();
        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&desc.push_constants);
        let layout = unsafe { self.device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;
        let device = &self.device.device;
        // Old pipeline was built against the old layout
        replace_handle(&mut self.pipeline, vk::Pipeline::null(), |old| unsafe {
            device.destroy_pipeline(old, None)
        });
        replace_handle(&mut self.layout, layout, |old| unsafe {
            device.destroy_pipeline_layout(old, None)
        });

        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module.module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module.module)
                .name(c"main"),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&self.vertex_input.bindings)
            .vertex_attribute_descriptions(&self.vertex_input.attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are set by RenderTargetPass::begin
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(desc.rasterizer.polygon_mode)
            .line_width(desc.rasterizer.line_width)
            .cull_mode(desc.rasterizer.cull_mode)
            .front_face(desc.rasterizer.front_face)
            .depth_bias_enable(false);

        let multisampling = multisample_state(target.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let blend_attachments = [color_blend_attachment(desc.transparency)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(target.render_pass)
            .subpass(0);

        let pipelines = unsafe {
            self.device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, e)| e)
        .context("Failed to create graphics pipeline")?;

        self.pipeline = pipelines[0];
        log::debug!(
            "Pipeline built from {:?} / {:?}",
            desc.vertex_shader,
            desc.fragment_shader
        );
        Ok(())
    }

    /// Tear everything down and rebuild it against `target` with the retained configuration
    pub fn recreate<S: AttachmentSetup>(&mut self, target: &RenderTargetPass<S>) -> Result<()> {
        self.cleanup();
        self.build_descriptor_set_layout()?;
        self.build_descriptor_pool()?;
        self.build_descriptor_sets()?;
        self.build_pipeline(&PipelineTarget {
            render_pass: target.handle(),
            samples: target.samples(),
        })
    }

    /// Bind the descriptor set for `frame`, then the pipeline
    pub fn bind(&self, cmd: vk::CommandBuffer, frame: usize) {
        let device = &self.device.device;
        unsafe {
            if let Some(&set) = self.descriptor_sets.get(frame) {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.layout,
                    0,
                    &[set],
                    &[],
                );
            }
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
        }
    }

    pub fn push_constants(&self, cmd: vk::CommandBuffer, stages: vk::ShaderStageFlags, offset: u32, data: &[u8]) {
        unsafe {
            self.device
                .device
                .cmd_push_constants(cmd, self.layout, stages, offset, data)
        };
    }

    /// Destroy GPU objects; the configuration is kept for `recreate`
    pub fn cleanup(&mut self) {
        let device = &self.device.device;
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.pipeline, None);
            }
            if self.layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.layout, None);
            }
            // Frees the descriptor sets too
            if self.descriptor_pool != vk::DescriptorPool::null() {
                device.destroy_descriptor_pool(self.descriptor_pool, None);
            }
            if self.descriptor_set_layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            }
        }

        self.pipeline = vk::Pipeline::null();
        self.layout = vk::PipelineLayout::null();
        self.descriptor_pool = vk::DescriptorPool::null();
        self.descriptor_set_layout = vk::DescriptorSetLayout::null();
        self.descriptor_sets.clear();
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn descriptor_sets(&self) -> &[vk::DescriptorSet] {
        &self.descriptor_sets
    }
}

/// Store `new` in `slot` and pass the previous handle, if any, to `destroy`
fn replace_handle<H: Handle + Copy>(slot: &mut H, new: H, destroy: impl FnOnce(H)) {
    let old = std::mem::replace(slot, new);
    if old.as_raw() != 0 {
        destroy(old);
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn opaque_blend_writes_all_channels() {
        let state = color_blend_attachment(false);
        assert_eq!(state.blend_enable, vk::FALSE);
        assert!(state.color_write_mask.contains(
            vk::ColorComponentFlags::R | vk::ColorComponentFlags::A
        ));
    }

    #[test]
    fn transparent_blend_uses_source_alpha() {
        let state = color_blend_attachment(true);
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(state.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
        assert_eq!(state.src_alpha_blend_factor, vk::BlendFactor::ONE);
        assert_eq!(state.dst_alpha_blend_factor, vk::BlendFactor::ZERO);
    }

    #[test]
    fn msaa_enables_sample_shading() {
        let state = multisample_state(vk::SampleCountFlags::TYPE_4);
        assert_eq!(state.rasterization_samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(state.sample_shading_enable, vk::TRUE);
        assert_relative_eq!(state.min_sample_shading, 0.2);

        let single = multisample_state(vk::SampleCountFlags::TYPE_1);
        assert_eq!(single.sample_shading_enable, vk::FALSE);
    }

    #[test]
    fn replacing_a_handle_destroys_the_previous_one() {
        let mut slot = vk::DescriptorPool::from_raw(7);
        let mut destroyed = Vec::new();

        replace_handle(&mut slot, vk::DescriptorPool::from_raw(8), |old| destroyed.push(old));

        assert_eq!(slot, vk::DescriptorPool::from_raw(8));
        assert_eq!(destroyed, vec![vk::DescriptorPool::from_raw(7)]);
    }

    #[test]
    fn first_handle_replaces_nothing() {
        let mut slot = vk::Pipeline::null();
        let mut destroyed = 0;

        replace_handle(&mut slot, vk::Pipeline::from_raw(3), |_| destroyed += 1);

        assert_eq!(slot, vk::Pipeline::from_raw(3));
        assert_eq!(destroyed, 0);
    }

    #[test]
    fn desc_builder_defaults() {
        let desc = PipelineDesc::new("a.vert.spv", "a.frag.spv").transparency(true);
        assert!(desc.transparency);
        assert_eq!(desc.rasterizer.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(desc.rasterizer.front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert!(desc.push_constants.is_empty());
    }
}
