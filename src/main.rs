// =============================================================================
// SWAPFRAME DEMO - Instanced quads through the frame driver
// =============================================================================
//
// Renders a grid of coloured quads that sway over time. The quad shaders are
// compiled by build.rs; without them the demo only clears the screen.
//
// FRAME FLOW (owned by swapframe::run):
// 1. update()  - nothing per frame, instances are static
// 2. render()  - begin pass, bind pipeline, push time, draw instances
// 3. resize()  - rebuild framebuffers, pipeline and projection
//
// =============================================================================

use anyhow::Result;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use std::path::Path;
use std::time::Instant;
use winit::window::Window;

use swapframe::backend::pipeline::RasterizerState;
use swapframe::backend::vertex::{attribute, binding_for, INSTANCE_BINDING, VERTEX_BINDING};
use swapframe::backend::{
    Model, Pipeline, PipelineDesc, RenderTargetPass, UniformBuffer, VertexLayout,
};
use swapframe::{Config, FrameState, RenderCallbacks};

const VERTEX_SHADER: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/quad.vert.spv");
const FRAGMENT_SHADER: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/quad.frag.spv");

const GRID: usize = 8;

fn main() -> Result<()> {
    swapframe::init_logging();
    let config = Config::load();

    log::info!("Starting swapframe demo");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let demo = QuadDemo::new(&config);
    swapframe::run(config, demo)
}

// =============================================================================
// GPU DATA
// =============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 2],
}

impl VertexLayout for QuadVertex {
    fn binding() -> vk::VertexInputBindingDescription {
        binding_for::<Self>(VERTEX_BINDING, vk::VertexInputRate::VERTEX)
    }

    fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![attribute(VERTEX_BINDING, 0, vk::Format::R32G32_SFLOAT, 0)]
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct QuadInstance {
    offset: [f32; 2],
    color: [f32; 4],
}

impl VertexLayout for QuadInstance {
    fn binding() -> vk::VertexInputBindingDescription {
        binding_for::<Self>(INSTANCE_BINDING, vk::VertexInputRate::INSTANCE)
    }

    fn attributes() -> Vec<vk::VertexInputAttributeDescription> {
        vec![
            attribute(INSTANCE_BINDING, 1, vk::Format::R32G32_SFLOAT, 0),
            attribute(INSTANCE_BINDING, 2, vk::Format::R32G32B32A32_SFLOAT, 8),
        ]
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SceneUniforms {
    projection: Mat4,
}

impl SceneUniforms {
    /// Orthographic projection keeping a [-1, 1] square visible at any aspect
    fn for_extent(width: u32, height: u32) -> Self {
        let aspect = width as f32 / height.max(1) as f32;
        let (half_w, half_h) = if aspect >= 1.0 { (aspect, 1.0) } else { (1.0, 1.0 / aspect) };
        Self {
            projection: Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, -1.0, 1.0),
        }
    }
}

const QUAD_VERTICES: [QuadVertex; 4] = [
    QuadVertex { position: [-0.5, -0.5] },
    QuadVertex { position: [0.5, -0.5] },
    QuadVertex { position: [0.5, 0.5] },
    QuadVertex { position: [-0.5, 0.5] },
];
const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

fn grid_instances() -> Vec<QuadInstance> {
    let step = 2.0 / GRID as f32;
    (0..GRID * GRID)
        .map(|i| {
            let (x, y) = ((i % GRID) as f32, (i / GRID) as f32);
            QuadInstance {
                offset: [-1.0 + step * (x + 0.5), -1.0 + step * (y + 0.5)],
                color: [x / GRID as f32, y / GRID as f32, 0.6, 1.0],
            }
        })
        .collect()
}

// =============================================================================
// APPLICATION
// =============================================================================

struct QuadDemo {
    clear_color: [f32; 4],
    depth: bool,
    msaa: bool,
    started: Instant,
    // Dropped in cleanup(), before the device
    scene: Option<Scene>,
}

struct Scene {
    quads: Option<Quads>,
    pass: RenderTargetPass,
}

struct Quads {
    pipeline: Pipeline,
    model: Model<QuadVertex, u16, QuadInstance>,
    uniforms: UniformBuffer<SceneUniforms>,
}

impl QuadDemo {
    fn new(config: &Config) -> Self {
        Self {
            clear_color: config.graphics.clear_color,
            depth: config.graphics.depth,
            msaa: config.graphics.msaa,
            started: Instant::now(),
            scene: None,
        }
    }

    fn create_quads(state: &FrameState, pass: &RenderTargetPass) -> Result<Quads> {
        let instances = grid_instances();
        let mut model = Model::new(
            &state.device,
            &state.commands,
            &QUAD_VERTICES,
            &QUAD_INDICES,
            instances.len(),
        )?;
        model.set_instances(&state.commands, &instances)?;

        let mut uniforms = UniformBuffer::new(&state.device, state.max_frames_in_flight)?;
        let extent = state.swapchain.extent;
        uniforms.update(&SceneUniforms::for_extent(extent.width, extent.height))?;

        let mut pipeline = Pipeline::new(&state.device, state.max_frames_in_flight);
        pipeline.create_descriptor_set_layout(|bindings| {
            bindings.push(
                vk::DescriptorSetLayoutBinding::default()
                    .binding(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::VERTEX),
            );
        })?;
        pipeline.create_descriptor_pool(|sizes, frames| {
            sizes.push(vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: frames,
            });
        })?;

        let buffer_infos: Vec<_> = (0..uniforms.len()).map(|slot| uniforms.descriptor_info(slot)).collect();
        pipeline.create_descriptor_sets(move |device, set, slot| {
            let info = [buffer_infos[slot]];
            let write = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&info);
            unsafe { device.update_descriptor_sets(&[write], &[]) };
        })?;

        let desc = PipelineDesc::new(VERTEX_SHADER, FRAGMENT_SHADER)
            .rasterizer(RasterizerState {
                cull_mode: vk::CullModeFlags::NONE,
                ..Default::default()
            })
            .push_constant(vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::VERTEX,
                offset: 0,
                size: std::mem::size_of::<f32>() as u32,
            });
        pipeline.create::<QuadVertex, QuadInstance, _>(pass, desc)?;

        Ok(Quads {
            pipeline,
            model,
            uniforms,
        })
    }
}

impl RenderCallbacks for QuadDemo {
    fn init(&mut self, state: &mut FrameState, _window: &Window, width: u32, height: u32) -> Result<()> {
        log::info!("Demo init at {}x{}", width, height);
        let pass = RenderTargetPass::new(&state.device, &state.swapchain, self.depth, self.msaa)?;

        let shaders_present = Path::new(VERTEX_SHADER).exists() && Path::new(FRAGMENT_SHADER).exists();
        let quads = if shaders_present {
            Some(Self::create_quads(state, &pass)?)
        } else {
            log::warn!("Compiled shaders not found, rendering clear color only");
            None
        };

        self.scene = Some(Scene { quads, pass });
        Ok(())
    }

    fn render(&mut self, _state: &FrameState, cmd: vk::CommandBuffer, image_index: u32, frame: usize) -> Result<()> {
        let Some(scene) = &self.scene else {
            return Ok(());
        };

        let clear_values = scene.pass.clear_values(self.clear_color);
        scene.pass.begin(cmd, image_index, &clear_values);

        if let Some(quads) = &scene.quads {
            let time = self.started.elapsed().as_secs_f32();
            quads.pipeline.bind(cmd, frame);
            quads
                .pipeline
                .push_constants(cmd, vk::ShaderStageFlags::VERTEX, 0, bytemuck::bytes_of(&time));
            quads.model.draw(cmd);
        }

        scene.pass.end(cmd);
        Ok(())
    }

    fn resize(&mut self, state: &mut FrameState, width: u32, height: u32) -> Result<()> {
        let Some(scene) = &mut self.scene else {
            return Ok(());
        };

        scene.pass.recreate(&state.swapchain)?;
        if let Some(quads) = &mut scene.quads {
            quads.pipeline.recreate(&scene.pass)?;
            // Device is idle during a rebuild, so every slot can be rewritten
            quads.uniforms.update(&SceneUniforms::for_extent(width, height))?;
        }
        Ok(())
    }

    fn cleanup(&mut self, _state: &mut FrameState) {
        self.scene = None;
        log::info!("Demo resources released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn instance_layout_matches_struct() {
        let attributes = QuadInstance::attributes();
        assert_eq!(attributes[1].offset as usize, std::mem::offset_of!(QuadInstance, color));
        assert_eq!(QuadInstance::binding().stride as usize, std::mem::size_of::<QuadInstance>());
    }

    #[test]
    fn grid_fills_unit_square() {
        let instances = grid_instances();
        assert_eq!(instances.len(), GRID * GRID);
        for instance in &instances {
            assert!(instance.offset.iter().all(|v| v.abs() < 1.0));
        }
    }

    #[test]
    fn projection_keeps_square_visible() {
        let wide = SceneUniforms::for_extent(1600, 800).projection;
        let corner = wide.project_point3(glam::Vec3::new(1.0, 1.0, 0.0));
        assert_relative_eq!(corner.x, 0.5, epsilon = 1e-6);
        assert_relative_eq!(corner.y, 1.0, epsilon = 1e-6);
    }
}
