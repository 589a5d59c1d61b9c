// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Every wrapper owns its handles and releases them
// on drop; the device is shared through `Arc` and outlives all of them.

pub mod buffer;
pub mod commands;
pub mod device;
pub mod image;
pub mod model;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod uniform;
pub mod vertex;

pub use buffer::Buffer;
pub use commands::{Commands, SingleTimeSubmit};
pub use device::VulkanDevice;
pub use image::{Image, ImageDesc};
pub use model::Model;
pub use pipeline::{Pipeline, PipelineDesc, RasterizerState};
pub use render_pass::{AttachmentImage, AttachmentSetup, RenderTargetPass, StandardAttachments};
pub use swapchain::{AcquireOutcome, PresentOutcome, Swapchain};
pub use texture::{ArrayLayout, Sampler, Texture};
pub use uniform::UniformBuffer;
pub use vertex::{IndexType, VertexLayout};
