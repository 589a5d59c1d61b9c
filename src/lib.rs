//! Thin Vulkan framework: swapchain, render passes, pipelines, device
//! resources and a synchronized frame loop that rebuilds the swapchain chain
//! on resize.

pub mod backend;
pub mod config;
pub mod error;
pub mod frame;

pub use config::Config;
pub use error::FrameError;
pub use frame::{run, FrameBackend, FrameCycle, FrameOutcome, FrameState, RenderCallbacks};

/// Install the `env_logger` sink. `RUST_LOG` overrides the default `info` level.
pub fn init_logging() {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log::LevelFilter::Info);
    builder.parse_default_env();
    // Ignore a second initialisation (tests, embedding applications)
    let _ = builder.try_init();
}
