// =============================================================================
// FRAME DRIVER
// =============================================================================
//
// Per frame, steady state:
//   wait fence -> acquire -> reset fence -> reset cmd -> record -> submit
//   -> present -> advance
//
// An out-of-date acquire rebuilds the chain and drops the frame without
// advancing. Out-of-date/suboptimal presents and explicit resizes rebuild the
// chain after the frame was submitted. A zero-sized drawable defers the
// rebuild until the window is restored.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

use crate::backend::swapchain::{AcquireOutcome, PresentOutcome};
use crate::backend::sync::FrameSyncSet;
use crate::backend::{Commands, Swapchain, VulkanDevice};
use crate::config::Config;

/// What happened to one call of [`FrameCycle::draw_frame`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was submitted and presented
    Presented,
    /// The swapchain chain was rebuilt
    Recreated,
    /// The drawable is zero-sized; the rebuild waits for a restore
    Deferred,
}

/// The device-facing half of a frame. Slots index the frames in flight.
pub trait FrameBackend {
    /// Block on the slot's in-flight fence
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;
    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome>;
    /// Reset the slot's fence and command buffer
    fn begin_slot(&mut self, slot: usize) -> Result<()>;
    fn record(&mut self, slot: usize, image_index: u32) -> Result<()>;
    fn submit(&mut self, slot: usize) -> Result<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;
    fn drawable_size(&self) -> (u32, u32);
    /// Idle the device, rebuild the swapchain and notify dependents
    fn recreate(&mut self, width: u32, height: u32) -> Result<()>;
}

/// Frame index and recreation state
#[derive(Debug)]
pub struct FrameCycle {
    current_frame: usize,
    max_frames_in_flight: usize,
    resize_requested: bool,
    recreate_pending: bool,
}

impl FrameCycle {
    pub fn new(max_frames_in_flight: usize) -> Self {
        Self {
            current_frame: 0,
            max_frames_in_flight: max_frames_in_flight.max(1),
            resize_requested: false,
            recreate_pending: false,
        }
    }

    pub fn draw_frame<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        if self.recreate_pending {
            return self.recreate_chain(backend);
        }

        let slot = self.current_frame;
        backend.wait_for_slot(slot)?;

        // Suboptimal images are still presentable; present reports it again
        let image_index = match backend.acquire(slot)? {
            AcquireOutcome::Ready { image_index, .. } => image_index,
            AcquireOutcome::OutOfDate => {
                log::debug!("Swapchain out of date on acquire");
                return self.recreate_chain(backend);
            }
        };

        backend.begin_slot(slot)?;
        backend.record(slot, image_index)?;
        backend.submit(slot)?;
        let presented = backend.present(slot, image_index)?;

        let mut outcome = FrameOutcome::Presented;
        if presented != PresentOutcome::Presented || self.resize_requested {
            log::debug!("Rebuilding swapchain after present ({:?})", presented);
            outcome = self.recreate_chain(backend)?;
        }

        self.current_frame = (self.current_frame + 1) % self.max_frames_in_flight;
        Ok(outcome)
    }

    /// Rebuild for the current drawable size, or mark the rebuild pending
    /// while it is zero
    pub fn recreate_chain<B: FrameBackend + ?Sized>(&mut self, backend: &mut B) -> Result<FrameOutcome> {
        let (width, height) = backend.drawable_size();
        if width == 0 || height == 0 {
            if !self.recreate_pending {
                log::debug!("Drawable is zero-sized, deferring swapchain rebuild");
            }
            self.recreate_pending = true;
            return Ok(FrameOutcome::Deferred);
        }

        self.recreate_pending = false;
        self.resize_requested = false;
        backend.recreate(width, height)?;
        Ok(FrameOutcome::Recreated)
    }

    /// Rebuild after the next present regardless of what it reports
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn max_frames_in_flight(&self) -> usize {
        self.max_frames_in_flight
    }

    pub fn is_recreate_pending(&self) -> bool {
        self.recreate_pending
    }
}

/// Resources shared with the client callbacks
pub struct FrameState {
    pub device: Arc<VulkanDevice>,
    pub swapchain: Swapchain,
    pub commands: Commands,
    pub max_frames_in_flight: usize,
}

/// Client integration points, called from the event loop
pub trait RenderCallbacks {
    /// Once, after the device and swapchain exist
    fn init(&mut self, state: &mut FrameState, window: &Window, width: u32, height: u32) -> Result<()>;

    /// Once per loop iteration before drawing
    fn update(&mut self, _state: &mut FrameState) -> Result<()> {
        Ok(())
    }

    /// Record one frame into `cmd`, which is already in the recording state
    fn render(&mut self, state: &FrameState, cmd: vk::CommandBuffer, image_index: u32, frame: usize) -> Result<()>;

    /// After every swapchain rebuild
    fn resize(&mut self, state: &mut FrameState, width: u32, height: u32) -> Result<()>;

    /// Once at shutdown, with the device idle
    fn cleanup(&mut self, state: &mut FrameState);
}

/// Open a window from `config` and drive `app` until the window closes
pub fn run<A: RenderCallbacks>(config: Config, app: A) -> Result<()> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = Runner {
        app,
        context: None,
        cycle: FrameCycle::new(config.max_frames_in_flight()),
        error: None,
        window: None,
        config,
    };
    event_loop.run_app(&mut runner)?;
    runner.shutdown();

    match runner.error.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// Field order is drop order: client resources, then the device, then the window
struct Runner<A: RenderCallbacks> {
    app: A,
    context: Option<RenderContext>,
    cycle: FrameCycle,
    error: Option<anyhow::Error>,
    window: Option<Window>,
    config: Config,
}

struct RenderContext {
    sync: FrameSyncSet,
    state: FrameState,
}

impl<A: RenderCallbacks> Runner<A> {
    fn init_vulkan(&mut self, window: &Window) -> Result<RenderContext> {
        let size = window.inner_size();
        let device = VulkanDevice::new(
            &self.config.window.title,
            self.config.validation_enabled(),
            window,
        )?;

        let max_frames_in_flight = self.cycle.max_frames_in_flight();
        let swapchain = Swapchain::new(
            device.clone(),
            size.width,
            size.height,
            self.config.present_mode(),
        )?;
        let commands = Commands::new(device.clone(), max_frames_in_flight)?;
        let sync = FrameSyncSet::new(device.clone(), max_frames_in_flight)?;

        let mut state = FrameState {
            device,
            swapchain,
            commands,
            max_frames_in_flight,
        };
        let extent = state.swapchain.extent;
        self.app.init(&mut state, window, extent.width, extent.height)?;

        log::info!(
            "Frame driver ready: {} frames in flight, {} swapchain images",
            max_frames_in_flight,
            state.swapchain.image_count()
        );
        Ok(RenderContext { sync, state })
    }

    fn redraw(&mut self) -> Result<FrameOutcome> {
        let (Some(window), Some(context)) = (self.window.as_ref(), self.context.as_mut()) else {
            return Ok(FrameOutcome::Deferred);
        };

        self.app.update(&mut context.state)?;

        let mut backend = VulkanBackend {
            state: &mut context.state,
            sync: &context.sync,
            window,
            app: &mut self.app,
        };
        self.cycle.draw_frame(&mut backend)
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal error: {:?}", error);
        self.error.get_or_insert(error);
        event_loop.exit();
    }

    /// Idle the device, let the client release its resources, then tear down
    fn shutdown(&mut self) {
        let Some(mut context) = self.context.take() else {
            return;
        };

        log::info!("Shutting down...");
        if let Err(e) = context.state.device.wait_idle() {
            log::warn!("wait_idle during shutdown failed: {:?}", e);
        }
        self.app.cleanup(&mut context.state);

        // Sync objects, command pool and swapchain before the device they hold
        let RenderContext { sync, state } = context;
        drop(sync);
        let FrameState {
            device,
            swapchain,
            commands,
            ..
        } = state;
        drop(commands);
        drop(swapchain);
        if Arc::strong_count(&device) > 1 {
            log::warn!("Device still referenced after cleanup; it is released with the last owner");
        }
        drop(device);
        log::info!("Cleanup complete");
    }
}

impl<A: RenderCallbacks> ApplicationHandler for Runner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let mut attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));
        if self.config.window.fullscreen {
            attributes = attributes.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = match event_loop.create_window(attributes) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_vulkan(&window) {
            Ok(context) => self.context = Some(context),
            Err(e) => {
                self.fail(event_loop, e.context("Failed to initialize Vulkan"));
                return;
            }
        }
        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.cycle.request_resize();
                if size.width > 0 && size.height > 0 {
                    if let Some(window) = &self.window {
                        window.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => match self.redraw() {
                Ok(FrameOutcome::Deferred) => event_loop.set_control_flow(ControlFlow::Wait),
                Ok(_) => event_loop.set_control_flow(ControlFlow::Poll),
                Err(e) => self.fail(event_loop, e),
            },

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        // Minimized: sleep until a Resized event wakes the loop
        if self.cycle.is_recreate_pending() {
            return;
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

/// Vulkan side of one frame, borrowed from the runner for a single redraw
struct VulkanBackend<'a, A: RenderCallbacks> {
    state: &'a mut FrameState,
    sync: &'a FrameSyncSet,
    window: &'a Window,
    app: &'a mut A,
}

impl<A: RenderCallbacks> FrameBackend for VulkanBackend<'_, A> {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.sync.get(slot).in_flight_fence;
        unsafe {
            self.state
                .device
                .device
                .wait_for_fences(&[fence], true, u64::MAX)
        }
        .context("Failed to wait for in-flight fence")?;
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.state
            .swapchain
            .acquire_next_image(self.sync.get(slot).image_available)
    }

    fn begin_slot(&mut self, slot: usize) -> Result<()> {
        let fence = self.sync.get(slot).in_flight_fence;
        unsafe { self.state.device.device.reset_fences(&[fence]) }
            .context("Failed to reset in-flight fence")?;
        self.state.commands.reset(slot)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let cmd = self.state.commands.begin(slot)?;
        self.app.render(self.state, cmd, image_index, slot)?;
        self.state.commands.end(slot)
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let sync = self.sync.get(slot);
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [self.state.commands.buffer(slot)];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        let device = &self.state.device;
        unsafe {
            device
                .device
                .queue_submit(device.graphics_queue, &[submit_info], sync.in_flight_fence)
        }
        .context("Failed to submit frame")?;
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        self.state.swapchain.present(
            self.state.device.present_queue,
            image_index,
            &[self.sync.get(slot).render_finished],
        )
    }

    fn drawable_size(&self) -> (u32, u32) {
        let size = self.window.inner_size();
        (size.width, size.height)
    }

    fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        self.state.device.wait_idle()?;
        self.state.swapchain.recreate(width, height)?;

        let extent = self.state.swapchain.extent;
        log::info!("Swapchain recreated: {}x{}", extent.width, extent.height);
        self.app.resize(self.state, extent.width, extent.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let cycle = FrameCycle::new(0);
        assert_eq!(cycle.max_frames_in_flight(), 1);
        assert_eq!(cycle.current_frame(), 0);
        assert!(!cycle.is_recreate_pending());
    }
}
