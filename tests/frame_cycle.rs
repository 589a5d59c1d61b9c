// Frame state machine against a scripted backend

use anyhow::Result;
use ash::vk;
use std::collections::VecDeque;

use swapframe::backend::{AcquireOutcome, PresentOutcome};
use swapframe::{FrameBackend, FrameCycle, FrameError, FrameOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Wait(usize),
    Acquire(usize),
    Begin(usize),
    Record { slot: usize, image_index: u32 },
    Submit(usize),
    Present { slot: usize, image_index: u32 },
    Recreate(u32, u32),
}

struct ScriptedBackend {
    acquires: VecDeque<Result<AcquireOutcome>>,
    presents: VecDeque<PresentOutcome>,
    size: (u32, u32),
    image_count: u32,
    next_image: u32,
    calls: Vec<Call>,
}

impl ScriptedBackend {
    fn new(image_count: u32) -> Self {
        Self {
            acquires: VecDeque::new(),
            presents: VecDeque::new(),
            size: (800, 600),
            image_count,
            next_image: 0,
            calls: Vec::new(),
        }
    }

    fn recreations(&self) -> usize {
        self.calls.iter().filter(|c| matches!(c, Call::Recreate(..))).count()
    }

    fn renders(&self) -> usize {
        self.calls.iter().filter(|c| matches!(c, Call::Record { .. })).count()
    }
}

impl FrameBackend for ScriptedBackend {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::Wait(slot));
        Ok(())
    }

    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.calls.push(Call::Acquire(slot));
        self.acquires.pop_front().unwrap_or_else(|| {
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % self.image_count;
            Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal: false,
            })
        })
    }

    fn begin_slot(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::Begin(slot));
        Ok(())
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        self.calls.push(Call::Record { slot, image_index });
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::Submit(slot));
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        self.calls.push(Call::Present { slot, image_index });
        Ok(self.presents.pop_front().unwrap_or(PresentOutcome::Presented))
    }

    fn drawable_size(&self) -> (u32, u32) {
        self.size
    }

    fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        self.calls.push(Call::Recreate(width, height));
        Ok(())
    }
}

#[test]
fn frame_index_wraps_after_max_frames() {
    for max_frames in 1..=4 {
        let mut cycle = FrameCycle::new(max_frames);
        let mut backend = ScriptedBackend::new(3);
        let start = cycle.current_frame();

        for _ in 0..max_frames {
            assert_eq!(cycle.draw_frame(&mut backend).unwrap(), FrameOutcome::Presented);
        }

        assert_eq!(cycle.current_frame(), start);
        assert_eq!(backend.recreations(), 0);
    }
}

#[test]
fn steady_state_call_order() {
    let mut cycle = FrameCycle::new(2);
    let mut backend = ScriptedBackend::new(3);

    cycle.draw_frame(&mut backend).unwrap();

    assert_eq!(
        backend.calls,
        vec![
            Call::Wait(0),
            Call::Acquire(0),
            Call::Begin(0),
            Call::Record { slot: 0, image_index: 0 },
            Call::Submit(0),
            Call::Present { slot: 0, image_index: 0 },
        ]
    );
    assert_eq!(cycle.current_frame(), 1);
}

#[test]
fn out_of_date_acquire_recreates_without_rendering() {
    let mut cycle = FrameCycle::new(2);
    let mut backend = ScriptedBackend::new(3);
    backend.acquires.push_back(Ok(AcquireOutcome::OutOfDate));

    let outcome = cycle.draw_frame(&mut backend).unwrap();

    assert_eq!(outcome, FrameOutcome::Recreated);
    assert_eq!(cycle.current_frame(), 0);
    assert_eq!(backend.renders(), 0);
    // The fence is only reset once a frame is actually going to be submitted
    assert!(!backend.calls.contains(&Call::Begin(0)));
    assert_eq!(backend.calls.last(), Some(&Call::Recreate(800, 600)));

    // Next cycle starts fresh on the same slot
    assert_eq!(cycle.draw_frame(&mut backend).unwrap(), FrameOutcome::Presented);
    assert_eq!(backend.renders(), 1);
    assert_eq!(cycle.current_frame(), 1);
}

#[test]
fn suboptimal_acquire_still_renders() {
    let mut cycle = FrameCycle::new(2);
    let mut backend = ScriptedBackend::new(3);
    backend.acquires.push_back(Ok(AcquireOutcome::Ready {
        image_index: 2,
        suboptimal: true,
    }));

    assert_eq!(cycle.draw_frame(&mut backend).unwrap(), FrameOutcome::Presented);
    assert!(backend.calls.contains(&Call::Record { slot: 0, image_index: 2 }));
    assert_eq!(backend.recreations(), 0);
}

#[test]
fn suboptimal_or_out_of_date_present_recreates_and_advances() {
    for presented in [PresentOutcome::Suboptimal, PresentOutcome::OutOfDate] {
        let mut cycle = FrameCycle::new(2);
        let mut backend = ScriptedBackend::new(3);
        backend.presents.push_back(presented);

        assert_eq!(cycle.draw_frame(&mut backend).unwrap(), FrameOutcome::Recreated);
        assert_eq!(backend.renders(), 1);
        assert_eq!(backend.recreations(), 1);
        assert_eq!(cycle.current_frame(), 1);
    }
}

#[test]
fn resize_request_recreates_after_present() {
    let mut cycle = FrameCycle::new(2);
    let mut backend = ScriptedBackend::new(3);
    backend.size = (1024, 768);

    cycle.request_resize();
    assert_eq!(cycle.draw_frame(&mut backend).unwrap(), FrameOutcome::Recreated);
    assert_eq!(backend.calls.last(), Some(&Call::Recreate(1024, 768)));

    // The flag is consumed by the rebuild
    assert_eq!(cycle.draw_frame(&mut backend).unwrap(), FrameOutcome::Presented);
    assert_eq!(backend.recreations(), 1);
}

#[test]
fn minimized_window_defers_until_restored() {
    let mut cycle = FrameCycle::new(2);
    let mut backend = ScriptedBackend::new(3);
    backend.size = (0, 0);
    backend.acquires.push_back(Ok(AcquireOutcome::OutOfDate));

    assert_eq!(cycle.draw_frame(&mut backend).unwrap(), FrameOutcome::Deferred);
    assert!(cycle.is_recreate_pending());

    // Still minimized: nothing touches the device
    let calls_before = backend.calls.len();
    assert_eq!(cycle.draw_frame(&mut backend).unwrap(), FrameOutcome::Deferred);
    assert_eq!(backend.calls.len(), calls_before);

    backend.size = (640, 480);
    assert_eq!(cycle.draw_frame(&mut backend).unwrap(), FrameOutcome::Recreated);
    assert!(!cycle.is_recreate_pending());
    assert_eq!(backend.calls.last(), Some(&Call::Recreate(640, 480)));
    assert_eq!(backend.renders(), 0);

    assert_eq!(cycle.draw_frame(&mut backend).unwrap(), FrameOutcome::Presented);
    assert_eq!(cycle.current_frame(), 1);
}

#[test]
fn zero_width_alone_defers() {
    let mut cycle = FrameCycle::new(2);
    let mut backend = ScriptedBackend::new(3);
    backend.size = (0, 600);

    assert_eq!(cycle.recreate_chain(&mut backend).unwrap(), FrameOutcome::Deferred);
    assert_eq!(backend.recreations(), 0);
}

#[test]
fn surface_errors_are_fatal() {
    let mut cycle = FrameCycle::new(2);
    let mut backend = ScriptedBackend::new(3);
    backend
        .acquires
        .push_back(Err(FrameError::Surface(vk::Result::ERROR_SURFACE_LOST_KHR).into()));

    let err = cycle.draw_frame(&mut backend).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<FrameError>(),
        Some(FrameError::Surface(vk::Result::ERROR_SURFACE_LOST_KHR))
    ));
    assert_eq!(backend.renders(), 0);
    assert_eq!(backend.recreations(), 0);
    assert_eq!(cycle.current_frame(), 0);
}
