// Synchronization primitives
//
// One semaphore pair and one fence per frame in flight. Created once and
// kept across swapchain recreation.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &VulkanDevice) -> Result<Self> {
        let device = &device.device;
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let semaphores = create_all(
            2,
            || unsafe { device.create_semaphore(&semaphore_info, None) }.context("Failed to create semaphore"),
            |semaphore| unsafe { device.destroy_semaphore(semaphore, None) },
        )?;

        let fence = match unsafe { device.create_fence(&fence_info, None) } {
            Ok(fence) => fence,
            Err(e) => {
                for semaphore in semaphores {
                    unsafe { device.destroy_semaphore(semaphore, None) };
                }
                return Err(e).context("Failed to create fence");
            }
        };

        Ok(Self {
            image_available: semaphores[0],
            render_finished: semaphores[1],
            in_flight_fence: fence,
        })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// Sync objects for every in-flight slot
pub struct FrameSyncSet {
    frames: Vec<FrameSync>,
    device: Arc<VulkanDevice>,
}

impl FrameSyncSet {
    pub fn new(device: Arc<VulkanDevice>, max_frames_in_flight: usize) -> Result<Self> {
        let frames = create_all(
            max_frames_in_flight,
            || FrameSync::new(&device),
            |sync| sync.destroy(&device.device),
        )?;
        Ok(Self { frames, device })
    }

    pub fn get(&self, frame: usize) -> &FrameSync {
        &self.frames[frame]
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Create `count` objects in order. If one fails, the ones already created are
/// handed to `release` and the error is returned.
fn create_all<T>(
    count: usize,
    mut create: impl FnMut() -> Result<T>,
    mut release: impl FnMut(T),
) -> Result<Vec<T>> {
    let mut created = Vec::with_capacity(count);
    for _ in 0..count {
        match create() {
            Ok(item) => created.push(item),
            Err(e) => {
                created.into_iter().for_each(&mut release);
                return Err(e);
            }
        }
    }
    Ok(created)
}

impl Drop for FrameSyncSet {
    fn drop(&mut self) {
        for sync in &self.frames {
            sync.destroy(&self.device.device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn failed_creation_releases_earlier_objects() {
        let released = RefCell::new(Vec::new());
        let mut next = 0;

        let result = create_all(
            4,
            || {
                next += 1;
                anyhow::ensure!(next < 3, "out of handles");
                Ok(next)
            },
            |item| released.borrow_mut().push(item),
        );

        assert!(result.is_err());
        assert_eq!(*released.borrow(), vec![1, 2]);
    }

    #[test]
    fn successful_creation_releases_nothing() {
        let mut released = 0;
        let mut next = 0;

        let created = create_all(
            3,
            || {
                next += 1;
                Ok(next)
            },
            |_| released += 1,
        )
        .unwrap();

        assert_eq!(created, vec![1, 2, 3]);
        assert_eq!(released, 0);
    }
}
