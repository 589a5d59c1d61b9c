// Error taxonomy
//
// Fatal setup/runtime failures that callers may want to tell apart.
// Everything travels inside anyhow::Error; recover the kind with downcast_ref.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    /// Device memory, buffer or image creation failed
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// None of the candidate formats support the requested tiling/features
    #[error("no supported format among {0:?}")]
    UnsupportedFormat(Vec<vk::Format>),

    /// Acquire or present returned something other than success/suboptimal/out-of-date
    #[error("surface error: {0}")]
    Surface(vk::Result),

    #[error("failed to load shader {path:?}: {source}")]
    ShaderLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Requested debug layer is not installed
    #[error("validation setup failed: {0}")]
    ValidationSetup(String),

    #[error("no suitable GPU: {0}")]
    NoSuitableDevice(String),

    /// Texture source does not match the requested layout, or an unsupported layout transition
    #[error("invalid texture layout: {0}")]
    TextureLayout(String),
}

impl FrameError {
    /// Resource creation or memory binding failure for the named resource
    pub fn allocation(what: impl std::fmt::Display, result: vk::Result) -> Self {
        FrameError::Allocation(format!("{what}: {result}"))
    }
}

impl From<gpu_allocator::AllocationError> for FrameError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        FrameError::Allocation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downcast_through_anyhow() {
        let err: anyhow::Error = FrameError::Surface(vk::Result::ERROR_DEVICE_LOST).into();
        let err = err.context("presenting frame");

        match err.downcast_ref::<FrameError>() {
            Some(FrameError::Surface(code)) => assert_eq!(*code, vk::Result::ERROR_DEVICE_LOST),
            other => panic!("unexpected error kind: {other:?}"),
        }
    }

    #[test]
    fn creation_failures_are_allocation_errors() {
        let err: anyhow::Error =
            FrameError::allocation("create buffer 'vertices'", vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).into();

        match err.downcast_ref::<FrameError>() {
            Some(FrameError::Allocation(message)) => {
                assert!(message.contains("vertices"));
                assert!(message.contains("ERROR_OUT_OF_DEVICE_MEMORY"));
            }
            other => panic!("unexpected error kind: {other:?}"),
        }
    }

    #[test]
    fn unsupported_format_lists_candidates() {
        let err = FrameError::UnsupportedFormat(vec![vk::Format::D32_SFLOAT]);
        assert!(err.to_string().contains("D32_SFLOAT"));
    }
}
