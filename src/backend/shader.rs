// Shader module loading
//
// Pipelines are built from precompiled SPIR-V files read at runtime.

use anyhow::{Context, Result};
use ash::vk;
use std::fs::File;
use std::path::Path;

use super::VulkanDevice;
use crate::error::FrameError;

/// Read a SPIR-V binary into correctly aligned words
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let load_error = |source| FrameError::ShaderLoad {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(load_error)?;
    let words = ash::util::read_spv(&mut file).map_err(load_error)?;
    Ok(words)
}

/// Shader module destroyed on drop
pub struct ShaderModule<'a> {
    pub module: vk::ShaderModule,
    device: &'a VulkanDevice,
}

impl<'a> ShaderModule<'a> {
    pub fn load(device: &'a VulkanDevice, path: &Path) -> Result<Self> {
        let code = read_spirv(path)?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .with_context(|| format!("Failed to create shader module from {:?}", path))?;

        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_shader_load_error() {
        let err = read_spirv(Path::new("shaders/does_not_exist.spv")).unwrap_err();
        match err.downcast_ref::<FrameError>() {
            Some(FrameError::ShaderLoad { path, .. }) => {
                assert!(path.ends_with("does_not_exist.spv"))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn truncated_binary_is_shader_load_error() {
        let path = std::env::temp_dir().join("swapframe_truncated.spv");
        std::fs::write(&path, [0x03, 0x02, 0x23]).unwrap();

        let err = read_spirv(&path).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::ShaderLoad { .. })
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn magic_word_round_trips() {
        let path = std::env::temp_dir().join("swapframe_magic.spv");
        std::fs::write(&path, 0x0723_0203u32.to_le_bytes()).unwrap();

        assert_eq!(read_spirv(&path).unwrap(), vec![0x0723_0203]);
        let _ = std::fs::remove_file(&path);
    }
}
