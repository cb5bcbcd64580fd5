//! SPIR-V shader modules
//!
//! Binaries are read whole from disk. A missing file or a blob that is not SPIR-V is
//! fatal at startup, with the path in the error.

use ash::{vk, Device};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::render::backends::vulkan::initialization::context::creation;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader entry point shared by every stage
pub const ENTRY_POINT: &std::ffi::CStr = unsafe { std::ffi::CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Decode SPIR-V words from `bytes`, rejecting unaligned or foreign data
pub fn parse_spirv(path: &Path, bytes: &[u8]) -> VulkanResult<Vec<u32>> {
    let invalid = |reason: String| VulkanError::InvalidShader {
        path: path.to_path_buf(),
        reason,
    };
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|e| invalid(e.to_string()))?;
    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(other) => Err(invalid(format!("bad magic number {:#010x}", other))),
        None => Err(invalid("empty file".to_string())),
    }
}

/// SPIR-V shader module wrapper with RAII cleanup
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
    path: PathBuf,
}

impl ShaderModule {
    pub fn from_file(device: &Device, path: impl AsRef<Path>) -> VulkanResult<Self> {
        let path = path.as_ref();
        log::debug!("[SHADER] Loading {}", path.display());

        let bytes = std::fs::read(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VulkanError::ShaderNotFound {
                path: path.to_path_buf(),
            },
            _ => VulkanError::InvalidShader {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;
        let words = parse_spirv(path, &bytes)?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe {
            device
                .create_shader_module(&create_info, None)
                .map_err(creation("create shader module"))?
        };

        log::debug!("[SHADER] {} words from {}", words.len(), path.display());
        Ok(Self {
            device: device.clone(),
            module,
            path: path.to_path_buf(),
        })
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stage_info(&self, stage: vk::ShaderStageFlags) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(stage)
            .module(self.module)
            .name(ENTRY_POINT)
            .build()
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_parse_accepts_spirv_header() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        let words = parse_spirv(Path::new("ok.spv"), &bytes);
        assert_eq!(words.map(|w| w.len()).ok(), Some(5));
    }

    #[test]
    fn test_parse_rejects_unaligned_length() {
        let mut bytes = words_to_bytes(&[SPIRV_MAGIC]);
        bytes.push(0);
        assert!(matches!(
            parse_spirv(Path::new("odd.spv"), &bytes),
            Err(VulkanError::InvalidShader { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_magic() {
        let bytes = words_to_bytes(&[0xdead_beef, 0]);
        let err = parse_spirv(Path::new("text.spv"), &bytes).err();
        let message = err.map(|e| e.to_string()).unwrap_or_default();
        assert!(message.contains("text.spv"));
        assert!(message.contains("magic"));
    }

    #[test]
    fn test_not_found_message_names_path() {
        let path = Path::new("definitely/not/here.spv");
        let err = std::fs::read(path)
            .map_err(|_| VulkanError::ShaderNotFound { path: path.to_path_buf() })
            .err();
        assert!(err.map(|e| e.to_string()).unwrap_or_default().contains("here.spv"));
    }
}
