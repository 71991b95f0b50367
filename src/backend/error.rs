// Render errors
//
// Setup failures and steady-state failures are fatal. Swapchain staleness is
// the single recoverable category and is retried via recreation.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Failed to load Vulkan library: {0}")]
    LoaderUnavailable(String),

    /// No adapter passed the suitability check; one line per rejected adapter
    #[error("No suitable GPU found ({})", rejected.join("; "))]
    NoSuitableAdapter { rejected: Vec<String> },

    #[error("Required extension not available: {0}")]
    MissingExtension(String),

    #[error("Failed to create window surface: {0}")]
    SurfaceCreation(String),

    #[error("Shader not found: {}", path.display())]
    ShaderNotFound { path: PathBuf },

    #[error("Failed to read shader {}: {source}", path.display())]
    ShaderIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid SPIR-V in {}: {reason}", path.display())]
    InvalidShader { path: PathBuf, reason: String },

    #[error("Swapchain out of date")]
    SwapchainOutOfDate,

    #[error("Write of {len} bytes exceeds buffer capacity of {capacity} bytes")]
    BufferOverflow { len: u64, capacity: u64 },

    #[error("GPU memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),

    #[error("Vulkan API error: {0:?}")]
    Vulkan(#[from] vk::Result),
}

impl RenderError {
    /// True for presentation staleness, which must never be treated as fatal
    pub fn is_out_of_date(&self) -> bool {
        matches!(
            self,
            RenderError::SwapchainOutOfDate | RenderError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_date_classification() {
        assert!(RenderError::SwapchainOutOfDate.is_out_of_date());
        assert!(RenderError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());

        assert!(!RenderError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_out_of_date());
        assert!(!RenderError::Vulkan(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY).is_out_of_date());
        assert!(!RenderError::NoSuitableAdapter { rejected: vec![] }.is_out_of_date());
    }

    #[test]
    fn test_no_suitable_adapter_lists_reasons() {
        let err = RenderError::NoSuitableAdapter {
            rejected: vec![
                "llvmpipe: no present queue".to_string(),
                "GPU 1: missing VK_KHR_swapchain".to_string(),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("llvmpipe: no present queue"));
        assert!(message.contains("missing VK_KHR_swapchain"));
    }
}
