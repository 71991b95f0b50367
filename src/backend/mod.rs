// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Every Vulkan object is owned by exactly one RAII wrapper; shared parents
// (instance, device) are held through Arc so children cannot outlive them.

pub mod buffer;
pub mod device;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod renderer;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use instance::VulkanInstance;
pub use renderer::{FrameStatus, Renderer, RendererSettings};
pub use surface::Surface;
pub use swapchain::Swapchain;
