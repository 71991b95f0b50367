// Window surface
//
// The window is an external collaborator: it hands over native handles once,
// then reports its drawable size on demand. Everything downstream only sees
// the `SurfaceProvider` trait.

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;

use super::error::{RenderError, RenderResult};
use super::instance::VulkanInstance;

/// Source of the drawable size the swapchain must match
pub trait SurfaceProvider {
    /// Current drawable size in physical pixels
    fn drawable_size(&self) -> vk::Extent2D;

    /// Minimized windows report no usable size
    fn is_minimized(&self) -> bool {
        let size = self.drawable_size();
        size.width == 0 || size.height == 0
    }
}

impl SurfaceProvider for winit::window::Window {
    fn drawable_size(&self) -> vk::Extent2D {
        let size = self.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }

    fn is_minimized(&self) -> bool {
        let size = self.inner_size();
        size.width == 0
            || size.height == 0
            || winit::window::Window::is_minimized(self).unwrap_or(false)
    }
}

/// Presentable surface bound to one window
pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: ash::extensions::khr::Surface,
    _instance: Arc<VulkanInstance>,
}

impl Surface {
    pub fn new<W>(instance: Arc<VulkanInstance>, window: &W) -> RenderResult<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        let handle = unsafe {
            ash_window::create_surface(
                &instance.entry,
                &instance.instance,
                window.raw_display_handle(),
                window.raw_window_handle(),
                None,
            )
        }
        .map_err(|e| RenderError::SurfaceCreation(format!("{e:?}")))?;

        let loader = ash::extensions::khr::Surface::new(&instance.entry, &instance.instance);

        log::info!("Window surface created");
        Ok(Self {
            handle,
            loader,
            _instance: instance,
        })
    }

    /// Whether `queue_family` on `physical_device` can present to this surface
    pub fn supports_present(
        &self,
        physical_device: vk::PhysicalDevice,
        queue_family: u32,
    ) -> RenderResult<bool> {
        let supported = unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, queue_family, self.handle)
        }?;
        Ok(supported)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}
