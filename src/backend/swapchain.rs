// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// A swapchain is never mutated: resize or staleness drops it and builds a
// new one against the current drawable size.

use ash::vk;
use std::sync::Arc;

use super::device::{QueueFamilyIndices, VulkanDevice};
use super::error::{RenderError, RenderResult};
use super::surface::Surface;

/// Surface properties queried once per (re)creation
#[derive(Debug, Clone, Default)]
pub struct SwapchainSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupport {
    pub fn query(device: &VulkanDevice, surface: &Surface) -> RenderResult<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface
                    .loader
                    .get_physical_device_surface_capabilities(device.physical_device, surface.handle)?,
                formats: surface
                    .loader
                    .get_physical_device_surface_formats(device.physical_device, surface.handle)?,
                present_modes: surface
                    .loader
                    .get_physical_device_surface_present_modes(device.physical_device, surface.handle)?,
            })
        }
    }
}

/// Prefer a 4-component SRGB format, else the first one offered
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            matches!(f.format, vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB)
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// Preferred mode if offered, else MAILBOX, else FIFO (always available)
pub fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    [preferred, vk::PresentModeKHR::MAILBOX]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Fixed surface extent verbatim, otherwise the window size clamped to caps
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One image of slack over the minimum; max_image_count == 0 means unbounded
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        desired.min(caps.max_image_count)
    } else {
        desired
    }
}

/// Concurrent sharing when graphics and present live in different families
pub fn choose_sharing(families: QueueFamilyIndices) -> (vk::SharingMode, Vec<u32>) {
    if families.is_shared() {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    } else {
        (
            vk::SharingMode::CONCURRENT,
            vec![families.graphics, families.present],
        )
    }
}

fn choose_image_usage(caps: &vk::SurfaceCapabilitiesKHR) -> vk::ImageUsageFlags {
    let optional = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    vk::ImageUsageFlags::COLOR_ATTACHMENT | (caps.supported_usage_flags & optional)
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub color_space: vk::ColorSpaceKHR,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: &Surface,
        window_extent: vk::Extent2D,
        preferred_present_mode: vk::PresentModeKHR,
    ) -> RenderResult<Self> {
        let support = SwapchainSupport::query(&device, surface)?;
        let caps = &support.capabilities;

        let surface_format = choose_surface_format(&support.formats)
            .ok_or_else(|| RenderError::SurfaceCreation("surface reports no formats".into()))?;
        let present_mode = choose_present_mode(&support.present_modes, preferred_present_mode);
        let extent = choose_extent(caps, window_extent);
        if extent.width == 0 || extent.height == 0 {
            // Some platforms report a zero current extent while minimized
            return Err(RenderError::SwapchainOutOfDate);
        }
        let image_count = choose_image_count(caps);
        let (sharing_mode, family_indices) = choose_sharing(device.queue_families);

        log::debug!(
            "Creating swapchain: {}x{}, min {} images, {:?}",
            extent.width,
            extent.height,
            image_count,
            sharing_mode
        );

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(choose_image_usage(caps))
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }?;

        // From here on the swapchain is owned by `chain`; an early return drops it
        let mut chain = Self {
            swapchain,
            swapchain_loader,
            images: Vec::new(),
            image_views: Vec::new(),
            format: surface_format.format,
            color_space: surface_format.color_space,
            extent,
            present_mode,
            device,
        };

        chain.images = unsafe { chain.swapchain_loader.get_swapchain_images(swapchain) }?;

        for &image in &chain.images {
            let view = chain.create_image_view(image)?;
            chain.image_views.push(view);
        }

        log::debug!("Created swapchain with {} images", chain.images.len());
        Ok(chain)
    }

    fn create_image_view(&self, image: vk::Image) -> RenderResult<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = unsafe { self.device.device.create_image_view(&create_info, None) }?;
        Ok(view)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Acquire next image for rendering.
    ///
    /// Returns the image index and whether the chain is suboptimal.
    /// Out-of-date surfaces as `RenderError::SwapchainOutOfDate`.
    pub fn acquire_next_image(&self, timeout: u64, semaphore: vk::Semaphore) -> RenderResult<(u32, bool)> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, timeout, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok((index, suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(RenderError::SwapchainOutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Present rendered image to screen.
    ///
    /// Returns true when the chain should be recreated (suboptimal or out of date).
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> RenderResult<bool> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(suboptimal) => Ok(suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        // Images belong to the swapchain and go with it
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
        log::debug!("Swapchain destroyed");
    }
}
