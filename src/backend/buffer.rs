// Buffer utilities for vertex and uniform buffers
//
// Host-visible buffers backed by gpu-allocator. Small and rewritten often
// (per-frame uniforms) or written once (the triangle), so CpuToGpu memory
// that stays mapped is all we need.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::error::{RenderError, RenderResult};
use super::VulkanDevice;

/// GPU buffer that frees its memory on drop
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> RenderResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });

        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe {
            device
                .device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };

        // Owned from here on; drop releases both halves
        let gpu_buffer = Self {
            buffer,
            size,
            allocation: Some(allocation),
            device,
        };
        bound?;

        log::debug!("Allocated buffer '{}' ({} bytes)", name, size);
        Ok(gpu_buffer)
    }

    /// Create a buffer and fill it with data
    pub fn with_data<T: bytemuck::Pod>(
        device: Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> RenderResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let mut buffer = Self::new(device, name, bytes.len() as vk::DeviceSize, usage)?;
        buffer.write(data)?;
        Ok(buffer)
    }

    /// Copy `data` to the start of the mapped buffer
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> RenderResult<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        check_fits(bytes.len() as vk::DeviceSize, self.size)?;

        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or(RenderError::Vulkan(vk::Result::ERROR_MEMORY_MAP_FAILED))?;

        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

fn check_fits(len: vk::DeviceSize, capacity: vk::DeviceSize) -> RenderResult<()> {
    if len > capacity {
        return Err(RenderError::BufferOverflow { len, capacity });
    }
    Ok(())
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            if let Err(e) = self.device.allocator().free(allocation) {
                log::warn!("Failed to free buffer allocation: {}", e);
            }
        }
    }
}
