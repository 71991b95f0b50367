// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Physical device selection (graphics + present queues, extensions, features)
// - Logical device + queue creation
// - Memory allocator setup
//
// Selection runs on plain `AdapterCandidate` snapshots so the suitability
// rules can be checked without a GPU.

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeSet;
use std::ffi::CStr;
use std::mem::ManuallyDrop;
use std::sync::Arc;

use super::error::{RenderError, RenderResult};
use super::instance::VulkanInstance;
use super::surface::Surface;

/// Device extensions every adapter must expose
pub fn required_device_extensions() -> [&'static CStr; 2] {
    [
        ash::extensions::khr::Swapchain::name(),
        // Dynamic primitive topology
        ash::extensions::ext::ExtendedDynamicState::name(),
    ]
}

/// Capabilities of one queue family relevant to presentation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub graphics: bool,
    pub present: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// Search for a graphics family and a present family.
    ///
    /// A family that does both wins; otherwise the first of each kind.
    pub fn find(families: &[QueueFamilyInfo]) -> Option<Self> {
        if let Some(shared) = families.iter().position(|f| f.graphics && f.present) {
            let shared = shared as u32;
            return Some(Self {
                graphics: shared,
                present: shared,
            });
        }

        let graphics = families.iter().position(|f| f.graphics)?;
        let present = families.iter().position(|f| f.present)?;
        Some(Self {
            graphics: graphics as u32,
            present: present as u32,
        })
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, one queue gets created per entry
    pub fn unique(&self) -> Vec<u32> {
        let set: BTreeSet<u32> = [self.graphics, self.present].into_iter().collect();
        set.into_iter().collect()
    }
}

/// Snapshot of a physical device, taken once at startup
#[derive(Debug, Clone)]
pub struct AdapterCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: Vec<QueueFamilyInfo>,
    pub extensions: Vec<String>,
    pub features_supported: bool,
    /// Surface offers at least one format and one present mode
    pub surface_adequate: bool,
}

impl AdapterCandidate {
    /// Suitability score, higher is better (prefer discrete GPU)
    pub fn score(&self) -> u32 {
        match self.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
            vk::PhysicalDeviceType::VIRTUAL_GPU => 10,
            _ => 1,
        }
    }

    /// Queue families to use, or the reason this adapter cannot be used
    pub fn check(&self, required_extensions: &[&str]) -> Result<QueueFamilyIndices, String> {
        let indices = QueueFamilyIndices::find(&self.queue_families).ok_or_else(|| {
            let graphics = self.queue_families.iter().any(|f| f.graphics);
            if graphics {
                "no queue family can present to the surface".to_string()
            } else {
                "no graphics queue family".to_string()
            }
        })?;

        let missing: Vec<&str> = required_extensions
            .iter()
            .copied()
            .filter(|required| !self.extensions.iter().any(|ext| ext == required))
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing extensions {}", missing.join(", ")));
        }

        if !self.features_supported {
            return Err("required features not supported".to_string());
        }

        if !self.surface_adequate {
            return Err("surface reports no formats or present modes".to_string());
        }

        Ok(indices)
    }
}

/// Pick the best qualifying adapter; ties go to the first enumerated
pub fn select_adapter(
    candidates: &[AdapterCandidate],
    required_extensions: &[&str],
) -> RenderResult<(usize, QueueFamilyIndices)> {
    let mut best: Option<(usize, QueueFamilyIndices, u32)> = None;
    let mut rejected = Vec::new();

    for (index, candidate) in candidates.iter().enumerate() {
        match candidate.check(required_extensions) {
            Ok(indices) => {
                let score = candidate.score();
                if best.map_or(true, |(_, _, best_score)| score > best_score) {
                    best = Some((index, indices, score));
                }
            }
            Err(reason) => {
                log::warn!("Rejecting GPU {}: {}", candidate.name, reason);
                rejected.push(format!("{}: {}", candidate.name, reason));
            }
        }
    }

    if candidates.is_empty() {
        rejected.push("no Vulkan-capable GPU enumerated".to_string());
    }

    best.map(|(index, indices, _)| (index, indices))
        .ok_or(RenderError::NoSuitableAdapter { rejected })
}

/// `range` is `VkPhysicalDeviceLimits::pointSizeRange`, inclusive
pub fn point_size_fits(range: [f32; 2], size: f32) -> bool {
    size >= range[0] && size <= range[1]
}

/// Run `cleanup` when `result` is an error, for handles not yet owned by a wrapper
fn cleanup_on_err<T, E>(result: Result<T, E>, cleanup: impl FnOnce()) -> Result<T, E> {
    if result.is_err() {
        cleanup();
    }
    result
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    allocator: ManuallyDrop<Mutex<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: Arc<VulkanInstance>,

    // Queue handles (may be the same queue)
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilyIndices,

    pub dynamic_state: ash::extensions::ext::ExtendedDynamicState,
    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Select an adapter able to present to `surface` and open it.
    ///
    /// Fails with `NoSuitableAdapter` when nothing qualifies.
    pub fn new(instance: Arc<VulkanInstance>, surface: &Surface) -> RenderResult<Arc<Self>> {
        let physical_devices = unsafe { instance.instance.enumerate_physical_devices() }?;

        let candidates = physical_devices
            .iter()
            .map(|&pd| Self::inspect_adapter(&instance.instance, surface, pd))
            .collect::<RenderResult<Vec<_>>>()?;

        log::info!("Available physical devices:");
        for candidate in &candidates {
            log::info!("  - {} ({:?})", candidate.name, candidate.device_type);
        }

        let required: Vec<String> = required_device_extensions()
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        let required: Vec<&str> = required.iter().map(String::as_str).collect();

        let (index, queue_families) = select_adapter(&candidates, &required)?;
        let physical_device = physical_devices[index];

        let device = Self::create_logical_device(&instance.instance, physical_device, queue_families)?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let properties = unsafe { instance.instance.get_physical_device_properties(physical_device) };

        log::info!("Selected GPU: {}", candidates[index].name);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );
        log::info!(
            "Queue families: graphics={} present={}",
            queue_families.graphics,
            queue_families.present
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        // No wrapper owns the device yet
        let allocator = cleanup_on_err(allocator, || unsafe { device.destroy_device(None) })?;

        let dynamic_state = ash::extensions::ext::ExtendedDynamicState::new(&instance.instance, &device);

        Ok(Arc::new(Self {
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            device,
            physical_device,
            instance,
            graphics_queue,
            present_queue,
            queue_families,
            dynamic_state,
            properties,
        }))
    }

    fn inspect_adapter(
        instance: &ash::Instance,
        surface: &Surface,
        physical_device: vk::PhysicalDevice,
    ) -> RenderResult<AdapterCandidate> {
        let props = unsafe { instance.get_physical_device_properties(physical_device) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let family_props =
            unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
        let queue_families = family_props
            .iter()
            .enumerate()
            .map(|(index, family)| {
                Ok(QueueFamilyInfo {
                    graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
                    present: surface.supports_present(physical_device, index as u32)?,
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;

        let extensions = unsafe { instance.enumerate_device_extension_properties(physical_device) }?
            .iter()
            .map(|ext| {
                unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned()
            })
            .collect::<Vec<_>>();

        let mut dynamic_state_features = vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::default();
        let mut features2 =
            vk::PhysicalDeviceFeatures2::builder().push_next(&mut dynamic_state_features);
        unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
        let features_supported = dynamic_state_features.extended_dynamic_state == vk::TRUE;

        let formats = unsafe {
            surface
                .loader
                .get_physical_device_surface_formats(physical_device, surface.handle)
        }?;
        let present_modes = unsafe {
            surface
                .loader
                .get_physical_device_surface_present_modes(physical_device, surface.handle)
        }?;

        Ok(AdapterCandidate {
            name,
            device_type: props.device_type,
            queue_families,
            extensions,
            features_supported,
            surface_adequate: !formats.is_empty() && !present_modes.is_empty(),
        })
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        queue_families: QueueFamilyIndices,
    ) -> RenderResult<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<_> = required_device_extensions()
            .iter()
            .map(|name| name.as_ptr())
            .collect();

        let features = vk::PhysicalDeviceFeatures::default();
        let mut dynamic_state_features =
            vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::builder().extended_dynamic_state(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features)
            .push_next(&mut dynamic_state_features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }?;

        log::info!("Logical device created with {} queue(s)", queue_create_infos.len());
        Ok(device)
    }

    /// Exclusive access to the GPU memory allocator
    pub fn allocator(&self) -> MutexGuard<'_, Allocator> {
        self.allocator.lock()
    }

    /// Whether shaders may write `gl_PointSize = size` without clamping
    pub fn supports_point_size(&self, size: f32) -> bool {
        point_size_fits(self.properties.limits.point_size_range, size)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            // Allocator frees its memory blocks, so it must go before the device
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: &[&str] = &["VK_KHR_swapchain", "VK_EXT_extended_dynamic_state"];

    fn family(graphics: bool, present: bool) -> QueueFamilyInfo {
        QueueFamilyInfo { graphics, present }
    }

    fn adapter(name: &str, device_type: vk::PhysicalDeviceType) -> AdapterCandidate {
        AdapterCandidate {
            name: name.to_string(),
            device_type,
            queue_families: vec![family(true, true)],
            extensions: REQUIRED.iter().map(|s| s.to_string()).collect(),
            features_supported: true,
            surface_adequate: true,
        }
    }

    #[test]
    fn test_queue_family_prefers_shared_family() {
        let families = [family(true, false), family(false, true), family(true, true)];
        let indices = QueueFamilyIndices::find(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 2, present: 2 });
        assert!(indices.is_shared());
        assert_eq!(indices.unique(), vec![2]);
    }

    #[test]
    fn test_queue_family_split_graphics_and_present() {
        let families = [family(false, false), family(true, false), family(false, true)];
        let indices = QueueFamilyIndices::find(&families).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 1, present: 2 });
        assert!(!indices.is_shared());
        assert_eq!(indices.unique(), vec![1, 2]);
    }

    #[test]
    fn test_queue_family_requires_both() {
        assert!(QueueFamilyIndices::find(&[family(true, false)]).is_none());
        assert!(QueueFamilyIndices::find(&[family(false, true)]).is_none());
        assert!(QueueFamilyIndices::find(&[]).is_none());
    }

    #[test]
    fn test_adapters_without_present_are_never_selected() {
        let mut no_present = adapter("Discrete", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_present.queue_families = vec![family(true, false)];
        let mut no_graphics = adapter("Compute only", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_graphics.queue_families = vec![family(false, true)];

        let err = select_adapter(&[no_present, no_graphics], REQUIRED).unwrap_err();
        match err {
            RenderError::NoSuitableAdapter { rejected } => {
                assert_eq!(rejected.len(), 2);
                assert!(rejected[0].contains("present"));
                assert!(rejected[1].contains("graphics"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_no_adapters_fails() {
        let err = select_adapter(&[], REQUIRED).unwrap_err();
        assert!(matches!(err, RenderError::NoSuitableAdapter { .. }));
    }

    #[test]
    fn test_missing_extension_rejects_adapter() {
        let mut candidate = adapter("Old GPU", vk::PhysicalDeviceType::DISCRETE_GPU);
        candidate.extensions = vec!["VK_KHR_swapchain".to_string()];
        let reason = candidate.check(REQUIRED).unwrap_err();
        assert!(reason.contains("VK_EXT_extended_dynamic_state"));

        assert!(select_adapter(&[candidate], REQUIRED).is_err());
    }

    #[test]
    fn test_missing_features_or_surface_support_rejects_adapter() {
        let mut no_features = adapter("A", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_features.features_supported = false;
        let mut no_formats = adapter("B", vk::PhysicalDeviceType::DISCRETE_GPU);
        no_formats.surface_adequate = false;

        assert!(select_adapter(&[no_features, no_formats], REQUIRED).is_err());
    }

    #[test]
    fn test_prefers_discrete_gpu() {
        let candidates = [
            adapter("Software", vk::PhysicalDeviceType::CPU),
            adapter("Integrated", vk::PhysicalDeviceType::INTEGRATED_GPU),
            adapter("Discrete", vk::PhysicalDeviceType::DISCRETE_GPU),
        ];
        let (index, _) = select_adapter(&candidates, REQUIRED).unwrap();
        assert_eq!(index, 2);
    }

    #[test]
    fn test_unqualified_discrete_loses_to_qualified_integrated() {
        let mut discrete = adapter("Discrete", vk::PhysicalDeviceType::DISCRETE_GPU);
        discrete.queue_families = vec![family(true, false)];
        let integrated = adapter("Integrated", vk::PhysicalDeviceType::INTEGRATED_GPU);

        let (index, indices) = select_adapter(&[discrete, integrated], REQUIRED).unwrap();
        assert_eq!(index, 1);
        assert!(indices.is_shared());
    }

    #[test]
    fn test_score_ties_keep_first() {
        let candidates = [
            adapter("First", vk::PhysicalDeviceType::INTEGRATED_GPU),
            adapter("Second", vk::PhysicalDeviceType::INTEGRATED_GPU),
        ];
        let (index, _) = select_adapter(&candidates, REQUIRED).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn test_point_size_range_is_inclusive() {
        assert!(point_size_fits([1.0, 64.0], 8.0));
        assert!(point_size_fits([1.0, 8.0], 8.0));
        // Without largePoints the range collapses to 1.0
        assert!(!point_size_fits([1.0, 1.0], 8.0));
    }

    #[test]
    fn test_cleanup_runs_only_on_error() {
        let destroyed = std::cell::Cell::new(0);

        let ok: Result<u32, &str> = cleanup_on_err(Ok(7), || destroyed.set(destroyed.get() + 1));
        assert_eq!(ok, Ok(7));
        assert_eq!(destroyed.get(), 0);

        let failed: Result<u32, &str> =
            cleanup_on_err(Err("allocator"), || destroyed.set(destroyed.get() + 1));
        assert_eq!(failed, Err("allocator"));
        assert_eq!(destroyed.get(), 1);
    }
}
