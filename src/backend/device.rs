// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Window surface creation
// - Physical device selection (prefer discrete GPU)
// - Logical device + graphics/present queue creation
// - Memory allocator setup

use anyhow::{Context, Result};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use crate::error::FrameError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Depth formats in order of preference
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Queue family indices used by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    /// Pick the first graphics-capable family and the first family that can present.
    pub fn select(
        families: &[vk::QueueFamilyProperties],
        mut can_present: impl FnMut(u32) -> bool,
    ) -> Option<Self> {
        let mut graphics = None;
        let mut present = None;

        for (index, family) in families.iter().enumerate() {
            let index = index as u32;
            if graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics = Some(index);
            }
            if present.is_none() && can_present(index) {
                present = Some(index);
            }
            if graphics.is_some() && present.is_some() {
                break;
            }
        }

        Some(Self {
            graphics: graphics?,
            present: present?,
        })
    }

    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Format capability lookup, split out so format selection can be tested without a GPU
pub trait FormatSupport {
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;
}

/// Return the first candidate whose `tiling` features contain `features`.
pub fn find_supported_format<Q: FormatSupport + ?Sized>(
    query: &Q,
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
) -> Result<vk::Format> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = query.format_properties(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| FrameError::UnsupportedFormat(candidates.to_vec()).into())
}

pub fn has_stencil_component(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT
    )
}

/// Highest sample count usable for both color and depth framebuffer attachments
pub fn max_usable_sample_count(limits: &vk::PhysicalDeviceLimits) -> vk::SampleCountFlags {
    let counts = limits.framebuffer_color_sample_counts & limits.framebuffer_depth_sample_counts;

    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| counts.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

fn device_score(device_type: vk::PhysicalDeviceType) -> u32 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
        _ => 1,
    }
}

fn supports_required_features(features: &vk::PhysicalDeviceFeatures) -> bool {
    features.sampler_anisotropy == vk::TRUE && features.sample_rate_shading == vk::TRUE
}

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Taken in Drop before the device is destroyed
    allocator: Mutex<Option<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    _entry: Entry,

    // Window surface
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,

    // Queue handles
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub queue_families: QueueFamilies,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,

    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Create instance, surface and device for `window`
    ///
    /// # Arguments
    /// * `app_name` - Application name for debugging
    /// * `enable_validation` - Enable Vulkan validation layers (debug only)
    /// * `window` - Window the surface is created for
    pub fn new<W>(app_name: &str, enable_validation: bool, window: &W) -> Result<Arc<Self>>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        log::info!("Creating Vulkan device: {}", app_name);

        let display_handle = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let window_handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        // Step 1: Load Vulkan library
        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        // Step 2: Create instance
        if enable_validation {
            Self::check_validation_layer(&entry)?;
        }
        let extensions = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query surface extensions")?;
        let instance = Self::create_instance(&entry, app_name, extensions, enable_validation)?;
        // Destroys whatever has been created so far if a later step fails
        let mut partial = PartialInstance::new(instance.clone());

        // Step 3: Setup debug messenger if validation enabled
        if enable_validation {
            partial.debug_utils = Some(Self::setup_debug_messenger(&entry, &instance)?);
        }

        // Step 4: Create surface
        let surface = unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        }
        .context("Failed to create window surface")?;
        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        partial.surface = Some((surface_loader.clone(), surface));

        // Step 5: Pick physical device (GPU)
        let (physical_device, queue_families) =
            Self::pick_physical_device(&instance, &surface_loader, surface)?;

        // Step 6: Create logical device
        let device = Self::create_logical_device(&instance, physical_device, &queue_families)?;
        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        // Step 7: Create memory allocator
        let allocator = match Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        }) {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(FrameError::from(e).into());
            }
        };

        let debug_utils = partial.release();

        Ok(Arc::new(Self {
            allocator: Mutex::new(Some(allocator)),
            device,
            physical_device,
            instance,
            _entry: entry,
            surface,
            surface_loader,
            graphics_queue,
            present_queue,
            queue_families,
            debug_utils,
            properties,
        }))
    }

    fn check_validation_layer(entry: &Entry) -> Result<()> {
        let layers = unsafe { entry.enumerate_instance_layer_properties() }
            .context("Failed to enumerate instance layers")?;

        let available = layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER);

        if !available {
            return Err(FrameError::ValidationSetup(format!(
                "{} requested but not available",
                VALIDATION_LAYER.to_string_lossy()
            ))
            .into());
        }
        Ok(())
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        surface_extensions: &[*const std::ffi::c_char],
        enable_validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(app_name)?;

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"swapframe")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_2);

        let mut extensions = surface_extensions.to_vec();
        if enable_validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layer_names = if enable_validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")?;

        Ok(instance)
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                    | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
            .map_err(|e| FrameError::ValidationSetup(format!("debug messenger: {e}")))?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if devices.is_empty() {
            return Err(FrameError::NoSuitableDevice("no Vulkan-capable GPU found".into()).into());
        }

        let mut best_device = None;
        let mut best_score = 0;
        let mut rejected = Vec::new();

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned();

            match Self::check_device(instance, surface_loader, surface, device) {
                Ok(families) => {
                    let score = device_score(props.device_type);
                    if score > best_score {
                        best_score = score;
                        best_device = Some((device, families));
                    }
                }
                Err(reason) => {
                    log::debug!("Skipping GPU {}: {}", name, reason);
                    rejected.push(format!("{name}: {reason}"));
                }
            }
        }

        best_device.ok_or_else(|| FrameError::NoSuitableDevice(rejected.join("; ")).into())
    }

    /// Returns the queue families to use, or why the device cannot be used
    fn check_device(
        instance: &ash::Instance,
        surface_loader: &ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
        device: vk::PhysicalDevice,
    ) -> std::result::Result<QueueFamilies, String> {
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(device) };
        let families = QueueFamilies::select(&queue_families, |index| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        })
        .ok_or("missing graphics or present queue family")?;

        let extensions = unsafe { instance.enumerate_device_extension_properties(device) }
            .map_err(|e| e.to_string())?;
        let has_swapchain = extensions.iter().any(|ext| {
            let name = unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) };
            name == ash::khr::swapchain::NAME
        });
        if !has_swapchain {
            return Err("VK_KHR_swapchain not supported".into());
        }

        let formats = unsafe { surface_loader.get_physical_device_surface_formats(device, surface) }
            .map_err(|e| e.to_string())?;
        let present_modes =
            unsafe { surface_loader.get_physical_device_surface_present_modes(device, surface) }
                .map_err(|e| e.to_string())?;
        if formats.is_empty() || present_modes.is_empty() {
            return Err("surface reports no formats or present modes".into());
        }

        let features = unsafe { instance.get_physical_device_features(device) };
        if !supports_required_features(&features) {
            return Err("samplerAnisotropy and sampleRateShading are required".into());
        }

        Ok(families)
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        families: &QueueFamilies,
    ) -> Result<ash::Device> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        let extensions = [ash::khr::swapchain::NAME.as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(true)
            .sample_rate_shading(true);

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }
            .context("Failed to create logical device")?;

        Ok(device)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("device_wait_idle failed")?;
        Ok(())
    }

    /// Allocate memory for a resource through the shared allocator
    pub fn allocate(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> Result<Allocation> {
        let mut guard = self.allocator.lock();
        let allocator = guard
            .as_mut()
            .ok_or_else(|| FrameError::Allocation("allocator already shut down".into()))?;

        let allocation = allocator
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location,
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(FrameError::from)?;

        Ok(allocation)
    }

    pub fn free(&self, allocation: Allocation) {
        if let Some(allocator) = self.allocator.lock().as_mut() {
            if let Err(e) = allocator.free(allocation) {
                log::error!("Failed to free allocation: {}", e);
            }
        }
    }

    pub fn find_depth_format(&self) -> Result<vk::Format> {
        find_supported_format(
            self,
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    pub fn max_usable_sample_count(&self) -> vk::SampleCountFlags {
        max_usable_sample_count(&self.properties.limits)
    }

    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.properties.limits.max_sampler_anisotropy
    }
}

/// Instance-level handles of a device that is still being brought up.
/// Dropping it destroys them in reverse creation order; `release` hands them over.
struct PartialInstance {
    instance: Option<ash::Instance>,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    surface: Option<(ash::khr::surface::Instance, vk::SurfaceKHR)>,
}

impl PartialInstance {
    fn new(instance: ash::Instance) -> Self {
        Self {
            instance: Some(instance),
            debug_utils: None,
            surface: None,
        }
    }

    /// Disarm the guard. The debug messenger is the only part the device does not already hold.
    fn release(mut self) -> Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)> {
        self.instance = None;
        self.surface = None;
        self.debug_utils.take()
    }
}

impl Drop for PartialInstance {
    fn drop(&mut self) {
        let Some(instance) = self.instance.take() else {
            return;
        };

        log::debug!("Device bring-up failed, destroying partial instance");
        unsafe {
            if let Some((loader, surface)) = self.surface.take() {
                loader.destroy_surface(surface, None);
            }
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            instance.destroy_instance(None);
        }
    }
}

impl FormatSupport for VulkanDevice {
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        }
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Allocator frees its memory blocks through the device
        drop(self.allocator.lock().take());

        unsafe {
            self.device.destroy_device(None);

            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[Vulkan] {}", message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[Vulkan] {}", message),
        _ => log::debug!("[Vulkan] {}", message),
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeFormats(HashMap<vk::Format, vk::FormatProperties>);

    impl FormatSupport for FakeFormats {
        fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
            self.0.get(&format).copied().unwrap_or_default()
        }
    }

    fn optimal(features: vk::FormatFeatureFlags) -> vk::FormatProperties {
        vk::FormatProperties {
            optimal_tiling_features: features,
            ..Default::default()
        }
    }

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn first_supported_candidate_wins() {
        let depth = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        let fake = FakeFormats(HashMap::from([
            (vk::Format::D32_SFLOAT_S8_UINT, optimal(depth)),
            (vk::Format::D24_UNORM_S8_UINT, optimal(depth)),
        ]));

        let format = find_supported_format(
            &fake,
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            depth,
        )
        .unwrap();
        assert_eq!(format, vk::Format::D32_SFLOAT_S8_UINT);
    }

    #[test]
    fn tiling_selects_feature_set() {
        let depth = vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        let fake = FakeFormats(HashMap::from([(vk::Format::D32_SFLOAT, optimal(depth))]));

        let linear = find_supported_format(
            &fake,
            &[vk::Format::D32_SFLOAT],
            vk::ImageTiling::LINEAR,
            depth,
        );
        assert!(linear.is_err());
    }

    #[test]
    fn no_supported_candidate_is_unsupported_format() {
        let fake = FakeFormats(HashMap::new());
        let err = find_supported_format(
            &fake,
            &DEPTH_FORMAT_CANDIDATES,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
        .unwrap_err();

        match err.downcast_ref::<FrameError>() {
            Some(FrameError::UnsupportedFormat(candidates)) => {
                assert_eq!(candidates.as_slice(), &DEPTH_FORMAT_CANDIDATES)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn partial_feature_match_is_rejected() {
        let fake = FakeFormats(HashMap::from([(
            vk::Format::R8G8B8A8_SRGB,
            optimal(vk::FormatFeatureFlags::SAMPLED_IMAGE),
        )]));
        let wanted =
            vk::FormatFeatureFlags::SAMPLED_IMAGE | vk::FormatFeatureFlags::BLIT_DST;

        assert!(find_supported_format(
            &fake,
            &[vk::Format::R8G8B8A8_SRGB],
            vk::ImageTiling::OPTIMAL,
            wanted
        )
        .is_err());
    }

    #[test]
    fn sample_count_is_highest_common_bit() {
        let limits = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4
                | vk::SampleCountFlags::TYPE_8,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1
                | vk::SampleCountFlags::TYPE_2
                | vk::SampleCountFlags::TYPE_4,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&limits), vk::SampleCountFlags::TYPE_4);

        let single = vk::PhysicalDeviceLimits {
            framebuffer_color_sample_counts: vk::SampleCountFlags::TYPE_1,
            framebuffer_depth_sample_counts: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        assert_eq!(max_usable_sample_count(&single), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn queue_families_prefer_first_match() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
        ];

        let selected = QueueFamilies::select(&families, |i| i == 2).unwrap();
        assert_eq!(selected, QueueFamilies { graphics: 1, present: 2 });
        assert!(!selected.is_shared());
        assert_eq!(selected.unique(), vec![1, 2]);

        let shared = QueueFamilies::select(&families, |i| i >= 1).unwrap();
        assert!(shared.is_shared());
        assert_eq!(shared.unique(), vec![1]);
    }

    #[test]
    fn queue_families_require_present_support() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilies::select(&families, |_| false).is_none());
    }

    #[test]
    fn discrete_gpu_outranks_integrated() {
        assert!(
            device_score(vk::PhysicalDeviceType::DISCRETE_GPU)
                > device_score(vk::PhysicalDeviceType::INTEGRATED_GPU)
        );
        assert!(device_score(vk::PhysicalDeviceType::CPU) > 0);
    }

    #[test]
    fn required_features_need_both_flags() {
        let mut features = vk::PhysicalDeviceFeatures {
            sampler_anisotropy: vk::TRUE,
            ..Default::default()
        };
        assert!(!supports_required_features(&features));
        features.sample_rate_shading = vk::TRUE;
        assert!(supports_required_features(&features));
    }

    #[test]
    fn stencil_formats() {
        assert!(has_stencil_component(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil_component(vk::Format::D32_SFLOAT));
    }
}
