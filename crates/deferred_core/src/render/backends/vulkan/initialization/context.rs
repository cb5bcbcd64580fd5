//! Vulkan context management
//!
//! Instance, surface, physical device selection, logical device and queues. Device
//! selection is strict: a device that cannot run every pass of the renderer is
//! rejected here rather than failing later during pipeline creation.

#[cfg(debug_assertions)]
use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::vk;
use ash::{Device, Entry, Instance};
use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::core::RendererConfig;
use crate::render::backends::vulkan::initialization::window::{Window, WindowError};
use crate::render::frame::{DependencyError, FrameError};
use crate::render::push_constants::{push_size, LightingPush};

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// A create/allocate call failed
    #[error("Failed to {operation}: {result:?}")]
    ResourceCreation {
        /// What was being created
        operation: &'static str,
        result: vk::Result,
    },

    /// None of the depth formats is usable as an optimal-tiled attachment
    #[error("No supported depth format (tried D32_SFLOAT, D32_SFLOAT_S8_UINT, D24_UNORM_S8_UINT)")]
    NoSuitableDepthFormat,

    /// No physical device meets the renderer's minimum capability
    #[error("No suitable GPU: {0}")]
    NoSuitableDevice(String),

    /// SPIR-V file missing on disk
    #[error("Shader binary not found: {}", path.display())]
    ShaderNotFound { path: PathBuf },

    /// SPIR-V file present but unreadable or malformed
    #[error("Invalid shader binary {}: {reason}", path.display())]
    InvalidShader { path: PathBuf, reason: String },

    /// Recreated surface reports a different format than pipelines were built for
    #[error("{attachment} format changed from {previous:?} to {current:?} on recreation")]
    FormatChanged {
        attachment: &'static str,
        previous: vk::Format,
        current: vk::Format,
    },

    /// Illegal frame or pass transition
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Inconsistent cross-queue dependency table
    #[error(transparent)]
    Dependency(#[from] DependencyError),

    #[error(transparent)]
    Window(#[from] WindowError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Map a failed create call to [`VulkanError::ResourceCreation`]
pub fn creation(operation: &'static str) -> impl FnOnce(vk::Result) -> VulkanError {
    move |result| VulkanError::ResourceCreation { operation, result }
}

/// Memory type index matching `type_filter` with all of `properties`
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory.memory_type_count)
        .find(|&i| {
            type_filter & (1 << i) != 0 && memory.memory_types[i as usize].property_flags.contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

fn c_string(value: &str) -> VulkanResult<CString> {
    CString::new(value)
        .map_err(|e| VulkanError::InitializationFailed(format!("Invalid C string {:?}: {}", value, e)))
}

/// Vulkan instance wrapper with RAII cleanup
pub struct VulkanInstance {
    /// Vulkan entry point
    pub entry: Entry,
    /// Vulkan instance handle
    pub instance: Instance,
    #[cfg(debug_assertions)]
    debug: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
}

impl VulkanInstance {
    /// Create a Vulkan 1.2 instance with the extensions GLFW needs
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {:?}", e)))?;

        let app_name_cstr = c_string(app_name)?;
        let engine_name_cstr = c_string("deferred_core")?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name_cstr)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_2);

        let cstr_extensions = window
            .get_required_instance_extensions()?
            .iter()
            .map(|ext| c_string(ext))
            .collect::<VulkanResult<Vec<_>>>()?;

        #[allow(unused_mut)]
        let mut extensions: Vec<*const std::os::raw::c_char> =
            cstr_extensions.iter().map(|ext| ext.as_ptr()).collect();

        let validation = cfg!(debug_assertions) && enable_validation;
        #[cfg(debug_assertions)]
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if validation {
            vec![c_string("VK_LAYER_KHRONOS_validation")?]
        } else {
            Vec::new()
        };
        let layer_name_ptrs: Vec<*const std::os::raw::c_char> =
            layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_name_ptrs);

        let instance = unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(creation("create Vulkan instance"))?
        };

        #[cfg(debug_assertions)]
        let debug = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            Some((debug_utils, messenger))
        } else {
            None
        };

        log::debug!("[CONTEXT] Instance created (validation: {})", validation);
        Ok(Self {
            entry,
            instance,
            #[cfg(debug_assertions)]
            debug,
        })
    }

    #[cfg(debug_assertions)]
    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(creation("create debug messenger"))
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        unsafe {
            #[cfg(debug_assertions)]
            if let Some((debug_utils, messenger)) = self.debug.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Debug callback for validation layers
#[cfg(debug_assertions)]
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {:?} - {}", message_type, message);
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {:?} - {}", message_type, message);
    } else {
        log::debug!("[Vulkan] {:?} - {}", message_type, message);
    }

    vk::FALSE
}

/// Queue family indices used by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
    pub compute: u32,
}

impl QueueFamilies {
    /// Pick families from their capabilities
    ///
    /// Compute prefers a family without graphics support so the particle dispatch can
    /// overlap graphics work; otherwise it shares the graphics family.
    pub fn select(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Option<Self> {
        let indexed = || families.iter().enumerate().map(|(i, f)| (i as u32, f));

        let graphics = indexed()
            .find(|(_, f)| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|(i, _)| i)?;

        let present = if supports_present(graphics) {
            graphics
        } else {
            indexed().map(|(i, _)| i).find(|&i| supports_present(i))?
        };

        let is_compute = |f: &vk::QueueFamilyProperties| {
            f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::COMPUTE)
        };
        let compute = indexed()
            .find(|&(_, f)| is_compute(f) && !f.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .or_else(|| indexed().find(|&(i, f)| i == graphics && is_compute(f)))
            .or_else(|| indexed().find(|&(_, f)| is_compute(f)))
            .map(|(i, _)| i)?;

        Some(Self { graphics, present, compute })
    }

    pub fn unique(&self) -> Vec<u32> {
        let set: HashSet<u32> = [self.graphics, self.present, self.compute].into_iter().collect();
        let mut unique: Vec<u32> = set.into_iter().collect();
        unique.sort_unstable();
        unique
    }
}

/// Physical device selection and capabilities
pub struct PhysicalDeviceInfo {
    /// Vulkan physical device handle
    pub device: vk::PhysicalDevice,
    /// Device properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Selected queue families
    pub families: QueueFamilies,
}

impl PhysicalDeviceInfo {
    /// First device that can run every pass
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> VulkanResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices().map_err(VulkanError::Api)? };

        let mut rejections = Vec::new();
        for device in devices {
            match Self::evaluate_device(instance, device, surface, surface_loader) {
                Ok(info) => {
                    log::info!("[CONTEXT] Selected GPU: {}", info.name());
                    return Ok(info);
                }
                Err(reason) => rejections.push(reason),
            }
        }

        let reason = if rejections.is_empty() {
            "no Vulkan devices found".to_string()
        } else {
            rejections.join("; ")
        };
        Err(VulkanError::NoSuitableDevice(reason))
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> Result<Self, String> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let families = QueueFamilies::select(&queue_families, |index| unsafe {
            surface_loader
                .get_physical_device_surface_support(device, index, surface)
                .unwrap_or(false)
        })
        .ok_or_else(|| format!("{}: missing graphics, compute or present queue", name))?;

        let extensions = unsafe {
            instance
                .enumerate_device_extension_properties(device)
                .map_err(|e| format!("{}: {:?}", name, e))?
        };
        let has_swapchain = extensions.iter().any(|available| {
            let extension_name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            extension_name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(format!("{}: VK_KHR_swapchain not supported", name));
        }

        let mut indexing = vk::PhysicalDeviceDescriptorIndexingFeatures::default();
        {
            let mut features = vk::PhysicalDeviceFeatures2::builder().push_next(&mut indexing);
            unsafe { instance.get_physical_device_features2(device, &mut features) };
        }
        let bindless = indexing.descriptor_binding_partially_bound == vk::TRUE
            && indexing.runtime_descriptor_array == vk::TRUE
            && indexing.shader_sampled_image_array_non_uniform_indexing == vk::TRUE;
        if !bindless {
            return Err(format!("{}: descriptor indexing for sampled images not supported", name));
        }

        let required_push = push_size::<LightingPush>();
        if properties.limits.max_push_constants_size < required_push {
            return Err(format!(
                "{}: push constant limit {} below {} bytes",
                name, properties.limits.max_push_constants_size, required_push
            ));
        }

        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };

        Ok(Self {
            device,
            properties,
            memory_properties,
            families,
        })
    }

    /// Device name as reported by the driver
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Logical device wrapper with RAII cleanup
pub struct LogicalDevice {
    /// Vulkan logical device handle
    pub device: Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub compute_queue: vk::Queue,
    /// Swapchain extension loader
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create the device with swapchain support and bindless descriptor indexing
    pub fn new(instance: &Instance, physical_device_info: &PhysicalDeviceInfo) -> VulkanResult<Self> {
        let families = physical_device_info.families;
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
            .unique()
            .into_iter()
            .map(|family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&[1.0])
                    .build()
            })
            .collect();

        let required_extensions = [SwapchainLoader::name().as_ptr()];
        let device_features = vk::PhysicalDeviceFeatures::builder().build();
        let mut indexing = vk::PhysicalDeviceDescriptorIndexingFeatures::builder()
            .descriptor_binding_partially_bound(true)
            .runtime_descriptor_array(true)
            .shader_sampled_image_array_non_uniform_indexing(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&required_extensions)
            .enabled_features(&device_features)
            .push_next(&mut indexing);

        let device = unsafe {
            instance
                .create_device(physical_device_info.device, &create_info, None)
                .map_err(creation("create logical device"))?
        };

        let (graphics_queue, present_queue, compute_queue) = unsafe {
            (
                device.get_device_queue(families.graphics, 0),
                device.get_device_queue(families.present, 0),
                device.get_device_queue(families.compute, 0),
            )
        };

        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            compute_queue,
            swapchain_loader,
        })
    }
}

impl Drop for LogicalDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            self.device.destroy_device(None);
        }
    }
}

/// Core Vulkan objects shared by every renderer component
///
/// Field order is drop order: the device goes before the instance.
pub struct VulkanContext {
    pub surface: vk::SurfaceKHR,
    pub surface_loader: Surface,
    pub physical_device: PhysicalDeviceInfo,
    pub device: LogicalDevice,
    pub instance: VulkanInstance,
}

impl VulkanContext {
    /// Create instance, surface and device for `window`
    pub fn new(window: &mut Window, config: &RendererConfig) -> VulkanResult<Self> {
        let instance = VulkanInstance::new(window, &config.application_name, config.validation_enabled())?;

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let surface = window.create_vulkan_surface(instance.instance.handle())?;

        let physical_device = PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface, &surface_loader)
            .map_err(|e| {
                unsafe { surface_loader.destroy_surface(surface, None) };
                e
            })?;
        log::debug!("[CONTEXT] Queue families: {:?}", physical_device.families);

        let device = LogicalDevice::new(&instance.instance, &physical_device).map_err(|e| {
            unsafe { surface_loader.destroy_surface(surface, None) };
            e
        })?;

        Ok(Self {
            surface,
            surface_loader,
            physical_device,
            device,
            instance,
        })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance.instance
    }

    /// Clone of the logical device handle table
    pub fn raw_device(&self) -> Device {
        self.device.device.clone()
    }

    pub fn device(&self) -> &Device {
        &self.device.device
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical_device.device
    }

    pub fn families(&self) -> QueueFamilies {
        self.physical_device.families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.device.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.device.present_queue
    }

    pub fn compute_queue(&self) -> vk::Queue {
        self.device.compute_queue
    }

    pub fn swapchain_loader(&self) -> &SwapchainLoader {
        &self.device.swapchain_loader
    }

    /// Block until the device has finished all submitted work
    pub fn wait_idle(&self) -> VulkanResult<()> {
        unsafe { self.device.device.device_wait_idle().map_err(VulkanError::Api) }
    }

    /// Memory type index matching `type_filter` with all of `properties`
    pub fn find_memory_type(&self, type_filter: u32, properties: vk::MemoryPropertyFlags) -> VulkanResult<u32> {
        find_memory_type(&self.physical_device.memory_properties, type_filter, properties)
    }

    pub fn memory_properties(&self) -> vk::PhysicalDeviceMemoryProperties {
        self.physical_device.memory_properties
    }

    /// Whether `format` can be an optimal-tiled depth attachment
    pub fn supports_depth_attachment(&self, format: vk::Format) -> bool {
        let props = unsafe {
            self.instance()
                .get_physical_device_format_properties(self.physical(), format)
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    }

    /// Sharing mode for buffers touched by both the compute and graphics queues
    pub fn shared_buffer_mode(&self) -> (vk::SharingMode, Vec<u32>) {
        let families = self.families();
        if families.compute == families.graphics {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        } else {
            (vk::SharingMode::CONCURRENT, vec![families.graphics, families.compute])
        }
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device.device_wait_idle();
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_dedicated_compute_family_preferred() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        let selected = QueueFamilies::select(&families, |i| i == 0).unwrap();
        assert_eq!(selected, QueueFamilies { graphics: 0, present: 0, compute: 1 });
        assert_eq!(selected.unique(), vec![0, 1]);
    }

    #[test]
    fn test_compute_falls_back_to_graphics_family() {
        let families = [family(vk::QueueFlags::TRANSFER), family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        let selected = QueueFamilies::select(&families, |_| true).unwrap();
        assert_eq!(selected.graphics, 1);
        assert_eq!(selected.compute, 1);
        assert_eq!(selected.unique(), vec![1]);
    }

    #[test]
    fn test_missing_present_rejects_device() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)];
        assert!(QueueFamilies::select(&families, |_| false).is_none());
    }

    #[test]
    fn test_resource_creation_names_operation() {
        let error = creation("create attachment image")(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let message = error.to_string();
        assert!(message.contains("create attachment image"));
        assert!(message.contains("ERROR_OUT_OF_DEVICE_MEMORY"));
    }

    #[test]
    fn test_memory_type_respects_filter_and_flags() {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        memory.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        memory.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        memory.memory_types[2].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(find_memory_type(&memory, 0b111, host).ok(), Some(1));
        assert_eq!(
            find_memory_type(&memory, 0b100, vk::MemoryPropertyFlags::DEVICE_LOCAL).ok(),
            Some(2)
        );
        assert!(matches!(
            find_memory_type(&memory, 0b001, host),
            Err(VulkanError::NoSuitableMemoryType)
        ));
    }
}
