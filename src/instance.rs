//! Instance creation.
//!
//! The [`Instance`] is the connection to the Vulkan loader: the first object
//! created and the root every other object hangs off. Debug builds enable the
//! Khronos validation layer and a debug-utils messenger that forwards
//! validation messages into `tracing`.

use std::{
    ffi::{CStr, c_char, c_void},
    ops::Deref,
};

use ash::{ext, khr, vk};
use raw_window_handle::RawDisplayHandle;

use crate::error::{Error, Result};

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// A Vulkan instance plus the instance-level extension loaders the crate
/// needs. Destroyed on drop, after the messenger.
pub struct Instance {
    entry: ash::Entry,
    instance: ash::Instance,
    surface_loader: khr::surface::Instance,
    debug_messenger: Option<(ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    supports_surface_maintenance: bool,
}

impl Deref for Instance {
    type Target = ash::Instance;

    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Instance {
    /// Creates an instance targeting Vulkan 1.3 with the surface extensions
    /// required for `display_handle`, plus validation in debug builds.
    pub fn new(display_handle: RawDisplayHandle) -> Result<Self> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|err| Error::Context(format!("failed to load the Vulkan loader: {err}")))?;

        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };
        let available_extensions =
            unsafe { entry.enumerate_instance_extension_properties(None)? };
        let has_extension = |name: &CStr| {
            available_extensions
                .iter()
                .any(|ext| ext.extension_name_as_c_str() == Ok(name))
        };

        let mut layers: Vec<*const c_char> = Vec::new();
        let validation_available = available_layers
            .iter()
            .any(|layer| layer.layer_name_as_c_str() == Ok(VALIDATION_LAYER));
        if cfg!(debug_assertions) && validation_available {
            layers.push(VALIDATION_LAYER.as_ptr());
        }

        let mut extensions: Vec<*const c_char> =
            ash_window::enumerate_required_extensions(display_handle)?.to_vec();
        let debug_utils_available =
            cfg!(debug_assertions) && has_extension(ext::debug_utils::NAME);
        if debug_utils_available {
            extensions.push(ext::debug_utils::NAME.as_ptr());
        }
        // Surface maintenance feeds the swapchain's per-present fences.
        let supports_surface_maintenance = has_extension(ext::surface_maintenance1::NAME)
            && has_extension(khr::get_surface_capabilities2::NAME);
        if supports_surface_maintenance {
            extensions.push(khr::get_surface_capabilities2::NAME.as_ptr());
            extensions.push(ext::surface_maintenance1::NAME.as_ptr());
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"scoria")
            .engine_name(c"scoria")
            .api_version(vk::API_VERSION_1_3);
        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);
        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let debug_messenger = if debug_utils_available {
            let loader = ext::debug_utils::Instance::new(&entry, &instance);
            let info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            let messenger = unsafe { loader.create_debug_utils_messenger(&info, None)? };
            Some((loader, messenger))
        } else {
            None
        };

        let surface_loader = khr::surface::Instance::new(&entry, &instance);
        tracing::info!(
            validation = cfg!(debug_assertions) && validation_available,
            surface_maintenance = supports_surface_maintenance,
            "created Vulkan instance"
        );

        Ok(Self {
            entry,
            instance,
            surface_loader,
            debug_messenger,
            supports_surface_maintenance,
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn surface_loader(&self) -> &khr::surface::Instance {
        &self.surface_loader
    }

    pub fn supports_surface_maintenance(&self) -> bool {
        self.supports_surface_maintenance
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = unsafe {
        (*data)
            .message_as_c_str()
            .map(|m| m.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!(target: "scoria::validation", "{message}");
    } else {
        tracing::warn!(target: "scoria::validation", "{message}");
    }
    vk::FALSE
}
