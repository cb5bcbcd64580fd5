//! Window management using GLFW
//!
//! The window never references the renderer. Framebuffer size changes and close
//! requests go out through a [`SurfaceEventSender`]; key presses are handed back to
//! the application from [`Window::pump_events`].

use thiserror::Error;

pub use glfw::Key;

use crate::core::WindowConfig;
use crate::events::{SurfaceEvent, SurfaceEventSender};

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    #[error("GLFW initialization failed")]
    InitializationFailed,

    #[error("Window creation failed")]
    CreationFailed,

    #[error("GLFW error: {0}")]
    GlfwError(String),
}

pub type WindowResult<T> = Result<T, WindowError>;

/// Key pressed since the last pump
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPress {
    pub key: Key,
    pub shift: bool,
}

/// GLFW window wrapper with proper resource management
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
    surface_events: SurfaceEventSender,
}

impl Window {
    pub fn new(config: &WindowConfig, surface_events: SurfaceEventSender) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::GlfwError("Vulkan loader not found".to_string()));
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        log::info!("[WINDOW] Created {}x{} window '{}'", config.width, config.height, config.title);
        Ok(Self {
            glfw,
            window,
            events,
            surface_events,
        })
    }

    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Poll GLFW, forward surface events, and return key presses
    pub fn pump_events(&mut self) -> Vec<KeyPress> {
        self.glfw.poll_events();

        let mut keys = Vec::new();
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    log::debug!("[WINDOW] Framebuffer resized to {}x{}", width, height);
                    self.surface_events.send(SurfaceEvent::Resized {
                        width: width.max(0) as u32,
                        height: height.max(0) as u32,
                    });
                }
                glfw::WindowEvent::Close => {
                    self.surface_events.send(SurfaceEvent::CloseRequested);
                }
                glfw::WindowEvent::Key(key, _, glfw::Action::Press, mods) => {
                    keys.push(KeyPress {
                        key,
                        shift: mods.contains(glfw::Modifiers::Shift),
                    });
                }
                _ => {}
            }
        }
        keys
    }

    /// Block until at least one event arrives; used while minimized
    pub fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    pub fn get_framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Get required Vulkan instance extensions from GLFW
    pub fn get_required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Failed to get required extensions".to_string()))
    }

    /// Create Vulkan surface using GLFW's built-in functionality
    pub fn create_vulkan_surface(&mut self, instance: ash::vk::Instance) -> WindowResult<ash::vk::SurfaceKHR> {
        let mut surface = ash::vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == ash::vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {:?}", result)))
        }
    }
}
