//! Backend implementations for the render module
//!
//! Only Vulkan is supported.

/// Vulkan rendering backend implementation
pub mod vulkan;
