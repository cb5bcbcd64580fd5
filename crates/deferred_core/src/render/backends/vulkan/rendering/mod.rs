//! Command recording, shaders, render passes and pipelines

pub mod commands;
pub mod pipelines;
pub mod render_pass;
pub mod shader;

pub use commands::{ActiveRenderPass, CommandPool, CommandRecorder};
pub use pipelines::{ComputePipeline, GraphicsPipeline, GraphicsPipelineSet, PassHandles, PipelineDesc};
pub use render_pass::{Framebuffer, RenderPass};
pub use shader::ShaderModule;
