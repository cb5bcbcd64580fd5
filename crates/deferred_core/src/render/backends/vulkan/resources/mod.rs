//! GPU resources: buffers, images, textures and descriptor state

pub mod buffer;
pub mod descriptor_set;
pub mod descriptor_table;
pub mod image;
pub mod occlusion;
pub mod texture;

pub use buffer::{Buffer, MeshBuffers, UniformBuffer};
pub use descriptor_table::{AttachmentInputs, ComputeBindings, OcclusionInputs, ResourceDescriptorTable, TextureSlots};
pub use image::{Image, ImageAllocator, Sampler};
pub use occlusion::OcclusionResources;
pub use texture::{checker_pixels, Texture};
