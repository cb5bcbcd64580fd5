//! GPU buffers
//!
//! [`Buffer`] owns a `VkBuffer` and its dedicated memory. Host-visible buffers are
//! written through `bytemuck` so only plain-old-data crosses the boundary.
//! [`Buffer::device_local`] uploads through a temporary staging buffer.

use ash::{vk, Device};
use bytemuck::Pod;
use std::marker::PhantomData;

use crate::render::backends::vulkan::initialization::context::creation;
use crate::render::backends::vulkan::rendering::commands::CommandPool;
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};

/// Buffer wrapper with memory management
pub struct Buffer {
    device: Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    mapped: Option<*mut u8>,
}

impl Buffer {
    /// Exclusive buffer with memory matching `properties`
    pub fn new(
        context: &VulkanContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<Self> {
        Self::with_sharing(context, size, usage, properties, vk::SharingMode::EXCLUSIVE, &[])
    }

    /// Buffer shared between the given queue families when `sharing` is concurrent
    pub fn with_sharing(
        context: &VulkanContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        sharing: vk::SharingMode,
        families: &[u32],
    ) -> VulkanResult<Self> {
        let device = context.raw_device();
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing)
            .queue_family_indices(families);

        let buffer = unsafe {
            device
                .create_buffer(&buffer_info, None)
                .map_err(creation("create buffer"))?
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = context
            .find_memory_type(requirements.memory_type_bits, properties)
            .and_then(|memory_type_index| {
                let alloc_info = vk::MemoryAllocateInfo::builder()
                    .allocation_size(requirements.size)
                    .memory_type_index(memory_type_index);
                unsafe {
                    device
                        .allocate_memory(&alloc_info, None)
                        .map_err(creation("allocate buffer memory"))
                }
            });
        let memory = match memory {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let mut result = Self {
            device,
            buffer,
            memory,
            size,
            mapped: None,
        };
        unsafe {
            result
                .device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(VulkanError::Api)?;
        }

        if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let ptr = unsafe {
                result
                    .device
                    .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
                    .map_err(VulkanError::Api)?
            };
            result.mapped = Some(ptr.cast::<u8>());
        }
        Ok(result)
    }

    /// Device-local buffer initialised from `data` through a staging copy
    pub fn device_local(
        context: &VulkanContext,
        pool: &CommandPool,
        queue: vk::Queue,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> VulkanResult<Self> {
        let (sharing, families) = if usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER) {
            context.shared_buffer_mode()
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        };
        let size = data.len() as vk::DeviceSize;
        let staging = Self::staging(context, data)?;
        let buffer = Self::with_sharing(
            context,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            sharing,
            &families,
        )?;

        pool.submit_and_wait(queue, |recorder| {
            recorder.copy_buffer(staging.handle(), buffer.handle(), size);
            Ok(())
        })?;
        Ok(buffer)
    }

    /// Host-visible transfer source holding `data`
    pub fn staging(context: &VulkanContext, data: &[u8]) -> VulkanResult<Self> {
        let staging = Self::new(
            context,
            data.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        staging.write_bytes(data)?;
        Ok(staging)
    }

    /// Copy `bytes` to the start of a host-visible buffer
    pub fn write_bytes(&self, bytes: &[u8]) -> VulkanResult<()> {
        let ptr = self.mapped.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "buffer is not host visible".to_string(),
        })?;
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes exceeds buffer size {}", bytes.len(), self.size),
            });
        }
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        }
        Ok(())
    }

    pub fn write_pod<T: Pod>(&self, data: &[T]) -> VulkanResult<()> {
        self.write_bytes(bytemuck::cast_slice(data))
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Descriptor info covering the whole buffer
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: self.size,
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.is_some() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// Persistently mapped uniform buffer holding one `T`
pub struct UniformBuffer<T: Pod> {
    buffer: Buffer,
    _phantom: PhantomData<T>,
}

impl<T: Pod> UniformBuffer<T> {
    pub fn new(context: &VulkanContext) -> VulkanResult<Self> {
        let buffer = Buffer::new(
            context,
            std::mem::size_of::<T>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        Ok(Self {
            buffer,
            _phantom: PhantomData,
        })
    }

    pub fn update(&self, data: &T) -> VulkanResult<()> {
        self.buffer.write_bytes(bytemuck::bytes_of(data))
    }

    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        self.buffer.descriptor_info()
    }
}

/// Device-local vertex + index buffers for one mesh
pub struct MeshBuffers {
    pub vertices: Buffer,
    pub indices: Buffer,
    pub index_count: u32,
}

impl MeshBuffers {
    pub fn upload<V: Pod>(
        context: &VulkanContext,
        pool: &CommandPool,
        queue: vk::Queue,
        vertices: &[V],
        indices: &[u32],
    ) -> VulkanResult<Self> {
        Ok(Self {
            vertices: Buffer::device_local(
                context,
                pool,
                queue,
                bytemuck::cast_slice(vertices),
                vk::BufferUsageFlags::VERTEX_BUFFER,
            )?,
            indices: Buffer::device_local(
                context,
                pool,
                queue,
                bytemuck::cast_slice(indices),
                vk::BufferUsageFlags::INDEX_BUFFER,
            )?,
            index_count: indices.len() as u32,
        })
    }
}
