//! Device buffer creation and memory-type selection.

use ash::vk;

use crate::context::BufferHandle;
use crate::error::DeviceError;

/// Handle to a storage buffer and its backing memory.
///
/// A plain value; the driver that allocated it owns the underlying Vulkan
/// objects and releases them at teardown.
#[derive(Debug, Clone, Copy)]
pub struct DeviceBuffer {
    pub(crate) buffer: vk::Buffer,
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) size_bytes: vk::DeviceSize,
}

impl BufferHandle for DeviceBuffer {
    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Create a host-visible, host-coherent storage buffer of `size_bytes`.
pub(crate) fn create_storage_buffer(
    device: &ash::Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    size_bytes: vk::DeviceSize,
) -> Result<DeviceBuffer, DeviceError> {
    if size_bytes == 0 {
        return Err(DeviceError::CouldNotCreateBuffer(
            "requested buffer size is zero".to_string(),
        ));
    }

    let buffer_info = vk::BufferCreateInfo::default()
        .size(size_bytes)
        .usage(vk::BufferUsageFlags::STORAGE_BUFFER)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None) }
        .map_err(|e| DeviceError::CouldNotCreateBuffer(format!("vkCreateBuffer: {e}")))?;

    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    let Some(memory_type_index) =
        find_memory_type(memory_properties, requirements.memory_type_bits, wanted)
    else {
        unsafe { device.destroy_buffer(buffer, None) };
        return Err(DeviceError::CouldNotCreateBuffer(
            "no host-visible, host-coherent memory type".to_string(),
        ));
    };

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);

    let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(DeviceError::AllocFailed(format!("vkAllocateMemory: {e}")));
        }
    };

    if let Err(e) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
        }
        return Err(DeviceError::CouldNotCreateBuffer(format!(
            "vkBindBufferMemory: {e}"
        )));
    }

    log::debug!(
        "allocated storage buffer: {size_bytes} bytes, memory type {memory_type_index}"
    );

    Ok(DeviceBuffer { buffer, memory, size_bytes })
}

/// Pick the lowest-indexed memory type allowed by `type_filter` whose
/// property flags are a superset of `properties`.
pub(crate) fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        (type_filter & (1 << i)) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}
