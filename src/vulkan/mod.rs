//! Vulkan-native compute driver.
//!
//! A state machine over `{uninitialised, instance ready, device ready,
//! terminated}`. The driver owns every Vulkan handle it creates; buffers
//! and kernels handed to callers are plain values identifying resources
//! inside the driver, released by [`destroy_kernel`](VulkanDriver::destroy_kernel)
//! or wholesale at [`exit`](VulkanDriver::exit).
//!
//! Host/device synchronisation is fence-based: `launch_kernel` only
//! submits, `wait_for_kernel` blocks on the submission's fence with a
//! caller-supplied timeout.

mod buffer;
mod shader;

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;

use crate::config::KernelConfig;
use crate::context::{ComputeDriver, DeviceLimits};
use crate::error::DeviceError;
use crate::types::{
    AllocMethod, DeviceSelect, DownloadMethod, LaunchMethod, UploadMethod, Vec3, Version,
};

pub use buffer::DeviceBuffer;

/// Handle to a kernel registered with a [`VulkanDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kernel {
    index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DriverState {
    #[default]
    Uninitialised,
    InstanceReady,
    DeviceReady,
    Terminated,
}

/// Everything a registered kernel bundles. All handles are null together
/// once the kernel is destroyed; `fence` is non-null only between a launch
/// and the wait that reaps it.
struct KernelSlot {
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    param_size_bytes: usize,
}

impl KernelSlot {
    fn is_cleared(&self) -> bool {
        self.pipeline == vk::Pipeline::null()
    }

    fn clear(&mut self) {
        self.pipeline = vk::Pipeline::null();
        self.pipeline_layout = vk::PipelineLayout::null();
        self.descriptor_set_layout = vk::DescriptorSetLayout::null();
        self.descriptor_pool = vk::DescriptorPool::null();
        self.descriptor_set = vk::DescriptorSet::null();
        self.command_buffer = vk::CommandBuffer::null();
        self.fence = vk::Fence::null();
    }
}

/// Vulkan implementation of [`ComputeDriver`].
#[derive(Default)]
pub struct VulkanDriver {
    state: DriverState,
    // Kept alive for the lifetime of the instance created from it.
    #[allow(dead_code)]
    entry: Option<ash::Entry>,
    instance: Option<ash::Instance>,
    physical_devices: Vec<vk::PhysicalDevice>,
    device: Option<Arc<ash::Device>>,
    queue: vk::Queue,
    queue_family: u32,
    command_pool: vk::CommandPool,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    limits: Option<DeviceLimits>,
    buffers: Vec<DeviceBuffer>,
    kernels: Vec<KernelSlot>,
    last_submitted: Option<Kernel>,
}

impl std::fmt::Debug for VulkanDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDriver")
            .field("state", &self.state())
            .field("queue_family", &self.queue_family)
            .field("buffers", &self.buffers.len())
            .field("kernels", &self.kernels.len())
            .finish()
    }
}

impl VulkanDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> DriverState {
        self.state
    }

    fn ready_device(&self) -> Result<Arc<ash::Device>, DeviceError> {
        if self.state() != DriverState::DeviceReady {
            return Err(DeviceError::NotAvailable);
        }
        self.device.clone().ok_or(DeviceError::NotAvailable)
    }

    fn slot(&self, task: Kernel) -> Result<&KernelSlot, DeviceError> {
        self.kernels
            .get(task.index)
            .ok_or_else(|| DeviceError::LaunchFailed("unknown kernel handle".to_string()))
    }

    /// Destroy whatever a slot still holds; safe on cleared slots.
    fn destroy_slot(device: &ash::Device, command_pool: vk::CommandPool, slot: &mut KernelSlot) {
        unsafe {
            if slot.fence != vk::Fence::null() {
                device.destroy_fence(slot.fence, None);
            }
            if slot.descriptor_pool != vk::DescriptorPool::null() {
                device.destroy_descriptor_pool(slot.descriptor_pool, None);
            }
            if slot.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(slot.pipeline, None);
            }
            if slot.pipeline_layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(slot.pipeline_layout, None);
            }
            if slot.descriptor_set_layout != vk::DescriptorSetLayout::null() {
                device.destroy_descriptor_set_layout(slot.descriptor_set_layout, None);
            }
            if slot.command_buffer != vk::CommandBuffer::null()
                && command_pool != vk::CommandPool::null()
            {
                device.free_command_buffers(command_pool, &[slot.command_buffer]);
            }
        }
        slot.clear();
    }
}

impl ComputeDriver for VulkanDriver {
    type Buffer = DeviceBuffer;
    type Kernel = Kernel;

    fn init(&mut self, version: Version, app_name: &str) -> Result<(), DeviceError> {
        if self.state() != DriverState::Uninitialised {
            return Err(DeviceError::InitFailed(
                "context is already initialised".to_string(),
            ));
        }

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| DeviceError::InitFailed(format!("could not load Vulkan loader: {e}")))?;

        let app_name_c = CString::new(app_name)
            .map_err(|_| DeviceError::InitFailed("app name contains NUL".to_string()))?;
        let api_version =
            vk::make_api_version(version.variant, version.major, version.minor, version.patch);

        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name_c)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(api_version);
        let create_info = vk::InstanceCreateInfo::default().application_info(&app_info);

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| DeviceError::CouldNotCreateInstance(format!("vkCreateInstance: {e}")))?;

        let physical_devices = match unsafe { instance.enumerate_physical_devices() } {
            Ok(devices) if !devices.is_empty() => devices,
            Ok(_) => {
                unsafe { instance.destroy_instance(None) };
                return Err(DeviceError::NoAvailableDevices);
            }
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(DeviceError::CouldNotCreateInstance(format!(
                    "vkEnumeratePhysicalDevices: {e}"
                )));
            }
        };

        log::info!(
            "vulkan instance \"{app_name}\" ready (api {version}, {} physical devices)",
            physical_devices.len()
        );

        self.entry = Some(entry);
        self.instance = Some(instance);
        self.physical_devices = physical_devices;
        self.state = DriverState::InstanceReady;
        Ok(())
    }

    fn set_device(&mut self, preferred: DeviceSelect) -> Result<(), DeviceError> {
        if self.state() != DriverState::InstanceReady {
            return Err(DeviceError::NotAvailable);
        }
        let instance = self.instance.as_ref().ok_or(DeviceError::NotAvailable)?;

        let mut selected: Option<(vk::PhysicalDevice, u32)> = None;
        for &physical in &self.physical_devices {
            let props = unsafe { instance.get_physical_device_properties(physical) };
            let type_ok = match preferred {
                DeviceSelect::Discrete => {
                    props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
                }
                DeviceSelect::Integrated => {
                    props.device_type == vk::PhysicalDeviceType::INTEGRATED_GPU
                }
                DeviceSelect::FirstAvailable | DeviceSelect::FirstComputeCapable => true,
            };
            if !type_ok {
                continue;
            }

            let families =
                unsafe { instance.get_physical_device_queue_family_properties(physical) };
            let family = match preferred {
                DeviceSelect::FirstAvailable => (!families.is_empty()).then_some(0u32),
                _ => families
                    .iter()
                    .position(|f| f.queue_flags.contains(vk::QueueFlags::COMPUTE))
                    .map(|i| i as u32),
            };

            if let Some(family) = family {
                selected = Some((physical, family));
                break;
            }
        }

        let Some((physical, family)) = selected else {
            return Err(DeviceError::NoAvailableDevices);
        };

        let priorities = [1.0f32];
        let queue_info = vk::DeviceQueueCreateInfo::default()
            .queue_family_index(family)
            .queue_priorities(&priorities);
        let device_info =
            vk::DeviceCreateInfo::default().queue_create_infos(std::slice::from_ref(&queue_info));

        let device = unsafe { instance.create_device(physical, &device_info, None) }.map_err(
            |e| DeviceError::CouldNotCreateSelectedDevice(format!("vkCreateDevice: {e}")),
        )?;

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(DeviceError::CouldNotCreateSelectedDevice(format!(
                    "vkCreateCommandPool: {e}"
                )));
            }
        };

        let props = unsafe { instance.get_physical_device_properties(physical) };
        let device_name = unsafe {
            std::ffi::CStr::from_ptr(props.device_name.as_ptr()).to_string_lossy().into_owned()
        };
        let wg = props.limits.max_compute_work_group_size;
        log::info!(
            "selected device \"{device_name}\" (type {:?}, queue family {family})",
            props.device_type
        );

        self.queue = unsafe { device.get_device_queue(family, 0) };
        self.queue_family = family;
        self.command_pool = command_pool;
        self.memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical) };
        self.limits = Some(DeviceLimits {
            max_compute_work_group_size: Vec3::new(wg[0], wg[1], wg[2]),
        });
        self.device = Some(Arc::new(device));
        self.state = DriverState::DeviceReady;
        Ok(())
    }

    fn allocate(
        &mut self,
        size_bytes: u64,
        method: AllocMethod,
    ) -> Result<DeviceBuffer, DeviceError> {
        let device = self.ready_device()?;
        match method {
            AllocMethod::Base => {
                let buffer =
                    buffer::create_storage_buffer(&device, &self.memory_properties, size_bytes)?;
                self.buffers.push(buffer);
                Ok(buffer)
            }
            AllocMethod::Custom => Err(DeviceError::NotAvailable),
        }
    }

    fn upload(
        &mut self,
        dest: DeviceBuffer,
        src: &[u8],
        method: UploadMethod,
    ) -> Result<(), DeviceError> {
        if method != UploadMethod::Sync {
            return Err(DeviceError::NotAvailable);
        }
        let device = self.ready_device()?;

        let len = src.len() as vk::DeviceSize;
        if len > dest.size_bytes {
            return Err(DeviceError::UploadFailed(format!(
                "{len} bytes exceed buffer of {}",
                dest.size_bytes
            )));
        }
        if len == 0 {
            return Ok(());
        }

        unsafe {
            let mapped = device
                .map_memory(dest.memory, 0, len, vk::MemoryMapFlags::empty())
                .map_err(|e| DeviceError::UploadFailed(format!("vkMapMemory: {e}")))?;
            std::ptr::copy_nonoverlapping(src.as_ptr(), mapped.cast::<u8>(), src.len());
            device.unmap_memory(dest.memory);
        }

        log::debug!("uploaded {len} bytes");
        Ok(())
    }

    fn download(
        &mut self,
        dest: &mut [u8],
        src: DeviceBuffer,
        method: DownloadMethod,
    ) -> Result<(), DeviceError> {
        if method != DownloadMethod::Sync {
            return Err(DeviceError::NotAvailable);
        }
        let device = self.ready_device()?;

        let len = dest.len() as vk::DeviceSize;
        if len > src.size_bytes {
            return Err(DeviceError::DownloadFailed(format!(
                "{len} bytes exceed buffer of {}",
                src.size_bytes
            )));
        }
        if len == 0 {
            return Ok(());
        }

        unsafe {
            let mapped = device
                .map_memory(src.memory, 0, len, vk::MemoryMapFlags::empty())
                .map_err(|e| DeviceError::DownloadFailed(format!("vkMapMemory: {e}")))?;
            std::ptr::copy_nonoverlapping(mapped.cast::<u8>(), dest.as_mut_ptr(), dest.len());
            device.unmap_memory(src.memory);
        }

        log::debug!("downloaded {len} bytes");
        Ok(())
    }

    fn register_kernel(
        &mut self,
        cfg: &KernelConfig,
        workgroup_size: Vec3<u32>,
        buffers: &[DeviceBuffer],
    ) -> Result<Kernel, DeviceError> {
        let device = self.ready_device()?;

        if workgroup_size.x == 0 || workgroup_size.y == 0 || workgroup_size.z == 0 {
            return Err(DeviceError::CouldNotRegisterKernel(format!(
                "workgroup dimension is zero: ({}, {}, {})",
                workgroup_size.x, workgroup_size.y, workgroup_size.z
            )));
        }

        // Pure file work first, so a compile failure leaves nothing to unwind.
        let spirv = shader::kernel_spirv_words(cfg)?;

        // 1. Descriptor-set layout: one storage-buffer binding per input.
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..buffers.len() as u32)
            .map(|i| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(i)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .descriptor_count(1)
                    .stage_flags(vk::ShaderStageFlags::COMPUTE)
            })
            .collect();
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let descriptor_set_layout =
            unsafe { device.create_descriptor_set_layout(&layout_info, None) }.map_err(|e| {
                DeviceError::CouldNotUpdateDescriptors(format!("vkCreateDescriptorSetLayout: {e}"))
            })?;

        // 2. Pipeline layout carrying the push-constant range.
        let push_ranges = if cfg.param_size_bytes > 0 {
            vec![vk::PushConstantRange::default()
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
                .offset(0)
                .size(cfg.param_size_bytes as u32)]
        } else {
            Vec::new()
        };
        let set_layouts = [descriptor_set_layout];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let pipeline_layout =
            match unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) } {
                Ok(layout) => layout,
                Err(e) => {
                    unsafe { device.destroy_descriptor_set_layout(descriptor_set_layout, None) };
                    return Err(DeviceError::CouldNotUpdatePipeline(format!(
                        "vkCreatePipelineLayout: {e}"
                    )));
                }
            };

        // 3. Shader module.
        let module_info = vk::ShaderModuleCreateInfo::default().code(&spirv);
        let shader_module = match unsafe { device.create_shader_module(&module_info, None) } {
            Ok(module) => module,
            Err(e) => {
                unsafe {
                    device.destroy_pipeline_layout(pipeline_layout, None);
                    device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                }
                return Err(DeviceError::CouldNotUpdateKernelModule(format!(
                    "vkCreateShaderModule: {e}"
                )));
            }
        };

        // 4. Compute pipeline; specialisation constants 0/1/2 carry the
        // workgroup size into the shader.
        let spec_entries = [
            vk::SpecializationMapEntry { constant_id: 0, offset: 0, size: 4 },
            vk::SpecializationMapEntry { constant_id: 1, offset: 4, size: 4 },
            vk::SpecializationMapEntry { constant_id: 2, offset: 8, size: 4 },
        ];
        let mut spec_data = [0u8; 12];
        spec_data[0..4].copy_from_slice(&workgroup_size.x.to_ne_bytes());
        spec_data[4..8].copy_from_slice(&workgroup_size.y.to_ne_bytes());
        spec_data[8..12].copy_from_slice(&workgroup_size.z.to_ne_bytes());
        let spec_info = vk::SpecializationInfo::default()
            .map_entries(&spec_entries)
            .data(&spec_data);

        let stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module)
            .name(c"main")
            .specialization_info(&spec_info);
        let pipeline_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage_info)
            .layout(pipeline_layout);

        let pipeline = match unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        } {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe {
                    device.destroy_shader_module(shader_module, None);
                    device.destroy_pipeline_layout(pipeline_layout, None);
                    device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                }
                return Err(DeviceError::CouldNotCreatePipeline(format!(
                    "vkCreateComputePipelines: {e}"
                )));
            }
        };
        // The module is baked into the pipeline and not part of the bundle.
        unsafe { device.destroy_shader_module(shader_module, None) };

        // 5. Descriptor pool sized to the buffer count, one set.
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count: (buffers.len() as u32).max(1),
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(1);
        let descriptor_pool = match unsafe { device.create_descriptor_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(e) => {
                unsafe {
                    device.destroy_pipeline(pipeline, None);
                    device.destroy_pipeline_layout(pipeline_layout, None);
                    device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                }
                return Err(DeviceError::CouldNotUpdateDescriptors(format!(
                    "vkCreateDescriptorPool: {e}"
                )));
            }
        };

        let set_alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&set_layouts);
        let descriptor_set = match unsafe { device.allocate_descriptor_sets(&set_alloc_info) } {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_pool(descriptor_pool, None);
                    device.destroy_pipeline(pipeline, None);
                    device.destroy_pipeline_layout(pipeline_layout, None);
                    device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                }
                return Err(DeviceError::CouldNotUpdateDescriptors(format!(
                    "vkAllocateDescriptorSets: {e}"
                )));
            }
        };

        // 6. Primary command buffer from the driver pool.
        let cmd_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = match unsafe { device.allocate_command_buffers(&cmd_info) } {
            Ok(buffers) => buffers[0],
            Err(e) => {
                unsafe {
                    device.destroy_descriptor_pool(descriptor_pool, None);
                    device.destroy_pipeline(pipeline, None);
                    device.destroy_pipeline_layout(pipeline_layout, None);
                    device.destroy_descriptor_set_layout(descriptor_set_layout, None);
                }
                return Err(DeviceError::CouldNotRegisterKernel(format!(
                    "vkAllocateCommandBuffers: {e}"
                )));
            }
        };

        self.kernels.push(KernelSlot {
            pipeline,
            pipeline_layout,
            descriptor_set_layout,
            descriptor_pool,
            descriptor_set,
            command_buffer,
            fence: vk::Fence::null(),
            param_size_bytes: cfg.param_size_bytes,
        });
        let task = Kernel { index: self.kernels.len() - 1 };

        log::info!(
            "registered kernel \"{}\" (workgroup {}x{}x{}, {} buffers)",
            cfg.name,
            workgroup_size.x,
            workgroup_size.y,
            workgroup_size.z,
            buffers.len()
        );
        Ok(task)
    }

    fn launch_kernel(
        &mut self,
        task: Kernel,
        grid_size: Vec3<u32>,
        buffers: &[DeviceBuffer],
        method: LaunchMethod,
        params: &[u8],
    ) -> Result<(), DeviceError> {
        if method != LaunchMethod::Sync {
            return Err(DeviceError::NotAvailable);
        }
        let device = self.ready_device()?;

        let slot = self.slot(task)?;
        if slot.is_cleared() {
            return Err(DeviceError::LaunchFailed(
                "kernel has been destroyed".to_string(),
            ));
        }
        if params.len() != slot.param_size_bytes {
            return Err(DeviceError::LaunchFailed(format!(
                "push-constant block is {} bytes, kernel expects {}",
                params.len(),
                slot.param_size_bytes
            )));
        }
        let (pool, set_layout, pipeline, pipeline_layout, command_buffer) = (
            slot.descriptor_pool,
            slot.descriptor_set_layout,
            slot.pipeline,
            slot.pipeline_layout,
            slot.command_buffer,
        );

        // 1. Fresh descriptor set bound to the supplied buffers in order.
        unsafe {
            device
                .reset_descriptor_pool(pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(|e| {
                    DeviceError::CouldNotUpdateDescriptors(format!("vkResetDescriptorPool: {e}"))
                })?;
        }
        let set_layouts = [set_layout];
        let set_alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);
        let descriptor_set = unsafe { device.allocate_descriptor_sets(&set_alloc_info) }
            .map_err(|e| {
                DeviceError::CouldNotUpdateDescriptors(format!("vkAllocateDescriptorSets: {e}"))
            })?[0];

        let buffer_infos: Vec<vk::DescriptorBufferInfo> = buffers
            .iter()
            .map(|b| {
                vk::DescriptorBufferInfo::default()
                    .buffer(b.buffer)
                    .offset(0)
                    .range(b.size_bytes)
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = buffer_infos
            .iter()
            .enumerate()
            .map(|(i, info)| {
                vk::WriteDescriptorSet::default()
                    .dst_set(descriptor_set)
                    .dst_binding(i as u32)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
            })
            .collect();
        unsafe { device.update_descriptor_sets(&writes, &[]) };

        // 2. Record the dispatch.
        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| {
                    DeviceError::CouldNotDispatchKernel(format!("vkResetCommandBuffer: {e}"))
                })?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(command_buffer, &begin_info).map_err(|e| {
                DeviceError::CouldNotDispatchKernel(format!("vkBeginCommandBuffer: {e}"))
            })?;

            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline);
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::COMPUTE,
                pipeline_layout,
                0,
                &[descriptor_set],
                &[],
            );
            if !params.is_empty() {
                device.cmd_push_constants(
                    command_buffer,
                    pipeline_layout,
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    params,
                );
            }
            device.cmd_dispatch(command_buffer, grid_size.x, grid_size.y, grid_size.z);

            device.end_command_buffer(command_buffer).map_err(|e| {
                DeviceError::CouldNotDispatchKernel(format!("vkEndCommandBuffer: {e}"))
            })?;
        }

        // 3. Replace any stale fence and submit.
        let slot = &mut self.kernels[task.index];
        unsafe {
            if slot.fence != vk::Fence::null() {
                device.destroy_fence(slot.fence, None);
                slot.fence = vk::Fence::null();
            }
        }
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
            .map_err(|e| DeviceError::LaunchFailed(format!("vkCreateFence: {e}")))?;

        let command_buffers = [command_buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        if let Err(e) = unsafe { device.queue_submit(self.queue, &[submit_info], fence) } {
            unsafe { device.destroy_fence(fence, None) };
            return Err(DeviceError::LaunchFailed(format!("vkQueueSubmit: {e}")));
        }

        slot.descriptor_set = descriptor_set;
        slot.fence = fence;
        self.last_submitted = Some(task);

        log::debug!(
            "dispatched kernel #{} over grid {}x{}x{}",
            task.index,
            grid_size.x,
            grid_size.y,
            grid_size.z
        );
        Ok(())
    }

    fn wait_for_kernel(&mut self, task: Kernel, timeout_ns: u64) -> Result<(), DeviceError> {
        let device = self.ready_device()?;

        let fence = self.slot(task)?.fence;
        if fence == vk::Fence::null() {
            return Ok(());
        }

        match unsafe { device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => {
                unsafe { device.destroy_fence(fence, None) };
                self.kernels[task.index].fence = vk::Fence::null();
                if self.last_submitted == Some(task) {
                    self.last_submitted = None;
                }
                Ok(())
            }
            // The kernel stays pending on the device; the fence stays armed
            // so the caller can wait again or tear down.
            Err(vk::Result::TIMEOUT) => Err(DeviceError::KernelTimeoutReached),
            Err(e) => Err(DeviceError::LaunchFailed(format!("vkWaitForFences: {e}"))),
        }
    }

    fn wait_for_last_kernel(&mut self, timeout_ns: u64) -> Result<(), DeviceError> {
        match self.last_submitted {
            Some(task) => self.wait_for_kernel(task, timeout_ns),
            None => Ok(()),
        }
    }

    fn destroy_kernel(&mut self, task: Kernel) -> Result<(), DeviceError> {
        // After exit every handle is already gone.
        let Some(device) = self.device.clone() else {
            return Ok(());
        };
        let Some(slot) = self.kernels.get_mut(task.index) else {
            return Ok(());
        };

        Self::destroy_slot(&device, self.command_pool, slot);
        if self.last_submitted == Some(task) {
            self.last_submitted = None;
        }
        Ok(())
    }

    fn limits(&self) -> Result<DeviceLimits, DeviceError> {
        if self.state() != DriverState::DeviceReady {
            return Err(DeviceError::NotAvailable);
        }
        self.limits.ok_or(DeviceError::NotAvailable)
    }

    fn exit(&mut self) {
        if self.state() == DriverState::Terminated {
            return;
        }

        if let Some(device) = self.device.take() {
            unsafe {
                let _ = device.device_wait_idle();
            }
            for slot in &mut self.kernels {
                Self::destroy_slot(&device, self.command_pool, slot);
            }
            self.kernels.clear();

            unsafe {
                for buffer in self.buffers.drain(..) {
                    device.destroy_buffer(buffer.buffer, None);
                    device.free_memory(buffer.memory, None);
                }
                if self.command_pool != vk::CommandPool::null() {
                    device.destroy_command_pool(self.command_pool, None);
                    self.command_pool = vk::CommandPool::null();
                }
                device.destroy_device(None);
            }
        }

        if let Some(instance) = self.instance.take() {
            unsafe { instance.destroy_instance(None) };
        }

        self.entry = None;
        self.physical_devices.clear();
        self.last_submitted = None;
        self.limits = None;
        self.state = DriverState::Terminated;
        log::info!("vulkan context terminated");
    }
}

impl Drop for VulkanDriver {
    fn drop(&mut self) {
        self.exit();
    }
}
