use crate::error::{RenderError, RenderResult};

use super::resources::BufferSlot;
use super::RendererConfig;

/// Instance, adapter, device and queue for offscreen compute work.
///
/// No window or surface is ever created; the device only executes compute
/// passes and buffer copies.
pub struct GpuContext {
    pub(crate) instance: wgpu::Instance,
    pub(crate) adapter: wgpu::Adapter,
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) max_storage_buffer_binding_size: u64,
    pub(crate) max_storage_buffers_per_shader_stage: u32,
    pub(crate) max_compute_workgroups_per_dimension: u32,
}

/// Summary of the device limits the renderer checks against.
#[derive(Debug, Clone, Copy)]
pub struct GpuLimitsSummary {
    pub max_storage_buffers_per_shader_stage: u32,
    pub max_storage_buffer_binding_size: u64,
    pub max_compute_workgroups_per_dimension: u32,
}

impl GpuContext {
    pub async fn new(config: &RendererConfig) -> RenderResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                force_fallback_adapter: config.force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .ok_or(RenderError::NoAdapter)?;

        let info = adapter.get_info();
        let adapter_limits = adapter.limits();
        let needed = BufferSlot::ALL.len() as u32;
        if adapter_limits.max_storage_buffers_per_shader_stage < needed {
            return Err(RenderError::UnsupportedAdapter {
                adapter: info.name,
                detail: format!(
                    "{} storage buffers per stage available, {needed} required",
                    adapter_limits.max_storage_buffers_per_shader_stage
                ),
            });
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("voxel_raymarch.device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter_limits,
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;
        device.on_uncaptured_error(Box::new(|err| {
            log::error!("uncaptured wgpu error: {err}");
        }));

        let limits = device.limits();
        log::info!(
            "offscreen compute context on {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size as u64,
            max_storage_buffers_per_shader_stage: limits.max_storage_buffers_per_shader_stage,
            max_compute_workgroups_per_dimension: limits.max_compute_workgroups_per_dimension,
        })
    }

    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    pub fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn limits_summary(&self) -> GpuLimitsSummary {
        GpuLimitsSummary {
            max_storage_buffers_per_shader_stage: self.max_storage_buffers_per_shader_stage,
            max_storage_buffer_binding_size: self.max_storage_buffer_binding_size,
            max_compute_workgroups_per_dimension: self.max_compute_workgroups_per_dimension,
        }
    }

    /// Validates that the workgroup count fits within device limits.
    pub(crate) fn ensure_workgroups_fit(&self, workgroups: u32, label: &'static str) -> RenderResult<()> {
        if workgroups > self.max_compute_workgroups_per_dimension {
            return Err(RenderError::LimitExceeded {
                label,
                detail: format!(
                    "workgroups {} exceed max {}",
                    workgroups, self.max_compute_workgroups_per_dimension
                ),
            });
        }
        Ok(())
    }

    /// Validates that a buffer size fits within device limits.
    pub(crate) fn ensure_storage_fits(&self, bytes: u64, label: &'static str) -> RenderResult<()> {
        if bytes > self.max_storage_buffer_binding_size {
            return Err(RenderError::LimitExceeded {
                label,
                detail: format!(
                    "buffer size {} bytes exceeds max {} bytes",
                    bytes, self.max_storage_buffer_binding_size
                ),
            });
        }
        Ok(())
    }
}
