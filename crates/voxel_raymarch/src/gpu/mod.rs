//! GPU ray-marching using a wgpu compute program.
//!
//! [`RenderContext`] owns the offscreen device, the compiled programs and the
//! device buffers. Every frame goes through the same ordered steps:
//! `ensure_context`, `ensure_program`, `upload_frame`, `dispatch`, `readback`.

use futures::executor::block_on;

use crate::core::{FrameStats, RaymarchSettings, RenderRequest};
use crate::error::{RenderError, RenderResult};

mod buffers;
mod context;
mod contract;
mod dispatch;
mod program;
mod resources;
mod shaders;

pub use context::{GpuContext, GpuLimitsSummary};
pub use contract::{check as check_contract, ShaderInterface, BIND_GROUP};
pub use dispatch::{workgroup_counts, FrameFence};
pub use program::{parse_and_validate, CompiledProgram, ProgramCache, ProgramKey, ShaderSource};
pub use resources::{BufferSlot, ResourceSet, UploadPolicy, UploadReport};
pub use shaders::RAYMARCH_WGSL;

pub(crate) use self::params::Params;

/// Compute entry point every program must export.
pub const ENTRY_POINT: &str = "main";
/// Binding of the uniform block in group 0.
pub const UNIFORM_BINDING: u32 = 6;
/// Workgroup size every program must declare.
pub const WORKGROUP_SIZE: [u32; 3] = [8, 8, 1];

mod params {
    use bytemuck::{Pod, Zeroable};

    /// Uniform block at binding 6, laid out as WGSL packs it.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Pod, Zeroable)]
    pub struct Params {
        pub cam: [f32; 3],
        pub tan_fov: f32,
        pub forward: [f32; 3],
        pub vox_count: i32,
        pub right: [f32; 3],
        pub width: i32,
        pub up: [f32; 3],
        pub height: i32,
        pub world_min: [i32; 3],
        pub _pad0: i32,
        pub world_size: [i32; 3],
        pub _pad1: i32,
    }
}

/// Configuration for a [`RenderContext`].
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Backends the instance may pick from.
    pub backends: wgpu::Backends,
    pub power_preference: wgpu::PowerPreference,
    /// Restrict the adapter to a software fallback.
    pub force_fallback_adapter: bool,
    /// Refresh policy for every buffer except the pixel buffer.
    pub scene_upload: UploadPolicy,
    /// Keep device buffers between frames. When false, every buffer is
    /// destroyed after readback and reallocated by the next frame.
    pub retain_buffers: bool,
    pub raymarch: RaymarchSettings,
}

impl Default for RendererConfig {
    /// Honours `WGPU_BACKEND` and `WGPU_POWER_PREF` when set.
    fn default() -> Self {
        Self {
            backends: wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all()),
            power_preference: wgpu::util::power_preference_from_env()
                .unwrap_or(wgpu::PowerPreference::HighPerformance),
            force_fallback_adapter: false,
            scene_upload: UploadPolicy::Static,
            retain_buffers: true,
            raymarch: RaymarchSettings::default(),
        }
    }
}

/// Offscreen GPU state for rendering frames, created lazily on first use.
///
/// All methods take `&mut self`, so frames on one context never interleave.
pub struct RenderContext {
    config: RendererConfig,
    gpu: Option<GpuContext>,
    programs: ProgramCache,
    resources: ResourceSet,
}

impl RenderContext {
    /// Creates an uninitialized context; no device is touched until the
    /// first `ensure_context`.
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            gpu: None,
            programs: ProgramCache::new(),
            resources: ResourceSet::new(),
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.gpu.is_some()
    }

    pub fn gpu(&self) -> Option<&GpuContext> {
        self.gpu.as_ref()
    }

    /// Number of programs compiled and linked over the context's lifetime.
    pub fn compile_count(&self) -> u32 {
        self.programs.compile_count()
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    /// Acquires the device on first call; later calls are no-ops.
    ///
    /// A failed attempt leaves the context uninitialized so a later call can
    /// retry.
    pub fn ensure_context(&mut self, width: u32, height: u32) -> RenderResult<&GpuContext> {
        if width == 0 || height == 0 {
            return Err(RenderError::invalid(format!(
                "offscreen target must be at least 1x1 (got {width}x{height})"
            )));
        }
        if self.gpu.is_none() {
            let gpu = block_on(GpuContext::new(&self.config))?;
            log::debug!("render context initialized for {width}x{height} frames");
            self.gpu = Some(gpu);
        }
        self.gpu.as_ref().ok_or(RenderError::ContextMissing)
    }

    /// Compiles and links `source` unless it is already cached.
    pub fn ensure_program(&mut self, source: &ShaderSource) -> RenderResult<&CompiledProgram> {
        let gpu = self.gpu.as_ref().ok_or(RenderError::ContextMissing)?;
        block_on(self.programs.ensure(gpu, source, &self.config.raymarch))
    }

    /// Copies the request's arrays, and `initial_pixels`, to the device.
    pub fn upload_frame(
        &mut self,
        request: &RenderRequest<'_>,
        initial_pixels: &[u32],
    ) -> RenderResult<UploadReport> {
        let gpu = self.gpu.as_ref().ok_or(RenderError::ContextMissing)?;
        self.resources
            .upload_frame(gpu, request, initial_pixels, self.config.scene_upload)
    }

    /// Runs the linked program for `source` over the uploaded frame.
    pub fn dispatch(
        &mut self,
        source: &ShaderSource,
        request: &RenderRequest<'_>,
    ) -> RenderResult<FrameFence> {
        let gpu = self.gpu.as_ref().ok_or(RenderError::ContextMissing)?;
        let program = self.programs.get(source).ok_or_else(|| {
            RenderError::invalid("program has not been compiled; call ensure_program first")
        })?;
        dispatch::dispatch(gpu, program, &mut self.resources, request)
    }

    /// Reads the pixels of a dispatched frame into `dest`.
    pub fn readback(&mut self, fence: FrameFence, dest: &mut [u32]) -> RenderResult<()> {
        let gpu = self.gpu.as_ref().ok_or(RenderError::ContextMissing)?;
        block_on(buffers::read_pixels(gpu, &mut self.resources, fence, dest))
    }

    /// Renders one frame into `pixels`.
    ///
    /// `pixels` must hold `width * height` entries; its previous contents seed
    /// the device pixel buffer. On any error `pixels` is left unchanged.
    pub fn render(
        &mut self,
        source: &ShaderSource,
        request: &RenderRequest<'_>,
        pixels: &mut [u32],
    ) -> RenderResult<FrameStats> {
        request.validate()?;
        if pixels.len() != request.pixel_count() {
            return Err(RenderError::invalid(format!(
                "pixel array holds {} entries, {}x{} frame needs {}",
                pixels.len(),
                request.width,
                request.height,
                request.pixel_count()
            )));
        }

        self.ensure_context(request.width, request.height)?;
        self.ensure_program(source)?;
        let report = self.upload_frame(request, pixels)?;
        let result = self
            .dispatch(source, request)
            .and_then(|fence| {
                let workgroups = fence.workgroups();
                self.readback(fence, pixels).map(|()| workgroups)
            });
        if !self.config.retain_buffers {
            self.resources.release();
        }
        let workgroups = result?;

        Ok(FrameStats {
            pixels: request.pixel_count() as u32,
            workgroups,
            voxels: request.voxel_count,
            grid_cells: request.voxel_grid.len() as u64,
            bytes_uploaded: report.bytes_uploaded,
            buffers_reallocated: report.reallocations(),
        })
    }

    /// Destroys every device buffer while keeping the device and programs.
    pub fn release_buffers(&mut self) {
        self.resources.release();
    }

    /// Releases buffers, programs and the device.
    pub fn destroy(mut self) {
        self.resources.release();
        self.programs.clear();
        if self.gpu.take().is_some() {
            log::debug!("render context destroyed");
        }
    }
}

impl Default for RenderContext {
    fn default() -> Self {
        Self::new(RendererConfig::default())
    }
}
