//! Entry point for hosts that hand over flat, loosely typed arrays.
//!
//! [`KernelArgs`] mirrors the host call one-to-one: signed 32-bit extents,
//! three-element slices for vectors and packed ARGB colours as `i32`.
//! Conversion into a [`RenderRequest`] is the only place these shapes are
//! checked, and [`execute_kernel`] never returns an error to the host: it
//! logs the failure and leaves the pixel array untouched.

use std::path::Path;

use glam::{IVec3, Vec3};

use crate::core::{CameraBasis, RenderRequest};
use crate::error::{RenderError, RenderResult};
use crate::gpu::{RenderContext, ShaderSource};

/// One host call's arguments, borrowed for the duration of the call.
#[derive(Debug, Clone, Copy)]
pub struct KernelArgs<'a> {
    pub width: i32,
    pub height: i32,
    pub cam: &'a [f32],
    pub forward: &'a [f32],
    pub right: &'a [f32],
    pub up: &'a [f32],
    pub tan_fov: f32,
    pub vox_count: i32,
    pub color: &'a [i32],
    pub opacity: &'a [f32],
    pub world_min: &'a [i32],
    pub world_size: &'a [i32],
    pub voxel_grid: &'a [i32],
    /// Path of a WGSL program, or empty for the built-in one.
    pub shader_path: &'a str,
    pub texture_location: &'a [i32],
    pub texture_atlas: &'a [i32],
}

fn vec3_arg(name: &str, values: &[f32]) -> RenderResult<Vec3> {
    <[f32; 3]>::try_from(values)
        .map(Vec3::from_array)
        .map_err(|_| RenderError::invalid(format!("{name} needs 3 components, got {}", values.len())))
}

fn ivec3_arg(name: &str, values: &[i32]) -> RenderResult<IVec3> {
    <[i32; 3]>::try_from(values)
        .map(IVec3::from_array)
        .map_err(|_| RenderError::invalid(format!("{name} needs 3 components, got {}", values.len())))
}

fn extent_arg(name: &str, value: i32) -> RenderResult<u32> {
    u32::try_from(value).map_err(|_| RenderError::invalid(format!("{name} must be >= 0 (got {value})")))
}

impl<'a> TryFrom<&KernelArgs<'a>> for RenderRequest<'a> {
    type Error = RenderError;

    fn try_from(args: &KernelArgs<'a>) -> RenderResult<Self> {
        let request = RenderRequest {
            width: extent_arg("width", args.width)?,
            height: extent_arg("height", args.height)?,
            camera: CameraBasis {
                position: vec3_arg("cam", args.cam)?,
                forward: vec3_arg("forward", args.forward)?,
                right: vec3_arg("right", args.right)?,
                up: vec3_arg("up", args.up)?,
                tan_half_fov: args.tan_fov,
            },
            voxel_count: extent_arg("voxCount", args.vox_count)?,
            world_min: ivec3_arg("worldMin", args.world_min)?,
            world_size: ivec3_arg("worldSize", args.world_size)?,
            voxel_grid: args.voxel_grid,
            color: bytemuck::cast_slice(args.color),
            opacity: args.opacity,
            texture_location: args.texture_location,
            texture_atlas: bytemuck::cast_slice(args.texture_atlas),
        };
        request.validate()?;
        Ok(request)
    }
}

impl KernelArgs<'_> {
    pub fn shader_source(&self) -> ShaderSource {
        if self.shader_path.is_empty() {
            ShaderSource::builtin()
        } else {
            ShaderSource::path(Path::new(self.shader_path))
        }
    }
}

/// Renders one frame for the host into `pixels`.
///
/// Returns `true` when `pixels` was overwritten. Every failure is logged and
/// leaves `pixels` as the host passed it.
pub fn execute_kernel(ctx: &mut RenderContext, pixels: &mut [i32], args: &KernelArgs<'_>) -> bool {
    let result = RenderRequest::try_from(args).and_then(|request| {
        ctx.render(&args.shader_source(), &request, bytemuck::cast_slice_mut(pixels))
    });
    match result {
        Ok(stats) => {
            log::trace!("frame rendered: {stats:?}");
            true
        }
        Err(err) => {
            log::error!("voxel kernel skipped a frame ({:?}): {err}", err.kind());
            false
        }
    }
}
