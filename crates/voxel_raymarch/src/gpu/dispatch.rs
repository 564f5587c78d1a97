use crate::core::RenderRequest;
use crate::error::RenderResult;

use super::context::GpuContext;
use super::program::CompiledProgram;
use super::resources::ResourceSet;
use super::{Params, WORKGROUP_SIZE};

/// Proof that a frame's compute pass has been submitted and completed.
///
/// Readback consumes the fence, so pixels can only be read after the
/// dispatch that produced them and only once per dispatch.
#[derive(Debug)]
#[must_use = "a dispatched frame is only observable through readback"]
pub struct FrameFence {
    pub(crate) submission: wgpu::SubmissionIndex,
    pub(crate) pixels: usize,
    pub(crate) workgroups: [u32; 3],
}

impl FrameFence {
    pub fn pixels(&self) -> usize {
        self.pixels
    }

    pub fn workgroups(&self) -> [u32; 3] {
        self.workgroups
    }
}

/// Workgroups needed to cover a `width` x `height` image with 8x8 tiles.
pub fn workgroup_counts(width: u32, height: u32) -> [u32; 3] {
    [
        width.div_ceil(WORKGROUP_SIZE[0]),
        height.div_ceil(WORKGROUP_SIZE[1]),
        1,
    ]
}

impl Params {
    pub(crate) fn from_request(request: &RenderRequest<'_>) -> Self {
        let camera = &request.camera;
        Self {
            cam: camera.position.to_array(),
            tan_fov: camera.tan_half_fov,
            forward: camera.forward.to_array(),
            vox_count: request.voxel_count as i32,
            right: camera.right.to_array(),
            width: request.width as i32,
            up: camera.up.to_array(),
            height: request.height as i32,
            world_min: request.world_min.to_array(),
            _pad0: 0,
            world_size: request.world_size.to_array(),
            _pad1: 0,
        }
    }
}

/// Writes uniforms, binds the uploaded buffers and runs the program over the
/// whole image, waiting until the device has finished the pass.
pub fn dispatch(
    gpu: &GpuContext,
    program: &CompiledProgram,
    resources: &mut ResourceSet,
    request: &RenderRequest<'_>,
) -> RenderResult<FrameFence> {
    let workgroups = workgroup_counts(request.width, request.height);
    gpu.ensure_workgroups_fit(workgroups[0], "raymarch dispatch x")?;
    gpu.ensure_workgroups_fit(workgroups[1], "raymarch dispatch y")?;

    let params = Params::from_request(request);
    let uniforms = resources.uniform_buffer(gpu.device());
    gpu.queue().write_buffer(uniforms, 0, bytemuck::bytes_of(&params));
    let bind_group = resources.bind_group(gpu.device(), program.bind_group_layout())?;

    let mut encoder = gpu
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("voxel_raymarch.dispatch"),
        });
    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("voxel_raymarch.raymarch_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(program.pipeline());
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
    }
    // Storage writes of the pass are visible to every command submitted after it.
    let submission = gpu.queue().submit(Some(encoder.finish()));
    gpu.device()
        .poll(wgpu::Maintain::wait_for(submission.clone()));
    log::trace!(
        "dispatched {}x{}x{} workgroups for {}x{} pixels",
        workgroups[0],
        workgroups[1],
        workgroups[2],
        request.width,
        request.height
    );

    Ok(FrameFence {
        submission,
        pixels: request.pixel_count(),
        workgroups,
    })
}

#[cfg(test)]
mod tests {
    use glam::{IVec3, Vec3};

    use super::*;
    use crate::core::CameraBasis;

    #[test]
    fn workgroups_cover_partial_tiles() {
        assert_eq!(workgroup_counts(64, 64), [8, 8, 1]);
        assert_eq!(workgroup_counts(65, 1), [9, 1, 1]);
        assert_eq!(workgroup_counts(1, 1), [1, 1, 1]);
        assert_eq!(workgroup_counts(800, 600), [100, 75, 1]);
    }

    #[test]
    fn params_carry_request_fields() {
        let grid = [0];
        let request = RenderRequest {
            width: 320,
            height: 200,
            camera: CameraBasis::looking_down_z(Vec3::new(1.0, 2.0, 3.0), 0.5),
            voxel_count: 1,
            world_min: IVec3::new(-4, 0, 7),
            world_size: IVec3::ONE,
            voxel_grid: &grid,
            color: &[0xFFFF_0000],
            opacity: &[1.0],
            texture_location: &[-1],
            texture_atlas: &[],
        };
        let params = Params::from_request(&request);
        assert_eq!(params.cam, [1.0, 2.0, 3.0]);
        assert_eq!(params.forward, [0.0, 0.0, 1.0]);
        assert_eq!(params.tan_fov, 0.5);
        assert_eq!((params.width, params.height, params.vox_count), (320, 200, 1));
        assert_eq!(params.world_min, [-4, 0, 7]);
        assert_eq!(params.world_size, [1, 1, 1]);

        let bytes = bytemuck::bytes_of(&params);
        assert_eq!(bytes.len(), 96);
        assert_eq!(&bytes[44..48], &320i32.to_ne_bytes());
    }
}
