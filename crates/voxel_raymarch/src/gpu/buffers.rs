use crate::error::{RenderError, RenderResult};

use super::context::GpuContext;
use super::dispatch::FrameFence;
use super::resources::ResourceSet;

/// Copies the pixel buffer of a completed frame into `dest`.
///
/// `dest` is only written once the staging map has succeeded, so a failed
/// readback leaves it exactly as it was.
pub async fn read_pixels(
    gpu: &GpuContext,
    resources: &mut ResourceSet,
    fence: FrameFence,
    dest: &mut [u32],
) -> RenderResult<()> {
    if dest.len() != fence.pixels {
        return Err(RenderError::invalid(format!(
            "destination holds {} pixels, frame produced {}",
            dest.len(),
            fence.pixels
        )));
    }
    let (pixels, staging, byte_len) = resources.readback_pair(gpu.device())?;
    if byte_len != dest.len() as u64 * 4 {
        return Err(RenderError::invalid(
            "pixel buffer was resized after the frame was dispatched",
        ));
    }

    let mut encoder = gpu
        .device()
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("voxel_raymarch.readback"),
        });
    encoder.copy_buffer_to_buffer(pixels, 0, staging, 0, byte_len);
    let submission = gpu.queue().submit(Some(encoder.finish()));

    let slice = staging.slice(..byte_len);
    let (sender, receiver) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    gpu.device().poll(wgpu::Maintain::wait_for(submission));
    receiver
        .await
        .map_err(|_| RenderError::ReadbackCancelled)??;

    {
        let data = slice.get_mapped_range();
        dest.copy_from_slice(bytemuck::cast_slice(&data));
    }
    staging.unmap();
    log::trace!("read back {} pixels (dispatch {:?})", dest.len(), fence.submission);
    Ok(())
}
