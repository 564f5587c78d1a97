//! Device buffers backing the seven bindings of the ray-march program.
//!
//! Scene buffers follow an [`UploadPolicy`]. Under `Static` a buffer is only
//! rewritten when its byte length or content fingerprint changes, so a scene
//! that stays put between frames is uploaded once. The pixel buffer is always
//! streamed because it carries the caller's destination array.

use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use crate::core::RenderRequest;
use crate::error::{RenderError, RenderResult};

use super::context::GpuContext;
use super::Params;

/// Smallest allocation, so zero-length arrays stay bindable.
const MIN_BUFFER_BYTES: u64 = 4;

/// Binding-numbered storage slots of the ray-march program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferSlot {
    Pixels = 0,
    VoxelGrid = 1,
    Color = 2,
    Opacity = 3,
    TextureLocation = 4,
    TextureAtlas = 5,
}

impl BufferSlot {
    pub const ALL: [BufferSlot; 6] = [
        BufferSlot::Pixels,
        BufferSlot::VoxelGrid,
        BufferSlot::Color,
        BufferSlot::Opacity,
        BufferSlot::TextureLocation,
        BufferSlot::TextureAtlas,
    ];

    pub fn binding(self) -> u32 {
        self as u32
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Name the program declares for this slot.
    pub fn shader_name(self) -> &'static str {
        match self {
            BufferSlot::Pixels => "pixels",
            BufferSlot::VoxelGrid => "voxelGrid",
            BufferSlot::Color => "color",
            BufferSlot::Opacity => "opacity",
            BufferSlot::TextureLocation => "textureLocation",
            BufferSlot::TextureAtlas => "textureAtlas",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            BufferSlot::Pixels => "voxel_raymarch.pixels",
            BufferSlot::VoxelGrid => "voxel_raymarch.voxel_grid",
            BufferSlot::Color => "voxel_raymarch.color",
            BufferSlot::Opacity => "voxel_raymarch.opacity",
            BufferSlot::TextureLocation => "voxel_raymarch.texture_location",
            BufferSlot::TextureAtlas => "voxel_raymarch.texture_atlas",
        }
    }

    /// Only the pixel buffer is written by the program.
    pub fn writable(self) -> bool {
        self == BufferSlot::Pixels
    }

    fn usage(self) -> wgpu::BufferUsages {
        let usage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        if self.writable() {
            usage | wgpu::BufferUsages::COPY_SRC
        } else {
            usage
        }
    }
}

/// How a scene buffer is refreshed between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadPolicy {
    /// Rewritten every frame.
    Streaming,
    /// Rewritten only when its size or contents change.
    #[default]
    Static,
}

/// What one `upload_frame` call did to each slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub reallocated: [bool; 6],
    pub written: [bool; 6],
    /// Static slots whose fingerprint matched, so no write was issued.
    pub skipped: [bool; 6],
    pub bytes_uploaded: u64,
    /// Bytes hashed to decide whether Static slots changed.
    pub bytes_hashed: u64,
}

impl UploadReport {
    pub fn reallocations(&self) -> u32 {
        self.reallocated.iter().filter(|&&r| r).count() as u32
    }

    pub fn was_written(&self, slot: BufferSlot) -> bool {
        self.written[slot.index()]
    }

    pub fn was_reallocated(&self, slot: BufferSlot) -> bool {
        self.reallocated[slot.index()]
    }

    pub fn was_skipped(&self, slot: BufferSlot) -> bool {
        self.skipped[slot.index()]
    }
}

struct DeviceBuffer {
    buffer: wgpu::Buffer,
    byte_len: u64,
    fingerprint: Option<u64>,
}

impl DeviceBuffer {
    fn new(device: &wgpu::Device, slot: BufferSlot, byte_len: u64) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(slot.label()),
            size: allocation_size(byte_len),
            usage: slot.usage(),
            mapped_at_creation: false,
        });
        Self {
            buffer,
            byte_len,
            fingerprint: None,
        }
    }
}

/// Storage, uniform and staging buffers owned by one render context.
#[derive(Default)]
pub struct ResourceSet {
    slots: [Option<DeviceBuffer>; 6],
    uniforms: Option<wgpu::Buffer>,
    staging: Option<(wgpu::Buffer, u64)>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies one frame's arrays into device buffers.
    ///
    /// `initial_pixels` seeds the pixel buffer and must hold one entry per
    /// pixel. Sizes are checked against device limits before anything is
    /// written, so a rejected frame leaves the previous buffers intact.
    pub fn upload_frame(
        &mut self,
        gpu: &GpuContext,
        request: &RenderRequest<'_>,
        initial_pixels: &[u32],
        scene_policy: UploadPolicy,
    ) -> RenderResult<UploadReport> {
        request.validate()?;
        if initial_pixels.len() != request.pixel_count() {
            return Err(RenderError::invalid(format!(
                "pixel array holds {} entries, {}x{} frame needs {}",
                initial_pixels.len(),
                request.width,
                request.height,
                request.pixel_count()
            )));
        }

        let payloads: [&[u8]; 6] = [
            bytemuck::cast_slice(initial_pixels),
            bytemuck::cast_slice(request.voxel_grid),
            bytemuck::cast_slice(request.color),
            bytemuck::cast_slice(request.opacity),
            bytemuck::cast_slice(request.texture_location),
            bytemuck::cast_slice(request.texture_atlas),
        ];
        for slot in BufferSlot::ALL {
            gpu.ensure_storage_fits(payloads[slot.index()].len() as u64, slot.label())?;
        }

        let mut report = UploadReport::default();
        for slot in BufferSlot::ALL {
            let policy = if slot == BufferSlot::Pixels {
                UploadPolicy::Streaming
            } else {
                scene_policy
            };
            self.upload_slot(gpu, slot, payloads[slot.index()], policy, &mut report);
        }
        log::debug!(
            "uploaded {} bytes, {} buffers reallocated, hashed {} bytes",
            report.bytes_uploaded,
            report.reallocations(),
            report.bytes_hashed
        );
        Ok(report)
    }

    fn upload_slot(
        &mut self,
        gpu: &GpuContext,
        slot: BufferSlot,
        bytes: &[u8],
        policy: UploadPolicy,
        report: &mut UploadReport,
    ) {
        let byte_len = bytes.len() as u64;
        let entry = &mut self.slots[slot.index()];
        if !matches!(entry.as_ref(), Some(existing) if existing.byte_len == byte_len) {
            if let Some(old) = entry.take() {
                old.buffer.destroy();
            }
            report.reallocated[slot.index()] = true;
        }
        let target = entry.get_or_insert_with(|| DeviceBuffer::new(gpu.device(), slot, byte_len));

        let digest = match policy {
            UploadPolicy::Streaming => None,
            UploadPolicy::Static => {
                report.bytes_hashed += byte_len;
                Some(fingerprint(bytes))
            }
        };
        if digest.is_some() && target.fingerprint == digest {
            log::debug!("{} unchanged, skipped {byte_len} byte upload", slot.label());
            report.skipped[slot.index()] = true;
            return;
        }
        if !bytes.is_empty() {
            gpu.queue().write_buffer(&target.buffer, 0, bytes);
        }
        target.fingerprint = digest;
        report.written[slot.index()] = true;
        report.bytes_uploaded += byte_len;
    }

    pub fn buffer(&self, slot: BufferSlot) -> Option<&wgpu::Buffer> {
        self.slots[slot.index()].as_ref().map(|b| &b.buffer)
    }

    /// Uniform buffer holding [`Params`], allocated on first use.
    pub(crate) fn uniform_buffer(&mut self, device: &wgpu::Device) -> &wgpu::Buffer {
        self.uniforms.get_or_insert_with(|| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("voxel_raymarch.params"),
                size: std::mem::size_of::<Params>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })
    }

    /// Binds every slot plus the uniform block to `layout`.
    pub(crate) fn bind_group(
        &mut self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
    ) -> RenderResult<wgpu::BindGroup> {
        self.uniform_buffer(device);
        let mut entries = Vec::with_capacity(BufferSlot::ALL.len() + 1);
        for slot in BufferSlot::ALL {
            let buffer = self.buffer(slot).ok_or_else(|| {
                RenderError::invalid(format!("{} has not been uploaded", slot.label()))
            })?;
            entries.push(wgpu::BindGroupEntry {
                binding: slot.binding(),
                resource: buffer.as_entire_binding(),
            });
        }
        if let Some(uniforms) = &self.uniforms {
            entries.push(wgpu::BindGroupEntry {
                binding: super::UNIFORM_BINDING,
                resource: uniforms.as_entire_binding(),
            });
        }
        Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("voxel_raymarch.bind_group"),
            layout,
            entries: &entries,
        }))
    }

    /// Pixel storage buffer plus a mappable staging buffer of the same size.
    pub(crate) fn readback_pair(
        &mut self,
        device: &wgpu::Device,
    ) -> RenderResult<(&wgpu::Buffer, &wgpu::Buffer, u64)> {
        let pixels = self.slots[BufferSlot::Pixels.index()]
            .as_ref()
            .ok_or_else(|| RenderError::invalid("pixel buffer has not been uploaded"))?;
        let byte_len = pixels.byte_len;

        if !matches!(&self.staging, Some((_, len)) if *len == byte_len) {
            if let Some((old, _)) = self.staging.take() {
                old.destroy();
            }
        }
        let (staging, _) = self.staging.get_or_insert_with(|| {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("voxel_raymarch.pixels.staging"),
                size: allocation_size(byte_len),
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            (buffer, byte_len)
        });
        Ok((&pixels.buffer, &*staging, byte_len))
    }

    /// True when no device buffer is currently held.
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none) && self.uniforms.is_none() && self.staging.is_none()
    }

    /// Destroys every buffer. The next upload reallocates from scratch.
    pub fn release(&mut self) {
        for buffer in self.slots.iter_mut().filter_map(Option::take) {
            buffer.buffer.destroy();
        }
        if let Some(uniforms) = self.uniforms.take() {
            uniforms.destroy();
        }
        if let Some((staging, _)) = self.staging.take() {
            staging.destroy();
        }
    }
}

impl Drop for ResourceSet {
    fn drop(&mut self) {
        self.release();
    }
}

fn allocation_size(byte_len: u64) -> u64 {
    byte_len.max(MIN_BUFFER_BYTES)
}

fn fingerprint(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write_usize(bytes.len());
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_follow_binding_order() {
        for (i, slot) in BufferSlot::ALL.iter().enumerate() {
            assert_eq!(slot.binding() as usize, i);
            assert_eq!(slot.index(), i);
        }
        assert!(BufferSlot::Pixels.writable());
        assert!(BufferSlot::ALL[1..].iter().all(|s| !s.writable()));
    }

    #[test]
    fn only_pixels_can_be_copied_out() {
        assert!(BufferSlot::Pixels.usage().contains(wgpu::BufferUsages::COPY_SRC));
        assert!(!BufferSlot::Color.usage().contains(wgpu::BufferUsages::COPY_SRC));
        for slot in BufferSlot::ALL {
            assert!(slot.usage().contains(wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST));
        }
    }

    #[test]
    fn empty_arrays_get_a_bindable_allocation() {
        assert_eq!(allocation_size(0), MIN_BUFFER_BYTES);
        assert_eq!(allocation_size(4), 4);
        assert_eq!(allocation_size(4096), 4096);
    }

    #[test]
    fn fingerprint_tracks_content_and_length() {
        let a: [u32; 3] = [1, 2, 3];
        let b: [u32; 3] = [1, 2, 4];
        let bytes_a: &[u8] = bytemuck::cast_slice(&a);
        assert_eq!(fingerprint(bytes_a), fingerprint(bytemuck::cast_slice(&a)));
        assert_ne!(fingerprint(bytes_a), fingerprint(bytemuck::cast_slice(&b)));
        assert_ne!(fingerprint(&[]), fingerprint(&[0, 0, 0, 0]));
    }

    #[test]
    fn report_counts_reallocations() {
        let mut report = UploadReport::default();
        report.reallocated[BufferSlot::Pixels.index()] = true;
        report.reallocated[BufferSlot::TextureAtlas.index()] = true;
        report.written[BufferSlot::Pixels.index()] = true;
        assert_eq!(report.reallocations(), 2);
        assert!(report.was_written(BufferSlot::Pixels));
        assert!(!report.was_written(BufferSlot::Color));
        assert!(report.was_reallocated(BufferSlot::TextureAtlas));
        assert!(!report.was_skipped(BufferSlot::Color));
    }

    #[test]
    fn fresh_set_holds_nothing() {
        let mut set = ResourceSet::new();
        assert!(set.is_empty());
        assert!(set.buffer(BufferSlot::Color).is_none());
        set.release();
        assert!(set.is_empty());
    }
}
