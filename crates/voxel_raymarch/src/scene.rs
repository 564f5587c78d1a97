//! Host-side construction of a frame snapshot from a list of voxels.

use glam::{IVec3, Vec3, Vec4};

use crate::atlas::TextureAtlas;
use crate::core::{CameraBasis, RenderRequest, EMPTY_CELL};
use crate::error::{RenderError, RenderResult};

/// Free-look camera described by pitch/yaw in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub pitch: f32,
    pub yaw: f32,
    /// Vertical field of view in degrees.
    pub fov_degrees: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            pitch: 0.0,
            yaw: 0.0,
            fov_degrees: 90.0,
        }
    }
}

impl Camera {
    /// Orthonormal basis for the current orientation.
    ///
    /// Yaw turns about +Y with yaw 0 facing +Z; pitch tilts toward +Y.
    pub fn basis(&self) -> CameraBasis {
        let (sin_yaw, cos_yaw) = self.yaw.sin_cos();
        let (sin_pitch, cos_pitch) = self.pitch.sin_cos();
        let forward = Vec3::new(sin_yaw * cos_pitch, sin_pitch, cos_yaw * cos_pitch).normalize();
        let side = self.yaw - std::f32::consts::FRAC_PI_2;
        let right = Vec3::new(side.sin(), 0.0, side.cos()).normalize();
        let up = right.cross(forward).normalize();
        CameraBasis {
            position: self.position,
            forward,
            right,
            up,
            tan_half_fov: (self.fov_degrees.to_radians() * 0.5).tan(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Linear RGBA in `[0, 1]`; alpha is ignored in favour of `opacity`.
    pub color: Vec4,
    pub opacity: f32,
    /// Atlas slot, negative for an untextured material.
    pub texture_location: i32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            color: Vec4::new(0.8, 0.8, 0.8, 1.0),
            opacity: 1.0,
            texture_location: -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Voxel {
    pub position: Vec3,
    pub material: Material,
}

impl Voxel {
    pub fn new(position: Vec3, material: Material) -> Self {
        Self { position, material }
    }

    fn cell(&self) -> IVec3 {
        self.position.as_ivec3()
    }
}

/// Packs float RGB into opaque ARGB, saturating each channel at 1.
pub fn rgb_to_argb(color: Vec4) -> u32 {
    let channel = |c: f32| (c.min(1.0) * 255.0) as u32;
    0xff00_0000 | (channel(color.x) << 16) | (channel(color.y) << 8) | channel(color.z)
}

/// Owned per-frame arrays derived from a voxel list.
#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    pub world_min: IVec3,
    pub world_size: IVec3,
    pub voxel_grid: Vec<i32>,
    pub color: Vec<u32>,
    pub opacity: Vec<f32>,
    pub texture_location: Vec<i32>,
}

impl SceneSnapshot {
    /// Builds the grid covering the integer bounding box of `voxels`.
    ///
    /// Each voxel's index is written into its cell; when several voxels share
    /// a cell the last one wins. An empty list yields an empty snapshot.
    /// Fails when the bounding box does not fit an `i32` extent or an
    /// addressable grid.
    pub fn build(voxels: &[Voxel]) -> RenderResult<Self> {
        if voxels.is_empty() {
            return Ok(Self::default());
        }

        let (min, max) = voxels.iter().fold(
            (IVec3::splat(i32::MAX), IVec3::splat(i32::MIN)),
            |(min, max), v| (min.min(v.cell()), max.max(v.cell())),
        );
        let extent = |axis: usize| {
            max[axis]
                .checked_sub(min[axis])
                .and_then(|d| d.checked_add(1))
                .ok_or_else(|| RenderError::invalid(format!("voxels span more than i32 cells on axis {axis}")))
        };
        let world_size = IVec3::new(extent(0)?, extent(1)?, extent(2)?);
        let cells = (world_size.x as usize)
            .checked_mul(world_size.y as usize)
            .and_then(|xy| xy.checked_mul(world_size.z as usize))
            .ok_or_else(|| RenderError::invalid(format!("bounding box {world_size} overflows the grid")))?;

        let mut snapshot = Self {
            world_min: min,
            world_size,
            voxel_grid: vec![EMPTY_CELL; cells],
            color: Vec::with_capacity(voxels.len()),
            opacity: Vec::with_capacity(voxels.len()),
            texture_location: Vec::with_capacity(voxels.len()),
        };
        for (index, voxel) in voxels.iter().enumerate() {
            snapshot.color.push(rgb_to_argb(voxel.material.color));
            snapshot.opacity.push(voxel.material.opacity);
            snapshot.texture_location.push(voxel.material.texture_location);

            let local = (voxel.cell() - min).as_uvec3();
            let cell = local.x as usize
                + world_size.x as usize * (local.y as usize + world_size.y as usize * local.z as usize);
            snapshot.voxel_grid[cell] = index as i32;
        }
        Ok(snapshot)
    }

    pub fn voxel_count(&self) -> u32 {
        self.color.len() as u32
    }

    /// Borrows the snapshot as a request for one frame.
    pub fn request<'a>(
        &'a self,
        width: u32,
        height: u32,
        camera: CameraBasis,
        atlas: Option<&'a TextureAtlas>,
    ) -> RenderRequest<'a> {
        RenderRequest {
            width,
            height,
            camera,
            voxel_count: self.voxel_count(),
            world_min: self.world_min,
            world_size: self.world_size,
            voxel_grid: &self.voxel_grid,
            color: &self.color,
            opacity: &self.opacity,
            texture_location: &self.texture_location,
            texture_atlas: atlas.map(TextureAtlas::as_flat).unwrap_or(&[]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RaymarchSettings;
    use crate::reference_cpu::render_cpu;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn default_camera_faces_positive_z() {
        let basis = Camera::default().basis();
        assert!(approx(basis.forward, Vec3::Z));
        assert!(approx(basis.right, Vec3::NEG_X));
        assert!(approx(basis.up, Vec3::Y));
        assert!((basis.tan_half_fov - 1.0).abs() < 1e-5);
    }

    #[test]
    fn basis_stays_orthonormal_when_turning() {
        let camera = Camera {
            pitch: 0.4,
            yaw: -1.1,
            ..Camera::default()
        };
        let b = camera.basis();
        for v in [b.forward, b.right, b.up] {
            assert!((v.length() - 1.0).abs() < 1e-5);
        }
        assert!(b.forward.dot(b.right).abs() < 1e-5);
        assert!(b.forward.dot(b.up).abs() < 1e-5);
        assert!(b.up.y > 0.0);
    }

    #[test]
    fn argb_packing_saturates() {
        assert_eq!(rgb_to_argb(Vec4::new(1.0, 0.0, 0.0, 1.0)), 0xFFFF_0000);
        assert_eq!(rgb_to_argb(Vec4::new(2.0, 0.5, 0.0, 0.0)), 0xFFFF_7F00);
        assert_eq!(rgb_to_argb(Material::default().color), 0xFFCC_CCCC);
    }

    #[test]
    fn snapshot_covers_bounding_box() {
        let voxels = [
            Voxel::new(Vec3::new(-2.0, 0.0, 3.0), Material::default()),
            Voxel::new(Vec3::new(1.0, 2.0, 3.0), Material { opacity: 0.25, ..Material::default() }),
        ];
        let snapshot = SceneSnapshot::build(&voxels).expect("snapshot");
        assert_eq!(snapshot.world_min, IVec3::new(-2, 0, 3));
        assert_eq!(snapshot.world_size, IVec3::new(4, 3, 1));
        assert_eq!(snapshot.voxel_grid.len(), 12);
        assert_eq!(snapshot.voxel_grid[0], 0);
        assert_eq!(snapshot.voxel_grid[3 + 4 * 2], 1);
        assert_eq!(snapshot.voxel_grid.iter().filter(|&&c| c == EMPTY_CELL).count(), 10);
        assert_eq!(snapshot.opacity, vec![1.0, 0.25]);

        let req = snapshot.request(8, 8, Camera::default().basis(), None);
        req.validate().expect("snapshot request is consistent");
    }

    #[test]
    fn bounding_box_beyond_i32_is_rejected() {
        let voxels = [
            Voxel::new(Vec3::new(-2.0e9, 0.0, 0.0), Material::default()),
            Voxel::new(Vec3::new(2.0e9, 0.0, 0.0), Material::default()),
        ];
        let err = SceneSnapshot::build(&voxels).unwrap_err();
        assert!(err.to_string().contains("axis 0"), "{err}");
    }

    #[test]
    fn empty_snapshot_renders_sky() {
        let snapshot = SceneSnapshot::build(&[]).expect("snapshot");
        let req = snapshot.request(4, 4, Camera::default().basis(), None);
        let settings = RaymarchSettings::default();
        let pixels = render_cpu(&req, &settings).expect("render");
        assert!(pixels.iter().all(|&p| p == settings.sky_color));
    }
}
