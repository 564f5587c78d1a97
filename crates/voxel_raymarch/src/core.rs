use glam::{IVec3, Vec3};

use crate::error::{RenderError, RenderResult};

/// Grid cell value marking an empty cell.
pub const EMPTY_CELL: i32 = -1;

/// Camera basis consumed by the ray-march program.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraBasis {
    pub position: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    /// Tangent of half the vertical field of view.
    pub tan_half_fov: f32,
}

impl CameraBasis {
    /// Basis at `position` looking down +Z, with +X to the right and +Y up.
    pub fn looking_down_z(position: Vec3, tan_half_fov: f32) -> Self {
        Self {
            position,
            forward: Vec3::Z,
            right: Vec3::X,
            up: Vec3::Y,
            tan_half_fov,
        }
    }

    pub fn validate(&self) -> RenderResult<()> {
        let vectors = [
            ("position", self.position),
            ("forward", self.forward),
            ("right", self.right),
            ("up", self.up),
        ];
        for (name, v) in vectors {
            if !v.is_finite() {
                return Err(RenderError::invalid(format!("camera {name} must be finite")));
            }
        }
        if self.forward == Vec3::ZERO {
            return Err(RenderError::invalid("camera forward must be non-zero"));
        }
        if !self.tan_half_fov.is_finite() || self.tan_half_fov <= 0.0 {
            return Err(RenderError::invalid("tan_half_fov must be finite and > 0"));
        }
        Ok(())
    }
}

/// Immutable per-call snapshot of everything one frame needs.
///
/// The request only borrows host arrays; nothing is copied until the
/// resource set uploads them.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest<'a> {
    pub width: u32,
    pub height: u32,
    pub camera: CameraBasis,
    pub voxel_count: u32,
    pub world_min: IVec3,
    pub world_size: IVec3,
    /// `world_size.x * world_size.y * world_size.z` cells, x-fastest.
    pub voxel_grid: &'a [i32],
    /// Packed ARGB per voxel.
    pub color: &'a [u32],
    pub opacity: &'a [f32],
    /// Atlas slot per voxel, negative for untextured voxels.
    pub texture_location: &'a [i32],
    pub texture_atlas: &'a [u32],
}

impl RenderRequest<'_> {
    /// Checks that every declared extent agrees with the supplied arrays.
    ///
    /// Runs before any device buffer is touched, so a failing request never
    /// reaches an upload.
    pub fn validate(&self) -> RenderResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::invalid(format!(
                "image size must be >= 1x1 (got {}x{})",
                self.width, self.height
            )));
        }
        let pixels = self.width as u64 * self.height as u64;
        if pixels > u32::MAX as u64 || self.width > i32::MAX as u32 || self.height > i32::MAX as u32 {
            return Err(RenderError::invalid(format!(
                "image of {}x{} pixels exceeds the addressable range",
                self.width, self.height
            )));
        }
        if self.voxel_count > i32::MAX as u32 {
            return Err(RenderError::invalid("voxel count exceeds i32 range"));
        }
        self.camera.validate()?;

        let cells = self.grid_cells()?;
        if cells != self.voxel_grid.len() as u64 {
            return Err(RenderError::invalid(format!(
                "voxel grid length {} does not match world size {}x{}x{} ({} cells)",
                self.voxel_grid.len(),
                self.world_size.x,
                self.world_size.y,
                self.world_size.z,
                cells
            )));
        }
        for axis in 0..3 {
            let max = self.world_min[axis] as i64 + self.world_size[axis] as i64;
            if max > i32::MAX as i64 {
                return Err(RenderError::invalid("world bounds overflow i32"));
            }
        }

        let expected = self.voxel_count as usize;
        let per_voxel = [
            ("color", self.color.len()),
            ("opacity", self.opacity.len()),
            ("texture location", self.texture_location.len()),
        ];
        for (name, len) in per_voxel {
            if len != expected {
                return Err(RenderError::invalid(format!(
                    "{name} length {len} does not match voxel count {expected}"
                )));
            }
        }
        Ok(())
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Number of grid cells declared by `world_size`.
    pub fn grid_cells(&self) -> RenderResult<u64> {
        if self.world_size.cmplt(IVec3::ZERO).any() {
            return Err(RenderError::invalid(format!(
                "world size must be non-negative (got {})",
                self.world_size
            )));
        }
        let [x, y, z] = self.world_size.to_array().map(|d| d as u64);
        x.checked_mul(y)
            .and_then(|xy| xy.checked_mul(z))
            .ok_or_else(|| RenderError::invalid(format!("world size {} overflows", self.world_size)))
    }

    /// Exclusive upper corner of the grid in world space.
    pub fn world_max(&self) -> IVec3 {
        self.world_min + self.world_size
    }

    pub fn in_bounds(&self, cell: IVec3) -> bool {
        cell.cmpge(self.world_min).all() && cell.cmplt(self.world_max()).all()
    }

    /// Flat grid index of a world cell, if the cell lies inside the grid.
    pub fn cell_index(&self, cell: IVec3) -> Option<usize> {
        if !self.in_bounds(cell) {
            return None;
        }
        let local = (cell - self.world_min).as_uvec3();
        let size = self.world_size.as_uvec3();
        Some(local.x as usize + size.x as usize * (local.y as usize + size.y as usize * local.z as usize))
    }

    /// Voxel stored at a world cell, ignoring slots outside `[0, voxel_count)`.
    pub fn voxel_at(&self, cell: IVec3) -> Option<usize> {
        let slot = *self.voxel_grid.get(self.cell_index(cell)?)?;
        if slot < 0 || slot as u32 >= self.voxel_count {
            return None;
        }
        Some(slot as usize)
    }
}

/// Shading constants shared by the GPU program and the CPU reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RaymarchSettings {
    /// Packed ARGB written where a ray leaves the grid unoccluded.
    pub sky_color: u32,
    /// Maximum ray length, also bounding the number of DDA steps.
    pub render_distance: f32,
}

impl Default for RaymarchSettings {
    fn default() -> Self {
        Self {
            sky_color: 0xFF87_CEEB,
            render_distance: 100.0,
        }
    }
}

/// Stats for one rendered frame.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub pixels: u32,
    pub workgroups: [u32; 3],
    pub voxels: u32,
    pub grid_cells: u64,
    pub bytes_uploaded: u64,
    pub buffers_reallocated: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(grid: &'a [i32], color: &'a [u32], opacity: &'a [f32], tex: &'a [i32]) -> RenderRequest<'a> {
        RenderRequest {
            width: 4,
            height: 4,
            camera: CameraBasis::looking_down_z(Vec3::ZERO, 1.0),
            voxel_count: color.len() as u32,
            world_min: IVec3::new(-1, 0, 2),
            world_size: IVec3::new(2, 1, 2),
            voxel_grid: grid,
            color,
            opacity,
            texture_location: tex,
            texture_atlas: &[],
        }
    }

    #[test]
    fn consistent_request_validates() {
        let grid = [0, EMPTY_CELL, EMPTY_CELL, EMPTY_CELL];
        let req = request(&grid, &[0xff00ff00], &[1.0], &[-1]);
        req.validate().expect("valid");
        assert_eq!(req.pixel_count(), 16);
        assert_eq!(req.grid_cells().unwrap(), 4);
    }

    #[test]
    fn grid_length_mismatch_is_rejected() {
        let grid = [0, EMPTY_CELL, EMPTY_CELL];
        let req = request(&grid, &[0xff00ff00], &[1.0], &[-1]);
        let err = req.validate().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Request);
    }

    #[test]
    fn per_voxel_length_mismatch_is_rejected() {
        let grid = [0; 4];
        let mut req = request(&grid, &[0xff00ff00], &[1.0, 0.5], &[-1]);
        assert!(req.validate().is_err());
        req.opacity = &[1.0];
        req.texture_location = &[];
        assert!(req.validate().is_err());
    }

    #[test]
    fn negative_world_size_is_rejected() {
        let mut req = request(&[], &[], &[], &[]);
        req.world_size = IVec3::new(-2, 1, 0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn overflowing_world_size_is_rejected() {
        let mut req = request(&[], &[], &[], &[]);
        req.world_size = IVec3::new(1 << 22, 1 << 21, 1 << 21);
        let err = req.validate().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Request);
        assert!(err.to_string().contains("overflows"), "{err}");

        req.world_size = IVec3::splat(i32::MAX);
        assert!(req.grid_cells().is_err());
    }

    #[test]
    fn degenerate_image_and_camera_are_rejected() {
        let grid = [EMPTY_CELL; 4];
        let mut req = request(&grid, &[], &[], &[]);
        req.height = 0;
        assert!(req.validate().is_err());
        req.height = 4;
        req.camera.tan_half_fov = 0.0;
        assert!(req.validate().is_err());
        req.camera.tan_half_fov = 1.0;
        req.camera.position = Vec3::new(f32::NAN, 0.0, 0.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn cell_index_is_x_fastest_and_bounded() {
        let grid = [EMPTY_CELL; 4];
        let req = request(&grid, &[], &[], &[]);
        assert_eq!(req.cell_index(IVec3::new(-1, 0, 2)), Some(0));
        assert_eq!(req.cell_index(IVec3::new(0, 0, 2)), Some(1));
        assert_eq!(req.cell_index(IVec3::new(-1, 0, 3)), Some(2));
        assert_eq!(req.cell_index(IVec3::new(1, 0, 2)), None);
        assert_eq!(req.cell_index(IVec3::new(-1, 0, 1)), None);
    }

    #[test]
    fn voxel_at_ignores_out_of_range_slots() {
        let grid = [0, 3, EMPTY_CELL, 0];
        let req = request(&grid, &[1], &[1.0], &[-1]);
        assert_eq!(req.voxel_at(IVec3::new(-1, 0, 2)), Some(0));
        assert_eq!(req.voxel_at(IVec3::new(0, 0, 2)), None);
        assert_eq!(req.voxel_at(IVec3::new(-1, 0, 3)), None);
    }
}
