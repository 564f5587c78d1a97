use glam::{IVec3, Vec2, Vec3};

use crate::atlas::{self, FACE_SIZE, TEXELS_PER_TEXTURE};
use crate::core::{RaymarchSettings, RenderRequest};
use crate::error::RenderResult;

/// Stand-in for "no boundary on this axis" in the DDA walk.
const FAR: f32 = 1e30;

/// Transmittance below which a ray stops accumulating color.
pub const OPAQUE_CUTOFF: f32 = 0.01;

/// Mixes `fg` over `bg` per RGB channel with coverage `alpha`; alpha is forced opaque.
pub fn blend(bg: u32, fg: u32, alpha: f32) -> u32 {
    let a = alpha.clamp(0.0, 1.0);
    let channel = |shift: u32| {
        let f = ((fg >> shift) & 0xff) as f32;
        let b = ((bg >> shift) & 0xff) as f32;
        ((f * a + b * (1.0 - a)) as u32).min(255)
    };
    0xff00_0000 | (channel(16) << 16) | (channel(8) << 8) | channel(0)
}

/// Face a ray enters through after stepping along `axis` in direction `step`.
///
/// Faces are numbered +X, -X, +Y, -Y, +Z, -Z.
pub fn entry_face(axis: usize, step: i32) -> usize {
    if step > 0 {
        2 * axis + 1
    } else {
        2 * axis
    }
}

/// Texture coordinates of a point on `face`, `local` being the hit point inside the cell.
pub fn face_uv(face: usize, local: Vec3) -> Vec2 {
    match face / 2 {
        0 => Vec2::new(local.z, 1.0 - local.y),
        1 => Vec2::new(local.x, local.z),
        _ => Vec2::new(local.x, 1.0 - local.y),
    }
}

fn surface_color(request: &RenderRequest, voxel: usize, face: usize, local: Vec3) -> u32 {
    let location = request.texture_location[voxel];
    let textures = request.texture_atlas.len() / TEXELS_PER_TEXTURE;
    if location >= 0 && (location as usize) < textures {
        let uv = face_uv(face, local.clamp(Vec3::ZERO, Vec3::ONE));
        let u = ((uv.x * FACE_SIZE as f32) as usize).min(FACE_SIZE - 1);
        let v = ((uv.y * FACE_SIZE as f32) as usize).min(FACE_SIZE - 1);
        return request.texture_atlas[atlas::flat_index(location as usize, face, u, v)];
    }
    request.color[voxel]
}

/// Ray-marches one pixel exactly the way the compute program does.
///
/// `request` must already have passed [`RenderRequest::validate`]; the
/// per-voxel arrays are indexed directly. [`render_cpu`] is the public entry.
pub(crate) fn trace_pixel(request: &RenderRequest, settings: &RaymarchSettings, px: u32, py: u32) -> u32 {
    let sky = settings.sky_color;
    if request.voxel_grid.is_empty() {
        return sky;
    }
    let cam = &request.camera;
    let w = request.width as f32;
    let h = request.height as f32;
    let aspect = w / h;
    let ndc_x = 2.0 * (px as f32 + 0.5) / w - 1.0;
    let ndc_y = 1.0 - 2.0 * (py as f32 + 0.5) / h;
    let dir = (cam.forward
        + cam.right * (ndc_x * aspect * cam.tan_half_fov)
        + cam.up * (ndc_y * cam.tan_half_fov))
        .normalize();

    let grid_min = request.world_min.as_vec3();
    let grid_max = request.world_max().as_vec3();
    let mut t_min = 0.0f32;
    let mut t_max = settings.render_distance;
    let mut entry_axis = 2usize;
    for a in 0..3 {
        if dir[a] != 0.0 {
            let inv = 1.0 / dir[a];
            let t1 = (grid_min[a] - cam.position[a]) * inv;
            let t2 = (grid_max[a] - cam.position[a]) * inv;
            let near = t1.min(t2);
            if near > t_min {
                t_min = near;
                entry_axis = a;
            }
            t_max = t_max.min(t1.max(t2));
        } else if cam.position[a] < grid_min[a] || cam.position[a] > grid_max[a] {
            return sky;
        }
    }
    if t_min > t_max {
        return sky;
    }

    let start = cam.position + dir * t_min;
    let mut cell = start.floor().as_ivec3();
    if t_min > 0.0 {
        cell = cell.clamp(request.world_min, request.world_max() - IVec3::ONE);
    }

    let step = IVec3::new(
        if dir.x > 0.0 { 1 } else { -1 },
        if dir.y > 0.0 { 1 } else { -1 },
        if dir.z > 0.0 { 1 } else { -1 },
    );
    let mut t_next = Vec3::splat(FAR);
    let mut t_delta = Vec3::splat(FAR);
    for a in 0..3 {
        if dir[a] != 0.0 {
            let inv = 1.0 / dir[a];
            let boundary = (if dir[a] > 0.0 { cell[a] + 1 } else { cell[a] }) as f32;
            t_next[a] = t_min + (boundary - start[a]) * inv;
            t_delta[a] = inv.abs();
        }
    }

    let world_min = request.world_min;
    let world_max = request.world_max();
    let mut color = 0u32;
    let mut transmit = 1.0f32;
    let mut dist = t_min;
    let mut steps = 0u32;
    let mut axis = entry_axis;
    loop {
        if dist >= settings.render_distance
            || transmit <= OPAQUE_CUTOFF
            || steps as f32 >= settings.render_distance - 1.0
        {
            break;
        }
        if let Some(voxel) = request.voxel_at(cell) {
            let alpha = request.opacity[voxel];
            let face = entry_face(axis, step[axis]);
            let local = cam.position + dir * dist - cell.as_vec3();
            let fg = surface_color(request, voxel, face, local);
            color = blend(color, fg, alpha * transmit);
            transmit *= 1.0 - alpha;
        }

        axis = if t_next.x < t_next.y && t_next.x < t_next.z {
            0
        } else if t_next.y < t_next.z {
            1
        } else {
            2
        };
        cell[axis] += step[axis];
        dist = t_next[axis];
        t_next[axis] += t_delta[axis];

        let leaving = (0..3).any(|a| {
            (step[a] < 0 && cell[a] < world_min[a]) || (step[a] > 0 && cell[a] >= world_max[a])
        });
        if leaving {
            break;
        }
        steps += 1;
    }

    blend(color, sky, transmit)
}

/// Renders a full frame on the host.
pub fn render_cpu(request: &RenderRequest, settings: &RaymarchSettings) -> RenderResult<Vec<u32>> {
    request.validate()?;
    let width = request.width as usize;
    let pixels = (0..request.pixel_count())
        .map(|id| trace_pixel(request, settings, (id % width) as u32, (id / width) as u32))
        .collect();
    Ok(pixels)
}
