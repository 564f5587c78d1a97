/// Built-in ray-march program.
///
/// Storage buffers 0..5 and the uniform block at binding 6 form the host
/// contract checked by `contract::check`; the workgroup size is fixed at 8x8x1.
pub const RAYMARCH_WGSL: &str = r#"
struct Params {
  cam: vec3<f32>,
  tanFov: f32,
  forward: vec3<f32>,
  voxCount: i32,
  right: vec3<f32>,
  width: i32,
  up: vec3<f32>,
  height: i32,
  worldMin: vec3<i32>,
  _pad0: i32,
  worldSize: vec3<i32>,
  _pad1: i32,
};

@group(0) @binding(0) var<storage, read_write> pixels: array<u32>;
@group(0) @binding(1) var<storage, read> voxelGrid: array<i32>;
@group(0) @binding(2) var<storage, read> color: array<u32>;
@group(0) @binding(3) var<storage, read> opacity: array<f32>;
@group(0) @binding(4) var<storage, read> textureLocation: array<i32>;
@group(0) @binding(5) var<storage, read> textureAtlas: array<u32>;
@group(0) @binding(6) var<uniform> params: Params;

override SKY_COLOR: u32 = 0xFF87CEEBu;
override RENDER_DISTANCE: f32 = 100.0;

const FAR: f32 = 1e30;
const OPAQUE_CUTOFF: f32 = 0.01;
const FACE_SIZE: u32 = 32u;
const STRIP_WIDTH: u32 = 192u;
const TEXELS_PER_TEXTURE: u32 = 6144u;

fn blend(bg: u32, fg: u32, alpha: f32) -> u32 {
  let a = clamp(alpha, 0.0, 1.0);
  let f = vec3<f32>(f32((fg >> 16u) & 255u), f32((fg >> 8u) & 255u), f32(fg & 255u));
  let b = vec3<f32>(f32((bg >> 16u) & 255u), f32((bg >> 8u) & 255u), f32(bg & 255u));
  let c = min(vec3<u32>(f * a + b * (1.0 - a)), vec3<u32>(255u));
  return 0xff000000u | (c.x << 16u) | (c.y << 8u) | c.z;
}

// Faces are numbered +X, -X, +Y, -Y, +Z, -Z.
fn entry_face(axis: u32, dir_step: i32) -> u32 {
  var face = 2u * axis;
  if (dir_step > 0) {
    face = face + 1u;
  }
  return face;
}

fn face_uv(face: u32, inside: vec3<f32>) -> vec2<f32> {
  var uv = vec2<f32>(inside.x, 1.0 - inside.y);
  switch (face / 2u) {
    case 0u: {
      uv = vec2<f32>(inside.z, 1.0 - inside.y);
    }
    case 1u: {
      uv = vec2<f32>(inside.x, inside.z);
    }
    default: {}
  }
  return uv;
}

fn surface_color(voxel: u32, face: u32, inside: vec3<f32>) -> u32 {
  let tex_slot = textureLocation[voxel];
  let textures = arrayLength(&textureAtlas) / TEXELS_PER_TEXTURE;
  if (tex_slot >= 0 && u32(tex_slot) < textures) {
    let uv = face_uv(face, clamp(inside, vec3<f32>(0.0), vec3<f32>(1.0)));
    let u = min(u32(uv.x * f32(FACE_SIZE)), FACE_SIZE - 1u);
    let v = min(u32(uv.y * f32(FACE_SIZE)), FACE_SIZE - 1u);
    return textureAtlas[u32(tex_slot) * TEXELS_PER_TEXTURE + v * STRIP_WIDTH + face * FACE_SIZE + u];
  }
  return color[voxel];
}

// Voxel index stored at a world cell, or -1 when the cell is outside the
// grid, empty, or names a slot outside [0, voxCount).
fn voxel_at(cell: vec3<i32>) -> i32 {
  let world_max = params.worldMin + params.worldSize;
  if (any(cell < params.worldMin) || any(cell >= world_max)) {
    return -1;
  }
  let offset = vec3<u32>(cell - params.worldMin);
  let size = vec3<u32>(params.worldSize);
  let slot = voxelGrid[offset.x + size.x * (offset.y + size.y * offset.z)];
  if (slot < 0 || slot >= params.voxCount) {
    return -1;
  }
  return slot;
}

fn trace(px: u32, py: u32) -> u32 {
  if (any(params.worldSize <= vec3<i32>(0))) {
    return SKY_COLOR;
  }
  let w = f32(params.width);
  let h = f32(params.height);
  let aspect = w / h;
  let ndc_x = 2.0 * (f32(px) + 0.5) / w - 1.0;
  let ndc_y = 1.0 - 2.0 * (f32(py) + 0.5) / h;
  let dir = normalize(
    params.forward
      + params.right * (ndc_x * aspect * params.tanFov)
      + params.up * (ndc_y * params.tanFov)
  );

  let grid_min = vec3<f32>(params.worldMin);
  let grid_max = vec3<f32>(params.worldMin + params.worldSize);
  var t_min = 0.0;
  var t_max = RENDER_DISTANCE;
  var entry_axis = 2u;
  for (var a = 0u; a < 3u; a++) {
    if (dir[a] != 0.0) {
      let inv = 1.0 / dir[a];
      let t1 = (grid_min[a] - params.cam[a]) * inv;
      let t2 = (grid_max[a] - params.cam[a]) * inv;
      let near = min(t1, t2);
      if (near > t_min) {
        t_min = near;
        entry_axis = a;
      }
      t_max = min(t_max, max(t1, t2));
    } else if (params.cam[a] < grid_min[a] || params.cam[a] > grid_max[a]) {
      return SKY_COLOR;
    }
  }
  if (t_min > t_max) {
    return SKY_COLOR;
  }

  let start = params.cam + dir * t_min;
  var cell = vec3<i32>(floor(start));
  if (t_min > 0.0) {
    cell = clamp(cell, params.worldMin, params.worldMin + params.worldSize - vec3<i32>(1));
  }

  let dir_step = select(vec3<i32>(-1), vec3<i32>(1), dir > vec3<f32>(0.0));
  var t_next = vec3<f32>(FAR);
  var t_delta = vec3<f32>(FAR);
  for (var a = 0u; a < 3u; a++) {
    if (dir[a] != 0.0) {
      let inv = 1.0 / dir[a];
      var boundary = f32(cell[a]);
      if (dir[a] > 0.0) {
        boundary = f32(cell[a] + 1);
      }
      t_next[a] = t_min + (boundary - start[a]) * inv;
      t_delta[a] = abs(inv);
    }
  }

  let world_max = params.worldMin + params.worldSize;
  var shade = 0u;
  var transmit = 1.0;
  var dist = t_min;
  var steps = 0u;
  var axis = entry_axis;
  loop {
    if (dist >= RENDER_DISTANCE || transmit <= OPAQUE_CUTOFF || f32(steps) >= RENDER_DISTANCE - 1.0) {
      break;
    }
    let slot = voxel_at(cell);
    if (slot >= 0) {
      let voxel = u32(slot);
      let alpha = opacity[voxel];
      let face = entry_face(axis, dir_step[axis]);
      let inside = params.cam + dir * dist - vec3<f32>(cell);
      let fg = surface_color(voxel, face, inside);
      shade = blend(shade, fg, alpha * transmit);
      transmit = transmit * (1.0 - alpha);
    }

    if (t_next.x < t_next.y && t_next.x < t_next.z) {
      axis = 0u;
    } else if (t_next.y < t_next.z) {
      axis = 1u;
    } else {
      axis = 2u;
    }
    cell[axis] = cell[axis] + dir_step[axis];
    dist = t_next[axis];
    t_next[axis] = t_next[axis] + t_delta[axis];

    let leaving = (dir_step < vec3<i32>(0) & cell < params.worldMin)
      | (dir_step > vec3<i32>(0) & cell >= world_max);
    if (any(leaving)) {
      break;
    }
    steps = steps + 1u;
  }

  return blend(shade, SKY_COLOR, transmit);
}

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
  let width = u32(params.width);
  let height = u32(params.height);
  if (gid.x >= width || gid.y >= height) {
    return;
  }
  pixels[gid.y * width + gid.x] = trace(gid.x, gid.y);
}
"#;
