//! Texture atlas packing.
//!
//! Every texture is a 192x32 strip of six 32x32 faces ordered
//! +X, -X, +Y, -Y, +Z, -Z. The flat atlas is the row-major concatenation of
//! all strips, which is the layout the ray-march program samples.

use crate::error::{RenderError, RenderResult};

/// Edge length of one texture face in texels.
pub const FACE_SIZE: usize = 32;
/// Number of faces per texture.
pub const FACE_COUNT: usize = 6;
/// Width of one texture strip in texels.
pub const STRIP_WIDTH: usize = FACE_SIZE * FACE_COUNT;
/// Texels occupied by one texture in the flat atlas.
pub const TEXELS_PER_TEXTURE: usize = STRIP_WIDTH * FACE_SIZE;

/// Edge length of a cube-cross source image.
pub const CROSS_SIZE: usize = 4 * FACE_SIZE;

/// Top-left corner of each face inside a 128x128 cube-cross image, in face order.
const CROSS_FACE_ORIGINS: [(usize, usize); FACE_COUNT] =
    [(64, 32), (0, 32), (32, 0), (32, 64), (32, 32), (96, 32)];

#[derive(Debug, Clone)]
pub struct TextureAtlas {
    texels: Vec<u32>,
}

impl TextureAtlas {
    /// Creates an atlas with `capacity` blank (zeroed) texture slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            texels: vec![0; capacity * TEXELS_PER_TEXTURE],
        }
    }

    pub fn len(&self) -> usize {
        self.texels.len() / TEXELS_PER_TEXTURE
    }

    pub fn is_empty(&self) -> bool {
        self.texels.is_empty()
    }

    /// Writes ARGB texels into slot `id`, growing the atlas if needed.
    ///
    /// Accepts a 192x32 face strip or a 128x128 cube-cross laid out as
    /// ```text
    ///   [ ][+Y][  ][  ]
    ///   [-X][+Z][+X][-Z]
    ///   [ ][-Y][  ][  ]
    /// ```
    pub fn add_texture(&mut self, id: usize, width: usize, height: usize, texels: &[u32]) -> RenderResult<()> {
        if width.checked_mul(height) != Some(texels.len()) {
            return Err(RenderError::invalid(format!(
                "texture {id}: {} texels supplied for a {width}x{height} image",
                texels.len()
            )));
        }
        let strip = match (width, height) {
            (STRIP_WIDTH, FACE_SIZE) => texels.to_vec(),
            (CROSS_SIZE, CROSS_SIZE) => cross_to_strip(texels),
            _ => {
                return Err(RenderError::invalid(format!(
                    "texture {id} must be {STRIP_WIDTH}x{FACE_SIZE} or {CROSS_SIZE}x{CROSS_SIZE}, got {width}x{height}"
                )))
            }
        };

        let needed = id
            .checked_add(1)
            .and_then(|slots| slots.checked_mul(TEXELS_PER_TEXTURE))
            .ok_or_else(|| RenderError::invalid(format!("texture slot {id} is out of range")))?;
        if self.texels.len() < needed {
            self.texels.resize(needed, 0);
        }
        let start = id * TEXELS_PER_TEXTURE;
        self.texels[start..start + TEXELS_PER_TEXTURE].copy_from_slice(&strip);
        Ok(())
    }

    /// Reads texel `(u, v)` of `face` in texture `location`.
    pub fn texel(&self, location: usize, face: usize, u: usize, v: usize) -> Option<u32> {
        if location >= self.len() || face >= FACE_COUNT || u >= FACE_SIZE || v >= FACE_SIZE {
            return None;
        }
        self.texels.get(flat_index(location, face, u, v)).copied()
    }

    /// Flat row-major texel array, bound to slot 5 of the program.
    pub fn as_flat(&self) -> &[u32] {
        &self.texels
    }
}

/// Index of a texel inside the flat atlas.
pub fn flat_index(location: usize, face: usize, u: usize, v: usize) -> usize {
    location * TEXELS_PER_TEXTURE + v * STRIP_WIDTH + face * FACE_SIZE + u
}

fn cross_to_strip(texels: &[u32]) -> Vec<u32> {
    let mut strip = vec![0u32; TEXELS_PER_TEXTURE];
    for (face, &(ox, oy)) in CROSS_FACE_ORIGINS.iter().enumerate() {
        for y in 0..FACE_SIZE {
            let src = (oy + y) * CROSS_SIZE + ox;
            let dst = y * STRIP_WIDTH + face * FACE_SIZE;
            strip[dst..dst + FACE_SIZE].copy_from_slice(&texels[src..src + FACE_SIZE]);
        }
    }
    strip
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_texture_is_stored_verbatim() {
        let texels: Vec<u32> = (0..TEXELS_PER_TEXTURE as u32).collect();
        let mut atlas = TextureAtlas::new(1);
        atlas.add_texture(0, STRIP_WIDTH, FACE_SIZE, &texels).expect("strip");
        assert_eq!(atlas.as_flat(), texels.as_slice());
        assert_eq!(atlas.texel(0, 1, 2, 3), Some((3 * STRIP_WIDTH + FACE_SIZE + 2) as u32));
    }

    #[test]
    fn cross_faces_land_in_face_order() {
        let mut cross = vec![0u32; CROSS_SIZE * CROSS_SIZE];
        for (face, &(ox, oy)) in CROSS_FACE_ORIGINS.iter().enumerate() {
            for y in 0..FACE_SIZE {
                for x in 0..FACE_SIZE {
                    cross[(oy + y) * CROSS_SIZE + ox + x] = 0xFF00_0000 | face as u32;
                }
            }
        }
        let mut atlas = TextureAtlas::new(0);
        atlas.add_texture(2, CROSS_SIZE, CROSS_SIZE, &cross).expect("cross");
        assert_eq!(atlas.len(), 3);
        for face in 0..FACE_COUNT {
            assert_eq!(atlas.texel(2, face, 5, 31), Some(0xFF00_0000 | face as u32));
        }
        assert_eq!(atlas.texel(0, 0, 0, 0), Some(0));
    }

    #[test]
    fn unsupported_sizes_are_rejected() {
        let mut atlas = TextureAtlas::new(1);
        assert!(atlas.add_texture(0, 64, 64, &vec![0; 64 * 64]).is_err());
        assert!(atlas.add_texture(0, STRIP_WIDTH, FACE_SIZE, &[0; 10]).is_err());
        assert!(atlas.add_texture(0, usize::MAX, 2, &[0; 4]).is_err());
        let strip = vec![0; TEXELS_PER_TEXTURE];
        assert!(atlas.add_texture(usize::MAX, STRIP_WIDTH, FACE_SIZE, &strip).is_err());
    }

    #[test]
    fn texel_lookup_is_bounded() {
        let atlas = TextureAtlas::new(1);
        assert_eq!(atlas.texel(1, 0, 0, 0), None);
        assert_eq!(atlas.texel(0, FACE_COUNT, 0, 0), None);
        assert_eq!(atlas.texel(0, 0, FACE_SIZE, 0), None);
    }
}
