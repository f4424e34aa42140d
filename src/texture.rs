//! Decoded texture pixels keyed by id, plus the color helpers every
//! compositor shares.
//!
//! Pixels are `0xAARRGGBB`. The framebuffer keeps the same layout, which
//! softbuffer reads as `0x00RRGGBB` with the top byte ignored.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::ConfigError;
use crate::world::TextureId;

/// Sprite texels with less alpha than this are not drawn.
pub const ALPHA_CUTOFF: u8 = 8;

#[inline]
pub const fn pack_argb(a: u8, r: u8, g: u8, b: u8) -> u32 {
    ((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | (b as u32)
}

#[inline]
pub const fn pack_rgb(r: u8, g: u8, b: u8) -> u32 {
    pack_argb(0xFF, r, g, b)
}

#[inline]
pub fn alpha_of(c: u32) -> u8 {
    (c >> 24) as u8
}

/// Mixes `src` over `dst` with weight `t` in [0, 1]. Result is opaque.
#[inline]
pub fn blend(dst: u32, src: u32, t: f32) -> u32 {
    let t = (t.clamp(0.0, 1.0) * 256.0) as u32;
    let inv = 256 - t;
    let rb = (((dst & 0x00FF_00FF) * inv + (src & 0x00FF_00FF) * t) >> 8) & 0x00FF_00FF;
    let g = (((dst & 0x0000_FF00) * inv + (src & 0x0000_FF00) * t) >> 8) & 0x0000_FF00;
    0xFF00_0000 | rb | g
}

/// Darkens a color by `factor` in [0, 1], keeping its alpha.
#[inline]
pub fn shade(c: u32, factor: f32) -> u32 {
    let f = (factor.clamp(0.0, 1.0) * 256.0) as u32;
    let rb = (((c & 0x00FF_00FF) * f) >> 8) & 0x00FF_00FF;
    let g = (((c & 0x0000_FF00) * f) >> 8) & 0x0000_FF00;
    (c & 0xFF00_0000) | rb | g
}

/// An immutable pixel grid. Clones share the pixel buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    width: usize,
    height: usize,
    pixels: Arc<[u32]>,
    translucent: bool,
}

impl Texture {
    pub fn new(width: usize, height: usize, pixels: Vec<u32>) -> Result<Self, ConfigError> {
        if width == 0 || height == 0 || pixels.len() != width * height {
            return Err(ConfigError::TextureSize {
                width,
                height,
                found: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels: pixels.into(),
            translucent: false,
        })
    }

    pub fn solid(color: u32) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: vec![color].into(),
            translucent: false,
        }
    }

    /// `size`×`size` checkerboard with `cells` squares per side.
    pub fn checker(size: usize, cells: usize, a: u32, b: u32) -> Self {
        let size = size.max(1);
        let cell = (size / cells.max(1)).max(1);
        let pixels = (0..size * size)
            .map(|i| {
                let (x, y) = (i % size, i / size);
                if (x / cell + y / cell) % 2 == 0 { a } else { b }
            })
            .collect::<Vec<_>>();
        Self {
            width: size,
            height: size,
            pixels: pixels.into(),
            translucent: false,
        }
    }

    /// Staggered brick rows separated by one-texel mortar lines.
    pub fn bricks(size: usize, brick: u32, mortar: u32) -> Self {
        let size = size.max(4);
        let row_h = size / 4;
        let brick_w = size / 2;
        let pixels = (0..size * size)
            .map(|i| {
                let (x, y) = (i % size, i / size);
                let row = y / row_h;
                let offset = if row % 2 == 0 { 0 } else { brick_w / 2 };
                if y % row_h == 0 || (x + offset) % brick_w == 0 {
                    mortar
                } else {
                    brick
                }
            })
            .collect::<Vec<_>>();
        Self {
            width: size,
            height: size,
            pixels: pixels.into(),
            translucent: false,
        }
    }

    /// Marks the texture as see-through: walls using it do not stop rays.
    pub fn into_translucent(mut self) -> Self {
        self.translucent = true;
        self
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn is_translucent(&self) -> bool {
        self.translucent
    }

    /// Texel at integer coordinates, wrapping on both axes.
    #[inline]
    pub fn texel(&self, x: usize, y: usize) -> u32 {
        self.pixels[(y % self.height) * self.width + (x % self.width)]
    }

    /// Texel column for a u in [0, 1).
    #[inline]
    pub fn column_of(&self, u: f32) -> usize {
        ((u * self.width as f32) as usize).min(self.width - 1)
    }

    #[inline]
    pub fn row_of(&self, v: f32) -> usize {
        ((v * self.height as f32) as usize).min(self.height - 1)
    }

    /// Nearest-texel lookup for normalized coordinates.
    #[inline]
    pub fn sample(&self, u: f32, v: f32) -> u32 {
        let u = u.rem_euclid(1.0);
        let v = v.rem_euclid(1.0);
        self.texel(self.column_of(u), self.row_of(v))
    }
}

/// Texture lookup that never fails.
///
/// Ids that were never inserted resolve to the fallback texture; each one
/// is reported once.
#[derive(Debug)]
pub struct TextureStore {
    textures: HashMap<TextureId, Texture>,
    fallback: Texture,
    missing: Mutex<HashSet<TextureId>>,
}

impl Default for TextureStore {
    fn default() -> Self {
        Self::new(Texture::checker(8, 2, pack_rgb(255, 0, 255), pack_rgb(0, 0, 0)))
    }
}

impl TextureStore {
    pub fn new(fallback: Texture) -> Self {
        Self {
            textures: HashMap::new(),
            fallback,
            missing: Mutex::new(HashSet::new()),
        }
    }

    pub fn insert(&mut self, id: TextureId, texture: Texture) -> Option<Texture> {
        self.missing.get_mut().remove(&id);
        self.textures.insert(id, texture)
    }

    pub fn with(mut self, id: TextureId, texture: Texture) -> Self {
        self.insert(id, texture);
        self
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    #[inline]
    pub fn fallback(&self) -> &Texture {
        &self.fallback
    }

    pub fn get(&self, id: TextureId) -> &Texture {
        match self.textures.get(&id) {
            Some(t) => t,
            None => {
                if self.missing.lock().insert(id) {
                    warn!(texture = id.0, "texture not loaded, using fallback");
                }
                &self.fallback
            }
        }
    }

    /// Ids whose textures let rays pass through.
    pub fn translucent_ids(&self) -> HashSet<TextureId> {
        self.textures
            .iter()
            .filter(|(_, t)| t.is_translucent())
            .map(|(id, _)| *id)
            .collect()
    }

    /// Ids reported missing so far.
    pub fn missing(&self) -> Vec<TextureId> {
        let mut ids: Vec<_> = self.missing.lock().iter().copied().collect();
        ids.sort();
        ids
    }
}

impl Clone for TextureStore {
    fn clone(&self) -> Self {
        Self {
            textures: self.textures.clone(),
            fallback: self.fallback.clone(),
            missing: Mutex::new(self.missing.lock().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_pixel_buffers() {
        assert!(matches!(
            Texture::new(4, 4, vec![0; 15]),
            Err(ConfigError::TextureSize { found: 15, .. })
        ));
        assert!(Texture::new(2, 2, vec![0; 4]).is_ok());
    }

    #[test]
    fn sample_wraps_and_picks_nearest() {
        let t = Texture::new(2, 1, vec![1, 2]).unwrap();
        assert_eq!(t.sample(0.0, 0.0), 1);
        assert_eq!(t.sample(0.75, 0.5), 2);
        assert_eq!(t.sample(1.25, 0.0), 1);
        assert_eq!(t.sample(-0.25, 0.0), 2);
    }

    #[test]
    fn missing_ids_fall_back_and_are_recorded_once() {
        let store = TextureStore::default().with(TextureId(1), Texture::solid(7));
        assert_eq!(store.get(TextureId(1)).texel(0, 0), 7);
        let fb = store.get(TextureId(5)).clone();
        assert_eq!(&fb, store.fallback());
        store.get(TextureId(5));
        store.get(TextureId(4));
        assert_eq!(store.missing(), vec![TextureId(4), TextureId(5)]);
    }

    #[test]
    fn translucent_ids_are_collected() {
        let store = TextureStore::default()
            .with(TextureId(1), Texture::solid(1))
            .with(TextureId(2), Texture::solid(2).into_translucent());
        let ids = store.translucent_ids();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&TextureId(2)));
    }

    #[test]
    fn blend_and_shade() {
        let black = pack_rgb(0, 0, 0);
        let white = pack_rgb(255, 255, 255);
        assert_eq!(blend(black, white, 0.0), black);
        assert_eq!(blend(black, white, 1.0) & 0x00FF_FFFF, 0x00FF_FFFF);
        let half = blend(black, white, 0.5);
        assert_eq!((half >> 16) & 0xFF, 127);
        assert_eq!(shade(white, 0.5) & 0xFF, 127);
        assert_eq!(alpha_of(shade(white, 0.5)), 0xFF);
    }
}
