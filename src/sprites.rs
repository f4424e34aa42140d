//! Billboard projection with per-column occlusion against the ray buffer.

use std::cmp::Ordering;
use std::ops::Range;

use crate::camera::{Projection, normalize_angle};
use crate::framebuffer::Framebuffer;
use crate::frame::Frame;
use crate::texture::{ALPHA_CUTOFF, Texture, TextureStore, alpha_of};
use crate::world::{Pose, TextureId};

/// Sprites nearer than this along the view axis are not projected.
pub const MIN_SPRITE_DISTANCE: f32 = 0.1;
/// A sprite counts as in front of a wall up to this much past it.
pub const DEFAULT_DEPTH_BIAS: f32 = 0.01;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Layer {
    Background,
    Midground,
    Foreground,
}

/// What a sprite shows. Every variant goes through the same occlusion test.
#[derive(Clone, Debug, PartialEq)]
pub enum Drawable {
    Static(TextureId),
    /// Cycles through `frames`, each shown for `frame_time` seconds.
    Animated { frames: Vec<TextureId>, frame_time: f32 },
    /// Billboard with its own tolerance against the wall in front of it,
    /// for sprites set flush into walls.
    DepthBiased { texture: TextureId, bias: f32 },
}

impl Drawable {
    pub fn texture_at(&self, time: f32) -> Option<TextureId> {
        match self {
            Drawable::Static(t) => Some(*t),
            Drawable::DepthBiased { texture, .. } => Some(*texture),
            Drawable::Animated { frames, frame_time } => {
                if frames.is_empty() {
                    return None;
                }
                if !(*frame_time > 0.0) || !time.is_finite() {
                    return frames.first().copied();
                }
                let i = (time.max(0.0) / frame_time) as usize % frames.len();
                frames.get(i).copied()
            }
        }
    }

    #[inline]
    pub fn depth_bias(&self) -> f32 {
        match self {
            Drawable::DepthBiased { bias, .. } => *bias,
            _ => DEFAULT_DEPTH_BIAS,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpriteInstance {
    /// World x, z.
    pub position: [f32; 2],
    pub layer: Layer,
    pub drawable: Drawable,
    /// Width over height.
    pub aspect_ratio: f32,
    /// Height relative to a wall at the same distance.
    pub scale: f32,
    /// Top edge as a fraction of the screen height.
    pub base_y: f32,
}

impl SpriteInstance {
    pub fn new(position: [f32; 2], drawable: Drawable) -> Self {
        Self {
            position,
            layer: Layer::Midground,
            drawable,
            aspect_ratio: 1.0,
            scale: 0.5,
            base_y: 0.5,
        }
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: f32) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_base_y(mut self, base_y: f32) -> Self {
        self.base_y = base_y;
        self
    }
}

/// Screen-space camera offset used for strafing and bobbing parallax.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Shear {
    pub x: f32,
    pub y: f32,
}

/// One contiguous run of visible ray columns and the slice of the sprite
/// it shows.
#[derive(Clone, Debug, PartialEq)]
pub struct SpriteSpan {
    pub columns: Range<usize>,
    pub x_start: f32,
    pub x_end: f32,
    pub u_start: f32,
    pub u_end: f32,
}

impl SpriteSpan {
    #[inline]
    pub fn width(&self) -> f32 {
        self.x_end - self.x_start
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProjectedSprite {
    pub center_x: f32,
    pub top_y: f32,
    /// Full, unclipped size.
    pub width: f32,
    pub height: f32,
    pub distance: f32,
    /// Ray columns the full rectangle spans, `start..=end` as in
    /// `floor(left / cw)..=ceil(right / cw)`; may run off screen.
    pub first_column: i64,
    pub last_column: i64,
    /// Largest visible run.
    pub visible: SpriteSpan,
    /// Every visible run, left to right.
    pub segments: Vec<SpriteSpan>,
}

#[derive(Clone, Debug)]
pub struct SpriteProjector {
    projection: Projection,
    shear: Shear,
}

impl SpriteProjector {
    pub fn new(projection: Projection) -> Self {
        Self {
            projection,
            shear: Shear::default(),
        }
    }

    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
    }

    pub fn set_shear(&mut self, shear: Shear) {
        self.shear = shear;
    }

    #[inline]
    pub fn shear(&self) -> Shear {
        self.shear
    }

    /// Screen rectangle of `sprite`, clipped to the columns where no
    /// nearer wall hides it. `None` when it is behind the eye, off screen,
    /// or hidden in every column it spans.
    pub fn project(&self, sprite: &SpriteInstance, pose: &Pose, frame: &Frame) -> Option<ProjectedSprite> {
        let p = &self.projection;
        let dx = sprite.position[0] - pose.x;
        let dz = sprite.position[1] - pose.z;
        let distance = (dx * dx + dz * dz).sqrt();
        let relative = normalize_angle(dz.atan2(dx) - pose.angle);
        let corrected = distance * relative.cos();
        if !(corrected >= MIN_SPRITE_DISTANCE) {
            return None;
        }

        let height = (p.screen_h / corrected) * p.tile_size * sprite.scale;
        let width = height * sprite.aspect_ratio;
        if !(width > 0.0) || !width.is_finite() {
            return None;
        }
        let center_x = p.project_angle(relative) - self.shear.x;
        let left = center_x - width / 2.0;
        let right = center_x + width / 2.0;
        if right < 0.0 || left > p.screen_w {
            return None;
        }

        let cw = p.column_width();
        let first = (left / cw).floor() as i64;
        let last = (right / cw).ceil() as i64;
        let bias = sprite.drawable.depth_bias();

        let lo = first.max(0);
        let hi = last.min(p.ray_count as i64 - 1);
        let mut segments = Vec::new();
        let mut run: Option<i64> = None;
        for col in lo..=hi {
            let visible = match frame.column(col as usize).and_then(|c| c.occluding_distance()) {
                None => true,
                Some(wall) => corrected < wall + bias,
            };
            match (visible, run) {
                (true, None) => run = Some(col),
                (false, Some(start)) => {
                    segments.push(span(start, col - 1, cw, left, right));
                    run = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run {
            segments.push(span(start, hi, cw, left, right));
        }

        let visible = segments
            .iter()
            .fold(None::<&SpriteSpan>, |best, s| match best {
                Some(b) if b.columns.len() >= s.columns.len() => Some(b),
                _ => Some(s),
            })?
            .clone();

        Some(ProjectedSprite {
            center_x,
            top_y: p.screen_h * sprite.base_y - self.shear.y,
            width,
            height,
            distance: corrected,
            first_column: first,
            last_column: last,
            visible,
            segments,
        })
    }
}

/// Intersects the sprite rectangle `[left, right)` with the pixels of ray
/// columns `start..=end`; u follows the clipped edges.
fn span(start: i64, end: i64, cw: f32, left: f32, right: f32) -> SpriteSpan {
    let width = right - left;
    let col_left = start as f32 * cw;
    let col_right = (end + 1) as f32 * cw;
    let (x_start, u_start) = if col_left <= left {
        (left, 0.0)
    } else {
        (col_left, (col_left - left) / width)
    };
    let (x_end, u_end) = if col_right >= right {
        (right, 1.0)
    } else {
        (col_right, (col_right - left) / width)
    };
    SpriteSpan {
        columns: start as usize..end as usize + 1,
        x_start,
        x_end,
        u_start,
        u_end,
    }
}

/// Paints every visible run of a projected sprite. Texels under the
/// alpha cutoff are skipped.
pub fn draw_projected(fb: &mut Framebuffer, sprite: &ProjectedSprite, texture: &Texture) {
    if sprite.height <= 0.0 {
        return;
    }
    let y0 = sprite.top_y.round().max(0.0) as usize;
    let y1 = ((sprite.top_y + sprite.height).round().max(0.0) as usize).min(fb.height);

    for seg in &sprite.segments {
        let x0 = seg.x_start.ceil().max(0.0) as usize;
        // a ray owns pixels [floor(i·cw), floor((i+1)·cw))
        let x1 = (seg.x_end.floor().max(0.0) as usize).min(fb.width);
        if x0 >= x1 || seg.width() <= 0.0 {
            continue;
        }
        for y in y0..y1 {
            let v = (y as f32 + 0.5 - sprite.top_y) / sprite.height;
            let row = texture.row_of(v.clamp(0.0, 1.0));
            for x in x0..x1 {
                let t = (x as f32 + 0.5 - seg.x_start) / seg.width();
                let u = seg.u_start + t.clamp(0.0, 1.0) * (seg.u_end - seg.u_start);
                let texel = texture.texel(texture.column_of(u.clamp(0.0, 1.0)), row);
                if alpha_of(texel) < ALPHA_CUTOFF {
                    continue;
                }
                fb.set_pixel(x, y, texel);
            }
        }
    }
}

/// Indices of `sprites` in paint order: background as given, midground
/// far to near, foreground as given.
pub fn paint_order(sprites: &[SpriteInstance], pose: &Pose) -> Vec<usize> {
    let dist2 = |s: &SpriteInstance| {
        let dx = s.position[0] - pose.x;
        let dz = s.position[1] - pose.z;
        dx * dx + dz * dz
    };
    let of = |layer: Layer| sprites.iter().enumerate().filter(move |(_, s)| s.layer == layer).map(|(i, _)| i);

    let mut mid: Vec<usize> = of(Layer::Midground).collect();
    mid.sort_by(|&a, &b| dist2(&sprites[b]).partial_cmp(&dist2(&sprites[a])).unwrap_or(Ordering::Equal));

    of(Layer::Background).chain(mid).chain(of(Layer::Foreground)).collect()
}

/// Projects and paints a sprite list; returns how many were drawn.
pub fn draw_sprites(
    fb: &mut Framebuffer,
    projector: &SpriteProjector,
    sprites: &[SpriteInstance],
    pose: &Pose,
    frame: &Frame,
    textures: &TextureStore,
    time: f32,
) -> usize {
    let mut drawn = 0;
    for i in paint_order(sprites, pose) {
        let sprite = &sprites[i];
        let Some(texture) = sprite.drawable.texture_at(time) else {
            continue;
        };
        if let Some(projected) = projector.project(sprite, pose, frame) {
            draw_projected(fb, &projected, textures.get(texture));
            drawn += 1;
        }
    }
    drawn
}
