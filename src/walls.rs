//! Textured wall strips from a finished frame.

use std::ops::Range;

use crate::camera::Projection;
use crate::caster::{HitSide, RayHit};
use crate::framebuffer::Framebuffer;
use crate::frame::Frame;
use crate::texture::{TextureStore, blend, shade};
use crate::world::TextureId;

/// Brightness of walls whose face runs along x.
pub const SIDE_SHADE: f32 = 0.8;

/// A run of pixel columns painted from one texel column.
///
/// A single ray column is a batch of one; `plan` merges neighbours
/// whose pixels would be identical anyway.
#[derive(Clone, Debug, PartialEq)]
pub struct WallBatch {
    pub columns: Range<usize>,
    pub x: Range<usize>,
    /// Unclamped screen rows `[top, bottom)`.
    pub top: i32,
    pub bottom: i32,
    pub texture: TextureId,
    pub texel: usize,
    pub shade: f32,
    pub alpha: f32,
}

impl WallBatch {
    #[inline]
    fn is_opaque(&self) -> bool {
        self.alpha >= 1.0
    }

    fn can_merge(&self, next: &WallBatch) -> bool {
        self.is_opaque()
            && next.is_opaque()
            && self.columns.end == next.columns.start
            && self.x.end == next.x.start
            && self.texture == next.texture
            && self.top == next.top
            && self.bottom == next.bottom
            && self.texel == next.texel
            && self.shade == next.shade
    }
}

/// Draw list for one frame: opaque runs first, then translucent strips
/// ordered far to near within each column.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WallPlan {
    pub opaque: Vec<WallBatch>,
    pub translucent: Vec<WallBatch>,
}

impl WallPlan {
    pub fn draw_calls(&self) -> usize {
        self.opaque.len() + self.translucent.len()
    }
}

/// Alpha of each translucent layer, nearest first: every layer takes half
/// of the light the layers in front of it left over.
pub fn layer_alphas(layers: usize) -> Vec<f32> {
    let mut accumulated = 0.0f32;
    let mut out = Vec::with_capacity(layers);
    for _ in 0..layers {
        if accumulated >= 1.0 {
            break;
        }
        let alpha = 0.5 * (1.0 - accumulated);
        out.push(alpha);
        accumulated += alpha;
    }
    out
}

#[derive(Clone, Debug)]
pub struct WallCompositor {
    projection: Projection,
    batching: bool,
}

impl WallCompositor {
    pub fn new(projection: Projection) -> Self {
        Self {
            projection,
            batching: true,
        }
    }

    pub fn set_projection(&mut self, projection: Projection) {
        self.projection = projection;
    }

    pub fn set_batching(&mut self, batching: bool) {
        self.batching = batching;
    }

    fn strip(&self, hit: &RayHit, x: Range<usize>, alpha: f32, textures: &TextureStore) -> WallBatch {
        let p = &self.projection;
        let (top, bottom) = p.wall_rows(hit.distance, f32::INFINITY);
        let texture = textures.get(hit.wall_texture);
        WallBatch {
            columns: hit.column..hit.column + 1,
            x,
            top,
            bottom,
            texture: hit.wall_texture,
            texel: texture.column_of(hit.texture_u(p.tile_size)),
            shade: match hit.side {
                HitSide::Vertical => 1.0,
                HitSide::Horizontal => SIDE_SHADE,
            },
            alpha,
        }
    }

    /// Turns every column of `frame` into strips and merges runs.
    pub fn plan(&self, frame: &Frame, textures: &TextureStore) -> WallPlan {
        let mut plan = WallPlan::default();

        for (i, column) in frame.columns().iter().enumerate().take(self.projection.ray_count) {
            let (start, end) = self.projection.column_span(i);
            if start == end {
                continue;
            }
            if let Some(solid) = &column.solid {
                let strip = self.strip(solid, start..end, 1.0, textures);
                match plan.opaque.last_mut() {
                    Some(last) if self.batching && last.can_merge(&strip) => {
                        last.columns.end = strip.columns.end;
                        last.x.end = strip.x.end;
                    }
                    _ => plan.opaque.push(strip),
                }
            }
            let alphas = layer_alphas(column.translucent.len());
            for (hit, alpha) in column.translucent.iter().zip(alphas).rev() {
                plan.translucent.push(self.strip(hit, start..end, alpha, textures));
            }
        }
        plan
    }

    pub fn draw(&self, plan: &WallPlan, fb: &mut Framebuffer, textures: &TextureStore) {
        for batch in plan.opaque.iter().chain(&plan.translucent) {
            draw_batch(batch, fb, textures);
        }
    }

    pub fn render(&self, frame: &Frame, fb: &mut Framebuffer, textures: &TextureStore) -> WallPlan {
        let plan = self.plan(frame, textures);
        self.draw(&plan, fb, textures);
        plan
    }
}

fn draw_batch(batch: &WallBatch, fb: &mut Framebuffer, textures: &TextureStore) {
    let span = batch.bottom as i64 - batch.top as i64;
    if span <= 0 || batch.x.is_empty() {
        return;
    }
    let texture = textures.get(batch.texture);
    let y0 = (batch.top.max(0) as usize).min(fb.height);
    let y1 = (batch.bottom.max(0) as usize).min(fb.height);
    let x_end = batch.x.end.min(fb.width);
    let x_start = batch.x.start.min(x_end);

    for y in y0..y1 {
        let v = ((y as i64 - batch.top as i64) as f32 + 0.5) / span as f32;
        let color = shade(texture.texel(batch.texel, texture.row_of(v)), batch.shade);
        let row = &mut fb.row_mut(y)[x_start..x_end];
        if batch.is_opaque() {
            row.fill(color);
        } else {
            for px in row {
                *px = blend(*px, color, batch.alpha);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::caster::{CastState, cast_range};
    use crate::config::RenderConfig;
    use crate::texture::{Texture, pack_rgb};
    use crate::world::{Grid, Pose, Tile};

    const STONE: TextureId = TextureId(1);
    const GLASS: TextureId = TextureId(9);

    fn config() -> RenderConfig {
        RenderConfig {
            screen_width: 160,
            screen_height: 100,
            ray_count: 80,
            ..RenderConfig::default()
        }
    }

    fn textures() -> TextureStore {
        TextureStore::default()
            .with(STONE, Texture::bricks(16, pack_rgb(150, 60, 40), pack_rgb(200, 200, 200)))
            .with(GLASS, Texture::solid(pack_rgb(40, 160, 220)).into_translucent())
    }

    fn frame(pose: Pose) -> Frame {
        let mut grid = Grid::bordered(10, 10, 50.0, STONE, TextureId(2), TextureId(3)).unwrap();
        grid.set_tile(6, 4, Tile::wall(STONE));
        grid.set_tile(7, 6, Tile::wall(GLASS));
        let translucent: HashSet<_> = [GLASS].into_iter().collect();
        let state = CastState::new(&config(), Arc::new(grid), Arc::new(translucent));
        Frame::new(1, cast_range(&state, &pose, 0..80))
    }

    fn draw(frame: &Frame, batching: bool) -> (Framebuffer, WallPlan) {
        let mut walls = WallCompositor::new(Projection::new(&config()));
        walls.set_batching(batching);
        let mut fb = Framebuffer::new(160, 100);
        let plan = walls.render(frame, &mut fb, &textures());
        (fb, plan)
    }

    #[test]
    fn batching_does_not_change_pixels() {
        for pose in [
            Pose::new(250.0, 250.0, 0.0),
            Pose::new(120.0, 300.0, 0.4),
            Pose::new(260.0, 310.0, -0.2),
        ] {
            let f = frame(pose);
            let (batched, plan_b) = draw(&f, true);
            let (plain, plan_p) = draw(&f, false);
            assert_eq!(batched.pixels, plain.pixels);
            assert!(plan_b.draw_calls() <= plan_p.draw_calls());
        }
    }

    #[test]
    fn flat_wall_merges_into_few_batches() {
        let mut columns = frame(Pose::new(250.0, 250.0, 0.0)).columns().to_vec();
        // same distance and u everywhere: one run
        for (i, c) in columns.iter_mut().enumerate() {
            c.translucent.clear();
            let mut hit = c.solid.clone().unwrap();
            hit.column = i;
            hit.distance = 100.0;
            hit.side = HitSide::Vertical;
            hit.hit = [450.0, 210.0];
            hit.wall_texture = STONE;
            c.solid = Some(hit);
        }
        let (_, plan) = draw(&Frame::new(2, columns), true);
        assert_eq!(plan.opaque.len(), 1);
        assert_eq!(plan.opaque[0].x, 0..160);
        assert_eq!(plan.opaque[0].columns, 0..80);
    }

    #[test]
    fn translucent_alphas_halve_front_to_back() {
        assert_eq!(layer_alphas(3), vec![0.5, 0.25, 0.125]);
        assert!(layer_alphas(0).is_empty());
    }

    #[test]
    fn strips_are_centered_on_the_horizon() {
        let f = frame(Pose::new(250.0, 250.0, 0.0));
        let walls = WallCompositor::new(Projection::new(&config()));
        let plan = walls.plan(&f, &textures());
        // ray 40 looks straight at the east wall 200 units away:
        // height (100 / 200) * 50 = 25 -> rows 38..63
        let strip = plan.opaque.iter().find(|b| b.columns.contains(&40)).unwrap();
        assert_eq!(strip.top + strip.bottom, 100 + 1);
        assert_eq!(strip.bottom - strip.top, 25);
    }

    #[test]
    fn translucent_layer_tints_what_is_behind() {
        let mut columns = vec![crate::caster::RayColumn::miss(); 80];
        let base = RayHit {
            column: 10,
            distance: 100.0,
            raw_distance: 100.0,
            hit: [450.0, 210.0],
            side: HitSide::Vertical,
            wall_texture: STONE,
            floor_texture: None,
        };
        columns[10].solid = Some(base.clone());
        columns[10].translucent = vec![RayHit {
            distance: 60.0,
            wall_texture: GLASS,
            ..base
        }];
        let (fb, plan) = draw(&Frame::new(3, columns), true);
        assert_eq!(plan.translucent.len(), 1);
        let px = fb.get_pixel(20, 50);
        let glass = pack_rgb(40, 160, 220);
        assert_ne!(px, glass);
        assert_ne!(px, fb.background);
    }
}
