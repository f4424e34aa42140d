//! Digital-differential-analyzer ray traversal over the tile grid.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;

use crate::camera::Projection;
use crate::config::RenderConfig;
use crate::world::{Grid, Pose, TextureId, TileKind};

/// Translucent hits kept per ray; further translucent tiles are skipped.
pub const MAX_TRANSLUCENT_LAYERS: usize = 4;

/// Which grid line the ray crossed to enter the hit cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HitSide {
    /// Crossed a line of constant x; texture u comes from the hit z.
    Vertical,
    /// Crossed a line of constant z; texture u comes from the hit x.
    Horizontal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RayHit {
    pub column: usize,
    /// Distance projected onto the view axis (fisheye removed).
    pub distance: f32,
    /// Radial distance from the eye to the hit point.
    pub raw_distance: f32,
    pub hit: [f32; 2],
    pub side: HitSide,
    pub wall_texture: TextureId,
    /// Floor of the last empty cell the ray crossed before the hit.
    pub floor_texture: Option<TextureId>,
}

impl RayHit {
    /// Horizontal texture coordinate in [0, 1).
    #[inline]
    pub fn texture_u(&self, tile_size: f32) -> f32 {
        let along = match self.side {
            HitSide::Vertical => self.hit[1],
            HitSide::Horizontal => self.hit[0],
        };
        (along.rem_euclid(tile_size) / tile_size).clamp(0.0, 1.0 - f32::EPSILON)
    }
}

/// Everything one ray column resolved to.
///
/// A plain miss has neither field set. Translucent hits are ordered
/// nearest first and are all nearer than `solid`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RayColumn {
    pub solid: Option<RayHit>,
    pub translucent: Vec<RayHit>,
}

impl RayColumn {
    pub fn miss() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_miss(&self) -> bool {
        self.solid.is_none() && self.translucent.is_empty()
    }

    /// Distance of the nearest surface that hides what is behind it.
    #[inline]
    pub fn occluding_distance(&self) -> Option<f32> {
        self.solid.as_ref().map(|h| h.distance)
    }

    /// Nearest surface of any kind.
    pub fn nearest(&self) -> Option<&RayHit> {
        self.translucent.first().or(self.solid.as_ref())
    }
}

/// Static state a ray worker needs: synced once per config generation.
#[derive(Clone, Debug)]
pub struct CastState {
    pub grid: Arc<Grid>,
    pub projection: Projection,
    pub max_depth: usize,
    pub translucent: Arc<HashSet<TextureId>>,
}

impl CastState {
    pub fn new(config: &RenderConfig, grid: Arc<Grid>, translucent: Arc<HashSet<TextureId>>) -> Self {
        Self {
            projection: Projection::new(config).with_tile_size(grid.tile_size()),
            grid,
            max_depth: config.max_depth,
            translucent,
        }
    }
}

/// One grid-line crossing.
#[derive(Copy, Clone, Debug)]
struct Crossing {
    cell: [i64; 2],
    distance: f32,
    side: HitSide,
}

/// Steps a ray from grid line to grid line, always along the axis with
/// the smaller pending distance.
struct Dda {
    cell: [i64; 2],
    step: [i64; 2],
    next: [f32; 2],
    delta: [f32; 2],
    steps_left: usize,
    max_distance: f32,
}

impl Dda {
    fn new(origin: [f32; 2], dir: [f32; 2], tile: f32, max_steps: usize, max_distance: f32) -> Self {
        let cell = [
            (origin[0] / tile).floor() as i64,
            (origin[1] / tile).floor() as i64,
        ];
        let mut step = [0i64; 2];
        let mut next = [f32::INFINITY; 2];
        let mut delta = [f32::INFINITY; 2];
        for axis in 0..2 {
            let d = dir[axis];
            if d != 0.0 {
                step[axis] = if d > 0.0 { 1 } else { -1 };
                let boundary = if d > 0.0 { cell[axis] + 1 } else { cell[axis] } as f32 * tile;
                next[axis] = (boundary - origin[axis]) / d;
                delta[axis] = (tile / d).abs();
            }
        }
        Self {
            cell,
            step,
            next,
            delta,
            steps_left: max_steps,
            max_distance,
        }
    }
}

impl Iterator for Dda {
    type Item = Crossing;

    fn next(&mut self) -> Option<Crossing> {
        if self.steps_left == 0 {
            return None;
        }
        self.steps_left -= 1;

        let (axis, side) = if self.next[0] < self.next[1] {
            (0, HitSide::Vertical)
        } else {
            (1, HitSide::Horizontal)
        };
        let distance = self.next[axis];
        if !distance.is_finite() || distance > self.max_distance {
            self.steps_left = 0;
            return None;
        }
        self.cell[axis] += self.step[axis];
        self.next[axis] += self.delta[axis];
        Some(Crossing {
            cell: self.cell,
            distance,
            side,
        })
    }
}

/// Casts one ray at an absolute angle and resolves its column.
pub fn cast_ray(state: &CastState, pose: &Pose, angle: f32, column: usize) -> RayColumn {
    let grid = &*state.grid;
    let tile = grid.tile_size();
    let (sin, cos) = angle.sin_cos();
    let origin = [pose.x, pose.z];
    let fisheye = (angle - pose.angle).cos();

    let mut floor_texture = grid
        .tile_at(pose.x, pose.z)
        .filter(|t| !t.is_wall())
        .map(|t| t.floor_texture);
    let mut out = RayColumn::miss();

    let dda = Dda::new(
        origin,
        [cos, sin],
        tile,
        state.max_depth * 2,
        state.max_depth as f32 * tile,
    );
    for crossing in dda {
        // Leaving the grid means the ray escaped; it is not a wall.
        let Some(tile_ref) = grid.tile(crossing.cell[0], crossing.cell[1]) else {
            break;
        };
        match tile_ref.kind {
            TileKind::Empty => floor_texture = Some(tile_ref.floor_texture),
            TileKind::Wall => {
                let hit = make_hit(&crossing, origin, [cos, sin], tile, fisheye, column, tile_ref.wall_texture, floor_texture);
                if state.translucent.contains(&tile_ref.wall_texture) {
                    if out.translucent.len() < MAX_TRANSLUCENT_LAYERS {
                        out.translucent.push(hit);
                    }
                    continue;
                }
                out.solid = Some(hit);
                break;
            }
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn make_hit(
    crossing: &Crossing,
    origin: [f32; 2],
    dir: [f32; 2],
    tile: f32,
    fisheye: f32,
    column: usize,
    wall_texture: TextureId,
    floor_texture: Option<TextureId>,
) -> RayHit {
    let raw = crossing.distance;
    let mut hit = [origin[0] + raw * dir[0], origin[1] + raw * dir[1]];
    // Snap onto the crossed grid line so u does not jitter.
    let axis = match crossing.side {
        HitSide::Vertical => 0,
        HitSide::Horizontal => 1,
    };
    let line = if dir[axis] > 0.0 {
        crossing.cell[axis]
    } else {
        crossing.cell[axis] + 1
    };
    hit[axis] = line as f32 * tile;

    RayHit {
        column,
        distance: raw * fisheye,
        raw_distance: raw,
        hit,
        side: crossing.side,
        wall_texture,
        floor_texture,
    }
}

/// Ray column `i` of the fan around `pose.angle`.
#[inline]
pub fn cast_column(state: &CastState, pose: &Pose, i: usize) -> RayColumn {
    let angle = state.projection.ray_angle(pose.angle, i);
    cast_ray(state, pose, angle, i)
}

/// Every column in `[start, end)`, in order.
pub fn cast_range(state: &CastState, pose: &Pose, range: Range<usize>) -> Vec<RayColumn> {
    range.map(|i| cast_column(state, pose, i)).collect()
}

/// True when no opaque wall lies strictly between `from` and `to`.
///
/// Uses the same traversal as the view rays; translucent tiles in
/// `see_through` do not block. Leaving the grid counts as blocked.
pub fn line_of_sight(grid: &Grid, see_through: &HashSet<TextureId>, from: [f32; 2], to: [f32; 2]) -> bool {
    let tile = grid.tile_size();
    let dx = to[0] - from[0];
    let dz = to[1] - from[1];
    let dist = (dx * dx + dz * dz).sqrt();
    if dist <= f32::EPSILON {
        return grid.contains(from[0], from[1]);
    }
    let dir = [dx / dist, dz / dist];
    let max_steps = ((dist / tile).ceil() as usize + 1) * 2;
    for crossing in Dda::new(from, dir, tile, max_steps, dist) {
        if crossing.distance >= dist {
            break;
        }
        match grid.tile(crossing.cell[0], crossing.cell[1]) {
            None => return false,
            Some(t) if t.is_wall() && !see_through.contains(&t.wall_texture) => return false,
            Some(_) => {}
        }
    }
    true
}
