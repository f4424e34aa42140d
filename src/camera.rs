use std::f32::consts::{PI, TAU};

use crate::config::RenderConfig;

const MIN_WALL_DISTANCE: f32 = 1e-3;

/// Screen-space projection derived from the render config.
///
/// Every worker rebuilds one of these from its synced config, so ray
/// angles and column spans agree between the casters and compositors.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Projection {
    pub screen_w: f32,
    pub screen_h: f32,
    pub fov: f32,
    pub ray_count: usize,
    pub tile_size: f32,
    pub plane_dist: f32, // horizontal focal factor
}

impl Projection {
    pub fn new(config: &RenderConfig) -> Self {
        let mut p = Self {
            screen_w: config.screen_width as f32,
            screen_h: config.screen_height as f32,
            fov: 0.0,
            ray_count: config.ray_count,
            tile_size: config.tile_size,
            plane_dist: 0.0,
        };
        p.set_fov_from_horizontal(config.fov());
        p
    }

    /// Same projection measured in another world unit.
    pub fn with_tile_size(mut self, tile_size: f32) -> Self {
        self.tile_size = tile_size;
        self
    }

    pub fn set_fov_from_horizontal(&mut self, fov: f32) {
        self.fov = fov;
        self.plane_dist = 0.5 * self.screen_w / (0.5 * fov).tan();
    }

    /// View-relative offset of ray `i`: -FOV/2 + (i / rayCount)·FOV.
    #[inline]
    pub fn ray_offset(&self, i: usize) -> f32 {
        -self.fov / 2.0 + (i as f32 / self.ray_count as f32) * self.fov
    }

    #[inline]
    pub fn ray_angle(&self, view_angle: f32, i: usize) -> f32 {
        view_angle + self.ray_offset(i)
    }

    /// Screen pixels covered by one ray column (may be fractional).
    #[inline]
    pub fn column_width(&self) -> f32 {
        self.screen_w / self.ray_count as f32
    }

    /// Pixel columns `[start, end)` that ray `i` paints.
    #[inline]
    pub fn column_span(&self, i: usize) -> (usize, usize) {
        let cw = self.column_width();
        let w = self.screen_w as usize;
        let start = ((i as f32 * cw).floor() as usize).min(w);
        let end = if i + 1 >= self.ray_count {
            w
        } else {
            (((i + 1) as f32 * cw).floor() as usize).min(w)
        };
        (start, end.max(start))
    }

    #[inline]
    pub fn screen_center_y(&self) -> f32 {
        0.5 * self.screen_h
    }

    /// Wall strip height for a corrected distance: (H / d)·tileSize.
    #[inline]
    pub fn wall_height(&self, corrected: f32) -> f32 {
        (self.screen_h / corrected) * self.tile_size
    }

    /// Screen rows `[top, bottom)` of a wall strip, rounded to whole
    /// pixels and not clamped to the screen. Height is capped at `max_height`.
    pub fn wall_rows(&self, corrected: f32, max_height: f32) -> (i32, i32) {
        let height = self.wall_height(corrected.max(MIN_WALL_DISTANCE)).min(max_height);
        let center = self.screen_center_y();
        let top = (center - height / 2.0).round();
        let bottom = (center + height / 2.0).round();
        (
            top.clamp(i32::MIN as f32, i32::MAX as f32) as i32,
            bottom.clamp(i32::MIN as f32, i32::MAX as f32) as i32,
        )
    }

    /// Ray painted at each pixel column.
    pub fn pixel_rays(&self) -> Vec<usize> {
        let mut rays = vec![0; self.screen_w as usize];
        for i in 0..self.ray_count {
            let (start, end) = self.column_span(i);
            rays[start..end].fill(i);
        }
        rays
    }

    /// Screen x of a view-relative angle, before any shear.
    #[inline]
    pub fn project_angle(&self, relative: f32) -> f32 {
        (self.screen_w / 2.0) * (1.0 + relative / (self.fov / 2.0))
    }
}

/// Wraps an angle into (-π, π].
#[inline]
pub fn normalize_angle(a: f32) -> f32 {
    let mut a = a % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}
