use std::sync::Arc;

use crate::camera::Projection;
use crate::caster::RayColumn;

/// Monotonic tag for one coordinated render pass.
pub type FrameId = u64;

/// One completed fan of ray columns.
///
/// Cloning is cheap: the columns live behind an `Arc` so the last good
/// frame can be handed out repeatedly without copying.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub id: FrameId,
    columns: Arc<[RayColumn]>,
}

impl Frame {
    pub fn new(id: FrameId, columns: Vec<RayColumn>) -> Self {
        Self {
            id,
            columns: columns.into(),
        }
    }

    /// Placeholder used before any pass has completed.
    pub fn empty(ray_count: usize) -> Self {
        Self::new(0, vec![RayColumn::miss(); ray_count])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[inline]
    pub fn columns(&self) -> &[RayColumn] {
        &self.columns
    }

    #[inline]
    pub fn column(&self, i: usize) -> Option<&RayColumn> {
        self.columns.get(i)
    }

    /// True when every column missed.
    pub fn is_blank(&self) -> bool {
        self.columns.iter().all(RayColumn::is_miss)
    }
}

/// Per-pixel-column wall silhouette for one frame.
///
/// `floor[x]` is the first row of floor below the wall, `ceiling[x]` the
/// first row of wall below the ceiling. Columns whose ray found no opaque
/// wall collapse onto the horizon, so floor and ceiling cover the whole
/// column.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipLines {
    pub floor: Vec<f32>,
    pub ceiling: Vec<f32>,
}

impl ClipLines {
    pub fn open(width: usize, height: usize) -> Self {
        let horizon = height as f32 / 2.0;
        Self {
            floor: vec![horizon; width],
            ceiling: vec![horizon; width],
        }
    }

    pub fn from_frame(frame: &Frame, projection: &Projection) -> Self {
        let w = projection.screen_w as usize;
        let h = projection.screen_h;
        let mut clip = Self::open(w, h as usize);

        for (i, column) in frame.columns().iter().enumerate().take(projection.ray_count) {
            let Some(distance) = column.occluding_distance() else {
                continue;
            };
            let (top, bottom) = projection.wall_rows(distance, h * 2.0);
            let top = (top as f32).clamp(0.0, h);
            let bottom = (bottom as f32).clamp(0.0, h);
            let (start, end) = projection.column_span(i);
            clip.floor[start..end].fill(bottom);
            clip.ceiling[start..end].fill(top);
        }
        clip
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caster::{HitSide, RayHit};
    use crate::config::RenderConfig;
    use crate::world::TextureId;

    fn hit(distance: f32) -> RayHit {
        RayHit {
            column: 0,
            distance,
            raw_distance: distance,
            hit: [0.0, 0.0],
            side: HitSide::Vertical,
            wall_texture: TextureId(1),
            floor_texture: None,
        }
    }

    #[test]
    fn clip_lines_follow_wall_silhouette() {
        let config = RenderConfig {
            screen_width: 8,
            screen_height: 100,
            ray_count: 4,
            tile_size: 50.0,
            ..RenderConfig::default()
        };
        let p = Projection::new(&config);
        let mut columns = vec![RayColumn::miss(); 4];
        // wall height (100 / 100) * 50 = 50 -> rows 25..75
        columns[1].solid = Some(hit(100.0));
        let clip = ClipLines::from_frame(&Frame::new(1, columns), &p);

        assert_eq!(clip.floor, vec![50.0, 50.0, 75.0, 75.0, 50.0, 50.0, 50.0, 50.0]);
        assert_eq!(clip.ceiling, vec![50.0, 50.0, 25.0, 25.0, 50.0, 50.0, 50.0, 50.0]);
    }

    #[test]
    fn very_near_walls_are_clamped() {
        let config = RenderConfig {
            screen_width: 2,
            screen_height: 100,
            ray_count: 1,
            ..RenderConfig::default()
        };
        let p = Projection::new(&config);
        let mut columns = vec![RayColumn::miss()];
        columns[0].solid = Some(hit(0.01));
        let clip = ClipLines::from_frame(&Frame::new(1, columns), &p);
        assert_eq!(clip.floor, vec![100.0, 100.0]);
        assert_eq!(clip.ceiling, vec![0.0, 0.0]);
    }

    #[test]
    fn blank_detection() {
        assert!(Frame::empty(3).is_blank());
        let mut columns = vec![RayColumn::miss(); 3];
        columns[2].solid = Some(hit(10.0));
        assert!(!Frame::new(5, columns).is_blank());
    }
}
