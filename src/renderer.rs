//! One frame end to end: rays, horizon, walls, sprites.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::camera::Projection;
use crate::caster::line_of_sight;
use crate::config::RenderConfig;
use crate::coordinator::{FrameCoordinator, FrameOutcome};
use crate::error::ConfigError;
use crate::frame::Frame;
use crate::framebuffer::Framebuffer;
use crate::horizon::{HorizonCompositor, HorizonOutcome};
use crate::sprites::{ProjectedSprite, Shear, SpriteInstance, SpriteProjector, draw_sprites};
use crate::texture::TextureStore;
use crate::walls::WallCompositor;
use crate::world::{Grid, Pose};

/// What happened during one `render` call.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RenderStats {
    pub frame_id: u64,
    pub frame: FrameOutcome,
    /// `None` when the horizon was not resampled this call.
    pub horizon: Option<HorizonOutcome>,
    pub wall_draws: usize,
    pub sprites_drawn: usize,
}

pub struct Renderer {
    config: RenderConfig,
    grid: Arc<Grid>,
    textures: Arc<TextureStore>,
    coordinator: FrameCoordinator,
    horizon: HorizonCompositor,
    walls: WallCompositor,
    projector: SpriteProjector,
    fb: Framebuffer,
    frame: Frame,
    // pose the current frame was cast from
    frame_pose: Option<Pose>,
}

impl Renderer {
    pub fn new(config: RenderConfig, grid: Arc<Grid>, textures: Arc<TextureStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        check_tile_size(&config, &grid);
        let translucent = Arc::new(textures.translucent_ids());
        let coordinator = FrameCoordinator::new(config.clone(), Arc::clone(&grid), translucent)?;
        let horizon = HorizonCompositor::new(config.clone(), Arc::clone(&grid), Arc::clone(&textures))?;
        let projection = Projection::new(&config).with_tile_size(grid.tile_size());
        info!(
            width = config.screen_width,
            height = config.screen_height,
            rays = config.ray_count,
            raycast_workers = config.raycast_workers,
            horizon_workers = config.horizon_workers,
            "renderer ready"
        );
        Ok(Self {
            fb: Framebuffer::new(config.screen_width, config.screen_height),
            frame: coordinator.last_good().clone(),
            walls: WallCompositor::new(projection),
            projector: SpriteProjector::new(projection),
            frame_pose: None,
            config,
            grid,
            textures,
            coordinator,
            horizon,
        })
    }

    /// Renders the view from `pose` into the framebuffer.
    ///
    /// When the ray pass does not complete in time, the previous frame is
    /// redrawn as it was, horizon and sprites included, so the picture
    /// never mixes two poses.
    pub fn render(&mut self, pose: &Pose, sprites: &[SpriteInstance], time: f32) -> RenderStats {
        let frame = self.coordinator.render_frame(pose);
        let outcome = self.coordinator.last_outcome();

        let horizon = if outcome == FrameOutcome::Fresh {
            self.frame_pose = Some(*pose);
            Some(self.horizon.render(&frame, pose))
        } else {
            None
        };
        self.frame = frame;

        self.fb.copy_from(self.horizon.image());
        let plan = self.walls.render(&self.frame, &mut self.fb, &self.textures);
        let sprites_drawn = match &self.frame_pose {
            Some(view) => draw_sprites(
                &mut self.fb,
                &self.projector,
                sprites,
                view,
                &self.frame,
                &self.textures,
                time,
            ),
            None => 0,
        };

        RenderStats {
            frame_id: self.frame.id,
            frame: outcome,
            horizon,
            wall_draws: plan.draw_calls(),
            sprites_drawn,
        }
    }

    #[inline]
    pub fn framebuffer(&self) -> &Framebuffer {
        &self.fb
    }

    /// Ray buffer behind the last rendered image.
    #[inline]
    pub fn current_frame(&self) -> &Frame {
        &self.frame
    }

    /// Projects `sprite` against the current frame, as drawn.
    pub fn project(&self, sprite: &SpriteInstance) -> Option<ProjectedSprite> {
        let pose = self.frame_pose.as_ref()?;
        self.projector.project(sprite, pose, &self.frame)
    }

    /// Whether an opaque wall blocks the segment between two world points.
    pub fn line_of_sight(&self, from: [f32; 2], to: [f32; 2]) -> bool {
        line_of_sight(&self.grid, self.coordinator.translucent(), from, to)
    }

    pub fn set_shear(&mut self, shear: Shear) {
        self.projector.set_shear(shear);
    }

    /// Swaps the map. Frames fall back until the raycast workers resync.
    pub fn set_grid(&mut self, grid: Arc<Grid>) {
        check_tile_size(&self.config, &grid);
        let projection = Projection::new(&self.config).with_tile_size(grid.tile_size());
        self.walls.set_projection(projection);
        self.projector.set_projection(projection);
        self.coordinator.set_grid(Arc::clone(&grid));
        self.horizon.set_grid(Arc::clone(&grid));
        self.grid = grid;
        debug!(width = self.grid.width(), height = self.grid.height(), "grid swapped");
    }

    pub fn set_textures(&mut self, textures: Arc<TextureStore>) {
        let translucent = textures.translucent_ids();
        if &translucent != self.coordinator.translucent().as_ref() {
            self.coordinator.set_translucent(Arc::new(translucent));
        }
        self.horizon.set_textures(Arc::clone(&textures));
        self.textures = textures;
        debug!(textures = self.textures.len(), "textures swapped");
    }

    /// Applies new settings to both pools and every compositor.
    pub fn reconfigure(&mut self, config: RenderConfig) -> Result<(), ConfigError> {
        config.validate()?;
        check_tile_size(&config, &self.grid);
        self.coordinator.reconfigure(config.clone())?;
        self.horizon.reconfigure(config.clone())?;
        let projection = Projection::new(&config).with_tile_size(self.grid.tile_size());
        self.walls.set_projection(projection);
        self.projector.set_projection(projection);
        if config.screen_width != self.fb.width || config.screen_height != self.fb.height {
            self.fb.resize(config.screen_width, config.screen_height);
        }
        if config.ray_count != self.frame.len() {
            self.frame = self.coordinator.last_good().clone();
            self.frame_pose = None;
        }
        info!(
            width = config.screen_width,
            height = config.screen_height,
            rays = config.ray_count,
            "renderer reconfigured"
        );
        self.config = config;
        Ok(())
    }

    /// Blocks until the raycast workers acknowledged the current state.
    pub fn wait_until_ready(&mut self, timeout: Duration) -> bool {
        self.coordinator.wait_until_ready(timeout) && self.horizon.wait_until_ready(timeout)
    }

    #[inline]
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    #[inline]
    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }
}

fn check_tile_size(config: &RenderConfig, grid: &Grid) {
    if (config.tile_size - grid.tile_size()).abs() > f32::EPSILON {
        warn!(
            config = config.tile_size,
            grid = grid.tile_size(),
            "configured tile size differs from the grid's, using the grid's"
        );
    }
}
