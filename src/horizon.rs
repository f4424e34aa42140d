//! Floor and ceiling sampling on a row-partitioned worker pool.
//!
//! The main thread derives the clip lines from the finished frame and
//! hands every horizon worker its own copy together with a band of screen
//! rows. Each worker returns the pixels of its band; the bands are copied
//! into one full-screen image at their row offsets. Pixels between the
//! clip lines stay `EMPTY` for the wall pass to cover.

use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::camera::Projection;
use crate::config::RenderConfig;
use crate::error::{ConfigError, WorkerError};
use crate::frame::{ClipLines, Frame};
use crate::texture::{TextureStore, pack_rgb};
use crate::workers::{PendingTable, Recv, WorkerPool, WorkerTask, split_even};
use crate::world::{Grid, Pose};

/// Pixel left for the wall pass.
pub const EMPTY: u32 = 0;

/// Flat fill used until the first horizon image lands.
pub const FALLBACK_SKY: u32 = pack_rgb(30, 30, 70);
pub const FALLBACK_GROUND: u32 = pack_rgb(40, 40, 40);

/// Static state a horizon worker samples from.
#[derive(Clone, Debug)]
pub struct HorizonState {
    pub grid: Arc<Grid>,
    pub textures: Arc<TextureStore>,
    pub projection: Projection,
}

#[derive(Clone, Debug)]
pub struct HorizonJob {
    pub pass: u64,
    pub rows: Range<usize>,
    pub pose: Pose,
    pub clip: ClipLines,
}

#[derive(Clone, Debug)]
pub struct HorizonRows {
    pub rows: Range<usize>,
    pub pixels: Vec<u32>,
}

/// Samples floor and ceiling texels for `rows` of the screen.
///
/// For a row `y` off the horizon the floor (or ceiling) plane is met at
/// `(T / 2) / ((y - H / 2) / planeDist)` along the view axis; dividing by
/// the cosine of the column's ray offset gives the distance along that ray.
/// Samples therefore land on a flat plane rather than at `rowDistance`
/// straight along each ray, which would bow the floor at the screen edges.
pub fn sample_rows(state: &HorizonState, pose: &Pose, clip: &ClipLines, rows: Range<usize>) -> Vec<u32> {
    let p = &state.projection;
    let w = p.screen_w as usize;
    let half_h = p.screen_center_y();
    let tile = p.tile_size;

    let dirs: Vec<(f32, f32, f32)> = p
        .pixel_rays()
        .into_iter()
        .map(|i| {
            let offset = p.ray_offset(i);
            let (sin, cos) = (pose.angle + offset).sin_cos();
            (cos, sin, 1.0 / offset.cos())
        })
        .collect();

    let mut out = vec![EMPTY; rows.len() * w];
    for (r, y) in rows.enumerate() {
        let yf = y as f32;
        let ceiling = yf < half_h;
        let offset = if ceiling { half_h - yf } else { yf - half_h };
        if offset <= 0.0 {
            continue;
        }
        let row_distance = (tile / 2.0) / (offset / p.plane_dist);
        let line = &mut out[r * w..(r + 1) * w];

        for (x, px) in line.iter_mut().enumerate() {
            let visible = if ceiling {
                yf < clip.ceiling[x]
            } else {
                yf >= clip.floor[x]
            };
            if !visible {
                continue;
            }
            let (cos, sin, stretch) = dirs[x];
            let d = row_distance * stretch;
            let wx = pose.x + d * cos;
            let wz = pose.z + d * sin;
            let u = wx.rem_euclid(tile) / tile;
            let v = wz.rem_euclid(tile) / tile;
            let texture = match state.grid.tile_at(wx, wz) {
                Some(t) if ceiling => state.textures.get(t.ceiling_texture),
                Some(t) => state.textures.get(t.floor_texture),
                None => state.textures.fallback(),
            };
            *px = texture.sample(u, v);
        }
    }
    out
}

struct HorizonTask;

impl WorkerTask for HorizonTask {
    type State = HorizonState;
    type Job = HorizonJob;
    type Output = HorizonRows;

    fn tag(job: &HorizonJob) -> u64 {
        job.pass
    }

    fn run(&self, _worker: usize, state: &HorizonState, job: HorizonJob) -> Result<HorizonRows, WorkerError> {
        let w = state.projection.screen_w as usize;
        if job.clip.floor.len() != w || job.clip.ceiling.len() != w {
            return Err(WorkerError::LengthMismatch {
                expected: w,
                found: job.clip.floor.len().min(job.clip.ceiling.len()),
            });
        }
        if job.rows.end > state.projection.screen_h as usize {
            return Err(WorkerError::Task(format!(
                "rows {:?} outside a {}-row screen",
                job.rows, state.projection.screen_h
            )));
        }
        let pixels = sample_rows(state, &job.pose, &job.clip, job.rows.clone());
        Ok(HorizonRows { rows: job.rows, pixels })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HorizonOutcome {
    Fresh,
    TimedOut,
    WorkerFailed,
}

/// Owns the horizon pool and the last complete horizon image.
pub struct HorizonCompositor {
    config: RenderConfig,
    projection: Projection,
    grid: Arc<Grid>,
    textures: Arc<TextureStore>,
    pool: WorkerPool<HorizonTask>,
    pending: PendingTable<Range<usize>>,
    next_pass: u64,
    image: Vec<u32>,
    scratch: Vec<u32>,
    has_image: bool,
    last_outcome: Option<HorizonOutcome>,
}

impl HorizonCompositor {
    pub fn new(config: RenderConfig, grid: Arc<Grid>, textures: Arc<TextureStore>) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = WorkerPool::spawn("horizon", config.horizon_workers, Arc::new(HorizonTask))?;
        let mut horizon = Self {
            projection: Projection::new(&config).with_tile_size(grid.tile_size()),
            config,
            grid,
            textures,
            pool,
            pending: PendingTable::new(),
            next_pass: 0,
            image: Vec::new(),
            scratch: Vec::new(),
            has_image: false,
            last_outcome: None,
        };
        horizon.reset_image();
        horizon.sync();
        Ok(horizon)
    }

    fn reset_image(&mut self) {
        let w = self.config.screen_width;
        let h = self.config.screen_height;
        self.image = flat_horizon(w, h);
        self.scratch = vec![EMPTY; w * h];
        self.has_image = false;
    }

    /// Ships grid, textures and projection to every worker. Commands are
    /// processed in order, so the next pass already samples the new state.
    fn sync(&mut self) {
        self.pending.clear();
        let state = HorizonState {
            grid: Arc::clone(&self.grid),
            textures: Arc::clone(&self.textures),
            projection: self.projection,
        };
        let generation = self.pool.broadcast(Arc::new(state));
        debug!(generation, textures = self.textures.len(), "horizon state synced");
    }

    /// Samples the horizon for `frame` seen from `pose`. On timeout or
    /// worker failure the previous image is kept.
    pub fn render(&mut self, frame: &Frame, pose: &Pose) -> HorizonOutcome {
        self.pool.drain();
        self.pending.clear();
        self.next_pass += 1;
        let pass = self.next_pass;
        let clip = ClipLines::from_frame(frame, &self.projection);

        for (worker, rows) in split_even(self.config.screen_height, self.pool.len()).into_iter().enumerate() {
            let job = HorizonJob {
                pass,
                rows: rows.clone(),
                pose: *pose,
                clip: clip.clone(),
            };
            if let Err(err) = self.pool.send(worker, job) {
                error!(%err, pass, "could not dispatch horizon rows");
                return self.finish(HorizonOutcome::WorkerFailed);
            }
            self.pending.insert(pass, worker, rows);
        }

        let outcome = match self.collect(pass) {
            Ok(()) => {
                std::mem::swap(&mut self.image, &mut self.scratch);
                self.has_image = true;
                HorizonOutcome::Fresh
            }
            Err(outcome) => outcome,
        };
        self.finish(outcome)
    }

    fn collect(&mut self, pass: u64) -> Result<(), HorizonOutcome> {
        let deadline = Instant::now() + self.config.horizon_deadline();
        let generation = self.pool.generation();
        let w = self.config.screen_width;

        while self.pending.outstanding(pass) > 0 {
            match self.pool.recv_until(deadline) {
                Recv::Done {
                    worker,
                    generation: g,
                    tag,
                    result,
                } => {
                    if g != generation {
                        trace!(worker, generation = g, "horizon rows from an older generation dropped");
                        continue;
                    }
                    let Some(rows) = self.pending.resolve(tag, worker) else {
                        trace!(worker, tag, pass, "stale horizon rows dropped");
                        continue;
                    };
                    let band = match result {
                        Ok(band) => band,
                        Err(err) => {
                            warn!(%err, pass, "horizon worker failed");
                            return Err(HorizonOutcome::WorkerFailed);
                        }
                    };
                    if band.rows != rows || band.pixels.len() != rows.len() * w {
                        warn!(worker, pass, "horizon band does not fit its rows");
                        return Err(HorizonOutcome::WorkerFailed);
                    }
                    self.scratch[rows.start * w..rows.end * w].copy_from_slice(&band.pixels);
                }
                Recv::TimedOut => {
                    debug!(pass, outstanding = self.pending.outstanding(pass), "horizon deadline elapsed");
                    return Err(HorizonOutcome::TimedOut);
                }
                Recv::Disconnected => {
                    error!(pass, "horizon workers disconnected");
                    return Err(HorizonOutcome::WorkerFailed);
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self, outcome: HorizonOutcome) -> HorizonOutcome {
        self.last_outcome = Some(outcome);
        outcome
    }

    /// Last complete horizon image, or the flat fallback if none exists.
    #[inline]
    pub fn image(&self) -> &[u32] {
        &self.image
    }

    #[inline]
    pub fn has_image(&self) -> bool {
        self.has_image
    }

    #[inline]
    pub fn last_outcome(&self) -> Option<HorizonOutcome> {
        self.last_outcome
    }

    pub fn set_textures(&mut self, textures: Arc<TextureStore>) {
        self.textures = textures;
        self.sync();
    }

    pub fn set_grid(&mut self, grid: Arc<Grid>) {
        self.projection = Projection::new(&self.config).with_tile_size(grid.tile_size());
        self.grid = grid;
        self.sync();
    }

    pub fn reconfigure(&mut self, config: RenderConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if config.horizon_workers != self.pool.len() {
            self.pool = WorkerPool::spawn("horizon", config.horizon_workers, Arc::new(HorizonTask))?;
        }
        let resized = config.screen_width != self.config.screen_width
            || config.screen_height != self.config.screen_height;
        self.projection = Projection::new(&config).with_tile_size(self.grid.tile_size());
        self.config = config;
        if resized {
            self.reset_image();
        }
        self.sync();
        Ok(())
    }

    pub fn wait_until_ready(&mut self, timeout: Duration) -> bool {
        self.pool.wait_synced(timeout)
    }
}

/// Two-tone fill for callers that have no compositor yet.
pub fn flat_horizon(width: usize, height: usize) -> Vec<u32> {
    let mut image = vec![FALLBACK_SKY; width * height];
    image[(height / 2) * width..].fill(FALLBACK_GROUND);
    image
}
