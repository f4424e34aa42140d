//! Splits each ray fan across the raycast pool and races the replies
//! against the frame deadline.

use std::collections::HashSet;
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, trace, warn};

use crate::caster::{CastState, RayColumn, cast_range};
use crate::config::RenderConfig;
use crate::error::{ConfigError, WorkerError};
use crate::frame::{Frame, FrameId};
use crate::workers::{PendingTable, Recv, WorkerPool, WorkerTask, split_even};
use crate::world::{Grid, Pose, TextureId};

/// One worker's share of a frame.
#[derive(Clone, Debug)]
pub struct RayJob {
    pub frame_id: FrameId,
    pub range: Range<usize>,
    pub pose: Pose,
}

#[derive(Clone, Debug)]
pub struct RaySegment {
    pub start: usize,
    pub columns: Vec<RayColumn>,
}

/// Resolves the columns of one job against the synced cast state.
pub trait SegmentCaster: Send + Sync + 'static {
    fn cast(&self, state: &CastState, job: &RayJob) -> Result<Vec<RayColumn>, WorkerError>;
}

/// The DDA traversal.
#[derive(Copy, Clone, Debug, Default)]
pub struct DdaCaster;

impl SegmentCaster for DdaCaster {
    fn cast(&self, state: &CastState, job: &RayJob) -> Result<Vec<RayColumn>, WorkerError> {
        Ok(cast_range(state, &job.pose, job.range.clone()))
    }
}

struct RayTask<C> {
    caster: C,
}

impl<C: SegmentCaster> WorkerTask for RayTask<C> {
    type State = CastState;
    type Job = RayJob;
    type Output = RaySegment;

    fn tag(job: &RayJob) -> u64 {
        job.frame_id
    }

    fn run(&self, _worker: usize, state: &CastState, job: RayJob) -> Result<RaySegment, WorkerError> {
        let columns = self.caster.cast(state, &job)?;
        Ok(RaySegment {
            start: job.range.start,
            columns,
        })
    }
}

/// How the most recent `render_frame` call was resolved.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Every segment arrived in time; the frame is new.
    Fresh,
    /// Workers have not acknowledged the current configuration.
    NotReady,
    /// Pose lay outside the grid; nothing was dispatched.
    InvalidPose,
    TimedOut,
    WorkerFailed,
}

/// Owns the raycast pool and the last good frame.
///
/// `render_frame` takes `&mut self`, so two passes can never overlap on
/// one coordinator.
pub struct FrameCoordinator<C: SegmentCaster = DdaCaster> {
    config: RenderConfig,
    grid: Arc<Grid>,
    translucent: Arc<HashSet<TextureId>>,
    task: Arc<RayTask<C>>,
    pool: WorkerPool<RayTask<C>>,
    pending: PendingTable<Range<usize>>,
    next_id: FrameId,
    last_good: Frame,
    last_outcome: FrameOutcome,
}

impl FrameCoordinator<DdaCaster> {
    pub fn new(
        config: RenderConfig,
        grid: Arc<Grid>,
        translucent: Arc<HashSet<TextureId>>,
    ) -> Result<Self, ConfigError> {
        Self::with_caster(config, grid, translucent, DdaCaster)
    }
}

impl<C: SegmentCaster> FrameCoordinator<C> {
    pub fn with_caster(
        config: RenderConfig,
        grid: Arc<Grid>,
        translucent: Arc<HashSet<TextureId>>,
        caster: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let task = Arc::new(RayTask { caster });
        let pool = WorkerPool::spawn("raycast", config.raycast_workers, Arc::clone(&task))?;
        let mut coordinator = Self {
            last_good: Frame::empty(config.ray_count),
            config,
            grid,
            translucent,
            task,
            pool,
            pending: PendingTable::new(),
            next_id: 0,
            last_outcome: FrameOutcome::NotReady,
        };
        coordinator.sync();
        Ok(coordinator)
    }

    /// Casts the fan for `pose`, or hands back the last good frame.
    pub fn render_frame(&mut self, pose: &Pose) -> Frame {
        self.pool.drain();
        if !self.pool.is_synced() {
            trace!(generation = self.pool.generation(), "raycast workers still syncing");
            return self.fall_back(FrameOutcome::NotReady);
        }
        if !pose.angle.is_finite() || !self.grid.contains(pose.x, pose.z) {
            let clamped = self.grid.clamp_pose(pose);
            warn!(
                x = pose.x,
                z = pose.z,
                clamped_x = clamped.x,
                clamped_z = clamped.z,
                "pose outside grid, frame skipped"
            );
            return self.fall_back(FrameOutcome::InvalidPose);
        }

        let superseded = self.pending.clear();
        if superseded > 0 {
            trace!(superseded, "abandoning segments of an earlier frame");
        }
        self.next_id += 1;
        let frame_id = self.next_id;

        for (worker, range) in split_even(self.config.ray_count, self.pool.len()).into_iter().enumerate() {
            let job = RayJob {
                frame_id,
                range: range.clone(),
                pose: *pose,
            };
            if let Err(err) = self.pool.send(worker, job) {
                error!(%err, frame_id, "could not dispatch ray segment");
                return self.fall_back(FrameOutcome::WorkerFailed);
            }
            self.pending.insert(frame_id, worker, range);
        }

        match self.collect(frame_id) {
            Ok(columns) => {
                self.last_good = Frame::new(frame_id, columns);
                self.last_outcome = FrameOutcome::Fresh;
                self.last_good.clone()
            }
            Err(outcome) => self.fall_back(outcome),
        }
    }

    fn collect(&mut self, frame_id: FrameId) -> Result<Vec<RayColumn>, FrameOutcome> {
        let deadline = Instant::now() + self.config.frame_deadline();
        let generation = self.pool.generation();
        let mut columns = vec![RayColumn::miss(); self.config.ray_count];

        while self.pending.outstanding(frame_id) > 0 {
            match self.pool.recv_until(deadline) {
                Recv::Done {
                    worker,
                    generation: g,
                    tag,
                    result,
                } => {
                    if g != generation {
                        trace!(worker, generation = g, "segment from an older generation dropped");
                        continue;
                    }
                    let Some(range) = self.pending.resolve(tag, worker) else {
                        trace!(worker, tag, frame_id, "stale segment dropped");
                        continue;
                    };
                    let segment = match result {
                        Ok(segment) => segment,
                        Err(err) => {
                            warn!(%err, frame_id, "ray worker failed");
                            return Err(FrameOutcome::WorkerFailed);
                        }
                    };
                    if segment.start != range.start || segment.columns.len() != range.len() {
                        let err = WorkerError::LengthMismatch {
                            expected: range.len(),
                            found: segment.columns.len(),
                        };
                        warn!(%err, worker, frame_id, "segment does not fit its range");
                        return Err(FrameOutcome::WorkerFailed);
                    }
                    for (slot, column) in columns[range].iter_mut().zip(segment.columns) {
                        *slot = column;
                    }
                }
                Recv::TimedOut => {
                    debug!(
                        frame_id,
                        outstanding = self.pending.outstanding(frame_id),
                        "frame deadline elapsed"
                    );
                    return Err(FrameOutcome::TimedOut);
                }
                Recv::Disconnected => {
                    error!(frame_id, "raycast workers disconnected");
                    return Err(FrameOutcome::WorkerFailed);
                }
            }
        }
        Ok(columns)
    }

    fn fall_back(&mut self, outcome: FrameOutcome) -> Frame {
        self.last_outcome = outcome;
        self.last_good.clone()
    }

    /// Ships the current grid and config to every worker.
    fn sync(&mut self) {
        self.pending.clear();
        let state = CastState::new(&self.config, Arc::clone(&self.grid), Arc::clone(&self.translucent));
        let generation = self.pool.broadcast(Arc::new(state));
        debug!(generation, rays = self.config.ray_count, "raycast state synced");
    }

    /// Applies new settings. The pool is rebuilt when its size changes,
    /// otherwise it is re-synced; either way frames fall back until every
    /// worker has acknowledged.
    pub fn reconfigure(&mut self, config: RenderConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if config.raycast_workers != self.pool.len() {
            self.pool = WorkerPool::spawn("raycast", config.raycast_workers, Arc::clone(&self.task))?;
        }
        if config.ray_count != self.last_good.len() {
            self.last_good = Frame::empty(config.ray_count);
        }
        self.config = config;
        self.sync();
        Ok(())
    }

    /// Swaps the grid between frames.
    pub fn set_grid(&mut self, grid: Arc<Grid>) {
        self.grid = grid;
        self.sync();
    }

    pub fn set_translucent(&mut self, translucent: Arc<HashSet<TextureId>>) {
        self.translucent = translucent;
        self.sync();
    }

    /// Blocks until the pool has acknowledged the current configuration.
    pub fn wait_until_ready(&mut self, timeout: Duration) -> bool {
        self.pool.wait_synced(timeout)
    }

    #[inline]
    pub fn last_good(&self) -> &Frame {
        &self.last_good
    }

    #[inline]
    pub fn last_outcome(&self) -> FrameOutcome {
        self.last_outcome
    }

    /// Id of the most recently dispatched frame, 0 if none was issued.
    #[inline]
    pub fn last_issued_id(&self) -> FrameId {
        self.next_id
    }

    #[inline]
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    #[inline]
    pub fn grid(&self) -> &Arc<Grid> {
        &self.grid
    }

    #[inline]
    pub fn translucent(&self) -> &Arc<HashSet<TextureId>> {
        &self.translucent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> Arc<Grid> {
        Arc::new(Grid::bordered(10, 10, 50.0, TextureId(1), TextureId(2), TextureId(3)).unwrap())
    }

    fn config(workers: usize, rays: usize) -> RenderConfig {
        RenderConfig {
            ray_count: rays,
            raycast_workers: workers,
            frame_deadline_ms: 2_000,
            ..RenderConfig::default()
        }
    }

    fn ready(config: RenderConfig) -> FrameCoordinator {
        let mut c = FrameCoordinator::new(config, room(), Arc::new(HashSet::new())).unwrap();
        assert!(c.wait_until_ready(Duration::from_secs(5)));
        c
    }

    #[test]
    fn frames_keep_configured_length() {
        for workers in 1..=5 {
            for rays in [1, 3, 7, 300] {
                let mut c = ready(config(workers, rays));
                let frame = c.render_frame(&Pose::new(250.0, 250.0, 0.3));
                assert_eq!(c.last_outcome(), FrameOutcome::Fresh, "{workers} workers, {rays} rays");
                assert_eq!(frame.len(), rays);
                assert!(frame.columns().iter().all(|col| col.solid.is_some()));
            }
        }
    }

    #[test]
    fn frame_ids_increase() {
        let mut c = ready(config(2, 16));
        let a = c.render_frame(&Pose::new(250.0, 250.0, 0.0));
        let b = c.render_frame(&Pose::new(250.0, 250.0, 0.1));
        assert!(b.id > a.id);
        assert_eq!(c.last_issued_id(), b.id);
    }

    #[test]
    fn pose_outside_grid_returns_last_good() {
        let mut c = ready(config(2, 16));
        let good = c.render_frame(&Pose::new(250.0, 250.0, 0.0));
        let issued = c.last_issued_id();
        let again = c.render_frame(&Pose::new(-10.0, 9_000.0, 0.0));
        assert_eq!(c.last_outcome(), FrameOutcome::InvalidPose);
        assert_eq!(again, good);
        assert_eq!(c.last_issued_id(), issued);
    }

    #[test]
    fn unsynced_pool_falls_back() {
        let mut c = ready(config(2, 16));
        let good = c.render_frame(&Pose::new(250.0, 250.0, 0.0));
        c.set_grid(room());
        // the acks may or may not have landed yet
        let early = c.render_frame(&Pose::new(250.0, 250.0, 0.0));
        match c.last_outcome() {
            FrameOutcome::NotReady => assert_eq!(early, good),
            FrameOutcome::Fresh => assert!(early.id > good.id),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(c.wait_until_ready(Duration::from_secs(5)));
        c.render_frame(&Pose::new(250.0, 250.0, 0.0));
        assert_eq!(c.last_outcome(), FrameOutcome::Fresh);
    }

    #[test]
    fn ray_count_change_resets_fallback_length() {
        let mut c = ready(config(2, 16));
        c.render_frame(&Pose::new(250.0, 250.0, 0.0));
        c.reconfigure(config(3, 40)).unwrap();
        assert_eq!(c.last_good().len(), 40);
        assert!(c.wait_until_ready(Duration::from_secs(5)));
        assert_eq!(c.render_frame(&Pose::new(250.0, 250.0, 0.0)).len(), 40);
    }

    #[test]
    fn invalid_reconfigure_is_rejected() {
        let mut c = ready(config(2, 16));
        let bad = RenderConfig {
            ray_count: 0,
            ..config(2, 16)
        };
        assert!(matches!(c.reconfigure(bad), Err(ConfigError::ZeroRays)));
        assert_eq!(c.config().ray_count, 16);
    }
}
