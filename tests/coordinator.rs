/// Races between the frame deadline and slow or failing ray workers.
///
/// The casters below stamp every column with the id of the frame that
/// produced it, so a merged frame shows exactly which replies it took.
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tile_raycaster::caster::{CastState, HitSide, RayColumn, RayHit};
use tile_raycaster::coordinator::RayJob;
use tile_raycaster::{FrameCoordinator, FrameOutcome, Grid, Pose, RenderConfig, SegmentCaster, TextureId, WorkerError};

const DEADLINE_MS: u64 = 200;

fn room() -> Arc<Grid> {
    Arc::new(Grid::bordered(10, 10, 50.0, TextureId(1), TextureId(2), TextureId(3)).unwrap())
}

fn config(workers: usize, rays: usize) -> RenderConfig {
    RenderConfig {
        ray_count: rays,
        raycast_workers: workers,
        frame_deadline_ms: DEADLINE_MS,
        ..RenderConfig::default()
    }
}

fn stamped(job: &RayJob) -> Vec<RayColumn> {
    job.range
        .clone()
        .map(|column| RayColumn {
            solid: Some(RayHit {
                column,
                distance: job.frame_id as f32,
                raw_distance: job.frame_id as f32,
                hit: [0.0, 0.0],
                side: HitSide::Vertical,
                wall_texture: TextureId(1),
                floor_texture: None,
            }),
            translucent: Vec::new(),
        })
        .collect()
}

/// Sleeps past the deadline on one frame id, in the worker that owns column 0.
struct SlowOn {
    frame_id: u64,
    delay: Duration,
}

impl SegmentCaster for SlowOn {
    fn cast(&self, _state: &CastState, job: &RayJob) -> Result<Vec<RayColumn>, WorkerError> {
        if job.frame_id == self.frame_id && job.range.start == 0 {
            thread::sleep(self.delay);
        }
        Ok(stamped(job))
    }
}

/// Fails or panics on chosen frame ids.
struct Faulty {
    fail_on: u64,
    panic_on: u64,
}

impl SegmentCaster for Faulty {
    fn cast(&self, _state: &CastState, job: &RayJob) -> Result<Vec<RayColumn>, WorkerError> {
        if job.frame_id == self.panic_on {
            panic!("caster blew up on frame {}", job.frame_id);
        }
        if job.frame_id == self.fail_on {
            return Err(WorkerError::Task("bad segment".into()));
        }
        Ok(stamped(job))
    }
}

fn ready<C: SegmentCaster>(config: RenderConfig, caster: C) -> FrameCoordinator<C> {
    let mut c = FrameCoordinator::with_caster(config, room(), Arc::new(HashSet::new()), caster).unwrap();
    assert!(c.wait_until_ready(Duration::from_secs(5)), "workers never synced");
    c
}

fn stamps(frame: &tile_raycaster::Frame) -> Vec<f32> {
    frame
        .columns()
        .iter()
        .map(|c| c.solid.as_ref().map_or(-1.0, |h| h.distance))
        .collect()
}

const POSE: Pose = Pose {
    x: 250.0,
    z: 250.0,
    angle: 0.0,
};

/// A frame that misses its deadline hands back the previous frame unchanged.
#[test]
fn late_frame_falls_back_to_last_good() {
    let mut c = ready(
        config(2, 40),
        SlowOn {
            frame_id: 2,
            delay: Duration::from_millis(DEADLINE_MS * 3),
        },
    );
    let first = c.render_frame(&POSE);
    assert_eq!(c.last_outcome(), FrameOutcome::Fresh);
    assert_eq!(first.id, 1);

    let second = c.render_frame(&POSE);
    assert_eq!(c.last_outcome(), FrameOutcome::TimedOut);
    assert_eq!(second, first);
    assert!(stamps(&second).iter().all(|&d| d == 1.0));
}

/// Late replies from a superseded frame never leak into the next one.
#[test]
fn stale_replies_are_discarded() {
    let mut c = ready(
        config(3, 60),
        SlowOn {
            frame_id: 1,
            delay: Duration::from_millis(DEADLINE_MS * 2),
        },
    );
    c.render_frame(&POSE);
    assert_eq!(c.last_outcome(), FrameOutcome::TimedOut);

    // let the slow worker finish and post its now stale segment
    thread::sleep(Duration::from_millis(DEADLINE_MS * 3));

    let next = c.render_frame(&POSE);
    assert_eq!(c.last_outcome(), FrameOutcome::Fresh);
    assert_eq!(next.id, 2);
    assert_eq!(next.len(), 60);
    assert!(stamps(&next).iter().all(|&d| d == 2.0), "frame 2 holds foreign columns");
}

/// A superseded segment that turns up while the next frame is still
/// collecting is dropped, and the next frame completes without it.
#[test]
fn stale_reply_during_collect_is_ignored() {
    let deadline = DEADLINE_MS * 2;
    let mut c = ready(
        RenderConfig {
            frame_deadline_ms: deadline,
            ..config(3, 60)
        },
        SlowOn {
            frame_id: 1,
            delay: Duration::from_millis(deadline * 3 / 2),
        },
    );
    c.render_frame(&POSE);
    assert_eq!(c.last_outcome(), FrameOutcome::TimedOut);

    // no pause: frame 1's late segment lands halfway through this collect
    let next = c.render_frame(&POSE);
    assert_eq!(c.last_outcome(), FrameOutcome::Fresh);
    assert_eq!(next.id, 2);
    assert_eq!(next.len(), 60);
    assert!(stamps(&next).iter().all(|&d| d == 2.0), "frame 2 holds foreign columns");
}

/// Before any frame completed the fallback is an all-miss buffer of the
/// configured width, never a short or missing one.
#[test]
fn first_frame_timeout_is_blank_but_full_width() {
    let mut c = ready(
        config(2, 32),
        SlowOn {
            frame_id: 1,
            delay: Duration::from_millis(DEADLINE_MS * 2),
        },
    );
    let frame = c.render_frame(&POSE);
    assert_eq!(c.last_outcome(), FrameOutcome::TimedOut);
    assert_eq!(frame.len(), 32);
    assert!(frame.is_blank());
}

/// A worker error or panic costs one frame, not the pool.
#[test]
fn worker_failures_are_contained() {
    let mut c = ready(
        config(2, 20),
        Faulty {
            fail_on: 2,
            panic_on: 3,
        },
    );
    let good = c.render_frame(&POSE);
    assert_eq!(c.last_outcome(), FrameOutcome::Fresh);

    assert_eq!(c.render_frame(&POSE), good);
    assert_eq!(c.last_outcome(), FrameOutcome::WorkerFailed);

    assert_eq!(c.render_frame(&POSE), good);
    assert_eq!(c.last_outcome(), FrameOutcome::WorkerFailed);

    let after = c.render_frame(&POSE);
    assert_eq!(c.last_outcome(), FrameOutcome::Fresh);
    assert_eq!(after.id, 4);
    assert!(stamps(&after).iter().all(|&d| d == 4.0));
}

/// Columns land at their own offsets whatever the pool size.
#[test]
fn merge_preserves_column_order() {
    for workers in [1, 2, 3, 4, 7] {
        let mut c = ready(
            config(workers, 50),
            SlowOn {
                frame_id: 0,
                delay: Duration::ZERO,
            },
        );
        let frame = c.render_frame(&POSE);
        assert_eq!(c.last_outcome(), FrameOutcome::Fresh, "{workers} workers");
        for (i, column) in frame.columns().iter().enumerate() {
            assert_eq!(column.solid.as_ref().unwrap().column, i);
        }
    }
}
