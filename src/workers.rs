//! Message-passing worker pool shared by the raycast and horizon stages.
//!
//! Each worker is a dedicated thread that owns the last static state it
//! was synced with and nothing else. Jobs and results move by value over
//! channels, so there is no shared mutable memory; the coordinators make
//! stale results inert with tags instead of locks.

use std::collections::HashMap;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::error::{ConfigError, WorkerError};

/// Config generation a worker was last synced under.
pub type Generation = u64;

/// The pure function a worker applies to each job.
pub trait WorkerTask: Send + Sync + 'static {
    type State: Send + Sync + 'static;
    type Job: Send + 'static;
    type Output: Send + 'static;

    /// Pass tag carried by a job, echoed back with its result.
    fn tag(job: &Self::Job) -> u64;

    fn run(&self, worker: usize, state: &Self::State, job: Self::Job) -> Result<Self::Output, WorkerError>;
}

enum Command<T: WorkerTask> {
    Sync {
        generation: Generation,
        state: Arc<T::State>,
    },
    Run(T::Job),
    Shutdown,
}

enum Reply<O> {
    Synced {
        worker: usize,
        generation: Generation,
    },
    Done {
        worker: usize,
        generation: Generation,
        tag: u64,
        result: Result<O, WorkerError>,
    },
}

/// Outcome of waiting on the pool's reply channel.
#[derive(Debug)]
pub enum Recv<O> {
    Done {
        worker: usize,
        generation: Generation,
        tag: u64,
        result: Result<O, WorkerError>,
    },
    TimedOut,
    Disconnected,
}

pub struct WorkerPool<T: WorkerTask> {
    name: &'static str,
    senders: Vec<Sender<Command<T>>>,
    replies: Receiver<Reply<T::Output>>,
    handles: Vec<JoinHandle<()>>,
    synced: Vec<Option<Generation>>,
    generation: Generation,
}

impl<T: WorkerTask> WorkerPool<T> {
    pub fn spawn(name: &'static str, size: usize, task: Arc<T>) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::EmptyPool { pool: name });
        }
        let (reply_tx, replies) = mpsc::channel();
        let mut senders = Vec::with_capacity(size);
        let mut handles = Vec::with_capacity(size);

        for index in 0..size {
            let (tx, rx) = mpsc::channel();
            let task = Arc::clone(&task);
            let reply_tx = reply_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(index, task, rx, reply_tx))
                .map_err(ConfigError::WorkerSpawn)?;
            senders.push(tx);
            handles.push(handle);
        }
        debug!(pool = name, size, "worker pool started");

        Ok(Self {
            name,
            senders,
            replies,
            handles,
            synced: vec![None; size],
            generation: 0,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Ships fresh static state to every worker under a new generation.
    pub fn broadcast(&mut self, state: Arc<T::State>) -> Generation {
        self.generation += 1;
        let generation = self.generation;
        for (worker, tx) in self.senders.iter().enumerate() {
            let sent = tx.send(Command::Sync {
                generation,
                state: Arc::clone(&state),
            });
            if sent.is_err() {
                warn!(pool = self.name, worker, "worker gone, sync not delivered");
            }
        }
        trace!(pool = self.name, generation, "static state broadcast");
        generation
    }

    /// True once every worker acknowledged the current generation.
    pub fn is_synced(&self) -> bool {
        self.synced.iter().all(|g| *g == Some(self.generation))
    }

    pub fn send(&self, worker: usize, job: T::Job) -> Result<(), WorkerError> {
        self.senders
            .get(worker)
            .ok_or(WorkerError::Disconnected(worker))?
            .send(Command::Run(job))
            .map_err(|_| WorkerError::Disconnected(worker))
    }

    /// Waits for the next job result until `deadline`, absorbing sync acks.
    pub fn recv_until(&mut self, deadline: Instant) -> Recv<T::Output> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.replies.recv_timeout(remaining) {
                Ok(Reply::Synced { worker, generation }) => self.record_sync(worker, generation),
                Ok(Reply::Done {
                    worker,
                    generation,
                    tag,
                    result,
                }) => {
                    return Recv::Done {
                        worker,
                        generation,
                        tag,
                        result,
                    };
                }
                Err(RecvTimeoutError::Timeout) => return Recv::TimedOut,
                Err(RecvTimeoutError::Disconnected) => return Recv::Disconnected,
            }
        }
    }

    /// Empties the reply channel without blocking. Job results found here
    /// belong to passes that already gave up on them and are dropped.
    pub fn drain(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(reply) = self.replies.try_recv() {
            match reply {
                Reply::Synced { worker, generation } => self.record_sync(worker, generation),
                Reply::Done { worker, tag, .. } => {
                    trace!(pool = self.name, worker, tag, "late result dropped");
                    dropped += 1;
                }
            }
        }
        dropped
    }

    /// Blocks until every worker acknowledged the current generation.
    pub fn wait_synced(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_synced() {
            match self.recv_until(deadline) {
                Recv::Done { worker, .. } => {
                    trace!(pool = self.name, worker, "late result dropped while syncing");
                }
                Recv::TimedOut | Recv::Disconnected => return self.is_synced(),
            }
        }
        true
    }

    fn record_sync(&mut self, worker: usize, generation: Generation) {
        if let Some(slot) = self.synced.get_mut(worker) {
            *slot = Some(generation);
        }
        trace!(pool = self.name, worker, generation, "worker synced");
    }
}

impl<T: WorkerTask> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        for tx in &self.senders {
            let _ = tx.send(Command::Shutdown);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        debug!(pool = self.name, "worker pool stopped");
    }
}

fn worker_loop<T: WorkerTask>(
    index: usize,
    task: Arc<T>,
    commands: Receiver<Command<T>>,
    replies: Sender<Reply<T::Output>>,
) {
    let mut synced: Option<(Generation, Arc<T::State>)> = None;

    while let Ok(command) = commands.recv() {
        let reply = match command {
            Command::Sync { generation, state } => {
                synced = Some((generation, state));
                Reply::Synced {
                    worker: index,
                    generation,
                }
            }
            Command::Run(job) => {
                let tag = T::tag(&job);
                match &synced {
                    None => Reply::Done {
                        worker: index,
                        generation: 0,
                        tag,
                        result: Err(WorkerError::NotSynced(index)),
                    },
                    Some((generation, state)) => {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| task.run(index, state, job)))
                            .unwrap_or_else(|payload| {
                                Err(WorkerError::Panicked {
                                    worker: index,
                                    message: panic_message(payload.as_ref()),
                                })
                            });
                        Reply::Done {
                            worker: index,
                            generation: *generation,
                            tag,
                            result,
                        }
                    }
                }
            }
            Command::Shutdown => break,
        };
        if replies.send(reply).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Key of an outstanding request: the pass tag it belongs to and the
/// worker it went to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub tag: u64,
    pub worker: usize,
}

/// Outstanding requests of the current pass.
///
/// A result is merged only if its key resolves here; anything from an
/// older pass, or a duplicate, fails the lookup and is dropped.
#[derive(Debug)]
pub struct PendingTable<V> {
    entries: HashMap<PendingKey, V>,
}

impl<V> Default for PendingTable<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> PendingTable<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: u64, worker: usize, value: V) {
        self.entries.insert(PendingKey { tag, worker }, value);
    }

    pub fn resolve(&mut self, tag: u64, worker: usize) -> Option<V> {
        self.entries.remove(&PendingKey { tag, worker })
    }

    pub fn outstanding(&self, tag: u64) -> usize {
        self.entries.keys().filter(|k| k.tag == tag).count()
    }

    /// Drops every outstanding entry, returning how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Splits `[0, total)` into at most `parts` contiguous ranges of
/// `ceil(total / parts)` items; trailing empty ranges are omitted.
pub fn split_even(total: usize, parts: usize) -> Vec<Range<usize>> {
    if total == 0 || parts == 0 {
        return Vec::new();
    }
    let seg = total.div_ceil(parts);
    (0..parts)
        .map(|i| (i * seg).min(total)..((i + 1) * seg).min(total))
        .filter(|r| !r.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Doubler;

    impl WorkerTask for Doubler {
        type State = i64;
        type Job = i64;
        type Output = i64;

        fn tag(job: &i64) -> u64 {
            job.unsigned_abs()
        }

        fn run(&self, _worker: usize, state: &i64, job: i64) -> Result<i64, WorkerError> {
            if job < 0 {
                panic!("negative job");
            }
            Ok(job * 2 + state)
        }
    }

    fn pool(size: usize) -> WorkerPool<Doubler> {
        WorkerPool::spawn("test", size, Arc::new(Doubler)).unwrap()
    }

    fn next(pool: &mut WorkerPool<Doubler>) -> Recv<i64> {
        pool.recv_until(Instant::now() + Duration::from_secs(5))
    }

    #[test]
    fn unsynced_worker_reports_error() {
        let mut pool = pool(1);
        pool.send(0, 3).unwrap();
        match next(&mut pool) {
            Recv::Done { result, .. } => assert_eq!(result, Err(WorkerError::NotSynced(0))),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn synced_workers_tag_results_with_generation() {
        let mut pool = pool(2);
        let generation = pool.broadcast(Arc::new(100));
        assert!(pool.wait_synced(Duration::from_secs(5)));
        pool.send(1, 4).unwrap();
        match next(&mut pool) {
            Recv::Done {
                worker,
                generation: g,
                tag,
                result,
            } => {
                assert_eq!(worker, 1);
                assert_eq!(tag, 4);
                assert_eq!(g, generation);
                assert_eq!(result, Ok(108));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn resync_invalidates_acks() {
        let mut pool = pool(2);
        pool.broadcast(Arc::new(1));
        assert!(pool.wait_synced(Duration::from_secs(5)));
        pool.broadcast(Arc::new(2));
        assert_eq!(pool.generation(), 2);
        assert!(pool.wait_synced(Duration::from_secs(5)));
        assert!(pool.is_synced());
    }

    #[test]
    fn panics_become_error_replies() {
        let mut pool = pool(1);
        pool.broadcast(Arc::new(0));
        pool.send(0, -1).unwrap();
        match next(&mut pool) {
            Recv::Done { result, .. } => {
                assert!(matches!(result, Err(WorkerError::Panicked { worker: 0, .. })));
            }
            other => panic!("unexpected {other:?}"),
        }
        // the worker survives its panic
        pool.send(0, 1).unwrap();
        assert!(matches!(next(&mut pool), Recv::Done { result: Ok(2), .. }));
    }

    #[test]
    fn pending_lookup_rejects_other_tags() {
        let mut table = PendingTable::new();
        table.insert(7, 0, 0..10);
        table.insert(7, 1, 10..20);
        assert_eq!(table.resolve(6, 0), None);
        assert_eq!(table.resolve(7, 1), Some(10..20));
        assert_eq!(table.resolve(7, 1), None);
        assert_eq!(table.outstanding(7), 1);
        assert_eq!(table.clear(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn split_even_covers_everything() {
        assert_eq!(split_even(300, 4), vec![0..75, 75..150, 150..225, 225..300]);
        assert_eq!(split_even(10, 4), vec![0..3, 3..6, 6..9, 9..10]);
        assert_eq!(split_even(2, 4), vec![0..1, 1..2]);
        assert!(split_even(0, 3).is_empty());
    }
}
