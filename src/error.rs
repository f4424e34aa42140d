use thiserror::Error;

/// Problems detected before any work is dispatched.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("grid has no tiles")]
    EmptyGrid,
    #[error("grid row {row} has {found} tiles, expected {expected}")]
    RaggedGrid {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("tile size must be positive, got {0}")]
    InvalidTileSize(f32),
    #[error("ray count must be at least 1")]
    ZeroRays,
    #[error("max ray depth must be at least 1 tile")]
    ZeroDepth,
    #[error("screen size {width}x{height} is empty")]
    EmptyScreen { width: usize, height: usize },
    #[error("field of view must be inside (0, 180) degrees, got {0}")]
    InvalidFov(f32),
    #[error("{pool} worker pool needs at least one worker")]
    EmptyPool { pool: &'static str },
    #[error("{0} deadline must be non-zero")]
    ZeroDeadline(&'static str),
    #[error("texture of {width}x{height} needs {} pixels, got {found}", .width * .height)]
    TextureSize { width: usize, height: usize, found: usize },
    #[error("failed to start worker thread: {0}")]
    WorkerSpawn(#[source] std::io::Error),
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Per-job failures reported by a worker. Never surfaced past the
/// coordinators; they degrade to reusing the last good output.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker {0} has not received its static configuration")]
    NotSynced(usize),
    #[error("worker {worker} panicked: {message}")]
    Panicked { worker: usize, message: String },
    #[error("worker {0} is gone")]
    Disconnected(usize),
    #[error("worker returned {found} entries for a range of {expected}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("{0}")]
    Task(String),
}
