pub mod camera;
pub mod caster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod frame;
pub mod framebuffer;
pub mod horizon;
pub mod present;
pub mod renderer;
pub mod sprites;
pub mod texture;
pub mod walls;
pub mod workers;
pub mod world;

pub use config::RenderConfig;
pub use coordinator::{FrameCoordinator, FrameOutcome, SegmentCaster};
pub use error::{ConfigError, WorkerError};
pub use frame::{Frame, FrameId};
pub use horizon::HorizonOutcome;
pub use renderer::{RenderStats, Renderer};
pub use sprites::{Drawable, Layer, SpriteInstance};
pub use texture::{Texture, TextureStore};
pub use world::{Grid, Pose, TextureId, Tile};
