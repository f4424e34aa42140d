use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Static render configuration shared by both worker pools.
///
/// Any change goes through `Renderer::reconfigure`, which re-syncs every
/// worker before the next frame id is issued.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub screen_width: usize,
    pub screen_height: usize,
    pub ray_count: usize,
    /// Max ray length, in tiles.
    pub max_depth: usize,
    /// Horizontal field of view, in degrees.
    pub fov_degrees: f32,
    pub tile_size: f32,
    pub raycast_workers: usize,
    pub horizon_workers: usize,
    pub frame_deadline_ms: u64,
    pub horizon_deadline_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            screen_width: 640,
            screen_height: 400,
            ray_count: 300,
            max_depth: 50,
            fov_degrees: 60.0,
            tile_size: 50.0,
            raycast_workers: default_raycast_workers(),
            horizon_workers: 4,
            frame_deadline_ms: 24,
            horizon_deadline_ms: 24,
        }
    }
}

/// min(available parallelism, 4)
pub fn default_raycast_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(4)
}

impl RenderConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.screen_width == 0 || self.screen_height == 0 {
            return Err(ConfigError::EmptyScreen {
                width: self.screen_width,
                height: self.screen_height,
            });
        }
        if self.ray_count == 0 {
            return Err(ConfigError::ZeroRays);
        }
        if self.max_depth == 0 {
            return Err(ConfigError::ZeroDepth);
        }
        if !(self.fov_degrees > 0.0 && self.fov_degrees < 180.0) {
            return Err(ConfigError::InvalidFov(self.fov_degrees));
        }
        if !(self.tile_size > 0.0) {
            return Err(ConfigError::InvalidTileSize(self.tile_size));
        }
        if self.raycast_workers == 0 {
            return Err(ConfigError::EmptyPool { pool: "raycast" });
        }
        if self.horizon_workers == 0 {
            return Err(ConfigError::EmptyPool { pool: "horizon" });
        }
        if self.frame_deadline_ms == 0 {
            return Err(ConfigError::ZeroDeadline("frame"));
        }
        if self.horizon_deadline_ms == 0 {
            return Err(ConfigError::ZeroDeadline("horizon"));
        }
        Ok(())
    }

    #[inline]
    pub fn fov(&self) -> f32 {
        self.fov_degrees.to_radians()
    }

    #[inline]
    pub fn frame_deadline(&self) -> Duration {
        Duration::from_millis(self.frame_deadline_ms)
    }

    #[inline]
    pub fn horizon_deadline(&self) -> Duration {
        Duration::from_millis(self.horizon_deadline_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RenderConfig::from_toml_str("ray_count = 120\nfov_degrees = 75.0\n").unwrap();
        assert_eq!(config.ray_count, 120);
        assert_eq!(config.fov_degrees, 75.0);
        assert_eq!(config.tile_size, 50.0);
        assert_eq!(config.horizon_workers, 4);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            RenderConfig::from_toml_str("ray_count = 0"),
            Err(ConfigError::ZeroRays)
        ));
        assert!(matches!(
            RenderConfig::from_toml_str("fov_degrees = 180.0"),
            Err(ConfigError::InvalidFov(_))
        ));
        assert!(matches!(
            RenderConfig::from_toml_str("horizon_workers = 0"),
            Err(ConfigError::EmptyPool { pool: "horizon" })
        ));
        assert!(matches!(
            RenderConfig::from_toml_str("screen_width = \"wide\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn default_raycast_pool_is_capped() {
        let n = default_raycast_workers();
        assert!((1..=4).contains(&n));
    }
}
