use crate::error::ConfigError;

/// Identifier the texture layer uses to key decoded pixel buffers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u16);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TileKind {
    Wall,
    Empty,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    pub kind: TileKind,
    pub wall_texture: TextureId,
    pub floor_texture: TextureId,
    pub ceiling_texture: TextureId,
    pub floor_height: f32, // world units, carried for the map layer
}

impl Tile {
    pub fn wall(texture: TextureId) -> Self {
        Self {
            kind: TileKind::Wall,
            wall_texture: texture,
            floor_texture: texture,
            ceiling_texture: texture,
            floor_height: 0.0,
        }
    }

    pub fn empty(floor: TextureId, ceiling: TextureId) -> Self {
        Self {
            kind: TileKind::Empty,
            wall_texture: floor,
            floor_texture: floor,
            ceiling_texture: ceiling,
            floor_height: 0.0,
        }
    }

    #[inline]
    pub fn is_wall(&self) -> bool {
        self.kind == TileKind::Wall
    }
}

/// Rectangular, row-major tile grid supplied by the map layer.
///
/// The renderer only ever holds it behind an `Arc` and never mutates it;
/// a map change swaps in a whole new grid between frames.
#[derive(Clone, Debug)]
pub struct Grid {
    width: usize,
    height: usize,
    tile_size: f32,
    tiles: Vec<Tile>,
}

impl Grid {
    /// Builds a grid from rows, rejecting empty or ragged input.
    pub fn from_rows(rows: Vec<Vec<Tile>>, tile_size: f32) -> Result<Self, ConfigError> {
        if !(tile_size > 0.0) {
            return Err(ConfigError::InvalidTileSize(tile_size));
        }
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if rows.is_empty() || width == 0 {
            return Err(ConfigError::EmptyGrid);
        }
        for (row, tiles) in rows.iter().enumerate() {
            if tiles.len() != width {
                return Err(ConfigError::RaggedGrid {
                    row,
                    expected: width,
                    found: tiles.len(),
                });
            }
        }
        let height = rows.len();
        Ok(Self {
            width,
            height,
            tile_size,
            tiles: rows.into_iter().flatten().collect(),
        })
    }

    /// A `width`×`height` room: border tiles are walls, interior is empty.
    pub fn bordered(
        width: usize,
        height: usize,
        tile_size: f32,
        wall: TextureId,
        floor: TextureId,
        ceiling: TextureId,
    ) -> Result<Self, ConfigError> {
        let rows = (0..height)
            .map(|z| {
                (0..width)
                    .map(|x| {
                        if x == 0 || z == 0 || x + 1 == width || z + 1 == height {
                            Tile::wall(wall)
                        } else {
                            Tile::empty(floor, ceiling)
                        }
                    })
                    .collect()
            })
            .collect();
        Self::from_rows(rows, tile_size)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn tile_size(&self) -> f32 {
        self.tile_size
    }

    /// Tile at cell coordinates; out of bounds is "no tile", never a wall.
    #[inline]
    pub fn tile(&self, cx: i64, cz: i64) -> Option<&Tile> {
        if cx < 0 || cz < 0 {
            return None;
        }
        let (cx, cz) = (cx as usize, cz as usize);
        if cx >= self.width || cz >= self.height {
            return None;
        }
        self.tiles.get(cz * self.width + cx)
    }

    pub fn set_tile(&mut self, cx: usize, cz: usize, tile: Tile) {
        if cx < self.width && cz < self.height {
            self.tiles[cz * self.width + cx] = tile;
        }
    }

    /// Tile under a world-space point.
    #[inline]
    pub fn tile_at(&self, x: f32, z: f32) -> Option<&Tile> {
        self.tile(
            (x / self.tile_size).floor() as i64,
            (z / self.tile_size).floor() as i64,
        )
    }

    #[inline]
    pub fn world_width(&self) -> f32 {
        self.width as f32 * self.tile_size
    }

    #[inline]
    pub fn world_height(&self) -> f32 {
        self.height as f32 * self.tile_size
    }

    pub fn contains(&self, x: f32, z: f32) -> bool {
        x.is_finite()
            && z.is_finite()
            && x >= 0.0
            && z >= 0.0
            && x < self.world_width()
            && z < self.world_height()
    }

    /// Pulls a pose back inside the grid's world bounds.
    pub fn clamp_pose(&self, pose: &Pose) -> Pose {
        let max_x = (self.world_width() - f32::EPSILON * self.world_width()).max(0.0);
        let max_z = (self.world_height() - f32::EPSILON * self.world_height()).max(0.0);
        let fix = |v: f32, max: f32| if v.is_finite() { v.clamp(0.0, max) } else { max * 0.5 };
        Pose {
            x: fix(pose.x, max_x),
            z: fix(pose.z, max_z),
            angle: if pose.angle.is_finite() { pose.angle } else { 0.0 },
        }
    }
}

/// Camera pose for one frame: world position and yaw in radians.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Pose {
    pub x: f32,
    pub z: f32,
    pub angle: f32,
}

impl Pose {
    pub fn new(x: f32, z: f32, angle: f32) -> Self {
        Self { x, z, angle }
    }
}
