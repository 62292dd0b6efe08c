//! Compressed tile storage with dynamic obstacles
//!
//! The cache stores LZ4-compressed layer payloads and rebuilds navigation
//! mesh tiles from them on demand. Obstacles are added and removed through
//! a request queue; [`TileCache::update`] works through the affected tiles
//! under a per-call rebuild budget so large changes amortize over several
//! frames.

use std::collections::{BTreeSet, HashMap};

use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use tilenav_common::math::overlap_bounds_2d;
use tilenav_common::{Error, Result};
use tilenav_mesh::nav_mesh::NavMesh;
use tilenav_mesh::PolyRef;

use crate::builder::build_tile;
use crate::layer::{LayerData, LayerHeader};

/// Payload passed to [`TileCache::add_tile`] is already LZ4-compressed
pub const TILE_COMPRESSED: u8 = 0x01;

/// Maximum number of tile rebuilds performed by one [`TileCache::update`]
pub const MAX_REBUILDS_PER_UPDATE: usize = 32;

/// Reference to a compressed tile; stays valid until the tile is removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileRef(pub u64);

impl TileRef {
    pub const NONE: TileRef = TileRef(0);
}

/// Reference to an obstacle; stays valid until the obstacle is freed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct ObstacleRef(pub u64);

impl ObstacleRef {
    pub const NONE: ObstacleRef = ObstacleRef(0);
}

fn encode_ref(salt: u32, slot: usize) -> u64 {
    ((salt as u64) << 32) | (slot as u64 + 1)
}

fn decode_ref(value: u64) -> Result<(u32, usize)> {
    if value == 0 {
        return Err(Error::InvalidReference("null reference"));
    }
    let salt = (value >> 32) as u32;
    let low = (value & 0xFFFF_FFFF) as usize;
    if low == 0 {
        return Err(Error::InvalidReference("malformed reference"));
    }
    Ok((salt, low - 1))
}

/// Lifecycle state of an obstacle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObstacleState {
    /// Queued for insertion; not yet part of any rebuilt tile
    Requested,
    /// Insertion or removal in progress; some touched tiles still carry
    /// the previous state
    Processing,
    /// Carved out of every touched tile
    Applied,
    /// Queued for removal; touched tiles rebuild without it
    RemovalRequested,
}

/// Geometric volume carved out of the walkable surface
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum ObstacleVolume {
    Cylinder {
        /// Center of the cylinder base
        pos: [f32; 3],
        radius: f32,
        height: f32,
    },
    Box {
        bmin: [f32; 3],
        bmax: [f32; 3],
    },
}

impl ObstacleVolume {
    /// World-space bounding box of the volume
    pub fn bounds(&self) -> ([f32; 3], [f32; 3]) {
        match self {
            ObstacleVolume::Cylinder {
                pos,
                radius,
                height,
            } => (
                [pos[0] - radius, pos[1], pos[2] - radius],
                [pos[0] + radius, pos[1] + height, pos[2] + radius],
            ),
            ObstacleVolume::Box { bmin, bmax } => (*bmin, *bmax),
        }
    }
}

#[derive(Debug)]
struct CompressedTile {
    salt: u32,
    header: Option<LayerHeader>,
    /// LZ4 payload with prepended size
    data: Vec<u8>,
    next: Option<usize>,
}

#[derive(Debug)]
struct ObstacleSlot {
    salt: u32,
    state: Option<ObstacleState>,
    volume: Option<ObstacleVolume>,
    /// Tile slots that still need a rebuild before the pending state
    /// change settles
    pending: Vec<usize>,
    next: Option<usize>,
}

/// Tile cache configuration
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileCacheParams {
    /// Origin of the tile grid
    pub origin: [f32; 3],
    /// Cell size (xz plane)
    pub cs: f32,
    /// Cell height (y axis)
    pub ch: f32,
    /// Tile width in cells
    pub width: i32,
    /// Tile depth in cells
    pub height: i32,
    /// Maximum number of compressed tile slots
    pub max_tiles: i32,
    /// Maximum number of concurrent obstacles
    pub max_obstacles: i32,
}

/// Compressed navigation tile cache
#[derive(Debug)]
pub struct TileCache {
    params: TileCacheParams,
    tiles: Vec<CompressedTile>,
    next_free_tile: Option<usize>,
    pos_lookup: HashMap<(i32, i32, i32), usize>,
    obstacles: Vec<ObstacleSlot>,
    next_free_obstacle: Option<usize>,
    /// Tile slots whose navigation mesh is stale
    dirty: BTreeSet<usize>,
}

impl TileCache {
    /// Creates a new tile cache
    pub fn new(params: TileCacheParams) -> Result<Self> {
        if params.cs <= 0.0 || params.ch <= 0.0 {
            return Err(Error::InvalidParam("cell size must be positive"));
        }
        if params.width <= 0 || params.height <= 0 {
            return Err(Error::InvalidParam("tile dimensions must be positive"));
        }
        if params.max_tiles <= 0 {
            return Err(Error::InvalidParam("max_tiles must be positive"));
        }
        if params.max_obstacles <= 0 {
            return Err(Error::InvalidParam("max_obstacles must be positive"));
        }

        let max_tiles = params.max_tiles as usize;
        let mut tiles = Vec::with_capacity(max_tiles);
        for i in 0..max_tiles {
            tiles.push(CompressedTile {
                salt: 1,
                header: None,
                data: Vec::new(),
                next: if i + 1 < max_tiles { Some(i + 1) } else { None },
            });
        }

        let max_obstacles = params.max_obstacles as usize;
        let mut obstacles = Vec::with_capacity(max_obstacles);
        for i in 0..max_obstacles {
            obstacles.push(ObstacleSlot {
                salt: 1,
                state: None,
                volume: None,
                pending: Vec::new(),
                next: if i + 1 < max_obstacles {
                    Some(i + 1)
                } else {
                    None
                },
            });
        }

        Ok(Self {
            params,
            tiles,
            next_free_tile: Some(0),
            pos_lookup: HashMap::new(),
            obstacles,
            next_free_obstacle: Some(0),
            dirty: BTreeSet::new(),
        })
    }

    /// Gets the parameters of the tile cache
    pub fn params(&self) -> &TileCacheParams {
        &self.params
    }

    /// Adds a layer payload to the cache
    ///
    /// Pass [`TILE_COMPRESSED`] in `flags` when the payload is already
    /// LZ4-compressed; raw payloads are compressed on ingest. Only the
    /// header is validated here, so a payload with truncated cell arrays
    /// is accepted and fails later at rebuild time.
    pub fn add_tile(&mut self, data: Vec<u8>, flags: u8) -> Result<TileRef> {
        let (header, compressed) = if flags & TILE_COMPRESSED != 0 {
            let raw = decompress_size_prepended(&data)
                .map_err(|e| Error::Decode(e.to_string()))?;
            (LayerHeader::from_bytes(&raw)?, data)
        } else {
            let header = LayerHeader::from_bytes(&data)?;
            (header, compress_prepend_size(&data))
        };

        let key = (header.tx, header.ty, header.tlayer);
        if self.pos_lookup.contains_key(&key) {
            return Err(Error::InvalidParam("tile already present at position"));
        }
        let slot = self
            .next_free_tile
            .ok_or(Error::CapacityExceeded("tile cache slots"))?;
        self.next_free_tile = self.tiles[slot].next;

        let tile = &mut self.tiles[slot];
        tile.next = None;
        tile.header = Some(header);
        tile.data = compressed;
        self.pos_lookup.insert(key, slot);

        log::debug!("added tile {key:?} in slot {slot}");
        Ok(TileRef(encode_ref(self.tiles[slot].salt, slot)))
    }

    /// Removes a tile from the cache and from the navigation mesh
    pub fn remove_tile(&mut self, reference: TileRef, nav_mesh: &mut NavMesh) -> Result<()> {
        let (_, slot) = self.resolve_tile(reference)?;

        let tile = &mut self.tiles[slot];
        // Salt bump invalidates outstanding references to this slot
        tile.salt = bump_salt(tile.salt);
        let header = tile.header.take().ok_or(Error::InvalidReference("tile slot is empty"))?;
        tile.data = Vec::new();
        tile.next = self.next_free_tile;
        self.next_free_tile = Some(slot);

        let key = (header.tx, header.ty, header.tlayer);
        self.pos_lookup.remove(&key);
        self.dirty.remove(&slot);
        for obstacle in self.obstacles.iter_mut() {
            obstacle.pending.retain(|&s| s != slot);
        }

        match nav_mesh.remove_tile(header.tx, header.ty, header.tlayer) {
            Ok(()) | Err(Error::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Gets the tile reference at the given grid position and layer
    pub fn get_tile_at(&self, tx: i32, ty: i32, tlayer: i32) -> Option<TileRef> {
        self.pos_lookup
            .get(&(tx, ty, tlayer))
            .map(|&slot| TileRef(encode_ref(self.tiles[slot].salt, slot)))
    }

    /// Gets the references of all layer tiles at the given grid position
    pub fn get_tiles_at(&self, tx: i32, ty: i32) -> Vec<TileRef> {
        let mut refs: Vec<(i32, TileRef)> = self
            .pos_lookup
            .iter()
            .filter(|((x, y, _), _)| *x == tx && *y == ty)
            .map(|(&(_, _, layer), &slot)| {
                (layer, TileRef(encode_ref(self.tiles[slot].salt, slot)))
            })
            .collect();
        refs.sort_by_key(|(layer, _)| *layer);
        refs.into_iter().map(|(_, r)| r).collect()
    }

    /// Gets the decoded header of a cached tile
    pub fn get_tile_header(&self, reference: TileRef) -> Result<&LayerHeader> {
        let (_, slot) = self.resolve_tile(reference)?;
        self.tiles[slot]
            .header
            .as_ref()
            .ok_or(Error::InvalidReference("tile slot is empty"))
    }

    fn resolve_tile(&self, reference: TileRef) -> Result<(u32, usize)> {
        let (salt, slot) = decode_ref(reference.0)?;
        let tile = self
            .tiles
            .get(slot)
            .ok_or(Error::InvalidReference("tile slot out of range"))?;
        if tile.header.is_none() {
            return Err(Error::InvalidReference("tile slot is empty"));
        }
        if tile.salt != salt {
            return Err(Error::InvalidReference("stale tile salt"));
        }
        Ok((salt, slot))
    }

    /// Queues a cylinder obstacle for insertion
    pub fn add_obstacle(&mut self, pos: [f32; 3], radius: f32, height: f32) -> Result<ObstacleRef> {
        if radius <= 0.0 || height <= 0.0 {
            return Err(Error::InvalidParam("obstacle extents must be positive"));
        }
        self.queue_obstacle(ObstacleVolume::Cylinder {
            pos,
            radius,
            height,
        })
    }

    /// Queues an axis-aligned box obstacle for insertion
    pub fn add_box_obstacle(&mut self, bmin: [f32; 3], bmax: [f32; 3]) -> Result<ObstacleRef> {
        if bmin.iter().zip(bmax.iter()).any(|(lo, hi)| lo >= hi) {
            return Err(Error::InvalidParam("obstacle bounds are inverted"));
        }
        self.queue_obstacle(ObstacleVolume::Box { bmin, bmax })
    }

    fn queue_obstacle(&mut self, volume: ObstacleVolume) -> Result<ObstacleRef> {
        let slot = self
            .next_free_obstacle
            .ok_or(Error::CapacityExceeded("obstacle slots"))?;
        self.next_free_obstacle = self.obstacles[slot].next;

        let touched = self.touched_tiles(&volume);
        self.dirty.extend(touched.iter().copied());

        let obstacle = &mut self.obstacles[slot];
        obstacle.next = None;
        obstacle.state = Some(ObstacleState::Requested);
        obstacle.volume = Some(volume);
        obstacle.pending = touched;

        log::debug!(
            "queued obstacle in slot {slot}, {} tiles touched",
            self.obstacles[slot].pending.len()
        );
        Ok(ObstacleRef(encode_ref(self.obstacles[slot].salt, slot)))
    }

    /// Queues an obstacle for removal
    ///
    /// An obstacle that is still [`ObstacleState::Requested`] is freed
    /// immediately; its touched tiles stay queued for a rebuild, which is
    /// a no-op for them.
    pub fn remove_obstacle(&mut self, reference: ObstacleRef) -> Result<()> {
        let (salt, slot) = decode_ref(reference.0)?;
        let obstacle = self
            .obstacles
            .get(slot)
            .ok_or(Error::InvalidReference("obstacle slot out of range"))?;
        if obstacle.salt != salt {
            return Err(Error::InvalidReference("stale obstacle salt"));
        }
        match obstacle.state {
            None | Some(ObstacleState::RemovalRequested) => {
                Err(Error::InvalidReference("obstacle is not active"))
            }
            Some(ObstacleState::Requested) => {
                self.free_obstacle(slot);
                Ok(())
            }
            Some(ObstacleState::Processing) | Some(ObstacleState::Applied) => {
                let volume = self.obstacles[slot]
                    .volume
                    .clone()
                    .ok_or(Error::InvalidReference("obstacle has no volume"))?;
                let touched = self.touched_tiles(&volume);
                self.dirty.extend(touched.iter().copied());
                let obstacle = &mut self.obstacles[slot];
                obstacle.state = Some(ObstacleState::RemovalRequested);
                obstacle.pending = touched;
                Ok(())
            }
        }
    }

    /// Gets the lifecycle state of an obstacle
    pub fn obstacle_state(&self, reference: ObstacleRef) -> Result<ObstacleState> {
        self.get_obstacle_by_ref(reference).map(|(_, state)| state)
    }

    /// Validates an obstacle reference and returns its volume and state
    pub fn get_obstacle_by_ref(
        &self,
        reference: ObstacleRef,
    ) -> Result<(&ObstacleVolume, ObstacleState)> {
        let (salt, slot) = decode_ref(reference.0)?;
        let obstacle = self
            .obstacles
            .get(slot)
            .ok_or(Error::InvalidReference("obstacle slot out of range"))?;
        if obstacle.salt != salt {
            return Err(Error::InvalidReference("stale obstacle salt"));
        }
        match (&obstacle.volume, obstacle.state) {
            (Some(volume), Some(state)) => Ok((volume, state)),
            _ => Err(Error::InvalidReference("obstacle slot is empty")),
        }
    }

    /// Number of active obstacles, including ones queued for removal
    pub fn get_obstacle_count(&self) -> usize {
        self.obstacles.iter().filter(|o| o.state.is_some()).count()
    }

    /// References of all cached tiles whose bounds overlap the given box
    /// on the xz plane
    pub fn query_tiles(&self, bmin: &[f32; 3], bmax: &[f32; 3]) -> Vec<TileRef> {
        self.tiles
            .iter()
            .enumerate()
            .filter_map(|(slot, tile)| {
                let header = tile.header.as_ref()?;
                overlap_bounds_2d(bmin, bmax, &header.bmin, &header.bmax)
                    .then(|| TileRef(encode_ref(tile.salt, slot)))
            })
            .collect()
    }

    fn free_obstacle(&mut self, slot: usize) {
        let obstacle = &mut self.obstacles[slot];
        obstacle.salt = bump_salt(obstacle.salt);
        obstacle.state = None;
        obstacle.volume = None;
        obstacle.pending.clear();
        obstacle.next = self.next_free_obstacle;
        self.next_free_obstacle = Some(slot);
    }

    /// Tile slots whose bounds overlap the volume's footprint
    fn touched_tiles(&self, volume: &ObstacleVolume) -> Vec<usize> {
        let (obmin, obmax) = volume.bounds();
        let mut touched: Vec<usize> = self
            .tiles
            .iter()
            .enumerate()
            .filter_map(|(slot, tile)| {
                let header = tile.header.as_ref()?;
                overlap_bounds_2d(&obmin, &obmax, &header.bmin, &header.bmax).then_some(slot)
            })
            .collect();
        touched.sort_unstable();
        touched
    }

    /// Rebuilds one navigation mesh tile from its cached payload
    ///
    /// Obstacles in [`ObstacleState::Processing`] or
    /// [`ObstacleState::Applied`] state whose bounds overlap the tile are
    /// carved out. Returns the base polygon reference of the installed
    /// mesh tile.
    pub fn build_nav_mesh_tile(
        &self,
        reference: TileRef,
        nav_mesh: &mut NavMesh,
    ) -> Result<PolyRef> {
        let (_, slot) = self.resolve_tile(reference)?;
        let tile = &self.tiles[slot];

        let raw = decompress_size_prepended(&tile.data)
            .map_err(|e| Error::Decode(e.to_string()))?;
        let layer = LayerData::from_bytes(&raw)?;

        let volumes: Vec<&ObstacleVolume> = self
            .obstacles
            .iter()
            .filter(|o| {
                matches!(
                    o.state,
                    Some(ObstacleState::Processing) | Some(ObstacleState::Applied)
                )
            })
            .filter_map(|o| o.volume.as_ref())
            .filter(|v| {
                let (obmin, obmax) = v.bounds();
                overlap_bounds_2d(&obmin, &obmax, &layer.header.bmin, &layer.header.bmax)
            })
            .collect();

        let (header, verts, polys) =
            build_tile(&layer, &volumes, self.params.cs, self.params.ch)?;
        nav_mesh.add_tile(header, verts, polys)
    }

    /// Rebuilds all layer tiles at a grid position
    pub fn build_nav_mesh_tiles_at(
        &self,
        tx: i32,
        ty: i32,
        nav_mesh: &mut NavMesh,
    ) -> Result<()> {
        for reference in self.get_tiles_at(tx, ty) {
            self.build_nav_mesh_tile(reference, nav_mesh)?;
        }
        Ok(())
    }

    /// Processes queued obstacle changes and rebuilds stale tiles
    ///
    /// At most [`MAX_REBUILDS_PER_UPDATE`] tiles are rebuilt per call.
    /// Returns `Ok(true)` once no stale tiles remain. A tile whose
    /// payload fails to decode stays stale; the remaining tiles in the
    /// batch are still rebuilt and the first error is returned after the
    /// pass.
    pub fn update(&mut self, nav_mesh: &mut NavMesh) -> Result<bool> {
        for obstacle in self.obstacles.iter_mut() {
            if obstacle.state == Some(ObstacleState::Requested) {
                obstacle.state = Some(ObstacleState::Processing);
            }
        }

        let batch: Vec<usize> = self
            .dirty
            .iter()
            .copied()
            .take(MAX_REBUILDS_PER_UPDATE)
            .collect();
        let mut rebuilt = Vec::with_capacity(batch.len());
        let mut first_err = None;
        for slot in batch {
            let reference = TileRef(encode_ref(self.tiles[slot].salt, slot));
            match self.build_nav_mesh_tile(reference, nav_mesh) {
                Ok(_) => {
                    self.dirty.remove(&slot);
                    rebuilt.push(slot);
                }
                Err(err) => {
                    log::error!("rebuild of tile slot {slot} failed: {err}");
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
            }
        }

        for slot in 0..self.obstacles.len() {
            let settled = {
                let obstacle = &mut self.obstacles[slot];
                if obstacle.state.is_none() {
                    continue;
                }
                obstacle.pending.retain(|s| !rebuilt.contains(s));
                obstacle.pending.is_empty()
            };
            if !settled {
                continue;
            }
            match self.obstacles[slot].state {
                Some(ObstacleState::Processing) => {
                    self.obstacles[slot].state = Some(ObstacleState::Applied);
                }
                Some(ObstacleState::RemovalRequested) => {
                    self.free_obstacle(slot);
                }
                _ => {}
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(self.dirty.is_empty()),
        }
    }
}

/// Advances a slot salt, skipping the reserved value 0
#[inline]
fn bump_salt(salt: u32) -> u32 {
    salt.wrapping_add(1).max(1)
}
