//! Compressed tile cache for incrementally rebuildable navigation meshes
//!
//! Tiles enter the cache as compact layer payloads (see [`layer`]) and are
//! turned into navigation mesh tiles on demand (see [`builder`]). Dynamic
//! obstacles carve the walkable surface without touching the stored
//! payloads; affected tiles are rebuilt from their pristine data under a
//! per-update budget, so obstacle removal restores the original mesh
//! exactly.

pub mod builder;
pub mod layer;
pub mod tile_cache;

pub use layer::{LayerData, LayerHeader, NULL_AREA, WALKABLE_AREA};
pub use tile_cache::{
    ObstacleRef, ObstacleState, ObstacleVolume, TileCache, TileCacheParams, TileRef,
    MAX_REBUILDS_PER_UPDATE, TILE_COMPRESSED,
};

pub use tilenav_common::{Error, Result};
