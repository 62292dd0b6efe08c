//! Navigation mesh tile storage and reference resolution
//!
//! Tiles live in a fixed-size slot table with a free list. Each slot keeps
//! a salt counter that is bumped whenever the slot's mesh is replaced or
//! removed, so stale [`PolyRef`]s are rejected on resolve instead of
//! silently pointing at new data.

use std::collections::HashMap;

use glam::Vec3;

use crate::{PolyFlags, PolyRef};
use tilenav_common::{Error, Result};

/// Maximum number of layers per tile grid position
pub const MAX_LAYERS: usize = 32;

/// Number of bits for the polygon index
const POLY_BITS: u32 = 20;
/// Number of bits for the tile slot index
const TILE_BITS: u32 = 28;
/// Number of bits for the tile salt
const SALT_BITS: u32 = 16;

const POLY_MASK: u64 = (1 << POLY_BITS) - 1;
const TILE_MASK: u64 = (1 << TILE_BITS) - 1;
const SALT_MASK: u64 = (1 << SALT_BITS) - 1;

/// Creates a PolyRef from salt, tile slot and polygon index
#[inline]
pub fn encode_poly_ref(salt: u32, tile_index: u32, poly_index: u32) -> PolyRef {
    PolyRef::new(
        ((salt as u64 & SALT_MASK) << (POLY_BITS + TILE_BITS))
            | ((tile_index as u64 & TILE_MASK) << POLY_BITS)
            | (poly_index as u64 & POLY_MASK),
    )
}

/// Decodes a PolyRef into (salt, tile slot, polygon index)
#[inline]
pub fn decode_poly_ref(reference: PolyRef) -> (u32, u32, u32) {
    let id = reference.id();
    let salt = (id >> (POLY_BITS + TILE_BITS)) & SALT_MASK;
    let tile = (id >> POLY_BITS) & TILE_MASK;
    let poly = id & POLY_MASK;
    (salt as u32, tile as u32, poly as u32)
}

/// Polygon in the navigation mesh
///
/// `verts` holds indices into the owning tile's vertex array, in winding
/// order. `neighbors` is parallel to `verts`: entry `i` describes the edge
/// from vertex `i` to vertex `i + 1`, with 0 meaning no neighbor and
/// `n + 1` meaning polygon `n` of the same tile.
#[derive(Debug, Clone)]
pub struct Poly {
    /// Vertex indices in winding order
    pub verts: Vec<u16>,
    /// Per-edge neighbor markers, parallel to `verts`
    pub neighbors: Vec<u16>,
    /// Traversal flags
    pub flags: PolyFlags,
    /// Area id of the polygon
    pub area: u8,
}

impl Poly {
    /// Creates a new empty polygon
    pub fn new(flags: PolyFlags, area: u8) -> Self {
        Self {
            verts: Vec::new(),
            neighbors: Vec::new(),
            flags,
            area,
        }
    }

    /// Number of vertices (and edges) in the polygon
    pub fn vert_count(&self) -> usize {
        self.verts.len()
    }
}

/// Tile header information
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct TileHeader {
    /// Tile grid position
    pub x: i32,
    pub y: i32,
    /// Layer index at the grid position
    pub layer: i32,
    /// World-space bounding box of the tile
    pub bmin: [f32; 3],
    pub bmax: [f32; 3],
    /// Number of vertices in the tile
    pub vert_count: i32,
    /// Number of polygons in the tile
    pub poly_count: i32,
}

impl TileHeader {
    /// Creates a new tile header
    pub fn new(x: i32, y: i32, layer: i32) -> Self {
        Self {
            x,
            y,
            layer,
            bmin: [0.0; 3],
            bmax: [0.0; 3],
            vert_count: 0,
            poly_count: 0,
        }
    }
}

/// Mesh tile slot in the navigation mesh
///
/// A slot with `header == None` is empty and sits on the free list. The
/// salt survives emptiness so references into any earlier occupant stay
/// invalid.
#[derive(Debug, Clone)]
pub struct MeshTile {
    /// Salt value for the slot; bumped on every replace or remove
    pub salt: u32,
    /// Tile location and counts; `None` for an empty slot
    pub header: Option<TileHeader>,
    /// Vertices in the tile \[x, y, z, ...\]
    pub verts: Vec<f32>,
    /// Polygons in the tile
    pub polys: Vec<Poly>,
    /// Next free slot in the linked list
    next: Option<usize>,
}

impl MeshTile {
    fn new(next: Option<usize>) -> Self {
        Self {
            salt: 1,
            header: None,
            verts: Vec::new(),
            polys: Vec::new(),
            next,
        }
    }

    /// Position of vertex `i`
    pub fn vert(&self, i: usize) -> Vec3 {
        Vec3::new(
            self.verts[i * 3],
            self.verts[i * 3 + 1],
            self.verts[i * 3 + 2],
        )
    }
}

/// Navigation mesh parameters
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct NavMeshParams {
    /// Origin of the tile grid
    pub origin: [f32; 3],
    /// World width of one tile (x axis)
    pub tile_width: f32,
    /// World depth of one tile (z axis)
    pub tile_height: f32,
    /// Maximum number of tile slots
    pub max_tiles: i32,
    /// Maximum number of polygons per tile
    pub max_polys_per_tile: i32,
}

/// Navigation mesh structure
#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    /// Tile slots
    tiles: Vec<MeshTile>,
    /// Head of the free slot list
    next_free: Option<usize>,
    /// Tile grid hash lookup
    pos_lookup: HashMap<(i32, i32, i32), usize>,
}

impl NavMesh {
    /// Creates a new navigation mesh
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if params.origin.iter().any(|v| v.is_nan() || v.is_infinite()) {
            return Err(Error::InvalidParam("navmesh origin must be finite"));
        }
        if params.tile_width <= 0.0 || params.tile_height <= 0.0 {
            return Err(Error::InvalidParam("tile dimensions must be positive"));
        }
        if params.max_tiles <= 0 || params.max_tiles as u64 > TILE_MASK {
            return Err(Error::InvalidParam("max_tiles out of range"));
        }
        if params.max_polys_per_tile <= 0 || params.max_polys_per_tile as u64 > POLY_MASK {
            return Err(Error::InvalidParam("max_polys_per_tile out of range"));
        }

        let max_tiles = params.max_tiles as usize;
        let mut tiles = Vec::with_capacity(max_tiles);
        for i in 0..max_tiles {
            let next = if i + 1 < max_tiles { Some(i + 1) } else { None };
            tiles.push(MeshTile::new(next));
        }

        Ok(Self {
            params,
            tiles,
            next_free: Some(0),
            pos_lookup: HashMap::new(),
        })
    }

    /// Gets the parameters of the navigation mesh
    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// Installs a built tile, replacing any prior mesh at the same grid
    /// position and layer
    ///
    /// Replacing bumps the slot salt, which invalidates all previously
    /// issued references into that slot. Returns the tile's base polygon
    /// reference (polygon index 0).
    pub fn add_tile(
        &mut self,
        header: TileHeader,
        verts: Vec<f32>,
        polys: Vec<Poly>,
    ) -> Result<PolyRef> {
        if polys.len() > self.params.max_polys_per_tile as usize {
            return Err(Error::InvalidParam("too many polygons for one tile"));
        }
        if verts.len() % 3 != 0 {
            return Err(Error::InvalidParam("vertex array length not a multiple of 3"));
        }
        if header.layer < 0 || header.layer >= MAX_LAYERS as i32 {
            return Err(Error::InvalidParam("tile layer out of range"));
        }

        let key = (header.x, header.y, header.layer);
        let slot = match self.pos_lookup.get(&key) {
            Some(&slot) => {
                // Replacing an existing mesh invalidates its references
                self.tiles[slot].salt = bump_salt(self.tiles[slot].salt);
                slot
            }
            None => {
                let slot = self
                    .next_free
                    .ok_or(Error::CapacityExceeded("navmesh tile slots"))?;
                self.next_free = self.tiles[slot].next;
                self.tiles[slot].next = None;
                self.pos_lookup.insert(key, slot);
                slot
            }
        };

        let tile = &mut self.tiles[slot];
        tile.header = Some(header);
        tile.verts = verts;
        tile.polys = polys;

        Ok(encode_poly_ref(tile.salt, slot as u32, 0))
    }

    /// Removes the tile at the given grid position and layer
    pub fn remove_tile(&mut self, x: i32, y: i32, layer: i32) -> Result<()> {
        let slot = self
            .pos_lookup
            .remove(&(x, y, layer))
            .ok_or(Error::NotFound("no tile at position"))?;

        let tile = &mut self.tiles[slot];
        tile.salt = bump_salt(tile.salt);
        tile.header = None;
        tile.verts.clear();
        tile.polys.clear();
        tile.next = self.next_free;
        self.next_free = Some(slot);

        Ok(())
    }

    /// Gets the occupied tile in the given slot
    pub fn get_tile(&self, slot: usize) -> Option<&MeshTile> {
        self.tiles.get(slot).filter(|t| t.header.is_some())
    }

    /// Gets the tile at the given grid position and layer
    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.pos_lookup
            .get(&(x, y, layer))
            .and_then(|&slot| self.get_tile(slot))
    }

    /// Gets all layer tiles at the given grid position
    ///
    /// Layer order is unspecified; callers must not rely on it.
    pub fn get_tiles_at(&self, x: i32, y: i32) -> Vec<&MeshTile> {
        let mut tiles = Vec::new();
        for layer in 0..MAX_LAYERS as i32 {
            if let Some(tile) = self.get_tile_at(x, y, layer) {
                tiles.push(tile);
            }
        }
        tiles
    }

    /// Gets the base polygon reference (polygon index 0) for a slot
    pub fn get_poly_ref_base(&self, slot: usize) -> Option<PolyRef> {
        self.get_tile(slot)
            .map(|tile| encode_poly_ref(tile.salt, slot as u32, 0))
    }

    /// Resolves a reference into its slot index, tile and polygon
    pub(crate) fn resolve(&self, reference: PolyRef) -> Result<(usize, &MeshTile, &Poly)> {
        if !reference.is_valid() {
            return Err(Error::InvalidReference("null polygon reference"));
        }
        let (salt, tile_index, poly_index) = decode_poly_ref(reference);
        let tile = self
            .tiles
            .get(tile_index as usize)
            .ok_or(Error::InvalidReference("tile slot out of range"))?;
        if tile.header.is_none() {
            return Err(Error::InvalidReference("tile slot is empty"));
        }
        if tile.salt != salt {
            return Err(Error::InvalidReference("stale tile salt"));
        }
        let poly = tile
            .polys
            .get(poly_index as usize)
            .ok_or(Error::InvalidReference("polygon index out of range"))?;
        Ok((tile_index as usize, tile, poly))
    }

    /// Validates a reference and returns the tile and polygon it denotes
    pub fn get_tile_and_poly_by_ref(&self, reference: PolyRef) -> Result<(&MeshTile, &Poly)> {
        let (_, tile, poly) = self.resolve(reference)?;
        Ok((tile, poly))
    }

    /// Checks if a polygon reference resolves against the current mesh
    pub fn is_valid_poly_ref(&self, reference: PolyRef) -> bool {
        self.resolve(reference).is_ok()
    }
}

/// Advances a slot salt, skipping the reserved value 0
#[inline]
fn bump_salt(salt: u32) -> u32 {
    let next = (salt + 1) & SALT_MASK as u32;
    if next == 0 { 1 } else { next }
}
