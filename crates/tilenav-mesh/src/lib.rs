//! Tiled navigation mesh
//!
//! This crate holds the assembled set of built navigation tiles, indexed by
//! grid coordinate and layer. Polygons are addressed by [`PolyRef`], a
//! 64-bit handle packing the owning tile's salt, the tile slot, and the
//! polygon index. Rebuilding a tile bumps its salt, which invalidates every
//! previously issued reference into that tile.
//!
//! Boundary queries ([`NavMeshQuery::get_poly_wall_segments`]) walk polygon
//! adjacency to extract the wall and portal edges of a locally reachable
//! region.

pub mod boundary;
pub mod nav_mesh;
pub mod visualization;

pub use boundary::{BoundaryStatus, NavMeshQuery, WallSegments, MAX_BOUNDARY_POLYS};
pub use nav_mesh::{MeshTile, NavMesh, NavMeshParams, Poly, TileHeader};

use bitflags::bitflags;

bitflags! {
    /// Per-polygon traversal flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PolyFlags: u16 {
        /// Walkable ground
        const WALK = 0x01;
        /// Water area
        const SWIM = 0x02;
        /// Door area, may be toggled closed
        const DOOR = 0x04;
        /// Polygon is disabled for traversal
        const DISABLED = 0x10;
    }
}

/// Reference to a polygon in the navigation mesh
///
/// Zero is reserved to mean "no polygon".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct PolyRef(u64);

impl PolyRef {
    /// The reserved "no polygon" reference
    pub const NONE: PolyRef = PolyRef(0);

    /// Creates a reference from a raw id
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id
    pub const fn id(&self) -> u64 {
        self.0
    }

    /// Checks that the reference is not the reserved null value
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl Default for PolyRef {
    fn default() -> Self {
        Self::NONE
    }
}

/// Filter predicate deciding which polygons a query may traverse
#[derive(Debug, Clone, Copy)]
pub struct QueryFilter {
    /// A polygon must share at least one of these flags to pass
    pub include_flags: PolyFlags,
    /// A polygon sharing any of these flags is rejected
    pub exclude_flags: PolyFlags,
}

impl Default for QueryFilter {
    fn default() -> Self {
        Self {
            include_flags: PolyFlags::all(),
            exclude_flags: PolyFlags::empty(),
        }
    }
}

impl QueryFilter {
    /// Checks whether a polygon is admissible for traversal
    pub fn pass_filter(&self, poly: &Poly) -> bool {
        (poly.flags & self.include_flags) != PolyFlags::empty()
            && (poly.flags & self.exclude_flags) == PolyFlags::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poly_ref_null() {
        assert!(!PolyRef::NONE.is_valid());
        assert!(PolyRef::new(1).is_valid());
        assert_eq!(PolyRef::default(), PolyRef::NONE);
    }

    #[test]
    fn test_query_filter_default() {
        let filter = QueryFilter::default();
        let poly = Poly::new(PolyFlags::WALK, 1);
        assert!(filter.pass_filter(&poly));

        let excluding = QueryFilter {
            include_flags: PolyFlags::all(),
            exclude_flags: PolyFlags::DISABLED,
        };
        let mut disabled = Poly::new(PolyFlags::WALK | PolyFlags::DISABLED, 1);
        assert!(!excluding.pass_filter(&disabled));
        disabled.flags = PolyFlags::WALK;
        assert!(excluding.pass_filter(&disabled));
    }
}
