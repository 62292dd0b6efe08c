//! Local boundary extraction over polygon adjacency
//!
//! Starting from one polygon, the query walks the adjacency graph of the
//! admissible region with an explicit work list and emits one segment per
//! mesh edge on the boundary of the explored area. Edges with no neighbor,
//! and edges whose neighbor fails the filter, are walls (neighbor reference
//! 0). With `store_all` set, portal edges to admissible neighbors are
//! emitted as well, tagged with the neighbor's reference.

use std::collections::HashSet;

use crate::nav_mesh::{encode_poly_ref, NavMesh};
use crate::{PolyRef, QueryFilter};
use tilenav_common::Result;

/// Maximum number of polygons one boundary query may explore
///
/// The traversal stops growing past this bound and reports a partial
/// result, so degenerate meshes cannot produce unbounded walks.
pub const MAX_BOUNDARY_POLYS: usize = 256;

/// Completion status of a boundary query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryStatus {
    /// The whole admissible region was explored
    Complete,
    /// The explored-polygon bound was hit; the result covers only the
    /// polygons visited before the bound
    TraversalLimitExceeded,
}

/// Wall segments bounding a locally explored region
///
/// `verts` and `refs` are parallel: `verts[i]` holds the segment endpoints
/// as \[ax, ay, az, bx, by, bz\] and `refs[i]` the polygon across that edge
/// (`PolyRef::NONE` for a wall).
#[derive(Debug, Clone)]
pub struct WallSegments {
    /// Segment endpoints, one entry per emitted edge
    pub verts: Vec<[f32; 6]>,
    /// Neighbor references, parallel to `verts`
    pub refs: Vec<PolyRef>,
    /// Whether the traversal covered the whole admissible region
    pub status: BoundaryStatus,
}

impl WallSegments {
    fn new() -> Self {
        Self {
            verts: Vec::new(),
            refs: Vec::new(),
            status: BoundaryStatus::Complete,
        }
    }

    /// Number of emitted segments
    pub fn len(&self) -> usize {
        self.verts.len()
    }

    /// Checks whether no segments were emitted
    pub fn is_empty(&self) -> bool {
        self.verts.is_empty()
    }

    fn push(&mut self, seg: [f32; 6], reference: PolyRef) {
        self.verts.push(seg);
        self.refs.push(reference);
    }
}

/// Query interface over a navigation mesh snapshot
#[derive(Debug)]
pub struct NavMeshQuery<'a> {
    nav_mesh: &'a NavMesh,
}

impl<'a> NavMeshQuery<'a> {
    /// Creates a query against the given mesh
    pub fn new(nav_mesh: &'a NavMesh) -> Self {
        Self { nav_mesh }
    }

    /// Returns the wall segments bounding the region reachable from
    /// `start` under `filter`
    ///
    /// With `store_all` unset only true walls are emitted: edges with no
    /// neighbor, or whose neighbor the filter rejects. With `store_all`
    /// set, portal edges to admissible neighbors are emitted too, tagged
    /// with that neighbor's reference. Segments appear in the order their
    /// owning polygon was expanded and, within a polygon, in edge winding
    /// order. Fails with an invalid-reference error when `start` does not
    /// resolve.
    pub fn get_poly_wall_segments(
        &self,
        start: PolyRef,
        store_all: bool,
        filter: &QueryFilter,
    ) -> Result<WallSegments> {
        let (_, _, start_poly) = self.nav_mesh.resolve(start)?;

        let mut out = WallSegments::new();
        if !filter.pass_filter(start_poly) {
            return Ok(out);
        }

        let mut visited: HashSet<PolyRef> = HashSet::new();
        visited.insert(start);
        let mut stack = vec![start];

        while let Some(current) = stack.pop() {
            let (tile_index, tile, poly) = self.nav_mesh.resolve(current)?;

            let n = poly.vert_count();
            for i in 0..n {
                let a = tile.vert(poly.verts[i] as usize);
                let b = tile.vert(poly.verts[(i + 1) % n] as usize);
                let seg = [a.x, a.y, a.z, b.x, b.y, b.z];

                let marker = poly.neighbors[i];
                if marker == 0 {
                    out.push(seg, PolyRef::NONE);
                    continue;
                }

                let neighbor_index = (marker - 1) as usize;
                let neighbor_poly = match tile.polys.get(neighbor_index) {
                    Some(p) => p,
                    // Dangling marker, treat the edge as a wall
                    None => {
                        out.push(seg, PolyRef::NONE);
                        continue;
                    }
                };
                if !filter.pass_filter(neighbor_poly) {
                    out.push(seg, PolyRef::NONE);
                    continue;
                }

                let neighbor_ref =
                    encode_poly_ref(tile.salt, tile_index as u32, neighbor_index as u32);
                if visited.contains(&neighbor_ref) {
                    if store_all {
                        out.push(seg, neighbor_ref);
                    }
                    continue;
                }

                if visited.len() >= MAX_BOUNDARY_POLYS {
                    out.status = BoundaryStatus::TraversalLimitExceeded;
                    if store_all {
                        out.push(seg, neighbor_ref);
                    }
                    continue;
                }

                visited.insert(neighbor_ref);
                stack.push(neighbor_ref);
                if store_all {
                    out.push(seg, neighbor_ref);
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nav_mesh::{NavMeshParams, Poly, TileHeader};
    use crate::PolyFlags;
    use tilenav_common::Error;

    fn test_mesh() -> NavMesh {
        NavMesh::new(NavMeshParams {
            origin: [0.0, 0.0, 0.0],
            tile_width: 16.0,
            tile_height: 16.0,
            max_tiles: 4,
            max_polys_per_tile: 1024,
        })
        .unwrap()
    }

    fn quad(verts: [u16; 4], neighbors: [u16; 4], flags: PolyFlags) -> Poly {
        let mut poly = Poly::new(flags, 1);
        poly.verts = verts.to_vec();
        poly.neighbors = neighbors.to_vec();
        poly
    }

    /// Two unit quads side by side sharing the x = 1 edge
    fn two_quad_tile() -> (TileHeader, Vec<f32>, Vec<Poly>) {
        let verts = vec![
            0.0, 0.0, 0.0, // 0
            1.0, 0.0, 0.0, // 1
            1.0, 0.0, 1.0, // 2
            0.0, 0.0, 1.0, // 3
            2.0, 0.0, 0.0, // 4
            2.0, 0.0, 1.0, // 5
        ];
        let polys = vec![
            quad([0, 1, 2, 3], [0, 2, 0, 0], PolyFlags::WALK),
            quad([1, 4, 5, 2], [0, 0, 0, 1], PolyFlags::WALK),
        ];
        let mut header = TileHeader::new(0, 0, 0);
        header.vert_count = 6;
        header.poly_count = 2;
        header.bmax = [2.0, 0.0, 1.0];
        (header, verts, polys)
    }

    #[test]
    fn test_walls_only_closed_region() {
        let mut mesh = test_mesh();
        let (header, verts, polys) = two_quad_tile();
        let start = mesh.add_tile(header, verts, polys).unwrap();

        let query = NavMeshQuery::new(&mesh);
        let result = query
            .get_poly_wall_segments(start, false, &QueryFilter::default())
            .unwrap();

        // The 2x1 region has six boundary edges, all walls
        assert_eq!(result.len(), 6);
        assert_eq!(result.status, BoundaryStatus::Complete);
        assert!(result.refs.iter().all(|r| *r == PolyRef::NONE));
    }

    #[test]
    fn test_store_all_emits_portals() {
        let mut mesh = test_mesh();
        let (header, verts, polys) = two_quad_tile();
        let start = mesh.add_tile(header, verts, polys).unwrap();

        let query = NavMeshQuery::new(&mesh);
        let result = query
            .get_poly_wall_segments(start, true, &QueryFilter::default())
            .unwrap();

        // Every edge of both quads is emitted; the shared edge appears
        // once from each side with the opposite polygon's reference
        assert_eq!(result.len(), 8);
        let portals: Vec<PolyRef> = result
            .refs
            .iter()
            .copied()
            .filter(|r| r.is_valid())
            .collect();
        assert_eq!(portals.len(), 2);
        for reference in portals {
            assert!(mesh.get_tile_and_poly_by_ref(reference).is_ok());
        }

        // Expansion starts at the given polygon; its first edge is the
        // quad's south edge
        let first = result.verts[0];
        let expected = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        for (got, want) in first.iter().zip(expected.iter()) {
            assert!((got - want).abs() < 0.001);
        }
    }

    #[test]
    fn test_same_region_from_every_start() {
        let mut mesh = test_mesh();
        let (header, verts, polys) = two_quad_tile();
        mesh.add_tile(header, verts, polys).unwrap();

        // The explored region is the same whichever polygon the query
        // starts from, so the segment counts match
        let query = NavMeshQuery::new(&mesh);
        let tile = mesh.get_tile_at(0, 0, 0).unwrap();
        let base = mesh.get_poly_ref_base(0).unwrap();
        for poly_index in 0..tile.polys.len() {
            let start = PolyRef::new(base.id() + poly_index as u64);
            let walls = query
                .get_poly_wall_segments(start, false, &QueryFilter::default())
                .unwrap();
            assert_eq!(walls.len(), 6);
            let all = query
                .get_poly_wall_segments(start, true, &QueryFilter::default())
                .unwrap();
            assert_eq!(all.len(), 8);
        }
    }

    /// Three disjoint rooms in one tile: a single quad, a pair sharing one
    /// edge and a strip of three. Counts and first edges differ per room.
    fn three_room_tile() -> (TileHeader, Vec<f32>, Vec<Poly>) {
        let verts = vec![
            0.0, 0.0, 0.0, // 0
            1.0, 0.0, 0.0, // 1
            1.0, 0.0, 1.0, // 2
            0.0, 0.0, 1.0, // 3
            2.0, 0.0, 0.0, // 4
            3.0, 0.0, 0.0, // 5
            3.0, 0.0, 1.0, // 6
            2.0, 0.0, 1.0, // 7
            4.0, 0.0, 0.0, // 8
            4.0, 0.0, 1.0, // 9
            5.0, 0.0, 0.0, // 10
            6.0, 0.0, 0.0, // 11
            6.0, 0.0, 1.0, // 12
            5.0, 0.0, 1.0, // 13
            7.0, 0.0, 0.0, // 14
            7.0, 0.0, 1.0, // 15
            8.0, 0.0, 0.0, // 16
            8.0, 0.0, 1.0, // 17
        ];
        let polys = vec![
            quad([0, 1, 2, 3], [0, 0, 0, 0], PolyFlags::WALK),
            quad([4, 5, 6, 7], [0, 3, 0, 0], PolyFlags::WALK),
            quad([5, 8, 9, 6], [0, 0, 0, 2], PolyFlags::WALK),
            quad([10, 11, 12, 13], [0, 5, 0, 0], PolyFlags::WALK),
            quad([11, 14, 15, 12], [0, 6, 0, 4], PolyFlags::WALK),
            quad([14, 16, 17, 15], [0, 0, 0, 5], PolyFlags::WALK),
        ];
        let mut header = TileHeader::new(0, 0, 0);
        header.vert_count = 18;
        header.poly_count = 6;
        header.bmax = [8.0, 0.0, 1.0];
        (header, verts, polys)
    }

    #[test]
    fn test_segment_counts_per_start_polygon() {
        let mut mesh = test_mesh();
        let (header, verts, polys) = three_room_tile();
        let base = mesh.add_tile(header, verts, polys).unwrap();
        let query = NavMeshQuery::new(&mesh);
        let filter = QueryFilter::default();

        // Fixed expectations per start polygon: wall count, segment count
        // with store_all, and the start's first boundary edge.
        let cases: [(u64, usize, usize, [f32; 6]); 5] = [
            (0, 4, 4, [0.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
            (1, 6, 8, [2.0, 0.0, 0.0, 3.0, 0.0, 0.0]),
            (2, 6, 8, [3.0, 0.0, 0.0, 4.0, 0.0, 0.0]),
            (3, 8, 12, [5.0, 0.0, 0.0, 6.0, 0.0, 0.0]),
            (5, 8, 12, [7.0, 0.0, 0.0, 8.0, 0.0, 0.0]),
        ];
        for (poly_index, walls, all_segments, first_edge) in cases {
            let start = PolyRef::new(base.id() + poly_index);
            let result = query.get_poly_wall_segments(start, false, &filter).unwrap();
            assert_eq!(result.len(), walls, "walls from polygon {poly_index}");
            assert_eq!(result.status, BoundaryStatus::Complete);
            assert!(result.refs.iter().all(|r| *r == PolyRef::NONE));
            for (got, want) in result.verts[0].iter().zip(first_edge.iter()) {
                assert!((got - want).abs() < 0.001);
            }

            let all = query.get_poly_wall_segments(start, true, &filter).unwrap();
            assert_eq!(all.len(), all_segments, "segments from polygon {poly_index}");
            for reference in all.refs.iter().filter(|r| r.is_valid()) {
                assert!(mesh.get_tile_and_poly_by_ref(*reference).is_ok());
            }
        }

        // The paired room emits its portal from both sides, tagged with
        // the opposite polygon's reference in expansion order
        let start = PolyRef::new(base.id() + 1);
        let all = query.get_poly_wall_segments(start, true, &filter).unwrap();
        let none = PolyRef::NONE;
        let expected = [
            none,
            PolyRef::new(base.id() + 2),
            none,
            none,
            none,
            none,
            none,
            PolyRef::new(base.id() + 1),
        ];
        assert_eq!(all.refs, expected);
    }

    #[test]
    fn test_filtered_neighbor_becomes_wall() {
        let mut mesh = test_mesh();
        let (header, verts, mut polys) = two_quad_tile();
        polys[1].flags = PolyFlags::DISABLED;
        let start = mesh.add_tile(header, verts, polys).unwrap();

        let filter = QueryFilter {
            include_flags: PolyFlags::all(),
            exclude_flags: PolyFlags::DISABLED,
        };
        let query = NavMeshQuery::new(&mesh);
        let result = query.get_poly_wall_segments(start, false, &filter).unwrap();

        // Only the start quad is explored; its neighbor edge collapses to
        // a wall
        assert_eq!(result.len(), 4);
        assert!(result.refs.iter().all(|r| *r == PolyRef::NONE));
    }

    #[test]
    fn test_inadmissible_start_yields_empty() {
        let mut mesh = test_mesh();
        let (header, verts, mut polys) = two_quad_tile();
        polys[0].flags = PolyFlags::DISABLED;
        let start = mesh.add_tile(header, verts, polys).unwrap();

        let filter = QueryFilter {
            include_flags: PolyFlags::all(),
            exclude_flags: PolyFlags::DISABLED,
        };
        let query = NavMeshQuery::new(&mesh);
        let result = query.get_poly_wall_segments(start, false, &filter).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_invalid_start_reference() {
        let mesh = test_mesh();
        let query = NavMeshQuery::new(&mesh);
        let err = query
            .get_poly_wall_segments(PolyRef::NONE, false, &QueryFilter::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));

        let err = query
            .get_poly_wall_segments(PolyRef::new(0xdead_beef), false, &QueryFilter::default())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidReference(_)));
    }

    #[test]
    fn test_traversal_limit() {
        // A strip of quads longer than the exploration bound
        let count = MAX_BOUNDARY_POLYS + 40;
        let mut verts = Vec::with_capacity((count + 1) * 2 * 3);
        for i in 0..=count {
            verts.extend_from_slice(&[i as f32, 0.0, 0.0]);
            verts.extend_from_slice(&[i as f32, 0.0, 1.0]);
        }
        let mut polys = Vec::with_capacity(count);
        for i in 0..count {
            let v = (i * 2) as u16;
            let east = if i + 1 < count { (i + 2) as u16 } else { 0 };
            let west = if i > 0 { i as u16 } else { 0 };
            polys.push(quad(
                [v, v + 2, v + 3, v + 1],
                [0, east, 0, west],
                PolyFlags::WALK,
            ));
        }
        let mut header = TileHeader::new(0, 0, 0);
        header.vert_count = ((count + 1) * 2) as i32;
        header.poly_count = count as i32;

        let mut mesh = test_mesh();
        let start = mesh.add_tile(header, verts, polys).unwrap();

        let query = NavMeshQuery::new(&mesh);
        let result = query
            .get_poly_wall_segments(start, false, &QueryFilter::default())
            .unwrap();
        assert_eq!(result.status, BoundaryStatus::TraversalLimitExceeded);
        assert!(!result.is_empty());
    }
}
