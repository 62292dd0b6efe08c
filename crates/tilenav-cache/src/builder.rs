//! Navigation mesh tile construction from decoded layers
//!
//! Rebuilding a tile is deterministic: the same layer and the same set of
//! obstacle volumes always produce the same vertices and polygons. The
//! walkable grid (after obstacle carving) is decomposed into axis-aligned
//! rectangles by a greedy row sweep; each rectangle becomes one polygon
//! whose edges are the perimeter runs facing a single neighbor rectangle
//! or the void.

use std::collections::HashMap;

use glam::Vec3;
use tilenav_common::{Error, Result};
use tilenav_mesh::nav_mesh::{Poly, TileHeader};
use tilenav_mesh::PolyFlags;

use crate::layer::{LayerData, NULL_AREA};
use crate::tile_cache::ObstacleVolume;

/// Marks layer cells covered by an obstacle volume as unwalkable.
///
/// A cell is carved when its center lies inside the volume's footprint and
/// the cell's vertical span `[y, y + ch]` overlaps the volume's y range.
pub fn mark_obstacle(layer: &LayerData, areas: &mut [u8], volume: &ObstacleVolume, cs: f32, ch: f32) {
    let header = &layer.header;
    for z in 0..header.height as usize {
        for x in 0..header.width as usize {
            let idx = layer.index(x, z);
            if areas[idx] == NULL_AREA {
                continue;
            }
            let cx = header.bmin[0] + (x as f32 + 0.5) * cs;
            let cz = header.bmin[2] + (z as f32 + 0.5) * cs;
            let y0 = header.bmin[1] + layer.heights[idx] as f32 * ch;
            let y1 = y0 + ch;

            let inside = match volume {
                ObstacleVolume::Cylinder {
                    pos,
                    radius,
                    height,
                } => {
                    let d = Vec3::new(cx - pos[0], 0.0, cz - pos[2]);
                    d.length_squared() <= radius * radius
                        && y0 < pos[1] + height
                        && y1 > pos[1]
                }
                ObstacleVolume::Box { bmin, bmax } => {
                    cx >= bmin[0]
                        && cx <= bmax[0]
                        && cz >= bmin[2]
                        && cz <= bmax[2]
                        && y0 < bmax[1]
                        && y1 > bmin[1]
                }
            };
            if inside {
                areas[idx] = NULL_AREA;
            }
        }
    }
}

struct RectGrid<'a> {
    layer: &'a LayerData,
    areas: &'a [u8],
    width: usize,
    height: usize,
    /// Rectangle id covering each cell, -1 when uncovered
    cover: Vec<i32>,
}

#[derive(Debug, Clone, Copy)]
struct Rect {
    x0: usize,
    z0: usize,
    w: usize,
    h: usize,
    area: u8,
}

impl<'a> RectGrid<'a> {
    fn walkable(&self, x: usize, z: usize) -> bool {
        self.areas[z * self.width + x] != NULL_AREA
    }

    /// Connectivity on the carved grid: both cells walkable after carving
    /// and the layer records the link.
    fn connected(&self, x: usize, z: usize, dx: isize, dz: isize) -> bool {
        let (nx, nz) = (x as isize + dx, z as isize + dz);
        if nx < 0 || nz < 0 || nx >= self.width as isize || nz >= self.height as isize {
            return false;
        }
        if !self.walkable(x, z) || !self.walkable(nx as usize, nz as usize) {
            return false;
        }
        self.layer.is_connected(x, z, dx, dz)
    }

    fn covered(&self, x: usize, z: usize) -> bool {
        self.cover[z * self.width + x] >= 0
    }

    /// Greedy row sweep: grow each rectangle along +x, then extend rows
    /// along +z while every cell stays walkable, uncovered, same-area and
    /// connected to its row and column predecessors.
    fn decompose(&mut self) -> Vec<Rect> {
        let mut rects = Vec::new();
        for z in 0..self.height {
            for x in 0..self.width {
                if !self.walkable(x, z) || self.covered(x, z) {
                    continue;
                }
                let area = self.areas[z * self.width + x];
                let mut w = 1;
                while x + w < self.width
                    && !self.covered(x + w, z)
                    && self.areas[z * self.width + x + w] == area
                    && self.connected(x + w - 1, z, 1, 0)
                {
                    w += 1;
                }
                let mut h = 1;
                'grow: while z + h < self.height {
                    for cx in x..x + w {
                        if self.covered(cx, z + h)
                            || self.areas[(z + h) * self.width + cx] != area
                            || !self.connected(cx, z + h - 1, 0, 1)
                        {
                            break 'grow;
                        }
                        if cx > x && !self.connected(cx - 1, z + h, 1, 0) {
                            break 'grow;
                        }
                    }
                    h += 1;
                }
                let id = rects.len() as i32;
                for cz in z..z + h {
                    for cx in x..x + w {
                        self.cover[cz * self.width + cx] = id;
                    }
                }
                rects.push(Rect {
                    x0: x,
                    z0: z,
                    w,
                    h,
                    area,
                });
            }
        }
        rects
    }

    /// Rectangle id on the far side of a unit cell edge, or -1 for a wall.
    fn edge_owner(&self, x: usize, z: usize, dx: isize, dz: isize) -> i32 {
        if !self.connected(x, z, dx, dz) {
            return -1;
        }
        let nx = (x as isize + dx) as usize;
        let nz = (z as isize + dz) as usize;
        self.cover[nz * self.width + nx]
    }
}

struct VertexPool<'a> {
    layer: &'a LayerData,
    cs: f32,
    ch: f32,
    lookup: HashMap<(usize, usize), u16>,
    verts: Vec<f32>,
}

impl<'a> VertexPool<'a> {
    fn new(layer: &'a LayerData, cs: f32, ch: f32) -> Self {
        Self {
            layer,
            cs,
            ch,
            lookup: HashMap::new(),
            verts: Vec::new(),
        }
    }

    /// Height of a grid corner, combined from the walkable cells that
    /// touch it. C-compatible payloads take the maximum; otherwise the
    /// average.
    fn corner_height(&self, gx: usize, gz: usize) -> f32 {
        let header = &self.layer.header;
        let mut max_h = 0u8;
        let mut sum = 0u32;
        let mut count = 0u32;
        for (dx, dz) in [(0isize, 0isize), (-1, 0), (0, -1), (-1, -1)] {
            let (cx, cz) = (gx as isize + dx, gz as isize + dz);
            if cx < 0 || cz < 0 || cx >= header.width as isize || cz >= header.height as isize {
                continue;
            }
            let idx = self.layer.index(cx as usize, cz as usize);
            if self.layer.areas[idx] == NULL_AREA {
                continue;
            }
            let h = self.layer.heights[idx];
            max_h = max_h.max(h);
            sum += h as u32;
            count += 1;
        }
        let h = if header.c_compatibility || count == 0 {
            max_h as f32
        } else {
            sum as f32 / count as f32
        };
        header.bmin[1] + h * self.ch
    }

    fn get(&mut self, gx: usize, gz: usize) -> Result<u16> {
        if let Some(&idx) = self.lookup.get(&(gx, gz)) {
            return Ok(idx);
        }
        let idx = self.verts.len() / 3;
        if idx > u16::MAX as usize {
            return Err(Error::CapacityExceeded("tile vertex pool"));
        }
        let header = &self.layer.header;
        self.verts.push(header.bmin[0] + gx as f32 * self.cs);
        self.verts.push(self.corner_height(gx, gz));
        self.verts.push(header.bmin[2] + gz as f32 * self.cs);
        self.lookup.insert((gx, gz), idx as u16);
        Ok(idx as u16)
    }
}

/// Builds a navigation mesh tile from a decoded layer, carving the given
/// obstacle volumes out of the walkable grid first.
pub fn build_tile(
    layer: &LayerData,
    obstacles: &[&ObstacleVolume],
    cs: f32,
    ch: f32,
) -> Result<(TileHeader, Vec<f32>, Vec<Poly>)> {
    if cs <= 0.0 || ch <= 0.0 {
        return Err(Error::InvalidParam("cell size must be positive"));
    }
    let mut areas = layer.areas.clone();
    for volume in obstacles {
        mark_obstacle(layer, &mut areas, volume, cs, ch);
    }

    let width = layer.header.width as usize;
    let height = layer.header.height as usize;
    let mut grid = RectGrid {
        layer,
        areas: &areas,
        width,
        height,
        cover: vec![-1; width * height],
    };
    let rects = grid.decompose();

    let mut pool = VertexPool::new(layer, cs, ch);
    let mut polys = Vec::with_capacity(rects.len());

    for (id, rect) in rects.iter().enumerate() {
        let (verts, neighbors) = trace_perimeter(&grid, id as i32, rect, &mut pool)?;
        let mut poly = Poly::new(PolyFlags::WALK, rect.area);
        poly.verts = verts;
        poly.neighbors = neighbors;
        polys.push(poly);
    }

    let header = TileHeader {
        x: layer.header.tx,
        y: layer.header.ty,
        layer: layer.header.tlayer,
        bmin: layer.header.bmin,
        bmax: layer.header.bmax,
        vert_count: (pool.verts.len() / 3) as i32,
        poly_count: polys.len() as i32,
    };
    Ok((header, pool.verts, polys))
}

/// Walks a rectangle's perimeter counter-clockwise (seen from above) and
/// merges unit cell edges into runs that each face a single neighbor
/// rectangle or the void. Each run becomes one polygon edge starting at
/// the vertex emitted for it.
fn trace_perimeter(
    grid: &RectGrid<'_>,
    id: i32,
    rect: &Rect,
    pool: &mut VertexPool<'_>,
) -> Result<(Vec<u16>, Vec<u16>)> {
    let (x0, z0) = (rect.x0, rect.z0);
    let (x1, z1) = (rect.x0 + rect.w, rect.z0 + rect.h);

    // (corner, outside owner) per unit edge, in perimeter order
    let mut units: Vec<((usize, usize), i32)> = Vec::new();
    for x in x0..x1 {
        units.push(((x, z0), grid.edge_owner(x, z0, 0, -1)));
    }
    for z in z0..z1 {
        units.push(((x1, z), grid.edge_owner(x1 - 1, z, 1, 0)));
    }
    for x in (x0..x1).rev() {
        units.push(((x + 1, z1), grid.edge_owner(x, z1 - 1, 0, 1)));
    }
    for z in (z0..z1).rev() {
        units.push(((x0, z + 1), grid.edge_owner(x0, z, -1, 0)));
    }
    debug_assert_eq!(units.len(), 2 * (rect.w + rect.h));

    let mut verts = Vec::new();
    let mut neighbors = Vec::new();
    let mut prev_owner = i32::MIN;
    let mut prev_side = usize::MAX;
    // Side index per unit edge so runs never merge across a corner
    let sides = [rect.w, rect.w + rect.h, 2 * rect.w + rect.h];
    for (i, ((gx, gz), owner)) in units.iter().enumerate() {
        let side = sides.iter().filter(|&&s| i >= s).count();
        if *owner != prev_owner || side != prev_side {
            verts.push(pool.get(*gx, *gz)?);
            let marker = if *owner < 0 || *owner == id {
                0
            } else {
                *owner as u16 + 1
            };
            neighbors.push(marker);
            prev_owner = *owner;
            prev_side = side;
        }
    }
    Ok((verts, neighbors))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{ByteOrder, LayerHeader, CON_ALL, WALKABLE_AREA};

    fn open_layer(width: u16, height: u16) -> LayerData {
        let mut header = LayerHeader::new(width, height);
        header.byte_order = ByteOrder::Little;
        header.bmin = [0.0, 0.0, 0.0];
        header.bmax = [width as f32, 1.0, height as f32];
        let mut layer = LayerData::new(header);
        for idx in 0..layer.header.cell_count() {
            layer.areas[idx] = WALKABLE_AREA;
            layer.cons[idx] = CON_ALL;
        }
        layer
    }

    #[test]
    fn test_open_strip_builds_one_quad() {
        let layer = open_layer(4, 1);
        let (header, verts, polys) = build_tile(&layer, &[], 1.0, 0.25).unwrap();
        assert_eq!(header.vert_count, 4);
        assert_eq!(header.poly_count, 1);
        assert_eq!(verts.len(), 12);
        assert_eq!(polys[0].vert_count(), 4);
        // Fully surrounded by void: every edge is a wall
        assert!(polys[0].neighbors.iter().all(|&n| n == 0));
    }

    #[test]
    fn test_carved_strip_splits_in_two() {
        let layer = open_layer(4, 1);
        let obstacle = ObstacleVolume::Cylinder {
            pos: [1.5, 0.0, 0.5],
            radius: 0.3,
            height: 1.0,
        };
        let (header, _, polys) = build_tile(&layer, &[&obstacle], 1.0, 0.25).unwrap();
        assert_eq!(header.poly_count, 2);
        assert_eq!(header.vert_count, 8);
        assert!(polys.iter().all(|p| p.neighbors.iter().all(|&n| n == 0)));
    }

    #[test]
    fn test_box_obstacle_carves_center() {
        let layer = open_layer(4, 4);
        let obstacle = ObstacleVolume::Box {
            bmin: [1.0, 0.0, 1.0],
            bmax: [3.0, 1.0, 3.0],
        };
        let (header, _, polys) = build_tile(&layer, &[&obstacle], 1.0, 0.25).unwrap();
        // Open 4x4 grid is a single rectangle; a hole forces a ring of them
        assert!(header.poly_count > 1);
        let carved: usize = polys.iter().map(|p| p.vert_count()).sum();
        assert!(carved > 4);
        // Some polygon must have a portal into a neighbor
        assert!(polys.iter().any(|p| p.neighbors.iter().any(|&n| n != 0)));
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let layer = open_layer(6, 3);
        let obstacle = ObstacleVolume::Cylinder {
            pos: [2.5, 0.0, 1.5],
            radius: 0.6,
            height: 1.0,
        };
        let a = build_tile(&layer, &[&obstacle], 1.0, 0.25).unwrap();
        let b = build_tile(&layer, &[&obstacle], 1.0, 0.25).unwrap();
        assert_eq!(a.1, b.1);
        assert_eq!(a.2.len(), b.2.len());
        for (pa, pb) in a.2.iter().zip(b.2.iter()) {
            assert_eq!(pa.verts, pb.verts);
            assert_eq!(pa.neighbors, pb.neighbors);
        }
    }

    #[test]
    fn test_removing_obstacle_restores_original() {
        let layer = open_layer(4, 1);
        let obstacle = ObstacleVolume::Cylinder {
            pos: [1.5, 0.0, 0.5],
            radius: 0.3,
            height: 1.0,
        };
        let before = build_tile(&layer, &[], 1.0, 0.25).unwrap();
        let during = build_tile(&layer, &[&obstacle], 1.0, 0.25).unwrap();
        let after = build_tile(&layer, &[], 1.0, 0.25).unwrap();
        assert_eq!(during.0.poly_count, 2);
        assert_eq!(before.0.vert_count, after.0.vert_count);
        assert_eq!(before.0.poly_count, after.0.poly_count);
        assert_eq!(before.1, after.1);
    }

    #[test]
    fn test_obstacle_above_surface_does_not_carve() {
        let layer = open_layer(4, 1);
        let obstacle = ObstacleVolume::Cylinder {
            pos: [1.5, 10.0, 0.5],
            radius: 0.3,
            height: 1.0,
        };
        let (header, _, _) = build_tile(&layer, &[&obstacle], 1.0, 0.25).unwrap();
        assert_eq!(header.poly_count, 1);
    }

    #[test]
    fn test_disconnected_cells_split_rectangles() {
        let mut layer = open_layer(2, 1);
        // Both cells walkable but the link between them is severed
        let idx = layer.index(0, 0);
        layer.cons[idx] &= !crate::layer::CON_POS_X;
        let (header, _, _) = build_tile(&layer, &[], 1.0, 0.25).unwrap();
        assert_eq!(header.poly_count, 2);
    }

    #[test]
    fn test_adjacent_rectangles_share_portal() {
        let mut layer = open_layer(2, 1);
        // Distinct area ids force two rectangles that stay connected
        let idx = layer.index(1, 0);
        layer.areas[idx] = 5;
        let (header, _, polys) = build_tile(&layer, &[], 1.0, 0.25).unwrap();
        assert_eq!(header.poly_count, 2);
        assert_eq!(polys[0].area, WALKABLE_AREA);
        assert_eq!(polys[1].area, 5);
        // Each rectangle has exactly one portal, pointing at the other
        let portals_a: Vec<u16> = polys[0].neighbors.iter().copied().filter(|&n| n != 0).collect();
        let portals_b: Vec<u16> = polys[1].neighbors.iter().copied().filter(|&n| n != 0).collect();
        assert_eq!(portals_a, vec![2]);
        assert_eq!(portals_b, vec![1]);
    }
}
