//! Debug visualization of built tiles
//!
//! Emits tile polygons to a [`DebugDraw`] sink as triangle fans. Nothing in
//! the navigation core depends on this module.

use crate::nav_mesh::{MeshTile, NavMesh};
use tilenav_common::debug::{Color, DebugDraw, DebugDrawPrimitive};

/// Draws every polygon of a tile as a filled triangle fan
///
/// Polygons are shaded between `low` and `high` by their area id mapped
/// into \[-1, 1\].
pub fn draw_mesh_tile(tile: &MeshTile, dd: &mut dyn DebugDraw, low: Color, high: Color) {
    dd.begin(DebugDrawPrimitive::Tris);
    for poly in &tile.polys {
        if poly.vert_count() < 3 {
            continue;
        }
        let shade = (poly.area as f32 / 32.0 - 1.0).clamp(-1.0, 1.0);
        let color = Color::shade(low, high, shade).pack();

        let v0 = tile.vert(poly.verts[0] as usize);
        for i in 1..poly.vert_count() - 1 {
            let v1 = tile.vert(poly.verts[i] as usize);
            let v2 = tile.vert(poly.verts[i + 1] as usize);
            dd.vertex(v0.x, v0.y, v0.z, color);
            dd.vertex(v1.x, v1.y, v1.z, color);
            dd.vertex(v2.x, v2.y, v2.z, color);
        }
    }
    dd.end();
}

/// Draws all occupied tiles of a navigation mesh
pub fn draw_nav_mesh(mesh: &NavMesh, dd: &mut dyn DebugDraw, low: Color, high: Color) {
    let max_tiles = mesh.params().max_tiles as usize;
    for slot in 0..max_tiles {
        if let Some(tile) = mesh.get_tile(slot) {
            draw_mesh_tile(tile, dd, low, high);
        }
    }
}
