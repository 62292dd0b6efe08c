//! Math utilities shared by the mesh and cache crates

use glam::Vec3;

/// Linear interpolation between two values
#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Square a value (x²)
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Squared distance between two points on the XZ plane
#[inline]
pub fn dist_sq_2d(a: Vec3, b: Vec3) -> f32 {
    sqr(b.x - a.x) + sqr(b.z - a.z)
}

/// Checks if two axis-aligned bounding boxes overlap
#[inline]
pub fn overlap_bounds(amin: &[f32; 3], amax: &[f32; 3], bmin: &[f32; 3], bmax: &[f32; 3]) -> bool {
    !(amin[0] > bmax[0]
        || amax[0] < bmin[0]
        || amin[1] > bmax[1]
        || amax[1] < bmin[1]
        || amin[2] > bmax[2]
        || amax[2] < bmin[2])
}

/// Checks if two axis-aligned rectangles overlap on the XZ plane
#[inline]
pub fn overlap_bounds_2d(
    amin: &[f32; 3],
    amax: &[f32; 3],
    bmin: &[f32; 3],
    bmax: &[f32; 3],
) -> bool {
    !(amin[0] > bmax[0] || amax[0] < bmin[0] || amin[2] > bmax[2] || amax[2] < bmin[2])
}
