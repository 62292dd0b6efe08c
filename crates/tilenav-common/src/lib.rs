//! Common utilities and data structures shared by the tilenav crates

pub mod debug;
pub mod math;

pub use math::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Tile or obstacle table is full; the caller must free slots before retrying.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(&'static str),

    /// Stale salt, unknown handle, or reference into an empty slot.
    #[error("invalid reference: {0}")]
    InvalidReference(&'static str),

    /// Malformed tile payload bytes.
    #[error("failed to decode tile payload: {0}")]
    Decode(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(&'static str),

    #[error("not found: {0}")]
    NotFound(&'static str),
}

/// Result type for tilenav operations
pub type Result<T> = std::result::Result<T, Error>;
