//! Error types for BVH construction and scene assembly.

use thiserror::Error;

/// Main error type for build operations.
///
/// Every variant aborts the build it came from: no partial tree or half-filled
/// buffer is ever published. Broken internal invariants (a root disagreement
/// during refit, a split outside its range) are not represented here; those
/// panic.
#[derive(Error, Debug)]
pub enum Error {
    /// A radix tree needs at least two leaves
    #[error("Cannot build a BVH from {count} leaves (need at least 2)")]
    TooFewLeaves { count: usize },

    /// Fixed-capacity buffer would overflow
    #[error("Capacity exceeded for {buffer}: requested {requested}, capacity {capacity}")]
    CapacityExceeded {
        buffer: &'static str,
        requested: usize,
        capacity: usize,
    },

    /// Count does not fit a 32-bit GPU index
    #[error("{what} count {count} does not fit a 32-bit index")]
    IndexOverflow { what: &'static str, count: usize },

    /// Element size passed to a structured buffer does not match its layout
    #[error("Element size mismatch for {buffer}: expected {expected}, got {actual}")]
    ElementSize {
        buffer: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Mesh index out of range
    #[error("Mesh index {index} out of bounds (count: {count})")]
    MeshOutOfBounds { index: usize, count: usize },

    /// Malformed mesh description
    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    /// Tree failed structural validation
    #[error("Invalid tree: {0}")]
    InvalidTree(String),

    /// Bad configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid mesh error.
    pub fn invalid_mesh(msg: impl Into<String>) -> Self {
        Self::InvalidMesh(msg.into())
    }

    /// Create an invalid tree error.
    pub fn invalid_tree(msg: impl Into<String>) -> Self {
        Self::InvalidTree(msg.into())
    }
}

/// Result type alias for build operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Check that `count` elements fit into `capacity`.
pub fn ensure_capacity(buffer: &'static str, requested: usize, capacity: usize) -> Result<()> {
    if requested > capacity {
        return Err(Error::CapacityExceeded {
            buffer,
            requested,
            capacity,
        });
    }
    Ok(())
}

/// Convert a host count to a GPU index, failing if it needs more than 32 bits.
pub fn to_index(what: &'static str, count: usize) -> Result<u32> {
    u32::try_from(count)
        .ok()
        .filter(|&c| c != u32::MAX)
        .ok_or(Error::IndexOverflow { what, count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = Error::TooFewLeaves { count: 1 };
        assert!(e.to_string().contains("1 leaves"));

        let e = Error::CapacityExceeded {
            buffer: "triangles",
            requested: 9,
            capacity: 8,
        };
        let s = e.to_string();
        assert!(s.contains("triangles"));
        assert!(s.contains("9"));
        assert!(s.contains("8"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_ensure_capacity() {
        assert!(ensure_capacity("bvh", 4, 4).is_ok());
        assert!(matches!(
            ensure_capacity("bvh", 5, 4),
            Err(Error::CapacityExceeded { requested: 5, capacity: 4, .. })
        ));
    }

    #[test]
    fn test_to_index_rejects_sentinel() {
        assert_eq!(to_index("leaf", 7).unwrap(), 7);
        assert!(matches!(
            to_index("leaf", u32::MAX as usize),
            Err(Error::IndexOverflow { .. })
        ));
    }
}
