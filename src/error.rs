//! Error types for the physics engine.

use thiserror::Error;

use crate::rigid_body::BodyHandle;

/// Errors reported by fallible physics operations.
///
/// Geometric degeneracy never shows up here: GJK/EPA recover locally and
/// report "not colliding" instead.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhysicsError {
    /// The handle does not refer to a live body.
    #[error("body handle {0:?} does not refer to a live body")]
    InvalidBody(BodyHandle),

    /// A shape was constructed with non-positive or non-finite dimensions.
    #[error("invalid shape: {0}")]
    InvalidShape(&'static str),

    /// `run_physics` was called with a negative or non-finite time step.
    #[error("invalid time step: {0}")]
    InvalidTimeStep(f32),

    /// A stack allocation was freed while a newer one was still live.
    #[error("stack allocator freed out of order: top entry is {expected}, tried to free {actual}")]
    StackOrder { expected: usize, actual: usize },

    /// A stack block handle outlived its allocation, e.g. a second free.
    #[error("stack block {0} is no longer allocated")]
    StaleStackBlock(usize),

    /// The same stack block was borrowed twice from one view.
    #[error("stack block {0} is already borrowed from this view")]
    StackBlockTaken(usize),

    /// A stack block was viewed as a type whose size differs from the one it was allocated with.
    #[error("stack block {index} holds {expected}-byte elements, viewed as {actual}-byte elements")]
    StackLayout {
        index: usize,
        expected: usize,
        actual: usize,
    },
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, PhysicsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_order_message() {
        let err = PhysicsError::StackOrder {
            expected: 1,
            actual: 0,
        };
        let msg = err.to_string();
        assert!(msg.contains("top entry is 1"));
        assert!(msg.contains("free 0"));
    }

    #[test]
    fn test_invalid_shape_message() {
        let err = PhysicsError::InvalidShape("sphere radius must be positive");
        assert!(err.to_string().contains("sphere radius"));
    }
}
