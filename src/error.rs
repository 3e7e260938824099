//! Error types for the mini-markov crate.

use crate::distributions::DType;

/// Error type for all fallible operations on Markov chain distributions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarkovChainError {
    /// Returned when the number of steps is smaller than one.
    #[error("num_steps must be at least 1, got {num_steps}")]
    InvalidStepCount {
        /// The offending step count.
        num_steps: usize,
    },

    /// Returned when two arrays that must agree in shape do not.
    #[error("{reason} Saw shapes: {left:?} vs {right:?}.")]
    ShapeMismatch {
        /// Description of the disagreement.
        reason: String,
        /// Shape of the reference operand.
        left: Vec<usize>,
        /// Shape of the offending operand.
        right: Vec<usize>,
    },

    /// Returned when a trajectory's extent along its step axis is wrong.
    #[error(
        "input shape does not match the expected num_steps: \
         leaf {leaf} has {got} steps, expected {expected}"
    )]
    StepAxisLengthMismatch {
        /// Depth-first index of the offending leaf.
        leaf: usize,
        /// Expected number of steps.
        expected: usize,
        /// Extent found along the step axis.
        got: usize,
    },

    /// Returned when two nested states do not share the same schema.
    #[error("structure mismatch: {reason}")]
    StructureMismatch {
        /// Description of the problem.
        reason: String,
    },

    /// Returned when a transition distribution's dtype differs from the prior's.
    #[error("dtype mismatch: expected {expected:?}, got {got:?}")]
    DTypeMismatch {
        /// Dtype of the initial state prior.
        expected: DType,
        /// Dtype of the transition distribution.
        got: DType,
    },

    /// Returned when an input leaf has too few dimensions to carry its step axis.
    #[error("input has rank {rank}, but at least {min_rank} dimensions are required")]
    InvalidRank {
        /// Rank of the input leaf.
        rank: usize,
        /// Minimum rank required.
        min_rank: usize,
    },

    /// Returned when a distribution parameter is invalid.
    #[error("invalid parameter: {reason}")]
    InvalidParameter {
        /// Description of the problem.
        reason: String,
    },
}
