//! Static shapes and the array plumbing shared by sampling and density evaluation.

use std::fmt;

use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::error::MarkovChainError;
use crate::nest::State;

/// A statically known shape: either of unknown rank, or a list of dimensions
/// each of which may itself be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorShape {
    dims: Option<Vec<Option<usize>>>,
}

impl TensorShape {
    /// A shape of unknown rank.
    pub fn unknown() -> Self {
        Self { dims: None }
    }

    /// The shape of a scalar, `[]`.
    pub fn scalar() -> Self {
        Self { dims: Some(vec![]) }
    }

    /// A shape of known rank whose dimensions may be unknown.
    pub fn new(dims: Vec<Option<usize>>) -> Self {
        Self { dims: Some(dims) }
    }

    /// A fully defined shape.
    pub fn from_dims(dims: &[usize]) -> Self {
        Self {
            dims: Some(dims.iter().map(|&d| Some(d)).collect()),
        }
    }

    /// Returns the rank, or `None` if it is unknown.
    pub fn rank(&self) -> Option<usize> {
        self.dims.as_ref().map(Vec::len)
    }

    /// Returns the dimensions, or `None` if the rank is unknown.
    pub fn dims(&self) -> Option<&[Option<usize>]> {
        self.dims.as_deref()
    }

    /// Returns `true` if the rank and every dimension are known.
    pub fn is_fully_defined(&self) -> bool {
        self.dims
            .as_ref()
            .is_some_and(|dims| dims.iter().all(Option::is_some))
    }

    /// Returns the concrete dimensions if the shape is fully defined.
    pub fn as_fully_defined(&self) -> Option<Vec<usize>> {
        self.dims.as_ref()?.iter().copied().collect()
    }

    /// Two shapes are compatible if they could describe the same concrete shape.
    pub fn is_compatible_with(&self, other: &TensorShape) -> bool {
        match (&self.dims, &other.dims) {
            (Some(a), Some(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| match (x, y) {
                        (Some(x), Some(y)) => x == y,
                        _ => true,
                    })
            }
            _ => true,
        }
    }

    /// Concatenates two shapes; the result has unknown rank if either input does.
    pub fn concatenate(&self, other: &TensorShape) -> TensorShape {
        match (&self.dims, &other.dims) {
            (Some(a), Some(b)) => TensorShape::new(a.iter().chain(b).copied().collect()),
            _ => TensorShape::unknown(),
        }
    }

    /// Prepends a (possibly unknown) dimension.
    pub fn prepend(&self, dim: Option<usize>) -> TensorShape {
        TensorShape::new(vec![dim]).concatenate(self)
    }
}

impl From<&[usize]> for TensorShape {
    fn from(dims: &[usize]) -> Self {
        TensorShape::from_dims(dims)
    }
}

impl From<Vec<usize>> for TensorShape {
    fn from(dims: Vec<usize>) -> Self {
        TensorShape::from_dims(&dims)
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dims {
            None => write!(f, "<unknown>"),
            Some(dims) => {
                let parts: Vec<String> = dims
                    .iter()
                    .map(|d| d.map_or_else(|| "?".to_string(), |d| d.to_string()))
                    .collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Index of the step axis within a leaf whose own event shape has rank `event_rank`,
/// counted from the end so it is independent of the batch rank.
pub fn step_axis(event_rank: usize) -> isize {
    -(1 + event_rank as isize)
}

/// Resolves a possibly negative axis against an array of rank `ndim`.
pub fn normalize_axis(axis: isize, ndim: usize) -> Option<usize> {
    let resolved = if axis < 0 {
        ndim as isize + axis
    } else {
        axis
    };
    (0..ndim as isize)
        .contains(&resolved)
        .then_some(resolved as usize)
}

/// Numpy-style broadcast of two shapes, aligned on their trailing dimensions.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let x = if i < a.len() { a[a.len() - 1 - i] } else { 1 };
        let y = if i < b.len() { b[b.len() - 1 - i] } else { 1 };
        out[rank - 1 - i] = match (x, y) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(out)
}

/// Moves the axis at `source` so that it ends up at position `dest`.
///
/// Both positions may be negative. The result is returned in standard layout.
pub fn move_axis(
    x: &ArrayD<f64>,
    source: isize,
    dest: isize,
) -> Result<ArrayD<f64>, MarkovChainError> {
    let ndim = x.ndim();
    let required = |axis: isize| {
        if axis < 0 {
            axis.unsigned_abs()
        } else {
            axis as usize + 1
        }
    };
    let min_rank = required(source).max(required(dest));
    let invalid = || MarkovChainError::InvalidRank {
        rank: ndim,
        min_rank,
    };
    let src = normalize_axis(source, ndim).ok_or_else(invalid)?;
    let dst = normalize_axis(dest, ndim).ok_or_else(invalid)?;
    if src == dst {
        return Ok(x.clone());
    }
    let mut perm: Vec<usize> = (0..ndim).filter(|&a| a != src).collect();
    perm.insert(dst, src);
    Ok(x.view()
        .permuted_axes(perm)
        .as_standard_layout()
        .into_owned())
}

/// Stacks equally shaped arrays along a new leading axis.
pub fn stack_arrays(
    arrays: &[ArrayViewD<'_, f64>],
    reason: &str,
) -> Result<ArrayD<f64>, MarkovChainError> {
    let first = arrays
        .first()
        .ok_or_else(|| MarkovChainError::InvalidParameter {
            reason: "cannot stack an empty sequence of arrays".to_string(),
        })?;
    if let Some(other) = arrays.iter().find(|a| a.shape() != first.shape()) {
        return Err(MarkovChainError::ShapeMismatch {
            reason: reason.to_string(),
            left: first.shape().to_vec(),
            right: other.shape().to_vec(),
        });
    }
    ndarray::stack(Axis(0), arrays).map_err(|e| MarkovChainError::ShapeMismatch {
        reason: format!("{reason} ({e})"),
        left: first.shape().to_vec(),
        right: first.shape().to_vec(),
    })
}

/// Stacks a sequence of states leaf by leaf along a new leading axis.
///
/// Every state must share the schema of the first one.
pub fn stack_states(states: &[State]) -> Result<State, MarkovChainError> {
    let template = states
        .first()
        .ok_or_else(|| MarkovChainError::InvalidParameter {
            reason: "cannot stack an empty sequence of states".to_string(),
        })?;
    let mut columns: Vec<Vec<ArrayViewD<'_, f64>>> = (0..template.num_leaves())
        .map(|_| Vec::with_capacity(states.len()))
        .collect();
    for state in states {
        template.assert_same_structure(state)?;
        for (column, leaf) in columns.iter_mut().zip(state.leaves()) {
            column.push(leaf.view());
        }
    }
    let stacked = columns
        .iter()
        .map(|views| {
            stack_arrays(
                views,
                "The shape of a transition sample does not match the shape of the initial \
                 state sample.",
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    template.unflatten(stacked)
}
