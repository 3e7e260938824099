//! Nested containers for structured chain states.
//!
//! A [`Nested`] value is a tree whose leaves carry arrays (or shapes, axes,
//! dtypes, ...). The schema of a chain's state is fixed once by the initial
//! state prior; every elementwise operation on states walks two trees in
//! lockstep and fails if their schemas diverge.
//!
//! ```rust
//! use mini_markov::nest::Nested;
//!
//! let shapes = Nested::dict([
//!     ("level", Nested::Leaf(vec![])),
//!     ("coefs", Nested::Leaf(vec![2])),
//! ]);
//! let ranks = shapes.map(|s| s.len());
//! // Leaves are visited in sorted key order.
//! assert_eq!(ranks.leaves(), vec![&1, &0]);
//! ```

use std::collections::BTreeMap;

use ndarray::ArrayD;

use crate::error::MarkovChainError;

/// A state of a Markov chain: a tree of `f64` arrays.
pub type State = Nested<ArrayD<f64>>;

/// A tree with values of type `T` at its leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum Nested<T> {
    /// A single value.
    Leaf(T),
    /// An ordered sequence of subtrees.
    List(Vec<Nested<T>>),
    /// Named subtrees, traversed in sorted key order.
    Dict(BTreeMap<String, Nested<T>>),
}

impl<T> Nested<T> {
    /// Builds a `Dict` node from `(name, subtree)` pairs.
    pub fn dict<K, I>(items: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Nested<T>)>,
    {
        Nested::Dict(items.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns the leaf value if this node is a leaf.
    pub fn as_leaf(&self) -> Option<&T> {
        match self {
            Nested::Leaf(x) => Some(x),
            _ => None,
        }
    }

    /// Like [`Nested::as_leaf`], but reports a structure error for non-leaf nodes.
    pub fn try_leaf(&self) -> Result<&T, MarkovChainError> {
        self.as_leaf()
            .ok_or_else(|| MarkovChainError::StructureMismatch {
                reason: "expected a single array, found a nested structure".to_string(),
            })
    }

    /// Looks up a named child of a `Dict` node.
    pub fn get(&self, key: &str) -> Option<&Nested<T>> {
        match self {
            Nested::Dict(items) => items.get(key),
            _ => None,
        }
    }

    /// Returns references to all leaves in depth-first order.
    pub fn leaves(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Nested::Leaf(x) => out.push(x),
            Nested::List(items) => {
                for item in items {
                    item.collect_leaves(&mut *out);
                }
            }
            Nested::Dict(items) => {
                for item in items.values() {
                    item.collect_leaves(&mut *out);
                }
            }
        }
    }

    /// Number of leaves in the tree.
    pub fn num_leaves(&self) -> usize {
        match self {
            Nested::Leaf(_) => 1,
            Nested::List(items) => items.iter().map(Nested::num_leaves).sum(),
            Nested::Dict(items) => items.values().map(Nested::num_leaves).sum(),
        }
    }

    /// Applies `f` to every leaf, preserving the structure.
    pub fn map<U, F>(&self, mut f: F) -> Nested<U>
    where
        F: FnMut(&T) -> U,
    {
        self.map_inner(&mut f)
    }

    fn map_inner<U, F>(&self, f: &mut F) -> Nested<U>
    where
        F: FnMut(&T) -> U,
    {
        match self {
            Nested::Leaf(x) => Nested::Leaf(f(x)),
            Nested::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.map_inner(&mut *f));
                }
                Nested::List(out)
            }
            Nested::Dict(items) => {
                let mut out = BTreeMap::new();
                for (key, item) in items {
                    out.insert(key.clone(), item.map_inner(&mut *f));
                }
                Nested::Dict(out)
            }
        }
    }

    /// Applies a fallible `f` to every leaf, stopping at the first error.
    pub fn try_map<U, E, F>(&self, mut f: F) -> Result<Nested<U>, E>
    where
        F: FnMut(&T) -> Result<U, E>,
    {
        self.try_map_inner(&mut f)
    }

    fn try_map_inner<U, E, F>(&self, f: &mut F) -> Result<Nested<U>, E>
    where
        F: FnMut(&T) -> Result<U, E>,
    {
        Ok(match self {
            Nested::Leaf(x) => Nested::Leaf(f(x)?),
            Nested::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.try_map_inner(&mut *f)?);
                }
                Nested::List(out)
            }
            Nested::Dict(items) => {
                let mut out = BTreeMap::new();
                for (key, item) in items {
                    out.insert(key.clone(), item.try_map_inner(&mut *f)?);
                }
                Nested::Dict(out)
            }
        })
    }

    /// Walks `self` and `other` in lockstep, combining matching leaves with `f`.
    ///
    /// Fails with [`MarkovChainError::StructureMismatch`] if the two trees do
    /// not share the same schema.
    pub fn zip_with<U, V, F>(
        &self,
        other: &Nested<U>,
        mut f: F,
    ) -> Result<Nested<V>, MarkovChainError>
    where
        F: FnMut(&T, &U) -> Result<V, MarkovChainError>,
    {
        self.zip_inner(other, &mut f)
    }

    fn zip_inner<U, V, F>(
        &self,
        other: &Nested<U>,
        f: &mut F,
    ) -> Result<Nested<V>, MarkovChainError>
    where
        F: FnMut(&T, &U) -> Result<V, MarkovChainError>,
    {
        match (self, other) {
            (Nested::Leaf(a), Nested::Leaf(b)) => Ok(Nested::Leaf(f(a, b)?)),
            (Nested::List(a), Nested::List(b)) if a.len() == b.len() => {
                let mut out = Vec::with_capacity(a.len());
                for (x, y) in a.iter().zip(b) {
                    out.push(x.zip_inner(y, &mut *f)?);
                }
                Ok(Nested::List(out))
            }
            (Nested::Dict(a), Nested::Dict(b)) if a.keys().eq(b.keys()) => {
                let mut out = BTreeMap::new();
                for ((key, x), y) in a.iter().zip(b.values()) {
                    out.insert(key.clone(), x.zip_inner(y, &mut *f)?);
                }
                Ok(Nested::Dict(out))
            }
            _ => Err(MarkovChainError::StructureMismatch {
                reason: format!(
                    "expected {}, found {}",
                    self.describe(),
                    other.describe()
                ),
            }),
        }
    }

    /// Returns `true` if both trees have the same schema.
    pub fn same_structure<U>(&self, other: &Nested<U>) -> bool {
        match (self, other) {
            (Nested::Leaf(_), Nested::Leaf(_)) => true,
            (Nested::List(a), Nested::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.same_structure(y))
            }
            (Nested::Dict(a), Nested::Dict(b)) => {
                a.keys().eq(b.keys())
                    && a.values().zip(b.values()).all(|(x, y)| x.same_structure(y))
            }
            _ => false,
        }
    }

    /// Fails with a structure error unless both trees have the same schema.
    pub fn assert_same_structure<U>(&self, other: &Nested<U>) -> Result<(), MarkovChainError> {
        if self.same_structure(other) {
            Ok(())
        } else {
            Err(MarkovChainError::StructureMismatch {
                reason: format!(
                    "expected {}, found {}",
                    self.describe(),
                    other.describe()
                ),
            })
        }
    }

    /// Rebuilds a tree shaped like `self` from depth-first ordered leaves.
    pub fn unflatten<U>(&self, leaves: Vec<U>) -> Result<Nested<U>, MarkovChainError> {
        let expected = self.num_leaves();
        if leaves.len() != expected {
            return Err(MarkovChainError::StructureMismatch {
                reason: format!("expected {expected} leaves, found {}", leaves.len()),
            });
        }
        let mut iter = leaves.into_iter();
        self.unflatten_inner(&mut iter)
            .ok_or_else(|| MarkovChainError::StructureMismatch {
                reason: "ran out of leaves while unflattening".to_string(),
            })
    }

    fn unflatten_inner<U, I>(&self, leaves: &mut I) -> Option<Nested<U>>
    where
        I: Iterator<Item = U>,
    {
        Some(match self {
            Nested::Leaf(_) => Nested::Leaf(leaves.next()?),
            Nested::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.unflatten_inner(&mut *leaves)?);
                }
                Nested::List(out)
            }
            Nested::Dict(items) => {
                let mut out = BTreeMap::new();
                for (key, item) in items {
                    out.insert(key.clone(), item.unflatten_inner(&mut *leaves)?);
                }
                Nested::Dict(out)
            }
        })
    }

    fn describe(&self) -> String {
        match self {
            Nested::Leaf(_) => "a leaf".to_string(),
            Nested::List(items) => format!("a list of {} items", items.len()),
            Nested::Dict(items) => format!(
                "a dict with keys {:?}",
                items.keys().collect::<Vec<_>>()
            ),
        }
    }
}

impl<T> From<T> for Nested<T> {
    fn from(value: T) -> Self {
        Nested::Leaf(value)
    }
}
