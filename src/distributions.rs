/*!
The distribution interface consumed by [`MarkovChain`](crate::markov_chain::MarkovChain),
plus the handful of families needed to express priors and transition rules.

Every distribution draws and scores [`State`]s: trees of `f64` arrays. A
distribution has a *batch shape* (independent, non-identically parameterized
instances) and, per leaf, an *event shape* (the dimensions of a single draw).
Draws have shape `sample_shape ++ batch_shape ++ event_shape`; log-densities
have shape `sample_shape ++ batch_shape`.

Sampling is stateless: each call receives a [`Seed`] and always produces the
same draw for the same seed.

# Examples

```rust
use mini_markov::distributions::{Distribution, Normal};
use mini_markov::seed::Seed;
use ndarray::{arr0, arr1};

// A batch of three normals with different locations.
let normal = Normal::new(arr1(&[-10.0, 0.0, 10.0]).into_dyn(), arr0(1.0).into_dyn()).unwrap();
let x = normal.sample(&[5], Seed::new(42)).unwrap();
assert_eq!(x.try_leaf().unwrap().shape(), &[5, 3]);

let lp = normal.log_prob(&x).unwrap();
assert_eq!(lp.shape(), &[5, 3]);
```
*/

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{arr0, Array2, ArrayD, ArrayView1, ArrayViewD, Axis, IxDyn, Zip};
use ndarray_stats::QuantileExt;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::MarkovChainError;
use crate::nest::{Nested, State};
use crate::seed::Seed;
use crate::shape::{broadcast_shapes, TensorShape};

/// `0.5 * ln(2 * pi)`
const HALF_LN_2PI: f64 = 0.918_938_533_204_672_8;

/// Elementwise densities over at least this many elements are evaluated on the rayon pool.
const PARALLEL_THRESHOLD: usize = 1 << 14;

/// Element type of a state leaf. Storage is always `f64`; `I64` marks
/// integer-valued (categorical) leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F64,
    I64,
}

/// A probability distribution over (possibly nested) array-valued states.
pub trait Distribution: Send + Sync {
    /// Draws a sample of shape `sample_shape ++ batch_shape ++ event_shape` per leaf.
    fn sample(&self, sample_shape: &[usize], seed: Seed) -> Result<State, MarkovChainError>;

    /// Evaluates the log-density of `x`, reducing over event dimensions.
    fn log_prob(&self, x: &State) -> Result<ArrayD<f64>, MarkovChainError>;

    /// Draws a sample together with its log-density.
    fn sample_and_log_prob(
        &self,
        sample_shape: &[usize],
        seed: Seed,
    ) -> Result<(State, ArrayD<f64>), MarkovChainError> {
        let x = self.sample(sample_shape, seed)?;
        let lp = self.log_prob(&x)?;
        Ok((x, lp))
    }

    /// Static per-leaf event shape.
    fn event_shape(&self) -> Nested<TensorShape>;

    /// Concrete per-leaf event shape.
    fn event_shape_tensor(&self) -> Result<Nested<Vec<usize>>, MarkovChainError>;

    /// Static batch shape.
    fn batch_shape(&self) -> TensorShape;

    /// Concrete batch shape.
    fn batch_shape_tensor(&self) -> Result<Vec<usize>, MarkovChainError>;

    /// Per-leaf element type.
    fn dtype(&self) -> Nested<DType>;

    /// Moves `self` into a trait object, as returned by transition rules.
    fn boxed(self) -> Box<dyn Distribution>
    where
        Self: Sized + 'static,
    {
        Box::new(self)
    }
}

impl<D: Distribution + ?Sized> Distribution for Box<D> {
    fn sample(&self, sample_shape: &[usize], seed: Seed) -> Result<State, MarkovChainError> {
        (**self).sample(sample_shape, seed)
    }

    fn log_prob(&self, x: &State) -> Result<ArrayD<f64>, MarkovChainError> {
        (**self).log_prob(x)
    }

    fn sample_and_log_prob(
        &self,
        sample_shape: &[usize],
        seed: Seed,
    ) -> Result<(State, ArrayD<f64>), MarkovChainError> {
        (**self).sample_and_log_prob(sample_shape, seed)
    }

    fn event_shape(&self) -> Nested<TensorShape> {
        (**self).event_shape()
    }

    fn event_shape_tensor(&self) -> Result<Nested<Vec<usize>>, MarkovChainError> {
        (**self).event_shape_tensor()
    }

    fn batch_shape(&self) -> TensorShape {
        (**self).batch_shape()
    }

    fn batch_shape_tensor(&self) -> Result<Vec<usize>, MarkovChainError> {
        (**self).batch_shape_tensor()
    }

    fn dtype(&self) -> Nested<DType> {
        (**self).dtype()
    }
}

fn broadcast_to<'a>(
    x: &'a ArrayD<f64>,
    shape: &[usize],
) -> Result<ArrayViewD<'a, f64>, MarkovChainError> {
    x.broadcast(shape)
        .ok_or_else(|| MarkovChainError::ShapeMismatch {
            reason: "Array does not broadcast to the requested shape.".to_string(),
            left: shape.to_vec(),
            right: x.shape().to_vec(),
        })
}

fn draw_shape(sample_shape: &[usize], batch_shape: &[usize]) -> Vec<usize> {
    sample_shape.iter().chain(batch_shape).copied().collect()
}

/**
A batch of univariate normal distributions, parameterized by `loc` and `scale`
arrays that broadcast against each other.

# Examples

```rust
use mini_markov::distributions::{Distribution, Normal};
use mini_markov::nest::Nested;
use ndarray::arr0;

let normal = Normal::scalar(0.0, 1.0).unwrap();
let lp = normal.log_prob(&Nested::Leaf(arr0(0.5).into_dyn())).unwrap();
assert!((lp[[]] + 1.0439385332046727).abs() < 1e-12);
```
*/
#[derive(Debug, Clone)]
pub struct Normal {
    loc: ArrayD<f64>,
    scale: ArrayD<f64>,
    batch_shape: Vec<usize>,
}

impl Normal {
    /// Creates a batch of normals. `scale` must be strictly positive.
    pub fn new(loc: ArrayD<f64>, scale: ArrayD<f64>) -> Result<Self, MarkovChainError> {
        let batch_shape = broadcast_shapes(loc.shape(), scale.shape()).ok_or_else(|| {
            MarkovChainError::ShapeMismatch {
                reason: "Normal: `loc` and `scale` do not broadcast.".to_string(),
                left: loc.shape().to_vec(),
                right: scale.shape().to_vec(),
            }
        })?;
        if let Some(s) = scale.iter().find(|&&s| !(s > 0.0)) {
            return Err(MarkovChainError::InvalidParameter {
                reason: format!("Normal: `scale` must be positive, got {s}"),
            });
        }
        Ok(Self {
            loc,
            scale,
            batch_shape,
        })
    }

    /// A single (unbatched) normal.
    pub fn scalar(loc: f64, scale: f64) -> Result<Self, MarkovChainError> {
        Self::new(arr0(loc).into_dyn(), arr0(scale).into_dyn())
    }

    /// The standard normal `N(0, 1)`.
    pub fn standard() -> Self {
        Self {
            loc: arr0(0.0).into_dyn(),
            scale: arr0(1.0).into_dyn(),
            batch_shape: vec![],
        }
    }

    pub fn loc(&self) -> &ArrayD<f64> {
        &self.loc
    }

    pub fn scale(&self) -> &ArrayD<f64> {
        &self.scale
    }
}

impl Distribution for Normal {
    fn sample(&self, sample_shape: &[usize], seed: Seed) -> Result<State, MarkovChainError> {
        let shape = draw_shape(sample_shape, &self.batch_shape);
        let loc = broadcast_to(&self.loc, &shape)?;
        let scale = broadcast_to(&self.scale, &shape)?;

        let mut rng = seed.rng();
        let mut out =
            ArrayD::<f64>::from_shape_simple_fn(IxDyn(&shape), || rng.sample(StandardNormal));
        Zip::from(&mut out)
            .and(&loc)
            .and(&scale)
            .for_each(|x, &m, &s| *x = m + s * *x);
        Ok(Nested::Leaf(out))
    }

    fn log_prob(&self, x: &State) -> Result<ArrayD<f64>, MarkovChainError> {
        let x = x.try_leaf()?;
        let shape = broadcast_shapes(x.shape(), &self.batch_shape).ok_or_else(|| {
            MarkovChainError::ShapeMismatch {
                reason: "Normal: value does not broadcast against the batch shape.".to_string(),
                left: self.batch_shape.clone(),
                right: x.shape().to_vec(),
            }
        })?;
        let x = broadcast_to(x, &shape)?;
        let loc = broadcast_to(&self.loc, &shape)?;
        let scale = broadcast_to(&self.scale, &shape)?;

        let density = |&x: &f64, &m: &f64, &s: &f64| {
            let z = (x - m) / s;
            -0.5 * z * z - s.ln() - HALF_LN_2PI
        };
        let zip = Zip::from(&x).and(&loc).and(&scale);
        if x.len() >= PARALLEL_THRESHOLD {
            Ok(zip.par_map_collect(density))
        } else {
            Ok(zip.map_collect(density))
        }
    }

    fn event_shape(&self) -> Nested<TensorShape> {
        Nested::Leaf(TensorShape::scalar())
    }

    fn event_shape_tensor(&self) -> Result<Nested<Vec<usize>>, MarkovChainError> {
        Ok(Nested::Leaf(vec![]))
    }

    fn batch_shape(&self) -> TensorShape {
        TensorShape::from_dims(&self.batch_shape)
    }

    fn batch_shape_tensor(&self) -> Result<Vec<usize>, MarkovChainError> {
        Ok(self.batch_shape.clone())
    }

    fn dtype(&self) -> Nested<DType> {
        Nested::Leaf(DType::F64)
    }
}

/**
A batch of categorical distributions over the last axis of `logits`.

Values are category indices stored as `f64`. Indices that are negative,
non-integral or out of range have log-probability `-inf`.

# Examples

```rust
use mini_markov::distributions::{Categorical, Distribution};
use mini_markov::nest::Nested;
use ndarray::{arr0, arr1};

let cat = Categorical::from_probs(arr1(&[0.2, 0.3, 0.5]).into_dyn()).unwrap();
let lp = cat.log_prob(&Nested::Leaf(arr0(2.0).into_dyn())).unwrap();
assert!((lp[[]] - 0.5f64.ln()).abs() < 1e-12);
```
*/
#[derive(Debug, Clone)]
pub struct Categorical {
    /// Normalized log-probabilities, `[n_batch, n_categories]`.
    log_probs: Array2<f64>,
    batch_shape: Vec<usize>,
}

impl Categorical {
    /// Creates categoricals from unnormalized log-probabilities.
    pub fn from_logits(logits: ArrayD<f64>) -> Result<Self, MarkovChainError> {
        let (&k, batch) = logits
            .shape()
            .split_last()
            .ok_or(MarkovChainError::InvalidRank {
                rank: 0,
                min_rank: 1,
            })?;
        if k == 0 {
            return Err(MarkovChainError::InvalidParameter {
                reason: "Categorical: need at least one category".to_string(),
            });
        }
        let batch_shape = batch.to_vec();
        let n_batch: usize = batch_shape.iter().product();
        let flat: Vec<f64> = logits.iter().copied().collect();
        let mut log_probs = Array2::from_shape_vec((n_batch, k), flat).map_err(|e| {
            MarkovChainError::InvalidParameter {
                reason: format!("Categorical: {e}"),
            }
        })?;
        for mut row in log_probs.rows_mut() {
            let max = *row.max_skipnan();
            if !max.is_finite() {
                return Err(MarkovChainError::InvalidParameter {
                    reason: "Categorical: every row of logits needs a finite maximum".to_string(),
                });
            }
            let log_norm = max + row.iter().map(|&l| (l - max).exp()).sum::<f64>().ln();
            row.mapv_inplace(|l| l - log_norm);
        }
        Ok(Self {
            log_probs,
            batch_shape,
        })
    }

    /// Creates categoricals from (possibly unnormalized) probabilities.
    pub fn from_probs(probs: ArrayD<f64>) -> Result<Self, MarkovChainError> {
        if let Some(p) = probs.iter().find(|&&p| !(p >= 0.0)) {
            return Err(MarkovChainError::InvalidParameter {
                reason: format!("Categorical: probabilities must be non-negative, got {p}"),
            });
        }
        Self::from_logits(probs.mapv(f64::ln))
    }

    pub fn num_categories(&self) -> usize {
        self.log_probs.ncols()
    }

    /// Normalized probabilities with shape `batch_shape ++ [n_categories]`.
    pub fn probs(&self) -> Result<ArrayD<f64>, MarkovChainError> {
        let mut shape = self.batch_shape.clone();
        shape.push(self.num_categories());
        let probs = self.log_probs.iter().map(|lp| lp.exp()).collect();
        ArrayD::from_shape_vec(IxDyn(&shape), probs).map_err(|e| {
            MarkovChainError::ShapeMismatch {
                reason: format!("Categorical: cannot reshape probabilities ({e})"),
                left: shape.clone(),
                right: vec![self.log_probs.nrows(), self.num_categories()],
            }
        })
    }
}

fn draw_category<R: Rng>(log_probs: ArrayView1<'_, f64>, rng: &mut R) -> usize {
    let r: f64 = rng.gen();
    let mut cum = 0.0;
    for (i, &lp) in log_probs.iter().enumerate() {
        cum += lp.exp();
        if r < cum {
            return i;
        }
    }
    log_probs.len() - 1
}

impl Distribution for Categorical {
    fn sample(&self, sample_shape: &[usize], seed: Seed) -> Result<State, MarkovChainError> {
        let shape = draw_shape(sample_shape, &self.batch_shape);
        let total: usize = shape.iter().product();
        let n_batch = self.log_probs.nrows();
        let mut rng = seed.rng();
        // Batch dims are trailing, so row-major position `i` belongs to batch member `i % n_batch`.
        let draws: Vec<f64> = (0..total)
            .map(|i| draw_category(self.log_probs.row(i % n_batch), &mut rng) as f64)
            .collect();
        let out = ArrayD::from_shape_vec(IxDyn(&shape), draws).map_err(|e| {
            MarkovChainError::InvalidParameter {
                reason: format!("Categorical: {e}"),
            }
        })?;
        Ok(Nested::Leaf(out))
    }

    fn log_prob(&self, x: &State) -> Result<ArrayD<f64>, MarkovChainError> {
        let x = x.try_leaf()?;
        let shape = broadcast_shapes(x.shape(), &self.batch_shape).ok_or_else(|| {
            MarkovChainError::ShapeMismatch {
                reason: "Categorical: value does not broadcast against the batch shape."
                    .to_string(),
                left: self.batch_shape.clone(),
                right: x.shape().to_vec(),
            }
        })?;
        let n_batch = self.log_probs.nrows();
        let k = self.num_categories();
        let batch_index = ArrayD::from_shape_vec(
            IxDyn(&self.batch_shape),
            (0..n_batch).map(|b| b as f64).collect(),
        )
        .map_err(|e| MarkovChainError::InvalidParameter {
            reason: format!("Categorical: {e}"),
        })?;
        let x = broadcast_to(x, &shape)?;
        let batch_index = broadcast_to(&batch_index, &shape)?;

        Ok(Zip::from(&x).and(&batch_index).map_collect(|&v, &b| {
            if v >= 0.0 && v.fract() == 0.0 && (v as usize) < k {
                self.log_probs[[b as usize, v as usize]]
            } else {
                f64::NEG_INFINITY
            }
        }))
    }

    fn event_shape(&self) -> Nested<TensorShape> {
        Nested::Leaf(TensorShape::scalar())
    }

    fn event_shape_tensor(&self) -> Result<Nested<Vec<usize>>, MarkovChainError> {
        Ok(Nested::Leaf(vec![]))
    }

    fn batch_shape(&self) -> TensorShape {
        TensorShape::from_dims(&self.batch_shape)
    }

    fn batch_shape_tensor(&self) -> Result<Vec<usize>, MarkovChainError> {
        Ok(self.batch_shape.clone())
    }

    fn dtype(&self) -> Nested<DType> {
        Nested::Leaf(DType::I64)
    }
}

/// Reinterprets the rightmost `reinterpreted_batch_ndims` batch dimensions of
/// `inner` as event dimensions; their log-densities are summed.
#[derive(Debug, Clone)]
pub struct Independent<D> {
    inner: D,
    reinterpreted_batch_ndims: usize,
}

impl<D: Distribution> Independent<D> {
    pub fn new(inner: D, reinterpreted_batch_ndims: usize) -> Result<Self, MarkovChainError> {
        if let Some(rank) = inner.batch_shape().rank() {
            if rank < reinterpreted_batch_ndims {
                return Err(MarkovChainError::InvalidRank {
                    rank,
                    min_rank: reinterpreted_batch_ndims,
                });
            }
        }
        Ok(Self {
            inner,
            reinterpreted_batch_ndims,
        })
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    fn split_batch(&self, batch: &[usize]) -> Result<usize, MarkovChainError> {
        batch
            .len()
            .checked_sub(self.reinterpreted_batch_ndims)
            .ok_or(MarkovChainError::InvalidRank {
                rank: batch.len(),
                min_rank: self.reinterpreted_batch_ndims,
            })
    }
}

impl<D: Distribution> Distribution for Independent<D> {
    fn sample(&self, sample_shape: &[usize], seed: Seed) -> Result<State, MarkovChainError> {
        self.inner.sample(sample_shape, seed)
    }

    fn log_prob(&self, x: &State) -> Result<ArrayD<f64>, MarkovChainError> {
        let mut lp = self.inner.log_prob(x)?;
        for _ in 0..self.reinterpreted_batch_ndims {
            let last = lp
                .ndim()
                .checked_sub(1)
                .ok_or(MarkovChainError::InvalidRank {
                    rank: 0,
                    min_rank: self.reinterpreted_batch_ndims,
                })?;
            lp = lp.sum_axis(Axis(last));
        }
        Ok(lp)
    }

    fn event_shape(&self) -> Nested<TensorShape> {
        let batch = self.inner.batch_shape();
        let tail = match batch.dims() {
            Some(dims) if dims.len() >= self.reinterpreted_batch_ndims => {
                TensorShape::new(dims[dims.len() - self.reinterpreted_batch_ndims..].to_vec())
            }
            _ => TensorShape::unknown(),
        };
        self.inner
            .event_shape()
            .map(|event| tail.concatenate(event))
    }

    fn event_shape_tensor(&self) -> Result<Nested<Vec<usize>>, MarkovChainError> {
        let batch = self.inner.batch_shape_tensor()?;
        let split = self.split_batch(&batch)?;
        let tail = &batch[split..];
        Ok(self
            .inner
            .event_shape_tensor()?
            .map(|event| tail.iter().chain(event).copied().collect()))
    }

    fn batch_shape(&self) -> TensorShape {
        match self.inner.batch_shape().dims() {
            Some(dims) if dims.len() >= self.reinterpreted_batch_ndims => {
                TensorShape::new(dims[..dims.len() - self.reinterpreted_batch_ndims].to_vec())
            }
            _ => TensorShape::unknown(),
        }
    }

    fn batch_shape_tensor(&self) -> Result<Vec<usize>, MarkovChainError> {
        let batch = self.inner.batch_shape_tensor()?;
        let split = self.split_batch(&batch)?;
        Ok(batch[..split].to_vec())
    }

    fn dtype(&self) -> Nested<DType> {
        self.inner.dtype()
    }
}

/**
A joint distribution over named, mutually independent components that share
one batch shape. States are `Dict`s keyed by component name.

# Examples

```rust
use mini_markov::distributions::{Distribution, JointNamed, Normal};
use mini_markov::seed::Seed;

let joint = JointNamed::new([
    ("level", Normal::standard().boxed()),
    ("log_scale", Normal::scalar(-1.0, 0.1).unwrap().boxed()),
])
.unwrap();
let x = joint.sample(&[4], Seed::new(0)).unwrap();
assert_eq!(x.get("level").unwrap().try_leaf().unwrap().shape(), &[4]);
assert_eq!(joint.log_prob(&x).unwrap().shape(), &[4]);
```
*/
pub struct JointNamed {
    components: BTreeMap<String, Box<dyn Distribution>>,
    batch_shape: TensorShape,
}

impl JointNamed {
    pub fn new<K, I>(components: I) -> Result<Self, MarkovChainError>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Box<dyn Distribution>)>,
    {
        let components: BTreeMap<String, Box<dyn Distribution>> = components
            .into_iter()
            .map(|(name, dist)| (name.into(), dist))
            .collect();
        let mut batch_shapes = components.values().map(|c| c.batch_shape());
        let first = batch_shapes
            .next()
            .ok_or_else(|| MarkovChainError::InvalidParameter {
                reason: "JointNamed: need at least one component".to_string(),
            })?;
        for other in batch_shapes {
            if !first.is_compatible_with(&other) {
                return Err(MarkovChainError::ShapeMismatch {
                    reason: "JointNamed: components must share one batch shape.".to_string(),
                    left: first.as_fully_defined().unwrap_or_default(),
                    right: other.as_fully_defined().unwrap_or_default(),
                });
            }
        }
        Ok(Self {
            components,
            batch_shape: first,
        })
    }

    pub fn component(&self, name: &str) -> Option<&dyn Distribution> {
        self.components.get(name).map(|c| c.as_ref())
    }

}

impl fmt::Debug for JointNamed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JointNamed")
            .field("components", &self.components.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Distribution for JointNamed {
    fn sample(&self, sample_shape: &[usize], seed: Seed) -> Result<State, MarkovChainError> {
        let seeds = seed.split_with_salt(self.components.len(), "joint_named_sample");
        let mut out = BTreeMap::new();
        for ((name, component), seed) in self.components.iter().zip(seeds) {
            out.insert(name.clone(), component.sample(sample_shape, seed)?);
        }
        Ok(Nested::Dict(out))
    }

    fn log_prob(&self, x: &State) -> Result<ArrayD<f64>, MarkovChainError> {
        let Nested::Dict(parts) = x else {
            return Err(MarkovChainError::StructureMismatch {
                reason: "JointNamed: expected a dict-valued state".to_string(),
            });
        };
        if !parts.keys().eq(self.components.keys()) {
            return Err(MarkovChainError::StructureMismatch {
                reason: format!(
                    "JointNamed: expected keys {:?}, found {:?}",
                    self.components.keys().collect::<Vec<_>>(),
                    parts.keys().collect::<Vec<_>>()
                ),
            });
        }
        let mut total: Option<ArrayD<f64>> = None;
        for ((name, component), part) in self.components.iter().zip(parts.values()) {
            let lp = component.log_prob(part)?;
            total = Some(match total {
                None => lp,
                Some(acc) if acc.shape() == lp.shape() => acc + lp,
                Some(acc) => {
                    return Err(MarkovChainError::ShapeMismatch {
                        reason: format!("JointNamed: log_prob of `{name}` has a different shape."),
                        left: acc.shape().to_vec(),
                        right: lp.shape().to_vec(),
                    })
                }
            });
        }
        Ok(total.unwrap_or_else(|| ArrayD::zeros(IxDyn(&[]))))
    }

    fn event_shape(&self) -> Nested<TensorShape> {
        Nested::Dict(
            self.components
                .iter()
                .map(|(name, c)| (name.clone(), c.event_shape()))
                .collect(),
        )
    }

    fn event_shape_tensor(&self) -> Result<Nested<Vec<usize>>, MarkovChainError> {
        let mut out = BTreeMap::new();
        for (name, component) in &self.components {
            out.insert(name.clone(), component.event_shape_tensor()?);
        }
        Ok(Nested::Dict(out))
    }

    fn batch_shape(&self) -> TensorShape {
        self.batch_shape.clone()
    }

    fn batch_shape_tensor(&self) -> Result<Vec<usize>, MarkovChainError> {
        if let Some(dims) = self.batch_shape.as_fully_defined() {
            return Ok(dims);
        }
        self.components
            .values()
            .next()
            .ok_or_else(|| MarkovChainError::InvalidParameter {
                reason: "JointNamed: need at least one component".to_string(),
            })?
            .batch_shape_tensor()
    }

    fn dtype(&self) -> Nested<DType> {
        Nested::Dict(
            self.components
                .iter()
                .map(|(name, c)| (name.clone(), c.dtype()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod distributions_tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr0, arr1, arr2};

    fn leaf(x: ArrayD<f64>) -> State {
        Nested::Leaf(x)
    }

    #[test]
    fn normal_log_prob_matches_closed_form() {
        let normal = Normal::scalar(1.0, 2.0).unwrap();
        let lp = normal.log_prob(&leaf(arr0(2.0).into_dyn())).unwrap();
        let expected = -0.5 * 0.25 - 2.0f64.ln() - HALF_LN_2PI;
        assert_abs_diff_eq!(lp[[]], expected, epsilon = 1e-12);
    }

    #[test]
    fn normal_broadcasts_loc_and_scale() {
        let normal = Normal::new(
            arr1(&[-10.0, 0.0, 10.0]).into_dyn(),
            arr0(1.0).into_dyn(),
        )
        .unwrap();
        assert_eq!(normal.batch_shape_tensor().unwrap(), vec![3]);
        let x = normal.sample(&[5, 2], Seed::new(1)).unwrap();
        assert_eq!(x.try_leaf().unwrap().shape(), &[5, 2, 3]);
        assert_eq!(normal.log_prob(&x).unwrap().shape(), &[5, 2, 3]);
    }

    #[test]
    fn normal_rejects_bad_scale() {
        assert!(Normal::scalar(0.0, 0.0).is_err());
        assert!(Normal::scalar(0.0, f64::NAN).is_err());
        let (loc, scale) = (arr1(&[0.0, 1.0]), arr1(&[1.0, 1.0, 1.0]));
        assert!(Normal::new(loc.into_dyn(), scale.into_dyn()).is_err());
    }

    #[test]
    fn normal_sample_moments() {
        let normal = Normal::scalar(3.0, 0.5).unwrap();
        let x = normal.sample(&[20_000], Seed::new(11)).unwrap();
        let x = x.try_leaf().unwrap();
        let mean = x.mean().unwrap();
        let std = x.std(1.0);
        assert_abs_diff_eq!(mean, 3.0, epsilon = 0.02);
        assert_abs_diff_eq!(std, 0.5, epsilon = 0.02);
    }

    #[test]
    fn normal_sample_is_reproducible() {
        let normal = Normal::standard();
        let a = normal.sample(&[10], Seed::new(5)).unwrap();
        let b = normal.sample(&[10], Seed::new(5)).unwrap();
        let c = normal.sample(&[10], Seed::new(6)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn normal_large_log_prob_uses_parallel_path() {
        let normal = Normal::standard();
        let x = ArrayD::zeros(IxDyn(&[PARALLEL_THRESHOLD + 1]));
        let lp = normal.log_prob(&leaf(x)).unwrap();
        assert!(lp.iter().all(|&v| (v + HALF_LN_2PI).abs() < 1e-12));
    }

    #[test]
    fn categorical_log_prob_and_out_of_range() {
        let cat = Categorical::from_probs(arr2(&[[0.2, 0.8], [0.5, 0.5]]).into_dyn()).unwrap();
        assert_eq!(cat.batch_shape_tensor().unwrap(), vec![2]);
        let lp = cat.log_prob(&leaf(arr1(&[1.0, 0.0]).into_dyn())).unwrap();
        assert_abs_diff_eq!(lp[[0]], 0.8f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(lp[[1]], 0.5f64.ln(), epsilon = 1e-12);

        let bad = cat.log_prob(&leaf(arr1(&[2.0, -1.0]).into_dyn())).unwrap();
        assert!(bad.iter().all(|&v| v == f64::NEG_INFINITY));
        let fractional = cat.log_prob(&leaf(arr1(&[0.5, 0.0]).into_dyn())).unwrap();
        assert_eq!(fractional[[0]], f64::NEG_INFINITY);
    }

    #[test]
    fn categorical_sample_frequencies() {
        let cat = Categorical::from_probs(arr1(&[0.2, 0.3, 0.5]).into_dyn()).unwrap();
        let x = cat.sample(&[20_000], Seed::new(3)).unwrap();
        let x = x.try_leaf().unwrap();
        for (k, p) in [0.2, 0.3, 0.5].iter().enumerate() {
            let freq = x.iter().filter(|&&v| v == k as f64).count() as f64 / x.len() as f64;
            assert_abs_diff_eq!(freq, *p, epsilon = 0.02);
        }
        assert_eq!(cat.dtype(), Nested::Leaf(DType::I64));
    }

    #[test]
    fn categorical_normalizes_logits() {
        let cat = Categorical::from_logits(arr1(&[0.0, 0.0]).into_dyn()).unwrap();
        assert_abs_diff_eq!(
            cat.probs().unwrap(),
            arr1(&[0.5, 0.5]).into_dyn(),
            epsilon = 1e-12
        );
        assert!(Categorical::from_logits(arr0(1.0).into_dyn()).is_err());
        let negative = arr1(&[-0.1, 1.1]).into_dyn();
        assert!(Categorical::from_probs(negative).is_err());
    }

    #[test]
    fn independent_sums_reinterpreted_dims() {
        let inner = Normal::new(ArrayD::zeros(IxDyn(&[3, 2])), arr0(1.0).into_dyn()).unwrap();
        let ind = Independent::new(inner.clone(), 1).unwrap();
        assert_eq!(ind.batch_shape_tensor().unwrap(), vec![3]);
        assert_eq!(ind.event_shape_tensor().unwrap(), Nested::Leaf(vec![2]));
        assert_eq!(
            ind.event_shape(),
            Nested::Leaf(TensorShape::from_dims(&[2]))
        );

        let x = ind.sample(&[4], Seed::new(2)).unwrap();
        let lp = ind.log_prob(&x).unwrap();
        assert_eq!(lp.shape(), &[4, 3]);
        let inner_lp = inner.log_prob(&x).unwrap();
        assert_abs_diff_eq!(lp, inner_lp.sum_axis(Axis(2)), epsilon = 1e-12);

        assert!(Independent::new(Normal::standard(), 1).is_err());
    }

    #[test]
    fn joint_named_samples_and_scores_each_component() {
        let joint = JointNamed::new([
            ("a", Normal::standard().boxed()),
            (
                "b",
                Independent::new(
                    Normal::new(ArrayD::zeros(IxDyn(&[2])), arr0(1.0).into_dyn()).unwrap(),
                    1,
                )
                .unwrap()
                .boxed(),
            ),
        ])
        .unwrap();
        let x = joint.sample(&[3], Seed::new(8)).unwrap();
        assert_eq!(x.get("a").unwrap().try_leaf().unwrap().shape(), &[3]);
        assert_eq!(x.get("b").unwrap().try_leaf().unwrap().shape(), &[3, 2]);

        let lp = joint.log_prob(&x).unwrap();
        let component_lp = |name: &str| {
            let component = joint.component(name).unwrap();
            component.log_prob(x.get(name).unwrap()).unwrap()
        };
        let expected = component_lp("a") + component_lp("b");
        assert_abs_diff_eq!(lp, expected, epsilon = 1e-12);

        assert_eq!(
            joint.event_shape_tensor().unwrap(),
            Nested::dict([("a", Nested::Leaf(vec![])), ("b", Nested::Leaf(vec![2]))])
        );
        assert!(joint.log_prob(x.get("a").unwrap()).is_err());
    }

    #[test]
    fn joint_named_reports_the_shared_batch_shape() {
        let batched = || Normal::new(ArrayD::zeros(IxDyn(&[3])), arr0(1.0).into_dyn()).unwrap();
        let joint = JointNamed::new([
            ("a", batched().boxed()),
            ("b", batched().boxed()),
        ])
        .unwrap();
        assert_eq!(joint.batch_shape(), TensorShape::from_dims(&[3]));
        assert_eq!(joint.batch_shape_tensor().unwrap(), vec![3]);
    }

    #[test]
    fn categorical_probs_keep_the_batch_shape() {
        let cat = Categorical::from_probs(arr2(&[[0.2, 0.8], [0.5, 0.5]]).into_dyn()).unwrap();
        let probs = cat.probs().unwrap();
        assert_eq!(probs.shape(), &[2, 2]);
        assert_abs_diff_eq!(
            probs,
            arr2(&[[0.2, 0.8], [0.5, 0.5]]).into_dyn(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn joint_named_rejects_mismatched_batch_shapes() {
        let res = JointNamed::new([
            ("a", Normal::standard().boxed()),
            (
                "b",
                Normal::new(ArrayD::zeros(IxDyn(&[2])), arr0(1.0).into_dyn())
                    .unwrap()
                    .boxed(),
            ),
        ]);
        assert!(matches!(res, Err(MarkovChainError::ShapeMismatch { .. })));
    }
}
