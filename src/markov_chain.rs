/*!
A distribution over fully observed Markov chains.

A [`MarkovChain`] is built from an initial state prior and a transition rule
mapping `(step, previous_state)` to a distribution over the next state. Its
samples carry, for every leaf of the prior's state, a step axis placed right
before that leaf's own event dimensions:

`sample_shape ++ batch_shape ++ [num_steps] ++ leaf_event_shape`

Sampling runs the transition rule once per step, in order. Density evaluation
calls it exactly once: the step indices, previous states and next states each
carry an extra leading axis of length `num_steps - 1`, which the transition
distribution treats as an ordinary batch dimension. Any valid transition rule
must therefore accept both a [`Step::Scalar`] with a single state and a
[`Step::Batch`] with a stacked state.

# Examples

```rust
use mini_markov::distributions::{Distribution, Normal};
use mini_markov::markov_chain::MarkovChain;
use mini_markov::seed::Seed;

// A Gaussian random walk of length 10.
let walk = MarkovChain::new(
    Normal::standard(),
    |_step, x| Ok(Normal::new(x.try_leaf()?.clone(), ndarray::arr0(1.0).into_dyn())?.boxed()),
    10,
)
.unwrap();

let x = walk.sample(&[4], Seed::new(42)).unwrap();
assert_eq!(x.try_leaf().unwrap().shape(), &[4, 10]);
assert_eq!(walk.log_prob(&x).unwrap().shape(), &[4]);
```
*/

use std::fmt;
use std::iter;
use std::sync::Arc;

use ndarray::{arr0, Array1, ArrayD, IxDyn};
use tracing::debug;

use crate::distributions::{DType, Distribution};
use crate::error::MarkovChainError;
use crate::nest::{Nested, State};
use crate::sampler::SampleMode;
use crate::seed::Seed;
use crate::shape::{step_axis, TensorShape};
use crate::summation::Summation;

/// The number of steps of a chain: known at construction, or computed each
/// time an operation runs.
#[derive(Clone)]
pub enum NumSteps {
    Static(usize),
    Deferred(Arc<dyn Fn() -> usize + Send + Sync>),
}

impl NumSteps {
    /// Wraps a closure that is evaluated whenever the step count is needed.
    pub fn deferred<G>(resolve: G) -> Self
    where
        G: Fn() -> usize + Send + Sync + 'static,
    {
        NumSteps::Deferred(Arc::new(resolve))
    }

    /// The step count if it is known without running anything.
    pub fn static_value(&self) -> Option<usize> {
        match self {
            NumSteps::Static(n) => Some(*n),
            NumSteps::Deferred(_) => None,
        }
    }

    /// Returns the concrete step count, which must be at least one.
    pub fn resolve(&self) -> Result<usize, MarkovChainError> {
        let num_steps = match self {
            NumSteps::Static(n) => *n,
            NumSteps::Deferred(resolve) => resolve(),
        };
        if num_steps < 1 {
            return Err(MarkovChainError::InvalidStepCount { num_steps });
        }
        Ok(num_steps)
    }
}

impl From<usize> for NumSteps {
    fn from(num_steps: usize) -> Self {
        NumSteps::Static(num_steps)
    }
}

impl fmt::Debug for NumSteps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumSteps::Static(n) => f.debug_tuple("Static").field(n).finish(),
            NumSteps::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// The step index argument of a transition rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A single step, while sampling.
    Scalar(usize),
    /// All steps `0..num_steps - 1` at once, while evaluating densities.
    Batch(Array1<usize>),
}

impl Step {
    /// The step indices represented by this argument.
    pub fn indices(&self) -> Vec<usize> {
        match self {
            Step::Scalar(t) => vec![*t],
            Step::Batch(ts) => ts.to_vec(),
        }
    }

    /**
    Looks up a per-step parameter in `table` and shapes it to broadcast
    against a state leaf of rank `ndim`.

    A scalar step yields a 0-d array. A batch of `n` steps yields shape
    `[n, 1, ..., 1]` with `ndim` dimensions in total, lining the steps up
    with the leading axis of the stacked state.

    # Examples

    ```rust
    use mini_markov::markov_chain::Step;
    use ndarray::{arr1, Array1};

    let scales = arr1(&[1.0, 2.0, 3.0]);
    assert_eq!(
        Step::Scalar(1).gather(&scales, 2).unwrap().shape(),
        &[] as &[usize]
    );

    let steps = Step::Batch(Array1::from_iter(0..3));
    let gathered = steps.gather(&scales, 2).unwrap();
    assert_eq!(gathered.shape(), &[3, 1]);
    assert_eq!(gathered[[2, 0]], 3.0);
    ```
    */
    pub fn gather(
        &self,
        table: &Array1<f64>,
        ndim: usize,
    ) -> Result<ArrayD<f64>, MarkovChainError> {
        let lookup = |t: usize| {
            table
                .get(t)
                .copied()
                .ok_or_else(|| MarkovChainError::InvalidParameter {
                    reason: format!(
                        "step {t} is out of range for a table of {} entries",
                        table.len()
                    ),
                })
        };
        match self {
            Step::Scalar(t) => Ok(arr0(lookup(*t)?).into_dyn()),
            Step::Batch(ts) => {
                let values = ts.iter().map(|&t| lookup(t)).collect::<Result<Vec<_>, _>>()?;
                batch_shaped(values, ndim)
            }
        }
    }

    /// The step indices as an `f64` array, shaped like [`Step::gather`]'s output.
    pub fn to_array(&self, ndim: usize) -> Result<ArrayD<f64>, MarkovChainError> {
        match self {
            Step::Scalar(t) => Ok(arr0(*t as f64).into_dyn()),
            Step::Batch(ts) => batch_shaped(ts.iter().map(|&t| t as f64).collect(), ndim),
        }
    }
}

fn batch_shaped(values: Vec<f64>, ndim: usize) -> Result<ArrayD<f64>, MarkovChainError> {
    if ndim == 0 {
        return Err(MarkovChainError::InvalidRank {
            rank: 0,
            min_rank: 1,
        });
    }
    let mut shape = vec![1; ndim];
    shape[0] = values.len();
    ArrayD::from_shape_vec(IxDyn(&shape), values).map_err(|e| MarkovChainError::InvalidParameter {
        reason: e.to_string(),
    })
}

/**
A Markov chain distribution, parameterized by:
- `P`: the initial state prior,
- `F`: the transition rule, `(step, previous_state) -> distribution`.

The chain is immutable after construction.
*/
pub struct MarkovChain<P, F> {
    prior: P,
    transition_fn: F,
    num_steps: NumSteps,
    summation: Summation,
    validate_args: bool,
}

impl<P, F> MarkovChain<P, F>
where
    P: Distribution,
    F: Fn(&Step, &State) -> Result<Box<dyn Distribution>, MarkovChainError> + Send + Sync,
{
    /**
    Creates a chain of `num_steps` states.

    A statically known `num_steps` of zero is rejected here; a deferred one is
    checked whenever it is resolved.

    # Arguments

    * `prior` - Distribution of the initial state.
    * `transition_fn` - Maps `(step, previous_state)` to the distribution of the next state.
    * `num_steps` - Chain length, a `usize` or a [`NumSteps::Deferred`].
    */
    pub fn new(
        prior: P,
        transition_fn: F,
        num_steps: impl Into<NumSteps>,
    ) -> Result<Self, MarkovChainError> {
        let num_steps = num_steps.into();
        if let Some(n) = num_steps.static_value() {
            if n < 1 {
                return Err(MarkovChainError::InvalidStepCount { num_steps: n });
            }
        }
        debug!(
            ?num_steps,
            batch_shape = %prior.batch_shape(),
            "constructed Markov chain"
        );
        Ok(Self {
            prior,
            transition_fn,
            num_steps,
            summation: Summation::Plain,
            validate_args: false,
        })
    }

    /// Reduces per-step log-densities with compensated summation.
    pub fn with_kahan_sum(mut self, use_kahan_sum: bool) -> Self {
        self.summation = Summation::from_flag(use_kahan_sum);
        self
    }

    /// Enables the optional runtime consistency checks.
    pub fn with_validate_args(mut self, validate_args: bool) -> Self {
        self.validate_args = validate_args;
        self
    }

    pub fn prior(&self) -> &P {
        &self.prior
    }

    /// Evaluates the transition rule.
    pub fn transition(
        &self,
        step: &Step,
        state: &State,
    ) -> Result<Box<dyn Distribution>, MarkovChainError> {
        (self.transition_fn)(step, state)
    }

    pub fn num_steps(&self) -> &NumSteps {
        &self.num_steps
    }

    pub fn summation(&self) -> Summation {
        self.summation
    }

    pub fn validate_args(&self) -> bool {
        self.validate_args
    }

    pub fn resolve_num_steps(&self) -> Result<usize, MarkovChainError> {
        self.num_steps.resolve()
    }

    /// Per-leaf position of the step axis, counted from the end of the leaf.
    pub fn step_axes(&self) -> Result<Nested<isize>, MarkovChainError> {
        Ok(self
            .prior
            .event_shape_tensor()?
            .map(|event| step_axis(event.len())))
    }
}

impl<P, F> Distribution for MarkovChain<P, F>
where
    P: Distribution,
    F: Fn(&Step, &State) -> Result<Box<dyn Distribution>, MarkovChainError> + Send + Sync,
{
    fn sample(&self, sample_shape: &[usize], seed: Seed) -> Result<State, MarkovChainError> {
        let (x, _) = self.sample_loop(sample_shape, seed, SampleMode::Sample)?;
        Ok(x)
    }

    fn log_prob(&self, x: &State) -> Result<ArrayD<f64>, MarkovChainError> {
        self.log_prob_impl(x)
    }

    fn sample_and_log_prob(
        &self,
        sample_shape: &[usize],
        seed: Seed,
    ) -> Result<(State, ArrayD<f64>), MarkovChainError> {
        let (x, lps) = self.sample_loop(sample_shape, seed, SampleMode::SampleAndLogProb)?;
        let lp = self.reduce_step_lps(&lps)?;
        Ok((x, lp))
    }

    fn event_shape(&self) -> Nested<TensorShape> {
        let num_steps = self.num_steps.static_value();
        self.prior
            .event_shape()
            .map(|event| event.prepend(num_steps))
    }

    fn event_shape_tensor(&self) -> Result<Nested<Vec<usize>>, MarkovChainError> {
        let num_steps = self.resolve_num_steps()?;
        Ok(self
            .prior
            .event_shape_tensor()?
            .map(|event| iter::once(num_steps).chain(event.iter().copied()).collect()))
    }

    fn batch_shape(&self) -> TensorShape {
        self.prior.batch_shape()
    }

    fn batch_shape_tensor(&self) -> Result<Vec<usize>, MarkovChainError> {
        self.prior.batch_shape_tensor()
    }

    fn dtype(&self) -> Nested<DType> {
        self.prior.dtype()
    }
}

impl<P: fmt::Debug, F> fmt::Debug for MarkovChain<P, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkovChain")
            .field("prior", &self.prior)
            .field("num_steps", &self.num_steps)
            .field("summation", &self.summation)
            .field("validate_args", &self.validate_args)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{Independent, Normal};
    use ndarray::{arr1, ArrayD};
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Transition = fn(&Step, &State) -> Result<Box<dyn Distribution>, MarkovChainError>;

    fn random_walk(_step: &Step, x: &State) -> Result<Box<dyn Distribution>, MarkovChainError> {
        let next = Normal::new(x.try_leaf()?.clone(), arr0(1.0).into_dyn())?;
        Ok(next.boxed())
    }

    #[test]
    fn rejects_zero_static_steps() {
        let res = MarkovChain::new(Normal::standard(), random_walk as Transition, 0);
        assert!(matches!(
            res,
            Err(MarkovChainError::InvalidStepCount { num_steps: 0 })
        ));
    }

    #[test]
    fn deferred_steps_are_resolved_lazily() {
        static STEPS: AtomicUsize = AtomicUsize::new(0);
        let chain = MarkovChain::new(
            Normal::standard(),
            random_walk as Transition,
            NumSteps::deferred(|| STEPS.load(Ordering::SeqCst)),
        )
        .unwrap();
        assert_eq!(
            chain.event_shape(),
            Nested::Leaf(TensorShape::new(vec![None]))
        );
        assert!(matches!(
            chain.event_shape_tensor(),
            Err(MarkovChainError::InvalidStepCount { num_steps: 0 })
        ));
        STEPS.store(4, Ordering::SeqCst);
        assert_eq!(chain.event_shape_tensor().unwrap(), Nested::Leaf(vec![4]));
    }

    #[test]
    fn event_shape_prepends_num_steps() {
        let prior = Independent::new(
            Normal::new(ArrayD::zeros(IxDyn(&[3, 2])), arr0(1.0).into_dyn()).unwrap(),
            1,
        )
        .unwrap();
        let chain = MarkovChain::new(prior, random_walk as Transition, 8).unwrap();
        assert_eq!(
            chain.event_shape(),
            Nested::Leaf(TensorShape::from_dims(&[8, 2]))
        );
        assert_eq!(
            chain.event_shape_tensor().unwrap(),
            Nested::Leaf(vec![8, 2])
        );
        assert_eq!(chain.batch_shape_tensor().unwrap(), vec![3]);
        assert_eq!(chain.step_axes().unwrap(), Nested::Leaf(-2));
    }

    #[test]
    fn builders_set_flags() {
        let chain = MarkovChain::new(Normal::standard(), random_walk as Transition, 2)
            .unwrap()
            .with_kahan_sum(true)
            .with_validate_args(true);
        assert_eq!(chain.summation(), Summation::Kahan);
        assert!(chain.validate_args());
        assert!(format!("{chain:?}").contains("Static(2)"));
    }

    #[test]
    fn gather_shapes_batch_steps() {
        let table = arr1(&[0.5, 1.5, 2.5]);
        let steps = Step::Batch(Array1::from_iter(1..3));
        let g = steps.gather(&table, 3).unwrap();
        assert_eq!(g.shape(), &[2, 1, 1]);
        assert_eq!(g[[0, 0, 0]], 1.5);
        assert!(Step::Scalar(3).gather(&table, 1).is_err());
        assert!(steps.gather(&table, 0).is_err());
        assert_eq!(Step::Scalar(2).to_array(4).unwrap(), arr0(2.0).into_dyn());
        assert_eq!(steps.indices(), vec![1, 2]);
    }
}
