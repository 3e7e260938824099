//! Log-density ratios between two chains sharing one state structure.
//!
//! The ratio is formed from the decomposed log-densities: prior parts and
//! per-step transition parts are subtracted first and the step axis is
//! reduced once, with compensated summation if either chain asks for it.

use ndarray::{ArrayD, Axis};

use crate::distributions::Distribution;
use crate::error::MarkovChainError;
use crate::log_prob::assert_same_shape;
use crate::markov_chain::{MarkovChain, Step};
use crate::nest::State;
use crate::summation::Summation;

/// A distribution whose log-density decomposes into a prior part and per-step parts.
pub trait LogProbParts {
    /// Returns `(prior_lp, transition_lps)`, the latter with a leading step axis.
    fn log_prob_parts(&self, x: &State) -> Result<(ArrayD<f64>, ArrayD<f64>), MarkovChainError>;

    /// Strategy used to reduce the per-step parts.
    fn summation(&self) -> Summation;
}

impl<P, F> LogProbParts for MarkovChain<P, F>
where
    P: Distribution,
    F: Fn(&Step, &State) -> Result<Box<dyn Distribution>, MarkovChainError> + Send + Sync,
{
    fn log_prob_parts(&self, x: &State) -> Result<(ArrayD<f64>, ArrayD<f64>), MarkovChainError> {
        MarkovChain::log_prob_parts(self, x)
    }

    fn summation(&self) -> Summation {
        MarkovChain::summation(self)
    }
}

fn subtract(what: &str, p: ArrayD<f64>, q: ArrayD<f64>) -> Result<ArrayD<f64>, MarkovChainError> {
    if p.shape() != q.shape() {
        return Err(MarkovChainError::ShapeMismatch {
            reason: format!("The {what} log-densities of the two chains differ in shape."),
            left: p.shape().to_vec(),
            right: q.shape().to_vec(),
        });
    }
    Ok(p - q)
}

/**
Computes `log p(x) - log q(y)` for two chains `p` and `q`.

# Examples

```rust
use mini_markov::distributions::{Distribution, Normal};
use mini_markov::log_prob_ratio::log_prob_ratio;
use mini_markov::markov_chain::MarkovChain;
use mini_markov::seed::Seed;
use ndarray::arr0;

let make = |scale: f64| {
    MarkovChain::new(
        Normal::standard(),
        move |_step, x| Ok(Normal::new(x.try_leaf()?.clone(), arr0(scale).into_dyn())?.boxed()),
        5,
    )
    .unwrap()
};
let (p, q) = (make(1.0), make(2.0));
let x = p.sample(&[3], Seed::new(0)).unwrap();
let y = q.sample(&[3], Seed::new(1)).unwrap();

let ratio = log_prob_ratio(&p, &x, &q, &y).unwrap();
let direct = p.log_prob(&x).unwrap() - q.log_prob(&y).unwrap();
assert!(ratio.iter().zip(direct.iter()).all(|(a, b)| (a - b).abs() < 1e-9));
```
*/
pub fn log_prob_ratio<Pd, Qd>(
    p: &Pd,
    x: &State,
    q: &Qd,
    y: &State,
) -> Result<ArrayD<f64>, MarkovChainError>
where
    Pd: LogProbParts + ?Sized,
    Qd: LogProbParts + ?Sized,
{
    let (p_prior_lp, p_transition_lps) = p.log_prob_parts(x)?;
    let (q_prior_lp, q_transition_lps) = q.log_prob_parts(y)?;
    let prior_lp_ratio = subtract("prior", p_prior_lp, q_prior_lp)?;
    let transition_lp_ratios = subtract("transition", p_transition_lps, q_transition_lps)?;

    let summation = p.summation().either(q.summation());
    let transition_lp_ratio = summation.reduce(&transition_lp_ratios, Axis(0));
    assert_same_shape(&prior_lp_ratio, &transition_lp_ratio)?;
    Ok(prior_lp_ratio + transition_lp_ratio)
}
