//! Vectorized log-density of Markov chain trajectories.
//!
//! Each leaf's step axis is moved to the front, so a trajectory looks to the
//! transition rule like a stack of `num_steps - 1` previous states. The
//! transition rule is then evaluated once for all steps.

use ndarray::{Array1, ArrayD, Axis, IxDyn, Slice};
use tracing::debug;

use crate::distributions::Distribution;
use crate::error::MarkovChainError;
use crate::markov_chain::{MarkovChain, Step};
use crate::nest::State;
use crate::shape::move_axis;

const BATCH_SHAPE_MESSAGE: &str = "The shape of the `log_prob` returned by the transition \
    distribution does not match the `log_prob` from the initial state prior. This indicates \
    that the transition distribution's batch shape is incorrect. Please ensure that \
    `initial_state_prior.batch_shape == \
    transition_fn(0, initial_state_prior.sample()).batch_shape`.";

impl<P, F> MarkovChain<P, F>
where
    P: Distribution,
    F: Fn(&Step, &State) -> Result<Box<dyn Distribution>, MarkovChainError> + Send + Sync,
{
    /**
    Returns the prior log-density of the first state and the per-step
    transition log-densities, before reduction.

    The second array has a leading axis of length `num_steps - 1`; for a
    single-step trajectory it is empty and the transition rule is not called.
    */
    pub fn log_prob_parts(
        &self,
        x: &State,
    ) -> Result<(ArrayD<f64>, ArrayD<f64>), MarkovChainError> {
        let x = x.zip_with(&self.step_axes()?, |leaf, &axis| move_axis(leaf, axis, 0))?;
        let num_steps = self.check_step_extents(&x)?;

        let first = x.map(|leaf| leaf.index_axis(Axis(0), 0).to_owned());
        let prior_lp = self.prior().log_prob(&first)?;

        let transition_lps = if num_steps == 1 {
            let mut shape = vec![0];
            shape.extend_from_slice(prior_lp.shape());
            ArrayD::zeros(IxDyn(&shape))
        } else {
            let previous =
                x.map(|leaf| leaf.slice_axis(Axis(0), Slice::from(..num_steps - 1)).to_owned());
            let current = x.map(|leaf| leaf.slice_axis(Axis(0), Slice::from(1..)).to_owned());
            let steps = Step::Batch(Array1::from_iter(0..num_steps - 1));
            let lps = self.transition(&steps, &previous)?.log_prob(&current)?;
            if lps.shape().first() != Some(&(num_steps - 1)) {
                return Err(MarkovChainError::ShapeMismatch {
                    reason: "The `log_prob` returned by the transition distribution must have a \
                             leading axis of length `num_steps - 1`."
                        .to_string(),
                    left: vec![num_steps - 1],
                    right: lps.shape().to_vec(),
                });
            }
            lps
        };
        debug!(num_steps, "evaluated log_prob parts");
        Ok((prior_lp, transition_lps))
    }

    pub(crate) fn log_prob_impl(&self, x: &State) -> Result<ArrayD<f64>, MarkovChainError> {
        let (prior_lp, transition_lps) = self.log_prob_parts(x)?;
        let transition_lp = self.summation().reduce(&transition_lps, Axis(0));
        assert_same_shape(&prior_lp, &transition_lp)?;
        Ok(prior_lp + transition_lp)
    }

    /// Returns the common extent of every leaf's leading (step) axis.
    fn check_step_extents(&self, x: &State) -> Result<usize, MarkovChainError> {
        let extents: Vec<usize> = x.leaves().iter().map(|leaf| leaf.len_of(Axis(0))).collect();
        let num_steps = *extents
            .first()
            .ok_or_else(|| MarkovChainError::StructureMismatch {
                reason: "state has no leaves".to_string(),
            })?;
        if let Some((leaf, &got)) = extents.iter().enumerate().find(|&(_, &e)| e != num_steps) {
            return Err(MarkovChainError::StepAxisLengthMismatch {
                leaf,
                expected: num_steps,
                got,
            });
        }
        if num_steps == 0 {
            return Err(MarkovChainError::InvalidStepCount { num_steps });
        }
        if self.validate_args() {
            let expected = self.resolve_num_steps()?;
            if num_steps != expected {
                return Err(MarkovChainError::StepAxisLengthMismatch {
                    leaf: 0,
                    expected,
                    got: num_steps,
                });
            }
        }
        Ok(num_steps)
    }
}

/// Fails unless the prior and reduced transition log-densities agree in shape.
pub(crate) fn assert_same_shape(
    prior_lp: &ArrayD<f64>,
    transition_lp: &ArrayD<f64>,
) -> Result<(), MarkovChainError> {
    if prior_lp.shape() == transition_lp.shape() {
        Ok(())
    } else {
        Err(MarkovChainError::ShapeMismatch {
            reason: BATCH_SHAPE_MESSAGE.to_string(),
            left: prior_lp.shape().to_vec(),
            right: transition_lp.shape().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributions::{DType, Normal};
    use crate::nest::Nested;
    use crate::seed::Seed;
    use crate::shape::TensorShape;
    use crate::summation::Summation;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr0, arr1, arr2};

    /// Assigns fixed log-densities to every element of a scalar-event leaf.
    struct FixedTerms(ArrayD<f64>);

    impl Distribution for FixedTerms {
        fn sample(&self, _sample_shape: &[usize], _seed: Seed) -> Result<State, MarkovChainError> {
            Err(MarkovChainError::InvalidParameter {
                reason: "FixedTerms cannot be sampled".to_string(),
            })
        }

        fn log_prob(&self, x: &State) -> Result<ArrayD<f64>, MarkovChainError> {
            let shape = x.try_leaf()?.shape().to_vec();
            self.0
                .broadcast(shape.as_slice())
                .map(|terms| terms.to_owned())
                .ok_or(MarkovChainError::ShapeMismatch {
                    reason: "terms do not broadcast".to_string(),
                    left: shape,
                    right: self.0.shape().to_vec(),
                })
        }

        fn event_shape(&self) -> Nested<TensorShape> {
            Nested::Leaf(TensorShape::scalar())
        }

        fn event_shape_tensor(&self) -> Result<Nested<Vec<usize>>, MarkovChainError> {
            Ok(Nested::Leaf(vec![]))
        }

        fn batch_shape(&self) -> TensorShape {
            TensorShape::scalar()
        }

        fn batch_shape_tensor(&self) -> Result<Vec<usize>, MarkovChainError> {
            Ok(vec![])
        }

        fn dtype(&self) -> Nested<DType> {
            Nested::Leaf(DType::F64)
        }
    }

    fn walk_step(_step: &Step, x: &State) -> Result<Box<dyn Distribution>, MarkovChainError> {
        let next = Normal::new(x.try_leaf()?.clone(), arr0(1.0).into_dyn())?;
        Ok(next.boxed())
    }

    type Transition = fn(&Step, &State) -> Result<Box<dyn Distribution>, MarkovChainError>;

    fn walk(num_steps: usize) -> MarkovChain<Normal, Transition> {
        MarkovChain::new(Normal::standard(), walk_step as Transition, num_steps).unwrap()
    }

    #[test]
    fn parts_have_one_row_per_transition() {
        let chain = walk(3);
        let x = Nested::Leaf(arr1(&[0.5, 1.0, -0.5]).into_dyn());
        let (prior_lp, transition_lps) = chain.log_prob_parts(&x).unwrap();
        assert_eq!(prior_lp.shape(), &[] as &[usize]);
        assert_eq!(transition_lps.shape(), &[2]);

        let n = Normal::standard();
        let at = |v: f64| n.log_prob(&Nested::Leaf(arr0(v).into_dyn())).unwrap()[[]];
        assert_abs_diff_eq!(prior_lp[[]], at(0.5), epsilon = 1e-12);
        assert_abs_diff_eq!(transition_lps[[0]], at(0.5), epsilon = 1e-12);
        assert_abs_diff_eq!(transition_lps[[1]], at(-1.5), epsilon = 1e-12);
    }

    #[test]
    fn kahan_chain_compensates_step_terms() {
        // Per-step terms 1, 1e-17, -1, 1e-17, ... sum to 2e-17 per block of four,
        // but a left-to-right sum keeps only the last 1e-17.
        const BLOCKS: usize = 50;
        let terms = Array1::from_iter((0..4 * BLOCKS).map(|i| [1.0, 1e-17, -1.0, 1e-17][i % 4]));
        let exact = 2.0 * BLOCKS as f64 * 1e-17;
        let make = |use_kahan_sum: bool| {
            let terms = terms.clone();
            MarkovChain::new(
                FixedTerms(arr0(0.0).into_dyn()),
                move |step: &Step, x: &State| {
                    let ndim = x.try_leaf()?.ndim();
                    Ok(FixedTerms(step.gather(&terms, ndim)?).boxed())
                },
                4 * BLOCKS + 1,
            )
            .unwrap()
            .with_kahan_sum(use_kahan_sum)
        };
        let x = Nested::Leaf(ArrayD::zeros(IxDyn(&[2, 4 * BLOCKS + 1])));

        let plain = make(false);
        let kahan = make(true);
        assert_eq!(kahan.summation(), Summation::Kahan);
        let plain_lp = plain.log_prob(&x).unwrap();
        let kahan_lp = kahan.log_prob(&x).unwrap();
        assert_eq!(kahan_lp.shape(), &[2]);
        for (&p, &k) in plain_lp.iter().zip(kahan_lp.iter()) {
            assert!((k - exact).abs() < (p - exact).abs());
            assert!((k - exact).abs() < 1e-3 * exact);
        }
    }

    #[test]
    fn single_step_skips_the_transition() {
        let chain = MarkovChain::new(
            Normal::standard(),
            |_step: &Step, _x: &State| -> Result<Box<dyn Distribution>, MarkovChainError> {
                Err(MarkovChainError::InvalidParameter {
                    reason: "transition called".to_string(),
                })
            },
            1,
        )
        .unwrap();
        let x = Nested::Leaf(arr2(&[[0.3], [-0.2]]).into_dyn());
        let (prior_lp, transition_lps) = chain.log_prob_parts(&x).unwrap();
        assert_eq!(transition_lps.shape(), &[0, 2]);
        assert_eq!(chain.log_prob(&x).unwrap(), prior_lp);
    }

    #[test]
    fn rank_too_small_is_an_error() {
        let chain = walk(2);
        let x = Nested::Leaf(arr0(1.0).into_dyn());
        let err = chain.log_prob(&x).unwrap_err();
        assert_eq!(
            err,
            MarkovChainError::InvalidRank {
                rank: 0,
                min_rank: 1
            }
        );
    }

    #[test]
    fn empty_step_axis_is_an_error() {
        let chain = walk(2);
        let x = Nested::Leaf(ArrayD::zeros(IxDyn(&[3, 0])));
        assert!(matches!(
            chain.log_prob(&x),
            Err(MarkovChainError::InvalidStepCount { num_steps: 0 })
        ));
    }

    #[test]
    fn step_extent_is_checked_only_under_validation() {
        let x = Nested::Leaf(arr1(&[0.0, 1.0, 2.0, 3.0]).into_dyn());
        assert!(walk(3).log_prob(&x).is_ok());
        let err = walk(3).with_validate_args(true).log_prob(&x).unwrap_err();
        assert_eq!(
            err,
            MarkovChainError::StepAxisLengthMismatch {
                leaf: 0,
                expected: 3,
                got: 4
            }
        );
    }

    #[test]
    fn mismatched_transition_batch_shape_fails() {
        let chain = MarkovChain::new(
            Normal::standard(),
            |_step: &Step, x: &State| {
                let x = x.try_leaf()?;
                let mut shape = x.shape().to_vec();
                shape.push(2);
                let next = Normal::new(ArrayD::zeros(IxDyn(&shape)), arr0(1.0).into_dyn())?;
                Ok(next.boxed())
            },
            3,
        )
        .unwrap();
        let x = Nested::Leaf(arr1(&[0.0, 1.0, 2.0]).into_dyn());
        let err = chain.log_prob(&x).unwrap_err();
        assert_eq!(
            err,
            MarkovChainError::ShapeMismatch {
                reason: BATCH_SHAPE_MESSAGE.to_string(),
                left: vec![],
                right: vec![2],
            }
        );
    }
}
