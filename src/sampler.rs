//! Sequential sampling of Markov chain trajectories.
//!
//! Step `t` draws from `transition(t - 1, x_{t-1})`, so the loop below runs
//! strictly in order. Work across sample and batch dimensions inside a step
//! is left to the distributions themselves.

use ndarray::{ArrayD, Axis};
use tracing::{debug_span, trace};

use crate::distributions::Distribution;
use crate::error::MarkovChainError;
use crate::markov_chain::{MarkovChain, Step};
use crate::nest::State;
use crate::seed::Seed;
use crate::shape::{move_axis, stack_arrays, stack_states};

/// Salt mixed into the caller's seed before deriving the prior and loop seeds.
const SAMPLE_SALT: &str = "markov_chain_sample";

/// Selects what the sampling loop computes alongside the trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// Draw the trajectory only.
    Sample,
    /// Also accumulate the log-density of every draw.
    SampleAndLogProb,
}

impl<P, F> MarkovChain<P, F>
where
    P: Distribution,
    F: Fn(&Step, &State) -> Result<Box<dyn Distribution>, MarkovChainError> + Send + Sync,
{
    /**
    Draws a trajectory of shape `sample_shape ++ batch_shape ++ [num_steps] ++ event_shape`
    per leaf.

    In [`SampleMode::SampleAndLogProb`] the log-densities of the prior draw and
    of every transition draw are reduced over the steps with the chain's
    summation strategy and returned alongside the trajectory.

    The caller's seed is split once into a prior seed and a loop seed; the
    loop seed is split again at every step into that step's seed and the
    seed carried forward.
    */
    pub fn sample_with_mode(
        &self,
        sample_shape: &[usize],
        seed: Seed,
        mode: SampleMode,
    ) -> Result<(State, Option<ArrayD<f64>>), MarkovChainError> {
        let (trajectory, lps) = self.sample_loop(sample_shape, seed, mode)?;
        let lp = match mode {
            SampleMode::Sample => None,
            SampleMode::SampleAndLogProb => Some(self.reduce_step_lps(&lps)?),
        };
        Ok((trajectory, lp))
    }

    /// Runs the sampling loop. The per-step log-densities are collected in
    /// [`SampleMode::SampleAndLogProb`] only, starting with the prior's.
    pub(crate) fn sample_loop(
        &self,
        sample_shape: &[usize],
        seed: Seed,
        mode: SampleMode,
    ) -> Result<(State, Vec<ArrayD<f64>>), MarkovChainError> {
        let num_steps = self.resolve_num_steps()?;
        let seeds = seed.split_with_salt(2, SAMPLE_SALT);
        let (prior_seed, mut loop_seed) = (seeds[0], seeds[1]);

        let mut states: Vec<State> = Vec::with_capacity(num_steps);
        let mut lps: Vec<ArrayD<f64>> = Vec::new();
        match mode {
            SampleMode::Sample => states.push(self.prior().sample(sample_shape, prior_seed)?),
            SampleMode::SampleAndLogProb => {
                let (x, lp) = self.prior().sample_and_log_prob(sample_shape, prior_seed)?;
                states.push(x);
                lps.push(lp);
            }
        }

        let span = debug_span!("markov_chain_sample", num_steps, ?sample_shape, ?mode);
        let _enter = span.enter();
        for step in 1..num_steps {
            let (step_seed, next_seed) = loop_seed.split2();
            loop_seed = next_seed;

            let transition = self.transition(&Step::Scalar(step - 1), &states[step - 1])?;
            if step == 1 && self.validate_args() {
                self.check_transition(transition.as_ref(), sample_shape)?;
            }
            let x = match mode {
                SampleMode::Sample => transition.sample(&[], step_seed)?,
                SampleMode::SampleAndLogProb => {
                    let (x, lp) = transition.sample_and_log_prob(&[], step_seed)?;
                    lps.push(lp);
                    x
                }
            };
            trace!(step, "drew transition sample");
            states.push(x);
        }

        let stacked = stack_states(&states)?;
        let trajectory = stacked.zip_with(&self.step_axes()?, |x, &axis| move_axis(x, 0, axis))?;
        Ok((trajectory, lps))
    }

    /// Stacks per-step log-densities and reduces them with the chain's summation.
    pub(crate) fn reduce_step_lps(
        &self,
        lps: &[ArrayD<f64>],
    ) -> Result<ArrayD<f64>, MarkovChainError> {
        let views: Vec<_> = lps.iter().map(|lp| lp.view()).collect();
        let stacked = stack_arrays(
            &views,
            "The shape of the `log_prob` returned by the transition distribution does not \
             match the `log_prob` from the initial state prior.",
        )?;
        Ok(self.summation().reduce(&stacked, Axis(0)))
    }

    /// Checks the first transition distribution against the prior.
    fn check_transition(
        &self,
        transition: &dyn Distribution,
        sample_shape: &[usize],
    ) -> Result<(), MarkovChainError> {
        self.prior()
            .event_shape_tensor()?
            .zip_with(&transition.event_shape_tensor()?, |expected, got| {
                if expected == got {
                    Ok(())
                } else {
                    Err(MarkovChainError::ShapeMismatch {
                        reason: "The event shape of the transition distribution does not match \
                                 the initial state prior."
                            .to_string(),
                        left: expected.clone(),
                        right: got.clone(),
                    })
                }
            })?;
        self.prior()
            .dtype()
            .zip_with(&transition.dtype(), |&expected, &got| {
                if expected == got {
                    Ok(())
                } else {
                    Err(MarkovChainError::DTypeMismatch { expected, got })
                }
            })?;
        let expected: Vec<usize> = sample_shape
            .iter()
            .copied()
            .chain(self.prior().batch_shape_tensor()?)
            .collect();
        let got = transition.batch_shape_tensor()?;
        if expected != got {
            return Err(MarkovChainError::ShapeMismatch {
                reason: "The batch shape of the transition distribution does not match \
                         `sample_shape` followed by the batch shape of the initial state prior."
                    .to_string(),
                left: expected,
                right: got,
            });
        }
        Ok(())
    }
}
