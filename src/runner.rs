//! Drawing many independent trajectories in parallel.
//!
//! A single call to [`Distribution::sample`] already vectorizes over
//! `sample_shape`, but the sequential step loop runs on one thread. These
//! helpers instead give every draw its own child seed and run the draws on
//! the rayon pool, stacking the results along a new leading axis.

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::debug;

use crate::distributions::Distribution;
use crate::error::MarkovChainError;
use crate::nest::State;
use crate::seed::Seed;
use crate::shape::stack_states;

/// Builds the progress bar used by [`sample_independent_with_progress`].
pub fn progress_bar(n: usize) -> ProgressBar {
    let pb = ProgressBar::new(n as u64);
    let style = ProgressStyle::default_bar()
        .template("{prefix} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    pb.set_style(style);
    pb.set_prefix("Trajectories");
    pb
}

/**
Draws `n` independent samples of `dist`, one child seed each, in parallel.

The result has a leading axis of length `n` on every leaf.

# Examples

```rust
use mini_markov::distributions::Normal;
use mini_markov::runner::sample_independent;
use mini_markov::seed::Seed;

let draws = sample_independent(&Normal::standard(), 8, Seed::new(0)).unwrap();
assert_eq!(draws.try_leaf().unwrap().shape(), &[8]);
```
*/
pub fn sample_independent<D>(dist: &D, n: usize, seed: Seed) -> Result<State, MarkovChainError>
where
    D: Distribution + ?Sized,
{
    run(dist, n, seed, None)
}

/// Like [`sample_independent`], advancing `pb` once per finished draw.
pub fn sample_independent_with_progress<D>(
    dist: &D,
    n: usize,
    seed: Seed,
    pb: &ProgressBar,
) -> Result<State, MarkovChainError>
where
    D: Distribution + ?Sized,
{
    pb.set_length(n as u64);
    let out = run(dist, n, seed, Some(pb));
    pb.finish_with_message("Done!");
    out
}

fn run<D>(
    dist: &D,
    n: usize,
    seed: Seed,
    pb: Option<&ProgressBar>,
) -> Result<State, MarkovChainError>
where
    D: Distribution + ?Sized,
{
    if n == 0 {
        return Err(MarkovChainError::InvalidParameter {
            reason: "need at least one draw".to_string(),
        });
    }
    debug!(n, "sampling independent draws");
    let draws = seed
        .split(n)
        .into_par_iter()
        .map(|seed| {
            let x = dist.sample(&[], seed);
            if let Some(pb) = pb {
                pb.inc(1);
            }
            x
        })
        .collect::<Result<Vec<_>, _>>()?;
    stack_states(&draws)
}
