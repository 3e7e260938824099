//! A small demo: a batch of Gaussian random walks whose step sizes vary over time.
//!
//! Run with `RUST_LOG=mini_markov=debug` to see the sampler's spans.

use mini_markov::distributions::{Distribution, Normal};
use mini_markov::log_prob_ratio::log_prob_ratio;
use mini_markov::markov_chain::{MarkovChain, Step};
use mini_markov::runner::{progress_bar, sample_independent_with_progress};
use mini_markov::seed::Seed;
use ndarray::{arr1, Array1, Axis};
use std::error::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    const NUM_STEPS: usize = 50;
    const N_DRAWS: usize = 200;
    const SEED: u64 = 42;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mini_markov=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Three walks starting at different locations.
    let prior = Normal::new(arr1(&[-5.0, 0.0, 5.0]).into_dyn(), arr1(&[1.0]).into_dyn())?;
    let scales: Array1<f64> = Array1::linspace(0.1, 2.0, NUM_STEPS);
    let walk = MarkovChain::new(
        prior.clone(),
        move |step: &Step, x: &mini_markov::State| {
            let x = x.try_leaf()?;
            let next = Normal::new(x.clone(), step.gather(&scales, x.ndim())?)?;
            Ok(next.boxed())
        },
        NUM_STEPS,
    )?
    .with_kahan_sum(true);

    let pb = progress_bar(N_DRAWS);
    let draws = sample_independent_with_progress(&walk, N_DRAWS, Seed::new(SEED), &pb)?;
    let leaf = draws.try_leaf()?;
    info!(shape = ?leaf.shape(), "sampled trajectories");

    // Spread across draws at the first and last step, per walk.
    let first = leaf.index_axis(Axis(2), 0);
    let last = leaf.index_axis(Axis(2), NUM_STEPS - 1);
    println!("Std at step 0:  {:.3}", first.std_axis(Axis(0), 1.0));
    println!("Std at step {}: {:.3}", NUM_STEPS - 1, last.std_axis(Axis(0), 1.0));

    // Compare against a walk with constant unit steps.
    let unit_walk = MarkovChain::new(
        prior,
        |_step: &Step, x: &mini_markov::State| {
            let next = Normal::new(x.try_leaf()?.clone(), arr1(&[1.0]).into_dyn())?;
            Ok(next.boxed())
        },
        NUM_STEPS,
    )?;
    let lp = walk.log_prob(&draws)?;
    let ratio = log_prob_ratio(&walk, &draws, &unit_walk, &draws)?;
    println!("Mean log_prob:       {:.3}", lp.mean().unwrap_or(f64::NAN));
    println!("Mean log-ratio vs unit steps: {:.3}", ratio.mean().unwrap_or(f64::NAN));

    #[cfg(feature = "csv")]
    {
        mini_markov::io::csv::save_csv(leaf, -1, "/tmp/random_walks.csv")?;
        println!("Saved trajectories to /tmp/random_walks.csv");
    }

    Ok(())
}
