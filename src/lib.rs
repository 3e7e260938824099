//! # Mini Markov
//!
//! Distributions over fully observed Markov chains.
//!
//! A chain is defined by a prior over its initial state and a transition rule
//! `(step, previous_state) -> distribution`. Sampling runs the steps in order;
//! density evaluation calls the transition rule once for all steps.
//!
//! ```rust
//! use mini_markov::distributions::{Distribution, Normal};
//! use mini_markov::markov_chain::MarkovChain;
//! use mini_markov::seed::Seed;
//! use ndarray::arr0;
//!
//! let walk = MarkovChain::new(
//!     Normal::standard(),
//!     |_step, x| Ok(Normal::new(x.try_leaf()?.clone(), arr0(1.0).into_dyn())?.boxed()),
//!     3,
//! )
//! .unwrap();
//! let (x, lp) = walk.sample_and_log_prob(&[], Seed::new(7)).unwrap();
//! assert_eq!(x.try_leaf().unwrap().shape(), &[3]);
//! assert!((walk.log_prob(&x).unwrap() - lp)[[]].abs() < 1e-12);
//! ```

pub mod distributions;
pub mod error;
pub mod io;
pub mod log_prob;
pub mod log_prob_ratio;
pub mod markov_chain;
pub mod nest;
pub mod runner;
pub mod sampler;
pub mod seed;
pub mod shape;
pub mod summation;

pub use distributions::{Categorical, DType, Distribution, Independent, JointNamed, Normal};
pub use error::MarkovChainError;
pub use log_prob_ratio::{log_prob_ratio, LogProbParts};
pub use markov_chain::{MarkovChain, NumSteps, Step};
pub use nest::{Nested, State};
pub use sampler::SampleMode;
pub use seed::Seed;
pub use summation::Summation;
