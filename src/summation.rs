//! Reductions along the step axis: plain or round-off compensated.
//!
//! Log-densities of long chains are sums of many per-step terms. The
//! compensated reducer keeps a running correction term alongside the total
//! (Kahan–Babuška / Neumaier), so its error stays bounded independently of
//! the number of steps.

use ndarray::{ArrayD, Axis, Zip};
use num_traits::Float;

/// Selects how per-step log-densities are reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Summation {
    /// Straightforward left-to-right accumulation.
    #[default]
    Plain,
    /// Compensated accumulation.
    Kahan,
}

impl Summation {
    /// Maps a `use_kahan_sum` flag to a strategy.
    pub fn from_flag(use_kahan_sum: bool) -> Self {
        if use_kahan_sum {
            Summation::Kahan
        } else {
            Summation::Plain
        }
    }

    /// Compensated if either strategy is.
    pub fn either(self, other: Summation) -> Self {
        Summation::from_flag(self == Summation::Kahan || other == Summation::Kahan)
    }

    /// Sums `x` over `axis`. An empty axis reduces to zeros.
    pub fn reduce<T: Float>(self, x: &ArrayD<T>, axis: Axis) -> ArrayD<T> {
        match self {
            Summation::Plain => x.sum_axis(axis),
            Summation::Kahan => Zip::from(x.lanes(axis))
                .map_collect(|lane| lane.iter().copied().collect::<KahanSum<T>>().value()),
        }
    }
}

/// A running total with its round-off correction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KahanSum<T> {
    /// The naive running total.
    pub total: T,
    /// Accumulated low-order bits lost from `total`.
    pub correction: T,
}

impl<T: Float> KahanSum<T> {
    pub fn new() -> Self {
        Self {
            total: T::zero(),
            correction: T::zero(),
        }
    }

    /// Adds one term.
    pub fn add(&mut self, x: T) {
        let t = self.total + x;
        if self.total.abs() >= x.abs() {
            self.correction = self.correction + ((self.total - t) + x);
        } else {
            self.correction = self.correction + ((x - t) + self.total);
        }
        self.total = t;
    }

    /// The compensated sum.
    pub fn value(&self) -> T {
        self.total + self.correction
    }
}

impl<T: Float> Default for KahanSum<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Float> FromIterator<T> for KahanSum<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut acc = KahanSum::new();
        for x in iter {
            acc.add(x);
        }
        acc
    }
}

/// Compensated sum of `values`.
pub fn kahan_sum<T: Float, I: IntoIterator<Item = T>>(values: I) -> KahanSum<T> {
    values.into_iter().collect()
}
