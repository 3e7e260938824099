/*!
Export of sampled trajectories. Enable via the `csv` feature.
*/

#[cfg(feature = "csv")]
pub mod csv;
