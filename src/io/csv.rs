/*!
# Saving Trajectories to CSV

Writes one state leaf of a sampled trajectory to a CSV file. Enable via the `csv` feature.
*/

use ndarray::{Array3, ArrayD, Axis};
use std::error::Error;
use std::fs::File;

use csv::Writer;

use crate::error::MarkovChainError;
use crate::shape::normalize_axis;

/**
Saves one leaf of a trajectory as a CSV file.

All dimensions in front of `step_axis` (sample and batch dimensions) are
flattened into a single draw index, and all dimensions behind it (the leaf's
event dimensions) into `dim_0`, `dim_1`, etc.

The resulting CSV file will have:
- A header row containing `"draw"`, `"step"`, and one column per event element.
- One row per draw and step.

# Arguments

* `leaf` - A trajectory leaf, e.g. `sample(..)` of a chain.
* `step_axis` - Position of the step axis, negative values count from the end.
* `filename` - The file path where the CSV data will be written.

# Examples

```rust
use mini_markov::io::csv::save_csv;
use ndarray::arr2;

// Two draws of a three-step scalar chain.
let leaf = arr2(&[[0.0, 0.5, 1.0], [0.0, -0.5, -1.0]]).into_dyn();
save_csv(&leaf, -1, "/tmp/trajectory.csv")?;
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_csv(
    leaf: &ArrayD<f64>,
    step_axis: isize,
    filename: &str,
) -> Result<(), Box<dyn Error>> {
    let shape = leaf.shape();
    let axis = normalize_axis(step_axis, shape.len()).ok_or(MarkovChainError::InvalidRank {
        rank: shape.len(),
        min_rank: if step_axis < 0 {
            step_axis.unsigned_abs()
        } else {
            step_axis as usize + 1
        },
    })?;
    let n_draws: usize = shape[..axis].iter().product();
    let n_steps = shape[axis];
    let n_dims: usize = shape[axis + 1..].iter().product();
    let data = Array3::from_shape_vec(
        (n_draws, n_steps, n_dims),
        leaf.as_standard_layout().iter().copied().collect(),
    )?;

    let mut wtr = Writer::from_writer(File::create(filename)?);
    let mut header: Vec<String> = vec!["draw".to_string(), "step".to_string()];
    header.extend((0..n_dims).map(|i| format!("dim_{}", i)));
    wtr.write_record(&header)?;

    for (draw_idx, draw) in data.axis_iter(Axis(0)).enumerate() {
        for (step_idx, step) in draw.axis_iter(Axis(0)).enumerate() {
            let mut row = vec![draw_idx.to_string(), step_idx.to_string()];
            row.extend(step.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}
