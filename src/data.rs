//! Contiguous dataset storage.
//!
//! Inputs are stored row-major in one buffer. Targets are either dense vectors (also
//! row-major) or sparse class labels that the training loop expands to one-hot vectors.

use rand::RngCore;

use crate::shuffle::shuffle_lockstep;
use crate::{Error, Result};

/// Supervised targets for every sample.
#[derive(Debug, Clone, PartialEq)]
pub enum Targets {
    /// `values.len() == len * dim`.
    Dense { values: Vec<f32>, dim: usize },
    /// Class indices per sample, expanded to `classes`-long one-hot vectors.
    Sparse {
        labels: Vec<Vec<usize>>,
        classes: usize,
    },
}

impl Targets {
    /// Length of the target vector fed to the loss.
    pub fn dim(&self) -> usize {
        match self {
            Targets::Dense { dim, .. } => *dim,
            Targets::Sparse { classes, .. } => *classes,
        }
    }
}

/// A supervised dataset: inputs (X) and targets (Y).
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: Vec<f32>,
    input_dim: usize,
    len: usize,
    targets: Targets,
}

impl Dataset {
    /// Build a dataset from flat buffers.
    ///
    /// `inputs` is `(len, input_dim)` and `targets` is `(len, target_dim)`.
    pub fn from_flat(
        inputs: Vec<f32>,
        targets: Vec<f32>,
        input_dim: usize,
        target_dim: usize,
    ) -> Result<Self> {
        let len = rows_in(&inputs, input_dim, "input")?;
        if target_dim == 0 {
            return Err(Error::InvalidData("target_dim must be > 0".to_owned()));
        }
        if targets.len() != len * target_dim {
            return Err(Error::InvalidData(format!(
                "targets length {} does not match len * target_dim ({len} * {target_dim})",
                targets.len(),
            )));
        }

        Ok(Self {
            inputs,
            input_dim,
            len,
            targets: Targets::Dense {
                values: targets,
                dim: target_dim,
            },
        })
    }

    /// Build a dataset from per-sample rows.
    pub fn from_rows(inputs: &[Vec<f32>], targets: &[Vec<f32>]) -> Result<Self> {
        if inputs.len() != targets.len() {
            return Err(Error::InvalidData(format!(
                "inputs/targets length mismatch: {} vs {}",
                inputs.len(),
                targets.len()
            )));
        }
        let (inputs, input_dim) = flatten(inputs, "input")?;
        let (targets, target_dim) = flatten(targets, "target")?;
        Self::from_flat(inputs, targets, input_dim, target_dim)
    }

    /// Build a dataset whose targets are class indices out of `classes`.
    ///
    /// Each sample may carry several labels (multi-label targets).
    pub fn from_sparse_rows(
        inputs: &[Vec<f32>],
        labels: Vec<Vec<usize>>,
        classes: usize,
    ) -> Result<Self> {
        if inputs.len() != labels.len() {
            return Err(Error::InvalidData(format!(
                "inputs/labels length mismatch: {} vs {}",
                inputs.len(),
                labels.len()
            )));
        }
        if classes == 0 {
            return Err(Error::InvalidData("classes must be > 0".to_owned()));
        }
        if let Some((i, label)) = labels
            .iter()
            .enumerate()
            .find_map(|(i, ls)| ls.iter().find(|&&l| l >= classes).map(|&l| (i, l)))
        {
            return Err(Error::InvalidData(format!(
                "sample {i} has label {label}, but there are only {classes} classes"
            )));
        }

        let (inputs, input_dim) = flatten(inputs, "input")?;
        let len = inputs.len() / input_dim;
        Ok(Self {
            inputs,
            input_dim,
            len,
            targets: Targets::Sparse { labels, classes },
        })
    }

    #[inline]
    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    /// Returns true if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    /// Returns the per-sample input dimension.
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    #[inline]
    /// Returns the per-sample target dimension.
    pub fn target_dim(&self) -> usize {
        self.targets.dim()
    }

    #[inline]
    pub fn targets(&self) -> &Targets {
        &self.targets
    }

    #[inline]
    /// Returns the `idx`-th input row.
    ///
    /// Panics if `idx >= len`.
    pub fn input(&self, idx: usize) -> &[f32] {
        let start = idx * self.input_dim;
        &self.inputs[start..start + self.input_dim]
    }

    /// Write the `idx`-th target into `out` (one-hot for sparse labels).
    ///
    /// Panics if `idx >= len`.
    pub fn target_into(&self, idx: usize, out: &mut [f32]) -> Result<()> {
        match &self.targets {
            Targets::Dense { values, dim } => {
                if out.len() != *dim {
                    return Err(Error::InvalidData(format!(
                        "target buffer has len {}, expected {dim}",
                        out.len()
                    )));
                }
                out.copy_from_slice(&values[idx * dim..(idx + 1) * dim]);
                Ok(())
            }
            Targets::Sparse { labels, .. } => {
                crate::labels::labels_to_dense(&labels[idx], out, 0.0, 1.0)
            }
        }
    }

    /// Shuffle samples in place, keeping inputs and targets paired.
    pub fn shuffle<R: RngCore + ?Sized>(&mut self, rng: &mut R) -> Result<()> {
        match &mut self.targets {
            Targets::Dense { values, dim } => {
                shuffle_lockstep(&mut self.inputs, self.input_dim, values, *dim, rng)
            }
            Targets::Sparse { labels, .. } => {
                shuffle_lockstep(&mut self.inputs, self.input_dim, labels, 1, rng)
            }
        }
    }
}

fn rows_in(values: &[f32], dim: usize, what: &str) -> Result<usize> {
    if dim == 0 {
        return Err(Error::InvalidData(format!("{what}_dim must be > 0")));
    }
    if values.len() % dim != 0 {
        return Err(Error::InvalidData(format!(
            "{what}s length {} is not divisible by {what}_dim {dim}",
            values.len()
        )));
    }
    Ok(values.len() / dim)
}

fn flatten(rows: &[Vec<f32>], what: &str) -> Result<(Vec<f32>, usize)> {
    let dim = rows.first().map_or(0, Vec::len);
    if dim == 0 {
        return Err(Error::InvalidData(format!("{what} rows must be non-empty")));
    }
    let mut flat = Vec::with_capacity(rows.len() * dim);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != dim {
            return Err(Error::InvalidData(format!(
                "{what} row {i} has len {}, expected {dim}",
                row.len()
            )));
        }
        flat.extend_from_slice(row);
    }
    Ok((flat, dim))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::Mt19937;

    #[test]
    fn dataset_from_flat_validates_shapes() {
        let ok = Dataset::from_flat(vec![0.0, 1.0, 2.0, 3.0], vec![0.0, 1.0], 2, 1);
        assert!(ok.is_ok());

        let err = Dataset::from_flat(vec![0.0, 1.0, 2.0], vec![0.0], 2, 1);
        assert!(err.is_err());
    }

    #[test]
    fn sparse_targets_expand_to_one_hot() {
        let rows = [vec![0.0], vec![1.0]];
        let data = Dataset::from_sparse_rows(&rows, vec![vec![2], vec![0, 1]], 3).unwrap();
        assert_eq!(data.target_dim(), 3);

        let mut out = [0.0_f32; 3];
        data.target_into(0, &mut out).unwrap();
        assert_eq!(out, [0.0, 0.0, 1.0]);
        data.target_into(1, &mut out).unwrap();
        assert_eq!(out, [1.0, 1.0, 0.0]);

        assert!(Dataset::from_sparse_rows(&[vec![0.0]], vec![vec![3]], 3).is_err());
    }

    #[test]
    fn shuffle_keeps_samples_paired() {
        let xs: Vec<Vec<f32>> = (0..16).map(|i| vec![i as f32, -(i as f32)]).collect();
        let ys: Vec<Vec<f32>> = (0..16).map(|i| vec![i as f32 * 10.0]).collect();
        let mut data = Dataset::from_rows(&xs, &ys).unwrap();
        let before = data.clone();
        data.shuffle(&mut Mt19937::new(1)).unwrap();
        assert_ne!(data, before);

        let mut t = [0.0_f32; 1];
        for i in 0..data.len() {
            data.target_into(i, &mut t).unwrap();
            assert_eq!(data.input(i)[0] * 10.0, t[0]);
            assert_eq!(data.input(i)[1], -data.input(i)[0]);
        }
    }
}
