//! Covariance matrix over the cycle's instrument universe.
//!
//! Used to evaluate the quadratic tracking-error penalty between two weight
//! vectors. Validation happens at construction so the optimizer can assume
//! a square, finite, symmetric matrix with labelled rows.

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::types::{InstrumentCode, WeightMap};

/// Relative tolerance for the symmetry check.
const SYMMETRY_TOL: f64 = 1e-8;

/// Labelled covariance matrix for one optimization run.
#[derive(Debug, Clone)]
pub struct CovarianceMatrix {
    instruments: Vec<InstrumentCode>,
    values: Vec<Vec<f64>>,
}

impl CovarianceMatrix {
    /// Build and validate a labelled matrix.
    pub fn new(instruments: Vec<InstrumentCode>, values: Vec<Vec<f64>>) -> Result<Self> {
        let n = instruments.len();
        if values.len() != n {
            return Err(Error::Snapshot(format!(
                "covariance has {} rows for {} instruments",
                values.len(),
                n
            )));
        }
        for (i, row) in values.iter().enumerate() {
            if row.len() != n {
                return Err(Error::Snapshot(format!(
                    "covariance row {} has {} entries, expected {}",
                    instruments[i],
                    row.len(),
                    n
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(Error::Snapshot(format!(
                    "covariance row {} contains a non-finite entry",
                    instruments[i]
                )));
            }
        }

        let mut seen: FxHashMap<&InstrumentCode, ()> = FxHashMap::default();
        for code in &instruments {
            if seen.insert(code, ()).is_some() {
                return Err(Error::Snapshot(format!(
                    "duplicate instrument {code} in covariance"
                )));
            }
        }

        for i in 0..n {
            for j in (i + 1)..n {
                let a = values[i][j];
                let b = values[j][i];
                if (a - b).abs() > SYMMETRY_TOL * (1.0 + a.abs().max(b.abs())) {
                    return Err(Error::Snapshot(format!(
                        "covariance is not symmetric at ({}, {}): {a} vs {b}",
                        instruments[i], instruments[j]
                    )));
                }
            }
        }

        Ok(Self {
            instruments,
            values,
        })
    }

    pub fn instruments(&self) -> &[InstrumentCode] {
        &self.instruments
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn contains(&self, code: &InstrumentCode) -> bool {
        self.instruments.iter().any(|c| c == code)
    }

    /// Variance entry for `(row, col)` by index.
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.values[row][col]
    }

    /// Restrict the matrix to `keep`, preserving the order of `keep`.
    ///
    /// Instruments absent from the matrix must be filtered out before
    /// calling this; asking for one is a snapshot inconsistency.
    pub fn subset(&self, keep: &[InstrumentCode]) -> Result<Self> {
        let mut indices = Vec::with_capacity(keep.len());
        for code in keep {
            let idx = self
                .instruments
                .iter()
                .position(|c| c == code)
                .ok_or_else(|| {
                    Error::Snapshot(format!("covariance does not cover instrument {code}"))
                })?;
            indices.push(idx);
        }

        let values = indices
            .iter()
            .map(|&i| indices.iter().map(|&j| self.values[i][j]).collect())
            .collect();

        Ok(Self {
            instruments: keep.to_vec(),
            values,
        })
    }

    /// Quadratic form `d' S d` for a deviation vector aligned to the
    /// matrix's instrument order.
    pub fn quadratic_form(&self, d: &[f64]) -> f64 {
        let sigma_d = mat_vec_mul(&self.values, d);
        dot(d, &sigma_d)
    }

    /// Covariance-weighted distance between two weight vectors.
    ///
    /// Instruments missing from either map contribute a zero weight.
    pub fn tracking_error(&self, a: &WeightMap, b: &WeightMap) -> f64 {
        let d: Vec<f64> = self
            .instruments
            .iter()
            .map(|code| {
                a.get(code).copied().unwrap_or(0.0) - b.get(code).copied().unwrap_or(0.0)
            })
            .collect();
        self.quadratic_form(&d).max(0.0).sqrt()
    }
}

fn mat_vec_mul(matrix: &[Vec<f64>], vec: &[f64]) -> Vec<f64> {
    matrix
        .iter()
        .map(|row| row.iter().zip(vec).map(|(a, b)| a * b).sum::<f64>())
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
