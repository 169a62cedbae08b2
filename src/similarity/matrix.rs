//! Dense row-major similarity matrices.

use serde::{Deserialize, Serialize};

use crate::error::{MalheurError, Result};

/// A dense `rows × cols` matrix of similarity values in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl SimilarityMatrix {
    /// Allocate a zero-filled matrix, reporting the attempted size on failure.
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        let bytes = rows as u128 * cols as u128 * std::mem::size_of::<f64>() as u128;
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| MalheurError::resource("similarity matrix", bytes))?;

        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| MalheurError::resource("similarity matrix", bytes))?;
        data.resize(len, 0.0);

        Ok(Self { rows, cols, data })
    }

    /// Build a matrix from row-major values.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(MalheurError::invalid_operation(format!(
                "{} values do not form a {rows}x{cols} matrix",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Whether the matrix is square.
    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    /// Value at `(row, col)`.
    ///
    /// # Panics
    ///
    /// Panics if the position is out of bounds.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        assert!(row < self.rows && col < self.cols, "matrix index out of bounds");
        self.data[row * self.cols + col]
    }

    /// Set the value at `(row, col)`.
    pub(crate) fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    /// One row as a slice.
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Iterate over rows.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.rows).map(move |row| self.row(row))
    }

    /// All values in row-major order.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Diagonal values of a square matrix.
    pub fn diagonal(&self) -> Vec<f64> {
        (0..self.rows.min(self.cols)).map(|i| self.get(i, i)).collect()
    }

    /// Whether the matrix is square and exactly symmetric.
    pub fn is_symmetric(&self) -> bool {
        self.is_square()
            && (0..self.rows).all(|i| (i + 1..self.cols).all(|j| self.get(i, j) == self.get(j, i)))
    }

    /// Smallest and largest value, or `None` for an empty matrix.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        let mut values = self.data.iter().copied();
        let first = values.next()?;
        Some(values.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }

    /// Whether every value is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}
