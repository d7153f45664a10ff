use crate::error::{Error, Result};
use crate::matrix::Matrix;

// Reductions — directional folds with mask exclusion
//
// Every reduction accepts a direction selector: Row collapses the row axis
// (result 1 x C x D), Column the column axis (R x 1 x D), Depth the depth
// axis (R x C x 1) and All everything (1 x 1 x 1). Masked cells are
// excluded from both the accumulator and the element count, so a mean over
// a half-masked matrix divides by the number of cells actually seen.

/// Axis selector for reductions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Row,
    Column,
    Depth,
    All,
}

impl Direction {
    /// Geometry of the reduced result for an input geometry.
    fn result_dims(self, matrix: &Matrix) -> (usize, usize, usize) {
        match self {
            Direction::Row => (1, matrix.columns(), matrix.depth()),
            Direction::Column => (matrix.rows(), 1, matrix.depth()),
            Direction::Depth => (matrix.rows(), matrix.columns(), 1),
            Direction::All => (1, 1, 1),
        }
    }

    /// Which result cell the input coordinate folds into.
    fn target(self, row: usize, column: usize, depth: usize) -> (usize, usize, usize) {
        match self {
            Direction::Row => (0, column, depth),
            Direction::Column => (row, 0, depth),
            Direction::Depth => (row, column, 0),
            Direction::All => (0, 0, 0),
        }
    }
}

/// Fold every unmasked cell of `input` into an accumulator per target cell
/// of the reduced geometry. Returns (accumulators, counts) in result
/// iteration order (row-fastest within column within depth).
fn fold_groups(
    input: &Matrix,
    direction: Direction,
    init: f64,
    f: impl Fn(f64, f64) -> f64,
) -> (Vec<f64>, Vec<usize>, (usize, usize, usize)) {
    let dims = direction.result_dims(input);
    let (result_rows, result_columns, result_depth) = dims;
    let cell = |r: usize, c: usize, d: usize| r + c * result_rows + d * result_rows * result_columns;
    let mut accumulators = vec![init; result_rows * result_columns * result_depth];
    let mut counts = vec![0usize; accumulators.len()];
    let masked = input.has_mask();
    for depth in 0..input.depth() {
        for column in 0..input.columns() {
            for row in 0..input.rows() {
                if masked && input.has_mask_at(row, column, depth) {
                    continue;
                }
                let (tr, tc, td) = direction.target(row, column, depth);
                let index = cell(tr, tc, td);
                accumulators[index] = f(accumulators[index], input.get(row, column, depth));
                counts[index] += 1;
            }
        }
    }
    (accumulators, counts, dims)
}

/// Materialize per-group values into a reduced matrix of the input's
/// storage variant.
fn into_matrix(
    input: &Matrix,
    dims: (usize, usize, usize),
    values: impl Fn(usize) -> f64,
) -> Matrix {
    let (rows, columns, depth) = dims;
    let result = Matrix::new(input.kind(), rows, columns, depth);
    // Same row-fastest order fold_groups used.
    let mut flat = 0;
    for d in 0..depth {
        for c in 0..columns {
            for r in 0..rows {
                result.set(r, c, d, values(flat));
                flat += 1;
            }
        }
    }
    result
}

/// Sum of all unmasked cells.
pub fn sum(input: &Matrix) -> f64 {
    let (accumulators, _, _) = fold_groups(input, Direction::All, 0.0, |acc, v| acc + v);
    accumulators[0]
}

/// Directional sum.
pub fn sum_along(input: &Matrix, direction: Direction) -> Matrix {
    let (accumulators, _, dims) = fold_groups(input, direction, 0.0, |acc, v| acc + v);
    into_matrix(input, dims, |i| accumulators[i])
}

/// Mean of all unmasked cells.
pub fn mean(input: &Matrix) -> f64 {
    let (accumulators, counts, _) = fold_groups(input, Direction::All, 0.0, |acc, v| acc + v);
    if counts[0] == 0 {
        0.0
    } else {
        accumulators[0] / counts[0] as f64
    }
}

/// Directional mean, dividing each group by its unmasked count.
pub fn mean_along(input: &Matrix, direction: Direction) -> Matrix {
    let (accumulators, counts, dims) = fold_groups(input, direction, 0.0, |acc, v| acc + v);
    into_matrix(input, dims, |i| {
        if counts[i] == 0 {
            0.0
        } else {
            accumulators[i] / counts[i] as f64
        }
    })
}

/// Variance around a provided mean.
pub fn variance(input: &Matrix, mean_value: f64) -> f64 {
    let (accumulators, counts, _) = fold_groups(input, Direction::All, 0.0, |acc, v| {
        acc + (v - mean_value) * (v - mean_value)
    });
    if counts[0] == 0 {
        0.0
    } else {
        accumulators[0] / counts[0] as f64
    }
}

/// Directional variance around per-group means.
pub fn variance_along(input: &Matrix, direction: Direction) -> Matrix {
    let (sums, counts, dims) = fold_groups(input, direction, 0.0, |acc, v| acc + v);
    let means: Vec<f64> = sums
        .iter()
        .zip(counts.iter())
        .map(|(s, &n)| if n == 0 { 0.0 } else { s / n as f64 })
        .collect();
    // Second pass for the squared deviations.
    let (result_rows, result_columns, _) = dims;
    let cell = |r: usize, c: usize, d: usize| r + c * result_rows + d * result_rows * result_columns;
    let mut accumulators = vec![0.0; means.len()];
    let masked = input.has_mask();
    for depth in 0..input.depth() {
        for column in 0..input.columns() {
            for row in 0..input.rows() {
                if masked && input.has_mask_at(row, column, depth) {
                    continue;
                }
                let (tr, tc, td) = direction.target(row, column, depth);
                let index = cell(tr, tc, td);
                let deviation = input.get(row, column, depth) - means[index];
                accumulators[index] += deviation * deviation;
            }
        }
    }
    into_matrix(input, dims, |i| {
        if counts[i] == 0 {
            0.0
        } else {
            accumulators[i] / counts[i] as f64
        }
    })
}

/// Bessel-corrected standard deviation around a provided mean:
/// sqrt(variance * n / (n - 1)).
pub fn standard_deviation(input: &Matrix, mean_value: f64) -> f64 {
    let (accumulators, counts, _) = fold_groups(input, Direction::All, 0.0, |acc, v| {
        acc + (v - mean_value) * (v - mean_value)
    });
    let n = counts[0];
    if n < 2 {
        0.0
    } else {
        (accumulators[0] / (n - 1) as f64).sqrt()
    }
}

/// Cumulative p-norm: (sum |x|^p)^(1/p), p >= 1.
pub fn norm(input: &Matrix, p: u32) -> Result<f64> {
    if p < 1 {
        return Err(Error::Parameter(format!(
            "norm order must be at least 1, got {p}"
        )));
    }
    let (accumulators, _, _) = fold_groups(input, Direction::All, 0.0, |acc, v| {
        acc + v.abs().powi(p as i32)
    });
    Ok(accumulators[0].powf(1.0 / p as f64))
}

/// Shannon entropy in bits: -sum(v * log2 v) / count over unmasked cells.
pub fn entropy(input: &Matrix) -> f64 {
    let (accumulators, counts, _) =
        fold_groups(input, Direction::All, 0.0, |acc, v| acc + v * v.log2());
    if counts[0] == 0 {
        0.0
    } else {
        -accumulators[0] / counts[0] as f64
    }
}

/// Directional entropy.
pub fn entropy_along(input: &Matrix, direction: Direction) -> Matrix {
    let (accumulators, counts, dims) =
        fold_groups(input, direction, 0.0, |acc, v| acc + v * v.log2());
    into_matrix(input, dims, |i| {
        if counts[i] == 0 {
            0.0
        } else {
            -accumulators[i] / counts[i] as f64
        }
    })
}

/// Minimum over unmasked cells.
pub fn min(input: &Matrix) -> f64 {
    let (accumulators, _, _) =
        fold_groups(input, Direction::All, f64::INFINITY, |acc, v| acc.min(v));
    accumulators[0]
}

/// Directional minimum.
pub fn min_along(input: &Matrix, direction: Direction) -> Matrix {
    let (accumulators, _, dims) =
        fold_groups(input, direction, f64::INFINITY, |acc, v| acc.min(v));
    into_matrix(input, dims, |i| accumulators[i])
}

/// Maximum over unmasked cells.
pub fn max(input: &Matrix) -> f64 {
    let (accumulators, _, _) = fold_groups(input, Direction::All, f64::NEG_INFINITY, |acc, v| {
        acc.max(v)
    });
    accumulators[0]
}

/// Directional maximum.
pub fn max_along(input: &Matrix, direction: Direction) -> Matrix {
    let (accumulators, _, dims) = fold_groups(input, direction, f64::NEG_INFINITY, |acc, v| {
        acc.max(v)
    });
    into_matrix(input, dims, |i| accumulators[i])
}

/// Coordinate of the minimum unmasked cell.
pub fn argmin(input: &Matrix) -> (usize, usize, usize) {
    arg_extreme(input, |candidate, best| candidate < best)
}

/// Coordinate of the maximum unmasked cell.
pub fn argmax(input: &Matrix) -> (usize, usize, usize) {
    arg_extreme(input, |candidate, best| candidate > best)
}

fn arg_extreme(input: &Matrix, better: impl Fn(f64, f64) -> bool) -> (usize, usize, usize) {
    let masked = input.has_mask();
    let mut best: Option<(f64, (usize, usize, usize))> = None;
    for depth in 0..input.depth() {
        for column in 0..input.columns() {
            for row in 0..input.rows() {
                if masked && input.has_mask_at(row, column, depth) {
                    continue;
                }
                let value = input.get(row, column, depth);
                match best {
                    Some((current, _)) if !better(value, current) => {}
                    _ => best = Some((value, (row, column, depth))),
                }
            }
        }
    }
    best.map(|(_, coord)| coord).unwrap_or((0, 0, 0))
}
