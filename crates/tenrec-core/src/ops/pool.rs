use std::collections::HashMap;

use rand::Rng;

use crate::error::{Error, Result};
use crate::matrix::Matrix;

// Pooling — max / average / random / cyclic with position maps
//
// Output extent is (input - F) / stride + 1 per spatial axis; depth is
// preserved. Max, random and cyclic pooling remember which source cell fed
// each output cell; the gradient pass scatters one value per output cell
// back through that map. Average pooling spreads the gradient uniformly
// over its window.

/// Chosen source coordinate per output cell: (row, column, depth) of the
/// output mapped to (row, column) of the input.
pub type PositionMap = HashMap<(usize, usize, usize), (usize, usize)>;

/// Pooling window geometry.
#[derive(Debug, Clone, Copy)]
pub struct PoolGeometry {
    pub filter_rows: usize,
    pub filter_columns: usize,
    pub stride: usize,
}

impl PoolGeometry {
    fn validate(&self, input: &Matrix, result: &Matrix) -> Result<()> {
        if self.stride == 0 {
            return Err(Error::Parameter("pooling stride must be at least 1".into()));
        }
        if self.filter_rows == 0
            || self.filter_columns == 0
            || input.rows() < self.filter_rows
            || input.columns() < self.filter_columns
        {
            return Err(Error::DimensionMismatch {
                lhs: input.dims(),
                rhs: crate::Dims::new(self.filter_rows, self.filter_columns, input.depth()),
            });
        }
        let expected = crate::Dims::new(
            (input.rows() - self.filter_rows) / self.stride + 1,
            (input.columns() - self.filter_columns) / self.stride + 1,
            input.depth(),
        );
        if result.dims() != expected {
            return Err(Error::ResultDimensionMismatch {
                expected,
                got: result.dims(),
            });
        }
        Ok(())
    }
}

/// Max pooling: each output cell takes the largest unmasked value of its
/// window and records where it came from.
pub fn max_pool(
    input: &Matrix,
    result: &Matrix,
    geometry: PoolGeometry,
    positions: &mut PositionMap,
) -> Result<()> {
    geometry.validate(input, result)?;
    let masked = input.has_mask();
    for depth in 0..result.depth() {
        for row in 0..result.rows() {
            for column in 0..result.columns() {
                let mut best: Option<(f64, usize, usize)> = None;
                for fr in 0..geometry.filter_rows {
                    for fc in 0..geometry.filter_columns {
                        let input_row = row * geometry.stride + fr;
                        let input_column = column * geometry.stride + fc;
                        if masked && input.has_mask_at(input_row, input_column, depth) {
                            continue;
                        }
                        let value = input.get(input_row, input_column, depth);
                        if best.map_or(true, |(current, _, _)| value > current) {
                            best = Some((value, input_row, input_column));
                        }
                    }
                }
                if let Some((value, input_row, input_column)) = best {
                    result.set(row, column, depth, value);
                    positions.insert((row, column, depth), (input_row, input_column));
                }
            }
        }
    }
    Ok(())
}

/// Average pooling over the full window size (masked cells contribute
/// nothing but the divisor stays F_r * F_c).
pub fn average_pool(input: &Matrix, result: &Matrix, geometry: PoolGeometry) -> Result<()> {
    geometry.validate(input, result)?;
    let masked = input.has_mask();
    let inverse_window = 1.0 / (geometry.filter_rows * geometry.filter_columns) as f64;
    for depth in 0..result.depth() {
        for row in 0..result.rows() {
            for column in 0..result.columns() {
                let mut accumulator = 0.0;
                for fr in 0..geometry.filter_rows {
                    for fc in 0..geometry.filter_columns {
                        let input_row = row * geometry.stride + fr;
                        let input_column = column * geometry.stride + fc;
                        if masked && input.has_mask_at(input_row, input_column, depth) {
                            continue;
                        }
                        accumulator += input.get(input_row, input_column, depth);
                    }
                }
                result.set(row, column, depth, accumulator * inverse_window);
            }
        }
    }
    Ok(())
}

/// Random pooling: the source cell is drawn with probability proportional
/// to its magnitude; an all-zero window falls back to a uniform draw over
/// its unmasked cells.
pub fn random_pool(
    input: &Matrix,
    result: &Matrix,
    geometry: PoolGeometry,
    rng: &mut impl Rng,
    positions: &mut PositionMap,
) -> Result<()> {
    geometry.validate(input, result)?;
    let masked = input.has_mask();
    for depth in 0..result.depth() {
        for row in 0..result.rows() {
            for column in 0..result.columns() {
                let mut candidates: Vec<(usize, usize, f64)> = Vec::new();
                let mut total = 0.0;
                for fr in 0..geometry.filter_rows {
                    for fc in 0..geometry.filter_columns {
                        let input_row = row * geometry.stride + fr;
                        let input_column = column * geometry.stride + fc;
                        if masked && input.has_mask_at(input_row, input_column, depth) {
                            continue;
                        }
                        let weight = input.get(input_row, input_column, depth).abs();
                        total += weight;
                        candidates.push((input_row, input_column, weight));
                    }
                }
                if candidates.is_empty() {
                    continue;
                }
                let (input_row, input_column) = if total > 0.0 {
                    let mut draw = rng.gen::<f64>() * total;
                    let mut chosen = (candidates[0].0, candidates[0].1);
                    for (r, c, weight) in &candidates {
                        draw -= weight;
                        if draw <= 0.0 {
                            chosen = (*r, *c);
                            break;
                        }
                    }
                    chosen
                } else {
                    let index = rng.gen_range(0..candidates.len());
                    (candidates[index].0, candidates[index].1)
                };
                result.set(row, column, depth, input.get(input_row, input_column, depth));
                positions.insert((row, column, depth), (input_row, input_column));
            }
        }
    }
    Ok(())
}

/// Cyclic pooling: the source cell cycles deterministically through the
/// window positions across successive output cells and successive calls.
/// The cursor lives on this value, so one `CyclicPool` carried across a
/// training loop keeps cycling where it left off.
#[derive(Debug, Default, Clone)]
pub struct CyclicPool {
    row: usize,
    column: usize,
}

impl CyclicPool {
    pub fn new() -> Self {
        CyclicPool::default()
    }

    fn advance(&mut self, geometry: &PoolGeometry) {
        self.row += 1;
        if self.row >= geometry.filter_rows {
            self.row = 0;
            self.column += 1;
            if self.column >= geometry.filter_columns {
                self.column = 0;
            }
        }
    }

    /// Apply one cyclic pooling pass.
    pub fn apply(
        &mut self,
        input: &Matrix,
        result: &Matrix,
        geometry: PoolGeometry,
        positions: &mut PositionMap,
    ) -> Result<()> {
        geometry.validate(input, result)?;
        let masked = input.has_mask();
        for depth in 0..result.depth() {
            for row in 0..result.rows() {
                for column in 0..result.columns() {
                    if masked {
                        // Skip cursor positions resting on masked cells.
                        let mut remaining = geometry.filter_rows * geometry.filter_columns;
                        while remaining > 0 {
                            let input_row = row * geometry.stride + self.row;
                            let input_column = column * geometry.stride + self.column;
                            if !input.has_mask_at(input_row, input_column, depth) {
                                break;
                            }
                            self.advance(&geometry);
                            remaining -= 1;
                        }
                        if remaining == 0 {
                            continue;
                        }
                    }
                    let input_row = row * geometry.stride + self.row;
                    let input_column = column * geometry.stride + self.column;
                    result.set(row, column, depth, input.get(input_row, input_column, depth));
                    positions.insert((row, column, depth), (input_row, input_column));
                    self.advance(&geometry);
                }
            }
        }
        Ok(())
    }
}

/// Gradient of the positional pooling operators: each output-gradient cell
/// lands on exactly the source cell its position map recorded.
pub fn positional_pool_gradient(
    output_gradient: &Matrix,
    input_gradient: &Matrix,
    positions: &PositionMap,
) -> Result<()> {
    for depth in 0..output_gradient.depth() {
        for row in 0..output_gradient.rows() {
            for column in 0..output_gradient.columns() {
                if let Some(&(input_row, input_column)) = positions.get(&(row, column, depth)) {
                    input_gradient.increment(
                        input_row,
                        input_column,
                        depth,
                        output_gradient.get(row, column, depth),
                    );
                }
            }
        }
    }
    Ok(())
}

/// Gradient of average pooling: spread each output-gradient cell evenly
/// over its window.
pub fn average_pool_gradient(
    output_gradient: &Matrix,
    input_gradient: &Matrix,
    geometry: PoolGeometry,
) -> Result<()> {
    let inverse_window = 1.0 / (geometry.filter_rows * geometry.filter_columns) as f64;
    for depth in 0..output_gradient.depth() {
        for row in 0..output_gradient.rows() {
            for column in 0..output_gradient.columns() {
                let share = output_gradient.get(row, column, depth) * inverse_window;
                for fr in 0..geometry.filter_rows {
                    for fc in 0..geometry.filter_columns {
                        input_gradient.increment(
                            row * geometry.stride + fr,
                            column * geometry.stride + fc,
                            depth,
                            share,
                        );
                    }
                }
            }
        }
    }
    Ok(())
}
