use crate::error::{Error, Result};
use crate::matrix::Matrix;

// Element-wise algorithms — unary and binary application with masking and
// scalar broadcast
//
// Masked cells are skipped: they contribute nothing and the corresponding
// result cell keeps its storage default. A scalar operand broadcasts
// against any geometry; two non-scalar operands must agree on all three
// axes (strict per-axis equality).

/// Named single-variable functions usable through the typed `apply` surface
/// and recordable as unary expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryFn {
    Abs,
    Cbrt,
    Cos,
    Cosh,
    Exp,
    Inverse,
    Log,
    Log10,
    Neg,
    Sign,
    Sin,
    Sinh,
    Sqrt,
    Square,
    Tan,
    Tanh,
}

impl UnaryFn {
    /// Evaluate the function at a value.
    pub fn apply(self, value: f64) -> f64 {
        match self {
            UnaryFn::Abs => value.abs(),
            UnaryFn::Cbrt => value.cbrt(),
            UnaryFn::Cos => value.cos(),
            UnaryFn::Cosh => value.cosh(),
            UnaryFn::Exp => value.exp(),
            UnaryFn::Inverse => {
                if value != 0.0 {
                    1.0 / value
                } else {
                    f64::INFINITY
                }
            }
            UnaryFn::Log => value.ln(),
            UnaryFn::Log10 => value.log10(),
            UnaryFn::Neg => -value,
            UnaryFn::Sign => {
                if value > 0.0 {
                    1.0
                } else if value < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
            UnaryFn::Sin => value.sin(),
            UnaryFn::Sinh => value.sinh(),
            UnaryFn::Sqrt => value.sqrt(),
            UnaryFn::Square => value * value,
            UnaryFn::Tan => value.tan(),
            UnaryFn::Tanh => value.tanh(),
        }
    }
}

/// Named two-variable functions usable through the typed `apply_binary`
/// surface and recordable as binary expressions. The four arithmetic
/// operators have dedicated expression types and are not listed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFn {
    Pow,
    Max,
    Min,
}

impl BinaryFn {
    /// Evaluate the function at a pair of values.
    pub fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryFn::Pow => lhs.powf(rhs),
            BinaryFn::Max => lhs.max(rhs),
            BinaryFn::Min => lhs.min(rhs),
        }
    }
}

/// Whether a cell of an operand is masked, with scalar operands collapsing
/// every coordinate onto their single cell.
fn masked_at(matrix: &Matrix, row: usize, column: usize, depth: usize) -> bool {
    if matrix.is_scalar() {
        matrix.has_mask_at(0, 0, 0)
    } else {
        matrix.has_mask_at(row, column, depth)
    }
}

/// Apply a single-variable function cell-wise into `result`.
pub fn apply_unary(
    input: &Matrix,
    result: &Matrix,
    function: impl Fn(f64) -> f64,
) -> Result<()> {
    if result.dims() != input.dims() {
        return Err(Error::ResultDimensionMismatch {
            expected: input.dims(),
            got: result.dims(),
        });
    }
    let masked = input.has_mask();
    for depth in 0..input.depth() {
        for column in 0..input.columns() {
            for row in 0..input.rows() {
                if masked && input.has_mask_at(row, column, depth) {
                    continue;
                }
                result.set(row, column, depth, function(input.get(row, column, depth)));
            }
        }
    }
    Ok(())
}

/// Apply a two-variable function cell-wise into `result`, broadcasting
/// scalar operands. Non-scalar geometries must match on every axis.
pub fn apply_binary(
    lhs: &Matrix,
    rhs: &Matrix,
    result: &Matrix,
    function: impl Fn(f64, f64) -> f64,
) -> Result<()> {
    if !lhs.is_scalar() && !rhs.is_scalar() && lhs.dims() != rhs.dims() {
        return Err(Error::DimensionMismatch {
            lhs: lhs.dims(),
            rhs: rhs.dims(),
        });
    }
    // The result takes the larger of the two operand geometries.
    let frame = if !lhs.is_scalar() { lhs } else { rhs };
    if !result.is_scalar() && result.dims() != frame.dims() {
        return Err(Error::ResultDimensionMismatch {
            expected: frame.dims(),
            got: result.dims(),
        });
    }
    let masked = lhs.has_mask() || rhs.has_mask();
    for depth in 0..frame.depth() {
        for column in 0..frame.columns() {
            for row in 0..frame.rows() {
                if masked
                    && (masked_at(lhs, row, column, depth) || masked_at(rhs, row, column, depth))
                {
                    continue;
                }
                let left = if lhs.is_scalar() {
                    lhs.get(0, 0, 0)
                } else {
                    lhs.get(row, column, depth)
                };
                let right = if rhs.is_scalar() {
                    rhs.get(0, 0, 0)
                } else {
                    rhs.get(row, column, depth)
                };
                result.set(row, column, depth, function(left, right));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Matrix;

    #[test]
    fn test_unary_skips_masked_cells() {
        let input = Matrix::from_values(2, 2, 1, &[1.0, 4.0, 9.0, 16.0]).unwrap();
        input.ensure_mask();
        input.mask().unwrap().set_mask(0, 1, 0, true);

        let result = Matrix::dense(2, 2, 1);
        apply_unary(&input, &result, |v| v.sqrt()).unwrap();
        assert_eq!(result.get(0, 0, 0), 1.0);
        assert_eq!(result.get(0, 1, 0), 0.0); // masked: default survives
        assert_eq!(result.get(1, 0, 0), 3.0);
    }

    #[test]
    fn test_binary_rejects_mismatched_non_scalars() {
        let a = Matrix::dense(2, 3, 1);
        let b = Matrix::dense(2, 4, 1);
        let result = Matrix::dense(2, 3, 1);
        let err = apply_binary(&a, &b, &result, |x, y| x + y).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Dimension);
    }

    #[test]
    fn test_scalar_broadcast() {
        let a = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let s = Matrix::scalar(10.0);
        let result = Matrix::dense(2, 2, 1);
        apply_binary(&a, &s, &result, |x, y| x + y).unwrap();
        assert_eq!(result.get(0, 0, 0), 11.0);
        assert_eq!(result.get(1, 1, 0), 14.0);
    }

    #[test]
    fn test_sign_values() {
        assert_eq!(UnaryFn::Sign.apply(-3.0), -1.0);
        assert_eq!(UnaryFn::Sign.apply(0.0), 0.0);
        assert_eq!(UnaryFn::Sign.apply(0.5), 1.0);
    }

    #[test]
    fn test_inverse_of_zero_is_infinite() {
        assert_eq!(UnaryFn::Inverse.apply(0.0), f64::INFINITY);
    }
}
