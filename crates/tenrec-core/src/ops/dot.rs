use crate::error::{Error, Result};
use crate::matrix::Matrix;

// Dot product — per-depth-slice matrix multiplication
//
// Output geometry is (left rows) x (right columns) per depth slice; the
// inner dimensions must agree and the depth counts must match. A masked
// cell of either operand drops its term from the inner accumulation.

/// Multiply `lhs` by `rhs` into `result`.
pub fn apply_dot(lhs: &Matrix, rhs: &Matrix, result: &Matrix) -> Result<()> {
    if lhs.columns() != rhs.rows() {
        return Err(Error::InnerDimensionMismatch {
            lhs_columns: lhs.columns(),
            rhs_rows: rhs.rows(),
        });
    }
    if lhs.depth() != rhs.depth() {
        return Err(Error::DimensionMismatch {
            lhs: lhs.dims(),
            rhs: rhs.dims(),
        });
    }
    let expected = crate::Dims::new(lhs.rows(), rhs.columns(), lhs.depth());
    if result.dims() != expected {
        return Err(Error::ResultDimensionMismatch {
            expected,
            got: result.dims(),
        });
    }
    let masked = lhs.has_mask() || rhs.has_mask();
    for depth in 0..lhs.depth() {
        for row in 0..lhs.rows() {
            for column in 0..rhs.columns() {
                let mut accumulator = 0.0;
                for inner in 0..lhs.columns() {
                    if masked
                        && (lhs.has_mask_at(row, inner, depth)
                            || rhs.has_mask_at(inner, column, depth))
                    {
                        continue;
                    }
                    accumulator += lhs.get(row, inner, depth) * rhs.get(inner, column, depth);
                }
                result.set(row, column, depth, accumulator);
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
    fn test_dot_values() {
        let a = Matrix::from_values(2, 3, 1, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Matrix::from_values(3, 2, 1, &[7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let result = Matrix::dense(2, 2, 1);
        apply_dot(&a, &b, &result).unwrap();
        assert_eq!(result.get(0, 0, 0), 58.0);
        assert_eq!(result.get(0, 1, 0), 64.0);
        assert_eq!(result.get(1, 0, 0), 139.0);
        assert_eq!(result.get(1, 1, 0), 154.0);
    }

    #[test]
    fn test_inner_dimension_checked() {
        let a = Matrix::dense(2, 3, 1);
        let b = Matrix::dense(2, 2, 1);
        let result = Matrix::dense(2, 2, 1);
        let err = apply_dot(&a, &b, &result).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Dimension);
    }

    #[test]
    fn test_transposed_operand() {
        // (3x2)^T . (3x2) = 2x2.
        let a = Matrix::from_values(3, 2, 1, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let at = a.transpose().unwrap();
        let result = Matrix::dense(2, 2, 1);
        apply_dot(&at, &a, &result).unwrap();
        assert_eq!(result.get(0, 0, 0), 35.0); // 1+9+25
        assert_eq!(result.get(0, 1, 0), 44.0);
        assert_eq!(result.get(1, 1, 0), 56.0); // 4+16+36
    }
}
