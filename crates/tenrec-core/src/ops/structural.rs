use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::storage::StorageKind;

// Structural operators — join, unjoin, split, flatten, unflatten
//
// These rearrange cells without computing on them. Join and split keep the
// sparse variant only when every operand is sparse (one dense operand makes
// the result dense); flatten/unflatten walk cells in array-index order so a
// round trip reproduces the original layout exactly.

/// Storage variant for a result combining two operands.
fn joined_kind(lhs: &Matrix, rhs: &Matrix) -> StorageKind {
    if lhs.kind() == StorageKind::Sparse && rhs.kind() == StorageKind::Sparse {
        StorageKind::Sparse
    } else {
        StorageKind::Dense
    }
}

/// Concatenate two matrices along rows (`vertical`) or columns.
pub fn join(lhs: &Matrix, rhs: &Matrix, vertical: bool) -> Result<Matrix> {
    if lhs.depth() != rhs.depth()
        || (vertical && lhs.columns() != rhs.columns())
        || (!vertical && lhs.rows() != rhs.rows())
    {
        return Err(Error::DimensionMismatch {
            lhs: lhs.dims(),
            rhs: rhs.dims(),
        });
    }
    let (rows, columns) = if vertical {
        (lhs.rows() + rhs.rows(), lhs.columns())
    } else {
        (lhs.rows(), lhs.columns() + rhs.columns())
    };
    let result = Matrix::new(joined_kind(lhs, rhs), rows, columns, lhs.depth());
    for depth in 0..lhs.depth() {
        for row in 0..lhs.rows() {
            for column in 0..lhs.columns() {
                result.set(row, column, depth, lhs.get(row, column, depth));
            }
        }
        for row in 0..rhs.rows() {
            for column in 0..rhs.columns() {
                if vertical {
                    result.set(lhs.rows() + row, column, depth, rhs.get(row, column, depth));
                } else {
                    result.set(row, lhs.columns() + column, depth, rhs.get(row, column, depth));
                }
            }
        }
    }
    Ok(result)
}

/// Extract a window starting at the given origin with the given extents.
pub fn unjoin(
    input: &Matrix,
    start_row: usize,
    start_column: usize,
    start_depth: usize,
    rows: usize,
    columns: usize,
    depth: usize,
) -> Result<Matrix> {
    if rows == 0
        || columns == 0
        || depth == 0
        || start_row + rows > input.rows()
        || start_column + columns > input.columns()
        || start_depth + depth > input.depth()
    {
        return Err(Error::SliceOutOfBounds {
            start_row,
            start_column,
            start_depth,
            window: crate::Dims::new(rows, columns, depth),
            dims: input.dims(),
        });
    }
    let result = Matrix::new(input.kind(), rows, columns, depth);
    for d in 0..depth {
        for row in 0..rows {
            for column in 0..columns {
                result.set(
                    row,
                    column,
                    d,
                    input.get(start_row + row, start_column + column, start_depth + d),
                );
            }
        }
    }
    Ok(result)
}

/// Cut a matrix into two at `position` along rows (`vertical`) or columns.
pub fn split(input: &Matrix, position: usize, vertical: bool) -> Result<(Matrix, Matrix)> {
    let limit = if vertical { input.rows() } else { input.columns() };
    if position < 1 || position >= limit {
        return Err(Error::CutOutOfBounds { position, limit });
    }
    let (first, second) = if vertical {
        (
            unjoin(input, 0, 0, 0, position, input.columns(), input.depth())?,
            unjoin(
                input,
                position,
                0,
                0,
                input.rows() - position,
                input.columns(),
                input.depth(),
            )?,
        )
    } else {
        (
            unjoin(input, 0, 0, 0, input.rows(), position, input.depth())?,
            unjoin(
                input,
                0,
                position,
                0,
                input.rows(),
                input.columns() - position,
                input.depth(),
            )?,
        )
    };
    Ok((first, second))
}

/// Linearize rows x columns x depth into a single column, in array-index
/// order (rows fastest, then columns, then depth).
pub fn flatten(input: &Matrix) -> Matrix {
    let result = Matrix::new(input.kind(), input.size(), 1, 1);
    let mut index = 0;
    for depth in 0..input.depth() {
        for column in 0..input.columns() {
            for row in 0..input.rows() {
                result.set(index, 0, 0, input.get(row, column, depth));
                index += 1;
            }
        }
    }
    result
}

/// Rebuild the given geometry from a flattened column, inverting
/// [`flatten`]'s cell order.
pub fn unflatten(input: &Matrix, rows: usize, columns: usize, depth: usize) -> Result<Matrix> {
    let target = crate::Dims::new(rows, columns, depth);
    if input.size() != target.size() {
        return Err(Error::DimensionMismatch {
            lhs: input.dims(),
            rhs: target,
        });
    }
    let result = Matrix::new(input.kind(), rows, columns, depth);
    let mut index = 0;
    for d in 0..depth {
        for column in 0..columns {
            for row in 0..rows {
                result.set(row, column, d, input.get(index, 0, 0));
                index += 1;
            }
        }
    }
    Ok(result)
}

/// Cell-for-cell equality of two matrices of identical geometry.
pub fn equals(lhs: &Matrix, rhs: &Matrix) -> Result<bool> {
    if lhs.dims() != rhs.dims() {
        return Err(Error::DimensionMismatch {
            lhs: lhs.dims(),
            rhs: rhs.dims(),
        });
    }
    for depth in 0..lhs.depth() {
        for column in 0..lhs.columns() {
            for row in 0..lhs.rows() {
                if lhs.get(row, column, depth) != rhs.get(row, column, depth) {
                    return Ok(false);
                }
            }
        }
    }
    Ok(true)
}

/// Copy every cell of `source` into `target` (geometry must match).
pub fn copy_into(source: &Matrix, target: &Matrix) -> Result<()> {
    if source.dims() != target.dims() {
        return Err(Error::DimensionMismatch {
            lhs: source.dims(),
            rhs: target.dims(),
        });
    }
    for depth in 0..source.depth() {
        for column in 0..source.columns() {
            for row in 0..source.rows() {
                target.set(row, column, depth, source.get(row, column, depth));
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
    fn test_join_vertical_then_split_round_trips() {
        let a = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let b = Matrix::from_values(1, 2, 1, &[5.0, 6.0]).unwrap();
        let joined = join(&a, &b, true).unwrap();
        assert_eq!(joined.dims(), crate::Dims::new(3, 2, 1));
        assert_eq!(joined.get(2, 1, 0), 6.0);

        let (top, bottom) = split(&joined, 2, true).unwrap();
        assert!(equals(&top, &a).unwrap());
        assert!(equals(&bottom, &b).unwrap());
    }

    #[test]
    fn test_join_rejects_mismatched_columns() {
        let a = Matrix::dense(2, 2, 1);
        let b = Matrix::dense(2, 3, 1);
        let err = join(&a, &b, true).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Dimension);
    }

    #[test]
    fn test_join_keeps_sparse_only_when_both_sparse() {
        let a = Matrix::sparse(2, 2, 1);
        let b = Matrix::sparse(2, 2, 1);
        assert_eq!(join(&a, &b, false).unwrap().kind(), crate::StorageKind::Sparse);

        let c = Matrix::dense(2, 2, 1);
        assert_eq!(join(&a, &c, false).unwrap().kind(), crate::StorageKind::Dense);
    }

    #[test]
    fn test_flatten_unflatten_round_trip() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let input = Matrix::from_values(2, 3, 1, &values).unwrap();
        let flat = flatten(&input);
        assert_eq!(flat.dims(), crate::Dims::new(6, 1, 1));
        let back = unflatten(&flat, 2, 3, 1).unwrap();
        assert!(equals(&input, &back).unwrap());
    }

    #[test]
    fn test_unflatten_size_checked() {
        let flat = Matrix::dense(6, 1, 1);
        let err = unflatten(&flat, 2, 2, 2).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Dimension);
    }

    #[test]
    fn test_split_bounds() {
        let m = Matrix::dense(4, 4, 1);
        assert!(split(&m, 0, true).is_err());
        assert!(split(&m, 4, true).is_err());
        assert!(split(&m, 2, false).is_ok());
    }
}
