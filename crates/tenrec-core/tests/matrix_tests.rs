// Integration tests for the matrix core: geometry, storage variants,
// masking, arithmetic, reductions and structural operators.

use tenrec_core::{Dims, Direction, ErrorKind, Mask, Matrix, StorageKind, UnaryFn};

fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}

// Geometry

#[test]
fn test_size_law_under_transpose_and_slice() {
    let matrix = Matrix::dense(5, 3, 2);
    assert_eq!(matrix.rows() * matrix.columns() * matrix.depth(), matrix.size());

    let transposed = matrix.transpose().unwrap();
    assert_eq!(
        transposed.rows() * transposed.columns() * transposed.depth(),
        transposed.size()
    );

    let sliced = matrix.slice(1, 0, 0, 2, 3, 1).unwrap();
    assert_eq!(sliced.rows() * sliced.columns() * sliced.depth(), sliced.size());

    let transposed_slice = sliced.transpose().unwrap();
    assert_eq!(
        transposed_slice.rows() * transposed_slice.columns() * transposed_slice.depth(),
        transposed_slice.size()
    );
}

#[test]
fn test_double_transpose_matches_original() {
    let matrix = Matrix::from_values(3, 2, 1, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let back = matrix.transpose().unwrap().transpose().unwrap();
    assert_eq!(back.dims(), matrix.dims());
    assert!(matrix.equals(&back).unwrap());
}

#[test]
fn test_identical_geometry_indexes_identically() {
    let a = Matrix::dense(4, 3, 2);
    let b = Matrix::dense(4, 3, 2);
    a.set(2, 1, 1, 7.0);
    b.set(2, 1, 1, 7.0);
    assert!(a.equals(&b).unwrap());
}

#[test]
fn test_slice_beyond_bounds_is_dimension_error() {
    let matrix = Matrix::dense(4, 4, 1);
    let err = matrix.slice(2, 2, 0, 3, 3, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dimension);
}

#[test]
fn test_unsliceable_matrix_rejects_slicing() {
    let matrix = Matrix::unsliceable(StorageKind::Dense, 4, 4, 1);
    let err = matrix.slice(0, 0, 0, 2, 2, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);

    let scalar = Matrix::scalar(1.0);
    let err = scalar.slice(0, 0, 0, 1, 1, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
}

#[test]
fn test_scalar_is_always_one_by_one() {
    let scalar = Matrix::scalar(5.0);
    assert!(scalar.is_scalar());
    let transposed = scalar.transpose().unwrap();
    assert_eq!(transposed.dims(), Dims::new(1, 1, 1));
    assert_eq!(transposed.get(0, 0, 0), 5.0);
}

// Storage variants

#[test]
fn test_sparse_and_dense_agree() {
    let dense = Matrix::dense(3, 3, 1);
    let sparse = Matrix::sparse(3, 3, 1);
    for (row, column, value) in [(0, 0, 1.0), (1, 2, -2.0), (2, 1, 0.5)] {
        dense.set(row, column, 0, value);
        sparse.set(row, column, 0, value);
    }
    assert!(dense.equals(&sparse).unwrap());
    assert_eq!(sparse.get(2, 2, 0), 0.0);

    let dense_sum = dense.add(&dense).unwrap();
    let sparse_sum = sparse.add(&sparse).unwrap();
    assert!(dense_sum.equals(&sparse_sum).unwrap());
}

// Broadcasting and arithmetic

#[test]
fn test_scalar_broadcast_matches_cell_math() {
    let matrix = Matrix::from_values(2, 3, 1, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let shifted = matrix.add(&Matrix::scalar(1.5)).unwrap();
    for row in 0..2 {
        for column in 0..3 {
            assert_eq!(shifted.get(row, column, 0), matrix.get(row, column, 0) + 1.5);
        }
    }
}

#[test]
fn test_mismatched_geometry_is_rejected() {
    let a = Matrix::dense(2, 3, 1);
    let b = Matrix::dense(2, 4, 1);
    assert_eq!(a.add(&b).unwrap_err().kind(), ErrorKind::Dimension);
    assert_eq!(a.multiply(&b).unwrap_err().kind(), ErrorKind::Dimension);
    // One equal axis is not enough.
    assert!(!a.has_equal_size(&b));
}

#[test]
fn test_divide_by_scalar_zero_is_positive_infinity() {
    let matrix = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let quotient = matrix.divide(&Matrix::scalar(0.0)).unwrap();
    for row in 0..2 {
        for column in 0..2 {
            let value = quotient.get(row, column, 0);
            assert!(value.is_infinite() && value.is_sign_positive());
            assert!(!value.is_nan());
        }
    }
}

#[test]
fn test_unary_function_application() {
    let matrix = Matrix::from_values(2, 2, 1, &[1.0, 4.0, 9.0, 16.0]).unwrap();
    let roots = matrix.apply(UnaryFn::Sqrt).unwrap();
    assert_eq!(roots.get(1, 1, 0), 4.0);

    let signs = Matrix::from_values(1, 3, 1, &[-2.0, 0.0, 3.0])
        .unwrap()
        .apply(UnaryFn::Sign)
        .unwrap();
    assert_eq!(signs.get(0, 0, 0), -1.0);
    assert_eq!(signs.get(0, 1, 0), 0.0);
    assert_eq!(signs.get(0, 2, 0), 1.0);
}

// Dot product

#[test]
fn test_dot_geometry_and_failure() {
    let a = Matrix::from_values(2, 3, 1, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let b = Matrix::from_values(3, 1, 1, &[1.0, 1.0, 1.0]).unwrap();
    let product = a.dot(&b).unwrap();
    assert_eq!(product.dims(), Dims::new(2, 1, 1));
    assert_eq!(product.get(0, 0, 0), 6.0);
    assert_eq!(product.get(1, 0, 0), 15.0);

    let err = b.dot(&a).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dimension);
}

// Masking

#[test]
fn test_checkerboard_mask_excludes_cells_from_sum() {
    let matrix = Matrix::from_values(
        3,
        3,
        1,
        &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
    )
    .unwrap();
    matrix.ensure_mask();
    let mask = matrix.mask().unwrap();
    let mut expected = 0.0;
    for row in 0..3 {
        for column in 0..3 {
            if (row + column) % 2 == 0 {
                mask.set_mask(row, column, 0, true);
            } else {
                expected += matrix.get(row, column, 0);
            }
        }
    }
    assert_eq!(matrix.sum(), expected);
    // Mean divides by the unmasked count only.
    assert!(approx_eq(matrix.mean(), expected / 4.0, 1e-12));
}

#[test]
fn test_mask_stack_restores_bit_for_bit() {
    let matrix = Matrix::dense(4, 4, 1);
    matrix.ensure_mask();
    let mask = matrix.mask().unwrap();
    let pattern = [(0, 0), (1, 2), (2, 1), (3, 3)];
    for &(row, column) in &pattern {
        mask.set_mask(row, column, 0, true);
    }

    mask.stack_mask(true);
    mask.set_mask(0, 3, 0, true);
    mask.unstack_mask().unwrap();

    for row in 0..4 {
        for column in 0..4 {
            let expected = pattern.contains(&(row, column));
            assert_eq!(mask.get_mask(row, column, 0), expected);
        }
    }
    // The stack is empty again.
    assert_eq!(
        mask.unstack_mask().unwrap_err().kind(),
        ErrorKind::State
    );
}

#[test]
fn test_mask_variant_and_geometry_enforced() {
    let matrix = Matrix::sparse(2, 2, 1);
    let dense_mask = Mask::new(StorageKind::Dense, 2, 2, 1);
    assert_eq!(
        matrix.set_mask(dense_mask).unwrap_err().kind(),
        ErrorKind::TypeMismatch
    );
    let small_mask = Mask::new(StorageKind::Sparse, 1, 2, 1);
    assert_eq!(
        matrix.set_mask(small_mask).unwrap_err().kind(),
        ErrorKind::Dimension
    );
}

#[test]
fn test_row_and_column_masks_compose() {
    let matrix = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    matrix.ensure_mask();
    let mask = matrix.mask().unwrap();
    mask.set_row_mask(0, true);
    assert_eq!(matrix.sum(), 7.0);
    mask.set_column_mask(0, true);
    assert_eq!(matrix.sum(), 4.0);
}

// Reductions

#[test]
fn test_directional_reductions() {
    let matrix = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let row_sums = matrix.sum_along(Direction::Row).unwrap();
    assert_eq!(row_sums.dims(), Dims::new(1, 2, 1));
    assert_eq!(row_sums.get(0, 0, 0), 4.0);

    let column_means = matrix.mean_along(Direction::Column).unwrap();
    assert_eq!(column_means.dims(), Dims::new(2, 1, 1));
    assert_eq!(column_means.get(0, 0, 0), 1.5);
    assert_eq!(column_means.get(1, 0, 0), 3.5);

    assert_eq!(matrix.argmax(), (1, 1, 0));
    assert_eq!(matrix.min(), 1.0);
}

#[test]
fn test_variance_accepts_precomputed_mean() {
    let matrix = Matrix::from_values(1, 4, 1, &[2.0, 4.0, 6.0, 8.0]).unwrap();
    let mean = matrix.mean();
    assert!(approx_eq(matrix.variance_with_mean(mean), matrix.variance(), 1e-12));
    // Bessel-corrected standard deviation.
    let expected = (matrix.variance() * 4.0 / 3.0).sqrt();
    assert!(approx_eq(matrix.standard_deviation(), expected, 1e-12));
}

#[test]
fn test_norm_and_entropy() {
    let matrix = Matrix::from_values(1, 2, 1, &[3.0, 4.0]).unwrap();
    assert!(approx_eq(matrix.norm(2).unwrap(), 5.0, 1e-12));
    assert_eq!(matrix.norm(0).unwrap_err().kind(), ErrorKind::Parameter);

    let uniform = Matrix::from_values(4, 1, 1, &[0.25, 0.25, 0.25, 0.25]).unwrap();
    // Each term contributes -0.25*log2(0.25)=0.5; averaged over 4 cells.
    assert!(approx_eq(uniform.entropy(), 0.5, 1e-12));
}

// Structural operators

#[test]
fn test_flatten_unflatten_round_trip_2x3x1() {
    let matrix = Matrix::from_values(2, 3, 1, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
    let flat = matrix.flatten().unwrap();
    assert_eq!(flat.dims(), Dims::new(6, 1, 1));
    let back = flat.unflatten(2, 3, 1).unwrap();
    assert_eq!(back.dims(), Dims::new(2, 3, 1));
    assert!(matrix.equals(&back).unwrap());
}

#[test]
fn test_join_split_round_trip() {
    let a = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    let b = Matrix::from_values(2, 3, 1, &[5.0, 6.0, 7.0, 8.0, 9.0, 10.0]).unwrap();
    let joined = a.join(&b, false).unwrap();
    assert_eq!(joined.dims(), Dims::new(2, 5, 1));

    let (left, right) = joined.split(2, false).unwrap();
    assert!(left.equals(&a).unwrap());
    assert!(right.equals(&b).unwrap());

    let err = a.join(&Matrix::dense(3, 3, 1), false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dimension);
}

#[test]
fn test_unjoin_extracts_window() {
    let matrix = Matrix::from_values(
        3,
        3,
        1,
        &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
    )
    .unwrap();
    let window = matrix.unjoin(1, 1, 0, 2, 2, 1).unwrap();
    assert_eq!(window.get(0, 0, 0), 5.0);
    assert_eq!(window.get(1, 1, 0), 9.0);

    let err = matrix.unjoin(2, 2, 0, 2, 2, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dimension);
}

// Aliasing

#[test]
fn test_reference_shares_mask_mutations() {
    let matrix = Matrix::dense(2, 2, 1);
    matrix.ensure_mask();
    let alias = matrix.reference();
    matrix.mask().unwrap().set_mask(0, 0, 0, true);
    assert!(alias.has_mask_at(0, 0, 0));

    let copy = matrix.copy();
    matrix.mask().unwrap().set_mask(1, 1, 0, true);
    assert!(!copy.has_mask_at(1, 1, 0));
}
