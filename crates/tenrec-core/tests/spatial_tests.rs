// Integration tests for the spatial operators: convolution,
// cross-correlation, Winograd convolution and the pooling family.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tenrec_core::{CyclicPool, Dims, Matrix};

fn random_matrix(rows: usize, columns: usize, rng: &mut StdRng) -> Matrix {
    let values: Vec<f64> = (0..rows * columns).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect();
    Matrix::from_values(rows, columns, 1, &values).unwrap()
}

// Convolution

#[test]
fn test_convolution_size_law() {
    let input = Matrix::dense(7, 9, 1);
    let filter = Matrix::dense(3, 3, 1);
    let result = input.convolve(&filter).unwrap();
    assert_eq!(result.dims(), Dims::new(5, 7, 1));
}

#[test]
fn test_convolution_is_flipped_crosscorrelation() {
    let mut rng = StdRng::seed_from_u64(21);
    let input = random_matrix(5, 5, &mut rng);
    let filter = random_matrix(3, 3, &mut rng);

    // Flip the filter by hand and cross-correlate.
    let flipped = Matrix::dense(3, 3, 1);
    for row in 0..3 {
        for column in 0..3 {
            flipped.set(row, column, 0, filter.get(2 - row, 2 - column, 0));
        }
    }
    let convolved = input.convolve(&filter).unwrap();
    let correlated = input.crosscorrelate(&flipped).unwrap();
    for row in 0..3 {
        for column in 0..3 {
            assert!((convolved.get(row, column, 0) - correlated.get(row, column, 0)).abs() < 1e-12);
        }
    }
}

#[test]
fn test_convolution_stride() {
    let input = Matrix::dense(7, 7, 1);
    input.set_stride(2);
    let filter = Matrix::dense(3, 3, 1);
    let result = input.convolve(&filter).unwrap();
    assert_eq!(result.dims(), Dims::new(3, 3, 1));
}

#[test]
fn test_dilated_convolution_reaches_spread_taps() {
    // 5x5 input, 3x3 filter at dilation 2 spans the full 5x5 extent.
    let values: Vec<f64> = (0..25).map(|i| i as f64).collect();
    let input = Matrix::from_values(5, 5, 1, &values).unwrap();
    input.set_dilation(2);
    let filter = Matrix::dense(3, 3, 1);
    filter.set(0, 0, 0, 1.0);
    filter.set(2, 2, 0, 1.0);
    let result = input.crosscorrelate(&filter).unwrap();
    assert_eq!(result.dims(), Dims::new(1, 1, 1));
    // Taps at (0,0) and (4,4): values 0 and 24.
    assert_eq!(result.get(0, 0, 0), 24.0);
}

#[test]
fn test_filter_gradient_shape() {
    let input = Matrix::dense(5, 5, 1);
    let filter = Matrix::dense(3, 3, 1);
    let output = input.crosscorrelate(&filter).unwrap();

    output.set_filter_row_size(3);
    output.set_filter_column_size(3);
    let filter_gradient = output.crosscorrelate_filter_gradient(&input).unwrap();
    assert_eq!(filter_gradient.dims(), Dims::new(3, 3, 1));

    let input_gradient = output.crosscorrelate_input_gradient(&filter).unwrap();
    assert_eq!(input_gradient.dims(), Dims::new(5, 5, 1));
}

// Winograd

#[test]
fn test_winograd_matches_direct_convolution_8x8() {
    let mut rng = StdRng::seed_from_u64(42);
    let input = random_matrix(8, 8, &mut rng);
    let filter = random_matrix(3, 3, &mut rng);

    let direct = input.convolve(&filter).unwrap();
    let winograd = input.winograd_convolve(&filter).unwrap();
    assert_eq!(winograd.dims(), Dims::new(6, 6, 1));
    for row in 0..6 {
        for column in 0..6 {
            let d = direct.get(row, column, 0);
            let w = winograd.get(row, column, 0);
            let tolerance = 1e-9 * d.abs().max(1.0);
            assert!(
                (d - w).abs() < tolerance,
                "winograd {w} differs from direct {d} at ({row}, {column})"
            );
        }
    }
}

#[test]
fn test_winograd_requires_3x3_filter() {
    let input = Matrix::dense(8, 8, 1);
    let filter = Matrix::dense(5, 5, 1);
    assert!(input.winograd_convolve(&filter).is_err());
}

// Pooling

#[test]
fn test_max_pool_size_law_and_positions() {
    let mut rng = StdRng::seed_from_u64(7);
    let input = random_matrix(6, 6, &mut rng);
    input.set_filter_row_size(2);
    input.set_filter_column_size(2);
    input.set_stride(2);

    let (pooled, positions) = input.max_pool().unwrap();
    assert_eq!(pooled.dims(), Dims::new(3, 3, 1));

    // Every pooled cell has a recorded source holding exactly its value.
    for row in 0..3 {
        for column in 0..3 {
            let (source_row, source_column) = positions[&(row, column, 0)];
            assert_eq!(pooled.get(row, column, 0), input.get(source_row, source_column, 0));
        }
    }
}

#[test]
fn test_max_pool_gradient_scatters_one_cell_per_output() {
    let input = Matrix::from_values(
        4,
        4,
        1,
        &[
            1.0, 5.0, 2.0, 0.0, //
            3.0, 4.0, 1.0, 6.0, //
            7.0, 0.0, 9.0, 8.0, //
            2.0, 1.0, 3.0, 4.0,
        ],
    )
    .unwrap();
    input.set_filter_row_size(2);
    input.set_filter_column_size(2);
    input.set_stride(2);
    let (_, positions) = input.max_pool().unwrap();

    let output_gradient = Matrix::from_values(2, 2, 1, &[0.1, 0.2, 0.3, 0.4]).unwrap();
    output_gradient.set_filter_row_size(2);
    output_gradient.set_filter_column_size(2);
    output_gradient.set_stride(2);
    let input_gradient = output_gradient.positional_pool_gradient(&positions).unwrap();
    assert_eq!(input_gradient.dims(), Dims::new(4, 4, 1));

    // The maxima were at (0,1), (1,3), (2,0), (2,2).
    assert_eq!(input_gradient.get(0, 1, 0), 0.1);
    assert_eq!(input_gradient.get(1, 3, 0), 0.2);
    assert_eq!(input_gradient.get(2, 0, 0), 0.3);
    assert_eq!(input_gradient.get(2, 2, 0), 0.4);
    let total: f64 = (0..4)
        .flat_map(|r| (0..4).map(move |c| (r, c)))
        .map(|(r, c)| input_gradient.get(r, c, 0))
        .sum();
    assert!((total - 1.0).abs() < 1e-12);
}

#[test]
fn test_average_pool_values_and_gradient() {
    let input = Matrix::from_values(2, 2, 1, &[1.0, 3.0, 5.0, 7.0]).unwrap();
    input.set_filter_row_size(2);
    input.set_filter_column_size(2);
    input.set_stride(1);
    let pooled = input.average_pool().unwrap();
    assert_eq!(pooled.dims(), Dims::new(1, 1, 1));
    assert_eq!(pooled.get(0, 0, 0), 4.0);

    let output_gradient = Matrix::scalar(1.0);
    output_gradient.set_filter_row_size(2);
    output_gradient.set_filter_column_size(2);
    output_gradient.set_stride(1);
    let input_gradient = output_gradient.average_pool_gradient().unwrap();
    for row in 0..2 {
        for column in 0..2 {
            assert_eq!(input_gradient.get(row, column, 0), 0.25);
        }
    }
}

#[test]
fn test_random_pool_draws_by_magnitude() {
    let input = Matrix::from_values(2, 2, 1, &[0.0, 0.0, 0.0, 42.0]).unwrap();
    input.set_filter_row_size(2);
    input.set_filter_column_size(2);
    input.set_stride(1);
    let mut rng = StdRng::seed_from_u64(13);
    let (pooled, positions) = input.random_pool(&mut rng).unwrap();
    assert_eq!(pooled.get(0, 0, 0), 42.0);
    assert_eq!(positions[&(0, 0, 0)], (1, 1));
}

#[test]
fn test_cyclic_pool_walks_the_window() {
    let input = Matrix::from_values(2, 2, 1, &[1.0, 2.0, 3.0, 4.0]).unwrap();
    input.set_filter_row_size(2);
    input.set_filter_column_size(2);
    input.set_stride(1);

    let mut pool = CyclicPool::new();
    let mut values = Vec::new();
    for _ in 0..4 {
        let (pooled, _) = input.cyclic_pool(&mut pool).unwrap();
        values.push(pooled.get(0, 0, 0));
    }
    assert_eq!(values, vec![1.0, 3.0, 2.0, 4.0]);
}

#[test]
fn test_pooling_requires_configured_filter() {
    let input = Matrix::dense(4, 4, 1);
    assert!(input.max_pool().is_err());
}
