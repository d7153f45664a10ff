use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use crate::matrix::Matrix;

// Initialization — named weight-initialization schemes
//
// A scheme resolves to a cell initializer (row, column) -> value applied to
// every depth plane. The fan-based schemes read the matrix's own geometry;
// the convolutional variants take explicit fan counts (channels x filter
// area in, filters x filter area out).

/// Named initialization schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Initialization {
    Zero,
    One,
    Random,
    Identity,
    NormalXavier,
    UniformXavier,
    NormalHe,
    UniformHe,
    NormalLecun,
    UniformLecun,
    NormalXavierConv,
    UniformXavierConv,
    NormalHeConv,
    UniformHeConv,
    NormalLecunConv,
    UniformLecunConv,
}

/// Uniform draw from (-range, +range).
fn uniform(range: f64, rng: &mut impl Rng) -> f64 {
    (2.0 * rng.gen::<f64>() - 1.0) * range
}

/// Normal draw with the given standard deviation.
fn normal(standard_deviation: f64, rng: &mut impl Rng) -> f64 {
    let sample: f64 = StandardNormal.sample(rng);
    sample * standard_deviation
}

impl Initialization {
    /// Populate `matrix` with this scheme. `inputs`/`outputs` are the fan
    /// counts for the convolutional variants and ignored otherwise.
    pub fn apply(self, matrix: &Matrix, inputs: usize, outputs: usize, rng: &mut impl Rng) {
        let rows = matrix.rows() as f64;
        let columns = matrix.columns() as f64;
        let fan_in = inputs as f64;
        let fan_out = outputs as f64;
        for depth in 0..matrix.depth() {
            for column in 0..matrix.columns() {
                for row in 0..matrix.rows() {
                    let value = match self {
                        Initialization::Zero => 0.0,
                        Initialization::One => 1.0,
                        Initialization::Random => rng.gen::<f64>(),
                        Initialization::Identity => {
                            if row == column {
                                1.0
                            } else {
                                0.0
                            }
                        }
                        Initialization::NormalXavier => {
                            normal((2.0 / (rows + columns)).sqrt(), rng)
                        }
                        Initialization::UniformXavier => {
                            uniform((6.0 / (rows + columns)).sqrt(), rng)
                        }
                        Initialization::NormalHe => normal((2.0 / rows).sqrt(), rng),
                        Initialization::UniformHe => uniform((6.0 / rows).sqrt(), rng),
                        Initialization::NormalLecun => normal((1.0 / rows).sqrt(), rng),
                        Initialization::UniformLecun => uniform((3.0 / rows).sqrt(), rng),
                        Initialization::NormalXavierConv => {
                            normal((2.0 / (fan_out + fan_in)).sqrt(), rng)
                        }
                        Initialization::UniformXavierConv => {
                            uniform((6.0 / (fan_out + fan_in)).sqrt(), rng)
                        }
                        Initialization::NormalHeConv => normal((2.0 / fan_out).sqrt(), rng),
                        Initialization::UniformHeConv => uniform((6.0 / fan_out).sqrt(), rng),
                        Initialization::NormalLecunConv => normal((1.0 / fan_out).sqrt(), rng),
                        Initialization::UniformLecunConv => uniform((3.0 / fan_out).sqrt(), rng),
                    };
                    matrix.set(row, column, depth, value);
                }
            }
        }
    }
}

impl Matrix {
    /// Populate this matrix with a named initialization scheme.
    pub fn initialize_with(
        &self,
        initialization: Initialization,
        inputs: usize,
        outputs: usize,
        rng: &mut impl Rng,
    ) {
        initialization.apply(self, inputs, outputs, rng);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_identity() {
        let matrix = Matrix::dense(3, 3, 1);
        let mut rng = StdRng::seed_from_u64(1);
        matrix.initialize_with(Initialization::Identity, 0, 0, &mut rng);
        for row in 0..3 {
            for column in 0..3 {
                let expected = if row == column { 1.0 } else { 0.0 };
                assert_eq!(matrix.get(row, column, 0), expected);
            }
        }
    }

    #[test]
    fn test_uniform_xavier_stays_in_range() {
        let matrix = Matrix::dense(8, 8, 1);
        let mut rng = StdRng::seed_from_u64(2);
        matrix.initialize_with(Initialization::UniformXavier, 0, 0, &mut rng);
        let range = (6.0f64 / 16.0).sqrt();
        for row in 0..8 {
            for column in 0..8 {
                assert!(matrix.get(row, column, 0).abs() <= range);
            }
        }
    }

    #[test]
    fn test_seeded_runs_reproduce() {
        let a = Matrix::dense(4, 4, 1);
        let b = Matrix::dense(4, 4, 1);
        let mut rng_a = StdRng::seed_from_u64(9);
        let mut rng_b = StdRng::seed_from_u64(9);
        a.initialize_with(Initialization::NormalHe, 0, 0, &mut rng_a);
        b.initialize_with(Initialization::NormalHe, 0, 0, &mut rng_b);
        assert!(a.equals(&b).unwrap());
    }
}
