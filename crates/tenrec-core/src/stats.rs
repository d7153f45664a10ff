use rand::Rng;

use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::ops::elementwise;

// Statistics — softmax family, dropout, clipping, normalization
//
// Everything here is built on the dispatch-layer primitives and follows the
// same recording protocol as the arithmetic operators: one typed expression
// per call, composites kept quiet by the expression lock.

impl Matrix {
    /// Column-wise softmax over rows, per depth slice, at temperature 1.
    pub fn softmax(&self) -> Result<Matrix> {
        self.softmax_with_temperature(1.0)
    }

    /// Column-wise softmax over rows at the given temperature. Each column
    /// is shifted by its maximum before exponentiation.
    pub fn softmax_with_temperature(&self, temperature: f64) -> Result<Matrix> {
        if temperature == 0.0 {
            return Err(Error::Parameter("softmax temperature must be non-zero".into()));
        }
        let result = self.zeros_like();
        self.recorded(
            None,
            &result,
            || {
                for depth in 0..self.depth() {
                    for column in 0..self.columns() {
                        let mut max_value = f64::NEG_INFINITY;
                        for row in 0..self.rows() {
                            max_value = max_value.max(self.get(row, column, depth));
                        }
                        let mut total = 0.0;
                        for row in 0..self.rows() {
                            let value =
                                ((self.get(row, column, depth) - max_value) / temperature).exp();
                            result.set(row, column, depth, value);
                            total += value;
                        }
                        for row in 0..self.rows() {
                            result.set(row, column, depth, result.get(row, column, depth) / total);
                        }
                    }
                }
                Ok(())
            },
            |recorder, lock| {
                recorder.create_softmax_expression(lock, self, &result, temperature)
            },
        )?;
        Ok(result)
    }

    /// Gumbel softmax: sigmoid-log prior plus Gumbel noise, normalized at
    /// the given temperature.
    pub fn gumbel_softmax(&self, temperature: f64, rng: &mut impl Rng) -> Result<Matrix> {
        if temperature == 0.0 {
            return Err(Error::Parameter("softmax temperature must be non-zero".into()));
        }
        let epsilon = 1e-8;
        let result = self.zeros_like();
        self.recorded(
            None,
            &result,
            || {
                for depth in 0..self.depth() {
                    for column in 0..self.columns() {
                        let mut total = 0.0;
                        for row in 0..self.rows() {
                            let value = self.get(row, column, depth);
                            let sigmoid_log = (value.exp() / (1.0 + value.exp())).ln();
                            let noise = -(-(rng.gen::<f64>() + epsilon).ln() + epsilon).ln();
                            let sample = ((sigmoid_log + noise) / temperature).exp();
                            result.set(row, column, depth, sample);
                            total += sample;
                        }
                        for row in 0..self.rows() {
                            result.set(row, column, depth, result.get(row, column, depth) / total);
                        }
                    }
                }
                Ok(())
            },
            |recorder, lock| {
                recorder.create_softmax_expression(lock, self, &result, temperature)
            },
        )?;
        Ok(result)
    }

    /// Jacobian of softmax for a column vector that already holds softmax
    /// output: diag(s) - s s^T.
    pub fn softmax_gradient(&self) -> Result<Matrix> {
        if self.columns() != 1 || self.depth() != 1 {
            return Err(Error::ResultDimensionMismatch {
                expected: crate::Dims::new(self.rows(), 1, 1),
                got: self.dims(),
            });
        }
        let n = self.rows();
        let result = Matrix::new(self.kind(), n, n, 1);
        for row in 0..n {
            for column in 0..n {
                let s_row = self.get(row, 0, 0);
                let s_column = self.get(column, 0, 0);
                let value = if row == column {
                    s_row * (1.0 - s_row)
                } else {
                    -s_row * s_column
                };
                result.set(row, column, 0, value);
            }
        }
        Ok(result)
    }

    /// Inverted dropout: survivors are scaled by 1 / probability (the keep
    /// probability) and an element mask marks the dropped cells. In
    /// Monte-Carlo mode the scaling is skipped.
    pub fn dropout(
        &self,
        probability: f64,
        monte_carlo: bool,
        rng: &mut impl Rng,
    ) -> Result<Matrix> {
        if !(0.0..=1.0).contains(&probability) || probability == 0.0 {
            return Err(Error::Parameter(format!(
                "dropout probability must be within (0, 1], got {probability}"
            )));
        }
        let result = self.zeros_like();
        self.recorded(
            None,
            &result,
            || {
                let scale = if monte_carlo { 1.0 } else { 1.0 / probability };
                elementwise::apply_unary(self, &result, |v| v * scale)?;
                result.ensure_mask();
                let mask = result.mask().expect("mask just ensured");
                mask.set_probability(probability)?;
                mask.mask_by_probability(rng);
                Ok(())
            },
            |recorder, lock| {
                recorder.create_dropout_expression(lock, self, &result, probability, monte_carlo)
            },
        )?;
        Ok(result)
    }

    /// Scale this matrix down to `threshold` when its L2 norm exceeds it;
    /// returns an untouched copy otherwise.
    pub fn gradient_clip(&self, threshold: f64) -> Result<Matrix> {
        if threshold <= 0.0 {
            return Err(Error::Parameter(format!(
                "gradient clipping threshold must be positive, got {threshold}"
            )));
        }
        let result = self.zeros_like();
        self.recorded(
            None,
            &result,
            || {
                let l2 = self.norm(2)?;
                let factor = if l2 > threshold { threshold / l2 } else { 1.0 };
                elementwise::apply_unary(self, &result, |v| v * factor)
            },
            |recorder, lock| {
                recorder.create_gradient_clip_expression(lock, self, &result, threshold)
            },
        )?;
        Ok(result)
    }

    /// Scale values linearly onto [new_minimum, new_maximum].
    pub fn normalize_min_max(&self, new_minimum: f64, new_maximum: f64) -> Result<Matrix> {
        let minimum = self.min();
        let maximum = self.max();
        let delta = if maximum - minimum != 0.0 {
            maximum - minimum
        } else {
            1.0
        };
        self.apply_fn(|v| (v - minimum) / delta * (new_maximum - new_minimum) + new_minimum)
    }

    /// Remove mean and variance: (x - mean) / std, with a unit divisor for
    /// constant matrices.
    pub fn normalize(&self) -> Result<Matrix> {
        let mean = self.mean();
        let deviation = self.variance_with_mean(mean).sqrt();
        let divisor = if deviation != 0.0 { deviation } else { 1.0 };
        self.apply_fn(|v| (v - mean) / divisor)
    }

    /// Exponential moving average of this matrix into a running average:
    /// beta * current + (1 - beta) * self. Without a current average the
    /// result is this matrix itself.
    pub fn exponential_moving_average(
        &self,
        current_average: Option<&Matrix>,
        beta: f64,
    ) -> Result<Matrix> {
        match current_average {
            None => Ok(self.reference()),
            Some(average) => average
                .multiply_value(beta)?
                .add(&self.multiply_value(1.0 - beta)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_softmax_columns_sum_to_one() {
        let matrix = Matrix::from_values(3, 2, 1, &[1.0, 0.0, 2.0, 3.0, 3.0, -1.0]).unwrap();
        let softmax = matrix.softmax().unwrap();
        for column in 0..2 {
            let total: f64 = (0..3).map(|row| softmax.get(row, column, 0)).sum();
            assert!((total - 1.0).abs() < 1e-12);
        }
        // Larger input, larger probability.
        assert!(softmax.get(1, 0, 0) > softmax.get(0, 0, 0));
    }

    #[test]
    fn test_softmax_gradient_shape_and_diagonal() {
        let matrix = Matrix::from_values(3, 1, 1, &[0.2, 0.3, 0.5]).unwrap();
        let jacobian = matrix.softmax_gradient().unwrap();
        assert_eq!(jacobian.dims(), crate::Dims::new(3, 3, 1));
        assert!((jacobian.get(0, 0, 0) - 0.2 * 0.8).abs() < 1e-12);
        assert!((jacobian.get(0, 1, 0) + 0.2 * 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_dropout_scales_survivors() {
        let matrix = Matrix::from_values(4, 4, 1, &[1.0; 16]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let dropped = matrix.dropout(0.5, false, &mut rng).unwrap();
        assert!(dropped.has_mask());
        // Survivors carry the inverted-dropout scale.
        assert_eq!(dropped.get(0, 0, 0), 2.0);
        assert!((dropped.mask().unwrap().probability() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_dropout_monte_carlo_keeps_scale() {
        let matrix = Matrix::from_values(2, 2, 1, &[1.0; 4]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let dropped = matrix.dropout(0.5, true, &mut rng).unwrap();
        assert_eq!(dropped.get(0, 0, 0), 1.0);
    }

    #[test]
    fn test_gradient_clip() {
        let matrix = Matrix::from_values(1, 2, 1, &[3.0, 4.0]).unwrap(); // L2 = 5
        let clipped = matrix.gradient_clip(1.0).unwrap();
        assert!((clipped.norm(2).unwrap() - 1.0).abs() < 1e-12);

        let untouched = matrix.gradient_clip(10.0).unwrap();
        assert!(matrix.equals(&untouched).unwrap());
    }

    #[test]
    fn test_normalize_min_max() {
        let matrix = Matrix::from_values(1, 3, 1, &[0.0, 5.0, 10.0]).unwrap();
        let scaled = matrix.normalize_min_max(-1.0, 1.0).unwrap();
        assert_eq!(scaled.get(0, 0, 0), -1.0);
        assert_eq!(scaled.get(0, 1, 0), 0.0);
        assert_eq!(scaled.get(0, 2, 0), 1.0);
    }

    #[test]
    fn test_exponential_moving_average() {
        let current = Matrix::scalar(10.0);
        let sample = Matrix::scalar(20.0);
        let average = sample
            .exponential_moving_average(Some(&current), 0.9)
            .unwrap();
        assert!((average.get(0, 0, 0) - 11.0).abs() < 1e-12);
    }
}
