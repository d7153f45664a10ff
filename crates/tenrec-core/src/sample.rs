use rand::Rng;
use rand_distr::{Distribution, Gamma};

use crate::error::{Error, Result};

// Samplers — pure math utilities with no tensor-graph interaction
//
// Consumed by pooling, dropout and policy-gradient callers. Every sampler
// takes an explicit RNG handle so callers can seed their draws.

/// Number of successes in `trials` Bernoulli draws of probability `p`.
pub fn binomial(trials: i64, probability: f64, rng: &mut impl Rng) -> Result<u64> {
    if trials < 0 {
        return Err(Error::Parameter(format!(
            "number of trials must be non-negative, got {trials}"
        )));
    }
    if !(0.0..=1.0).contains(&probability) {
        return Err(Error::Parameter(format!(
            "probability must be within [0, 1], got {probability}"
        )));
    }
    let distribution = rand_distr::Binomial::new(trials as u64, probability)
        .map_err(|e| Error::Parameter(e.to_string()))?;
    Ok(distribution.sample(rng))
}

/// Counts per category after `trials` draws from a categorical
/// distribution. Probabilities must be within [0, 1] and sum to at most 1;
/// any remainder is an implicit discard category.
pub fn multinomial(trials: i64, probabilities: &[f64], rng: &mut impl Rng) -> Result<Vec<u64>> {
    if trials < 0 {
        return Err(Error::Parameter(format!(
            "number of trials must be non-negative, got {trials}"
        )));
    }
    let total: f64 = probabilities.iter().sum();
    if probabilities.iter().any(|p| !(0.0..=1.0).contains(p)) || total > 1.0 + 1e-9 {
        return Err(Error::Parameter(
            "category probabilities must be within [0, 1] and sum to at most 1".into(),
        ));
    }
    // Conditional-binomial decomposition: draw each category against the
    // probability mass remaining after the previous ones.
    let mut counts = Vec::with_capacity(probabilities.len());
    let mut remaining_trials = trials as u64;
    let mut remaining_mass = 1.0;
    for &probability in probabilities {
        if remaining_trials == 0 || remaining_mass <= 0.0 {
            counts.push(0);
            continue;
        }
        let conditional = (probability / remaining_mass).min(1.0);
        let distribution = rand_distr::Binomial::new(remaining_trials, conditional)
            .map_err(|e| Error::Parameter(e.to_string()))?;
        let drawn = distribution.sample(rng);
        counts.push(drawn);
        remaining_trials -= drawn;
        remaining_mass -= probability;
    }
    Ok(counts)
}

/// One draw from a gamma distribution with the given shape and scale.
pub fn gamma(shape: f64, scale: f64, rng: &mut impl Rng) -> Result<f64> {
    if shape <= 0.0 || scale <= 0.0 {
        return Err(Error::Parameter(format!(
            "gamma shape and scale must be positive, got shape {shape}, scale {scale}"
        )));
    }
    let distribution = Gamma::new(shape, scale).map_err(|e| Error::Parameter(e.to_string()))?;
    Ok(distribution.sample(rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_binomial_bounds() {
        let mut rng = StdRng::seed_from_u64(5);
        let successes = binomial(100, 0.5, &mut rng).unwrap();
        assert!(successes <= 100);
        assert!(binomial(-1, 0.5, &mut rng).is_err());
        assert!(binomial(10, 1.5, &mut rng).is_err());
    }

    #[test]
    fn test_multinomial_conserves_trials() {
        let mut rng = StdRng::seed_from_u64(5);
        let counts = multinomial(1000, &[0.2, 0.3, 0.5], &mut rng).unwrap();
        assert_eq!(counts.len(), 3);
        assert_eq!(counts.iter().sum::<u64>(), 1000);
    }

    #[test]
    fn test_multinomial_validates_mass() {
        let mut rng = StdRng::seed_from_u64(5);
        assert!(multinomial(10, &[0.8, 0.8], &mut rng).is_err());
    }

    #[test]
    fn test_gamma_positive() {
        let mut rng = StdRng::seed_from_u64(5);
        let draw = gamma(2.0, 3.0, &mut rng).unwrap();
        assert!(draw > 0.0);
        assert!(gamma(-1.0, 1.0, &mut rng).is_err());
    }
}
