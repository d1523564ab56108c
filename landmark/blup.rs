//! Empirical-Bayes estimation of a patient's random intercept and slope.
//!
//! Both strategies work on residuals from the population trend,
//! `r_i = y_i - (intercept + time_slope * t_i + risk_coefficient * risk)`,
//! where `t_i` is the standardized observation time. They differ in how the
//! residuals are shrunk toward zero:
//!
//! * [`BlupStrategy::ExactGls`] computes `b = G Z' V^-1 r` with the marginal covariance
//!   `V = Z G Z' + s2 I`. This honours any intercept/slope correlation in `G`.
//! * [`BlupStrategy::Shrinkage`] fits OLS of `r` on `t` and shrinks each coefficient
//!   independently by its signal-to-total variance ratio.
//!
//! In both cases the random-effects information matrix `Z'Z` must be invertible: when
//! every observation shares one standardized time the slope is not identifiable.

use crate::matrix::{self, MatrixError};
use crate::model::{BlupStrategy, MixedModelParameters};
use crate::observations::Observation;
use ndarray::Array2;

/// Patient-specific deviation from the population trend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RandomEffects {
    pub intercept: f64,
    pub slope: f64,
}

/// Standardized times and fixed-effect residuals for a patient.
struct ResidualDesign {
    /// Random-effects design `Z`, rows `[1, t_i]`.
    z: Array2<f64>,
    /// Residual column `r` (n x 1).
    residuals: Array2<f64>,
}

impl ResidualDesign {
    fn new(observations: &[Observation], risk: f64, lme: &MixedModelParameters) -> Self {
        let n = observations.len();
        let fixed = &lme.fixed_effects;
        let mut z = Array2::<f64>::ones((n, 2));
        let mut residuals = Array2::<f64>::zeros((n, 1));
        for (i, obs) in observations.iter().enumerate() {
            let t = lme.time_standardization.standardize(obs.day);
            z[[i, 1]] = t;
            let mean = fixed.intercept + fixed.time_slope * t + fixed.risk_coefficient * risk;
            residuals[[i, 0]] = obs.value - mean;
        }
        Self { z, residuals }
    }

    fn len(&self) -> usize {
        self.z.nrows()
    }

    /// Inverts `Z'Z`, failing when the slope is not identifiable.
    /// The pivot tolerance is absolute on standardized time, so a very large `sd` makes
    /// days that are close together look singular.
    fn information_inverse(&self) -> Result<Array2<f64>, MatrixError> {
        let zt = matrix::transpose(&self.z);
        matrix::inverse(&matrix::multiply(&zt, &self.z))
    }
}

/// Estimates the random effects for `observations` (already filtered to the landmark
/// window) under the configured strategy.
pub fn estimate_random_effects(
    observations: &[Observation],
    risk: f64,
    lme: &MixedModelParameters,
) -> Result<RandomEffects, MatrixError> {
    let design = ResidualDesign::new(observations, risk, lme);
    let effects = match lme.blup_strategy {
        BlupStrategy::ExactGls => exact_gls(&design, lme)?,
        BlupStrategy::Shrinkage => independent_shrinkage(&design, lme)?,
    };
    log::debug!(
        "BLUP ({:?}, n={}): b0={:.6}, b1={:.6}",
        lme.blup_strategy,
        design.len(),
        effects.intercept,
        effects.slope
    );
    Ok(effects)
}

fn exact_gls(
    design: &ResidualDesign,
    lme: &MixedModelParameters,
) -> Result<RandomEffects, MatrixError> {
    design.information_inverse()?;

    let n = design.len();
    let g = lme.random_effects.as_matrix();
    let zt = matrix::transpose(&design.z);
    let zgzt = matrix::multiply(&matrix::multiply(&design.z, &g), &zt);
    let v = matrix::add(
        &zgzt,
        &matrix::scalar_multiply(&matrix::identity(n), lme.residual_variance),
    );
    let v_inv = matrix::inverse(&v)?;

    let gzt = matrix::multiply(&g, &zt);
    let b = matrix::multiply(&matrix::multiply(&gzt, &v_inv), &design.residuals);
    Ok(RandomEffects {
        intercept: b[[0, 0]],
        slope: b[[1, 0]],
    })
}

fn independent_shrinkage(
    design: &ResidualDesign,
    lme: &MixedModelParameters,
) -> Result<RandomEffects, MatrixError> {
    let xtx_inv = design.information_inverse()?;
    let xt = matrix::transpose(&design.z);
    let ols = matrix::multiply(&xtx_inv, &matrix::multiply(&xt, &design.residuals));

    let n = design.len() as f64;
    let mean_t2 = design.z.column(1).iter().map(|t| t * t).sum::<f64>() / n;
    let sigma2 = lme.residual_variance;
    let g = &lme.random_effects;

    let shrink_intercept = shrinkage_factor(g.var_intercept, sigma2 / n);
    let shrink_slope = shrinkage_factor(g.var_slope, sigma2 / (n * mean_t2));
    Ok(RandomEffects {
        intercept: ols[[0, 0]] * shrink_intercept,
        slope: ols[[1, 0]] * shrink_slope,
    })
}

/// `signal / (signal + noise)`, or 0 when there is no between-patient variance.
fn shrinkage_factor(signal: f64, noise: f64) -> f64 {
    if signal <= 0.0 {
        0.0
    } else {
        signal / (signal + noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::reference_parameters;
    use approx::assert_abs_diff_eq;

    fn reference_observations() -> Vec<Observation> {
        vec![Observation::new(60.0, 1.0), Observation::new(90.0, 1.4)]
    }

    #[test]
    fn exact_gls_matches_hand_computed_blup() {
        let lme = reference_parameters().lme;
        let b = estimate_random_effects(&reference_observations(), 1.0, &lme).unwrap();
        assert_abs_diff_eq!(b.intercept, -0.320_164_609, epsilon = 1e-8);
        assert_abs_diff_eq!(b.slope, -0.017_901_235, epsilon = 1e-8);
    }

    #[test]
    fn shrinkage_matches_hand_computed_estimate() {
        let mut lme = reference_parameters().lme;
        lme.blup_strategy = BlupStrategy::Shrinkage;
        let b = estimate_random_effects(&reference_observations(), 1.0, &lme).unwrap();
        // OLS gives (-2/3, -0.1); shrinkage factors are 8/17 and 0.01/0.172.
        assert_abs_diff_eq!(b.intercept, -0.313_725_490, epsilon = 1e-8);
        assert_abs_diff_eq!(b.slope, -0.005_813_953, epsilon = 1e-8);
    }

    #[test]
    fn strategies_agree_when_noise_vanishes_relative_to_signal() {
        let mut lme = reference_parameters().lme;
        lme.residual_variance = 1e-10;
        lme.random_effects.var_intercept = 10.0;
        lme.random_effects.var_slope = 10.0;
        let obs = reference_observations();
        let exact = estimate_random_effects(&obs, 0.0, &lme).unwrap();
        lme.blup_strategy = BlupStrategy::Shrinkage;
        let shrunk = estimate_random_effects(&obs, 0.0, &lme).unwrap();
        assert_abs_diff_eq!(exact.intercept, shrunk.intercept, epsilon = 1e-6);
        assert_abs_diff_eq!(exact.slope, shrunk.slope, epsilon = 1e-6);
    }

    #[test]
    fn residuals_on_population_trend_give_zero_effects() {
        let lme = reference_parameters().lme;
        let ts = lme.time_standardization;
        let fixed = lme.fixed_effects;
        let obs: Vec<_> = [20.0, 55.0, 100.0]
            .iter()
            .map(|&day| {
                let t = ts.standardize(day);
                Observation::new(day, fixed.intercept + fixed.time_slope * t)
            })
            .collect();
        for strategy in [BlupStrategy::ExactGls, BlupStrategy::Shrinkage] {
            let mut lme = lme.clone();
            lme.blup_strategy = strategy;
            let b = estimate_random_effects(&obs, 0.0, &lme).unwrap();
            assert_abs_diff_eq!(b.intercept, 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(b.slope, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn correlated_random_effects_shift_exact_estimate() {
        let mut lme = reference_parameters().lme;
        let obs = reference_observations();
        let independent = estimate_random_effects(&obs, 1.0, &lme).unwrap();
        lme.random_effects.covariance = 0.015;
        let correlated = estimate_random_effects(&obs, 1.0, &lme).unwrap();
        assert!((independent.slope - correlated.slope).abs() > 1e-4);
    }

    #[test]
    fn exact_gls_with_correlated_effects_solves_mixed_model_equations() {
        let mut lme = reference_parameters().lme;
        lme.random_effects.covariance = 0.015;
        let obs = [
            Observation::new(15.0, 0.9),
            Observation::new(50.0, 1.3),
            Observation::new(85.0, 1.2),
            Observation::new(110.0, 2.1),
        ];
        let risk = 1.0;
        let estimate = estimate_random_effects(&obs, risk, &lme).unwrap();

        // Henderson form (Z'Z / s2 + G^-1) b = Z'r / s2, solved by Cramer's rule.
        let fixed = &lme.fixed_effects;
        let re = &lme.random_effects;
        let s2 = lme.residual_variance;
        let (mut n, mut sum_t, mut sum_tt, mut sum_r, mut sum_tr) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for o in &obs {
            let t = (o.day - 70.0) / 30.0;
            let mean = fixed.intercept + fixed.time_slope * t + fixed.risk_coefficient * risk;
            let r = o.value - mean;
            n += 1.0;
            sum_t += t;
            sum_tt += t * t;
            sum_r += r;
            sum_tr += t * r;
        }
        let g_det = re.var_intercept * re.var_slope - re.covariance * re.covariance;
        let a00 = n / s2 + re.var_slope / g_det;
        let a01 = sum_t / s2 - re.covariance / g_det;
        let a11 = sum_tt / s2 + re.var_intercept / g_det;
        let (rhs0, rhs1) = (sum_r / s2, sum_tr / s2);
        let a_det = a00 * a11 - a01 * a01;
        let b0 = (rhs0 * a11 - a01 * rhs1) / a_det;
        let b1 = (a00 * rhs1 - a01 * rhs0) / a_det;

        assert_abs_diff_eq!(estimate.intercept, b0, epsilon = 1e-10);
        assert_abs_diff_eq!(estimate.slope, b1, epsilon = 1e-10);
    }

    #[test]
    fn noise_free_exact_gls_with_distinct_times_is_singular() {
        let mut lme = reference_parameters().lme;
        lme.residual_variance = 0.0;
        let obs = [
            Observation::new(10.0, 0.6),
            Observation::new(40.0, 1.0),
            Observation::new(70.0, 1.5),
        ];
        // Z'Z is invertible here; the rank-2 marginal covariance V is not.
        match estimate_random_effects(&obs, 0.0, &lme) {
            Err(MatrixError::Singular { .. }) => {}
            other => panic!("expected a singular V, got {other:?}"),
        }
        lme.blup_strategy = BlupStrategy::Shrinkage;
        assert!(estimate_random_effects(&obs, 0.0, &lme).is_ok());
    }

    #[test]
    fn duplicate_times_are_singular_for_both_strategies() {
        let obs = [Observation::new(60.0, 1.0), Observation::new(60.0, 1.4)];
        for strategy in [BlupStrategy::ExactGls, BlupStrategy::Shrinkage] {
            let mut lme = reference_parameters().lme;
            lme.blup_strategy = strategy;
            let err = estimate_random_effects(&obs, 1.0, &lme).unwrap_err();
            assert!(matches!(err, MatrixError::Singular { .. }));
        }
    }

    #[test]
    fn zero_signal_variance_disables_shrinkage_component() {
        assert_eq!(shrinkage_factor(0.0, 0.0), 0.0);
        assert_eq!(shrinkage_factor(0.5, 0.0), 1.0);
        assert_abs_diff_eq!(shrinkage_factor(0.04, 0.045), 0.470_588_235, epsilon = 1e-9);
    }
}
