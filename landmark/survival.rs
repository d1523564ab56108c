use crate::model::{BaselineHazard, CoxCoefficients};
use crate::projection::LandmarkProjection;

/// Cox linear predictor from the landmark-time features.
pub fn linear_predictor(
    coefficients: &CoxCoefficients,
    risk: f64,
    projection: &LandmarkProjection,
) -> f64 {
    coefficients.risk * risk
        + coefficients.value_at_landmark * projection.value_at_landmark
        + coefficients.slope_at_landmark * projection.slope_at_landmark
}

/// Baseline cumulative hazard `H0(time)`.
///
/// Linear interpolation between the bracketing table points; flat before the first
/// and after the last recorded time.
pub fn baseline_cumulative_hazard(table: &BaselineHazard, time: f64) -> f64 {
    let points = table.points();
    let (Some(first), Some(last)) = (points.first(), points.last()) else {
        return 0.0;
    };
    if time <= first.time {
        return first.cumulative_hazard;
    }
    if time >= last.time {
        return last.cumulative_hazard;
    }

    // first.time < time < last.time, so 1 <= upper < points.len().
    let upper = points.partition_point(|p| p.time <= time);
    let hi = points[upper];
    let lo = points[upper - 1];
    let fraction = (time - lo.time) / (hi.time - lo.time);
    lo.cumulative_hazard + fraction * (hi.cumulative_hazard - lo.cumulative_hazard)
}

/// Individual cumulative hazard `H0 * exp(lp)`.
pub fn cumulative_hazard(baseline: f64, linear_predictor: f64) -> f64 {
    if baseline == 0.0 {
        // exp(lp) may overflow; no baseline hazard means no accumulated risk.
        return 0.0;
    }
    baseline * linear_predictor.exp()
}

pub fn survival_probability(baseline: f64, linear_predictor: f64) -> f64 {
    (-cumulative_hazard(baseline, linear_predictor)).exp()
}

#[inline]
pub fn event_rate_percent(survival: f64) -> f64 {
    (1.0 - survival) * 100.0
}
