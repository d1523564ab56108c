use crate::blup::RandomEffects;
use crate::model::{MixedModelParameters, SlopeScale};

/// Patient-specific biomarker features evaluated at the landmark time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandmarkProjection {
    pub value_at_landmark: f64,
    pub slope_at_landmark: f64,
}

/// Projects the patient's trajectory to `landmark_time`.
///
/// The value combines fixed and random effects on the standardized time scale. The
/// slope is reported on `slope_scale`, which has to be the scale the Cox coefficients
/// were fit on.
pub fn project_to_landmark(
    landmark_time: f64,
    risk: f64,
    effects: &RandomEffects,
    lme: &MixedModelParameters,
    slope_scale: SlopeScale,
) -> LandmarkProjection {
    let fixed = &lme.fixed_effects;
    let ts = &lme.time_standardization;
    let landmark_std = ts.standardize(landmark_time);

    let value_at_landmark = fixed.intercept
        + fixed.time_slope * landmark_std
        + fixed.risk_coefficient * risk
        + effects.intercept
        + effects.slope * landmark_std;

    let standardized_slope = fixed.time_slope + effects.slope;
    let slope_at_landmark = match slope_scale {
        SlopeScale::Standardized => standardized_slope,
        SlopeScale::Original => standardized_slope / ts.sd,
    };

    LandmarkProjection {
        value_at_landmark,
        slope_at_landmark,
    }
}
