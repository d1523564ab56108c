use crate::predict::{PredictionError, RiskIndicator};
use serde::{Deserialize, Serialize};

/// At least two points are needed to identify both a random intercept and a random slope.
pub const MIN_OBSERVATIONS: usize = 2;

/// A single biomarker measurement taken `day` days after the index event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub day: f64,
    pub value: f64,
}

impl Observation {
    pub fn new(day: f64, value: f64) -> Self {
        Self { day, value }
    }

    fn is_well_formed(&self) -> bool {
        self.day.is_finite() && self.day >= 0.0 && self.value.is_finite()
    }
}

/// One patient's measurements together with their risk category.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientObservations {
    pub patient_id: String,
    pub risk: RiskIndicator,
    pub observations: Vec<Observation>,
}

/// Keeps the observations that may inform a prediction at `landmark_time`.
///
/// An observation participates when its day is finite, non-negative and no later than
/// the landmark, and its value is finite. Input order is preserved. Fewer than
/// [`MIN_OBSERVATIONS`] survivors is an error.
pub fn select_pre_landmark(
    observations: &[Observation],
    landmark_time: f64,
) -> Result<Vec<Observation>, PredictionError> {
    let mut malformed = 0usize;
    let mut after_landmark = 0usize;
    let mut retained = Vec::with_capacity(observations.len());

    for obs in observations {
        if !obs.is_well_formed() {
            malformed += 1;
        } else if obs.day > landmark_time {
            after_landmark += 1;
        } else {
            retained.push(*obs);
        }
    }

    if malformed > 0 {
        log::warn!("Dropped {malformed} observation(s) with non-finite or negative day/value");
    }
    log::debug!(
        "Observation filter: {} retained, {} after landmark day {}, {} malformed",
        retained.len(),
        after_landmark,
        landmark_time,
        malformed
    );

    if retained.len() < MIN_OBSERVATIONS {
        return Err(PredictionError::InsufficientObservations {
            found: retained.len(),
            required: MIN_OBSERVATIONS,
        });
    }
    Ok(retained)
}
