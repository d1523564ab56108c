use crate::blup::{RandomEffects, estimate_random_effects};
use crate::matrix::MatrixError;
use crate::model::{ModelError, ModelParameters};
use crate::observations::{Observation, PatientObservations, select_pre_landmark};
use crate::projection::project_to_landmark;
use crate::survival;
use rayon::prelude::*;
use std::path::Path;
use thiserror::Error;

/// Per-call failures of the landmark engine. None of these are retried.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionError {
    #[error(
        "Insufficient observations before the landmark: found {found}, at least {required} are required."
    )]
    InsufficientObservations { found: usize, required: usize },
    #[error("Random-effects covariance is singular (duplicate or near-duplicate time points?): {0}")]
    SingularMatrix(#[from] MatrixError),
    #[error("Risk indicator must be 0 or 1, found {0}.")]
    InvalidRiskIndicator(u8),
}

/// The binary risk category entering both sub-models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RiskIndicator {
    Low,
    High,
}

impl RiskIndicator {
    /// The covariate value (0 or 1) used in the linear predictors.
    pub fn covariate(self) -> f64 {
        match self {
            RiskIndicator::Low => 0.0,
            RiskIndicator::High => 1.0,
        }
    }
}

impl TryFrom<u8> for RiskIndicator {
    type Error = PredictionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RiskIndicator::Low),
            1 => Ok(RiskIndicator::High),
            other => Err(PredictionError::InvalidRiskIndicator(other)),
        }
    }
}

impl From<RiskIndicator> for u8 {
    fn from(risk: RiskIndicator) -> Self {
        match risk {
            RiskIndicator::Low => 0,
            RiskIndicator::High => 1,
        }
    }
}

impl From<bool> for RiskIndicator {
    fn from(high: bool) -> Self {
        if high {
            RiskIndicator::High
        } else {
            RiskIndicator::Low
        }
    }
}

/// The outcome of a single landmark prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictionResult {
    pub value_at_landmark: f64,
    pub slope_at_landmark: f64,
    pub linear_predictor: f64,
    /// Probability of surviving to the prediction horizon, in `[0, 1]`.
    pub survival_probability: f64,
    /// `(1 - survival_probability) * 100`.
    pub event_rate_percent: f64,
    pub random_effects: RandomEffects,
    /// Number of observations that passed the landmark-window filter.
    pub observations_used: usize,
}

/// A prediction for one patient of a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientPrediction {
    pub patient_id: String,
    pub outcome: Result<PredictionResult, PredictionError>,
}

/// A validated, immutable landmark model.
///
/// The only way to obtain one is through [`LandmarkModel::new`] or
/// [`LandmarkModel::load`], both of which reject malformed parameters. Predictions
/// borrow the model immutably, so a single instance can serve any number of threads.
#[derive(Debug, Clone)]
pub struct LandmarkModel {
    params: ModelParameters,
}

impl LandmarkModel {
    pub fn new(params: ModelParameters) -> Result<Self, ModelError> {
        params.validate()?;
        log::info!(
            "Landmark model accepted: landmark day {}, horizon day {}, {:?} BLUP, {:?} slope scale, {} baseline hazard points",
            params.metadata.landmark_time,
            params.metadata.prediction_horizon,
            params.lme.blup_strategy,
            params.cox.slope_scale,
            params.baseline_hazard.points().len()
        );
        Ok(Self { params })
    }

    /// Loads and validates a model artifact (TOML, or JSON by `.json` extension).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        Self::new(ModelParameters::load(path)?)
    }

    pub fn parameters(&self) -> &ModelParameters {
        &self.params
    }

    /// Estimates the horizon event probability for one patient.
    ///
    /// The pipeline is: filter observations to the landmark window, estimate the
    /// random effects, project value and slope to the landmark, then evaluate the Cox
    /// model at the prediction horizon.
    pub fn predict(
        &self,
        observations: &[Observation],
        risk: RiskIndicator,
    ) -> Result<PredictionResult, PredictionError> {
        let params = &self.params;
        let meta = &params.metadata;
        let risk_value = risk.covariate();

        let retained = select_pre_landmark(observations, meta.landmark_time)?;
        let random_effects = estimate_random_effects(&retained, risk_value, &params.lme)?;
        let projection = project_to_landmark(
            meta.landmark_time,
            risk_value,
            &random_effects,
            &params.lme,
            params.cox.slope_scale,
        );

        let linear_predictor =
            survival::linear_predictor(&params.cox.coefficients, risk_value, &projection);
        let baseline =
            survival::baseline_cumulative_hazard(&params.baseline_hazard, meta.prediction_horizon);
        let survival_probability = survival::survival_probability(baseline, linear_predictor);
        let event_rate_percent = survival::event_rate_percent(survival_probability);

        log::debug!(
            "Landmark features: value={:.6}, slope={:.6}; lp={:.6}, H0({})={:.6}, S={:.6}",
            projection.value_at_landmark,
            projection.slope_at_landmark,
            linear_predictor,
            meta.prediction_horizon,
            baseline,
            survival_probability
        );

        Ok(PredictionResult {
            value_at_landmark: projection.value_at_landmark,
            slope_at_landmark: projection.slope_at_landmark,
            linear_predictor,
            survival_probability,
            event_rate_percent,
            random_effects,
            observations_used: retained.len(),
        })
    }

    /// Predicts every patient independently and in parallel. Output order matches input
    /// order, and a failure for one patient does not affect the others.
    pub fn predict_batch(&self, patients: &[PatientObservations]) -> Vec<PatientPrediction> {
        patients
            .par_iter()
            .map(|patient| PatientPrediction {
                patient_id: patient.patient_id.clone(),
                outcome: self.predict(&patient.observations, patient.risk),
            })
            .collect()
    }
}
