use ndarray::{Array2, array};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

// --- Public Data Structures ---
// These structs define the human-readable format of a fitted landmark model
// when serialized to a TOML (or JSON) artifact.

/// Tolerance on `var_intercept * var_slope - covariance^2` when checking that the
/// random-effects covariance is positive semi-definite.
const PSD_TOLERANCE: f64 = 1e-12;

/// Population-level coefficients of the longitudinal mixed model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedEffects {
    pub intercept: f64,
    /// Coefficient on standardized time.
    pub time_slope: f64,
    pub risk_coefficient: f64,
}

/// The 2x2 covariance `G` of the patient-level random intercept and slope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomEffectsCovariance {
    pub var_intercept: f64,
    pub var_slope: f64,
    pub covariance: f64,
}

impl RandomEffectsCovariance {
    pub fn as_matrix(&self) -> Array2<f64> {
        array![
            [self.var_intercept, self.covariance],
            [self.covariance, self.var_slope]
        ]
    }
}

/// Centering and scaling applied to raw day values before any linear algebra.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeStandardization {
    pub mean: f64,
    pub sd: f64,
}

impl TimeStandardization {
    #[inline]
    pub fn standardize(&self, day: f64) -> f64 {
        (day - self.mean) / self.sd
    }
}

/// How the patient-specific random effects are estimated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlupStrategy {
    /// Generalized least squares through the marginal covariance `V = Z G Z' + s2 I`.
    #[default]
    ExactGls,
    /// Ordinary least squares followed by independent per-coordinate shrinkage.
    Shrinkage,
}

/// The time scale on which the Cox slope coefficient was fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlopeScale {
    /// Slope per unit of standardized time: `time_slope + b1`.
    #[default]
    Standardized,
    /// Slope per day: `(time_slope + b1) / sd`.
    Original,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkMetadata {
    pub landmark_time: f64,
    pub prediction_horizon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixedModelParameters {
    pub residual_variance: f64,
    #[serde(default)]
    pub blup_strategy: BlupStrategy,
    pub fixed_effects: FixedEffects,
    pub random_effects: RandomEffectsCovariance,
    pub time_standardization: TimeStandardization,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoxCoefficients {
    pub risk: f64,
    pub value_at_landmark: f64,
    pub slope_at_landmark: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoxParameters {
    /// Must match the scale the coefficients were fit on; a mismatch is not detectable
    /// at runtime and silently shifts every linear predictor.
    #[serde(default)]
    pub slope_scale: SlopeScale,
    pub coefficients: CoxCoefficients,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HazardPoint {
    pub time: f64,
    pub cumulative_hazard: f64,
}

/// Baseline cumulative hazard step table, ordered by time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaselineHazard(pub Vec<HazardPoint>);

impl BaselineHazard {
    pub fn points(&self) -> &[HazardPoint] {
        &self.0
    }
}

/// The complete, externally fitted landmark model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    pub metadata: LandmarkMetadata,
    pub lme: MixedModelParameters,
    pub cox: CoxParameters,
    pub baseline_hazard: BaselineHazard,
}

/// Errors raised while loading or validating a model artifact. The whole enum is the
/// configuration-error kind: a missing or null field surfaces as a parse error rather
/// than `InvalidConfiguration`, but every variant is fatal at startup and none can occur
/// during a prediction call.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Failed to parse JSON model file: {0}")]
    JsonParseError(#[from] serde_json::Error),
    #[error("Invalid model configuration: {0}")]
    InvalidConfiguration(String),
}

fn invalid(reason: impl Into<String>) -> ModelError {
    ModelError::InvalidConfiguration(reason.into())
}

fn require_finite(name: &str, value: f64) -> Result<(), ModelError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be finite, found {value}")))
    }
}

impl ModelParameters {
    pub fn from_toml_str(contents: &str) -> Result<Self, ModelError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Loads model parameters from disk. Files ending in `.json` are parsed as JSON,
    /// everything else as TOML. The result is not yet validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&contents)
        } else {
            Self::from_toml_str(&contents)
        }
    }

    /// Saves the parameters to a human-readable TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Checks presence-independent numeric sanity of every parameter.
    pub fn validate(&self) -> Result<(), ModelError> {
        let meta = &self.metadata;
        require_finite("metadata.landmark_time", meta.landmark_time)?;
        require_finite("metadata.prediction_horizon", meta.prediction_horizon)?;
        if meta.prediction_horizon <= meta.landmark_time {
            return Err(invalid(format!(
                "metadata.prediction_horizon ({}) must exceed metadata.landmark_time ({})",
                meta.prediction_horizon, meta.landmark_time
            )));
        }

        let lme = &self.lme;
        let fixed = &lme.fixed_effects;
        require_finite("lme.fixed_effects.intercept", fixed.intercept)?;
        require_finite("lme.fixed_effects.time_slope", fixed.time_slope)?;
        require_finite("lme.fixed_effects.risk_coefficient", fixed.risk_coefficient)?;

        let g = &lme.random_effects;
        require_finite("lme.random_effects.var_intercept", g.var_intercept)?;
        require_finite("lme.random_effects.var_slope", g.var_slope)?;
        require_finite("lme.random_effects.covariance", g.covariance)?;
        if g.var_intercept < 0.0 || g.var_slope < 0.0 {
            return Err(invalid(format!(
                "random-effects variances must be non-negative (var_intercept={}, var_slope={})",
                g.var_intercept, g.var_slope
            )));
        }
        let determinant = g.var_intercept * g.var_slope - g.covariance * g.covariance;
        if determinant < -PSD_TOLERANCE {
            return Err(invalid(format!(
                "random-effects covariance is not positive semi-definite (determinant {determinant:e})"
            )));
        }

        require_finite("lme.residual_variance", lme.residual_variance)?;
        if lme.residual_variance < 0.0 {
            return Err(invalid(format!(
                "lme.residual_variance must be non-negative, found {}",
                lme.residual_variance
            )));
        }

        let ts = &lme.time_standardization;
        require_finite("lme.time_standardization.mean", ts.mean)?;
        require_finite("lme.time_standardization.sd", ts.sd)?;
        if ts.sd == 0.0 {
            return Err(invalid("lme.time_standardization.sd must be non-zero"));
        }

        let cox = &self.cox.coefficients;
        require_finite("cox.coefficients.risk", cox.risk)?;
        require_finite("cox.coefficients.value_at_landmark", cox.value_at_landmark)?;
        require_finite("cox.coefficients.slope_at_landmark", cox.slope_at_landmark)?;

        self.validate_baseline_hazard()
    }

    fn validate_baseline_hazard(&self) -> Result<(), ModelError> {
        let points = self.baseline_hazard.points();
        if points.is_empty() {
            return Err(invalid("baseline_hazard must contain at least one point"));
        }
        for (idx, point) in points.iter().enumerate() {
            require_finite(&format!("baseline_hazard[{idx}].time"), point.time)?;
            require_finite(
                &format!("baseline_hazard[{idx}].cumulative_hazard"),
                point.cumulative_hazard,
            )?;
            if point.cumulative_hazard < 0.0 {
                return Err(invalid(format!(
                    "baseline_hazard[{idx}].cumulative_hazard must be non-negative, found {}",
                    point.cumulative_hazard
                )));
            }
        }
        for (idx, pair) in points.windows(2).enumerate() {
            if pair[1].time <= pair[0].time {
                return Err(invalid(format!(
                    "baseline_hazard times must be strictly increasing (entry {} at {} follows {})",
                    idx + 1,
                    pair[1].time,
                    pair[0].time
                )));
            }
            if pair[1].cumulative_hazard < pair[0].cumulative_hazard {
                return Err(invalid(format!(
                    "baseline_hazard values must be non-decreasing (entry {} drops from {} to {})",
                    idx + 1,
                    pair[0].cumulative_hazard,
                    pair[1].cumulative_hazard
                )));
            }
        }
        Ok(())
    }
}
