#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Landmark prediction of post-transplant event probability from sparse biomarker
//! trajectories: a linear mixed model supplies patient-specific value and slope at the
//! landmark day, and a pre-fit Cox model turns them into a horizon survival probability.

pub mod blup;
pub mod data;
pub mod matrix;
pub mod model;
pub mod observations;
pub mod predict;
pub mod projection;
pub mod survival;

pub use model::{ModelError, ModelParameters};
pub use observations::{Observation, PatientObservations};
pub use predict::{
    LandmarkModel, PatientPrediction, PredictionError, PredictionResult, RiskIndicator,
};
