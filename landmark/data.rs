//! # Observation Table I/O
//!
//! Reads long-format biomarker tables for the command-line tool and writes prediction
//! tables back out. Both are tab-separated with a fixed header.
//!
//! - Input columns: `patient_id`, `day`, `value`, `risk`. One row per measurement;
//!   rows of one patient need not be contiguous. `risk` must be 0 or 1 and the same on
//!   every row of a patient.
//! - Output columns: `patient_id`, `observations_used`, `value_at_landmark`,
//!   `slope_at_landmark`, `linear_predictor`, `survival_probability`,
//!   `event_rate_percent`, `error`. A failed patient has empty numeric fields and the
//!   failure message in `error`.
//!
//! Value-level validation (landmark window, non-finite values) is left to the
//! prediction engine; this module only enforces the table schema.

use crate::observations::{Observation, PatientObservations};
use crate::predict::{PatientPrediction, RiskIndicator};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("Malformed observation table: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Patient '{patient_id}' has risk value {value}; only 0 or 1 are allowed.")]
    InvalidRisk { patient_id: String, value: u8 },
    #[error("Patient '{patient_id}' has conflicting risk values ({first} and {second}).")]
    InconsistentRisk {
        patient_id: String,
        first: u8,
        second: u8,
    },
    #[error("The observation table contains no data rows.")]
    Empty,
}

#[derive(Debug, Deserialize)]
struct ObservationRow {
    patient_id: String,
    day: f64,
    value: f64,
    risk: u8,
}

#[derive(Debug, Serialize)]
struct PredictionRow<'a> {
    patient_id: &'a str,
    observations_used: Option<usize>,
    value_at_landmark: Option<f64>,
    slope_at_landmark: Option<f64>,
    linear_predictor: Option<f64>,
    survival_probability: Option<f64>,
    event_rate_percent: Option<f64>,
    error: String,
}

/// Reads a long-format observation table, grouping rows by patient in order of first
/// appearance.
pub fn read_observations<R: io::Read>(reader: R) -> Result<Vec<PatientObservations>, DataError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut patients: Vec<PatientObservations> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in csv_reader.deserialize() {
        let row: ObservationRow = record?;
        let risk = RiskIndicator::try_from(row.risk).map_err(|_| DataError::InvalidRisk {
            patient_id: row.patient_id.clone(),
            value: row.risk,
        })?;
        let slot = match index.get(&row.patient_id) {
            Some(&slot) => {
                let first = patients[slot].risk;
                if first != risk {
                    return Err(DataError::InconsistentRisk {
                        patient_id: row.patient_id,
                        first: u8::from(first),
                        second: row.risk,
                    });
                }
                slot
            }
            None => {
                patients.push(PatientObservations {
                    patient_id: row.patient_id.clone(),
                    risk,
                    observations: Vec::new(),
                });
                index.insert(row.patient_id, patients.len() - 1);
                patients.len() - 1
            }
        };
        patients[slot]
            .observations
            .push(Observation::new(row.day, row.value));
    }

    if patients.is_empty() {
        return Err(DataError::Empty);
    }
    log::info!(
        "Loaded {} measurement(s) for {} patient(s)",
        patients.iter().map(|p| p.observations.len()).sum::<usize>(),
        patients.len()
    );
    Ok(patients)
}

pub fn load_observations(path: impl AsRef<Path>) -> Result<Vec<PatientObservations>, DataError> {
    let file = std::fs::File::open(path)?;
    read_observations(io::BufReader::new(file))
}

/// Writes one row per patient prediction.
pub fn write_predictions<W: io::Write>(
    writer: W,
    predictions: &[PatientPrediction],
) -> Result<(), DataError> {
    let mut csv_writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);
    for prediction in predictions {
        let row = match &prediction.outcome {
            Ok(result) => PredictionRow {
                patient_id: &prediction.patient_id,
                observations_used: Some(result.observations_used),
                value_at_landmark: Some(result.value_at_landmark),
                slope_at_landmark: Some(result.slope_at_landmark),
                linear_predictor: Some(result.linear_predictor),
                survival_probability: Some(result.survival_probability),
                event_rate_percent: Some(result.event_rate_percent),
                error: String::new(),
            },
            Err(err) => PredictionRow {
                patient_id: &prediction.patient_id,
                observations_used: None,
                value_at_landmark: None,
                slope_at_landmark: None,
                linear_predictor: None,
                survival_probability: None,
                event_rate_percent: None,
                error: err.to_string(),
            },
        };
        csv_writer.serialize(row)?;
    }
    csv_writer.flush()?;
    Ok(())
}
