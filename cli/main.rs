#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;

use landmark::data::{load_observations, write_predictions};
use landmark::LandmarkModel;

#[derive(Parser)]
#[command(
    name = "landmark",
    about = "Landmark prediction of post-transplant event probability",
    long_about = "Combines a landmark linear mixed model for a longitudinal biomarker with a \
                  pre-fit Cox model to estimate each patient's event probability at the \
                  prediction horizon."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Predict horizon survival for every patient in an observation table
    #[command(about = "Predict from observations (outputs: predictions.tsv)")]
    Predict {
        /// Path to a TSV with patient_id, day, value, risk columns
        observations: PathBuf,

        /// Path to the fitted model artifact (.toml or .json)
        #[arg(long)]
        model: PathBuf,

        /// Where to write the prediction table
        #[arg(long, default_value = "predictions.tsv")]
        out: PathBuf,
    },

    /// Load and validate a model artifact without predicting
    Validate {
        /// Path to the fitted model artifact (.toml or .json)
        #[arg(long)]
        model: PathBuf,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Predict {
            observations,
            model,
            out,
        } => predict_command(&observations, &model, &out),
        Commands::Validate { model } => validate_command(&model),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn predict_command(
    observations_path: &Path,
    model_path: &Path,
    output_path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let model = LandmarkModel::load(model_path)?;
    let patients = load_observations(observations_path)?;
    println!(
        "Predicting {} patient(s) at landmark day {} for horizon day {}",
        patients.len(),
        model.parameters().metadata.landmark_time,
        model.parameters().metadata.prediction_horizon
    );

    let predictions = model.predict_batch(&patients);
    let failures = predictions.iter().filter(|p| p.outcome.is_err()).count();
    for prediction in predictions.iter() {
        if let Err(err) = &prediction.outcome {
            log::warn!("Patient '{}': {}", prediction.patient_id, err);
        }
    }

    write_predictions(BufWriter::new(File::create(output_path)?), &predictions)?;
    println!(
        "Wrote {} prediction(s) ({} failed) to: {}",
        predictions.len(),
        failures,
        output_path.display()
    );
    Ok(())
}

fn validate_command(model_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let model = LandmarkModel::load(model_path)?;
    let params = model.parameters();
    println!("Model is valid: {}", model_path.display());
    println!(
        "  landmark day {}, horizon day {}",
        params.metadata.landmark_time, params.metadata.prediction_horizon
    );
    println!(
        "  BLUP strategy {:?}, slope scale {:?}, {} baseline hazard point(s)",
        params.lme.blup_strategy,
        params.cox.slope_scale,
        params.baseline_hazard.points().len()
    );
    Ok(())
}
