use std::fs;
use std::path::PathBuf;
use std::process::Command;

use tempfile::tempdir;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(name)
}

#[test]
fn predict_command_writes_prediction_table() {
    let tmp = tempdir().expect("temporary directory");
    let out_path = tmp.path().join("predictions.tsv");

    let exe = env!("CARGO_BIN_EXE_landmark");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args([
            "predict",
            fixture("observations.tsv").to_str().expect("path str"),
            "--model",
            fixture("reference_model.toml").to_str().expect("path str"),
            "--out",
            out_path.to_str().expect("path str"),
        ])
        .output()
        .expect("run landmark cli");

    assert!(
        output.status.success(),
        "CLI failed: {:?}, stderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Wrote 4 prediction(s) (2 failed)"),
        "unexpected stdout: {stdout}"
    );

    let written = fs::read_to_string(&out_path).expect("read prediction table");
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines.len(), 5, "{written}");
    assert_eq!(
        lines[0],
        "patient_id\tobservations_used\tvalue_at_landmark\tslope_at_landmark\t\
         linear_predictor\tsurvival_probability\tevent_rate_percent\terror"
    );

    let p001: Vec<&str> = lines[1].split('\t').collect();
    assert_eq!(p001[0], "P001");
    assert_eq!(p001[1], "2");
    let survival: f64 = p001[5].parse().expect("survival probability");
    assert!((survival - 0.117_127_403).abs() < 1e-8, "{survival}");
    assert!(p001[7].is_empty());

    assert!(lines[2].starts_with("P002\t3\t"), "{}", lines[2]);
    assert!(lines[3].starts_with("P003\t\t"), "{}", lines[3]);
    assert!(lines[3].contains("Insufficient observations"), "{}", lines[3]);
    assert!(lines[4].starts_with("P004\t\t"), "{}", lines[4]);
}

#[test]
fn validate_command_accepts_reference_model() {
    let exe = env!("CARGO_BIN_EXE_landmark");
    let output = Command::new(exe)
        .args([
            "validate",
            "--model",
            fixture("reference_model.toml").to_str().expect("path str"),
        ])
        .output()
        .expect("run landmark cli");

    assert!(output.status.success(), "CLI failed: {:?}", output.status);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Model is valid"), "unexpected stdout: {stdout}");
}

#[test]
fn validate_command_rejects_malformed_model() {
    let tmp = tempdir().expect("temporary directory");
    let model_path = tmp.path().join("unordered_model.toml");
    let text = fs::read_to_string(fixture("reference_model.toml")).expect("read fixture");
    fs::write(&model_path, text.replace("time = 365.0", "time = 800.0"))
        .expect("write malformed model");

    let exe = env!("CARGO_BIN_EXE_landmark");
    let output = Command::new(exe)
        .current_dir(tmp.path())
        .args(["validate", "--model", model_path.to_str().expect("path str")])
        .output()
        .expect("run landmark cli");

    assert!(
        !output.status.success(),
        "CLI unexpectedly accepted a malformed model: {:?}",
        output.status
    );
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("strictly increasing"),
        "expected baseline hazard failure, stderr: {stderr}"
    );
}
