mod common;

use std::{fs, path::PathBuf, sync::Arc};

use common::{mock_separator, write_sine_wav, MockLoader, MODEL_RATE};
use serde_json::Value;
use stem_splitter::{
    core::batch::{run_batch, MANIFEST_FILE_NAME},
    publish_batch, BatchOutcome, DevicePreference, ItemStatus, OutputFormat, SeparationRequest,
    StemError, StemLabel,
};
use tempfile::tempdir;

fn requests(paths: &[PathBuf]) -> Vec<SeparationRequest> {
    paths
        .iter()
        .map(|p| SeparationRequest::new(p, "htdemucs", DevicePreference::Cpu, OutputFormat::Wav))
        .collect()
}

#[test]
fn corrupt_file_fails_alone_and_order_is_kept() {
    let tmp = tempdir().unwrap();
    let mut inputs = Vec::new();
    for name in ["a.wav", "b.wav"] {
        let p = tmp.path().join(name);
        write_sine_wav(&p, MODEL_RATE, 2, 0.2);
        inputs.push(p);
    }
    let corrupt = tmp.path().join("corrupt.wav");
    fs::write(&corrupt, b"RIFF....this is not a wav file").unwrap();
    inputs.push(corrupt.clone());
    let last = tmp.path().join("c.wav");
    write_sine_wav(&last, MODEL_RATE, 1, 0.2);
    inputs.push(last);

    let loader = Arc::new(MockLoader::default());
    let separator = mock_separator(loader.clone(), false);
    let out = tmp.path().join("out");

    let result = separator.separate_batch(&requests(&inputs), &out);

    assert_eq!(result.len(), 4);
    let order: Vec<_> = result.entries.iter().map(|e| e.input_path.clone()).collect();
    assert_eq!(order, inputs);
    let statuses: Vec<_> = result.entries.iter().map(|e| e.status()).collect();
    assert_eq!(
        statuses,
        vec![
            ItemStatus::Success,
            ItemStatus::Success,
            ItemStatus::Failed,
            ItemStatus::Success
        ]
    );
    assert!(result.entries[2].error().unwrap().contains("Invalid input"));
    assert_eq!(result.outcome(), BatchOutcome::Partial);

    // One model load serves the whole batch.
    assert_eq!(loader.load_count(), 1);

    let a_vocals = result.entries[0].stems().unwrap().get(StemLabel::Vocals).unwrap();
    assert_eq!(a_vocals, out.join("a").join("a_vocals.wav"));
    assert!(!out.join("corrupt").exists() || fs::read_dir(out.join("corrupt")).unwrap().count() == 0);
}

#[test]
fn every_item_failing_is_all_failed() {
    let tmp = tempdir().unwrap();
    let inputs = vec![tmp.path().join("x.wav"), tmp.path().join("y.flac")];
    let separator = mock_separator(Arc::new(MockLoader::default()), false);

    let result = separator.separate_batch(&requests(&inputs), &tmp.path().join("out"));

    assert_eq!(result.failed(), 2);
    assert_eq!(result.outcome(), BatchOutcome::AllFailed);
}

#[test]
fn empty_batch_counts_as_all_succeeded() {
    let result = run_batch(&[], |_| unreachable!());
    assert!(result.is_empty());
    assert_eq!(result.outcome(), BatchOutcome::AllSucceeded);
}

#[test]
fn panicking_item_is_recorded_and_batch_continues() {
    let tmp = tempdir().unwrap();
    let inputs = vec![
        tmp.path().join("one.wav"),
        tmp.path().join("two.wav"),
        tmp.path().join("three.wav"),
    ];
    let reqs = requests(&inputs);
    let mut seen = Vec::new();

    let result = run_batch(&reqs, |req| {
        seen.push(req.source_path().to_path_buf());
        if req.source_path().ends_with("two.wav") {
            panic!("decoder blew up");
        }
        Err(StemError::DeviceOom {
            device: stem_splitter::Device::Gpu,
            message: "out of memory".into(),
        })
    });

    assert_eq!(seen, inputs);
    assert_eq!(result.len(), 3);
    assert!(result.entries[1].error().unwrap().contains("decoder blew up"));
    assert!(matches!(
        result.entries[0].outcome,
        stem_splitter::ItemOutcome::Failed { retryable: true, .. }
    ));
    assert_eq!(result.outcome(), BatchOutcome::AllFailed);
}

#[test]
fn batch_result_serialises_per_item_status() {
    let tmp = tempdir().unwrap();
    let good = tmp.path().join("good.wav");
    write_sine_wav(&good, MODEL_RATE, 2, 0.1);
    let inputs = vec![good, tmp.path().join("gone.wav")];
    let separator = mock_separator(Arc::new(MockLoader::default()), false);

    let result = separator.separate_batch(&requests(&inputs), &tmp.path().join("out"));
    let json = serde_json::to_value(&result).unwrap();

    let entries = json["entries"].as_array().unwrap();
    assert_eq!(entries[0]["status"], "success");
    assert!(entries[0]["stems"]["stems"]["vocals"].is_string());
    assert_eq!(entries[1]["status"], "failed");
    assert_eq!(entries[1]["retryable"], false);
}

#[test]
fn outcome_maps_to_exit_status() {
    assert_eq!(BatchOutcome::AllSucceeded.exit_code(), 0);
    assert_eq!(BatchOutcome::Partial.exit_code(), 2);
    assert_eq!(BatchOutcome::AllFailed.exit_code(), 1);
}

#[test]
fn partial_batch_is_published_with_manifest() {
    let tmp = tempdir().unwrap();
    let good = tmp.path().join("intro.wav");
    write_sine_wav(&good, MODEL_RATE, 2, 0.2);
    let broken = tmp.path().join("broken.wav");
    fs::write(&broken, b"RIFF....not really").unwrap();
    let inputs = vec![good.clone(), broken.clone()];

    let separator = mock_separator(Arc::new(MockLoader::default()), false);
    let staged = tmp.path().join("staged");
    let output = tmp.path().join("published");
    let result = separator.separate_batch(&requests(&inputs), &staged);

    let manifest = publish_batch(&result, &staged, &output).unwrap();
    assert_eq!(manifest.outcome, BatchOutcome::Partial);
    assert_eq!(manifest.outcome.exit_code(), 2);
    assert_eq!((manifest.succeeded, manifest.failed), (1, 1));

    let published = &manifest.entries[0];
    assert_eq!(published.status, ItemStatus::Success);
    assert_eq!(published.stems.len(), 4);
    for label in StemLabel::ALL {
        let path = &published.stems[&label];
        assert_eq!(path, &output.join("intro").join(format!("intro_{label}.wav")));
        assert!(path.is_file());
    }
    assert_eq!(manifest.entries[1].status, ItemStatus::Failed);
    assert!(manifest.entries[1].stems.is_empty());

    let manifest_path = manifest.write(&output).unwrap();
    assert_eq!(manifest_path, output.join(MANIFEST_FILE_NAME));
    let json: Value = serde_json::from_str(&fs::read_to_string(manifest_path).unwrap()).unwrap();
    assert_eq!(json["outcome"], "partial");
    assert_eq!(json["entries"][0]["status"], "success");
    assert!(json["entries"][0]["stems"]["vocals"].is_string());
    assert!(json["entries"][0].get("error").is_none());
    assert_eq!(json["entries"][1]["status"], "failed");
    assert_eq!(json["entries"][1]["input_path"], broken.to_str().unwrap());
    assert!(json["entries"][1]["error"]
        .as_str()
        .unwrap()
        .contains("Invalid input"));
    assert!(json["entries"][1].get("stems").is_none());
}
