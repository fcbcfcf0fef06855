mod common;

use std::{fs, process::Command};

use common::RigFixture;

#[test]
fn given_missing_and_valid_inputs_when_running_batch_then_both_are_reported() {
    let dir = std::env::temp_dir().join(format!("vrm-import-cli-{}", std::process::id()));
    fs::create_dir_all(&dir).expect("temp dir");
    let valid = dir.join("rig.vrm");
    let missing = dir.join("missing.vrm");
    let report = dir.join("report.json");
    fs::write(&valid, RigFixture::default().build()).expect("write fixture");

    let status = Command::new(env!("CARGO_BIN_EXE_vrm-import"))
        .arg("--report")
        .arg(&report)
        .arg(&missing)
        .arg(&valid)
        .status()
        .expect("run cli");
    let text = fs::read_to_string(&report).expect("read report");
    let _ = fs::remove_dir_all(&dir);

    assert_eq!(status.code(), Some(1));
    let value: serde_json::Value = serde_json::from_str(&text).expect("json");
    let imports = value["imports"].as_array().expect("imports");
    assert_eq!(imports.len(), 2);
    assert!(imports[0]["read_error"].as_str().is_some());
    assert!(imports[1]["error"].is_null());
    assert_eq!(imports[1]["model_name"], "Fixture One");
}
