//! End-to-end plugin invocations against small shell-script plugins.

#![cfg(unix)]

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;

use biosig_analysis::{AnalysisWorkspace, PluginError, PluginHost};

fn write_plugin(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

fn band_power_stub(dir: &TempDir) -> PathBuf {
    write_plugin(
        dir,
        "band_power",
        r#"echo '{"protocol":1,"entry_points":["processing_function"]}'
read call
echo '{"ok":{"result":{"band_power":{"alpha":{"TP9":2.5,"AF7":1.25}},"samples":512}}}'
"#,
    )
}

fn sample_inputs() -> BTreeMap<String, Value> {
    let mut inputs = BTreeMap::new();
    inputs.insert("rest_eeg".to_string(), json!({ "TP9": [1.0, 2.0, 3.0] }));
    inputs
}

#[tokio::test]
async fn processing_result_lands_in_the_state_slot() {
    let dir = TempDir::new().unwrap();
    let plugin = band_power_stub(&dir);

    let mut ws = AnalysisWorkspace::new(PluginHost::default());
    ws.insert_input("rest_eeg", json!({ "TP9": [1.0, 2.0, 3.0] }))
        .unwrap();
    ws.set_processing_plugin(&plugin);

    let result = ws.run_processing().await.unwrap().clone();
    assert_eq!(result["band_power"]["alpha"]["TP9"], json!(2.5));
    assert_eq!(ws.state().processing, result);
}

#[tokio::test]
async fn failed_rerun_keeps_the_previous_result() {
    let dir = TempDir::new().unwrap();
    let good = band_power_stub(&dir);
    let bad = write_plugin(
        &dir,
        "broken",
        r#"echo '{"protocol":1,"entry_points":["processing_function"]}'
read call
echo '{"err":{"message":"column TP9 missing"}}'
"#,
    );

    let mut ws = AnalysisWorkspace::new(PluginHost::default());
    ws.insert_input("rest_eeg", json!({ "AF7": [1.0] })).unwrap();
    ws.set_processing_plugin(&good);
    let first = ws.run_processing().await.unwrap().clone();

    ws.set_processing_plugin(&bad);
    let err = ws.run_processing().await.unwrap_err();
    assert!(matches!(err, PluginError::Runtime(ref m) if m.contains("TP9")));
    assert_eq!(ws.state().processing, first);
}

#[tokio::test]
async fn missing_plugin_file_is_reported_before_spawning() {
    let host = PluginHost::default();
    let err = host
        .run_processing(&PathBuf::from("/nonexistent/band_power"), &sample_inputs())
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Missing(_)));
}

#[tokio::test]
async fn plugin_without_the_entry_point_violates_the_contract() {
    let dir = TempDir::new().unwrap();
    let plugin = write_plugin(
        &dir,
        "viz_only",
        r#"echo '{"protocol":1,"entry_points":["visualization_function"]}'
read call
echo '{"ok":{"result":{}}}'
"#,
    );
    let err = PluginHost::default()
        .run_processing(&plugin, &sample_inputs())
        .await
        .unwrap_err();
    assert!(matches!(err, PluginError::Contract(_)));
}

#[tokio::test]
async fn hung_plugin_is_killed_after_the_timeout() {
    let dir = TempDir::new().unwrap();
    let plugin = write_plugin(
        &dir,
        "hang",
        r#"echo '{"protocol":1,"entry_points":["processing_function"]}'
sleep 30
"#,
    );
    let host = PluginHost::new(Duration::from_millis(300));
    let err = host.run_processing(&plugin, &sample_inputs()).await.unwrap_err();
    assert!(matches!(err, PluginError::Timeout(_)));
}

#[tokio::test]
async fn visualization_result_shape_is_enforced() {
    let dir = TempDir::new().unwrap();
    let good = write_plugin(
        &dir,
        "raw_plots",
        r#"echo '{"protocol":1,"entry_points":["visualization_function"]}'
read call
echo '{"ok":{"result":{"plots":{"raw":{"kind":"line"}},"tables":{"band_power":{"alpha":1.0}}}}}'
"#,
    );
    let shapeless = write_plugin(
        &dir,
        "shapeless",
        r#"echo '{"protocol":1,"entry_points":["visualization_function"]}'
read call
echo '{"ok":{"result":{"image":"base64..."}}}'
"#,
    );

    let mut ws = AnalysisWorkspace::new(PluginHost::default());
    ws.insert_input("rest_eeg", json!({ "TP9": [1.0] })).unwrap();

    ws.set_visualization_plugin(&good);
    let out = ws.run_visualization().await.unwrap().clone();
    assert!(out.plots.contains_key("raw"));
    assert!(out.tables.contains_key("band_power"));

    ws.set_visualization_plugin(&shapeless);
    let err = ws.run_visualization().await.unwrap_err();
    assert!(matches!(err, PluginError::Contract(_)));
    // Previous visualization survives the failed rerun.
    assert_eq!(ws.state().visualization, out);
}

#[tokio::test]
async fn edited_plugin_takes_effect_on_the_next_run() {
    let dir = TempDir::new().unwrap();
    let plugin = write_plugin(
        &dir,
        "evolving",
        r#"echo '{"protocol":1,"entry_points":["processing_function"]}'
read call
echo '{"ok":{"result":{"version":1}}}'
"#,
    );

    let mut ws = AnalysisWorkspace::new(PluginHost::default());
    ws.insert_input("rest_eeg", json!({ "TP9": [1.0] })).unwrap();
    ws.set_processing_plugin(&plugin);
    assert_eq!(ws.run_processing().await.unwrap()["version"], json!(1));

    // Rewrite the script in place; no reload call is needed.
    write_plugin(
        &dir,
        "evolving",
        r#"echo '{"protocol":1,"entry_points":["processing_function"]}'
read call
echo '{"ok":{"result":{"version":2}}}'
"#,
    );
    assert_eq!(ws.run_processing().await.unwrap()["version"], json!(2));
}
