use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use anyhow::{Context, Result};
use serde_json::Value;
use tempfile::tempdir;

const VAR_STRING_KEY: &str = "0xFA925AC00EB830B9";
const ECHO_KEY: &str = "0x0000000000000010";

fn run_host(dir: &Path, args: &[&str]) -> Result<Output> {
    let config_path = dir.join("host.json");
    fs::write(
        &config_path,
        r#"{"tick_interval_ms": 0, "responses": {"0x10": {"int": 42}}}"#,
    )?;
    let config = config_path
        .to_str()
        .context("config path is not valid UTF-8")?;

    Command::new(env!("CARGO_BIN_EXE_hook_host"))
        .args(["--config", config])
        .args(args)
        .output()
        .context("executing hook_host")
}

fn read_trace(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading trace {}", path.display()))?;
    serde_json::from_str(&raw).context("parsing trace JSON")
}

fn calls_with_key<'a>(trace: &'a Value, key: &str) -> Vec<&'a Value> {
    trace["calls"]
        .as_array()
        .map(|calls| calls.iter().filter(|call| call["key"] == key).collect())
        .unwrap_or_default()
}

#[test]
fn replay_workers_produce_whole_call_sequences() -> Result<()> {
    let dir = tempdir().context("creating temporary directory for replay")?;
    let plan_path = dir.path().join("plan.json");
    let long_text = "x".repeat(250);
    fs::write(
        &plan_path,
        format!(
            r#"{{"calls": [
                {{"key": "0x10", "args": [{{"int": -1}}, {{"text": "label"}}], "read": "int"}},
                {{"long_text": "{long_text}"}}
            ]}}"#
        ),
    )?;
    let trace_path = dir.path().join("trace.json");

    let output = run_host(
        dir.path(),
        &[
            "--plan",
            plan_path.to_str().context("plan path is not valid UTF-8")?,
            "--workers",
            "3",
            "--trace-json",
            trace_path.to_str().context("trace path is not valid UTF-8")?,
        ],
    )?;
    assert!(
        output.status.success(),
        "hook_host exited with {:?}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );

    let trace = read_trace(&trace_path)?;
    assert_eq!(trace["summary"]["well_formed"], true);
    assert_eq!(trace["summary"]["executed"], 12);
    assert_eq!(trace["calls"].as_array().map(Vec::len), Some(12));

    let echo_calls = calls_with_key(&trace, ECHO_KEY);
    assert_eq!(echo_calls.len(), 3);
    for call in echo_calls {
        assert_eq!(call["words"][0], u64::MAX);
    }

    let chunks = calls_with_key(&trace, VAR_STRING_KEY);
    assert_eq!(chunks.len(), 9);
    for call in chunks {
        assert_eq!(call["words"][0], 10);
        assert_eq!(call["words"].as_array().map(Vec::len), Some(3));
    }

    let workers = trace["workers"].as_array().context("workers missing")?;
    assert_eq!(workers.len(), 3);
    for steps in workers {
        assert_eq!(steps[0]["value"], 42);
        assert!(steps[1].get("error").is_none());
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("Saved native call trace to"),
        "missing save notice: {stdout}"
    );
    Ok(())
}

#[test]
fn lua_workers_share_the_owner_engine() -> Result<()> {
    let dir = tempdir().context("creating temporary directory for lua run")?;
    let script_path = dir.path().join("worker.lua");
    fs::write(
        &script_path,
        r#"
        local answer = native.invoke_int(0x10, native.worker)
        assert(answer == 42, "unexpected answer " .. tostring(answer))
        native.push_long_string(string.rep("a", 150))
        "#,
    )?;
    let trace_path = dir.path().join("trace.json");

    let output = run_host(
        dir.path(),
        &[
            "--lua",
            script_path.to_str().context("script path is not valid UTF-8")?,
            "--workers",
            "2",
            "--trace-json",
            trace_path.to_str().context("trace path is not valid UTF-8")?,
            "--verbose",
        ],
    )?;
    assert!(
        output.status.success(),
        "hook_host exited with {:?}: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );

    let trace = read_trace(&trace_path)?;
    assert_eq!(trace["summary"]["well_formed"], true);
    assert_eq!(trace["calls"].as_array().map(Vec::len), Some(6));

    let worker_ids: BTreeSet<u64> = calls_with_key(&trace, ECHO_KEY)
        .iter()
        .filter_map(|call| call["words"][0].as_u64())
        .collect();
    assert_eq!(worker_ids, BTreeSet::from([0, 1]));
    assert_eq!(calls_with_key(&trace, VAR_STRING_KEY).len(), 4);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Native calls:"), "missing call listing: {stdout}");
    Ok(())
}

#[test]
fn lua_argument_errors_fail_the_run() -> Result<()> {
    let dir = tempdir().context("creating temporary directory for failing run")?;
    let script_path = dir.path().join("bad.lua");
    fs::write(&script_path, "native.invoke(0x10, 1, {})\n")?;

    let output = run_host(
        dir.path(),
        &[
            "--lua",
            script_path.to_str().context("script path is not valid UTF-8")?,
            "--workers",
            "1",
        ],
    )?;
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("1 Lua worker(s) failed"),
        "unexpected stderr: {stderr}"
    );
    Ok(())
}

#[test]
fn missing_plan_file_is_reported() -> Result<()> {
    let dir = tempdir().context("creating temporary directory")?;
    let missing = dir.path().join("absent.json");
    let output = run_host(
        dir.path(),
        &["--plan", missing.to_str().context("path is not valid UTF-8")?],
    )?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("reading call plan"));
    Ok(())
}
