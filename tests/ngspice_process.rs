//! Batch-process adapter driven by stand-in shell scripts instead of ngspice.
#![cfg(unix)]

use circuitopt::simulation::{Assignment, RunControl};
use circuitopt::{NgSpiceProcess, SimError, SimulationRequest, Simulator, Test};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn netlist() -> Vec<String> {
    ["* amplifier", "M1 out in 0 0 nmos W=1u L=1u", ".end"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// One test function so no other thread forks while a script is open for writing.
// The helper thread below only flips the cancellation flag.
#[test]
fn fake_ngspice_runs() {
    let bin = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let test = Test::new("op", vec![], ".op", "");
    let assignment: Assignment = [("W".to_string(), 2.5)].into_iter().collect();

    // echoes the rendered parameter back as a measurement
    let echo = script(
        bin.path(),
        "echo-ngspice",
        r#"grep -i '^\.param W ' "$2" | sed 's/^\.param W = /w_val = /'"#,
    );
    let sleepy = script(bin.path(), "slow-ngspice", "sleep 5");
    let crashing = script(bin.path(), "crash-ngspice", "echo 'fatal: no such model' >&2\nexit 3");

    let control = RunControl::default();
    let request = SimulationRequest {
        template: "amp",
        assignment: &assignment,
        test: &test,
        control: &control,
    };

    let sim = NgSpiceProcess::new(netlist())
        .with_binary(&echo)
        .with_workspace_root(scratch.path());
    let metrics = sim.submit(&request).unwrap();
    assert_eq!(metrics.get("W"), Some(&2.5));

    let sim = NgSpiceProcess::new(netlist()).with_binary(&crashing);
    assert!(matches!(
        sim.submit(&request),
        Err(SimError::Crashed { ref stderr, .. }) if stderr.contains("no such model")
    ));

    let bounded = RunControl {
        call_timeout: Some(Duration::from_millis(200)),
        ..RunControl::default()
    };
    let request = SimulationRequest {
        control: &bounded,
        ..request
    };
    let sim = NgSpiceProcess::new(netlist()).with_binary(&sleepy);
    assert!(matches!(sim.submit(&request), Err(SimError::Timeout(_))));

    let cancelled = RunControl::default();
    cancelled.cancel.cancel();
    let request = SimulationRequest {
        control: &cancelled,
        ..request
    };
    assert!(matches!(sim.submit(&request), Err(SimError::Cancelled)));

    // cancelled while the process is running: the child is killed, not awaited
    let running = RunControl::default();
    let token = running.cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        token.cancel();
    });
    let request = SimulationRequest {
        control: &running,
        ..request
    };
    let started = Instant::now();
    let outcome = sim.submit(&request);
    canceller.join().unwrap();
    assert!(matches!(outcome, Err(SimError::Cancelled)), "{:?}", outcome);
    assert!(started.elapsed() < Duration::from_secs(2));

    // the run deadline cuts the call short and is reported as an abort
    let deadline = RunControl {
        deadline: Some(Instant::now() + Duration::from_millis(150)),
        call_timeout: Some(Duration::from_secs(30)),
        ..RunControl::default()
    };
    let request = SimulationRequest {
        control: &deadline,
        ..request
    };
    let started = Instant::now();
    let outcome = sim.submit(&request);
    assert!(matches!(outcome, Err(SimError::DeadlineReached)), "{:?}", outcome);
    assert!(started.elapsed() < Duration::from_secs(2));
}
