use super::netlist::build_deck;
use super::template::{load_netlist, locate_netlist};
use super::{MetricMap, SimulationRequest, Simulator, normalize_metric_name};
use crate::error::{ConfigError, SimError};
use crossbeam::channel::{after, never, select, tick};
use regex::Regex;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Output fragments ngspice prints when an analysis fails to converge.
const CONVERGENCE_FAILURES: &[&str] = &[
    "timestep too small",
    "no convergence",
    "singular matrix",
    "gmin stepping failed",
    "source stepping failed",
    "iteration limit reached",
];

/// Runs ngspice in batch mode as an external process, one process per test.
///
/// Every call writes its deck into a fresh temporary directory, so concurrent
/// calls never share files.
pub struct NgSpiceProcess {
    binary: PathBuf,
    netlist: Vec<String>,
    workspace_root: Option<PathBuf>,
}

impl NgSpiceProcess {
    pub fn new(netlist: Vec<String>) -> Self {
        Self {
            binary: PathBuf::from("ngspice"),
            netlist,
            workspace_root: None,
        }
    }

    /// Load the template netlist for `circuit` from `template_dir`.
    pub fn from_template(template_dir: &Path, circuit: &str) -> Result<Self, ConfigError> {
        let path = locate_netlist(template_dir, circuit)?;
        debug!(netlist = %path.display(), "loaded template netlist");
        Ok(Self::new(load_netlist(&path)?))
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Create per-call workspaces below `root` instead of the system temp dir.
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn netlist(&self) -> &[String] {
        &self.netlist
    }

    fn workspace(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("circuitopt-");
        match &self.workspace_root {
            Some(root) => {
                fs::create_dir_all(root)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
    }

    /// Spawn ngspice and wait for it, honouring the call budget and cancellation.
    fn run(
        &self,
        deck: &Path,
        dir: &Path,
        request: &SimulationRequest<'_>,
    ) -> Result<(ExitStatus, String, String), SimError> {
        let stdout_path = dir.join("stdout.log");
        let stderr_path = dir.join("stderr.log");

        let mut child = Command::new(&self.binary)
            .arg("-b")
            .arg(deck)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(File::create(&stdout_path)?))
            .stderr(Stdio::from(File::create(&stderr_path)?))
            .spawn()?;

        let budget = request.control.call_budget();
        let ticker = tick(POLL_INTERVAL);
        let expired = budget.map(after).unwrap_or_else(never);

        let status = loop {
            let timed_out = select! {
                recv(ticker) -> _ => false,
                recv(expired) -> _ => true,
            };
            if timed_out {
                terminate(&mut child);
                // the budget may have been cut short by the run deadline
                return Err(match request.control.should_abort() {
                    Some(reason) => reason.into(),
                    None => SimError::Timeout(budget.unwrap_or_default()),
                });
            }
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if let Some(reason) = request.control.should_abort() {
                terminate(&mut child);
                return Err(reason.into());
            }
        };

        let stdout = fs::read_to_string(&stdout_path).unwrap_or_default();
        let stderr = fs::read_to_string(&stderr_path).unwrap_or_default();
        Ok((status, stdout, stderr))
    }
}

fn terminate(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

impl Simulator for NgSpiceProcess {
    fn submit(&self, request: &SimulationRequest<'_>) -> Result<MetricMap, SimError> {
        if let Some(reason) = request.control.should_abort() {
            return Err(reason.into());
        }

        let workspace = self.workspace()?;
        let deck_path = workspace.path().join(format!("{}.spice", request.test.name));
        let deck = build_deck(&self.netlist, request.assignment, request.test);
        fs::write(&deck_path, deck.join("\n"))?;

        let (status, stdout, stderr) = self.run(&deck_path, workspace.path(), request)?;
        debug!(
            circuit = request.template,
            test = %request.test.name,
            %status,
            "ngspice finished"
        );
        interpret_output(&request.test.name, status.success(), &status.to_string(), &stdout, &stderr)
    }

    fn name(&self) -> &str {
        "ngspice"
    }
}

/// Turn a finished run's output into metrics or a failure.
fn interpret_output(
    test_name: &str,
    success: bool,
    status: &str,
    stdout: &str,
    stderr: &str,
) -> Result<MetricMap, SimError> {
    let metrics = parse_measurements(stdout);

    let combined = format!("{}\n{}", stdout, stderr).to_lowercase();
    if let Some(marker) = CONVERGENCE_FAILURES.iter().find(|m| combined.contains(*m)) {
        if metrics.is_empty() {
            return Err(SimError::NonConvergence(format!(
                "test '{}': {}",
                test_name, marker
            )));
        }
    }

    if !success {
        let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
        return Err(SimError::Crashed {
            status: status.to_string(),
            stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
        });
    }

    if metrics.is_empty() {
        return Err(SimError::NoMetrics(test_name.to_string()));
    }
    Ok(metrics)
}

/// Parse `name = value` measurement lines (ngspice `meas` / `print` output).
pub fn parse_measurements(output: &str) -> MetricMap {
    static MEASUREMENT: OnceLock<Regex> = OnceLock::new();
    let re = MEASUREMENT.get_or_init(|| {
        Regex::new(
            r"(?m)^\s*([A-Za-z_][\w.]*)\s*[=:]\s*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)",
        )
        .expect("static measurement pattern")
    });

    let mut metrics = MetricMap::new();
    for caps in re.captures_iter(output) {
        if let Ok(value) = caps[2].parse::<f64>() {
            if value.is_finite() {
                metrics.insert(normalize_metric_name(&caps[1]), value);
            }
        }
    }
    metrics
}
