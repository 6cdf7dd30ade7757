use crate::error::ConfigError;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const NETLIST_EXTENSIONS: &[&str] = &["spice", "cir", "sp", "net"];

/// Find the netlist for `circuit` under `template_dir`.
///
/// Accepts an exact relative path, a bare file name anywhere below the
/// template directory, or a schematic name (`opamp_tb.sch`) whose netlist
/// (`opamp_tb.spice`) was already exported next to it or elsewhere in the tree.
pub fn locate_netlist(template_dir: &Path, circuit: &str) -> Result<PathBuf, ConfigError> {
    let not_found = || ConfigError::TemplateNotFound {
        circuit: circuit.to_string(),
        template: template_dir.display().to_string(),
    };

    let direct = template_dir.join(circuit);
    if direct.is_file() && is_netlist(&direct) {
        return Ok(direct);
    }

    let wanted_stem = Path::new(circuit)
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(not_found)?
        .to_string();

    let mut candidates: Vec<PathBuf> = WalkDir::new(template_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            is_netlist(path)
                && path.file_stem().and_then(|s| s.to_str()) == Some(wanted_stem.as_str())
        })
        .collect();

    // Shallowest match wins; ties broken by path for a stable choice
    candidates.sort_by(|a, b| {
        a.components()
            .count()
            .cmp(&b.components().count())
            .then_with(|| a.cmp(b))
    });
    candidates.into_iter().next().ok_or_else(not_found)
}

fn is_netlist(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| NETLIST_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Load netlist file into memory as vector of lines
pub fn load_netlist(netlist_path: &Path) -> Result<Vec<String>, ConfigError> {
    let content = fs::read_to_string(netlist_path)?;

    Ok(content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}
