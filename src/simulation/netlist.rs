use super::Assignment;
use crate::core::Test;
use std::collections::{HashMap, HashSet};

/// Assemble a complete simulation deck for one candidate and one test.
///
/// Layout: title, generated `.param` block (parameters, then environment
/// overrides), the template body with component values rewritten to
/// `{param}` references, the test's control script, `.end`.
pub fn build_deck(netlist_lines: &[String], assignment: &Assignment, test: &Test) -> Vec<String> {
    let mut result = Vec::with_capacity(netlist_lines.len() + assignment.len() + 16);

    // Preserve title line
    let has_title = netlist_lines
        .first()
        .map(|l| !l.trim().starts_with('.'))
        .unwrap_or(false);
    if has_title {
        result.push(netlist_lines[0].clone());
    } else {
        result.push(format!("* {}", test.name));
    }

    result.push("".to_string());
    result.push("* === Optimization Parameters (Auto-generated) ===".to_string());
    for (name, value) in assignment {
        result.push(format!(".param {} = {:e}", name, value));
    }

    let mut overridden: HashSet<String> = assignment.keys().map(|k| k.to_lowercase()).collect();
    if !test.environment.is_empty() {
        result.push(format!("* === Environment: {} ===", test.name));
        for env in &test.environment {
            if env.is_temperature() {
                result.push(format!(".temp {}", env.value));
            } else {
                result.push(format!(".param {} = {}", env.name, env.value));
                overridden.insert(env.name.to_lowercase());
            }
        }
    }
    result.push("* === End Parameters ===".to_string());
    result.push("".to_string());

    let component_params = build_component_param_map(assignment);
    let start_idx = usize::from(has_title);

    for line in &netlist_lines[start_idx..] {
        let trimmed = line.trim();
        let lower = trimmed.to_ascii_lowercase();

        if lower == ".end" {
            continue;
        }
        // Drop template definitions of anything we set above
        if lower.starts_with(".param") {
            if let Some(name) = param_definition_name(trimmed) {
                if overridden.contains(&name.to_lowercase()) {
                    continue;
                }
            }
        }

        // Parameterize component lines (X* or M*)
        if trimmed.starts_with('X') || trimmed.starts_with('M') {
            let comp_name = trimmed.split_whitespace().next().unwrap_or("");
            if let Some(params) = component_params.get(comp_name) {
                result.push(parameterize_component_line(line, params));
                continue;
            }
        }

        result.push(line.clone());
    }

    result.push("".to_string());
    result.push(format!("* === Test: {} ===", test.name));
    result.extend(test.rendered_script().lines().map(String::from));
    result.push(".end".to_string());
    result
}

/// Name defined by a `.param NAME = value` line.
fn param_definition_name(line: &str) -> Option<&str> {
    let rest = line.get(".param".len()..)?.trim_start();
    let end = rest
        .find(|c: char| c == '=' || c.is_whitespace())
        .unwrap_or(rest.len());
    let name = &rest[..end];
    (!name.is_empty()).then_some(name)
}

/// Build mapping from component names to their parameters
///
/// `XM1_W` maps component `XM1` property `W` to parameter `XM1_W`.
fn build_component_param_map(assignment: &Assignment) -> HashMap<String, Vec<(String, String)>> {
    let mut component_params: HashMap<String, Vec<(String, String)>> = HashMap::new();

    for name in assignment.keys() {
        if let Some(underscore_pos) = name.rfind('_') {
            let component = name[..underscore_pos].to_string();
            let param_type = name[underscore_pos + 1..].to_string();
            component_params
                .entry(component)
                .or_default()
                .push((param_type, name.clone()));
        }
    }

    component_params
}

/// Parameterize a single component line by replacing values with {param} references
fn parameterize_component_line(line: &str, params: &[(String, String)]) -> String {
    let mut modified = line.to_string();

    for (ptype, pname) in params {
        // Device properties are case-insensitive in SPICE; ASCII folding keeps
        // byte offsets valid for `modified`
        let lower = modified.to_ascii_lowercase();
        let pattern = format!(" {}=", ptype.to_ascii_lowercase());
        if let Some(pos) = lower.find(&pattern) {
            let val_start = pos + pattern.len();
            let remaining = &modified[val_start..];
            let val_end = remaining
                .find(|c: char| c.is_whitespace())
                .unwrap_or(remaining.len());

            modified = format!(
                "{}={{{}}}{}",
                &modified[..val_start - 1],
                pname,
                &modified[val_start + val_end..]
            );
        }
    }

    modified
}
