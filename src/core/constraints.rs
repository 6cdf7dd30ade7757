use super::expression::CompiledExpression;
use super::types::{Parameter, ParameterConstraint, RelationshipType};
use crate::error::{ConfigError, ExpressionError};
use crate::simulation::Assignment;
use std::collections::HashMap;
use tracing::warn;

struct ConstraintData {
    relationship: RelationshipType,
    target_idx: usize,
    source_indices: Vec<usize>,
    compiled: CompiledExpression,
}

/// Expands free parameter values into a full, bounds-respecting assignment.
///
/// Free parameters are those never targeted by a constraint. Constraints are
/// evaluated in dependency order so every source is final before it is read.
pub struct ConstraintResolver {
    parameters: Vec<Parameter>,
    free: Vec<usize>,
    constraints: Vec<ConstraintData>,
    grid: Option<f64>,
}

impl ConstraintResolver {
    /// Validate and compile all constraints
    ///
    /// Checks names, rejects cyclic dependency graphs, compiles every expression
    /// against its declared sources and orders the constraints topologically.
    pub fn new(
        parameters: &[Parameter],
        constraints: &[ParameterConstraint],
    ) -> Result<Self, ConfigError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(parameters.len());
        for (i, param) in parameters.iter().enumerate() {
            if index.insert(param.name(), i).is_some() {
                return Err(ConfigError::DuplicateName {
                    kind: "parameter",
                    name: param.name().to_string(),
                });
            }
        }

        let lookup = |name: &str| {
            index
                .get(name)
                .copied()
                .ok_or_else(|| ConfigError::UnknownParameter(name.to_string()))
        };

        // (target_idx, source_indices) per constraint, input order
        let mut edges = Vec::with_capacity(constraints.len());
        let mut constrained = vec![false; parameters.len()];
        for constraint in constraints {
            let target_idx = lookup(&constraint.target_param)?;
            if std::mem::replace(&mut constrained[target_idx], true) {
                return Err(ConfigError::MultipleConstraints(
                    constraint.target_param.clone(),
                ));
            }
            let source_indices = constraint
                .source_params
                .iter()
                .map(|name| lookup(name))
                .collect::<Result<Vec<_>, _>>()?;
            edges.push((target_idx, source_indices));
        }

        let order = dependency_order(&edges, parameters)?;

        let mut compiled: Vec<Option<ConstraintData>> = Vec::with_capacity(constraints.len());
        for (constraint, (target_idx, source_indices)) in constraints.iter().zip(edges) {
            let expr = CompiledExpression::compile(&constraint.expression, &constraint.source_params)
                .map_err(|e| match e {
                    ExpressionError::UnknownReference { name, .. } => ConfigError::UnknownReference {
                        target: constraint.target_param.clone(),
                        expression: constraint.expression.clone(),
                        name,
                    },
                    other => ConfigError::Expression {
                        target: constraint.target_param.clone(),
                        source: other,
                    },
                })?;
            compiled.push(Some(ConstraintData {
                relationship: constraint.relationship,
                target_idx,
                source_indices,
                compiled: expr,
            }));
        }

        let ordered: Vec<ConstraintData> = order
            .into_iter()
            .filter_map(|i| compiled[i].take())
            .collect();

        let free: Vec<usize> = (0..parameters.len()).filter(|&i| !constrained[i]).collect();
        if free.is_empty() {
            return Err(ConfigError::NoFreeParameters);
        }

        Ok(Self {
            parameters: parameters.to_vec(),
            free,
            constraints: ordered,
            grid: None,
        })
    }

    /// Snap every resolved value to a manufacturing grid (e.g. 5nm).
    pub fn with_grid(mut self, step: Option<f64>) -> Self {
        self.grid = step.filter(|s| s.is_finite() && *s > 0.0);
        self
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn param_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn num_free(&self) -> usize {
        self.free.len()
    }

    pub fn free_names(&self) -> Vec<String> {
        self.free
            .iter()
            .map(|&i| self.parameters[i].name().to_string())
            .collect()
    }

    pub fn free_bounds(&self) -> Vec<(f64, f64)> {
        self.free.iter().map(|&i| self.parameters[i].bounds()).collect()
    }

    pub fn initial_free_values(&self) -> Vec<f64> {
        self.free.iter().map(|&i| self.parameters[i].value()).collect()
    }

    /// Resolve the full assignment for one candidate.
    ///
    /// Deterministic: the same free values always give the same result.
    pub fn resolve(&self, free_values: &[f64]) -> Result<Vec<f64>, ExpressionError> {
        self.resolve_inner(free_values).map_err(|(_, e)| e)
    }

    /// Resolve the configured starting point; any failure here is fatal.
    pub fn resolve_initial(&self) -> Result<Vec<f64>, ConfigError> {
        self.resolve_inner(&self.initial_free_values())
            .map_err(|(target_idx, source)| ConfigError::Expression {
                target: self.parameters[target_idx].name().to_string(),
                source,
            })
    }

    fn resolve_inner(&self, free_values: &[f64]) -> Result<Vec<f64>, (usize, ExpressionError)> {
        if free_values.len() != self.free.len() {
            return Err((
                self.free.first().copied().unwrap_or(0),
                ExpressionError::ArityMismatch {
                    expected: self.free.len(),
                    got: free_values.len(),
                },
            ));
        }

        let mut values: Vec<f64> = self.parameters.iter().map(Parameter::value).collect();
        for (&idx, &value) in self.free.iter().zip(free_values) {
            values[idx] = self.fit(idx, value);
        }

        let max_sources = self
            .constraints
            .iter()
            .map(|c| c.source_indices.len())
            .max()
            .unwrap_or(0);
        let mut source_values = Vec::with_capacity(max_sources);

        for constraint in &self.constraints {
            source_values.clear();
            source_values.extend(constraint.source_indices.iter().map(|&idx| values[idx]));

            let computed = constraint
                .compiled
                .evaluate(&source_values)
                .map_err(|e| (constraint.target_idx, e))?;
            let target_idx = constraint.target_idx;
            let projected = constraint
                .relationship
                .project(values[target_idx], computed);
            let fitted = self.fit(target_idx, projected);
            let (min, max) = self.parameters[target_idx].bounds();
            if !(min..=max).contains(&projected) {
                warn!(
                    param = self.parameters[target_idx].name(),
                    computed = projected,
                    clamped = fitted,
                    "derived parameter clamped into bounds"
                );
            }
            values[target_idx] = fitted;
        }

        Ok(values)
    }

    /// Clamp (and optionally grid-snap) a value for the parameter at `idx`.
    fn fit(&self, idx: usize, value: f64) -> f64 {
        let param = &self.parameters[idx];
        let clamped = param.clamp_value(value);
        match self.grid {
            Some(step) => param.clamp_value((clamped / step).round() * step),
            None => clamped,
        }
    }

    /// Name/value pairs in input parameter order.
    pub fn assignment(&self, values: &[f64]) -> Assignment {
        self.parameters
            .iter()
            .zip(values)
            .map(|(p, &v)| (p.name().to_string(), v))
            .collect()
    }

    /// Parameter snapshot carrying `values`, in input parameter order.
    pub fn snapshot(&self, values: &[f64]) -> Vec<Parameter> {
        self.parameters
            .iter()
            .zip(values)
            .map(|(p, &v)| p.with_value(v))
            .collect()
    }
}

/// Order constraints so that each runs after every constraint producing one of its sources.
///
/// Uses depth-first search over the source -> target graph; a back edge means
/// a cycle. Returns constraint indices in evaluation order.
fn dependency_order(
    edges: &[(usize, Vec<usize>)],
    params: &[Parameter],
) -> Result<Vec<usize>, ConfigError> {
    let param_count = params.len();
    let mut graph: Vec<Vec<usize>> = vec![Vec::new(); param_count];
    let mut producer: Vec<Option<usize>> = vec![None; param_count];

    for (c_idx, (target_idx, sources)) in edges.iter().enumerate() {
        producer[*target_idx] = Some(c_idx);
        for &src_idx in sources {
            graph[src_idx].push(*target_idx);
        }
    }

    fn dfs(
        node: usize,
        graph: &[Vec<usize>],
        visited: &mut [bool],
        rec_stack: &mut [bool],
        postorder: &mut Vec<usize>,
        params: &[Parameter],
    ) -> Result<(), ConfigError> {
        visited[node] = true;
        rec_stack[node] = true;

        for &neighbor in &graph[node] {
            if !visited[neighbor] {
                dfs(neighbor, graph, visited, rec_stack, postorder, params)?;
            } else if rec_stack[neighbor] {
                return Err(ConfigError::Cycle(params[neighbor].name().to_string()));
            }
        }

        rec_stack[node] = false;
        postorder.push(node);
        Ok(())
    }

    let mut visited = vec![false; param_count];
    let mut rec_stack = vec![false; param_count];
    let mut postorder = Vec::with_capacity(param_count);

    for i in 0..param_count {
        if !visited[i] {
            dfs(i, &graph, &mut visited, &mut rec_stack, &mut postorder, params)?;
        }
    }

    // Reverse postorder is a topological order: sources before targets
    Ok(postorder
        .into_iter()
        .rev()
        .filter_map(|node| producer[node])
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    fn param(name: &str, value: f64, min: f64, max: f64) -> Parameter {
        Parameter::new(name, value, min, max).unwrap()
    }

    #[test]
    fn test_equals_copies_source_exactly() {
        let params = vec![param("X1", 1.0, 1.0, 10.0), param("X2", 3.3, 1.0, 10.0)];
        let constraints = vec![ParameterConstraint::equals("X1", ["X2"], "X2")];
        let resolver = ConstraintResolver::new(&params, &constraints).unwrap();

        assert_eq!(resolver.free_names(), vec!["X2".to_string()]);
        for x2 in [1.0, 2.5, 7.125, 10.0] {
            let values = resolver.resolve(&[x2]).unwrap();
            assert_eq!(values[0], values[1]);
            assert_eq!(values[1], x2);
        }
    }

    #[test]
    fn test_chained_constraints_resolve_in_dependency_order() {
        // C depends on B, B depends on A; declared out of order on purpose
        let params = vec![
            param("C", 0.0, 0.0, 100.0),
            param("B", 0.0, 0.0, 100.0),
            param("A", 2.0, 0.0, 10.0),
        ];
        let constraints = vec![
            ParameterConstraint::equals("C", ["B"], "B + 1"),
            ParameterConstraint::equals("B", ["A"], "A * 3"),
        ];
        let resolver = ConstraintResolver::new(&params, &constraints).unwrap();
        let values = resolver.resolve(&[2.0]).unwrap();
        assert_eq!(values, vec![7.0, 6.0, 2.0]);
    }

    #[test]
    fn test_derived_values_are_clamped() {
        let params = vec![param("A", 5.0, 0.0, 10.0), param("B", 1.0, 0.0, 4.0)];
        let constraints = vec![ParameterConstraint::equals("B", ["A"], "A * 2")];
        let resolver = ConstraintResolver::new(&params, &constraints).unwrap();

        let values = resolver.resolve(&[5.0]).unwrap();
        assert_eq!(values[1], 4.0);
        // Free values are clamped as well
        let values = resolver.resolve(&[50.0]).unwrap();
        assert_eq!(values[0], 10.0);
    }

    #[test]
    fn test_cycle_rejected() {
        let params = vec![param("A", 1.0, 0.0, 10.0), param("B", 1.0, 0.0, 10.0), param("F", 1.0, 0.0, 1.0)];
        let constraints = vec![
            ParameterConstraint::equals("A", ["B"], "B"),
            ParameterConstraint::equals("B", ["A"], "A"),
        ];
        assert!(matches!(
            ConstraintResolver::new(&params, &constraints),
            Err(ConfigError::Cycle(_))
        ));

        let self_ref = vec![ParameterConstraint::equals("A", ["A", "F"], "A + F")];
        assert!(matches!(
            ConstraintResolver::new(&params, &self_ref),
            Err(ConfigError::Cycle(_))
        ));
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let params = vec![param("A", 1.0, 0.0, 10.0), param("B", 1.0, 0.0, 10.0), param("C", 1.0, 0.0, 10.0)];
        // C is a parameter but not a declared source of this constraint
        let constraints = vec![ParameterConstraint::equals("A", ["B"], "B + C")];
        match ConstraintResolver::new(&params, &constraints) {
            Err(ConfigError::UnknownReference { name, target, .. }) => {
                assert_eq!(name, "C");
                assert_eq!(target, "A");
            }
            other => panic!("expected UnknownReference, got {:?}", other.err()),
        }

        let missing = vec![ParameterConstraint::equals("A", ["Z"], "Z")];
        assert!(matches!(
            ConstraintResolver::new(&params, &missing),
            Err(ConfigError::UnknownParameter(name)) if name == "Z"
        ));
    }

    #[test]
    fn test_no_free_parameters() {
        let params = vec![param("A", 1.0, 0.0, 10.0)];
        let constraints = vec![ParameterConstraint::equals("A", Vec::<String>::new(), "2")];
        assert!(matches!(
            ConstraintResolver::new(&params, &constraints),
            Err(ConfigError::NoFreeParameters)
        ));
    }

    #[test]
    fn test_duplicate_targets_and_names() {
        let params = vec![param("A", 1.0, 0.0, 10.0), param("B", 1.0, 0.0, 10.0)];
        let twice = vec![
            ParameterConstraint::equals("A", ["B"], "B"),
            ParameterConstraint::equals("A", ["B"], "B * 2"),
        ];
        assert!(matches!(
            ConstraintResolver::new(&params, &twice),
            Err(ConfigError::MultipleConstraints(_))
        ));

        let dupes = vec![param("A", 1.0, 0.0, 10.0), param("A", 2.0, 0.0, 10.0)];
        assert!(matches!(
            ConstraintResolver::new(&dupes, &[]),
            Err(ConfigError::DuplicateName { .. })
        ));
    }

    #[test]
    fn test_division_by_zero_is_recoverable_per_candidate() {
        let params = vec![param("A", 1.0, 0.0, 10.0), param("B", 1.0, 0.0, 10.0)];
        let constraints = vec![ParameterConstraint::equals("B", ["A"], "1 / A")];
        let resolver = ConstraintResolver::new(&params, &constraints).unwrap();

        assert!(resolver.resolve_initial().is_ok());
        assert_eq!(resolver.resolve(&[0.0]), Err(ExpressionError::DivisionByZero));
        assert!(resolver.resolve(&[2.0]).is_ok());
    }

    #[test]
    fn test_initial_expression_failure_is_configuration_error() {
        let params = vec![param("A", 0.0, 0.0, 10.0), param("B", 1.0, 0.0, 10.0)];
        let constraints = vec![ParameterConstraint::equals("B", ["A"], "1 / A")];
        let resolver = ConstraintResolver::new(&params, &constraints).unwrap();
        assert!(matches!(
            resolver.resolve_initial(),
            Err(ConfigError::Expression { target, .. }) if target == "B"
        ));
    }

    #[test]
    fn test_inequality_keeps_satisfied_value() {
        let params = vec![param("A", 2.0, 0.0, 10.0), param("B", 5.0, 0.0, 10.0)];
        let constraints = vec![ParameterConstraint::new(
            "B",
            ["A"],
            "A * 2",
            RelationshipType::GreaterThanOrEqual,
            "B >= 2A",
        )];
        let resolver = ConstraintResolver::new(&params, &constraints).unwrap();
        assert_eq!(resolver.resolve(&[2.0]).unwrap()[1], 5.0);
        assert_eq!(resolver.resolve(&[4.0]).unwrap()[1], 8.0);
    }

    #[test]
    fn test_grid_snapping_stays_in_bounds() {
        let params = vec![param("W", 1.0, 0.42, 10.0)];
        let resolver = ConstraintResolver::new(&params, &[])
            .unwrap()
            .with_grid(Some(0.25));
        let values = resolver.resolve(&[0.43]).unwrap();
        assert!(values[0] >= 0.42 && values[0] <= 10.0);
        assert_eq!(resolver.resolve(&[1.3]).unwrap()[0], 1.25);
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let params = vec![
            param("A", 1.0, 0.0, 10.0),
            param("B", 1.0, 0.0, 10.0),
            param("C", 1.0, 0.0, 30.0),
        ];
        let constraints = vec![ParameterConstraint::equals("C", ["A", "B"], "A ^ 2 / (B + 1)")];
        let resolver = ConstraintResolver::new(&params, &constraints).unwrap();
        let first = resolver.resolve(&[3.7, 0.9]).unwrap();
        for _ in 0..10 {
            assert_eq!(resolver.resolve(&[3.7, 0.9]).unwrap(), first);
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn warnings_while(f: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_clamped_derived_value_warns_with_and_without_grid() {
        let params = vec![param("L", 1e-6, 1e-7, 1e-5), param("W", 1e-6, 1e-7, 2e-6)];
        let constraints = vec![ParameterConstraint::equals("W", ["L"], "L * 10")];

        for grid in [None, Some(5e-9)] {
            let resolver = ConstraintResolver::new(&params, &constraints)
                .unwrap()
                .with_grid(grid);
            let mut values = Vec::new();
            let logs = warnings_while(|| values = resolver.resolve(&[1e-6]).unwrap());
            assert!((values[1] - 2e-6).abs() < 1e-15);
            assert!(logs.contains("WARN"), "{}", logs);
            assert!(logs.contains("derived parameter clamped into bounds"), "{}", logs);

            let logs = warnings_while(|| {
                resolver.resolve(&[1.5e-7]).unwrap();
            });
            assert!(logs.is_empty(), "{}", logs);
        }
    }
}
