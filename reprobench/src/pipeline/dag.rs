//! The stage dependency graph.
//!
//! Ordering is deterministic: among stages whose dependencies are all
//! satisfied, the one declared first runs first.

use super::StageSpec;
use crate::errors::{CycleDetectedError, PipelineValidationError};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A directed graph of stages keyed by id.
#[derive(Debug, Clone, Default)]
pub struct StageGraph {
    /// The pipeline name.
    name: String,
    /// Stage specifications in declaration order.
    stages: Vec<StageSpec>,
    /// Stage id to declaration index.
    index: HashMap<String, usize>,
}

impl StageGraph {
    /// Creates an empty stage graph.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if the graph has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Returns the stages in declaration order.
    #[must_use]
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// Looks up a stage by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&StageSpec> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    /// Adds a stage. Dependencies may refer to stages added later.
    ///
    /// # Errors
    ///
    /// Returns an error if the stage is invalid or its id is already taken.
    pub fn add_stage(&mut self, spec: StageSpec) -> Result<(), PipelineValidationError> {
        spec.validate()?;

        if self.index.contains_key(&spec.id) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' is declared twice",
                spec.id
            ))
            .with_stages(vec![spec.id.clone()])
            .with_code("GRAPH-DUPLICATE"));
        }

        self.index.insert(spec.id.clone(), self.stages.len());
        self.stages.push(spec);
        Ok(())
    }

    /// Checks that every dependency names a declared stage.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first unknown dependency.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        for spec in &self.stages {
            for dep in &spec.dependencies {
                if !self.index.contains_key(dep) {
                    return Err(PipelineValidationError::new(format!(
                        "Stage '{}' depends on unknown stage '{}'",
                        spec.id, dep
                    ))
                    .with_stages(vec![spec.id.clone(), dep.clone()])
                    .with_code("GRAPH-MISSING-DEP")
                    .with_fix_hint("Check the dependency for typos or declare the missing stage."));
                }
            }
        }
        Ok(())
    }

    /// Returns every stage id with dependencies before dependents.
    ///
    /// Ties are broken by declaration order, so repeated calls on the same
    /// graph return the same sequence. Unknown dependencies are ignored here;
    /// see [`StageGraph::validate`].
    ///
    /// # Errors
    ///
    /// Returns a [`CycleDetectedError`] naming one cycle if the graph has any.
    pub fn topological_order(&self) -> Result<Vec<String>, CycleDetectedError> {
        let n = self.stages.len();
        let mut in_degree = vec![0usize; n];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];

        for (i, spec) in self.stages.iter().enumerate() {
            for dep in &spec.dependencies {
                if let Some(&d) = self.index.get(dep) {
                    in_degree[i] += 1;
                    dependents[d].push(i);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &child in &dependents[next] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }

        if order.len() < n {
            let remaining: HashSet<usize> = (0..n).filter(|&i| in_degree[i] > 0).collect();
            return Err(CycleDetectedError::new(self.find_cycle(&remaining)));
        }

        Ok(order.into_iter().map(|i| self.stages[i].id.clone()).collect())
    }

    /// Returns the targets and everything they transitively depend on, in
    /// topological order. An empty target list selects the whole graph.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown target or a cyclic graph.
    pub fn plan_for(&self, targets: &[&str]) -> Result<Vec<String>, PipelineValidationError> {
        let order = self.topological_order()?;
        if targets.is_empty() {
            return Ok(order);
        }

        let mut needed: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();
        for target in targets {
            let spec = self.stage(target).ok_or_else(|| {
                PipelineValidationError::new(format!("Unknown target stage '{target}'"))
                    .with_stages(vec![(*target).to_string()])
                    .with_code("GRAPH-UNKNOWN-TARGET")
            })?;
            stack.push(&spec.id);
        }

        while let Some(id) = stack.pop() {
            if !needed.insert(id) {
                continue;
            }
            if let Some(spec) = self.stage(id) {
                stack.extend(spec.dependencies.iter().map(String::as_str));
            }
        }

        Ok(order
            .into_iter()
            .filter(|id| needed.contains(id.as_str()))
            .collect())
    }

    /// Walks dependency edges inside the unsorted remainder until a stage
    /// repeats. Every remaining stage has a remaining dependency, so the
    /// walk cannot dead-end.
    fn find_cycle(&self, remaining: &HashSet<usize>) -> Vec<String> {
        let Some(mut current) = (0..self.stages.len()).find(|i| remaining.contains(i)) else {
            return Vec::new();
        };
        let mut path: Vec<usize> = Vec::new();

        loop {
            if let Some(pos) = path.iter().position(|&p| p == current) {
                let mut cycle: Vec<String> = path[pos..]
                    .iter()
                    .map(|&i| self.stages[i].id.clone())
                    .collect();
                cycle.push(self.stages[current].id.clone());
                return cycle;
            }
            path.push(current);

            let next = self.stages[current]
                .dependencies
                .iter()
                .filter_map(|dep| self.index.get(dep).copied())
                .find(|i| remaining.contains(i));
            match next {
                Some(next) => current = next,
                None => {
                    return path.iter().map(|&i| self.stages[i].id.clone()).collect();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageKind;
    use crate::process::CommandTemplate;
    use pretty_assertions::assert_eq;

    fn stage(id: &str, deps: &[&str]) -> StageSpec {
        StageSpec::command(id, StageKind::Build, CommandTemplate::new("true"))
            .with_dependencies(deps.iter().copied())
    }

    fn graph(stages: Vec<StageSpec>) -> StageGraph {
        let mut graph = StageGraph::new("test");
        for spec in stages {
            graph.add_stage(spec).unwrap();
        }
        graph
    }

    #[test]
    fn test_graph_creation() {
        let graph = graph(vec![stage("a", &[]), stage("b", &["a"])]);
        assert_eq!(graph.name(), "test");
        assert_eq!(graph.stage_count(), 2);
        assert!(graph.stage("b").is_some());
        assert!(graph.stage("c").is_none());
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        // Declared out of dependency order on purpose.
        let graph = graph(vec![
            stage("measure", &["build"]),
            stage("build", &["download"]),
            stage("download", &[]),
        ]);

        assert_eq!(
            graph.topological_order().unwrap(),
            vec!["download", "build", "measure"]
        );
    }

    #[test]
    fn test_ties_broken_by_declaration_order() {
        let graph = graph(vec![
            stage("fetch", &[]),
            stage("build-b", &["fetch"]),
            stage("build-a", &["fetch"]),
            stage("tools", &[]),
            stage("report", &["build-a", "build-b"]),
        ]);

        let expected = vec!["fetch", "build-b", "build-a", "tools", "report"];
        for _ in 0..10 {
            assert_eq!(graph.topological_order().unwrap(), expected);
        }
    }

    #[test]
    fn test_two_stage_cycle_detected() {
        let graph = graph(vec![stage("a", &["b"]), stage("b", &["a"])]);

        let err = graph.topological_order().unwrap_err();
        assert_eq!(err.cycle_path, vec!["a", "b", "a"]);
    }

    #[test]
    fn test_cycle_behind_acyclic_prefix() {
        let graph = graph(vec![
            stage("root", &[]),
            stage("x", &["root", "z"]),
            stage("y", &["x"]),
            stage("z", &["y"]),
        ]);

        let err = graph.topological_order().unwrap_err();
        assert_eq!(err.cycle_path.first(), err.cycle_path.last());
        assert_eq!(err.cycle_path.len(), 4);
        assert!(!err.cycle_path.contains(&"root".to_string()));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let mut graph = StageGraph::new("dup");
        graph.add_stage(stage("a", &[])).unwrap();
        let err = graph.add_stage(stage("a", &[])).unwrap_err();
        assert_eq!(err.code, Some("GRAPH-DUPLICATE"));
    }

    #[test]
    fn test_validate_unknown_dependency() {
        let graph = graph(vec![stage("a", &["missing"])]);
        let err = graph.validate().unwrap_err();
        assert_eq!(err.code, Some("GRAPH-MISSING-DEP"));
        assert_eq!(err.stages, vec!["a", "missing"]);
    }

    #[test]
    fn test_plan_for_selects_ancestors_only() {
        let graph = graph(vec![
            stage("download", &[]),
            stage("build-baseline", &["download"]),
            stage("build-bolt", &["build-baseline"]),
            stage("unrelated", &[]),
        ]);

        assert_eq!(
            graph.plan_for(&["build-baseline"]).unwrap(),
            vec!["download", "build-baseline"]
        );
        assert_eq!(graph.plan_for(&[]).unwrap().len(), 4);
        assert_eq!(
            graph.plan_for(&["missing"]).unwrap_err().code,
            Some("GRAPH-UNKNOWN-TARGET")
        );
    }
}
