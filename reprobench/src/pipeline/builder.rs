//! Pipeline builder with validation.

use super::{StageGraph, StageSpec};
use crate::errors::PipelineValidationError;

/// Builder for creating validated stage graphs.
///
/// Stages may be added in any order; dependencies are resolved when the
/// graph is built.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// Stage specifications in insertion order.
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Adds a stage to the pipeline.
    #[must_use]
    pub fn stage(mut self, spec: StageSpec) -> Self {
        self.stages.push(spec);
        self
    }

    /// Builds the graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline is empty, a stage is invalid or
    /// duplicated, a dependency is unknown, or the graph has a cycle.
    pub fn build(self) -> Result<StageGraph, PipelineValidationError> {
        if self.stages.is_empty() {
            return Err(PipelineValidationError::new("Pipeline has no stages")
                .with_code("GRAPH-EMPTY")
                .with_fix_hint("Add at least one stage to the pipeline before building."));
        }

        let mut graph = StageGraph::new(self.name);
        for spec in self.stages {
            graph.add_stage(spec)?;
        }

        graph.validate()?;
        graph.topological_order()?;

        Ok(graph)
    }
}
