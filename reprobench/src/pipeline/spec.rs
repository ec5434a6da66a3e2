//! Stage specifications.

use super::generate_idempotency_key;
use super::StageContext;
use crate::core::StageKind;
use crate::errors::{PipelineValidationError, ReproError};
use crate::process::{CommandTemplate, TemplateVars};
use crate::trials::TrialSpec;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;

/// An in-process stage step, e.g. statistics over recorded samples.
#[async_trait]
pub trait StageTask: Send + Sync + Debug {
    /// A stable description, part of the stage's idempotency key.
    fn describe(&self) -> String;

    /// Executes the task. Declared outputs must exist afterwards.
    async fn execute(&self, ctx: &StageContext<'_>) -> Result<(), ReproError>;
}

/// What a stage does when it is not fresh.
#[derive(Debug, Clone)]
pub enum StageAction {
    /// Run one external command in the stage's work directory.
    Command(CommandTemplate),
    /// Repeat a measured command and dump the samples to the stage output.
    Trials(TrialSpec),
    /// Run an in-process task.
    Task(Arc<dyn StageTask>),
}

impl StageAction {
    /// A stable description used for idempotency keys and diagnostics.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Command(template) => template.describe(),
            Self::Trials(spec) => format!(
                "trials[{}; {:?}] {}",
                spec.config,
                spec.sample,
                spec.template.describe()
            ),
            Self::Task(task) => format!("task {}", task.describe()),
        }
    }
}

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique id of the stage.
    pub id: String,
    /// The kind of stage.
    pub kind: StageKind,
    /// What the stage does.
    pub action: StageAction,
    /// Ids of stages this stage depends on, in declaration order.
    pub dependencies: Vec<String>,
    /// Artifacts the stage owns and produces.
    pub outputs: Vec<PathBuf>,
    /// Stage-local template variables; they are part of the idempotency key.
    pub vars: TemplateVars,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: StageKind, action: StageAction) -> Self {
        Self {
            id: id.into(),
            kind,
            action,
            dependencies: Vec::new(),
            outputs: Vec::new(),
            vars: TemplateVars::new(),
        }
    }

    /// Creates a command stage.
    #[must_use]
    pub fn command(id: impl Into<String>, kind: StageKind, template: CommandTemplate) -> Self {
        Self::new(id, kind, StageAction::Command(template))
    }

    /// Creates a measurement stage whose single output is the sample dump.
    #[must_use]
    pub fn trials(id: impl Into<String>, spec: TrialSpec, samples_file: impl Into<PathBuf>) -> Self {
        Self::new(id, StageKind::Measure, StageAction::Trials(spec)).with_output(samples_file)
    }

    /// Creates an in-process task stage.
    #[must_use]
    pub fn task(id: impl Into<String>, kind: StageKind, task: Arc<dyn StageTask>) -> Self {
        Self::new(id, kind, StageAction::Task(task))
    }

    /// Adds a dependency. Duplicates are ignored.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    /// Adds several dependencies.
    #[must_use]
    pub fn with_dependencies(self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        deps.into_iter().fold(self, |spec, dep| spec.with_dependency(dep))
    }

    /// Declares an output artifact.
    #[must_use]
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Sets a stage-local template variable.
    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.set(name, value);
        self
    }

    /// Derives the idempotency key from everything that defines the stage.
    #[must_use]
    pub fn idempotency_key(&self) -> String {
        let kind = self.kind.to_string();
        let action = self.action.describe();
        let deps = self.dependencies.join(",");
        let outputs = self
            .outputs
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(",");
        let vars = format!("{:?}", self.vars);
        generate_idempotency_key(&[&self.id, &kind, &action, &deps, &outputs, &vars])
    }

    /// The key written to the stage's stamp.
    ///
    /// Extends [`StageSpec::idempotency_key`] with the run-time inputs the
    /// action consumes: the value of every placeholder its command references
    /// and, for measurement stages, the number of trials. Per-trial
    /// placeholders are absent from `vars` and drop out.
    #[must_use]
    pub fn resolved_key(&self, vars: &TemplateVars, trials: usize) -> String {
        let placeholders = match &self.action {
            StageAction::Command(template) => template.placeholders(),
            StageAction::Trials(spec) => spec.template.placeholders(),
            StageAction::Task(_) => BTreeSet::new(),
        };
        let mut inputs: Vec<String> = placeholders
            .iter()
            .filter_map(|name| vars.get(name).map(|value| format!("{name}={value}")))
            .collect();
        if matches!(self.action, StageAction::Trials(_)) {
            inputs.push(format!("trials={trials}"));
        }

        let definition = self.idempotency_key();
        let inputs = inputs.join("\n");
        generate_idempotency_key(&[&definition, &inputs])
    }

    /// Validates the stage specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the id is unusable, the stage depends on itself,
    /// or a measurement stage does not declare exactly one output.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        let valid_id = !self.id.is_empty()
            && self
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if !valid_id {
            return Err(PipelineValidationError::new(format!(
                "Stage id '{}' must be non-empty and use only [A-Za-z0-9._-]",
                self.id
            ))
            .with_stages(vec![self.id.clone()])
            .with_code("GRAPH-BAD-ID"));
        }

        if self.dependencies.contains(&self.id) {
            return Err(PipelineValidationError::new(format!(
                "Stage '{}' cannot depend on itself",
                self.id
            ))
            .with_stages(vec![self.id.clone()])
            .with_code("GRAPH-SELF-DEP"));
        }

        if matches!(self.action, StageAction::Trials(_)) && self.outputs.len() != 1 {
            return Err(PipelineValidationError::new(format!(
                "Measurement stage '{}' must declare exactly one output (its sample file), found {}",
                self.id,
                self.outputs.len()
            ))
            .with_stages(vec![self.id.clone()])
            .with_code("GRAPH-TRIAL-OUTPUT"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ConfigName;
    use crate::trials::SampleSource;

    fn touch(id: &str) -> StageSpec {
        StageSpec::command(id, StageKind::Build, CommandTemplate::new("touch").arg("{stage_dir}/out"))
    }

    #[test]
    fn test_stage_spec_creation() {
        let spec = touch("build")
            .with_dependencies(["download", "bootstrap", "download"])
            .with_output("/w/build/out");

        assert_eq!(spec.id, "build");
        assert_eq!(spec.dependencies, vec!["download", "bootstrap"]);
        assert_eq!(spec.outputs.len(), 1);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_stage_spec_self_dependency() {
        let spec = touch("a").with_dependency("a");
        let err = spec.validate().unwrap_err();
        assert_eq!(err.code, Some("GRAPH-SELF-DEP"));
    }

    #[test]
    fn test_stage_spec_bad_id() {
        assert!(touch("").validate().is_err());
        assert!(touch("has space").validate().is_err());
        assert!(touch("build-pgo_lto.2").validate().is_ok());
    }

    #[test]
    fn test_trials_stage_requires_single_output() {
        let trial = TrialSpec::new(
            ConfigName::Baseline,
            CommandTemplate::new("true"),
            SampleSource::WallClock,
        );
        let spec = StageSpec::trials("measure", trial.clone(), "/r/baseline.samples");
        assert!(spec.validate().is_ok());
        assert_eq!(spec.kind, StageKind::Measure);

        let spec = StageSpec::new("measure", StageKind::Measure, StageAction::Trials(trial));
        assert_eq!(spec.validate().unwrap_err().code, Some("GRAPH-TRIAL-OUTPUT"));
    }

    #[test]
    fn test_idempotency_key_tracks_definition() {
        let base = touch("build").with_output("/w/out");
        let same = touch("build").with_output("/w/out");
        let other_cmd = StageSpec::command("build", StageKind::Build, CommandTemplate::new("make"))
            .with_output("/w/out");
        let other_var = touch("build").with_output("/w/out").with_var("llvm_ref", "main");

        assert_eq!(base.idempotency_key(), same.idempotency_key());
        assert_ne!(base.idempotency_key(), other_cmd.idempotency_key());
        assert_ne!(base.idempotency_key(), other_var.idempotency_key());
    }

    #[test]
    fn test_resolved_key_tracks_referenced_inputs() {
        let build = StageSpec::command(
            "build",
            StageKind::Build,
            CommandTemplate::new("ninja").arg("-j{jobs}"),
        );
        let vars = |jobs: &str| TemplateVars::new().with("jobs", jobs).with("unused", "x");

        assert_eq!(build.resolved_key(&vars("8"), 5), build.resolved_key(&vars("8"), 3));
        assert_ne!(build.resolved_key(&vars("8"), 5), build.resolved_key(&vars("16"), 5));
        assert_eq!(
            build.resolved_key(&vars("8"), 5),
            build.resolved_key(&TemplateVars::new().with("jobs", "8"), 5)
        );
    }

    #[test]
    fn test_resolved_key_tracks_trial_count() {
        let trial = TrialSpec::new(
            ConfigName::Bolt,
            CommandTemplate::shell("echo {trial} > {trial_dir}/t"),
            SampleSource::File("t".into()),
        );
        let measure = StageSpec::trials("measure", trial, "/r/bolt.samples");
        let vars = TemplateVars::new();

        assert_eq!(measure.resolved_key(&vars, 3), measure.resolved_key(&vars, 3));
        assert_ne!(measure.resolved_key(&vars, 3), measure.resolved_key(&vars, 4));
    }
}
