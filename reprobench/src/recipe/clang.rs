//! The clang build-time reproduction pipeline.
//!
//! ```text
//! download-llvm
//!   -> build-stage1 ---------------------------+
//!        -> build-baseline -> perf-baseline -> perf2bolt-baseline -> bolt-baseline
//!        -> build-instrumented -> collect-pgo -> merge-pgo
//!             -> build-pgo-lto -> perf-pgo-lto -> perf2bolt-pgo-lto -> bolt-pgo-lto
//! measure-<config> for every configuration
//! compare-<treatment>-vs-<baseline> for every pair -> report
//! ```

use crate::config::ReproConfig;
use crate::core::{ConfigName, StageKind};
use crate::errors::{PipelineValidationError, ReproError};
use crate::layout::Layout;
use crate::pipeline::{Orchestrator, PipelineBuilder, StageGraph, StageSpec};
use crate::process::{CommandTemplate, ProcessRunner, TemplateVars};
use crate::report::{CompareTask, SummaryTask};
use crate::trials::{SampleSource, TrialSpec};
use std::path::PathBuf;
use std::sync::Arc;

/// Stage fetching the LLVM monorepo.
pub const DOWNLOAD_STAGE: &str = "download-llvm";
/// Stage building the bootstrap compiler used for every other build.
pub const STAGE1_STAGE: &str = "build-stage1";
/// Stage writing the final report.
pub const REPORT_STAGE: &str = "report";

/// Baseline/treatment pairs, in report order.
pub const COMPARISONS: [(ConfigName, ConfigName); 4] = [
    (ConfigName::Baseline, ConfigName::PgoLto),
    (ConfigName::Baseline, ConfigName::Bolt),
    (ConfigName::Baseline, ConfigName::PgoLtoBolt),
    (ConfigName::PgoLto, ConfigName::PgoLtoBolt),
];

const SAMPLE_FILE: &str = "elapsed.txt";

/// What the toolchains compile while being trained and measured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// Ninja target whose build time is measured.
    pub measure_target: String,
    /// Ninja target built while collecting profiles.
    pub training_target: String,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            measure_target: "clang".to_string(),
            training_target: "clangSema".to_string(),
        }
    }
}

/// Builds the reproduction stage graph from a configuration.
#[derive(Debug, Clone)]
pub struct ClangRecipe {
    config: ReproConfig,
    layout: Layout,
    workload: Workload,
}

impl ClangRecipe {
    /// Creates the recipe with the default workload.
    #[must_use]
    pub fn new(config: ReproConfig) -> Self {
        let layout = Layout::new(config.work_dir.clone(), config.results_dir.clone());
        Self {
            config,
            layout,
            workload: Workload::default(),
        }
    }

    /// Replaces the workload.
    #[must_use]
    pub fn with_workload(mut self, workload: Workload) -> Self {
        self.workload = workload;
        self
    }

    /// Returns the layout the recipe writes into.
    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The stage producing the installed toolchain of `config`.
    #[must_use]
    pub fn install_stage(config: ConfigName) -> &'static str {
        match config {
            ConfigName::Baseline => "build-baseline",
            ConfigName::PgoLto => "build-pgo-lto",
            ConfigName::Bolt => "bolt-baseline",
            ConfigName::PgoLtoBolt => "bolt-pgo-lto",
        }
    }

    /// The measurement stage of `config`.
    #[must_use]
    pub fn measure_stage(config: ConfigName) -> String {
        format!("measure-{}", config.slug())
    }

    /// The comparison stage of a pair.
    #[must_use]
    pub fn compare_stage(baseline: ConfigName, treatment: ConfigName) -> String {
        format!("compare-{}-vs-{}", treatment.slug(), baseline.slug())
    }

    /// The `bin` directory of a configuration's installed toolchain.
    #[must_use]
    pub fn install_bin(&self, config: ConfigName) -> PathBuf {
        self.layout
            .stage_dir(Self::install_stage(config))
            .join("install")
            .join("bin")
    }

    /// Variables shared by every stage of the recipe.
    #[must_use]
    pub fn vars(&self) -> TemplateVars {
        let tools = &self.config.tools;
        TemplateVars::new()
            .with("git", &tools.git)
            .with("cmake", &tools.cmake)
            .with("ninja", &tools.ninja)
            .with("perf", &tools.perf)
            .with("perf2bolt", &tools.perf2bolt)
            .with("llvm_bolt", &tools.llvm_bolt)
            .with("llvm_src", self.llvm_src().display().to_string())
            .with("stage1_bin", self.stage1_bin().display().to_string())
            .with("measure_target", &self.workload.measure_target)
            .with("training_target", &self.workload.training_target)
    }

    /// Builds and validates the stage graph.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid.
    pub fn graph(&self) -> Result<StageGraph, PipelineValidationError> {
        let mut builder = PipelineBuilder::new("clang-build-time")
            .stage(self.download())
            .stage(self.stage1())
            .stage(self.build_baseline())
            .stage(self.build_instrumented())
            .stage(self.collect_pgo())
            .stage(self.merge_pgo())
            .stage(self.build_pgo_lto());

        for source in [ConfigName::Baseline, ConfigName::PgoLto] {
            builder = builder
                .stage(self.perf_record(source))
                .stage(self.perf2bolt(source))
                .stage(self.bolt(source));
        }

        for config in ConfigName::ALL {
            builder = builder.stage(self.measure(config));
        }

        for (baseline, treatment) in COMPARISONS {
            builder = builder.stage(
                StageSpec::task(
                    Self::compare_stage(baseline, treatment),
                    StageKind::Report,
                    Arc::new(CompareTask::new(baseline, treatment)),
                )
                .with_dependencies([Self::measure_stage(baseline), Self::measure_stage(treatment)])
                .with_output(self.layout.comparison_file(baseline, treatment)),
            );
        }

        let report = StageSpec::task(
            REPORT_STAGE,
            StageKind::Report,
            Arc::new(SummaryTask::new(COMPARISONS.to_vec())),
        )
        .with_dependencies(COMPARISONS.iter().map(|&(b, t)| Self::compare_stage(b, t)))
        .with_output(self.layout.final_report());

        builder.stage(report).build()
    }

    /// Builds the graph and an orchestrator carrying the recipe variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid.
    pub fn orchestrator(&self, runner: Arc<dyn ProcessRunner>) -> Result<Orchestrator, ReproError> {
        let graph = self.graph()?;
        let orchestrator = Orchestrator::new(graph, self.config.clone(), runner);
        Ok(self
            .vars()
            .iter()
            .fold(orchestrator, |o, (name, value)| o.with_var(name, value)))
    }

    fn llvm_src(&self) -> PathBuf {
        self.layout.stage_dir(DOWNLOAD_STAGE).join("llvm-project")
    }

    fn stage1_bin(&self) -> PathBuf {
        self.layout.stage_dir(STAGE1_STAGE).join("install").join("bin")
    }

    fn download(&self) -> StageSpec {
        StageSpec::command(
            DOWNLOAD_STAGE,
            StageKind::Download,
            CommandTemplate::shell(
                "rm -rf {stage_dir}/llvm-project && \
                 {git} clone --depth 1 --branch {llvm_ref} {llvm_repo} {stage_dir}/llvm-project",
            ),
        )
        .with_var("llvm_repo", &self.config.llvm_repo)
        .with_var("llvm_ref", &self.config.llvm_ref)
        .with_output(self.llvm_src())
    }

    fn stage1(&self) -> StageSpec {
        let script = format!(
            "{configure} \
             -DLLVM_ENABLE_PROJECTS='clang;lld' \
             -DLLVM_ENABLE_RUNTIMES=compiler-rt \
             -DCMAKE_INSTALL_PREFIX={{stage_dir}}/install && \
             {{ninja}} -C {{stage_dir}}/build -j{{jobs}} install",
            configure = CONFIGURE,
        );
        StageSpec::command(STAGE1_STAGE, StageKind::Build, CommandTemplate::shell(script))
            .with_dependency(DOWNLOAD_STAGE)
            .with_output(self.stage1_bin().join("clang"))
    }

    fn build_baseline(&self) -> StageSpec {
        let script = format!(
            "{configure} {with_stage1} \
             -DLLVM_ENABLE_PROJECTS=clang \
             -DCMAKE_EXE_LINKER_FLAGS=-Wl,--emit-relocs \
             -DCMAKE_INSTALL_PREFIX={{stage_dir}}/install && \
             {{ninja}} -C {{stage_dir}}/build -j{{jobs}} install-clang install-clang-resource-headers",
            configure = CONFIGURE,
            with_stage1 = WITH_STAGE1,
        );
        StageSpec::command(
            Self::install_stage(ConfigName::Baseline),
            StageKind::Build,
            CommandTemplate::shell(script),
        )
        .with_dependencies([DOWNLOAD_STAGE, STAGE1_STAGE])
        .with_output(self.install_bin(ConfigName::Baseline).join("clang"))
    }

    fn build_instrumented(&self) -> StageSpec {
        let script = format!(
            "{configure} {with_stage1} \
             -DLLVM_ENABLE_PROJECTS=clang \
             -DLLVM_BUILD_INSTRUMENTED=IR \
             -DLLVM_BUILD_RUNTIME=No && \
             {{ninja}} -C {{stage_dir}}/build -j{{jobs}} clang",
            configure = CONFIGURE,
            with_stage1 = WITH_STAGE1,
        );
        StageSpec::command("build-instrumented", StageKind::Build, CommandTemplate::shell(script))
            .with_dependencies([DOWNLOAD_STAGE, STAGE1_STAGE])
            .with_output(
                self.layout
                    .stage_dir("build-instrumented")
                    .join("build")
                    .join("bin")
                    .join("clang"),
            )
    }

    fn collect_pgo(&self) -> StageSpec {
        let instrumented = self.layout.stage_dir("build-instrumented").join("build").join("bin");
        let script = format!(
            "rm -rf {{stage_dir}}/profiles {{stage_dir}}/train && \
             {{cmake}} -G Ninja -S {{llvm_src}}/llvm -B {{stage_dir}}/train \
             -DCMAKE_BUILD_TYPE=Release -DLLVM_TARGETS_TO_BUILD=X86 \
             -DLLVM_ENABLE_PROJECTS=clang \
             -DCMAKE_C_COMPILER={bin}/clang -DCMAKE_CXX_COMPILER={bin}/clang++ && \
             LLVM_PROFILE_FILE={{stage_dir}}/profiles/%p.profraw \
             {{ninja}} -C {{stage_dir}}/train -j{{jobs}} {{training_target}}",
            bin = instrumented.display(),
        );
        StageSpec::command("collect-pgo", StageKind::Profile, CommandTemplate::shell(script))
            .with_dependencies([DOWNLOAD_STAGE, "build-instrumented"])
            .with_output(self.layout.stage_dir("collect-pgo").join("profiles"))
    }

    fn merge_pgo(&self) -> StageSpec {
        StageSpec::command(
            "merge-pgo",
            StageKind::Aggregate,
            CommandTemplate::shell(
                "{stage1_bin}/llvm-profdata merge -output={stage_dir}/clang.profdata \
                 {work_dir}/collect-pgo/profiles/*.profraw",
            ),
        )
        .with_dependencies([STAGE1_STAGE, "collect-pgo"])
        .with_output(self.profdata())
    }

    fn build_pgo_lto(&self) -> StageSpec {
        let script = format!(
            "{configure} {with_stage1} \
             -DLLVM_ENABLE_PROJECTS=clang \
             -DLLVM_ENABLE_LTO=Thin \
             -DLLVM_PROFDATA_FILE={profdata} \
             -DCMAKE_EXE_LINKER_FLAGS=-Wl,--emit-relocs \
             -DCMAKE_INSTALL_PREFIX={{stage_dir}}/install && \
             {{ninja}} -C {{stage_dir}}/build -j{{jobs}} install-clang install-clang-resource-headers",
            configure = CONFIGURE,
            with_stage1 = WITH_STAGE1,
            profdata = self.profdata().display(),
        );
        StageSpec::command(
            Self::install_stage(ConfigName::PgoLto),
            StageKind::Build,
            CommandTemplate::shell(script),
        )
        .with_dependencies([DOWNLOAD_STAGE, STAGE1_STAGE, "merge-pgo"])
        .with_output(self.install_bin(ConfigName::PgoLto).join("clang"))
    }

    /// Samples the `source` toolchain while it builds the training target.
    fn perf_record(&self, source: ConfigName) -> StageSpec {
        let script = format!(
            "rm -rf {{stage_dir}}/train && \
             {{cmake}} -G Ninja -S {{llvm_src}}/llvm -B {{stage_dir}}/train \
             -DCMAKE_BUILD_TYPE=Release -DLLVM_TARGETS_TO_BUILD=X86 \
             -DLLVM_ENABLE_PROJECTS=clang \
             -DCMAKE_C_COMPILER={bin}/clang -DCMAKE_CXX_COMPILER={bin}/clang++ && \
             {{perf}} record -e cycles:u -j any,u -o {{stage_dir}}/perf.data -- \
             {{ninja}} -C {{stage_dir}}/train -j{{jobs}} {{training_target}}",
            bin = self.install_bin(source).display(),
        );
        let id = format!("perf-{}", source.slug());
        StageSpec::command(&id, StageKind::Profile, CommandTemplate::shell(script))
            .with_dependencies([DOWNLOAD_STAGE, Self::install_stage(source)])
            .with_output(self.layout.stage_dir(&id).join("perf.data"))
    }

    /// Converts the raw sample trace into an edge-count profile.
    fn perf2bolt(&self, source: ConfigName) -> StageSpec {
        let perf = format!("perf-{}", source.slug());
        let id = format!("perf2bolt-{}", source.slug());
        let script = format!(
            "{{perf2bolt}} -p {trace} -o {{stage_dir}}/clang.fdata {bin}/clang",
            trace = self.layout.stage_dir(&perf).join("perf.data").display(),
            bin = self.install_bin(source).display(),
        );
        StageSpec::command(&id, StageKind::Aggregate, CommandTemplate::shell(script))
            .with_dependencies([perf, Self::install_stage(source).to_string()])
            .with_output(self.layout.stage_dir(&id).join("clang.fdata"))
    }

    /// Rewrites a copy of the `source` toolchain with the post-link optimizer.
    fn bolt(&self, source: ConfigName) -> StageSpec {
        let target = match source {
            ConfigName::PgoLto => ConfigName::PgoLtoBolt,
            _ => ConfigName::Bolt,
        };
        let fdata_stage = format!("perf2bolt-{}", source.slug());
        let source_install = self.layout.stage_dir(Self::install_stage(source)).join("install");
        let script = format!(
            "rm -rf {{stage_dir}}/install && cp -a {src} {{stage_dir}}/install && \
             rm {{stage_dir}}/install/bin/clang && \
             {{llvm_bolt}} {src}/bin/clang -o {{stage_dir}}/install/bin/clang \
             -data={fdata} -reorder-blocks=ext-tsp -reorder-functions=hfsort+ \
             -split-functions -split-all-cold -split-eh -dyno-stats -icf=1 -use-gnu-stack",
            src = source_install.display(),
            fdata = self.layout.stage_dir(&fdata_stage).join("clang.fdata").display(),
        );
        StageSpec::command(
            Self::install_stage(target),
            StageKind::Optimize,
            CommandTemplate::shell(script),
        )
        .with_dependencies([Self::install_stage(source).to_string(), fdata_stage])
        .with_output(self.install_bin(target).join("clang"))
    }

    /// Times a from-scratch build of the measured target with `config`.
    fn measure(&self, config: ConfigName) -> StageSpec {
        let script = format!(
            "{{cmake}} -G Ninja -S {{llvm_src}}/llvm -B {{trial_dir}}/build \
             -DCMAKE_BUILD_TYPE=Release -DLLVM_TARGETS_TO_BUILD=X86 \
             -DLLVM_ENABLE_PROJECTS=clang \
             -DCMAKE_C_COMPILER={{compiler_bin}}/clang \
             -DCMAKE_CXX_COMPILER={{compiler_bin}}/clang++ && \
             /usr/bin/time -f %e -o {{trial_dir}}/{SAMPLE_FILE} \
             {{ninja}} -C {{trial_dir}}/build -j{{jobs}} {{measure_target}}"
        );
        let trial = TrialSpec::new(
            config,
            CommandTemplate::shell(script),
            SampleSource::File(PathBuf::from(SAMPLE_FILE)),
        );
        StageSpec::trials(Self::measure_stage(config), trial, self.layout.samples_file(config))
            .with_dependencies([DOWNLOAD_STAGE, Self::install_stage(config)])
            .with_var("compiler_bin", self.install_bin(config).display().to_string())
    }

    fn profdata(&self) -> PathBuf {
        self.layout.stage_dir("merge-pgo").join("clang.profdata")
    }
}

/// CMake configure prefix shared by the toolchain builds.
const CONFIGURE: &str = "{cmake} -G Ninja -S {llvm_src}/llvm -B {stage_dir}/build \
     -DCMAKE_BUILD_TYPE=Release -DLLVM_TARGETS_TO_BUILD=X86";

/// Compiles with the bootstrap compiler and links with its lld.
const WITH_STAGE1: &str = "-DCMAKE_C_COMPILER={stage1_bin}/clang \
     -DCMAKE_CXX_COMPILER={stage1_bin}/clang++ \
     -DCMAKE_AR={stage1_bin}/llvm-ar \
     -DCMAKE_RANLIB={stage1_bin}/llvm-ranlib \
     -DLLVM_USE_LINKER=lld";
