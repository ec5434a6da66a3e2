//! A miniature reproduction run end to end against real subprocesses.

use pretty_assertions::assert_eq;
use reprobench::prelude::*;
use reprobench::report::{CompareTask, SummaryTask};
use reprobench::testing::{assert_executed, assert_skipped, touch_stage, RecordingRunner, TestWorkspace};

const MEASURES: [&str; 2] = ["measure-baseline", "measure-bolt"];
const TAIL: [&str; 4] = ["measure-baseline", "measure-bolt", "compare", "report"];

/// download -> build -> two measurements -> one comparison -> report.
fn mini_graph(workspace: &TestWorkspace) -> StageGraph {
    let layout = workspace.layout();
    let measure = |id: &str, config: ConfigName, prefix: &str| {
        let trial = TrialSpec::new(
            config,
            CommandTemplate::shell(format!("echo {prefix}{{trial}} > {{trial_dir}}/elapsed.txt")),
            SampleSource::File("elapsed.txt".into()),
        );
        StageSpec::trials(id, trial, layout.samples_file(config)).with_dependency("build")
    };
    let pair = (ConfigName::Baseline, ConfigName::Bolt);

    PipelineBuilder::new("mini")
        .stage(touch_stage(workspace, "download", StageKind::Download, "src"))
        .stage(touch_stage(workspace, "build", StageKind::Build, "bin").with_dependency("download"))
        .stage(measure("measure-baseline", ConfigName::Baseline, "1"))
        .stage(measure("measure-bolt", ConfigName::Bolt, "2"))
        .stage(
            StageSpec::task("compare", StageKind::Report, Arc::new(CompareTask::new(pair.0, pair.1)))
                .with_dependencies(MEASURES)
                .with_output(layout.comparison_file(pair.0, pair.1)),
        )
        .stage(
            StageSpec::task("report", StageKind::Report, Arc::new(SummaryTask::new(vec![pair])))
                .with_dependency("compare")
                .with_output(layout.final_report()),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_three_stage_scenario() {
    let workspace = TestWorkspace::new();
    let runner = Arc::new(RecordingRunner::new());
    let trial = TrialSpec::new(
        ConfigName::Baseline,
        CommandTemplate::shell("sleep 0"),
        SampleSource::WallClock,
    );
    let graph = PipelineBuilder::new("three")
        .stage(touch_stage(&workspace, "download", StageKind::Download, "src"))
        .stage(touch_stage(&workspace, "build", StageKind::Build, "bin").with_dependency("download"))
        .stage(
            StageSpec::trials("measure", trial, workspace.layout().samples_file(ConfigName::Baseline))
                .with_dependency("build"),
        )
        .build()
        .unwrap();
    let (orchestrator, _) = workspace.orchestrator(graph, runner.clone());
    let cancel = CancellationToken::new();

    let first = orchestrator.run(&[], &cancel).await.unwrap();
    assert_executed(&first, &["download", "build", "measure"]);
    assert_eq!(runner.count_for("measure"), 3);

    runner.reset();
    let second = orchestrator.run(&[], &cancel).await.unwrap();
    assert_skipped(&second, &["download", "build", "measure"]);
    assert!(runner.invocations().is_empty());

    std::fs::remove_file(workspace.stage_dir("build").join("bin")).unwrap();
    runner.reset();
    let third = orchestrator.run(&[], &cancel).await.unwrap();
    assert_skipped(&third, &["download"]);
    assert_executed(&third, &["build", "measure"]);
    assert_eq!(runner.stems(), vec!["build", "measure.trial-0", "measure.trial-1", "measure.trial-2"]);
}

#[tokio::test]
async fn test_full_run_then_no_op_then_partial_rebuild() {
    let workspace = TestWorkspace::new();
    let runner = Arc::new(RecordingRunner::new());
    let (orchestrator, _) = workspace.orchestrator(mini_graph(&workspace), runner.clone());
    let cancel = CancellationToken::new();

    let first = orchestrator.run(&[], &cancel).await.unwrap();
    assert_executed(&first, &["download", "build", "measure-baseline", "measure-bolt", "compare", "report"]);
    assert_eq!(runner.count_for("measure-baseline"), 3);

    // Baseline 10, 11, 12 against BOLT 20, 21, 22.
    let report = std::fs::read_to_string(workspace.layout().final_report()).unwrap();
    assert_eq!(
        report.trim_end(),
        "BOLT is 47.62% slower than baseline, average of 3 experiments"
    );

    runner.reset();
    let second = orchestrator.run(&[], &cancel).await.unwrap();
    assert!(second.executed().is_empty());
    assert!(runner.invocations().is_empty());

    std::fs::remove_file(workspace.stage_dir("build").join("bin")).unwrap();
    runner.reset();
    let third = orchestrator.run(&[], &cancel).await.unwrap();
    assert_skipped(&third, &["download"]);
    assert_executed(&third, &["build", "measure-baseline", "measure-bolt", "compare", "report"]);
    assert_eq!(runner.count_for("download"), 0);
}

#[tokio::test]
async fn test_clean_results_remeasures_without_rebuilding() {
    let workspace = TestWorkspace::new();
    let runner = Arc::new(RecordingRunner::new());
    let (orchestrator, _) = workspace.orchestrator(mini_graph(&workspace), runner.clone());
    let cancel = CancellationToken::new();
    orchestrator.run(&[], &cancel).await.unwrap();

    orchestrator.store().clean_results().unwrap();
    assert!(!workspace.layout().final_report().exists());

    runner.reset();
    let run = orchestrator.run(&[], &cancel).await.unwrap();
    assert_skipped(&run, &["download", "build"]);
    assert_executed(&run, &TAIL);
    assert!(workspace.layout().final_report().exists());
}

#[tokio::test]
async fn test_failed_measurement_resumes_without_rebuilding() {
    let workspace = TestWorkspace::new();
    let runner = Arc::new(RecordingRunner::new());
    let (orchestrator, _) = workspace.orchestrator(mini_graph(&workspace), runner.clone());
    let cancel = CancellationToken::new();

    runner.fail("measure-bolt.trial-2", 1);
    let err = orchestrator.run(&[], &cancel).await.unwrap_err();
    assert_eq!(err.stage(), Some("measure-bolt"));
    assert_eq!(
        err.log_path(),
        Some(&workspace.layout().trial_log("measure-bolt", 2))
    );
    assert!(!workspace.layout().samples_file(ConfigName::Bolt).exists());

    runner.clear_failures();
    runner.reset();
    let resumed = orchestrator.run(&[], &cancel).await.unwrap();
    assert_skipped(&resumed, &["download", "build", "measure-baseline"]);
    assert_executed(&resumed, &["measure-bolt", "compare", "report"]);
}

#[tokio::test]
async fn test_plan_lists_stale_stages_in_execution_order() {
    let workspace = TestWorkspace::new();
    let runner = Arc::new(RecordingRunner::new());
    let (orchestrator, _) = workspace.orchestrator(mini_graph(&workspace), runner.clone());

    let plan = orchestrator.plan(&["measure-bolt"]).unwrap();
    let ids: Vec<&str> = plan.iter().map(|p| p.id.as_str()).collect();

    assert_eq!(ids, vec!["download", "build", "measure-bolt"]);
    assert!(plan.iter().all(|p| !p.fresh));
    assert!(runner.invocations().is_empty());
}
