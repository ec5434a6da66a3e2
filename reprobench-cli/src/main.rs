//! `reprobench` command-line interface.
//!
//! ```text
//! reprobench run-all --jobs 16 --trials 5
//! reprobench plan build-all
//! reprobench clean
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use reprobench::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Reprobench CLI arguments
#[derive(Parser, Debug)]
#[command(name = "reprobench")]
#[command(author, version, about = "Reproduce compiler build-time comparisons")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./reprobench.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Parallel build jobs
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    /// Measurement trials per configuration
    #[arg(long, global = true)]
    trials: Option<usize>,

    /// Trials run concurrently
    #[arg(long, global = true)]
    trial_parallelism: Option<usize>,

    /// Root for sources, builds, logs and stamps
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,

    /// Root for samples, comparisons and the final report
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// LLVM repository URL
    #[arg(long, global = true)]
    llvm_repo: Option<String>,

    /// LLVM git ref to check out
    #[arg(long, global = true)]
    llvm_ref: Option<String>,

    /// Mirror tool output to the console
    #[arg(long, global = true)]
    tee: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the whole pipeline
    RunAll,
    /// Fetch sources only
    DownloadSources,
    /// Build every toolchain configuration
    BuildAll,
    /// Measure, compare and write the final report
    Results,
    /// Print the execution plan without running anything
    Plan {
        /// Goal to plan for
        #[arg(value_enum, default_value_t = Goal::RunAll)]
        goal: Goal,
    },
    /// Remove results and trial leftovers, keeping builds
    Clean,
    /// Remove everything, downloaded sources included
    #[command(alias = "distclean")]
    CleanAll,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Goal {
    RunAll,
    DownloadSources,
    BuildAll,
    Results,
}

impl From<Goal> for Target {
    fn from(goal: Goal) -> Self {
        match goal {
            Goal::RunAll => Self::RunAll,
            Goal::DownloadSources => Self::DownloadSources,
            Goal::BuildAll => Self::BuildAll,
            Goal::Results => Self::Results,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(repro) = err.downcast_ref::<ReproError>() {
                if let Some(stage) = repro.stage() {
                    eprintln!("  stage: {stage}");
                }
                if let Some(log) = repro.log_path() {
                    eprintln!("  log:   {}", log.display());
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "reprobench=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .init();
}

/// File, then `REPRO_*` environment, then flags.
fn resolve_config(cli: &Cli) -> anyhow::Result<ReproConfig> {
    let mut config = ReproConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs;
    }
    if let Some(trials) = cli.trials {
        config.trials = trials;
    }
    if let Some(parallelism) = cli.trial_parallelism {
        config.trial_parallelism = parallelism;
    }
    if let Some(ref dir) = cli.work_dir {
        config.work_dir.clone_from(dir);
    }
    if let Some(ref dir) = cli.results_dir {
        config.results_dir.clone_from(dir);
    }
    if let Some(ref repo) = cli.llvm_repo {
        config.llvm_repo.clone_from(repo);
    }
    if let Some(ref git_ref) = cli.llvm_ref {
        config.llvm_ref.clone_from(git_ref);
    }
    if cli.tee {
        config.tee_output = true;
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli)?;
    let recipe = ClangRecipe::new(config);

    let goal = match cli.command {
        Commands::RunAll => Target::RunAll,
        Commands::DownloadSources => Target::DownloadSources,
        Commands::BuildAll => Target::BuildAll,
        Commands::Results => Target::Results,
        Commands::Plan { goal } => return print_plan(&recipe, goal.into()),
        Commands::Clean => {
            ArtifactStore::new(recipe.layout().clone()).clean_results()?;
            info!(results = %recipe.layout().results_dir().display(), "Removed results");
            return Ok(());
        }
        Commands::CleanAll => {
            ArtifactStore::new(recipe.layout().clone()).clean_all()?;
            info!(work = %recipe.layout().work_dir().display(), "Removed all artifacts");
            return Ok(());
        }
    };

    let orchestrator = recipe.orchestrator(Arc::new(SystemProcessRunner::new()))?;
    let targets = goal.stages(orchestrator.graph());
    let targets: Vec<&str> = targets.iter().map(String::as_str).collect();

    let cancel = Arc::new(CancellationToken::new());
    let watcher = {
        let cancel = Arc::clone(&cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping the running stage");
                cancel.cancel("interrupted");
            }
        })
    };

    let result = orchestrator.run(&targets, &cancel).await;
    watcher.abort();
    let run = result?;

    info!(
        goal = %goal,
        executed = run.executed().len(),
        skipped = run.skipped().len(),
        duration_ms = run.duration_ms,
        "Done"
    );

    if matches!(goal, Target::RunAll | Target::Results) {
        let report = orchestrator.layout().final_report();
        let text = tokio::fs::read_to_string(&report)
            .await
            .with_context(|| format!("reading {}", report.display()))?;
        print!("{text}");
    }
    Ok(())
}

fn print_plan(recipe: &ClangRecipe, goal: Target) -> anyhow::Result<()> {
    let orchestrator = recipe.orchestrator(Arc::new(SystemProcessRunner::new()))?;
    let targets = goal.stages(orchestrator.graph());
    let targets: Vec<&str> = targets.iter().map(String::as_str).collect();

    for stage in orchestrator.plan(&targets)? {
        let state = if stage.fresh { "fresh" } else { "stale" };
        println!("{state:<6} {:<20} {}", stage.kind.to_string(), stage.id);
    }
    Ok(())
}
