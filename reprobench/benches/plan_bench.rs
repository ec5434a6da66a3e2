//! Benchmarks for pipeline planning.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reprobench::config::ReproConfig;
use reprobench::core::StageKind;
use reprobench::pipeline::{PipelineBuilder, StageGraph, StageSpec};
use reprobench::process::CommandTemplate;
use reprobench::recipe::{ClangRecipe, REPORT_STAGE};

/// A layered graph where every stage depends on two stages of the previous layer.
fn layered_graph(layers: usize, width: usize) -> StageGraph {
    let mut builder = PipelineBuilder::new("layered");
    for layer in 0..layers {
        for i in 0..width {
            let mut spec = StageSpec::command(
                format!("s{layer}-{i}"),
                StageKind::Build,
                CommandTemplate::new("true"),
            );
            if layer > 0 {
                spec = spec
                    .with_dependency(format!("s{}-{}", layer - 1, i))
                    .with_dependency(format!("s{}-{}", layer - 1, (i + 1) % width));
            }
            builder = builder.stage(spec);
        }
    }
    builder.build().expect("layered graph is acyclic")
}

fn topological_order_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("topological_order");
    for (layers, width) in [(10, 10), (50, 20), (100, 50)] {
        let graph = layered_graph(layers, width);
        group.bench_with_input(
            BenchmarkId::from_parameter(layers * width),
            &graph,
            |b, graph| b.iter(|| black_box(graph.topological_order())),
        );
    }
    group.finish();
}

fn recipe_plan_benchmark(c: &mut Criterion) {
    let recipe = ClangRecipe::new(ReproConfig::default().with_roots("/w", "/r"));
    c.bench_function("recipe_build_graph", |b| b.iter(|| black_box(recipe.graph())));

    let graph = recipe.graph().expect("recipe graph is valid");
    c.bench_function("recipe_plan_for_report", |b| {
        b.iter(|| black_box(graph.plan_for(&[REPORT_STAGE])))
    });
}

criterion_group!(benches, topological_order_benchmark, recipe_plan_benchmark);
criterion_main!(benches);
