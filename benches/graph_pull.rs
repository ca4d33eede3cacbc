//! Benchmarks for frame pulls and job ticks
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use frameflow_rs::config::SchedulerSettings;
use frameflow_rs::pipeline::{ConfigValue, Graph, NodeId, NodeRef};

fn graph(batch_size: usize, worker_count: usize) -> Graph {
    Graph::new(SchedulerSettings {
        batch_size,
        worker_count,
    })
}

/// `SyntheticStack` followed by `filters` frame filters, returning the last id.
fn filter_chain(graph: &mut Graph, filters: usize, size: i64) -> NodeId {
    let source = graph.create_node("SyntheticStack").unwrap();
    graph.configure(source, "width", &ConfigValue::Int(size)).unwrap();
    graph.configure(source, "height", &ConfigValue::Int(size)).unwrap();
    graph.configure(source, "frame_count", &ConfigValue::Int(256)).unwrap();

    let mut last = source;
    for _ in 0..filters {
        let filter = graph.create_node("FrameFilter").unwrap();
        graph.configure(filter, "gain", &ConfigValue::Float(1.1)).unwrap();
        let out = graph.port_by_name(last, "out").unwrap();
        let input = graph.port_by_name(filter, "in").unwrap();
        graph.connect(out, input).unwrap();
        last = filter;
    }
    last
}

fn bench_pull_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("pull_chain");
    group.throughput(Throughput::Elements(1));

    for depth in [1, 4, 16].iter() {
        let mut g = graph(4, 4);
        let tail = filter_chain(&mut g, *depth, 64);
        let mut index = 0usize;
        group.bench_with_input(BenchmarkId::new("uncached_index", depth), depth, |b, _| {
            b.iter(|| {
                index = (index + 1) % 256;
                black_box(g.produce_frame(NodeRef::Node(tail), index))
            });
        });

        group.bench_with_input(BenchmarkId::new("memo_hit", depth), depth, |b, _| {
            b.iter(|| black_box(g.produce_frame(NodeRef::Node(tail), 7)));
        });
    }

    group.finish();
}

fn bench_temporal_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("temporal_filter");

    for radius in [0i64, 2, 8].iter() {
        let mut g = graph(4, 4);
        let tail = filter_chain(&mut g, 1, 64);
        g.configure(tail, "temporal_radius", &ConfigValue::Int(*radius))
            .unwrap();
        let mut index = 0usize;
        group.bench_with_input(BenchmarkId::new("radius", radius), radius, |b, _| {
            b.iter(|| {
                index = (index + 1) % 256;
                black_box(g.produce_frame(NodeRef::Node(tail), index))
            });
        });
    }

    group.finish();
}

fn bench_job_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("job_ticks");
    group.sample_size(20);
    group.throughput(Throughput::Elements(256));

    for workers in [1usize, 4, 8].iter() {
        group.bench_with_input(
            BenchmarkId::new("particle_fit", workers),
            workers,
            |b, &workers| {
                let mut g = graph(workers * 4, workers);
                let source = filter_chain(&mut g, 0, 48);
                let fit = g.create_node("ParticleFit").unwrap();
                let out = g.port_by_name(source, "out").unwrap();
                let input = g.port_by_name(fit, "in").unwrap();
                g.connect(out, input).unwrap();

                b.iter(|| {
                    g.start_job(fit).unwrap();
                    while g.has_running_jobs() {
                        g.tick_all();
                    }
                    black_box(g.job_progress(fit))
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_pull_chain, bench_temporal_filter, bench_job_ticks);
criterion_main!(benches);
