use criterion::measurement::WallTime;
use criterion::{BenchmarkGroup, Criterion, criterion_group, criterion_main};
use serde_json::json;

use actuator::actuator::dialect::pbs::PbsDialect;
use actuator::actuator::dialect::slurm::SlurmDialect;
use actuator::actuator::dialect::{Dialect, ResourceRequirement};

fn requirements() -> Vec<ResourceRequirement> {
    vec![
        ResourceRequirement::new("nodes", true, 1),
        ResourceRequirement::new("mem", true, json!("8000000")),
        ResourceRequirement::new("time", false, 3600),
        ResourceRequirement::new("constraint", false, "haswell"),
    ]
}

fn bench_render_arguments(c: &mut BenchmarkGroup<WallTime>, dialect: &dyn Dialect) {
    let requirements = requirements();
    for batch_size in [1, 64] {
        c.bench_function(format!("{} batch {batch_size}", dialect.kind()), |bencher| {
            bencher.iter(|| dialect.render_arguments(batch_size, &requirements));
        });
    }
}

pub fn benchmark_dialects(c: &mut Criterion) {
    let mut group = c.benchmark_group("render arguments");
    bench_render_arguments(&mut group, &SlurmDialect::new());
    bench_render_arguments(&mut group, &PbsDialect::new());
}

criterion_group!(dialects, benchmark_dialects);

criterion_main!(dialects);
