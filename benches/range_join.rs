use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use pop_partition::table::{Row, Table, Value};
use pop_partition::{join, Cardinality, IdAssignment, IdRemapper, JoinOptions, JoinSettings};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::hint::black_box;
use std::time::Duration;

const LOCATIONS: usize = 20_000;

fn visits(count: usize, seed: u64) -> Table {
    let mut rng = StdRng::seed_from_u64(seed);
    let rows: Vec<Row> = (0..count)
        .map(|i| {
            vec![
                Value::Int((i / 4) as i64),
                Value::Int(rng.random_range(0..LOCATIONS as i64)),
                Value::Int(rng.random_range(0..86_400)),
            ]
        })
        .collect();
    Table::from_rows(
        "visits",
        vec!["pid".to_string(), "lid".to_string(), "start_time".to_string()],
        rows,
    )
    .unwrap()
}

fn locations() -> Table {
    let rows: Vec<Row> = (0..LOCATIONS)
        .map(|l| vec![Value::Int(l as i64), Value::Int((l % 97) as i64)])
        .collect();
    Table::from_rows("locations", vec!["lid".to_string(), "capacity".to_string()], rows).unwrap()
}

fn bench_range_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("range_join");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    let locations = locations();
    for size in [10_000usize, 100_000].iter() {
        let visits = visits(*size, 42);
        group.throughput(Throughput::Elements(*size as u64));

        for partitions in [1usize, 8, 64] {
            group.bench_with_input(
                BenchmarkId::new(format!("left_many_to_one/{}_shards", partitions), size),
                &partitions,
                |b, &partitions| {
                    let opts = JoinOptions::left()
                        .with_validation(Cardinality::ManyToOne)
                        .with_partitions(partitions)
                        .with_workers(4);
                    b.iter_batched(
                        || (visits.clone(), locations.clone()),
                        |(visits, locations)| join(black_box(visits), black_box(locations), "lid", &opts).unwrap(),
                        BatchSize::LargeInput,
                    );
                },
            );
        }
    }

    group.finish();
}

fn bench_propagate(c: &mut Criterion) {
    let mut group = c.benchmark_group("propagate");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(20);

    let locations = locations();
    let visits = visits(100_000, 7);
    let mut order: Vec<usize> = (0..LOCATIONS).collect();
    order.shuffle(&mut StdRng::seed_from_u64(1));

    for (partitions, validate) in [(8usize, true), (32, true), (32, false)] {
        let remapper = IdRemapper::new(JoinSettings {
            num_partitions: partitions,
            num_workers: 4,
            validate,
        });
        let (_, update) = remapper
            .remap(&locations, "lid", &IdAssignment::Reorder(order.clone()))
            .unwrap();
        let label = if validate { "validated" } else { "unchecked" };
        group.bench_function(BenchmarkId::new(label, partitions), |b| {
            b.iter(|| remapper.propagate(black_box(&visits), "lid", &update).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_range_join, bench_propagate);
criterion_main!(benches);
