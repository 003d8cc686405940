use criterion::*;
use std::hint::black_box;

use lattice_ecs::{EcsResult, World};

#[derive(Clone, Copy)]
struct Wealth {
    value: f64,
}

#[derive(Clone, Copy)]
struct Productivity {
    rate: f32,
}

const AGENTS: usize = 100_000;

fn make_world() -> EcsResult<World> {
    let world = World::new();
    for _ in 0..AGENTS {
        let entity = world.spawn()?;
        world.add(entity, Wealth { value: 100.0 })?;
        world.add(entity, Productivity { rate: 1.0 })?;
    }
    Ok(world)
}

fn iterate_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");

    group.bench_function("for_each_write_wealth_100k", |b| {
        b.iter_batched(
            || make_world().unwrap(),
            |world| {
                let stream = world.query().write::<Wealth>().compile().unwrap();
                stream
                    .for_each_mut(|wealth: &mut Wealth| {
                        wealth.value *= 1.0001;
                    })
                    .unwrap();
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("job_write_wealth_100k", |b| {
        b.iter_batched(
            || make_world().unwrap(),
            |world| {
                let stream = world.query().write::<Wealth>().compile().unwrap();
                stream
                    .job_mut(|wealth: &mut Wealth| {
                        wealth.value *= 1.0001;
                    })
                    .unwrap();
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("raw_read_sum_100k", |b| {
        b.iter_batched(
            || make_world().unwrap(),
            |world| {
                let stream = world.query().read::<Wealth>().compile().unwrap();
                let mut total = 0.0;
                stream.raw(|wealth: &[Wealth]| {
                    for w in wealth {
                        total += w.value;
                    }
                })
                .unwrap();
                black_box(total);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, iterate_benchmark);
criterion_main!(benches);
