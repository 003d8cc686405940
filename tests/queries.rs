// Query compilation, match caching, and the runner families.
//
//   cargo test --test queries

use lattice_ecs::{EcsError, EcsResult, World};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Velocity {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Wealth(f64);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Tag(u8);

fn populate(world: &World, count: usize) -> EcsResult<()> {
    for i in 0..count {
        let entity = world.spawn()?;
        world.add(entity, Wealth(100.0 + i as f64))?;
        if i % 2 == 0 {
            world.add(entity, Tag(0))?;
        }
    }
    Ok(())
}

#[test]
fn gravity_uniform() -> EcsResult<()> {
    let world = World::new();

    let body = world.spawn()?;
    world.add(body, Velocity { x: 0.0, y: 0.0, z: 0.0 })?;

    let stream = world.query().write::<Velocity>().compile()?;
    let gravity = Velocity { x: 0.0, y: -9.81, z: 0.0 };
    stream.for_each_mut_with(&gravity, |velocity: &mut Velocity, g| {
        velocity.x += g.x;
        velocity.y += g.y;
        velocity.z += g.z;
    })?;

    assert_eq!(world.get::<Velocity>(body)?, Velocity { x: 0.0, y: -9.81, z: 0.0 });
    Ok(())
}

#[test]
fn compiled_query_is_stable_and_admits_new_archetypes() -> EcsResult<()> {
    let world = World::new();
    populate(&world, 10)?;

    let stream = world.query().read::<Wealth>().compile()?;
    let first = stream.count()?;
    let second = stream.count()?;
    assert_eq!(first, 10);
    assert_eq!(first, second, "unchanged world must yield the same matched set");

    // A new archetype appearing after compilation is admitted lazily.
    let newcomer = world.spawn()?;
    world.add(newcomer, Wealth(1.0))?;
    world.add(newcomer, Velocity { x: 0.0, y: 0.0, z: 0.0 })?;
    assert_eq!(stream.count()?, 11);
    Ok(())
}

#[test]
fn filters_constrain_matching() -> EcsResult<()> {
    let world = World::new();
    populate(&world, 10)?;

    let tagged = world.query().read::<Wealth>().has::<Tag>().compile()?;
    assert_eq!(tagged.count()?, 5);

    let untagged = world.query().read::<Wealth>().without::<Tag>().compile()?;
    assert_eq!(untagged.count()?, 5);
    Ok(())
}

#[test]
fn aliased_write_select_is_rejected_at_compile() {
    let world = World::new();

    let result = world.query().write::<Wealth>().write::<Wealth>().compile();
    assert!(matches!(result, Err(EcsError::Aliasing(_))));

    let result = world.query().read::<Wealth>().write::<Wealth>().compile();
    assert!(matches!(result, Err(EcsError::Aliasing(_))));

    // Two reads of the same column are fine.
    assert!(world.query().read::<Wealth>().read::<Wealth>().compile().is_ok());
}

#[test]
fn adapter_must_match_declared_selects() -> EcsResult<()> {
    let world = World::new();
    populate(&world, 2)?;

    let stream = world.query().read::<Wealth>().compile()?;
    let result = stream.for_each_mut(|_wealth: &mut Wealth| {});
    assert!(matches!(result, Err(EcsError::SelectMismatch(_))));
    Ok(())
}

#[test]
fn for_each2_reads_and_writes_in_row_lockstep() -> EcsResult<()> {
    let world = World::new();
    for i in 0..64 {
        let entity = world.spawn()?;
        world.add(entity, Position { x: i as f32, y: 0.0, z: 0.0 })?;
        world.add(entity, Velocity { x: 1.0, y: 2.0, z: 3.0 })?;
    }

    let stream = world.query().read::<Velocity>().write::<Position>().compile()?;
    let dt = 0.5f32;
    stream.for_each2_with(&dt, |velocity: &Velocity, position: &mut Position, dt| {
        position.x += velocity.x * dt;
        position.y += velocity.y * dt;
        position.z += velocity.z * dt;
    })?;

    let check = world.query().read::<Position>().compile()?;
    let mut visited = 0;
    check.for_each(|position: &Position| {
        assert_eq!(position.y, 1.0);
        assert_eq!(position.z, 1.5);
        visited += 1;
    })?;
    assert_eq!(visited, 64);
    Ok(())
}

#[test]
fn job_runner_applies_to_every_row() -> EcsResult<()> {
    let world = World::new();
    populate(&world, 5_000)?;

    let stream = world.query().write::<Wealth>().compile()?;
    let rate = 1.5f64;
    stream.job_mut_with(&rate, |wealth: &mut Wealth, rate| {
        wealth.0 *= rate;
    })?;

    let check = world.query().read::<Wealth>().compile()?;
    let mut minimum = f64::INFINITY;
    check.for_each(|wealth: &Wealth| minimum = minimum.min(wealth.0))?;
    assert!(minimum >= 150.0, "every row must have been scaled, found {minimum}");
    Ok(())
}

#[test]
fn raw_delivers_one_slice_per_archetype() -> EcsResult<()> {
    let world = World::new();
    populate(&world, 10)?;

    // Two archetypes match: {Wealth} and {Wealth, Tag}.
    let stream = world.query().read::<Wealth>().compile()?;
    let mut slices = Vec::new();
    stream.raw(|wealth: &[Wealth]| slices.push(wealth.len()))?;
    slices.sort_unstable();
    assert_eq!(slices, vec![5, 5]);
    Ok(())
}

#[test]
fn blit_overwrites_selected_column() -> EcsResult<()> {
    let world = World::new();
    populate(&world, 12)?;

    let stream = world.query().write::<Wealth>().compile()?;
    stream.blit(Wealth(0.0))?;

    let check = world.query().read::<Wealth>().compile()?;
    check.for_each(|wealth: &Wealth| assert_eq!(*wealth, Wealth(0.0)))?;
    Ok(())
}

#[test]
fn for_each_visits_rows_in_ascending_order() -> EcsResult<()> {
    let world = World::new();
    for i in 0..32 {
        let entity = world.spawn()?;
        world.add(entity, Wealth(i as f64))?;
    }

    let stream = world.query().read::<Wealth>().compile()?;
    let mut seen = Vec::new();
    stream.for_each(|wealth: &Wealth| seen.push(wealth.0))?;
    let mut expected = seen.clone();
    expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(seen, expected, "single-archetype visitation must be row-ascending");
    Ok(())
}
