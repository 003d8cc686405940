// Structural deferral: the world lock counter and the command log.
//
//   cargo test --test deferral

use lattice_ecs::{EcsResult, Entity, World};

#[derive(Clone, Copy, Debug, PartialEq)]
struct CompA(u32);

#[derive(Clone, Copy, Debug, PartialEq)]
struct CompB(u32);

#[derive(Clone, Copy, Debug, PartialEq)]
struct CompC(u32);

#[derive(Clone, Copy, Debug, PartialEq)]
struct CompD(u32);

fn spawn_with_a(world: &World, count: usize) -> EcsResult<Vec<Entity>> {
    (0..count)
        .map(|i| -> EcsResult<Entity> {
            let entity = world.spawn()?;
            world.add(entity, CompA(i as u32))?;
            Ok(entity)
        })
        .collect()
}

#[test]
fn adds_inside_a_runner_apply_after_it_returns() -> EcsResult<()> {
    let world = World::new();
    let entities = spawn_with_a(&world, 6)?;

    let stream = world.query().read::<CompA>().compile()?;
    let mut counts_during = Vec::new();
    stream.for_each_entity(|entity, _a: &CompA| {
        world.add(entity, CompB(1)).unwrap();
        let b_query = world.query().read::<CompB>().compile().unwrap();
        counts_during.push(b_query.count().unwrap());
    })?;

    assert!(
        counts_during.iter().all(|&count| count == 0),
        "the archetype set must not change while the runner is active"
    );

    let after = world.query().read::<CompB>().compile()?;
    assert_eq!(after.count()?, entities.len());
    for entity in entities {
        assert!(world.has_component::<CompA>(entity)?);
        assert!(world.has_component::<CompB>(entity)?);
    }
    Ok(())
}

#[test]
fn despawn_collapses_later_deferred_operations() -> EcsResult<()> {
    let world = World::new();
    let entities = spawn_with_a(&world, 3)?;

    let stream = world.query().read::<CompA>().compile()?;
    stream.for_each_entity(|entity, _a: &CompA| {
        world.add(entity, CompC(1)).unwrap();
        world.despawn(entity).unwrap();
        // The despawn is itself deferred, so this add still enqueues; the
        // drain must drop it.
        world.add(entity, CompD(2)).unwrap();
    })?;

    for entity in entities {
        assert!(!world.is_alive(entity));
    }
    assert_eq!(world.query().read::<CompC>().compile()?.count()?, 0);
    assert_eq!(world.query().read::<CompD>().compile()?.count()?, 0);
    Ok(())
}

#[test]
fn reentrant_lock_drains_only_on_outermost_release() -> EcsResult<()> {
    let world = World::new();
    let entities = spawn_with_a(&world, 4)?;

    let outer = world.query().read::<CompA>().compile()?;
    let inner = world.query().read::<CompA>().compile()?;

    let mut counts_after_nested = Vec::new();
    outer.for_each_entity(|entity, _a: &CompA| {
        world.add(entity, CompB(7)).unwrap();

        // A nested runner on the same world; both hold the lock now.
        let mut nested_rows = 0;
        inner.for_each(|_a: &CompA| nested_rows += 1).unwrap();
        assert_eq!(nested_rows, 4);

        // The nested runner returning must not have drained.
        let b_query = world.query().read::<CompB>().compile().unwrap();
        counts_after_nested.push(b_query.count().unwrap());
    })?;

    assert!(counts_after_nested.iter().all(|&count| count == 0));
    assert_eq!(world.query().read::<CompB>().compile()?.count()?, entities.len());
    Ok(())
}

#[test]
fn deferred_spawns_are_provisional_then_materialized() -> EcsResult<()> {
    let world = World::new();
    spawn_with_a(&world, 1)?;

    let stream = world.query().read::<CompA>().compile()?;
    let mut spawned = Vec::new();
    stream.for_each(|_a: &CompA| {
        let newcomer = world.spawn().unwrap();
        assert!(world.is_alive(newcomer), "provisional identifiers are alive immediately");
        assert!(world.locate(newcomer).is_err(), "but have no row until the drain");
        // Later deferred operations may already name the new entity.
        world.add(newcomer, CompB(9)).unwrap();
        spawned.push(newcomer);
    })?;

    for newcomer in spawned {
        assert!(world.is_alive(newcomer));
        assert_eq!(world.get::<CompB>(newcomer)?, CompB(9));
    }
    Ok(())
}

#[test]
fn stale_handles_fail_even_while_locked() -> EcsResult<()> {
    let world = World::new();
    spawn_with_a(&world, 1)?;

    let ghost = world.spawn()?;
    world.despawn(ghost)?;

    let stream = world.query().read::<CompA>().compile()?;
    stream.for_each(|_a: &CompA| {
        assert!(world.add(ghost, CompB(1)).is_err());
        assert!(world.despawn(ghost).is_err());
    })?;
    Ok(())
}

#[test]
fn deferred_sequence_matches_serial_application() -> EcsResult<()> {
    fn apply(world: &World, driver: Option<&lattice_ecs::Stream<'_>>) -> EcsResult<Vec<Entity>> {
        let run = |world: &World| -> Vec<Entity> {
            let first = world.spawn().unwrap();
            let second = world.spawn().unwrap();
            let third = world.spawn().unwrap();
            world.add(first, CompB(10)).unwrap();
            world.add(second, CompB(20)).unwrap();
            world.add(second, CompC(21)).unwrap();
            world.remove::<CompB>(second).unwrap();
            world.despawn(third).unwrap();
            vec![first, second, third]
        };
        match driver {
            // Issue the whole sequence from inside one runner invocation.
            Some(stream) => {
                let mut produced = Vec::new();
                stream.for_each(|_a: &CompA| {
                    if produced.is_empty() {
                        produced = run(world);
                    }
                })?;
                Ok(produced)
            }
            None => Ok(run(world)),
        }
    }

    let serial = World::new();
    spawn_with_a(&serial, 1)?;
    let serial_entities = apply(&serial, None)?;

    let deferred = World::new();
    spawn_with_a(&deferred, 1)?;
    let stream = deferred.query().read::<CompA>().compile()?;
    let deferred_entities = apply(&deferred, Some(&stream))?;

    for (world, entities) in [(&serial, &serial_entities), (&deferred, &deferred_entities)] {
        assert!(world.is_alive(entities[0]));
        assert_eq!(world.get::<CompB>(entities[0])?, CompB(10));
        assert!(world.is_alive(entities[1]));
        assert!(!world.has_component::<CompB>(entities[1])?);
        assert_eq!(world.get::<CompC>(entities[1])?, CompC(21));
        assert!(!world.is_alive(entities[2]));
        assert_eq!(world.query().read::<CompB>().compile()?.count()?, 1);
        assert_eq!(world.query().read::<CompC>().compile()?.count()?, 1);
    }
    Ok(())
}
