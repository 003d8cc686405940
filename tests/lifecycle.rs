// Entity identity and archetype lifecycle.
//
//   cargo test --test lifecycle

use lattice_ecs::{EcsError, EcsResult, World};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Velocity {
    dx: f32,
    dy: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Health(u32);

#[test]
fn spawn_locate_despawn() -> EcsResult<()> {
    let world = World::new();

    let entity = world.spawn()?;
    assert!(world.is_alive(entity));

    let location = world.locate(entity)?;
    assert_eq!(location.archetype, lattice_ecs::EMPTY_ARCHETYPE);

    world.despawn(entity)?;
    assert!(!world.is_alive(entity));
    assert!(matches!(world.locate(entity), Err(EcsError::Stale(_))));
    assert!(matches!(world.despawn(entity), Err(EcsError::Stale(_))));
    Ok(())
}

#[test]
fn generation_bumps_on_index_reuse() -> EcsResult<()> {
    let world = World::new();

    let first = world.spawn()?;
    world.despawn(first)?;

    let second = world.spawn()?;
    assert_eq!(second.index(), first.index(), "despawned index should be recycled");
    assert_ne!(second.generation(), first.generation());

    // Any operation on the stale handle fails.
    assert!(matches!(world.add(first, Health(1)), Err(EcsError::Stale(_))));
    assert!(world.is_alive(second));
    Ok(())
}

#[test]
fn foreign_entity_is_stale() -> EcsResult<()> {
    let home = World::new();
    let away = World::new();

    let tourist = away.spawn()?;
    assert!(!home.is_alive(tourist));
    assert!(matches!(home.locate(tourist), Err(EcsError::Stale(_))));
    assert!(matches!(home.add(tourist, Health(3)), Err(EcsError::Stale(_))));
    Ok(())
}

#[test]
fn add_remove_round_trip_restores_archetype() -> EcsResult<()> {
    let world = World::new();

    let entity = world.spawn()?;
    world.add(entity, Position { x: 1.0, y: 2.0 })?;
    world.add(entity, Velocity { dx: 0.5, dy: -0.5 })?;

    let before = world.locate(entity)?.archetype;

    world.add(entity, Health(7))?;
    assert_ne!(world.locate(entity)?.archetype, before);

    world.remove::<Health>(entity)?;
    assert_eq!(world.locate(entity)?.archetype, before, "round trip must restore the archetype");

    // Other components survive the moves untouched.
    assert_eq!(world.get::<Position>(entity)?, Position { x: 1.0, y: 2.0 });
    assert_eq!(world.get::<Velocity>(entity)?, Velocity { dx: 0.5, dy: -0.5 });
    assert!(!world.has_component::<Health>(entity)?);
    Ok(())
}

#[test]
fn remove_of_absent_key_is_noop() -> EcsResult<()> {
    let world = World::new();

    let entity = world.spawn()?;
    world.add(entity, Position { x: 0.0, y: 0.0 })?;

    let before = world.locate(entity)?;
    world.remove::<Health>(entity)?;
    assert_eq!(world.locate(entity)?, before);
    Ok(())
}

#[test]
fn removing_last_component_returns_to_empty_archetype() -> EcsResult<()> {
    let world = World::new();

    let entity = world.spawn()?;
    world.add(entity, Health(10))?;
    assert_ne!(world.locate(entity)?.archetype, lattice_ecs::EMPTY_ARCHETYPE);

    world.remove::<Health>(entity)?;
    assert_eq!(world.locate(entity)?.archetype, lattice_ecs::EMPTY_ARCHETYPE);
    assert!(world.is_alive(entity));
    Ok(())
}

#[test]
fn add_overwrites_existing_value_in_place() -> EcsResult<()> {
    let world = World::new();

    let entity = world.spawn()?;
    world.add(entity, Health(1))?;
    let before = world.locate(entity)?;

    world.add(entity, Health(2))?;
    assert_eq!(world.locate(entity)?, before, "overwrite must not move the entity");
    assert_eq!(world.get::<Health>(entity)?, Health(2));
    Ok(())
}

#[test]
fn swap_remove_patches_relocated_entities() -> EcsResult<()> {
    let world = World::new();

    // Several entities in one archetype, then despawn from the middle so
    // swap-remove has to relocate rows.
    let entities: Vec<_> = (0..8)
        .map(|i| -> EcsResult<_> {
            let entity = world.spawn()?;
            world.add(entity, Health(i))?;
            Ok(entity)
        })
        .collect::<EcsResult<_>>()?;

    world.despawn(entities[2])?;
    world.despawn(entities[5])?;

    for (i, &entity) in entities.iter().enumerate() {
        if i == 2 || i == 5 {
            assert!(!world.is_alive(entity));
            continue;
        }
        // Locations were patched: every survivor still resolves to its value.
        assert_eq!(world.get::<Health>(entity)?, Health(i as u32));
    }

    let survivors = world.query().read::<Health>().compile()?;
    assert_eq!(survivors.count()?, 6);

    let mut seen = Vec::new();
    survivors.for_each_entity(|entity, _health: &Health| seen.push(entity))?;
    seen.sort();
    let mut expected: Vec<_> =
        entities.iter().enumerate().filter(|(i, _)| *i != 2 && *i != 5).map(|(_, e)| *e).collect();
    expected.sort();
    assert_eq!(seen, expected, "iteration must visit exactly the live set");
    Ok(())
}
