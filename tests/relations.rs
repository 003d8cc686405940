// Relational keys, wildcard matching, and shared-object links.
//
//   cargo test --test relations

use std::collections::HashMap;

use lattice_ecs::{EcsResult, Entity, KeyPattern, ObjectHandle, World};

#[derive(Clone, Copy, Debug, PartialEq)]
struct Likes {
    strength: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Position {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Velocity {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Force(f64);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Body {
    mass: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Tint(f32);

struct Palette {
    colors: Vec<u32>,
}

#[test]
fn relations_toward_distinct_targets_are_distinct_keys() -> EcsResult<()> {
    let world = World::new();

    let fan = world.spawn()?;
    let x = world.spawn()?;
    let y = world.spawn()?;

    world.add_relation(fan, x, Likes { strength: 1.0 })?;
    world.add_relation(fan, y, Likes { strength: 2.0 })?;

    assert_eq!(world.get_relation::<Likes>(fan, x)?, Likes { strength: 1.0 });
    assert_eq!(world.get_relation::<Likes>(fan, y)?, Likes { strength: 2.0 });

    world.remove_relation::<Likes>(fan, x)?;
    assert!(world.get_relation::<Likes>(fan, x).is_err());
    assert_eq!(world.get_relation::<Likes>(fan, y)?, Likes { strength: 2.0 });
    Ok(())
}

#[test]
fn wildcard_visits_every_matching_column() -> EcsResult<()> {
    let world = World::new();

    let fan = world.spawn()?;
    let x = world.spawn()?;
    let y = world.spawn()?;
    let z = world.spawn()?;

    world.add_relation(fan, x, Likes { strength: 1.0 })?;
    world.add_relation(fan, y, Likes { strength: 2.0 })?;
    world.add_relation(fan, z, Likes { strength: 3.0 })?;

    let stream = world.query().read_pattern(KeyPattern::any_entity::<Likes>()).compile()?;
    let mut visits: Vec<(Entity, Entity, f32)> = Vec::new();
    stream.for_each_relation(|source, target, likes: &Likes| {
        visits.push((source, target, likes.strength));
    })?;

    assert_eq!(visits.len(), 3, "one invocation per (row, matching column)");
    assert!(visits.iter().all(|(source, _, _)| *source == fan));
    let mut targets: Vec<_> = visits.iter().map(|(_, target, _)| *target).collect();
    targets.sort();
    let mut expected = vec![x, y, z];
    expected.sort();
    assert_eq!(targets, expected);
    Ok(())
}

#[test]
fn target_pattern_selects_a_single_column() -> EcsResult<()> {
    let world = World::new();

    let fan = world.spawn()?;
    let other_fan = world.spawn()?;
    let x = world.spawn()?;
    let y = world.spawn()?;

    world.add_relation(fan, x, Likes { strength: 1.0 })?;
    world.add_relation(fan, y, Likes { strength: 2.0 })?;
    world.add_relation(other_fan, x, Likes { strength: 5.0 })?;

    let stream = world.query().read_pattern(KeyPattern::target::<Likes>(x)).compile()?;
    let mut strengths = Vec::new();
    stream.for_each_relation(|_, target, likes: &Likes| {
        assert_eq!(target, x);
        strengths.push(likes.strength);
    })?;
    strengths.sort_by(|a, b| a.partial_cmp(b).unwrap());
    assert_eq!(strengths, vec![1.0, 5.0]);
    Ok(())
}

#[test]
fn three_body_force_accumulation() -> EcsResult<()> {
    let world = World::new();

    let places = [
        Position { x: 0.0, y: 0.0, z: 0.0 },
        Position { x: 2.0, y: 0.0, z: 0.0 },
        Position { x: 0.0, y: 2.0, z: 0.0 },
    ];
    let mut suns = Vec::new();
    for place in places {
        let sun = world.spawn()?;
        world.add(sun, place)?;
        world.add(sun, Velocity { x: 0.0, y: 0.0, z: 0.0 })?;
        world.add(sun, Force(0.0))?;
        suns.push(sun);
    }
    // Every sun relates to every sun, itself included.
    for &source in &suns {
        for &target in &suns {
            world.add_relation(source, target, Body { mass: 5.0 })?;
        }
    }

    let positions: HashMap<Entity, Position> = {
        let mut map = HashMap::new();
        world.query().read::<Position>().compile()?.for_each_entity(
            |entity, position: &Position| {
                map.insert(entity, *position);
            },
        )?;
        map
    };

    let stream = world
        .query()
        .write::<Force>()
        .read::<Position>()
        .read_pattern(KeyPattern::any_entity::<Body>())
        .compile()?;

    stream.blit(Force(0.0))?;
    stream.for_each2_relation_with(
        &positions,
        |force: &mut Force, position: &Position, body: &Body, target, positions| {
            let other = positions[&target];
            let dx = other.x - position.x;
            let dy = other.y - position.y;
            let dz = other.z - position.z;
            let dist2 = dx * dx + dy * dy + dz * dz;
            if dist2 > 0.0 {
                force.0 += body.mass / dist2;
            }
        },
    )?;

    // Pairwise squared distances: a-b = 4, a-c = 4, b-c = 8.
    let expected = [5.0 / 4.0 + 5.0 / 4.0, 5.0 / 4.0 + 5.0 / 8.0, 5.0 / 4.0 + 5.0 / 8.0];
    for (&sun, expected) in suns.iter().zip(expected) {
        let force = world.get::<Force>(sun)?;
        assert!((force.0 - expected).abs() < 1e-9, "expected {expected}, found {}", force.0);
    }
    Ok(())
}

#[test]
fn object_links_surface_the_shared_object_per_row() -> EcsResult<()> {
    let world = World::new();

    let palette = ObjectHandle::new(Palette { colors: vec![0xff0000, 0x00ff00, 0x0000ff] });
    let mut sprites = Vec::new();
    for _ in 0..4 {
        let sprite = world.spawn()?;
        world.add(sprite, Tint(0.0))?;
        world.add_object::<Palette>(sprite, &palette)?;
        sprites.push(sprite);
    }

    let stream = world
        .query()
        .write::<Tint>()
        .read_pattern(KeyPattern::any_object::<Palette>())
        .compile()?;
    stream.for_each_object_mut(|tint: &mut Tint, palette: &Palette| {
        tint.0 += palette.colors.len() as f32;
    })?;

    for &sprite in &sprites {
        assert_eq!(world.get::<Tint>(sprite)?, Tint(3.0));
    }

    // Unlinking returns the entity to its prior archetype.
    let before = world.locate(sprites[0])?.archetype;
    world.remove_object::<Palette>(sprites[0], &palette)?;
    assert_ne!(world.locate(sprites[0])?.archetype, before);
    assert_eq!(world.get::<Tint>(sprites[0])?, Tint(3.0));
    Ok(())
}

#[test]
fn distinct_handles_of_one_type_are_distinct_keys() -> EcsResult<()> {
    let world = World::new();

    let warm = ObjectHandle::new(Palette { colors: vec![1] });
    let cold = ObjectHandle::new(Palette { colors: vec![2, 3] });

    let a = world.spawn()?;
    world.add(a, Tint(0.0))?;
    world.add_object::<Palette>(a, &warm)?;

    let b = world.spawn()?;
    world.add(b, Tint(0.0))?;
    world.add_object::<Palette>(b, &cold)?;

    assert_ne!(world.locate(a)?.archetype, world.locate(b)?.archetype);

    let warm_only =
        world.query().write::<Tint>().read_pattern(KeyPattern::object::<Palette>(&warm)).compile()?;
    assert_eq!(warm_only.count()?, 1);

    let any = world
        .query()
        .write::<Tint>()
        .read_pattern(KeyPattern::any_object::<Palette>())
        .compile()?;
    assert_eq!(any.count()?, 2);
    Ok(())
}
