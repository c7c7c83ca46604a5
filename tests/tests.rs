use weave::query::Has;
use weave::{AddedFilter, Query, RemovedFilter, World};

#[derive(Debug, Clone, PartialEq)]
struct Position {
    x: i32,
    y: i32,
}

#[test]
fn spawn_and_query() {
    let world = World::new();
    let a = world.spawn();
    a.add_new(Position { x: 1, y: 2 }).unwrap();
    let _b = world.spawn();

    let query: Query<(Has<Position>,)> = world.query(vec![]);
    assert_eq!(query.iter(), vec![a.clone()]);
    assert_eq!(query.as_components(), vec![(Position { x: 1, y: 2 },)]);
}

#[test]
fn added_then_changed_then_quiet() {
    let world = World::new();
    let e = world.spawn();

    let query: Query<()> = world.query(vec![Box::new(AddedFilter::of::<Position>())]);
    query.reset();
    assert!(query.is_empty());

    e.add_new(Position { x: 0, y: 0 }).unwrap();
    assert!(query.has(&e));

    e.get_mut::<Position>().unwrap().x = 42;
    assert!(query.has(&e));

    query.reset();
    assert!(query.is_empty());
}

#[test]
fn remove_then_readd_cancels_the_removal() {
    let world = World::new();
    let e = world.spawn();
    e.add_new(Position { x: 1, y: 1 }).unwrap();

    let query: Query<()> = world.query(vec![Box::new(RemovedFilter::of::<Position>())]);
    query.reset();

    e.remove::<Position>().unwrap();
    assert!(query.has(&e));

    e.add_new(Position { x: 42, y: 0 }).unwrap();
    assert!(query.is_empty());
}

#[test]
fn unique_component_demotes_the_previous_holder() {
    struct Controller;

    let world = World::new();
    world.register_unique::<Controller>();
    let a = world.spawn();
    let b = world.spawn();

    b.add_new(Controller).unwrap();
    a.add_new(Controller).unwrap();

    assert!(a.has::<Controller>());
    assert!(!b.has::<Controller>());
}

#[test]
fn evicted_state_sibling_disappears_from_its_query() {
    struct Stunned;
    struct Sleeping;
    struct Dazed;

    let world = World::new();
    world.register_state::<Stunned, Dazed>();
    world.register_state::<Sleeping, Dazed>();
    let e = world.spawn();

    let query: Query<(Has<Stunned>,)> = world.query(vec![]);
    e.add_new(Stunned).unwrap();
    assert_eq!(query.iter(), vec![e.clone()]);

    e.add_new(Sleeping).unwrap();
    assert!(!e.has::<Stunned>());
    assert!(query.is_empty());
}

#[test]
fn resource_add_bundle_composes_several_inits() {
    #[derive(Clone)]
    struct Score(i32);
    #[derive(Clone)]
    struct Lives(i32);

    let world = World::new();
    let resources = world.resources();
    resources.add_bundle(
        |res, (score, lives)| {
            res.add_new(Score(score));
            res.add_new(Lives(lives));
        },
        (0, 3),
    );

    assert_eq!(resources.get::<Score>().unwrap().0, 0);
    assert_eq!(resources.get::<Lives>().unwrap().0, 3);
}

#[test]
fn scheduler_orders_by_after_then_priority() {
    use weave::{Scheduler, SystemBuilder};

    let world = World::new();
    let mut scheduler = Scheduler::new("update", world.clone());
    let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));

    let a = SystemBuilder::new().label("a").after("b").callback({
        let order = order.clone();
        move |_ctx, _cmds| order.borrow_mut().push("a")
    });
    let b = SystemBuilder::new().label("b").callback({
        let order = order.clone();
        move |_ctx, _cmds| order.borrow_mut().push("b")
    });
    let c = SystemBuilder::new().label("c").priority(2).callback({
        let order = order.clone();
        move |_ctx, _cmds| order.borrow_mut().push("c")
    });

    scheduler.add(world.add_system(a.build().unwrap()));
    scheduler.add(world.add_system(b.build().unwrap()));
    scheduler.add(world.add_system(c.build().unwrap()));
    scheduler.compile().unwrap();
    scheduler.run();

    assert_eq!(*order.borrow(), vec!["c", "b", "a"]);
}

#[test]
fn command_spawn_is_deferred_until_the_system_returns() {
    use weave::SystemBuilder;

    let world = World::new();
    let template = SystemBuilder::new()
        .label("spawner")
        .callback(|_ctx, commands| {
            commands.spawn().add(Position { x: 144, y: 42 });
        })
        .build()
        .unwrap();
    let mut system = world.add_system(template);

    let query: Query<(Has<Position>,)> = world.query(vec![]);
    assert_eq!(query.len(), 0);

    system.invoke();

    assert_eq!(query.len(), 1);
    assert_eq!(query.as_components(), vec![(Position { x: 144, y: 42 },)]);
}
