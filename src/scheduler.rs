//! Labelled system-likes, dependency-ordered compilation, and run
//! conditions. A [`SystemSet`] is a recursive group of systems and
//! nested sets compiled into a single stable execution order; a
//! [`Scheduler`] is a named set bound to a world.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use crate::error::MissingDependenciesError;
use crate::filter::Filter;
use crate::query::QueryTuple;
use crate::system::SystemHandle;
use crate::world::World;

type Condition = Rc<dyn Fn(&World) -> bool>;

fn auto_label() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("set-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Anything a [`SystemSet`] can hold as a member: a bound system or a
/// nested set. Both carry the same labelling/ordering/predicate
/// surface (§4.5).
pub trait SystemLike {
    fn label(&self) -> &str;
    fn priority(&self) -> i32;
    fn after(&self) -> &HashSet<String>;
    fn before(&self) -> &HashSet<String>;

    /// Evaluate this member's own run conditions, execute if they
    /// pass, and reset its tracking either way (immediately if it ran,
    /// deferred to the next active run if it didn't — see §4.5).
    fn tick(&mut self, world: &World);

    /// Clear tracking state without evaluating conditions or invoking.
    fn reset(&self);
}

impl SystemLike for SystemHandle {
    fn label(&self) -> &str {
        SystemHandle::label(self)
    }
    fn priority(&self) -> i32 {
        SystemHandle::priority(self)
    }
    fn after(&self) -> &HashSet<String> {
        SystemHandle::after(self)
    }
    fn before(&self) -> &HashSet<String> {
        SystemHandle::before(self)
    }
    fn tick(&mut self, _world: &World) {
        if self.needs_pre_reset.get() {
            SystemHandle::reset(self);
            self.needs_pre_reset.set(false);
        }
        if !self.should_run() {
            self.needs_pre_reset.set(true);
            return;
        }
        self.invoke();
    }
    fn reset(&self) {
        SystemHandle::reset(self);
    }
}

/// A recursive group of system-likes, compiled into one stable
/// execution order by dependency level (§4.5 step 3).
pub struct SystemSet {
    label: String,
    priority: i32,
    after: HashSet<String>,
    before: HashSet<String>,
    run_if: Vec<Condition>,
    run_unless: Vec<Condition>,
    members: Vec<Box<dyn SystemLike>>,
    order: RefCell<Option<Vec<usize>>>,
    needs_pre_reset: Cell<bool>,
}

impl SystemSet {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            priority: 0,
            after: HashSet::new(),
            before: HashSet::new(),
            run_if: Vec::new(),
            run_unless: Vec::new(),
            members: Vec::new(),
            order: RefCell::new(None),
            needs_pre_reset: Cell::new(false),
        }
    }

    pub fn unlabelled() -> Self {
        Self::new(auto_label())
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn after(mut self, label: impl Into<String>) -> Self {
        self.after.insert(label.into());
        self
    }

    pub fn before(mut self, label: impl Into<String>) -> Self {
        self.before.insert(label.into());
        self
    }

    pub fn run_if(mut self, pred: impl Fn(&World) -> bool + 'static) -> Self {
        self.run_if.push(Rc::new(pred));
        self
    }

    pub fn run_unless(mut self, pred: impl Fn(&World) -> bool + 'static) -> Self {
        self.run_unless.push(Rc::new(pred));
        self
    }

    /// Add a member (a bound [`SystemHandle`] or a nested `SystemSet`),
    /// marking the compiled order stale.
    pub fn add(&mut self, member: impl SystemLike + 'static) -> &mut Self {
        self.members.push(Box::new(member));
        *self.order.borrow_mut() = None;
        self
    }

    fn should_run(&self, world: &World) -> bool {
        self.run_if.iter().all(|p| p(world)) && self.run_unless.iter().all(|p| !p(world))
    }

    /// Recompute and cache the execution order if stale.
    pub fn compile(&self) -> Result<(), MissingDependenciesError> {
        if self.order.borrow().is_some() {
            return Ok(());
        }
        let order = compile_order(&self.members)?;
        *self.order.borrow_mut() = Some(order);
        Ok(())
    }
}

impl SystemLike for SystemSet {
    fn label(&self) -> &str {
        &self.label
    }
    fn priority(&self) -> i32 {
        self.priority
    }
    fn after(&self) -> &HashSet<String> {
        &self.after
    }
    fn before(&self) -> &HashSet<String> {
        &self.before
    }
    fn tick(&mut self, world: &World) {
        if self.needs_pre_reset.get() {
            SystemLike::reset(self);
            self.needs_pre_reset.set(false);
        }
        if !self.should_run(world) {
            self.needs_pre_reset.set(true);
            return;
        }
        if self.compile().is_err() {
            return;
        }
        let order = self.order.borrow().clone().expect("compiled above");
        for idx in order {
            self.members[idx].tick(world);
        }
    }
    fn reset(&self) {
        for member in &self.members {
            member.reset();
        }
    }
}

/// Kahn-style level compile: repeatedly collect every not-yet-placed
/// member whose prerequisites are already placed, sort that whole
/// batch by `(priority desc, insertion order)`, and append it. A batch
/// that turns up empty while members remain means a cycle or an
/// unresolvable label.
fn compile_order(members: &[Box<dyn SystemLike>]) -> Result<Vec<usize>, MissingDependenciesError> {
    // Prerequisites are tracked by label, not index: a label naming no
    // member (a typo, or a member from outside this set) can then never
    // enter `placed`, correctly blocking its dependent forever instead
    // of silently dropping out of the prerequisite set.
    let mut prereqs: Vec<HashSet<String>> = members.iter().map(|m| m.after().clone()).collect();
    for member in members.iter() {
        for label in member.before() {
            if let Some(target) = members.iter().position(|m| m.label() == label.as_str()) {
                prereqs[target].insert(member.label().to_string());
            }
        }
    }

    let mut placed: HashSet<String> = HashSet::new();
    let mut order = Vec::with_capacity(members.len());
    let mut remaining: Vec<usize> = (0..members.len()).collect();

    while !remaining.is_empty() {
        let mut ready: Vec<usize> = remaining
            .iter()
            .copied()
            .filter(|&i| prereqs[i].is_subset(&placed))
            .collect();

        if ready.is_empty() {
            let blocked = remaining
                .iter()
                .map(|&i| {
                    let unmet: Vec<String> =
                        prereqs[i].iter().filter(|label| !placed.contains(*label)).cloned().collect();
                    (members[i].label().to_string(), unmet)
                })
                .collect();
            return Err(MissingDependenciesError(blocked));
        }

        ready.sort_by(|&a, &b| members[b].priority().cmp(&members[a].priority()).then(a.cmp(&b)));
        for &i in &ready {
            placed.insert(members[i].label().to_string());
            order.push(i);
        }
        let just_placed: HashSet<usize> = ready.into_iter().collect();
        remaining.retain(|i| !just_placed.contains(i));
    }

    Ok(order)
}

/// A named system set bound to a world: the top of the scheduler
/// layer. Adding a member delegates straight to the underlying set.
pub struct Scheduler {
    set: SystemSet,
    world: World,
}

impl Scheduler {
    pub fn new(label: impl Into<String>, world: World) -> Self {
        Self { set: SystemSet::new(label), world }
    }

    pub fn add(&mut self, member: impl SystemLike + 'static) -> &mut Self {
        self.set.add(member);
        self
    }

    pub fn compile(&self) -> Result<(), MissingDependenciesError> {
        self.set.compile()
    }

    /// Run one tick against the bound world.
    pub fn run(&mut self) {
        let world = self.world.clone();
        self.set.tick(&world);
    }

    pub fn reset(&self) {
        SystemLike::reset(&self.set);
    }
}

/// `true` while resource `R` is present.
pub fn resource_present<R: 'static>() -> impl Fn(&World) -> bool {
    move |world: &World| world.resources().has::<R>()
}

/// `true` while the resource bag matches `Q` plus `filters()`. The
/// resource bag's query is itself a one-shot re-evaluation (see
/// [`crate::world::ResourceBag::query`]), so unlike `component_filter`
/// there's no standing query object to cache across calls.
pub fn resource_filter<Q: QueryTuple>(filters: impl Fn() -> Vec<Box<dyn Filter>> + 'static) -> impl Fn(&World) -> bool {
    move |world: &World| world.resources().query::<Q>(filters()).is_some()
}

/// `true` while a lazily-instantiated, standing component query over
/// `Q` plus `filters()` has at least one match. The query is built on
/// first call and reused afterward so membership stays incrementally
/// tracked rather than rescanned every check.
pub fn component_filter<Q: QueryTuple>(filters: impl Fn() -> Vec<Box<dyn Filter>> + 'static) -> impl Fn(&World) -> bool {
    let cached: RefCell<Option<crate::query::Query<Q>>> = RefCell::new(None);
    move |world: &World| {
        let mut guard = cached.borrow_mut();
        if guard.is_none() {
            *guard = Some(world.query::<Q>(filters()));
        }
        guard.as_ref().expect("populated above").len() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Commands;
    use crate::query::Has;
    use crate::system::{SystemBuilder, SystemContext};

    /// A bare `SystemLike` with no body, for exercising `compile_order`
    /// directly without binding real systems to a world.
    struct Stub {
        label: String,
        priority: i32,
        after: HashSet<String>,
        before: HashSet<String>,
    }

    impl Stub {
        fn new(label: &str) -> Self {
            Self {
                label: label.into(),
                priority: 0,
                after: HashSet::new(),
                before: HashSet::new(),
            }
        }
        fn priority(mut self, p: i32) -> Self {
            self.priority = p;
            self
        }
        fn after(mut self, label: &str) -> Self {
            self.after.insert(label.into());
            self
        }
    }

    impl SystemLike for Stub {
        fn label(&self) -> &str {
            &self.label
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn after(&self) -> &HashSet<String> {
            &self.after
        }
        fn before(&self) -> &HashSet<String> {
            &self.before
        }
        fn tick(&mut self, _world: &World) {}
        fn reset(&self) {}
    }

    fn noop_system(world: &World, label: &str) -> SystemHandle {
        let template = SystemBuilder::new()
            .label(label)
            .callback(|_ctx: &SystemContext, _commands: &mut Commands| {})
            .build()
            .unwrap();
        world.add_system(template)
    }

    #[test]
    fn priority_and_after_compile_in_expected_order() {
        // §8 scenario 5: {A.after(B), B, C.priority(2)} -> [C, B, A].
        let members: Vec<Box<dyn SystemLike>> = vec![
            Box::new(Stub::new("a").after("b")),
            Box::new(Stub::new("b")),
            Box::new(Stub::new("c").priority(2)),
        ];
        let order = compile_order(&members).unwrap();
        let labels: Vec<&str> = order.iter().map(|&i| members[i].label()).collect();
        assert_eq!(labels, vec!["c", "b", "a"]);
    }

    #[test]
    fn unresolvable_after_label_fails_compile() {
        let members: Vec<Box<dyn SystemLike>> = vec![Box::new(Stub::new("only").after("ghost"))];
        assert!(compile_order(&members).is_err());
    }

    #[test]
    fn compile_is_stable_across_repeated_calls() {
        let world = World::new();
        let mut set = SystemSet::new("s");
        set.add(noop_system(&world, "a"));
        set.add(noop_system(&world, "b"));
        set.compile().unwrap();
        let first = set.order.borrow().clone();
        set.compile().unwrap();
        let second = set.order.borrow().clone();
        assert_eq!(first, second);
    }

    #[test]
    fn resource_present_reflects_current_state() {
        struct Config;
        let world = World::new();
        let pred = resource_present::<Config>();
        assert!(!pred(&world));
        world.resources().add_new(Config);
        assert!(pred(&world));
    }

    #[test]
    fn component_filter_tracks_membership() {
        #[derive(Default, Clone)]
        struct Position;
        let world = World::new();
        let pred = component_filter::<(Has<Position>,)>(Vec::new);
        assert!(!pred(&world));
        let entity = world.spawn();
        entity.add_new(Position).unwrap();
        assert!(pred(&world));
    }
}
