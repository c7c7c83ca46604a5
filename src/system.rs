//! System templates and their bound, invocable handles.
//!
//! A [`SystemBuilder`] assembles a declarative description of what a
//! system reads — named component queries, declared event types, and
//! at most one resource query under the reserved `"resources"` key —
//! plus the callback itself. [`World::add_system`] binds that
//! description against a concrete world, producing a [`SystemHandle`]
//! that owns the live `Query`/`EventQueue` handles and knows how to
//! gate, invoke, and reset itself.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;

use crate::command::Commands;
use crate::error::MissingSystemCallbackError;
use crate::events::EventQueue;
use crate::filter::Filter;
use crate::query::{Query, QueryTuple};
use crate::world::World;

/// Keys a [`SystemBuilder`] rejects for `.query`/`.event`, since they
/// name the reserved result-struct slots from §4.4/§6.
const RESERVED_KEYS: [&str; 3] = ["command", "resources", "events"];

fn auto_label() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("system-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Type-erased half of a bound component query: enough for the
/// system's non-empty gate and its reset, independent of `Q`.
trait ErasedQuery {
    fn is_empty(&self) -> bool;
    fn reset(&self);
    fn as_any(&self) -> &dyn Any;
}

impl<Q: QueryTuple> ErasedQuery for Query<Q> {
    fn is_empty(&self) -> bool {
        Query::is_empty(self)
    }
    fn reset(&self) {
        Query::reset(self)
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Type-erased half of a bound event queue.
trait ErasedEventQueue {
    fn is_empty(&self) -> bool;
    fn drain_any(&self) -> Box<dyn Any>;
}

impl<E: Clone + 'static> ErasedEventQueue for EventQueue<E> {
    fn is_empty(&self) -> bool {
        EventQueue::is_empty(self)
    }
    fn drain_any(&self) -> Box<dyn Any> {
        Box::new(self.drain())
    }
}

/// The result struct handed to a system's callback: named access back
/// into the queries, drained events, and resource tuple it declared.
pub struct SystemContext<'a> {
    queries: &'a HashMap<String, Box<dyn ErasedQuery>>,
    events: &'a HashMap<String, Box<dyn Any>>,
    resources: &'a Option<Box<dyn Any>>,
    world: &'a World,
}

impl<'a> SystemContext<'a> {
    /// The query declared under `key`. Panics if `key` wasn't declared
    /// with `.query::<Q>(key, ..)` on the builder, or was declared with
    /// a different `Q` — both are callback-author bugs, not runtime
    /// conditions a well-formed system needs to handle.
    pub fn query<Q: QueryTuple>(&self, key: &str) -> &Query<Q> {
        self.queries
            .get(key)
            .unwrap_or_else(|| panic!("system context has no query declared under {key:?}"))
            .as_any()
            .downcast_ref::<Query<Q>>()
            .unwrap_or_else(|| panic!("query {key:?} was declared with a different tuple type"))
    }

    /// The events drained for `key` this invocation, or `&[]` if `key`
    /// wasn't declared (or the declared type doesn't match `E`).
    pub fn events<E: Clone + 'static>(&self, key: &str) -> &[E] {
        self.events
            .get(key)
            .and_then(|b| b.downcast_ref::<Vec<E>>())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The resource tuple, if `.resources::<Q>(..)` was declared and
    /// matched on this invocation.
    pub fn resources<Q: QueryTuple>(&self) -> Option<&Q::Item> {
        self.resources.as_ref().and_then(|b| b.downcast_ref::<Q::Item>())
    }

    pub fn world(&self) -> &World {
        self.world
    }
}

type Condition = Rc<dyn Fn(&World) -> bool>;
type QuerySpec = Box<dyn FnOnce(&World) -> Box<dyn ErasedQuery>>;
type EventSpec = Box<dyn FnOnce(&World) -> Box<dyn ErasedEventQueue>>;
/// Rebuilt fresh on every invocation, since the resource bag's query
/// isn't a standing ledger-backed view (see [`crate::world::ResourceBag::query`]).
type ResourceFactory = Box<dyn Fn() -> Vec<Box<dyn Filter>>>;
type Callback = Rc<dyn Fn(&SystemContext, &mut Commands)>;

/// Builds a [`SystemTemplate`]: the declarative, pre-bind description
/// of a system's queries, events, resource query, scheduling metadata,
/// and callback.
pub struct SystemBuilder {
    label: Option<String>,
    priority: i32,
    after: HashSet<String>,
    before: HashSet<String>,
    run_if: Vec<Condition>,
    run_unless: Vec<Condition>,
    query_specs: Vec<(String, QuerySpec)>,
    event_specs: Vec<(String, EventSpec)>,
    resource_spec: Option<(Box<dyn QueryTupleType>, ResourceFactory)>,
    callback: Option<Callback>,
}

/// Object-safe stand-in for "the `Q` a resource query was declared
/// with", so `resource_spec` can carry `Q::compiled_filter`/`Q::extract`
/// without naming `Q` in `SystemBuilder`'s own fields.
trait QueryTupleType {
    fn query(&self, world: &World, filters: Vec<Box<dyn Filter>>) -> Option<Box<dyn Any>>;
}

struct Marker<Q>(std::marker::PhantomData<Q>);

impl<Q: QueryTuple> QueryTupleType for Marker<Q> {
    fn query(&self, world: &World, filters: Vec<Box<dyn Filter>>) -> Option<Box<dyn Any>> {
        world.resources().query::<Q>(filters).map(|item| Box::new(item) as Box<dyn Any>)
    }
}

impl Default for SystemBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemBuilder {
    pub fn new() -> Self {
        Self {
            label: None,
            priority: 0,
            after: HashSet::new(),
            before: HashSet::new(),
            run_if: Vec::new(),
            run_unless: Vec::new(),
            query_specs: Vec::new(),
            event_specs: Vec::new(),
            resource_spec: None,
            callback: None,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
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

    /// Declare a component query under `key`. The system only invokes
    /// its callback on ticks where every declared query is non-empty.
    pub fn query<Q: QueryTuple>(mut self, key: impl Into<String>, filters: Vec<Box<dyn Filter>>) -> Self {
        let key = key.into();
        debug_assert!(!RESERVED_KEYS.contains(&key.as_str()), "{key:?} is a reserved system-context key");
        self.query_specs.push((
            key,
            Box::new(move |world: &World| -> Box<dyn ErasedQuery> { Box::new(world.query::<Q>(filters)) }),
        ));
        self
    }

    /// Declare an event type under `key`. The callback only runs on
    /// ticks where every declared event queue is non-empty.
    pub fn event<E: Clone + 'static>(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        debug_assert!(!RESERVED_KEYS.contains(&key.as_str()), "{key:?} is a reserved system-context key");
        self.event_specs.push((
            key,
            Box::new(|world: &World| -> Box<dyn ErasedEventQueue> { Box::new(world.declare_events::<E>()) }),
        ));
        self
    }

    /// Declare the (at most one) resource query, under the reserved
    /// `"resources"` key. `filters` is a factory since the query is
    /// re-evaluated fresh on every invocation.
    pub fn resources<Q: QueryTuple>(mut self, filters: impl Fn() -> Vec<Box<dyn Filter>> + 'static) -> Self {
        self.resource_spec = Some((Box::new(Marker::<Q>(std::marker::PhantomData)), Box::new(filters)));
        self
    }

    pub fn callback(mut self, callback: impl Fn(&SystemContext, &mut Commands) + 'static) -> Self {
        self.callback = Some(Rc::new(callback));
        self
    }

    /// Finish the template. Fails with [`MissingSystemCallbackError`]
    /// if `.callback(..)` was never called.
    pub fn build(self) -> Result<SystemTemplate, MissingSystemCallbackError> {
        let callback = self.callback.ok_or(MissingSystemCallbackError)?;
        Ok(SystemTemplate {
            label: self.label.unwrap_or_else(auto_label),
            priority: self.priority,
            after: self.after,
            before: self.before,
            run_if: self.run_if,
            run_unless: self.run_unless,
            query_specs: self.query_specs,
            event_specs: self.event_specs,
            resource_spec: self.resource_spec,
            callback,
        })
    }
}

/// An immutable, not-yet-bound system description. Pass to
/// [`World::add_system`] to produce an invocable [`SystemHandle`].
pub struct SystemTemplate {
    pub(crate) label: String,
    pub(crate) priority: i32,
    pub(crate) after: HashSet<String>,
    pub(crate) before: HashSet<String>,
    run_if: Vec<Condition>,
    run_unless: Vec<Condition>,
    query_specs: Vec<(String, QuerySpec)>,
    event_specs: Vec<(String, EventSpec)>,
    resource_spec: Option<(Box<dyn QueryTupleType>, ResourceFactory)>,
    callback: Callback,
}

/// A system bound to a concrete world: owns live `Query`/`EventQueue`
/// handles, and knows how to gate, invoke, and reset itself.
pub struct SystemHandle {
    label: String,
    priority: i32,
    after: HashSet<String>,
    before: HashSet<String>,
    run_if: Vec<Condition>,
    run_unless: Vec<Condition>,
    queries: HashMap<String, Box<dyn ErasedQuery>>,
    events: HashMap<String, Box<dyn ErasedEventQueue>>,
    resource_spec: Option<(Box<dyn QueryTupleType>, ResourceFactory)>,
    callback: Callback,
    world: World,
    /// Set by a scheduler when a `run_if`/`run_unless` check skips this
    /// handle, so tracking accumulated while skipped is cleared before
    /// the next active run rather than leaking into it (see §4.5).
    pub(crate) needs_pre_reset: Cell<bool>,
}

impl SystemHandle {
    pub(crate) fn bind(template: SystemTemplate, world: &World) -> Self {
        let queries = template
            .query_specs
            .into_iter()
            .map(|(key, build)| (key, build(world)))
            .collect();
        let events = template
            .event_specs
            .into_iter()
            .map(|(key, build)| (key, build(world)))
            .collect();
        Self {
            label: template.label,
            priority: template.priority,
            after: template.after,
            before: template.before,
            run_if: template.run_if,
            run_unless: template.run_unless,
            queries,
            events,
            resource_spec: template.resource_spec,
            callback: template.callback,
            world: world.clone(),
            needs_pre_reset: Cell::new(false),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn after(&self) -> &HashSet<String> {
        &self.after
    }

    pub(crate) fn before(&self) -> &HashSet<String> {
        &self.before
    }

    /// All `run_if` predicates pass and no `run_unless` predicate does.
    pub(crate) fn should_run(&self) -> bool {
        self.run_if.iter().all(|p| p(&self.world)) && self.run_unless.iter().all(|p| !p(&self.world))
    }

    fn resource_tuple(&self) -> Option<Box<dyn Any>> {
        let (marker, filters) = self.resource_spec.as_ref()?;
        marker.query(&self.world, filters())
    }

    /// Run one tick: if every declared query and event queue is
    /// non-empty and the resource query (if declared) matched, drains
    /// events, calls the callback, and flushes its deferred commands.
    /// Queries reset unconditionally afterward either way.
    pub fn invoke(&mut self) {
        let queries_ready = self.queries.values().all(|q| !q.is_empty());
        let events_ready = self.events.values().all(|e| !e.is_empty());
        let resource_tuple = self.resource_tuple();
        let resource_ready = self.resource_spec.is_none() || resource_tuple.is_some();

        if queries_ready && events_ready && resource_ready {
            let drained: HashMap<String, Box<dyn Any>> =
                self.events.iter().map(|(k, q)| (k.clone(), q.drain_any())).collect();
            let ctx = SystemContext {
                queries: &self.queries,
                events: &drained,
                resources: &resource_tuple,
                world: &self.world,
            };
            let mut commands = Commands::new();
            (self.callback)(&ctx, &mut commands);
            commands.flush(&self.world);
        }

        self.reset();
    }

    /// Clear every declared query's tracking state without invoking
    /// the callback. Used directly by callers, and by the scheduler on
    /// a tick where `should_run` is false, so pending change-tracking
    /// never leaks into the next active invocation.
    pub fn reset(&self) {
        for query in self.queries.values() {
            query.reset();
        }
    }
}

impl World {
    /// Bind `template` against this world, producing an invocable handle.
    pub fn add_system(&self, template: SystemTemplate) -> SystemHandle {
        SystemHandle::bind(template, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Has;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Position {
        x: i32,
        y: i32,
    }

    #[test]
    fn command_deferred_spawn_is_visible_after_invoke() {
        let world = World::new();
        let template = SystemBuilder::new()
            .callback(|_ctx, commands| {
                commands.spawn().add(Position { x: 144, y: 42 });
            })
            .build()
            .unwrap();
        let mut handle = world.add_system(template);

        assert_eq!(world.query::<(Has<Position>,)>(vec![]).len(), 0);
        handle.invoke();
        let query = world.query::<(Has<Position>,)>(vec![]);
        assert_eq!(query.len(), 1);
        assert_eq!(query.as_components()[0].0, Position { x: 144, y: 42 });
    }

    #[test]
    fn callback_skipped_when_declared_query_is_empty() {
        let world = World::new();
        let ran = Rc::new(std::cell::Cell::new(false));
        let ran_inner = ran.clone();
        let template = SystemBuilder::new()
            .query::<(Has<Position>,)>("movers", vec![])
            .callback(move |_ctx, _commands| ran_inner.set(true))
            .build()
            .unwrap();
        let mut handle = world.add_system(template);

        handle.invoke();
        assert!(!ran.get());

        let entity = world.spawn();
        entity.add_new(Position::default()).unwrap();
        handle.invoke();
        assert!(ran.get());
    }

    #[test]
    fn build_without_callback_fails() {
        let err = SystemBuilder::new().build();
        assert!(err.is_err());
    }

    #[test]
    fn reset_clears_added_tracking_without_invoking() {
        let world = World::new();
        let ran = Rc::new(std::cell::Cell::new(false));
        let ran_inner = ran.clone();
        let template = SystemBuilder::new()
            .query::<(Has<Position>,)>("added", vec![Box::new(crate::filter::AddedFilter::of::<Position>())])
            .callback(move |_ctx, _commands| ran_inner.set(true))
            .build()
            .unwrap();
        let handle = world.add_system(template);

        let entity = world.spawn();
        entity.add_new(Position::default()).unwrap();
        handle.reset();
        assert!(!ran.get());
    }
}
