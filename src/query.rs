//! Incremental queries: a requested-data tuple plus a compiled filter,
//! kept up to date by listening to the world's trait-change events
//! rather than rescanning every container on every read.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use tracing::warn;

use crate::container::ContainerData;
use crate::error::EmptyQueryError;
use crate::filter::{AllFilter, Filter, Ledger, MatchContext, PresentFilter};
use crate::id::EntityId;
use crate::world::{Entity, WorldInner};

/// A tuple element that is required to be present; contributes its
/// cloned value to the query's output and an implicit [`PresentFilter`]
/// to the compiled filter.
pub struct Has<T>(PhantomData<T>);

/// A tuple element that may or may not be present; contributes
/// `Option<T>` and no matching constraint.
pub struct Maybe<T>(PhantomData<T>);

/// One element of a query's requested-data tuple.
pub trait QueryTerm: 'static {
    type Item: Clone + 'static;
    fn filter() -> Box<dyn Filter>;
    fn extract(container: &ContainerData) -> Self::Item;
}

impl<T: Clone + 'static> QueryTerm for Has<T> {
    type Item = T;
    fn filter() -> Box<dyn Filter> {
        Box::new(PresentFilter::of::<T>())
    }
    fn extract(container: &ContainerData) -> T {
        container
            .get::<T>()
            .cloned()
            .expect("PresentFilter guarantees the trait is installed")
    }
}

impl<T: Clone + 'static> QueryTerm for Maybe<T> {
    type Item = Option<T>;
    fn filter() -> Box<dyn Filter> {
        // No constraint: an empty AllFilter is vacuously true.
        Box::new(AllFilter::default())
    }
    fn extract(container: &ContainerData) -> Option<T> {
        container.get::<T>().cloned()
    }
}

/// A requested-data tuple, `()` through 4-ary. Combine with ad-hoc
/// filters (`added::<T>()`, `not_present::<T>()`, ...) via
/// [`World::query`](crate::world::World::query)'s `filters` argument for
/// constraints that shouldn't also appear in the output tuple.
pub trait QueryTuple: 'static {
    type Item: 'static;
    fn compiled_filter() -> AllFilter;
    fn extract(container: &ContainerData) -> Self::Item;
}

impl QueryTuple for () {
    type Item = ();
    fn compiled_filter() -> AllFilter {
        AllFilter::default()
    }
    fn extract(_container: &ContainerData) -> Self::Item {}
}

macro_rules! impl_query_tuple {
    ($($t:ident),+) => {
        impl<$($t: QueryTerm),+> QueryTuple for ($($t,)+) {
            type Item = ($($t::Item,)+);

            fn compiled_filter() -> AllFilter {
                AllFilter::new(vec![$(<$t as QueryTerm>::filter()),+])
            }

            fn extract(container: &ContainerData) -> Self::Item {
                ($(<$t as QueryTerm>::extract(container),)+)
            }
        }
    };
}

impl_query_tuple!(A);
impl_query_tuple!(A, B);
impl_query_tuple!(A, B, C);
impl_query_tuple!(A, B, C, D);

/// Insertion-ordered set of matching entity ids.
#[derive(Default)]
struct ResultSet {
    order: Vec<EntityId>,
    set: HashSet<EntityId>,
}

impl ResultSet {
    fn insert(&mut self, id: EntityId) {
        if self.set.insert(id.clone()) {
            self.order.push(id);
        }
    }

    fn remove(&mut self, id: &EntityId) {
        if self.set.remove(id) {
            self.order.retain(|x| x != id);
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.set.clear();
    }
}

/// The shared, type-erased half of a query: everything the manager
/// needs to route notifications, independent of the requested-data
/// tuple the user-facing `Query<Q>` was built with.
pub(crate) struct QueryState {
    filter: Box<dyn Filter>,
    tracked: HashSet<TypeId>,
    is_absence: bool,
    ledgers: std::collections::HashMap<EntityId, Ledger>,
    results: ResultSet,
}

impl QueryState {
    fn new(filter: Box<dyn Filter>) -> Self {
        let tracked = filter.tracking_traits().into_iter().collect();
        let is_absence = filter.is_absence();
        Self {
            filter,
            tracked,
            is_absence,
            ledgers: std::collections::HashMap::new(),
            results: ResultSet::default(),
        }
    }

    fn related_traits(&self) -> Vec<TypeId> {
        self.filter.related_traits()
    }

    fn populate_initial<'a>(&mut self, containers: impl Iterator<Item = (&'a EntityId, &'a Rc<RefCell<ContainerData>>)>) {
        let empty = Ledger::default();
        for (id, container) in containers {
            let data = container.borrow();
            let ctx = MatchContext { container: &data, ledger: &empty, initial: true };
            if self.filter.matches(&ctx) {
                self.results.insert(id.clone());
            }
        }
    }

    fn reevaluate(&mut self, id: &EntityId, container: &ContainerData) {
        let ledger = self.ledgers.entry(id.clone()).or_default();
        let ctx = MatchContext { container, ledger, initial: false };
        if self.filter.matches(&ctx) {
            self.results.insert(id.clone());
        } else {
            self.results.remove(id);
        }
    }

    pub(crate) fn on_trait_added(&mut self, id: &EntityId, type_id: TypeId, container: &ContainerData) {
        if self.tracked.contains(&type_id) {
            let ledger = self.ledgers.entry(id.clone()).or_default();
            if ledger.removed.remove(&type_id) {
                ledger.changed.insert(type_id);
            } else {
                ledger.added.insert(type_id);
            }
        }
        self.reevaluate(id, container);
    }

    pub(crate) fn on_trait_changed(&mut self, id: &EntityId, type_id: TypeId, container: &ContainerData) {
        if self.tracked.contains(&type_id) {
            self.ledgers.entry(id.clone()).or_default().changed.insert(type_id);
        }
        self.reevaluate(id, container);
    }

    pub(crate) fn on_trait_removed(&mut self, id: &EntityId, type_id: TypeId, container: &ContainerData) {
        if self.tracked.contains(&type_id) {
            let ledger = self.ledgers.entry(id.clone()).or_default();
            ledger.added.remove(&type_id);
            ledger.changed.remove(&type_id);
            ledger.removed.insert(type_id);
        }
        self.reevaluate(id, container);
    }

    pub(crate) fn on_container_added(&mut self, id: &EntityId, container: &ContainerData) {
        if self.is_absence {
            self.reevaluate(id, container);
        }
    }

    pub(crate) fn forget(&mut self, id: &EntityId) {
        self.results.remove(id);
        self.ledgers.remove(id);
    }

    fn reset(&mut self) {
        if !self.tracked.is_empty() {
            self.results.clear();
            self.ledgers.clear();
        }
    }
}

/// Inverted index from trait type to the queries interested in it, plus
/// the flat list used to sweep on container removal and the absence
/// subset used on container creation. All entries are weak: queries are
/// owned by user code, not by the manager.
#[derive(Default)]
pub(crate) struct QueryManager {
    by_trait: std::collections::HashMap<TypeId, Vec<Weak<RefCell<QueryState>>>>,
    by_absence: Vec<Weak<RefCell<QueryState>>>,
    all: Vec<Weak<RefCell<QueryState>>>,
}

impl QueryManager {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&mut self, state: &Rc<RefCell<QueryState>>) {
        let (related, is_absence) = {
            let s = state.borrow();
            (s.related_traits(), s.is_absence)
        };
        let weak = Rc::downgrade(state);
        for t in related {
            self.by_trait.entry(t).or_default().push(weak.clone());
        }
        if is_absence {
            self.by_absence.push(weak.clone());
        }
        self.all.push(weak);
    }

    pub(crate) fn on_trait_added(&mut self, type_id: TypeId, id: &EntityId, container: &ContainerData) {
        if let Some(list) = self.by_trait.get_mut(&type_id) {
            list.retain(|w| match w.upgrade() {
                Some(q) => {
                    q.borrow_mut().on_trait_added(id, type_id, container);
                    true
                }
                None => false,
            });
        }
    }

    pub(crate) fn on_trait_changed(&mut self, type_id: TypeId, id: &EntityId, container: &ContainerData) {
        if let Some(list) = self.by_trait.get_mut(&type_id) {
            list.retain(|w| match w.upgrade() {
                Some(q) => {
                    q.borrow_mut().on_trait_changed(id, type_id, container);
                    true
                }
                None => false,
            });
        }
    }

    pub(crate) fn on_trait_removed(&mut self, type_id: TypeId, id: &EntityId, container: &ContainerData) {
        if let Some(list) = self.by_trait.get_mut(&type_id) {
            list.retain(|w| match w.upgrade() {
                Some(q) => {
                    q.borrow_mut().on_trait_removed(id, type_id, container);
                    true
                }
                None => false,
            });
        }
    }

    pub(crate) fn on_container_added(&mut self, id: &EntityId, container: &ContainerData) {
        self.by_absence.retain(|w| match w.upgrade() {
            Some(q) => {
                q.borrow_mut().on_container_added(id, container);
                true
            }
            None => false,
        });
    }

    pub(crate) fn on_container_removed(&mut self, id: &EntityId) {
        self.all.retain(|w| match w.upgrade() {
            Some(q) => {
                q.borrow_mut().forget(id);
                true
            }
            None => false,
        });
    }
}

/// A resettable, incrementally-maintained view over the world's
/// entities, combining a requested-data tuple `Q` with an (optionally
/// empty) list of additional filters.
pub struct Query<Q: QueryTuple> {
    state: Rc<RefCell<QueryState>>,
    world: Weak<RefCell<WorldInner>>,
    _marker: PhantomData<Q>,
}

impl<Q: QueryTuple> Query<Q> {
    pub(crate) fn new(world_rc: &Rc<RefCell<WorldInner>>, extra_filters: Vec<Box<dyn Filter>>) -> Self {
        let mut members = vec![Box::new(Q::compiled_filter()) as Box<dyn Filter>];
        members.extend(extra_filters);
        let filter: Box<dyn Filter> = Box::new(AllFilter::new(members));

        let state = Rc::new(RefCell::new(QueryState::new(filter)));
        {
            let world = world_rc.borrow();
            state.borrow_mut().populate_initial(world.entities.iter());
        }
        world_rc.borrow_mut().query_manager.register(&state);

        Self {
            state,
            world: Rc::downgrade(world_rc),
            _marker: PhantomData,
        }
    }

    fn world_rc(&self) -> Rc<RefCell<WorldInner>> {
        self.world.upgrade().expect("query outlived its world")
    }

    /// Clear both the result set and the change-tracking ledger. A
    /// no-op for queries with no added/changed/removed/not_added/
    /// not_changed filter (nothing to clear).
    pub fn reset(&self) {
        self.state.borrow_mut().reset();
    }

    pub fn len(&self) -> usize {
        self.state.borrow().results.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has(&self, entity: &Entity) -> bool {
        self.state.borrow().results.set.contains(entity.id())
    }

    /// Collect the matching entities as handles bound to this query's world.
    pub fn iter(&self) -> Vec<Entity> {
        let world = self.world_rc();
        self.state
            .borrow()
            .results
            .order
            .iter()
            .map(|id| Entity::bind(id.clone(), &world))
            .collect()
    }

    pub fn as_components(&self) -> Vec<Q::Item> {
        let world = self.world_rc();
        let world = world.borrow();
        self.state
            .borrow()
            .results
            .order
            .iter()
            .filter_map(|id| world.entities.get(id))
            .map(|container| Q::extract(&container.borrow()))
            .collect()
    }

    pub fn with_components(&self) -> Vec<(Entity, Q::Item)> {
        let world = self.world_rc();
        let borrowed = world.borrow();
        self.state
            .borrow()
            .results
            .order
            .iter()
            .filter_map(|id| borrowed.entities.get(id).map(|c| (id.clone(), c)))
            .map(|(id, container)| (Entity::bind(id, &world), Q::extract(&container.borrow())))
            .collect()
    }

    /// The first matching entity, or [`EmptyQueryError`]. Warns (does
    /// not error) if more than one entity matches, since the call still
    /// has a well-defined answer.
    pub fn get_one(&self) -> Result<Entity, EmptyQueryError> {
        let len = self.len();
        if len == 0 {
            return Err(EmptyQueryError);
        }
        if len > 1 {
            warn!(matches = len, "query.get_one() called on a query with more than one match");
        }
        Ok(self.iter().into_iter().next().expect("len checked above"))
    }

    pub fn get_one_as_components(&self) -> Result<Q::Item, EmptyQueryError> {
        let len = self.len();
        if len == 0 {
            return Err(EmptyQueryError);
        }
        if len > 1 {
            warn!(matches = len, "query.get_one_as_components() called on a query with more than one match");
        }
        Ok(self.as_components().into_iter().next().expect("len checked above"))
    }

    pub fn get_one_with_components(&self) -> Result<(Entity, Q::Item), EmptyQueryError> {
        let len = self.len();
        if len == 0 {
            return Err(EmptyQueryError);
        }
        if len > 1 {
            warn!(matches = len, "query.get_one_with_components() called on a query with more than one match");
        }
        Ok(self.with_components().into_iter().next().expect("len checked above"))
    }
}
