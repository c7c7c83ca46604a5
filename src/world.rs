//! The world: owns entities and the resource bag, forwards container
//! mutations to the query manager and event dispatcher, and compiles
//! systems against itself.

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::{Rc, Weak};

use hashbrown::HashMap;

use crate::container::ContainerData;
use crate::error::{MissingTraitError, NoSuchEntityError};
use crate::events::EventDispatcher;
use crate::filter::{Filter, Ledger, MatchContext};
use crate::id::{EntityId, IdGenerator, MonotonicIdGenerator};
use crate::query::{Query, QueryManager, QueryTuple};
use crate::trait_meta::TraitRegistry;

const RESOURCE_LEDGER_ID: &str = "<resources>";

fn resource_ledger_id() -> EntityId {
    EntityId::from(RESOURCE_LEDGER_ID)
}

/// Shared state behind every [`World`], [`Entity`], and [`ResourceBag`]
/// handle. Never exposed directly; always reached through `Rc<RefCell<_>>`.
pub(crate) struct WorldInner {
    pub(crate) entities: HashMap<EntityId, Rc<RefCell<ContainerData>>>,
    pub(crate) resources: Rc<RefCell<ContainerData>>,
    pub(crate) registry: TraitRegistry,
    pub(crate) query_manager: QueryManager,
    pub(crate) events: EventDispatcher,
    pub(crate) id_gen: Box<dyn IdGenerator>,
    resource_hooks: HashMap<TypeId, Vec<(Rc<Cell<bool>>, Rc<dyn Fn(&ContainerData)>)>>,
}

/// A single-threaded ECS world.
///
/// Cheap to clone: clones share the same underlying state, mirroring
/// the `Rc`-handle pattern used throughout this crate (entities, the
/// resource bag, and queries are all thin handles around the same
/// `Rc<RefCell<WorldInner>>`).
#[derive(Clone)]
pub struct World {
    inner: Rc<RefCell<WorldInner>>,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Build a world using the default [`MonotonicIdGenerator`].
    pub fn new() -> Self {
        Self::with_id_generator(MonotonicIdGenerator::new())
    }

    /// Build a world with a custom id generator; the one documented
    /// construction-time configuration point.
    pub fn with_id_generator(id_gen: impl IdGenerator + 'static) -> Self {
        let inner = WorldInner {
            entities: HashMap::new(),
            resources: Rc::new(RefCell::new(ContainerData::new("resources"))),
            registry: TraitRegistry::new(),
            query_manager: QueryManager::new(),
            events: EventDispatcher::new(),
            id_gen: Box::new(id_gen),
            resource_hooks: HashMap::new(),
        };
        Self { inner: Rc::new(RefCell::new(inner)) }
    }

    /// Declare that `Child` is a state trait sharing `Parent`'s slot.
    pub fn register_state<Child: 'static, Parent: 'static>(&self) {
        self.inner.borrow_mut().registry.register_state::<Child, Parent>();
    }

    /// Declare that `T` may be held by at most one entity at a time.
    pub fn register_unique<T: 'static>(&self) {
        self.inner.borrow_mut().registry.register_unique::<T>();
    }

    /// Spawn a fresh entity with a newly generated id.
    pub fn spawn(&self) -> Entity {
        let id = self.inner.borrow_mut().id_gen.next();
        self.spawn_with_id(id)
    }

    fn spawn_with_id(&self, id: EntityId) -> Entity {
        let container = Rc::new(RefCell::new(ContainerData::new(id.to_string())));
        self.inner.borrow_mut().entities.insert(id.clone(), container.clone());
        let data = container.borrow();
        self.inner.borrow_mut().query_manager.on_container_added(&id, &data);
        drop(data);
        Entity::bind(id, &self.inner)
    }

    /// Look up a live entity by id.
    pub fn get(&self, id: &EntityId) -> Option<Entity> {
        let w = self.inner.borrow();
        w.entities.contains_key(id).then(|| Entity::bind(id.clone(), &self.inner))
    }

    /// Remove an entity, disposing every trait it held.
    pub fn remove(&self, entity: &Entity) {
        let container = self.inner.borrow_mut().entities.remove(&entity.id);
        if let Some(container) = container {
            container.borrow_mut().clear();
            drop(container);
            self.inner.borrow_mut().query_manager.on_container_removed(&entity.id);
        }
    }

    /// Disposes every entity and every resource.
    pub fn clear(&self) {
        let ids: Vec<EntityId> = self.inner.borrow().entities.keys().cloned().collect();
        for id in ids {
            if let Some(entity) = self.get(&id) {
                self.remove(&entity);
            }
        }
        self.resources().clear();
    }

    /// The singleton resource bag.
    pub fn resources(&self) -> ResourceBag {
        ResourceBag { world: Rc::downgrade(&self.inner) }
    }

    /// Enqueue `event` into every live queue subscribed to `E`.
    pub fn dispatch<E: Clone + 'static>(&self, event: E) {
        self.inner.borrow_mut().events.dispatch(event);
    }

    /// Register a fresh queue for event type `E`, returning the strong
    /// handle. Typically called once per system when it's bound, via
    /// [`crate::system::SystemBuilder::event`].
    pub fn declare_events<E: Clone + 'static>(&self) -> crate::events::EventQueue<E> {
        self.inner.borrow_mut().events.declare::<E>()
    }

    /// Build a query over the current entities. `Q` names the
    /// requested-data tuple (`Has<T>`/`Maybe<T>` elements, or `()` for a
    /// pure-filter query); `filters` adds constraints that don't appear
    /// in the output tuple (`added::<T>()`, `not_present::<T>()`, ...).
    pub fn query<Q: QueryTuple>(&self, filters: Vec<Box<dyn Filter>>) -> Query<Q> {
        Query::new(&self.inner, filters)
    }

    pub(crate) fn inner(&self) -> &Rc<RefCell<WorldInner>> {
        &self.inner
    }
}

/// A handle to a live (or once-live) entity. Cheap to clone; operations
/// fail with [`NoSuchEntityError`] once the entity has been removed.
#[derive(Clone)]
pub struct Entity {
    id: EntityId,
    world: Weak<RefCell<WorldInner>>,
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entity({})", self.id)
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Entity {}

impl Entity {
    pub(crate) fn bind(id: EntityId, world: &Rc<RefCell<WorldInner>>) -> Self {
        Self { id, world: Rc::downgrade(world) }
    }

    pub fn id(&self) -> &EntityId {
        &self.id
    }

    fn world_rc(&self) -> Rc<RefCell<WorldInner>> {
        self.world.upgrade().expect("entity's world has been dropped")
    }

    fn container(&self) -> Result<Rc<RefCell<ContainerData>>, NoSuchEntityError> {
        let world = self.world_rc();
        let w = world.borrow();
        w.entities.get(&self.id).cloned().ok_or(NoSuchEntityError)
    }

    /// Default-construct `T`, apply `patch`, then install it. Emits
    /// *added* if the slot was empty, *changed* if it replaced a value.
    pub fn add<T: Default + 'static>(&self, patch: impl FnOnce(&mut T)) -> Result<(), NoSuchEntityError> {
        let mut value = T::default();
        patch(&mut value);
        self.add_new(value)
    }

    /// Install an already-constructed `T`.
    pub fn add_new<T: 'static>(&self, value: T) -> Result<(), NoSuchEntityError> {
        let world = self.world_rc();
        let container = self.container()?;
        enforce_uniqueness::<T>(&world, &self.id);
        raw_add(&world, &container, &self.id, value);
        Ok(())
    }

    /// Invoke `f(self, ...)`; a convenience hook for composing several
    /// `add`/`add_new` calls under one name.
    pub fn add_bundle<Args>(&self, f: impl FnOnce(&Entity, Args), args: Args) -> Result<(), NoSuchEntityError> {
        self.container()?;
        f(self, args);
        Ok(())
    }

    /// Remove `T`. No-op if absent. Removing a parent state type
    /// removes whichever child currently occupies it.
    pub fn remove<T: 'static>(&self) -> Result<(), NoSuchEntityError> {
        let world = self.world_rc();
        let container = self.container()?;
        raw_remove::<T>(&world, &container, &self.id);
        Ok(())
    }

    pub fn get<T: Clone + 'static>(&self) -> Result<T, MissingTraitError> {
        let container = self.container().map_err(|_| MissingTraitError::new::<T>(self.id.to_string()))?;
        let data = container.borrow();
        data.get::<T>()
            .cloned()
            .ok_or_else(|| MissingTraitError::new::<T>(data.to_string()))
    }

    pub fn try_get<T: Clone + 'static>(&self) -> Option<T> {
        self.container().ok().and_then(|c| c.borrow().get::<T>().cloned())
    }

    /// A change-tracked mutable handle: writes back on drop, and only
    /// notifies the query manager of a *changed* event if the value
    /// genuinely differs from what it was when this was called.
    pub fn get_mut<T: PartialEq + Clone + 'static>(&self) -> Result<TrackedMut<T>, MissingTraitError> {
        let world = self.world_rc();
        let container = self.container().map_err(|_| MissingTraitError::new::<T>(self.id.to_string()))?;
        let before = {
            let data = container.borrow();
            data.get::<T>()
                .cloned()
                .ok_or_else(|| MissingTraitError::new::<T>(data.to_string()))?
        };
        Ok(TrackedMut {
            current: before.clone(),
            before,
            type_id: TypeId::of::<T>(),
            ledger_id: self.id.clone(),
            container,
            world: Rc::downgrade(&world),
        })
    }

    pub fn has<T: 'static>(&self) -> bool {
        self.container().map(|c| c.borrow().has::<T>()).unwrap_or(false)
    }

    pub fn has_all(&self, ids: &[TypeId]) -> bool {
        self.container().map(|c| c.borrow().has_all(ids)).unwrap_or(false)
    }

    pub fn has_any(&self, ids: &[TypeId]) -> bool {
        self.container().map(|c| c.borrow().has_any(ids)).unwrap_or(false)
    }

    pub fn traits(&self) -> Vec<TypeId> {
        self.container().map(|c| c.borrow().traits().collect()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(container) = self.container() {
            container.borrow_mut().clear();
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// Evicts `T` from whichever entity currently holds it, if `T` is
/// registered unique and that holder isn't `holder`.
fn enforce_uniqueness<T: 'static>(world: &Rc<RefCell<WorldInner>>, holder: &EntityId) {
    let is_unique = world.borrow().registry.is_unique(TypeId::of::<T>());
    if !is_unique {
        return;
    }
    let prior_holders: Vec<EntityId> = {
        let w = world.borrow();
        w.entities
            .iter()
            .filter(|(id, c)| *id != holder && c.borrow().has::<T>())
            .map(|(id, _)| id.clone())
            .collect()
    };
    for id in prior_holders {
        let container = world.borrow().entities.get(&id).cloned();
        if let Some(container) = container {
            raw_remove::<T>(world, &container, &id);
        }
    }
}

/// Install `value`, routed through the registry's state-trait parent
/// lookup, and forward the resulting added/changed event. If installing
/// `value` evicted a sibling state trait from their shared parent slot,
/// fires a *removed* notification for the evicted type first and
/// returns its type id so the caller can react too (resource update
/// hooks, in particular, aren't reachable from in here).
pub(crate) fn raw_add<T: 'static>(
    world: &Rc<RefCell<WorldInner>>,
    container: &Rc<RefCell<ContainerData>>,
    ledger_id: &EntityId,
    value: T,
) -> Option<TypeId> {
    let type_id = TypeId::of::<T>();
    let parent = {
        let mut w = world.borrow_mut();
        w.registry.observe::<T>();
        w.registry.parent_state_type(type_id)
    };
    let outcome = container.borrow_mut().add_slot(type_id, parent, Box::new(value));
    drop(outcome.replaced);
    drop(outcome.evicted_sibling);

    if let Some(evicted_type) = outcome.evicted_sibling_type {
        let mut w = world.borrow_mut();
        let data = container.borrow();
        w.query_manager.on_trait_removed(evicted_type, ledger_id, &data);
    }

    let mut w = world.borrow_mut();
    let data = container.borrow();
    match outcome.kind {
        crate::container::SlotChange::Added => w.query_manager.on_trait_added(type_id, ledger_id, &data),
        crate::container::SlotChange::Changed => w.query_manager.on_trait_changed(type_id, ledger_id, &data),
    }

    outcome.evicted_sibling_type
}

pub(crate) fn raw_remove<T: 'static>(world: &Rc<RefCell<WorldInner>>, container: &Rc<RefCell<ContainerData>>, ledger_id: &EntityId) {
    let requested = TypeId::of::<T>();
    let removed = container.borrow_mut().remove_slot(requested);
    if let Some((actual_type, value)) = removed {
        drop(value);
        let mut w = world.borrow_mut();
        let data = container.borrow();
        w.query_manager.on_trait_removed(actual_type, ledger_id, &data);
    }
}

/// Change-tracked mutable view produced by [`Entity::get_mut`] /
/// [`ResourceBag::get_mut`]. Writes back to the container on drop and
/// emits *changed* only if the value actually differs from the value
/// observed when the guard was created.
pub struct TrackedMut<T: PartialEq + Clone + 'static> {
    before: T,
    current: T,
    type_id: TypeId,
    ledger_id: EntityId,
    container: Rc<RefCell<ContainerData>>,
    world: Weak<RefCell<WorldInner>>,
}

impl<T: PartialEq + Clone + 'static> Deref for TrackedMut<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.current
    }
}

impl<T: PartialEq + Clone + 'static> DerefMut for TrackedMut<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.current
    }
}

impl<T: PartialEq + Clone + 'static> Drop for TrackedMut<T> {
    fn drop(&mut self) {
        {
            let mut data = self.container.borrow_mut();
            if let Some(slot) = data.get_mut::<T>() {
                *slot = self.current.clone();
            }
        }
        if self.current != self.before {
            if let Some(world) = self.world.upgrade() {
                let mut w = world.borrow_mut();
                let data = self.container.borrow();
                w.query_manager.on_trait_changed(self.type_id, &self.ledger_id, &data);
            }
        }
    }
}

/// Handle returned by [`ResourceBag::on_update`]; drop or call
/// `unsubscribe` to stop receiving callbacks.
pub struct Unsubscribe {
    alive: Rc<Cell<bool>>,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        self.alive.set(false);
    }
}

/// The world's singleton container. Shares the entity container
/// contract, plus per-type update hooks.
#[derive(Clone)]
pub struct ResourceBag {
    world: Weak<RefCell<WorldInner>>,
}

impl ResourceBag {
    fn world_rc(&self) -> Rc<RefCell<WorldInner>> {
        self.world.upgrade().expect("resource bag's world has been dropped")
    }

    fn container(&self) -> Rc<RefCell<ContainerData>> {
        self.world_rc().borrow().resources.clone()
    }

    pub fn add<T: Default + 'static>(&self, patch: impl FnOnce(&mut T)) {
        let mut value = T::default();
        patch(&mut value);
        self.add_new(value);
    }

    pub fn add_new<T: 'static>(&self, value: T) {
        let world = self.world_rc();
        let container = self.container();
        let evicted = raw_add(&world, &container, &resource_ledger_id(), value);
        if let Some(evicted_type) = evicted {
            self.fire_hooks(evicted_type);
        }
        self.fire_hooks(TypeId::of::<T>());
    }

    /// Invoke `f(self, ...)`; a convenience hook for composing several
    /// `add`/`add_new` calls under one name, mirroring
    /// [`Entity::add_bundle`].
    pub fn add_bundle<Args>(&self, f: impl FnOnce(&ResourceBag, Args), args: Args) {
        f(self, args);
    }

    pub fn remove<T: 'static>(&self) {
        let world = self.world_rc();
        let container = self.container();
        raw_remove::<T>(&world, &container, &resource_ledger_id());
        self.fire_hooks(TypeId::of::<T>());
    }

    pub fn get<T: Clone + 'static>(&self) -> Result<T, MissingTraitError> {
        let data = self.container();
        let data = data.borrow();
        data.get::<T>()
            .cloned()
            .ok_or_else(|| MissingTraitError::new::<T>(data.to_string()))
    }

    pub fn try_get<T: Clone + 'static>(&self) -> Option<T> {
        self.container().borrow().get::<T>().cloned()
    }

    pub fn get_mut<T: PartialEq + Clone + 'static>(&self) -> Result<TrackedMut<T>, MissingTraitError> {
        let world = self.world_rc();
        let container = self.container();
        let before = {
            let data = container.borrow();
            data.get::<T>()
                .cloned()
                .ok_or_else(|| MissingTraitError::new::<T>(data.to_string()))?
        };
        Ok(TrackedMut {
            current: before.clone(),
            before,
            type_id: TypeId::of::<T>(),
            ledger_id: resource_ledger_id(),
            container,
            world: Rc::downgrade(&world),
        })
    }

    pub fn has<T: 'static>(&self) -> bool {
        self.container().borrow().has::<T>()
    }

    pub fn has_all(&self, ids: &[TypeId]) -> bool {
        self.container().borrow().has_all(ids)
    }

    pub fn has_any(&self, ids: &[TypeId]) -> bool {
        self.container().borrow().has_any(ids)
    }

    pub fn traits(&self) -> Vec<TypeId> {
        self.container().borrow().traits().collect()
    }

    pub fn clear(&self) {
        self.container().borrow_mut().clear();
    }

    /// Evaluate a requested-data tuple plus extra filters against the
    /// resource bag right now, returning the matching tuple or `None`.
    /// Unlike [`World::query`], this isn't a standing incremental view:
    /// there's exactly one resource container to check, so re-running
    /// this each time it's needed is simpler than maintaining a ledger
    /// nobody else observes.
    pub fn query<Q: QueryTuple>(&self, filters: Vec<Box<dyn Filter>>) -> Option<Q::Item> {
        let mut members = vec![Box::new(Q::compiled_filter()) as Box<dyn Filter>];
        members.extend(filters);
        let filter: Box<dyn Filter> = Box::new(crate::filter::AllFilter::new(members));

        let data = self.container();
        let data = data.borrow();
        let ledger = Ledger::default();
        let ctx = MatchContext { container: &data, ledger: &ledger, initial: true };
        filter.matches(&ctx).then(|| Q::extract(&data))
    }

    /// Subscribe to add/remove/change notifications for `T`.
    pub fn on_update<T: 'static>(&self, callback: impl Fn(&ContainerData) + 'static) -> Unsubscribe {
        let alive = Rc::new(Cell::new(true));
        let world = self.world_rc();
        world
            .borrow_mut()
            .resource_hooks
            .entry(TypeId::of::<T>())
            .or_default()
            .push((alive.clone(), Rc::new(callback)));
        Unsubscribe { alive }
    }

    fn fire_hooks(&self, type_id: TypeId) {
        let world = self.world_rc();
        let hooks: Vec<Rc<dyn Fn(&ContainerData)>> = {
            let mut w = world.borrow_mut();
            match w.resource_hooks.get_mut(&type_id) {
                Some(list) => {
                    list.retain(|(alive, _)| alive.get());
                    list.iter().map(|(_, cb)| cb.clone()).collect()
                }
                None => Vec::new(),
            }
        };
        let data = self.container();
        let data = data.borrow();
        for hook in hooks {
            hook(&data);
        }
    }
}
