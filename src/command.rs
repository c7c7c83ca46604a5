//! Deferred mutation. Systems receive a `Commands` handle instead of a
//! direct [`World`]; every call enqueues a closure that runs, in the
//! order the calls were made, after the system callback returns and
//! before its queries reset.
//!
//! `Commands::spawn` can't hand back a live [`Entity`] since nothing
//! exists yet — [`EntityCommands`] instead accumulates the new
//! entity's initial traits and folds them into a single deferred op
//! when it's dropped.

use crate::world::{Entity, World};

type Op = Box<dyn FnOnce(&World)>;

/// Accumulates deferred operations for one system invocation.
#[derive(Default)]
pub struct Commands {
    ops: Vec<Op>,
}

impl Commands {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Defer spawning a fresh entity. Chain `.add(..)` calls on the
    /// returned builder to give it initial traits; the spawn and every
    /// chained `add` happen together, in order, at flush time.
    pub fn spawn(&mut self) -> EntityCommands<'_> {
        EntityCommands { commands: self, inits: Vec::new() }
    }

    /// Defer removing an already-live entity.
    pub fn remove(&mut self, entity: Entity) {
        self.ops.push(Box::new(move |world: &World| {
            world.remove(&entity);
        }));
    }

    /// Defer default-constructing, patching, and installing resource `T`.
    pub fn add_resource<T: Default + 'static>(&mut self, patch: impl FnOnce(&mut T) + 'static) {
        self.ops.push(Box::new(move |world: &World| {
            world.resources().add(patch);
        }));
    }

    /// Defer installing an already-constructed resource.
    pub fn add_new_resource<T: 'static>(&mut self, value: T) {
        self.ops.push(Box::new(move |world: &World| {
            world.resources().add_new(value);
        }));
    }

    pub fn remove_resource<T: 'static>(&mut self) {
        self.ops.push(Box::new(|world: &World| {
            world.resources().remove::<T>();
        }));
    }

    /// Defer default-constructing, patching, and dispatching event `E`.
    pub fn emit<E: Default + Clone + 'static>(&mut self, patch: impl FnOnce(&mut E) + 'static) {
        self.ops.push(Box::new(move |world: &World| {
            let mut event = E::default();
            patch(&mut event);
            world.dispatch(event);
        }));
    }

    /// Defer dispatching an already-constructed event.
    pub fn emit_new<E: Clone + 'static>(&mut self, event: E) {
        self.ops.push(Box::new(move |world: &World| {
            world.dispatch(event);
        }));
    }

    /// Run every enqueued op against `world`, in insertion order.
    pub(crate) fn flush(self, world: &World) {
        for op in self.ops {
            op(world);
        }
    }
}

/// Builder handle for a deferred spawn, e.g.
/// `commands.spawn().add(Position::default()).add(Velocity::default())`.
///
/// Traits are accumulated here rather than applied immediately since
/// the entity itself doesn't exist until the owning [`Commands`] flushes;
/// the spawn and every queued `add` are folded into one op on `Drop`.
pub struct EntityCommands<'a> {
    commands: &'a mut Commands,
    inits: Vec<Box<dyn FnOnce(&Entity)>>,
}

impl<'a> EntityCommands<'a> {
    /// Queue installing `value` on the entity once it's spawned.
    pub fn add<T: 'static>(mut self, value: T) -> Self {
        self.inits.push(Box::new(move |entity: &Entity| {
            let _ = entity.add_new(value);
        }));
        self
    }
}

impl<'a> Drop for EntityCommands<'a> {
    fn drop(&mut self) {
        let inits = std::mem::take(&mut self.inits);
        self.commands.ops.push(Box::new(move |world: &World| {
            let entity = world.spawn();
            for init in inits {
                init(&entity);
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Clone, PartialEq)]
    struct Position(i32);

    #[derive(Default, Clone)]
    struct Health(i32);

    #[test]
    fn spawn_is_deferred_until_flush() {
        let world = World::new();
        let mut commands = Commands::new();
        commands.spawn().add(Position(1));
        assert_eq!(world.query::<()>(vec![]).len(), 0);
        commands.flush(&world);
        assert_eq!(world.query::<()>(vec![]).len(), 1);
    }

    #[test]
    fn remove_is_deferred_until_flush() {
        let world = World::new();
        let entity = world.spawn();
        entity.add_new(Position(0)).unwrap();

        let mut commands = Commands::new();
        commands.remove(entity.clone());
        assert!(entity.has::<Position>());
        commands.flush(&world);
        assert!(!entity.has::<Position>());
    }

    #[test]
    fn resource_commands_apply_on_flush() {
        let world = World::new();
        let mut commands = Commands::new();
        commands.add_new_resource(Health(10));
        assert!(!world.resources().has::<Health>());
        commands.flush(&world);
        assert!(world.resources().has::<Health>());

        let mut commands = Commands::new();
        commands.remove_resource::<Health>();
        commands.flush(&world);
        assert!(!world.resources().has::<Health>());
    }

    #[test]
    fn emit_with_no_subscribers_is_a_harmless_noop() {
        #[derive(Debug, Clone, PartialEq)]
        struct Hit(i32);

        let world = World::new();
        let mut commands = Commands::new();
        commands.emit_new(Hit(7));
        commands.flush(&world);
    }

    #[test]
    fn ops_run_in_insertion_order() {
        let world = World::new();
        let entity = world.spawn();
        entity.add_new(Position(0)).unwrap();

        let mut commands = Commands::new();
        commands.remove(entity.clone());
        commands.spawn().add(Position(5));
        commands.flush(&world);

        assert!(!entity.has::<Position>());
        assert_eq!(world.query::<()>(vec![]).len(), 1);
    }
}
