//! Nominal identity and declared metadata for trait types.
//!
//! A "trait" in the vocabulary of this crate is a typed attribute attached
//! to a container: a component, a resource, or an event. Rust already
//! gives every type a stable [`TypeId`]; this module layers the
//! descriptor bookkeeping the source language expressed via class
//! decorators (state-trait parents, uniqueness) on top of that identity.

use std::any::{type_name, TypeId};
use std::collections::HashMap;

/// What role a trait type plays. Kept mostly for diagnostics; containers
/// don't branch on it, since components, resources, and events all use
/// the same slot machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraitKind {
    /// A per-entity attribute.
    Component,
    /// A world-singleton attribute, held in the resource bag.
    Resource,
    /// A payload dispatched through event queues rather than stored.
    Event,
}

/// User-declared facts about a trait type, keyed by its [`TypeId`].
#[derive(Debug, Clone, Default)]
pub struct TraitDescriptor {
    /// If this trait is a *state trait*, the type id of its parent state
    /// slot. Adding this trait also occupies the parent slot, evicting
    /// any previously-installed sibling.
    pub parent_state_type: Option<TypeId>,
    /// If set, at most one container across the whole world may hold
    /// this trait at a time; installing it elsewhere evicts the
    /// previous holder.
    pub is_unique: bool,
}

/// Registry of [`TraitDescriptor`]s, owned by a [`World`](crate::World).
///
/// Registration is explicit rather than implicit-on-first-use: Rust has
/// no inheritance-with-decorators mechanism to piggyback on, so a
/// descriptor must be registered (via `World::register_state` /
/// `World::register_unique`) before it affects `add`/`remove` semantics.
/// Looking up an unregistered type simply returns the default
/// descriptor (no parent, not unique).
#[derive(Debug, Default)]
pub struct TraitRegistry {
    descriptors: HashMap<TypeId, TraitDescriptor>,
    names: HashMap<TypeId, &'static str>,
}

impl TraitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `Child` is a state trait whose parent slot is `Parent`.
    pub fn register_state<Child: 'static, Parent: 'static>(&mut self) {
        self.name::<Child>();
        self.name::<Parent>();
        self.descriptors.entry(TypeId::of::<Child>()).or_default().parent_state_type =
            Some(TypeId::of::<Parent>());
    }

    /// Declare that `T` may only be held by one container at a time.
    pub fn register_unique<T: 'static>(&mut self) {
        self.name::<T>();
        self.descriptors.entry(TypeId::of::<T>()).or_default().is_unique = true;
    }

    fn name<T: 'static>(&mut self) {
        self.names.entry(TypeId::of::<T>()).or_insert_with(type_name::<T>);
    }

    /// Look up the descriptor for `id`, defaulting to "no parent, not unique".
    pub fn descriptor(&self, id: TypeId) -> TraitDescriptor {
        self.descriptors.get(&id).cloned().unwrap_or_default()
    }

    pub fn parent_state_type(&self, id: TypeId) -> Option<TypeId> {
        self.descriptors.get(&id).and_then(|d| d.parent_state_type)
    }

    pub fn is_unique(&self, id: TypeId) -> bool {
        self.descriptors.get(&id).map(|d| d.is_unique).unwrap_or(false)
    }

    /// Best-effort human-readable name for a registered type, falling
    /// back to `"<unknown trait>"` for types nobody ever registered or
    /// named via `register_state`/`register_unique`.
    pub fn name_of(&self, id: TypeId) -> &'static str {
        self.names.get(&id).copied().unwrap_or("<unknown trait>")
    }

    /// Record a human name for `T` without declaring any descriptor.
    /// Called by containers the first time a type is added so
    /// diagnostics have a name even for traits nobody registered.
    pub fn observe<T: 'static>(&mut self) {
        self.name::<T>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Health(i32);
    struct Stunned;
    struct Dazed;

    #[test]
    fn default_descriptor_is_empty() {
        let reg = TraitRegistry::new();
        assert!(reg.descriptor(TypeId::of::<Health>()).parent_state_type.is_none());
        assert!(!reg.is_unique(TypeId::of::<Health>()));
    }

    #[test]
    fn state_trait_links_to_parent() {
        let mut reg = TraitRegistry::new();
        reg.register_state::<Stunned, Dazed>();
        assert_eq!(
            reg.parent_state_type(TypeId::of::<Stunned>()),
            Some(TypeId::of::<Dazed>())
        );
    }
}
