//! Slot storage shared by entities and the resource bag.
//!
//! A container is a `TypeId`-keyed map of `Box<dyn Any>` plus the
//! bookkeeping state traits need: a child trait occupies both its own
//! slot and its parent's, and adding a sibling evicts whoever was there
//! before. The container itself doesn't know about the trait registry
//! or change ledgers; `World` consults the registry to decide a trait's
//! parent before calling in here, and forwards the resulting
//! added/changed outcome to the query manager.

use std::any::{Any, TypeId};
use std::fmt;

use hashbrown::HashMap;

/// Whether an `add_slot` call occupied a previously-empty slot or
/// replaced an existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChange {
    Added,
    Changed,
}

/// Result of [`ContainerData::add_slot`].
pub struct AddOutcome {
    pub kind: SlotChange,
    /// The value that previously occupied this slot, if any (already
    /// unlinked from the container; dropping it is the caller's disposal).
    pub replaced: Option<Box<dyn Any>>,
    /// A sibling state trait evicted from the shared parent slot, if
    /// this add occupied a parent already held by a different child.
    pub evicted_sibling: Option<Box<dyn Any>>,
    /// The evicted sibling's own type id, paired with `evicted_sibling`.
    /// Callers need this to notify the query manager (and resource
    /// hooks) that the evicted type was removed.
    pub evicted_sibling_type: Option<TypeId>,
}

/// A `TypeId -> Box<dyn Any>` slot map, with parent-slot aliasing for
/// state traits layered on top.
///
/// Used for both entities and the world's resource bag; `label` is
/// purely for diagnostics (`Display`, error messages).
pub struct ContainerData {
    slots: HashMap<TypeId, Box<dyn Any>>,
    /// parent type -> the child type currently occupying that slot.
    state_slot_of: HashMap<TypeId, TypeId>,
    /// child type -> its parent type, kept so `remove_slot` can clear
    /// the parent entry without the registry being consulted again.
    child_parent: HashMap<TypeId, TypeId>,
    label: String,
}

impl ContainerData {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            slots: HashMap::new(),
            state_slot_of: HashMap::new(),
            child_parent: HashMap::new(),
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn has_id(&self, id: TypeId) -> bool {
        self.slots.contains_key(&id)
    }

    pub fn has<T: 'static>(&self) -> bool {
        self.has_id(TypeId::of::<T>())
    }

    pub fn has_all(&self, ids: &[TypeId]) -> bool {
        ids.iter().all(|id| self.has_id(*id))
    }

    pub fn has_any(&self, ids: &[TypeId]) -> bool {
        ids.iter().any(|id| self.has_id(*id))
    }

    /// Every occupied trait type. Parent-state aliases never appear
    /// here since they're never stored as slots in their own right.
    pub fn traits(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.slots.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.slots.get(&TypeId::of::<T>()).and_then(|b| b.downcast_ref())
    }

    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.slots.get_mut(&TypeId::of::<T>()).and_then(|b| b.downcast_mut())
    }

    /// Low-level insert under `T`'s own type id, bypassing parent
    /// aliasing. `initial` is reserved for callers that want to record
    /// whether this is a fresh-container population write; the slot map
    /// itself doesn't need it.
    pub fn install<T: 'static>(&mut self, value: Box<dyn Any>, initial: bool) -> bool {
        let _ = initial;
        self.slots.insert(TypeId::of::<T>(), value).is_some()
    }

    /// Occupy `id`'s slot with `value`. If `parent` is `Some`, also
    /// claims the shared parent slot, evicting whichever sibling child
    /// held it before (if different from `id`).
    pub fn add_slot(&mut self, id: TypeId, parent: Option<TypeId>, value: Box<dyn Any>) -> AddOutcome {
        let replaced = self.slots.insert(id, value);
        let mut evicted_sibling = None;
        let mut evicted_sibling_type = None;
        if let Some(parent_id) = parent {
            self.child_parent.insert(id, parent_id);
            if let Some(prev_child) = self.state_slot_of.insert(parent_id, id) {
                if prev_child != id {
                    evicted_sibling = self.slots.remove(&prev_child);
                    self.child_parent.remove(&prev_child);
                    evicted_sibling_type = Some(prev_child);
                }
            }
        }
        let kind = if replaced.is_some() {
            SlotChange::Changed
        } else {
            SlotChange::Added
        };
        AddOutcome { kind, replaced, evicted_sibling, evicted_sibling_type }
    }

    /// Remove `id`'s slot. If `id` is itself a parent state type with a
    /// child currently installed, removes that child instead (per the
    /// contract, removing the parent removes the current child too).
    /// Returns the type id that actually lost its slot (the child's,
    /// when removal was routed through a parent) alongside the disposed
    /// value. `None` if `id` isn't occupied either way.
    pub fn remove_slot(&mut self, id: TypeId) -> Option<(TypeId, Box<dyn Any>)> {
        if let Some(child_id) = self.state_slot_of.remove(&id) {
            self.child_parent.remove(&child_id);
            return self.slots.remove(&child_id).map(|v| (child_id, v));
        }
        let removed = self.slots.remove(&id);
        if let Some(parent_id) = self.child_parent.remove(&id) {
            self.state_slot_of.remove(&parent_id);
        }
        removed.map(|v| (id, v))
    }

    /// Dispose every trait and clear all slots. No events are emitted;
    /// callers that need removal notifications must walk `traits()`
    /// themselves before calling this.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.state_slot_of.clear();
        self.child_parent.clear();
    }
}

impl fmt::Debug for ContainerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContainerData")
            .field("label", &self.label)
            .field("traits", &self.slots.len())
            .finish()
    }
}

impl fmt::Display for ContainerData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stunned;
    struct Dazed;
    struct Health(i32);

    #[test]
    fn add_then_replace_is_changed() {
        let mut c = ContainerData::new("e0");
        let outcome = c.add_slot(TypeId::of::<Health>(), None, Box::new(Health(10)));
        assert_eq!(outcome.kind, SlotChange::Added);
        assert!(outcome.replaced.is_none());

        let outcome = c.add_slot(TypeId::of::<Health>(), None, Box::new(Health(5)));
        assert_eq!(outcome.kind, SlotChange::Changed);
        assert!(outcome.replaced.is_some());
    }

    #[test]
    fn sibling_state_traits_evict_each_other() {
        let mut c = ContainerData::new("e0");
        let parent = TypeId::of::<Dazed>();
        c.add_slot(TypeId::of::<Stunned>(), Some(parent), Box::new(Stunned));
        assert!(c.has::<Stunned>());

        struct Sleeping;
        let outcome = c.add_slot(TypeId::of::<Sleeping>(), Some(parent), Box::new(Sleeping));
        assert!(outcome.evicted_sibling.is_some());
        assert_eq!(outcome.evicted_sibling_type, Some(TypeId::of::<Stunned>()));
        assert!(!c.has::<Stunned>());
        assert!(c.has::<Sleeping>());
    }

    #[test]
    fn removing_parent_removes_current_child() {
        let mut c = ContainerData::new("e0");
        let parent = TypeId::of::<Dazed>();
        c.add_slot(TypeId::of::<Stunned>(), Some(parent), Box::new(Stunned));

        let removed = c.remove_slot(parent);
        assert!(removed.is_some());
        assert!(!c.has::<Stunned>());
    }

    #[test]
    fn clear_drops_everything() {
        let mut c = ContainerData::new("e0");
        c.add_slot(TypeId::of::<Health>(), None, Box::new(Health(1)));
        c.clear();
        assert_eq!(c.traits().count(), 0);
    }
}
