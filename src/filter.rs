//! The filter vocabulary: present / not-present / added / changed /
//! removed / not-added / not-changed, plus `all`/`any` composition.
//!
//! Filters are trait objects rather than a generic tuple, mirroring the
//! dynamically-composed query builders elsewhere in the ECS ecosystem
//! (the teacher crate ships its own type-erased `DynamicFetch`/
//! `DynamicState` machinery downcasting through `Box<dyn Any>` for the
//! same reason: the set of traits a query cares about is a runtime
//! value, built up by calling `.added()`/`.and(..)` on trait handles,
//! not known until the call site assembles it).

use std::any::{type_name, TypeId};
use std::collections::HashSet;
use std::fmt;

use downcast_rs::{impl_downcast, Downcast};

use crate::container::ContainerData;

/// Per-container change bookkeeping a filter may consult.
///
/// Lives on [`QueryState`](crate::query::QueryState) and is rebuilt by
/// `on_trait_added`/`on_trait_changed`/`on_trait_removed` as described in
/// the query engine's contract; `matches` never mutates it.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    pub added: HashSet<TypeId>,
    pub changed: HashSet<TypeId>,
    pub removed: HashSet<TypeId>,
}

impl Ledger {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Everything a filter needs to decide whether a container currently
/// matches.
pub struct MatchContext<'a> {
    pub container: &'a ContainerData,
    pub ledger: &'a Ledger,
    /// True only during a query's first population pass.
    pub initial: bool,
}

/// A predicate over a container, plus the bookkeeping the query engine
/// needs to know which trait-change events it cares about.
pub trait Filter: fmt::Debug + Downcast {
    /// Trait types this filter can match against; used to build the
    /// manager's inverted index so a mutation only notifies interested
    /// queries.
    fn related_traits(&self) -> Vec<TypeId>;

    /// Subset of `related_traits` that, on add/change/remove, should
    /// cause a re-evaluation (added/changed/removed/not_added/not_changed
    /// filters all track; present/not_present never do).
    fn tracking_traits(&self) -> Vec<TypeId> {
        Vec::new()
    }

    /// Whether this filter matches on *absence*: such filters must also
    /// be notified when a brand-new container appears, since no
    /// `on_trait_added` event will ever fire for a trait that's never
    /// installed.
    fn is_absence(&self) -> bool {
        false
    }

    fn matches(&self, ctx: &MatchContext<'_>) -> bool;
}

impl_downcast!(Filter);

macro_rules! simple_filter {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        pub struct $name {
            pub(crate) id: TypeId,
            pub(crate) name: &'static str,
        }

        impl $name {
            pub fn of<T: 'static>() -> Self {
                Self {
                    id: TypeId::of::<T>(),
                    name: type_name::<T>(),
                }
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.name)
            }
        }
    };
}

simple_filter!(PresentFilter, "Matches containers that currently hold trait `T`.");
simple_filter!(NotPresentFilter, "Matches containers that do not currently hold trait `T`.");
simple_filter!(AddedFilter, "Matches containers where `T` was installed since the last reset.");
simple_filter!(NotAddedFilter, "Matches containers holding `T` that was *not* just added.");
simple_filter!(ChangedFilter, "Matches containers where `T` changed (added or replaced/mutated) since the last reset.");
simple_filter!(NotChangedFilter, "Matches containers holding `T` that did not just change.");
simple_filter!(RemovedFilter, "Matches containers where `T` was removed since the last reset.");

impl Filter for PresentFilter {
    fn related_traits(&self) -> Vec<TypeId> {
        vec![self.id]
    }
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        ctx.container.has_id(self.id)
    }
}

impl Filter for NotPresentFilter {
    fn related_traits(&self) -> Vec<TypeId> {
        vec![self.id]
    }
    fn is_absence(&self) -> bool {
        true
    }
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        !ctx.container.has_id(self.id)
    }
}

impl Filter for AddedFilter {
    fn related_traits(&self) -> Vec<TypeId> {
        vec![self.id]
    }
    fn tracking_traits(&self) -> Vec<TypeId> {
        vec![self.id]
    }
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        ctx.container.has_id(self.id) && (ctx.initial || ctx.ledger.added.contains(&self.id))
    }
}

impl Filter for NotAddedFilter {
    fn related_traits(&self) -> Vec<TypeId> {
        vec![self.id]
    }
    fn tracking_traits(&self) -> Vec<TypeId> {
        vec![self.id]
    }
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        ctx.container.has_id(self.id)
            && !(ctx.initial || ctx.ledger.added.contains(&self.id))
    }
}

impl Filter for ChangedFilter {
    fn related_traits(&self) -> Vec<TypeId> {
        vec![self.id]
    }
    fn tracking_traits(&self) -> Vec<TypeId> {
        vec![self.id]
    }
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        ctx.container.has_id(self.id)
            && (ctx.initial
                || (ctx.ledger.changed.contains(&self.id) && !ctx.ledger.added.contains(&self.id)))
    }
}

impl Filter for NotChangedFilter {
    fn related_traits(&self) -> Vec<TypeId> {
        vec![self.id]
    }
    fn tracking_traits(&self) -> Vec<TypeId> {
        vec![self.id]
    }
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        let changed = ctx.initial
            || (ctx.ledger.changed.contains(&self.id) && !ctx.ledger.added.contains(&self.id));
        ctx.container.has_id(self.id) && !changed
    }
}

impl Filter for RemovedFilter {
    fn related_traits(&self) -> Vec<TypeId> {
        vec![self.id]
    }
    fn tracking_traits(&self) -> Vec<TypeId> {
        vec![self.id]
    }
    fn is_absence(&self) -> bool {
        true
    }
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        !ctx.container.has_id(self.id) && ctx.ledger.removed.contains(&self.id)
    }
}

/// `AddedFilter` or `ChangedFilter`, whichever fires first.
pub fn added_or_changed<T: 'static>() -> AnyFilter {
    AnyFilter::new(vec![Box::new(AddedFilter::of::<T>()), Box::new(ChangedFilter::of::<T>())])
}

/// `ChangedFilter` or `RemovedFilter`, whichever fires first.
pub fn changed_or_removed<T: 'static>() -> AnyFilter {
    AnyFilter::new(vec![Box::new(ChangedFilter::of::<T>()), Box::new(RemovedFilter::of::<T>())])
}

/// Conjunction of filters, flattened on construction so that
/// `all![all![a, b], c]` and `all![a, b, c]` compile down to the same
/// flat list.
#[derive(Debug, Default)]
pub struct AllFilter {
    members: Vec<Box<dyn Filter>>,
}

impl AllFilter {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        let mut flat = Self::default();
        for f in filters {
            flat.and_boxed(f);
        }
        flat
    }

    pub fn and(mut self, filter: impl Filter) -> Self {
        self.and_boxed(Box::new(filter));
        self
    }

    fn and_boxed(&mut self, filter: Box<dyn Filter>) {
        match filter.downcast::<AllFilter>() {
            Ok(nested) => self.members.extend(nested.members),
            Err(filter) => self.members.push(filter),
        }
    }
}

impl Filter for AllFilter {
    fn related_traits(&self) -> Vec<TypeId> {
        self.members.iter().flat_map(|f| f.related_traits()).collect()
    }
    fn tracking_traits(&self) -> Vec<TypeId> {
        self.members.iter().flat_map(|f| f.tracking_traits()).collect()
    }
    fn is_absence(&self) -> bool {
        self.members.iter().any(|f| f.is_absence())
    }
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        self.members.iter().all(|f| f.matches(ctx))
    }
}

/// Disjunction of filters, flattened the same way as [`AllFilter`].
#[derive(Debug, Default)]
pub struct AnyFilter {
    members: Vec<Box<dyn Filter>>,
}

impl AnyFilter {
    pub fn new(filters: Vec<Box<dyn Filter>>) -> Self {
        let mut flat = Self::default();
        for f in filters {
            flat.or_boxed(f);
        }
        flat
    }

    pub fn or(mut self, filter: impl Filter) -> Self {
        self.or_boxed(Box::new(filter));
        self
    }

    fn or_boxed(&mut self, filter: Box<dyn Filter>) {
        match filter.downcast::<AnyFilter>() {
            Ok(nested) => self.members.extend(nested.members),
            Err(filter) => self.members.push(filter),
        }
    }
}

impl Filter for AnyFilter {
    fn related_traits(&self) -> Vec<TypeId> {
        self.members.iter().flat_map(|f| f.related_traits()).collect()
    }
    fn tracking_traits(&self) -> Vec<TypeId> {
        self.members.iter().flat_map(|f| f.tracking_traits()).collect()
    }
    fn is_absence(&self) -> bool {
        self.members.iter().any(|f| f.is_absence())
    }
    fn matches(&self, ctx: &MatchContext<'_>) -> bool {
        !self.members.is_empty() && self.members.iter().any(|f| f.matches(ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerData;

    struct Position;
    struct Velocity;

    fn ctx<'a>(container: &'a ContainerData, ledger: &'a Ledger, initial: bool) -> MatchContext<'a> {
        MatchContext { container, ledger, initial }
    }

    #[test]
    fn all_flattens_nested() {
        let filter = AllFilter::new(vec![
            Box::new(PresentFilter::of::<Position>()),
            Box::new(AllFilter::new(vec![Box::new(PresentFilter::of::<Velocity>())])),
        ]);
        assert_eq!(filter.related_traits().len(), 2);
    }

    #[test]
    fn added_requires_ledger_or_initial() {
        let mut container = ContainerData::new("e0");
        container.install::<Position>(Box::new(Position), true);
        let ledger = Ledger::default();
        let filter = AddedFilter::of::<Position>();
        assert!(!filter.matches(&ctx(&container, &ledger, false)));
        assert!(filter.matches(&ctx(&container, &ledger, true)));

        let mut ledger = Ledger::default();
        ledger.added.insert(TypeId::of::<Position>());
        assert!(filter.matches(&ctx(&container, &ledger, false)));
    }
}
