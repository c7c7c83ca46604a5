// Copyright 2019 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! weave is a dynamically-typed entity-trait store plus a labelled
//! system scheduler. Where a classic ECS fixes its component set at
//! compile time, weave's containers hold traits keyed by `TypeId` at
//! runtime, and queries/filters are assembled from trait objects rather
//! than generic tuples baked in ahead of time.
//!
//! A [`World`] owns entities (each an [`Entity`] handle over a trait
//! container) and a singleton resource bag. [`Query`] and the
//! `filter` module's `Present`/`Added`/`Changed`/`Removed` vocabulary
//! answer "which entities currently match" against a world that keeps
//! rolling added/changed/removed bookkeeping between resets.
//!
//! On top of the world, [`system`] binds named, typed queries and event
//! queues to a callback that only runs when everything it declared is
//! non-empty, and [`scheduler`] orders those systems (and nested
//! system sets) by label, priority, and `after`/`before` dependencies.
//! [`app`] ties a world, its scheduler groups, and a [`plugin`] init/
//! cleanup lifecycle together into one [`app::GameApp`].
//!
//! ```
//! use weave::{World, Query};
//! use weave::query::Has;
//!
//! #[derive(Clone)]
//! struct Position(f32);
//!
//! let world = World::new();
//! let e = world.spawn();
//! e.add_new(Position(0.0)).unwrap();
//!
//! let query: Query<(Has<Position>,)> = world.query(vec![]);
//! assert_eq!(query.len(), 1);
//! ```

#![warn(missing_docs)]

mod app;
mod command;
mod container;
mod error;
mod events;
mod filter;
mod id;
mod plugin;
pub mod query;
mod scheduler;
mod system;
mod trait_meta;
mod world;

pub use app::{GameApp, SchedulerGroups};
pub use command::{Commands, EntityCommands};
pub use error::{
    EmptyQueryError, MissingDependenciesError, MissingSystemCallbackError, MissingTraitError,
    NoSuchEntityError, PluginInitError,
};
pub use events::{EventDispatcher, EventQueue};
pub use filter::{
    added_or_changed, changed_or_removed, AddedFilter, AllFilter, AnyFilter, ChangedFilter, Filter,
    MatchContext, NotAddedFilter, NotChangedFilter, NotPresentFilter, PresentFilter, RemovedFilter,
};
pub use plugin::{CleanupFn, OnInit, PluginManager};
pub use query::{Has, Maybe, Query, QueryTerm, QueryTuple};
pub use scheduler::{component_filter, resource_filter, resource_present, Scheduler, SystemLike, SystemSet};
pub use system::{SystemBuilder, SystemContext, SystemHandle, SystemTemplate};
pub use world::{Entity, ResourceBag, TrackedMut, Unsubscribe, World};

// Unstable implementation details, exposed for downstream crates that
// want to build their own trait-introspection tooling on top.
#[doc(hidden)]
pub use container::{AddOutcome, ContainerData, SlotChange};
#[doc(hidden)]
pub use id::{EntityId, IdGenerator, MonotonicIdGenerator};
#[doc(hidden)]
pub use trait_meta::{TraitDescriptor, TraitKind, TraitRegistry};
