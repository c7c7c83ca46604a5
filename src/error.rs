//! Error types returned from the public API.
//!
//! Mirrors the teacher's small, `Display`-driven `ComponentError`/
//! `MissingComponent` pair, widened to `thiserror` derives because this
//! crate's error surface spans containers, queries, the scheduler, and
//! plugin init rather than just component access.

use std::any::type_name;

use thiserror::Error;

/// A container did not have a value installed in the requested slot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("container {container} has no `{trait_name}` trait")]
pub struct MissingTraitError {
    /// `Display` of the container that was queried.
    pub container: String,
    /// `type_name` of the trait that was missing.
    pub trait_name: &'static str,
}

impl MissingTraitError {
    /// Build an error naming trait `T` as missing from `container`.
    pub fn new<T: 'static>(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            trait_name: type_name::<T>(),
        }
    }
}

/// A container no longer exists (it was removed, or never existed).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("no such entity")]
pub struct NoSuchEntityError;

/// [`Query::get_one`](crate::query::Query::get_one) was called on a query
/// with no matching containers.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("query has no matching containers")]
pub struct EmptyQueryError;

/// Raised when compiling a [`SystemSet`](crate::scheduler::SystemSet) or
/// running [`PluginManager::init`](crate::plugin::PluginManager::init)
/// could not resolve every `before`/`after` (or plugin `deps`) label.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unresolved dependencies: {}", format_unresolved(.0))]
pub struct MissingDependenciesError(pub Vec<(String, Vec<String>)>);

fn format_unresolved(entries: &[(String, Vec<String>)]) -> String {
    entries
        .iter()
        .map(|(label, unmet)| format!("{label} waits on [{}]", unmet.join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// `World::add_system` was called without a usable callback.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("a system needs either a template or a callback")]
pub struct MissingSystemCallbackError;

/// A plugin's init hook returned an error, aborting `PluginManager::init`.
#[derive(Debug, Error)]
#[error("plugin `{plugin}` failed to initialize: {source}")]
pub struct PluginInitError {
    /// Name of the plugin whose hook failed.
    pub plugin: String,
    /// The underlying failure.
    #[source]
    pub source: Box<dyn std::error::Error + 'static>,
}
