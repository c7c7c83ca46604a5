//! Plugin registration and dependency-ordered init/cleanup.
//!
//! A plugin is a plain function that receives an [`OnInit`] handle and
//! the app's scheduler groups; it calls `on_init.register(..)` zero or
//! more times to queue hooks. [`PluginManager::init`] runs every
//! queued hook exactly once, in dependency order, synchronously (see
//! DESIGN.md for why plugin hooks stay synchronous rather than async).

use std::error::Error;

use crate::app::SchedulerGroups;
use crate::error::{MissingDependenciesError, PluginInitError};

fn auto_label() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("plugin-hook-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Returned from a successful init hook to register teardown, run in
/// reverse order on [`PluginManager::stop`].
pub type CleanupFn = Box<dyn FnOnce()>;

type InitHook = Box<dyn FnOnce(&SchedulerGroups) -> Result<Option<CleanupFn>, Box<dyn Error>>>;

struct HookSpec {
    name: String,
    deps: Vec<String>,
    hook: InitHook,
}

/// Passed to a plugin function so it can queue init hooks.
pub struct OnInit<'a> {
    pending: &'a mut Vec<HookSpec>,
}

impl<'a> OnInit<'a> {
    /// Register an init hook. `name` defaults to an auto-generated
    /// token if omitted; `deps` names hooks (by `name`) that must run
    /// first.
    pub fn register(
        &mut self,
        hook: impl FnOnce(&SchedulerGroups) -> Result<Option<CleanupFn>, Box<dyn Error>> + 'static,
        name: Option<&str>,
        deps: Vec<String>,
    ) {
        self.pending.push(HookSpec {
            name: name.map(str::to_string).unwrap_or_else(auto_label),
            deps,
            hook: Box::new(hook),
        });
    }
}

type PluginFn = Box<dyn Fn(&mut OnInit, &SchedulerGroups)>;

/// Collects plugin functions, then initializes and tears down their
/// registered hooks in dependency order.
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<PluginFn>,
    cleanups: Vec<(String, CleanupFn)>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, plugin: impl Fn(&mut OnInit, &SchedulerGroups) + 'static) {
        self.plugins.push(Box::new(plugin));
    }

    /// Run every registered plugin function to collect its hooks, sort
    /// all collected hooks by `(name, deps)`, then run them in that
    /// order. Aborts on the first hook that returns `Err`; hooks that
    /// already ran are *not* automatically cleaned up (symmetric with
    /// a startup that crashed before `stop()` was ever reachable) — the
    /// caller may still call `stop()` explicitly to unwind them.
    pub fn init(&mut self, groups: &SchedulerGroups) -> Result<(), PluginInitError> {
        let mut pending = Vec::new();
        for plugin in &self.plugins {
            let mut on_init = OnInit { pending: &mut pending };
            plugin(&mut on_init, groups);
        }

        let order = sort_hooks(&pending).map_err(|e| PluginInitError {
            plugin: "<init>".to_string(),
            source: Box::new(e),
        })?;

        let mut slots: Vec<Option<HookSpec>> = pending.into_iter().map(Some).collect();
        for idx in order {
            let spec = slots[idx].take().expect("each hook runs at most once");
            match (spec.hook)(groups) {
                Ok(Some(cleanup)) => self.cleanups.push((spec.name, cleanup)),
                Ok(None) => {}
                Err(source) => return Err(PluginInitError { plugin: spec.name, source }),
            }
        }
        Ok(())
    }

    /// Run every registered cleanup in reverse order, then forget them.
    pub fn stop(&mut self) {
        while let Some((_, cleanup)) = self.cleanups.pop() {
            cleanup();
        }
    }
}

/// Topological sort by `(name, deps)`, ties broken by insertion order.
/// Unlike the scheduler's `compile_order`, there's no priority or
/// `before` side: a plugin hook only ever declares what it waits on.
fn sort_hooks(specs: &[HookSpec]) -> Result<Vec<usize>, MissingDependenciesError> {
    use std::collections::HashSet;

    let prereqs: Vec<HashSet<String>> = specs.iter().map(|s| s.deps.iter().cloned().collect()).collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut order = Vec::with_capacity(specs.len());
    let mut remaining: Vec<usize> = (0..specs.len()).collect();

    while !remaining.is_empty() {
        let ready: Vec<usize> = remaining.iter().copied().filter(|&i| prereqs[i].is_subset(&placed)).collect();

        if ready.is_empty() {
            let blocked = remaining
                .iter()
                .map(|&i| {
                    let unmet: Vec<String> =
                        prereqs[i].iter().filter(|d| !placed.contains(*d)).cloned().collect();
                    (specs[i].name.clone(), unmet)
                })
                .collect();
            return Err(MissingDependenciesError(blocked));
        }

        for &i in &ready {
            placed.insert(specs[i].name.clone());
            order.push(i);
        }
        let just_placed: HashSet<usize> = ready.into_iter().collect();
        remaining.retain(|i| !just_placed.contains(i));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::World;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn hooks_run_in_dependency_order() {
        let groups = SchedulerGroups::new(World::new());
        let mut manager = PluginManager::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        let order_a = order.clone();
        manager.add(move |on_init, _groups| {
            on_init.register(
                move |_groups| {
                    order_a.borrow_mut().push("a");
                    Ok(None)
                },
                Some("a"),
                vec!["b".to_string()],
            );
        });
        let order_b = order.clone();
        manager.add(move |on_init, _groups| {
            on_init.register(
                move |_groups| {
                    order_b.borrow_mut().push("b");
                    Ok(None)
                },
                Some("b"),
                vec![],
            );
        });

        manager.init(&groups).unwrap();
        assert_eq!(*order.borrow(), vec!["b", "a"]);
    }

    #[test]
    fn unresolved_dependency_fails_init() {
        let groups = SchedulerGroups::new(World::new());
        let mut manager = PluginManager::new();
        manager.add(|on_init, _groups| {
            on_init.register(|_groups| Ok(None), Some("only"), vec!["ghost".to_string()]);
        });
        assert!(manager.init(&groups).is_err());
    }

    #[test]
    fn cleanups_run_in_reverse_order_on_stop() {
        let groups = SchedulerGroups::new(World::new());
        let mut manager = PluginManager::new();
        let order = Rc::new(RefCell::new(Vec::new()));

        for label in ["first", "second"] {
            let order = order.clone();
            manager.add(move |on_init, _groups| {
                let order = order.clone();
                on_init.register(
                    move |_groups| {
                        let order_on_stop = order.clone();
                        Ok(Some(Box::new(move || order_on_stop.borrow_mut().push(label)) as CleanupFn))
                    },
                    Some(label),
                    vec![],
                );
            });
        }

        manager.init(&groups).unwrap();
        manager.stop();
        assert_eq!(*order.borrow(), vec!["second", "first"]);
    }

    #[test]
    fn init_failure_leaves_earlier_cleanups_unrun() {
        let groups = SchedulerGroups::new(World::new());
        let mut manager = PluginManager::new();
        let cleaned = Rc::new(RefCell::new(false));

        let cleaned_inner = cleaned.clone();
        manager.add(move |on_init, _groups| {
            let cleaned_inner = cleaned_inner.clone();
            on_init.register(
                move |_groups| Ok(Some(Box::new(move || *cleaned_inner.borrow_mut() = true) as CleanupFn)),
                Some("first"),
                vec![],
            );
        });
        manager.add(|on_init, _groups| {
            on_init.register(
                |_groups| Err("boom".into()),
                Some("second"),
                vec!["first".to_string()],
            );
        });

        assert!(manager.init(&groups).is_err());
        assert!(!*cleaned.borrow());
    }
}
