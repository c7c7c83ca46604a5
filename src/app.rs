//! Top-level application: one [`World`], a name-keyed set of lazily
//! created [`Scheduler`] groups, and a [`PluginManager`].

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;

use crate::error::PluginInitError;
use crate::plugin::{OnInit, PluginManager};
use crate::scheduler::Scheduler;
use crate::world::World;

/// Name-keyed map of [`Scheduler`]s, all bound to the same world.
///
/// Groups are created on first access through [`get_or_create`]; the
/// backing map is private so nothing outside this module can replace
/// or remove an existing group out from under a running app.
pub struct SchedulerGroups {
    world: World,
    groups: RefCell<HashMap<String, Scheduler>>,
}

impl SchedulerGroups {
    pub fn new(world: World) -> Self {
        Self { world, groups: RefCell::new(HashMap::new()) }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Borrow the named group, creating it with no members if it
    /// doesn't exist yet.
    pub fn get_or_create(&self, name: &str) -> RefMut<'_, Scheduler> {
        if !self.groups.borrow().contains_key(name) {
            let scheduler = Scheduler::new(name, self.world.clone());
            self.groups.borrow_mut().insert(name.to_string(), scheduler);
        }
        RefMut::map(self.groups.borrow_mut(), |groups| {
            groups.get_mut(name).expect("just inserted above")
        })
    }

    /// Borrow the named group if it's already been created.
    pub fn get(&self, name: &str) -> Option<Ref<'_, Scheduler>> {
        if !self.groups.borrow().contains_key(name) {
            return None;
        }
        Some(Ref::map(self.groups.borrow(), |groups| &groups[name]))
    }

    /// Compile and run every group that currently exists, in no
    /// particular order relative to each other (groups are independent
    /// schedules by construction).
    pub fn run_all(&self) {
        for scheduler in self.groups.borrow_mut().values_mut() {
            scheduler.run();
        }
    }
}

/// Binds a [`World`] to its scheduler groups and plugin lifecycle.
pub struct GameApp {
    world: World,
    groups: SchedulerGroups,
    plugins: PluginManager,
}

impl GameApp {
    pub fn new() -> Self {
        let world = World::new();
        Self { groups: SchedulerGroups::new(world.clone()), world, plugins: PluginManager::new() }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn groups(&self) -> &SchedulerGroups {
        &self.groups
    }

    /// Queue a plugin function; its `on_init` hooks run on [`init`](Self::init).
    pub fn add_plugin(&mut self, plugin: impl Fn(&mut OnInit, &SchedulerGroups) + 'static) -> &mut Self {
        self.plugins.add(plugin);
        self
    }

    /// Run every registered plugin's init hooks in dependency order.
    pub fn init(&mut self) -> Result<(), PluginInitError> {
        self.plugins.init(&self.groups)
    }

    /// Run every registered plugin's cleanup, in reverse order.
    pub fn stop(&mut self) {
        self.plugins.stop();
    }

    /// Run one tick of every scheduler group.
    pub fn run(&self) {
        self.groups.run_all();
    }
}

impl Default for GameApp {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Has;
    use crate::system::SystemBuilder;

    #[derive(Default, Clone)]
    struct Position;

    #[test]
    fn groups_are_created_lazily_and_reused() {
        let app = GameApp::new();
        assert!(app.groups().get("update").is_none());
        app.groups().get_or_create("update");
        assert!(app.groups().get("update").is_some());
    }

    #[test]
    fn plugin_hooks_can_register_systems_into_a_group() {
        let mut app = GameApp::new();
        app.world().spawn().add_new(Position).unwrap();

        app.add_plugin(|on_init, _groups| {
            on_init.register(
                |groups| {
                    let world = groups.world().clone();
                    let template = SystemBuilder::new()
                        .label("tag")
                        .query::<(Has<Position>,)>("subjects", vec![])
                        .callback(|_ctx, _cmds| {})
                        .build()
                        .expect("callback was provided");
                    let handle = world.add_system(template);
                    groups.get_or_create("update").add(handle);
                    Ok(None)
                },
                Some("register-tag-system"),
                vec![],
            );
        });

        app.init().unwrap();
        app.groups().get_or_create("update").compile().unwrap();
        app.run();
    }

    #[test]
    fn stop_runs_plugin_cleanup() {
        use std::cell::Cell;
        use std::rc::Rc;

        let mut app = GameApp::new();
        let cleaned = Rc::new(Cell::new(false));
        let cleaned_hook = cleaned.clone();
        app.add_plugin(move |on_init, _groups| {
            let cleaned_hook = cleaned_hook.clone();
            on_init.register(
                move |_groups| Ok(Some(Box::new(move || cleaned_hook.set(true)) as _)),
                Some("noop"),
                vec![],
            );
        });

        app.init().unwrap();
        assert!(!cleaned.get());
        app.stop();
        assert!(cleaned.get());
    }
}
