//! Typed FIFO event queues, dispatched by the world and drained by
//! systems that declared an interest in the event type.
//!
//! Mirrors the weak-handle lifecycle the query manager uses
//! ([`crate::query`]): a queue is held strongly by the system that
//! declared it and weakly by the world's dispatch table, so a dropped
//! system's queue silently stops receiving events instead of leaking.
//!
//! Event payloads must be `Clone`: a single `dispatch` call can fan out
//! to several independently-draining subscribers, so each needs its own
//! copy rather than shared ownership of one value.

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use hashbrown::HashMap;

struct Queue<E> {
    pending: RefCell<VecDeque<E>>,
}

/// Strong handle to one event queue, held by the system that declared
/// the event type.
pub struct EventQueue<E> {
    inner: Rc<Queue<E>>,
}

impl<E> Clone for EventQueue<E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<E: 'static> EventQueue<E> {
    fn new() -> Self {
        Self {
            inner: Rc::new(Queue { pending: RefCell::new(VecDeque::new()) }),
        }
    }

    fn downgrade(&self) -> Weak<Queue<E>> {
        Rc::downgrade(&self.inner)
    }

    /// True if no event is currently pending.
    pub fn is_empty(&self) -> bool {
        self.inner.pending.borrow().is_empty()
    }

    /// Drain every pending event into a snapshot list, leaving the
    /// queue empty for the next tick. Called once per system invocation
    /// so a second invocation in the same frame only sees events
    /// emitted since the first drain.
    pub fn drain(&self) -> Vec<E> {
        self.inner.pending.borrow_mut().drain(..).collect()
    }
}

/// Type-erased slot in the dispatch table: a closure that knows how to
/// downcast an incoming event, clone it, and push it into its queue if
/// that queue is still alive.
struct Subscriber {
    push: Box<dyn Fn(&dyn Any) -> bool>,
}

/// World-owned dispatcher: routes `dispatch`/`dispatch_new` calls to
/// every live queue subscribed to the event's type.
#[derive(Default)]
pub struct EventDispatcher {
    subscribers: HashMap<TypeId, Vec<Subscriber>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh queue for event type `E` and return the strong
    /// handle; the dispatcher itself only ever holds a weak reference,
    /// so a queue whose owning system is dropped stops receiving events
    /// without needing to be unregistered.
    pub fn declare<E: Clone + 'static>(&mut self) -> EventQueue<E> {
        let queue = EventQueue::<E>::new();
        let weak = queue.downgrade();
        let push = Box::new(move |event: &dyn Any| match weak.upgrade() {
            Some(inner) => {
                if let Some(event) = event.downcast_ref::<E>() {
                    inner.pending.borrow_mut().push_back(event.clone());
                }
                true
            }
            None => false,
        });
        self.subscribers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Subscriber { push });
        queue
    }

    /// Enqueue a clone of `event` into every live subscriber of type
    /// `E`, sweeping dead weak entries as it goes.
    pub fn dispatch<E: Clone + 'static>(&mut self, event: E) {
        let id = TypeId::of::<E>();
        let Some(subs) = self.subscribers.get_mut(&id) else { return };
        let boxed: Box<dyn Any> = Box::new(event);
        subs.retain(|sub| (sub.push)(boxed.as_ref()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Damage(i32);

    #[test]
    fn dispatch_reaches_live_queue() {
        let mut dispatcher = EventDispatcher::new();
        let queue = dispatcher.declare::<Damage>();
        dispatcher.dispatch(Damage(5));
        assert_eq!(queue.drain(), vec![Damage(5)]);
    }

    #[test]
    fn drain_empties_for_next_call() {
        let mut dispatcher = EventDispatcher::new();
        let queue = dispatcher.declare::<Damage>();
        dispatcher.dispatch(Damage(1));
        let _ = queue.drain();
        dispatcher.dispatch(Damage(2));
        assert_eq!(queue.drain(), vec![Damage(2)]);
    }

    #[test]
    fn dropped_queue_stops_receiving() {
        let mut dispatcher = EventDispatcher::new();
        let keep = dispatcher.declare::<Damage>();
        {
            let _drop_me = dispatcher.declare::<Damage>();
        }
        // the dropped handle's weak entry is swept on the next dispatch
        // rather than panicking or leaking; the live queue still gets the event
        dispatcher.dispatch(Damage(9));
        assert_eq!(keep.drain(), vec![Damage(9)]);
    }

    #[test]
    fn fans_out_to_multiple_subscribers() {
        let mut dispatcher = EventDispatcher::new();
        let a = dispatcher.declare::<Damage>();
        let b = dispatcher.declare::<Damage>();
        dispatcher.dispatch(Damage(3));
        assert_eq!(a.drain(), vec![Damage(3)]);
        assert_eq!(b.drain(), vec![Damage(3)]);
    }
}
