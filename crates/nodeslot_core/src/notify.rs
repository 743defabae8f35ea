//! Synchronous notification bus.
//!
//! # Responsibility
//! - Register observers per `(sender, name)` or per name only.
//! - Deliver posts synchronously, in registration order.
//!
//! # Invariants
//! - Matching handlers are snapshotted before dispatch; observers added or
//!   removed by a handler take effect from the next post.
//! - No borrow of the observer list is held while a handler runs.

use crate::graph::NodeId;
use crate::model::value::SlotValue;
use log::trace;
use std::cell::RefCell;
use std::rc::Rc;

/// Posted after a slot value changed; payload `{slot, old, new}`.
pub const DID_UPDATE_SLOT: &str = "didUpdateSlot";
/// Posted after a node's subnode list changed; payload is the subnode count.
pub const DID_CHANGE_SUBNODE_LIST: &str = "didChangeSubnodeList";

/// One delivered notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub sender: NodeId,
    pub name: String,
    pub payload: Option<SlotValue>,
}

/// Registration handle returned by `observe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

type Handler = Rc<dyn Fn(&Notification)>;

struct Observer {
    id: ObserverId,
    sender: Option<NodeId>,
    name: String,
    handler: Handler,
}

#[derive(Default)]
struct BusState {
    next_id: u64,
    observers: Vec<Observer>,
}

/// Cheaply clonable handle to one observer list.
#[derive(Clone, Default)]
pub struct NotificationBus {
    state: Rc<RefCell<BusState>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observes `name` posted by `sender`.
    pub fn observe<F>(&self, sender: NodeId, name: &str, handler: F) -> ObserverId
    where
        F: Fn(&Notification) + 'static,
    {
        self.register(Some(sender), name, Rc::new(handler))
    }

    /// Observes `name` from any sender.
    pub fn observe_any<F>(&self, name: &str, handler: F) -> ObserverId
    where
        F: Fn(&Notification) + 'static,
    {
        self.register(None, name, Rc::new(handler))
    }

    /// Removes one registration. Returns `false` when it was already gone.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut state = self.state.borrow_mut();
        let before = state.observers.len();
        state.observers.retain(|observer| observer.id != id);
        state.observers.len() != before
    }

    /// Removes every registration bound to `sender`.
    pub fn unobserve_sender(&self, sender: NodeId) -> usize {
        let mut state = self.state.borrow_mut();
        let before = state.observers.len();
        state
            .observers
            .retain(|observer| observer.sender != Some(sender));
        before - state.observers.len()
    }

    /// Delivers a notification and returns how many handlers ran.
    pub fn post(&self, sender: NodeId, name: &str, payload: Option<SlotValue>) -> usize {
        let handlers: Vec<Handler> = self
            .state
            .borrow()
            .observers
            .iter()
            .filter(|observer| {
                observer.name == name && observer.sender.map_or(true, |s| s == sender)
            })
            .map(|observer| Rc::clone(&observer.handler))
            .collect();
        if handlers.is_empty() {
            return 0;
        }

        trace!(
            "event=notify_post module=notify sender={} name={} observers={}",
            sender,
            name,
            handlers.len()
        );
        let notification = Notification {
            sender,
            name: name.to_string(),
            payload,
        };
        for handler in &handlers {
            handler(&notification);
        }
        handlers.len()
    }

    pub fn observer_count(&self) -> usize {
        self.state.borrow().observers.len()
    }

    /// Whether any registration would receive `name` from `sender`.
    pub fn has_observers(&self, sender: NodeId, name: &str) -> bool {
        self.state.borrow().observers.iter().any(|observer| {
            observer.name == name && observer.sender.map_or(true, |s| s == sender)
        })
    }

    fn register(&self, sender: Option<NodeId>, name: &str, handler: Handler) -> ObserverId {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = ObserverId(state.next_id);
        state.observers.push(Observer {
            id,
            sender,
            name: name.to_string(),
            handler,
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::NotificationBus;
    use crate::graph::NodeId;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn sender_filter_limits_delivery() {
        let bus = NotificationBus::new();
        let a = NodeId::new(0, 0);
        let b = NodeId::new(1, 0);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let log = Rc::clone(&seen);
        bus.observe(a, "ping", move |note| log.borrow_mut().push(note.sender));
        let log = Rc::clone(&seen);
        bus.observe_any("ping", move |note| log.borrow_mut().push(note.sender));

        assert_eq!(bus.post(a, "ping", None), 2);
        assert_eq!(bus.post(b, "ping", None), 1);
        assert_eq!(bus.post(a, "pong", None), 0);
        assert_eq!(*seen.borrow(), vec![a, a, b]);
    }

    #[test]
    fn handler_may_register_during_delivery() {
        let bus = NotificationBus::new();
        let sender = NodeId::new(0, 0);
        let inner = bus.clone();
        bus.observe_any("ping", move |_| {
            inner.observe_any("ping", |_| {});
        });

        assert_eq!(bus.post(sender, "ping", None), 1);
        assert_eq!(bus.observer_count(), 2);
        assert!(bus.has_observers(sender, "ping"));
    }

    #[test]
    fn unobserve_sender_drops_bound_observers() {
        let bus = NotificationBus::new();
        let a = NodeId::new(0, 0);
        bus.observe(a, "x", |_| {});
        bus.observe(a, "y", |_| {});
        let keep = bus.observe_any("x", |_| {});
        assert_eq!(bus.unobserve_sender(a), 2);
        assert!(bus.unobserve(keep));
        assert!(!bus.unobserve(keep));
    }
}
