//! Event bus: synchronous, typed publish/subscribe.
//!
//! Subscribers run in subscription order inside `publish`. Each handler call
//! is a failure boundary: an `Err` return or a panic is caught and
//! re-published on [`topics::ERROR`], so a broken subscriber never reaches
//! the publisher or its siblings. Failures inside an `error` subscriber are
//! only logged.
//!
//! Handlers may publish, subscribe and unsubscribe re-entrantly; the
//! subscriber list is snapshotted per publish and no borrow is held while a
//! handler runs.

use crate::error::BusError;
use crate::input::InputEvent;
use nest_core::{CanvasId, ConnectionId, NodeRef, ParseError};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};
use std::task::Poll;
use std::time::{Duration, Instant};

/// Well-known topic names.
pub mod topics {
    pub const NODE_ADDED: &str = "node:added";
    pub const NODE_REMOVED: &str = "node:removed";
    pub const NODE_UPDATED: &str = "node:updated";
    pub const CONNECTION_ADDED: &str = "connection:added";
    pub const CONNECTION_REMOVED: &str = "connection:removed";
    pub const CONNECTION_UPDATED: &str = "connection:updated";
    pub const CANVAS_REGISTERED: &str = "canvas:registered";
    pub const CANVAS_UNREGISTERED: &str = "canvas:unregistered";
    pub const CANVAS_ACTIVATED: &str = "canvas:activated";
    pub const XRAY_ACTIVATED: &str = "xray:activated";
    pub const XRAY_DEACTIVATED: &str = "xray:deactivated";
    pub const HISTORY_CHANGED: &str = "history:changed";
    pub const SYNC_TEXT: &str = "sync:text";
    pub const SYNC_DIAGNOSTIC: &str = "sync:diagnostic";
    pub const ERROR: &str = "error";

    // Consumed input.
    pub const POINTER_DOWN: &str = "canvas:pointerdown";
    pub const POINTER_MOVE: &str = "canvas:pointermove";
    pub const POINTER_UP: &str = "canvas:pointerup";
    pub const POINTER_LEAVE: &str = "canvas:pointerleave";
    pub const KEY_DOWN: &str = "canvas:keydown";
    pub const KEY_UP: &str = "canvas:keyup";
    pub const WHEEL: &str = "canvas:wheel";
    pub const WINDOW_BLUR: &str = "window:blur";
}

/// Event payloads. Subscribers match on the variant they expect.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Node(NodeRef),
    Connection { canvas: CanvasId, id: ConnectionId },
    Canvas(CanvasId),
    Xray { level: u32 },
    History { can_undo: bool, can_redo: bool },
    Input(InputEvent),
    /// Text for the editor pane after a visual edit.
    Text(String),
    Diagnostic(ParseError),
    Error { topic: String, message: String },
}

pub type HandlerResult = Result<(), Box<dyn std::error::Error>>;
type Handler = Rc<dyn Fn(&Payload) -> HandlerResult>;

#[derive(Clone)]
struct Entry {
    id: u64,
    once: bool,
    handler: Handler,
}

struct PendingWait {
    topic: String,
    slot: Weak<RefCell<Option<Payload>>>,
}

#[derive(Default)]
struct BusInner {
    subscribers: RefCell<HashMap<String, Vec<Entry>>>,
    waiters: RefCell<Vec<PendingWait>>,
    next_id: Cell<u64>,
}

impl BusInner {
    fn remove(&self, topic: &str, id: u64) -> bool {
        let mut subs = self.subscribers.borrow_mut();
        let Some(list) = subs.get_mut(topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|e| e.id != id);
        before != list.len()
    }

    fn is_subscribed(&self, topic: &str, id: u64) -> bool {
        self.subscribers
            .borrow()
            .get(topic)
            .is_some_and(|list| list.iter().any(|e| e.id == id))
    }
}

/// Shared handle to one bus. Cloning is cheap and every clone sees the same
/// subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Rc<BusInner>,
}

/// Handle returned by `subscribe`. Dropping it leaves the subscription in
/// place; call [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: String,
    id: u64,
}

impl Subscription {
    /// Remove the handler. Returns false if it was already gone (a fired
    /// `subscribe_once` handler, or a dropped bus).
    pub fn unsubscribe(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.remove(&self.topic, self.id))
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Payload) -> HandlerResult + 'static,
    {
        self.add(topic, false, Rc::new(handler))
    }

    /// Subscribe for the next publish on `topic` only.
    pub fn subscribe_once<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Payload) -> HandlerResult + 'static,
    {
        self.add(topic, true, Rc::new(handler))
    }

    fn add(&self, topic: &str, once: bool, handler: Handler) -> Subscription {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner
            .subscribers
            .borrow_mut()
            .entry(topic.to_string())
            .or_default()
            .push(Entry { id, once, handler });
        Subscription {
            bus: Rc::downgrade(&self.inner),
            topic: topic.to_string(),
            id,
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subscribers
            .borrow()
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Deliver `payload` to every subscriber of `topic`, in subscription
    /// order. Never fails.
    pub fn publish(&self, topic: &str, payload: Payload) {
        log::trace!("publish `{topic}`: {payload:?}");
        self.resolve_waiters(topic, &payload);

        let entries: Vec<Entry> = {
            let mut subs = self.inner.subscribers.borrow_mut();
            let Some(list) = subs.get_mut(topic) else {
                return;
            };
            let snapshot = list.clone();
            list.retain(|e| !e.once);
            snapshot
        };

        for entry in entries {
            // Skip handlers an earlier handler unsubscribed.
            if !entry.once && !self.inner.is_subscribed(topic, entry.id) {
                continue;
            }
            self.dispatch(topic, &entry, &payload);
        }
    }

    fn dispatch(&self, topic: &str, entry: &Entry, payload: &Payload) {
        let message = match catch_unwind(AssertUnwindSafe(|| (entry.handler)(payload))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        if topic == topics::ERROR {
            log::warn!("error subscriber failed: {message}");
            return;
        }
        log::warn!("subscriber of `{topic}` failed: {message}");
        self.publish(
            topics::ERROR,
            Payload::Error {
                topic: topic.to_string(),
                message,
            },
        );
    }

    /// A waiter that resolves with the next payload published on `topic`,
    /// or fails once `timeout` has elapsed since `now`.
    pub fn wait_for(&self, topic: &str, timeout: Duration, now: Instant) -> Waiter {
        let slot = Rc::new(RefCell::new(None));
        self.inner.waiters.borrow_mut().push(PendingWait {
            topic: topic.to_string(),
            slot: Rc::downgrade(&slot),
        });
        Waiter {
            topic: topic.to_string(),
            timeout,
            deadline: now + timeout,
            slot,
            done: false,
        }
    }

    fn resolve_waiters(&self, topic: &str, payload: &Payload) {
        self.inner.waiters.borrow_mut().retain(|w| {
            let Some(slot) = w.slot.upgrade() else {
                return false;
            };
            if w.topic != topic {
                return true;
            }
            *slot.borrow_mut() = Some(payload.clone());
            false
        });
    }

    /// A view of this bus whose topics are prefixed with `prefix::`.
    pub fn scoped(&self, prefix: &str) -> ScopedBus {
        ScopedBus {
            bus: self.clone(),
            prefix: prefix.to_string(),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// Pending result of [`EventBus::wait_for`]. Poll it with the current time.
#[derive(Debug)]
pub struct Waiter {
    topic: String,
    timeout: Duration,
    deadline: Instant,
    slot: Rc<RefCell<Option<Payload>>>,
    done: bool,
}

impl Waiter {
    /// `Ready` once the payload arrived or the deadline passed. A waiter
    /// yields `Ready` once; polling it again returns `Pending` forever.
    pub fn poll(&mut self, now: Instant) -> Poll<Result<Payload, BusError>> {
        if self.done {
            return Poll::Pending;
        }
        if let Some(payload) = self.slot.borrow_mut().take() {
            self.done = true;
            return Poll::Ready(Ok(payload));
        }
        if now >= self.deadline {
            self.done = true;
            return Poll::Ready(Err(BusError::Timeout {
                topic: self.topic.clone(),
                after: self.timeout,
            }));
        }
        Poll::Pending
    }
}

/// Namespaced view of a bus.
#[derive(Clone)]
pub struct ScopedBus {
    bus: EventBus,
    prefix: String,
}

impl ScopedBus {
    /// Full topic name for `topic` in this scope.
    pub fn topic(&self, topic: &str) -> String {
        format!("{}::{topic}", self.prefix)
    }

    pub fn publish(&self, topic: &str, payload: Payload) {
        self.bus.publish(&self.topic(topic), payload);
    }

    pub fn subscribe<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Payload) -> HandlerResult + 'static,
    {
        self.bus.subscribe(&self.topic(topic), handler)
    }

    pub fn subscribe_once<F>(&self, topic: &str, handler: F) -> Subscription
    where
        F: Fn(&Payload) -> HandlerResult + 'static,
    {
        self.bus.subscribe_once(&self.topic(topic), handler)
    }

    pub fn wait_for(&self, topic: &str, timeout: Duration, now: Instant) -> Waiter {
        self.bus.wait_for(&self.topic(topic), timeout, now)
    }

    pub fn scoped(&self, prefix: &str) -> ScopedBus {
        self.bus.scoped(&self.topic(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn recorder(bus: &EventBus, topic: &str) -> Rc<RefCell<Vec<Payload>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(topic, move |p| {
            sink.borrow_mut().push(p.clone());
            Ok(())
        });
        seen
    }

    #[test]
    fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            bus.subscribe("t", move |_| {
                order.borrow_mut().push(n);
                Ok(())
            });
        }
        bus.publish("t", Payload::None);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_subscriber_is_isolated() {
        let bus = EventBus::new();
        let errors = recorder(&bus, topics::ERROR);
        bus.subscribe("t", |_| Err("boom".into()));
        bus.subscribe("t", |_| panic!("kaboom"));
        let after = recorder(&bus, "t");

        bus.publish("t", Payload::None);

        assert_eq!(after.borrow().len(), 1);
        let errors = errors.borrow();
        assert_eq!(errors.len(), 2);
        assert_eq!(
            errors[0],
            Payload::Error {
                topic: "t".into(),
                message: "boom".into()
            }
        );
        assert!(matches!(&errors[1], Payload::Error { message, .. } if message.contains("kaboom")));
    }

    #[test]
    fn failing_error_subscriber_does_not_recurse() {
        let bus = EventBus::new();
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        bus.subscribe(topics::ERROR, move |_| {
            c.set(c.get() + 1);
            Err("still broken".into())
        });
        bus.subscribe("t", |_| Err("boom".into()));
        bus.publish("t", Payload::None);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn once_fires_a_single_time() {
        let bus = EventBus::new();
        let calls = Rc::new(Cell::new(0));
        let c = calls.clone();
        let sub = bus.subscribe_once("t", move |_| {
            c.set(c.get() + 1);
            Ok(())
        });
        bus.publish("t", Payload::None);
        bus.publish("t", Payload::None);
        assert_eq!(calls.get(), 1);
        assert!(!sub.unsubscribe());
    }

    #[test]
    fn unsubscribe_and_drop_semantics() {
        let bus = EventBus::new();
        let seen = Rc::new(Cell::new(0));
        let s = seen.clone();
        let sub = bus.subscribe("t", move |_| {
            s.set(s.get() + 1);
            Ok(())
        });
        {
            let s = seen.clone();
            let _dropped = bus.subscribe("t", move |_| {
                s.set(s.get() + 10);
                Ok(())
            });
        }
        bus.publish("t", Payload::None);
        assert_eq!(seen.get(), 11);

        assert!(sub.unsubscribe());
        bus.publish("t", Payload::None);
        assert_eq!(seen.get(), 21);
        assert_eq!(bus.subscriber_count("t"), 1);
    }

    #[test]
    fn reentrant_publish_and_unsubscribe() {
        let bus = EventBus::new();
        let inner = recorder(&bus, "inner");
        let later_calls = Rc::new(Cell::new(0));

        let later: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let (b, l) = (bus.clone(), later.clone());
        bus.subscribe("outer", move |_| {
            b.publish("inner", Payload::Xray { level: 1 });
            if let Some(sub) = l.borrow().as_ref() {
                sub.unsubscribe();
            }
            Ok(())
        });
        let c = later_calls.clone();
        *later.borrow_mut() = Some(bus.subscribe("outer", move |_| {
            c.set(c.get() + 1);
            Ok(())
        }));

        bus.publish("outer", Payload::None);
        assert_eq!(*inner.borrow(), vec![Payload::Xray { level: 1 }]);
        assert_eq!(later_calls.get(), 0);
    }

    #[test]
    fn wait_for_resolves_or_times_out() {
        let bus = EventBus::new();
        let t0 = Instant::now();

        let mut hit = bus.wait_for("t", Duration::from_millis(50), t0);
        assert_eq!(hit.poll(t0), Poll::Pending);
        bus.publish("t", Payload::Canvas(CanvasId(3)));
        assert_eq!(hit.poll(t0), Poll::Ready(Ok(Payload::Canvas(CanvasId(3)))));

        let mut miss = bus.wait_for("t", Duration::from_millis(50), t0);
        assert_eq!(miss.poll(t0 + Duration::from_millis(10)), Poll::Pending);
        assert_eq!(
            miss.poll(t0 + Duration::from_millis(50)),
            Poll::Ready(Err(BusError::Timeout {
                topic: "t".into(),
                after: Duration::from_millis(50)
            }))
        );
    }

    #[test]
    fn scoped_topics_are_prefixed() {
        let bus = EventBus::new();
        let plugin = bus.scoped("plugin");
        let raw = recorder(&bus, "plugin::ready");
        let scoped_seen = Rc::new(Cell::new(0));
        let s = scoped_seen.clone();
        plugin.subscribe("ready", move |_| {
            s.set(s.get() + 1);
            Ok(())
        });

        plugin.publish("ready", Payload::None);
        bus.publish("ready", Payload::None);

        assert_eq!(raw.borrow().len(), 1);
        assert_eq!(scoped_seen.get(), 1);
        assert_eq!(plugin.scoped("sub").topic("x"), "plugin::sub::x");
    }
}
