//! Event registrations and the waker slot used inside combinator nodes.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::event_loop::LoopState;
use crate::queue::EventId;

/// The callback side of an event registration.
///
/// `fire` runs when the loop reaches the event in the queue. A handler may
/// return a box that the loop drops only after the firing flag has been
/// cleared; this is how a task hands its own storage back for destruction.
pub(crate) trait FireHandler {
    fn fire(&mut self) -> Option<Box<dyn Any>>;

    /// A diagnostic description of this event and the nodes behind it.
    fn trace(&self) -> String;
}

/// An owning event registration on the current thread's event loop.
///
/// Dropping the registration unlinks the event from the queue. Dropping it
/// from inside its own `fire` callback is a fatal programming error.
pub(crate) struct Event {
    loop_state: Rc<LoopState>,
    id: EventId,
}

impl Event {
    /// Registers a new event on the current thread's event loop.
    ///
    /// # Panics
    ///
    /// Panics if no event loop is running on this thread.
    pub(crate) fn new(handler: Weak<RefCell<dyn FireHandler>>) -> Self {
        let loop_state = LoopState::current();
        let id = loop_state.queue.borrow_mut().register(handler);
        Self { loop_state, id }
    }

    /// An armable handle to this registration, handed to upstream nodes as
    /// their waker.
    pub(crate) fn waker(&self) -> EventRef {
        EventRef {
            loop_state: Rc::clone(&self.loop_state),
            id: self.id,
        }
    }

    pub(crate) fn arm_depth_first(&self) {
        self.loop_state.queue.borrow_mut().arm_depth_first(self.id);
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        self.loop_state.queue.borrow_mut().release(self.id);
    }
}

/// An armable reference to an [`Event`] owned elsewhere.
///
/// Upstream nodes hold one of these as the deferred waker of their consumer.
/// Ownership of the graph guarantees the waker never outlives the event it
/// refers to; the queue's generation check turns any violation into a panic
/// rather than a misfire.
#[derive(Clone)]
pub(crate) struct EventRef {
    loop_state: Rc<LoopState>,
    id: EventId,
}

impl EventRef {
    pub(crate) fn arm_depth_first(&self) {
        self.loop_state.queue.borrow_mut().arm_depth_first(self.id);
    }

    pub(crate) fn arm_breadth_first(&self) {
        self.loop_state.queue.borrow_mut().arm_breadth_first(self.id);
    }
}

/// The waker slot carried by combinators whose readiness is signalled by
/// their own `fire` rather than delegated to a dependency.
///
/// Tri-state: no waker registered yet, a waker awaiting arm, or the sentinel
/// recording that readiness arrived before anyone asked.
pub(crate) enum OnReadyEvent {
    Empty,
    Waiting(EventRef),
    AlreadyReady,
}

impl OnReadyEvent {
    /// Registers the consumer's waker.
    ///
    /// Returns `true` if the node was already ready, in which case the waker
    /// is not retained.
    ///
    /// # Panics
    ///
    /// Panics if a waker is already registered: `on_ready` may be called at
    /// most once per node.
    pub(crate) fn init(&mut self, waker: EventRef) -> bool {
        match self {
            Self::AlreadyReady => true,
            Self::Empty => {
                *self = Self::Waiting(waker);
                false
            }
            Self::Waiting(_) => panic!("on_ready may be called at most once per node"),
        }
    }

    /// Signals readiness: arms the stored waker depth-first, or records the
    /// already-ready sentinel if no consumer has asked yet.
    ///
    /// # Panics
    ///
    /// Panics if readiness was already signalled.
    pub(crate) fn arm(&mut self) {
        match std::mem::replace(self, Self::AlreadyReady) {
            Self::Empty => {}
            Self::Waiting(waker) => waker.arm_depth_first(),
            Self::AlreadyReady => panic!("node readiness signalled twice"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;

    struct NoopHandler;

    impl FireHandler for NoopHandler {
        fn fire(&mut self) -> Option<Box<dyn Any>> {
            None
        }

        fn trace(&self) -> String {
            "noop".to_string()
        }
    }

    #[test]
    fn on_ready_event_starts_empty_and_accepts_one_waker() {
        let _event_loop = EventLoop::new();
        let handler: Rc<RefCell<dyn FireHandler>> = Rc::new(RefCell::new(NoopHandler));
        let weak: Weak<RefCell<dyn FireHandler>> = Rc::downgrade(&handler);
        let event = Event::new(weak);

        let mut slot = OnReadyEvent::Empty;
        assert!(!slot.init(event.waker()));
        assert!(matches!(slot, OnReadyEvent::Waiting(_)));
    }

    #[test]
    fn on_ready_event_reports_already_ready() {
        let _event_loop = EventLoop::new();
        let handler: Rc<RefCell<dyn FireHandler>> = Rc::new(RefCell::new(NoopHandler));
        let weak: Weak<RefCell<dyn FireHandler>> = Rc::downgrade(&handler);
        let event = Event::new(weak);

        let mut slot = OnReadyEvent::Empty;
        slot.arm();
        assert!(matches!(slot, OnReadyEvent::AlreadyReady));
        assert!(slot.init(event.waker()));
    }

    #[test]
    #[should_panic(expected = "at most once")]
    fn on_ready_event_rejects_second_waker() {
        let _event_loop = EventLoop::new();
        let handler: Rc<RefCell<dyn FireHandler>> = Rc::new(RefCell::new(NoopHandler));
        let weak: Weak<RefCell<dyn FireHandler>> = Rc::downgrade(&handler);
        let event = Event::new(weak);

        let mut slot = OnReadyEvent::Empty;
        let _ = slot.init(event.waker());
        let _ = slot.init(event.waker());
    }

    #[test]
    #[should_panic(expected = "no event loop is running")]
    fn event_requires_a_current_loop() {
        let handler: Rc<RefCell<dyn FireHandler>> = Rc::new(RefCell::new(NoopHandler));
        let weak: Weak<RefCell<dyn FireHandler>> = Rc::downgrade(&handler);
        let _event = Event::new(weak);
    }
}
