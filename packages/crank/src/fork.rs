//! Sharing one computation among many consumers.

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::event::{Event, EventRef, FireHandler, OnReadyEvent};
use crate::fault::{Settled, drop_folding};
use crate::node::{PromiseNode, Trace};
use crate::promise::Promise;

/// The shared resolver behind [`Promise::fork`].
///
/// The hub runs the inner computation exactly once and stores the outcome
/// in a slot shared with every branch. Each [`add_branch`] call returns a
/// promise yielding its own clone of that outcome; branches added after
/// the inner promise resolved are immediately ready.
///
/// Dropping a branch never cancels the computation. The inner promise is
/// cancelled only when the handle and all branches are gone before it
/// resolved.
///
/// [`add_branch`]: ForkedPromise::add_branch
pub struct ForkedPromise<T> {
    hub: Rc<RefCell<ForkHub<T>>>,
}

struct ForkHub<T> {
    inner: Option<Box<dyn PromiseNode<T>>>,
    result: Option<Settled<T>>,
    /// Waker slots of the branches waiting for the result, keyed so a
    /// dropped branch can unlink itself.
    branches: Vec<(u64, Rc<RefCell<OnReadyEvent>>)>,
    next_key: u64,
    /// Set once the hub has fired; from then on the branch list is inactive
    /// and late branches are ready immediately.
    fired: bool,
    _event: Option<Event>,
}

impl<T: Clone + 'static> ForkedPromise<T> {
    pub(crate) fn new(inner: Box<dyn PromiseNode<T>>) -> Self {
        let hub = Rc::new(RefCell::new(ForkHub {
            inner: Some(inner),
            result: None,
            branches: Vec::new(),
            next_key: 0,
            fired: false,
            _event: None,
        }));
        let hub_dyn: Rc<RefCell<dyn FireHandler>> = hub.clone();
        let handler: Weak<RefCell<dyn FireHandler>> = Rc::downgrade(&hub_dyn);
        let event = Event::new(handler);

        let ready = hub
            .borrow_mut()
            .inner
            .as_mut()
            .expect("hub starts with an inner node")
            .on_ready(event.waker());
        if ready {
            event.arm_depth_first();
        }
        hub.borrow_mut()._event = Some(event);

        Self { hub }
    }

    /// Adds a consumer of the shared outcome.
    ///
    /// Every branch receives a clone of the resolved value (or fault).
    ///
    /// # Example
    ///
    /// ```rust
    /// use crank::{EventLoop, Promise};
    ///
    /// let event_loop = EventLoop::new();
    ///
    /// let forked = Promise::fulfilled(9).fork();
    /// let first = forked.add_branch();
    /// let second = forked.add_branch();
    ///
    /// assert_eq!(event_loop.wait(first).unwrap(), 9);
    /// assert_eq!(event_loop.wait(second).unwrap(), 9);
    /// ```
    #[must_use]
    pub fn add_branch(&self) -> Promise<T> {
        let mut hub = self.hub.borrow_mut();
        let ready = Rc::new(RefCell::new(OnReadyEvent::Empty));
        let key = if hub.fired {
            ready.borrow_mut().arm();
            None
        } else {
            let key = hub.next_key;
            hub.next_key += 1;
            hub.branches.push((key, Rc::clone(&ready)));
            Some(key)
        };
        drop(hub);

        Promise::from_node(Box::new(ForkBranch {
            hub: Rc::clone(&self.hub),
            ready,
            key,
        }))
    }
}

impl<T> Clone for ForkedPromise<T> {
    fn clone(&self) -> Self {
        Self {
            hub: Rc::clone(&self.hub),
        }
    }
}

impl<T> fmt::Debug for ForkedPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForkedPromise").finish_non_exhaustive()
    }
}

impl<T: Clone + 'static> FireHandler for ForkHub<T> {
    fn fire(&mut self) -> Option<Box<dyn Any>> {
        // The dependency is ready: fetch its outcome, then release it.
        let mut inner = self.inner.take().expect("fork hub fired twice");
        let mut result = inner.get();
        drop_folding(&mut result, inner);
        self.result = Some(result);

        for (_key, ready) in self.branches.drain(..) {
            ready.borrow_mut().arm();
        }
        self.fired = true;
        None
    }

    fn trace(&self) -> String {
        let mut labels = vec![type_name::<Self>()];
        if let Some(inner) = &self.inner {
            inner.trace_into(&mut labels);
        }
        labels.join("\n")
    }
}

struct ForkBranch<T> {
    hub: Rc<RefCell<ForkHub<T>>>,
    ready: Rc<RefCell<OnReadyEvent>>,
    /// This branch's key in the hub's list, while still linked there.
    key: Option<u64>,
}

impl<T> Trace for ForkBranch<T> {
    fn trace_into(&self, out: &mut Vec<&'static str>) {
        out.push(type_name::<Self>());
        let hub = self.hub.borrow();
        if let Some(inner) = &hub.inner {
            inner.trace_into(out);
        }
    }
}

impl<T: Clone + 'static> PromiseNode<T> for ForkBranch<T> {
    fn on_ready(&mut self, waker: EventRef) -> bool {
        self.ready.borrow_mut().init(waker)
    }

    fn get(&mut self) -> Settled<T> {
        let hub = self.hub.borrow();
        hub.result
            .as_ref()
            .expect("forked promise read before it resolved")
            .clone()
    }
}

impl<T> Drop for ForkBranch<T> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let mut hub = self.hub.borrow_mut();
            if !hub.fired {
                hub.branches.retain(|(k, _)| *k != key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::event_loop::EventLoop;
    use crate::fault::Fault;

    #[test]
    fn every_branch_sees_the_same_value() {
        let event_loop = EventLoop::new();

        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let forked = Promise::fulfilled(9)
            .map(move |n| {
                counter.set(counter.get() + 1);
                n
            })
            .fork();

        let first = forked.add_branch();
        let second = forked.add_branch();
        let third = forked.add_branch();

        assert_eq!(event_loop.wait(first).unwrap(), 9);
        assert_eq!(event_loop.wait(second).unwrap(), 9);
        assert_eq!(event_loop.wait(third).unwrap(), 9);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn branches_added_after_resolution_are_ready() {
        let event_loop = EventLoop::new();

        let forked = Promise::fulfilled("shared".to_string()).fork();
        let early = forked.add_branch();
        assert_eq!(event_loop.wait(early).unwrap(), "shared");

        let late = forked.add_branch();
        assert_eq!(event_loop.wait(late).unwrap(), "shared");
    }

    #[test]
    fn faults_are_broadcast_to_all_branches() {
        let event_loop = EventLoop::new();

        let forked = Promise::<i32>::rejected(Fault::new("shared failure")).fork();
        let first = forked.add_branch();
        let second = forked.add_branch();

        assert_eq!(
            event_loop.wait(first).unwrap_err().message(),
            "shared failure"
        );
        assert_eq!(
            event_loop.wait(second).unwrap_err().message(),
            "shared failure"
        );
    }

    #[test]
    fn dropping_a_branch_does_not_disturb_the_others() {
        let event_loop = EventLoop::new();

        let forked = Promise::fulfilled(5).fork();
        let keep = forked.add_branch();
        let discard = forked.add_branch();
        drop(discard);

        assert_eq!(event_loop.wait(keep).unwrap(), 5);
    }

    #[test]
    fn dropping_everything_before_resolution_cancels_the_inner() {
        let _event_loop = EventLoop::new();

        let cancelled = Rc::new(Cell::new(false));
        struct CancelFlag(Rc<Cell<bool>>);
        impl Drop for CancelFlag {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let forked = crate::yield_now::yield_now()
            .attach(CancelFlag(Rc::clone(&cancelled)))
            .map(|()| ())
            .fork();
        let branch = forked.add_branch();

        drop(branch);
        assert!(!cancelled.get());
        drop(forked);
        assert!(cancelled.get());
    }
}
