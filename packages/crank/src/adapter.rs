//! Bridging callback-style completion into the promise graph.

use std::any::type_name;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::event::{EventRef, OnReadyEvent};
use crate::fault::{Fault, Settled};
use crate::node::{PromiseNode, Trace};
use crate::promise::Promise;

/// Creates a promise resolved by an explicit completion call.
///
/// The returned promise settles when the fulfiller's
/// [`fulfill`](PromiseFulfiller::fulfill) or
/// [`reject`](PromiseFulfiller::reject) runs. Dropping the fulfiller
/// without settling rejects the promise, so a lost completion can never
/// strand a consumer.
///
/// # Example
///
/// ```rust
/// use crank::{EventLoop, promise_and_fulfiller};
///
/// let event_loop = EventLoop::new();
///
/// let (promise, fulfiller) = promise_and_fulfiller::<u32>();
/// fulfiller.fulfill(5);
/// assert_eq!(event_loop.wait(promise).unwrap(), 5);
/// ```
#[must_use]
pub fn promise_and_fulfiller<T: 'static>() -> (Promise<T>, PromiseFulfiller<T>) {
    let core = Rc::new(RefCell::new(AdapterCore {
        result: None,
        on_ready: OnReadyEvent::Empty,
    }));
    let fulfiller = PromiseFulfiller {
        core: Rc::downgrade(&core),
        settled: false,
    };
    (Promise::from_node(Box::new(AdapterNode { core })), fulfiller)
}

/// The completion side of [`promise_and_fulfiller`].
pub struct PromiseFulfiller<T> {
    /// Weak so that cancelling the promise makes completion a no-op.
    core: Weak<RefCell<AdapterCore<T>>>,
    settled: bool,
}

impl<T> PromiseFulfiller<T> {
    /// Resolves the promise with a value.
    pub fn fulfill(mut self, value: T) {
        self.settle(Ok(value));
    }

    /// Rejects the promise with a fault.
    pub fn reject(mut self, fault: Fault) {
        self.settle(Err(fault));
    }

    fn settle(&mut self, settled: Settled<T>) {
        self.settled = true;
        let Some(core) = self.core.upgrade() else {
            // The promise was cancelled; nobody is listening.
            return;
        };
        let mut core = core.borrow_mut();
        if core.result.is_none() {
            core.result = Some(settled);
            core.on_ready.arm();
        }
    }
}

impl<T> Drop for PromiseFulfiller<T> {
    fn drop(&mut self) {
        if !self.settled {
            self.settle(Err(Fault::new(
                "promise fulfiller was dropped before settling its promise",
            )));
        }
    }
}

impl<T> fmt::Debug for PromiseFulfiller<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseFulfiller")
            .field("settled", &self.settled)
            .finish_non_exhaustive()
    }
}

struct AdapterCore<T> {
    result: Option<Settled<T>>,
    on_ready: OnReadyEvent,
}

struct AdapterNode<T> {
    core: Rc<RefCell<AdapterCore<T>>>,
}

impl<T> Trace for AdapterNode<T> {
    fn trace_into(&self, out: &mut Vec<&'static str>) {
        out.push(type_name::<Self>());
    }
}

impl<T> PromiseNode<T> for AdapterNode<T> {
    fn on_ready(&mut self, waker: EventRef) -> bool {
        self.core.borrow_mut().on_ready.init(waker)
    }

    fn get(&mut self) -> Settled<T> {
        self.core
            .borrow_mut()
            .result
            .take()
            .expect("promise read before it was fulfilled")
    }
}
