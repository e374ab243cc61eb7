//! Flattening a promise whose resolved value is itself a promise.

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::event::{Event, EventRef, FireHandler};
use crate::fault::{Settled, drop_folding};
use crate::immediate::ImmediateNode;
use crate::node::{PromiseNode, Trace};
use crate::promise::Promise;

/// Flattens a promise of a promise into a single node.
///
/// The node is pumped as one event through a two-step lifecycle: step one
/// waits on the outer promise, step two adopts the inner promise the outer
/// resolved to (or a broken node carrying the outer's fault) and defers to
/// it from then on.
pub(crate) struct ChainNode<T> {
    core: Rc<RefCell<ChainCore<T>>>,
    _event: Event,
}

struct ChainCore<T> {
    state: ChainState<T>,
}

enum ChainState<T> {
    /// Waiting on the outer promise. Holds at most one deferred waker.
    Step1 {
        outer: Option<Box<dyn PromiseNode<Promise<T>>>>,
        waker: Option<EventRef>,
    },
    /// Deferring to the adopted inner node.
    Step2 { inner: Box<dyn PromiseNode<T>> },
}

impl<T: 'static> ChainNode<T> {
    pub(crate) fn new(outer: Box<dyn PromiseNode<Promise<T>>>) -> Self {
        let core = Rc::new(RefCell::new(ChainCore {
            state: ChainState::Step1 {
                outer: Some(outer),
                waker: None,
            },
        }));
        let core_dyn: Rc<RefCell<dyn FireHandler>> = core.clone();
        let handler: Weak<RefCell<dyn FireHandler>> = Rc::downgrade(&core_dyn);
        let event = Event::new(handler);

        let ready = {
            let mut state = core.borrow_mut();
            let ChainState::Step1 {
                outer: Some(outer), ..
            } = &mut state.state
            else {
                unreachable!("chain starts in step one with an outer node");
            };
            outer.on_ready(event.waker())
        };
        if ready {
            event.arm_depth_first();
        }

        Self {
            core,
            _event: event,
        }
    }
}

impl<T: 'static> FireHandler for ChainCore<T> {
    fn fire(&mut self) -> Option<Box<dyn Any>> {
        let ChainState::Step1 { outer, waker } = &mut self.state else {
            unreachable!("chain event fired after reaching step two");
        };
        let mut outer_node = outer.take().expect("chain outer node already consumed");
        let waker = waker.take();

        let mut intermediate = outer_node.get();
        drop_folding(&mut intermediate, outer_node);

        let inner: Box<dyn PromiseNode<T>> = match intermediate {
            Ok(promise) => promise.into_node(),
            Err(fault) => Box::new(ImmediateNode::new(Err(fault))),
        };
        self.state = ChainState::Step2 { inner };

        if let Some(waker) = waker {
            let ChainState::Step2 { inner } = &mut self.state else {
                unreachable!();
            };
            if inner.on_ready(waker.clone()) {
                waker.arm_depth_first();
            }
        }
        None
    }

    fn trace(&self) -> String {
        let mut labels = vec![type_name::<Self>()];
        match &self.state {
            ChainState::Step1 {
                outer: Some(outer), ..
            } => outer.trace_into(&mut labels),
            ChainState::Step1 { outer: None, .. } => {}
            ChainState::Step2 { inner } => inner.trace_into(&mut labels),
        }
        labels.join("\n")
    }
}

impl<T> Trace for ChainNode<T> {
    fn trace_into(&self, out: &mut Vec<&'static str>) {
        out.push(type_name::<Self>());
        let core = self.core.borrow();
        match &core.state {
            ChainState::Step1 {
                outer: Some(outer), ..
            } => outer.trace_into(out),
            ChainState::Step1 { outer: None, .. } => {}
            ChainState::Step2 { inner } => inner.trace_into(out),
        }
    }
}

impl<T: 'static> PromiseNode<T> for ChainNode<T> {
    fn on_ready(&mut self, waker: EventRef) -> bool {
        let mut core = self.core.borrow_mut();
        match &mut core.state {
            ChainState::Step1 { waker: slot, .. } => {
                assert!(
                    slot.is_none(),
                    "on_ready may be called at most once per node"
                );
                *slot = Some(waker);
                false
            }
            ChainState::Step2 { inner } => inner.on_ready(waker),
        }
    }

    fn get(&mut self) -> Settled<T> {
        let mut core = self.core.borrow_mut();
        match &mut core.state {
            ChainState::Step1 { .. } => panic!("chained promise read before it resolved"),
            ChainState::Step2 { inner } => inner.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::promise_and_fulfiller;
    use crate::event_loop::EventLoop;
    use crate::fault::Fault;

    #[test]
    fn flattens_a_promise_of_a_promise() {
        let event_loop = EventLoop::new();
        let nested = Promise::fulfilled(Promise::fulfilled(7));
        let flat = Promise::from_node(Box::new(ChainNode::new(nested.into_node())));
        assert_eq!(event_loop.wait(flat).unwrap(), 7);
    }

    #[test]
    fn outer_fault_becomes_a_broken_inner() {
        let event_loop = EventLoop::new();
        let nested = Promise::<Promise<i32>>::rejected(Fault::new("outer failed"));
        let flat = Promise::from_node(Box::new(ChainNode::new(nested.into_node())));
        assert_eq!(
            event_loop.wait(flat).unwrap_err().message(),
            "outer failed"
        );
    }

    #[test]
    fn resolves_when_the_inner_promise_is_deferred() {
        let event_loop = EventLoop::new();
        let (inner, fulfiller) = promise_and_fulfiller::<i32>();
        let nested = Promise::fulfilled(inner);
        let flat = Promise::from_node(Box::new(ChainNode::new(nested.into_node())));

        fulfiller.fulfill(9);
        assert_eq!(event_loop.wait(flat).unwrap(), 9);
    }

    #[test]
    #[should_panic(expected = "read before it resolved")]
    fn get_before_step_two_panics() {
        let _event_loop = EventLoop::new();
        let (outer, _fulfiller) = promise_and_fulfiller::<Promise<i32>>();
        let mut chain = ChainNode::new(outer.into_node());
        let _ = chain.get();
    }
}
