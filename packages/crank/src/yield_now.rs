//! Stepping to the back of the queue.

use std::any::type_name;

use crate::event::EventRef;
use crate::fault::Settled;
use crate::node::{PromiseNode, Trace};
use crate::promise::Promise;

/// Returns a promise that resolves only after all currently-armed work on
/// this thread's event loop has run.
///
/// The returned promise always arms its consumer breadth-first, so anything
/// already in the queue (and anything already ready) is observed first.
///
/// # Example
///
/// ```rust
/// use crank::{EventLoop, yield_now};
///
/// let event_loop = EventLoop::new();
/// event_loop.wait(yield_now()).unwrap();
/// ```
#[must_use]
pub fn yield_now() -> Promise<()> {
    Promise::from_node(Box::new(YieldNode))
}

struct YieldNode;

impl Trace for YieldNode {
    fn trace_into(&self, out: &mut Vec<&'static str>) {
        out.push(type_name::<Self>());
    }
}

impl PromiseNode<()> for YieldNode {
    fn on_ready(&mut self, waker: EventRef) -> bool {
        waker.arm_breadth_first();
        false
    }

    fn get(&mut self) -> Settled<()> {
        Ok(())
    }
}
