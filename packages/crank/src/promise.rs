//! Lazily-evaluated asynchronous values and their combinators.

use std::fmt;

use crate::attach::AttachmentNode;
use crate::chain::ChainNode;
use crate::eager::EagerNode;
use crate::fault::{Fault, Settled, catching};
use crate::fork::ForkedPromise;
use crate::immediate::ImmediateNode;
use crate::join::ExclusiveJoinNode;
use crate::node::{PromiseNode, render_trace};
use crate::transform::{RecoverNode, TransformNode};

/// A value that will become available later: one node in a graph of
/// deferred computations driven by the thread's
/// [`EventLoop`](crate::EventLoop).
///
/// Promises are lazy. Nothing runs until the loop turns the crank, and a
/// promise that is dropped before resolving is cancelled along with every
/// dependency it owns. Use
/// [`eagerly_evaluate`](Promise::eagerly_evaluate) to opt a subgraph out of
/// the laziness.
///
/// A rejected promise carries a [`Fault`] in place of its value; faults
/// travel the graph exactly like values and short-circuit past value
/// transforms.
///
/// Combinators that schedule their own events ([`then`](Promise::then),
/// [`fork`](Promise::fork), [`exclusive_join`](Promise::exclusive_join),
/// [`eagerly_evaluate`](Promise::eagerly_evaluate)) must be called on a
/// thread with a live event loop.
///
/// # Example
///
/// ```rust
/// use crank::{EventLoop, Promise};
///
/// let event_loop = EventLoop::new();
///
/// let promise = Promise::fulfilled(2)
///     .map(|n| n + 2)
///     .then(|n| Promise::fulfilled(n * 10));
/// assert_eq!(event_loop.wait(promise).unwrap(), 40);
/// ```
#[must_use = "promises are lazy; wait on them, daemonize them, or absolve them"]
pub struct Promise<T> {
    node: Box<dyn PromiseNode<T>>,
}

impl<T: 'static> Promise<T> {
    /// A promise that is already resolved to `value`.
    pub fn fulfilled(value: T) -> Self {
        Self::from_node(Box::new(ImmediateNode::new(Ok(value))))
    }

    /// A promise that is already broken with `fault`.
    pub fn rejected(fault: Fault) -> Self {
        Self::from_node(Box::new(ImmediateNode::new(Err(fault))))
    }

    pub(crate) fn from_node(node: Box<dyn PromiseNode<T>>) -> Self {
        Self { node }
    }

    pub(crate) fn into_node(self) -> Box<dyn PromiseNode<T>> {
        self.node
    }

    /// Applies `op` to the resolved value.
    ///
    /// A fault skips `op` and propagates; a panic inside `op` rejects the
    /// returned promise.
    pub fn map<U, F>(self, op: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(T) -> U + 'static,
    {
        Promise::from_node(Box::new(TransformNode::new(
            self.node,
            move |value| -> Settled<U> { Ok(op(value)) },
        )))
    }

    /// Applies `op` to the resolved value and resolves to the promise it
    /// returns.
    pub fn then<U, F>(self, op: F) -> Promise<U>
    where
        U: 'static,
        F: FnOnce(T) -> Promise<U> + 'static,
    {
        let transformed: Box<dyn PromiseNode<Promise<U>>> = Box::new(TransformNode::new(
            self.node,
            move |value| -> Settled<Promise<U>> { Ok(op(value)) },
        ));
        Promise::from_node(Box::new(ChainNode::new(transformed)))
    }

    /// Applies `op` to the fault of a rejected promise, turning it back
    /// into a value. Resolved values pass through untouched.
    ///
    /// # Example
    ///
    /// ```rust
    /// use crank::{EventLoop, Fault, Promise};
    ///
    /// let event_loop = EventLoop::new();
    ///
    /// let promise = Promise::<i32>::rejected(Fault::new("nope")).recover(|_fault| 7);
    /// assert_eq!(event_loop.wait(promise).unwrap(), 7);
    /// ```
    pub fn recover<F>(self, op: F) -> Promise<T>
    where
        F: FnOnce(Fault) -> T + 'static,
    {
        Promise::from_node(Box::new(RecoverNode::new(
            self.node,
            move |fault| -> Settled<T> { Ok(op(fault)) },
        )))
    }

    /// Keeps `attachment` alive until this promise resolves or is dropped.
    ///
    /// Use this to extend the lifetime of buffers or handles the
    /// computation borrows from.
    pub fn attach<A: 'static>(self, attachment: A) -> Promise<T> {
        Promise::from_node(Box::new(AttachmentNode::new(self.node, attachment)))
    }

    /// Splits this promise so several consumers can each observe its
    /// outcome. The computation runs once; every branch receives a clone.
    pub fn fork(self) -> ForkedPromise<T>
    where
        T: Clone,
    {
        ForkedPromise::new(self.node)
    }

    /// Resolves to whichever of the two promises settles first, cancelling
    /// the other.
    ///
    /// # Example
    ///
    /// ```rust
    /// use crank::{EventLoop, Promise, yield_now};
    ///
    /// let event_loop = EventLoop::new();
    ///
    /// let fast = Promise::fulfilled("fast");
    /// let slow = yield_now().map(|()| "slow");
    /// assert_eq!(event_loop.wait(fast.exclusive_join(slow)).unwrap(), "fast");
    /// ```
    pub fn exclusive_join(self, other: Promise<T>) -> Promise<T> {
        Promise::from_node(Box::new(ExclusiveJoinNode::new(self.node, other.node)))
    }

    /// Starts the computation as soon as the loop can get to it, instead of
    /// waiting for a consumer to ask.
    pub fn eagerly_evaluate(self) -> Promise<T> {
        Promise::from_node(Box::new(EagerNode::new(self.node)))
    }

    /// Cancels the promise, suppressing any failure raised by tearing down
    /// the partially-evaluated graph.
    pub fn absolve(self) {
        let node = self.node;
        if let Err(fault) = catching(move || drop(node)) {
            tracing::debug!(fault = %fault, "suppressed failure while absolving a promise");
        }
    }

    /// A diagnostic description of the node chain behind this promise, one
    /// type name per line.
    #[must_use]
    pub fn trace(&self) -> String {
        let mut labels = Vec::new();
        self.node.trace_into(&mut labels);
        render_trace(&labels)
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;

    #[test]
    fn map_chain_applies_in_order() {
        let event_loop = EventLoop::new();
        let promise = Promise::fulfilled(1).map(|n| n + 1).map(|n| n * 10);
        assert_eq!(event_loop.wait(promise).unwrap(), 20);
    }

    #[test]
    fn then_flattens_the_returned_promise() {
        let event_loop = EventLoop::new();
        let promise = Promise::fulfilled(2).then(|n| Promise::fulfilled(n + 40));
        assert_eq!(event_loop.wait(promise).unwrap(), 42);
    }

    #[test]
    fn then_propagates_a_fault_from_the_callback_promise() {
        let event_loop = EventLoop::new();
        let promise =
            Promise::fulfilled(1).then(|_n| Promise::<i32>::rejected(Fault::new("inner")));
        assert_eq!(event_loop.wait(promise).unwrap_err().message(), "inner");
    }

    #[test]
    fn panicking_then_callback_rejects_the_promise() {
        let event_loop = EventLoop::new();
        let promise = Promise::fulfilled(1).then(|_n| -> Promise<i32> { panic!("bad callback") });
        assert_eq!(
            event_loop.wait(promise).unwrap_err().message(),
            "bad callback"
        );
    }

    #[test]
    fn absolve_swallows_teardown_failures() {
        struct ExplosiveDrop;
        impl Drop for ExplosiveDrop {
            fn drop(&mut self) {
                panic!("teardown failed");
            }
        }

        let _event_loop = EventLoop::new();
        Promise::fulfilled(1).attach(ExplosiveDrop).absolve();
    }

    #[test]
    fn trace_names_the_node_chain() {
        let _event_loop = EventLoop::new();
        let promise = Promise::fulfilled(1).map(|n| n + 1);
        let trace = promise.trace();
        assert!(trace.contains("TransformNode"));
        assert!(trace.contains("ImmediateNode"));
        promise.absolve();
    }
}
