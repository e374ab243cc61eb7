//! The capability every promise node implements.

use crate::event::EventRef;
use crate::fault::Settled;

/// Diagnostic tracing: a node can describe itself and the chain of nodes it
/// depends on, using plain Rust type names.
pub(crate) trait Trace {
    /// Pushes this node's type name, then descends into its dependency.
    fn trace_into(&self, out: &mut Vec<&'static str>);
}

/// An asynchronous value producer: one node in the promise graph.
///
/// Nodes form a tree in which every combinator exclusively owns its
/// dependencies (the fork hub, shared by its branches, is the one
/// exception). The protocol has two halves:
///
/// - `on_ready` requests that `waker` be armed once the node is resolvable.
///   If the node is already resolvable it returns `true` and does not retain
///   the waker; otherwise it keeps the waker (exactly one at a time) and
///   arms it depth-first when readiness arrives. Called at most once per
///   node.
/// - `get` extracts the settled outcome. Precondition: the node has
///   signalled readiness. Called at most once.
///
/// Once a node has signalled readiness, `get` yields a value or a fault,
/// never neither.
pub(crate) trait PromiseNode<T>: Trace {
    fn on_ready(&mut self, waker: EventRef) -> bool;

    fn get(&mut self) -> Settled<T>;
}

pub(crate) fn render_trace(labels: &[&'static str]) -> String {
    labels.join("\n")
}
