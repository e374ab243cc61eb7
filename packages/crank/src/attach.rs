//! Extending the lifetime of auxiliary resources through an async chain.

use std::any::type_name;

use crate::event::EventRef;
use crate::fault::Settled;
use crate::node::{PromiseNode, Trace};

/// Forwards readiness and extraction to its dependency while keeping a
/// payload of auxiliary resources alive until the node itself is dropped.
///
/// Used to pin buffers or handles that the dependency borrows from for the
/// duration of the computation.
pub(crate) struct AttachmentNode<T, A> {
    dependency: Box<dyn PromiseNode<T>>,
    _attachment: A,
}

impl<T, A> AttachmentNode<T, A> {
    pub(crate) fn new(dependency: Box<dyn PromiseNode<T>>, attachment: A) -> Self {
        Self {
            dependency,
            _attachment: attachment,
        }
    }
}

impl<T, A> Trace for AttachmentNode<T, A> {
    fn trace_into(&self, out: &mut Vec<&'static str>) {
        out.push(type_name::<Self>());
        self.dependency.trace_into(out);
    }
}

impl<T, A> PromiseNode<T> for AttachmentNode<T, A> {
    fn on_ready(&mut self, waker: EventRef) -> bool {
        self.dependency.on_ready(waker)
    }

    fn get(&mut self) -> Settled<T> {
        self.dependency.get()
    }
}
