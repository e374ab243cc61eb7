//! Nodes that are ready the moment they are built.

use std::any::type_name;

use crate::event::EventRef;
use crate::fault::Settled;
use crate::node::{PromiseNode, Trace};

/// A node holding an already-settled outcome: a fulfilled value or a fault.
pub(crate) struct ImmediateNode<T> {
    result: Option<Settled<T>>,
}

impl<T> ImmediateNode<T> {
    pub(crate) fn new(result: Settled<T>) -> Self {
        Self {
            result: Some(result),
        }
    }
}

impl<T> Trace for ImmediateNode<T> {
    fn trace_into(&self, out: &mut Vec<&'static str>) {
        out.push(type_name::<Self>());
    }
}

impl<T> PromiseNode<T> for ImmediateNode<T> {
    fn on_ready(&mut self, _waker: EventRef) -> bool {
        true
    }

    fn get(&mut self) -> Settled<T> {
        self.result
            .take()
            .expect("get() may be called at most once")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::Fault;

    #[test]
    fn fulfilled_node_is_immediately_ready() {
        let mut node = ImmediateNode::new(Ok(7));
        assert_eq!(node.get().unwrap(), 7);
    }

    #[test]
    fn broken_node_yields_its_fault() {
        let mut node: ImmediateNode<i32> = ImmediateNode::new(Err(Fault::new("broken")));
        assert_eq!(node.get().unwrap_err().message(), "broken");
    }

    #[test]
    #[should_panic(expected = "at most once")]
    fn second_get_panics() {
        let mut node = ImmediateNode::new(Ok(1));
        let _ = node.get();
        let _ = node.get();
    }
}
