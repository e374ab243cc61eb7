//! Forcing evaluation ahead of the consumer.

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::event::{Event, EventRef, FireHandler, OnReadyEvent};
use crate::fault::{Settled, drop_folding};
use crate::node::{PromiseNode, Trace};

/// Evaluates its dependency as soon as the loop can get to it, whether or
/// not a consumer has asked yet.
///
/// On fire the dependency's outcome moves into an owned slot and the
/// dependency is released; the consumer later reads from the slot.
pub(crate) struct EagerNode<T> {
    core: Rc<RefCell<EagerCore<T>>>,
    _event: Event,
}

struct EagerCore<T> {
    dependency: Option<Box<dyn PromiseNode<T>>>,
    result: Option<Settled<T>>,
    on_ready: OnReadyEvent,
}

impl<T: 'static> EagerNode<T> {
    pub(crate) fn new(dependency: Box<dyn PromiseNode<T>>) -> Self {
        let core = Rc::new(RefCell::new(EagerCore {
            dependency: Some(dependency),
            result: None,
            on_ready: OnReadyEvent::Empty,
        }));
        let core_dyn: Rc<RefCell<dyn FireHandler>> = core.clone();
        let handler: Weak<RefCell<dyn FireHandler>> = Rc::downgrade(&core_dyn);
        let event = Event::new(handler);

        let ready = core
            .borrow_mut()
            .dependency
            .as_mut()
            .expect("eager node starts with a dependency")
            .on_ready(event.waker());
        if ready {
            event.arm_depth_first();
        }

        Self {
            core,
            _event: event,
        }
    }
}

impl<T: 'static> FireHandler for EagerCore<T> {
    fn fire(&mut self) -> Option<Box<dyn Any>> {
        let mut dependency = self.dependency.take().expect("eager node fired twice");
        let mut result = dependency.get();
        drop_folding(&mut result, dependency);
        self.result = Some(result);
        self.on_ready.arm();
        None
    }

    fn trace(&self) -> String {
        let mut labels = vec![type_name::<Self>()];
        if let Some(dependency) = &self.dependency {
            dependency.trace_into(&mut labels);
        }
        labels.join("\n")
    }
}

impl<T> Trace for EagerNode<T> {
    fn trace_into(&self, out: &mut Vec<&'static str>) {
        out.push(type_name::<Self>());
        let core = self.core.borrow();
        if let Some(dependency) = &core.dependency {
            dependency.trace_into(out);
        }
    }
}

impl<T: 'static> PromiseNode<T> for EagerNode<T> {
    fn on_ready(&mut self, waker: EventRef) -> bool {
        self.core.borrow_mut().on_ready.init(waker)
    }

    fn get(&mut self) -> Settled<T> {
        self.core
            .borrow_mut()
            .result
            .take()
            .expect("eagerly evaluated promise read before it resolved")
    }
}
