//! First-to-resolve-wins joining of two promises.

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::event::{Event, EventRef, FireHandler, OnReadyEvent};
use crate::fault::{Settled, catching};
use crate::node::{PromiseNode, Trace};

/// Resolves to whichever of two dependencies settles first.
///
/// Each side is an event armed on its own dependency. The first side to
/// fire drops the other side's dependency, cancelling it outright, so the
/// losing side can never deliver a result. Failures raised by the
/// cancellation are swallowed.
pub(crate) struct ExclusiveJoinNode<T> {
    core: Rc<RefCell<JoinCore<T>>>,
    _left: Rc<RefCell<JoinBranch<T>>>,
    _right: Rc<RefCell<JoinBranch<T>>>,
    _left_event: Event,
    _right_event: Event,
}

struct JoinCore<T> {
    left: Option<Box<dyn PromiseNode<T>>>,
    right: Option<Box<dyn PromiseNode<T>>>,
    on_ready: OnReadyEvent,
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

struct JoinBranch<T> {
    side: Side,
    core: Rc<RefCell<JoinCore<T>>>,
}

impl<T: 'static> ExclusiveJoinNode<T> {
    pub(crate) fn new(left: Box<dyn PromiseNode<T>>, right: Box<dyn PromiseNode<T>>) -> Self {
        let core = Rc::new(RefCell::new(JoinCore {
            left: Some(left),
            right: Some(right),
            on_ready: OnReadyEvent::Empty,
        }));

        let left_branch = Rc::new(RefCell::new(JoinBranch {
            side: Side::Left,
            core: Rc::clone(&core),
        }));
        let left_branch_dyn: Rc<RefCell<dyn FireHandler>> = left_branch.clone();
        let left_handler: Weak<RefCell<dyn FireHandler>> = Rc::downgrade(&left_branch_dyn);
        let left_event = Event::new(left_handler);
        let left_ready = core
            .borrow_mut()
            .left
            .as_mut()
            .expect("join starts with a left dependency")
            .on_ready(left_event.waker());
        if left_ready {
            left_event.arm_depth_first();
        }

        let right_branch = Rc::new(RefCell::new(JoinBranch {
            side: Side::Right,
            core: Rc::clone(&core),
        }));
        let right_branch_dyn: Rc<RefCell<dyn FireHandler>> = right_branch.clone();
        let right_handler: Weak<RefCell<dyn FireHandler>> = Rc::downgrade(&right_branch_dyn);
        let right_event = Event::new(right_handler);
        let right_ready = core
            .borrow_mut()
            .right
            .as_mut()
            .expect("join starts with a right dependency")
            .on_ready(right_event.waker());
        if right_ready {
            right_event.arm_depth_first();
        }

        Self {
            core,
            _left: left_branch,
            _right: right_branch,
            _left_event: left_event,
            _right_event: right_event,
        }
    }
}

impl<T: 'static> FireHandler for JoinBranch<T> {
    fn fire(&mut self) -> Option<Box<dyn Any>> {
        let mut core = self.core.borrow_mut();

        let already_lost = match self.side {
            Side::Left => core.left.is_none(),
            Side::Right => core.right.is_none(),
        };
        if already_lost {
            // The other side settled first and cancelled this dependency
            // while this event was already armed.
            return None;
        }

        let loser = match self.side {
            Side::Left => core.right.take(),
            Side::Right => core.left.take(),
        };
        // Cancelling the losing side must not unwind.
        drop(catching(move || drop(loser)));

        core.on_ready.arm();
        None
    }

    fn trace(&self) -> String {
        let mut labels = vec![type_name::<Self>()];
        let core = self.core.borrow();
        let dependency = match self.side {
            Side::Left => &core.left,
            Side::Right => &core.right,
        };
        if let Some(dependency) = dependency {
            dependency.trace_into(&mut labels);
        }
        labels.join("\n")
    }
}

impl<T> Trace for ExclusiveJoinNode<T> {
    fn trace_into(&self, out: &mut Vec<&'static str>) {
        out.push(type_name::<Self>());
        let core = self.core.borrow();
        if let Some(dependency) = &core.left {
            dependency.trace_into(out);
        } else if let Some(dependency) = &core.right {
            dependency.trace_into(out);
        }
    }
}

impl<T: 'static> PromiseNode<T> for ExclusiveJoinNode<T> {
    fn on_ready(&mut self, waker: EventRef) -> bool {
        self.core.borrow_mut().on_ready.init(waker)
    }

    fn get(&mut self) -> Settled<T> {
        let mut core = self.core.borrow_mut();
        if let Some(dependency) = core.left.as_mut() {
            dependency.get()
        } else if let Some(dependency) = core.right.as_mut() {
            dependency.get()
        } else {
            panic!("exclusive join read before either side resolved");
        }
    }
}
