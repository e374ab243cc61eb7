//! Applying user functions to resolved values.

use std::any::type_name;

use crate::event::EventRef;
use crate::fault::{Fault, Settled, catching, drop_folding};
use crate::node::{PromiseNode, Trace};

/// Applies a function to the dependency's value once it resolves.
///
/// A fault short-circuits past the function; a panicking function becomes a
/// fault. The dependency is dropped as soon as its result is extracted,
/// releasing the inputs, and any failure raised by that teardown is folded
/// into the outcome.
pub(crate) struct TransformNode<T, F> {
    dependency: Option<Box<dyn PromiseNode<T>>>,
    op: Option<F>,
}

impl<T, F> TransformNode<T, F> {
    pub(crate) fn new(dependency: Box<dyn PromiseNode<T>>, op: F) -> Self {
        Self {
            dependency: Some(dependency),
            op: Some(op),
        }
    }
}

impl<T, F> Trace for TransformNode<T, F> {
    fn trace_into(&self, out: &mut Vec<&'static str>) {
        out.push(type_name::<Self>());
        if let Some(dependency) = &self.dependency {
            dependency.trace_into(out);
        }
    }
}

impl<T, U, F> PromiseNode<U> for TransformNode<T, F>
where
    F: FnOnce(T) -> Settled<U>,
{
    fn on_ready(&mut self, waker: EventRef) -> bool {
        self.dependency
            .as_mut()
            .expect("transform already consumed its dependency")
            .on_ready(waker)
    }

    fn get(&mut self) -> Settled<U> {
        let mut dependency = self
            .dependency
            .take()
            .expect("get() may be called at most once");
        let mut intermediate = dependency.get();
        drop_folding(&mut intermediate, dependency);

        match intermediate {
            Ok(value) => {
                let op = self.op.take().expect("transform already ran its function");
                catching(move || op(value)).and_then(|settled| settled)
            }
            Err(fault) => Err(fault),
        }
    }
}

/// The error-arm counterpart of [`TransformNode`]: applies a function to the
/// dependency's fault, passing successful values straight through.
pub(crate) struct RecoverNode<T, F> {
    dependency: Option<Box<dyn PromiseNode<T>>>,
    op: Option<F>,
}

impl<T, F> RecoverNode<T, F> {
    pub(crate) fn new(dependency: Box<dyn PromiseNode<T>>, op: F) -> Self {
        Self {
            dependency: Some(dependency),
            op: Some(op),
        }
    }
}

impl<T, F> Trace for RecoverNode<T, F> {
    fn trace_into(&self, out: &mut Vec<&'static str>) {
        out.push(type_name::<Self>());
        if let Some(dependency) = &self.dependency {
            dependency.trace_into(out);
        }
    }
}

impl<T, F> PromiseNode<T> for RecoverNode<T, F>
where
    F: FnOnce(Fault) -> Settled<T>,
{
    fn on_ready(&mut self, waker: EventRef) -> bool {
        self.dependency
            .as_mut()
            .expect("recovery already consumed its dependency")
            .on_ready(waker)
    }

    fn get(&mut self) -> Settled<T> {
        let mut dependency = self
            .dependency
            .take()
            .expect("get() may be called at most once");
        let mut intermediate = dependency.get();
        drop_folding(&mut intermediate, dependency);

        match intermediate {
            Ok(value) => Ok(value),
            Err(fault) => {
                let op = self.op.take().expect("recovery already ran its function");
                catching(move || op(fault)).and_then(|settled| settled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::event_loop::EventLoop;
    use crate::promise::Promise;

    #[test]
    fn transform_applies_function_to_value() {
        let event_loop = EventLoop::new();
        let promise = Promise::fulfilled(20).map(|n| n + 2);
        assert_eq!(event_loop.wait(promise).unwrap(), 22);
    }

    #[test]
    fn fault_short_circuits_past_the_function() {
        let event_loop = EventLoop::new();

        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let promise = Promise::<i32>::rejected(Fault::new("upstream")).map(move |n| {
            flag.set(true);
            n
        });

        let fault = event_loop.wait(promise).unwrap_err();
        assert_eq!(fault.message(), "upstream");
        assert!(!ran.get());
    }

    #[test]
    fn panicking_function_becomes_a_fault() {
        let event_loop = EventLoop::new();
        let promise = Promise::fulfilled(1).map(|_n| -> i32 { panic!("bad transform") });
        let fault = event_loop.wait(promise).unwrap_err();
        assert_eq!(fault.message(), "bad transform");
    }

    #[test]
    fn recover_rewrites_a_fault() {
        let event_loop = EventLoop::new();
        let promise = Promise::<i32>::rejected(Fault::new("nope")).recover(|fault| {
            assert_eq!(fault.message(), "nope");
            7
        });
        assert_eq!(event_loop.wait(promise).unwrap(), 7);
    }

    #[test]
    fn recover_passes_values_through_untouched() {
        let event_loop = EventLoop::new();

        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let promise = Promise::fulfilled(3).recover(move |_fault| {
            flag.set(true);
            0
        });

        assert_eq!(event_loop.wait(promise).unwrap(), 3);
        assert!(!ran.get());
    }

    #[test]
    fn dependency_inputs_are_released_before_the_function_returns() {
        let event_loop = EventLoop::new();

        let released = Rc::new(Cell::new(false));
        struct ReleaseFlag(Rc<Cell<bool>>);
        impl Drop for ReleaseFlag {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let payload = ReleaseFlag(Rc::clone(&released));
        let observed = Rc::clone(&released);
        let promise = Promise::fulfilled(1)
            .attach(payload)
            .map(move |n| (n, observed.get()));

        let (value, was_released) = event_loop.wait(promise).unwrap();
        assert_eq!(value, 1);
        assert!(was_released);
    }
}
