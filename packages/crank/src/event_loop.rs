//! The event loop: owns the work queue and drives promises to completion.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::event::{Event, FireHandler};
use crate::fault::{Settled, catching, fold_fault};
use crate::promise::Promise;
use crate::queue::EventQueue;
use crate::sleep::Sleeper;
use crate::task_set::{LoggingErrorHandler, TaskSet};

thread_local! {
    static CURRENT: RefCell<Option<Rc<LoopState>>> = const { RefCell::new(None) };
}

/// The state shared between the loop, its events, and its promises.
pub(crate) struct LoopState {
    pub(crate) queue: RefCell<EventQueue>,
    /// True while `wait` is turning the crank.
    running: Cell<bool>,
    /// Fire-and-forget tasks owned by the loop; torn down before the loop
    /// itself so task destructors can still see it.
    daemons: RefCell<Option<TaskSet>>,
    sleeper: Arc<Sleeper>,
}

impl LoopState {
    /// The loop bound to this thread.
    ///
    /// # Panics
    ///
    /// Panics if no event loop is running on this thread.
    pub(crate) fn current() -> Rc<LoopState> {
        CURRENT
            .with(|current| current.borrow().as_ref().map(Rc::clone))
            .expect("no event loop is running on this thread")
    }
}

/// A single-threaded cooperative event loop.
///
/// Each loop is bound to the thread that created it, and each thread can
/// host at most one loop at a time. Promises built while the loop is
/// current schedule their work on it; [`wait`](EventLoop::wait) turns the
/// crank until the awaited promise settles.
///
/// Continuations armed while an event fires run depth-first: they execute
/// before any work that was already queued behind the firing event.
/// [`yield_now`](crate::yield_now) steps behind everything instead.
///
/// # Example
///
/// ```rust
/// use crank::{EventLoop, Promise};
///
/// let event_loop = EventLoop::new();
///
/// let promise = Promise::fulfilled(2).map(|n| n * 2);
/// assert_eq!(event_loop.wait(promise).unwrap(), 4);
/// ```
pub struct EventLoop {
    state: Rc<LoopState>,
}

impl EventLoop {
    /// Creates an event loop bound to the current thread.
    ///
    /// # Panics
    ///
    /// Panics if this thread already has an event loop.
    #[must_use]
    pub fn new() -> Self {
        let state = Rc::new(LoopState {
            queue: RefCell::new(EventQueue::new()),
            running: Cell::new(false),
            daemons: RefCell::new(Some(TaskSet::new(LoggingErrorHandler))),
            sleeper: Arc::new(Sleeper::new()),
        });
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            assert!(current.is_none(), "this thread already has an event loop");
            *current = Some(Rc::clone(&state));
        });
        Self { state }
    }

    /// Whether this loop is the one bound to the current thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .is_some_and(|state| Rc::ptr_eq(state, &self.state))
        })
    }

    /// Runs the loop until `promise` settles, then returns its outcome.
    ///
    /// When the queue is empty and the promise is still pending, the loop
    /// blocks until an [`EventLoop::waker`] handle wakes it.
    ///
    /// A failure raised while tearing down the settled promise graph is
    /// folded into the returned outcome.
    ///
    /// # Panics
    ///
    /// Panics if called from a thread this loop is not bound to, or from
    /// within an event callback (`wait` does not nest).
    pub fn wait<T: 'static>(&self, promise: Promise<T>) -> Settled<T> {
        assert!(
            self.is_current(),
            "wait() may only be called on the event loop's home thread"
        );
        assert!(
            !self.state.running.get(),
            "wait() is not allowed from within event callbacks"
        );

        let done = Rc::new(RefCell::new(DoneFlag { fired: false }));
        let done_dyn: Rc<RefCell<dyn FireHandler>> = done.clone();
        let done_handler: Weak<RefCell<dyn FireHandler>> = Rc::downgrade(&done_dyn);
        let done_event = Event::new(done_handler);

        let mut node = promise.into_node();
        if node.on_ready(done_event.waker()) {
            done.borrow_mut().fired = true;
        }

        let _running = RunningGuard::engage(&self.state);

        while !done.borrow().fired {
            let popped = self.state.queue.borrow_mut().pop_front();
            match popped {
                Some((id, handler)) => {
                    let keep_until_idle = handler.borrow_mut().fire();
                    self.state.queue.borrow_mut().finish_fire(id);
                    drop(keep_until_idle);
                }
                None => {
                    self.state.sleeper.prepare_to_sleep();
                    if self.state.queue.borrow().is_empty() {
                        self.state.sleeper.sleep();
                    } else {
                        // Work arrived between the emptiness check and the
                        // prepared sleep; cancel the nap and keep going.
                        self.state.sleeper.wake();
                    }
                }
            }
        }

        let mut result = node.get();
        if let Err(fault) = catching(move || drop(node)) {
            fold_fault(&mut result, fault);
        }
        result
    }

    /// Hands a promise to the loop to run in the background.
    ///
    /// The promise advances whenever the loop runs; failures go to the
    /// default logging error handler. Use a [`TaskSet`] directly to observe
    /// failures yourself.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::cell::Cell;
    /// use std::rc::Rc;
    ///
    /// use crank::{EventLoop, yield_now};
    ///
    /// let event_loop = EventLoop::new();
    ///
    /// let ran = Rc::new(Cell::new(false));
    /// let flag = Rc::clone(&ran);
    /// event_loop.daemonize(yield_now().map(move |()| flag.set(true)));
    ///
    /// event_loop.wait(yield_now()).unwrap();
    /// assert!(ran.get());
    /// ```
    ///
    /// # Panics
    ///
    /// Panics if the loop is already shutting down.
    pub fn daemonize(&self, promise: Promise<()>) {
        let daemons = self.state.daemons.borrow();
        daemons
            .as_ref()
            .expect("the event loop is shutting down")
            .add(promise);
    }

    /// A handle that can wake this loop from any thread while it sleeps on
    /// an empty queue.
    #[must_use]
    pub fn waker(&self) -> LoopWaker {
        LoopWaker {
            sleeper: Arc::clone(&self.state.sleeper),
        }
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("running", &self.state.running.get())
            .finish_non_exhaustive()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        // Daemon tasks go first; their teardown may still use the loop.
        let daemons = self.state.daemons.borrow_mut().take();
        drop(daemons);

        // Everything using the loop should be gone by now. Events still in
        // the queue mean leaked promises; unlink them so they can never
        // fire, and report what they were.
        let leaked = self.state.queue.borrow_mut().drain_for_shutdown();
        if !leaked.is_empty() {
            tracing::error!(
                count = leaked.len(),
                trace = %leaked.join("\n---\n"),
                "event loop destroyed with events still queued"
            );
        }

        CURRENT.with(|current| {
            *current.borrow_mut() = None;
        });
    }
}

/// Wakes a sleeping [`EventLoop`] from any thread.
///
/// This is the only cross-thread interaction the loop supports; it pairs
/// with an external event source that hands work to the loop's thread out
/// of band.
#[derive(Clone, Debug)]
pub struct LoopWaker {
    sleeper: Arc<Sleeper>,
}

impl LoopWaker {
    pub fn wake(&self) {
        self.sleeper.wake();
    }
}

/// The stack event `wait` arms on the awaited promise.
struct DoneFlag {
    fired: bool,
}

impl FireHandler for DoneFlag {
    fn fire(&mut self) -> Option<Box<dyn Any>> {
        self.fired = true;
        None
    }

    fn trace(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }
}

/// Marks the loop as running for a scope, clearing the flag on every exit
/// path.
struct RunningGuard<'a> {
    state: &'a LoopState,
}

impl<'a> RunningGuard<'a> {
    fn engage(state: &'a LoopState) -> Self {
        state.running.set(true);
        Self { state }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.state.running.set(false);
    }
}
