//! Fire-and-forget promises whose failures go to an error handler.

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use foldhash::{HashMap, HashMapExt};

use crate::event::{Event, FireHandler};
use crate::fault::{Fault, drop_folding};
use crate::node::PromiseNode;
use crate::promise::Promise;

/// Receives the faults of failed tasks.
pub trait ErrorHandler {
    fn task_failed(&mut self, fault: Fault);
}

/// Logs every fault at ERROR. The default handler for the loop's daemon
/// set.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    #[cfg_attr(test, mutants::skip)] // Logging only; no observable contract.
    fn task_failed(&mut self, fault: Fault) {
        tracing::error!(fault = %fault, "uncaught failure in daemonized task");
    }
}

/// A set of promises run to completion in the background.
///
/// Each added promise becomes a self-removing task: when it settles, its
/// outcome is extracted, any fault is reported to the set's error handler
/// exactly once, and the task disappears from the set.
///
/// # Example
///
/// ```rust
/// use crank::{EventLoop, LoggingErrorHandler, Promise, TaskSet, yield_now};
///
/// let event_loop = EventLoop::new();
/// let tasks = TaskSet::new(LoggingErrorHandler);
///
/// tasks.add(Promise::fulfilled(()));
/// event_loop.wait(yield_now()).unwrap();
/// assert!(tasks.is_empty());
/// ```
pub struct TaskSet {
    core: Rc<RefCell<TaskSetCore>>,
}

struct TaskSetCore {
    /// Taken out for the duration of a `task_failed` call so the handler
    /// may add new tasks re-entrantly.
    error_handler: Option<Box<dyn ErrorHandler>>,
    tasks: HashMap<u64, TaskEntry>,
    next_id: u64,
}

struct TaskEntry {
    /// The task's node drops before its event registration.
    task: Rc<RefCell<Task>>,
    _event: Event,
}

struct Task {
    set: Weak<RefCell<TaskSetCore>>,
    id: u64,
    node: Option<Box<dyn PromiseNode<()>>>,
}

impl TaskSet {
    #[must_use]
    pub fn new(error_handler: impl ErrorHandler + 'static) -> Self {
        Self {
            core: Rc::new(RefCell::new(TaskSetCore {
                error_handler: Some(Box::new(error_handler)),
                tasks: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Adds a promise to run to completion in the background.
    ///
    /// # Panics
    ///
    /// Panics if no event loop is running on this thread.
    pub fn add(&self, promise: Promise<()>) {
        let id = {
            let mut core = self.core.borrow_mut();
            let id = core.next_id;
            core.next_id += 1;
            id
        };

        let task = Rc::new(RefCell::new(Task {
            set: Rc::downgrade(&self.core),
            id,
            node: Some(promise.into_node()),
        }));
        let task_dyn: Rc<RefCell<dyn FireHandler>> = task.clone();
        let handler: Weak<RefCell<dyn FireHandler>> = Rc::downgrade(&task_dyn);
        let event = Event::new(handler);

        let ready = task
            .borrow_mut()
            .node
            .as_mut()
            .expect("task starts with a node")
            .on_ready(event.waker());
        if ready {
            event.arm_depth_first();
        }

        self.core.borrow_mut().tasks.insert(
            id,
            TaskEntry {
                task,
                _event: event,
            },
        );
    }

    /// Whether all added tasks have completed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.core.borrow().tasks.is_empty()
    }

    /// A diagnostic trace of every pending task.
    #[must_use]
    pub fn trace(&self) -> String {
        let core = self.core.borrow();
        let traces: Vec<String> = core
            .tasks
            .values()
            .map(|entry| entry.task.borrow().trace())
            .collect();
        traces.join("\n============================================\n")
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        // Task teardown may observe the loop or this set, so detach
        // everything first and let the buffer unwind on its own.
        let detached: Vec<TaskEntry> = {
            let mut core = self.core.borrow_mut();
            core.tasks.drain().map(|(_id, entry)| entry).collect()
        };
        drop(detached);
    }
}

impl fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSet")
            .field("tasks", &self.core.borrow().tasks.len())
            .finish_non_exhaustive()
    }
}

impl FireHandler for Task {
    fn fire(&mut self) -> Option<Box<dyn Any>> {
        let mut node = self.node.take().expect("task fired twice");
        let mut result = node.get();
        drop_folding(&mut result, node);

        let set = self.set.upgrade().expect("task outlived its task set");

        if let Err(fault) = result {
            let mut handler = set
                .borrow_mut()
                .error_handler
                .take()
                .expect("task error handler is already running");
            handler.task_failed(fault);
            set.borrow_mut().error_handler = Some(handler);
        }

        let entry = set
            .borrow_mut()
            .tasks
            .remove(&self.id)
            .expect("task missing from its set");
        // The loop drops the entry, and with it this task's event, once the
        // firing flag is cleared.
        Some(Box::new(entry))
    }

    fn trace(&self) -> String {
        let mut labels = vec![type_name::<Self>()];
        if let Some(node) = &self.node {
            node.trace_into(&mut labels);
        }
        labels.join("\n")
    }
}
