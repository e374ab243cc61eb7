//! The README example: build a small promise graph and drive it.

use crank::{EventLoop, LoggingErrorHandler, Promise, TaskSet, promise_and_fulfiller, yield_now};

fn main() {
    let event_loop = EventLoop::new();

    // Transforms chain lazily; nothing runs until the loop turns the crank.
    let greeting = Promise::fulfilled("hello")
        .map(str::to_uppercase)
        .then(|text| Promise::fulfilled(format!("{text}, world")));
    println!("{}", event_loop.wait(greeting).unwrap());

    // Callback-style completion.
    let (promise, fulfiller) = promise_and_fulfiller::<u32>();
    fulfiller.fulfill(42);
    println!("fulfilled with {}", event_loop.wait(promise).unwrap());

    // Fire-and-forget background work; failures would go to the handler.
    let tasks = TaskSet::new(LoggingErrorHandler);
    tasks.add(yield_now().map(|()| println!("background task ran")));
    event_loop.wait(yield_now()).unwrap();
    assert!(tasks.is_empty());
}
