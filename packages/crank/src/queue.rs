//! The event loop's work queue.
//!
//! Armed events form a doubly-linked list threaded through an index-based
//! arena. Two arming modes define the observable scheduling order:
//!
//! - *Depth-first* arming inserts immediately after the most recent
//!   depth-first insertion of the current step, so continuations armed while
//!   an event fires run contiguously, before anything that was already
//!   queued behind it.
//! - *Breadth-first* arming appends at the tail, stepping behind all
//!   already-armed work.
//!
//! The insert point resets to the front of the queue each time the loop
//! detaches an event and again when it finishes firing one, so arms that
//! happen between fires also land at the front.
//!
//! A slot's `queued` flag plays the role of a "linked" bit: arming an
//! already-queued event is a no-op, and releasing a registration unlinks it
//! with the appropriate head/tail/insert-point fixups. Generations detect a
//! handle outliving its registration.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::event::FireHandler;

/// Identifies one event registration for its lifetime.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct EventId {
    index: usize,
    generation: u64,
}

pub(crate) struct EventQueue {
    slots: Vec<Slot>,
    free_head: Option<usize>,
    head: Option<usize>,
    tail: Option<usize>,
    /// Most recent depth-first insertion of the current step; `None` means
    /// the front of the queue.
    insert_after: Option<usize>,
}

struct Slot {
    generation: u64,
    body: SlotBody,
}

enum SlotBody {
    Free { next_free: Option<usize> },
    Live(LiveEvent),
}

struct LiveEvent {
    handler: Weak<RefCell<dyn FireHandler>>,
    prev: Option<usize>,
    next: Option<usize>,
    queued: bool,
    firing: bool,
}

impl EventQueue {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            head: None,
            tail: None,
            insert_after: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn register(&mut self, handler: Weak<RefCell<dyn FireHandler>>) -> EventId {
        let live = LiveEvent {
            handler,
            prev: None,
            next: None,
            queued: false,
            firing: false,
        };
        match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index];
                let SlotBody::Free { next_free } = &slot.body else {
                    unreachable!("free list points at a live slot");
                };
                self.free_head = *next_free;
                slot.body = SlotBody::Live(live);
                EventId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len();
                self.slots.push(Slot {
                    generation: 0,
                    body: SlotBody::Live(live),
                });
                EventId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Removes a registration, unlinking it from the queue if armed.
    ///
    /// # Panics
    ///
    /// Panics if the event is currently firing: an event callback must not
    /// destroy the event it is running on.
    pub(crate) fn release(&mut self, id: EventId) {
        let index = self.index_of(id);
        assert!(
            !self.live(index).firing,
            "promise callback destroyed its own event"
        );
        if self.live(index).queued {
            self.unlink(index);
        }
        let next_free = self.free_head;
        let slot = &mut self.slots[index];
        slot.generation += 1;
        slot.body = SlotBody::Free { next_free };
        self.free_head = Some(index);
    }

    /// Arms an event so its continuation runs before already-queued work.
    ///
    /// No-op if the event is already queued.
    pub(crate) fn arm_depth_first(&mut self, id: EventId) {
        let index = self.index_of(id);
        if self.live(index).queued {
            return;
        }

        match self.insert_after {
            None => {
                let old_head = self.head;
                {
                    let event = self.live_mut(index);
                    event.prev = None;
                    event.next = old_head;
                    event.queued = true;
                }
                match old_head {
                    Some(h) => self.live_mut(h).prev = Some(index),
                    None => self.tail = Some(index),
                }
                self.head = Some(index);
            }
            Some(point) => {
                let after = self.live(point).next;
                {
                    let event = self.live_mut(index);
                    event.prev = Some(point);
                    event.next = after;
                    event.queued = true;
                }
                self.live_mut(point).next = Some(index);
                match after {
                    Some(n) => self.live_mut(n).prev = Some(index),
                    None => self.tail = Some(index),
                }
            }
        }
        self.insert_after = Some(index);
    }

    /// Arms an event at the tail, behind all already-queued work.
    ///
    /// No-op if the event is already queued.
    pub(crate) fn arm_breadth_first(&mut self, id: EventId) {
        let index = self.index_of(id);
        if self.live(index).queued {
            return;
        }

        let old_tail = self.tail;
        {
            let event = self.live_mut(index);
            event.prev = old_tail;
            event.next = None;
            event.queued = true;
        }
        match old_tail {
            Some(t) => self.live_mut(t).next = Some(index),
            None => self.head = Some(index),
        }
        self.tail = Some(index);
    }

    /// Detaches the head event, marks it firing, and returns its handler.
    ///
    /// Also resets the depth-first insert point so continuations armed by
    /// the upcoming `fire` land at the front of the queue.
    pub(crate) fn pop_front(&mut self) -> Option<(EventId, Rc<RefCell<dyn FireHandler>>)> {
        let index = self.head?;
        let next = self.live(index).next;
        self.head = next;
        match next {
            Some(n) => self.live_mut(n).prev = None,
            None => self.tail = None,
        }
        self.insert_after = None;

        let generation = self.slots[index].generation;
        let event = self.live_mut(index);
        event.prev = None;
        event.next = None;
        event.queued = false;
        event.firing = true;
        let handler = event
            .handler
            .upgrade()
            .expect("queued event has no live handler");
        Some((EventId { index, generation }, handler))
    }

    pub(crate) fn finish_fire(&mut self, id: EventId) {
        let index = self.index_of(id);
        self.live_mut(index).firing = false;
        self.insert_after = None;
    }

    /// Forcibly unlinks every queued event, returning their traces.
    ///
    /// Used only when the loop is destroyed with work still queued.
    pub(crate) fn drain_for_shutdown(&mut self) -> Vec<String> {
        let mut traces = Vec::new();
        while let Some(index) = self.head {
            if let Some(handler) = self.live(index).handler.upgrade() {
                traces.push(handler.borrow().trace());
            }
            self.unlink(index);
        }
        self.insert_after = None;
        traces
    }

    fn unlink(&mut self, index: usize) {
        let (prev, next) = {
            let event = self.live(index);
            (event.prev, event.next)
        };
        if self.insert_after == Some(index) {
            self.insert_after = prev;
        }
        match prev {
            Some(p) => self.live_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.live_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let event = self.live_mut(index);
        event.prev = None;
        event.next = None;
        event.queued = false;
    }

    fn index_of(&self, id: EventId) -> usize {
        let slot = &self.slots[id.index];
        assert!(
            slot.generation == id.generation && matches!(slot.body, SlotBody::Live(_)),
            "event handle used after its event was destroyed"
        );
        id.index
    }

    fn live(&self, index: usize) -> &LiveEvent {
        match &self.slots[index].body {
            SlotBody::Live(event) => event,
            SlotBody::Free { .. } => unreachable!("queue links point at a free slot"),
        }
    }

    fn live_mut(&mut self, index: usize) -> &mut LiveEvent {
        match &mut self.slots[index].body {
            SlotBody::Live(event) => event,
            SlotBody::Free { .. } => unreachable!("queue links point at a free slot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use super::*;

    struct NoopHandler;

    impl FireHandler for NoopHandler {
        fn fire(&mut self) -> Option<Box<dyn Any>> {
            None
        }

        fn trace(&self) -> String {
            "noop".to_string()
        }
    }

    struct Registered {
        id: EventId,
        // Keeps the weak handler in the slot alive.
        _handler: Rc<RefCell<NoopHandler>>,
    }

    fn register(queue: &mut EventQueue) -> Registered {
        let handler = Rc::new(RefCell::new(NoopHandler));
        let handler_dyn: Rc<RefCell<dyn FireHandler>> = handler.clone();
        let weak: Weak<RefCell<dyn FireHandler>> = Rc::downgrade(&handler_dyn);
        Registered {
            id: queue.register(weak),
            _handler: handler,
        }
    }

    fn pop_ids(queue: &mut EventQueue) -> Vec<EventId> {
        let mut ids = Vec::new();
        while let Some((id, _handler)) = queue.pop_front() {
            queue.finish_fire(id);
            ids.push(id);
        }
        ids
    }

    #[test]
    fn breadth_first_appends_in_arm_order() {
        let mut queue = EventQueue::new();
        let a = register(&mut queue);
        let b = register(&mut queue);
        let c = register(&mut queue);

        queue.arm_breadth_first(a.id);
        queue.arm_breadth_first(b.id);
        queue.arm_breadth_first(c.id);

        assert_eq!(pop_ids(&mut queue), vec![a.id, b.id, c.id]);
        assert!(queue.is_empty());
    }

    #[test]
    fn depth_first_clusters_at_front_in_arm_order() {
        let mut queue = EventQueue::new();
        let x = register(&mut queue);
        let a = register(&mut queue);
        let b = register(&mut queue);

        queue.arm_breadth_first(x.id);
        // Outside any fire, depth-first arms land in front of queued work
        // but keep their own relative order.
        queue.arm_depth_first(a.id);
        queue.arm_depth_first(b.id);

        assert_eq!(pop_ids(&mut queue), vec![a.id, b.id, x.id]);
    }

    #[test]
    fn depth_first_during_fire_runs_before_queued_work() {
        let mut queue = EventQueue::new();
        let x = register(&mut queue);
        let y = register(&mut queue);
        let a = register(&mut queue);
        let b = register(&mut queue);

        queue.arm_breadth_first(x.id);
        queue.arm_breadth_first(y.id);

        let (popped, _handler) = queue.pop_front().unwrap();
        assert_eq!(popped, x.id);
        // Continuations armed while x fires step in front of y.
        queue.arm_depth_first(a.id);
        queue.arm_depth_first(b.id);
        queue.finish_fire(popped);

        assert_eq!(pop_ids(&mut queue), vec![a.id, b.id, y.id]);
    }

    #[test]
    fn arming_a_queued_event_is_a_no_op() {
        let mut queue = EventQueue::new();
        let a = register(&mut queue);
        let b = register(&mut queue);

        queue.arm_breadth_first(a.id);
        queue.arm_breadth_first(b.id);
        queue.arm_depth_first(a.id);
        queue.arm_breadth_first(a.id);

        assert_eq!(pop_ids(&mut queue), vec![a.id, b.id]);
    }

    #[test]
    fn release_unlinks_queued_event() {
        let mut queue = EventQueue::new();
        let a = register(&mut queue);
        let b = register(&mut queue);
        let c = register(&mut queue);

        queue.arm_breadth_first(a.id);
        queue.arm_breadth_first(b.id);
        queue.arm_breadth_first(c.id);
        queue.release(b.id);

        assert_eq!(pop_ids(&mut queue), vec![a.id, c.id]);
    }

    #[test]
    fn release_fixes_depth_first_insert_point() {
        let mut queue = EventQueue::new();
        let a = register(&mut queue);
        let b = register(&mut queue);
        let c = register(&mut queue);

        queue.arm_depth_first(a.id);
        // The insert point now trails a; releasing a must pull it back to
        // the front so the next depth-first arm lands there.
        queue.release(a.id);
        queue.arm_breadth_first(c.id);
        queue.arm_depth_first(b.id);

        assert_eq!(pop_ids(&mut queue), vec![b.id, c.id]);
    }

    #[test]
    #[should_panic(expected = "destroyed its own event")]
    fn release_while_firing_panics() {
        let mut queue = EventQueue::new();
        let a = register(&mut queue);

        queue.arm_breadth_first(a.id);
        let (id, _handler) = queue.pop_front().unwrap();
        queue.release(id);
    }

    #[test]
    fn slot_reuse_bumps_generation() {
        let mut queue = EventQueue::new();
        let a = register(&mut queue);
        let a_id = a.id;
        queue.release(a_id);

        let b = register(&mut queue);
        assert_ne!(a_id, b.id);
    }

    #[test]
    fn drain_for_shutdown_collects_traces() {
        let mut queue = EventQueue::new();
        let a = register(&mut queue);
        let b = register(&mut queue);

        queue.arm_breadth_first(a.id);
        queue.arm_breadth_first(b.id);

        let traces = queue.drain_for_shutdown();
        assert_eq!(traces, vec!["noop".to_string(), "noop".to_string()]);
        assert!(queue.is_empty());
    }
}
