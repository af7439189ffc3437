//! Bounded drop-oldest mailbox feeding one queued subscriber

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::Event;

struct MailboxState {
    queue: VecDeque<Arc<Event>>,
    closed: bool,
}

/// Single-consumer queue that never blocks the producer.
///
/// When full, the oldest pending event is discarded to make room: a slow
/// consumer always sees the most recent state rather than a growing backlog.
pub(crate) struct Mailbox {
    state: Mutex<MailboxState>,
    ready: Condvar,
    capacity: usize,
    dropped: AtomicU64,
}

impl Mailbox {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(MailboxState {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue an event. Returns `true` if an older event was discarded.
    pub(crate) fn push(&self, event: Arc<Event>) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        let mut evicted = false;
        while state.queue.len() >= self.capacity {
            state.queue.pop_front();
            evicted = true;
        }
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        state.queue.push_back(event);
        drop(state);
        self.ready.notify_one();
        evicted
    }

    /// Block until an event is available. Returns `None` once closed;
    /// anything still pending at that point is discarded.
    pub(crate) fn pop(&self) -> Option<Arc<Event>> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(event) = state.queue.pop_front() {
                return Some(event);
            }
            self.ready.wait(&mut state);
        }
    }

    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.queue.clear();
        drop(state);
        self.ready.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventPayload;
    use pendulum_types::PendulumState;
    use std::time::Duration;

    fn event(seq: u64) -> Arc<Event> {
        Arc::new(Event {
            seq,
            published_at: Duration::ZERO,
            payload: EventPayload::PendulumStepped(PendulumState::at_rest()),
        })
    }

    #[test]
    fn test_drops_oldest_when_full() {
        let mailbox = Mailbox::new(2);
        assert!(!mailbox.push(event(1)));
        assert!(!mailbox.push(event(2)));
        assert!(mailbox.push(event(3)));

        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.dropped(), 1);
        assert_eq!(mailbox.pop().map(|e| e.seq), Some(2));
        assert_eq!(mailbox.pop().map(|e| e.seq), Some(3));
    }

    #[test]
    fn test_close_wakes_waiting_consumer() {
        let mailbox = Arc::new(Mailbox::new(4));
        let consumer = {
            let mailbox = mailbox.clone();
            std::thread::spawn(move || mailbox.pop())
        };
        std::thread::sleep(Duration::from_millis(20));
        mailbox.close();
        assert!(consumer.join().unwrap().is_none());
        assert!(mailbox.is_closed());
        assert!(!mailbox.push(event(1)));
    }

    #[test]
    fn test_zero_capacity_is_treated_as_one() {
        let mailbox = Mailbox::new(0);
        mailbox.push(event(1));
        mailbox.push(event(2));
        assert_eq!(mailbox.len(), 1);
        assert_eq!(mailbox.pop().map(|e| e.seq), Some(2));
    }
}
