//! Typed publish/subscribe bus
//!
//! Producers (physics, weather, mapping) publish [`EventPayload`]s; consumers
//! subscribe per [`EventKind`]. Two delivery modes exist:
//!
//! - **inline**: the handler runs on the publisher's thread. Meant for cheap
//!   work such as the mapping recompute.
//! - **queued**: the handler runs on its own worker thread behind a bounded
//!   drop-oldest [`Mailbox`]. Meant for audio or rendering backends that may
//!   fall behind; the publisher never waits on them.
//!
//! Every handler invocation is isolated: an `Err` or a panic is logged and
//! counted, and delivery to the remaining subscribers carries on.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::mailbox::Mailbox;
use super::{Event, EventKind, EventPayload};

/// Return type of subscriber handlers
pub type HandlerResult = anyhow::Result<()>;

type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Bus-related errors
#[derive(Error, Debug)]
pub enum BusError {
    #[error("event bus is shut down")]
    Closed,

    #[error("publishing {0} from inside a {0} handler would loop")]
    FeedbackLoop(EventKind),

    #[error("failed to spawn subscriber worker: {0}")]
    Spawn(#[from] std::io::Error),
}

thread_local! {
    // Bit per EventKind currently being dispatched on this thread.
    static DISPATCHING: Cell<u8> = Cell::new(0);
}

struct DispatchGuard {
    bit: u8,
}

impl DispatchGuard {
    fn enter(bit: u8) -> Self {
        DISPATCHING.with(|d| d.set(d.get() | bit));
        Self { bit }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|d| d.set(d.get() & !self.bit));
    }
}

enum Delivery {
    Inline(Handler),
    Queued(Arc<Mailbox>),
}

struct Entry {
    id: u64,
    active: AtomicBool,
    delivery: Delivery,
}

#[derive(Default)]
struct Stats {
    failures: AtomicU64,
}

struct Inner {
    epoch: Instant,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    closed: AtomicBool,
    stats: Arc<Stats>,
    registry: [RwLock<Vec<Arc<Entry>>>; 4],
    // Held for the whole delivery of one event: per-kind FIFO.
    dispatch: [Mutex<()>; 4],
}

impl Drop for Inner {
    fn drop(&mut self) {
        for slot in &self.registry {
            for entry in slot.write().drain(..) {
                if let Delivery::Queued(mailbox) = &entry.delivery {
                    mailbox.close();
                }
            }
        }
    }
}

/// In-process publish/subscribe channel.
///
/// Cloning is cheap and every clone refers to the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                epoch: Instant::now(),
                next_id: AtomicU64::new(1),
                next_seq: AtomicU64::new(0),
                closed: AtomicBool::new(false),
                stats: Arc::new(Stats::default()),
                registry: std::array::from_fn(|_| RwLock::new(Vec::new())),
                dispatch: std::array::from_fn(|_| Mutex::new(())),
            }),
        }
    }

    /// Subscribe with inline delivery on the publisher's thread.
    ///
    /// The handler runs inside `publish`, so a slow one delays the
    /// publisher; for the simulation that is the clock. Renderers,
    /// sonifiers and anything else that may block belong on
    /// [`EventBus::subscribe_queued`].
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Result<Subscription, BusError>
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(self.register(kind, id, Delivery::Inline(Arc::new(handler)), None))
    }

    /// Subscribe with delivery on a dedicated worker thread.
    ///
    /// At most `capacity` events wait in the mailbox; when it is full the
    /// oldest pending event is discarded.
    pub fn subscribe_queued<F>(
        &self,
        kind: EventKind,
        capacity: usize,
        handler: F,
    ) -> Result<Subscription, BusError>
    where
        F: Fn(&Event) -> HandlerResult + Send + 'static,
    {
        self.ensure_open()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mailbox = Arc::new(Mailbox::new(capacity));

        let worker_mailbox = mailbox.clone();
        let stats = self.inner.stats.clone();
        thread::Builder::new()
            .name(format!("bus-{}-{}", kind, id))
            .spawn(move || {
                while let Some(event) = worker_mailbox.pop() {
                    if worker_mailbox.is_closed() {
                        break;
                    }
                    invoke(&handler, &event, id, &stats);
                }
                debug!(%kind, subscriber = id, "queued subscriber stopped");
            })?;

        Ok(self.register(kind, id, Delivery::Queued(mailbox.clone()), Some(mailbox)))
    }

    fn register(
        &self,
        kind: EventKind,
        id: u64,
        delivery: Delivery,
        mailbox: Option<Arc<Mailbox>>,
    ) -> Subscription {
        let entry = Arc::new(Entry {
            id,
            active: AtomicBool::new(true),
            delivery,
        });
        self.inner.registry[kind.index()].write().push(entry.clone());
        debug!(%kind, subscriber = id, queued = mailbox.is_some(), "subscribed");

        Subscription {
            id,
            kind,
            bus: Arc::downgrade(&self.inner),
            entry,
            mailbox,
        }
    }

    /// Release a subscription. Equivalent to dropping the handle.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Deliver an event to every current subscriber of its kind, in
    /// subscription order. Returns the event's sequence number.
    ///
    /// Inline handlers run under the kind's dispatch lock, so events of one
    /// kind are delivered in publish order even with several publishers.
    pub fn publish(&self, payload: impl Into<EventPayload>) -> Result<u64, BusError> {
        let payload = payload.into();
        let kind = payload.kind();
        self.ensure_open()?;

        let bit = 1u8 << kind.index();
        if DISPATCHING.with(|d| d.get() & bit != 0) {
            warn!(%kind, "rejected publish from inside a handler of the same kind");
            return Err(BusError::FeedbackLoop(kind));
        }

        let _order = self.inner.dispatch[kind.index()].lock();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let event = Arc::new(Event {
            seq,
            published_at: self.inner.epoch.elapsed(),
            payload,
        });

        let subscribers = self.inner.registry[kind.index()].read().clone();
        let _guard = DispatchGuard::enter(bit);
        for entry in &subscribers {
            if !entry.active.load(Ordering::Acquire) || self.is_closed() {
                continue;
            }
            match &entry.delivery {
                Delivery::Inline(handler) => {
                    invoke(handler.as_ref(), &event, entry.id, &self.inner.stats)
                }
                Delivery::Queued(mailbox) => {
                    if mailbox.push(event.clone()) {
                        debug!(
                            %kind,
                            subscriber = entry.id,
                            "subscriber lagging, dropped oldest event"
                        );
                    }
                }
            }
        }

        Ok(seq)
    }

    /// Remove every subscription and stop all queued workers.
    ///
    /// Later publishes fail with [`BusError::Closed`]. A handler already
    /// running finishes, but nothing new is delivered.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut removed = 0usize;
        for slot in &self.inner.registry {
            for entry in slot.write().drain(..) {
                entry.active.store(false, Ordering::Release);
                if let Delivery::Queued(mailbox) = &entry.delivery {
                    mailbox.close();
                }
                removed += 1;
            }
        }
        info!(removed, "event bus shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner.registry[kind.index()].read().len()
    }

    /// Handler invocations that returned an error or panicked
    pub fn failure_count(&self) -> u64 {
        self.inner.stats.failures.load(Ordering::Relaxed)
    }

    /// Time since the bus was created
    pub fn elapsed(&self) -> Duration {
        self.inner.epoch.elapsed()
    }

    fn ensure_open(&self) -> Result<(), BusError> {
        if self.is_closed() {
            Err(BusError::Closed)
        } else {
            Ok(())
        }
    }
}

fn invoke(
    handler: &(dyn Fn(&Event) -> HandlerResult + Send),
    event: &Event,
    id: u64,
    stats: &Stats,
) {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            warn!(kind = %event.kind(), subscriber = id, error = %err, "subscriber failed");
        }
        Err(panic) => {
            stats.failures.fetch_add(1, Ordering::Relaxed);
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            warn!(kind = %event.kind(), subscriber = id, %message, "subscriber panicked");
        }
    }
}

/// Scoped subscription handle.
///
/// Dropping the handle, including during a panic unwind, removes the
/// handler from the bus and stops its worker if it has one.
pub struct Subscription {
    id: u64,
    kind: EventKind,
    bus: Weak<Inner>,
    entry: Arc<Entry>,
    mailbox: Option<Arc<Mailbox>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.entry.active.load(Ordering::Acquire)
            && self
                .bus
                .upgrade()
                .map(|inner| !inner.closed.load(Ordering::Acquire))
                .unwrap_or(false)
    }

    /// Events discarded because this subscriber fell behind
    pub fn dropped(&self) -> u64 {
        self.mailbox.as_ref().map(|m| m.dropped()).unwrap_or(0)
    }

    /// Events waiting in this subscriber's mailbox
    pub fn pending(&self) -> usize {
        self.mailbox.as_ref().map(|m| m.len()).unwrap_or(0)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.entry.active.store(false, Ordering::Release);
        if let Some(inner) = self.bus.upgrade() {
            inner.registry[self.kind.index()]
                .write()
                .retain(|entry| entry.id != self.id);
        }
        if let Some(mailbox) = &self.mailbox {
            mailbox.close();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("queued", &self.mailbox.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pendulum_types::{PendulumState, WeatherSnapshot};
    use std::sync::mpsc;

    fn step(tick: u64) -> PendulumState {
        PendulumState {
            tick,
            ..PendulumState::at_rest()
        }
    }

    #[test]
    fn test_inline_delivery_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let _a = {
            let log = log.clone();
            bus.subscribe(EventKind::PendulumStepped, move |_| {
                log.lock().push("a");
                Ok(())
            })
            .unwrap()
        };
        let _b = {
            let log = log.clone();
            bus.subscribe(EventKind::PendulumStepped, move |_| {
                log.lock().push("b");
                Ok(())
            })
            .unwrap()
        };

        bus.publish(step(1)).unwrap();
        assert_eq!(*log.lock(), vec!["a", "b"]);
    }

    #[test]
    fn test_only_matching_kind_is_delivered() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let _sub = {
            let count = count.clone();
            bus.subscribe(EventKind::WeatherUpdated, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap()
        };

        bus.publish(step(1)).unwrap();
        bus.publish(WeatherSnapshot::fallback()).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_and_panicking_handlers_are_isolated() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicU64::new(0));

        let _err = bus
            .subscribe(EventKind::PendulumStepped, |_| anyhow::bail!("backend offline"))
            .unwrap();
        let _panic = bus
            .subscribe(EventKind::PendulumStepped, |_| panic!("renderer crashed"))
            .unwrap();
        let _ok = {
            let reached = reached.clone();
            bus.subscribe(EventKind::PendulumStepped, move |_| {
                reached.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap()
        };

        assert!(bus.publish(step(1)).is_ok());
        assert!(bus.publish(step(2)).is_ok());
        assert_eq!(reached.load(Ordering::SeqCst), 2);
        assert_eq!(bus.failure_count(), 4);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let sub = {
            let count = count.clone();
            bus.subscribe(EventKind::PendulumStepped, move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap()
        };
        assert_eq!(bus.subscriber_count(EventKind::PendulumStepped), 1);

        bus.publish(step(1)).unwrap();
        bus.unsubscribe(sub);
        bus.publish(step(2)).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(EventKind::PendulumStepped), 0);
    }

    #[test]
    fn test_same_kind_republish_is_rejected() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel();
        let inner_bus = bus.clone();
        let _sub = bus
            .subscribe(EventKind::PendulumStepped, move |_| {
                let result = inner_bus.publish(step(99));
                tx.send(matches!(result, Err(BusError::FeedbackLoop(EventKind::PendulumStepped))))
                    .ok();
                Ok(())
            })
            .unwrap();

        bus.publish(step(1)).unwrap();
        assert!(rx.recv().unwrap());
    }

    #[test]
    fn test_other_kind_may_be_published_from_handler() {
        let bus = EventBus::new();
        let inner_bus = bus.clone();
        let _relay = bus
            .subscribe(EventKind::PendulumStepped, move |_| {
                inner_bus.publish(WeatherSnapshot::fallback())?;
                Ok(())
            })
            .unwrap();
        let (tx, rx) = mpsc::channel();
        let _sink = bus
            .subscribe(EventKind::WeatherUpdated, move |event| {
                tx.send(event.seq).ok();
                Ok(())
            })
            .unwrap();

        let first = bus.publish(step(1)).unwrap();
        assert_eq!(rx.recv().unwrap(), first + 1);
        assert_eq!(bus.failure_count(), 0);
    }

    #[test]
    fn test_queued_delivery_preserves_order() {
        let bus = EventBus::new();
        let (tx, rx) = mpsc::channel();
        let _sub = bus
            .subscribe_queued(EventKind::PendulumStepped, 16, move |event| {
                tx.send(event.pendulum().map(|s| s.tick)).ok();
                Ok(())
            })
            .unwrap();

        for tick in 1..=5 {
            bus.publish(step(tick)).unwrap();
        }
        let received: Vec<_> = (0..5)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        assert_eq!(received, (1..=5).map(Some).collect::<Vec<_>>());
    }

    #[test]
    fn test_shutdown_rejects_publish_and_clears_subscribers() {
        let bus = EventBus::new();
        let sub = bus
            .subscribe(EventKind::ParametersChanged, |_| Ok(()))
            .unwrap();
        bus.shutdown();

        assert!(!sub.is_active());
        assert_eq!(bus.subscriber_count(EventKind::ParametersChanged), 0);
        assert!(matches!(bus.publish(step(1)), Err(BusError::Closed)));
        assert!(matches!(
            bus.subscribe(EventKind::PendulumStepped, |_| Ok(())),
            Err(BusError::Closed)
        ));
    }
}
