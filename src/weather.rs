//! Weather input: sources, the single-slot exchange and the background poller
//!
//! Fetching from a real provider lives outside this crate; anything that
//! implements [`WeatherSource`] can feed the simulation.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use pendulum_types::WeatherSnapshot;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Weather-related errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WeatherError {
    #[error("weather unavailable: {0}")]
    Unavailable(String),
}

/// Provider of weather snapshots, polled periodically from its own thread
pub trait WeatherSource: Send + 'static {
    fn fetch(&mut self) -> Result<WeatherSnapshot, WeatherError>;
}

impl<F> WeatherSource for F
where
    F: FnMut() -> Result<WeatherSnapshot, WeatherError> + Send + 'static,
{
    fn fetch(&mut self) -> Result<WeatherSnapshot, WeatherError> {
        self()
    }
}

/// Source replaying a fixed list of snapshots in a loop.
///
/// Each fetch returns a copy stamped with the current time. An empty list
/// always reports the weather as unavailable.
#[derive(Debug, Clone, Default)]
pub struct StaticWeather {
    snapshots: Vec<WeatherSnapshot>,
    next: usize,
}

impl StaticWeather {
    pub fn new(snapshot: WeatherSnapshot) -> Self {
        Self::cycle(vec![snapshot])
    }

    pub fn cycle(snapshots: Vec<WeatherSnapshot>) -> Self {
        Self { snapshots, next: 0 }
    }

    /// Source that never has data
    pub fn unavailable() -> Self {
        Self::default()
    }
}

impl WeatherSource for StaticWeather {
    fn fetch(&mut self) -> Result<WeatherSnapshot, WeatherError> {
        if self.snapshots.is_empty() {
            return Err(WeatherError::Unavailable("no snapshots configured".to_string()));
        }
        let snapshot = self.snapshots[self.next % self.snapshots.len()].clone();
        self.next = (self.next + 1) % self.snapshots.len();
        Ok(snapshot.captured(std::time::SystemTime::now()))
    }
}

#[derive(Default)]
struct SlotState {
    pending: Option<WeatherSnapshot>,
    latest: Option<WeatherSnapshot>,
    attempts: u64,
    failures: u64,
}

/// Last-value-wins hand-off from the poller to the clock thread.
///
/// A snapshot that is not taken before the next one arrives is replaced.
#[derive(Default)]
pub struct WeatherSlot {
    state: Mutex<SlotState>,
}

impl WeatherSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, snapshot: WeatherSnapshot) {
        let mut state = self.state.lock();
        state.attempts += 1;
        state.latest = Some(snapshot.clone());
        state.pending = Some(snapshot);
    }

    /// Record a failed poll; the last good snapshot stays available.
    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.attempts += 1;
        state.failures += 1;
    }

    /// Take the snapshot delivered since the last call, if any.
    pub fn take(&self) -> Option<WeatherSnapshot> {
        self.state.lock().pending.take()
    }

    /// Most recent good snapshot, taken or not
    pub fn latest(&self) -> Option<WeatherSnapshot> {
        self.state.lock().latest.clone()
    }

    /// Completed polls, successful or not
    pub fn attempts(&self) -> u64 {
        self.state.lock().attempts
    }

    pub fn failures(&self) -> u64 {
        self.state.lock().failures
    }
}

/// How long [`WeatherPoller::stop`] waits for a fetch in progress
pub const STOP_GRACE: Duration = Duration::from_millis(50);

/// Fetch once and store the outcome in `slot`. Returns whether it succeeded.
///
/// A panicking source counts as a failed poll.
pub fn poll_once(source: &mut dyn WeatherSource, slot: &WeatherSlot) -> bool {
    let fetched = match panic::catch_unwind(AssertUnwindSafe(|| source.fetch())) {
        Ok(result) => result,
        Err(_) => {
            slot.record_failure();
            warn!(
                retained = slot.latest().is_some(),
                "weather source panicked, keeping last snapshot"
            );
            return false;
        }
    };
    match fetched {
        Ok(snapshot) => {
            debug!(
                temperature = snapshot.temperature,
                condition = %snapshot.condition,
                "weather snapshot received"
            );
            slot.put(snapshot);
            true
        }
        Err(err) => {
            slot.record_failure();
            warn!(
                error = %err,
                retained = slot.latest().is_some(),
                "weather unavailable, keeping last snapshot"
            );
            false
        }
    }
}

#[derive(Default)]
struct SignalState {
    stopped: bool,
    exited: bool,
}

#[derive(Default)]
struct StopSignal {
    state: Mutex<SignalState>,
    wake: Condvar,
}

/// Marks the poller thread as exited however it leaves.
struct ExitGuard(Arc<StopSignal>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.state.lock().exited = true;
        self.0.wake.notify_all();
    }
}

/// Background thread polling a [`WeatherSource`] at a fixed interval.
///
/// The first poll happens immediately. Stopping interrupts the wait between
/// polls. A fetch still running after [`STOP_GRACE`] is abandoned: the
/// thread is detached and exits once the fetch returns.
pub struct WeatherPoller {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl WeatherPoller {
    pub fn spawn<S: WeatherSource>(
        mut source: S,
        slot: Arc<WeatherSlot>,
        interval: Duration,
    ) -> io::Result<Self> {
        let signal = Arc::new(StopSignal::default());

        let thread_signal = signal.clone();
        let handle = thread::Builder::new()
            .name("weather-poller".to_string())
            .spawn(move || {
                let _exit = ExitGuard(thread_signal.clone());
                let mut deadline = Instant::now();
                loop {
                    if thread_signal.state.lock().stopped {
                        break;
                    }
                    poll_once(&mut source, &slot);
                    deadline += interval;

                    let mut state = thread_signal.state.lock();
                    while !state.stopped {
                        if thread_signal
                            .wake
                            .wait_until(&mut state, deadline)
                            .timed_out()
                        {
                            break;
                        }
                    }
                    if state.stopped {
                        break;
                    }
                }
                debug!("weather poller stopped");
            })?;

        info!(interval_secs = interval.as_secs_f64(), "weather poller started");
        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    /// Stop polling. Waits at most [`STOP_GRACE`] for the thread to exit.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        let exited = {
            let mut state = self.signal.state.lock();
            state.stopped = true;
            self.signal.wake.notify_all();
            let deadline = Instant::now() + STOP_GRACE;
            while !state.exited {
                if self.signal.wake.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            state.exited
        };

        if exited {
            if handle.join().is_err() {
                warn!("weather poller thread panicked");
            }
        } else {
            debug!("weather fetch still in progress, detaching poller");
        }
    }

    /// False once stopped, or if the thread has died.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for WeatherPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_is_last_value_wins() {
        let slot = WeatherSlot::new();
        assert!(slot.take().is_none());

        slot.put(WeatherSnapshot::new(1.0, 50.0, 0.0, 1000, "Clear"));
        slot.put(WeatherSnapshot::new(2.0, 50.0, 0.0, 1000, "Clear"));
        assert_eq!(slot.take().map(|w| w.temperature), Some(2.0));
        assert!(slot.take().is_none());
        assert_eq!(slot.latest().map(|w| w.temperature), Some(2.0));
        assert_eq!(slot.attempts(), 2);
    }

    #[test]
    fn test_failed_poll_keeps_last_snapshot() {
        let slot = WeatherSlot::new();
        let mut calls = 0;
        let mut source = move || {
            calls += 1;
            if calls == 1 {
                Ok(WeatherSnapshot::new(18.0, 60.0, 3.0, 1003, "Partly cloudy"))
            } else {
                Err(WeatherError::Unavailable("timeout".to_string()))
            }
        };

        assert!(poll_once(&mut source, &slot));
        assert!(!poll_once(&mut source, &slot));
        assert_eq!(slot.failures(), 1);
        assert_eq!(slot.attempts(), 2);
        assert_eq!(slot.latest().map(|w| w.temperature), Some(18.0));
        assert_eq!(slot.take().map(|w| w.condition_code), Some(1003));
    }

    #[test]
    fn test_static_weather_cycles() {
        let mut source = StaticWeather::cycle(vec![
            WeatherSnapshot::new(1.0, 0.0, 0.0, 1000, "Clear"),
            WeatherSnapshot::new(2.0, 0.0, 0.0, 1000, "Clear"),
        ]);
        let temps: Vec<_> = (0..3)
            .map(|_| source.fetch().map(|w| w.temperature))
            .collect();
        assert_eq!(temps, vec![Ok(1.0), Ok(2.0), Ok(1.0)]);
        assert!(StaticWeather::unavailable().fetch().is_err());
    }

    #[test]
    fn test_poller_polls_immediately_and_stops() {
        let slot = Arc::new(WeatherSlot::new());
        let mut poller = WeatherPoller::spawn(
            StaticWeather::new(WeatherSnapshot::fallback()),
            slot.clone(),
            Duration::from_secs(3600),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while slot.attempts() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(slot.attempts(), 1);

        poller.stop();
        assert!(!poller.is_running());
    }

    #[test]
    fn test_panicking_source_counts_as_failure() {
        let slot = Arc::new(WeatherSlot::new());
        let mut calls = 0;
        let source = move || -> Result<WeatherSnapshot, WeatherError> {
            calls += 1;
            if calls == 1 {
                panic!("provider crashed");
            }
            Ok(WeatherSnapshot::new(12.0, 40.0, 1.0, 1000, "Sunny"))
        };
        let mut poller =
            WeatherPoller::spawn(source, slot.clone(), Duration::from_millis(10)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while slot.latest().is_none() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(poller.is_running());
        assert_eq!(slot.failures(), 1);
        assert_eq!(slot.latest().map(|w| w.temperature), Some(12.0));

        poller.stop();
        assert!(!poller.is_running());
    }

    #[test]
    fn test_stop_does_not_wait_for_slow_fetch() {
        let slot = Arc::new(WeatherSlot::new());
        let (started_tx, started_rx) = std::sync::mpsc::channel();
        let source = move || -> Result<WeatherSnapshot, WeatherError> {
            started_tx.send(()).ok();
            thread::sleep(Duration::from_secs(3));
            Ok(WeatherSnapshot::fallback())
        };
        let mut poller =
            WeatherPoller::spawn(source, slot.clone(), Duration::from_secs(3600)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let begun = Instant::now();
        poller.stop();
        assert!(begun.elapsed() < Duration::from_secs(1));
        assert!(!poller.is_running());
        assert_eq!(slot.attempts(), 0);
    }
}
