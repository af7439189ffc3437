//! Real-time runtime wiring physics, weather, mapping and the bus together
//!
//! Threads:
//! - `sim-clock`: sole owner of the [`PendulumEnsemble`]. Ticks on a fixed
//!   schedule `start + n·period`, so lateness never accumulates.
//! - `weather-poller`: fetches snapshots into a [`WeatherSlot`].
//! - one worker per queued subscriber (see [`EventBus::subscribe_queued`]).
//!
//! Commands from other threads reach the engine over a channel and are
//! applied between steps.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use pendulum_types::{PendulumParameters, SettingsError, SimulationSettings, WeatherSnapshot};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{BusError, Event, EventBus, EventKind, HandlerResult, Subscription};
use crate::mapping::{MappingConfig, MappingEngine, MappingError, MappingSubscription};
use crate::physics::{PendulumEnsemble, PhysicsError};
use crate::weather::{WeatherPoller, WeatherSlot, WeatherSource};

/// Errors surfaced by the runtime
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Physics(#[from] PhysicsError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("failed to spawn simulation thread: {0}")]
    Spawn(#[from] io::Error),

    #[error("simulation is not running")]
    Stopped,
}

type Reply = Sender<Result<(), PhysicsError>>;

/// Message to the clock thread
enum ClockCommand {
    SetGravity(f64, Reply),
    SetParameters(PendulumParameters, Reply),
    SetPendulumCount(usize, Reply),
    SetMassRange(f64, Reply),
    SetLengthRange(f64, Reply),
    Stop,
}

struct Clock {
    ensemble: PendulumEnsemble,
    bus: EventBus,
    slot: Arc<WeatherSlot>,
    commands: Receiver<ClockCommand>,
    period: Duration,
    dt: f64,
    fallback_pending: bool,
}

impl Clock {
    fn run(mut self) {
        let start = Instant::now();
        let period = self.period.as_secs_f64();
        let mut n: u64 = 0;

        loop {
            loop {
                match self.commands.try_recv() {
                    Ok(ClockCommand::Stop) | Err(mpsc::TryRecvError::Disconnected) => return,
                    Ok(command) => self.apply(command),
                    Err(mpsc::TryRecvError::Empty) => break,
                }
            }

            self.tick();

            n = n.saturating_add(1);
            let mut deadline = self.deadline(start, period, n);
            let behind = Instant::now().saturating_duration_since(deadline);
            if behind > self.period {
                let skipped = (behind.as_secs_f64() / period) as u64;
                n = n.saturating_add(skipped);
                deadline = self.deadline(start, period, n);
                debug!(skipped, "clock overrun, skipping ticks");
            }

            loop {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                match self.commands.recv_timeout(deadline - now) {
                    Ok(ClockCommand::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                    Ok(command) => self.apply(command),
                    Err(RecvTimeoutError::Timeout) => break,
                }
            }
        }
    }

    /// `start + n·period`, or one period from now once that is no longer
    /// representable.
    fn deadline(&self, start: Instant, period: f64, n: u64) -> Instant {
        Duration::try_from_secs_f64(period * n as f64)
            .ok()
            .and_then(|offset| start.checked_add(offset))
            .unwrap_or_else(|| Instant::now() + self.period)
    }

    fn tick(&mut self) {
        let snapshot = match self.slot.take() {
            Some(snapshot) => {
                self.fallback_pending = false;
                Some(snapshot)
            }
            None if self.fallback_pending && self.slot.attempts() > 0 => {
                self.fallback_pending = false;
                info!("no weather after first poll, using fallback snapshot");
                Some(WeatherSnapshot::fallback())
            }
            None => None,
        };

        if let Some(snapshot) = snapshot {
            self.ensemble.apply_weather(&snapshot);
            match self.bus.publish(snapshot) {
                Ok(_) | Err(BusError::Closed) => {}
                Err(err) => warn!(error = %err, "failed to publish weather"),
            }
        }

        if let Err(err) = self.ensemble.step(self.dt) {
            warn!(error = %err, "simulation step failed");
        }
    }

    fn apply(&mut self, command: ClockCommand) {
        let (result, reply) = match command {
            ClockCommand::SetGravity(gravity, reply) => {
                (self.ensemble.set_gravity(gravity), reply)
            }
            ClockCommand::SetParameters(params, reply) => {
                (self.ensemble.set_parameters(params), reply)
            }
            ClockCommand::SetPendulumCount(count, reply) => {
                (self.ensemble.set_count(count), reply)
            }
            ClockCommand::SetMassRange(range, reply) => {
                (self.ensemble.set_mass_range(range), reply)
            }
            ClockCommand::SetLengthRange(range, reply) => {
                (self.ensemble.set_length_range(range), reply)
            }
            ClockCommand::Stop => return,
        };
        let _ = reply.send(result);
    }
}

/// A running pendulum-weather pipeline.
///
/// Dropping it stops every thread and shuts the bus down.
pub struct Simulation {
    settings: SimulationSettings,
    bus: EventBus,
    mapping: Arc<MappingEngine>,
    mapping_subscription: Option<MappingSubscription>,
    commands: Sender<ClockCommand>,
    clock: Option<JoinHandle<()>>,
    poller: Option<WeatherPoller>,
}

impl Simulation {
    /// Validate everything, then start the weather poller and the clock.
    pub fn start<S: WeatherSource>(
        settings: SimulationSettings,
        mapping_config: &MappingConfig,
        weather: S,
    ) -> Result<Self, SimulationError> {
        Self::start_with_bus(settings, mapping_config, weather, EventBus::new())
    }

    /// Like [`Simulation::start`], on a bus the caller may already have
    /// subscribed to, so no early event is missed.
    pub fn start_with_bus<S: WeatherSource>(
        settings: SimulationSettings,
        mapping_config: &MappingConfig,
        weather: S,
        bus: EventBus,
    ) -> Result<Self, SimulationError> {
        settings.validate()?;
        let period = settings.tick_period()?;
        let poll_interval = settings.weather_poll_interval()?;
        let ensemble = PendulumEnsemble::from_settings(&settings)?.with_bus(bus.clone());
        let mapping = Arc::new(MappingEngine::new(mapping_config)?);
        let mapping_subscription = mapping.attach(&bus)?;

        let slot = Arc::new(WeatherSlot::new());
        let poller = WeatherPoller::spawn(weather, slot.clone(), poll_interval)?;

        let (commands, receiver) = mpsc::channel();
        let clock = Clock {
            ensemble,
            bus: bus.clone(),
            slot,
            commands: receiver,
            period,
            dt: settings.dt,
            fallback_pending: settings.fallback_weather,
        };
        let clock = thread::Builder::new()
            .name("sim-clock".to_string())
            .spawn(move || clock.run())?;

        info!(
            tick_rate_hz = settings.tick_rate_hz,
            dt = settings.dt,
            integrator = settings.integrator.as_str(),
            pendulums = settings.pendulum_count,
            "simulation started"
        );
        Ok(Self {
            settings,
            bus,
            mapping,
            mapping_subscription: Some(mapping_subscription),
            commands,
            clock: Some(clock),
            poller: Some(poller),
        })
    }

    /// The bus every event is published on.
    ///
    /// [`EventBus::subscribe`] handlers run on the clock thread, inside the
    /// tick. Anything slow (renderers, sonifiers, I/O) must subscribe with
    /// [`Simulation::subscribe_queued`] instead, or it stalls the clock.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    pub fn mapping(&self) -> &Arc<MappingEngine> {
        &self.mapping
    }

    /// Queued subscription sized by `subscriber_queue_capacity`.
    pub fn subscribe_queued<F>(
        &self,
        kind: EventKind,
        handler: F,
    ) -> Result<Subscription, SimulationError>
    where
        F: Fn(&Event) -> HandlerResult + Send + 'static,
    {
        Ok(self
            .bus
            .subscribe_queued(kind, self.settings.subscriber_queue_capacity, handler)?)
    }

    /// Swap the mapping config after validating it. Returns the new revision.
    pub fn reload_mapping(&self, config: &MappingConfig) -> Result<u64, SimulationError> {
        Ok(self.mapping.load_config(config)?)
    }

    /// Change gravity; takes effect before the next step.
    pub fn set_gravity(&self, gravity: f64) -> Result<(), SimulationError> {
        self.command(|reply| ClockCommand::SetGravity(gravity, reply))
    }

    /// Replace the pendulum parameters; takes effect before the next step.
    pub fn set_parameters(&self, params: PendulumParameters) -> Result<(), SimulationError> {
        self.command(|reply| ClockCommand::SetParameters(params, reply))
    }

    /// Resize the ensemble. Surviving members keep their state and their
    /// variation; new ones start from the initial state.
    pub fn set_pendulum_count(&self, count: usize) -> Result<(), SimulationError> {
        self.command(|reply| ClockCommand::SetPendulumCount(count, reply))
    }

    /// Change the relative mass spread across the ensemble.
    pub fn set_mass_range(&self, range: f64) -> Result<(), SimulationError> {
        self.command(|reply| ClockCommand::SetMassRange(range, reply))
    }

    /// Change the relative length spread across the ensemble.
    pub fn set_length_range(&self, range: f64) -> Result<(), SimulationError> {
        self.command(|reply| ClockCommand::SetLengthRange(range, reply))
    }

    fn command(&self, build: impl FnOnce(Reply) -> ClockCommand) -> Result<(), SimulationError> {
        if !self.is_running() {
            return Err(SimulationError::Stopped);
        }
        let (reply, response) = mpsc::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| SimulationError::Stopped)?;
        response.recv().map_err(|_| SimulationError::Stopped)??;
        Ok(())
    }

    /// False once stopped, or if the clock thread has died.
    pub fn is_running(&self) -> bool {
        self.clock.as_ref().is_some_and(|clock| !clock.is_finished())
    }

    /// Stop the clock and the poller, then shut the bus down.
    pub fn stop(&mut self) {
        let Some(clock) = self.clock.take() else {
            return;
        };
        let _ = self.commands.send(ClockCommand::Stop);
        if clock.join().is_err() {
            warn!("clock thread panicked");
        }
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
        self.mapping_subscription = None;
        self.bus.shutdown();
        info!("simulation stopped");
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.stop();
    }
}
