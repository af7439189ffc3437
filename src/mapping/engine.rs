//! Runtime owner of the active mapping config

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use pendulum_types::{ParameterSet, PendulumState, WeatherSnapshot, MAX_PENDULUMS};
use tracing::{debug, info, warn};

use super::config::{CompiledMapping, MappingConfig, MappingError};
use crate::events::{BusError, Event, EventBus, EventKind, Subscription};

#[derive(Clone)]
struct ActiveMapping {
    mapping: Arc<CompiledMapping>,
    revision: u64,
}

/// Last state seen per ensemble member, indexed by `PendulumState::pendulum`
#[derive(Default)]
struct LatestInputs {
    pendulums: Vec<Option<PendulumState>>,
    weather: Option<WeatherSnapshot>,
}

impl LatestInputs {
    fn record(&mut self, state: &PendulumState) {
        let index = state.pendulum;
        if index >= MAX_PENDULUMS {
            return;
        }
        if self.pendulums.len() <= index {
            self.pendulums.resize(index + 1, None);
        }
        self.pendulums[index] = Some(*state);
    }

    fn ready(&self) -> bool {
        self.weather.is_some() && self.pendulums.iter().any(Option::is_some)
    }
}

/// Turns pendulum and weather snapshots into [`ParameterSet`]s.
///
/// The active config is swapped as a whole; a recompute always sees one
/// consistent config.
pub struct MappingEngine {
    active: RwLock<ActiveMapping>,
    latest: Mutex<LatestInputs>,
    bus: RwLock<Option<EventBus>>,
}

impl MappingEngine {
    /// Validate `config` and make it the first active revision.
    pub fn new(config: &MappingConfig) -> Result<Self, MappingError> {
        let mapping = CompiledMapping::compile(config)?;
        info!(rules = mapping.len(), "mapping config loaded");
        Ok(Self {
            active: RwLock::new(ActiveMapping {
                mapping: Arc::new(mapping),
                revision: 1,
            }),
            latest: Mutex::new(LatestInputs::default()),
            bus: RwLock::new(None),
        })
    }

    /// Publish every recomputed set on this bus.
    pub fn with_bus(self, bus: EventBus) -> Self {
        *self.bus.write() = Some(bus);
        self
    }

    /// Replace the active config. On any validation failure the current
    /// config stays active. Returns the new revision.
    pub fn load_config(&self, config: &MappingConfig) -> Result<u64, MappingError> {
        let mapping = match CompiledMapping::compile(config) {
            Ok(mapping) => mapping,
            Err(err) => {
                warn!(error = %err, "mapping config rejected, keeping current");
                return Err(err);
            }
        };

        let mut active = self.active.write();
        active.revision += 1;
        active.mapping = Arc::new(mapping);
        info!(
            revision = active.revision,
            rules = active.mapping.len(),
            "mapping config swapped"
        );
        Ok(active.revision)
    }

    pub fn revision(&self) -> u64 {
        self.active.read().revision
    }

    /// The active compiled config
    pub fn mapping(&self) -> Arc<CompiledMapping> {
        self.active.read().mapping.clone()
    }

    /// Evaluate the active config. Every target is present and inside its
    /// `[min, max]`, whatever the inputs.
    pub fn evaluate(&self, state: &PendulumState, weather: &WeatherSnapshot) -> ParameterSet {
        let ActiveMapping { mapping, revision } = self.active.read().clone();
        mapping.evaluate(state, weather, revision)
    }

    /// Evaluate with `pendulums[i]` as ensemble member `i`.
    pub fn evaluate_ensemble(
        &self,
        pendulums: &[PendulumState],
        weather: &WeatherSnapshot,
    ) -> ParameterSet {
        let ActiveMapping { mapping, revision } = self.active.read().clone();
        mapping.evaluate_ensemble(pendulums, weather, revision)
    }

    /// Evaluate and publish `ParametersChanged` when a bus is attached.
    pub fn recompute(&self, state: &PendulumState, weather: &WeatherSnapshot) -> ParameterSet {
        let set = self.evaluate(state, weather);
        self.publish(&set);
        set
    }

    fn publish(&self, set: &ParameterSet) {
        let bus = self.bus.read().clone();
        if let Some(bus) = bus {
            match bus.publish(set.clone()) {
                Ok(_) => {}
                Err(BusError::Closed) => debug!("bus closed, parameters not published"),
                Err(err) => warn!(error = %err, "failed to publish parameters"),
            }
        }
    }

    /// Subscribe to pendulum steps and weather updates on `bus`, recomputing
    /// on every event once weather and at least one ensemble member have
    /// been seen. Results go out on the same bus.
    ///
    /// The subscriptions only hold a weak reference to the engine.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Result<MappingSubscription, BusError> {
        *self.bus.write() = Some(bus.clone());

        let engine = Arc::downgrade(self);
        let pendulum = bus.subscribe(EventKind::PendulumStepped, move |event| {
            on_event(&engine, event);
            Ok(())
        })?;
        let engine = Arc::downgrade(self);
        let weather = bus.subscribe(EventKind::WeatherUpdated, move |event| {
            on_event(&engine, event);
            Ok(())
        })?;

        debug!("mapping engine attached to bus");
        Ok(MappingSubscription { pendulum, weather })
    }

    fn observe(&self, event: &Event) {
        let set = {
            let mut latest = self.latest.lock();
            if let Some(state) = event.pendulum() {
                latest.record(state);
            }
            if let Some(weather) = event.weather() {
                latest.weather = Some(weather.clone());
            }
            match &latest.weather {
                Some(weather) if latest.ready() => {
                    let ActiveMapping { mapping, revision } = self.active.read().clone();
                    let members = &latest.pendulums;
                    Some(mapping.evaluate_with(
                        |index| members.get(index).and_then(Option::as_ref),
                        weather,
                        revision,
                    ))
                }
                _ => None,
            }
        };
        if let Some(set) = set {
            self.publish(&set);
        }
    }
}

fn on_event(engine: &Weak<MappingEngine>, event: &Event) {
    if let Some(engine) = engine.upgrade() {
        engine.observe(event);
    }
}

/// Subscriptions created by [`MappingEngine::attach`]; dropping detaches.
#[derive(Debug)]
pub struct MappingSubscription {
    pendulum: Subscription,
    weather: Subscription,
}

impl MappingSubscription {
    pub fn is_active(&self) -> bool {
        self.pendulum.is_active() && self.weather.is_active()
    }
}
