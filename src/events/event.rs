//! Typed events distributed by the [`EventBus`](super::EventBus)

use std::fmt;
use std::time::Duration;

use pendulum_types::{ParameterSet, PendulumState, ResetNotice, WeatherSnapshot};
use serde::{Deserialize, Serialize};

/// Discriminant used to subscribe to one kind of event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    PendulumStepped,
    WeatherUpdated,
    ParametersChanged,
    SimulationReset,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::PendulumStepped,
        EventKind::WeatherUpdated,
        EventKind::ParametersChanged,
        EventKind::SimulationReset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PendulumStepped => "PendulumStepped",
            EventKind::WeatherUpdated => "WeatherUpdated",
            EventKind::ParametersChanged => "ParametersChanged",
            EventKind::SimulationReset => "SimulationReset",
        }
    }

    pub(crate) fn index(&self) -> usize {
        match self {
            EventKind::PendulumStepped => 0,
            EventKind::WeatherUpdated => 1,
            EventKind::ParametersChanged => 2,
            EventKind::SimulationReset => 3,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable snapshot carried by an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    PendulumStepped(PendulumState),
    WeatherUpdated(WeatherSnapshot),
    ParametersChanged(ParameterSet),
    SimulationReset(ResetNotice),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::PendulumStepped(_) => EventKind::PendulumStepped,
            EventPayload::WeatherUpdated(_) => EventKind::WeatherUpdated,
            EventPayload::ParametersChanged(_) => EventKind::ParametersChanged,
            EventPayload::SimulationReset(_) => EventKind::SimulationReset,
        }
    }
}

/// A published event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Bus-wide publish sequence number
    pub seq: u64,
    /// Publish time, measured from bus creation
    pub published_at: Duration,
    pub payload: EventPayload,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn pendulum(&self) -> Option<&PendulumState> {
        match &self.payload {
            EventPayload::PendulumStepped(state) => Some(state),
            _ => None,
        }
    }

    pub fn weather(&self) -> Option<&WeatherSnapshot> {
        match &self.payload {
            EventPayload::WeatherUpdated(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn parameters(&self) -> Option<&ParameterSet> {
        match &self.payload {
            EventPayload::ParametersChanged(set) => Some(set),
            _ => None,
        }
    }

    pub fn reset(&self) -> Option<&ResetNotice> {
        match &self.payload {
            EventPayload::SimulationReset(notice) => Some(notice),
            _ => None,
        }
    }
}

impl From<PendulumState> for EventPayload {
    fn from(state: PendulumState) -> Self {
        EventPayload::PendulumStepped(state)
    }
}

impl From<WeatherSnapshot> for EventPayload {
    fn from(snapshot: WeatherSnapshot) -> Self {
        EventPayload::WeatherUpdated(snapshot)
    }
}

impl From<ParameterSet> for EventPayload {
    fn from(set: ParameterSet) -> Self {
        EventPayload::ParametersChanged(set)
    }
}

impl From<ResetNotice> for EventPayload {
    fn from(notice: ResetNotice) -> Self {
        EventPayload::SimulationReset(notice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_kind_and_accessors() {
        let event = Event {
            seq: 7,
            published_at: Duration::from_millis(16),
            payload: PendulumState::horizontal().into(),
        };
        assert_eq!(event.kind(), EventKind::PendulumStepped);
        assert!(event.pendulum().is_some());
        assert!(event.weather().is_none());
        assert!(event.parameters().is_none());
        assert!(event.reset().is_none());
    }

    #[test]
    fn test_kind_indices_are_distinct() {
        let mut seen = [false; 4];
        for kind in EventKind::ALL {
            assert!(!seen[kind.index()]);
            seen[kind.index()] = true;
        }
        assert_eq!(EventKind::WeatherUpdated.to_string(), "WeatherUpdated");
    }
}
