//! Input fields a mapping rule can read

use std::fmt;
use std::str::FromStr;

use pendulum_types::{PendulumState, WeatherSnapshot, MAX_PENDULUMS};

/// One scalar input, addressed as `pendulum.<field>` or `weather.<field>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceField {
    Theta1,
    Theta2,
    Omega1,
    Omega2,
    Time,
    Energy,
    X1,
    Y1,
    X2,
    Y2,
    Temperature,
    Humidity,
    WindSpeed,
    ConditionCode,
}

impl SourceField {
    pub const ALL: [SourceField; 14] = [
        SourceField::Theta1,
        SourceField::Theta2,
        SourceField::Omega1,
        SourceField::Omega2,
        SourceField::Time,
        SourceField::Energy,
        SourceField::X1,
        SourceField::Y1,
        SourceField::X2,
        SourceField::Y2,
        SourceField::Temperature,
        SourceField::Humidity,
        SourceField::WindSpeed,
        SourceField::ConditionCode,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SourceField::Theta1 => "pendulum.theta1",
            SourceField::Theta2 => "pendulum.theta2",
            SourceField::Omega1 => "pendulum.omega1",
            SourceField::Omega2 => "pendulum.omega2",
            SourceField::Time => "pendulum.time",
            SourceField::Energy => "pendulum.energy",
            SourceField::X1 => "pendulum.x1",
            SourceField::Y1 => "pendulum.y1",
            SourceField::X2 => "pendulum.x2",
            SourceField::Y2 => "pendulum.y2",
            SourceField::Temperature => "weather.temperature",
            SourceField::Humidity => "weather.humidity",
            SourceField::WindSpeed => "weather.wind_speed",
            SourceField::ConditionCode => "weather.condition_code",
        }
    }

    pub fn is_weather(&self) -> bool {
        matches!(
            self,
            SourceField::Temperature
                | SourceField::Humidity
                | SourceField::WindSpeed
                | SourceField::ConditionCode
        )
    }

    /// Read this field from the latest inputs.
    pub fn value(&self, state: &PendulumState, weather: &WeatherSnapshot) -> f64 {
        match self {
            SourceField::Theta1 => state.theta1,
            SourceField::Theta2 => state.theta2,
            SourceField::Omega1 => state.omega1,
            SourceField::Omega2 => state.omega2,
            SourceField::Time => state.time,
            SourceField::Energy => state.energy,
            SourceField::X1 => state.bobs.x1,
            SourceField::Y1 => state.bobs.y1,
            SourceField::X2 => state.bobs.x2,
            SourceField::Y2 => state.bobs.y2,
            SourceField::Temperature => weather.temperature,
            SourceField::Humidity => weather.humidity,
            SourceField::WindSpeed => weather.wind_speed,
            SourceField::ConditionCode => weather.condition_code as f64,
        }
    }
}

impl FromStr for SourceField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceField::ALL
            .iter()
            .copied()
            .find(|field| field.name() == s)
            .ok_or_else(|| format!("unknown source field '{}'", s))
    }
}

impl fmt::Display for SourceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A rule input: a field, plus the ensemble member it reads for pendulum
/// fields.
///
/// `pendulum.<field>` reads member 0; `pendulum.<i>.<field>` reads member `i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Source {
    pub field: SourceField,
    pub pendulum: usize,
}

impl Source {
    /// Read this input. A pendulum field of a member that has not been seen
    /// reads as NaN.
    pub fn value(&self, pendulum: Option<&PendulumState>, weather: &WeatherSnapshot) -> f64 {
        match pendulum {
            Some(state) => self.field.value(state, weather),
            None if self.field.is_weather() => {
                self.field.value(&PendulumState::default(), weather)
            }
            None => f64::NAN,
        }
    }
}

impl From<SourceField> for Source {
    fn from(field: SourceField) -> Self {
        Self { field, pendulum: 0 }
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let indexed = s
            .strip_prefix("pendulum.")
            .and_then(|rest| rest.split_once('.'));
        let Some((index, field)) = indexed else {
            return s.parse::<SourceField>().map(Source::from);
        };

        let pendulum: usize = index
            .parse()
            .map_err(|_| format!("unknown source field '{}'", s))?;
        if pendulum >= MAX_PENDULUMS {
            return Err(format!(
                "pendulum index {} out of range (max {})",
                pendulum,
                MAX_PENDULUMS - 1
            ));
        }
        let field = format!("pendulum.{}", field).parse::<SourceField>()?;
        Ok(Self { field, pendulum })
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.field.name().strip_prefix("pendulum.") {
            Some(field) if self.pendulum > 0 => write!(f, "pendulum.{}.{}", self.pendulum, field),
            _ => f.write_str(self.field.name()),
        }
    }
}
