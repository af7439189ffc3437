//! Declarative mapping configuration and its validation
//!
//! A config is JSON:
//!
//! ```json
//! { "rules": [
//!     { "source": "pendulum.theta1", "target": "pitch", "type": "linear",
//!       "parameters": { "domain": [-3.14159, 3.14159] }, "min": 48, "max": 84 },
//!     { "source": "weather.temperature", "target": "brightness", "type": "curve",
//!       "parameters": { "domain": [-10, 35], "shape": { "kind": "power", "gamma": 2.0 } },
//!       "min": 0, "max": 1 }
//! ] }
//! ```
//!
//! It is validated as a whole into a [`CompiledMapping`]; one bad rule
//! rejects the entire config.
//!
//! Pendulum sources may name an ensemble member, as in `pendulum.3.omega1`.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use pendulum_types::{ParameterSet, PendulumState, WeatherSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::source::Source;
use super::transform::{Bucket, CurveShape, Transform};

/// Mapping-related errors
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("invalid mapping rule #{rule} (target '{target}'): {violation}")]
    InvalidMappingConfig {
        rule: usize,
        target: String,
        violation: ConfigViolation,
    },

    #[error("failed to parse mapping config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read mapping config: {0}")]
    Io(#[from] std::io::Error),
}

/// What was wrong with a rule
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigViolation {
    #[error("config has no rules")]
    EmptyRuleSet,

    #[error("target name is empty")]
    EmptyTarget,

    #[error("unknown source field '{0}'")]
    UnknownSource(String),

    #[error("bounds must be finite with min < max, got [{min}, {max}]")]
    InvalidBounds { min: f64, max: f64 },

    #[error("domain must be finite with lo < hi, got [{lo}, {hi}]")]
    InvalidDomain { lo: f64, hi: f64 },

    #[error("invalid transform parameters: {0}")]
    InvalidParameters(String),

    #[error("target is already produced by rule #{0}")]
    DuplicateTarget(usize),
}

/// Transform family named by a rule's `type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformType {
    Linear,
    Lookup,
    Curve,
}

/// One raw rule as written in the config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRule {
    pub source: String,
    pub target: String,
    #[serde(rename = "type")]
    pub kind: TransformType,
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub min: f64,
    pub max: f64,
}

/// Raw, unvalidated mapping config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    pub rules: Vec<MappingRule>,
}

impl MappingConfig {
    pub fn from_json_str(json: &str) -> Result<Self, MappingError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, MappingError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DomainParams {
    domain: [f64; 2],
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LookupParams {
    buckets: Vec<Bucket>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CurveParams {
    domain: [f64; 2],
    shape: CurveShape,
}

/// A validated rule
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    pub source: Source,
    pub target: String,
    pub transform: Transform,
    pub min: f64,
    pub max: f64,
}

impl CompiledRule {
    /// Evaluate against the state of the member this rule reads, if known.
    pub fn evaluate(&self, pendulum: Option<&PendulumState>, weather: &WeatherSnapshot) -> f64 {
        self.transform
            .apply(self.source.value(pendulum, weather), self.min, self.max)
    }
}

/// A fully validated mapping config, ready to evaluate
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledMapping {
    rules: Vec<CompiledRule>,
}

impl CompiledMapping {
    /// Validate every rule. Fails on the first violation found.
    pub fn compile(config: &MappingConfig) -> Result<Self, MappingError> {
        if config.rules.is_empty() {
            return Err(MappingError::InvalidMappingConfig {
                rule: 0,
                target: String::new(),
                violation: ConfigViolation::EmptyRuleSet,
            });
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut rules = Vec::with_capacity(config.rules.len());
        for (index, raw) in config.rules.iter().enumerate() {
            let reject = |violation| MappingError::InvalidMappingConfig {
                rule: index,
                target: raw.target.clone(),
                violation,
            };

            if raw.target.trim().is_empty() {
                return Err(reject(ConfigViolation::EmptyTarget));
            }
            if !seen.insert(raw.target.as_str()) {
                let first = config
                    .rules
                    .iter()
                    .position(|r| r.target == raw.target)
                    .unwrap_or(index);
                return Err(reject(ConfigViolation::DuplicateTarget(first)));
            }
            rules.push(compile_rule(raw).map_err(reject)?);
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Target names in rule order
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.target.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every rule into a fresh parameter set, with `state` as
    /// ensemble member 0.
    pub fn evaluate(
        &self,
        state: &PendulumState,
        weather: &WeatherSnapshot,
        revision: u64,
    ) -> ParameterSet {
        self.evaluate_ensemble(std::slice::from_ref(state), weather, revision)
    }

    /// Evaluate with `pendulums[i]` as member `i`. Rules reading a member
    /// past the end of the slice get their lowest output.
    pub fn evaluate_ensemble(
        &self,
        pendulums: &[PendulumState],
        weather: &WeatherSnapshot,
        revision: u64,
    ) -> ParameterSet {
        self.evaluate_with(|index| pendulums.get(index), weather, revision)
    }

    pub(crate) fn evaluate_with<'a, F>(
        &self,
        pendulum: F,
        weather: &WeatherSnapshot,
        revision: u64,
    ) -> ParameterSet
    where
        F: Fn(usize) -> Option<&'a PendulumState>,
    {
        let mut set = ParameterSet::with_capacity(revision, self.rules.len());
        for rule in &self.rules {
            let state = pendulum(rule.source.pendulum);
            set.insert(rule.target.clone(), rule.evaluate(state, weather));
        }
        set
    }
}

fn compile_rule(raw: &MappingRule) -> Result<CompiledRule, ConfigViolation> {
    let source: Source = raw
        .source
        .parse()
        .map_err(|_| ConfigViolation::UnknownSource(raw.source.clone()))?;

    if !(raw.min.is_finite() && raw.max.is_finite() && raw.min < raw.max) {
        return Err(ConfigViolation::InvalidBounds {
            min: raw.min,
            max: raw.max,
        });
    }

    let transform = match raw.kind {
        TransformType::Linear => {
            let DomainParams { domain: [lo, hi] } = parse_params(&raw.parameters)?;
            check_domain(lo, hi)?;
            Transform::Linear { lo, hi }
        }
        TransformType::Lookup => {
            let LookupParams { buckets } = parse_params(&raw.parameters)?;
            check_buckets(&buckets)?;
            Transform::Lookup { buckets }
        }
        TransformType::Curve => {
            let CurveParams {
                domain: [lo, hi],
                shape,
            } = parse_params(&raw.parameters)?;
            check_domain(lo, hi)?;
            shape.validate().map_err(ConfigViolation::InvalidParameters)?;
            Transform::Curve { lo, hi, shape }
        }
    };

    Ok(CompiledRule {
        source,
        target: raw.target.clone(),
        transform,
        min: raw.min,
        max: raw.max,
    })
}

fn parse_params<T>(value: &serde_json::Value) -> Result<T, ConfigViolation>
where
    T: for<'de> Deserialize<'de>,
{
    T::deserialize(value).map_err(|err| ConfigViolation::InvalidParameters(err.to_string()))
}

fn check_domain(lo: f64, hi: f64) -> Result<(), ConfigViolation> {
    if lo.is_finite() && hi.is_finite() && lo < hi {
        Ok(())
    } else {
        Err(ConfigViolation::InvalidDomain { lo, hi })
    }
}

fn check_buckets(buckets: &[Bucket]) -> Result<(), ConfigViolation> {
    if buckets.is_empty() {
        return Err(ConfigViolation::InvalidParameters(
            "lookup needs at least one bucket".to_string(),
        ));
    }
    if let Some(bad) = buckets
        .iter()
        .find(|b| !(b.at.is_finite() && b.value.is_finite()))
    {
        return Err(ConfigViolation::InvalidParameters(format!(
            "bucket at {} has a non-finite value",
            bad.at
        )));
    }
    if let Some(pair) = buckets.windows(2).find(|w| w[0].at >= w[1].at) {
        return Err(ConfigViolation::InvalidParameters(format!(
            "bucket thresholds must increase strictly ({} then {})",
            pair[0].at, pair[1].at
        )));
    }
    Ok(())
}
