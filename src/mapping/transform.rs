//! Validated value transforms
//!
//! Each transform turns one raw input into a value in `[min, max]`.
//! Inputs outside the domain are clamped, and NaN is treated as the lower
//! bound, so the output is always finite and in range.

use serde::{Deserialize, Serialize};

use crate::utils::clamp_finite;
use crate::utils::constants::TOLERANCE;

/// Step of a lookup table: inputs `>= at` map to `value`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub at: f64,
    pub value: f64,
}

/// Monotonic shaping applied to the normalised input `u ∈ [0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CurveShape {
    /// `(e^(k·u) - 1) / (e^k - 1)`; `k = 0` is linear
    Exponential { k: f64 },
    /// Logistic curve centred on `midpoint`, rescaled to hit 0 and 1 at the ends
    Sigmoid { steepness: f64, midpoint: f64 },
    /// `u^gamma`
    Power { gamma: f64 },
}

impl CurveShape {
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            CurveShape::Exponential { k } if !k.is_finite() || k.abs() > 700.0 => {
                Err(format!("exponential k must be finite and |k| <= 700, got {}", k))
            }
            CurveShape::Sigmoid { steepness, .. }
                if !(steepness.is_finite() && steepness > 0.0) =>
            {
                Err(format!("sigmoid steepness must be positive, got {}", steepness))
            }
            CurveShape::Sigmoid { midpoint, .. } if !(0.0..=1.0).contains(&midpoint) => {
                Err(format!("sigmoid midpoint must lie in [0, 1], got {}", midpoint))
            }
            CurveShape::Power { gamma } if !(gamma.is_finite() && gamma > 0.0) => {
                Err(format!("power gamma must be positive, got {}", gamma))
            }
            _ => Ok(()),
        }
    }

    fn shape(&self, u: f64) -> f64 {
        match *self {
            CurveShape::Exponential { k } => {
                if k.abs() < TOLERANCE {
                    u
                } else {
                    (k * u).exp_m1() / k.exp_m1()
                }
            }
            CurveShape::Sigmoid {
                steepness,
                midpoint,
            } => {
                let logistic = |v: f64| 1.0 / (1.0 + (-steepness * (v - midpoint)).exp());
                let (lo, hi) = (logistic(0.0), logistic(1.0));
                (logistic(u) - lo) / (hi - lo)
            }
            CurveShape::Power { gamma } => u.powf(gamma),
        }
    }
}

/// Tagged transform compiled from a mapping rule
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// Affine map from `[lo, hi]` onto `[min, max]`
    Linear { lo: f64, hi: f64 },
    /// Bucketed values; buckets are sorted strictly by `at`
    Lookup { buckets: Vec<Bucket> },
    /// Shaped map from `[lo, hi]` onto `[min, max]`
    Curve { lo: f64, hi: f64, shape: CurveShape },
}

impl Transform {
    /// Map `x` into `[min, max]`.
    pub fn apply(&self, x: f64, min: f64, max: f64) -> f64 {
        let y = match self {
            Transform::Linear { lo, hi } => min + normalise(x, *lo, *hi) * (max - min),
            Transform::Lookup { buckets } => lookup(buckets, x),
            Transform::Curve { lo, hi, shape } => {
                min + shape.shape(normalise(x, *lo, *hi)) * (max - min)
            }
        };
        clamp_finite(y, min, max)
    }
}

fn normalise(x: f64, lo: f64, hi: f64) -> f64 {
    (clamp_finite(x, lo, hi) - lo) / (hi - lo)
}

fn lookup(buckets: &[Bucket], x: f64) -> f64 {
    buckets
        .iter()
        .rev()
        .find(|bucket| bucket.at <= x)
        .or_else(|| buckets.first())
        .map(|bucket| bucket.value)
        .unwrap_or(f64::NAN)
}
