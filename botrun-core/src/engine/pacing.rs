use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

/// Longest pause a workflow may ask for, in seconds.
pub const MAX_WAIT_SECONDS: f64 = 3600.0;

/// Uniform random pause bounds, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PaceRange {
    pub lower: f64,
    pub upper: f64,
}

impl PaceRange {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    pub const fn none() -> Self {
        Self {
            lower: 0.0,
            upper: 0.0,
        }
    }

    /// Checks both bounds are finite and within `0..=MAX_WAIT_SECONDS`.
    /// `field` prefixes the message, e.g. `wait` gives `wait_lower ...`.
    pub fn validated(lower: f64, upper: f64, field: &str) -> Result<Self, String> {
        for (suffix, value) in [("lower", lower), ("upper", upper)] {
            if !value.is_finite() || !(0.0..=MAX_WAIT_SECONDS).contains(&value) {
                return Err(format!(
                    "{field}_{suffix} must be between 0 and {MAX_WAIT_SECONDS} seconds, got {value}"
                ));
            }
        }
        Ok(Self::new(lower, upper))
    }

    /// Bounds clamped to `0..=MAX_WAIT_SECONDS`, swapped if reversed.
    pub fn bounds(&self) -> (f64, f64) {
        let lower = sanitize(self.lower);
        let upper = sanitize(self.upper);
        if lower > upper {
            (upper, lower)
        } else {
            (lower, upper)
        }
    }

    pub fn is_zero(&self) -> bool {
        self.bounds().1 <= 0.0
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        let (lower, upper) = self.bounds();
        let secs = if upper <= lower {
            lower
        } else {
            rng.gen_range(lower..=upper)
        };
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }

    /// Sleeps for a sampled duration and returns it.
    pub async fn pause(&self) -> Duration {
        if self.is_zero() {
            return Duration::ZERO;
        }
        let delay = self.sample(&mut rand::thread_rng());
        sleep(delay).await;
        delay
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, MAX_WAIT_SECONDS)
    } else {
        0.0
    }
}
