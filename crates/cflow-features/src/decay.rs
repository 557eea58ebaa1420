//! Exponentially decayed running sums.
//!
//! A value is stored together with the time it is expressed at. Adding an
//! observation older than that time discounts the observation instead of
//! the stored value, so the result does not depend on arrival order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `0.5^(elapsed / half_life)`. Non-positive elapsed time means no decay.
#[must_use]
pub fn decay_factor(elapsed_secs: f64, half_life_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 || half_life_secs <= 0.0 {
        1.0
    } else {
        0.5_f64.powf(elapsed_secs / half_life_secs)
    }
}

#[allow(clippy::cast_precision_loss)]
fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayedValue {
    pub value: f64,
    pub updated_at: DateTime<Utc>,
}

impl DecayedValue {
    #[must_use]
    pub fn new(value: f64, at: DateTime<Utc>) -> Self {
        Self {
            value,
            updated_at: at,
        }
    }

    pub fn add(&mut self, magnitude: f64, at: DateTime<Utc>, half_life_secs: f64) {
        if at >= self.updated_at {
            let factor = decay_factor(seconds_between(self.updated_at, at), half_life_secs);
            self.value = self.value * factor + magnitude;
            self.updated_at = at;
        } else {
            let factor = decay_factor(seconds_between(at, self.updated_at), half_life_secs);
            self.value += magnitude * factor;
        }
    }

    /// Value expressed at `now`. Never decays "backwards" when `now` is
    /// before the last update.
    #[must_use]
    pub fn value_at(&self, now: DateTime<Utc>, half_life_secs: f64) -> f64 {
        self.value * decay_factor(seconds_between(self.updated_at, now), half_life_secs)
    }
}
