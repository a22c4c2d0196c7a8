//! Offer refusal filters

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Filters a framework attaches to a decline or launch
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Filters {
    /// How long the freed resources should not be re-offered to the
    /// framework. `None` means "use the coordinator default".
    #[serde(default)]
    pub refuse_seconds: Option<f64>,
}

impl Filters {
    pub fn refuse_for(duration: Duration) -> Self {
        Self {
            refuse_seconds: Some(duration.as_secs_f64()),
        }
    }

    /// Resolve the refusal duration, falling back to `default`.
    ///
    /// Negative or non-finite values are treated as zero.
    pub fn refuse_duration(&self, default: Duration) -> Duration {
        match self.refuse_seconds {
            Some(secs) if secs.is_finite() && secs > 0.0 => Duration::from_secs_f64(secs),
            Some(_) => Duration::ZERO,
            None => default,
        }
    }
}
