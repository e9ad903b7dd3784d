// cartos_core/src/config.rs

use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;

/// The period used when `publish_rate` is zero. The worker still wakes this
/// often, but no publish cycle is expected in any practical run.
pub const UNBOUNDED_PUBLISH_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);

fn default_map_frame() -> String {
    "/map".to_string()
}

fn default_publish_rate() -> f64 {
    10.0
}

fn default_tf_timeout() -> f64 {
    0.1
}

// =========================================================================
// == Mapper Configuration ==
// =========================================================================

/// The engine-level options shared by every mapper, regardless of map type.
/// Unknown keys are ignored on purpose: the same table also carries the
/// map-type parameters, which the map builder reads.
#[derive(Debug, Clone, Deserialize)]
pub struct MapperConfig {
    /// Target frame of the map output.
    #[serde(default = "default_map_frame")]
    pub map_frame: String,
    /// Publish cadence in Hz. `0` disables periodic publishing.
    #[serde(default = "default_publish_rate")]
    pub publish_rate: f64,
    /// Seconds to wait for a transform before skipping an observation.
    #[serde(default = "default_tf_timeout")]
    pub tf_timeout: f64,
    /// Ordered names of the data providers to bind. Must not be empty.
    #[serde(default)]
    pub data_providers: Vec<String>,
    /// Names of the publishers to bind. May be empty.
    #[serde(default)]
    pub map_publishers: Vec<String>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            map_frame: default_map_frame(),
            publish_rate: default_publish_rate(),
            tf_timeout: default_tf_timeout(),
            data_providers: Vec::new(),
            map_publishers: Vec::new(),
        }
    }
}

impl MapperConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.publish_rate.is_finite() || self.publish_rate < 0.0 {
            return Err(ConfigError::invalid(
                "publish_rate",
                format!("must be a non-negative rate in Hz, got {}", self.publish_rate),
            ));
        }
        if !self.tf_timeout.is_finite() || self.tf_timeout < 0.0 {
            return Err(ConfigError::invalid(
                "tf_timeout",
                format!("must be a non-negative duration in seconds, got {}", self.tf_timeout),
            ));
        }
        if self.map_frame.trim().is_empty() {
            return Err(ConfigError::invalid("map_frame", "must not be empty"));
        }
        Ok(())
    }

    /// The wall-clock period between publish cycles.
    pub fn publish_period(&self) -> Duration {
        if self.publish_rate <= 0.0 {
            return UNBOUNDED_PUBLISH_PERIOD;
        }
        Duration::try_from_secs_f64(1.0 / self.publish_rate)
            .map(|period| period.min(UNBOUNDED_PUBLISH_PERIOD))
            .unwrap_or(UNBOUNDED_PUBLISH_PERIOD)
    }

    pub fn tf_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.tf_timeout).unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MapperConfig::default();
        assert_eq!(config.map_frame, "/map");
        assert_eq!(config.publish_period(), Duration::from_millis(100));
        assert_eq!(config.tf_timeout(), Duration::from_millis(100));
        assert!(config.data_providers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_rate_means_unbounded_period() {
        let config = MapperConfig {
            publish_rate: 0.0,
            ..MapperConfig::default()
        };
        assert_eq!(config.publish_period(), UNBOUNDED_PUBLISH_PERIOD);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tiny_rates_are_capped() {
        let config = MapperConfig {
            publish_rate: 1e-300,
            ..MapperConfig::default()
        };
        assert_eq!(config.publish_period(), UNBOUNDED_PUBLISH_PERIOD);
    }

    #[test]
    fn negative_values_are_rejected() {
        let bad_rate = MapperConfig {
            publish_rate: -1.0,
            ..MapperConfig::default()
        };
        assert!(matches!(
            bad_rate.validate(),
            Err(ConfigError::InvalidParameter { ref name, .. }) if name == "publish_rate"
        ));

        let bad_timeout = MapperConfig {
            tf_timeout: f64::NAN,
            ..MapperConfig::default()
        };
        assert!(matches!(
            bad_timeout.validate(),
            Err(ConfigError::InvalidParameter { ref name, .. }) if name == "tf_timeout"
        ));
    }
}
