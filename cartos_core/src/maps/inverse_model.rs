// cartos_core/src/maps/inverse_model.rs

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

fn default_prob_prior() -> f64 {
    0.5
}

fn default_prob_free() -> f64 {
    0.45
}

fn default_prob_occupied() -> f64 {
    0.65
}

/// `ln(p / (1 - p))`
pub fn log_odds(probability: f64) -> f64 {
    (probability / (1.0 - probability)).ln()
}

/// Inverse of `log_odds`.
pub fn probability(log_odds: f64) -> f64 {
    1.0 - 1.0 / (1.0 + log_odds.exp())
}

/// Hit/miss tallies for one cell. Maps store raw counts; the inverse model
/// that turns them into a probability belongs to whoever reads the map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CellCounts {
    pub free: u32,
    pub occupied: u32,
}

impl CellCounts {
    pub fn observations(&self) -> u32 {
        self.free.saturating_add(self.occupied)
    }
}

/// Binary Bayes inverse sensor model: every "free" or "occupied" observation
/// of a cell moves its log-odds by a fixed amount relative to the prior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InverseModel {
    #[serde(default = "default_prob_prior")]
    pub prob_prior: f64,
    #[serde(default = "default_prob_free")]
    pub prob_free: f64,
    #[serde(default = "default_prob_occupied")]
    pub prob_occupied: f64,
}

impl Default for InverseModel {
    fn default() -> Self {
        Self {
            prob_prior: default_prob_prior(),
            prob_free: default_prob_free(),
            prob_occupied: default_prob_occupied(),
        }
    }
}

impl InverseModel {
    pub fn new(prob_prior: f64, prob_free: f64, prob_occupied: f64) -> Result<Self, ConfigError> {
        let model = Self {
            prob_prior,
            prob_free,
            prob_occupied,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, p) in [
            ("prob_prior", self.prob_prior),
            ("prob_free", self.prob_free),
            ("prob_occupied", self.prob_occupied),
        ] {
            if !(p > 0.0 && p < 1.0) {
                return Err(ConfigError::invalid(
                    name,
                    format!("must lie strictly between 0 and 1, got {}", p),
                ));
            }
        }
        if self.prob_free >= self.prob_occupied {
            return Err(ConfigError::invalid(
                "prob_free",
                "must be lower than prob_occupied",
            ));
        }
        Ok(())
    }

    pub fn prior_log_odds(&self) -> f64 {
        log_odds(self.prob_prior)
    }

    pub fn free_update(&self) -> f64 {
        log_odds(self.prob_free) - self.prior_log_odds()
    }

    pub fn occupied_update(&self) -> f64 {
        log_odds(self.prob_occupied) - self.prior_log_odds()
    }

    pub fn log_odds(&self, counts: &CellCounts) -> f64 {
        self.prior_log_odds()
            + counts.free as f64 * self.free_update()
            + counts.occupied as f64 * self.occupied_update()
    }

    pub fn probability(&self, counts: &CellCounts) -> f64 {
        probability(self.log_odds(counts))
    }
}
