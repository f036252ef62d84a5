//! Region-level growth policy

use crate::error::{GrowNetError, Result};

/// Weights of the per-layer saturation score.
const SCORE_AT_CAP_WEIGHT: f64 = 0.60;
const SCORE_AVG_SLOTS_WEIGHT: f64 = 0.25;
const SCORE_FALLBACK_WEIGHT: f64 = 0.15;

/// Policy for growing new layers at region level.
///
/// Growth fires at most once per tick when either trigger is met: the
/// region-wide average slots per neuron reaches `average_slots_threshold`,
/// or the percentage of neurons at capacity whose last selection used the
/// fallback reaches `percent_at_cap_fallback_threshold`.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GrowthPolicy {
    /// Master switch for layer growth.
    pub enable_region_growth: bool,
    /// Cap on the region's layer count; -1 means unlimited.
    pub maximum_layers: i32,
    /// Average-slots-per-neuron trigger threshold.
    pub average_slots_threshold: f64,
    /// Percent-at-capacity-with-fallback trigger threshold; 0 disables it.
    pub percent_at_cap_fallback_threshold: f64,
    /// Minimum ticks between layer growth events.
    pub layer_cooldown_ticks: u64,
    /// Wiring probability from the saturated layer to the new one.
    pub connection_probability: f64,
}

impl Default for GrowthPolicy {
    fn default() -> Self {
        Self {
            enable_region_growth: true,
            maximum_layers: -1,
            average_slots_threshold: 12.0,
            percent_at_cap_fallback_threshold: 0.0,
            layer_cooldown_ticks: 50,
            connection_probability: 1.0,
        }
    }
}

impl GrowthPolicy {
    /// Set the average-slots trigger threshold.
    pub fn with_average_slots_threshold(mut self, threshold: f64) -> Self {
        self.average_slots_threshold = threshold;
        self
    }

    /// Set the percent-at-capacity-with-fallback trigger threshold.
    pub fn with_percent_at_cap_fallback_threshold(mut self, threshold: f64) -> Self {
        self.percent_at_cap_fallback_threshold = threshold;
        self
    }

    /// Set the layer growth cooldown.
    pub fn with_layer_cooldown_ticks(mut self, ticks: u64) -> Self {
        self.layer_cooldown_ticks = ticks;
        self
    }

    /// Set the layer count cap (-1 = unlimited).
    pub fn with_maximum_layers(mut self, maximum_layers: i32) -> Self {
        self.maximum_layers = maximum_layers;
        self
    }

    /// Validate the policy.
    pub fn validate(&self) -> Result<()> {
        if !(self.average_slots_threshold > 0.0) {
            return Err(GrowNetError::invalid_parameter(
                "average_slots_threshold",
                self.average_slots_threshold.to_string(),
                "> 0.0",
            ));
        }
        if !(0.0..=100.0).contains(&self.percent_at_cap_fallback_threshold) {
            return Err(GrowNetError::invalid_parameter(
                "percent_at_cap_fallback_threshold",
                self.percent_at_cap_fallback_threshold.to_string(),
                "in [0, 100]",
            ));
        }
        if !(0.0..=1.0).contains(&self.connection_probability) {
            return Err(GrowNetError::invalid_parameter(
                "connection_probability",
                self.connection_probability.to_string(),
                "in [0, 1]",
            ));
        }
        if self.maximum_layers < -1 {
            return Err(GrowNetError::invalid_parameter(
                "maximum_layers",
                self.maximum_layers.to_string(),
                ">= -1",
            ));
        }
        Ok(())
    }
}

/// Saturation statistics of one layer, aggregated once per tick.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct LayerGrowthStats {
    /// Neuron count.
    pub neurons: usize,
    /// Total slots across the layer.
    pub total_slots: usize,
    /// Neurons at slot capacity.
    pub at_capacity: usize,
    /// Neurons whose last selection used the fallback slot.
    pub used_fallback: usize,
    /// Neurons at capacity whose last selection used the fallback slot.
    pub at_capacity_with_fallback: usize,
}

impl LayerGrowthStats {
    /// Saturation score used to pick the best growth candidate.
    pub fn score(&self, average_slots_threshold: f64) -> f64 {
        if self.neurons == 0 {
            return 0.0;
        }
        let neurons = self.neurons as f64;
        let fraction_at_cap = self.at_capacity as f64 / neurons;
        let fraction_fallback = self.used_fallback as f64 / neurons;
        let avg_slots = self.total_slots as f64 / neurons;
        let avg_term = if average_slots_threshold.is_finite() && average_slots_threshold > 0.0 {
            (avg_slots / average_slots_threshold).min(1.0)
        } else {
            0.0
        };
        SCORE_AT_CAP_WEIGHT * fraction_at_cap
            + SCORE_AVG_SLOTS_WEIGHT * avg_term
            + SCORE_FALLBACK_WEIGHT * fraction_fallback
    }
}
