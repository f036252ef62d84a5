//! Per-slot learning state: strength, adaptive threshold, firing-rate EMA

/// Threshold imprint margin applied on first observation.
pub const EPS: f64 = 0.02;
/// EMA smoothing factor for the firing-rate estimate.
pub const BETA: f64 = 0.01;
/// Threshold drift rate.
pub const ETA: f64 = 0.02;
/// Target firing rate the threshold drifts toward.
pub const R_STAR: f64 = 0.05;
/// Reinforcement count at which a slot stops learning.
pub const HIT_SATURATION: u32 = 10_000;

/// Saturating clamp into `[low, high]`. Monotone in `value`.
pub fn smooth_clamp(value: f64, low: f64, high: f64) -> f64 {
    value.clamp(low, high)
}

/// Per-slot weight with an adaptive threshold.
///
/// `reinforce` nudges the strength by `step_value` scaled by the bus
/// modulation factor; `update_threshold` imprints on first sight and then
/// drifts the threshold so the slot's firing rate approaches [`R_STAR`].
/// Frozen slots ignore both updates.
#[derive(Debug, Clone, PartialEq)]
pub struct Weight {
    /// Base learning increment per reinforcement.
    pub step_value: f64,
    /// Learned strength in [-1, 1].
    pub strength: f64,
    /// Number of reinforcements, saturating at [`HIT_SATURATION`].
    pub hit_count: u32,
    /// Adaptive threshold θ.
    pub theta: f64,
    /// EMA of the slot's firing rate.
    pub ema_rate: f64,
    /// Whether the first observation has imprinted θ.
    pub first_seen: bool,
    /// Frozen slots skip learning and θ updates.
    pub frozen: bool,
}

impl Default for Weight {
    fn default() -> Self {
        Self {
            step_value: 0.001,
            strength: 0.0,
            hit_count: 0,
            theta: 0.0,
            ema_rate: 0.0,
            first_seen: false,
            frozen: false,
        }
    }
}

impl Weight {
    /// Strengthen the slot. No-op when frozen or saturated.
    pub fn reinforce(&mut self, modulation_factor: f64) {
        if self.frozen || self.hit_count >= HIT_SATURATION {
            return;
        }
        let step = self.step_value * modulation_factor;
        self.strength = smooth_clamp(self.strength + step, -1.0, 1.0);
        self.hit_count += 1;
    }

    /// First-observation imprint plus EMA-driven threshold drift.
    ///
    /// Returns whether the slot fired (`strength > θ`). Frozen slots skip all
    /// updates and report `|x| > θ ∨ strength > θ` instead.
    pub fn update_threshold(&mut self, input_value: f64) -> bool {
        if self.frozen {
            return input_value.abs() > self.theta || self.strength > self.theta;
        }
        if !self.first_seen {
            self.theta = input_value.abs() * (1.0 + EPS);
            self.first_seen = true;
        }
        let fired = self.strength > self.theta;
        let is_fired = if fired { 1.0 } else { 0.0 };
        self.ema_rate = (1.0 - BETA) * self.ema_rate + BETA * is_fired;
        self.theta += ETA * (self.ema_rate - R_STAR);
        fired
    }

    /// Mark the slot frozen.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Clear the frozen flag.
    pub fn unfreeze(&mut self) {
        self.frozen = false;
    }

    /// Whether the slot is frozen.
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reinforce_clamps_strength() {
        let mut weight = Weight {
            step_value: 0.5,
            ..Weight::default()
        };
        for _ in 0..10 {
            weight.reinforce(1.0);
        }
        assert_eq!(weight.strength, 1.0);
        assert_eq!(weight.hit_count, 10);
    }

    #[test]
    fn test_reinforce_saturates() {
        let mut weight = Weight {
            hit_count: HIT_SATURATION,
            ..Weight::default()
        };
        weight.reinforce(1.0);
        assert_eq!(weight.hit_count, HIT_SATURATION);
        assert_eq!(weight.strength, 0.0);
    }

    #[test]
    fn test_first_seen_imprint_ignores_sign() {
        let mut weight = Weight::default();
        weight.update_threshold(-0.5);
        assert!(weight.first_seen);
        // Imprint at |x|·(1+EPS), then one drift step with ema = 0.
        let expected = 0.5 * (1.0 + EPS) - ETA * R_STAR;
        assert!((weight.theta - expected).abs() < 1e-12);
    }

    #[test]
    fn test_frozen_skips_updates() {
        let mut weight = Weight::default();
        weight.update_threshold(0.5);
        let snapshot = weight.clone();
        weight.freeze();

        weight.reinforce(1.0);
        let fired = weight.update_threshold(2.0);
        assert!(fired); // |2.0| > theta
        assert_eq!(weight.strength, snapshot.strength);
        assert_eq!(weight.theta, snapshot.theta);
        assert_eq!(weight.ema_rate, snapshot.ema_rate);

        weight.unfreeze();
        assert!(!weight.is_frozen());
    }

    #[test]
    fn test_threshold_drifts_toward_target_rate() {
        let mut weight = Weight::default();
        weight.update_threshold(1.0);
        let theta_after_imprint = weight.theta;
        // Never firing: ema stays near 0, so theta drifts down toward firing.
        for _ in 0..100 {
            weight.update_threshold(1.0);
        }
        assert!(weight.theta < theta_after_imprint);
    }

    proptest! {
        #[test]
        fn strength_stays_bounded(
            modulations in proptest::collection::vec(0.0f64..10.0, 1..200),
            step in 0.0001f64..1.0,
        ) {
            let mut weight = Weight { step_value: step, ..Weight::default() };
            for modulation in modulations {
                weight.reinforce(modulation);
                prop_assert!(weight.strength <= 1.0 && weight.strength >= -1.0);
            }
            prop_assert!(weight.hit_count <= HIT_SATURATION);
        }
    }
}
