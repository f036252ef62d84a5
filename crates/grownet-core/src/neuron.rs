//! Neurons: slot maps, fire semantics per kind, growth bookkeeping

use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::slot::{SlotConfig, SlotEngine};
use crate::synapse::Synapse;
use crate::weight::Weight;

/// Behavioral variant of a neuron.
///
/// The deep inheritance of the reference design collapses into this tagged
/// sum; dispatch over fire behavior is explicit in the layer and region code.
#[derive(Debug, Clone, PartialEq)]
pub enum NeuronKind {
    /// Default fan-out behavior: propagates its amplitude downstream.
    Excitatory,
    /// Writes `amplitude * gamma` into the layer bus inhibition factor.
    Inhibitory {
        /// Scale applied to the firing amplitude before the bus write.
        gamma: f64,
    },
    /// Writes `amplitude * kappa` into the layer bus modulation factor.
    Modulatory {
        /// Scale applied to the firing amplitude before the bus write.
        kappa: f64,
    },
    /// Sensor entry point: gains and clamps the raw value, imprints its slot
    /// threshold just below the first stimulus so early events fire.
    Input {
        /// Gain applied to the raw sensor value.
        gain: f64,
        /// Margin below the first stimulus used for the threshold imprint.
        epsilon_fire: f64,
    },
    /// Actuator exit point: accumulates routed amplitudes and exposes a
    /// smoothed output value at end of tick.
    Output {
        /// Smoothing factor for the end-of-tick mean update.
        smoothing: f64,
        /// Sum of amplitudes accumulated this tick.
        accumulated_sum: f64,
        /// Number of amplitudes accumulated this tick.
        accumulated_count: u32,
        /// Smoothed output value.
        output_value: f64,
    },
}

impl NeuronKind {
    /// Inhibitory kind with the default unit scale.
    pub fn inhibitory() -> Self {
        Self::Inhibitory { gamma: 1.0 }
    }

    /// Modulatory kind with the default unit scale.
    pub fn modulatory() -> Self {
        Self::Modulatory { kappa: 1.0 }
    }

    /// Input kind.
    pub fn input(gain: f64, epsilon_fire: f64) -> Self {
        Self::Input { gain, epsilon_fire }
    }

    /// Output kind with cleared accumulators.
    pub fn output(smoothing: f64) -> Self {
        Self::Output {
            smoothing,
            accumulated_sum: 0.0,
            accumulated_count: 0,
            output_value: 0.0,
        }
    }

    /// A fresh neuron of the same variant, with per-tick state cleared.
    /// Used when growth clones a seed neuron's kind.
    pub fn fresh_copy(&self) -> Self {
        match *self {
            Self::Output { smoothing, .. } => Self::output(smoothing),
            ref other => other.clone(),
        }
    }
}

/// Outcome of routing one input into a neuron.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputOutcome {
    /// Whether the selected slot fired.
    pub fired: bool,
    /// Whether the growth trigger asked for a new neuron this event.
    pub wants_growth: bool,
}

/// A neuron: a map of learning slots, an outgoing adjacency, anchors, and
/// growth bookkeeping. Slots are owned exclusively; outgoing targets are
/// `(layer, neuron)` indices whose lifetime is the enclosing region.
#[derive(Debug, Clone)]
pub struct Neuron {
    /// Behavioral variant.
    pub kind: NeuronKind,
    /// Slot selection engine (configuration wrapper).
    pub slot_engine: SlotEngine,
    /// Per-neuron capacity override; negative inherits the config limit.
    pub slot_limit: i32,
    /// Learning slots keyed by slot id.
    pub slots: BTreeMap<i64, Weight>,
    /// Outgoing synapses in creation order.
    pub outgoing: SmallVec<[Synapse; 4]>,
    /// Whether the last routed input fired.
    pub fired_last: bool,
    /// The last effective input value (post-gain for input neurons).
    pub last_input_value: f64,

    // Anchors.
    pub(crate) focus_anchor: f64,
    pub(crate) focus_set: bool,
    pub(crate) anchor_row: Option<i64>,
    pub(crate) anchor_col: Option<i64>,

    // Growth bookkeeping maintained by the slot engine and the growth
    // trigger.
    /// Slot id selected by the most recent routing.
    pub last_slot_id: Option<i64>,
    /// Whether the most recent selection used the fallback id.
    pub last_slot_used_fallback: bool,
    /// Consecutive at-capacity fallbacks counted toward growth.
    pub fallback_streak: u32,
    /// Missing slot id recorded by the previous fallback.
    pub prev_missing_slot_id: Option<i64>,
    /// Missing slot id recorded by the most recent fallback.
    pub last_missing_slot_id: Option<i64>,
    /// Largest axis percent delta seen by the most recent fallback.
    pub last_max_axis_delta_pct: f64,
    /// Step of the last growth event seeded by this neuron.
    pub last_growth_tick: Option<u64>,
    /// One-shot bias returning the next selection to the last slot.
    pub prefer_last_slot_once: bool,
}

impl Neuron {
    /// Create a neuron of `kind` with the given slot configuration.
    pub fn new(kind: NeuronKind, cfg: SlotConfig) -> Self {
        Self {
            kind,
            slot_engine: SlotEngine::new(cfg),
            slot_limit: -1,
            slots: BTreeMap::new(),
            outgoing: SmallVec::new(),
            fired_last: false,
            last_input_value: 0.0,
            focus_anchor: 0.0,
            focus_set: false,
            anchor_row: None,
            anchor_col: None,
            last_slot_id: None,
            last_slot_used_fallback: false,
            fallback_streak: 0,
            prev_missing_slot_id: None,
            last_missing_slot_id: None,
            last_max_axis_delta_pct: 0.0,
            last_growth_tick: None,
            prefer_last_slot_once: false,
        }
    }

    /// Capacity in effect: the per-neuron override when set, otherwise the
    /// config limit.
    pub fn effective_slot_limit(&self) -> i32 {
        if self.slot_limit >= 0 {
            self.slot_limit
        } else {
            self.slot_engine.cfg.slot_limit
        }
    }

    /// Whether the slot map has reached its capacity.
    pub fn at_slot_capacity(&self) -> bool {
        let limit = self.effective_slot_limit();
        limit > 0 && self.slots.len() >= limit as usize
    }

    /// Route one input into a slot, learn locally, and evaluate the growth
    /// trigger. `modulation_factor` and `current_step` come from the owning
    /// layer's bus.
    pub fn on_input(&mut self, value: f64, modulation_factor: f64, current_step: u64) -> InputOutcome {
        let engine = self.slot_engine;
        let fired = match self.kind {
            NeuronKind::Input { gain, epsilon_fire } => {
                let effective = (value * gain).clamp(0.0, 1.0);
                let slot = engine.select_or_create_slot(self, effective);
                if !slot.first_seen {
                    // Imprint just below the first stimulus so it fires.
                    slot.theta = (effective * (1.0 - epsilon_fire)).max(0.0);
                    slot.first_seen = true;
                }
                slot.strength = effective;
                slot.reinforce(modulation_factor);
                let fired = slot.update_threshold(effective);
                self.last_input_value = effective;
                fired
            }
            _ => {
                let slot = engine.select_or_create_slot(self, value);
                slot.reinforce(modulation_factor);
                let fired = slot.update_threshold(value);
                self.last_input_value = value;
                fired
            }
        };
        self.fired_last = fired;
        let wants_growth = self.evaluate_growth_trigger(current_step);
        InputOutcome {
            fired,
            wants_growth,
        }
    }

    /// Spatial variant of [`Neuron::on_input`] for `(row, col)`-tagged
    /// events.
    pub fn on_input_2d(
        &mut self,
        value: f64,
        row: i64,
        col: i64,
        modulation_factor: f64,
        current_step: u64,
    ) -> InputOutcome {
        let engine = self.slot_engine;
        let slot = engine.select_or_create_slot_2d(self, row, col);
        slot.reinforce(modulation_factor);
        let fired = slot.update_threshold(value);
        self.last_input_value = value;
        self.fired_last = fired;
        let wants_growth = self.evaluate_growth_trigger(current_step);
        InputOutcome {
            fired,
            wants_growth,
        }
    }

    /// Accumulate a routed amplitude into an output neuron. No-op for other
    /// kinds.
    pub fn accumulate_output(&mut self, amplitude: f64) {
        if let NeuronKind::Output {
            accumulated_sum,
            accumulated_count,
            ..
        } = &mut self.kind
        {
            *accumulated_sum += amplitude;
            *accumulated_count += 1;
        }
    }

    /// End-of-tick housekeeping. Output neurons fold the accumulated mean
    /// into their smoothed output value.
    pub fn end_tick(&mut self) {
        if let NeuronKind::Output {
            smoothing,
            accumulated_sum,
            accumulated_count,
            output_value,
        } = &mut self.kind
        {
            if *accumulated_count > 0 {
                let mean = *accumulated_sum / f64::from(*accumulated_count);
                *output_value = (1.0 - *smoothing) * *output_value + *smoothing * mean;
            }
            *accumulated_sum = 0.0;
            *accumulated_count = 0;
        }
    }

    /// Smoothed output value of an output neuron; 0.0 for other kinds.
    pub fn output_value(&self) -> f64 {
        match self.kind {
            NeuronKind::Output { output_value, .. } => output_value,
            _ => 0.0,
        }
    }

    /// Freeze the last-used slot. Returns whether a slot was frozen.
    pub fn freeze_last_slot(&mut self) -> bool {
        let Some(slot_id) = self.last_slot_id else {
            return false;
        };
        match self.slots.get_mut(&slot_id) {
            Some(slot) => {
                slot.freeze();
                true
            }
            None => false,
        }
    }

    /// Unfreeze the last-used slot and bias the very next selection back to
    /// it exactly once. Returns whether a slot was unfrozen.
    pub fn unfreeze_last_slot(&mut self) -> bool {
        let Some(slot_id) = self.last_slot_id else {
            return false;
        };
        match self.slots.get_mut(&slot_id) {
            Some(slot) => {
                slot.unfreeze();
                self.prefer_last_slot_once = true;
                true
            }
            None => false,
        }
    }

    /// Fallback-streak growth trigger (evaluated after every routing).
    fn evaluate_growth_trigger(&mut self, current_step: u64) -> bool {
        let cfg = self.slot_engine.cfg;
        if !(cfg.growth_enabled && cfg.neuron_growth_enabled) {
            return false;
        }
        if !(self.at_slot_capacity() && self.last_slot_used_fallback) {
            return false;
        }
        if cfg.min_delta_pct_for_growth > 0.0
            && self.last_max_axis_delta_pct < cfg.min_delta_pct_for_growth
        {
            self.fallback_streak = 0;
            self.prev_missing_slot_id = self.last_missing_slot_id;
            return false;
        }
        if cfg.fallback_growth_requires_same_missing_slot {
            if self.prev_missing_slot_id.is_some()
                && self.prev_missing_slot_id == self.last_missing_slot_id
            {
                self.fallback_streak += 1;
            } else {
                self.fallback_streak = 1;
            }
        } else {
            self.fallback_streak += 1;
        }
        self.prev_missing_slot_id = self.last_missing_slot_id;

        if self.fallback_streak < cfg.fallback_growth_threshold {
            return false;
        }
        match self.last_growth_tick {
            None => true,
            Some(last) => current_step.saturating_sub(last) >= cfg.neuron_growth_cooldown_ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capped_config() -> SlotConfig {
        SlotConfig::default().with_slot_limit(1)
    }

    #[test]
    fn test_excitatory_fire_path() {
        // Push strength above the imprinted threshold of a small input.
        let mut neuron = Neuron::new(NeuronKind::Excitatory, SlotConfig::default());
        let mut fired_any = false;
        for step in 0..200 {
            let outcome = neuron.on_input(0.001, 1.0, step);
            fired_any |= outcome.fired;
        }
        assert!(fired_any);
        assert!(neuron.fired_last || fired_any);
        assert_eq!(neuron.last_input_value, 0.001);
    }

    #[test]
    fn test_input_neuron_fires_on_first_stimulus() {
        let mut neuron = Neuron::new(NeuronKind::input(1.0, 0.01), SlotConfig::single_slot());
        let outcome = neuron.on_input(1.0, 1.0, 0);
        assert!(outcome.fired);
        assert_eq!(neuron.last_input_value, 1.0);
    }

    #[test]
    fn test_input_neuron_applies_gain_and_clamp() {
        let mut neuron = Neuron::new(NeuronKind::input(2.0, 0.01), SlotConfig::single_slot());
        neuron.on_input(3.0, 1.0, 0);
        assert_eq!(neuron.last_input_value, 1.0); // 3.0 * 2.0 clamped to 1.0
    }

    #[test]
    fn test_output_neuron_accumulates_and_smooths() {
        let mut neuron = Neuron::new(NeuronKind::output(0.5), SlotConfig::single_slot());
        neuron.accumulate_output(1.0);
        neuron.accumulate_output(0.5);
        neuron.end_tick();
        // Mean 0.75 folded with smoothing 0.5 into an initial 0.0.
        assert!((neuron.output_value() - 0.375).abs() < 1e-12);

        // A tick with no events keeps the value.
        neuron.end_tick();
        assert!((neuron.output_value() - 0.375).abs() < 1e-12);
    }

    #[test]
    fn test_fallback_streak_counts_consecutive_fallbacks() {
        let mut neuron = Neuron::new(NeuronKind::Excitatory, {
            let mut cfg = capped_config();
            cfg.fallback_growth_threshold = 100;
            cfg
        });
        neuron.on_input(1.0, 1.0, 0);
        for step in 1..=3 {
            neuron.on_input(2.0, 1.0, step);
        }
        assert_eq!(neuron.fallback_streak, 3);
    }

    #[test]
    fn test_same_missing_slot_guard_blocks_alternation() {
        let mut cfg = capped_config().with_same_missing_slot_guard(true);
        cfg.fallback_growth_threshold = 100;
        let mut neuron = Neuron::new(NeuronKind::Excitatory, cfg);
        neuron.on_input(1.0, 1.0, 0);
        for (step, value) in [2.0, 1.8, 2.0, 1.8, 2.0, 1.8].iter().enumerate() {
            neuron.on_input(*value, 1.0, step as u64 + 1);
        }
        assert!(neuron.fallback_streak <= 1);
    }

    #[test]
    fn test_min_delta_gate_blocks_small_deltas() {
        let mut cfg = capped_config().with_min_delta_pct_for_growth(70.0);
        cfg.fallback_growth_threshold = 100;
        let mut neuron = Neuron::new(NeuronKind::Excitatory, cfg);
        neuron.on_input(1.0, 1.0, 0);
        for step in 1..=3 {
            neuron.on_input(1.6, 1.0, step);
        }
        assert_eq!(neuron.fallback_streak, 0);
        for step in 4..=6 {
            neuron.on_input(1.8, 1.0, step);
        }
        assert_eq!(neuron.fallback_streak, 3);
    }

    #[test]
    fn test_growth_trigger_honors_threshold_and_cooldown() {
        let mut cfg = capped_config();
        cfg.fallback_growth_threshold = 3;
        cfg.neuron_growth_cooldown_ticks = 10;
        let mut neuron = Neuron::new(NeuronKind::Excitatory, cfg);
        neuron.on_input(1.0, 1.0, 0);
        assert!(!neuron.on_input(2.0, 1.0, 1).wants_growth);
        assert!(!neuron.on_input(2.0, 1.0, 2).wants_growth);
        assert!(neuron.on_input(2.0, 1.0, 3).wants_growth);

        // A recent growth event suppresses the trigger until the cooldown
        // elapses.
        neuron.last_growth_tick = Some(3);
        neuron.fallback_streak = 0;
        for step in 4..=6 {
            assert!(!neuron.on_input(2.0, 1.0, step).wants_growth);
        }
        assert!(neuron.on_input(2.0, 1.0, 13).wants_growth);
    }

    #[test]
    fn test_spatial_input_path_tracks_anchors_and_fallback() {
        let cfg = SlotConfig::default().with_slot_limit(2);
        let mut neuron = Neuron::new(NeuronKind::Excitatory, cfg);

        // First observation anchors at (2, 2).
        neuron.on_input_2d(1.0, 2, 2, 1.0, 0);
        assert_eq!(neuron.anchor_row, Some(2));
        assert_eq!(neuron.anchor_col, Some(2));
        assert_eq!(neuron.last_slot_id, Some(0));

        // A far-away pixel overflows the bin domain and falls back.
        neuron.on_input_2d(1.0, 8, 8, 1.0, 1);
        assert!(neuron.last_slot_used_fallback);
        assert!(neuron.last_max_axis_delta_pct >= 300.0);
    }

    #[test]
    fn test_spatial_unfreeze_prefers_last_slot_once() {
        let cfg = SlotConfig::default();
        let mut neuron = Neuron::new(NeuronKind::Excitatory, cfg);
        neuron.on_input_2d(1.0, 4, 4, 1.0, 0);
        neuron.on_input_2d(1.0, 6, 5, 1.0, 1);
        let slot_id = neuron.last_slot_id.unwrap();

        assert!(neuron.freeze_last_slot());
        assert!(neuron.unfreeze_last_slot());

        // The next spatial selection is routed back to the same slot once,
        // even though (4, 4) would land in bin 0.
        neuron.on_input_2d(1.0, 4, 4, 1.0, 2);
        assert_eq!(neuron.last_slot_id, Some(slot_id));
        neuron.on_input_2d(1.0, 4, 4, 1.0, 3);
        assert_eq!(neuron.last_slot_id, Some(0));
    }

    #[test]
    fn test_freeze_unfreeze_one_shot_reuse() {
        let cfg = SlotConfig::default();
        let mut neuron = Neuron::new(NeuronKind::Excitatory, cfg);
        neuron.on_input(1.0, 1.0, 0);
        neuron.on_input(1.55, 1.0, 1);
        let frozen_slot = neuron.last_slot_id.unwrap();

        assert!(neuron.freeze_last_slot());
        assert!(neuron.slots[&frozen_slot].is_frozen());
        assert!(neuron.unfreeze_last_slot());
        assert!(!neuron.slots[&frozen_slot].is_frozen());
        assert!(neuron.prefer_last_slot_once);

        // The next selection is routed back to the unfrozen slot once.
        neuron.on_input(1.0, 1.0, 2);
        assert_eq!(neuron.last_slot_id, Some(frozen_slot));
        assert!(!neuron.prefer_last_slot_once);
        neuron.on_input(1.0, 1.0, 3);
        assert_eq!(neuron.last_slot_id, Some(0));
    }
}
