//! Slot selection: adaptive per-neuron compartments keyed by percent delta

use crate::error::{GrowNetError, Result};
use crate::neuron::Neuron;
use crate::weight::Weight;

/// Key stride that packs 2D `(row_bin, col_bin)` pairs into one slot id.
/// Large enough that realistic bin indices never collide.
pub const SLOT_KEY_STRIDE: i64 = 100_000;

/// How the per-neuron anchor is established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AnchorMode {
    /// Anchor on the first observed value and keep it.
    #[default]
    First,
}

/// Configuration for slot selection and slot-driven growth.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotConfig {
    /// Anchor establishment policy.
    pub anchor_mode: AnchorMode,
    /// Percent-delta width of one slot bin.
    pub bin_width_pct: f64,
    /// Floor for the percent-delta denominator near a zero anchor.
    pub epsilon_scale: f64,
    /// Maximum slots per neuron; negative means unbounded.
    pub slot_limit: i32,
    /// Master switch for all growth triggered by this config.
    pub growth_enabled: bool,
    /// Allow fallback streaks to grow new neurons.
    pub neuron_growth_enabled: bool,
    /// Consecutive at-capacity fallbacks required before growth.
    pub fallback_growth_threshold: u32,
    /// Minimum ticks between growth events seeded by one neuron.
    pub neuron_growth_cooldown_ticks: u64,
    /// When positive, fallbacks below this percent delta do not count.
    pub min_delta_pct_for_growth: f64,
    /// Count a streak only while the missing slot id stays the same.
    pub fallback_growth_requires_same_missing_slot: bool,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            anchor_mode: AnchorMode::First,
            bin_width_pct: 10.0,
            epsilon_scale: 1e-6,
            slot_limit: 16,
            growth_enabled: true,
            neuron_growth_enabled: true,
            fallback_growth_threshold: 3,
            neuron_growth_cooldown_ticks: 0,
            min_delta_pct_for_growth: 0.0,
            fallback_growth_requires_same_missing_slot: false,
        }
    }
}

impl SlotConfig {
    /// Fixed-width binning at `bin_width_pct` percent per slot.
    pub fn fixed(bin_width_pct: f64) -> Self {
        Self {
            bin_width_pct,
            ..Self::default()
        }
    }

    /// One slot covering the whole percent-delta domain. Used by input and
    /// output neurons.
    pub fn single_slot() -> Self {
        Self {
            bin_width_pct: 100.0,
            slot_limit: 1,
            ..Self::default()
        }
    }

    /// Set the slot capacity.
    pub fn with_slot_limit(mut self, slot_limit: i32) -> Self {
        self.slot_limit = slot_limit;
        self
    }

    /// Set the same-missing-slot growth guard.
    pub fn with_same_missing_slot_guard(mut self, required: bool) -> Self {
        self.fallback_growth_requires_same_missing_slot = required;
        self
    }

    /// Set the minimum percent delta a fallback must have to count toward
    /// growth.
    pub fn with_min_delta_pct_for_growth(mut self, min_delta_pct: f64) -> Self {
        self.min_delta_pct_for_growth = min_delta_pct;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(self.bin_width_pct > 0.0) {
            return Err(GrowNetError::invalid_parameter(
                "bin_width_pct",
                self.bin_width_pct.to_string(),
                "> 0.0",
            ));
        }
        if !(self.epsilon_scale > 0.0) {
            return Err(GrowNetError::invalid_parameter(
                "epsilon_scale",
                self.epsilon_scale.to_string(),
                "> 0.0",
            ));
        }
        if self.fallback_growth_threshold == 0 {
            return Err(GrowNetError::invalid_parameter(
                "fallback_growth_threshold",
                "0",
                ">= 1",
            ));
        }
        if self.min_delta_pct_for_growth < 0.0 {
            return Err(GrowNetError::invalid_parameter(
                "min_delta_pct_for_growth",
                self.min_delta_pct_for_growth.to_string(),
                ">= 0.0",
            ));
        }
        Ok(())
    }
}

/// Selects or creates the slot a given input routes into.
///
/// Selection is keyed by percent delta from the neuron's anchor. Capacity is
/// enforced with a deterministic fallback id, and fallback metadata is
/// recorded on the neuron for the growth subsystem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotEngine {
    /// Slot selection configuration.
    pub cfg: SlotConfig,
}

impl SlotEngine {
    /// Create an engine from a configuration.
    pub fn new(cfg: SlotConfig) -> Self {
        Self { cfg }
    }

    fn bin_width(&self) -> f64 {
        self.cfg.bin_width_pct.max(0.1)
    }

    fn denominator(&self, anchor: f64) -> f64 {
        anchor.abs().max(self.cfg.epsilon_scale.max(1e-12))
    }

    /// Percent delta of `value` from `anchor` and the bin it lands in.
    pub fn scalar_bin(&self, anchor: f64, value: f64) -> (i64, f64) {
        let delta_pct = (value - anchor).abs() / self.denominator(anchor) * 100.0;
        let bin = (delta_pct / self.bin_width()).floor() as i64;
        (bin, delta_pct)
    }

    /// Row/column percent-delta bins for the spatial path.
    pub fn spatial_bins(
        &self,
        anchor_row: i64,
        anchor_col: i64,
        row: i64,
        col: i64,
    ) -> ((i64, i64), (f64, f64)) {
        let row_delta_pct =
            (row - anchor_row).abs() as f64 / self.denominator(anchor_row as f64) * 100.0;
        let col_delta_pct =
            (col - anchor_col).abs() as f64 / self.denominator(anchor_col as f64) * 100.0;
        let width = self.bin_width();
        let row_bin = (row_delta_pct / width).floor() as i64;
        let col_bin = (col_delta_pct / width).floor() as i64;
        ((row_bin, col_bin), (row_delta_pct, col_delta_pct))
    }

    /// Select the slot for a scalar input, creating it when allowed, and
    /// return it directly.
    ///
    /// The selected id is recorded in `neuron.last_slot_id`. Capacity
    /// semantics: when the limit is reached and a new bin is desired (or the
    /// bin is outside the domain), the fallback id `limit - 1` is used, and
    /// when even that id is absent the lowest existing slot id is reused.
    pub fn select_or_create_slot<'a>(&self, neuron: &'a mut Neuron, value: f64) -> &'a mut Weight {
        if !neuron.focus_set && self.cfg.anchor_mode == AnchorMode::First {
            neuron.focus_anchor = value;
            neuron.focus_set = true;
        }
        if let Some(slot_id) = self.take_preferred_slot_id(neuron) {
            return neuron.slots.entry(slot_id).or_default();
        }

        let (desired, delta_pct) = self.scalar_bin(neuron.focus_anchor, value);
        let limit = neuron.effective_slot_limit();
        let out_of_domain = limit > 0 && desired >= i64::from(limit);
        self.commit_selection(neuron, desired, out_of_domain, delta_pct, |limit| {
            i64::from(limit - 1)
        })
    }

    /// Select the slot for a spatial `(row, col)` input and return it
    /// directly.
    ///
    /// Row and column percent deltas bin independently; the pair packs into a
    /// composite key `row_bin * SLOT_KEY_STRIDE + col_bin`.
    pub fn select_or_create_slot_2d<'a>(
        &self,
        neuron: &'a mut Neuron,
        row: i64,
        col: i64,
    ) -> &'a mut Weight {
        if neuron.anchor_row.is_none() || neuron.anchor_col.is_none() {
            neuron.anchor_row = Some(row);
            neuron.anchor_col = Some(col);
        }
        if let Some(slot_id) = self.take_preferred_slot_id(neuron) {
            return neuron.slots.entry(slot_id).or_default();
        }

        let anchor_row = neuron.anchor_row.unwrap_or(row);
        let anchor_col = neuron.anchor_col.unwrap_or(col);
        let ((row_bin, col_bin), (row_delta_pct, col_delta_pct)) =
            self.spatial_bins(anchor_row, anchor_col, row, col);
        let limit = neuron.effective_slot_limit();
        let out_of_domain =
            limit > 0 && (row_bin >= i64::from(limit) || col_bin >= i64::from(limit));
        let desired = row_bin * SLOT_KEY_STRIDE + col_bin;
        let max_axis_delta_pct = row_delta_pct.max(col_delta_pct);
        self.commit_selection(neuron, desired, out_of_domain, max_axis_delta_pct, |limit| {
            i64::from(limit - 1) * SLOT_KEY_STRIDE + i64::from(limit - 1)
        })
    }

    /// One-shot reuse of the last slot after an unfreeze. Returns the slot
    /// id to reuse, consuming the bias flag either way.
    fn take_preferred_slot_id(&self, neuron: &mut Neuron) -> Option<i64> {
        if !neuron.prefer_last_slot_once {
            return None;
        }
        neuron.prefer_last_slot_once = false;
        let last = neuron.last_slot_id?;
        if neuron.slots.contains_key(&last) {
            neuron.last_slot_used_fallback = false;
            return Some(last);
        }
        None
    }

    fn commit_selection<'a>(
        &self,
        neuron: &'a mut Neuron,
        desired: i64,
        out_of_domain: bool,
        delta_pct: f64,
        fallback_id: impl Fn(i32) -> i64,
    ) -> &'a mut Weight {
        let limit = neuron.effective_slot_limit();
        let at_capacity = limit > 0 && neuron.slots.len() >= limit as usize;
        let want_new = !neuron.slots.contains_key(&desired);
        let use_fallback = out_of_domain || (at_capacity && want_new);

        let mut slot_id = if use_fallback && limit > 0 {
            fallback_id(limit)
        } else {
            desired
        };
        if at_capacity && !neuron.slots.contains_key(&slot_id) {
            // Deterministic reuse: lowest existing slot id. A capacity limit
            // above zero implies a non-empty map.
            match neuron.slots.keys().next().copied() {
                Some(lowest) => slot_id = lowest,
                None => debug_assert!(false, "slot map at capacity but empty"),
            }
        }

        neuron.last_slot_id = Some(slot_id);
        neuron.last_slot_used_fallback = use_fallback;
        if use_fallback {
            neuron.last_missing_slot_id = Some(desired);
            neuron.last_max_axis_delta_pct = delta_pct;
        } else {
            neuron.fallback_streak = 0;
            neuron.prev_missing_slot_id = None;
            neuron.last_missing_slot_id = None;
        }
        neuron.slots.entry(slot_id).or_default()
    }
}
