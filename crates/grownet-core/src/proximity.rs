//! Proximity sidecar: spatial-hash-assisted short-range connection policy

use std::collections::HashMap;

use rand::Rng;

use crate::error::{GrowNetError, Result};
use crate::region::Region;

/// Distance-to-probability mapping of the proximity policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProximityFunction {
    /// Accept every pair within the radius.
    #[default]
    Step,
    /// Accept with probability `(1 - d/r)^gamma`.
    Linear,
    /// Accept with probability `1 / (1 + exp(k * (d - r)))`.
    Logistic,
}

/// Configuration of the per-tick proximity pass.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProximityConfig {
    /// Master switch; the pass is skipped entirely when false.
    pub enabled: bool,
    /// Connection radius in layout units.
    pub radius: f64,
    /// Distance-to-probability mapping.
    pub function: ProximityFunction,
    /// Exponent for the linear falloff.
    pub linear_exponent_gamma: f64,
    /// Steepness for the logistic falloff.
    pub logistic_steepness_k: f64,
    /// Edge budget per tick.
    pub max_edges_per_tick: usize,
    /// Per-neuron attempt cooldown in ticks.
    pub cooldown_ticks: u64,
    /// First step (inclusive) of the development window.
    pub development_window_start: u64,
    /// Last step (inclusive) of the development window.
    pub development_window_end: u64,
    /// Layers eligible for proximity wiring; empty means all.
    pub candidate_layers: Vec<usize>,
    /// Record a mesh rule when an accepted edge crosses layers.
    pub record_mesh_rules_on_cross_layer: bool,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: 1.0,
            function: ProximityFunction::Step,
            linear_exponent_gamma: 1.0,
            logistic_steepness_k: 4.0,
            max_edges_per_tick: 128,
            cooldown_ticks: 5,
            development_window_start: 0,
            development_window_end: u64::MAX,
            candidate_layers: Vec::new(),
            record_mesh_rules_on_cross_layer: true,
        }
    }
}

impl ProximityConfig {
    /// Enabled STEP policy with the given radius.
    pub fn step(radius: f64) -> Self {
        Self {
            enabled: true,
            radius,
            ..Self::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(self.radius > 0.0) {
            return Err(GrowNetError::invalid_parameter(
                "radius",
                self.radius.to_string(),
                "> 0.0",
            ));
        }
        if !(self.linear_exponent_gamma > 0.0) {
            return Err(GrowNetError::invalid_parameter(
                "linear_exponent_gamma",
                self.linear_exponent_gamma.to_string(),
                "> 0.0",
            ));
        }
        if !(self.logistic_steepness_k > 0.0) {
            return Err(GrowNetError::invalid_parameter(
                "logistic_steepness_k",
                self.logistic_steepness_k.to_string(),
                "> 0.0",
            ));
        }
        if self.development_window_end < self.development_window_start {
            return Err(GrowNetError::invalid_parameter(
                "development_window_end",
                self.development_window_end.to_string(),
                ">= development_window_start",
            ));
        }
        Ok(())
    }
}

/// Deterministic 3D layout of a region's neurons.
///
/// Layers stack along z; within a layer, neurons sit on a grid centered at
/// the origin. Layers without a 2D shape use a `ceil(sqrt(n + 1))` square.
#[derive(Debug, Clone, Copy)]
pub struct DeterministicLayout;

impl DeterministicLayout {
    /// Vertical spacing between layers.
    pub const LAYER_SPACING: f64 = 4.0;
    /// Spacing between adjacent grid positions within a layer.
    pub const GRID_SPACING: f64 = 1.2;

    /// Position of one neuron. A pure function of its coordinates and the
    /// layer shape.
    pub fn position(
        _region_name: &str,
        layer_index: usize,
        neuron_index: usize,
        layer_height: usize,
        layer_width: usize,
    ) -> [f64; 3] {
        let z = layer_index as f64 * Self::LAYER_SPACING;
        if layer_height > 0 && layer_width > 0 {
            let row = neuron_index / layer_width;
            let col = neuron_index % layer_width;
            let x = (col as f64 - (layer_width as f64 - 1.0) / 2.0) * Self::GRID_SPACING;
            let y = ((layer_height as f64 - 1.0) / 2.0 - row as f64) * Self::GRID_SPACING;
            return [x, y, z];
        }
        let mut side = ((neuron_index + 1) as f64).sqrt() as usize;
        if side * side < neuron_index + 1 {
            side += 1;
        }
        let row = neuron_index / side;
        let col = neuron_index % side;
        let x = (col as f64 - (side as f64 - 1.0) / 2.0) * Self::GRID_SPACING;
        let y = ((side as f64 - 1.0) / 2.0 - row as f64) * Self::GRID_SPACING;
        [x, y, z]
    }
}

/// Uniform-grid spatial hash over neuron positions, cell size = radius.
#[derive(Debug)]
pub(crate) struct SpatialHash {
    cell_size: f64,
    cells: HashMap<(i64, i64, i64), Vec<(usize, usize)>>,
}

impl SpatialHash {
    pub(crate) fn new(cell_size: f64) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
        }
    }

    fn key_for(&self, position: [f64; 3]) -> (i64, i64, i64) {
        (
            (position[0] / self.cell_size).floor() as i64,
            (position[1] / self.cell_size).floor() as i64,
            (position[2] / self.cell_size).floor() as i64,
        )
    }

    pub(crate) fn insert(&mut self, item: (usize, usize), position: [f64; 3]) {
        self.cells.entry(self.key_for(position)).or_default().push(item);
    }

    /// Items in the 27-cell neighborhood of `position`, in deterministic
    /// cell-offset then insertion order.
    pub(crate) fn near(&self, position: [f64; 3]) -> Vec<(usize, usize)> {
        let base = self.key_for(position);
        let mut result = Vec::new();
        for offset_z in -1..=1 {
            for offset_y in -1..=1 {
                for offset_x in -1..=1 {
                    let key = (base.0 + offset_x, base.1 + offset_y, base.2 + offset_z);
                    if let Some(items) = self.cells.get(&key) {
                        result.extend_from_slice(items);
                    }
                }
            }
        }
        result
    }
}

/// Acceptance probability for a candidate pair at `distance`.
pub fn probability_from_distance(distance: f64, cfg: &ProximityConfig) -> f64 {
    match cfg.function {
        ProximityFunction::Step => {
            if distance <= cfg.radius {
                1.0
            } else {
                0.0
            }
        }
        ProximityFunction::Linear => {
            let unit = (1.0 - distance / cfg.radius.max(1e-12)).max(0.0);
            unit.powf(cfg.linear_exponent_gamma.max(1e-12))
        }
        ProximityFunction::Logistic => {
            1.0 / (1.0 + (cfg.logistic_steepness_k * (distance - cfg.radius)).exp())
        }
    }
}

/// One proximity pass over the region. Returns the number of edges added.
///
/// Skipped outside the development window; probabilistic functions demand an
/// explicitly seeded region RNG.
pub(crate) fn apply(region: &mut Region, cfg: &ProximityConfig) -> Result<usize> {
    if !cfg.enabled {
        return Ok(0);
    }
    let current_step = region.bus().current_step();
    if current_step < cfg.development_window_start || current_step > cfg.development_window_end {
        return Ok(0);
    }
    let probabilistic = cfg.function != ProximityFunction::Step;
    if probabilistic && !region.has_seeded_rng() {
        return Err(GrowNetError::invalid_config(
            "probabilistic proximity requires an explicitly seeded region RNG",
        ));
    }

    let layer_count = region.layer_count();
    let candidate_layers: Vec<usize> = if cfg.candidate_layers.is_empty() {
        (0..layer_count).collect()
    } else {
        for &layer_index in &cfg.candidate_layers {
            if layer_index >= layer_count {
                return Err(GrowNetError::index_out_of_range(
                    "candidate_layers",
                    layer_index,
                    layer_count,
                ));
            }
        }
        cfg.candidate_layers.clone()
    };

    let region_name = region.name().to_string();
    let mut layer_shapes = Vec::with_capacity(candidate_layers.len());
    let mut layer_neuron_counts = Vec::with_capacity(candidate_layers.len());
    for &layer_index in &candidate_layers {
        let layer = region.layer(layer_index)?;
        layer_shapes.push(layer.grid_shape().unwrap_or((0, 0)));
        layer_neuron_counts.push(layer.neuron_count());
    }

    let mut grid = SpatialHash::new(cfg.radius);
    for (slot, &layer_index) in candidate_layers.iter().enumerate() {
        let (height, width) = layer_shapes[slot];
        for neuron_index in 0..layer_neuron_counts[slot] {
            let position =
                DeterministicLayout::position(&region_name, layer_index, neuron_index, height, width);
            grid.insert((layer_index, neuron_index), position);
        }
    }

    let mut edges_added = 0usize;
    'sweep: for (slot, &layer_index) in candidate_layers.iter().enumerate() {
        let (height, width) = layer_shapes[slot];
        for neuron_index in 0..layer_neuron_counts[slot] {
            if let Some(&last_attempt) = region
                .proximity_last_attempt
                .get(&(layer_index, neuron_index))
            {
                if current_step.saturating_sub(last_attempt) < cfg.cooldown_ticks {
                    continue;
                }
            }
            let origin =
                DeterministicLayout::position(&region_name, layer_index, neuron_index, height, width);
            for (neighbor_layer, neighbor_neuron) in grid.near(origin) {
                if neighbor_layer == layer_index && neighbor_neuron == neuron_index {
                    continue;
                }
                if region.has_edge(layer_index, neuron_index, neighbor_layer, neighbor_neuron) {
                    continue;
                }
                let neighbor_shape = region.layer(neighbor_layer)?.grid_shape().unwrap_or((0, 0));
                let neighbor_position = DeterministicLayout::position(
                    &region_name,
                    neighbor_layer,
                    neighbor_neuron,
                    neighbor_shape.0,
                    neighbor_shape.1,
                );
                let distance = ((origin[0] - neighbor_position[0]).powi(2)
                    + (origin[1] - neighbor_position[1]).powi(2)
                    + (origin[2] - neighbor_position[2]).powi(2))
                .sqrt();
                if distance > cfg.radius {
                    continue;
                }
                let probability = probability_from_distance(distance, cfg);
                let accepted = probability >= 1.0
                    || (probabilistic && region.rng_mut().gen::<f64>() < probability);
                if !accepted {
                    continue;
                }

                region.connect_neurons(
                    layer_index,
                    neuron_index,
                    neighbor_layer,
                    neighbor_neuron,
                    false,
                )?;
                if cfg.record_mesh_rules_on_cross_layer && neighbor_layer != layer_index {
                    region.record_mesh_rule(layer_index, neighbor_layer, 1.0, false);
                }
                region
                    .proximity_last_attempt
                    .insert((layer_index, neuron_index), current_step);
                region
                    .proximity_last_attempt
                    .insert((neighbor_layer, neighbor_neuron), current_step);

                edges_added += 1;
                if edges_added >= cfg.max_edges_per_tick {
                    break 'sweep;
                }
            }
        }
    }
    if edges_added > 0 {
        log::debug!(
            "proximity pass added {} edge(s) at step {}",
            edges_added,
            current_step
        );
    }
    Ok(edges_added)
}
