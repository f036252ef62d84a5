//! Layers: ordered neuron populations sharing one lateral bus

use crate::bus::LateralBus;
use crate::error::{GrowNetError, Result};
use crate::neuron::{InputOutcome, Neuron, NeuronKind};
use crate::slot::SlotConfig;

/// Structural variant of a layer.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerKind {
    /// Mixed excitatory/inhibitory/modulatory population.
    Generic,
    /// Shape-aware source layer consuming 2D frames, one neuron per pixel.
    Input2D {
        /// Frame height in pixels.
        height: usize,
        /// Frame width in pixels.
        width: usize,
    },
    /// Shape-agnostic source layer consuming row-major N-D tensors.
    InputNd {
        /// Tensor shape; the neuron count is the product of the dims.
        shape: Vec<usize>,
    },
    /// Shape-aware sink layer exposing a row-major output frame.
    Output2D {
        /// Frame height in pixels.
        height: usize,
        /// Frame width in pixels.
        width: usize,
        /// Smoothed output frame, updated at end of tick.
        frame: Vec<f64>,
    },
}

/// Fire and growth events produced by one delivery into a layer.
///
/// `fired` carries only events that propagate downstream (excitatory and
/// input neurons); inhibitory and modulatory fires are absorbed into the
/// layer bus before this record leaves the layer.
#[derive(Debug, Clone, Default)]
pub struct LayerActivity {
    /// `(neuron index, amplitude)` pairs in firing order.
    pub fired: Vec<(usize, f64)>,
    /// Indices of neurons whose growth trigger fired.
    pub growth: Vec<usize>,
}

impl LayerActivity {
    fn absorb(&mut self, other: LayerActivity) {
        self.fired.extend(other.fired);
        self.growth.extend(other.growth);
    }
}

/// A population of neurons with one shared [`LateralBus`].
///
/// Neuron indices are stable for the lifetime of the region; growth appends.
#[derive(Debug, Clone)]
pub struct Layer {
    kind: LayerKind,
    neurons: Vec<Neuron>,
    bus: LateralBus,
    neuron_limit: i32,
    slot_config: SlotConfig,
}

impl Layer {
    /// Mixed layer with the given counts of excitatory, inhibitory, and
    /// modulatory neurons.
    pub fn new_mixed(
        excitatory_count: usize,
        inhibitory_count: usize,
        modulatory_count: usize,
    ) -> Self {
        let cfg = SlotConfig::default();
        let mut neurons = Vec::with_capacity(excitatory_count + inhibitory_count + modulatory_count);
        for _ in 0..excitatory_count {
            neurons.push(Neuron::new(NeuronKind::Excitatory, cfg));
        }
        for _ in 0..inhibitory_count {
            neurons.push(Neuron::new(NeuronKind::inhibitory(), cfg));
        }
        for _ in 0..modulatory_count {
            neurons.push(Neuron::new(NeuronKind::modulatory(), cfg));
        }
        Self {
            kind: LayerKind::Generic,
            neurons,
            bus: LateralBus::new(),
            neuron_limit: -1,
            slot_config: cfg,
        }
    }

    /// Single-neuron scalar entry edge used by port binding.
    pub fn new_input_scalar(gain: f64, epsilon_fire: f64) -> Self {
        let cfg = SlotConfig::single_slot();
        Self {
            kind: LayerKind::Generic,
            neurons: vec![Neuron::new(NeuronKind::input(gain, epsilon_fire), cfg)],
            bus: LateralBus::new(),
            neuron_limit: -1,
            slot_config: cfg,
        }
    }

    /// 2D input layer with one input neuron per pixel.
    pub fn new_input_2d(height: usize, width: usize, gain: f64, epsilon_fire: f64) -> Self {
        let cfg = SlotConfig::single_slot();
        let neurons = (0..height * width)
            .map(|_| Neuron::new(NeuronKind::input(gain, epsilon_fire), cfg))
            .collect();
        Self {
            kind: LayerKind::Input2D { height, width },
            neurons,
            bus: LateralBus::new(),
            neuron_limit: -1,
            slot_config: cfg,
        }
    }

    /// N-D input layer; the shape must have rank >= 1 and positive dims.
    pub fn new_input_nd(shape: &[usize], gain: f64, epsilon_fire: f64) -> Result<Self> {
        if shape.is_empty() {
            return Err(GrowNetError::invalid_parameter(
                "shape",
                "[]",
                "rank >= 1",
            ));
        }
        let mut total: usize = 1;
        for &dim in shape {
            if dim == 0 {
                return Err(GrowNetError::invalid_parameter(
                    "shape",
                    format!("{shape:?}"),
                    "all dims > 0",
                ));
            }
            total = total.checked_mul(dim).ok_or_else(|| {
                GrowNetError::invalid_parameter("shape", format!("{shape:?}"), "total size fits usize")
            })?;
        }
        let cfg = SlotConfig::single_slot();
        let neurons = (0..total)
            .map(|_| Neuron::new(NeuronKind::input(gain, epsilon_fire), cfg))
            .collect();
        Ok(Self {
            kind: LayerKind::InputNd {
                shape: shape.to_vec(),
            },
            neurons,
            bus: LateralBus::new(),
            neuron_limit: -1,
            slot_config: cfg,
        })
    }

    /// 2D output layer with one output neuron per pixel.
    pub fn new_output_2d(height: usize, width: usize, smoothing: f64) -> Self {
        let cfg = SlotConfig::single_slot();
        let neurons = (0..height * width)
            .map(|_| Neuron::new(NeuronKind::output(smoothing), cfg))
            .collect();
        Self {
            kind: LayerKind::Output2D {
                height,
                width,
                frame: vec![0.0; height * width],
            },
            neurons,
            bus: LateralBus::new(),
            neuron_limit: -1,
            slot_config: cfg,
        }
    }

    /// Structural variant of this layer.
    pub fn kind(&self) -> &LayerKind {
        &self.kind
    }

    /// Neurons in index order.
    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    /// Mutable access to the neurons.
    pub fn neurons_mut(&mut self) -> &mut [Neuron] {
        &mut self.neurons
    }

    /// Number of neurons.
    pub fn neuron_count(&self) -> usize {
        self.neurons.len()
    }

    /// The layer's lateral bus.
    pub fn bus(&self) -> &LateralBus {
        &self.bus
    }

    /// Mutable access to the lateral bus.
    pub fn bus_mut(&mut self) -> &mut LateralBus {
        &mut self.bus
    }

    /// `(height, width)` for shape-aware 2D layers.
    pub fn grid_shape(&self) -> Option<(usize, usize)> {
        match self.kind {
            LayerKind::Input2D { height, width } | LayerKind::Output2D { height, width, .. } => {
                Some((height, width))
            }
            _ => None,
        }
    }

    /// Whether this is an Output2D layer.
    pub fn is_output_2d(&self) -> bool {
        matches!(self.kind, LayerKind::Output2D { .. })
    }

    /// Row-major output frame of an Output2D layer.
    pub fn output_frame(&self) -> Option<&[f64]> {
        match &self.kind {
            LayerKind::Output2D { frame, .. } => Some(frame),
            _ => None,
        }
    }

    /// Replace the slot configuration for this layer and all its neurons.
    pub fn set_slot_config(&mut self, cfg: SlotConfig) {
        self.slot_config = cfg;
        for neuron in &mut self.neurons {
            neuron.slot_engine.cfg = cfg;
        }
    }

    /// Slot configuration used for new neurons.
    pub fn slot_config(&self) -> &SlotConfig {
        &self.slot_config
    }

    /// Cap the neuron count; negative means unlimited.
    pub fn set_neuron_limit(&mut self, limit: i32) {
        self.neuron_limit = limit;
    }

    /// Drive every neuron with a scalar value for this tick.
    pub fn forward(&mut self, value: f64) -> LayerActivity {
        let mut activity = LayerActivity::default();
        for index in 0..self.neurons.len() {
            let delivered = self.deliver(index, value);
            activity.absorb(delivered);
        }
        activity
    }

    /// Deliver a 2D frame to an Input2D layer, one pixel per neuron.
    pub fn forward_image(&mut self, frame: &[Vec<f64>]) -> Result<LayerActivity> {
        let (height, width) = match self.kind {
            LayerKind::Input2D { height, width } => (height, width),
            _ => {
                return Err(GrowNetError::invalid_config(
                    "forward_image requires an Input2D layer",
                ))
            }
        };
        if frame.len() != height || frame.iter().any(|row| row.len() != width) {
            return Err(GrowNetError::shape_mismatch(
                format!("{height}x{width}"),
                format!(
                    "{}x{}",
                    frame.len(),
                    frame.first().map(|row| row.len()).unwrap_or(0)
                ),
            ));
        }
        let mut activity = LayerActivity::default();
        for row in 0..height {
            for col in 0..width {
                let index = row * width + col;
                let delivered = self.deliver(index, frame[row][col]);
                activity.absorb(delivered);
            }
        }
        Ok(activity)
    }

    /// Deliver a row-major flat tensor to an InputND layer after shape
    /// validation.
    pub fn forward_nd(&mut self, flat: &[f64], shape: &[usize]) -> Result<LayerActivity> {
        let expected = match &self.kind {
            LayerKind::InputNd { shape } => shape.clone(),
            _ => {
                return Err(GrowNetError::invalid_config(
                    "forward_nd requires an InputND layer",
                ))
            }
        };
        if expected != shape {
            return Err(GrowNetError::shape_mismatch(
                format!("{expected:?}"),
                format!("{shape:?}"),
            ));
        }
        if flat.len() != self.neurons.len() {
            return Err(GrowNetError::shape_mismatch(
                format!("{} elements", self.neurons.len()),
                format!("{} elements", flat.len()),
            ));
        }
        let mut activity = LayerActivity::default();
        for (index, &value) in flat.iter().enumerate() {
            let delivered = self.deliver(index, value);
            activity.absorb(delivered);
        }
        Ok(activity)
    }

    /// Route an amplitude from an upstream source into the neuron at
    /// `source_index`. Out-of-range indices are ignored (tracts map indices
    /// one-to-one and destination layers may be smaller than their source).
    pub fn propagate_from(&mut self, source_index: usize, amplitude: f64) -> LayerActivity {
        let mut activity = LayerActivity::default();
        if source_index < self.neurons.len() {
            let delivered = self.deliver(source_index, amplitude);
            activity.absorb(delivered);
        }
        activity
    }

    /// End-of-tick housekeeping: per-neuron hooks, frame refresh for
    /// Output2D, then bus decay.
    pub fn end_tick(&mut self) {
        for neuron in &mut self.neurons {
            neuron.end_tick();
        }
        if let LayerKind::Output2D { frame, .. } = &mut self.kind {
            for (index, neuron) in self.neurons.iter().enumerate() {
                frame[index] = neuron.output_value();
            }
        }
        self.bus.decay();
    }

    /// Append a neuron of the seed's kind with the layer's slot config.
    /// Returns the new index, or `None` when the layer refuses (capacity, or
    /// a non-growable seed kind).
    pub fn try_grow_neuron(&mut self, seed_index: usize) -> Option<usize> {
        if self.neuron_limit >= 0 && self.neurons.len() >= self.neuron_limit as usize {
            return None;
        }
        let seed_kind = self.neurons.get(seed_index)?.kind.fresh_copy();
        if !matches!(
            seed_kind,
            NeuronKind::Excitatory | NeuronKind::Inhibitory { .. } | NeuronKind::Modulatory { .. }
        ) {
            return None;
        }
        self.neurons.push(Neuron::new(seed_kind, self.slot_config));
        Some(self.neurons.len() - 1)
    }

    /// Route one value into one neuron and fold bus-writing fires into the
    /// lateral bus.
    fn deliver(&mut self, index: usize, value: f64) -> LayerActivity {
        let mut activity = LayerActivity::default();
        let modulation = self.bus.modulation_factor();
        let step = self.bus.current_step();
        let outcome: InputOutcome = self.neurons[index].on_input(value, modulation, step);
        if outcome.wants_growth {
            activity.growth.push(index);
        }
        if let NeuronKind::Output { .. } = self.neurons[index].kind {
            // Output neurons smooth every routed amplitude; their slot state
            // still learns above but never propagates.
            self.neurons[index].accumulate_output(value);
            return activity;
        }
        if outcome.fired {
            let amplitude = self.neurons[index].last_input_value;
            match self.neurons[index].kind {
                NeuronKind::Inhibitory { gamma } => {
                    self.bus
                        .set_inhibition_factor((amplitude * gamma).clamp(0.0, 1.0));
                }
                NeuronKind::Modulatory { kappa } => {
                    self.bus.set_modulation_factor(amplitude * kappa);
                }
                NeuronKind::Excitatory | NeuronKind::Input { .. } => {
                    activity.fired.push((index, amplitude));
                }
                // Output fires were folded into the accumulator above.
                NeuronKind::Output { .. } => {}
            }
        }
        activity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_layer_construction() {
        let layer = Layer::new_mixed(3, 2, 1);
        assert_eq!(layer.neuron_count(), 6);
        assert!(matches!(layer.kind(), LayerKind::Generic));
        let kinds: Vec<_> = layer.neurons().iter().map(|n| n.kind.clone()).collect();
        assert!(matches!(kinds[0], NeuronKind::Excitatory));
        assert!(matches!(kinds[3], NeuronKind::Inhibitory { .. }));
        assert!(matches!(kinds[5], NeuronKind::Modulatory { .. }));
    }

    #[test]
    fn test_forward_image_validates_shape() {
        let mut layer = Layer::new_input_2d(2, 2, 1.0, 0.01);
        let bad = vec![vec![0.0; 3]; 2];
        assert!(layer.forward_image(&bad).is_err());

        let good = vec![vec![1.0; 2]; 2];
        let activity = layer.forward_image(&good).unwrap();
        // Fresh input neurons imprint below the stimulus and fire.
        assert_eq!(activity.fired.len(), 4);
    }

    #[test]
    fn test_forward_nd_validates_shape_and_length() {
        let mut layer = Layer::new_input_nd(&[2, 3], 1.0, 0.01).unwrap();
        assert_eq!(layer.neuron_count(), 6);

        assert!(layer.forward_nd(&[0.0; 6], &[3, 2]).is_err());
        assert!(layer.forward_nd(&[0.0; 5], &[2, 3]).is_err());
        assert!(layer.forward_nd(&[1.0; 6], &[2, 3]).is_ok());
    }

    #[test]
    fn test_input_nd_rejects_bad_shapes() {
        assert!(Layer::new_input_nd(&[], 1.0, 0.01).is_err());
        assert!(Layer::new_input_nd(&[4, 0], 1.0, 0.01).is_err());
    }

    #[test]
    fn test_inhibitory_fire_writes_bus() {
        let mut layer = Layer::new_mixed(0, 1, 0);
        // Make the inhibitory neuron fire by strengthening its slot.
        let mut fired_bus_write = false;
        for _ in 0..300 {
            layer.forward(0.001);
            if layer.bus().inhibition_factor() > 0.0 {
                fired_bus_write = true;
                break;
            }
        }
        assert!(fired_bus_write);
    }

    #[test]
    fn test_output_layer_end_tick_writes_frame() {
        let mut layer = Layer::new_output_2d(2, 2, 1.0);
        // Drive neuron 3 directly; the imprint fires it and accumulates.
        layer.propagate_from(3, 0.8);
        layer.end_tick();
        let frame = layer.output_frame().unwrap();
        assert!(frame[3] > 0.0);
        assert_eq!(frame[0], 0.0);
    }

    #[test]
    fn test_propagate_from_ignores_out_of_range() {
        let mut layer = Layer::new_mixed(2, 0, 0);
        let activity = layer.propagate_from(9, 1.0);
        assert!(activity.fired.is_empty());
    }

    #[test]
    fn test_try_grow_neuron_appends_same_kind() {
        let mut layer = Layer::new_mixed(1, 1, 0);
        let grown = layer.try_grow_neuron(1).unwrap();
        assert_eq!(grown, 2);
        assert!(matches!(
            layer.neurons()[2].kind,
            NeuronKind::Inhibitory { .. }
        ));
    }

    #[test]
    fn test_try_grow_neuron_respects_limit_and_kind() {
        let mut layer = Layer::new_mixed(1, 0, 0);
        layer.set_neuron_limit(1);
        assert_eq!(layer.try_grow_neuron(0), None);

        let mut input_layer = Layer::new_input_2d(1, 1, 1.0, 0.01);
        assert_eq!(input_layer.try_grow_neuron(0), None);
    }

    #[test]
    fn test_end_tick_decays_bus() {
        let mut layer = Layer::new_mixed(1, 0, 0);
        layer.bus_mut().set_modulation_factor(1.5);
        layer.bus_mut().set_inhibition_factor(0.7);
        layer.end_tick();
        assert_eq!(layer.bus().modulation_factor(), 1.0);
        assert!((layer.bus().inhibition_factor() - 0.63).abs() < 1e-12);
    }
}
