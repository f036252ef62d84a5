//! Region: the top-level orchestrator of layers, ports, tracts, and growth

use std::collections::{HashMap, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bus::RegionBus;
use crate::error::{GrowNetError, Result};
use crate::growth::{GrowthPolicy, LayerGrowthStats};
use crate::layer::{Layer, LayerActivity, LayerKind};
use crate::proximity::{self, ProximityConfig};
use crate::synapse::Synapse;
use crate::topographic::TopographicConfig;
use crate::tract::Tract;
use crate::windowed::{Padding, TractWindowed};

/// Default seed of the region RNG, matching the reference engine.
pub const DEFAULT_RNG_SEED: u64 = 1234;

/// Environment variable that enables spatial metrics when the region flag is
/// unset.
pub const SPATIAL_METRICS_ENV: &str = "GROWNET_ENABLE_SPATIAL_METRICS";

/// Per-tick metrics returned by the tick entry points.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionMetrics {
    /// External deliveries performed this tick.
    pub delivered_events: u64,
    /// Total slots across all neurons after the tick.
    pub total_slots: u64,
    /// Total outgoing synapses across all neurons after the tick.
    pub total_synapses: u64,
    /// Nonzero pixels of the analyzed frame (spatial metrics only).
    pub active_pixels: u64,
    /// Value-weighted centroid row.
    pub centroid_row: f64,
    /// Value-weighted centroid column.
    pub centroid_col: f64,
    /// Bounding-box minimum row; `(0, -1)` row bounds mean "empty".
    pub bbox_row_min: i64,
    /// Bounding-box maximum row.
    pub bbox_row_max: i64,
    /// Bounding-box minimum column.
    pub bbox_col_min: i64,
    /// Bounding-box maximum column.
    pub bbox_col_max: i64,
}

impl Default for RegionMetrics {
    fn default() -> Self {
        Self {
            delivered_events: 0,
            total_slots: 0,
            total_synapses: 0,
            active_pixels: 0,
            centroid_row: 0.0,
            centroid_col: 0.0,
            bbox_row_min: 0,
            bbox_row_max: -1,
            bbox_col_min: 0,
            bbox_col_max: -1,
        }
    }
}

impl RegionMetrics {
    /// Count external deliveries.
    pub fn inc_delivered_events(&mut self, by: u64) {
        self.delivered_events += by;
    }

    /// Accumulate slot totals.
    pub fn add_slots(&mut self, count: u64) {
        self.total_slots += count;
    }

    /// Accumulate synapse totals.
    pub fn add_synapses(&mut self, count: u64) {
        self.total_synapses += count;
    }
}

/// Summary of a maintenance prune pass.
///
/// Synapses in this engine carry no per-edge staleness state, so pruning is
/// a documented no-op that reports zero work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PruneSummary {
    /// Synapses removed.
    pub pruned_synapses: u64,
    /// Tract edges removed.
    pub pruned_edges: u64,
}

/// A recorded layer-to-layer wiring rule, replayed when neurons grow.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshRule {
    /// Source layer index.
    pub source_layer: usize,
    /// Destination layer index.
    pub dest_layer: usize,
    /// Per-pair connection probability.
    pub probability: f64,
    /// Whether connections made under this rule are feedback edges.
    pub feedback: bool,
}

/// A region of layers connected by tracts and driven by named ports.
///
/// Ports are modeled as edge layers: binding a port creates (or reuses) a
/// dedicated entry layer, and a tick drives that edge exactly once. All
/// structural state (layers, tracts, mesh rules, sidecar bookkeeping) lives
/// here; nested entities hold indices, never owning references.
#[derive(Debug)]
pub struct Region {
    name: String,
    layers: Vec<Layer>,
    tracts: Vec<Tract>,
    windowed_tracts: Vec<TractWindowed>,
    mesh_rules: Vec<MeshRule>,
    input_ports: HashMap<String, Vec<usize>>,
    output_ports: HashMap<String, Vec<usize>>,
    input_edges: HashMap<String, usize>,
    bus: RegionBus,
    rng: StdRng,
    rng_seeded: bool,
    growth_policy: Option<GrowthPolicy>,
    proximity_config: Option<ProximityConfig>,
    pub(crate) proximity_last_attempt: HashMap<(usize, usize), u64>,
    last_region_growth_step: Option<u64>,
    last_proximity_tick_step: Option<u64>,
    enable_spatial_metrics: bool,
}

impl Region {
    /// Create an empty region.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layers: Vec::new(),
            tracts: Vec::new(),
            windowed_tracts: Vec::new(),
            mesh_rules: Vec::new(),
            input_ports: HashMap::new(),
            output_ports: HashMap::new(),
            input_edges: HashMap::new(),
            bus: RegionBus::new(),
            rng: StdRng::seed_from_u64(DEFAULT_RNG_SEED),
            rng_seeded: false,
            growth_policy: None,
            proximity_config: None,
            proximity_last_attempt: HashMap::new(),
            last_region_growth_step: None,
            last_proximity_tick_step: None,
            enable_spatial_metrics: false,
        }
    }

    /// Region name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Layers in index order.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Number of layers.
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Layer at `index`.
    pub fn layer(&self, index: usize) -> Result<&Layer> {
        self.layers
            .get(index)
            .ok_or_else(|| GrowNetError::index_out_of_range("layers", index, self.layers.len()))
    }

    /// Mutable layer at `index`.
    pub fn layer_mut(&mut self, index: usize) -> Result<&mut Layer> {
        let len = self.layers.len();
        self.layers
            .get_mut(index)
            .ok_or_else(|| GrowNetError::index_out_of_range("layers", index, len))
    }

    /// Region bus.
    pub fn bus(&self) -> &RegionBus {
        &self.bus
    }

    /// Tracts in creation order.
    pub fn tracts(&self) -> &[Tract] {
        &self.tracts
    }

    /// Windowed tract geometry in creation order.
    pub fn windowed_tracts(&self) -> &[TractWindowed] {
        &self.windowed_tracts
    }

    /// Recorded mesh rules in creation order.
    pub fn mesh_rules(&self) -> &[MeshRule] {
        &self.mesh_rules
    }

    /// Step of the most recent layer growth, if any.
    pub fn last_region_growth_step(&self) -> Option<u64> {
        self.last_region_growth_step
    }

    /// Seed the region RNG. Probabilistic proximity requires this.
    pub fn set_rng_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.rng_seeded = true;
    }

    /// Whether the RNG was explicitly seeded.
    pub fn has_seeded_rng(&self) -> bool {
        self.rng_seeded
    }

    pub(crate) fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Enable or disable spatial metrics for 2D ticks.
    pub fn set_spatial_metrics_enabled(&mut self, enabled: bool) {
        self.enable_spatial_metrics = enabled;
    }

    fn spatial_metrics_enabled(&self) -> bool {
        self.enable_spatial_metrics
            || std::env::var(SPATIAL_METRICS_ENV).map(|v| v == "1").unwrap_or(false)
    }

    /// Install a growth policy.
    pub fn set_growth_policy(&mut self, policy: GrowthPolicy) -> Result<()> {
        policy.validate()?;
        self.growth_policy = Some(policy);
        Ok(())
    }

    /// Installed growth policy, if any.
    pub fn growth_policy(&self) -> Option<&GrowthPolicy> {
        self.growth_policy.as_ref()
    }

    /// Install a proximity configuration.
    pub fn set_proximity_config(&mut self, cfg: ProximityConfig) -> Result<()> {
        cfg.validate()?;
        self.proximity_config = Some(cfg);
        Ok(())
    }

    /// Installed proximity configuration, if any.
    pub fn proximity_config(&self) -> Option<&ProximityConfig> {
        self.proximity_config.as_ref()
    }

    // ------------------------------------------------------------------
    // Layer creation
    // ------------------------------------------------------------------

    /// Add a mixed E/I/M layer; returns its index.
    pub fn add_layer(
        &mut self,
        excitatory_count: usize,
        inhibitory_count: usize,
        modulatory_count: usize,
    ) -> usize {
        self.layers.push(Layer::new_mixed(
            excitatory_count,
            inhibitory_count,
            modulatory_count,
        ));
        self.layers.len() - 1
    }

    /// Add a 2D input layer; returns its index.
    pub fn add_input_layer_2d(
        &mut self,
        height: usize,
        width: usize,
        gain: f64,
        epsilon_fire: f64,
    ) -> usize {
        self.layers
            .push(Layer::new_input_2d(height, width, gain, epsilon_fire));
        self.layers.len() - 1
    }

    /// Convenience 2D input layer with unit gain and the stock firing margin.
    pub fn add_input_2d_layer(&mut self, height: usize, width: usize) -> usize {
        self.add_input_layer_2d(height, width, 1.0, 0.01)
    }

    /// Add an N-D input layer; returns its index.
    pub fn add_input_layer_nd(
        &mut self,
        shape: &[usize],
        gain: f64,
        epsilon_fire: f64,
    ) -> Result<usize> {
        let layer = Layer::new_input_nd(shape, gain, epsilon_fire)?;
        self.layers.push(layer);
        Ok(self.layers.len() - 1)
    }

    /// Add a 2D output layer; returns its index.
    pub fn add_output_layer_2d(&mut self, height: usize, width: usize, smoothing: f64) -> usize {
        self.layers
            .push(Layer::new_output_2d(height, width, smoothing));
        self.layers.len() - 1
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    /// Connect two layers with a tract and record the mesh rule. Returns the
    /// tract index.
    pub fn connect_layers(
        &mut self,
        source_index: usize,
        dest_index: usize,
        probability: f64,
        feedback: bool,
    ) -> Result<usize> {
        self.check_layer(source_index)?;
        self.check_layer(dest_index)?;
        if !(0.0..=1.0).contains(&probability) {
            return Err(GrowNetError::invalid_parameter(
                "probability",
                probability.to_string(),
                "in [0, 1]",
            ));
        }
        let source_count = self.layers[source_index].neuron_count();
        let tract = Tract::new(
            source_index,
            dest_index,
            feedback,
            probability,
            source_count,
            &mut self.rng,
        );
        self.tracts.push(tract);
        self.mesh_rules.push(MeshRule {
            source_layer: source_index,
            dest_layer: dest_index,
            probability,
            feedback,
        });
        Ok(self.tracts.len() - 1)
    }

    /// Deterministic windowed wiring between two 2D-shaped layers.
    ///
    /// Returns the number of unique source neurons participating in at least
    /// one window, not the raw edge count.
    #[allow(clippy::too_many_arguments)]
    pub fn connect_layers_windowed(
        &mut self,
        source_index: usize,
        dest_index: usize,
        kernel_h: usize,
        kernel_w: usize,
        stride_h: usize,
        stride_w: usize,
        padding: &str,
        _feedback: bool,
    ) -> Result<usize> {
        self.check_layer(source_index)?;
        self.check_layer(dest_index)?;
        if kernel_h == 0 || kernel_w == 0 {
            return Err(GrowNetError::invalid_parameter(
                "kernel",
                format!("{kernel_h}x{kernel_w}"),
                "> 0 in both dimensions",
            ));
        }
        if stride_h == 0 || stride_w == 0 {
            return Err(GrowNetError::invalid_parameter(
                "stride",
                format!("{stride_h}x{stride_w}"),
                "> 0 in both dimensions",
            ));
        }
        let padding = Padding::parse(padding)?;
        let (source_height, source_width) =
            self.layers[source_index].grid_shape().ok_or_else(|| {
                GrowNetError::invalid_config("windowed wiring requires a 2D-shaped source layer")
            })?;
        let dest_is_output_2d = self.layers[dest_index].is_output_2d();
        let (dest_height, dest_width) = self.layers[dest_index].grid_shape().unwrap_or((0, 0));

        let mut windowed = TractWindowed::new(
            source_index,
            dest_index,
            kernel_h,
            kernel_w,
            stride_h,
            stride_w,
            padding,
            dest_is_output_2d,
            dest_height,
            dest_width,
        );
        windowed.build_from_source_grid(source_height, source_width);

        if dest_is_output_2d {
            for &(source, center) in windowed.source_to_center_edges() {
                self.connect_neurons(source_index, source, dest_index, center, false)?;
            }
        } else {
            let dest_count = self.layers[dest_index].neuron_count();
            for &source in windowed.allowed_source_indices() {
                for target in 0..dest_count {
                    self.connect_neurons(source_index, source, dest_index, target, false)?;
                }
            }
        }

        let unique_sources = windowed.unique_source_count();
        self.windowed_tracts.push(windowed);
        Ok(unique_sources)
    }

    /// Topographic wiring: windowed deterministic wiring between an Input2D
    /// source and an Output2D destination, with a Gaussian or DoG weight
    /// profile described by `config`.
    ///
    /// Returns the number of unique participating sources, like
    /// [`Region::connect_layers_windowed`]. The deterministic weight table
    /// for the recorded geometry is available through
    /// [`topographic_weights`](crate::topographic::topographic_weights).
    pub fn connect_layers_topographic(
        &mut self,
        source_index: usize,
        dest_index: usize,
        config: &TopographicConfig,
    ) -> Result<usize> {
        config.validate()?;
        self.check_layer(source_index)?;
        self.check_layer(dest_index)?;
        if !matches!(self.layers[source_index].kind(), LayerKind::Input2D { .. }) {
            return Err(GrowNetError::invalid_config(
                "topographic wiring requires an Input2D source layer",
            ));
        }
        if !self.layers[dest_index].is_output_2d() {
            return Err(GrowNetError::invalid_config(
                "topographic wiring requires an Output2D destination layer",
            ));
        }
        self.connect_layers_windowed(
            source_index,
            dest_index,
            config.kernel_h,
            config.kernel_w,
            config.stride_h,
            config.stride_w,
            config.padding.as_str(),
            config.feedback,
        )
    }

    /// Add a single directed synapse between two neurons.
    pub fn connect_neurons(
        &mut self,
        source_layer: usize,
        source_neuron: usize,
        dest_layer: usize,
        dest_neuron: usize,
        feedback: bool,
    ) -> Result<()> {
        self.check_neuron(source_layer, source_neuron)?;
        self.check_neuron(dest_layer, dest_neuron)?;
        self.layers[source_layer].neurons_mut()[source_neuron]
            .outgoing
            .push(Synapse::new(dest_layer, dest_neuron, feedback));
        Ok(())
    }

    /// Whether a directed synapse already exists.
    pub fn has_edge(
        &self,
        source_layer: usize,
        source_neuron: usize,
        dest_layer: usize,
        dest_neuron: usize,
    ) -> bool {
        self.layers
            .get(source_layer)
            .and_then(|layer| layer.neurons().get(source_neuron))
            .map(|neuron| {
                neuron
                    .outgoing
                    .iter()
                    .any(|s| s.target_layer == dest_layer && s.target_neuron == dest_neuron)
            })
            .unwrap_or(false)
    }

    pub(crate) fn record_mesh_rule(
        &mut self,
        source_layer: usize,
        dest_layer: usize,
        probability: f64,
        feedback: bool,
    ) {
        self.mesh_rules.push(MeshRule {
            source_layer,
            dest_layer,
            probability,
            feedback,
        });
    }

    // ------------------------------------------------------------------
    // Port binding
    // ------------------------------------------------------------------

    /// Bind a scalar input port, creating its single-neuron edge layer on
    /// first use, and wire the edge to each listed layer deterministically.
    pub fn bind_input(&mut self, port: &str, layer_indices: &[usize]) -> Result<()> {
        for &index in layer_indices {
            self.check_layer(index)?;
        }
        let edge = match self.input_edges.get(port) {
            Some(&edge) => edge,
            None => {
                self.layers.push(Layer::new_input_scalar(1.0, 0.01));
                let edge = self.layers.len() - 1;
                self.input_edges.insert(port.to_string(), edge);
                edge
            }
        };
        for &index in layer_indices {
            self.connect_layers(edge, index, 1.0, false)?;
        }
        self.input_ports
            .insert(port.to_string(), layer_indices.to_vec());
        Ok(())
    }

    /// Bind a 2D input port backed by an Input2D edge layer, reusing the
    /// existing edge when its shape matches.
    pub fn bind_input_2d(
        &mut self,
        port: &str,
        height: usize,
        width: usize,
        gain: f64,
        epsilon_fire: f64,
        attach_layers: &[usize],
    ) -> Result<()> {
        for &index in attach_layers {
            self.check_layer(index)?;
        }
        let reusable = self.input_edges.get(port).copied().filter(|&edge| {
            self.layers
                .get(edge)
                .and_then(Layer::grid_shape)
                .is_some_and(|shape| shape == (height, width))
        });
        let edge = match reusable {
            Some(edge) => edge,
            None => {
                let edge = self.add_input_layer_2d(height, width, gain, epsilon_fire);
                self.input_edges.insert(port.to_string(), edge);
                edge
            }
        };
        for &index in attach_layers {
            self.connect_layers(edge, index, 1.0, false)?;
        }
        self.input_ports
            .insert(port.to_string(), attach_layers.to_vec());
        Ok(())
    }

    /// Shape-slice convenience for [`Region::bind_input_2d`].
    pub fn bind_input_2d_shape(
        &mut self,
        port: &str,
        shape: &[usize],
        gain: f64,
        epsilon_fire: f64,
        attach_layers: &[usize],
    ) -> Result<()> {
        if shape.len() != 2 {
            return Err(GrowNetError::shape_mismatch(
                "[height, width]",
                format!("{shape:?}"),
            ));
        }
        self.bind_input_2d(port, shape[0], shape[1], gain, epsilon_fire, attach_layers)
    }

    /// Bind an N-D input port backed by an InputND edge layer, reusing the
    /// existing edge when its shape matches.
    pub fn bind_input_nd(
        &mut self,
        port: &str,
        shape: &[usize],
        gain: f64,
        epsilon_fire: f64,
        attach_layers: &[usize],
    ) -> Result<()> {
        for &index in attach_layers {
            self.check_layer(index)?;
        }
        let reusable = self.input_edges.get(port).copied().filter(|&edge| {
            matches!(
                self.layers.get(edge).map(Layer::kind),
                Some(LayerKind::InputNd { shape: existing }) if existing.as_slice() == shape
            )
        });
        let edge = match reusable {
            Some(edge) => edge,
            None => {
                let edge = self.add_input_layer_nd(shape, gain, epsilon_fire)?;
                self.input_edges.insert(port.to_string(), edge);
                edge
            }
        };
        for &index in attach_layers {
            self.connect_layers(edge, index, 1.0, false)?;
        }
        self.input_ports
            .insert(port.to_string(), attach_layers.to_vec());
        Ok(())
    }

    /// Bind an output port to the listed layers.
    pub fn bind_output(&mut self, port: &str, layer_indices: &[usize]) -> Result<()> {
        for &index in layer_indices {
            self.check_layer(index)?;
        }
        self.output_ports
            .insert(port.to_string(), layer_indices.to_vec());
        Ok(())
    }

    /// Edge layer index bound to an input port.
    pub fn input_edge(&self, port: &str) -> Result<usize> {
        self.input_edges
            .get(port)
            .copied()
            .ok_or_else(|| GrowNetError::unknown_port(port))
    }

    /// Layers attached to an input port.
    pub fn input_port_targets(&self, port: &str) -> Result<&[usize]> {
        self.input_ports
            .get(port)
            .map(Vec::as_slice)
            .ok_or_else(|| GrowNetError::unknown_port(port))
    }

    /// Layers bound to an output port.
    pub fn output_port_targets(&self, port: &str) -> Result<&[usize]> {
        self.output_ports
            .get(port)
            .map(Vec::as_slice)
            .ok_or_else(|| GrowNetError::unknown_port(port))
    }

    // ------------------------------------------------------------------
    // Pulses
    // ------------------------------------------------------------------

    /// Post an inhibition factor to the region bus and every layer bus for
    /// the next tick.
    pub fn pulse_inhibition(&mut self, factor: f64) {
        self.bus.set_inhibition_factor(factor);
        for layer in &mut self.layers {
            layer.bus_mut().set_inhibition_factor(factor);
        }
    }

    /// Post a modulation factor to the region bus and every layer bus for
    /// the next tick.
    pub fn pulse_modulation(&mut self, factor: f64) {
        self.bus.set_modulation_factor(factor);
        for layer in &mut self.layers {
            layer.bus_mut().set_modulation_factor(factor);
        }
    }

    // ------------------------------------------------------------------
    // Ticks
    // ------------------------------------------------------------------

    /// Drive a scalar port for one tick.
    pub fn tick(&mut self, port: &str, value: f64) -> Result<RegionMetrics> {
        let edge = self.input_edge(port)?;
        let activity = self.layers[edge].forward(value);
        self.finish_tick(edge, activity, None)
    }

    /// Drive a 2D port with a frame for one tick.
    pub fn tick_2d(&mut self, port: &str, frame: &[Vec<f64>]) -> Result<RegionMetrics> {
        let edge = self.input_edge(port)?;
        let activity = self.layers[edge].forward_image(frame)?;
        self.finish_tick(edge, activity, Some(frame))
    }

    /// Alias of [`Region::tick_2d`].
    pub fn tick_image(&mut self, port: &str, frame: &[Vec<f64>]) -> Result<RegionMetrics> {
        self.tick_2d(port, frame)
    }

    /// Drive an N-D port with a row-major flat tensor for one tick.
    pub fn tick_nd(&mut self, port: &str, flat: &[f64], shape: &[usize]) -> Result<RegionMetrics> {
        let edge = self.input_edge(port)?;
        let activity = self.layers[edge].forward_nd(flat, shape)?;
        self.finish_tick(edge, activity, None)
    }

    /// Shared tick tail: fan-out, growth, proximity, housekeeping, metrics.
    fn finish_tick(
        &mut self,
        edge: usize,
        activity: LayerActivity,
        frame: Option<&[Vec<f64>]>,
    ) -> Result<RegionMetrics> {
        let mut metrics = RegionMetrics::default();
        metrics.inc_delivered_events(1);

        let mut growth_requests = Vec::new();
        self.propagate(edge, activity, &mut growth_requests);
        self.process_growth_requests(growth_requests);

        self.maybe_apply_proximity()?;

        for layer in &mut self.layers {
            layer.end_tick();
        }
        self.bus.decay();

        self.aggregate_structural_metrics(&mut metrics);
        if let Some(frame) = frame {
            if self.spatial_metrics_enabled() {
                let spatial = self.compute_spatial_metrics(frame, true);
                metrics.active_pixels = spatial.active_pixels;
                metrics.centroid_row = spatial.centroid_row;
                metrics.centroid_col = spatial.centroid_col;
                metrics.bbox_row_min = spatial.bbox_row_min;
                metrics.bbox_row_max = spatial.bbox_row_max;
                metrics.bbox_col_min = spatial.bbox_col_min;
                metrics.bbox_col_max = spatial.bbox_col_max;
            }
        }

        self.maybe_grow_region();
        Ok(metrics)
    }

    /// Breadth-first fan-out of fire events through tracts and synapses.
    fn propagate(
        &mut self,
        source_layer: usize,
        activity: LayerActivity,
        growth_requests: &mut Vec<(usize, usize)>,
    ) {
        let mut queue: VecDeque<(usize, usize, f64)> = VecDeque::new();
        self.enqueue_activity(source_layer, activity, &mut queue, growth_requests);

        while let Some((layer_index, neuron_index, amplitude)) = queue.pop_front() {
            // Inhibition posted on the source layer damps what it sends out.
            let damping =
                (1.0 - self.layers[layer_index].bus().inhibition_factor()).clamp(0.0, 1.0);
            let delivered = amplitude * damping;

            let tract_targets: Vec<usize> = self
                .tracts
                .iter()
                .filter(|tract| {
                    tract.source_layer == layer_index && tract.subscribes(neuron_index)
                })
                .map(|tract| tract.dest_layer)
                .collect();
            for dest_layer in tract_targets {
                let next = self.layers[dest_layer].propagate_from(neuron_index, delivered);
                self.enqueue_activity(dest_layer, next, &mut queue, growth_requests);
            }

            let synapse_targets: Vec<(usize, usize)> = self.layers[layer_index].neurons()
                [neuron_index]
                .outgoing
                .iter()
                .map(|synapse| (synapse.target_layer, synapse.target_neuron))
                .collect();
            for (dest_layer, dest_neuron) in synapse_targets {
                let next = self.layers[dest_layer].propagate_from(dest_neuron, delivered);
                self.enqueue_activity(dest_layer, next, &mut queue, growth_requests);
            }
        }
    }

    fn enqueue_activity(
        &self,
        layer_index: usize,
        activity: LayerActivity,
        queue: &mut VecDeque<(usize, usize, f64)>,
        growth_requests: &mut Vec<(usize, usize)>,
    ) {
        for (neuron_index, amplitude) in activity.fired {
            queue.push_back((layer_index, neuron_index, amplitude));
        }
        for neuron_index in activity.growth {
            growth_requests.push((layer_index, neuron_index));
        }
    }

    /// Honor queued per-neuron growth requests, at most once per seed per
    /// tick, and autowire every neuron that was actually created.
    fn process_growth_requests(&mut self, requests: Vec<(usize, usize)>) {
        let current_step = self.bus.current_step();
        for (layer_index, seed_index) in requests {
            if self.layers[layer_index].neurons()[seed_index].last_growth_tick
                == Some(current_step)
            {
                continue;
            }
            match self.layers[layer_index].try_grow_neuron(seed_index) {
                Some(new_index) => {
                    let seed = &mut self.layers[layer_index].neurons_mut()[seed_index];
                    seed.last_growth_tick = Some(current_step);
                    seed.fallback_streak = 0;
                    log::info!(
                        "layer {} grew neuron {} (seed {}) at step {}",
                        layer_index,
                        new_index,
                        seed_index,
                        current_step
                    );
                    self.autowire_new_neuron(layer_index, new_index);
                }
                None => {
                    // Best-effort: a refused attempt resets the streak and
                    // must never abort the tick.
                    let seed = &mut self.layers[layer_index].neurons_mut()[seed_index];
                    seed.fallback_streak = 0;
                    log::debug!(
                        "layer {} refused neuron growth for seed {}",
                        layer_index,
                        seed_index
                    );
                }
            }
        }
    }

    /// Re-apply recorded wiring to a newly created neuron.
    pub fn autowire_new_neuron(&mut self, layer_index: usize, new_index: usize) {
        let rules = self.mesh_rules.clone();
        for rule in &rules {
            if rule.source_layer == layer_index {
                let dest_count = self.layers[rule.dest_layer].neuron_count();
                for target in 0..dest_count {
                    if rule.dest_layer == layer_index && target == new_index {
                        continue;
                    }
                    if rule.probability >= 1.0 || self.rng.gen::<f64>() < rule.probability {
                        let _ = self.connect_neurons(
                            layer_index,
                            new_index,
                            rule.dest_layer,
                            target,
                            rule.feedback,
                        );
                    }
                }
            }
            if rule.dest_layer == layer_index {
                let source_count = self.layers[rule.source_layer].neuron_count();
                for source in 0..source_count {
                    if rule.source_layer == layer_index && source == new_index {
                        continue;
                    }
                    if rule.probability >= 1.0 || self.rng.gen::<f64>() < rule.probability {
                        let _ = self.connect_neurons(
                            rule.source_layer,
                            source,
                            layer_index,
                            new_index,
                            rule.feedback,
                        );
                    }
                }
            }
        }

        for tract in &mut self.tracts {
            if tract.source_layer == layer_index {
                tract.attach_source_neuron(new_index);
            }
        }

        let windowed: Vec<(usize, bool, Vec<usize>)> = self
            .windowed_tracts
            .iter()
            .filter(|tract| tract.source_layer == layer_index)
            .map(|tract| {
                let centers: Vec<usize> = if tract.dest_is_output_2d {
                    tract
                        .source_to_center_edges()
                        .iter()
                        .filter(|&&(source, _)| source == new_index)
                        .map(|&(_, center)| center)
                        .collect()
                } else if tract.window_covers_source_index(new_index) {
                    (0..self.layers[tract.dest_layer].neuron_count()).collect()
                } else {
                    Vec::new()
                };
                (tract.dest_layer, tract.dest_is_output_2d, centers)
            })
            .collect();
        for (dest_layer, _, targets) in windowed {
            for target in targets {
                let _ = self.connect_neurons(layer_index, new_index, dest_layer, target, false);
            }
        }
    }

    fn maybe_apply_proximity(&mut self) -> Result<()> {
        let Some(cfg) = self.proximity_config.clone() else {
            return Ok(());
        };
        if !cfg.enabled {
            return Ok(());
        }
        let current_step = self.bus.current_step();
        if self.last_proximity_tick_step == Some(current_step) {
            return Ok(());
        }
        proximity::apply(self, &cfg)?;
        self.last_proximity_tick_step = Some(current_step);
        Ok(())
    }

    /// Evaluate the region growth policy; adds at most one layer.
    fn maybe_grow_region(&mut self) {
        let Some(policy) = self.growth_policy.clone() else {
            return;
        };
        if !policy.enable_region_growth || self.layers.is_empty() {
            return;
        }
        let current_step = self.bus.current_step();
        if let Some(last) = self.last_region_growth_step {
            if current_step.saturating_sub(last) < policy.layer_cooldown_ticks {
                return;
            }
        }

        let stats: Vec<LayerGrowthStats> = self
            .layers
            .iter()
            .map(|layer| {
                let mut layer_stats = LayerGrowthStats {
                    neurons: layer.neuron_count(),
                    ..LayerGrowthStats::default()
                };
                for neuron in layer.neurons() {
                    layer_stats.total_slots += neuron.slots.len();
                    let at_capacity = neuron.at_slot_capacity();
                    if at_capacity {
                        layer_stats.at_capacity += 1;
                    }
                    if neuron.last_slot_used_fallback {
                        layer_stats.used_fallback += 1;
                        if at_capacity {
                            layer_stats.at_capacity_with_fallback += 1;
                        }
                    }
                }
                layer_stats
            })
            .collect();

        let total_neurons: usize = stats.iter().map(|s| s.neurons).sum();
        if total_neurons == 0 {
            return;
        }
        let total_slots: usize = stats.iter().map(|s| s.total_slots).sum();
        let saturated_with_fallback: usize =
            stats.iter().map(|s| s.at_capacity_with_fallback).sum();

        let average_slots = total_slots as f64 / total_neurons as f64;
        let percent_at_cap_fallback =
            100.0 * saturated_with_fallback as f64 / total_neurons as f64;

        let average_trigger = average_slots >= policy.average_slots_threshold;
        let fallback_trigger = policy.percent_at_cap_fallback_threshold > 0.0
            && percent_at_cap_fallback >= policy.percent_at_cap_fallback_threshold;
        if !(average_trigger || fallback_trigger) {
            return;
        }
        if policy.maximum_layers >= 0 && self.layers.len() >= policy.maximum_layers as usize {
            return;
        }

        let best_layer = stats
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| {
                a.score(policy.average_slots_threshold)
                    .total_cmp(&b.score(policy.average_slots_threshold))
            })
            .map(|(index, _)| index)
            .unwrap_or(0);

        if let Err(error) =
            self.request_layer_growth(best_layer, policy.connection_probability)
        {
            log::warn!("layer growth request failed: {error}");
            return;
        }
        self.last_region_growth_step = Some(current_step);
    }

    /// Append a new layer wired from the saturated one. Returns the new
    /// layer's index.
    pub fn request_layer_growth(
        &mut self,
        saturated_layer: usize,
        connection_probability: f64,
    ) -> Result<usize> {
        self.check_layer(saturated_layer)?;
        let new_layer = self.add_layer(4, 0, 0);
        self.connect_layers(saturated_layer, new_layer, connection_probability, false)?;
        log::info!(
            "region '{}' grew layer {} from saturated layer {} at step {}",
            self.name,
            new_layer,
            saturated_layer,
            self.bus.current_step()
        );
        Ok(new_layer)
    }

    /// Maintenance pass over synapses. Synapses carry no staleness state in
    /// this engine, so this reports zero work.
    pub fn prune(
        &mut self,
        _synapse_stale_window: u64,
        _synapse_min_strength: f64,
    ) -> PruneSummary {
        PruneSummary::default()
    }

    /// Maintenance pass over synapses and tract edges; see [`Region::prune`].
    pub fn prune_with_tracts(
        &mut self,
        synapse_stale_window: u64,
        synapse_min_strength: f64,
        _tract_stale_window: u64,
        _tract_min_strength: f64,
    ) -> PruneSummary {
        self.prune(synapse_stale_window, synapse_min_strength)
    }

    fn aggregate_structural_metrics(&self, metrics: &mut RegionMetrics) {
        for layer in &self.layers {
            for neuron in layer.neurons() {
                metrics.add_slots(neuron.slots.len() as u64);
                metrics.add_synapses(neuron.outgoing.len() as u64);
            }
        }
    }

    /// Centroid, active-pixel count, and bounding box of a frame.
    ///
    /// With `prefer_output`, the frame of the furthest-downstream Output2D
    /// layer is analyzed instead, unless it is all zeros.
    pub fn compute_spatial_metrics(
        &self,
        image_2d: &[Vec<f64>],
        prefer_output: bool,
    ) -> RegionMetrics {
        let output_rows = if prefer_output {
            self.furthest_output_frame_rows()
        } else {
            None
        };
        let frame: &[Vec<f64>] = output_rows.as_deref().unwrap_or(image_2d);

        let mut metrics = RegionMetrics::default();
        let height = frame.len();
        if height == 0 {
            return metrics;
        }

        #[derive(Debug, Clone, Copy)]
        struct RowAggregate {
            weight: f64,
            weighted_row: f64,
            weighted_col: f64,
            active: u64,
            row_min: i64,
            row_max: i64,
            col_min: i64,
            col_max: i64,
        }

        let per_row = |row: usize| -> RowAggregate {
            let mut aggregate = RowAggregate {
                weight: 0.0,
                weighted_row: 0.0,
                weighted_col: 0.0,
                active: 0,
                row_min: i64::MAX,
                row_max: i64::MIN,
                col_min: i64::MAX,
                col_max: i64::MIN,
            };
            for (col, &value) in frame[row].iter().enumerate() {
                if value > 0.0 {
                    aggregate.weight += value;
                    aggregate.weighted_row += value * row as f64;
                    aggregate.weighted_col += value * col as f64;
                    aggregate.active += 1;
                    aggregate.row_min = aggregate.row_min.min(row as i64);
                    aggregate.row_max = aggregate.row_max.max(row as i64);
                    aggregate.col_min = aggregate.col_min.min(col as i64);
                    aggregate.col_max = aggregate.col_max.max(col as i64);
                }
            }
            aggregate
        };

        let combined = grownet_pal::parallel_map(
            &(0..height),
            per_row,
            |rows: &[RowAggregate]| {
                rows.iter().fold(
                    RowAggregate {
                        weight: 0.0,
                        weighted_row: 0.0,
                        weighted_col: 0.0,
                        active: 0,
                        row_min: i64::MAX,
                        row_max: i64::MIN,
                        col_min: i64::MAX,
                        col_max: i64::MIN,
                    },
                    |mut acc, row| {
                        acc.weight += row.weight;
                        acc.weighted_row += row.weighted_row;
                        acc.weighted_col += row.weighted_col;
                        acc.active += row.active;
                        acc.row_min = acc.row_min.min(row.row_min);
                        acc.row_max = acc.row_max.max(row.row_max);
                        acc.col_min = acc.col_min.min(row.col_min);
                        acc.col_max = acc.col_max.max(row.col_max);
                        acc
                    },
                )
            },
            None,
        );

        if combined.active > 0 {
            metrics.active_pixels = combined.active;
            metrics.centroid_row = combined.weighted_row / combined.weight;
            metrics.centroid_col = combined.weighted_col / combined.weight;
            metrics.bbox_row_min = combined.row_min;
            metrics.bbox_row_max = combined.row_max;
            metrics.bbox_col_min = combined.col_min;
            metrics.bbox_col_max = combined.col_max;
        }
        metrics
    }

    /// Frame of the furthest-downstream Output2D layer, as rows, when it has
    /// any nonzero pixel.
    fn furthest_output_frame_rows(&self) -> Option<Vec<Vec<f64>>> {
        let (layer, (height, width)) = self
            .layers
            .iter()
            .enumerate()
            .rev()
            .find(|(_, layer)| layer.is_output_2d())
            .map(|(_, layer)| (layer, layer.grid_shape().unwrap_or((0, 0))))?;
        let frame = layer.output_frame()?;
        if frame.iter().all(|&value| value == 0.0) {
            return None;
        }
        Some(
            (0..height)
                .map(|row| frame[row * width..(row + 1) * width].to_vec())
                .collect(),
        )
    }

    fn check_layer(&self, index: usize) -> Result<()> {
        if index >= self.layers.len() {
            return Err(GrowNetError::index_out_of_range(
                "layers",
                index,
                self.layers.len(),
            ));
        }
        Ok(())
    }

    fn check_neuron(&self, layer_index: usize, neuron_index: usize) -> Result<()> {
        self.check_layer(layer_index)?;
        let count = self.layers[layer_index].neuron_count();
        if neuron_index >= count {
            return Err(GrowNetError::index_out_of_range(
                "neurons",
                neuron_index,
                count,
            ));
        }
        Ok(())
    }
}
