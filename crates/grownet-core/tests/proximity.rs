//! Proximity policy: STEP wiring, budgets, cooldowns, RNG requirements

use grownet_core::{ProximityConfig, ProximityFunction, Region};

fn total_synapses(region: &Region) -> usize {
    region
        .layers()
        .iter()
        .flat_map(|layer| layer.neurons())
        .map(|neuron| neuron.outgoing.len())
        .sum()
}

fn grid_region() -> (Region, usize) {
    let mut region = Region::new("proximity");
    let grid = region.add_input_layer_2d(3, 3, 1.0, 0.01);
    region.bind_input_2d("img", 3, 3, 1.0, 0.01, &[]).unwrap();
    (region, grid)
}

#[test]
fn step_policy_adds_short_range_edges() {
    let (mut region, grid) = grid_region();
    // Grid spacing is 1.2, so radius 1.3 reaches the 4-neighborhood only.
    let cfg = ProximityConfig {
        candidate_layers: vec![grid],
        ..ProximityConfig::step(1.3)
    };
    region.set_proximity_config(cfg).unwrap();

    let before = total_synapses(&region);
    let frame = vec![vec![1.0; 3]; 3];
    region.tick_2d("img", &frame).unwrap();
    let added = total_synapses(&region) - before;

    // A 3x3 grid has 12 adjacent pairs; each accepted pair adds one directed
    // edge and puts both endpoints on cooldown.
    assert!(added > 0);
    assert!(added <= 12);
}

#[test]
fn budget_limits_edges_per_tick() {
    let (mut region, grid) = grid_region();
    let cfg = ProximityConfig {
        candidate_layers: vec![grid],
        max_edges_per_tick: 2,
        cooldown_ticks: 0,
        ..ProximityConfig::step(10.0)
    };
    region.set_proximity_config(cfg).unwrap();

    let before = total_synapses(&region);
    let frame = vec![vec![1.0; 3]; 3];
    region.tick_2d("img", &frame).unwrap();
    assert_eq!(total_synapses(&region) - before, 2);
}

#[test]
fn cooldown_suppresses_immediate_reattempts() {
    let (mut region, grid) = grid_region();
    let cfg = ProximityConfig {
        candidate_layers: vec![grid],
        max_edges_per_tick: 1,
        cooldown_ticks: 1_000,
        ..ProximityConfig::step(1.3)
    };
    region.set_proximity_config(cfg).unwrap();

    let frame = vec![vec![1.0; 3]; 3];
    region.tick_2d("img", &frame).unwrap();
    let after_first = total_synapses(&region);

    region.tick_2d("img", &frame).unwrap();
    // The single budgeted edge put its endpoints on a long cooldown, but
    // other neurons are still free to connect; the budget caps each tick at
    // one new edge.
    let after_second = total_synapses(&region);
    assert!(after_second - after_first <= 1);
}

#[test]
fn development_window_gates_the_pass() {
    let (mut region, grid) = grid_region();
    let cfg = ProximityConfig {
        candidate_layers: vec![grid],
        development_window_start: 100,
        development_window_end: 200,
        ..ProximityConfig::step(1.3)
    };
    region.set_proximity_config(cfg).unwrap();

    let before = total_synapses(&region);
    let frame = vec![vec![1.0; 3]; 3];
    region.tick_2d("img", &frame).unwrap();
    assert_eq!(total_synapses(&region), before);
}

#[test]
fn probabilistic_modes_require_an_explicit_seed() {
    let (mut region, grid) = grid_region();
    let cfg = ProximityConfig {
        candidate_layers: vec![grid],
        function: ProximityFunction::Linear,
        ..ProximityConfig::step(1.3)
    };
    region.set_proximity_config(cfg).unwrap();

    let frame = vec![vec![1.0; 3]; 3];
    assert!(region.tick_2d("img", &frame).is_err());

    region.set_rng_seed(4242);
    assert!(region.tick_2d("img", &frame).is_ok());
}

#[test]
fn cross_layer_edges_record_mesh_rules() {
    let mut region = Region::new("cross");
    // Two stacked 1x1 layers: layer spacing is 4.0, so a radius of 4.5
    // reaches across.
    let lower = region.add_input_layer_2d(1, 1, 1.0, 0.01);
    let upper = region.add_input_layer_2d(1, 1, 1.0, 0.01);
    region.bind_input("x", &[]).unwrap();
    let cfg = ProximityConfig {
        candidate_layers: vec![lower, upper],
        record_mesh_rules_on_cross_layer: true,
        ..ProximityConfig::step(4.5)
    };
    region.set_proximity_config(cfg).unwrap();

    region.tick("x", 1.0).unwrap();
    assert!(region
        .mesh_rules()
        .iter()
        .any(|rule| rule.source_layer != rule.dest_layer && rule.probability == 1.0));
}
