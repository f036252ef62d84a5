//! Region growth: OR trigger, cooldowns, and autowiring

use grownet_core::{GrowthPolicy, NeuronKind, Region, SlotConfig};

fn uniform_frame(height: usize, width: usize, value: f64) -> Vec<Vec<f64>> {
    vec![vec![value; width]; height]
}

fn saturating_region() -> Region {
    let mut region = Region::new("or_trigger");
    let hidden = region.add_layer(4, 0, 0);
    region
        .bind_input_2d("img", 4, 4, 1.0, 0.01, &[hidden])
        .unwrap();

    // Capacity 1 ensures that after the anchor tick any new desired bin
    // forces a fallback on every edge pixel.
    let edge = region.input_edge("img").unwrap();
    let capped = SlotConfig::default().with_slot_limit(1);
    region.layer_mut(edge).unwrap().set_slot_config(capped);
    region
}

#[test]
fn percent_at_cap_fallback_triggers_exactly_one_layer() {
    let mut region = saturating_region();
    region
        .set_growth_policy(
            GrowthPolicy::default()
                .with_average_slots_threshold(f64::INFINITY)
                .with_percent_at_cap_fallback_threshold(75.0)
                .with_layer_cooldown_ticks(0)
                .with_maximum_layers(32),
        )
        .unwrap();

    let layers_before = region.layer_count();

    // Tick 0 sets anchors; tick 1 forces fallback across the edge layer.
    region.tick_2d("img", &uniform_frame(4, 4, 1.0)).unwrap();
    assert_eq!(region.layer_count(), layers_before);
    region.tick_2d("img", &uniform_frame(4, 4, 0.2)).unwrap();

    assert_eq!(region.layer_count(), layers_before + 1);
    assert_eq!(
        region.last_region_growth_step(),
        Some(region.bus().current_step())
    );
}

#[test]
fn growth_adds_at_most_one_layer_per_tick() {
    let mut region = saturating_region();
    region
        .set_growth_policy(
            GrowthPolicy::default()
                .with_average_slots_threshold(f64::INFINITY)
                .with_percent_at_cap_fallback_threshold(10.0)
                .with_layer_cooldown_ticks(0)
                .with_maximum_layers(-1),
        )
        .unwrap();

    region.tick_2d("img", &uniform_frame(4, 4, 1.0)).unwrap();
    let layers_before = region.layer_count();
    // Both triggers stay saturated for several ticks, yet each tick adds at
    // most one layer.
    for tick in 1..=3 {
        region
            .tick_2d("img", &uniform_frame(4, 4, 0.2))
            .unwrap();
        assert_eq!(region.layer_count(), layers_before + tick);
    }
}

#[test]
fn cooldown_suppresses_back_to_back_growth() {
    let mut region = saturating_region();
    region
        .set_growth_policy(
            GrowthPolicy::default()
                .with_average_slots_threshold(f64::INFINITY)
                .with_percent_at_cap_fallback_threshold(10.0)
                .with_layer_cooldown_ticks(100)
                .with_maximum_layers(-1),
        )
        .unwrap();

    region.tick_2d("img", &uniform_frame(4, 4, 1.0)).unwrap();
    region.tick_2d("img", &uniform_frame(4, 4, 0.2)).unwrap();
    let layers_after_first_growth = region.layer_count();

    for _ in 0..5 {
        region.tick_2d("img", &uniform_frame(4, 4, 0.2)).unwrap();
    }
    assert_eq!(region.layer_count(), layers_after_first_growth);
}

#[test]
fn maximum_layers_caps_growth() {
    let mut region = saturating_region();
    let layers_before = region.layer_count();
    region
        .set_growth_policy(
            GrowthPolicy::default()
                .with_average_slots_threshold(f64::INFINITY)
                .with_percent_at_cap_fallback_threshold(10.0)
                .with_layer_cooldown_ticks(0)
                .with_maximum_layers(layers_before as i32 + 1),
        )
        .unwrap();

    region.tick_2d("img", &uniform_frame(4, 4, 1.0)).unwrap();
    for _ in 0..4 {
        region.tick_2d("img", &uniform_frame(4, 4, 0.2)).unwrap();
    }
    assert_eq!(region.layer_count(), layers_before + 1);
}

#[test]
fn grown_layer_is_wired_from_the_saturated_one() {
    let mut region = saturating_region();
    region
        .set_growth_policy(
            GrowthPolicy::default()
                .with_average_slots_threshold(f64::INFINITY)
                .with_percent_at_cap_fallback_threshold(75.0)
                .with_layer_cooldown_ticks(0)
                .with_maximum_layers(32),
        )
        .unwrap();

    region.tick_2d("img", &uniform_frame(4, 4, 1.0)).unwrap();
    region.tick_2d("img", &uniform_frame(4, 4, 0.2)).unwrap();

    let new_layer = region.layer_count() - 1;
    let edge = region.input_edge("img").unwrap();
    // The growth helper records the mesh rule saturated -> new.
    assert!(region
        .mesh_rules()
        .iter()
        .any(|rule| rule.source_layer == edge && rule.dest_layer == new_layer));
    // The new layer holds the default four excitatory neurons.
    let layer = region.layer(new_layer).unwrap();
    assert_eq!(layer.neuron_count(), 4);
    assert!(layer
        .neurons()
        .iter()
        .all(|neuron| matches!(neuron.kind, NeuronKind::Excitatory)));
}

#[test]
fn neuron_growth_appends_and_autowires_through_mesh_rules() {
    let mut region = Region::new("neuron_growth");
    let first = region.add_layer(1, 0, 0);
    let second = region.add_layer(3, 0, 0);
    region.connect_layers(first, second, 1.0, false).unwrap();
    // Two scalar ports: each edge imprints on its own first value, so the
    // hidden neuron sees 1.0 from one port and 0.5 from the other.
    region.bind_input("a", &[first]).unwrap();
    region.bind_input("b", &[first]).unwrap();

    // One-slot capacity plus a two-event growth threshold: repeated 0.5
    // deliveries after the 1.0 anchor build a fallback streak.
    let mut capped = SlotConfig::default().with_slot_limit(1);
    capped.fallback_growth_threshold = 2;
    region.layer_mut(first).unwrap().set_slot_config(capped);

    let neurons_before = region.layer(first).unwrap().neuron_count();
    region.tick("a", 1.0).unwrap();
    region.tick("b", 0.5).unwrap();
    region.tick("b", 0.5).unwrap();
    let neurons_after = region.layer(first).unwrap().neuron_count();
    assert_eq!(neurons_after, neurons_before + 1);

    // The grown neuron inherited the outbound mesh rule to `second`.
    let grown = &region.layer(first).unwrap().neurons()[neurons_after - 1];
    assert!(grown
        .outgoing
        .iter()
        .any(|synapse| synapse.target_layer == second));
    // And the tract from `first` re-attached it as a source.
    assert!(region
        .tracts()
        .iter()
        .filter(|tract| tract.source_layer == first)
        .all(|tract| tract.subscribes(neurons_after - 1)));
}
