//! Region ticks, port binding, and pulse semantics

use grownet_core::{GrowNetError, Region};

#[test]
fn driven_tick_delivers_exactly_one_event() {
    let mut region = Region::new("tick");
    let hidden = region.add_layer(2, 1, 0);
    region.bind_input("x", &[hidden]).unwrap();

    for step in 0..5 {
        let metrics = region.tick("x", 0.4).unwrap();
        assert_eq!(metrics.delivered_events, 1);
        assert_eq!(region.bus().current_step(), step + 1);
    }
}

#[test]
fn tick_reports_structural_totals() {
    let mut region = Region::new("totals");
    let hidden = region.add_layer(2, 0, 0);
    region.bind_input("x", &[hidden]).unwrap();

    let metrics = region.tick("x", 1.0).unwrap();
    // The edge neuron fires and routes by index into hidden neuron 0, so at
    // least those two slots exist.
    assert!(metrics.total_slots >= 2);
}

#[test]
fn unknown_port_is_a_domain_error() {
    let mut region = Region::new("ports");
    region.add_layer(1, 0, 0);
    assert!(matches!(
        region.tick("unbound", 1.0),
        Err(GrowNetError::UnknownPort { .. })
    ));

    let frame = vec![vec![0.0; 2]; 2];
    assert!(matches!(
        region.tick_2d("unbound", &frame),
        Err(GrowNetError::UnknownPort { .. })
    ));
}

#[test]
fn layer_bus_factors_decay_after_one_tick() {
    let mut region = Region::new("pulse");
    let hidden = region.add_layer(1, 0, 0);
    region.bind_input("x", &[hidden]).unwrap();

    {
        let bus = region.layer_mut(hidden).unwrap().bus_mut();
        bus.set_modulation_factor(1.5);
        bus.set_inhibition_factor(0.7);
    }
    region.tick("x", 0.5).unwrap();

    let bus = region.layer(hidden).unwrap().bus();
    assert_eq!(bus.modulation_factor(), 1.0);
    assert!((bus.inhibition_factor() - 0.63).abs() < 1e-12);
}

#[test]
fn pulses_touch_region_and_layer_buses_for_one_tick() {
    let mut region = Region::new("pulse-all");
    let first = region.add_layer(1, 0, 0);
    let second = region.add_layer(1, 0, 0);
    region.bind_input("x", &[first]).unwrap();

    region.pulse_inhibition(0.8);
    region.pulse_modulation(1.4);
    assert_eq!(region.bus().inhibition_factor(), 0.8);
    assert_eq!(region.layer(second).unwrap().bus().modulation_factor(), 1.4);

    region.tick("x", 0.3).unwrap();

    // Neutral again (inhibition decayed multiplicatively).
    assert!((region.bus().inhibition_factor() - 0.72).abs() < 1e-12);
    assert_eq!(region.bus().modulation_factor(), 1.0);
    for index in 0..region.layer_count() {
        let bus = region.layer(index).unwrap().bus();
        assert_eq!(bus.modulation_factor(), 1.0);
        assert!((bus.inhibition_factor() - 0.72).abs() < 1e-12);
    }
}

#[test]
fn tick_2d_drives_a_bound_2d_port() {
    let mut region = Region::new("image");
    let hidden = region.add_layer(4, 0, 0);
    region
        .bind_input_2d("img", 2, 2, 1.0, 0.01, &[hidden])
        .unwrap();

    let frame = vec![vec![1.0; 2]; 2];
    let metrics = region.tick_2d("img", &frame).unwrap();
    assert_eq!(metrics.delivered_events, 1);

    // Shape mismatches surface as validation errors.
    let bad = vec![vec![1.0; 3]; 2];
    assert!(region.tick_2d("img", &bad).is_err());
}

#[test]
fn tick_image_is_an_alias_of_tick_2d() {
    let mut region = Region::new("alias");
    region.bind_input_2d("img", 2, 2, 1.0, 0.01, &[]).unwrap();
    let frame = vec![vec![0.5; 2]; 2];
    let metrics = region.tick_image("img", &frame).unwrap();
    assert_eq!(metrics.delivered_events, 1);
}

#[test]
fn excitation_propagates_through_tracts() {
    let mut region = Region::new("fanout");
    let hidden = region.add_layer(2, 0, 0);
    region.bind_input_2d("img", 1, 2, 1.0, 0.01, &[hidden]).unwrap();

    // A bright frame fires both edge pixels, which propagate by index into
    // the hidden layer and allocate slots there.
    let frame = vec![vec![1.0, 1.0]];
    region.tick_2d("img", &frame).unwrap();
    let hidden_slots: usize = region
        .layer(hidden)
        .unwrap()
        .neurons()
        .iter()
        .map(|neuron| neuron.slots.len())
        .sum();
    assert_eq!(hidden_slots, 2);
}

#[test]
fn bound_ports_are_recorded() {
    let mut region = Region::new("outputs");
    let hidden = region.add_layer(1, 0, 0);
    let sink = region.add_output_layer_2d(2, 2, 0.2);
    region.bind_input("x", &[hidden]).unwrap();
    region.bind_output("frame", &[sink]).unwrap();

    assert_eq!(region.input_port_targets("x").unwrap(), &[hidden]);
    assert_eq!(region.output_port_targets("frame").unwrap(), &[sink]);
    assert!(region.output_port_targets("missing").is_err());
    assert!(region.bind_output("frame", &[9]).is_err());
}
