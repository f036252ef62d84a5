//! Tracts: bundles of inter-layer fire subscriptions

use std::collections::BTreeSet;

use rand::Rng;

/// A bundle of inter-layer connections realized as per-source-neuron
/// subscriptions.
///
/// Each subscribed source routes its amplitude to the destination layer at
/// the same neuron index when it fires. Subscription is decided once per
/// source with the tract's probability; growth re-subscribes new sources via
/// [`Tract::attach_source_neuron`].
#[derive(Debug, Clone)]
pub struct Tract {
    /// Index of the source layer within the region.
    pub source_layer: usize,
    /// Index of the destination layer within the region.
    pub dest_layer: usize,
    /// Whether this tract closes a feedback path.
    pub feedback: bool,
    /// Per-source subscription probability used at construction.
    pub probability: f64,
    sources: BTreeSet<usize>,
}

impl Tract {
    /// Build a tract, drawing one subscription decision per source neuron.
    pub fn new<R: Rng>(
        source_layer: usize,
        dest_layer: usize,
        feedback: bool,
        probability: f64,
        source_count: usize,
        rng: &mut R,
    ) -> Self {
        let mut sources = BTreeSet::new();
        for source_index in 0..source_count {
            if probability >= 1.0 || rng.gen::<f64>() < probability {
                sources.insert(source_index);
            }
        }
        Self {
            source_layer,
            dest_layer,
            feedback,
            probability,
            sources,
        }
    }

    /// Subscribe a source neuron created after construction (growth).
    pub fn attach_source_neuron(&mut self, new_source_index: usize) {
        self.sources.insert(new_source_index);
    }

    /// Whether the given source neuron routes through this tract.
    pub fn subscribes(&self, source_index: usize) -> bool {
        self.sources.contains(&source_index)
    }

    /// Subscribed source indices in ascending order.
    pub fn source_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.sources.iter().copied()
    }

    /// Number of subscribed sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }
}
