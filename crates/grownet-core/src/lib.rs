//! Brain-inspired event-processing engine
//!
//! A [`Region`] of [`Layer`]s of [`Neuron`]s communicates through
//! [`Tract`]s and is driven by discrete ticks: an external driver pushes a
//! scalar, a 2D frame, or an N-D tensor into a named input port; excitation
//! propagates through per-layer buses and inter-layer tracts; slot-based
//! local learning rules and adaptive thresholds update per-neuron state; and
//! the region may grow new neurons or layers under explicit policies.
//!
//! Ticks are strictly sequential and single-threaded; reproducible data
//! parallelism for side-effect-free reductions is available through the
//! `grownet-pal` crate.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod error;
pub mod growth;
pub mod layer;
pub mod neuron;
pub mod proximity;
pub mod region;
pub mod slot;
pub mod synapse;
pub mod topographic;
pub mod tract;
pub mod weight;
pub mod windowed;

pub use bus::{LateralBus, RegionBus};
pub use error::{GrowNetError, Result};
pub use growth::GrowthPolicy;
pub use layer::{Layer, LayerActivity, LayerKind};
pub use neuron::{InputOutcome, Neuron, NeuronKind};
pub use proximity::{DeterministicLayout, ProximityConfig, ProximityFunction};
pub use region::{MeshRule, PruneSummary, Region, RegionMetrics};
pub use slot::{AnchorMode, SlotConfig, SlotEngine};
pub use synapse::Synapse;
pub use topographic::{topographic_weights, TopographicConfig, WeightMode};
pub use tract::Tract;
pub use weight::Weight;
pub use windowed::{Padding, TractWindowed};

// Deterministic parallel helpers are re-exported for callers that iterate
// over neurons or pixels themselves.
pub use grownet_pal as pal;

/// Engine crate version for compatibility checking.
pub const ENGINE_VERSION: u32 = 1;
