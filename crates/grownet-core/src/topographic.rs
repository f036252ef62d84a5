//! Topographic wiring: windowed geometry with Gaussian or DoG weight tables

use std::collections::HashMap;

use crate::error::{GrowNetError, Result};
use crate::windowed::{Padding, TractWindowed};

/// Distance-to-weight profile of a topographic projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WeightMode {
    /// Single Gaussian centered on the window midpoint.
    #[default]
    Gaussian,
    /// Difference of Gaussians: a center Gaussian minus a scaled, wider
    /// surround Gaussian. Negative lobes clamp to zero.
    Dog,
}

/// Configuration for [`Region::connect_layers_topographic`].
///
/// The geometric fields mirror windowed wiring; the remaining fields shape
/// the deterministic per-edge weight table.
///
/// [`Region::connect_layers_topographic`]: crate::region::Region::connect_layers_topographic
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TopographicConfig {
    /// Kernel height.
    pub kernel_h: usize,
    /// Kernel width.
    pub kernel_w: usize,
    /// Vertical stride.
    pub stride_h: usize,
    /// Horizontal stride.
    pub stride_w: usize,
    /// Padding mode.
    pub padding: Padding,
    /// Whether the created edges are feedback edges.
    pub feedback: bool,
    /// Distance-to-weight profile.
    pub weight_mode: WeightMode,
    /// Standard deviation of the center Gaussian, in pixels.
    pub sigma_center: f64,
    /// Standard deviation of the surround Gaussian (DoG only); must exceed
    /// `sigma_center`.
    pub sigma_surround: f64,
    /// Scale of the surround Gaussian relative to the center (DoG only).
    pub surround_ratio: f64,
    /// Normalize each destination's incoming weights to sum to 1.
    pub normalize_incoming: bool,
}

impl Default for TopographicConfig {
    fn default() -> Self {
        Self {
            kernel_h: 7,
            kernel_w: 7,
            stride_h: 1,
            stride_w: 1,
            padding: Padding::Same,
            feedback: false,
            weight_mode: WeightMode::Gaussian,
            sigma_center: 2.0,
            sigma_surround: 4.0,
            surround_ratio: 0.5,
            normalize_incoming: true,
        }
    }
}

impl TopographicConfig {
    /// Set the weight profile.
    pub fn with_weight_mode(mut self, weight_mode: WeightMode) -> Self {
        self.weight_mode = weight_mode;
        self
    }

    /// Set the center and surround standard deviations.
    pub fn with_sigmas(mut self, sigma_center: f64, sigma_surround: f64) -> Self {
        self.sigma_center = sigma_center;
        self.sigma_surround = sigma_surround;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.kernel_h == 0 || self.kernel_w == 0 {
            return Err(GrowNetError::invalid_parameter(
                "kernel",
                format!("{}x{}", self.kernel_h, self.kernel_w),
                ">= 1 in both dimensions",
            ));
        }
        if self.stride_h == 0 || self.stride_w == 0 {
            return Err(GrowNetError::invalid_parameter(
                "stride",
                format!("{}x{}", self.stride_h, self.stride_w),
                ">= 1 in both dimensions",
            ));
        }
        if !(self.sigma_center > 0.0) {
            return Err(GrowNetError::invalid_parameter(
                "sigma_center",
                self.sigma_center.to_string(),
                "> 0.0",
            ));
        }
        if self.weight_mode == WeightMode::Dog {
            if self.sigma_surround <= self.sigma_center {
                return Err(GrowNetError::invalid_parameter(
                    "sigma_surround",
                    format!(
                        "{} (with sigma_center={})",
                        self.sigma_surround, self.sigma_center
                    ),
                    "> sigma_center for DoG",
                ));
            }
            if self.surround_ratio < 0.0 {
                return Err(GrowNetError::invalid_parameter(
                    "surround_ratio",
                    self.surround_ratio.to_string(),
                    ">= 0.0",
                ));
            }
        }
        Ok(())
    }
}

/// Deterministic weight table for a topographically wired tract.
///
/// Runtime synapses carry no weight field, so the table is computed from the
/// recorded geometry instead of being attached to edges: each `(source,
/// center)` edge maps to a Gaussian or DoG weight of the pixel distance
/// between the source and the destination center, optionally normalized so
/// every center's incoming weights sum to 1.
pub fn topographic_weights(
    tract: &TractWindowed,
    config: &TopographicConfig,
) -> Result<HashMap<(usize, usize), f64>> {
    config.validate()?;
    if !tract.dest_is_output_2d {
        return Err(GrowNetError::invalid_config(
            "topographic weights require an Output2D destination",
        ));
    }
    let (_, source_width) = tract.source_shape();
    if source_width == 0 || tract.dest_width == 0 {
        return Err(GrowNetError::invalid_config(
            "topographic weights require built tract geometry",
        ));
    }

    let two_center_sq = 2.0 * config.sigma_center * config.sigma_center;
    let two_surround_sq = 2.0 * config.sigma_surround * config.sigma_surround;

    let mut weights = HashMap::new();
    for &(source, center) in tract.source_to_center_edges() {
        let source_row = (source / source_width) as f64;
        let source_col = (source % source_width) as f64;
        let center_row = (center / tract.dest_width) as f64;
        let center_col = (center % tract.dest_width) as f64;
        let distance_sq = (source_row - center_row).powi(2) + (source_col - center_col).powi(2);

        let center_term = (-distance_sq / two_center_sq).exp();
        let weight = match config.weight_mode {
            WeightMode::Gaussian => center_term,
            WeightMode::Dog => {
                let surround_term = (-distance_sq / two_surround_sq).exp();
                (center_term - config.surround_ratio * surround_term).max(0.0)
            }
        };
        weights.insert((source, center), weight);
    }

    if config.normalize_incoming {
        let mut incoming_sums: HashMap<usize, f64> = HashMap::new();
        for (&(_, center), &weight) in &weights {
            *incoming_sums.entry(center).or_insert(0.0) += weight;
        }
        for ((_, center), weight) in weights.iter_mut() {
            if let Some(&sum) = incoming_sums.get(center) {
                if sum > 0.0 {
                    *weight /= sum;
                }
            }
        }
    }
    Ok(weights)
}
