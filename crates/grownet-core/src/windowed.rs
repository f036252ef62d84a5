//! Deterministic windowed wiring geometry

use std::collections::BTreeSet;

use crate::error::{GrowNetError, Result};

/// Window padding mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// Origins extend past the border by `(kernel - 1) / 2` so every source
    /// pixel participates.
    Same,
    /// Origins stay fully inside the source rectangle.
    Valid,
}

impl Padding {
    /// Parse `"same"` / `"valid"` (case-insensitive).
    pub fn parse(text: &str) -> Result<Self> {
        match text.to_ascii_lowercase().as_str() {
            "same" => Ok(Self::Same),
            "valid" => Ok(Self::Valid),
            other => Err(GrowNetError::invalid_parameter(
                "padding",
                other.to_string(),
                "\"same\" or \"valid\"",
            )),
        }
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Same => "same",
            Self::Valid => "valid",
        }
    }
}

/// Recorded geometry of one windowed wiring call.
///
/// The geometry is a pure function of the parameters and the source grid, so
/// growth can re-derive the wiring for source neurons created later.
#[derive(Debug, Clone)]
pub struct TractWindowed {
    /// Index of the source layer within the region.
    pub source_layer: usize,
    /// Index of the destination layer within the region.
    pub dest_layer: usize,
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
    /// Whether the destination is an Output2D layer.
    pub dest_is_output_2d: bool,
    /// Destination frame height (Output2D only).
    pub dest_height: usize,
    /// Destination frame width (Output2D only).
    pub dest_width: usize,
    /// Deduplicated, sorted `(source, center)` edges (Output2D destination).
    edges: Vec<(usize, usize)>,
    /// Source indices covered by at least one window (other destinations).
    allowed_sources: BTreeSet<usize>,
    /// Source grid dims recorded by `build_from_source_grid`.
    source_height: usize,
    source_width: usize,
}

impl TractWindowed {
    /// Record the parameters of a windowed wiring call.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source_layer: usize,
        dest_layer: usize,
        kernel_h: usize,
        kernel_w: usize,
        stride_h: usize,
        stride_w: usize,
        padding: Padding,
        dest_is_output_2d: bool,
        dest_height: usize,
        dest_width: usize,
    ) -> Self {
        Self {
            source_layer,
            dest_layer,
            kernel_h,
            kernel_w,
            stride_h,
            stride_w,
            padding,
            dest_is_output_2d,
            dest_height,
            dest_width,
            edges: Vec::new(),
            allowed_sources: BTreeSet::new(),
            source_height: 0,
            source_width: 0,
        }
    }

    /// Destination center for a window origin: the floor midpoint of the
    /// window, clamped into the destination frame.
    fn center_for_window(&self, origin_row: isize, origin_col: isize) -> (usize, usize) {
        let center_row = origin_row + (self.kernel_h / 2) as isize;
        let center_col = origin_col + (self.kernel_w / 2) as isize;
        let clamp = |value: isize, upper: usize| -> usize {
            value.clamp(0, upper.saturating_sub(1) as isize) as usize
        };
        (
            clamp(center_row, self.dest_height),
            clamp(center_col, self.dest_width),
        )
    }

    /// Enumerate window origins over an `height x width` source grid and
    /// record either `(source, center)` edges or the participating source
    /// set.
    pub fn build_from_source_grid(&mut self, height: usize, width: usize) {
        self.source_height = height;
        self.source_width = width;
        let (pad_rows, pad_cols) = match self.padding {
            Padding::Same => ((self.kernel_h - 1) / 2, (self.kernel_w - 1) / 2),
            Padding::Valid => (0, 0),
        };
        let (start_row, end_row, start_col, end_col) = match self.padding {
            Padding::Same => (
                -(pad_rows as isize),
                height as isize - 1 + pad_rows as isize,
                -(pad_cols as isize),
                width as isize - 1 + pad_cols as isize,
            ),
            Padding::Valid => (
                0,
                height as isize - self.kernel_h as isize,
                0,
                width as isize - self.kernel_w as isize,
            ),
        };

        let mut edges = Vec::new();
        let mut sources = BTreeSet::new();

        let mut origin_row = start_row;
        while origin_row <= end_row {
            let mut origin_col = start_col;
            while origin_col <= end_col {
                let clip_row_start = origin_row.max(0) as usize;
                let clip_col_start = origin_col.max(0) as usize;
                let clip_row_end =
                    ((origin_row + self.kernel_h as isize - 1).min(height as isize - 1)).max(-1);
                let clip_col_end =
                    ((origin_col + self.kernel_w as isize - 1).min(width as isize - 1)).max(-1);
                let window_is_empty = clip_row_end < clip_row_start as isize
                    || clip_col_end < clip_col_start as isize;
                if !window_is_empty {
                    let clip_row_end = clip_row_end as usize;
                    let clip_col_end = clip_col_end as usize;
                    if self.dest_is_output_2d {
                        let (center_row, center_col) = self.center_for_window(origin_row, origin_col);
                        let center_index = center_row * self.dest_width + center_col;
                        for row in clip_row_start..=clip_row_end {
                            for col in clip_col_start..=clip_col_end {
                                edges.push((row * width + col, center_index));
                            }
                        }
                    } else {
                        for row in clip_row_start..=clip_row_end {
                            for col in clip_col_start..=clip_col_end {
                                sources.insert(row * width + col);
                            }
                        }
                    }
                }
                origin_col += self.stride_w as isize;
            }
            origin_row += self.stride_h as isize;
        }

        if self.dest_is_output_2d {
            edges.sort_unstable();
            edges.dedup();
            self.edges = edges;
        } else {
            self.allowed_sources = sources;
        }
    }

    /// Deduplicated `(source, center)` edges, ascending.
    pub fn source_to_center_edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// `(height, width)` of the source grid this geometry was built from;
    /// `(0, 0)` before `build_from_source_grid` runs.
    pub fn source_shape(&self) -> (usize, usize) {
        (self.source_height, self.source_width)
    }

    /// Source indices covered by at least one window.
    pub fn allowed_source_indices(&self) -> &BTreeSet<usize> {
        &self.allowed_sources
    }

    /// Number of unique source indices participating in at least one window.
    pub fn unique_source_count(&self) -> usize {
        if self.dest_is_output_2d {
            let mut last = None;
            let mut count = 0usize;
            for &(source, _) in &self.edges {
                if last != Some(source) {
                    count += 1;
                    last = Some(source);
                }
            }
            count
        } else {
            self.allowed_sources.len()
        }
    }

    /// Whether the given source index participates in any window.
    pub fn window_covers_source_index(&self, source_index: usize) -> bool {
        if !self.allowed_sources.is_empty() {
            return self.allowed_sources.contains(&source_index);
        }
        if !self.dest_is_output_2d {
            return false;
        }
        self.edges
            .binary_search_by(|&(source, center)| (source, center).cmp(&(source_index, 0)))
            .map_or_else(
                |insertion| {
                    self.edges
                        .get(insertion)
                        .is_some_and(|&(source, _)| source == source_index)
                },
                |_| true,
            )
    }
}
