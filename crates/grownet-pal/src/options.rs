//! Execution options for PAL calls

/// How mapped outputs are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    /// Reduce the concatenated outputs strictly in domain order. Required for
    /// bit-identical floating-point results across worker counts.
    #[default]
    Ordered,
    /// Reduce adjacent pairs level by level. Cheaper for associative
    /// reductions where bit-exact reproducibility is not needed.
    PairwiseTree,
}

/// Execution device preference. Only the CPU backend is implemented; the
/// other variants are accepted and fall back to CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
    /// Host CPU.
    #[default]
    Cpu,
    /// GPU offload (falls back to CPU).
    Gpu,
    /// Pick automatically (falls back to CPU).
    Auto,
}

/// Tuning knobs for [`parallel_for`](crate::parallel_for) and
/// [`parallel_map`](crate::parallel_map).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParallelOptions {
    /// Worker cap; 0 means auto (the pool width).
    pub max_workers: usize,
    /// Target items per scheduling tile.
    pub tile_size: usize,
    /// Output combination strategy.
    pub reduction: Reduction,
    /// Device preference.
    pub device: Device,
    /// Allow the backend to vectorize kernels.
    pub vectorization_enabled: bool,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        Self {
            max_workers: 0,
            tile_size: 4096,
            reduction: Reduction::Ordered,
            device: Device::Cpu,
            vectorization_enabled: true,
        }
    }
}

impl ParallelOptions {
    /// Options pinned to a single worker. Useful as a determinism baseline.
    pub fn single_worker() -> Self {
        Self {
            max_workers: 1,
            ..Self::default()
        }
    }

    /// Set the worker cap.
    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    /// Set the reduction strategy.
    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }
}
