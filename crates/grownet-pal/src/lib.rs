//! Deterministic parallel abstraction layer (PAL) for the GrowNet engine
//!
//! This crate provides order-preserving parallel iteration and a counter-based
//! random number generator. The central guarantee is reproducibility: for the
//! same inputs and an ordered reduction, results are bit-identical regardless
//! of how many workers execute the kernel.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod domain;
pub mod options;
pub mod rng;

pub use domain::IndexedDomain;
pub use options::{Device, ParallelOptions, Reduction};
pub use rng::{counter_rng, mix64};

/// Resolve the effective worker count for a call.
///
/// `max_workers == 0` means "auto": the rayon pool width when the `parallel`
/// feature is enabled, otherwise 1.
fn effective_workers(options: Option<&ParallelOptions>) -> usize {
    let requested = options.map(|opt| opt.max_workers).unwrap_or(0);
    if requested > 0 {
        return requested;
    }
    #[cfg(feature = "parallel")]
    {
        rayon::current_num_threads().max(1)
    }
    #[cfg(not(feature = "parallel"))]
    {
        1
    }
}

/// Split `n` items into `workers` contiguous chunks and return the chunk
/// boundaries as `(start, end)` pairs. Chunking depends only on `n` and
/// `workers`, never on scheduling.
fn chunk_bounds(n: usize, workers: usize) -> Vec<(usize, usize)> {
    let workers = workers.max(1);
    let chunk = n.div_ceil(workers);
    (0..workers)
        .map(|worker| {
            let start = (worker * chunk).min(n);
            let end = (start + chunk).min(n);
            (start, end)
        })
        .filter(|(start, end)| start < end)
        .collect()
}

/// Apply `kernel` to every item of `domain`, possibly in parallel.
///
/// Side effects inside the kernel must touch disjoint data per item or be
/// synchronized by the caller; the engine only uses this for per-neuron and
/// per-pixel work on disjoint slices.
pub fn parallel_for<D, K>(domain: &D, kernel: K, options: Option<&ParallelOptions>)
where
    D: IndexedDomain + Sync + ?Sized,
    K: Fn(D::Item) + Sync,
{
    let n = domain.len();
    if n == 0 {
        return;
    }
    let workers = effective_workers(options);
    if workers <= 1 {
        for index in 0..n {
            kernel(domain.item(index));
        }
        return;
    }
    #[cfg(feature = "parallel")]
    {
        use rayon::prelude::*;
        chunk_bounds(n, workers).par_iter().for_each(|&(start, end)| {
            for index in start..end {
                kernel(domain.item(index));
            }
        });
    }
    #[cfg(not(feature = "parallel"))]
    {
        for index in 0..n {
            kernel(domain.item(index));
        }
    }
}

/// Map every item of `domain` through `kernel` and reduce the outputs.
///
/// Per-worker outputs are gathered into buckets ordered by chunk index and,
/// within each bucket, by item index; `reduce_in_order` therefore always sees
/// the kernel outputs in plain domain order. With [`Reduction::Ordered`] the
/// result is bit-identical for any worker count.
pub fn parallel_map<D, K, R, Reduce, Out>(
    domain: &D,
    kernel: K,
    reduce_in_order: Reduce,
    options: Option<&ParallelOptions>,
) -> Out
where
    D: IndexedDomain + Sync + ?Sized,
    K: Fn(D::Item) -> R + Sync,
    R: Send,
    Reduce: FnOnce(&[R]) -> Out,
{
    let n = domain.len();
    if n == 0 {
        return reduce_in_order(&[]);
    }
    let workers = effective_workers(options);
    let flat: Vec<R> = if workers <= 1 {
        (0..n).map(|index| kernel(domain.item(index))).collect()
    } else {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            let buckets: Vec<Vec<R>> = chunk_bounds(n, workers)
                .par_iter()
                .map(|&(start, end)| (start..end).map(|index| kernel(domain.item(index))).collect())
                .collect();
            let mut flat = Vec::with_capacity(n);
            for bucket in buckets {
                flat.extend(bucket);
            }
            flat
        }
        #[cfg(not(feature = "parallel"))]
        {
            (0..n).map(|index| kernel(domain.item(index))).collect()
        }
    };
    reduce_in_order(&flat)
}
