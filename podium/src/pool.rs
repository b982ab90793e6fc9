//! Bounded worker pools for the embarrassingly parallel parts of the engine.

use rayon::ThreadPoolBuilder;
use tracing::warn;

/// Runs `action` inside a pool of `workers` threads, so that any parallel iterators within it are
/// bounded by the requested degree. If the pool cannot be created, the action runs on the global
/// pool instead.
pub fn install<T: Send>(workers: usize, action: impl FnOnce() -> T + Send) -> T {
    match ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => pool.install(action),
        Err(err) => {
            warn!("could not create a pool of {workers} workers ({err}); using the global pool");
            action()
        }
    }
}

/// The default concurrency degree: the available parallelism of the host.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|workers| workers.get())
        .unwrap_or(1)
}
