//! Task spawning used by the hydration and read paths.
//!
//! Transfers run as detached tasks so they outlive any single waiter; shard
//! opens and record decoding run on the blocking pool.

pub type JoinHandle<T> = tokio::task::JoinHandle<T>;

pub type JoinError = tokio::task::JoinError;

/// Spawns a detached task on the current runtime.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::task::spawn(future)
}

/// Runs blocking file I/O and decompression off the async workers.
pub fn spawn_blocking<F, R>(f: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
}
