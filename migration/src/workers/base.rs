use std::future::Future;

use crate::error::MigrationResult;

/// A trait for types that can be started as workers.
///
/// `H` is the handle returned once the worker runs, `S` the state observable
/// through that handle.
pub trait Worker<H, S>
where
    H: WorkerHandle<S>,
{
    /// Error type.
    type Error;

    /// Spawns the worker and returns its handle.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// A handle to a running worker that provides access to its state and completion status.
pub trait WorkerHandle<S> {
    /// Returns the current state of the worker.
    ///
    /// The state outlives the worker, reading it says nothing about whether the
    /// worker is still running.
    fn state(&self) -> S;

    /// Returns a future that resolves when the worker completes, with the error
    /// the worker failed with or a caught panic.
    fn wait(self) -> impl Future<Output = MigrationResult<()>> + Send;
}
