//! Shutdown signalling shared by the orchestrator, the worker rounds and the workers.

use tokio::sync::watch;

/// Sending side of a shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<()>);

impl ShutdownTx {
    /// Signals shutdown to every receiver.
    ///
    /// Fails only when no receiver is alive anymore, which callers usually ignore.
    pub fn shutdown(&self) -> Result<(), watch::error::SendError<()>> {
        self.0.send(())
    }

    /// Returns a receiver that only observes shutdowns signalled after this call.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiving side of a shutdown signal.
///
/// Clones of a receiver that has not observed the signal yet still observe it,
/// so components hand out clones of the receiver created with the channel.
pub type ShutdownRx = watch::Receiver<()>;

/// Outcome of an operation that can be interrupted by a shutdown.
#[derive(Debug)]
pub enum ShutdownResult<T, I> {
    Ok(T),
    Shutdown(I),
}

impl<T, I> ShutdownResult<T, I> {
    pub fn should_shutdown(&self) -> bool {
        matches!(self, ShutdownResult::Shutdown(_))
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(());
    (ShutdownTx(tx), rx)
}
