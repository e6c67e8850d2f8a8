use tokio::sync::broadcast;

/// Listens for a shutdown signal broadcast by the caller.
///
/// Shutdown is signalled once, by dropping or sending on the paired
/// [`broadcast::Sender`]. Each task holds its own `Shutdown` and polls it
/// inside `select!` arms; once the signal has been observed, `is_shutdown`
/// stays true forever.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` once the signal has been received.
    is_shutdown: bool,
    /// Receiving half of the channel used to listen for the signal.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given receiver.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            is_shutdown: false,
            notify,
        }
    }

    /// Returns `true` if the shutdown signal has been received.
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Wait for the shutdown signal, returning immediately if it has
    /// already been observed.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }

        // Lagged/closed both mean the sender side is done with us.
        let _ = self.notify.recv().await;

        self.is_shutdown = true;
    }
}
