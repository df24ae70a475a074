type Notify = tokio::sync::broadcast::Receiver<()>;

/// Stop signal for the polling loop.
///
/// Backed by a `broadcast::Receiver` on which at most one value is ever sent. Dropping every sender counts as a
/// signal too, so the loop cannot outlive whoever spawned it.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` once the signal has been seen
    shutdown: bool,

    notify: Notify,
}

impl Shutdown {
    pub fn new(notify: Notify) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    /// Waits for the signal, returning at once if it was already received.
    pub async fn recv(&mut self) {
        if self.is_shutdown() {
            return;
        }

        // Lagging is impossible with a single value; a closed channel is also a stop.
        let _ = self.notify.recv().await;

        self.shutdown = true;
    }
}

impl From<Notify> for Shutdown {
    fn from(notify: Notify) -> Self {
        Self::new(notify)
    }
}

#[tokio::test]
async fn dropping_the_sender_stops() {
    let (tx, rx) = tokio::sync::broadcast::channel::<()>(1);
    let mut shutdown = Shutdown::from(rx);
    assert!(!shutdown.is_shutdown());

    drop(tx);
    shutdown.recv().await;

    assert!(shutdown.is_shutdown());
}
