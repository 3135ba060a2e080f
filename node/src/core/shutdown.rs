use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Owns the shutdown broadcast and the tasks that must drain before exit.
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    _shutdown_rcv: broadcast::Receiver<()>,
    external_shutdown: mpsc::UnboundedReceiver<()>,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

/// Subscription a long-lived task checks at every wait boundary.
pub struct Shutdown {
    shutdown_signal_rcv: broadcast::Receiver<()>,
    received: bool,
}

impl Shutdown {
    /// Resolves once shutdown was requested. Returns immediately afterwards.
    pub async fn recv(&mut self) {
        if self.received {
            return;
        }
        // A closed or lagged channel means the manager is gone as well.
        let _ = self.shutdown_signal_rcv.recv().await;
        self.received = true;
    }

    pub fn is_shutdown(&mut self) -> bool {
        if !self.received {
            self.received = !matches!(
                self.shutdown_signal_rcv.try_recv(),
                Err(broadcast::error::TryRecvError::Empty)
            );
        }
        self.received
    }
}

/// Cloneable handle for requesting a node shutdown from outside.
#[derive(Clone)]
pub struct Handle {
    external_shutdown: mpsc::UnboundedSender<()>,
    shutdown_started: bool,
}

impl Handle {
    pub fn shutdown(&mut self) -> anyhow::Result<()> {
        if self.shutdown_started {
            return Ok(());
        }
        self.shutdown_started = true;
        self.external_shutdown
            .send(())
            .map_err(|_| anyhow::anyhow!("Shutdown manager already stopped"))
    }
}

impl ShutdownManager {
    pub fn init() -> (ShutdownManager, Handle) {
        let (shutdown_tx, shutdown_rcv) = broadcast::channel(1);
        let (external_tx, external_rcv) = mpsc::unbounded_channel();
        let handle = Handle {
            external_shutdown: external_tx,
            shutdown_started: false,
        };
        let manager = Self {
            shutdown_tx,
            _shutdown_rcv: shutdown_rcv,
            external_shutdown: external_rcv,
            handles: vec![],
        };
        (manager, handle)
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            shutdown_signal_rcv: self.shutdown_tx.subscribe(),
            received: false,
        }
    }

    pub fn add_handle(&mut self, handle: JoinHandle<anyhow::Result<()>>) {
        self.handles.push(handle);
    }

    /// Waits until some [`Handle`] requests shutdown.
    pub async fn wait_external(&mut self) {
        self.external_shutdown.recv().await;
    }

    /// Signals every subscriber and waits for the registered tasks.
    pub async fn stop(self) {
        log::info!("Starting node shutdown");
        if self.shutdown_tx.send(()).is_err() {
            log::warn!("No task was listening for shutdown");
        }
        log::info!("Waiting for {} tasks to finish", self.handles.len());
        for handle in self.handles {
            match handle.await {
                Ok(Ok(())) => log::info!("Task finished successfully"),
                Ok(Err(err)) => log::error!("Task finished with error: {err}"),
                Err(err) => log::error!("Task panicked or was cancelled: {err}"),
            }
        }
    }
}
