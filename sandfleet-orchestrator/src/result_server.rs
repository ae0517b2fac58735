use std::sync::atomic::{AtomicU16, Ordering};

/// The result network service analysis machines report back to.
pub trait ResultServer: Send + Sync {
    /// Port the service is listening on right now.
    fn current_port(&self) -> u16;
}

/// Port holder for a result service running in another process. The owner
/// updates it when the service rebinds.
#[derive(Debug)]
pub struct SharedResultPort {
    port: AtomicU16,
}

impl SharedResultPort {
    pub fn new(port: u16) -> Self {
        Self {
            port: AtomicU16::new(port),
        }
    }

    pub fn set_port(&self, port: u16) {
        self.port.store(port, Ordering::SeqCst);
    }
}

impl ResultServer for SharedResultPort {
    fn current_port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }
}
