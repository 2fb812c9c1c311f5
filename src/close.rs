use crate::error::Error;
use parking_lot::Mutex;
use tokio::sync::watch;

/// One-shot broadcast fired when a handler or connection stops being usable.
///
/// Firing is idempotent: the signal transitions at most once, and every
/// [`CloseChan`] handed out before or after the transition resolves.
#[derive(Debug)]
pub struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Fire the signal. Returns `true` only for the call that actually
    /// performed the transition, which makes it usable as a once-guard.
    pub fn fire(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn chan(&self) -> CloseChan {
        CloseChan(self.tx.subscribe())
    }
}

impl Default for CloseSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Waiter handle for a [`CloseSignal`]. Cloneable; every clone resolves.
#[derive(Debug, Clone)]
pub struct CloseChan(watch::Receiver<bool>);

impl CloseChan {
    /// Resolves once the signal has fired. A dropped signal owner counts as
    /// fired, so a waiter can never hang on a dead handler.
    pub async fn recv(&mut self) {
        let _ = self.0.wait_for(|fired| *fired).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.0.borrow()
    }
}

/// Set-once slot for the error associated with a terminal close.
///
/// The first writer wins; `None` after the signal fired means the close was
/// clean.
#[derive(Debug, Default)]
pub struct CloseReason {
    slot: Mutex<Option<Error>>,
}

impl CloseReason {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the reason. Returns `false` when a reason was already set.
    pub fn set(&self, err: Error) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(err);
            true
        } else {
            false
        }
    }

    /// Overwrite the reason regardless of previous writes. Reserved for the
    /// backoff handler, whose reported reason tracks the latest inner
    /// failure across repairs.
    pub(crate) fn replace(&self, err: Option<Error>) {
        *self.slot.lock() = err;
    }

    pub fn get(&self) -> Option<Error> {
        self.slot.lock().clone()
    }
}
