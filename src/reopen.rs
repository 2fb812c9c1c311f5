use crate::client::ClientHandle;
use crate::close::{CloseChan, CloseReason, CloseSignal};
use crate::error::Error;
use crate::handler::{ConnectionHandler, ConnectionHandlerFactory, MessageHandler};
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Rotates to a freshly opened inner handler every fixed period, and repairs
/// immediately on unexpected close.
///
/// Rotation connects the replacement before closing the old connection, so
/// a brief overlap of duplicated frames is preferred over a gap. Connect
/// failures retry immediately and indefinitely; pacing belongs to the
/// backoff handler, which can be stacked beneath this one.
pub struct ReopenHandler {
    shared: Arc<Shared>,
    connected: AtomicBool,
}

struct Shared {
    client: ClientHandle,
    message_handler: MessageHandler,
    events: crate::event::Events,
    inner_factory: ConnectionHandlerFactory,
    interval: Duration,
    inner: RwLock<Option<Arc<dyn ConnectionHandler>>>,
    close: CloseSignal,
    reason: CloseReason,
}

impl ReopenHandler {
    pub fn factory(
        interval: Duration,
        inner: ConnectionHandlerFactory,
    ) -> ConnectionHandlerFactory {
        Arc::new(move |client, message_handler, events| {
            Arc::new(ReopenHandler {
                shared: Arc::new(Shared {
                    client,
                    message_handler,
                    events,
                    inner_factory: inner.clone(),
                    interval,
                    inner: RwLock::new(None),
                    close: CloseSignal::new(),
                    reason: CloseReason::new(),
                }),
                connected: AtomicBool::new(false),
            })
        })
    }
}

impl Shared {
    /// Build a fresh inner handler and connect it, retrying immediately and
    /// indefinitely on failure. `None` once cancelled or closed.
    async fn open_inner(&self, cancel: &CancellationToken) -> Option<Arc<dyn ConnectionHandler>> {
        loop {
            if cancel.is_cancelled() || self.close.is_fired() {
                return None;
            }

            let conn = (self.inner_factory)(
                self.client.clone(),
                self.message_handler.clone(),
                self.events.clone(),
            );

            match conn.connect(cancel.clone()).await {
                Ok(()) => return Some(conn),
                Err(err) => {
                    error!("conn was closed due to {err}");
                    conn.close();
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Terminal cleanup shared by the cancellation and shutdown paths.
    fn finish(&self) {
        self.reason.set(Error::Terminated);
        self.close.fire();
        let inner = self.inner.read().clone();
        if let Some(inner) = inner {
            inner.close();
        }
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken, mut inner_close: CloseChan) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut conn_count = 0usize;
        let mut own_close = self.close.chan();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.finish();
                    return;
                }
                _ = own_close.recv() => return,
                _ = ticker.tick() => {
                    conn_count += 1;
                    info!("spawning and opening #{conn_count} conn due to reopen trigger");

                    // connect the replacement first, close the old one only
                    // after the swap
                    let Some(next) = self.open_inner(&cancel).await else {
                        self.finish();
                        return;
                    };
                    if self.close.is_fired() {
                        next.close();
                        return;
                    }

                    inner_close = next.close_chan();
                    let old = self.inner.write().replace(next);
                    if let Some(old) = old {
                        old.close();
                    }
                }
                _ = inner_close.recv() => {
                    conn_count += 1;
                    info!("spawning and opening #{conn_count} conn due to previous conn closed");

                    let Some(next) = self.open_inner(&cancel).await else {
                        self.finish();
                        return;
                    };
                    if self.close.is_fired() {
                        next.close();
                        return;
                    }

                    inner_close = next.close_chan();
                    *self.inner.write() = Some(next);
                }
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for ReopenHandler {
    async fn recv(&self, m: crate::message::Message) {
        let inner = self.shared.inner.read().clone();
        if let Some(inner) = inner {
            inner.recv(m).await;
        }
    }

    async fn send(&self, m: crate::message::Message) {
        let inner = self.shared.inner.read().clone();
        if let Some(inner) = inner {
            inner.send(m).await;
        }
    }

    async fn connect(&self, cancel: CancellationToken) -> Result<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("spawning and opening #0 conn");
        let Some(first) = self.shared.open_inner(&cancel).await else {
            self.shared.finish();
            return Err(Error::Terminated);
        };

        let first_close = first.close_chan();
        *self.shared.inner.write() = Some(first);

        tokio::spawn(self.shared.clone().run(cancel, first_close));

        Ok(())
    }

    fn close(&self) {
        self.shared.reason.set(Error::Terminated);
        if self.shared.close.fire() {
            let inner = self.shared.inner.read().clone();
            if let Some(inner) = inner {
                inner.close();
            }
        }
    }

    fn close_chan(&self) -> CloseChan {
        self.shared.close.chan()
    }

    /// The current inner's close-reason, falling back to this handler's own.
    fn close_err(&self) -> Option<Error> {
        let inner = self.shared.inner.read().clone();
        inner
            .and_then(|inner| inner.close_err())
            .or_else(|| self.shared.reason.get())
    }
}
