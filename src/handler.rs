use crate::client::ClientHandle;
use crate::close::{CloseChan, CloseReason, CloseSignal};
use crate::connection::{Connection, ConnectionFactory};
use crate::error::Error;
use crate::event::{EventType, Events};
use crate::message::Message;
use crate::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Capacity of the per-connection frame channel and of the send/recv queues
/// on buffering handlers.
pub(crate) const CHANNEL_CAPACITY: usize = 32;

/// One layer in the resilience pipeline.
///
/// A handler implements the same contract whether it owns a real socket or
/// wraps another handler, which is what makes the layers compose: keep-alive,
/// rotation and reconnect behaviors each wrap an inner handler and add their
/// own policy.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    /// Inbound flow: a message from the server arrived and no layer above
    /// consumed it.
    async fn recv(&self, m: Message);

    /// Outbound flow: queue a message towards the server.
    async fn send(&self, m: Message);

    /// Establish the connection. One-shot on decorating handlers; repeat
    /// calls are no-ops.
    async fn connect(&self, cancel: CancellationToken) -> Result<()>;

    /// Idempotent terminate. Cascades through every inner layer.
    fn close(&self);

    /// A one-shot channel closed when the handler is no longer usable.
    fn close_chan(&self) -> CloseChan;

    /// The reason for the close, or `None` if it was clean.
    fn close_err(&self) -> Option<Error>;
}

/// Routes inbound messages. In the client this wrapper decides between the
/// user callback (data frames) and the handler stack (everything else).
pub type MessageHandler =
    Arc<dyn Fn(ClientHandle, Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// User-facing lifecycle event callback. Invoked under the emitter's read
/// lock: keep it short and do not re-enter the emitter from it.
pub type EventHandler = Arc<dyn Fn(ClientHandle, EventType) + Send + Sync>;

/// Builds one layer of a handler stack bound to a client, a message routing
/// handler and the shared event emitter.
pub type ConnectionHandlerFactory =
    Arc<dyn Fn(ClientHandle, MessageHandler, Events) -> Arc<dyn ConnectionHandler> + Send + Sync>;

/// Adapts a raw [`Connection`] to the handler contract; the bottom of every
/// stack.
///
/// After `connect` it runs the reader loop feeding each inbound frame to the
/// routing message handler. `recv` is the terminal sink for control frames
/// no layer consumed.
pub struct TransportHandler {
    conn_factory: ConnectionFactory,
    client: ClientHandle,
    message_handler: MessageHandler,
    events: Events,
    conn: Mutex<Option<Arc<dyn Connection>>>,
    close: Arc<CloseSignal>,
    reason: Arc<CloseReason>,
    connected: AtomicBool,
}

impl TransportHandler {
    pub fn new(
        conn_factory: ConnectionFactory,
        client: ClientHandle,
        message_handler: MessageHandler,
        events: Events,
    ) -> Self {
        Self {
            conn_factory,
            client,
            message_handler,
            events,
            conn: Mutex::new(None),
            close: Arc::new(CloseSignal::new()),
            reason: Arc::new(CloseReason::new()),
            connected: AtomicBool::new(false),
        }
    }

    pub fn factory(conn_factory: ConnectionFactory) -> ConnectionHandlerFactory {
        Arc::new(move |client, message_handler, events| {
            Arc::new(TransportHandler::new(
                conn_factory.clone(),
                client,
                message_handler,
                events,
            ))
        })
    }
}

#[async_trait]
impl ConnectionHandler for TransportHandler {
    async fn recv(&self, m: Message) {
        trace!("unhandled inbound frame at transport layer: {m}");
    }

    async fn send(&self, m: Message) {
        let conn = self.conn.lock().clone();
        match conn {
            Some(conn) => {
                if let Err(err) = conn.write(m).await {
                    debug!("write on closed transport: {err}");
                }
            }
            None => debug!("send before connect, message dropped"),
        }
    }

    async fn connect(&self, cancel: CancellationToken) -> Result<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (frame_tx, mut frame_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let conn = (self.conn_factory)(frame_tx);
        conn.open(cancel.clone()).await?;
        *self.conn.lock() = Some(conn.clone());

        self.events.emit(EventType::Connect, EventType::Connect);

        let client = self.client.clone();
        let message_handler = self.message_handler.clone();
        let events = self.events.clone();
        let close = self.close.clone();
        let reason = self.reason.clone();

        tokio::spawn(async move {
            let mut own_close = close.chan();
            let mut conn_close = conn.close_chan();

            loop {
                tokio::select! {
                    _ = own_close.recv() => {
                        reason.set(Error::Terminated);
                        break;
                    }
                    _ = cancel.cancelled() => {
                        reason.set(Error::Terminated);
                        break;
                    }
                    _ = conn_close.recv() => {
                        reason.set(conn.close_err().unwrap_or_else(Error::closed));
                        break;
                    }
                    m = frame_rx.recv() => match m {
                        Some(m) => (message_handler)(client.clone(), m).await,
                        None => {
                            reason.set(Error::closed_with("transport frame channel closed"));
                            break;
                        }
                    }
                }
            }

            conn.close();
            close.fire();
            events.emit(EventType::Close, EventType::Close);
        });

        Ok(())
    }

    fn close(&self) {
        self.reason.set(Error::Terminated);
        if self.close.fire() {
            let conn = self.conn.lock().clone();
            if let Some(conn) = conn {
                conn.close();
            }
        }
    }

    fn close_chan(&self) -> CloseChan {
        self.close.chan()
    }

    fn close_err(&self) -> Option<Error> {
        self.reason.get()
    }
}
