use crate::close::{CloseChan, CloseSignal};
use crate::error::Error;
use crate::event::EventType;
use crate::handler::{ConnectionHandler, ConnectionHandlerFactory, EventHandler, MessageHandler};
use crate::message::Message;
use crate::Result;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A client with a single composed handler stack.
///
/// Only data frames reach the message callback; ping, pong and close frames
/// are routed back into the handler stack so the control-frame policy layers
/// can act on them. Opened at most once; `send` outside the open window is
/// silently dropped.
pub struct BasicClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    handler_factory: ConnectionHandlerFactory,
    message_handler: MessageHandler,
    event_handler: EventHandler,
    emitter: crate::event::Events,
    handler: RwLock<Option<Arc<dyn ConnectionHandler>>>,
    close: CloseSignal,
    opened: AtomicBool,
}

impl ClientInner {
    async fn send(&self, m: Message) {
        if self.close.is_fired() {
            debug!("send on closed client, message dropped");
            return;
        }

        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler.send(m).await,
            None => debug!("send before open, message dropped"),
        }
    }

    fn close_all(&self) {
        if self.close.fire() {
            self.emitter.close();
            let handler = self.handler.read().clone();
            if let Some(handler) = handler {
                handler.close();
            }
        }
    }
}

/// Non-owning reference to a client, handed to message and event callbacks
/// so they can reply or shut the client down. Outliving the client is fine;
/// calls on a dead handle are no-ops.
#[derive(Clone)]
pub struct ClientHandle {
    inner: Weak<ClientInner>,
}

impl ClientHandle {
    pub async fn send(&self, m: Message) {
        if let Some(inner) = self.inner.upgrade() {
            inner.send(m).await;
        }
    }

    pub fn close(&self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.close_all();
        }
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        Self { inner: Weak::new() }
    }
}

impl BasicClient {
    pub fn new(
        handler_factory: ConnectionHandlerFactory,
        message_handler: MessageHandler,
        event_handler: EventHandler,
    ) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                handler_factory,
                message_handler,
                event_handler,
                emitter: Arc::new(crate::emitter::EventEmitter::new()),
                handler: RwLock::new(None),
                close: CloseSignal::new(),
                opened: AtomicBool::new(false),
            }),
        }
    }

    pub fn handle(&self) -> ClientHandle {
        ClientHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Build the handler stack and establish the connection. At most one
    /// open per client; repeat calls are no-ops.
    pub async fn open(&self, cancel: CancellationToken) -> Result<()> {
        if self.inner.opened.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let handle = self.handle();

        // data frames go to the user, everything else back down the stack
        let user = self.inner.message_handler.clone();
        let client_ref = Arc::downgrade(&self.inner);
        let wrapper: MessageHandler = Arc::new(move |client, m| {
            let user = user.clone();
            let client_ref = client_ref.clone();
            Box::pin(async move {
                if m.is_data() {
                    user(client, m).await;
                    return;
                }
                let Some(inner) = client_ref.upgrade() else {
                    return;
                };
                let handler = inner.handler.read().clone();
                if let Some(handler) = handler {
                    handler.recv(m).await;
                }
            })
        });

        let handler =
            (self.inner.handler_factory)(handle.clone(), wrapper, self.inner.emitter.clone());
        *self.inner.handler.write() = Some(handler.clone());

        for event in [EventType::Connect, EventType::Reconnect, EventType::Close] {
            let callback = self.inner.event_handler.clone();
            let handle = handle.clone();
            self.inner.emitter.on(event, move |ev| callback(handle.clone(), ev));
        }

        handler.connect(cancel).await?;

        // a terminal close anywhere in the stack closes the client
        let inner = self.inner.clone();
        let mut handler_close = handler.close_chan();
        tokio::spawn(async move {
            handler_close.recv().await;
            inner.close.fire();
        });

        Ok(())
    }

    /// Queue a message for the server. Dropped silently before open or
    /// after close.
    pub async fn send(&self, m: Message) {
        self.inner.send(m).await;
    }

    /// Idempotent: drops all event listeners, then closes the handler stack.
    pub fn close(&self) {
        self.inner.close_all();
    }

    /// A one-shot channel closed when the client terminates.
    pub fn close_chan(&self) -> CloseChan {
        self.inner.close.chan()
    }

    /// The close-reason reported by the handler stack, if any.
    pub fn close_err(&self) -> Option<Error> {
        let handler = self.inner.handler.read().clone();
        handler.and_then(|h| h.close_err())
    }
}

/// Produces ready-to-open clients bound to one handler stack and one pair of
/// user callbacks.
pub struct BasicClientFactory {
    handler_factory: ConnectionHandlerFactory,
    message_handler: MessageHandler,
    event_handler: EventHandler,
}

impl BasicClientFactory {
    pub fn new(
        handler_factory: ConnectionHandlerFactory,
        message_handler: MessageHandler,
        event_handler: EventHandler,
    ) -> Self {
        Self {
            handler_factory,
            message_handler,
            event_handler,
        }
    }

    pub fn create(&self) -> BasicClient {
        BasicClient::new(
            self.handler_factory.clone(),
            self.message_handler.clone(),
            self.event_handler.clone(),
        )
    }
}
