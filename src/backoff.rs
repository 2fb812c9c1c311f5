use crate::client::ClientHandle;
use crate::close::{CloseChan, CloseReason, CloseSignal};
use crate::error::{Error, ErrorKind};
use crate::event::{EventType, Events};
use crate::handler::{ConnectionHandler, ConnectionHandlerFactory, MessageHandler, CHANNEL_CAPACITY};
use crate::message::Message;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Pure function from an attempt count to the wait before the next attempt.
pub type BackoffCalculator = Arc<dyn Fn(u32) -> Duration + Send + Sync>;

/// `(2^n - 1) / 2` whole seconds: 0, 0, 1, 3, 7, 15, ...
pub fn exponential_backoff(attempts: u32) -> Duration {
    let n = attempts.min(32);
    Duration::from_secs(((1u64 << n) - 1) / 2)
}

/// Full jitter over a base calculator: the wait is drawn uniformly from
/// zero to the base value, which spreads reconnect storms across a fleet.
pub fn jittered(base: impl Fn(u32) -> Duration + Send + Sync + 'static) -> BackoffCalculator {
    Arc::new(move |attempts| base(attempts).mul_f64(rand::random::<f64>()))
}

/// Spacing between attempts while the socket cannot even be established.
const CANNOT_CONNECT_RETRY: Duration = Duration::from_secs(1);

/// Repairs unexpected closes of a single inner handler with a caller-supplied
/// attempt-to-wait calculator.
///
/// The attempt counter distinguishes error classes: a connection that stayed
/// up longer than `healthy_threshold` before dying naturally resets the
/// counter, a fast failure increments it. `send` and `recv` enqueue on
/// bounded queues so callers are not coupled to the repair cycle; whatever
/// exceeds the queues blocks the caller until the loop drains again, and
/// nothing is preserved if the process dies mid-repair.
pub struct BackoffHandler {
    shared: Arc<Shared>,
    queues: Mutex<Option<(mpsc::Receiver<Message>, mpsc::Receiver<Message>)>>,
    connected: AtomicBool,
}

struct Shared {
    client: ClientHandle,
    message_handler: MessageHandler,
    events: Events,
    inner_factory: ConnectionHandlerFactory,
    calculator: BackoffCalculator,
    healthy_threshold: Duration,
    send_tx: mpsc::Sender<Message>,
    recv_tx: mpsc::Sender<Message>,
    close: CloseSignal,
    reason: CloseReason,
}

impl BackoffHandler {
    pub fn factory(
        inner: ConnectionHandlerFactory,
        calculator: BackoffCalculator,
        healthy_threshold: Duration,
    ) -> ConnectionHandlerFactory {
        Arc::new(move |client, message_handler, events| {
            let (send_tx, send_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let (recv_tx, recv_rx) = mpsc::channel(CHANNEL_CAPACITY);
            Arc::new(BackoffHandler {
                shared: Arc::new(Shared {
                    client,
                    message_handler,
                    events,
                    inner_factory: inner.clone(),
                    calculator: calculator.clone(),
                    healthy_threshold,
                    send_tx,
                    recv_tx,
                    close: CloseSignal::new(),
                    reason: CloseReason::new(),
                }),
                queues: Mutex::new(Some((send_rx, recv_rx))),
                connected: AtomicBool::new(false),
            })
        })
    }
}

impl Shared {
    /// Build and connect a fresh inner handler. Network-level failures are
    /// retried on a short fixed spacing to catch the endpoint coming back;
    /// anything else waits out the calculator. `None` once cancelled or
    /// closed.
    async fn open_inner(&self, cancel: &CancellationToken) -> Option<Arc<dyn ConnectionHandler>> {
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() || self.close.is_fired() {
                return None;
            }

            attempts += 1;

            let conn = (self.inner_factory)(
                self.client.clone(),
                self.message_handler.clone(),
                self.events.clone(),
            );

            let err = match conn.connect(cancel.clone()).await {
                Ok(()) => return Some(conn),
                Err(err) => err,
            };
            conn.close();

            let wait = if err.kind() == ErrorKind::CannotConnect {
                info!("cannot connect, reconnecting asap due to: {err}");
                CANNOT_CONNECT_RETRY
            } else {
                let wait = (self.calculator)(attempts);
                info!("cannot connect after {err}, waiting {wait:?}");
                wait
            };

            tokio::select! {
                _ = sleep(wait) => {}
                _ = cancel.cancelled() => return None,
            }
        }
    }

    async fn run(
        self: Arc<Self>,
        cancel: CancellationToken,
        mut inner: Arc<dyn ConnectionHandler>,
        mut send_rx: mpsc::Receiver<Message>,
        mut recv_rx: mpsc::Receiver<Message>,
    ) {
        let mut own_close = self.close.chan();
        let mut inner_close = inner.close_chan();
        let mut attempts: u32 = 0;
        let mut then = Instant::now();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.reason.replace(Some(Error::Terminated));
                    break;
                }
                _ = own_close.recv() => break,
                Some(m) = recv_rx.recv() => inner.recv(m).await,
                Some(m) = send_rx.recv() => inner.send(m).await,
                _ = inner_close.recv() => {
                    inner.close();
                    let cause = inner.close_err();

                    if let Some(cause) = &cause {
                        if matches!(
                            cause.kind(),
                            ErrorKind::ConnectionClosed | ErrorKind::Terminated
                        ) {
                            if then.elapsed() > self.healthy_threshold {
                                // lived long enough to count as a natural
                                // death; start the schedule over
                                attempts = 0;
                            } else {
                                attempts += 1;
                            }
                        }
                    }
                    self.reason.replace(cause.clone());

                    let wait = (self.calculator)(attempts);
                    info!(
                        "retrying to connect after {wait:?} due to {}",
                        cause.map_or_else(|| "clean close".to_owned(), |e| e.to_string())
                    );
                    tokio::select! {
                        _ = sleep(wait) => {}
                        _ = cancel.cancelled() => {
                            self.reason.replace(Some(Error::Terminated));
                            break;
                        }
                        _ = own_close.recv() => break,
                    }

                    let Some(next) = self.open_inner(&cancel).await else { break };
                    inner = next;
                    inner_close = inner.close_chan();
                    then = Instant::now();

                    let events = self.events.clone();
                    tokio::spawn(async move {
                        events.emit(EventType::Reconnect, EventType::Reconnect);
                    });
                }
            }
        }

        self.close.fire();
        inner.close();
    }
}

#[async_trait]
impl ConnectionHandler for BackoffHandler {
    async fn recv(&self, m: Message) {
        let _ = self.shared.recv_tx.send(m).await;
    }

    async fn send(&self, m: Message) {
        let _ = self.shared.send_tx.send(m).await;
    }

    async fn connect(&self, cancel: CancellationToken) -> Result<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // the first connection is synchronous; later failures are owned by
        // the repair loop
        let Some(inner) = self.shared.open_inner(&cancel).await else {
            self.shared.reason.set(Error::Terminated);
            self.shared.close.fire();
            return Err(Error::Terminated);
        };

        let (send_rx, recv_rx) = self
            .queues
            .lock()
            .take()
            .ok_or_else(|| Error::cannot_connect("handler already connected"))?;

        tokio::spawn(
            self.shared
                .clone()
                .run(cancel, inner, send_rx, recv_rx),
        );

        Ok(())
    }

    fn close(&self) {
        self.shared.close.fire();
    }

    fn close_chan(&self) -> CloseChan {
        self.shared.close.chan()
    }

    fn close_err(&self) -> Option<Error> {
        self.shared.reason.get()
    }
}
