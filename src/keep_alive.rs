use crate::close::CloseChan;
use crate::error::Error;
use crate::handler::{ConnectionHandler, ConnectionHandlerFactory};
use crate::message::{Message, MessageKind};
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Reply policy for the passive keep-alive layer: inspect an inbound frame
/// and optionally produce a frame to send back on the inner handler.
pub type KeepAliveResponder = Arc<dyn Fn(&Message) -> Option<Message> + Send + Sync>;

/// Default policy: answer every ping with a pong carrying the same payload.
pub fn reply_ping_with_pong() -> KeepAliveResponder {
    Arc::new(|m| m.is_ping().then(|| Message::pong(m.payload().to_vec())))
}

/// Produces the frame the active keep-alive layer sends on each tick.
pub type KeepAliveMessageFactory = Arc<dyn Fn() -> Message + Send + Sync>;

/// Keep-alive frames of a configurable kind with caller-supplied content.
/// Some venues expect keep-alives as data frames rather than protocol pings.
pub fn keep_alive_message_factory(
    kind: MessageKind,
    content: impl Fn() -> Vec<u8> + Send + Sync + 'static,
) -> KeepAliveMessageFactory {
    Arc::new(move || Message::new(kind, content()))
}

/// Builds ping-style frames of a configurable kind from a payload.
pub type PingMessageFactory = Arc<dyn Fn(Vec<u8>) -> Message + Send + Sync>;

pub fn ping_message_factory(kind: MessageKind) -> PingMessageFactory {
    Arc::new(move |payload| Message::new(kind, payload))
}

/// Replies to inbound control frames so the connection stays open; pure
/// decorator, everything else passes straight through.
pub struct PassiveKeepAliveHandler {
    inner: Arc<dyn ConnectionHandler>,
    responder: KeepAliveResponder,
}

impl PassiveKeepAliveHandler {
    pub fn new(inner: Arc<dyn ConnectionHandler>, responder: KeepAliveResponder) -> Self {
        Self { inner, responder }
    }

    pub fn factory(
        inner: ConnectionHandlerFactory,
        responder: KeepAliveResponder,
    ) -> ConnectionHandlerFactory {
        Arc::new(move |client, message_handler, events| {
            Arc::new(PassiveKeepAliveHandler::new(
                inner(client, message_handler, events),
                responder.clone(),
            ))
        })
    }
}

#[async_trait]
impl ConnectionHandler for PassiveKeepAliveHandler {
    async fn recv(&self, m: Message) {
        // the reply goes out before the frame continues down the stack
        if let Some(reply) = (self.responder)(&m) {
            self.inner.send(reply).await;
        }

        self.inner.recv(m).await;
    }

    async fn send(&self, m: Message) {
        self.inner.send(m).await;
    }

    async fn connect(&self, cancel: CancellationToken) -> Result<()> {
        self.inner.connect(cancel).await
    }

    fn close(&self) {
        self.inner.close();
    }

    fn close_chan(&self) -> CloseChan {
        self.inner.close_chan()
    }

    fn close_err(&self) -> Option<Error> {
        self.inner.close_err()
    }
}

/// Emits a keep-alive frame on a fixed cadence while the connection lives.
///
/// `connect` and `close` are one-shot; the ticker stops on close or
/// cancellation, and is never started when the inner connect failed.
pub struct ActiveKeepAliveHandler {
    inner: Arc<dyn ConnectionHandler>,
    interval: Duration,
    message_factory: KeepAliveMessageFactory,
    stop: Arc<crate::close::CloseSignal>,
    connected: AtomicBool,
}

impl ActiveKeepAliveHandler {
    pub fn new(
        inner: Arc<dyn ConnectionHandler>,
        interval: Duration,
        message_factory: KeepAliveMessageFactory,
    ) -> Self {
        Self {
            inner,
            interval,
            message_factory,
            stop: Arc::new(crate::close::CloseSignal::new()),
            connected: AtomicBool::new(false),
        }
    }

    pub fn factory(
        inner: ConnectionHandlerFactory,
        interval: Duration,
        message_factory: KeepAliveMessageFactory,
    ) -> ConnectionHandlerFactory {
        Arc::new(move |client, message_handler, events| {
            Arc::new(ActiveKeepAliveHandler::new(
                inner(client, message_handler, events),
                interval,
                message_factory.clone(),
            ))
        })
    }
}

#[async_trait]
impl ConnectionHandler for ActiveKeepAliveHandler {
    async fn recv(&self, m: Message) {
        self.inner.recv(m).await;
    }

    async fn send(&self, m: Message) {
        self.inner.send(m).await;
    }

    async fn connect(&self, cancel: CancellationToken) -> Result<()> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.inner.connect(cancel.clone()).await?;

        let inner = self.inner.clone();
        let message_factory = self.message_factory.clone();
        let mut stop = self.stop.chan();
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately; the cadence starts one
            // interval after connect
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = stop.recv() => return,
                    _ = ticker.tick() => inner.send((message_factory)()).await,
                }
            }
        });

        Ok(())
    }

    fn close(&self) {
        if self.stop.fire() {
            self.inner.close();
        }
    }

    fn close_chan(&self) -> CloseChan {
        self.inner.close_chan()
    }

    fn close_err(&self) -> Option<Error> {
        self.inner.close_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_handler_factory, MockBehavior, MockConnectionHandler, MockLog};

    #[tokio::test]
    async fn test_ping_elicits_pong_then_forwards() {
        let log = MockLog::default();
        let inner = Arc::new(MockConnectionHandler::alive(0, log.clone()));
        let handler = PassiveKeepAliveHandler::new(inner, reply_ping_with_pong());

        handler.recv(Message::ping(vec![0x01, 0x02])).await;

        assert_eq!(log.sent(), vec![Message::pong(vec![0x01, 0x02])]);
        assert_eq!(log.received(), vec![Message::ping(vec![0x01, 0x02])]);
        // the pong left before the ping was forwarded
        assert!(log.sent_before_received());
    }

    #[test]
    fn test_ping_message_factory_tags_the_kind() {
        let factory = ping_message_factory(MessageKind::Data);
        let m = factory(b"keepalive".to_vec());
        assert_eq!(m.kind(), MessageKind::Data);
        assert_eq!(m.payload(), b"keepalive");
    }

    #[tokio::test]
    async fn test_non_ping_frames_pass_through_untouched() {
        let log = MockLog::default();
        let inner = Arc::new(MockConnectionHandler::alive(0, log.clone()));
        let handler = PassiveKeepAliveHandler::new(inner, reply_ping_with_pong());

        handler.recv(Message::pong(vec![0x09])).await;
        handler.recv(Message::data(b"tick".to_vec())).await;

        assert!(log.sent().is_empty());
        assert_eq!(log.received().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_keep_alive_cadence() {
        let log = MockLog::default();
        let inner = Arc::new(MockConnectionHandler::alive(0, log.clone()));
        let handler = ActiveKeepAliveHandler::new(
            inner,
            Duration::from_millis(20),
            keep_alive_message_factory(MessageKind::Ping, Vec::new),
        );

        handler.connect(CancellationToken::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(205)).await;
        handler.close();

        let pings = log.sent().len();
        assert!(
            (9..=10).contains(&pings),
            "expected 9 or 10 pings, got {pings}"
        );

        // emission stops once closed
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(log.sent().len(), pings);
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_connect_twice_is_noop() {
        let log = MockLog::default();
        let inner = Arc::new(MockConnectionHandler::alive(0, log.clone()));
        let handler = ActiveKeepAliveHandler::new(
            inner,
            Duration::from_millis(20),
            keep_alive_message_factory(MessageKind::Ping, Vec::new),
        );

        handler.connect(CancellationToken::new()).await.unwrap();
        handler.connect(CancellationToken::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        handler.close();

        // a second ticker would have doubled the count
        assert!(log.sent().len() <= 3);
        assert_eq!(log.connect_times().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_suppressed_when_inner_connect_fails() {
        let log = MockLog::default();
        let factory = mock_handler_factory(log.clone(), |_| {
            MockBehavior::ConnectFails(Error::cannot_connect("refused"))
        });
        let handler = ActiveKeepAliveHandler::factory(
            factory,
            Duration::from_millis(20),
            keep_alive_message_factory(MessageKind::Ping, Vec::new),
        )(
            crate::client::ClientHandle::detached(),
            crate::testing::noop_message_handler(),
            crate::testing::test_events(),
        );

        assert!(handler.connect(CancellationToken::new()).await.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(log.sent().is_empty());
    }
}
