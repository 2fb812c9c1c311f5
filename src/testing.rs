//! Scripted doubles for the connection and handler contracts.

use crate::close::{CloseChan, CloseReason, CloseSignal};
use crate::connection::Connection;
use crate::emitter::EventEmitter;
use crate::error::Error;
use crate::event::Events;
use crate::handler::{ConnectionHandler, ConnectionHandlerFactory, MessageHandler};
use crate::message::Message;
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub(crate) fn noop_message_handler() -> MessageHandler {
    Arc::new(|_cli, _m| Box::pin(async {}))
}

pub(crate) fn test_events() -> Events {
    Arc::new(EventEmitter::new())
}

#[derive(Debug, Clone)]
pub(crate) enum MockEventKind {
    Connected,
    Closed,
    Sent(Message),
    Received(Message),
}

/// Shared journal of everything every mock handler instance did, in order.
#[derive(Clone, Default)]
pub(crate) struct MockLog {
    events: Arc<Mutex<Vec<(usize, MockEventKind, Instant)>>>,
}

impl MockLog {
    fn record(&self, instance: usize, kind: MockEventKind) {
        self.events.lock().push((instance, kind, Instant::now()));
    }

    pub fn events(&self) -> Vec<(usize, MockEventKind)> {
        self.events
            .lock()
            .iter()
            .map(|(instance, kind, _)| (*instance, kind.clone()))
            .collect()
    }

    /// Index of the first event of an instance matching the predicate.
    /// Panics when absent, which in a test is the failure we want.
    pub fn position(&self, instance: usize, pred: impl Fn(&MockEventKind) -> bool) -> usize {
        self.events
            .lock()
            .iter()
            .position(|(i, kind, _)| *i == instance && pred(kind))
            .unwrap_or_else(|| panic!("no matching event for instance {instance}"))
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.events
            .lock()
            .iter()
            .filter(|(_, kind, _)| matches!(kind, MockEventKind::Connected))
            .map(|(_, _, at)| *at)
            .collect()
    }

    pub fn close_times(&self) -> Vec<Instant> {
        self.events
            .lock()
            .iter()
            .filter(|(_, kind, _)| matches!(kind, MockEventKind::Closed))
            .map(|(_, _, at)| *at)
            .collect()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, kind, _)| match kind {
                MockEventKind::Sent(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn received(&self) -> Vec<Message> {
        self.events
            .lock()
            .iter()
            .filter_map(|(_, kind, _)| match kind {
                MockEventKind::Received(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn sent_before_received(&self) -> bool {
        let events = self.events.lock();
        let sent = events
            .iter()
            .position(|(_, kind, _)| matches!(kind, MockEventKind::Sent(_)));
        let received = events
            .iter()
            .position(|(_, kind, _)| matches!(kind, MockEventKind::Received(_)));
        matches!((sent, received), (Some(s), Some(r)) if s < r)
    }
}

/// What a mock handler instance does when connected.
#[derive(Clone)]
pub(crate) enum MockBehavior {
    /// `connect` fails with the given error.
    ConnectFails(Error),
    /// `connect` succeeds; optionally self-close later with a reason.
    Lives {
        until: Option<Duration>,
        reason: Option<Error>,
    },
}

impl MockBehavior {
    pub fn lives_forever() -> Self {
        MockBehavior::Lives {
            until: None,
            reason: None,
        }
    }

    pub fn lives_for(until: Duration, reason: Error) -> Self {
        MockBehavior::Lives {
            until: Some(until),
            reason: Some(reason),
        }
    }
}

pub(crate) struct MockConnectionHandler {
    instance: usize,
    behavior: MockBehavior,
    log: MockLog,
    close: Arc<CloseSignal>,
    reason: Arc<CloseReason>,
}

impl MockConnectionHandler {
    pub fn new(instance: usize, behavior: MockBehavior, log: MockLog) -> Self {
        Self {
            instance,
            behavior,
            log,
            close: Arc::new(CloseSignal::new()),
            reason: Arc::new(CloseReason::new()),
        }
    }

    /// A connected-and-healthy handler for decorator tests.
    pub fn alive(instance: usize, log: MockLog) -> Self {
        Self::new(instance, MockBehavior::lives_forever(), log)
    }
}

#[async_trait]
impl ConnectionHandler for MockConnectionHandler {
    async fn recv(&self, m: Message) {
        self.log.record(self.instance, MockEventKind::Received(m));
    }

    async fn send(&self, m: Message) {
        self.log.record(self.instance, MockEventKind::Sent(m));
    }

    async fn connect(&self, _cancel: CancellationToken) -> Result<()> {
        self.log.record(self.instance, MockEventKind::Connected);

        match &self.behavior {
            MockBehavior::ConnectFails(err) => Err(err.clone()),
            MockBehavior::Lives { until, reason } => {
                if let Some(delay) = *until {
                    let close = self.close.clone();
                    let close_reason = self.reason.clone();
                    let reason = reason.clone();
                    let log = self.log.clone();
                    let instance = self.instance;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Some(err) = reason {
                            close_reason.set(err);
                        }
                        if close.fire() {
                            log.record(instance, MockEventKind::Closed);
                        }
                    });
                }
                Ok(())
            }
        }
    }

    fn close(&self) {
        if self.close.fire() {
            self.log.record(self.instance, MockEventKind::Closed);
        }
    }

    fn close_chan(&self) -> CloseChan {
        self.close.chan()
    }

    fn close_err(&self) -> Option<Error> {
        self.reason.get()
    }
}

/// Factory over mock handlers; the behavior closure decides per instance.
pub(crate) fn mock_handler_factory(
    log: MockLog,
    behavior: impl Fn(usize) -> MockBehavior + Send + Sync + 'static,
) -> ConnectionHandlerFactory {
    let counter = Arc::new(AtomicU32::new(0));
    Arc::new(move |_client, _message_handler, _events| {
        let instance = counter.fetch_add(1, Ordering::SeqCst) as usize;
        Arc::new(MockConnectionHandler::new(
            instance,
            behavior(instance),
            log.clone(),
        ))
    })
}

/// Connection stub recording writes and allowing scripted inbound frames.
pub(crate) struct RecordingConnection {
    recv_tx: Mutex<Option<mpsc::Sender<Message>>>,
    written: Mutex<Vec<Message>>,
    opens: AtomicU32,
    close: CloseSignal,
    reason: CloseReason,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self {
            recv_tx: Mutex::new(None),
            written: Mutex::new(Vec::new()),
            opens: AtomicU32::new(0),
            close: CloseSignal::new(),
            reason: CloseReason::new(),
        }
    }

    /// Remember the frame channel the factory was handed.
    pub fn bind(&self, recv_tx: mpsc::Sender<Message>) {
        *self.recv_tx.lock() = Some(recv_tx);
    }

    /// Deliver a frame as if it arrived over the wire.
    pub async fn push_inbound(&self, m: Message) {
        let tx = self.recv_tx.lock().clone();
        tx.expect("connection not bound").send(m).await.expect("frame channel closed");
    }

    /// Simulate a transport failure.
    pub fn fail(&self, err: Error) {
        self.reason.set(err);
        self.close.fire();
    }

    pub fn written(&self) -> Vec<Message> {
        self.written.lock().clone()
    }

    pub fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for RecordingConnection {
    async fn open(&self, _cancel: CancellationToken) -> Result<()> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, m: Message) -> Result<()> {
        self.written.lock().push(m);
        Ok(())
    }

    fn close(&self) {
        self.close.fire();
    }

    fn close_chan(&self) -> CloseChan {
        self.close.chan()
    }

    fn close_err(&self) -> Option<Error> {
        self.reason.get()
    }
}
