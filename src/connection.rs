use crate::close::{CloseChan, CloseSignal};
use crate::error::Error;
use crate::message::Message;
use crate::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use http::HeaderMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;
use url::Url;

/// Raw full-duplex frame transport: one live socket with open, write and
/// close plus a close-signal for observers.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Establish the socket. Blocks until it is up or the dial failed.
    async fn open(&self, cancel: CancellationToken) -> Result<()>;

    /// Enqueue one frame for transmission.
    async fn write(&self, m: Message) -> Result<()>;

    /// Idempotent terminate.
    fn close(&self);

    /// A one-shot channel closed on termination.
    fn close_chan(&self) -> CloseChan;

    /// The reason for termination, or `None` if the close was clean.
    fn close_err(&self) -> Option<Error>;
}

/// Builds a transport bound to the channel every inbound frame is pushed
/// onto. Control frames (ping, pong, close) are surfaced through the same
/// channel, not swallowed: the handler stack, not the transport, decides
/// policy.
pub type ConnectionFactory =
    Arc<dyn Fn(mpsc::Sender<Message>) -> Arc<dyn Connection> + Send + Sync>;

/// Parameters for one dial attempt.
#[derive(Debug, Clone)]
pub struct OpenConnectionParams {
    pub url: Url,
    pub headers: HeaderMap,
}

impl OpenConnectionParams {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
        }
    }

    pub fn with_headers(url: Url, headers: HeaderMap) -> Self {
        Self { url, headers }
    }
}

/// Produces dial parameters on demand. Parameters may rotate between
/// attempts, signed URLs being the usual case.
pub type OpenConnectionParamsGetter =
    Arc<dyn Fn() -> BoxFuture<'static, Result<OpenConnectionParams>> + Send + Sync>;

/// Fetches dial parameters per connect attempt and logs fetch failures,
/// otherwise transparent.
#[derive(Clone)]
pub struct OpenConnectionParamsRepo {
    getter: OpenConnectionParamsGetter,
}

impl OpenConnectionParamsRepo {
    pub fn new(getter: OpenConnectionParamsGetter) -> Self {
        Self { getter }
    }

    /// Repo over parameters that never change.
    pub fn fixed(params: OpenConnectionParams) -> Self {
        Self::new(Arc::new(move || {
            let params = params.clone();
            Box::pin(async move { Ok(params) })
        }))
    }

    pub async fn get(&self) -> Result<OpenConnectionParams> {
        match (self.getter)().await {
            Ok(params) => Ok(params),
            Err(err) => {
                error!("cannot fetch open connection params: {err}");
                Err(err)
            }
        }
    }
}

/// Transport that accepts every write and never delivers anything. Handy
/// for stubbing out the socket in integrations and tests.
#[derive(Default)]
pub struct NoopConnection {
    close: CloseSignal,
}

impl NoopConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn factory() -> ConnectionFactory {
        Arc::new(|_recv_tx| Arc::new(NoopConnection::new()))
    }
}

#[async_trait]
impl Connection for NoopConnection {
    async fn open(&self, _cancel: CancellationToken) -> Result<()> {
        Ok(())
    }

    async fn write(&self, _m: Message) -> Result<()> {
        Ok(())
    }

    fn close(&self) {
        self.close.fire();
    }

    fn close_chan(&self) -> CloseChan {
        self.close.chan()
    }

    fn close_err(&self) -> Option<Error> {
        None
    }
}
