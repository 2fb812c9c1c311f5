use crate::close::{CloseChan, CloseReason, CloseSignal};
use crate::config::WebsocketConfig;
use crate::connection::{Connection, ConnectionFactory, OpenConnectionParamsRepo};
use crate::error::Error;
use crate::handler::CHANNEL_CAPACITY;
use crate::message::{Message, MessageKind};
use crate::Result;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::{
    connect_async, tungstenite::client::IntoClientRequest,
    tungstenite::protocol::frame::coding::CloseCode, tungstenite::protocol::CloseFrame as WsCloseFrame,
    tungstenite::Error as WsError, tungstenite::Message as WsMessage, MaybeTlsStream,
    WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Type alias for the underlying WebSocket stream
type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;

/// Classifies a dial failure before it reaches the reconnect loops.
/// Replaces the default classification entirely when installed.
pub type DialErrorAdapter = Arc<dyn Fn(WsError) -> Error + Send + Sync>;

/// Integration hooks for error classification.
#[derive(Clone, Default)]
pub struct ErrorAdapters {
    /// Classify dial errors (custom rate-limit codes, auth failures, ...).
    pub on_dial: Option<DialErrorAdapter>,
}

/// A WebSocket transport over tokio-tungstenite.
///
/// `open` dials and then runs one reader and one writer task; every inbound
/// frame, control frames included, is forwarded to the receive channel the
/// connection was built with.
pub struct WsConnection {
    config: WebsocketConfig,
    params: OpenConnectionParamsRepo,
    adapters: ErrorAdapters,
    recv_tx: mpsc::Sender<Message>,
    send_tx: mpsc::Sender<Message>,
    send_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    close: Arc<CloseSignal>,
    reason: Arc<CloseReason>,
}

impl WsConnection {
    pub fn new(
        config: WebsocketConfig,
        params: OpenConnectionParamsRepo,
        adapters: ErrorAdapters,
        recv_tx: mpsc::Sender<Message>,
    ) -> Self {
        let (send_tx, send_rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self {
            config,
            params,
            adapters,
            recv_tx,
            send_tx,
            send_rx: Mutex::new(Some(send_rx)),
            close: Arc::new(CloseSignal::new()),
            reason: Arc::new(CloseReason::new()),
        }
    }

    pub fn factory(
        config: WebsocketConfig,
        params: OpenConnectionParamsRepo,
        adapters: ErrorAdapters,
    ) -> ConnectionFactory {
        Arc::new(move |recv_tx| {
            Arc::new(WsConnection::new(
                config.clone(),
                params.clone(),
                adapters.clone(),
                recv_tx,
            ))
        })
    }

    fn dial_error(&self, err: WsError) -> Error {
        match &self.adapters.on_dial {
            Some(adapter) => adapter(err),
            None => classify_dial_error(err),
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn open(&self, cancel: CancellationToken) -> Result<()> {
        let send_rx = self
            .send_rx
            .lock()
            .take()
            .ok_or_else(|| Error::cannot_connect("connection already opened"))?;

        let params = self.params.get().await?;

        let mut request = params
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::cannot_connect(format!("invalid request: {e}")))?;
        for (name, value) in params.headers.iter() {
            request.headers_mut().insert(name, value.clone());
        }

        let stream = match timeout(self.config.connect_timeout, connect_async(request)).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(err)) => {
                let err = self.dial_error(err);
                error!("connection err to {}: {err}", params.url);
                return Err(err);
            }
            Err(_) => {
                return Err(Error::cannot_connect(format!(
                    "dial timeout after {:?}",
                    self.config.connect_timeout
                )))
            }
        };

        debug!("success opening connection to {}", params.url);

        let (write, read) = stream.split();

        tokio::spawn(read_loop(
            read,
            self.recv_tx.clone(),
            self.close.clone(),
            self.reason.clone(),
            cancel.clone(),
        ));
        tokio::spawn(write_loop(
            write,
            send_rx,
            self.close.clone(),
            self.reason.clone(),
            cancel,
            self.config.write_timeout,
        ));

        Ok(())
    }

    async fn write(&self, m: Message) -> Result<()> {
        self.send_tx.send(m).await.map_err(|_| Error::closed())
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

async fn read_loop(
    mut read: WsSource,
    recv_tx: mpsc::Sender<Message>,
    close: Arc<CloseSignal>,
    reason: Arc<CloseReason>,
    cancel: CancellationToken,
) {
    let mut close_chan = close.chan();

    loop {
        tokio::select! {
            _ = close_chan.recv() => {
                reason.set(Error::Terminated);
                break;
            }
            _ = cancel.cancelled() => {
                reason.set(Error::Terminated);
                break;
            }
            frame = read.next() => match frame {
                Some(Ok(frame)) => {
                    let msg = match frame {
                        WsMessage::Text(text) => {
                            trace!("<= [DATA] {text}");
                            Message::data(text.into_bytes())
                        }
                        WsMessage::Binary(bytes) => {
                            trace!("<= [BIN] {} bytes", bytes.len());
                            Message::binary(bytes)
                        }
                        WsMessage::Ping(bytes) => {
                            trace!("<= [PING]");
                            Message::ping(bytes)
                        }
                        WsMessage::Pong(bytes) => {
                            trace!("<= [PONG]");
                            Message::pong(bytes)
                        }
                        WsMessage::Close(frame) => {
                            trace!("<= [CLOSE]");
                            match frame {
                                Some(frame) => Message::close(
                                    frame.code.into(),
                                    frame.reason.into_owned().into_bytes(),
                                ),
                                // 1005: closed without a status code
                                None => Message::close(1005, Vec::new()),
                            }
                        }
                        WsMessage::Frame(_) => continue,
                    };

                    if recv_tx.send(msg).await.is_err() {
                        reason.set(Error::Terminated);
                        break;
                    }
                }
                Some(Err(err)) => {
                    error!("error occurred on websocket read: {err}");
                    reason.set(Error::closed_with(format!("websocket read: {err}")));
                    break;
                }
                None => {
                    reason.set(Error::closed_with("websocket stream ended"));
                    break;
                }
            }
        }
    }

    close.fire();
}

async fn write_loop(
    mut write: WsSink,
    mut send_rx: mpsc::Receiver<Message>,
    close: Arc<CloseSignal>,
    reason: Arc<CloseReason>,
    cancel: CancellationToken,
    write_timeout: Duration,
) {
    let mut close_chan = close.chan();

    loop {
        tokio::select! {
            _ = close_chan.recv() => {
                info!("closing connection from our side");
                let _ = write.send(WsMessage::Close(None)).await;
                reason.set(Error::Terminated);
                break;
            }
            _ = cancel.cancelled() => {
                let _ = write.send(WsMessage::Close(None)).await;
                reason.set(Error::Terminated);
                break;
            }
            msg = send_rx.recv() => {
                let Some(msg) = msg else {
                    // every handle to this connection is gone
                    let _ = write.send(WsMessage::Close(None)).await;
                    reason.set(Error::Terminated);
                    break;
                };

                if let Some(err) = write_frame(&mut write, msg, write_timeout).await {
                    // the reader will observe the dead socket and finish the
                    // teardown; keep draining until then
                    warn!("websocket write failed: {err}");
                    reason.set(err);
                }
            }
        }
    }

    close.fire();
}

async fn write_frame(write: &mut WsSink, msg: Message, write_timeout: Duration) -> Option<Error> {
    let kind = msg.kind();
    let frame = match kind {
        MessageKind::Ping => {
            trace!("=> [PING]");
            WsMessage::Ping(msg.into_payload())
        }
        MessageKind::Pong => {
            trace!("=> [PONG]");
            WsMessage::Pong(msg.into_payload())
        }
        MessageKind::Binary => WsMessage::Binary(msg.into_payload()),
        MessageKind::Data => {
            debug!("=> [DATA] {}", String::from_utf8_lossy(msg.payload()));
            WsMessage::Text(String::from_utf8_lossy(msg.payload()).into_owned())
        }
        MessageKind::Close => {
            let code = msg.close_code().unwrap_or(1000);
            WsMessage::Close(Some(WsCloseFrame {
                code: CloseCode::from(code),
                reason: String::from_utf8_lossy(msg.payload()).into_owned().into(),
            }))
        }
    };

    match timeout(write_timeout, write.send(frame)).await {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(classify_write_error(err)),
        // ping is best-effort; a slow control write is not worth a teardown
        Err(_) if kind.is_ping() => {
            debug!("ping write deadline exceeded, frame dropped");
            None
        }
        Err(_) => Some(Error::closed_with("write deadline exceeded")),
    }
}

fn classify_write_error(err: WsError) -> Error {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => Error::closed(),
        other => Error::closed_with(other.to_string()),
    }
}

fn classify_dial_error(err: WsError) -> Error {
    if let WsError::Http(response) = &err {
        let body = response
            .body()
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default();
        if response.status() == http::StatusCode::TOO_MANY_REQUESTS {
            return Error::RateLimit(body);
        }
    }

    Error::cannot_connect(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn http_error(status: u16, body: &str) -> WsError {
        let response = http::Response::builder()
            .status(status)
            .body(Some(body.as_bytes().to_vec()))
            .unwrap();
        WsError::Http(response)
    }

    #[test]
    fn test_dial_429_maps_to_rate_limit() {
        let err = classify_dial_error(http_error(429, "slow down"));
        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert!(err.to_string().contains("slow down"));
    }

    #[test]
    fn test_dial_other_http_maps_to_cannot_connect() {
        let err = classify_dial_error(http_error(503, "maintenance"));
        assert_eq!(err.kind(), ErrorKind::CannotConnect);
    }

    #[test]
    fn test_dial_network_error_maps_to_cannot_connect() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = classify_dial_error(WsError::Io(io));
        assert_eq!(err.kind(), ErrorKind::CannotConnect);
        assert!(err.to_string().contains("refused"));
    }

    #[test]
    fn test_write_error_classification() {
        assert!(matches!(
            classify_write_error(WsError::ConnectionClosed),
            Error::ConnectionClosed(None)
        ));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(
            classify_write_error(WsError::Io(io)),
            Error::ConnectionClosed(Some(_))
        ));
    }

    #[tokio::test]
    async fn test_dial_adapter_overrides_classification() {
        let recv = mpsc::channel(1).0;
        let adapters = ErrorAdapters {
            on_dial: Some(Arc::new(|err| {
                Error::unrecoverable(
                    Error::cannot_connect(err.to_string()),
                    "wss://stream.example.com/ws".parse().unwrap(),
                )
            })),
        };
        let conn = WsConnection::new(
            WebsocketConfig::default(),
            OpenConnectionParamsRepo::fixed(crate::connection::OpenConnectionParams::new(
                "wss://stream.example.com/ws".parse().unwrap(),
            )),
            adapters,
            recv,
        );

        let err = conn.dial_error(http_error(401, "unauthorized"));
        assert_eq!(err.kind(), ErrorKind::Unrecoverable);
    }
}
