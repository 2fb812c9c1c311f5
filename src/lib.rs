//! # ws-resilient
//!
//! A resilient WebSocket client core: a composable pipeline of connection
//! handlers that turns a raw, failure-prone frame transport into a
//! long-lived, self-healing message stream.
//!
//! ## Features
//!
//! - **Composable handlers** - keep-alive, scheduled rotation and backoff
//!   reconnect stack onto each other without touching the core
//! - **Backoff reconnect** with pluggable attempt-to-wait calculators and an
//!   attempt-counter reset once a connection proved healthy
//! - **Scheduled rotation** - the replacement connection is established
//!   before the old one closes, so duplicates are preferred over gaps
//! - **Passive and active keep-alive** - pong-for-ping replies and periodic
//!   pings on a timer
//! - **Typed lifecycle events** (connect / reconnect / close) fanned out
//!   through a concurrency-safe emitter
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use ws_resilient::*;
//!
//! let params = OpenConnectionParamsRepo::fixed(OpenConnectionParams::new(
//!     "wss://stream.example.com/ws".parse()?,
//! ));
//! let transport = WsConnection::factory(
//!     WebsocketConfig::default(),
//!     params,
//!     ErrorAdapters::default(),
//! );
//!
//! let stack = BackoffHandler::factory(
//!     ActiveKeepAliveHandler::factory(
//!         PassiveKeepAliveHandler::factory(
//!             TransportHandler::factory(transport),
//!             reply_ping_with_pong(),
//!         ),
//!         Duration::from_secs(20),
//!         keep_alive_message_factory(MessageKind::Ping, Vec::new),
//!     ),
//!     Arc::new(exponential_backoff),
//!     Duration::from_secs(30),
//! );
//!
//! let client = BasicClientFactory::new(
//!     stack,
//!     Arc::new(|_cli, m| Box::pin(async move { println!("{m}") })),
//!     Arc::new(|_cli, ev| println!("event: {ev:?}")),
//! )
//! .create();
//!
//! client.open(CancellationToken::new()).await?;
//! ```

mod backoff;
mod client;
mod close;
mod config;
mod connection;
mod emitter;
mod error;
mod event;
mod handler;
mod keep_alive;
mod message;
mod reopen;
mod websocket;

#[cfg(test)]
mod testing;

pub use backoff::{exponential_backoff, jittered, BackoffCalculator, BackoffHandler};
pub use client::{BasicClient, BasicClientFactory, ClientHandle};
pub use close::{CloseChan, CloseReason, CloseSignal};
pub use config::WebsocketConfig;
pub use connection::{
    Connection, ConnectionFactory, NoopConnection, OpenConnectionParams,
    OpenConnectionParamsGetter, OpenConnectionParamsRepo,
};
pub use emitter::EventEmitter;
pub use error::{Error, ErrorKind};
pub use event::{EventType, Events};
pub use handler::{
    ConnectionHandler, ConnectionHandlerFactory, EventHandler, MessageHandler, TransportHandler,
};
pub use keep_alive::{
    keep_alive_message_factory, ping_message_factory, reply_ping_with_pong,
    ActiveKeepAliveHandler, KeepAliveMessageFactory, KeepAliveResponder, PassiveKeepAliveHandler,
    PingMessageFactory,
};
pub use message::{CloseFrame, Message, MessageKind};
pub use reopen::ReopenHandler;
pub use websocket::{DialErrorAdapter, ErrorAdapters, WsConnection};

// Re-export the transport types dial-error adapters are written against
pub use tokio_tungstenite::tungstenite;

/// Result type for ws-resilient operations
pub type Result<T> = std::result::Result<T, Error>;
