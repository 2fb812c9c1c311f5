use thiserror::Error;
use url::Url;

/// Categorizes errors for reconnect decision-making.
///
/// This is a lightweight, copyable representation of the error class used by
/// the repair loops, which care about the class rather than the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The live connection ended (remote close or I/O failure).
    ConnectionClosed,
    /// Dial or handshake never established the socket.
    CannotConnect,
    /// Local shutdown or cancellation tore the connection down.
    Terminated,
    /// The server rejected the dial with HTTP 429.
    RateLimit,
    /// Fatal; reconnect layers must not retry.
    Unrecoverable,
}

/// Errors surfaced by connections, handlers and clients.
///
/// Details are captured as strings so a close-reason can be cloned out of a
/// handler repeatedly via `close_err`.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The live connection ended.
    #[error("connection has been closed{}", detail_suffix(.0))]
    ConnectionClosed(Option<String>),

    /// The connection could not be established.
    #[error("connection cannot be established: {0}")]
    CannotConnect(String),

    /// Local close or cancellation initiated the teardown.
    #[error("terminated by local shutdown")]
    Terminated,

    /// The dial was rejected with HTTP 429. Carries the response body for
    /// diagnostics; the repair loops treat it like any other dial failure.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// A failure callers treat as fatal. The library exposes the type but
    /// never triggers on it; integrators classify dial errors into it via
    /// the dial-error adapter hook.
    #[error("unrecoverable connection error: {source} to {url}")]
    Unrecoverable {
        #[source]
        source: Box<Error>,
        url: Box<Url>,
    },
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) => format!(": {d}"),
        None => String::new(),
    }
}

impl Error {
    /// Get the class of this error for decision-making.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ConnectionClosed(_) => ErrorKind::ConnectionClosed,
            Error::CannotConnect(_) => ErrorKind::CannotConnect,
            Error::Terminated => ErrorKind::Terminated,
            Error::RateLimit(_) => ErrorKind::RateLimit,
            Error::Unrecoverable { .. } => ErrorKind::Unrecoverable,
        }
    }

    pub fn closed() -> Self {
        Error::ConnectionClosed(None)
    }

    pub fn closed_with(detail: impl Into<String>) -> Self {
        Error::ConnectionClosed(Some(detail.into()))
    }

    pub fn cannot_connect(detail: impl Into<String>) -> Self {
        Error::CannotConnect(detail.into())
    }

    /// Wrap an error as unrecoverable, tagging the endpoint it happened on.
    pub fn unrecoverable(source: Error, url: Url) -> Self {
        Error::Unrecoverable {
            source: Box::new(source),
            url: Box::new(url),
        }
    }
}
