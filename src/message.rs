use std::fmt;

/// Frame kind tag carried by every [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Application text payload (JSON and friends).
    Data,
    /// Opaque bytes.
    Binary,
    Ping,
    Pong,
    /// Connection teardown; carries a numeric code plus reason bytes.
    Close,
}

impl MessageKind {
    pub fn is_data(self) -> bool {
        self == MessageKind::Data
    }

    pub fn is_binary(self) -> bool {
        self == MessageKind::Binary
    }

    pub fn is_ping(self) -> bool {
        self == MessageKind::Ping
    }

    pub fn is_pong(self) -> bool {
        self == MessageKind::Pong
    }

    pub fn is_close(self) -> bool {
        self == MessageKind::Close
    }
}

/// A single WebSocket frame as seen by the handler pipeline.
///
/// Messages are immutable once constructed and travel by value through the
/// stack. The close code is present only for `Close` frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    payload: Vec<u8>,
    close_code: Option<u16>,
}

impl Message {
    /// Build a message with an explicit kind. Useful for venues that expect
    /// keep-alives as data frames rather than protocol pings.
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Self {
            kind,
            payload,
            close_code: None,
        }
    }

    pub fn data(payload: Vec<u8>) -> Self {
        Self::new(MessageKind::Data, payload)
    }

    pub fn binary(payload: Vec<u8>) -> Self {
        Self::new(MessageKind::Binary, payload)
    }

    pub fn ping(payload: Vec<u8>) -> Self {
        Self::new(MessageKind::Ping, payload)
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Self::new(MessageKind::Pong, payload)
    }

    pub fn close(code: u16, reason: Vec<u8>) -> Self {
        Self {
            kind: MessageKind::Close,
            payload: reason,
            close_code: Some(code),
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// The close code, for `Close` frames only.
    pub fn close_code(&self) -> Option<u16> {
        self.close_code
    }

    /// View a `Close` frame as a [`CloseFrame`] error value.
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.close_code.map(|code| CloseFrame {
            code,
            reason: self.payload.clone(),
        })
    }

    pub fn is_data(&self) -> bool {
        self.kind.is_data()
    }

    pub fn is_ping(&self) -> bool {
        self.kind.is_ping()
    }

    pub fn is_pong(&self) -> bool {
        self.kind.is_pong()
    }

    pub fn is_close(&self) -> bool {
        self.kind.is_close()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.close_code {
            Some(code) => write!(
                f,
                "Message{{kind={:?},code={},data={}}}",
                self.kind,
                code,
                String::from_utf8_lossy(&self.payload)
            ),
            None => write!(
                f,
                "Message{{kind={:?},data={}}}",
                self.kind,
                String::from_utf8_lossy(&self.payload)
            ),
        }
    }
}

/// The code and reason of a close frame, usable as an error value when a
/// remote close terminates a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: Vec<u8>,
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "close frame code={} reason={}",
            self.code,
            String::from_utf8_lossy(&self.reason)
        )
    }
}

impl std::error::Error for CloseFrame {}
