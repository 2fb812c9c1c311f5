use crate::emitter::EventEmitter;
use std::sync::Arc;

/// Lifecycle notifications bridged from the handler stack to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A connection came up for the first time on this handler stack.
    Connect,
    /// A repair loop replaced a dead connection with a live one.
    Reconnect,
    /// The stack reached a terminal close.
    Close,
}

/// Emitter shared by a client and every layer of its handler stack. Its
/// lifetime is the client's.
pub type Events = Arc<EventEmitter<EventType, EventType>>;
