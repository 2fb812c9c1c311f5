use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

type Callback<V> = Box<dyn Fn(V) + Send + Sync>;

/// A simple fan-out of typed events to registered listeners.
///
/// Listeners are invoked synchronously, in registration order, under the
/// read lock. Callbacks must therefore be short and must not call back into
/// the emitter, or `emit` and a concurrent `on` will deadlock.
pub struct EventEmitter<K, V> {
    listeners: RwLock<HashMap<K, Vec<Callback<V>>>>,
}

impl<K, V> EventEmitter<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new listener for the given event. Multiple listeners per
    /// event are permitted.
    pub fn on(&self, event: K, listener: impl Fn(V) + Send + Sync + 'static) {
        self.listeners
            .write()
            .entry(event)
            .or_default()
            .push(Box::new(listener));
    }

    /// Synchronously invoke every listener currently registered for the
    /// event; returns after the last one completes. A no-op once closed.
    pub fn emit(&self, event: K, data: V) {
        let listeners = self.listeners.read();
        let Some(callbacks) = listeners.get(&event) else {
            return;
        };

        for callback in callbacks {
            callback(data.clone());
        }
    }

    /// Drop all registrations. Emits after close are no-ops.
    pub fn close(&self) {
        self.listeners.write().clear();
    }
}

impl<K, V> Default for EventEmitter<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
