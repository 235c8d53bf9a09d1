//! Message sinks and their revocable registrations
//!
//! The transfer worker hands every decoded chunk to the sinks registered here.
//! A registration lives until its [`Subscription`] is unsubscribed or dropped,
//! so a consumer that goes away stops receiving messages without the core
//! holding it alive.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

// ----------------------------------------------------------------------------
// Sink Trait
// ----------------------------------------------------------------------------

/// Consumer of incoming session text
///
/// Called on the transfer worker's task; implementations must not block.
pub trait MessageSink: Send + Sync + 'static {
    fn on_message(&self, text: &str);
}

impl<F> MessageSink for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn on_message(&self, text: &str) {
        self(text)
    }
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Set of currently registered sinks
#[derive(Clone, Default)]
pub struct SinkRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    sinks: DashMap<u64, Arc<dyn MessageSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink`; delivery stops once the returned handle is revoked
    pub fn subscribe(&self, sink: Arc<dyn MessageSink>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.sinks.insert(id, sink);
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `text` to every registered sink
    ///
    /// Returns how many sinks received it. With nothing registered the text is
    /// dropped. A sink that panics is unregistered and does not count.
    pub fn deliver(&self, text: &str) -> usize {
        // Snapshot first so a sink may unsubscribe from inside its callback
        let sinks: Vec<(u64, Arc<dyn MessageSink>)> = self
            .inner
            .sinks
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        if sinks.is_empty() {
            debug!("No message sink registered, dropping {} bytes", text.len());
            return 0;
        }

        let mut delivered = 0;
        for (id, sink) in sinks {
            match panic::catch_unwind(AssertUnwindSafe(|| sink.on_message(text))) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    warn!("Message sink {} panicked, unregistering it", id);
                    self.inner.sinks.remove(&id);
                }
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.inner.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sinks.is_empty()
    }
}

impl fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkRegistry")
            .field("sinks", &self.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Subscription
// ----------------------------------------------------------------------------

/// Handle to one sink registration
#[must_use = "dropping a Subscription unsubscribes the sink"]
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: std::sync::Weak<RegistryInner>,
}

impl Subscription {
    /// Revoke the registration
    pub fn unsubscribe(self) {
        // Drop does the work
    }

    /// Keep the sink registered for the registry's whole lifetime
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.sinks.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording_sink() -> (Arc<Mutex<Vec<String>>>, Arc<dyn MessageSink>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink: Arc<dyn MessageSink> = Arc::new(move |text: &str| {
            seen_clone.lock().unwrap().push(text.to_string());
        });
        (seen, sink)
    }

    #[test]
    fn test_delivery_and_unsubscribe() {
        let registry = SinkRegistry::new();
        let (seen, sink) = recording_sink();

        let subscription = registry.subscribe(sink);
        assert_eq!(registry.deliver("hello"), 1);

        subscription.unsubscribe();
        assert!(registry.is_empty());
        assert_eq!(registry.deliver("ignored"), 0);

        assert_eq!(*seen.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_drop_revokes() {
        let registry = SinkRegistry::new();
        let (_seen, sink) = recording_sink();
        {
            let _subscription = registry.subscribe(sink);
            assert_eq!(registry.len(), 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_detach_keeps_sink() {
        let registry = SinkRegistry::new();
        let (seen, sink) = recording_sink();
        registry.subscribe(sink).detach();
        assert_eq!(registry.deliver("kept"), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_subscription_outlives_registry() {
        let registry = SinkRegistry::new();
        let (_seen, sink) = recording_sink();
        let subscription = registry.subscribe(sink);
        drop(registry);
        subscription.unsubscribe();
    }

    #[test]
    fn test_panicking_sink_is_unregistered() {
        let registry = SinkRegistry::new();
        let (seen, sink) = recording_sink();
        let _kept = registry.subscribe(sink);
        let _faulty = registry.subscribe(Arc::new(|text: &str| {
            if text == "boom" {
                panic!("sink rejected {}", text);
            }
        }));

        assert_eq!(registry.deliver("boom"), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.deliver("after"), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["boom".to_string(), "after".to_string()]
        );
    }
}
