//! Per-inbound-topic dispatch: exact-match first, then MQTT-wildcard match,
//! falling back to a default handler.
//!
//! The handler table is updated only via [`Router::register`]/
//! [`Router::unregister`]; reads use a read-optimised `RwLock` guard so
//! dispatch never contends with registration.

use super::wildcard::{is_wildcard_pattern, topic_matches};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Uniform dispatch contract every domain handler (sensor, motion, vision,
/// coder, system, default) implements.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle a received message. Implementations MUST NOT propagate errors;
    /// any failure is logged internally and swallowed so a misbehaving
    /// handler does not tear down the subscription.
    async fn handle(&self, topic: &str, payload: &[u8]);

    /// Whether this handler is willing to process `topic`.
    fn can_handle(&self, topic: &str) -> bool;

    /// The patterns this handler was registered under.
    fn supported_topics(&self) -> Vec<String>;
}

/// Selects, per inbound topic, a handler from a registered set using
/// exact-match then MQTT-wildcard match; falls back to a default handler.
pub struct Router {
    exact: RwLock<HashMap<String, Vec<Arc<dyn Handler>>>>,
    wildcard: RwLock<Vec<(String, Arc<dyn Handler>)>>,
    default_handler: RwLock<Option<Arc<dyn Handler>>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            exact: RwLock::new(HashMap::new()),
            wildcard: RwLock::new(Vec::new()),
            default_handler: RwLock::new(None),
        }
    }

    /// Register `handler` under `pattern`. Literal patterns are stored for
    /// exact-match lookup; patterns containing `+`/`#` are stored for
    /// wildcard scanning.
    pub fn register(&self, pattern: &str, handler: Arc<dyn Handler>) {
        if is_wildcard_pattern(pattern) {
            self.wildcard
                .write()
                .expect("router wildcard table poisoned")
                .push((pattern.to_string(), handler));
        } else {
            self.exact
                .write()
                .expect("router exact table poisoned")
                .entry(pattern.to_string())
                .or_default()
                .push(handler);
        }
    }

    pub fn set_default_handler(&self, handler: Arc<dyn Handler>) {
        *self.default_handler.write().expect("router default poisoned") = Some(handler);
    }

    pub fn unregister(&self, pattern: &str) {
        self.exact
            .write()
            .expect("router exact table poisoned")
            .remove(pattern);
        self.wildcard
            .write()
            .expect("router wildcard table poisoned")
            .retain(|(p, _)| p != pattern);
    }

    /// Route a received message: exact match, then wildcard match, then the
    /// default handler. Every matching handler for a topic is dispatched on
    /// its own spawned task (spec.md §5: dispatch happens on separate
    /// worker tasks so a slow handler never blocks the Bus Client's event
    /// loop from polling further events); `route` itself returns as soon as
    /// dispatch has been handed off, not when handlers finish.
    pub async fn route(&self, topic: &str, payload: &[u8]) {
        let exact_handlers = {
            let exact = self.exact.read().expect("router exact table poisoned");
            exact.get(topic).cloned()
        };

        if let Some(handlers) = exact_handlers {
            debug!(topic, count = handlers.len(), "exact-match dispatch");
            spawn_all(&handlers, topic, payload);
            return;
        }

        let wildcard_handlers: Vec<Arc<dyn Handler>> = {
            let wildcard = self.wildcard.read().expect("router wildcard table poisoned");
            wildcard
                .iter()
                .filter(|(pattern, _)| topic_matches(pattern, topic))
                .map(|(_, handler)| handler.clone())
                .collect()
        };

        if !wildcard_handlers.is_empty() {
            debug!(topic, count = wildcard_handlers.len(), "wildcard dispatch");
            spawn_all(&wildcard_handlers, topic, payload);
            return;
        }

        let default_handler = self
            .default_handler
            .read()
            .expect("router default poisoned")
            .clone();

        match default_handler {
            Some(handler) => spawn_all(std::slice::from_ref(&handler), topic, payload),
            None => warn!(topic, "no handler and no default handler registered"),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns one task per handler so dispatch to a slow handler cannot hold up
/// dispatch to the others, or the event loop that called `route`.
fn spawn_all(handlers: &[Arc<dyn Handler>], topic: &str, payload: &[u8]) {
    for handler in handlers {
        let handler = handler.clone();
        let topic = topic.to_string();
        let payload = payload.to_vec();
        tokio::spawn(async move {
            handler.handle(&topic, &payload).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
        pattern: String,
    }

    #[async_trait]
    impl Handler for CountingHandler {
        async fn handle(&self, _topic: &str, _payload: &[u8]) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }

        fn can_handle(&self, topic: &str) -> bool {
            topic_matches(&self.pattern, topic)
        }

        fn supported_topics(&self) -> Vec<String> {
            vec![self.pattern.clone()]
        }
    }

    fn counting_handler(pattern: &str) -> (Arc<dyn Handler>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler {
            calls: calls.clone(),
            pattern: pattern.to_string(),
        });
        (handler, calls)
    }

    /// `route` hands dispatch off to spawned tasks and returns before they
    /// run; give the executor a few turns to drain them before asserting.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn exact_match_wins_over_wildcard() {
        let router = Router::new();
        let (exact, exact_calls) = counting_handler("ios/v1/sensor/grating/trigger");
        let (wildcard, wildcard_calls) = counting_handler("ios/v1/sensor/+/trigger");

        router.register("ios/v1/sensor/grating/trigger", exact);
        router.register("ios/v1/sensor/+/trigger", wildcard);

        router.route("ios/v1/sensor/grating/trigger", b"{}").await;
        settle().await;

        assert_eq!(exact_calls.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wildcard_matches_when_no_exact_entry_exists() {
        let router = Router::new();
        let (wildcard, wildcard_calls) = counting_handler("ios/v1/sensor/+/trigger");
        router.register("ios/v1/sensor/+/trigger", wildcard);

        router.route("ios/v1/sensor/grating/trigger", b"{}").await;
        settle().await;

        assert_eq!(wildcard_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn default_handler_catches_unmatched_topics() {
        let router = Router::new();
        let (default, default_calls) = counting_handler("#");
        router.set_default_handler(default);

        router.route("foo/bar/baz", b"{}").await;
        settle().await;

        assert_eq!(default_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn all_handlers_registered_for_a_topic_are_invoked_concurrently() {
        let router = Router::new();
        let (first, first_calls) = counting_handler("same/topic");
        let (second, second_calls) = counting_handler("same/topic");
        router.register("same/topic", first);
        router.register("same/topic", second);

        router.route("same/topic", b"{}").await;
        settle().await;

        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregister_removes_both_exact_and_wildcard_entries() {
        let router = Router::new();
        let (exact, exact_calls) = counting_handler("a/b/c");
        router.register("a/b/c", exact);
        router.unregister("a/b/c");

        router.route("a/b/c", b"{}").await;
        assert_eq!(exact_calls.load(Ordering::SeqCst), 0);
    }
}
