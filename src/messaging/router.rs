//! # Message Router
//!
//! In-process demultiplexer mapping an inbound topic to zero or more
//! handlers. Selection order is exact match, then MQTT wildcard match
//! (`+` for exactly one segment, `#` for trailing segments), then the
//! default handler.
//!
//! Handler dispatch never tears down a subscription: handlers must not
//! propagate errors, and anything they miss is logged and swallowed here.
//! The handler table uses a read-optimised guard so dispatch does not
//! contend with registration.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Uniform dispatch contract implemented by every per-domain handler.
///
/// `handle` must not panic or propagate; implementations log their own
/// failures. `can_handle`/`supported_topics` let the wiring layer derive
/// the subscription set from the handler set.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one inbound message.
    async fn handle(&self, topic: &str, payload: &[u8]);

    /// Whether this handler wants the given concrete topic.
    fn can_handle(&self, topic: &str) -> bool {
        self.supported_topics()
            .iter()
            .any(|pattern| topic_matches(pattern, topic))
    }

    /// The topic patterns this handler serves.
    fn supported_topics(&self) -> Vec<String>;

    /// Handler name for logs.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Dispatch counters for monitoring.
#[derive(Debug, Default)]
pub struct RouterStatistics {
    pub exact_matches: u64,
    pub wildcard_matches: u64,
    pub default_dispatches: u64,
}

/// Per-topic handler demultiplexer.
pub struct Router {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn MessageHandler>>>>,
    default_handler: RwLock<Option<Arc<dyn MessageHandler>>>,
    exact_matches: AtomicU64,
    wildcard_matches: AtomicU64,
    default_dispatches: AtomicU64,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            default_handler: RwLock::new(None),
            exact_matches: AtomicU64::new(0),
            wildcard_matches: AtomicU64::new(0),
            default_dispatches: AtomicU64::new(0),
        }
    }

    /// Register a handler under a topic pattern. Multiple handlers may
    /// share a pattern; all of them are invoked on a match.
    pub async fn register(&self, pattern: &str, handler: Arc<dyn MessageHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers
            .entry(pattern.to_string())
            .or_default()
            .push(handler);
        debug!(pattern, "handler registered");
    }

    /// Register a handler under every pattern it reports.
    pub async fn register_handler(&self, handler: Arc<dyn MessageHandler>) {
        for pattern in handler.supported_topics() {
            self.register(&pattern, Arc::clone(&handler)).await;
        }
    }

    /// Remove every handler registered under a pattern; returns whether
    /// the pattern was present.
    pub async fn unregister(&self, pattern: &str) -> bool {
        let mut handlers = self.handlers.write().await;
        handlers.remove(pattern).is_some()
    }

    /// Install the catch-all handler invoked when nothing matches.
    pub async fn set_default_handler(&self, handler: Arc<dyn MessageHandler>) {
        let mut slot = self.default_handler.write().await;
        *slot = Some(handler);
    }

    /// Patterns currently registered.
    pub async fn registered_patterns(&self) -> Vec<String> {
        let handlers = self.handlers.read().await;
        handlers.keys().cloned().collect()
    }

    /// Dispatch one inbound message to its handlers.
    ///
    /// All matching handlers run concurrently; this call returns when the
    /// last of them finishes. Callers that must not block reception spawn
    /// this onto its own task.
    pub async fn route(&self, topic: &str, payload: &[u8]) {
        let selected = self.select_handlers(topic).await;

        match selected {
            Selection::Matched(handlers) => {
                let futures = handlers
                    .iter()
                    .map(|handler| handler.handle(topic, payload));
                join_all(futures).await;
            }
            Selection::Default(handler) => {
                handler.handle(topic, payload).await;
            }
            Selection::None => {
                warn!(topic, payload_len = payload.len(), "no handler for topic");
            }
        }
    }

    async fn select_handlers(&self, topic: &str) -> Selection {
        let handlers = self.handlers.read().await;

        if let Some(exact) = handlers.get(topic) {
            if !exact.is_empty() {
                self.exact_matches.fetch_add(1, Ordering::Relaxed);
                return Selection::Matched(exact.clone());
            }
        }

        let mut matched: Vec<Arc<dyn MessageHandler>> = Vec::new();
        for (pattern, registered) in handlers.iter() {
            if (pattern.contains('+') || pattern.contains('#'))
                && topic_matches(pattern, topic)
            {
                matched.extend(registered.iter().cloned());
            }
        }
        drop(handlers);

        if !matched.is_empty() {
            self.wildcard_matches.fetch_add(1, Ordering::Relaxed);
            return Selection::Matched(matched);
        }

        let default = self.default_handler.read().await;
        if let Some(handler) = default.as_ref() {
            self.default_dispatches.fetch_add(1, Ordering::Relaxed);
            return Selection::Default(Arc::clone(handler));
        }
        Selection::None
    }

    /// Snapshot of the dispatch counters.
    pub fn statistics(&self) -> RouterStatistics {
        RouterStatistics {
            exact_matches: self.exact_matches.load(Ordering::Relaxed),
            wildcard_matches: self.wildcard_matches.load(Ordering::Relaxed),
            default_dispatches: self.default_dispatches.load(Ordering::Relaxed),
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

enum Selection {
    Matched(Vec<Arc<dyn MessageHandler>>),
    Default(Arc<dyn MessageHandler>),
    None,
}

/// MQTT wildcard topic matching.
///
/// `+` matches exactly one path segment; `#` matches zero or more trailing
/// segments and is only honoured as the final segment of the pattern.
/// Patterns without wildcards match only by string equality.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if !pattern.contains('+') && !pattern.contains('#') {
        return pattern == topic;
    }

    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let topic_segments: Vec<&str> = topic.split('/').collect();

    for (index, pattern_segment) in pattern_segments.iter().enumerate() {
        match *pattern_segment {
            "#" => {
                // Only valid as the final segment.
                return index == pattern_segments.len() - 1;
            }
            "+" => {
                if index >= topic_segments.len() {
                    return false;
                }
            }
            literal => {
                if topic_segments.get(index) != Some(&literal) {
                    return false;
                }
            }
        }
    }

    pattern_segments.len() == topic_segments.len()
}
