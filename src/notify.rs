//! Client notification capability for auth-required archive sources.
//!
//! When a store signals that a source needs credentials, the dispatcher tells
//! every open client viewing that source, then degrades the request to a
//! normal not-found page. How "tell every open client" works is host-runtime
//! specific (service-worker postMessage, SSE, …), so it is a capability
//! supplied by the embedding application.

use async_trait::async_trait;

/// Notify clients that are awaiting authentication for a given source.
#[async_trait]
pub trait AuthNotifier: Send + Sync {
    /// Called once per auth-required store failure. Implementations should
    /// reach every client whose view matches `source_url`. Failures must be
    /// handled internally; the replay path does not depend on delivery.
    async fn notify_auth_needed(&self, source_url: &str, collection: &str);
}

/// Default notifier: logs and drops the event.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl AuthNotifier for LogNotifier {
    async fn notify_auth_needed(&self, source_url: &str, collection: &str) {
        tracing::warn!(
            source = %source_url,
            collection = %collection,
            "source requires authentication; no client transport configured"
        );
    }
}
