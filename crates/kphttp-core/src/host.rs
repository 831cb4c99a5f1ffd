//! Database lifecycle around the protocol engine.
//!
//! Requests that arrive while no database is open are parked and answered
//! in arrival order as soon as one is opened. Until that backlog is empty,
//! newcomers queue behind it.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{Mutex, oneshot};
use tracing::{debug, info};

use crate::engine::ProtocolEngine;
use crate::protocol::{Request, Response};

/// A request waiting for a database.
struct Pending {
    request: Request,
    reply: oneshot::Sender<Response>,
}

#[derive(Default)]
struct HostState {
    engine: Option<Arc<ProtocolEngine>>,
    pending: VecDeque<Pending>,
    /// `open` is still answering parked requests.
    draining: bool,
}

/// Routes requests to the engine of the currently open database.
#[derive(Clone, Default)]
pub struct Host {
    state: Arc<Mutex<HostState>>,
}

impl Host {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `engine` current and answer every parked request with it,
    /// including those parked while earlier ones were being answered.
    pub async fn open(&self, engine: Arc<ProtocolEngine>) {
        let mut batch = {
            let mut state = self.state.lock().await;
            state.engine = Some(Arc::clone(&engine));
            state.draining = true;
            std::mem::take(&mut state.pending)
        };
        info!(pending = batch.len(), "database opened");

        loop {
            for item in batch {
                let response = engine.handle(&item.request).await;
                if item.reply.send(response).is_err() {
                    debug!("caller went away before its delayed response");
                }
            }

            let mut state = self.state.lock().await;
            let still_current = state
                .engine
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &engine));
            if !still_current {
                // Closed or replaced; whoever did that owns the backlog now.
                return;
            }
            if state.pending.is_empty() {
                state.draining = false;
                return;
            }
            batch = std::mem::take(&mut state.pending);
        }
    }

    /// Close the current database. Later requests are parked again.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.engine = None;
        state.draining = false;
        info!("database closed");
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.engine.is_some()
    }

    /// Number of requests waiting for a database.
    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Answer `request`, waiting for a database if none is open.
    pub async fn handle(&self, request: Request) -> Response {
        let mut state = self.state.lock().await;
        if !state.draining
            && let Some(engine) = state.engine.clone()
        {
            drop(state);
            return engine.handle(&request).await;
        }

        let (tx, rx) = oneshot::channel();
        let request_type = request.request_type.to_string();
        if state.draining {
            debug!(request_type = %request_type, "queued behind delayed requests");
        } else {
            debug!(request_type = %request_type, "no database open, request delayed");
        }
        state.pending.push_back(Pending { request, reply: tx });
        drop(state);

        rx.await.unwrap_or_else(|_| {
            let mut response = Response::new(request_type, None);
            response.error = Some("Host shut down before a database was opened".to_string());
            response
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::error::Result;
    use crate::prompt::{ApprovalPrompt, DenyAll};
    use crate::store::{Database, JsonCredentialStore};
    use crate::testing::TestClient;

    /// Prompt that holds every name question until released, then declines.
    #[derive(Default)]
    struct GatedPrompt {
        asked: Notify,
        release: Notify,
    }

    #[async_trait]
    impl ApprovalPrompt for GatedPrompt {
        async fn ask_key_name(&self, _key_display: &str) -> Result<Option<String>> {
            self.asked.notify_one();
            self.release.notified().await;
            Ok(None)
        }

        async fn ask_overwrite(&self, _existing: &str) -> Result<bool> {
            Ok(false)
        }
    }

    fn engine() -> Arc<ProtocolEngine> {
        let store = Arc::new(JsonCredentialStore::in_memory(Database::new()));
        Arc::new(ProtocolEngine::new(store, Arc::new(DenyAll)))
    }

    fn request(request_type: &str) -> Request {
        Request {
            request_type: request_type.into(),
            ..Request::default()
        }
    }

    async fn wait_for_pending(host: &Host, count: usize) {
        for _ in 0..100 {
            if host.pending_count().await == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} pending requests");
    }

    #[tokio::test]
    async fn open_host_answers_immediately() {
        let host = Host::new();
        host.open(engine()).await;
        assert!(host.is_open().await);

        let response = host.handle(request("test-associate")).await;
        assert_eq!(response.request_type, "test-associate");
        assert!(!response.success);
        assert!(response.hash.is_some());
    }

    #[tokio::test]
    async fn requests_wait_for_open_and_keep_order() {
        let host = Host::new();

        let first = tokio::spawn({
            let host = host.clone();
            async move { host.handle(request("test-associate")).await }
        });
        wait_for_pending(&host, 1).await;
        let second = tokio::spawn({
            let host = host.clone();
            async move { host.handle(request("frobnicate")).await }
        });
        wait_for_pending(&host, 2).await;

        host.open(engine()).await;
        assert_eq!(host.pending_count().await, 0);

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert_eq!(first.request_type, "test-associate");
        assert_eq!(second.error.as_deref(), Some("Unknown command: frobnicate"));
    }

    #[tokio::test]
    async fn requests_during_drain_queue_behind_parked_ones() {
        let host = Host::new();
        let client = TestClient::new("Chrome");

        let first = tokio::spawn({
            let host = host.clone();
            let request = client.associate().unwrap();
            async move { host.handle(request).await }
        });
        wait_for_pending(&host, 1).await;

        let prompt = Arc::new(GatedPrompt::default());
        let store = Arc::new(JsonCredentialStore::in_memory(Database::new()));
        let opening = tokio::spawn({
            let host = host.clone();
            let engine = Arc::new(ProtocolEngine::new(store, prompt.clone()));
            async move { host.open(engine).await }
        });
        prompt.asked.notified().await;
        assert!(host.is_open().await);

        let second = tokio::spawn({
            let host = host.clone();
            async move { host.handle(request("frobnicate")).await }
        });
        wait_for_pending(&host, 1).await;
        assert!(!second.is_finished());

        prompt.release.notify_one();
        opening.await.unwrap();
        assert_eq!(host.pending_count().await, 0);

        let first = first.await.unwrap();
        assert_eq!(first.request_type, "associate");
        assert!(!first.success);
        let second = second.await.unwrap();
        assert_eq!(second.error.as_deref(), Some("Unknown command: frobnicate"));

        // Drain finished: requests are answered directly again.
        let direct = host.handle(request("test-associate")).await;
        assert_eq!(direct.request_type, "test-associate");
    }

    #[tokio::test]
    async fn close_parks_requests_again() {
        let host = Host::new();
        host.open(engine()).await;
        host.close().await;
        assert!(!host.is_open().await);

        let waiting = tokio::spawn({
            let host = host.clone();
            async move { host.handle(request("get-logins")).await }
        });
        wait_for_pending(&host, 1).await;
        host.open(engine()).await;
        assert_eq!(waiting.await.unwrap().request_type, "get-logins");
    }
}
