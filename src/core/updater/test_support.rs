//! Local HTTP fixtures and a scripted native agent for updater tests.

use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::routing::get;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use updatex_types::{UpdateError, UpdateEvent, UpdateResult};

use super::native::{FeedRegistration, NativeAgent};

/// An axum server on an ephemeral loopback port, aborted on drop
pub(crate) struct TestServer {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TestServer {
    pub(crate) fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub(crate) async fn spawn_server(router: Router) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    TestServer { addr, task }
}

/// Serves `manifest` at `/manifest.json`
pub(crate) async fn json_server(manifest: serde_json::Value) -> TestServer {
    spawn_server(Router::new().route(
        "/manifest.json",
        get(move || {
            let manifest = manifest.clone();
            async move { Json(manifest) }
        }),
    ))
    .await
}

/// A body that sends `prefix` and then never produces another byte
pub(crate) fn stalling_body(prefix: &'static [u8]) -> Body {
    let head =
        futures::stream::once(async move { Ok::<_, std::io::Error>(Bytes::from_static(prefix)) });
    Body::from_stream(head.chain(futures::stream::pending()))
}

/// Everything published so far
pub(crate) fn drain_events(rx: &mut mpsc::UnboundedReceiver<UpdateEvent>) -> Vec<UpdateEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Native agent that records calls and never reports on its own
#[derive(Default)]
pub(crate) struct MockAgent {
    pub(crate) registrations: Mutex<Vec<FeedRegistration>>,
    pub(crate) checks: AtomicUsize,
    pub(crate) installs: AtomicUsize,
    pub(crate) reject_feed: AtomicBool,
}

impl MockAgent {
    pub(crate) fn last_feed(&self) -> Option<FeedRegistration> {
        self.registrations.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl NativeAgent for MockAgent {
    async fn register_feed(&self, feed: &FeedRegistration) -> UpdateResult<()> {
        if self.reject_feed.load(Ordering::SeqCst) {
            return Err(UpdateError::Protocol("feed rejected".to_string()));
        }
        self.registrations.lock().unwrap().push(feed.clone());
        Ok(())
    }

    async fn start_check(&self) -> UpdateResult<()> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn quit_and_install(&self) -> UpdateResult<()> {
        self.installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
