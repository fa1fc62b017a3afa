//! Loopback HTTP feed for the native update agent.
//!
//! The agent only speaks HTTP, so a downloaded artifact is exposed on an
//! ephemeral `127.0.0.1` port: `/` advertises the artifact URL, `/RELEASES`
//! serves the delta index when there is one, and the artifact itself lives
//! under a randomised path. The server closes itself once the artifact has
//! been streamed out completely.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures::Stream;
use rand::Rng;
use serde_json::json;
use tokio::fs::File;
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use updatex_types::{UpdateError, UpdateResult};

use super::plan::{CachedArtifact, RELEASES_FILE_NAME};

pub const RELEASES_ROUTE: &str = "/RELEASES";

/// Random artifact path, e.g. `/1718112233445-0042.zip`
pub fn generate_asset_path() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
    format!("/{}-{:04}.zip", millis, suffix)
}

#[derive(Clone)]
struct FeedState {
    feed_url: String,
    asset_path: String,
    artifact: PathBuf,
    releases: Option<PathBuf>,
    delivered: CancellationToken,
}

/// A running feed server
#[derive(Debug)]
pub struct FeedServerSession {
    feed_url: String,
    asset_path: String,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    delivered: CancellationToken,
    closed: CancellationToken,
}

impl FeedServerSession {
    /// Bind an ephemeral loopback port and start serving `artifact`
    pub async fn start(artifact: &CachedArtifact) -> UpdateResult<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| UpdateError::Protocol(format!("failed to bind feed server: {}", e)))?;
        let local_addr = listener.local_addr().map_err(|e| {
            UpdateError::Protocol(format!("failed to read feed server address: {}", e))
        })?;

        let feed_url = format!("http://127.0.0.1:{}", local_addr.port());
        let asset_path = generate_asset_path();
        let shutdown = CancellationToken::new();
        let delivered = CancellationToken::new();
        let closed = CancellationToken::new();

        let state = FeedState {
            feed_url: feed_url.clone(),
            asset_path: asset_path.clone(),
            artifact: artifact.artifact_path.clone(),
            releases: artifact.releases_path.clone(),
            delivered: delivered.clone(),
        };

        let mut router = Router::new()
            .route("/", get(serve_index))
            .route(&asset_path, get(serve_artifact));
        if state.releases.is_some() {
            router = router.route(RELEASES_ROUTE, get(serve_releases));
        }
        let router = router.fallback(not_found).with_state(state);

        log::info!(
            "[FeedServer] Serving {:?} at {}{}",
            artifact.artifact_path,
            feed_url,
            asset_path
        );

        let stop = {
            let shutdown = shutdown.clone();
            let delivered = delivered.clone();
            async move {
                tokio::select! {
                    _ = delivered.cancelled() => {
                        tokio::task::yield_now().await;
                        log::info!("[FeedServer] Artifact delivered, closing");
                    }
                    _ = shutdown.cancelled() => {
                        log::info!("[FeedServer] Shutdown requested");
                    }
                }
            }
        };

        let url = feed_url.clone();
        let guard = closed.clone().drop_guard();
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(stop)
                .await
            {
                log::error!("[FeedServer] Server error on {}: {}", url, e);
            }
            log::info!("[FeedServer] Feed server on {} is closed", url);
        });

        Ok(Self {
            feed_url,
            asset_path,
            local_addr,
            shutdown,
            delivered,
            closed,
        })
    }

    /// `http://127.0.0.1:<port>`, without a trailing slash
    pub fn feed_url(&self) -> &str {
        &self.feed_url
    }

    pub fn asset_path(&self) -> &str {
        &self.asset_path
    }

    pub fn asset_url(&self) -> String {
        format!("{}{}", self.feed_url, self.asset_path)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The artifact was streamed out in full at least once
    pub fn is_delivered(&self) -> bool {
        self.delivered.is_cancelled()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Stop accepting connections; in-flight responses are allowed to finish
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Resolves once the listener is gone and every connection has ended
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl Drop for FeedServerSession {
    fn drop(&mut self) {
        // the listener task outlives the handle otherwise
        self.shutdown.cancel();
    }
}

async fn serve_index(State(state): State<FeedState>) -> impl IntoResponse {
    log::debug!("[FeedServer] / requested");
    Json(json!({ "url": format!("{}{}", state.feed_url, state.asset_path) }))
}

async fn serve_releases(State(state): State<FeedState>) -> Response {
    log::debug!("[FeedServer] {} requested", RELEASES_ROUTE);
    let Some(path) = state.releases.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match open(path).await {
        Ok((file, len)) => stream_file(
            "text/plain",
            len,
            Body::from_stream(ReaderStream::new(file)),
        ),
        Err(e) => {
            log::error!("[FeedServer] Cannot open {}: {}", RELEASES_FILE_NAME, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn serve_artifact(State(state): State<FeedState>) -> Response {
    log::debug!("[FeedServer] {} requested", state.asset_path);
    match open(&state.artifact).await {
        Ok((file, len)) => {
            let stream = DeliveryStream {
                inner: ReaderStream::new(file),
                sent: 0,
                expected: len,
                delivered: state.delivered.clone(),
            };
            stream_file("application/zip", len, Body::from_stream(stream))
        }
        Err(e) => {
            log::error!("[FeedServer] Cannot open {:?}: {}", state.artifact, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn not_found(uri: Uri) -> StatusCode {
    log::warn!("[FeedServer] {} requested, but not supported", uri);
    StatusCode::NOT_FOUND
}

async fn open(path: &Path) -> std::io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let len = file.metadata().await?.len();
    Ok((file, len))
}

fn stream_file(content_type: &'static str, len: u64, body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        body,
    )
        .into_response()
}

/// Artifact body that marks the session delivered once every byte has
/// been handed to the connection.
struct DeliveryStream {
    inner: ReaderStream<File>,
    sent: u64,
    expected: u64,
    delivered: CancellationToken,
}

impl Stream for DeliveryStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
            Some(Ok(chunk)) => {
                this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Some(Err(e)) => {
                log::warn!("[FeedServer] Read error after {} bytes: {}", this.sent, e);
                Poll::Ready(Some(Err(e)))
            }
            None => Poll::Ready(None),
        }
    }
}

impl Drop for DeliveryStream {
    fn drop(&mut self) {
        // hyper may drop a body with a known length without polling it to the end
        if self.sent >= self.expected && !self.delivered.is_cancelled() {
            log::debug!("[FeedServer] Streamed {} bytes", self.sent);
            self.delivered.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    async fn wait_closed(session: &FeedServerSession) {
        tokio::time::timeout(Duration::from_secs(5), session.closed())
            .await
            .expect("feed server did not close");
    }

    #[test]
    fn test_asset_path_shape() {
        let path = generate_asset_path();
        let name = path
            .strip_prefix('/')
            .and_then(|p| p.strip_suffix(".zip"))
            .unwrap();
        let (millis, suffix) = name.split_once('-').unwrap();
        assert!(millis.parse::<u64>().is_ok());
        assert_eq!(suffix.len(), 4);
        assert!(suffix.parse::<u16>().unwrap() < 10_000);
    }

    #[tokio::test]
    async fn test_serves_index_releases_and_artifact_then_closes() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_path = dir.path().join("app-2.0.0.zip");
        let releases_path = dir.path().join("RELEASES");
        let artifact_bytes = payload(200 * 1024);
        std::fs::write(&artifact_path, &artifact_bytes).unwrap();
        std::fs::write(&releases_path, b"SHA1 app-2.0.0-full.nupkg 1234").unwrap();

        let cached = CachedArtifact::single(&artifact_path).with_releases(&releases_path);
        let session = FeedServerSession::start(&cached).await.unwrap();
        assert!(session.feed_url().starts_with("http://127.0.0.1:"));
        assert!(!session.feed_url().ends_with('/'));

        let client = reqwest::Client::new();

        let index = client.get(session.feed_url()).send().await.unwrap();
        assert_eq!(index.status(), 200);
        let body: serde_json::Value = index.json().await.unwrap();
        assert_eq!(body["url"], session.asset_url());

        let releases = client
            .get(format!("{}/RELEASES", session.feed_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(releases.status(), 200);
        assert_eq!(releases.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(releases.content_length(), Some(30));
        assert_eq!(
            releases.bytes().await.unwrap().as_ref(),
            b"SHA1 app-2.0.0-full.nupkg 1234"
        );

        let unknown = client
            .get(format!("{}/other.zip", session.feed_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), 404);
        assert!(unknown.bytes().await.unwrap().is_empty());
        assert!(!session.is_closed());

        let artifact = client
            .get(format!("{}?arch=x64", session.asset_url()))
            .send()
            .await
            .unwrap();
        assert_eq!(artifact.status(), 200);
        assert_eq!(artifact.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(artifact.content_length(), Some(artifact_bytes.len() as u64));
        assert_eq!(artifact.bytes().await.unwrap().as_ref(), &artifact_bytes[..]);

        wait_closed(&session).await;
        assert!(session.is_delivered());
        assert!(
            tokio::net::TcpStream::connect(session.local_addr())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_releases_route_absent_without_index() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_path = dir.path().join("app.zip");
        std::fs::write(&artifact_path, b"zip").unwrap();

        let session = FeedServerSession::start(&CachedArtifact::single(&artifact_path))
            .await
            .unwrap();
        let response = reqwest::get(format!("{}/RELEASES", session.feed_url()))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        session.shutdown();
        wait_closed(&session).await;
        assert!(!session.is_delivered());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_server_error() {
        let dir = tempfile::tempdir().unwrap();
        let session = FeedServerSession::start(&CachedArtifact::single(dir.path().join("gone.zip")))
            .await
            .unwrap();

        let response = reqwest::get(session.asset_url()).await.unwrap();
        assert_eq!(response.status(), 500);
        assert!(!session.is_delivered());

        session.shutdown();
        wait_closed(&session).await;
    }

    #[tokio::test]
    async fn test_dropping_session_releases_port() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_path = dir.path().join("app.zip");
        std::fs::write(&artifact_path, b"zip").unwrap();

        let session = FeedServerSession::start(&CachedArtifact::single(&artifact_path))
            .await
            .unwrap();
        let addr = session.local_addr();
        assert!(tokio::net::TcpStream::connect(addr).await.is_ok());
        drop(session);

        for _ in 0..250 {
            if tokio::net::TcpStream::connect(addr).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("feed server at {} still accepts connections after drop", addr);
    }

    #[tokio::test]
    async fn test_artifact_shrinking_mid_response_aborts_body() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_path = dir.path().join("app.zip");
        // larger than what loopback socket buffers can hold
        std::fs::write(&artifact_path, payload(32 * 1024 * 1024)).unwrap();

        let session = FeedServerSession::start(&CachedArtifact::single(&artifact_path))
            .await
            .unwrap();
        let response = reqwest::get(session.asset_url()).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.content_length(), Some(32 * 1024 * 1024));

        std::fs::OpenOptions::new()
            .write(true)
            .open(&artifact_path)
            .unwrap()
            .set_len(0)
            .unwrap();

        assert!(response.bytes().await.is_err());
        assert!(!session.is_delivered());
        assert!(!session.is_closed());

        let index = reqwest::get(session.feed_url()).await.unwrap();
        assert_eq!(index.status(), 200);
        let body: serde_json::Value = index.json().await.unwrap();
        assert_eq!(body["url"], session.asset_url());

        session.shutdown();
        wait_closed(&session).await;
        assert!(!session.is_delivered());
    }

    #[tokio::test]
    async fn test_sessions_use_distinct_ports() {
        let dir = tempfile::tempdir().unwrap();
        let artifact_path = dir.path().join("app.zip");
        std::fs::write(&artifact_path, b"zip").unwrap();
        let cached = CachedArtifact::single(&artifact_path);

        let first = FeedServerSession::start(&cached).await.unwrap();
        let second = FeedServerSession::start(&cached).await.unwrap();
        assert_ne!(first.local_addr().port(), second.local_addr().port());

        first.shutdown();
        second.shutdown();
        wait_closed(&first).await;
        wait_closed(&second).await;
    }
}
