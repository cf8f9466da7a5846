//! Shared setup for HTTP integration tests.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use blockctl_api::{run_revert_worker, ApiConfig, ChannelDispatcher, NoopExecutor, VolumeApi};
use blockctl_core::model::{Snapshot, Volume, VolumeStatus};
use blockctl_core::MemoryStore;

/// A router wired to a live revert worker, plus the store behind it.
pub struct TestServer {
    pub store: Arc<MemoryStore>,
    pub router: Router,
}

impl TestServer {
    pub fn start(config: ApiConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let (dispatcher, jobs) = ChannelDispatcher::channel(config.revert_queue_depth);
        tokio::spawn(run_revert_worker(store.clone(), Arc::new(NoopExecutor), jobs));
        let api = Arc::new(VolumeApi::new(store.clone(), Arc::new(dispatcher), &config));
        Self {
            store,
            router: api.router(),
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        use tower::ServiceExt;
        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Wait until the volume reaches `status` or give up after a second.
    pub async fn wait_for_status(&self, volume: &Volume, status: VolumeStatus) -> bool {
        for _ in 0..100 {
            if self.store.volume_status(volume.id) == Some(status) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

/// A request carrying identity and version headers.
pub fn request(
    method: &str,
    uri: &str,
    project: &str,
    roles: &str,
    version: &str,
    body: Body,
) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", "u1")
        .header("x-project-id", project)
        .header("x-roles", roles)
        .header("openstack-api-version", version)
        .body(body)
        .unwrap()
}

pub fn volume_with_snapshot(project: &str) -> (Volume, Snapshot) {
    let volume = Volume::new(project, 1);
    let snapshot = Snapshot::of(&volume);
    (volume, snapshot)
}

pub async fn json(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
