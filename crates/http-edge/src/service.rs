//! Runs the auth middleware + search route as a managed [`service::Service`]
//! rather than a bare `tokio::spawn`, so a `SIGHUP` reload drains the old
//! listener (via the shared shutdown token) before the manager rebinds,
//! matching the teacher's `ChronicleGraphQl::serve_api` bring-up/teardown
//! pairing (`Server::new(listener).run_with_graceful_shutdown(...)`).

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use poem::listener::TcpListener;
use poem::{get, EndpointExt, Route, Server};
use service::{CapabilityMap, Service, ServiceError};
use tantivy::Index;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::search::{search, SearchIndex};
use crate::{AuthConfig, WithAuth};

pub struct HttpEdgeService {
    bind: SocketAddr,
    auth: AuthConfig,
    index: Option<Arc<Index>>,
}

impl HttpEdgeService {
    pub fn new(bind: SocketAddr, auth: AuthConfig) -> Self {
        Self { bind, auth, index: None }
    }
}

#[async_trait]
impl Service for HttpEdgeService {
    fn id(&self) -> &'static str {
        "http-edge"
    }

    fn needs(&self) -> &'static [&'static str] {
        &["fulltext-parser"]
    }

    fn set_config(&mut self, _config: toml::Value) -> Result<(), ServiceError> {
        Ok(())
    }

    fn plug(&mut self, capabilities: &CapabilityMap) -> Result<(), ServiceError> {
        self.index = Some(capabilities.get::<Arc<Index>>("fulltext-parser", self.id())?.clone());
        Ok(())
    }

    async fn run(
        &mut self,
        shutdown: CancellationToken,
        on_running: oneshot::Sender<()>,
    ) -> Result<(), ServiceError> {
        let index = self.index.clone().expect("plug runs before run");
        let app = Route::new()
            .at("/search", get(search))
            .with(WithAuth::new(self.auth.clone()))
            .data(SearchIndex(index));
        let listener = TcpListener::bind(self.bind);

        let _ = on_running.send(());
        info!(bind = %self.bind, "http edge listening");
        Server::new(listener)
            .run_with_graceful_shutdown(app, shutdown.cancelled(), None)
            .await
            .map_err(|e| ServiceError::Fatal { service: self.id(), source: Box::new(e) })
    }
}
