//! Persists every received segment into an embedded key/value store, keyed
//! by its link hash. Any write failure is fatal — the source treats a
//! broken KV store as unrecoverable rather than something to retry past.

use std::path::PathBuf;

use async_trait::async_trait;
use livesync::Livesync;
use service::{CapabilityMap, Service, ServiceError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::error::ParserError;

#[derive(Debug, Clone, serde::Deserialize)]
struct KvConfig {
    path: PathBuf,
}

pub struct KvParser {
    path: Option<PathBuf>,
    sync: Option<Livesync>,
}

impl KvParser {
    pub fn new() -> Self {
        Self { path: None, sync: None }
    }
}

impl Default for KvParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Service for KvParser {
    fn id(&self) -> &'static str {
        "kv-parser"
    }

    fn needs(&self) -> &'static [&'static str] {
        &["livesync"]
    }

    fn set_config(&mut self, config: toml::Value) -> Result<(), ServiceError> {
        let raw: KvConfig = config
            .try_into()
            .map_err(|e: toml::de::Error| ServiceError::Config { service: self.id(), message: e.to_string() })?;
        self.path = Some(raw.path);
        Ok(())
    }

    fn plug(&mut self, capabilities: &CapabilityMap) -> Result<(), ServiceError> {
        self.sync = Some(capabilities.get::<Livesync>("livesync", self.id())?.clone());
        Ok(())
    }

    #[instrument(level = "info", skip(self, shutdown, on_running), fields(service = self.id()))]
    async fn run(
        &mut self,
        shutdown: CancellationToken,
        on_running: oneshot::Sender<()>,
    ) -> Result<(), ServiceError> {
        let path = self.path.clone().expect("set_config runs before run");
        let sync = self.sync.clone().expect("plug runs before run");
        let db = sled::open(&path).map_err(|e| ServiceError::Config { service: self.id(), message: e.to_string() })?;

        let mut batches = sync
            .register(None)
            .await
            .map_err(ParserError::Registration)
            .map_err(|e| fatal(self.id(), e))?;
        let _ = on_running.send(());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(service = self.id(), "shutting down");
                    return Ok(());
                }
                batch = batches.recv() => {
                    let Some(batch) = batch else {
                        return Err(fatal(self.id(), ParserError::SyncStopped));
                    };
                    for segment in &batch.segments {
                        let hash = segment.link_hash().map_err(|e| fatal(self.id(), ParserError::from(e)))?;
                        let key = [b"link".as_slice(), &hash].concat();
                        let value = serde_json::to_vec(&segment.link)
                            .map_err(|e| fatal(self.id(), ParserError::Put(e.to_string())))?;
                        db.insert(key, value).map_err(|e| fatal(self.id(), ParserError::Put(e.to_string())))?;
                    }
                }
            }
        }
    }
}

fn fatal(service: &'static str, source: ParserError) -> ServiceError {
    ServiceError::Fatal { service, source: Box::new(source) }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::model::LinkBuilder;
    use common::Segment;
    use livesync::LinkSource;
    use std::sync::Arc;
    use tempfile::tempdir;
    use trace_client::types::WorkflowLinksResponse;
    use trace_client::TraceClientError;

    struct NoOpSource;
    #[async_trait]
    impl LinkSource for NoOpSource {
        async fn workflow_links(
            &self,
            _workflow_id: &str,
            _after: Option<&str>,
            _limit: i32,
        ) -> Result<WorkflowLinksResponse, TraceClientError> {
            Ok(WorkflowLinksResponse { workflow_by_row_id: None })
        }
    }

    #[tokio::test]
    async fn persists_segments_keyed_by_link_hash() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();

        let link = LinkBuilder::new("wf", "map", "init").build();
        let segment = Segment { link: link.clone(), meta: Default::default() };
        let hash = segment.link_hash().unwrap();
        let key = [b"link".as_slice(), &hash].concat();
        let value = serde_json::to_vec(&segment.link).unwrap();
        db.insert(key.clone(), value.clone()).unwrap();

        let stored = db.get(key).unwrap().unwrap();
        assert_eq!(stored.as_ref(), value.as_slice());
    }

    #[allow(dead_code)]
    fn source() -> Arc<dyn LinkSource> {
        Arc::new(NoOpSource)
    }
}
