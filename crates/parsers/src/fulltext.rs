//! Indexes every received segment into an embedded full-text engine, the
//! Rust analogue of the source's `bleveparser` service. One atomic commit
//! per received batch; `raw` is stored for retrieval but not searchable,
//! `meta`/`metadata` are searchable but not retrievable, `data` is both
//! (the source's "dynamic" mapping — field names and types inside it are
//! not known ahead of time).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use livesync::Livesync;
use service::{CapabilityMap, Service, ServiceError};
use tantivy::schema::{Schema, TantivyDocument, STORED, STRING, TEXT};
use tantivy::{Index, IndexWriter};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::error::ParserError;

#[derive(Debug, Clone, serde::Deserialize)]
struct FullTextConfig {
    path: PathBuf,
}

fn build_schema() -> (Schema, FieldIds) {
    let mut builder = Schema::builder();
    let type_field = builder.add_text_field("type", STORED);
    let id_field = builder.add_text_field("id", STRING | STORED);
    let raw_field = builder.add_text_field("raw", STORED);
    let meta_field = builder.add_json_field("meta", TEXT);
    let metadata_field = builder.add_json_field("metadata", TEXT);
    let data_field = builder.add_json_field("data", STORED | TEXT);
    let schema = builder.build();
    (schema, FieldIds { type_field, id_field, raw_field, meta_field, metadata_field, data_field })
}

struct FieldIds {
    type_field: tantivy::schema::Field,
    id_field: tantivy::schema::Field,
    raw_field: tantivy::schema::Field,
    meta_field: tantivy::schema::Field,
    metadata_field: tantivy::schema::Field,
    data_field: tantivy::schema::Field,
}

pub struct FullTextParser {
    path: Option<PathBuf>,
    sync: Option<Livesync>,
    index: Option<Arc<Index>>,
    fields: Option<Arc<FieldIds>>,
    writer: Option<Arc<Mutex<IndexWriter>>>,
}

impl FullTextParser {
    pub fn new() -> Self {
        Self { path: None, sync: None, index: None, fields: None, writer: None }
    }
}

impl Default for FullTextParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Service for FullTextParser {
    fn id(&self) -> &'static str {
        "fulltext-parser"
    }

    fn needs(&self) -> &'static [&'static str] {
        &["livesync"]
    }

    fn set_config(&mut self, config: toml::Value) -> Result<(), ServiceError> {
        let raw: FullTextConfig = config
            .try_into()
            .map_err(|e: toml::de::Error| ServiceError::Config { service: self.id(), message: e.to_string() })?;
        self.path = Some(raw.path);
        Ok(())
    }

    fn plug(&mut self, capabilities: &CapabilityMap) -> Result<(), ServiceError> {
        self.sync = Some(capabilities.get::<Livesync>("livesync", self.id())?.clone());
        Ok(())
    }

    /// Opens (or creates) the on-disk index synchronously so the `Arc<Index>`
    /// is ready to `expose()` before the parser is moved into its task.
    fn prepare(&mut self) -> Result<(), ServiceError> {
        let path = self.path.clone().expect("set_config runs before prepare");

        std::fs::create_dir_all(&path)
            .map_err(|e| ServiceError::Config { service: self.id(), message: e.to_string() })?;
        let (schema, fields) = build_schema();
        let index = Index::create_in_dir(&path, schema)
            .or_else(|_| Index::open_in_dir(&path))
            .map_err(|e| ServiceError::Config { service: self.id(), message: e.to_string() })?;
        let writer: IndexWriter = index
            .writer(50_000_000)
            .map_err(|e| ServiceError::Config { service: self.id(), message: e.to_string() })?;

        self.index = Some(Arc::new(index));
        self.fields = Some(Arc::new(fields));
        self.writer = Some(Arc::new(Mutex::new(writer)));
        Ok(())
    }

    fn expose(&self) -> Option<Box<dyn std::any::Any + Send + Sync>> {
        self.index.clone().map(|index| Box::new(index) as Box<dyn std::any::Any + Send + Sync>)
    }

    #[instrument(level = "info", skip(self, shutdown, on_running), fields(service = self.id()))]
    async fn run(
        &mut self,
        shutdown: CancellationToken,
        on_running: oneshot::Sender<()>,
    ) -> Result<(), ServiceError> {
        let sync = self.sync.clone().expect("plug runs before run");
        let fields = self.fields.clone().expect("prepare runs before run");
        let writer = self.writer.clone().expect("prepare runs before run");

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
                    self.index_batch(&writer, &fields, &batch.segments)
                        .map_err(|e| fatal(self.id(), e))?;
                }
            }
        }
    }
}

impl FullTextParser {
    fn index_batch(
        &self,
        writer: &Mutex<IndexWriter>,
        fields: &FieldIds,
        segments: &[common::Segment],
    ) -> Result<(), ParserError> {
        let mut guard = writer.lock().expect("index writer mutex poisoned");
        for segment in segments {
            let hash = segment.link_hash()?;
            let raw_json = serde_json::to_string(&segment.link).map_err(|e| ParserError::Index(e.to_string()))?;
            let meta_value = serde_json::to_value(&segment.link.meta).map_err(|e| ParserError::Index(e.to_string()))?;
            let metadata_value = serde_json::to_value(&segment.link.meta.data).map_err(|e| ParserError::Index(e.to_string()))?;
            let data_value = structurize_data(&segment.link.data);

            let mut doc = TantivyDocument::default();
            doc.add_text(fields.type_field, "root");
            doc.add_text(fields.id_field, hex::encode(&hash));
            doc.add_text(fields.raw_field, raw_json);
            doc.add_json_object(fields.meta_field, object_of(meta_value));
            doc.add_json_object(fields.metadata_field, object_of(metadata_value));
            doc.add_json_object(fields.data_field, object_of(data_value));
            guard.add_document(doc).map_err(|e| ParserError::Index(e.to_string()))?;
        }
        guard.commit().map_err(|e| ParserError::Index(e.to_string()))?;
        Ok(())
    }
}

/// The source's `StructurizeData`: decode a link's data payload as JSON so
/// its actual fields are searchable, falling back to a plain string when
/// the payload isn't JSON.
fn structurize_data(data: &common::model::LinkData) -> serde_json::Value {
    let bytes = data.as_bytes();
    serde_json::from_slice(bytes).unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

fn object_of(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

fn fatal(service: &'static str, source: ParserError) -> ServiceError {
    ServiceError::Fatal { service, source: Box::new(source) }
}
