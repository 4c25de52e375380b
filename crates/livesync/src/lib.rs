//! Periodic cursor-paginated polling of watched workflows, fanned out to
//! however many subscribers have registered, each at its own cursor.
//!
//! Mirrors `api::dispatch::ApiDispatch`'s actor-with-clonable-handle shape:
//! a single task owns all mutable state (the synchronizer's per-workflow
//! cursor and the list of listeners) and every other task talks to it
//! through a command channel, so nothing needs a lock.

mod error;
mod listener;
pub mod source;

pub use error::LivesyncError;
pub use listener::Batch;
use listener::{slice_after, Listener, LISTENER_CHANNEL_CAPACITY};
pub use source::LinkSource;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::model::{Segment, SegmentMeta};
use common::Cursor;
use service::{CapabilityMap, Service, ServiceError};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use trace_client::types::LinkEdge;
use tracing::{info, instrument, warn};

#[derive(Debug, Clone)]
pub struct LivesyncConfig {
    pub poll_interval: Duration,
    pub watched_workflows: Vec<String>,
    pub page_size: i32,
}

impl Default for LivesyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            watched_workflows: Vec::new(),
            page_size: 50,
        }
    }
}

enum Command {
    Register {
        states: Option<HashMap<String, String>>,
        reply: oneshot::Sender<Result<mpsc::Receiver<Batch>, LivesyncError>>,
    },
}

/// Clonable handle to a running Livesync actor. Cloning is cheap (an mpsc
/// sender); every clone talks to the same underlying poll loop.
#[derive(Clone)]
pub struct Livesync {
    commands: mpsc::Sender<Command>,
}

impl Livesync {
    /// Subscribe to updates. `states` maps a workflow ID to the raw wire
    /// cursor the caller last saw for it; a workflow absent from the
    /// synchronizer's watch list is added with that cursor (auto-
    /// subscription), and a workflow already known whose cursor is behind
    /// the synchronizer's rewinds the synchronizer so this listener gets
    /// the backfill. `None` subscribes to every currently watched workflow
    /// starting from the synchronizer's current position (no backfill).
    pub async fn register(
        &self,
        states: Option<HashMap<String, String>>,
    ) -> Result<mpsc::Receiver<Batch>, LivesyncError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Register { states, reply })
            .await
            .map_err(|_| LivesyncError::ActorStopped)?;
        rx.await.map_err(|_| LivesyncError::ActorStopped)?
    }
}

/// The running poll loop. Built via [`LivesyncTask::spawn`], which returns a
/// clonable [`Livesync`] handle plus the `Service` wrapper the connector
/// boots under the service manager.
struct LivesyncTask {
    source: Arc<dyn LinkSource>,
    config: LivesyncConfig,
    workflow_states: HashMap<String, Cursor>,
    listeners: Vec<Listener>,
    commands: mpsc::Receiver<Command>,
}

impl LivesyncTask {
    fn new(source: Arc<dyn LinkSource>, config: LivesyncConfig, commands: mpsc::Receiver<Command>) -> Self {
        let workflow_states = config.watched_workflows.iter().map(|w| (w.clone(), Cursor::empty())).collect();
        Self { source, config, workflow_states, listeners: Vec::new(), commands }
    }

    async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("livesync shutting down, closing listener channels");
                    self.listeners.clear();
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "fatal cursor error, stopping livesync");
                        self.listeners.clear();
                        return;
                    }
                }
                Some(cmd) = self.commands.recv() => {
                    self.handle_command(cmd);
                }
            }
        }
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Register { states, reply } => {
                let result = self.register(states);
                let _ = reply.send(result);
            }
        }
    }

    fn register(&mut self, states: Option<HashMap<String, String>>) -> Result<mpsc::Receiver<Batch>, LivesyncError> {
        let (tx, rx) = mpsc::channel(LISTENER_CHANNEL_CAPACITY);
        let listener_states = match states {
            None => self.workflow_states.clone(),
            Some(raw) => {
                let mut parsed = HashMap::with_capacity(raw.len());
                for (workflow_id, cursor_str) in raw {
                    let cursor =
                        Cursor::parse(&cursor_str).map_err(|_| LivesyncError::BadCursor(cursor_str.clone()))?;
                    parsed.insert(workflow_id, cursor);
                }
                for (workflow_id, cursor) in &parsed {
                    match self.workflow_states.get(workflow_id) {
                        None => {
                            self.workflow_states.insert(workflow_id.clone(), cursor.clone());
                            self.config.watched_workflows.push(workflow_id.clone());
                        }
                        Some(current) if cursor < current => {
                            self.workflow_states.insert(workflow_id.clone(), cursor.clone());
                        }
                        _ => {}
                    }
                }
                parsed
            }
        };
        self.listeners.push(Listener { states: listener_states, tx });
        Ok(rx)
    }

    #[instrument(level = "debug", skip(self))]
    async fn poll_once(&mut self) -> Result<(), LivesyncError> {
        let workflows = self.config.watched_workflows.clone();
        for workflow_id in workflows {
            self.poll_workflow(&workflow_id).await?;
        }
        Ok(())
    }

    async fn poll_workflow(&mut self, workflow_id: &str) -> Result<(), LivesyncError> {
        loop {
            let sync_cursor = self.workflow_states.get(workflow_id).cloned().unwrap_or_else(Cursor::empty);
            let after = if sync_cursor.is_empty() { None } else { Some(sync_cursor.encode()) };

            let response = match self.source.workflow_links(workflow_id, after.as_deref(), self.config.page_size).await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(workflow_id, error = %e, "polling workflow failed, will retry next tick");
                    return Ok(());
                }
            };

            let workflow = match response.workflow_by_row_id {
                Some(w) => w,
                None => return Ok(()),
            };

            let edges = workflow.links.edges;
            let has_next_page = workflow.links.page_info.has_next_page;

            if edges.is_empty() {
                if !has_next_page {
                    return Ok(());
                }
                continue;
            }

            let new_cursor = match &workflow.links.page_info.end_cursor {
                Some(raw) => Cursor::parse(raw)?,
                None => sync_cursor.clone(),
            };
            self.workflow_states.insert(workflow_id.to_string(), new_cursor.clone());

            for listener in &mut self.listeners {
                let Some(listener_cursor) = listener.states.get(workflow_id).cloned() else { continue };
                if new_cursor > listener_cursor {
                    let slice = slice_after(&edges, &listener_cursor);
                    let segments = edges_to_segments(&slice);
                    if listener.tx.send(Batch { workflow_id: workflow_id.to_string(), segments }).await.is_ok() {
                        listener.states.insert(workflow_id.to_string(), new_cursor.clone());
                    }
                }
            }
            self.listeners.retain(|l| !l.tx.is_closed());

            if !has_next_page {
                return Ok(());
            }
        }
    }
}

fn edges_to_segments(edges: &[LinkEdge]) -> Vec<Segment> {
    edges
        .iter()
        .map(|e| Segment {
            link: e.node.raw.clone(),
            meta: SegmentMeta { link_hash: hex::decode(&e.node.link_hash).ok() },
        })
        .collect()
}

/// `Service` wrapper that boots the Livesync poll loop under the service
/// manager and exposes a clonable [`Livesync`] handle to services that
/// `needs("livesync")`.
pub struct LivesyncService {
    config: LivesyncConfig,
    source: Option<Arc<dyn LinkSource>>,
    handle: Option<Livesync>,
    task: Option<LivesyncTask>,
}

impl LivesyncService {
    pub fn new(source: Arc<dyn LinkSource>) -> Self {
        Self { config: LivesyncConfig::default(), source: Some(source), handle: None, task: None }
    }
}

#[async_trait]
impl Service for LivesyncService {
    fn id(&self) -> &'static str {
        "livesync"
    }

    // The trace client is a plain library handle constructed once at
    // startup and passed in directly (see `LivesyncService::new`), not a
    // managed `Service` with its own lifecycle, so it is not declared here.

    fn set_config(&mut self, config: toml::Value) -> Result<(), ServiceError> {
        #[derive(serde::Deserialize)]
        struct Raw {
            #[serde(default)]
            poll_interval_secs: Option<u64>,
            #[serde(default)]
            watched_workflows: Vec<String>,
            #[serde(default)]
            page_size: Option<i32>,
        }
        let raw: Raw = config
            .try_into()
            .map_err(|e: toml::de::Error| ServiceError::Config { service: self.id(), message: e.to_string() })?;
        self.config = LivesyncConfig {
            poll_interval: Duration::from_secs(raw.poll_interval_secs.unwrap_or(5)),
            watched_workflows: raw.watched_workflows,
            page_size: raw.page_size.unwrap_or(50),
        };
        Ok(())
    }

    fn plug(&mut self, _capabilities: &CapabilityMap) -> Result<(), ServiceError> {
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), ServiceError> {
        let source = self.source.take().expect("prepare called once");
        let (tx, rx) = mpsc::channel(16);
        self.task = Some(LivesyncTask::new(source, self.config.clone(), rx));
        self.handle = Some(Livesync { commands: tx });
        Ok(())
    }

    async fn run(
        &mut self,
        shutdown: CancellationToken,
        on_running: oneshot::Sender<()>,
    ) -> Result<(), ServiceError> {
        let task = self.task.take().expect("prepare runs before run");
        let _ = on_running.send(());
        task.run(shutdown).await;
        Ok(())
    }

    fn expose(&self) -> Option<Box<dyn std::any::Any + Send + Sync>> {
        self.handle.clone().map(|h| Box::new(h) as Box<dyn std::any::Any + Send + Sync>)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::model::LinkBuilder;
    use std::sync::Mutex as StdMutex;
    use trace_client::types::{LinkConnection, LinkNode, PageInfo, WorkflowLinks, WorkflowLinksResponse};

    struct FakeSource {
        pages: StdMutex<HashMap<String, Vec<(Vec<LinkEdge>, bool)>>>,
    }

    fn edge(n: i64) -> LinkEdge {
        LinkEdge {
            cursor: Cursor::from_natural(n).encode(),
            node: LinkNode { link_hash: format!("{n:02x}"), raw: LinkBuilder::new("wf", "map", "step").build() },
        }
    }

    #[async_trait]
    impl LinkSource for FakeSource {
        async fn workflow_links(
            &self,
            workflow_id: &str,
            _after: Option<&str>,
            _limit: i32,
        ) -> Result<WorkflowLinksResponse, TraceClientError> {
            let mut pages = self.pages.lock().unwrap();
            let queue = pages.entry(workflow_id.to_string()).or_default();
            if queue.is_empty() {
                return Ok(WorkflowLinksResponse {
                    workflow_by_row_id: Some(WorkflowLinks {
                        id: workflow_id.to_string(),
                        name: workflow_id.to_string(),
                        links: LinkConnection {
                            edges: vec![],
                            page_info: PageInfo { has_next_page: false, end_cursor: None },
                        },
                    }),
                });
            }
            let (edges, has_next) = queue.remove(0);
            let end_cursor = edges.last().map(|e| e.cursor.clone());
            Ok(WorkflowLinksResponse {
                workflow_by_row_id: Some(WorkflowLinks {
                    id: workflow_id.to_string(),
                    name: workflow_id.to_string(),
                    links: LinkConnection { edges, page_info: PageInfo { has_next_page: has_next, end_cursor } },
                }),
            })
        }
    }

    use trace_client::TraceClientError;

    fn source_with(workflow: &str, pages: Vec<(Vec<LinkEdge>, bool)>) -> Arc<dyn LinkSource> {
        let mut map = HashMap::new();
        map.insert(workflow.to_string(), pages);
        Arc::new(FakeSource { pages: StdMutex::new(map) })
    }

    fn task_with(source: Arc<dyn LinkSource>, workflows: &[&str]) -> (LivesyncTask, mpsc::Sender<Command>) {
        let (tx, rx) = mpsc::channel(16);
        let config = LivesyncConfig {
            poll_interval: Duration::from_millis(10),
            watched_workflows: workflows.iter().map(|s| s.to_string()).collect(),
            page_size: 50,
        };
        (LivesyncTask::new(source, config, rx), tx)
    }

    #[tokio::test]
    async fn two_subscribers_with_distinct_start_cursors_each_get_their_own_slice() {
        let source = source_with("wf", vec![(vec![edge(1), edge(2), edge(3)], false)]);
        let (mut task, _tx) = task_with(source, &["wf"]);

        let mut from_empty = HashMap::new();
        from_empty.insert("wf".to_string(), Cursor::empty().encode());
        let mut rx_all = task.register(Some(from_empty)).unwrap();

        let mut from_two = HashMap::new();
        from_two.insert("wf".to_string(), Cursor::from_natural(2).encode());
        let mut rx_tail = task.register(Some(from_two)).unwrap();

        task.poll_once().await.unwrap();

        let batch_all = rx_all.try_recv().unwrap();
        assert_eq!(batch_all.segments.len(), 3);

        let batch_tail = rx_tail.try_recv().unwrap();
        assert_eq!(batch_tail.segments.len(), 1);
    }

    #[tokio::test]
    async fn registering_behind_synchronizer_cursor_rewinds_it() {
        let source = source_with("wf", vec![(vec![edge(5)], false)]);
        let (mut task, _tx) = task_with(source, &["wf"]);
        task.workflow_states.insert("wf".to_string(), Cursor::from_natural(10));

        let mut behind = HashMap::new();
        behind.insert("wf".to_string(), Cursor::from_natural(1).encode());
        task.register(Some(behind)).unwrap();

        assert_eq!(task.workflow_states.get("wf").unwrap(), &Cursor::from_natural(1));
    }

    #[tokio::test]
    async fn transient_poll_error_is_not_fatal() {
        struct FailingSource;
        #[async_trait]
        impl LinkSource for FailingSource {
            async fn workflow_links(
                &self,
                _workflow_id: &str,
                _after: Option<&str>,
                _limit: i32,
            ) -> Result<WorkflowLinksResponse, TraceClientError> {
                Err(TraceClientError::Login("boom".into()))
            }
        }
        let (mut task, _tx) = task_with(Arc::new(FailingSource), &["wf"]);
        assert!(task.poll_once().await.is_ok());
    }

    #[tokio::test]
    async fn paged_poll_follows_has_next_page() {
        let source = source_with("wf", vec![(vec![edge(1)], true), (vec![edge(2)], false)]);
        let (mut task, _tx) = task_with(source, &["wf"]);
        let mut sub = HashMap::new();
        sub.insert("wf".to_string(), Cursor::empty().encode());
        let mut rx = task.register(Some(sub)).unwrap();

        task.poll_once().await.unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.segments.len(), 1);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.segments.len(), 1);
        assert_eq!(task.workflow_states.get("wf").unwrap(), &Cursor::from_natural(2));
    }

    #[tokio::test]
    async fn unordered_listener_fanout_has_no_cross_listener_ordering_guarantee() {
        let source = source_with("wf", vec![(vec![edge(1), edge(2)], false)]);
        let (mut task, _tx) = task_with(source, &["wf"]);
        let mut sub_a = HashMap::new();
        sub_a.insert("wf".to_string(), Cursor::empty().encode());
        let mut rx_a = task.register(Some(sub_a)).unwrap();
        let mut sub_b = HashMap::new();
        sub_b.insert("wf".to_string(), Cursor::empty().encode());
        let mut rx_b = task.register(Some(sub_b)).unwrap();

        task.poll_once().await.unwrap();

        assert_eq!(rx_a.try_recv().unwrap().segments.len(), 2);
        assert_eq!(rx_b.try_recv().unwrap().segments.len(), 2);
    }
}
