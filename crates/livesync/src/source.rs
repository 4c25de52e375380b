//! Abstraction over the trace client's paging call, so the poll loop can be
//! exercised against an in-memory fake instead of a mocked HTTP server.

use async_trait::async_trait;
use trace_client::types::WorkflowLinksResponse;
use trace_client::{TraceClient, TraceClientError};

#[async_trait]
pub trait LinkSource: Send + Sync {
    async fn workflow_links(
        &self,
        workflow_id: &str,
        after: Option<&str>,
        limit: i32,
    ) -> Result<WorkflowLinksResponse, TraceClientError>;
}

#[async_trait]
impl LinkSource for TraceClient {
    async fn workflow_links(
        &self,
        workflow_id: &str,
        after: Option<&str>,
        limit: i32,
    ) -> Result<WorkflowLinksResponse, TraceClientError> {
        TraceClient::workflow_links(self, workflow_id, after, limit).await
    }
}
