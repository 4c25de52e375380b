use common::Link;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowLinksResponse {
    #[serde(rename = "workflowByRowId")]
    pub workflow_by_row_id: Option<WorkflowLinks>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowLinks {
    pub id: String,
    pub name: String,
    pub links: LinkConnection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConnection {
    pub edges: Vec<LinkEdge>,
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkEdge {
    pub cursor: String,
    pub node: LinkNode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkNode {
    #[serde(rename = "linkHash")]
    pub link_hash: String,
    pub raw: Link,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PageInfo {
    #[serde(rename = "hasNextPage")]
    pub has_next_page: bool,
    #[serde(rename = "endCursor")]
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipientsKeysResponse {
    #[serde(rename = "workflowByRowId")]
    pub workflow_by_row_id: Option<RecipientsGroups>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecipientsGroups {
    pub groups: GroupConnection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupConnection {
    pub nodes: Vec<GroupNode>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupNode {
    pub owner: Owner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    #[serde(rename = "encryptionKey")]
    pub encryption_key: RecipientPublicKey,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipientPublicKey {
    #[serde(rename = "rowId")]
    pub id: String,
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLinkResponse {
    #[serde(rename = "createLink")]
    pub create_link: CreateLinkPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLinkPayload {
    pub trace: TraceRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TraceRef {
    #[serde(rename = "rowId")]
    pub row_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLinksResponse {
    #[serde(rename = "createLinks")]
    pub create_links: CreateLinksPayload,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLinksPayload {
    pub links: Vec<CreatedLinkRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedLinkRef {
    #[serde(rename = "traceId")]
    pub trace_id: String,
}
