//! The fixed GraphQL documents the source system's trace and account
//! servers expect (§6 EXTERNAL INTERFACES).

pub const WORKFLOW_LINKS_QUERY: &str = r#"
query workflowLinks($id: BigInt!, $cursor: Cursor, $limit: Int!) {
  workflowByRowId(rowId: $id) {
    id name
    links(after: $cursor, first: $limit) {
      edges { cursor node { linkHash raw } }
      pageInfo { hasNextPage endCursor }
    }
  }
}
"#;

pub const RECIPIENTS_KEYS_QUERY: &str = r#"
query recipientsKeys($id: BigInt!) {
  workflowByRowId(rowId: $id) {
    groups {
      nodes { owner { encryptionKey { rowId publicKey } } }
    }
  }
}
"#;

pub const CREATE_LINK_MUTATION: &str = r#"
mutation createLink($link: JSON!) {
  createLink(link: $link) { trace { rowId } }
}
"#;

pub const CREATE_LINKS_MUTATION: &str = r#"
mutation createLinks($links: [CreateLinkInput!]!) {
  createLinks(links: $links) { links { traceId } }
}
"#;
