//! `GET /search?q=...`: a fuzzy (edit distance 1) full-text query across
//! every indexed field of the full-text parser's index, the supplemented
//! HTTP analogue of the source's `services/bleveparser` query surface.

use std::sync::Arc;

use common::model::{Link, LinkData};
use poem::web::{Data, Json, Query};
use poem::{handler, Result};
use serde::Deserialize;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{TantivyDocument, Value as _};
use tantivy::{Index, TantivyError};

use crate::error::HttpEdgeError;

const DEFAULT_LIMIT: usize = 20;
const FUZZY_DISTANCE: u8 = 1;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
}

/// Shared read handle over the full-text index, wired into `poem`'s
/// request-scoped data so `search` can be registered as a plain handler.
pub struct SearchIndex(pub Arc<Index>);

#[handler]
pub async fn search(Query(params): Query<SearchParams>, index: Data<&SearchIndex>) -> Result<Json<serde_json::Value>> {
    let results = run_query(&index.0, &params.q).map_err(|e| {
        poem::Error::from_string(HttpEdgeError::Query(e.to_string()).to_string(), poem::http::StatusCode::BAD_REQUEST)
    })?;
    Ok(Json(serde_json::Value::Array(results)))
}

fn run_query(index: &Index, q: &str) -> Result<Vec<serde_json::Value>, TantivyError> {
    let schema = index.schema();
    let reader = index.reader()?;
    let searcher = reader.searcher();

    let searchable: Vec<_> = ["meta", "metadata", "data"]
        .into_iter()
        .filter_map(|name| schema.get_field(name).ok())
        .collect();

    let mut parser = QueryParser::for_index(index, searchable.clone());
    for field in &searchable {
        parser.set_field_fuzzy(*field, true, FUZZY_DISTANCE, true);
    }
    let query = parser.parse_query(q).map_err(|e| TantivyError::InvalidArgument(e.to_string()))?;

    let top_docs = searcher.search(&query, &TopDocs::with_limit(DEFAULT_LIMIT))?;
    let raw_field = schema.get_field("raw").ok();

    let mut results = Vec::with_capacity(top_docs.len());
    for (_score, address) in top_docs {
        let doc: TantivyDocument = searcher.doc(address)?;
        let raw = raw_field.and_then(|f| doc.get_first(f)).and_then(|v| v.as_str());
        let Some(raw) = raw else { continue };
        let Ok(link) = serde_json::from_str::<Link>(raw) else { continue };
        results.push(serde_json::json!({ "data": structurize(&link.data), "meta": link.meta }));
    }
    Ok(results)
}

/// Decode a link's `data` payload as JSON for search-result projection,
/// falling back to a plain string when it isn't JSON.
fn structurize(data: &LinkData) -> serde_json::Value {
    let bytes = data.as_bytes();
    serde_json::from_slice(bytes).unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[cfg(test)]
mod test {
    use super::*;
    use common::model::LinkBuilder;
    use tantivy::schema::{Schema, STORED, TEXT};

    fn build_test_index() -> Index {
        let mut builder = Schema::builder();
        let raw = builder.add_text_field("raw", STORED);
        let meta = builder.add_json_field("meta", TEXT);
        let schema = builder.build();
        let index = Index::create_in_ram(schema);

        let link = LinkBuilder::new("wf", "map", "approve").data(br#"{"amount":42}"#.to_vec()).build();
        let raw_json = serde_json::to_string(&link).unwrap();
        let meta_value = serde_json::to_value(&link.meta).unwrap();

        let mut writer = index.writer(15_000_000).unwrap();
        let mut doc = TantivyDocument::default();
        doc.add_text(raw, raw_json);
        doc.add_json_object(meta, meta_value.as_object().unwrap().clone());
        writer.add_document(doc).unwrap();
        writer.commit().unwrap();
        index
    }

    #[test]
    fn fuzzy_query_finds_a_near_match() {
        let index = build_test_index();
        let results = run_query(&index, "meta.action:approv").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["data"], serde_json::json!({"amount": 42}));
        assert_eq!(results[0]["meta"]["mapId"], serde_json::json!("map"));
    }

    #[test]
    fn unmatched_query_returns_empty() {
        let index = build_test_index();
        let results = run_query(&index, "meta.action:zzzzzzzz").unwrap();
        assert!(results.is_empty());
    }
}
