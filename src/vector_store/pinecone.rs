//! Pinecone-compatible data-plane REST client.

use std::time::Duration;

use anyhow::Context;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{Namespace, QueryMatch, VectorIndex, VectorQuery, VectorRecord};
use crate::error::IndexError;
use crate::records::Metadata;

const API_VERSION: &str = "2024-07";

/// Blocking client for an index host such as `https://docs-abc123.svc.pinecone.io`.
#[derive(Clone)]
pub struct PineconeIndex {
    client: Client,
    host: String,
}

impl PineconeIndex {
    /// Builds a client for `host` authenticated with `api_key`.
    pub fn new(api_key: &str, host: &str, timeout: Duration) -> anyhow::Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing Pinecone API key");
        anyhow::ensure!(
            host.starts_with("http://") || host.starts_with("https://"),
            "Pinecone host must be an http(s) URL"
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            "Api-Key",
            HeaderValue::from_str(api_key.trim()).context("invalid Pinecone API key")?,
        );
        headers.insert(
            "X-Pinecone-API-Version",
            HeaderValue::from_static(API_VERSION),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build Pinecone HTTP client")?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
        })
    }

    fn check(response: Response) -> Result<Response, IndexError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .unwrap_or_else(|_| "<body unavailable>".to_string());
        Err(IndexError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl VectorIndex for PineconeIndex {
    fn upsert(&self, namespace: &Namespace, records: &[VectorRecord]) -> Result<(), IndexError> {
        if records.is_empty() {
            return Ok(());
        }
        let request = UpsertRequest {
            vectors: records,
            namespace: namespace.as_str(),
        };
        let response = self
            .client
            .post(format!("{}/vectors/upsert", self.host))
            .json(&request)
            .send()?;
        Self::check(response)?;
        Ok(())
    }

    fn query(
        &self,
        namespace: &Namespace,
        query: &VectorQuery<'_>,
    ) -> Result<Vec<QueryMatch>, IndexError> {
        let request = QueryRequest {
            namespace: namespace.as_str(),
            vector: query.vector,
            top_k: query.top_k,
            include_metadata: true,
            include_values: false,
            filter: query.filter.as_ref().map(|filter| filter.to_json()),
        };
        let response = self
            .client
            .post(format!("{}/query", self.host))
            .json(&request)
            .send()?;
        let parsed: QueryResponse = Self::check(response)?.json()?;
        Ok(parsed
            .matches
            .into_iter()
            .map(|hit| QueryMatch {
                id: hit.id,
                score: hit.score,
                metadata: flatten_metadata(hit.metadata),
            })
            .collect())
    }
}

/// Converts stored metadata values into strings; non-string values keep their JSON form.
fn flatten_metadata(values: serde_json::Map<String, serde_json::Value>) -> Metadata {
    values
        .into_iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect()
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector_store::MetadataFilter;

    #[test]
    fn query_request_uses_camel_case_and_filter() {
        let request = QueryRequest {
            namespace: "object_attrs",
            vector: &[0.5, 0.25],
            top_k: 50,
            include_metadata: true,
            include_values: false,
            filter: Some(MetadataFilter::any_of("className", vec!["Sketch".into()]).to_json()),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "namespace": "object_attrs",
                "vector": [0.5, 0.25],
                "topK": 50,
                "includeMetadata": true,
                "includeValues": false,
                "filter": {"className": {"$in": ["Sketch"]}}
            })
        );
    }

    #[test]
    fn upsert_request_matches_wire_shape() {
        let mut metadata = Metadata::new();
        metadata.insert("className".into(), "Sketch".into());
        let records = [VectorRecord {
            id: "Sketch".into(),
            values: vec![1.0],
            metadata,
        }];
        let request = UpsertRequest {
            vectors: &records,
            namespace: "objects",
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({
                "vectors": [{"id": "Sketch", "values": [1.0], "metadata": {"className": "Sketch"}}],
                "namespace": "objects"
            })
        );
    }

    #[test]
    fn response_metadata_is_flattened_to_strings() {
        let parsed: QueryResponse = serde_json::from_str(
            r#"{"matches":[{"id":"Sketch.isVisible","score":0.92,
                "metadata":{"className":"Sketch","rank":3,"gone":null}}]}"#,
        )
        .unwrap();
        let hit = parsed.matches.into_iter().next().unwrap();
        let metadata = flatten_metadata(hit.metadata);
        assert_eq!(metadata["className"], "Sketch");
        assert_eq!(metadata["rank"], "3");
        assert!(!metadata.contains_key("gone"));
    }
}
