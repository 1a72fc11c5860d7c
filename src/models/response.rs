use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_BODY_SAMPLE_LIMIT: usize = 4096;

/// Response metadata captured for one request. Header names are stored
/// lowercased.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status: u16,
    pub size: usize,
    pub headers: BTreeMap<String, String>,
    pub body_sample: String,
    pub body: Option<serde_json::Value>,
    pub keys: Vec<String>,
    pub duration_ms: u64,
}

impl ResponseInfo {
    pub fn new(status: u16, headers: BTreeMap<String, String>, bytes: &[u8]) -> Self {
        Self::with_sample_limit(status, headers, bytes, DEFAULT_BODY_SAMPLE_LIMIT)
    }

    pub fn with_sample_limit(
        status: u16,
        headers: BTreeMap<String, String>,
        bytes: &[u8],
        sample_limit: usize,
    ) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();
        let body: Option<serde_json::Value> = serde_json::from_slice(bytes).ok();
        let keys = body.as_ref().map(Self::extract_keys).unwrap_or_default();
        let sample = &bytes[..bytes.len().min(sample_limit)];

        Self {
            status,
            size: bytes.len(),
            headers,
            body_sample: String::from_utf8_lossy(sample).into_owned(),
            body,
            keys,
            duration_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_json(&self) -> bool {
        self.body.is_some()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// A GraphQL response carrying `data.__schema`, i.e. an answered
    /// introspection query.
    pub fn exposes_graphql_schema(&self) -> bool {
        self.body
            .as_ref()
            .and_then(|b| b.pointer("/data/__schema"))
            .is_some_and(|schema| !schema.is_null())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(&name.to_lowercase())
    }

    /// Length of the top-level JSON array, or of the first array-valued
    /// field of a top-level object.
    pub fn collection_len(&self) -> Option<usize> {
        match self.body.as_ref()? {
            serde_json::Value::Array(items) => Some(items.len()),
            serde_json::Value::Object(map) => map.values().find_map(|v| v.as_array().map(Vec::len)),
            _ => None,
        }
    }

    /// Cheap body fingerprint used to compare responses for equality.
    pub fn fingerprint(&self) -> (u16, usize, String) {
        let head: String = self.body_sample.chars().take(256).collect();
        (self.status, self.size, head)
    }

    fn extract_keys(value: &serde_json::Value) -> Vec<String> {
        let mut keys = Vec::new();
        Self::walk_json(value, String::new(), &mut keys);
        keys
    }

    fn walk_json(value: &serde_json::Value, prefix: String, keys: &mut Vec<String>) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    keys.push(path.clone());
                    Self::walk_json(val, path, keys);
                }
            }
            serde_json::Value::Array(arr) => {
                if let Some(first) = arr.first() {
                    let array_path = format!("{}[]", prefix);
                    keys.push(array_path.clone());
                    Self::walk_json(first, array_path, keys);
                }
            }
            _ => {}
        }
    }
}
