mod dispatcher;
mod sqlmap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub use dispatcher::{DispatchBudget, SqliDispatcher};
pub use sqlmap::SqlmapApiAnalyzer;

use crate::error::AdapterError;
use crate::models::{Endpoint, HttpMethod, ParamLocation};

/// What the external analyzer is asked to test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectionRequest {
    pub url: String,
    /// `url` with a `*` after every path parameter value, the injection
    /// point marker URI testers such as sqlmap expect. Every query
    /// parameter is present in its query string.
    pub marked_url: String,
    pub method: HttpMethod,
    pub params: BTreeMap<String, String>,
    pub body_params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
}

impl InjectionRequest {
    pub fn from_endpoint(endpoint: &Endpoint, auth_header: Option<&(String, String)>) -> Self {
        let mut params = BTreeMap::new();
        let mut body_params = BTreeMap::new();
        for param in &endpoint.params {
            params.insert(param.name.clone(), param.value.clone());
            if param.location == ParamLocation::Body {
                body_params.insert(param.name.clone(), param.value.clone());
            }
        }

        let mut headers = BTreeMap::new();
        if let Some((name, value)) = auth_header {
            headers.insert(name.clone(), value.clone());
        }

        Self {
            url: endpoint.url.clone(),
            marked_url: Self::mark_injection_points(endpoint),
            method: endpoint.method,
            params,
            body_params,
            headers,
        }
    }

    fn mark_injection_points(endpoint: &Endpoint) -> String {
        let Ok(mut url) = url::Url::parse(&endpoint.url) else {
            return endpoint.url.clone();
        };

        let positions = endpoint.placeholder_positions();
        if !positions.is_empty() {
            let segments: Vec<String> = url
                .path()
                .split('/')
                .filter(|s| !s.is_empty())
                .enumerate()
                .map(|(i, s)| {
                    if positions.contains(&i) {
                        format!("{}*", s)
                    } else {
                        s.to_string()
                    }
                })
                .collect();
            url.set_path(&format!("/{}", segments.join("/")));
        }

        let present: BTreeSet<String> = url.query_pairs().map(|(k, _)| k.into_owned()).collect();
        let missing: Vec<(String, String)> = endpoint
            .params_at(ParamLocation::Query)
            .filter(|p| !present.contains(&p.name))
            .map(|p| (p.name.clone(), p.value.clone()))
            .collect();
        if !missing.is_empty() {
            url.query_pairs_mut().extend_pairs(missing);
        }
        url.to_string()
    }

    /// Body parameters as `application/x-www-form-urlencoded` data.
    pub fn form_data(&self) -> Option<String> {
        if self.body_params.is_empty() {
            return None;
        }
        Some(
            self.body_params
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&"),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Vulnerable { evidence: String },
    NotVulnerable,
    Inconclusive,
}

/// Black-box SQL injection tester.
#[async_trait]
pub trait SqliAnalyzer: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, request: &InjectionRequest) -> Result<Verdict, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Param, PathTemplate, ResponseInfo};

    #[test]
    fn test_request_from_templated_endpoint() {
        let template = PathTemplate::parse("/users/{id}");
        let endpoint = Endpoint::new(
            "http://example.test/users/1".into(),
            template.path.clone(),
            HttpMethod::Get,
            ResponseInfo::new(200, Default::default(), b"{}"),
        )
        .with_params(template.params);

        let auth = ("Authorization".to_string(), "Bearer t".to_string());
        let request = InjectionRequest::from_endpoint(&endpoint, Some(&auth));
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.params.keys().collect::<Vec<_>>(), vec!["id"]);
        assert_eq!(request.headers.get("Authorization").map(String::as_str), Some("Bearer t"));
        assert!(request.form_data().is_none());
        assert_eq!(request.url, "http://example.test/users/1");
        assert_eq!(request.marked_url, "http://example.test/users/1*");
    }

    #[test]
    fn test_marked_url_under_base_path_with_missing_query() {
        let template = PathTemplate::parse("/users/{id}/orders?sort=");
        let mut params = template.params.clone();
        params.push(Param::new("q", ParamLocation::Query));
        let endpoint = Endpoint::new(
            format!("http://example.test/api{}", template.resolve()),
            template.path.clone(),
            HttpMethod::Get,
            ResponseInfo::new(200, Default::default(), b"{}"),
        )
        .with_params(params);

        let request = InjectionRequest::from_endpoint(&endpoint, None);
        assert_eq!(
            request.marked_url,
            "http://example.test/api/users/1*/orders?sort=test&q=test"
        );
    }
}
