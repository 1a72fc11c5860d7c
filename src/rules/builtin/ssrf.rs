use async_trait::async_trait;

use crate::error::CheckError;
use crate::http::ProbeRequest;
use crate::models::{Endpoint, EvidenceType, Finding, OwaspCategory, ParamLocation, ParamType, Severity};
use crate::rules::signals::json_urls;
use crate::rules::{Checker, Observations, ProbeBudget};

/// API7:2023 Server Side Request Forgery
///
/// Parameters that take a URL are reported as SSRF surface. For query
/// parameters the cloud metadata address is substituted once; metadata
/// content in the reply confirms the server fetched it.
pub struct SsrfChecker;

const METADATA_URL: &str = "http://169.254.169.254/latest/meta-data/";
const METADATA_MARKERS: &[&str] = &["ami-id", "instance-id", "iam", "security-credentials", "computeMetadata"];

impl SsrfChecker {
    fn url_params(endpoint: &Endpoint) -> Vec<String> {
        let mut names: Vec<String> = endpoint
            .params
            .iter()
            .filter(|p| p.param_type == ParamType::Url || looks_like_url(&p.value))
            .map(|p| p.name.clone())
            .collect();

        if let Some(example) = &endpoint.request_body_example {
            if let Some(map) = example.as_object() {
                for (key, value) in map {
                    if value.as_str().is_some_and(looks_like_url) && !names.contains(key) {
                        names.push(key.clone());
                    }
                }
            }
        }
        names
    }

    fn with_query_value(url: &str, name: &str, value: &str) -> Option<String> {
        let mut parsed = url::Url::parse(url).ok()?;
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| {
                let v = if k == name { value.to_string() } else { v.into_owned() };
                (k.into_owned(), v)
            })
            .collect();
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
        Some(parsed.to_string())
    }
}

fn looks_like_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

#[async_trait]
impl Checker for SsrfChecker {
    fn category(&self) -> OwaspCategory {
        OwaspCategory::ServerSideRequestForgery
    }

    fn name(&self) -> &'static str {
        "ssrf"
    }

    fn applies(&self, endpoint: &Endpoint) -> bool {
        endpoint.status() < 500 && !endpoint.is_access_denied() && !Self::url_params(endpoint).is_empty()
    }

    async fn run(
        &self,
        endpoint: &Endpoint,
        probe: &mut ProbeBudget<'_>,
    ) -> Result<Option<Finding>, CheckError> {
        let mut obs = Observations::new(self.category(), self.name());
        let names = Self::url_params(endpoint);
        if names.is_empty() {
            return Ok(None);
        }

        obs.add(
            Severity::Medium,
            "Endpoint accepts a URL the server may fetch",
            EvidenceType::BodyPattern,
            format!("URL-valued parameters: {}", names.join(", ")),
        );

        let query_target = endpoint
            .params_at(ParamLocation::Query)
            .find(|p| names.contains(&p.name))
            .map(|p| p.name.clone());

        if let Some(name) = query_target {
            if let Some(url) = Self::with_query_value(&endpoint.url, &name, METADATA_URL) {
                let request = ProbeRequest::new(endpoint.method, url);
                if let Some(response) = probe.send(request).await? {
                    let body = &response.body_sample;
                    let hits: Vec<&str> = METADATA_MARKERS
                        .iter()
                        .copied()
                        .filter(|m| body.contains(m))
                        .collect();
                    if response.is_success() && !hits.is_empty() {
                        obs.add(
                            Severity::Critical,
                            "Server fetched the cloud metadata service",
                            EvidenceType::Probe,
                            format!("{}={} returned {}", name, METADATA_URL, hits.join(", ")),
                        );
                    }
                }
            }
        }

        // URLs echoed back in the response hint at server-side fetching too
        if let Some(body) = &endpoint.response.body {
            let echoed = json_urls(body)
                .into_iter()
                .filter(|u| endpoint.params.iter().any(|p| &p.value == u))
                .count();
            if echoed > 0 {
                obs.add(
                    Severity::Medium,
                    "Supplied URL reflected in the response",
                    EvidenceType::BodyPattern,
                    format!("{} supplied URL(s) echoed back", echoed),
                );
            }
        }

        Ok(obs.into_finding(endpoint))
    }
}
