use async_trait::async_trait;

use crate::error::CheckError;
use crate::http::ProbeRequest;
use crate::models::{Endpoint, EvidenceType, Finding, HttpMethod, OwaspCategory, Severity};
use crate::rules::signals::has_rate_limit_headers;
use crate::rules::{Checker, Observations, ProbeBudget};

/// API4:2023 Unrestricted Resource Consumption
pub struct ResourceConsumptionChecker;

const LARGE_COLLECTION: usize = 100;
const OVERSIZED_LIMIT: &str = "10000";

impl ResourceConsumptionChecker {
    fn with_limit(url: &str) -> Option<String> {
        let mut parsed = url::Url::parse(url).ok()?;
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(k, _)| k != "limit")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = parsed.query_pairs_mut();
            pairs.clear();
            for (k, v) in &kept {
                pairs.append_pair(k, v);
            }
            pairs.append_pair("limit", OVERSIZED_LIMIT);
        }
        Some(parsed.to_string())
    }
}

#[async_trait]
impl Checker for ResourceConsumptionChecker {
    fn category(&self) -> OwaspCategory {
        OwaspCategory::UnrestrictedResourceConsumption
    }

    fn name(&self) -> &'static str {
        "resource-consumption"
    }

    fn applies(&self, endpoint: &Endpoint) -> bool {
        endpoint.is_success() && endpoint.method != HttpMethod::Options
    }

    async fn run(
        &self,
        endpoint: &Endpoint,
        probe: &mut ProbeBudget<'_>,
    ) -> Result<Option<Finding>, CheckError> {
        let mut obs = Observations::new(self.category(), self.name());
        let response = &endpoint.response;

        if !has_rate_limit_headers(response) {
            obs.add(
                Severity::Low,
                "No rate limiting advertised",
                EvidenceType::Header,
                "no RateLimit / X-RateLimit / Retry-After headers",
            );
        }

        let baseline = response.collection_len();
        if let Some(len) = baseline {
            if len > LARGE_COLLECTION {
                obs.add(
                    Severity::Medium,
                    "Large collection returned without pagination",
                    EvidenceType::BodyPattern,
                    format!("{} items in a single response", len),
                );
            }
        }

        if let (Some(len), HttpMethod::Get) = (baseline, endpoint.method) {
            if let Some(url) = Self::with_limit(&endpoint.url) {
                if let Some(expanded) = probe.send(ProbeRequest::get(url.clone())).await? {
                    if let Some(expanded_len) = expanded.collection_len() {
                        if expanded.is_success() && expanded_len > len {
                            obs.add(
                                Severity::Medium,
                                "Client-controlled page size is not capped",
                                EvidenceType::Probe,
                                format!("limit={} returned {} items (default {})", OVERSIZED_LIMIT, expanded_len, len),
                            );
                        }
                    }
                }
            }
        }

        Ok(obs.into_finding(endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing;

    #[tokio::test]
    async fn test_missing_rate_limit_is_low() {
        let endpoint = testing::get("/api/products", 200, &[], r#"[{"id": 1}]"#);
        let finding = ResourceConsumptionChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::Low);
    }

    #[tokio::test]
    async fn test_rate_limited_small_collection_is_clean() {
        let endpoint = testing::get("/api/products", 200, &[("X-RateLimit-Limit", "100")], r#"[{"id": 1}]"#);
        let finding = ResourceConsumptionChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap();
        assert!(finding.is_none());
    }

    #[tokio::test]
    async fn test_large_collection_is_medium() {
        let items: Vec<String> = (0..150).map(|i| format!(r#"{{"id": {}}}"#, i)).collect();
        let body = format!("[{}]", items.join(","));
        let endpoint = testing::get("/api/products", 200, &[("RateLimit-Limit", "10")], &body);
        let finding = ResourceConsumptionChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::Medium);
    }

    #[test]
    fn test_with_limit_replaces_existing() {
        assert_eq!(
            ResourceConsumptionChecker::with_limit("http://x.test/items?limit=5&q=a").as_deref(),
            Some("http://x.test/items?q=a&limit=10000")
        );
    }
}
