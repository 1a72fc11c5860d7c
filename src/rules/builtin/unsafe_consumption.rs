use async_trait::async_trait;

use crate::error::CheckError;
use crate::models::{Endpoint, EvidenceType, Finding, OwaspCategory, Severity};
use crate::rules::signals::json_urls;
use crate::rules::{Checker, Observations, ProbeBudget};

/// API10:2023 Unsafe Consumption of APIs
pub struct UnsafeConsumptionChecker;

const UPSTREAM_HEADERS: &[&str] = &["via", "x-upstream", "x-backend-server", "x-served-by", "x-cache"];

impl UnsafeConsumptionChecker {
    fn cleartext_urls(endpoint: &Endpoint) -> Vec<String> {
        let mut urls: Vec<String> = endpoint
            .response
            .body
            .as_ref()
            .map(json_urls)
            .unwrap_or_default()
            .into_iter()
            .filter(|u| u.starts_with("http://"))
            .collect();
        urls.sort();
        urls.dedup();
        urls
    }
}

#[async_trait]
impl Checker for UnsafeConsumptionChecker {
    fn category(&self) -> OwaspCategory {
        OwaspCategory::UnsafeConsumptionOfApis
    }

    fn name(&self) -> &'static str {
        "unsafe-consumption"
    }

    fn applies(&self, endpoint: &Endpoint) -> bool {
        endpoint.is_success()
    }

    async fn run(
        &self,
        endpoint: &Endpoint,
        _probe: &mut ProbeBudget<'_>,
    ) -> Result<Option<Finding>, CheckError> {
        let mut obs = Observations::new(self.category(), self.name());

        let urls = Self::cleartext_urls(endpoint);
        if !urls.is_empty() {
            let shown: Vec<&str> = urls.iter().take(5).map(String::as_str).collect();
            obs.add(
                Severity::Medium,
                "Response references third-party resources over cleartext HTTP",
                EvidenceType::BodyPattern,
                format!("{} plaintext URL(s): {}", urls.len(), shown.join(", ")),
            );
        }

        let upstream: Vec<String> = UPSTREAM_HEADERS
            .iter()
            .filter_map(|h| endpoint.header(h).map(|v| format!("{}: {}", h, v)))
            .collect();
        if !upstream.is_empty() {
            obs.add(
                Severity::Info,
                "Response relayed from an upstream service",
                EvidenceType::Header,
                upstream.join(", "),
            );
        }

        Ok(obs.into_finding(endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing;

    #[tokio::test]
    async fn test_plaintext_urls_are_medium() {
        let endpoint = testing::get(
            "/api/feed",
            200,
            &[],
            r#"{"items": [{"link": "http://partner.example.com/a"}, {"link": "https://ok.example.com"}]}"#,
        );
        let finding = UnsafeConsumptionChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::Medium);
        assert!(finding.evidence.details.contains("partner.example.com"));
        assert!(!finding.evidence.details.contains("ok.example.com"));
    }

    #[tokio::test]
    async fn test_upstream_header_is_info() {
        let endpoint = testing::get("/api/rates", 200, &[("Via", "1.1 proxy")], "{}");
        let finding = UnsafeConsumptionChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_clean_response() {
        let endpoint = testing::get("/api/rates", 200, &[], r#"{"rate": 1.2}"#);
        let finding = UnsafeConsumptionChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap();
        assert!(finding.is_none());
    }
}
