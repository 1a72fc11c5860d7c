use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use crate::error::CheckError;
use crate::http::ProbeRequest;
use crate::models::{Endpoint, EvidenceType, Finding, OwaspCategory, Severity};
use crate::rules::{Checker, Observations, ProbeBudget};

/// API9:2023 Improper Inventory Management
///
/// Public API documentation, non-production or deprecated surfaces, and
/// older API versions still answering next to the current one.
pub struct InventoryChecker;

const DOC_MARKERS: &[&str] = &[
    "swagger", "openapi", "api-docs", "redoc", "graphiql", "graphql/schema", "docs",
];

const SHADOW_SEGMENTS: &[&str] = &[
    "legacy", "old", "deprecated", "beta", "alpha", "dev", "test", "staging", "internal", "debug",
];

static VERSION_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v(\d+)$").expect("version segment pattern is valid"));

impl InventoryChecker {
    fn is_documentation(endpoint: &Endpoint) -> bool {
        let path = endpoint.path.to_lowercase();
        DOC_MARKERS.iter().any(|m| path.contains(m))
    }

    fn shadow_segment(endpoint: &Endpoint) -> Option<String> {
        endpoint
            .segments()
            .map(str::to_lowercase)
            .find(|s| SHADOW_SEGMENTS.contains(&s.as_str()))
    }

    /// Same URL with `/vN/` lowered to `/v(N-1)/`.
    fn previous_version(endpoint: &Endpoint) -> Option<(String, String)> {
        let mut url = url::Url::parse(&endpoint.url).ok()?;
        let segments: Vec<String> = url.path_segments()?.map(str::to_string).collect();

        let (index, version) = segments.iter().enumerate().find_map(|(i, s)| {
            let caps = VERSION_SEGMENT.captures(s)?;
            caps[1].parse::<u32>().ok().map(|n| (i, n))
        })?;
        if version < 2 {
            return None;
        }

        let older = format!("v{}", version - 1);
        let mut rewritten = segments;
        rewritten[index] = older.clone();
        url.set_path(&format!("/{}", rewritten.join("/")));
        Some((url.to_string(), older))
    }
}

#[async_trait]
impl Checker for InventoryChecker {
    fn category(&self) -> OwaspCategory {
        OwaspCategory::ImproperInventoryManagement
    }

    fn name(&self) -> &'static str {
        "inventory"
    }

    fn applies(&self, endpoint: &Endpoint) -> bool {
        endpoint.is_success()
            && (Self::is_documentation(endpoint)
                || Self::shadow_segment(endpoint).is_some()
                || Self::previous_version(endpoint).is_some())
    }

    async fn run(
        &self,
        endpoint: &Endpoint,
        probe: &mut ProbeBudget<'_>,
    ) -> Result<Option<Finding>, CheckError> {
        let mut obs = Observations::new(self.category(), self.name());

        if Self::is_documentation(endpoint) {
            obs.add(
                Severity::Medium,
                "API documentation publicly exposed",
                EvidenceType::StatusCode,
                format!("{} answered {}", endpoint.path, endpoint.status()),
            );
        }

        if let Some(segment) = Self::shadow_segment(endpoint) {
            obs.add(
                Severity::Medium,
                "Non-production or deprecated API surface reachable",
                EvidenceType::StatusCode,
                format!("path segment '{}' answered {}", segment, endpoint.status()),
            );
        }

        if let Some((url, older)) = Self::previous_version(endpoint) {
            let request = ProbeRequest::new(endpoint.method, url.clone());
            if let Some(response) = probe.send(request).await? {
                if response.is_success() {
                    obs.add(
                        Severity::Medium,
                        "Previous API version still served",
                        EvidenceType::Probe,
                        format!("{} ({}) answered {}", url, older, response.status),
                    );
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
    async fn test_swagger_exposed() {
        let endpoint = testing::get("/swagger.json", 200, &[], r#"{"swagger": "2.0"}"#);
        assert!(InventoryChecker.applies(&endpoint));
        let finding = InventoryChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_legacy_segment() {
        let endpoint = testing::get("/api/legacy/users", 200, &[], "[]");
        let finding = InventoryChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert!(finding.evidence.details.contains("legacy"));
    }

    #[test]
    fn test_previous_version() {
        let endpoint = testing::get("/api/v3/users", 200, &[], "[]");
        let (url, older) = InventoryChecker::previous_version(&endpoint).unwrap();
        assert_eq!(url, "http://example.test/api/v2/users");
        assert_eq!(older, "v2");

        let first = testing::get("/api/v1/users", 200, &[], "[]");
        assert!(InventoryChecker::previous_version(&first).is_none());
    }

    #[test]
    fn test_regular_endpoint_not_applicable() {
        let endpoint = testing::get("/api/v1/users", 200, &[], "[]");
        assert!(!InventoryChecker.applies(&endpoint));
    }
}
