use async_trait::async_trait;

use crate::error::CheckError;
use crate::models::{Endpoint, EvidenceType, Finding, OwaspCategory, Severity};
use crate::rules::signals::PRIVILEGED_PROPERTIES;
use crate::rules::{Checker, Observations, ProbeBudget, SensitiveFields};

/// API3:2023 Broken Object Property Level Authorization
///
/// Excessive data exposure: sensitive properties in responses. Mass
/// assignment surface: privileged properties echoed back by write
/// endpoints.
pub struct PropertyAuthChecker;

impl PropertyAuthChecker {
    fn privileged_properties(keys: &[String]) -> Vec<&String> {
        keys.iter()
            .filter(|k| {
                let leaf = k.rsplit('.').next().unwrap_or(k.as_str()).to_lowercase();
                PRIVILEGED_PROPERTIES.contains(&leaf.as_str())
            })
            .collect()
    }
}

#[async_trait]
impl Checker for PropertyAuthChecker {
    fn category(&self) -> OwaspCategory {
        OwaspCategory::BrokenObjectPropertyLevelAuthorization
    }

    fn name(&self) -> &'static str {
        "property-authorization"
    }

    fn applies(&self, endpoint: &Endpoint) -> bool {
        endpoint.is_success() && endpoint.response.is_json()
    }

    async fn run(
        &self,
        endpoint: &Endpoint,
        _probe: &mut ProbeBudget<'_>,
    ) -> Result<Option<Finding>, CheckError> {
        let mut obs = Observations::new(self.category(), self.name());
        let keys = &endpoint.response.keys;

        let sensitive = SensitiveFields::shared().find(keys);
        if !sensitive.is_empty() {
            let names: Vec<&str> = sensitive.iter().map(|s| s.as_str()).collect();
            obs.add(
                Severity::High,
                "Sensitive properties exposed in response",
                EvidenceType::SensitiveFields,
                format!("fields: {}", names.join(", ")),
            );
        }

        if endpoint.method.requires_body() {
            let privileged = Self::privileged_properties(keys);
            if !privileged.is_empty() {
                let names: Vec<&str> = privileged.iter().map(|s| s.as_str()).collect();
                obs.add(
                    Severity::Medium,
                    "Write endpoint returns privileged properties (mass assignment surface)",
                    EvidenceType::SensitiveFields,
                    format!("fields: {}", names.join(", ")),
                );
            }
        }

        Ok(obs.into_finding(endpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpMethod;
    use crate::rules::testing;

    #[tokio::test]
    async fn test_sensitive_fields_are_high() {
        let endpoint = testing::get(
            "/api/users",
            200,
            &[],
            r#"[{"id": 1, "email": "a@b.c", "password_hash": "x"}]"#,
        );
        assert!(PropertyAuthChecker.applies(&endpoint));
        let finding = PropertyAuthChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::High);
        assert!(finding.evidence.details.contains("password_hash"));
    }

    #[tokio::test]
    async fn test_mass_assignment_surface() {
        let endpoint = testing::endpoint(
            HttpMethod::Put,
            "http://example.test",
            "/api/profile",
            200,
            &[],
            r#"{"name": "x", "role": "user", "is_admin": false}"#,
        );
        let finding = PropertyAuthChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::Medium);
        assert!(finding.evidence.details.contains("is_admin"));
    }

    #[tokio::test]
    async fn test_clean_response() {
        let endpoint = testing::get("/api/products", 200, &[], r#"[{"sku": "a", "price": 3}]"#);
        let finding = PropertyAuthChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap();
        assert!(finding.is_none());
    }
}
