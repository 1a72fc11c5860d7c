use async_trait::async_trait;

use crate::error::CheckError;
use crate::http::ProbeRequest;
use crate::models::{Endpoint, EvidenceType, Finding, HttpMethod, OwaspCategory, Severity};
use crate::rules::signals::{discloses_version, error_leaks};
use crate::rules::{Checker, Observations, ProbeBudget};

/// API8:2023 Security Misconfiguration
///
/// Header hygiene (CORS, HSTS, nosniff), version banners and verbose
/// error bodies. One probe checks whether an arbitrary `Origin` is
/// reflected together with credentials.
pub struct MisconfigurationChecker;

const PROBE_ORIGIN: &str = "https://apisentinel-origin.example";

impl MisconfigurationChecker {
    fn cors_issues(endpoint: &Endpoint, obs: &mut Observations) {
        let Some(origin) = endpoint.header("access-control-allow-origin") else {
            return;
        };
        let credentials = endpoint
            .header("access-control-allow-credentials")
            .is_some_and(|v| v.eq_ignore_ascii_case("true"));

        if origin.trim() == "*" && credentials {
            obs.add(
                Severity::High,
                "Wildcard CORS origin combined with credentials",
                EvidenceType::Header,
                "Access-Control-Allow-Origin: * with Access-Control-Allow-Credentials: true",
            );
        } else if origin.trim() == "*" {
            obs.add(
                Severity::Medium,
                "Wildcard CORS origin",
                EvidenceType::Header,
                "Access-Control-Allow-Origin: *",
            );
        }
    }

    fn header_hygiene(endpoint: &Endpoint, obs: &mut Observations) {
        let mut missing = Vec::new();
        if !endpoint.response.has_header("x-content-type-options") {
            missing.push("X-Content-Type-Options");
        }
        if endpoint.is_https() && !endpoint.response.has_header("strict-transport-security") {
            missing.push("Strict-Transport-Security");
        }
        if !missing.is_empty() {
            obs.add(
                Severity::Low,
                "Security headers missing",
                EvidenceType::Header,
                format!("missing {}", missing.join(", ")),
            );
        }

        let banners: Vec<String> = ["server", "x-powered-by", "x-aspnet-version"]
            .iter()
            .filter_map(|h| endpoint.header(h).map(|v| (h, v)))
            .filter(|(_, v)| discloses_version(v))
            .map(|(h, v)| format!("{}: {}", h, v))
            .collect();
        if !banners.is_empty() {
            obs.add(
                Severity::Low,
                "Software version disclosed in response headers",
                EvidenceType::Header,
                banners.join(", "),
            );
        }
    }
}

#[async_trait]
impl Checker for MisconfigurationChecker {
    fn category(&self) -> OwaspCategory {
        OwaspCategory::SecurityMisconfiguration
    }

    fn name(&self) -> &'static str {
        "misconfiguration"
    }

    fn applies(&self, _endpoint: &Endpoint) -> bool {
        true
    }

    async fn run(
        &self,
        endpoint: &Endpoint,
        probe: &mut ProbeBudget<'_>,
    ) -> Result<Option<Finding>, CheckError> {
        let mut obs = Observations::new(self.category(), self.name());

        Self::cors_issues(endpoint, &mut obs);
        Self::header_hygiene(endpoint, &mut obs);

        let leaks = error_leaks(&endpoint.response.body_sample);
        if !leaks.is_empty() {
            obs.add(
                Severity::Medium,
                "Verbose error details exposed",
                EvidenceType::BodyPattern,
                leaks.join(", "),
            );
        }

        if endpoint.is_success() && endpoint.response.exposes_graphql_schema() {
            obs.add(
                Severity::Medium,
                "GraphQL introspection enabled",
                EvidenceType::BodyPattern,
                format!("{} {} answered an introspection query with its schema", endpoint.method, endpoint.path),
            );
        }

        if endpoint.method == HttpMethod::Get && endpoint.status() < 500 {
            let request = ProbeRequest::get(endpoint.url.clone()).header("Origin", PROBE_ORIGIN);
            if let Some(response) = probe.send(request).await? {
                let reflected = response.header("access-control-allow-origin") == Some(PROBE_ORIGIN);
                let credentials = response
                    .header("access-control-allow-credentials")
                    .is_some_and(|v| v.eq_ignore_ascii_case("true"));
                if reflected && credentials {
                    obs.add(
                        Severity::High,
                        "Arbitrary origin reflected with credentials",
                        EvidenceType::Probe,
                        format!("Origin: {} echoed in Access-Control-Allow-Origin", PROBE_ORIGIN),
                    );
                } else if reflected {
                    obs.add(
                        Severity::Medium,
                        "Arbitrary origin reflected",
                        EvidenceType::Probe,
                        format!("Origin: {} echoed in Access-Control-Allow-Origin", PROBE_ORIGIN),
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

    const HARDENED: &[(&str, &str)] = &[("X-Content-Type-Options", "nosniff")];

    #[tokio::test]
    async fn test_wildcard_cors_with_credentials_is_high() {
        let endpoint = testing::get(
            "/api/me",
            200,
            &[
                ("Access-Control-Allow-Origin", "*"),
                ("Access-Control-Allow-Credentials", "true"),
                ("X-Content-Type-Options", "nosniff"),
            ],
            "{}",
        );
        let finding = MisconfigurationChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::High);
    }

    #[tokio::test]
    async fn test_stack_trace_is_medium() {
        let endpoint = testing::get(
            "/api/search",
            500,
            HARDENED,
            "Traceback (most recent call last):\n  File \"app.py\", line 3",
        );
        let finding = MisconfigurationChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::Medium);
        assert!(finding.evidence.details.contains("Python traceback"));
    }

    #[tokio::test]
    async fn test_missing_headers_and_banner_are_low() {
        let endpoint = testing::get("/", 200, &[("Server", "nginx/1.18.0")], "ok");
        let finding = MisconfigurationChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::Low);
        assert!(finding.evidence.details.contains("X-Content-Type-Options"));
        assert!(finding.evidence.details.contains("nginx/1.18.0"));
    }

    #[tokio::test]
    async fn test_graphql_introspection_is_medium() {
        let endpoint = testing::endpoint(
            HttpMethod::Post,
            "http://example.test",
            "/graphql",
            200,
            HARDENED,
            r#"{"data": {"__schema": {"types": [{"name": "Query"}]}}}"#,
        );
        let finding = MisconfigurationChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::Medium);
        assert_eq!(finding.description, "GraphQL introspection enabled");
    }

    #[tokio::test]
    async fn test_hardened_endpoint_is_clean() {
        let endpoint = testing::get("/", 200, HARDENED, "ok");
        let finding = MisconfigurationChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap();
        assert!(finding.is_none());
    }
}
