use async_trait::async_trait;

use crate::error::CheckError;
use crate::http::ProbeRequest;
use crate::models::{Endpoint, Evidence, EvidenceType, Finding, HttpMethod, OwaspCategory, Severity};
use crate::rules::signals::{AUTH_PATH_KEYWORDS, has_rate_limit_headers};
use crate::rules::{Checker, Observations, ProbeBudget};

/// API2:2023 Broken Authentication
///
/// Records endpoints that refuse unauthenticated access (the SQLi
/// dispatcher skips those), and looks for weak authentication surfaces:
/// credentials over cleartext, session cookies without `Secure` /
/// `HttpOnly`, login flows with no brute-force signal, and servers that
/// accept a forged bearer token.
pub struct AuthenticationChecker;

const FORGED_TOKEN: &str = "Bearer apisentinel.invalid.token";

impl AuthenticationChecker {
    fn is_auth_flow(endpoint: &Endpoint) -> bool {
        endpoint.path_contains_any(AUTH_PATH_KEYWORDS)
    }

    fn weak_cookies(endpoint: &Endpoint) -> Vec<String> {
        let Some(cookie) = endpoint.header("set-cookie") else {
            return Vec::new();
        };
        let lower = cookie.to_lowercase();
        let mut missing = Vec::new();
        if !lower.contains("httponly") {
            missing.push("HttpOnly".to_string());
        }
        if endpoint.is_https() && !lower.contains("secure") {
            missing.push("Secure".to_string());
        }
        missing
    }
}

#[async_trait]
impl Checker for AuthenticationChecker {
    fn category(&self) -> OwaspCategory {
        OwaspCategory::BrokenAuthentication
    }

    fn name(&self) -> &'static str {
        "broken-authentication"
    }

    fn applies(&self, endpoint: &Endpoint) -> bool {
        endpoint.is_access_denied() || Self::is_auth_flow(endpoint) || endpoint.authenticated
    }

    async fn run(
        &self,
        endpoint: &Endpoint,
        probe: &mut ProbeBudget<'_>,
    ) -> Result<Option<Finding>, CheckError> {
        if endpoint.is_access_denied() && !endpoint.authenticated {
            return Ok(Some(Finding::new(
                endpoint,
                self.category(),
                Severity::Info,
                self.name(),
                "Authentication enforced",
                Evidence::access_denied(endpoint.status()),
            )));
        }

        let mut obs = Observations::new(self.category(), self.name());

        if Self::is_auth_flow(endpoint) && endpoint.response.status < 500 {
            if !endpoint.is_https() {
                obs.add(
                    Severity::High,
                    "Authentication flow served over cleartext HTTP",
                    EvidenceType::StatusCode,
                    format!("{} is reachable over http://", endpoint.url),
                );
            }
            if !has_rate_limit_headers(&endpoint.response) && endpoint.method == HttpMethod::Post {
                obs.add(
                    Severity::Medium,
                    "No brute-force protection advertised on authentication flow",
                    EvidenceType::Header,
                    "no RateLimit / X-RateLimit / Retry-After headers",
                );
            }
        }

        let weak = Self::weak_cookies(endpoint);
        if !weak.is_empty() {
            obs.add(
                Severity::Medium,
                "Session cookie missing protective attributes",
                EvidenceType::Header,
                format!("Set-Cookie lacks {}", weak.join(", ")),
            );
        }

        if endpoint.authenticated && endpoint.is_success() && endpoint.method == HttpMethod::Get {
            let request = ProbeRequest::get(endpoint.url.clone())
                .without_auth()
                .header("Authorization", FORGED_TOKEN);
            if let Some(forged) = probe.send(request).await? {
                if forged.is_success() && forged.size == endpoint.response.size {
                    obs.add(
                        Severity::High,
                        "Endpoint accepts a forged bearer token",
                        EvidenceType::Probe,
                        format!("forged token answered {} with an identical body size", forged.status),
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
    async fn test_denied_endpoint_marked() {
        let endpoint = testing::get("/api/admin", 401, &[], "");
        assert!(AuthenticationChecker.applies(&endpoint));
        let finding = AuthenticationChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert!(finding.marks_access_denied());
        assert_eq!(finding.severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_cleartext_login() {
        let endpoint = testing::endpoint(
            HttpMethod::Post,
            "http://example.test",
            "/api/auth/login",
            200,
            &[],
            r#"{"token": "x"}"#,
        );
        let finding = AuthenticationChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::High);
        assert!(finding.evidence.details.contains("brute-force"));
    }

    #[tokio::test]
    async fn test_weak_cookie_on_https() {
        let endpoint = testing::endpoint(
            HttpMethod::Get,
            "https://example.test",
            "/session",
            200,
            &[("Set-Cookie", "sid=abc; Path=/")],
            "",
        );
        let finding = AuthenticationChecker
            .run(&endpoint, &mut ProbeBudget::offline())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(finding.severity, Severity::Medium);
        assert!(finding.evidence.details.contains("HttpOnly"));
        assert!(finding.evidence.details.contains("Secure"));
    }

    #[tokio::test]
    async fn test_unrelated_endpoint_not_applicable() {
        let endpoint = testing::get("/api/products", 200, &[], "[]");
        assert!(!AuthenticationChecker.applies(&endpoint));
    }
}
