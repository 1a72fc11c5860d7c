use async_trait::async_trait;

use crate::error::CheckError;
use crate::http::ProbeRequest;
use crate::models::{Endpoint, EvidenceType, Finding, OwaspCategory, Severity};
use crate::rules::signals::PRIVILEGED_PATH_KEYWORDS;
use crate::rules::{Checker, Observations, ProbeBudget};

/// API5:2023 Broken Function Level Authorization
///
/// Administrative functions reachable by an ordinary caller, and
/// state-changing methods accepted without credentials. A denied
/// privileged path is retried once with role-escalation headers.
pub struct FunctionAuthChecker;

const ESCALATION_HEADERS: &[(&str, &str)] = &[
    ("X-Role", "admin"),
    ("X-User-Role", "admin"),
    ("X-Admin", "true"),
    ("X-Forwarded-For", "127.0.0.1"),
];

impl FunctionAuthChecker {
    fn is_privileged(endpoint: &Endpoint) -> bool {
        endpoint.path_contains_any(PRIVILEGED_PATH_KEYWORDS)
    }
}

#[async_trait]
impl Checker for FunctionAuthChecker {
    fn category(&self) -> OwaspCategory {
        OwaspCategory::BrokenFunctionLevelAuthorization
    }

    fn name(&self) -> &'static str {
        "function-authorization"
    }

    fn applies(&self, endpoint: &Endpoint) -> bool {
        Self::is_privileged(endpoint) || endpoint.method.is_destructive()
    }

    async fn run(
        &self,
        endpoint: &Endpoint,
        probe: &mut ProbeBudget<'_>,
    ) -> Result<Option<Finding>, CheckError> {
        let mut obs = Observations::new(self.category(), self.name());
        let privileged = Self::is_privileged(endpoint);

        if privileged && endpoint.is_success() {
            obs.add(
                Severity::Critical,
                "Administrative function reachable",
                EvidenceType::StatusCode,
                format!("{} {} answered {}", endpoint.method, endpoint.path, endpoint.status()),
            );
        }

        if endpoint.method.is_destructive() && endpoint.is_success() && !endpoint.authenticated {
            obs.add(
                Severity::High,
                "State-changing method accepted without credentials",
                EvidenceType::StatusCode,
                format!("{} answered {} with no credentials sent", endpoint.method, endpoint.status()),
            );
        }

        if privileged && endpoint.is_access_denied() {
            let mut request = ProbeRequest::new(endpoint.method, endpoint.url.clone())
                .header("X-Original-URL", endpoint.resolved_path());
            for (name, value) in ESCALATION_HEADERS {
                request = request.header(*name, *value);
            }
            if let Some(escalated) = probe.send(request).await? {
                if escalated.is_success() {
                    obs.add(
                        Severity::Critical,
                        "Access control bypassed with client-supplied role headers",
                        EvidenceType::Probe,
                        format!(
                            "{} -> {} after adding X-Role / X-Original-URL headers",
                            endpoint.status(),
                            escalated.status
                        ),
                    );
                }
            }
        }

        Ok(obs.into_finding(endpoint))
    }
}
