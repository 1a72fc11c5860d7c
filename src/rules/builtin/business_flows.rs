use async_trait::async_trait;

use crate::error::CheckError;
use crate::models::{Endpoint, EvidenceType, Finding, OwaspCategory, Severity};
use crate::rules::signals::{BUSINESS_FLOW_KEYWORDS, has_rate_limit_headers};
use crate::rules::{Checker, Observations, ProbeBudget};

/// API6:2023 Unrestricted Access to Sensitive Business Flows
pub struct BusinessFlowChecker;

const ANTI_AUTOMATION_MARKERS: &[&str] = &["captcha", "recaptcha", "hcaptcha", "turnstile", "challenge"];

impl BusinessFlowChecker {
    fn has_anti_automation(endpoint: &Endpoint) -> bool {
        let body = endpoint.response.body_sample.to_lowercase();
        ANTI_AUTOMATION_MARKERS.iter().any(|m| body.contains(m))
            || endpoint.response.keys.iter().any(|k| k.to_lowercase().contains("captcha"))
    }
}

#[async_trait]
impl Checker for BusinessFlowChecker {
    fn category(&self) -> OwaspCategory {
        OwaspCategory::UnrestrictedAccessToSensitiveBusinessFlows
    }

    fn name(&self) -> &'static str {
        "business-flows"
    }

    fn applies(&self, endpoint: &Endpoint) -> bool {
        endpoint.path_contains_any(BUSINESS_FLOW_KEYWORDS)
            && !endpoint.is_access_denied()
            && endpoint.status() < 500
    }

    async fn run(
        &self,
        endpoint: &Endpoint,
        _probe: &mut ProbeBudget<'_>,
    ) -> Result<Option<Finding>, CheckError> {
        let mut obs = Observations::new(self.category(), self.name());

        if !has_rate_limit_headers(&endpoint.response) && !Self::has_anti_automation(endpoint) {
            obs.add(
                Severity::Medium,
                "Sensitive business flow exposed without anti-automation controls",
                EvidenceType::Header,
                format!(
                    "{} {} answered {} with no rate-limit headers or captcha challenge",
                    endpoint.method,
                    endpoint.path,
                    endpoint.status()
                ),
            );
        }

        Ok(obs.into_finding(endpoint))
    }
}
