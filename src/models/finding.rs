use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Endpoint, HttpMethod};

/// OWASP API Security Top 10 (2023). Declaration order is report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OwaspCategory {
    BrokenObjectLevelAuthorization,
    BrokenAuthentication,
    BrokenObjectPropertyLevelAuthorization,
    UnrestrictedResourceConsumption,
    BrokenFunctionLevelAuthorization,
    UnrestrictedAccessToSensitiveBusinessFlows,
    ServerSideRequestForgery,
    SecurityMisconfiguration,
    ImproperInventoryManagement,
    UnsafeConsumptionOfApis,
}

impl OwaspCategory {
    pub const ALL: [OwaspCategory; 10] = [
        OwaspCategory::BrokenObjectLevelAuthorization,
        OwaspCategory::BrokenAuthentication,
        OwaspCategory::BrokenObjectPropertyLevelAuthorization,
        OwaspCategory::UnrestrictedResourceConsumption,
        OwaspCategory::BrokenFunctionLevelAuthorization,
        OwaspCategory::UnrestrictedAccessToSensitiveBusinessFlows,
        OwaspCategory::ServerSideRequestForgery,
        OwaspCategory::SecurityMisconfiguration,
        OwaspCategory::ImproperInventoryManagement,
        OwaspCategory::UnsafeConsumptionOfApis,
    ];

    /// `API1:2023` style identifier.
    pub fn id(&self) -> &'static str {
        match self {
            OwaspCategory::BrokenObjectLevelAuthorization => "API1:2023",
            OwaspCategory::BrokenAuthentication => "API2:2023",
            OwaspCategory::BrokenObjectPropertyLevelAuthorization => "API3:2023",
            OwaspCategory::UnrestrictedResourceConsumption => "API4:2023",
            OwaspCategory::BrokenFunctionLevelAuthorization => "API5:2023",
            OwaspCategory::UnrestrictedAccessToSensitiveBusinessFlows => "API6:2023",
            OwaspCategory::ServerSideRequestForgery => "API7:2023",
            OwaspCategory::SecurityMisconfiguration => "API8:2023",
            OwaspCategory::ImproperInventoryManagement => "API9:2023",
            OwaspCategory::UnsafeConsumptionOfApis => "API10:2023",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            OwaspCategory::BrokenObjectLevelAuthorization => "Broken Object Level Authorization",
            OwaspCategory::BrokenAuthentication => "Broken Authentication",
            OwaspCategory::BrokenObjectPropertyLevelAuthorization => {
                "Broken Object Property Level Authorization"
            }
            OwaspCategory::UnrestrictedResourceConsumption => "Unrestricted Resource Consumption",
            OwaspCategory::BrokenFunctionLevelAuthorization => "Broken Function Level Authorization",
            OwaspCategory::UnrestrictedAccessToSensitiveBusinessFlows => {
                "Unrestricted Access to Sensitive Business Flows"
            }
            OwaspCategory::ServerSideRequestForgery => "Server Side Request Forgery",
            OwaspCategory::SecurityMisconfiguration => "Security Misconfiguration",
            OwaspCategory::ImproperInventoryManagement => "Improper Inventory Management",
            OwaspCategory::UnsafeConsumptionOfApis => "Unsafe Consumption of APIs",
        }
    }

    /// Accepts `API1`, `api1:2023`, `1` or the short names `bola`, `ssrf`, ...
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_lowercase();
        let short = lower
            .trim_start_matches("api")
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string();

        if let Ok(n) = short.parse::<usize>() {
            return (1..=10).contains(&n).then(|| Self::ALL[n - 1]);
        }

        match lower.as_str() {
            "bola" => Some(OwaspCategory::BrokenObjectLevelAuthorization),
            "auth" | "authentication" => Some(OwaspCategory::BrokenAuthentication),
            "bopla" | "mass-assignment" => {
                Some(OwaspCategory::BrokenObjectPropertyLevelAuthorization)
            }
            "resources" | "rate-limit" => Some(OwaspCategory::UnrestrictedResourceConsumption),
            "bfla" => Some(OwaspCategory::BrokenFunctionLevelAuthorization),
            "business-flows" => Some(OwaspCategory::UnrestrictedAccessToSensitiveBusinessFlows),
            "ssrf" => Some(OwaspCategory::ServerSideRequestForgery),
            "misconfig" | "misconfiguration" => Some(OwaspCategory::SecurityMisconfiguration),
            "inventory" => Some(OwaspCategory::ImproperInventoryManagement),
            "unsafe-consumption" | "injection" => Some(OwaspCategory::UnsafeConsumptionOfApis),
            _ => None,
        }
    }
}

impl fmt::Display for OwaspCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.id(), self.title())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn numeric_value(&self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 3,
            Severity::Critical => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceType {
    StatusCode,
    Header,
    BodyPattern,
    SensitiveFields,
    Probe,
    AccessDenied,
    AnalyzerOutput,
    Inconclusive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_type: EvidenceType,
    pub details: String,
}

impl Evidence {
    pub fn new(evidence_type: EvidenceType, details: impl Into<String>) -> Self {
        Self {
            evidence_type,
            details: details.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self::new(EvidenceType::StatusCode, format!("HTTP {}", status))
    }

    pub fn access_denied(status: u16) -> Self {
        Self::new(
            EvidenceType::AccessDenied,
            format!("Unauthenticated request answered with {}", status),
        )
    }

    pub fn sensitive_fields(fields: &[&String]) -> Self {
        let list: Vec<&str> = fields.iter().map(|s| s.as_str()).collect();
        Self::new(
            EvidenceType::SensitiveFields,
            format!("Fields: {}", list.join(", ")),
        )
    }
}

/// Identifies the endpoint a finding belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointRef {
    pub method: HttpMethod,
    pub url: String,
}

impl From<&Endpoint> for EndpointRef {
    fn from(endpoint: &Endpoint) -> Self {
        Self {
            method: endpoint.method,
            url: endpoint.url.clone(),
        }
    }
}

impl fmt::Display for EndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub endpoint: EndpointRef,
    pub category: OwaspCategory,
    pub severity: Severity,
    pub detector: String,
    pub description: String,
    pub evidence: Evidence,
}

impl Finding {
    pub fn new(
        endpoint: &Endpoint,
        category: OwaspCategory,
        severity: Severity,
        detector: impl Into<String>,
        description: impl Into<String>,
        evidence: Evidence,
    ) -> Self {
        Self {
            endpoint: EndpointRef::from(endpoint),
            category,
            severity,
            detector: detector.into(),
            description: description.into(),
            evidence,
        }
    }

    /// Informational finding recorded when a checker could not finish.
    pub fn inconclusive(
        endpoint: &Endpoint,
        category: OwaspCategory,
        detector: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            endpoint,
            category,
            Severity::Info,
            detector,
            "Check inconclusive",
            Evidence::new(EvidenceType::Inconclusive, reason),
        )
    }

    pub fn is_inconclusive(&self) -> bool {
        self.evidence.evidence_type == EvidenceType::Inconclusive
    }

    pub fn marks_access_denied(&self) -> bool {
        self.evidence.evidence_type == EvidenceType::AccessDenied
    }
}
