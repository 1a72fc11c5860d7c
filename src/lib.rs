pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod models;
pub mod reporter;
pub mod rules;
pub mod scanner;
pub mod scoring;
pub mod sqli;

pub use config::{ScanConfig, SqliConfig};
pub use discovery::Discoverer;
pub use error::{AdapterError, CheckError, ConfigError, NetworkError, ScanError};
pub use models::{
    Endpoint, EndpointReport, Finding, HttpMethod, OwaspCategory, ScanReport, Severity, Target,
    TargetState, Tier,
};
pub use reporter::{BurpExporter, ConsoleReporter, JsonExporter, PostmanExporter, ReportSink};
pub use rules::{Checker, RuleEngine};
pub use scanner::Orchestrator;
pub use scoring::RiskScorer;
pub use sqli::{InjectionRequest, SqliAnalyzer, SqliDispatcher, SqlmapApiAnalyzer, Verdict};
