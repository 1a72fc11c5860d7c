mod console;
mod export;
mod postman;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub use console::ConsoleReporter;
pub use export::{BurpExporter, JsonExporter};
pub use postman::PostmanExporter;

use crate::models::ScanReport;

/// A file format the finished scan is written to.
pub trait ReportSink {
    fn file_name(&self) -> &'static str;

    fn render(&self, reports: &[ScanReport]) -> Result<String>;

    /// Renders into `dir/<file_name>`, creating `dir` if needed.
    fn write(&self, reports: &[ScanReport], dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
        let path = dir.join(self.file_name());
        let content = self.render(reports)?;
        fs::write(&path, content).with_context(|| format!("Failed to write to {}", path.display()))?;
        Ok(path)
    }
}

/// Every file format, in the order they are written.
pub fn all_sinks() -> Vec<Box<dyn ReportSink>> {
    vec![
        Box::new(JsonExporter),
        Box::new(PostmanExporter),
        Box::new(BurpExporter),
    ]
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::models::{
        Endpoint, EndpointReport, Evidence, Finding, HttpMethod, OwaspCategory, ResponseInfo,
        ScanReport, Severity, TargetState,
    };
    use crate::scoring::RiskScorer;

    pub fn sample_reports() -> Vec<ScanReport> {
        let endpoint = Endpoint::new(
            "http://example.test/users/1".into(),
            "/users/{id}".into(),
            HttpMethod::Get,
            ResponseInfo::new(
                200,
                [("content-type".to_string(), "application/json".to_string())].into(),
                br#"{"id": 1, "email": "a@example.test"}"#,
            ),
        );
        let finding = Finding::new(
            &endpoint,
            OwaspCategory::BrokenObjectLevelAuthorization,
            Severity::High,
            "bola",
            "Object returned without any authorization check",
            Evidence::status(200),
        );
        let mut scored = EndpointReport::new(endpoint, vec![finding]);
        RiskScorer::apply(&mut scored);

        let mut done = ScanReport::new("http://example.test");
        done.state = TargetState::Done;
        done.endpoints.push(scored);

        let mut failed = ScanReport::new("http://127.0.0.1:1");
        failed.state = TargetState::Failed;

        vec![done, failed]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_sinks_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");
        let reports = testing::sample_reports();

        for sink in all_sinks() {
            let path = sink.write(&reports, &out).unwrap();
            assert!(path.exists());
            assert!(fs::metadata(&path).unwrap().len() > 0);
        }
    }
}
