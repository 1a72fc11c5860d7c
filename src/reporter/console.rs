use colored::{ColoredString, Colorize};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Rows},
};

use crate::models::{IssueKind, ScanReport, ScanSummary, Tier};
use crate::scoring::RiskScorer;

pub struct ConsoleReporter;

#[derive(Tabled)]
struct TableRow {
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "Status")]
    status: u16,
    #[tabled(rename = "Top finding")]
    headline: String,
    #[tabled(rename = "Findings")]
    findings: usize,
    #[tabled(rename = "Tier")]
    tier: String,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self
    }

    /// Tier colors: critical red, high orange, medium yellow, low blue,
    /// info gray, none green.
    pub fn paint(tier: Tier) -> ColoredString {
        let label = tier.to_string();
        match tier {
            Tier::Critical => label.red().bold(),
            Tier::High => label.truecolor(255, 140, 0),
            Tier::Medium => label.yellow(),
            Tier::Low => label.blue(),
            Tier::Info => label.bright_black(),
            Tier::None => "OK".green(),
        }
    }

    pub fn print_report(&self, report: &ScanReport) {
        let state = if report.is_failed() {
            "FAILED".red().bold()
        } else if report.interrupted {
            "INTERRUPTED".yellow().bold()
        } else {
            "DONE".green().bold()
        };
        println!(
            "\n{} {} ({} endpoints, {} requests, {:.2}s)",
            state,
            report.target.white().bold(),
            report.endpoints.len(),
            report.requests_sent,
            report.duration_ms() as f64 / 1000.0
        );

        for error in &report.errors {
            println!("  {} {}", "error:".red(), error.message);
        }

        if report.endpoints.is_empty() {
            return;
        }

        let rows: Vec<TableRow> = report
            .endpoints
            .iter()
            .map(|e| TableRow {
                endpoint: e.endpoint.display_path(),
                status: e.endpoint.status(),
                headline: RiskScorer::headline(&e.findings)
                    .map(|f| format!("{} {}", f.category.id(), f.description))
                    .unwrap_or_else(|| "-".to_string()),
                findings: e.findings.len(),
                tier: Self::paint(e.tier()).to_string(),
            })
            .collect();

        let table = Table::new(rows)
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()))
            .to_string();

        println!("{}", table);
    }

    pub fn print_details(&self, reports: &[ScanReport]) {
        let vulnerable: Vec<_> = reports
            .iter()
            .flat_map(|r| &r.endpoints)
            .filter(|e| e.is_vulnerable())
            .collect();

        if vulnerable.is_empty() {
            return;
        }

        println!("\n{}", "Findings".bold().underline());

        for report in vulnerable {
            println!(
                "\n[{}] {}",
                Self::paint(report.tier()),
                report.endpoint.url.white().bold()
            );

            for finding in &report.findings {
                println!(
                    "  → {} {}: {}",
                    finding.category.id().yellow(),
                    finding.category.title(),
                    finding.description
                );
                println!("    {}: {}", "Evidence".cyan(), finding.evidence.details);
            }
        }
    }

    pub fn print_warnings(&self, reports: &[ScanReport]) {
        let warnings: Vec<_> = reports
            .iter()
            .flat_map(|r| r.warnings.iter().map(move |w| (&r.target, w)))
            .filter(|(_, w)| w.kind != IssueKind::CheckerInternal)
            .collect();

        if warnings.is_empty() {
            return;
        }

        println!("\n{}", "Warnings".bold().underline());
        for (target, warning) in warnings {
            match &warning.endpoint {
                Some(endpoint) => println!("  {} {}: {}", target.dimmed(), endpoint, warning.message),
                None => println!("  {} {}", target.dimmed(), warning.message),
            }
        }
    }

    pub fn print_summary(&self, reports: &[ScanReport]) {
        let summary = ScanSummary::from_reports(reports);

        println!("\n{}", "Summary".bold().underline());
        println!(
            "{} targets ({} failed), {} endpoints",
            summary.targets, summary.failed_targets, summary.total_endpoints
        );

        let counts = [
            (Tier::Critical, summary.critical_count),
            (Tier::High, summary.high_count),
            (Tier::Medium, summary.medium_count),
            (Tier::Low, summary.low_count),
            (Tier::Info, summary.info_count),
        ];
        for (tier, count) in counts {
            if count > 0 {
                println!("  {}: {}", Self::paint(tier), count);
            }
        }
        println!("  {}: {}", Self::paint(Tier::None), summary.ok_count);
        println!();
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_labels() {
        colored::control::set_override(false);
        assert_eq!(ConsoleReporter::paint(Tier::High).to_string(), "HIGH");
        assert_eq!(ConsoleReporter::paint(Tier::None).to_string(), "OK");
    }
}
