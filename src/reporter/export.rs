use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tera::{Context as TeraContext, Tera};

use super::ReportSink;
use crate::models::{HttpMethod, ScanReport, ScanSummary, Severity};

pub struct JsonExporter;

#[derive(Serialize, Deserialize)]
struct ExportData {
    tool: String,
    version: String,
    scan_time: String,
    interrupted: bool,
    summary: ScanSummary,
    findings: SeverityBuckets,
    reports: Vec<ScanReport>,
}

/// Findings grouped by severity, flattened across targets.
#[derive(Default, Serialize, Deserialize)]
struct SeverityBuckets {
    critical: Vec<BucketEntry>,
    high: Vec<BucketEntry>,
    medium: Vec<BucketEntry>,
    low: Vec<BucketEntry>,
    info: Vec<BucketEntry>,
}

#[derive(Serialize, Deserialize)]
struct BucketEntry {
    target: String,
    method: HttpMethod,
    url: String,
    category: String,
    title: String,
    detector: String,
    description: String,
    evidence: String,
}

impl SeverityBuckets {
    fn from_reports(reports: &[ScanReport]) -> Self {
        let mut buckets = Self::default();
        for report in reports {
            for finding in report.endpoints.iter().flat_map(|e| &e.findings) {
                let entry = BucketEntry {
                    target: report.target.clone(),
                    method: finding.endpoint.method,
                    url: finding.endpoint.url.clone(),
                    category: finding.category.id().to_string(),
                    title: finding.category.title().to_string(),
                    detector: finding.detector.clone(),
                    description: finding.description.clone(),
                    evidence: finding.evidence.details.clone(),
                };
                let bucket = match finding.severity {
                    Severity::Critical => &mut buckets.critical,
                    Severity::High => &mut buckets.high,
                    Severity::Medium => &mut buckets.medium,
                    Severity::Low => &mut buckets.low,
                    Severity::Info => &mut buckets.info,
                };
                bucket.push(entry);
            }
        }
        buckets
    }
}

impl JsonExporter {
    /// Reads the reports back out of a saved JSON report.
    pub fn load(path: &Path) -> Result<Vec<ScanReport>> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let data: ExportData = serde_json::from_str(&content)
            .with_context(|| format!("{} is not an APISentinel report", path.display()))?;
        Ok(data.reports)
    }
}

impl ReportSink for JsonExporter {
    fn file_name(&self) -> &'static str {
        "api_sentinel_report.json"
    }

    fn render(&self, reports: &[ScanReport]) -> Result<String> {
        let output = ExportData {
            tool: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            scan_time: Utc::now().to_rfc3339(),
            interrupted: reports.iter().any(|r| r.interrupted),
            summary: ScanSummary::from_reports(reports),
            findings: SeverityBuckets::from_reports(reports),
            reports: reports.to_vec(),
        };
        Ok(serde_json::to_string_pretty(&output)?)
    }
}

/// Burp Suite "saved items" XML: one item per discovered endpoint with a
/// reconstructed request and the captured response.
pub struct BurpExporter;

#[derive(Serialize)]
struct BurpItem {
    time: String,
    url: String,
    host: String,
    port: u16,
    protocol: String,
    method: String,
    path: String,
    request: String,
    status: u16,
    response_length: usize,
    mime_type: String,
    response: String,
    comment: String,
}

impl BurpExporter {
    fn items(reports: &[ScanReport]) -> Vec<BurpItem> {
        let mut items = Vec::new();
        for report in reports {
            let time = report
                .finished_at
                .unwrap_or(report.started_at)
                .format("%a %b %d %H:%M:%S UTC %Y")
                .to_string();

            for endpoint_report in &report.endpoints {
                let endpoint = &endpoint_report.endpoint;
                let Ok(url) = url::Url::parse(&endpoint.url) else {
                    continue;
                };
                let host = url.host_str().unwrap_or_default().to_string();
                let path = match url.query() {
                    Some(q) => format!("{}?{}", url.path(), q),
                    None => url.path().to_string(),
                };

                let body = if endpoint.method.requires_body() {
                    endpoint
                        .request_body_example
                        .as_ref()
                        .map(|b| b.to_string())
                        .unwrap_or_else(|| "{}".to_string())
                } else {
                    String::new()
                };
                let mut request = format!(
                    "{} {} HTTP/1.1\r\nHost: {}\r\nAccept: application/json\r\n",
                    endpoint.method, path, host
                );
                if !body.is_empty() {
                    request.push_str(&format!(
                        "Content-Type: application/json\r\nContent-Length: {}\r\n",
                        body.len()
                    ));
                }
                request.push_str("\r\n");
                request.push_str(&body);

                let mut response = format!("HTTP/1.1 {}\r\n", endpoint.response.status);
                for (name, value) in &endpoint.response.headers {
                    response.push_str(&format!("{}: {}\r\n", name, value));
                }
                response.push_str("\r\n");
                response.push_str(&endpoint.response.body_sample);

                let comment = endpoint_report
                    .findings
                    .iter()
                    .map(|f| format!("[{}] {} {}", f.severity, f.category.id(), f.description))
                    .collect::<Vec<_>>()
                    .join(" | ");

                items.push(BurpItem {
                    time: time.clone(),
                    url: cdata(&endpoint.url),
                    host: xml_escape(&host),
                    port: url.port_or_known_default().unwrap_or(80),
                    protocol: url.scheme().to_string(),
                    method: endpoint.method.to_string(),
                    path: cdata(&path),
                    request: cdata(&request),
                    status: endpoint.response.status,
                    response_length: endpoint.response.size,
                    mime_type: if endpoint.response.is_json() { "JSON" } else { "text" }.to_string(),
                    response: cdata(&response),
                    comment: xml_escape(&format!("{} tier: {}", endpoint_report.tier(), comment)),
                });
            }
        }
        items
    }

    fn template() -> &'static str {
        r#"<?xml version="1.0"?>
<!DOCTYPE items [
<!ELEMENT items (item*)>
<!ATTLIST items burpVersion CDATA "">
<!ATTLIST items exportTime CDATA "">
<!ELEMENT item (time, url, host, port, protocol, method, path, extension, request, status, responselength, mimetype, response, comment)>
<!ELEMENT time (#PCDATA)>
<!ELEMENT url (#PCDATA)>
<!ELEMENT host (#PCDATA)>
<!ATTLIST host ip CDATA "">
<!ELEMENT port (#PCDATA)>
<!ELEMENT protocol (#PCDATA)>
<!ELEMENT method (#PCDATA)>
<!ELEMENT path (#PCDATA)>
<!ELEMENT extension (#PCDATA)>
<!ELEMENT request (#PCDATA)>
<!ATTLIST request base64 (true|false) "false">
<!ELEMENT status (#PCDATA)>
<!ELEMENT responselength (#PCDATA)>
<!ELEMENT mimetype (#PCDATA)>
<!ELEMENT response (#PCDATA)>
<!ATTLIST response base64 (true|false) "false">
<!ELEMENT comment (#PCDATA)>
]>
<items burpVersion="{{ version }}" exportTime="{{ export_time }}">
{%- for item in items %}
  <item>
    <time>{{ item.time }}</time>
    <url>{{ item.url }}</url>
    <host ip="">{{ item.host }}</host>
    <port>{{ item.port }}</port>
    <protocol>{{ item.protocol }}</protocol>
    <method>{{ item.method }}</method>
    <path>{{ item.path }}</path>
    <extension>null</extension>
    <request base64="false">{{ item.request }}</request>
    <status>{{ item.status }}</status>
    <responselength>{{ item.response_length }}</responselength>
    <mimetype>{{ item.mime_type }}</mimetype>
    <response base64="false">{{ item.response }}</response>
    <comment>{{ item.comment }}</comment>
  </item>
{%- endfor %}
</items>
"#
    }
}

impl ReportSink for BurpExporter {
    fn file_name(&self) -> &'static str {
        "api_sentinel_burp.xml"
    }

    fn render(&self, reports: &[ScanReport]) -> Result<String> {
        let mut tera = Tera::default();
        // no file extension on the name keeps autoescaping off; values are
        // escaped or CDATA-wrapped beforehand
        tera.add_raw_template("burp_items", Self::template())?;

        let mut context = TeraContext::new();
        context.insert("version", env!("CARGO_PKG_VERSION"));
        context.insert("export_time", &Utc::now().format("%a %b %d %H:%M:%S UTC %Y").to_string());
        context.insert("items", &Self::items(reports));

        Ok(tera.render("burp_items", &context)?)
    }
}

fn cdata(value: &str) -> String {
    format!("<![CDATA[{}]]>", value.replace("]]>", "]]]]><![CDATA[>"))
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
