use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::discovery::wordlist;
use crate::error::ConfigError;
use crate::models::{HttpMethod, OwaspCategory, Target};

/// Scan-wide settings. Frozen once the orchestrator starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub threads: usize,
    pub timeout_secs: u64,
    pub methods: Vec<HttpMethod>,
    pub wordlist: Vec<String>,
    /// Statuses treated as "nothing here" unless the soft-404 check says
    /// otherwise.
    pub absent_statuses: Vec<u16>,
    pub enabled_categories: Vec<OwaspCategory>,
    /// Token-bucket refill rate shared by every worker. `0` disables it.
    pub rate_limit_rps: u32,
    pub user_agent: String,
    pub auth_header: Option<(String, String)>,
    pub body_sample_limit: usize,
    pub follow_openapi: bool,
    pub sqli: SqliConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            threads: 5,
            timeout_secs: 5,
            methods: HttpMethod::DEFAULT_SET.to_vec(),
            wordlist: wordlist::default_paths(),
            absent_statuses: vec![404, 405, 501],
            enabled_categories: OwaspCategory::ALL.to_vec(),
            rate_limit_rps: 20,
            user_agent: "APISentinel/2.0".to_string(),
            auth_header: None,
            body_sample_limit: crate::models::DEFAULT_BODY_SAMPLE_LIMIT,
            follow_openapi: true,
            sqli: SqliConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliConfig {
    pub enabled: bool,
    pub api_url: String,
    pub max_per_target: usize,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for SqliConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: "http://127.0.0.1:8775".to_string(),
            max_per_target: 10,
            timeout_secs: 300,
            poll_interval_ms: 2000,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 {
            return Err(ConfigError::Invalid("thread count must be at least 1".into()));
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout must be at least 1 second".into()));
        }
        if self.methods.is_empty() {
            return Err(ConfigError::Invalid("no HTTP methods selected".into()));
        }
        if self.wordlist.is_empty() {
            return Err(ConfigError::Invalid("wordlist is empty".into()));
        }
        if self.enabled_categories.is_empty() {
            return Err(ConfigError::Invalid("no OWASP categories enabled".into()));
        }
        if let Some((name, _)) = &self.auth_header {
            if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err() {
                return Err(ConfigError::Invalid(format!("invalid auth header name '{}'", name)));
            }
        }
        if self.sqli.enabled {
            if self.sqli.max_per_target == 0 {
                return Err(ConfigError::Invalid(
                    "SQLi dispatch enabled with a per-target cap of 0".into(),
                ));
            }
            url::Url::parse(&self.sqli.api_url).map_err(|e| {
                ConfigError::Invalid(format!("invalid SQLi analyzer URL '{}': {}", self.sqli.api_url, e))
            })?;
        }
        Ok(())
    }

    pub fn category_enabled(&self, category: OwaspCategory) -> bool {
        self.enabled_categories.contains(&category)
    }
}

/// Parses `Name: value`.
pub fn parse_header(input: &str) -> Result<(String, String), ConfigError> {
    let (name, value) = input
        .split_once(':')
        .ok_or_else(|| ConfigError::Invalid(format!("expected 'Name: value', got '{}'", input)))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::Invalid(format!("empty header name in '{}'", input)));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Parses a comma-separated category list; `all` selects every category.
pub fn parse_categories(input: &str) -> Result<Vec<OwaspCategory>, ConfigError> {
    if input.trim().eq_ignore_ascii_case("all") {
        return Ok(OwaspCategory::ALL.to_vec());
    }

    let mut categories = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let category = OwaspCategory::parse(part)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown OWASP category '{}'", part)))?;
        if !categories.contains(&category) {
            categories.push(category);
        }
    }
    categories.sort();
    Ok(categories)
}

pub fn parse_methods(input: &str) -> Result<Vec<HttpMethod>, ConfigError> {
    let mut methods = Vec::new();
    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let method = HttpMethod::parse(part).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "invalid HTTP method '{}'. Supported: GET, POST, PUT, PATCH, DELETE, HEAD, OPTIONS",
                part
            ))
        })?;
        if !methods.contains(&method) {
            methods.push(method);
        }
    }
    Ok(methods)
}

/// Reads a newline-delimited target file. Blank lines and `#` comments are
/// skipped; bare hosts get an `https://` scheme.
pub fn load_targets(path: impl AsRef<Path>) -> Result<Vec<Target>, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::TargetFile {
        path: path.display().to_string(),
        source,
    })?;
    parse_targets(&content)
}

pub fn parse_targets(content: &str) -> Result<Vec<Target>, ConfigError> {
    let mut targets: Vec<Target> = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed)
        };

        let parsed = url::Url::parse(&candidate).map_err(|_| ConfigError::InvalidTarget {
            line: idx + 1,
            value: trimmed.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(ConfigError::InvalidTarget {
                line: idx + 1,
                value: trimmed.to_string(),
            });
        }

        let target = Target::new(candidate);
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    if targets.is_empty() {
        return Err(ConfigError::NoTargets);
    }

    Ok(targets)
}

/// Reads a wordlist file: one path template per line, `#` comments allowed.
pub fn load_wordlist(path: impl AsRef<Path>) -> Result<Vec<String>, ConfigError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Wordlist {
        path: path.display().to_string(),
        source,
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}
