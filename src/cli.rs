use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{self, ScanConfig, SqliConfig};
use crate::error::ConfigError;

#[derive(Parser)]
#[command(name = "apisentinel")]
#[command(version, about = "API attack-surface scanner for the OWASP API Security Top 10")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Log scan progress
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log every request and state transition
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover and assess every target in a target file
    Scan(ScanArgs),

    /// Print a saved JSON report and optionally re-export it
    Report {
        #[arg(short, long)]
        input: PathBuf,

        /// Directory to re-export Postman / Burp files into
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the OWASP categories and the checks behind them
    Categories,
}

#[derive(Args)]
pub struct ScanArgs {
    /// Newline-delimited list of target base URLs
    #[arg(short, long)]
    pub file: PathBuf,

    #[arg(short, long, default_value = "apisentinel_results")]
    pub output: PathBuf,

    #[arg(short, long, default_value = "5")]
    pub threads: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "5")]
    pub timeout: u64,

    /// Comma-separated HTTP methods to try on each path
    #[arg(short, long, default_value = "GET,POST,PUT,DELETE,OPTIONS")]
    pub methods: String,

    /// Comma-separated OWASP categories (API1..API10, or names like bola, ssrf)
    #[arg(short, long, default_value = "all")]
    pub categories: String,

    /// File with one path per line, replacing the built-in wordlist
    #[arg(short, long)]
    pub wordlist: Option<PathBuf>,

    /// Requests per second across all workers, 0 for unlimited
    #[arg(long, default_value = "20")]
    pub rate_limit: u32,

    /// Header sent with every request, e.g. "Authorization: Bearer <token>"
    #[arg(long)]
    pub auth: Option<String>,

    #[arg(long)]
    pub user_agent: Option<String>,

    /// Do not follow OpenAPI / Swagger documents found during discovery
    #[arg(long)]
    pub no_openapi: bool,

    /// Send parameterized endpoints to a running sqlmapapi server
    #[arg(long)]
    pub sqli: bool,

    #[arg(long, default_value = "http://127.0.0.1:8775")]
    pub sqli_api: String,

    /// Maximum sqlmap tasks per target
    #[arg(long, default_value = "10")]
    pub sqli_max: usize,

    /// Seconds to wait for a single sqlmap task
    #[arg(long, default_value = "300")]
    pub sqli_timeout: u64,

    /// Skip the console findings table
    #[arg(short, long)]
    pub quiet: bool,
}

impl ScanArgs {
    /// Builds the scan configuration. The result still has to pass
    /// `ScanConfig::validate`.
    pub fn to_config(&self) -> Result<ScanConfig, ConfigError> {
        let defaults = ScanConfig::default();

        let wordlist = match &self.wordlist {
            Some(path) => config::load_wordlist(path)?,
            None => defaults.wordlist,
        };
        let auth_header = self.auth.as_deref().map(config::parse_header).transpose()?;

        Ok(ScanConfig {
            threads: self.threads,
            timeout_secs: self.timeout,
            methods: config::parse_methods(&self.methods)?,
            wordlist,
            enabled_categories: config::parse_categories(&self.categories)?,
            rate_limit_rps: self.rate_limit,
            user_agent: self.user_agent.clone().unwrap_or(defaults.user_agent),
            auth_header,
            follow_openapi: !self.no_openapi,
            sqli: SqliConfig {
                enabled: self.sqli,
                api_url: self.sqli_api.clone(),
                max_per_target: self.sqli_max,
                timeout_secs: self.sqli_timeout,
                ..defaults.sqli
            },
            absent_statuses: defaults.absent_statuses,
            body_sample_limit: defaults.body_sample_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpMethod;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("apisentinel").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_scan_defaults_match_config_defaults() {
        let cli = parse(&["scan", "-f", "targets.txt"]);
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan command");
        };
        let config = args.to_config().unwrap();
        let defaults = ScanConfig::default();

        assert_eq!(config.threads, defaults.threads);
        assert_eq!(config.timeout_secs, defaults.timeout_secs);
        assert_eq!(config.methods, defaults.methods);
        assert_eq!(config.enabled_categories.len(), 10);
        assert_eq!(config.rate_limit_rps, defaults.rate_limit_rps);
        assert_eq!(config.wordlist, defaults.wordlist);
        assert!(!config.sqli.enabled);
        assert!(config.follow_openapi);
    }

    #[test]
    fn test_scan_flags() {
        let cli = parse(&[
            "scan", "-f", "t.txt", "-c", "bola,ssrf", "-m", "get,post", "--auth",
            "X-Api-Key: k", "--sqli", "--sqli-max", "3", "--debug",
        ]);
        assert!(cli.debug);
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan command");
        };
        let config = args.to_config().unwrap();
        assert_eq!(config.enabled_categories.len(), 2);
        assert_eq!(config.methods, vec![HttpMethod::Get, HttpMethod::Post]);
        assert_eq!(config.auth_header, Some(("X-Api-Key".to_string(), "k".to_string())));
        assert!(config.sqli.enabled);
        assert_eq!(config.sqli.max_per_target, 3);
    }

    #[test]
    fn test_bad_category_is_config_error() {
        let cli = parse(&["scan", "-f", "t.txt", "-c", "API99"]);
        let Commands::Scan(args) = cli.command else {
            panic!("expected scan command");
        };
        assert!(matches!(args.to_config(), Err(ConfigError::Invalid(_))));
    }
}
