use thiserror::Error;

/// Failure of a single HTTP request. Recovered locally: a discovery miss or
/// a failed probe never aborts sibling work.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("request cancelled")]
    Cancelled,

    #[error("request failed: {0}")]
    Request(String),
}

impl NetworkError {
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_connect() {
            NetworkError::Connect(err.to_string())
        } else if err.is_timeout() {
            NetworkError::Timeout(timeout_secs)
        } else {
            NetworkError::Request(err.to_string())
        }
    }
}

/// Raised inside a checker. The rule engine turns it into an inconclusive
/// finding for that checker's category.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("confirmatory probe failed: {0}")]
    Probe(#[from] NetworkError),

    #[error("checker already used its confirmatory probe")]
    ProbeBudgetExhausted,

    #[error("internal checker error: {0}")]
    Internal(String),
}

/// Failure talking to the external SQL-injection analyzer. Recorded as a
/// scan warning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    #[error("analyzer unreachable: {0}")]
    Http(String),

    #[error("unexpected analyzer response: {0}")]
    Protocol(String),

    #[error("analyzer did not finish within {0}s")]
    Timeout(u64),

    #[error("analyzer task failed: {0}")]
    Task(String),
}

/// Invalid scan setup. Fatal to the whole scan and raised before any target
/// starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read target file {path}: {source}")]
    TargetFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid target on line {line}: {value}")]
    InvalidTarget { line: usize, value: String },

    #[error("target file contains no targets")]
    NoTargets,

    #[error("failed to read wordlist {path}: {source}")]
    Wordlist {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}

/// Errors visible outside the detection engine.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("target {target} unreachable: {source}")]
    TargetUnreachable {
        target: String,
        #[source]
        source: NetworkError,
    },

    #[error("scan cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, ScanError>;
