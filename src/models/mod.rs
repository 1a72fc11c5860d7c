mod endpoint;
mod finding;
mod report;
mod response;
mod target;

pub use endpoint::{Endpoint, HttpMethod, Param, ParamLocation, ParamType, PathTemplate};
pub(crate) use endpoint::is_object_id;
pub use finding::{EndpointRef, Evidence, EvidenceType, Finding, OwaspCategory, Severity};
pub use report::{
    EndpointReport, IssueKind, ScanIssue, ScanReport, ScanSummary, TargetState, Tier,
};
pub use response::{DEFAULT_BODY_SAMPLE_LIMIT, ResponseInfo};
pub use target::Target;
