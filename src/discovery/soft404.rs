use std::collections::{BTreeSet, HashMap};

use crate::models::{HttpMethod, ResponseInfo};

/// Path that no real API serves; its responses describe what "not found"
/// looks like on a given host.
pub const CANARY_PATH: &str = "/apisentinel-canary-0c1d4e/not-found";

/// Per-method "not found" fingerprints for one target.
#[derive(Debug, Default)]
pub struct Soft404 {
    canaries: HashMap<HttpMethod, ResponseInfo>,
}

impl Soft404 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, method: HttpMethod, response: ResponseInfo) {
        self.canaries.insert(method, response);
    }

    /// Whether `response` should be treated as "nothing here".
    ///
    /// An absent status is kept only when its body is JSON that does not
    /// match the canary's shape. A success identical to the canary's own
    /// success (catch-all route) is dropped.
    pub fn is_absent(&self, method: HttpMethod, response: &ResponseInfo, absent_statuses: &[u16]) -> bool {
        let canary = self.canaries.get(&method);

        if absent_statuses.contains(&response.status) {
            if !response.is_json() {
                return true;
            }
            return match canary {
                Some(c) => Self::same_shape(c, response),
                None => false,
            };
        }

        match canary {
            Some(c) if c.status == response.status && !absent_statuses.contains(&c.status) => {
                Self::same_shape(c, response)
            }
            _ => false,
        }
    }

    fn same_shape(canary: &ResponseInfo, response: &ResponseInfo) -> bool {
        if canary.status != response.status {
            return false;
        }
        match (canary.is_json(), response.is_json()) {
            (true, true) => {
                let a: BTreeSet<&String> = canary.keys.iter().collect();
                let b: BTreeSet<&String> = response.keys.iter().collect();
                a == b
            }
            (false, false) => canary.fingerprint() == response.fingerprint(),
            _ => false,
        }
    }
}
