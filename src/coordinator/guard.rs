use crate::backend::Timestamp;
use crate::coordinator::RequestKind;
use std::time::Duration;

/// Proof that an admission was recorded for a resource.
///
/// Obtained from [Coordinator::admit](crate::Coordinator::admit), which waits as long as the
/// resource's ceilings require and records the admission in every applicable dimension before
/// handing the guard out.
///
/// This is not a transaction: dropping the guard does nothing, and the admission stays counted
/// whether or not the protected work succeeds. The limiter bounds attempts, not completions.
#[derive(Debug, Clone)]
pub struct AdmissionGuard {
    pub(super) resource: String,
    pub(super) kind: RequestKind,
    pub(super) waited: Duration,
    pub(super) admitted_at: Timestamp,
}

impl AdmissionGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Total time spent waiting before the admission was recorded.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// The timestamp recorded against each dimension.
    pub fn admitted_at(&self) -> Timestamp {
        self.admitted_at
    }
}
