use cfwall_policy::Diff;
use serde_json::Value as Json;

/// Where a bucket stands in the run. `DiscoveryFailed`, `ParseFailed`,
/// `InSync`, `Planned`, `Updated` and `WriteFailed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketState {
    Pending,
    RegionResolved,
    PolicyFetched,
    DiscoveryFailed,
    ParseFailed,
    InSync,
    UpdateNeeded,
    /// Update computed in a dry run and not submitted.
    Planned,
    Updated,
    WriteFailed,
}

/// One bucket's work item for a single run.
#[derive(Debug)]
pub struct TargetBucket {
    pub name: String,
    pub region: Option<String>,
    /// Parsed current policy; `None` when the bucket had none.
    pub current: Option<Json>,
    pub diff: Option<Diff>,
    pub state: BucketState,
    pub get_error: Option<anyhow::Error>,
    pub parse_error: Option<serde_json::Error>,
    pub put_error: Option<anyhow::Error>,
}

impl TargetBucket {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: None,
            current: None,
            diff: None,
            state: BucketState::Pending,
            get_error: None,
            parse_error: None,
            put_error: None,
        }
    }

    pub fn differs(&self) -> bool {
        self.diff.is_some_and(|d| d.differs())
    }

    /// Discovery or parse failure; either one blocks the write pass.
    pub fn failed_discovery(&self) -> bool {
        self.get_error.is_some() || self.parse_error.is_some()
    }

    pub(crate) fn fail_get(&mut self, err: anyhow::Error) {
        self.get_error = Some(err);
        self.state = BucketState::DiscoveryFailed;
    }

    pub(crate) fn fail_parse(&mut self, err: serde_json::Error) {
        self.parse_error = Some(err);
        self.state = BucketState::ParseFailed;
    }

    pub(crate) fn fail_put(&mut self, err: anyhow::Error) {
        self.put_error = Some(err);
        self.state = BucketState::WriteFailed;
    }

    pub(crate) fn record_diff(&mut self, diff: Diff) {
        self.state = if diff.differs() { BucketState::UpdateNeeded } else { BucketState::InSync };
        self.diff = Some(diff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cfwall_policy::DiffReason;

    #[test]
    fn new_bucket_is_pending_and_clean() {
        let b = TargetBucket::new("a");
        assert_eq!(b.state, BucketState::Pending);
        assert!(!b.differs());
        assert!(!b.failed_discovery());
    }

    #[test]
    fn record_diff_moves_state() {
        let mut b = TargetBucket::new("a");
        b.record_diff(Diff::InSync);
        assert_eq!(b.state, BucketState::InSync);
        assert!(!b.differs());
        b.record_diff(Diff::Differs(DiffReason::Stale));
        assert_eq!(b.state, BucketState::UpdateNeeded);
        assert!(b.differs());
    }

    #[test]
    fn parse_failure_counts_as_discovery_failure() {
        let mut b = TargetBucket::new("a");
        let err = serde_json::from_str::<Json>("{").unwrap_err();
        b.fail_parse(err);
        assert!(b.failed_discovery());
        assert_eq!(b.state, BucketState::ParseFailed);
    }
}
