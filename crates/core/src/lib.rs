//! Fleet reconciliation: read every target bucket's policy, decide which ones
//! lack the current managed statement, and rewrite only those.
//!
//! A run has two passes with a gate between them. Pass one resolves each
//! bucket's region, fetches its policy and diffs it. If any bucket failed that
//! pass, nothing is written. Pass two puts the updated policy of every
//! differing bucket, isolating write failures per bucket.

mod bucket;
mod report;

use async_trait::async_trait;
use cfwall_policy::{CurrentPolicy, ManagedPolicy};
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, instrument, warn};

pub use bucket::{BucketState, TargetBucket};
pub use report::{DiscoveryFailure, ReconcileError, RunOutcome, RunReport, WriteFailure};

/// The object-storage control plane, as far as a run needs it.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Region the bucket lives in.
    async fn bucket_region(&self, bucket: &str) -> anyhow::Result<String>;
    /// Raw policy text; `Ok(None)` when the bucket has no policy.
    async fn get_bucket_policy(&self, region: &str, bucket: &str) -> anyhow::Result<Option<String>>;
    async fn put_bucket_policy(&self, region: &str, bucket: &str, policy: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Buckets discovered at once during pass one.
    pub concurrency: usize,
    /// Compute updates without submitting them.
    pub dry_run: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self { concurrency: 1, dry_run: false }
    }
}

pub struct Reconciler<S> {
    store: S,
    options: Options,
}

impl<S: BucketStore> Reconciler<S> {
    pub fn new(store: S, options: Options) -> Self {
        Self { store, options }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn run(&self, buckets: &[String], policy: &ManagedPolicy) -> RunReport {
        let mut targets: Vec<TargetBucket> = stream::iter(buckets.iter().map(TargetBucket::new))
            .map(|bucket| self.discover(bucket, policy))
            .buffered(self.options.concurrency.max(1))
            .collect()
            .await;

        let failed = targets.iter().filter(|b| b.failed_discovery()).count();
        if failed > 0 {
            for b in targets.iter().filter(|b| b.failed_discovery()) {
                error!(
                    bucket = %b.name,
                    get = ?b.get_error.as_ref().map(|e| format!("{e:#}")),
                    parse = ?b.parse_error.as_ref().map(|e| e.to_string()),
                    "failed to get or parse current bucket policy"
                );
            }
            warn!(failed, "aborting before writes");
            return RunReport::from_buckets(RunOutcome::AbortedBeforeWrites, &targets, 0, 0);
        }

        if !targets.iter().any(TargetBucket::differs) {
            info!(buckets = targets.len(), "all bucket policies are up to date");
            return RunReport::from_buckets(RunOutcome::InSync, &targets, 0, 0);
        }

        let (updated, planned) = self.update(&mut targets, policy).await;
        info!(updated, planned, "bucket policies updated");

        let outcome = if targets.iter().any(|b| b.put_error.is_some()) {
            RunOutcome::PartialWriteFailure
        } else if self.options.dry_run {
            RunOutcome::Planned
        } else {
            RunOutcome::Updated
        };
        RunReport::from_buckets(outcome, &targets, updated, planned)
    }

    #[instrument(skip_all, fields(bucket = %bucket.name))]
    async fn discover(&self, mut bucket: TargetBucket, policy: &ManagedPolicy) -> TargetBucket {
        let region = match self.store.bucket_region(&bucket.name).await {
            Ok(region) => region,
            Err(err) => {
                bucket.fail_get(err);
                return bucket;
            }
        };
        debug!(%region, "resolved bucket region");
        bucket.region = Some(region.clone());
        bucket.state = BucketState::RegionResolved;

        let raw = match self.store.get_bucket_policy(&region, &bucket.name).await {
            Ok(raw) => raw,
            Err(err) => {
                bucket.fail_get(err);
                return bucket;
            }
        };
        bucket.state = BucketState::PolicyFetched;
        match &raw {
            Some(text) => debug!(bytes = text.len(), "fetched bucket policy"),
            None => debug!("bucket has no policy"),
        }

        let current = CurrentPolicy::parse(raw.as_deref());
        match policy.diff(&bucket.name, &current) {
            Some(diff) => {
                debug!(?diff, "compared managed statement");
                bucket.record_diff(diff);
                if let CurrentPolicy::Parsed(doc) = current {
                    bucket.current = Some(doc);
                }
            }
            None => {
                if let CurrentPolicy::Unparsable(err) = current {
                    bucket.fail_parse(err);
                }
            }
        }
        bucket
    }

    async fn update(&self, targets: &mut [TargetBucket], policy: &ManagedPolicy) -> (usize, usize) {
        let mut updated = 0;
        let mut planned = 0;
        for bucket in targets.iter_mut().filter(|b| b.differs()) {
            let Some(region) = bucket.region.clone() else {
                bucket.fail_put(anyhow::anyhow!("bucket region was never resolved"));
                continue;
            };
            let doc = policy.apply(&bucket.name, bucket.current.take());
            let text = match serde_json::to_string(&doc) {
                Ok(text) => text,
                Err(err) => {
                    bucket.fail_put(err.into());
                    continue;
                }
            };
            bucket.current = Some(doc);

            if self.options.dry_run {
                info!(bucket = %bucket.name, %region, policy = %text, "dry run, policy not submitted");
                bucket.state = BucketState::Planned;
                planned += 1;
                continue;
            }
            match self.store.put_bucket_policy(&region, &bucket.name, &text).await {
                Ok(()) => {
                    debug!(bucket = %bucket.name, "policy updated");
                    bucket.state = BucketState::Updated;
                    updated += 1;
                }
                Err(err) => {
                    error!(bucket = %bucket.name, error = %format!("{err:#}"), "failed to put bucket policy");
                    bucket.fail_put(err);
                }
            }
        }
        (updated, planned)
    }
}
