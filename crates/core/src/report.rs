use std::fmt;

use thiserror::Error;

use crate::bucket::TargetBucket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every bucket already carried the current managed statement.
    InSync,
    Updated,
    /// Dry run: updates were computed for differing buckets but not submitted.
    Planned,
    /// Some bucket could not be read or parsed; nothing was written.
    AbortedBeforeWrites,
    PartialWriteFailure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFailure {
    pub bucket: String,
    pub get: Option<String>,
    pub parse: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteFailure {
    pub bucket: String,
    pub put: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("{0} bucket(s) failed to get or parse current bucket policies; no policies were written")]
    Aborted(usize),
    #[error("{failed} bucket(s) failed to put updated bucket policy ({updated} updated)")]
    WriteFailures { failed: usize, updated: usize },
}

/// Summary of one run, for the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub in_sync: usize,
    pub updated: usize,
    /// Updates computed but not submitted (dry run).
    pub planned: usize,
    pub discovery_failures: Vec<DiscoveryFailure>,
    pub write_failures: Vec<WriteFailure>,
}

impl RunReport {
    pub(crate) fn from_buckets(outcome: RunOutcome, buckets: &[TargetBucket], updated: usize, planned: usize) -> Self {
        let discovery_failures = buckets
            .iter()
            .filter(|b| b.failed_discovery())
            .map(|b| DiscoveryFailure {
                bucket: b.name.clone(),
                get: b.get_error.as_ref().map(|e| format!("{e:#}")),
                parse: b.parse_error.as_ref().map(|e| e.to_string()),
            })
            .collect();
        let write_failures = buckets
            .iter()
            .filter_map(|b| {
                b.put_error.as_ref().map(|e| WriteFailure { bucket: b.name.clone(), put: format!("{e:#}") })
            })
            .collect();
        Self {
            outcome,
            in_sync: buckets.iter().filter(|b| b.diff.is_some() && !b.differs()).count(),
            updated,
            planned,
            discovery_failures,
            write_failures,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::InSync | RunOutcome::Updated | RunOutcome::Planned)
    }

    pub fn into_result(self) -> Result<RunReport, ReconcileError> {
        match self.outcome {
            RunOutcome::AbortedBeforeWrites => Err(ReconcileError::Aborted(self.discovery_failures.len())),
            RunOutcome::PartialWriteFailure => Err(ReconcileError::WriteFailures {
                failed: self.write_failures.len(),
                updated: self.updated,
            }),
            RunOutcome::InSync | RunOutcome::Updated | RunOutcome::Planned => Ok(self),
        }
    }
}

fn write_row(f: &mut fmt::Formatter<'_>, cells: &[&str], widths: &[usize]) -> fmt::Result {
    let padded: Vec<String> = cells.iter().zip(widths).map(|(c, &w)| format!("{c:<w$}")).collect();
    writeln!(f, "| {} |", padded.join(" | "))
}

fn render_table(f: &mut fmt::Formatter<'_>, headers: &[&str], rows: &[Vec<String>]) -> fmt::Result {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }
    write_row(f, headers, &widths)?;
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(f, "|-{}-|", rule.join("-|-"))?;
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        write_row(f, &cells, &widths)?;
    }
    Ok(())
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            RunOutcome::AbortedBeforeWrites => {
                writeln!(f, "Following buckets failed to get or parse current bucket policies:")?;
                let rows: Vec<Vec<String>> = self
                    .discovery_failures
                    .iter()
                    .map(|r| vec![r.bucket.clone(), r.get.clone().unwrap_or_default(), r.parse.clone().unwrap_or_default()])
                    .collect();
                return render_table(f, &["bucket", "get", "parse"], &rows);
            }
            RunOutcome::InSync => return writeln!(f, "All bucket policies are up to date!"),
            RunOutcome::Planned => {
                return writeln!(f, "Bucket policy updates planned (dry run) for {} buckets", self.planned)
            }
            RunOutcome::Updated | RunOutcome::PartialWriteFailure => {}
        }
        writeln!(f, "Bucket policies updated for {} buckets", self.updated)?;
        if !self.write_failures.is_empty() {
            writeln!(f, "Following buckets failed to put updated bucket policy:")?;
            let rows: Vec<Vec<String>> =
                self.write_failures.iter().map(|r| vec![r.bucket.clone(), r.put.clone()]).collect();
            render_table(f, &["bucket", "put"], &rows)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: RunOutcome) -> RunReport {
        RunReport {
            outcome,
            in_sync: 0,
            updated: 0,
            planned: 0,
            discovery_failures: Vec::new(),
            write_failures: Vec::new(),
        }
    }

    #[test]
    fn aborted_report_renders_failure_table() {
        let mut r = report(RunOutcome::AbortedBeforeWrites);
        r.discovery_failures.push(DiscoveryFailure {
            bucket: "broken".to_string(),
            get: None,
            parse: Some("expected value at line 1 column 1".to_string()),
        });
        let text = r.to_string();
        assert!(text.starts_with("Following buckets failed to get or parse"));
        assert!(text.contains("| bucket | get | parse"));
        assert!(text.contains("| broken |     | expected value at line 1 column 1 |"));
        assert_eq!(r.into_result(), Err(ReconcileError::Aborted(1)));
    }

    #[test]
    fn write_failures_fail_the_run() {
        let mut r = report(RunOutcome::PartialWriteFailure);
        r.updated = 2;
        r.write_failures.push(WriteFailure { bucket: "b".to_string(), put: "AccessDenied".to_string() });
        assert!(!r.is_success());
        let text = r.to_string();
        assert!(text.contains("Bucket policies updated for 2 buckets"));
        assert!(text.contains("| b      | AccessDenied |"));
        assert_eq!(r.into_result(), Err(ReconcileError::WriteFailures { failed: 1, updated: 2 }));
    }

    #[test]
    fn planned_report_is_distinct_from_updated() {
        let mut r = report(RunOutcome::Planned);
        r.planned = 3;
        assert!(r.is_success());
        assert_eq!(r.to_string(), "Bucket policy updates planned (dry run) for 3 buckets\n");
        assert!(r.into_result().is_ok());
    }

    #[test]
    fn in_sync_is_success() {
        let r = report(RunOutcome::InSync);
        assert!(r.is_success());
        assert_eq!(r.to_string(), "All bucket policies are up to date!\n");
        assert!(r.into_result().is_ok());
    }
}
